//! 缓存块结构

use crate::sync::SleepLock;
use alloc::boxed::Box;
use bitflags::bitflags;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, Ordering};

/// 缓存块 ID：缓冲池数组下标
pub type BufferId = usize;

bitflags! {
    /// 缓存块标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CacheFlags: u8 {
        /// 数据已从设备读入（有效）
        const VALID = 0x01;
        /// 数据已被持有者修改（脏）
        const DIRTY = 0x02;
    }
}

/// 缓存块
///
/// 缓冲池中的一个固定槽位。槽位在初始化时分配，之后只会被重新绑定到
/// 其它块，不会被创建或销毁。
///
/// 元数据（块号、引用计数、释放时间戳）不在这里，而是跟着槽位记录
/// 挂在所属分桶里，由分桶锁保护。这里只保存：
///
/// - `lock`: 内容锁，保护 `data`
/// - `flags`: VALID / DIRTY，原子存取
/// - `data`: 块数据
///
/// `flags` 有两个写者：持有内容锁的线程，以及驱逐路径（此时引用计数为 0，
/// 没有人持有或等待内容锁）。
pub struct Buffer<L> {
    pub(crate) lock: L,
    flags: AtomicU8,
    data: UnsafeCell<Box<[u8]>>,
}

// `data` 只通过持有内容锁的 `BufGuard` 访问。
unsafe impl<L: SleepLock> Sync for Buffer<L> {}

impl<L: SleepLock> Buffer<L> {
    /// 创建全零的缓存块
    pub fn new(block_size: usize) -> Self {
        Self {
            lock: L::default(),
            flags: AtomicU8::new(0),
            data: UnsafeCell::new(alloc::vec![0u8; block_size].into_boxed_slice()),
        }
    }

    /// 当前标志
    pub fn flags(&self) -> CacheFlags {
        CacheFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// 检查数据是否有效
    pub fn is_valid(&self) -> bool {
        self.flags().contains(CacheFlags::VALID)
    }

    /// 检查是否是脏块
    pub fn is_dirty(&self) -> bool {
        self.flags().contains(CacheFlags::DIRTY)
    }

    pub(crate) fn mark_valid(&self) {
        self.flags.fetch_or(CacheFlags::VALID.bits(), Ordering::AcqRel);
    }

    pub(crate) fn mark_dirty(&self) {
        self.flags.fetch_or(CacheFlags::DIRTY.bits(), Ordering::AcqRel);
    }

    pub(crate) fn mark_clean(&self) {
        self.flags.fetch_and(!CacheFlags::DIRTY.bits(), Ordering::AcqRel);
    }

    /// 重新绑定前清空所有标志，返回旧标志
    pub(crate) fn reset(&self) -> CacheFlags {
        CacheFlags::from_bits_truncate(self.flags.swap(0, Ordering::AcqRel))
    }

    /// # Safety
    ///
    /// 调用者必须持有 `lock`。
    pub(crate) unsafe fn data(&self) -> &[u8] {
        // SAFETY: 调用者持有内容锁，没有并发写者
        unsafe { &*self.data.get() }
    }

    /// # Safety
    ///
    /// 调用者必须持有 `lock`，且返回的引用不能与其它 `data`/`data_mut`
    /// 返回的引用同时存在。
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn data_mut(&self) -> &mut [u8] {
        // SAFETY: 调用者持有内容锁并保证引用唯一
        unsafe { &mut *self.data.get() }
    }
}

impl<L> core::fmt::Debug for Buffer<L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Buffer")
            .field(
                "flags",
                &CacheFlags::from_bits_truncate(self.flags.load(Ordering::Relaxed)),
            )
            .finish_non_exhaustive()
    }
}
