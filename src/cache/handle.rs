//! 缓存块句柄 - RAII 风格的块访问

use super::block_cache::BufferCache;
use super::buffer::{Buffer, BufferId};
use crate::block::{BlockDevice, BlockKey};
use crate::sync::SleepLock;
use core::marker::PhantomData;

/// 已加锁的缓存块
///
/// 由 [`BufferCache::bread`] 返回，持有期间：
/// - 缓存块的内容锁由当前线程持有，其它线程的 `bread` 会在内容锁上等待
/// - 引用计数包含本句柄，缓存块不会被驱逐或重新绑定
///
/// 丢弃句柄等价于 [`BufferCache::brelse`]：释放内容锁，然后在分桶锁下
/// 减少引用计数。句柄不能跨线程传递（内容锁按线程记录持有者）。
///
/// # 示例
///
/// ```rust,ignore
/// let mut buf = cache.bread(ROOTDEV, 42)?;
/// buf.data_mut()[0] = 0x42;
/// cache.bwrite(&buf)?;
/// cache.brelse(buf);
/// ```
pub struct BufGuard<'a, D: BlockDevice, L: SleepLock> {
    cache: &'a BufferCache<D, L>,
    id: BufferId,
    key: BlockKey,
    _not_send: PhantomData<*const ()>,
}

impl<'a, D: BlockDevice, L: SleepLock> BufGuard<'a, D, L> {
    /// 调用者已经持有 `id` 的内容锁并计入了引用计数
    pub(crate) fn new(cache: &'a BufferCache<D, L>, id: BufferId, key: BlockKey) -> Self {
        Self {
            cache,
            id,
            key,
            _not_send: PhantomData,
        }
    }

    /// 缓存块 ID
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// 绑定的块
    pub fn key(&self) -> BlockKey {
        self.key
    }

    /// 设备号
    pub fn dev(&self) -> u32 {
        self.key.dev
    }

    /// 块号
    pub fn blockno(&self) -> u32 {
        self.key.blockno
    }

    /// 数据是否已从设备读入
    pub fn is_valid(&self) -> bool {
        self.buffer().is_valid()
    }

    /// 数据是否在上次写回后被修改过
    pub fn is_dirty(&self) -> bool {
        self.buffer().is_dirty()
    }

    /// 块数据
    pub fn data(&self) -> &[u8] {
        // SAFETY: 句柄存在即持有内容锁
        unsafe { self.buffer().data() }
    }

    /// 可写的块数据，标记为脏
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.buffer().mark_dirty();
        self.payload_mut()
    }

    /// 可写的块数据，不改标志（设备读入用）
    pub(crate) fn payload_mut(&mut self) -> &mut [u8] {
        // SAFETY: 句柄存在即持有内容锁，`&mut self` 保证引用唯一
        unsafe { self.buffer().data_mut() }
    }

    pub(crate) fn buffer(&self) -> &'a Buffer<L> {
        self.cache.buffer(self.id)
    }

    pub(crate) fn belongs_to(&self, cache: &BufferCache<D, L>) -> bool {
        core::ptr::eq(self.cache, cache)
    }
}

impl<D: BlockDevice, L: SleepLock> Drop for BufGuard<'_, D, L> {
    fn drop(&mut self) {
        self.cache.release_locked(self.id, self.key);
    }
}

impl<D: BlockDevice, L: SleepLock> core::fmt::Debug for BufGuard<'_, D, L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufGuard")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("flags", &self.buffer().flags())
            .finish()
    }
}

/// pin 凭证
///
/// 由 [`BufferCache::bpin`] 返回，交给 [`BufferCache::bunpin`] 归还。
/// 持有期间缓存块的引用计数多出一份，不会被驱逐；
/// 与 [`BufGuard`] 不同，它不持有内容锁。
#[must_use = "a pinned buffer stays resident until passed to `bunpin`"]
#[derive(Debug, PartialEq, Eq)]
pub struct BufPin {
    pub(crate) id: BufferId,
    pub(crate) key: BlockKey,
    /// 所属缓存的地址，只用于比较
    pub(crate) owner: usize,
}

impl BufPin {
    /// 缓存块 ID
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// 绑定的块
    pub fn key(&self) -> BlockKey {
        self.key
    }
}
