//! 块设备核心类型

use crate::error::Result;
use core::fmt;

/// 缓存键：设备号 + 块号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey {
    /// 设备号
    pub dev: u32,
    /// 块号
    pub blockno: u32,
}

impl BlockKey {
    /// 创建缓存键
    pub const fn new(dev: u32, blockno: u32) -> Self {
        Self { dev, blockno }
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.blockno)
    }
}

/// 块设备接口
///
/// 缓存通过此 trait 读写整块数据。所有方法都取 `&self`：
/// 多个线程可能同时对不同的缓存块发起 I/O，设备自己负责内部同步。
///
/// 设备 I/O 只会在持有缓存块内容锁时被调用，绝不会在持有分桶自旋锁时调用。
///
/// # 示例
///
/// ```rust,ignore
/// use bcache_core::{BlockDevice, BlockKey, Result};
///
/// struct VirtioDisk {
///     // ...
/// }
///
/// impl BlockDevice for VirtioDisk {
///     fn block_size(&self) -> usize {
///         1024
///     }
///
///     fn read_block(&self, key: BlockKey, buf: &mut [u8]) -> Result<()> {
///         // 提交读请求并等待完成
///         Ok(())
///     }
///
///     fn write_block(&self, key: BlockKey, buf: &[u8]) -> Result<()> {
///         // 提交写请求并等待完成
///         Ok(())
///     }
/// }
/// ```
pub trait BlockDevice: Send + Sync {
    /// 块大小（字节）
    fn block_size(&self) -> usize;

    /// 读取整块
    ///
    /// `buf` 的长度恰好为 `block_size()`。
    fn read_block(&self, key: BlockKey, buf: &mut [u8]) -> Result<()>;

    /// 写入整块（同步）
    fn write_block(&self, key: BlockKey, buf: &[u8]) -> Result<()>;

    /// 刷新设备缓存
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// 是否只读
    fn is_read_only(&self) -> bool {
        false
    }
}
