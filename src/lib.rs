//! bcache_core: 内核块缓存
//!
//! 固定大小的缓冲池，缓存磁盘块内容，同时作为多个线程访问同一磁盘块时的同步点：
//! - 哈希分桶，每桶一把自旋锁，命中路径无全局锁
//! - 未命中时跨桶挑选最久未使用的空闲缓存块
//! - 每个缓存块一把可睡眠的内容锁，设备 I/O 只在内容锁下进行
//!
//! # 示例
//!
//! ```rust,ignore
//! use bcache_core::{BufferCache, CacheConfig, RamDisk, Result};
//!
//! fn main() -> Result<()> {
//!     let disk = RamDisk::new(1, 1024, 2000);
//!     let cache: BufferCache<_> = BufferCache::new(disk, CacheConfig::default())?;
//!
//!     let buf = cache.bread(1, 0)?;
//!     println!("first byte: {:02x}", buf.data()[0]);
//!     cache.brelse(buf);
//!
//!     Ok(())
//! }
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`block`] - 块设备抽象
//! - [`consts`] - 默认参数
//! - [`sync`] - 内容锁接口
//! - [`cache`] - 块缓存

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

/// 错误处理
pub mod error;

/// 块设备抽象
pub mod block;

/// 常量定义
pub mod consts;

/// 同步原语
pub mod sync;

/// 块缓存
pub mod cache;

// ===== 公共导出 =====

pub use error::{Error, ErrorKind, Result};

pub use block::{BlockDevice, BlockKey, RamDisk};

pub use sync::{DefaultSleepLock, SleepLock, SpinWaitLock};

#[cfg(feature = "std")]
pub use sync::StdSleepLock;

pub use cache::{
    BufGuard, BufPin, BufferCache, BufferId, CacheConfig, CacheFlags, CacheStats,
    MonotonicTicks, TickSource,
};
