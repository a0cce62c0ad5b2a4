//! 块缓存模块
//!
//! 固定大小的缓冲池，按块号哈希分桶，跨桶近似全局 LRU 驱逐。
//!
//! # 主要组件
//!
//! - [`BufferCache`] - 缓存表：缓冲池 + 分桶数组 + 驱逐协调锁
//! - [`BufGuard`] - 已加锁的缓存块句柄
//! - [`BufPin`] - pin 凭证
//! - [`CacheFlags`] - 缓存块状态标志
//! - [`CacheConfig`] - 缓存配置
//! - [`CacheStats`] - 缓存统计信息
//! - [`TickSource`] - 释放时间戳来源
//!
//! # 设计原理
//!
//! 两层锁：
//!
//! 1. **分桶锁**（`spin::Mutex`）：保护桶内槽位记录（块号、引用计数、释放时间戳），
//!    临界区很短，从不覆盖设备 I/O
//! 2. **内容锁**（[`SleepLock`](crate::sync::SleepLock)）：保护块数据，可以跨设备 I/O 持有
//!
//! 命中只需要一把分桶锁。未命中时由驱逐协调锁串行化“再查一次 + 挑选受害者 + 迁移”，
//! 保证同一个块不会被装进两个缓存块，两个线程也不会挑中同一个受害者。
//!
//! 没有全局 LRU 链表：每个缓存块在引用计数降到 0 时记下时钟值，
//! 驱逐时逐桶扫描，取时间戳最小的空闲块。
//!
//! # 使用示例
//!
//! ```rust,ignore
//! use bcache_core::{BufferCache, CacheConfig, RamDisk};
//!
//! let disk = RamDisk::new(1, 1024, 2000);
//! let cache: BufferCache<_> = BufferCache::new(disk, CacheConfig::default())?;
//!
//! let mut buf = cache.bread(1, 42)?;
//! buf.data_mut()[0] = 0x42;
//! cache.bwrite(&buf)?;
//! cache.brelse(buf);
//!
//! let stats = cache.stats();
//! println!("hits {}/{}", stats.hits, stats.total_accesses);
//! ```

mod block_cache;
mod buffer;
mod clock;
mod config;
mod handle;
mod shard;

pub use block_cache::{BufferCache, CacheStats};
pub use buffer::{BufferId, CacheFlags};
pub use clock::{MonotonicTicks, TickSource};
pub use config::CacheConfig;
pub use handle::{BufGuard, BufPin};
