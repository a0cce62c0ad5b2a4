//! 同步原语接口
//!
//! 缓存自身的分桶锁和驱逐协调锁是 `spin::Mutex`；
//! 缓存块的内容锁可能跨越设备 I/O 持有，必须是可睡眠的锁，由外部提供。

mod sleep_lock;

pub use sleep_lock::{SleepLock, SpinWaitLock};

#[cfg(any(feature = "std", test))]
pub use sleep_lock::StdSleepLock;

/// 默认内容锁实现
#[cfg(feature = "std")]
pub type DefaultSleepLock = StdSleepLock;

/// 默认内容锁实现
#[cfg(not(feature = "std"))]
pub type DefaultSleepLock = SpinWaitLock;
