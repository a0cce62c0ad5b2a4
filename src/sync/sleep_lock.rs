//! 缓存块内容锁接口

use core::sync::atomic::{AtomicBool, Ordering};

/// 可睡眠锁 trait
///
/// 每个缓存块持有一把，保护块数据。与分桶自旋锁不同，
/// 持有者可以在持锁期间做阻塞 I/O，等待者应当让出 CPU 而不是空转。
///
/// 内核环境下由调度器提供实现（sleep/wakeup）。
/// 这里提供两个实现：
/// - [`SpinWaitLock`] - 无调度器时的退化实现，等待时自旋
/// - [`StdSleepLock`] - `std` 环境下基于 `Mutex` + `Condvar`
pub trait SleepLock: Default + Send + Sync {
    /// 获取锁，可能阻塞
    fn acquire(&self);

    /// 释放锁并唤醒一个等待者
    fn release(&self);

    /// 当前执行流是否持有此锁
    ///
    /// 不跟踪持有者的实现可以退化为“是否被锁住”。
    fn holding(&self) -> bool;
}

/// 自旋等待实现
///
/// 用于早期启动或单核环境：没有调度器可以睡眠，只能自旋。
/// 不记录持有者，`holding()` 只反映锁是否被占用：
/// 其它线程持锁时，当前线程调用 `holding()` 同样返回 `true`。
/// 因此 `bwrite`/`brelse` 的持有者检查在这个实现下只能发现“锁空闲”，
/// 需要按线程识别持有者时使用 [`StdSleepLock`]。
#[derive(Debug, Default)]
pub struct SpinWaitLock {
    locked: AtomicBool,
}

impl SleepLock for SpinWaitLock {
    fn acquire(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
    }

    fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn holding(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

#[cfg(any(feature = "std", test))]
mod std_locks {
    use super::SleepLock;
    use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
    use std::thread::{self, ThreadId};

    /// `std` 睡眠锁
    ///
    /// 等待者挂在条件变量上；持有者按线程 ID 记录，
    /// 因此 `holding()` 能识别“别的线程持有”的情况。
    #[derive(Debug, Default)]
    pub struct StdSleepLock {
        owner: Mutex<Option<ThreadId>>,
        wakeup: Condvar,
    }

    impl StdSleepLock {
        fn owner(&self) -> MutexGuard<'_, Option<ThreadId>> {
            self.owner.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl SleepLock for StdSleepLock {
        fn acquire(&self) {
            let me = thread::current().id();
            let mut owner = self.owner();
            while owner.is_some() {
                owner = self
                    .wakeup
                    .wait(owner)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            *owner = Some(me);
        }

        fn release(&self) {
            *self.owner() = None;
            self.wakeup.notify_one();
        }

        fn holding(&self) -> bool {
            *self.owner() == Some(thread::current().id())
        }
    }
}

#[cfg(any(feature = "std", test))]
pub use std_locks::StdSleepLock;
