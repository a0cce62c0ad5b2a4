//! 释放时间戳来源

use core::sync::atomic::{AtomicU64, Ordering};

/// 单调时钟接口
///
/// 缓存块引用计数降到 0 时记录一次时钟值，驱逐时挑最小的。
/// 内核可以接入时钟中断计数（ticks）；相同的值是允许的，
/// 并列时按分桶扫描顺序取第一个。
///
/// # 示例
///
/// ```rust,ignore
/// struct KernelTicks;
///
/// impl TickSource for KernelTicks {
///     fn ticks(&self) -> u64 {
///         TICKS.load(Ordering::Relaxed)
///     }
/// }
/// ```
pub trait TickSource: Send + Sync {
    /// 当前时钟值，不得回退
    fn ticks(&self) -> u64;
}

/// 默认时钟：每次读取自增，严格递增
#[derive(Debug, Default)]
pub struct MonotonicTicks {
    counter: AtomicU64,
}

impl MonotonicTicks {
    /// 从 0 开始计数
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }
}

impl TickSource for MonotonicTicks {
    fn ticks(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}
