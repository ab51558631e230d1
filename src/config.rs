//! 定义了定时器服务的可配置参数。
//! Defines configurable parameters for the timer service.

use std::time::Duration;

/// A structure containing all configurable parameters for a timer service.
///
/// 包含定时器服务所有可配置参数的结构体。
#[derive(Debug, Clone, Default)]
pub struct TimerConfig {
    /// High-resolution mechanism parameters.
    /// 高精度机制参数。
    pub precision: PrecisionConfig,

    /// Fallback mechanism parameters.
    /// 后备机制参数。
    pub fallback: FallbackConfig,
}

/// High-resolution mechanism parameters.
///
/// 高精度机制参数。
#[derive(Debug, Clone)]
pub struct PrecisionConfig {
    /// The maximum number of precision schedules the host allows to run at the
    /// same time in one process. Further requests are refused.
    /// 宿主允许在一个进程中同时运行的高精度调度的最大数量。超出的请求将被拒绝。
    pub max_concurrent_timers: usize,
    /// When the time left until the next deadline drops below this value the
    /// ticker stops sleeping and spins instead. Spinning keeps a core busy, so
    /// the threshold is capped at a quarter of each schedule's period.
    /// 当距下一个截止时间的剩余时间低于此值时，计时线程停止休眠，改为自旋。
    /// 自旋会占用一个 CPU 核心，因此该阈值最多为调度周期的四分之一。
    pub spin_threshold: Duration,
}

/// Fallback mechanism parameters.
///
/// 后备机制参数。
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// The tick granularity of the fallback scheduler. Requested intervals are
    /// rounded up to a multiple of this value.
    /// 后备调度器的滴答粒度。请求的间隔会向上取整为此值的倍数。
    pub granularity: Duration,
    /// Name given to the worker threads of the fallback runtime.
    /// 后备运行时工作线程的名称。
    pub thread_name: String,
    /// Number of worker threads of the fallback runtime. A slow listener holds
    /// one worker for the length of its callback.
    /// 后备运行时的工作线程数量。缓慢的监听器会在回调期间占用一个工作线程。
    pub worker_threads: usize,
}

impl Default for PrecisionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_timers: 16,
            spin_threshold: Duration::from_micros(1500),
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            granularity: Duration::from_millis(10),
            thread_name: "hirestimer-fallback".to_string(),
            worker_threads: 1,
        }
    }
}

impl PrecisionConfig {
    /// The spin threshold actually used for a schedule of `period`.
    /// 周期为 `period` 的调度实际使用的自旋阈值。
    pub fn spin_threshold_for(&self, period: Duration) -> Duration {
        self.spin_threshold.min(period / 4)
    }
}

impl FallbackConfig {
    /// Rounds `interval_ms` up to the fallback granularity.
    /// 将 `interval_ms` 向上取整为后备粒度。
    pub fn effective_interval_ms(&self, interval_ms: u32) -> u32 {
        let granularity = u32::try_from(self.granularity.as_millis())
            .unwrap_or(u32::MAX)
            .max(1);
        interval_ms
            .div_ceil(granularity)
            .saturating_mul(granularity)
    }
}
