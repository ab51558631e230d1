//! 降级诊断
//! Degradation diagnostics
//!
//! 当高精度机制不可用、服务转而使用后备定时器时发出的诊断信号。
//! 观察者在构造时注入，测试可以确定性地断言降级事件。
//!
//! The diagnostic signal raised when the precision mechanism is refused and
//! the service switches to the fallback timer. The observer is injected at
//! construction so tests can assert on degradation deterministically.

use crate::error::HostError;
use tracing::{debug, warn};

/// Describes one switch from the precision mechanism to the fallback.
/// 描述一次从高精度机制到后备机制的切换。
#[derive(Debug)]
pub struct DegradationEvent<'a> {
    /// The interval the caller asked for.
    /// 调用者请求的间隔。
    pub requested_interval_ms: u32,
    /// The interval the fallback actually runs at.
    /// 后备机制实际运行的间隔。
    pub effective_interval_ms: u32,
    /// Why the host refused the precision schedule.
    /// 宿主拒绝高精度调度的原因。
    pub reason: &'a HostError,
    /// `true` only for the degradation that created the fallback timer.
    /// 仅在创建后备定时器的那次降级时为 `true`。
    pub first_degradation: bool,
}

/// Sink for degradation events.
/// 降级事件的接收端。
pub trait DegradationObserver: Send + Sync {
    fn on_degraded(&self, event: &DegradationEvent<'_>);
}

/// Default observer, reports degradations through `tracing`.
/// 默认观察者，通过 `tracing` 报告降级。
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl DegradationObserver for TracingObserver {
    fn on_degraded(&self, event: &DegradationEvent<'_>) {
        if event.first_degradation {
            // Ticks keep arriving, but with much coarser timing. Usually too many
            // precision timers are running in this process; share one instead.
            warn!(
                requested_ms = event.requested_interval_ms,
                effective_ms = event.effective_interval_ms,
                reason = %event.reason,
                "High-resolution timer unavailable, falling back to a less accurate timer"
            );
        } else {
            debug!(
                requested_ms = event.requested_interval_ms,
                effective_ms = event.effective_interval_ms,
                reason = %event.reason,
                "Reusing fallback timer"
            );
        }
    }
}

/// Observer that ignores every event.
/// 忽略所有事件的观察者。
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl DegradationObserver for NoopObserver {
    fn on_degraded(&self, _event: &DegradationEvent<'_>) {}
}
