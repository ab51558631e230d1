//! 高精度定时器绑定
//! Precision timer binding
//!
//! 向宿主的高精度定时设施请求周期通知，并报告请求是否成功。失败是预期内
//! 且可恢复的（通常是进程内同时存在的高精度定时器数量达到上限），由
//! [`TimerService`](super::TimerService) 负责降级到后备定时器。
//!
//! Requests a periodic notification from the host's high-resolution timing
//! facility and reports whether the request succeeded. Failure is expected
//! and recoverable (usually the per-process limit on simultaneous precision
//! timers); [`TimerService`](super::TimerService) degrades to the fallback
//! timer when it happens.

pub mod threaded;

use super::gate::ScheduleContext;
use super::listener::TimerListener;
use crate::error::HostError;
use std::num::NonZeroU64;
use std::sync::Arc;
use tracing::{trace, warn};

pub use threaded::ThreadedHost;

/// Opaque identifier of one active precision schedule.
/// 一个活跃高精度调度的不透明标识符。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrecisionHandle(NonZeroU64);

impl PrecisionHandle {
    pub fn new(id: NonZeroU64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for PrecisionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The host's high-resolution periodic timer facility.
/// 宿主的高精度周期定时设施。
///
/// The host calls [`ScheduleContext::fire`] on its own thread roughly every
/// `interval_ms` until the schedule is cancelled or `fire` returns `false`.
pub trait PrecisionHost: Send + Sync {
    /// Requests a periodic callback. Fails when the host cannot provide one.
    /// 请求周期回调。宿主无法提供时失败。
    fn request_periodic(
        &self,
        interval_ms: u32,
        context: Arc<ScheduleContext>,
    ) -> Result<PrecisionHandle, HostError>;

    /// Stops a schedule previously returned by `request_periodic`.
    /// 停止先前由 `request_periodic` 返回的调度。
    fn cancel_periodic(&self, handle: PrecisionHandle);
}

/// Binds one listener to a precision host.
/// 将一个监听器绑定到高精度宿主。
pub struct PrecisionBinding {
    host: Arc<dyn PrecisionHost>,
    listener: Arc<dyn TimerListener>,
    active: Option<(PrecisionHandle, Arc<ScheduleContext>)>,
    interval_ms: u32,
}

impl PrecisionBinding {
    pub fn new(host: Arc<dyn PrecisionHost>, listener: Arc<dyn TimerListener>) -> Self {
        Self {
            host,
            listener,
            active: None,
            interval_ms: 0,
        }
    }

    /// Asks the host for a periodic schedule at `interval_ms`.
    /// 向宿主请求间隔为 `interval_ms` 的周期调度。
    ///
    /// On failure nothing is running and no handle is produced.
    pub fn start(&mut self, interval_ms: u32) -> Result<PrecisionHandle, HostError> {
        debug_assert!(interval_ms > 0, "precision interval must be positive");
        debug_assert!(self.active.is_none(), "precision schedule already active");

        let context = Arc::new(ScheduleContext::new(self.listener.clone()));
        let handle = self.host.request_periodic(interval_ms, context.clone())?;

        trace!(%handle, interval_ms, "Precision schedule started");
        self.active = Some((handle, context));
        self.interval_ms = interval_ms;
        Ok(handle)
    }

    /// Stops the schedule identified by `handle`.
    /// 停止由 `handle` 标识的调度。
    ///
    /// When this returns from outside the listener, any in-flight callback has
    /// finished and no further ticks will be delivered. When called from
    /// inside the listener, the current callback is the last one.
    pub fn cancel(&mut self, handle: PrecisionHandle) {
        match self.active.take() {
            Some((active, context)) if active == handle => context.close(),
            other => {
                warn!(%handle, "Cancelling a precision schedule this binding does not own");
                self.active = other;
            }
        }

        self.host.cancel_periodic(handle);
        if self.active.is_none() {
            self.interval_ms = 0;
        }
        trace!(%handle, "Precision schedule cancelled");
    }

    /// The last interval successfully applied, 0 if none.
    /// 最后一次成功应用的间隔，没有则为 0。
    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    pub fn active_handle(&self) -> Option<PrecisionHandle> {
        self.active.as_ref().map(|(handle, _)| *handle)
    }
}

impl std::fmt::Debug for PrecisionBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrecisionBinding")
            .field("active", &self.active_handle())
            .field("interval_ms", &self.interval_ms)
            .finish_non_exhaustive()
    }
}
