//! 定时器服务
//! Timer service
//!
//! 周期回调定时器服务：优先请求高精度调度，失败时透明地降级到后备定时器。
//! 无论哪种机制投递滴答，调用者都只看到同一个监听器和同一套
//! 启动/取消/查询间隔的约定。
//!
//! Periodic-callback timer service. It requests a precision schedule first
//! and transparently degrades to the fallback timer when that fails.
//! Whichever mechanism delivers the ticks, callers see one listener and one
//! start/cancel/interval contract.
//!
//! # State machine
//!
//! ```text
//! Idle --start--> Precision --cancel--> Idle
//! Idle --start--> Fallback  --cancel--> Idle
//! ```
//!
//! Calling [`TimerService::start_timer`] while a schedule is running cancels
//! it first, so a service never has more than one live schedule.

use super::diagnostics::{DegradationEvent, DegradationObserver, TracingObserver};
use super::fallback::{FallbackFactory, FallbackTimer, TokioFallbackFactory};
use super::listener::TimerListener;
use super::precision::{PrecisionBinding, PrecisionHandle, PrecisionHost, ThreadedHost};
use crate::config::TimerConfig;
use crate::error::{HostError, Result, TimerError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which mechanism is delivering ticks.
/// 当前正在投递滴答的机制。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    Idle,
    Precision,
    Fallback,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Idle,
    Precision(PrecisionHandle),
    Fallback,
}

/// Lifetime counters of one service.
/// 单个服务的生命周期计数器。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerServiceStats {
    /// Successful `start_timer` calls.
    /// 成功的 `start_timer` 调用次数。
    pub starts: u64,
    /// Starts served by the precision mechanism.
    /// 由高精度机制完成的启动次数。
    pub precision_starts: u64,
    /// Starts served by the fallback (each one is a degradation).
    /// 由后备机制完成的启动次数（每次都是一次降级）。
    pub fallback_starts: u64,
    /// Successful starts that replaced a running schedule.
    /// 替换了正在运行调度的成功启动次数。
    pub restarts: u64,
    /// Schedules stopped, explicitly, on restart (even a failed one) or on drop.
    /// 已停止的调度数（显式取消、重启（即使失败）或析构时）。
    pub cancels: u64,
}

impl std::fmt::Display for TimerServiceStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TimerServiceStats {{ starts: {}, precision: {}, fallback: {}, restarts: {}, cancels: {} }}",
            self.starts, self.precision_starts, self.fallback_starts, self.restarts, self.cancels
        )
    }
}

/// A periodic timer that prefers the host's precision mechanism and falls
/// back to a portable scheduler.
///
/// 优先使用宿主高精度机制、否则回退到可移植调度器的周期定时器。
///
/// The listener is shared through an `Arc`, so the service can be moved
/// freely even while a schedule is running.
pub struct TimerService {
    listener: Arc<dyn TimerListener>,
    precision: PrecisionBinding,
    state: State,
    interval_ms: u32,
    // Created on the first degradation and kept until the service is dropped,
    // across any number of cancel/start cycles.
    fallback: Option<Box<dyn FallbackTimer>>,
    fallback_factory: Arc<dyn FallbackFactory>,
    observer: Arc<dyn DegradationObserver>,
    stats: TimerServiceStats,
}

impl TimerService {
    /// Creates a service on the process-wide [`ThreadedHost`] with the
    /// default tokio fallback and tracing diagnostics.
    ///
    /// 使用进程全局 [`ThreadedHost`]、默认 tokio 后备定时器和 tracing 诊断创建服务。
    pub fn new(listener: Arc<dyn TimerListener>) -> Self {
        Self::builder(listener).build()
    }

    pub fn builder(listener: Arc<dyn TimerListener>) -> TimerServiceBuilder {
        TimerServiceBuilder::new(listener)
    }

    /// Starts ticking every `interval_ms`, replacing any running schedule.
    /// 以 `interval_ms` 为周期开始计时，替换任何正在运行的调度。
    ///
    /// Loss of precision is not an error; check [`interval_ms`](Self::interval_ms)
    /// for the interval actually in effect.
    pub fn start_timer(&mut self, interval_ms: u32) -> Result<()> {
        if interval_ms == 0 {
            return Err(TimerError::InvalidInterval(interval_ms));
        }

        // A replaced schedule counts as cancelled even if the new start fails;
        // `restarts` only counts starts that went through.
        let replacing = self.is_running();
        if replacing {
            debug!(interval_ms, mechanism = ?self.mechanism(), "Restarting running timer");
            self.stop_active();
        }

        match self.precision.start(interval_ms) {
            Ok(handle) => {
                self.state = State::Precision(handle);
                self.interval_ms = interval_ms;
                self.stats.precision_starts += 1;
                debug!(%handle, interval_ms, "Timer running on precision mechanism");
            }
            Err(reason) => self.degrade(interval_ms, reason)?,
        }

        self.stats.starts += 1;
        if replacing {
            self.stats.restarts += 1;
        }
        Ok(())
    }

    /// Stops the running schedule. When this returns (outside of the listener)
    /// no further ticks are delivered.
    ///
    /// 停止正在运行的调度。（在监听器外部）返回后不会再投递滴答。
    ///
    /// Calling this from inside the listener does not block; that callback is
    /// the last one. Holding a lock in the caller that the listener also takes
    /// will deadlock, since this waits for an in-flight callback to return.
    pub fn cancel_timer(&mut self) -> Result<()> {
        if matches!(self.state, State::Idle) {
            return Err(TimerError::NotRunning);
        }
        self.stop_active();
        debug!("Timer cancelled");
        Ok(())
    }

    /// The interval in effect, 0 when idle. After a degradation this is the
    /// fallback's interval, which may be coarser than requested.
    ///
    /// 当前生效的间隔，空闲时为 0。降级后为后备机制的间隔，可能比请求的更粗。
    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    pub fn mechanism(&self) -> Mechanism {
        match self.state {
            State::Idle => Mechanism::Idle,
            State::Precision(_) => Mechanism::Precision,
            State::Fallback => Mechanism::Fallback,
        }
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    /// The precision schedule handle, if one is active.
    /// 活跃的高精度调度句柄（如果有）。
    pub fn active_handle(&self) -> Option<PrecisionHandle> {
        match self.state {
            State::Precision(handle) => Some(handle),
            _ => None,
        }
    }

    /// Whether this service has ever degraded and now owns a fallback timer.
    /// 此服务是否曾经降级并因此拥有后备定时器。
    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn stats(&self) -> TimerServiceStats {
        self.stats
    }

    pub fn listener(&self) -> &Arc<dyn TimerListener> {
        &self.listener
    }

    fn degrade(&mut self, interval_ms: u32, reason: HostError) -> Result<()> {
        let first_degradation = self.fallback.is_none();
        let fallback = match &mut self.fallback {
            Some(fallback) => fallback,
            slot => {
                let created = self
                    .fallback_factory
                    .create(self.listener.clone())
                    .map_err(TimerError::FallbackUnavailable)?;
                info!("Fallback timer created");
                slot.insert(created)
            }
        };

        fallback.start(interval_ms);
        let effective_interval_ms = fallback.interval_ms();

        self.state = State::Fallback;
        self.interval_ms = effective_interval_ms;
        self.stats.fallback_starts += 1;

        self.observer.on_degraded(&DegradationEvent {
            requested_interval_ms: interval_ms,
            effective_interval_ms,
            reason: &reason,
            first_degradation,
        });
        Ok(())
    }

    fn stop_active(&mut self) {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => return,
            State::Precision(handle) => self.precision.cancel(handle),
            State::Fallback => {
                if let Some(fallback) = self.fallback.as_mut() {
                    fallback.cancel();
                }
            }
        }
        self.interval_ms = 0;
        self.stats.cancels += 1;
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        if self.is_running() {
            warn!(mechanism = ?self.mechanism(), "Timer service dropped while running, cancelling");
            self.stop_active();
        }
    }
}

impl std::fmt::Debug for TimerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerService")
            .field("mechanism", &self.mechanism())
            .field("interval_ms", &self.interval_ms)
            .field("has_fallback", &self.has_fallback())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TimerService`] with injectable collaborators.
/// 可注入协作者的 [`TimerService`] 构建器。
pub struct TimerServiceBuilder {
    listener: Arc<dyn TimerListener>,
    config: Option<TimerConfig>,
    host: Option<Arc<dyn PrecisionHost>>,
    fallback_factory: Option<Arc<dyn FallbackFactory>>,
    observer: Option<Arc<dyn DegradationObserver>>,
}

impl TimerServiceBuilder {
    pub fn new(listener: Arc<dyn TimerListener>) -> Self {
        Self {
            listener,
            config: None,
            host: None,
            fallback_factory: None,
            observer: None,
        }
    }

    /// Sets the configuration. Unless a [`host`](Self::host) is also given,
    /// the service gets its own [`ThreadedHost`] built from `config.precision`
    /// instead of sharing the process-wide one.
    ///
    /// 设置配置。除非同时指定了 [`host`](Self::host)，服务将使用根据
    /// `config.precision` 构建的专用 [`ThreadedHost`]，而不是共享进程全局宿主。
    pub fn config(mut self, config: TimerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn host(mut self, host: Arc<dyn PrecisionHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn fallback_factory(mut self, factory: Arc<dyn FallbackFactory>) -> Self {
        self.fallback_factory = Some(factory);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn DegradationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> TimerService {
        let has_config = self.config.is_some();
        let TimerConfig { precision, fallback } = self.config.unwrap_or_default();

        let host: Arc<dyn PrecisionHost> = match self.host {
            Some(host) => host,
            None if has_config => Arc::new(ThreadedHost::new(precision)),
            None => ThreadedHost::global(),
        };
        let fallback_factory: Arc<dyn FallbackFactory> = match self.fallback_factory {
            Some(factory) => factory,
            None => Arc::new(TokioFallbackFactory::new(fallback)),
        };
        let observer: Arc<dyn DegradationObserver> = match self.observer {
            Some(observer) => observer,
            None => Arc::new(TracingObserver),
        };

        TimerService {
            precision: PrecisionBinding::new(host, self.listener.clone()),
            listener: self.listener,
            state: State::Idle,
            interval_ms: 0,
            fallback: None,
            fallback_factory,
            observer,
            stats: TimerServiceStats::default(),
        }
    }
}
