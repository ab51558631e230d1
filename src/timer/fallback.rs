//! 后备定时器
//! Fallback timer
//!
//! 当无法创建高精度调度时使用的可移植、低精度周期调度器。
//! 默认实现基于 tokio 的 `interval`，实际间隔会被向上取整到配置的粒度。
//!
//! Portable, lower-precision periodic scheduler used when no precision
//! schedule can be created. The default implementation runs a tokio
//! `interval`; the effective interval is rounded up to the configured
//! granularity.

use super::gate::ScheduleContext;
use super::listener::TimerListener;
use crate::config::FallbackConfig;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, trace};

/// A periodic scheduler with the same delivery contract as the precision
/// path, but permitted coarser timing.
///
/// 与高精度路径具有相同投递约定、但允许更粗粒度计时的周期调度器。
pub trait FallbackTimer: Send {
    /// Starts (or restarts) ticking at roughly `interval_ms`.
    /// 以大约 `interval_ms` 的间隔开始（或重新开始）计时。
    fn start(&mut self, interval_ms: u32);

    /// Stops ticking. Does nothing if not running.
    /// 停止计时。未运行时不做任何事。
    fn cancel(&mut self);

    /// The interval actually in effect, 0 when not running.
    /// 实际生效的间隔，未运行时为 0。
    fn interval_ms(&self) -> u32;
}

/// Builds the fallback timer the first time a service degrades.
/// 在服务第一次降级时构建后备定时器。
pub trait FallbackFactory: Send + Sync {
    fn create(&self, listener: Arc<dyn TimerListener>) -> std::io::Result<Box<dyn FallbackTimer>>;
}

struct Running {
    context: Arc<ScheduleContext>,
    task: JoinHandle<()>,
}

/// Fallback timer driven by the crate's own tokio runtime.
/// 由本库自有的 tokio 运行时驱动的后备定时器。
///
/// Ticks are never run on the caller's runtime: a current-thread runtime would
/// deliver them only when the caller yields, and a borrowed runtime may shut
/// down while the fallback is still kept by its service.
pub struct TokioFallback {
    listener: Arc<dyn TimerListener>,
    config: FallbackConfig,
    handle: Handle,
    running: Option<Running>,
    interval_ms: u32,
}

impl TokioFallback {
    /// Creates a fallback on the process-wide fallback runtime, starting that
    /// runtime on first use.
    ///
    /// 在进程全局的后备运行时上创建后备定时器，首次使用时启动该运行时。
    pub fn new(listener: Arc<dyn TimerListener>, config: FallbackConfig) -> std::io::Result<Self> {
        let handle = fallback_runtime(&config)?;
        Ok(Self {
            listener,
            config,
            handle,
            running: None,
            interval_ms: 0,
        })
    }
}

/// The multi-thread runtime every [`TokioFallback`] ticks on. It lives for
/// the rest of the process; the config of the first caller names its threads.
///
/// 所有 [`TokioFallback`] 计时所用的多线程运行时。它在进程剩余时间内一直存在；
/// 线程名称和数量取自第一个调用者的配置。
pub fn fallback_runtime(config: &FallbackConfig) -> std::io::Result<Handle> {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();

    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime.handle().clone());
    }

    let runtime = Builder::new_multi_thread()
        .worker_threads(config.worker_threads.max(1))
        .thread_name(config.thread_name.clone())
        .enable_time()
        .build()?;
    if let Err(lost) = RUNTIME.set(runtime) {
        // Another thread got there first; dropping a runtime may not block here.
        lost.shutdown_background();
    } else {
        debug!(thread_name = %config.thread_name, workers = config.worker_threads, "Started fallback runtime");
    }

    RUNTIME
        .get()
        .map(|runtime| runtime.handle().clone())
        .ok_or_else(|| std::io::Error::other("fallback runtime unavailable"))
}

impl FallbackTimer for TokioFallback {
    fn start(&mut self, interval_ms: u32) {
        self.cancel();

        let effective_ms = self.config.effective_interval_ms(interval_ms);
        let period = Duration::from_millis(u64::from(effective_ms));
        let context = Arc::new(ScheduleContext::new(self.listener.clone()));

        let task = {
            let context = context.clone();
            self.handle.spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if !context.fire() {
                        break;
                    }
                }
            })
        };

        trace!(requested_ms = interval_ms, effective_ms, "Fallback schedule started");
        self.running = Some(Running { context, task });
        self.interval_ms = effective_ms;
    }

    fn cancel(&mut self) {
        if let Some(running) = self.running.take() {
            running.context.close();
            running.task.abort();
            trace!("Fallback schedule cancelled");
        }
        self.interval_ms = 0;
    }

    fn interval_ms(&self) -> u32 {
        self.interval_ms
    }
}

impl Drop for TokioFallback {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Default [`FallbackFactory`], builds [`TokioFallback`] timers.
/// 默认的 [`FallbackFactory`]，构建 [`TokioFallback`] 定时器。
#[derive(Debug, Clone, Default)]
pub struct TokioFallbackFactory {
    config: FallbackConfig,
}

impl TokioFallbackFactory {
    pub fn new(config: FallbackConfig) -> Self {
        Self { config }
    }
}

impl FallbackFactory for TokioFallbackFactory {
    fn create(&self, listener: Arc<dyn TimerListener>) -> std::io::Result<Box<dyn FallbackTimer>> {
        let fallback = TokioFallback::new(listener, self.config.clone())?;
        Ok(Box::new(fallback))
    }
}
