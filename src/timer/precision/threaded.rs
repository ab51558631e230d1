//! 基于专用线程的高精度宿主
//! Dedicated-thread precision host
//!
//! 每个调度拥有一个计时线程，按绝对截止时间休眠，并在最后一小段时间内
//! 自旋以获得亚毫秒级精度。进程内同时存在的调度数量受限。
//!
//! Every schedule owns a ticker thread that sleeps to absolute deadlines and
//! spins through the last stretch before each one for sub-millisecond
//! accuracy. The number of simultaneous schedules is limited.

use super::{PrecisionHandle, PrecisionHost};
use crate::config::PrecisionConfig;
use crate::error::HostError;
use crate::timer::gate::ScheduleContext;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// A running ticker thread.
struct Ticker {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Precision host backed by one high-resolution ticker thread per schedule.
/// 每个调度由一个高精度计时线程支撑的宿主。
pub struct ThreadedHost {
    config: PrecisionConfig,
    next_id: AtomicU64,
    tickers: Mutex<HashMap<PrecisionHandle, Ticker>>,
}

impl ThreadedHost {
    pub fn new(config: PrecisionConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            tickers: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide host, configured with [`PrecisionConfig::default`].
    /// Its schedule limit is shared by every service that uses it.
    ///
    /// 进程全局宿主，使用 [`PrecisionConfig::default`] 配置。
    /// 其调度上限由所有使用它的服务共享。
    pub fn global() -> Arc<ThreadedHost> {
        static GLOBAL: OnceLock<Arc<ThreadedHost>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(ThreadedHost::new(PrecisionConfig::default())))
            .clone()
    }

    /// Number of schedules currently running on this host.
    /// 此宿主上当前运行的调度数量。
    pub fn active_schedules(&self) -> usize {
        self.lock_tickers().len()
    }

    pub fn limit(&self) -> usize {
        self.config.max_concurrent_timers
    }

    fn lock_tickers(&self) -> MutexGuard<'_, HashMap<PrecisionHandle, Ticker>> {
        self.tickers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn allocate_handle(&self) -> PrecisionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        PrecisionHandle::new(NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN))
    }

    fn stop_ticker(handle: PrecisionHandle, ticker: Ticker) {
        ticker.stop.store(true, Ordering::Release);
        ticker.thread.thread().unpark();

        if ticker.thread.thread().id() == thread::current().id() {
            // Cancelled from its own callback: the loop exits once it returns.
            debug!(%handle, "Detaching ticker cancelled from its own callback");
            return;
        }

        if ticker.thread.join().is_err() {
            warn!(%handle, "Ticker thread panicked");
        }
    }
}

impl Default for ThreadedHost {
    fn default() -> Self {
        Self::new(PrecisionConfig::default())
    }
}

impl PrecisionHost for ThreadedHost {
    fn request_periodic(
        &self,
        interval_ms: u32,
        context: Arc<ScheduleContext>,
    ) -> Result<PrecisionHandle, HostError> {
        let mut tickers = self.lock_tickers();
        if tickers.len() >= self.config.max_concurrent_timers {
            return Err(HostError::Exhausted {
                limit: self.config.max_concurrent_timers,
            });
        }

        let handle = self.allocate_handle();
        let stop = Arc::new(AtomicBool::new(false));
        let period = Duration::from_millis(u64::from(interval_ms));
        let spin_threshold = self.config.spin_threshold_for(period);

        let thread = {
            let stop = stop.clone();
            thread::Builder::new()
                .name(format!("hirestimer-precision-{}", handle.id()))
                .spawn(move || run_ticker(period, spin_threshold, &stop, &context))?
        };

        tickers.insert(handle, Ticker { stop, thread });
        debug!(%handle, interval_ms, active = tickers.len(), "Ticker thread started");
        Ok(handle)
    }

    fn cancel_periodic(&self, handle: PrecisionHandle) {
        // Release the map before joining so other schedules are not blocked.
        let ticker = self.lock_tickers().remove(&handle);
        match ticker {
            Some(ticker) => Self::stop_ticker(handle, ticker),
            None => warn!(%handle, "Cancel requested for unknown precision schedule"),
        }
    }
}

impl Drop for ThreadedHost {
    fn drop(&mut self) {
        let tickers: Vec<_> = self.lock_tickers().drain().collect();
        for (handle, ticker) in tickers {
            Self::stop_ticker(handle, ticker);
        }
    }
}

fn run_ticker(period: Duration, spin_threshold: Duration, stop: &AtomicBool, context: &ScheduleContext) {
    let mut deadline = Instant::now() + period;

    loop {
        if !wait_until(deadline, spin_threshold, stop) || !context.fire() {
            break;
        }

        deadline += period;
        let now = Instant::now();
        if deadline <= now {
            // Fell behind by a full period; skip the missed ticks.
            trace!(?period, "Ticker fell behind, re-anchoring");
            deadline = now + period;
        }
    }
}

/// Blocks until `deadline`. Returns `false` if stopped first.
fn wait_until(deadline: Instant, spin_threshold: Duration, stop: &AtomicBool) -> bool {
    loop {
        if stop.load(Ordering::Acquire) {
            return false;
        }

        let now = Instant::now();
        if now >= deadline {
            return true;
        }

        let remaining = deadline - now;
        if remaining > spin_threshold {
            thread::park_timeout(remaining - spin_threshold);
        } else {
            std::hint::spin_loop();
            thread::yield_now();
        }
    }
}
