//! 测试辅助工具模块
//! Test utilities module
//!
//! 用于驱动 `TimerService` 的协作者替身：可控的宿主、计数的后备工厂和
//! 记录降级事件的观察者。
//!
//! Collaborator doubles for driving `TimerService`: a controllable host, a
//! counting fallback factory and an observer that records degradations.

#![cfg(test)]

use crate::error::HostError;
use crate::timer::{
    DegradationEvent, DegradationObserver, FallbackFactory, FallbackTimer, PrecisionHandle,
    PrecisionHost, ScheduleContext, TimerListener,
};
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Listener that counts its ticks.
pub struct CountingListener {
    ticks: AtomicUsize,
}

impl CountingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ticks: AtomicUsize::new(0),
        })
    }

    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }
}

impl TimerListener for CountingListener {
    fn on_timer_expired(&self) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }
}

/// A host whose schedules only tick when the test fires them.
#[derive(Default)]
pub struct RecordingHost {
    refuse: AtomicBool,
    next_id: AtomicU64,
    live: Mutex<HashMap<PrecisionHandle, (u32, Arc<ScheduleContext>)>>,
    pub requests: AtomicUsize,
    pub cancels: AtomicUsize,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refusing() -> Arc<Self> {
        let host = Self::new();
        host.set_refuse(true);
        host
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn live_schedules(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub fn live_interval(&self, handle: PrecisionHandle) -> Option<u32> {
        self.live.lock().unwrap().get(&handle).map(|(ms, _)| *ms)
    }

    pub fn context(&self, handle: PrecisionHandle) -> Option<Arc<ScheduleContext>> {
        self.live.lock().unwrap().get(&handle).map(|(_, ctx)| ctx.clone())
    }

    /// Fires every live schedule once.
    pub fn fire_all(&self) {
        let contexts: Vec<_> = self.live.lock().unwrap().values().map(|(_, ctx)| ctx.clone()).collect();
        for context in contexts {
            context.fire();
        }
    }
}

impl PrecisionHost for RecordingHost {
    fn request_periodic(
        &self,
        interval_ms: u32,
        context: Arc<ScheduleContext>,
    ) -> Result<PrecisionHandle, HostError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(HostError::Exhausted { limit: 0 });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = PrecisionHandle::new(NonZeroU64::new(id).unwrap());
        self.live.lock().unwrap().insert(handle, (interval_ms, context));
        Ok(handle)
    }

    fn cancel_periodic(&self, handle: PrecisionHandle) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().remove(&handle);
    }
}

/// What a [`ManualFallback`] has been asked to do.
#[derive(Debug, Default)]
pub struct FallbackLog {
    pub starts: Vec<u32>,
    pub cancels: usize,
}

/// Fallback that ticks only when fired and rounds intervals up to
/// `granularity_ms`.
pub struct ManualFallback {
    listener: Arc<dyn TimerListener>,
    granularity_ms: u32,
    context: Option<Arc<ScheduleContext>>,
    interval_ms: u32,
    log: Arc<Mutex<FallbackLog>>,
    shared_context: Arc<Mutex<Option<Arc<ScheduleContext>>>>,
}

impl FallbackTimer for ManualFallback {
    fn start(&mut self, interval_ms: u32) {
        self.cancel();
        let context = Arc::new(ScheduleContext::new(self.listener.clone()));
        *self.shared_context.lock().unwrap() = Some(context.clone());
        self.context = Some(context);
        self.interval_ms = interval_ms.div_ceil(self.granularity_ms) * self.granularity_ms;
        self.log.lock().unwrap().starts.push(interval_ms);
    }

    fn cancel(&mut self) {
        if let Some(context) = self.context.take() {
            context.close();
            self.log.lock().unwrap().cancels += 1;
        }
        *self.shared_context.lock().unwrap() = None;
        self.interval_ms = 0;
    }

    fn interval_ms(&self) -> u32 {
        self.interval_ms
    }
}

/// Factory that counts how many fallbacks it built.
pub struct CountingFactory {
    granularity_ms: u32,
    pub created: AtomicUsize,
    pub log: Arc<Mutex<FallbackLog>>,
    context: Arc<Mutex<Option<Arc<ScheduleContext>>>>,
    fail: AtomicBool,
}

impl CountingFactory {
    pub fn new(granularity_ms: u32) -> Arc<Self> {
        Arc::new(Self {
            granularity_ms,
            created: AtomicUsize::new(0),
            log: Arc::new(Mutex::new(FallbackLog::default())),
            context: Arc::new(Mutex::new(None)),
            fail: AtomicBool::new(false),
        })
    }

    pub fn failing() -> Arc<Self> {
        let factory = Self::new(1);
        factory.fail.store(true, Ordering::SeqCst);
        factory
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Fires the running fallback schedule once, if any.
    pub fn fire(&self) -> bool {
        let context = self.context.lock().unwrap().clone();
        context.is_some_and(|context| context.fire())
    }
}

impl FallbackFactory for CountingFactory {
    fn create(&self, listener: Arc<dyn TimerListener>) -> std::io::Result<Box<dyn FallbackTimer>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("no runtime"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ManualFallback {
            listener,
            granularity_ms: self.granularity_ms,
            context: None,
            interval_ms: 0,
            log: self.log.clone(),
            shared_context: self.context.clone(),
        }))
    }
}

/// A degradation as seen by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedDegradation {
    pub requested_interval_ms: u32,
    pub effective_interval_ms: u32,
    pub first_degradation: bool,
}

#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<ObservedDegradation>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ObservedDegradation> {
        self.events.lock().unwrap().clone()
    }
}

impl DegradationObserver for RecordingObserver {
    fn on_degraded(&self, event: &DegradationEvent<'_>) {
        self.events.lock().unwrap().push(ObservedDegradation {
            requested_interval_ms: event.requested_interval_ms,
            effective_interval_ms: event.effective_interval_ms,
            first_degradation: event.first_degradation,
        });
    }
}
