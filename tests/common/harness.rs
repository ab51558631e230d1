//! tests/common/harness.rs
#![allow(dead_code)]

use hirestimer::timer::{
    DegradationEvent, DegradationObserver, FallbackFactory, FallbackTimer, TimerListener,
    TokioFallbackFactory,
};
use hirestimer::FallbackConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use tokio::sync::mpsc;
use tracing_subscriber::fmt::format::FmtSpan;

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "hirestimer=debug".to_string());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_test_writer()
            .init();
    });
}

/// Listener that counts ticks and forwards each one over a channel.
pub struct ChannelListener {
    ticks: AtomicUsize,
    tx: mpsc::UnboundedSender<usize>,
}

impl ChannelListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<usize>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = Arc::new(Self {
            ticks: AtomicUsize::new(0),
            tx,
        });
        (listener, rx)
    }

    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }
}

impl TimerListener for ChannelListener {
    fn on_timer_expired(&self) {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.tx.send(tick);
    }
}

/// Wraps the tokio fallback factory and counts constructions.
pub struct CountingTokioFactory {
    inner: TokioFallbackFactory,
    created: AtomicUsize,
}

impl CountingTokioFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: TokioFallbackFactory::new(FallbackConfig::default()),
            created: AtomicUsize::new(0),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl FallbackFactory for CountingTokioFactory {
    fn create(&self, listener: Arc<dyn TimerListener>) -> std::io::Result<Box<dyn FallbackTimer>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.inner.create(listener)
    }
}

/// Records `(requested, effective, first)` for every degradation.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<(u32, u32, bool)>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(u32, u32, bool)> {
        self.events.lock().unwrap().clone()
    }
}

impl DegradationObserver for RecordingObserver {
    fn on_degraded(&self, event: &DegradationEvent<'_>) {
        self.events.lock().unwrap().push((
            event.requested_interval_ms,
            event.effective_interval_ms,
            event.first_degradation,
        ));
    }
}
