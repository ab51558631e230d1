//! 定时器服务集成测试
//! Timer service integration tests
//!
//! 使用真实的计时线程宿主和 tokio 后备定时器端到端地运行服务。
//! Runs the service end to end on real ticker threads and the tokio fallback.

pub mod common;

use common::harness::{init_tracing, ChannelListener, CountingTokioFactory, RecordingObserver};
use hirestimer::timer::{ThreadedHost, TimerListener};
use hirestimer::{Mechanism, PrecisionConfig, TimerConfig, TimerService};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, OnceLock, Weak};
use tokio::time::{sleep, timeout, Duration};

fn host_with_limit(limit: usize) -> Arc<ThreadedHost> {
    Arc::new(ThreadedHost::new(PrecisionConfig {
        max_concurrent_timers: limit,
        ..PrecisionConfig::default()
    }))
}

#[tokio::test]
async fn test_precision_timer_delivers_ticks() {
    init_tracing();
    let (listener, mut rx) = ChannelListener::new();
    let mut service = TimerService::builder(listener.clone())
        .host(host_with_limit(4))
        .build();

    service.start_timer(10).unwrap();
    assert_eq!(service.interval_ms(), 10);
    assert_eq!(service.mechanism(), Mechanism::Precision);

    let first = timeout(Duration::from_secs(1), rx.recv()).await;
    assert!(matches!(first, Ok(Some(_))), "no tick within 1s");

    service.cancel_timer().unwrap();
}

#[tokio::test]
async fn test_default_service_uses_process_host() {
    init_tracing();
    let (listener, mut rx) = ChannelListener::new();
    let mut service = TimerService::new(listener);

    service.start_timer(5).unwrap();
    assert_eq!(service.mechanism(), Mechanism::Precision);
    assert!(timeout(Duration::from_secs(1), rx.recv()).await.is_ok());
    assert_eq!(ThreadedHost::global().active_schedules(), 1);

    service.cancel_timer().unwrap();
    assert_eq!(ThreadedHost::global().active_schedules(), 0);
}

#[tokio::test]
async fn test_refused_host_degrades_to_fallback() {
    init_tracing();
    let (listener, mut rx) = ChannelListener::new();
    let factory = CountingTokioFactory::new();
    let observer = RecordingObserver::new();
    let mut service = TimerService::builder(listener.clone())
        .host(host_with_limit(0))
        .fallback_factory(factory.clone())
        .observer(observer.clone())
        .build();

    service.start_timer(15).unwrap();
    assert_eq!(service.mechanism(), Mechanism::Fallback);
    assert_eq!(service.interval_ms(), 20);

    let tick = timeout(Duration::from_secs(1), rx.recv()).await;
    assert!(matches!(tick, Ok(Some(_))), "fallback delivered no tick");

    service.cancel_timer().unwrap();
    service.start_timer(30).unwrap();
    assert_eq!(service.interval_ms(), 30);

    assert_eq!(factory.created(), 1);
    assert_eq!(observer.events(), vec![(15, 20, true), (30, 30, false)]);
    service.cancel_timer().unwrap();
}

#[tokio::test]
async fn test_exhausted_host_degrades_second_service() {
    init_tracing();
    let host = host_with_limit(1);
    let (first_listener, _first_rx) = ChannelListener::new();
    let (second_listener, mut second_rx) = ChannelListener::new();

    let mut first = TimerService::builder(first_listener)
        .host(host.clone())
        .build();
    let mut second = TimerService::builder(second_listener)
        .host(host.clone())
        .observer(RecordingObserver::new())
        .build();

    first.start_timer(5).unwrap();
    second.start_timer(5).unwrap();
    assert_eq!(first.mechanism(), Mechanism::Precision);
    assert_eq!(second.mechanism(), Mechanism::Fallback);
    assert_eq!(second.interval_ms(), 10);
    assert!(timeout(Duration::from_secs(1), second_rx.recv()).await.is_ok());

    // Once the slot frees up, the next start gets precision again.
    first.cancel_timer().unwrap();
    second.start_timer(5).unwrap();
    assert_eq!(second.mechanism(), Mechanism::Precision);
    assert!(second.has_fallback());
    second.cancel_timer().unwrap();
}

#[tokio::test]
async fn test_restart_with_new_interval_leaves_no_residual_ticks() {
    init_tracing();
    let (listener, mut rx) = ChannelListener::new();
    let mut service = TimerService::builder(listener.clone())
        .host(host_with_limit(2))
        .build();

    service.start_timer(5).unwrap();
    assert!(timeout(Duration::from_secs(1), rx.recv()).await.is_ok());
    service.cancel_timer().unwrap();
    assert_eq!(service.interval_ms(), 0);

    let after_cancel = listener.ticks();
    sleep(Duration::from_millis(30)).await;
    assert_eq!(listener.ticks(), after_cancel);
    while rx.try_recv().is_ok() {}

    service.start_timer(20).unwrap();
    assert_eq!(service.interval_ms(), 20);
    let tick = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
    assert_eq!(tick, Some(after_cancel + 1));
    service.cancel_timer().unwrap();
}

#[tokio::test]
async fn test_config_builds_dedicated_host() {
    init_tracing();
    let (listener, _rx) = ChannelListener::new();
    let config = TimerConfig {
        precision: PrecisionConfig {
            max_concurrent_timers: 0,
            ..PrecisionConfig::default()
        },
        ..TimerConfig::default()
    };
    let mut service = TimerService::builder(listener)
        .config(config)
        .observer(RecordingObserver::new())
        .build();

    service.start_timer(10).unwrap();
    assert_eq!(service.mechanism(), Mechanism::Fallback);
    service.cancel_timer().unwrap();
}

/// Cancels its own service from inside the tick.
struct SelfCancelling {
    service: OnceLock<Weak<Mutex<TimerService>>>,
    done: Mutex<std_mpsc::Sender<()>>,
}

impl TimerListener for SelfCancelling {
    fn on_timer_expired(&self) {
        let Some(service) = self.service.get().and_then(Weak::upgrade) else {
            return;
        };
        let mut service = service.lock().unwrap();
        if service.is_running() {
            service.cancel_timer().unwrap();
            let _ = self.done.lock().unwrap().send(());
        }
    }
}

#[test]
fn test_cancel_from_inside_callback_does_not_deadlock() {
    init_tracing();
    let (done_tx, done_rx) = std_mpsc::channel();
    let listener = Arc::new(SelfCancelling {
        service: OnceLock::new(),
        done: Mutex::new(done_tx),
    });
    let host = host_with_limit(1);

    let service = Arc::new(Mutex::new(
        TimerService::builder(listener.clone()).host(host.clone()).build(),
    ));
    let _ = listener.service.set(Arc::downgrade(&service));

    service.lock().unwrap().start_timer(5).unwrap();
    done_rx
        .recv_timeout(std::time::Duration::from_secs(2))
        .unwrap();

    let service = service.lock().unwrap();
    assert_eq!(service.mechanism(), Mechanism::Idle);
    assert_eq!(host.active_schedules(), 0);
}

#[test]
fn test_dropping_running_service_stops_ticks() {
    init_tracing();
    let (listener, _rx) = ChannelListener::new();
    let host = host_with_limit(1);
    let mut service = TimerService::builder(listener.clone())
        .host(host.clone())
        .build();

    service.start_timer(2).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));
    drop(service);

    assert_eq!(host.active_schedules(), 0);
    let after_drop = listener.ticks();
    std::thread::sleep(std::time::Duration::from_millis(20));
    assert_eq!(listener.ticks(), after_drop);
}

/// Records the thread each tick arrives on.
#[derive(Default)]
struct ThreadRecorder {
    threads: Mutex<Vec<std::thread::ThreadId>>,
}

impl TimerListener for ThreadRecorder {
    fn on_timer_expired(&self) {
        self.threads.lock().unwrap().push(std::thread::current().id());
    }
}

#[tokio::test]
async fn test_fallback_ticks_while_caller_runtime_is_blocked() {
    init_tracing();
    let caller = std::thread::current().id();
    let listener = Arc::new(ThreadRecorder::default());
    let mut service = TimerService::builder(listener.clone())
        .host(host_with_limit(0))
        .observer(RecordingObserver::new())
        .build();

    service.start_timer(10).unwrap();
    assert_eq!(service.mechanism(), Mechanism::Fallback);
    // The current-thread test runtime never gets to run while this sleeps.
    std::thread::sleep(std::time::Duration::from_millis(100));
    service.cancel_timer().unwrap();

    let threads = listener.threads.lock().unwrap();
    assert!(threads.len() >= 3, "only {} fallback ticks", threads.len());
    assert!(threads.iter().all(|id| *id != caller));
}

#[test]
fn test_fallback_outlives_the_runtime_it_was_created_on() {
    init_tracing();
    let (listener, _rx) = ChannelListener::new();
    let mut service = TimerService::builder(listener.clone())
        .host(host_with_limit(0))
        .observer(RecordingObserver::new())
        .build();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        service.start_timer(10).unwrap();
        service.cancel_timer().unwrap();
    });
    drop(runtime);

    service.start_timer(10).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(150));
    assert_eq!(service.mechanism(), Mechanism::Fallback);
    assert!(service.has_fallback());
    assert!(listener.ticks() >= 2, "only {} ticks", listener.ticks());
    service.cancel_timer().unwrap();
}
