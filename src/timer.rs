//! 周期回调定时器模块
//! Periodic-callback timer module
//!
//! 该模块实现了一个周期定时器服务：优先使用宿主的高精度定时机制，
//! 在高精度机制不可用或耗尽时透明地降级到可移植的后备定时器。
//!
//! This module implements a periodic timer service that prefers the host's
//! high-resolution timing mechanism and transparently degrades to a portable
//! fallback timer when the precision mechanism is unavailable or exhausted.

pub mod diagnostics;
pub mod fallback;
pub mod gate;
pub mod listener;
pub mod precision;
pub mod service;


pub use diagnostics::{DegradationEvent, DegradationObserver, NoopObserver, TracingObserver};
pub use fallback::{
    FallbackFactory, FallbackTimer, TokioFallback, TokioFallbackFactory, fallback_runtime,
};
pub use gate::{DeliveryGate, ScheduleContext};
pub use listener::TimerListener;
pub use precision::{PrecisionBinding, PrecisionHandle, PrecisionHost, ThreadedHost};
pub use service::{Mechanism, TimerService, TimerServiceBuilder, TimerServiceStats};
