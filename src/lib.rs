#![deny(clippy::expect_used, clippy::unwrap_used)]

//! High-resolution periodic timers with a portable fallback.
//! 带可移植后备机制的高精度周期定时器。

pub mod config;
pub mod error;
pub mod timer;

mod testing;

pub use config::{FallbackConfig, PrecisionConfig, TimerConfig};
pub use error::{HostError, Result, TimerError};
pub use timer::{Mechanism, TimerListener, TimerService};
