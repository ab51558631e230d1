//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use thiserror::Error;

/// The primary error type returned by [`TimerService`](crate::timer::TimerService).
/// [`TimerService`](crate::timer::TimerService) 返回的主要错误类型。
///
/// Loss of precision is never reported through this type: when the host
/// refuses a precision schedule the service degrades and still returns `Ok`.
#[derive(Debug, Error)]
pub enum TimerError {
    /// The requested interval was not a positive number of milliseconds.
    /// 请求的间隔不是正的毫秒数。
    #[error("timer interval must be positive, got {0}ms")]
    InvalidInterval(u32),

    /// `cancel_timer` was called while no schedule was running.
    /// 在没有运行任何调度时调用了 `cancel_timer`。
    #[error("no timer schedule is running")]
    NotRunning,

    /// The precision mechanism was refused and the fallback timer could not
    /// be created either.
    /// 高精度机制被拒绝，且后备定时器也无法创建。
    #[error("fallback timer unavailable: {0}")]
    FallbackUnavailable(#[source] std::io::Error),
}

/// Why the host facility refused to create a precision schedule.
/// 宿主设施拒绝创建高精度调度的原因。
#[derive(Debug, Error)]
pub enum HostError {
    /// The process already holds the maximum number of simultaneous
    /// high-resolution schedules.
    ///
    /// 进程已持有最大数量的同时高精度调度。
    #[error("high-resolution timer limit of {limit} reached")]
    Exhausted { limit: usize },

    /// The host could not start the thread that drives the schedule.
    /// 宿主无法启动驱动调度的线程。
    #[error("failed to spawn timer thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The host facility is not available at all.
    /// 宿主设施完全不可用。
    #[error("high-resolution timer facility unavailable")]
    Unavailable,
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, TimerError>;

impl From<TimerError> for std::io::Error {
    fn from(err: TimerError) -> Self {
        use std::io::ErrorKind;
        match err {
            TimerError::InvalidInterval(_) => std::io::Error::new(ErrorKind::InvalidInput, err),
            TimerError::NotRunning => std::io::Error::new(ErrorKind::NotConnected, err),
            TimerError::FallbackUnavailable(e) => e,
        }
    }
}
