//! 定时器监听器
//! Timer listener
//!
//! 每次滴答都会通知的单方法能力对象。
//! The single-method capability notified on every tick.

/// Receives every expiration of a periodic schedule, from either mechanism.
/// 接收周期调度的每一次到期，无论来自哪种机制。
///
/// Implementations are called from a thread owned by the timer mechanism,
/// never from the thread that started the timer.
pub trait TimerListener: Send + Sync {
    /// Called once per tick.
    /// 每次滴答调用一次。
    fn on_timer_expired(&self);
}

impl<F> TimerListener for F
where
    F: Fn() + Send + Sync,
{
    fn on_timer_expired(&self) {
        self()
    }
}
