//! 投递闸门
//! Delivery gate
//!
//! 两种机制共用的投递闸门：控制一个调度是否仍可通知监听器，并让取消操作
//! 能够等待正在进行中的回调结束。
//!
//! The delivery gate shared by both mechanisms. It decides whether a schedule
//! may still notify its listener and lets cancellation wait for a callback
//! that is already running.

use super::listener::TimerListener;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

thread_local! {
    /// Address of the gate currently delivering on this thread, 0 if none.
    static DELIVERING: Cell<usize> = const { Cell::new(0) };
}

/// Per-schedule delivery gate.
/// 每个调度一个的投递闸门。
#[derive(Debug)]
pub struct DeliveryGate {
    open: AtomicBool,
    in_flight: Mutex<()>,
}

impl DeliveryGate {
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            in_flight: Mutex::new(()),
        }
    }

    /// Whether ticks are still being delivered.
    /// 是否仍在投递滴答。
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Delivers one tick to `listener` unless the gate has been closed.
    /// Returns `false` once the gate is closed.
    ///
    /// 除非闸门已关闭，否则向 `listener` 投递一次滴答。闸门关闭后返回 `false`。
    pub fn deliver(&self, listener: &dyn TimerListener) -> bool {
        let _guard = self.lock();
        if !self.is_open() {
            return false;
        }

        let _mark = DeliveringMark::enter(self.addr());
        listener.on_timer_expired();
        true
    }

    /// Closes the gate. When called from outside a callback delivered by this
    /// gate, blocks until any in-flight callback has returned. When called
    /// from inside such a callback, it returns immediately; that callback is
    /// the last one.
    ///
    /// 关闭闸门。在本闸门投递的回调之外调用时，会阻塞直到进行中的回调返回；
    /// 在此类回调内部调用时立即返回，该回调即为最后一次。
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
        if !self.is_delivering_here() {
            drop(self.lock());
        }
    }

    /// Whether the current thread is inside a callback delivered by this gate.
    /// 当前线程是否处于本闸门投递的回调内部。
    pub fn is_delivering_here(&self) -> bool {
        DELIVERING.with(|d| d.get()) == self.addr()
    }

    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // A panicking listener poisons the lock but leaves no state behind it.
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Restores the thread-local marker even if the listener panics.
struct DeliveringMark {
    previous: usize,
}

impl DeliveringMark {
    fn enter(addr: usize) -> Self {
        Self {
            previous: DELIVERING.with(|d| d.replace(addr)),
        }
    }
}

impl Drop for DeliveringMark {
    fn drop(&mut self) {
        DELIVERING.with(|d| d.set(self.previous));
    }
}

impl Default for DeliveryGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a mechanism needs to notify the listener for one schedule.
/// This is what gets handed to the host in place of a raw context pointer.
///
/// 机制为一个调度通知监听器所需的全部内容。它代替原始上下文指针交给宿主。
pub struct ScheduleContext {
    listener: Arc<dyn TimerListener>,
    gate: DeliveryGate,
}

impl ScheduleContext {
    pub fn new(listener: Arc<dyn TimerListener>) -> Self {
        Self {
            listener,
            gate: DeliveryGate::new(),
        }
    }

    /// Delivers one tick. Returns `false` once the schedule is closed, after
    /// which the mechanism should stop ticking.
    ///
    /// 投递一次滴答。调度关闭后返回 `false`，机制随后应停止计时。
    pub fn fire(&self) -> bool {
        self.gate.deliver(self.listener.as_ref())
    }

    /// Stops delivery; see [`DeliveryGate::close`].
    /// 停止投递；参见 [`DeliveryGate::close`]。
    pub fn close(&self) {
        self.gate.close();
    }

    pub fn is_open(&self) -> bool {
        self.gate.is_open()
    }

    pub fn is_delivering_here(&self) -> bool {
        self.gate.is_delivering_here()
    }

    /// The listener this schedule notifies.
    /// 此调度通知的监听器。
    pub fn listener(&self) -> &Arc<dyn TimerListener> {
        &self.listener
    }
}

impl std::fmt::Debug for ScheduleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleContext")
            .field("open", &self.gate.is_open())
            .finish_non_exhaustive()
    }
}
