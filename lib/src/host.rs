//! Host-integration surface.
//!
//! The embedding host is single-threaded and cooperative: it offers no
//! preemption and no native awaiting, only a recurring timer (or idle
//! callback) mechanism on its own loop. [`HostLoop`] is the engine's view of
//! that mechanism, plus a monotonic clock for timing accounting. The binding
//! layer supplies the implementation; tests drive a manual one.

use std::{fmt, time::Duration, time::Instant};

/// Identifier for a recurring host timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// What a pump tick tells the host loop to do with its timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Keep the recurring timer running.
    Continue,
    /// Retire the timer; the session it was pumping is gone or delivered.
    Stop,
}

/// A recurring tick callback, run on the host thread.
pub type TickFn = Box<dyn FnMut() -> Tick + Send>;

/// The host's cooperative loop and clock.
///
/// `schedule_recurring` must run `tick` on the host thread at roughly the
/// given interval until the tick returns [`Tick::Stop`] or the timer is
/// cancelled. `cancel_recurring` must be idempotent and tolerate unknown
/// ids; the engine may race its own explicit cancellation against a tick
/// that already stopped the timer.
pub trait HostLoop: Send + Sync + 'static {
    fn schedule_recurring(&self, interval: Duration, tick: TickFn) -> TimerId;

    fn cancel_recurring(&self, timer: TimerId);

    /// Monotonic clock, used for delivery-latency accounting.
    fn now(&self) -> Instant {
        Instant::now()
    }
}
