//! Monotonic clock utilities.
//!
//! All timestamps in rtloop are signed nanoseconds on `CLOCK_MONOTONIC`.
//! Sleeps are absolute (`clock_nanosleep(TIMER_ABSTIME)`) so the cost of
//! computing the next deadline never accumulates as drift.
//!
//! [`SimulatedClock`] implements the same [`Clock`] contract on a virtual
//! timeline. It never blocks, which makes the cyclic scheduling algorithm
//! testable to the nanosecond.

use crate::consts::NS_PER_SEC;
use nix::errno::Errno;
use nix::sys::time::TimeSpec;
use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Time source used by cyclic threads.
pub trait Clock: Send + 'static {
    /// Current time [ns].
    fn now_ns(&self) -> i64;

    /// Block until `deadline_ns`. Returns immediately if the deadline has passed.
    fn sleep_until_ns(&self, deadline_ns: i64);
}

/// The real `CLOCK_MONOTONIC` clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    #[inline]
    fn now_ns(&self) -> i64 {
        now_ns()
    }

    #[inline]
    fn sleep_until_ns(&self, deadline_ns: i64) {
        sleep_until_ns(deadline_ns)
    }
}

/// Current `CLOCK_MONOTONIC` time [ns].
#[inline]
pub fn now_ns() -> i64 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => timespec_to_ns(&ts),
        // CLOCK_MONOTONIC cannot fail on Linux.
        Err(_) => 0,
    }
}

/// Sleep on `CLOCK_MONOTONIC` until the absolute time `deadline_ns`.
///
/// Retries on `EINTR`. A deadline in the past returns without sleeping.
pub fn sleep_until_ns(deadline_ns: i64) {
    if deadline_ns <= now_ns() {
        return;
    }
    let ts = ns_to_timespec(deadline_ns);
    while let Err(Errno::EINTR) =
        clock_nanosleep(ClockId::CLOCK_MONOTONIC, ClockNanosleepFlags::TIMER_ABSTIME, &ts)
    {}
}

/// Convert a TimeSpec to nanoseconds.
#[inline]
pub fn timespec_to_ns(ts: &TimeSpec) -> i64 {
    ts.tv_sec() as i64 * NS_PER_SEC + ts.tv_nsec() as i64
}

/// Convert nanoseconds to a normalized TimeSpec (`0 <= tv_nsec < 1e9`).
#[inline]
pub fn ns_to_timespec(ns: i64) -> TimeSpec {
    TimeSpec::new(ns.div_euclid(NS_PER_SEC) as _, ns.rem_euclid(NS_PER_SEC) as _)
}

// ─── Simulated clock ───────────────────────────────────────────────

/// Virtual clock for deterministic timing tests.
///
/// `sleep_until_ns` jumps the virtual time to the deadline (or leaves it
/// unchanged if the deadline already passed), then adds the configured
/// wake-up jitter. Work inside a loop body is simulated with [`advance`].
/// Clones share the same timeline.
///
/// [`advance`]: SimulatedClock::advance
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock {
    now: Arc<AtomicI64>,
    wake_jitter_ns: Arc<AtomicI64>,
    sleeps: Arc<AtomicI64>,
}

impl SimulatedClock {
    /// Create a virtual clock starting at `start_ns`.
    pub fn new(start_ns: i64) -> Self {
        let clock = Self::default();
        clock.now.store(start_ns, Ordering::SeqCst);
        clock
    }

    /// Move virtual time forward by `ns`.
    pub fn advance(&self, ns: i64) {
        self.now.fetch_add(ns, Ordering::SeqCst);
    }

    /// Extra delay applied after every sleep, emulating scheduler latency.
    pub fn set_wake_jitter(&self, ns: i64) {
        self.wake_jitter_ns.store(ns, Ordering::SeqCst);
    }

    /// Number of `sleep_until_ns` calls that actually waited.
    pub fn blocking_sleeps(&self) -> i64 {
        self.sleeps.load(Ordering::SeqCst)
    }
}

impl Clock for SimulatedClock {
    fn now_ns(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep_until_ns(&self, deadline_ns: i64) {
        let now = self.now.load(Ordering::SeqCst);
        if deadline_ns > now {
            self.sleeps.fetch_add(1, Ordering::SeqCst);
            self.now.store(deadline_ns, Ordering::SeqCst);
        }
        self.advance(self.wake_jitter_ns.load(Ordering::SeqCst));
    }
}
