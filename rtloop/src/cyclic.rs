//! Fixed-period thread body with drift-free absolute scheduling.
//!
//! ## Iteration
//! ```text
//! next = start
//! loop {
//!     sleep_until(next)                      // absolute, TIMER_ABSTIME
//!     wakeup_latency = now - next            // metric "WakeupLatency"
//!     done = task.run_loop(ctx, now - start)
//!     loop_latency = end - wake              // metric "LoopLatency"
//!     task.track_latency(wakeup_latency, loop_latency)
//!     if done || stop requested { break }
//!     next += period                         // never now + period
//! }
//! ```
//!
//! The nominal wakeup of iteration `k` is always `start + k * period`.
//! An overrun makes the following sleep return immediately; the schedule
//! does not slip and the delay shows up only as wakeup latency.

use crate::thread::{StopHandle, Thread, ThreadBody};
use crate::tracer::{METRIC_LOOP_LATENCY, METRIC_WAKEUP_LATENCY, SPAN_SLEEP, SpanGuard, Tracer};
use parking_lot::Mutex;
use rtloop_common::clock::{Clock, MonotonicClock};
use rtloop_common::error::{RtError, RtResult};
use rtloop_common::sched::CyclicConfig;
use std::sync::Arc;

/// Iterations between publications of the shared latency snapshot.
const STATS_PUBLISH_INTERVAL: u64 = 1024;

// ─── Latency Statistics ────────────────────────────────────────────

/// Timing statistics of a cyclic thread. O(1) update, no allocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    /// Completed iterations.
    pub iterations: u64,
    /// Logical start of the schedule [ns].
    pub start_ns: i64,
    /// Nominal wakeup of the last completed iteration [ns].
    pub last_nominal_wakeup_ns: i64,
    /// Last loop duration [ns].
    pub last_loop_ns: i64,
    /// Minimum loop duration [ns].
    pub min_loop_ns: i64,
    /// Maximum loop duration [ns].
    pub max_loop_ns: i64,
    /// Running sum of loop durations.
    pub sum_loop_ns: i64,
    /// Running sum of squares for stddev computation.
    pub sum_sq_loop_ns: i128,
    /// Maximum wakeup latency [ns].
    pub max_wakeup_ns: i64,
    /// Running sum of wakeup latencies.
    pub sum_wakeup_ns: i64,
    /// Iterations whose loop ended after the next nominal wakeup.
    pub overruns: u64,
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyStats {
    /// Zeroed statistics.
    pub const fn new() -> Self {
        Self {
            iterations: 0,
            start_ns: 0,
            last_nominal_wakeup_ns: 0,
            last_loop_ns: 0,
            min_loop_ns: i64::MAX,
            max_loop_ns: 0,
            sum_loop_ns: 0,
            sum_sq_loop_ns: 0,
            max_wakeup_ns: 0,
            sum_wakeup_ns: 0,
            overruns: 0,
        }
    }

    /// Record one iteration.
    #[inline]
    pub fn record(&mut self, wakeup_ns: i64, loop_ns: i64) {
        self.iterations += 1;
        self.last_loop_ns = loop_ns;
        self.min_loop_ns = self.min_loop_ns.min(loop_ns);
        self.max_loop_ns = self.max_loop_ns.max(loop_ns);
        self.sum_loop_ns += loop_ns;
        self.sum_sq_loop_ns += (loop_ns as i128) * (loop_ns as i128);
        self.max_wakeup_ns = self.max_wakeup_ns.max(wakeup_ns);
        self.sum_wakeup_ns += wakeup_ns;
    }

    /// Average loop duration [ns] (0 if no iterations).
    #[inline]
    pub fn avg_loop_ns(&self) -> i64 {
        if self.iterations == 0 {
            0
        } else {
            self.sum_loop_ns / self.iterations as i64
        }
    }

    /// Average wakeup latency [ns] (0 if no iterations).
    #[inline]
    pub fn avg_wakeup_ns(&self) -> i64 {
        if self.iterations == 0 {
            0
        } else {
            self.sum_wakeup_ns / self.iterations as i64
        }
    }

    /// Standard deviation of the loop duration [ns].
    pub fn loop_stddev_ns(&self) -> f64 {
        if self.iterations < 2 {
            return 0.0;
        }
        let n = self.iterations as f64;
        let mean = self.sum_loop_ns as f64 / n;
        let var = (self.sum_sq_loop_ns as f64 / n) - mean * mean;
        var.max(0.0).sqrt()
    }
}

/// Shared view of a cyclic thread's [`LatencyStats`].
///
/// Refreshed every 1024 iterations without blocking the loop, and
/// unconditionally when the loop exits.
#[derive(Debug, Clone, Default)]
pub struct StatsHandle(Arc<Mutex<LatencyStats>>);

impl StatsHandle {
    /// Copy of the last published statistics.
    pub fn snapshot(&self) -> LatencyStats {
        *self.0.lock()
    }

    #[inline]
    fn try_publish(&self, stats: &LatencyStats) {
        if let Some(mut shared) = self.0.try_lock() {
            *shared = *stats;
        }
    }

    fn publish(&self, stats: &LatencyStats) {
        *self.0.lock() = *stats;
    }
}

// ─── Task Trait ────────────────────────────────────────────────────

/// Per-iteration view handed to [`CyclicTask::run_loop`].
#[derive(Debug)]
pub struct CycleContext<'a> {
    tracer: &'a Tracer,
    iteration: u64,
    nominal_wakeup_ns: i64,
    wakeup_latency_ns: i64,
}

impl<'a> CycleContext<'a> {
    /// Zero-based iteration index.
    #[inline]
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Scheduled wakeup of this iteration: `start + iteration * period`.
    #[inline]
    pub fn nominal_wakeup_ns(&self) -> i64 {
        self.nominal_wakeup_ns
    }

    /// How late this iteration woke up [ns].
    #[inline]
    pub fn wakeup_latency_ns(&self) -> i64 {
        self.wakeup_latency_ns
    }

    /// The thread's tracer.
    #[inline]
    pub fn tracer(&self) -> &'a Tracer {
        self.tracer
    }

    /// Shorthand for `ctx.tracer().with_span(name)`.
    #[inline]
    pub fn span(&self, name: &'static str) -> SpanGuard<'a> {
        self.tracer.with_span(name)
    }
}

/// Work executed once per period.
///
/// Implementations must not block, allocate or panic inside
/// [`run_loop`](Self::run_loop); errors are handled internally and at most
/// turned into a stop request by returning `true`.
pub trait CyclicTask: Send + 'static {
    /// One iteration. `elapsed_ns` is the time since the schedule started.
    /// Return `true` to stop gracefully.
    fn run_loop(&mut self, ctx: &CycleContext<'_>, elapsed_ns: i64) -> bool;

    /// Called after every iteration with its wakeup and loop latency [ns].
    fn track_latency(&mut self, _wakeup_latency_ns: i64, _loop_latency_ns: i64) {}

    /// Called once on the real-time thread, after scheduling is applied and
    /// before the first period. Publishers and subscribers are created here.
    fn initialize_transport(&mut self) {}
}

/// Adapter running a closure as a [`CyclicTask`].
pub struct FnTask<F>(pub F);

impl<F> CyclicTask for FnTask<F>
where
    F: FnMut(&CycleContext<'_>, i64) -> bool + Send + 'static,
{
    fn run_loop(&mut self, ctx: &CycleContext<'_>, elapsed_ns: i64) -> bool {
        (self.0)(ctx, elapsed_ns)
    }
}

// ─── Cyclic Thread ─────────────────────────────────────────────────

/// A [`CyclicTask`] bound to its period, tracer and clock.
pub struct CyclicThread<T, C = MonotonicClock> {
    name: String,
    config: CyclicConfig,
    task: T,
    clock: C,
    tracer: Tracer,
    stats: StatsHandle,
}

impl<T: CyclicTask> CyclicThread<T, MonotonicClock> {
    /// Validate `config` and allocate the tracer buffer.
    ///
    /// # Errors
    /// `RtError::Configuration` for a non-positive period, an invalid
    /// priority or affinity, or a zero tracer capacity.
    pub fn new(name: impl Into<String>, config: CyclicConfig, task: T) -> RtResult<Self> {
        let name = name.into();
        config.validate().map_err(|e| match e {
            RtError::Configuration(msg) => {
                RtError::Configuration(format!("cyclic thread '{name}': {msg}"))
            }
            other => other,
        })?;
        let tracer = Tracer::new(&name, &config.tracer);
        Ok(Self {
            name,
            config,
            task,
            clock: MonotonicClock,
            tracer,
            stats: StatsHandle::default(),
        })
    }
}

impl<T: CyclicTask, C: Clock> CyclicThread<T, C> {
    /// Replace the time source.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> CyclicThread<T, C2> {
        CyclicThread {
            name: self.name,
            config: self.config,
            task: self.task,
            clock,
            tracer: self.tracer,
            stats: self.stats,
        }
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Period [ns].
    pub fn period_ns(&self) -> i64 {
        self.config.period_ns
    }

    /// This thread's tracer.
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Handle to the latency statistics, valid after the thread is moved.
    pub fn stats(&self) -> StatsHandle {
        self.stats.clone()
    }

    /// The wrapped task.
    pub fn task(&self) -> &T {
        &self.task
    }

    /// Wrap into a [`Thread`] that applies the scheduling part of the config.
    pub fn into_thread(self) -> RtResult<Thread> {
        let name = self.name.clone();
        let sched = self.config.sched.clone();
        Thread::new(name, sched, self)
    }

    #[inline]
    fn sleep_until(&self, deadline_ns: i64) {
        if self.config.tracer.trace_sleep {
            let sleep_start = self.clock.now_ns();
            self.clock.sleep_until_ns(deadline_ns);
            self.tracer
                .record_span(SPAN_SLEEP, sleep_start, self.clock.now_ns());
        } else {
            self.clock.sleep_until_ns(deadline_ns);
        }
    }
}

impl<T: CyclicTask, C: Clock> ThreadBody for CyclicThread<T, C> {
    fn run(&mut self, stop: &StopHandle) {
        self.task.initialize_transport();

        let period_ns = self.config.period_ns;
        let start_ns = self.clock.now_ns();
        let mut next_wakeup_ns = start_ns;
        let mut stats = LatencyStats::new();
        stats.start_ns = start_ns;
        let mut iteration: u64 = 0;

        loop {
            self.sleep_until(next_wakeup_ns);

            let wake_ns = self.clock.now_ns();
            let wakeup_latency_ns = wake_ns - next_wakeup_ns;
            self.tracer
                .record_metric(METRIC_WAKEUP_LATENCY, wakeup_latency_ns, wake_ns);

            let ctx = CycleContext {
                tracer: &self.tracer,
                iteration,
                nominal_wakeup_ns: next_wakeup_ns,
                wakeup_latency_ns,
            };
            let done = self.task.run_loop(&ctx, wake_ns - start_ns);

            let loop_end_ns = self.clock.now_ns();
            let loop_latency_ns = loop_end_ns - wake_ns;
            self.tracer
                .record_metric(METRIC_LOOP_LATENCY, loop_latency_ns, loop_end_ns);
            self.task.track_latency(wakeup_latency_ns, loop_latency_ns);

            stats.record(wakeup_latency_ns, loop_latency_ns);
            stats.last_nominal_wakeup_ns = next_wakeup_ns;
            if loop_end_ns > next_wakeup_ns + period_ns {
                stats.overruns += 1;
            }

            iteration += 1;
            if iteration % STATS_PUBLISH_INTERVAL == 0 {
                self.stats.try_publish(&stats);
            }

            if done || stop.is_stop_requested() {
                break;
            }
            next_wakeup_ns += period_ns;
        }

        self.stats.publish(&stats);
        tracing::info!(
            thread = %self.name,
            iterations = stats.iterations,
            max_wakeup_ns = stats.max_wakeup_ns,
            max_loop_ns = stats.max_loop_ns,
            overruns = stats.overruns,
            "cyclic loop exited"
        );
    }

    fn tracer(&self) -> Option<Tracer> {
        Some(self.tracer.clone())
    }
}
