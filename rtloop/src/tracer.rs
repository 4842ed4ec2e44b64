//! Per-thread span and metric recorder.
//!
//! A [`Tracer`] belongs to one real-time thread. That thread is the only
//! producer: it pushes [`TraceEvent`]s into a bounded lock-free queue
//! without allocating or blocking. The trace session drains the queue
//! from its own background thread.
//!
//! # RT Safety
//!
//! - Bounded capacity, allocated once at construction
//! - Push is a single CAS; a full queue drops the event and bumps a counter
//! - Recording is skipped entirely (no clock read) while no session is active
//! - Without the `trace` feature every recording call compiles to nothing

use crossbeam::queue::ArrayQueue;
use rtloop_common::clock::now_ns;
use rtloop_common::sched::TracerConfig;
use static_assertions::assert_impl_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

/// Metric: actual wake time minus nominal wake time [ns].
pub const METRIC_WAKEUP_LATENCY: &str = "WakeupLatency";
/// Metric: duration of one loop callback [ns].
pub const METRIC_LOOP_LATENCY: &str = "LoopLatency";
/// Span: absolute sleep to the next period boundary.
pub const SPAN_SLEEP: &str = "Sleep";

/// One recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    /// Named timed interval.
    Span {
        /// Span name.
        name: &'static str,
        /// Start [ns, CLOCK_MONOTONIC].
        start_ns: i64,
        /// End [ns, CLOCK_MONOTONIC].
        end_ns: i64,
    },
    /// Named sample.
    Metric {
        /// Metric name.
        name: &'static str,
        /// Sample value.
        value: i64,
        /// Sample time [ns, CLOCK_MONOTONIC].
        timestamp_ns: i64,
    },
}

impl TraceEvent {
    /// Time at which the event was complete: span end or metric sample time.
    #[inline]
    pub fn completed_at_ns(&self) -> i64 {
        match *self {
            Self::Span { end_ns, .. } => end_ns,
            Self::Metric { timestamp_ns, .. } => timestamp_ns,
        }
    }
}

struct TracerInner {
    thread_name: String,
    tid: AtomicI32,
    enabled: AtomicBool,
    #[cfg(feature = "trace")]
    queue: ArrayQueue<TraceEvent>,
    dropped: AtomicU64,
}

/// Handle to a thread's trace buffer. Clones share the buffer.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

assert_impl_all!(Tracer: Send, Sync, Clone);

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("thread", &self.inner.thread_name)
            .field("tid", &self.tid())
            .field("enabled", &self.is_enabled())
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl Tracer {
    /// Create a tracer for `thread_name`. Allocates the whole buffer now.
    ///
    /// The tracer starts disabled; a trace session enables it.
    pub fn new(thread_name: &str, config: &TracerConfig) -> Self {
        #[cfg(not(feature = "trace"))]
        let _ = config;
        Self {
            inner: Arc::new(TracerInner {
                thread_name: thread_name.to_string(),
                tid: AtomicI32::new(0),
                enabled: AtomicBool::new(false),
                #[cfg(feature = "trace")]
                queue: ArrayQueue::new(config.capacity.max(1)),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Name of the owning thread.
    pub fn thread_name(&self) -> &str {
        &self.inner.thread_name
    }

    /// Kernel tid of the owning thread, once it has started.
    pub fn tid(&self) -> Option<i32> {
        match self.inner.tid.load(Ordering::Acquire) {
            0 => None,
            tid => Some(tid),
        }
    }

    /// Record the calling thread as the owner.
    pub(crate) fn bind_current_thread(&self) {
        self.inner
            .tid
            .store(crate::rt::current_tid(), Ordering::Release);
    }

    /// Turn recording on or off. Called by the trace session.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    /// `true` while events are being recorded.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        cfg!(feature = "trace") && self.inner.enabled.load(Ordering::Relaxed)
    }

    /// Events dropped because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Start a span that is recorded when the returned guard drops.
    ///
    /// ```rust
    /// # use rtloop::tracer::Tracer;
    /// # use rtloop_common::sched::TracerConfig;
    /// let tracer = Tracer::new("worker", &TracerConfig::default());
    /// {
    ///     let _span = tracer.with_span("ReadSensors");
    ///     // ... work ...
    /// }
    /// ```
    #[inline]
    pub fn with_span(&self, name: &'static str) -> SpanGuard<'_> {
        SpanGuard::start(self, name)
    }

    /// Record a completed span.
    #[inline]
    pub fn record_span(&self, name: &'static str, start_ns: i64, end_ns: i64) {
        if self.is_enabled() {
            self.push(TraceEvent::Span {
                name,
                start_ns,
                end_ns,
            });
        }
    }

    /// Record a metric sample.
    #[inline]
    pub fn record_metric(&self, name: &'static str, value: i64, timestamp_ns: i64) {
        if self.is_enabled() {
            self.push(TraceEvent::Metric {
                name,
                value,
                timestamp_ns,
            });
        }
    }

    #[cfg(feature = "trace")]
    #[inline]
    fn push(&self, event: TraceEvent) {
        if self.inner.queue.push(event).is_err() {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[cfg(not(feature = "trace"))]
    #[inline(always)]
    fn push(&self, _event: TraceEvent) {}

    /// Move up to `max` buffered events into `out`. Returns the number moved.
    ///
    /// Must only be called from one consumer (the trace session).
    pub fn drain_into(&self, out: &mut Vec<TraceEvent>, max: usize) -> usize {
        #[cfg(feature = "trace")]
        {
            let mut moved = 0;
            while moved < max {
                match self.inner.queue.pop() {
                    Some(event) => {
                        out.push(event);
                        moved += 1;
                    }
                    None => break,
                }
            }
            moved
        }
        #[cfg(not(feature = "trace"))]
        {
            let _ = (out, max);
            0
        }
    }

    /// `true` if both handles refer to the same buffer.
    pub fn same_as(&self, other: &Tracer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Scoped span: records `{name, start, end}` when dropped, on every exit path.
#[must_use = "the span ends when the guard is dropped"]
pub struct SpanGuard<'a> {
    tracer: &'a Tracer,
    name: &'static str,
    start_ns: Option<i64>,
}

impl<'a> SpanGuard<'a> {
    #[inline]
    fn start(tracer: &'a Tracer, name: &'static str) -> Self {
        let start_ns = tracer.is_enabled().then(now_ns);
        Self {
            tracer,
            name,
            start_ns,
        }
    }
}

impl Drop for SpanGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        if let Some(start_ns) = self.start_ns {
            self.tracer.record_span(self.name, start_ns, now_ns());
        }
    }
}
