//! Synthetic cyclic workload.

use rtloop::cyclic::{CycleContext, CyclicTask};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Span recorded around the busy-wait of every iteration.
pub const SPAN_COMPUTE: &str = "Compute";

/// Busy-waits a fixed time per period and counts late wakeups.
pub struct BusyWork {
    work: Duration,
    max_iterations: Option<u64>,
    late_threshold_ns: i64,
    late_wakeups: Arc<AtomicU64>,
    checksum: u64,
}

impl BusyWork {
    /// `work_us` of spinning per iteration. A wakeup later than half a
    /// period counts as late.
    pub fn new(work_us: u64, max_iterations: Option<u64>, period_ns: i64) -> Self {
        Self {
            work: Duration::from_micros(work_us),
            max_iterations,
            late_threshold_ns: period_ns / 2,
            late_wakeups: Arc::new(AtomicU64::new(0)),
            checksum: 0,
        }
    }

    /// Shared counter of late wakeups.
    pub fn late_wakeups(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.late_wakeups)
    }
}

impl CyclicTask for BusyWork {
    fn run_loop(&mut self, ctx: &CycleContext<'_>, elapsed_ns: i64) -> bool {
        {
            let _span = ctx.span(SPAN_COMPUTE);
            let until = Instant::now() + self.work;
            while Instant::now() < until {
                self.checksum = self
                    .checksum
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(elapsed_ns as u64);
            }
        }
        std::hint::black_box(self.checksum);

        match self.max_iterations {
            Some(max) => ctx.iteration() + 1 >= max,
            None => false,
        }
    }

    fn track_latency(&mut self, wakeup_latency_ns: i64, _loop_latency_ns: i64) {
        if wakeup_latency_ns > self.late_threshold_ns {
            self.late_wakeups.fetch_add(1, Ordering::Relaxed);
        }
    }
}
