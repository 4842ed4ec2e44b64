//! Cyclic schedule properties.
//!
//! Drift-free nominal grid under injected jitter, non-blocking catch-up
//! after overruns, and the 500-iteration completion scenario. Run on the
//! simulated clock so every timestamp is exact.

use proptest::prelude::*;
use rtloop::cyclic::{CycleContext, CyclicTask, CyclicThread};
use rtloop::thread::{StopHandle, ThreadBody};
use rtloop_common::clock::{Clock, SimulatedClock};
use rtloop_common::sched::CyclicConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const PERIOD_NS: i64 = 1_000_000;

/// Advances the simulated clock by a scripted amount per iteration.
struct ScriptedWork {
    clock: SimulatedClock,
    work_ns: Vec<i64>,
    nominal: Vec<i64>,
    wakeup_latency: Vec<i64>,
}

impl ScriptedWork {
    fn new(clock: &SimulatedClock, work_ns: Vec<i64>) -> Self {
        Self {
            clock: clock.clone(),
            work_ns,
            nominal: Vec::new(),
            wakeup_latency: Vec::new(),
        }
    }
}

impl CyclicTask for ScriptedWork {
    fn run_loop(&mut self, ctx: &CycleContext<'_>, _elapsed_ns: i64) -> bool {
        let k = ctx.iteration() as usize;
        self.nominal.push(ctx.nominal_wakeup_ns());
        self.clock.advance(self.work_ns[k]);
        k + 1 == self.work_ns.len()
    }

    fn track_latency(&mut self, wakeup_latency_ns: i64, _loop_latency_ns: i64) {
        self.wakeup_latency.push(wakeup_latency_ns);
    }
}

fn run_script(
    start_ns: i64,
    period_ns: i64,
    jitter_ns: i64,
    work_ns: Vec<i64>,
) -> (SimulatedClock, CyclicThread<ScriptedWork, SimulatedClock>) {
    let clock = SimulatedClock::new(start_ns);
    clock.set_wake_jitter(jitter_ns);
    let task = ScriptedWork::new(&clock, work_ns);
    let mut cyclic = CyclicThread::new("scripted", CyclicConfig::new(period_ns), task)
        .unwrap()
        .with_clock(clock.clone());
    cyclic.run(&StopHandle::detached("scripted"));
    (clock, cyclic)
}

/// Expected wakeup latencies for the simulated clock model:
/// wake = max(now, nominal) + jitter.
fn expected_latencies(start_ns: i64, period_ns: i64, jitter_ns: i64, work_ns: &[i64]) -> Vec<i64> {
    let mut now = start_ns;
    let mut out = Vec::with_capacity(work_ns.len());
    for (k, work) in work_ns.iter().enumerate() {
        let nominal = start_ns + k as i64 * period_ns;
        let wake = now.max(nominal) + jitter_ns;
        out.push(wake - nominal);
        now = wake + work;
    }
    out
}

#[test]
fn jitter_only_moves_wakeup_latency() {
    let work = vec![10_000, 900_000, 50_000, 999_999, 0, 300_000];
    let (_, cyclic) = run_script(5_000, PERIOD_NS, 7_000, work.clone());
    let task = cyclic.task();

    let grid: Vec<i64> = (0..work.len() as i64).map(|k| 5_000 + k * PERIOD_NS).collect();
    assert_eq!(task.nominal, grid);
    assert_eq!(
        task.wakeup_latency,
        expected_latencies(5_000, PERIOD_NS, 7_000, &work)
    );
}

#[test]
fn overrun_returns_immediately_and_advances_one_period() {
    // Iteration 1 takes 3.2 periods and ends 2.2 periods past its successor's wakeup.
    let work = vec![100_000, 3_200_000, 100_000, 100_000, 100_000, 100_000, 100_000];
    let (clock, cyclic) = run_script(0, PERIOD_NS, 0, work);
    let task = cyclic.task();

    // Nominal wakeups never skip or slip.
    for pair in task.nominal.windows(2) {
        assert_eq!(pair[1] - pair[0], PERIOD_NS);
    }
    // Iterations 2..=4 are behind schedule and wake without sleeping.
    assert_eq!(task.wakeup_latency[2], 4_200_000 - 2 * PERIOD_NS);
    assert_eq!(task.wakeup_latency[3], 4_300_000 - 3 * PERIOD_NS);
    assert_eq!(task.wakeup_latency[4], 4_400_000 - 4 * PERIOD_NS);
    // Back on the grid by iteration 5.
    assert_eq!(task.wakeup_latency[5], 0);
    assert_eq!(task.wakeup_latency[6], 0);
    // Only iterations 1, 5 and 6 actually slept.
    assert_eq!(clock.blocking_sleeps(), 3);

    let stats = cyclic.stats().snapshot();
    // Iterations 1, 2 and 3 end after the next nominal wakeup.
    assert_eq!(stats.overruns, 3);
    assert_eq!(stats.iterations, 7);
}

/// Counts invocations and stops itself after `limit`.
struct Counter {
    calls: Arc<AtomicU64>,
    limit: u64,
}

impl CyclicTask for Counter {
    fn run_loop(&mut self, _ctx: &CycleContext<'_>, _elapsed_ns: i64) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit
    }
}

#[test]
fn five_hundred_iterations_span_five_hundred_periods() {
    let clock = SimulatedClock::new(1_000_000_000);
    clock.set_wake_jitter(2_500);
    let calls = Arc::new(AtomicU64::new(0));
    let cyclic = CyclicThread::new(
        "p6",
        CyclicConfig::new(PERIOD_NS),
        Counter {
            calls: Arc::clone(&calls),
            limit: 500,
        },
    )
    .unwrap()
    .with_clock(clock.clone());
    let stats = cyclic.stats();

    // Through a real OS thread; the simulated clock never blocks.
    let mut thread = cyclic.into_thread().unwrap();
    thread.start().unwrap();
    thread.join().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 500);
    let stats = stats.snapshot();
    assert_eq!(stats.iterations, 500);
    let nominal_span = stats.last_nominal_wakeup_ns + PERIOD_NS - stats.start_ns;
    assert_eq!(nominal_span, 500 * PERIOD_NS);
    // Measured span differs from the nominal one by the final wakeup latency.
    let measured_span = clock.now_ns() - stats.start_ns + PERIOD_NS;
    assert_eq!(measured_span - nominal_span, 2_500);
}

#[test]
fn five_hundred_iterations_on_the_monotonic_clock() {
    let calls = Arc::new(AtomicU64::new(0));
    let cyclic = CyclicThread::new(
        "p6-real",
        CyclicConfig::new(PERIOD_NS),
        Counter {
            calls: Arc::clone(&calls),
            limit: 500,
        },
    )
    .unwrap();
    let stats = cyclic.stats();
    let mut thread = cyclic.into_thread().unwrap();

    let started = std::time::Instant::now();
    thread.start().unwrap();
    thread.join().unwrap();
    let wall = started.elapsed();

    assert_eq!(calls.load(Ordering::SeqCst), 500);
    let stats = stats.snapshot();
    assert_eq!(
        stats.last_nominal_wakeup_ns - stats.start_ns,
        499 * PERIOD_NS
    );
    // The schedule cannot finish early: the last wakeup is at 499 ms.
    assert!(wall >= std::time::Duration::from_millis(499), "{wall:?}");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn nominal_grid_holds_for_any_jitter(
        period_ns in 1_000i64..5_000_000,
        jitter_ns in 0i64..200_000,
        work_fraction in prop::collection::vec(0u32..300, 1..80),
    ) {
        // Work between 0 and 3 periods per iteration.
        let work: Vec<i64> = work_fraction
            .iter()
            .map(|&f| period_ns * i64::from(f) / 100)
            .collect();
        let (_, cyclic) = run_script(0, period_ns, jitter_ns, work.clone());
        let task = cyclic.task();

        prop_assert_eq!(task.nominal.len(), work.len());
        for (k, &nominal) in task.nominal.iter().enumerate() {
            prop_assert_eq!(nominal, k as i64 * period_ns);
        }
        prop_assert_eq!(
            &task.wakeup_latency,
            &expected_latencies(0, period_ns, jitter_ns, &work)
        );
        prop_assert!(task.wakeup_latency.iter().all(|&l| l >= jitter_ns));
    }
}
