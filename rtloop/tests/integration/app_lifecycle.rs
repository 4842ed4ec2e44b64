//! App and thread lifecycle on real OS threads.
//!
//! Stop latency bound, idempotent stop/join, and rollback of a start that
//! fails part-way through. Threads use best-effort scheduling; a refused
//! CPU affinity provides the real scheduling failure.

use nix::sched::CpuSet;
use rtloop::app::{App, AppState};
use rtloop::cyclic::{CycleContext, CyclicTask, CyclicThread};
use rtloop::thread::{Thread, ThreadState};
use rtloop_common::error::RtError;
use rtloop_common::sched::CyclicConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Busy-waits `work` per iteration and never stops on its own.
struct Busy {
    work: Duration,
    iterations: Arc<AtomicU64>,
}

impl CyclicTask for Busy {
    fn run_loop(&mut self, _ctx: &CycleContext<'_>, _elapsed_ns: i64) -> bool {
        let until = Instant::now() + self.work;
        while Instant::now() < until {
            std::hint::spin_loop();
        }
        self.iterations.fetch_add(1, Ordering::Relaxed);
        false
    }
}

fn busy_thread(name: &str, period: Duration, work: Duration) -> (Thread, Arc<AtomicU64>) {
    let iterations = Arc::new(AtomicU64::new(0));
    let task = Busy {
        work,
        iterations: Arc::clone(&iterations),
    };
    let thread = CyclicThread::new(name, CyclicConfig::new(period.as_nanos() as i64), task)
        .unwrap()
        .into_thread()
        .unwrap();
    (thread, iterations)
}

#[test]
fn join_returns_within_one_period_after_stop() {
    // Scheduling noise on shared CI machines.
    let slack = Duration::from_millis(50);

    for period_ms in [1u64, 20, 100] {
        let period = Duration::from_millis(period_ms);
        let work = Duration::from_micros(200);
        let (mut thread, iterations) = busy_thread("bounded", period, work);
        thread.start().unwrap();
        while iterations.load(Ordering::Relaxed) < 2 {
            std::thread::sleep(Duration::from_millis(1));
        }

        let requested = Instant::now();
        thread.request_stop();
        thread.join().unwrap();
        let stop_latency = requested.elapsed();

        assert!(
            stop_latency <= period + work + slack,
            "period {period:?}: stop took {stop_latency:?}"
        );
        assert_eq!(thread.state(), ThreadState::Stopped);
    }
}

#[test]
fn repeated_stop_and_join_have_no_effect() {
    let mut app = App::new("idempotent");
    let (thread, iterations) = busy_thread("a", Duration::from_millis(2), Duration::ZERO);
    app.register_thread(thread).unwrap();
    app.start().unwrap();
    std::thread::sleep(Duration::from_millis(10));

    app.request_stop();
    app.request_stop();
    app.join().unwrap();
    let after_join = iterations.load(Ordering::Relaxed);

    app.request_stop();
    app.join().unwrap();
    app.join().unwrap();
    assert_eq!(app.state(), AppState::Joined);
    assert_eq!(iterations.load(Ordering::Relaxed), after_join);
}

#[test]
fn third_of_five_failing_rolls_back_the_first_two() {
    let mut app = App::new("rollback");
    let mut counters = Vec::new();
    for i in 0..5 {
        let name = format!("worker-{i}");
        let thread = if i == 2 {
            let config = CyclicConfig::new(1_000_000)
                .with_cpu_affinity(&[CpuSet::count() - 1])
                .unwrap();
            let task = Busy {
                work: Duration::ZERO,
                iterations: Arc::new(AtomicU64::new(0)),
            };
            CyclicThread::new(name, config, task)
                .unwrap()
                .into_thread()
                .unwrap()
        } else {
            let (thread, iterations) =
                busy_thread(&name, Duration::from_millis(1), Duration::ZERO);
            counters.push(iterations);
            thread
        };
        app.register_thread(thread).unwrap();
    }

    let err = app.start().unwrap_err();
    assert!(matches!(err, RtError::Scheduling { .. }), "{err}");
    assert!(format!("{err}").contains("worker-2"));
    assert_eq!(app.state(), AppState::Joined);

    let states: Vec<ThreadState> = app.threads().iter().map(Thread::state).collect();
    assert_eq!(
        states,
        vec![
            ThreadState::Stopped,
            ThreadState::Stopped,
            ThreadState::Stopped,
            ThreadState::NotStarted,
            ThreadState::NotStarted,
        ]
    );

    // Nothing keeps running after the failed start.
    let snapshot: Vec<u64> = counters.iter().map(|c| c.load(Ordering::Relaxed)).collect();
    std::thread::sleep(Duration::from_millis(20));
    let later: Vec<u64> = counters.iter().map(|c| c.load(Ordering::Relaxed)).collect();
    assert_eq!(snapshot, later);

    // A failed app cannot be restarted.
    assert!(app.start().unwrap_err().is_lifecycle());
    app.join().unwrap();
}

#[test]
fn stop_handle_from_signal_style_thread() {
    let mut app = App::new("ctrlc");
    let (thread, iterations) = busy_thread("a", Duration::from_millis(1), Duration::ZERO);
    app.register_thread(thread).unwrap();

    let handle = app.stop_handle();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        handle.request_stop();
    });

    let started = Instant::now();
    app.run_for(Duration::from_secs(30)).unwrap();
    stopper.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(iterations.load(Ordering::Relaxed) > 0);
    assert_eq!(app.state(), AppState::Joined);
}
