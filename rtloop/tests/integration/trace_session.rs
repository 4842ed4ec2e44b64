//! Trace session end to end: two cyclic threads, one trace file.

use rtloop::app::App;
use rtloop::cyclic::{CycleContext, CyclicTask, CyclicThread};
use rtloop::session::{TraceRecord, read_trace};
use rtloop::tracer::{METRIC_LOOP_LATENCY, METRIC_WAKEUP_LATENCY, SPAN_SLEEP};
use rtloop_common::config::TraceSessionParams;
use rtloop_common::error::RtError;
use rtloop_common::sched::{CyclicConfig, TracerConfig};
use std::collections::HashMap;
use std::time::Duration;
use tempfile::TempDir;

struct Spanned;

impl CyclicTask for Spanned {
    fn run_loop(&mut self, ctx: &CycleContext<'_>, _elapsed_ns: i64) -> bool {
        let _span = ctx.span("Work");
        std::hint::black_box(ctx.iteration());
        false
    }
}

fn params() -> TraceSessionParams {
    TraceSessionParams {
        buffer_size_kb: 256,
        flush_period_ms: 20,
        file_write_period_ms: 50,
    }
}

/// `(timestamp, value)` of every `name` metric, grouped by tid.
fn metric_streams(records: &[TraceRecord], wanted: &str) -> HashMap<i32, Vec<(i64, i64)>> {
    let mut streams: HashMap<i32, Vec<(i64, i64)>> = HashMap::new();
    for record in records {
        if let TraceRecord::Metric {
            tid,
            name,
            value,
            timestamp_ns,
        } = record
        {
            if name == wanted {
                streams.entry(*tid).or_default().push((*timestamp_ns, *value));
            }
        }
    }
    streams
}

#[cfg(feature = "trace")]
#[test]
fn two_periods_produce_independent_wakeup_streams() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("two.jsonl");

    let mut app = App::new("two-periods");
    let fast = CyclicThread::new("fast", CyclicConfig::new(1_000_000), Spanned).unwrap();
    let slow = CyclicThread::new("slow", CyclicConfig::new(5_000_000), Spanned).unwrap();
    let fast_stats = fast.stats();
    let slow_stats = slow.stats();
    app.register_thread(fast.into_thread().unwrap()).unwrap();
    app.start_trace_session_with(&path, params()).unwrap();
    // Registered after the session started: still traced.
    app.register_thread(slow.into_thread().unwrap()).unwrap();

    app.run_for(Duration::from_millis(300)).unwrap();
    let fast_tid = app.thread("fast").unwrap().tid().unwrap();
    let slow_tid = app.thread("slow").unwrap().tid().unwrap();

    let records = read_trace(&path).unwrap();
    assert!(matches!(
        &records[0],
        TraceRecord::Process { name, .. } if name == "two-periods"
    ));
    assert!(records.contains(&TraceRecord::Thread {
        tid: fast_tid,
        name: "fast".to_string()
    }));
    assert!(records.contains(&TraceRecord::Thread {
        tid: slow_tid,
        name: "slow".to_string()
    }));
    assert!(!records.iter().any(|r| matches!(r, TraceRecord::Dropped { .. })));

    let wakeups = metric_streams(&records, METRIC_WAKEUP_LATENCY);
    assert_eq!(wakeups.len(), 2);
    for (tid, period_ns, stats) in [
        (fast_tid, 1_000_000, &fast_stats),
        (slow_tid, 5_000_000, &slow_stats),
    ] {
        let stream = &wakeups[&tid];
        assert_eq!(stream.len() as u64, stats.snapshot().iterations);
        // timestamp - latency is the nominal wakeup: exactly one period apart.
        let nominal: Vec<i64> = stream.iter().map(|(ts, lat)| ts - lat).collect();
        for pair in nominal.windows(2) {
            assert_eq!(pair[1] - pair[0], period_ns, "tid {tid}");
        }
        assert!(stream.windows(2).all(|w| w[0].0 < w[1].0));
        assert!(stream.iter().all(|&(_, lat)| lat >= 0));
    }
    assert!(wakeups[&fast_tid].len() > 3 * wakeups[&slow_tid].len());

    let loops = metric_streams(&records, METRIC_LOOP_LATENCY);
    assert_eq!(loops[&fast_tid].len(), wakeups[&fast_tid].len());

    let work_spans = records
        .iter()
        .filter(|r| matches!(r, TraceRecord::Span { tid, name, .. } if *tid == slow_tid && name == "Work"))
        .count();
    assert_eq!(work_spans, wakeups[&slow_tid].len());
}

#[cfg(feature = "trace")]
#[test]
fn sleep_spans_when_enabled() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("sleep.jsonl");

    let config = CyclicConfig::new(2_000_000).with_tracer(TracerConfig {
        trace_sleep: true,
        ..TracerConfig::default()
    });
    let mut app = App::new("sleepy");
    app.register_thread(
        CyclicThread::new("sleeper", config, Spanned)
            .unwrap()
            .into_thread()
            .unwrap(),
    )
    .unwrap();
    app.start_trace_session_with(&path, params()).unwrap();
    app.run_for(Duration::from_millis(50)).unwrap();

    let records = read_trace(&path).unwrap();
    let sleeps: Vec<(i64, i64)> = records
        .iter()
        .filter_map(|r| match r {
            TraceRecord::Span {
                name,
                start_ns,
                end_ns,
                ..
            } if name == SPAN_SLEEP => Some((*start_ns, *end_ns)),
            _ => None,
        })
        .collect();
    assert!(sleeps.len() >= 5, "{} sleep spans", sleeps.len());
    assert!(sleeps.iter().all(|(start, end)| end >= start));
}

#[test]
fn unopenable_destination_is_reported_at_start() {
    let tmp = TempDir::new().unwrap();
    let mut app = App::new("no-dir");
    let err = app
        .start_trace_session(tmp.path().join("missing").join("t.jsonl"))
        .unwrap_err();
    assert!(matches!(err, RtError::Io { .. }), "{err}");
    assert!(app.session().is_none());

    // A second attempt to a valid path is allowed; a third is not.
    app.start_trace_session(tmp.path().join("t.jsonl")).unwrap();
    assert!(
        app.start_trace_session(tmp.path().join("again.jsonl"))
            .unwrap_err()
            .is_lifecycle()
    );
}

#[test]
fn existing_file_is_truncated() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("old.jsonl");
    std::fs::write(&path, "not json\n".repeat(100)).unwrap();

    let mut app = App::new("truncate");
    app.start_trace_session_with(&path, params()).unwrap();
    app.start().unwrap();
    app.request_stop();
    app.join().unwrap();

    let records = read_trace(&path).unwrap();
    assert_eq!(records.len(), 1);
    assert!(matches!(records[0], TraceRecord::Process { .. }));
}
