//! Config loading tests.
//!
//! Loads complete thread / session / process configuration files the way
//! an application does, and checks that invalid values are reported by
//! `validate()` rather than at parse time.

use rtloop_common::prelude::*;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

#[derive(Debug, Deserialize)]
struct AppFile {
    shared: SharedConfig,
    #[serde(default)]
    process: ProcessRtConfig,
    #[serde(default)]
    session: TraceSessionParams,
    threads: Vec<ThreadEntry>,
}

#[derive(Debug, Deserialize)]
struct ThreadEntry {
    name: String,
    #[serde(flatten)]
    cyclic: CyclicConfig,
}

fn write_app_toml(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("app.toml");
    fs::write(&path, body).unwrap();
    path
}

// ─── Tests ──────────────────────────────────────────────────────────

#[test]
fn load_two_thread_app() {
    let tmp = TempDir::new().unwrap();
    let path = write_app_toml(
        tmp.path(),
        r#"
[shared]
app_name = "two-loops"

[process]
lock_all_memory = true

[session]
flush_period_ms = 50

[[threads]]
name = "fast"
period_ns = 1000000
policy = "realtime_fixed_priority"
priority = 80
cpu_affinity = [2]

[[threads]]
name = "slow"
period_ns = 5000000

[threads.tracer]
trace_sleep = true
"#,
    );

    let app = AppFile::load(&path).expect("should load");
    app.shared.validate().unwrap();
    assert!(app.process.lock_all_memory);
    assert_eq!(app.session.flush_period_ms, 50);
    assert_eq!(
        app.session.file_write_period_ms,
        TraceSessionParams::default().file_write_period_ms
    );

    assert_eq!(app.threads.len(), 2);
    let fast = &app.threads[0];
    assert_eq!(fast.name, "fast");
    assert_eq!(fast.cyclic.period_ns, 1_000_000);
    assert!(fast.cyclic.sched.is_realtime());
    assert_eq!(fast.cyclic.sched.cpu_affinity.as_slice(), &[2]);
    fast.cyclic.validate().unwrap();

    let slow = &app.threads[1];
    assert_eq!(slow.cyclic.sched.policy, SchedPolicy::BestEffort);
    assert!(slow.cyclic.tracer.trace_sleep);
    slow.cyclic.validate().unwrap();
}

#[test]
fn invalid_values_parse_but_fail_validation() {
    let tmp = TempDir::new().unwrap();
    let path = write_app_toml(
        tmp.path(),
        r#"
[shared]
app_name = "bad"

[[threads]]
name = "zero-period"
period_ns = 0

[[threads]]
name = "bad-priority"
policy = "realtime_fixed_priority"
priority = 120
"#,
    );

    let app = AppFile::load(&path).expect("should parse");
    for thread in &app.threads {
        let err = thread.cyclic.validate().unwrap_err();
        assert!(
            matches!(err, RtError::Configuration(_)),
            "{}: {err}",
            thread.name
        );
    }
}

#[test]
fn unknown_policy_is_a_parse_error() {
    let tmp = TempDir::new().unwrap();
    let path = write_app_toml(
        tmp.path(),
        r#"
[shared]
app_name = "x"

[[threads]]
name = "rr"
policy = "round_robin"
"#,
    );

    assert!(matches!(
        AppFile::load(&path),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn missing_file_is_reported() {
    let tmp = TempDir::new().unwrap();
    assert!(matches!(
        AppFile::load(&tmp.path().join("missing.toml")),
        Err(ConfigError::FileNotFound)
    ));
}
