//! App assembly and latency report.

use crate::DemoError;
use crate::config::DemoConfig;
use crate::workload::BusyWork;
use rtloop::app::App;
use rtloop::cyclic::{CyclicThread, LatencyStats, StatsHandle};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Statistics handles of one demo thread.
#[derive(Debug, Clone)]
pub struct ThreadMonitor {
    /// Thread name.
    pub name: String,
    /// Period [ns].
    pub period_ns: i64,
    stats: StatsHandle,
    late_wakeups: Arc<AtomicU64>,
}

impl ThreadMonitor {
    /// Latest published statistics.
    pub fn stats(&self) -> LatencyStats {
        self.stats.snapshot()
    }

    /// Wakeups later than half a period.
    pub fn late_wakeups(&self) -> u64 {
        self.late_wakeups.load(Ordering::Relaxed)
    }
}

/// Built app plus one monitor per thread.
pub struct Demo {
    /// The app, not yet started.
    pub app: App,
    /// Monitors in registration order.
    pub monitors: Vec<ThreadMonitor>,
}

/// Build the app described by `config`.
///
/// `trace_override` replaces the `[trace] path` (and enables tracing with
/// default parameters when the file has no `[trace]` table).
pub fn build(config: &DemoConfig, trace_override: Option<&Path>) -> Result<Demo, DemoError> {
    config.validate()?;

    let mut app = App::with_process_config(config.shared.app_name.clone(), config.process);
    let mut monitors = Vec::with_capacity(config.threads.len());

    for spec in &config.threads {
        let work = BusyWork::new(spec.work_us, spec.max_iterations, spec.cyclic.period_ns);
        let late_wakeups = work.late_wakeups();
        let cyclic = CyclicThread::new(spec.name.clone(), spec.cyclic.clone(), work)?;
        monitors.push(ThreadMonitor {
            name: spec.name.clone(),
            period_ns: spec.cyclic.period_ns,
            stats: cyclic.stats(),
            late_wakeups,
        });
        app.register_thread(cyclic.into_thread()?)?;
        info!(
            thread = %spec.name,
            period_ns = spec.cyclic.period_ns,
            policy = ?spec.cyclic.sched.policy,
            work_us = spec.work_us,
            "thread configured"
        );
    }

    let params = config
        .trace
        .as_ref()
        .map(|t| t.params)
        .unwrap_or_default();
    let path = trace_override.or(config.trace.as_ref().map(|t| t.path.as_path()));
    if let Some(path) = path {
        app.start_trace_session_with(path, params)?;
    }

    Ok(Demo { app, monitors })
}

/// Fixed-width latency table of all monitors.
pub struct Report<'a>(pub &'a [ThreadMonitor]);

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<16} {:>10} {:>10} {:>12} {:>12} {:>12} {:>12} {:>9} {:>6}",
            "thread",
            "period_us",
            "iters",
            "avg_wake_us",
            "max_wake_us",
            "avg_loop_us",
            "max_loop_us",
            "overruns",
            "late"
        )?;
        for monitor in self.0 {
            let s = monitor.stats();
            writeln!(
                f,
                "{:<16} {:>10} {:>10} {:>12.1} {:>12.1} {:>12.1} {:>12.1} {:>9} {:>6}",
                monitor.name,
                monitor.period_ns / 1_000,
                s.iterations,
                s.avg_wakeup_ns() as f64 / 1e3,
                s.max_wakeup_ns as f64 / 1e3,
                s.avg_loop_ns() as f64 / 1e3,
                s.max_loop_ns as f64 / 1e3,
                s.overruns,
                monitor.late_wakeups()
            )?;
        }
        Ok(())
    }
}
