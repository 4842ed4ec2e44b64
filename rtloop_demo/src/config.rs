//! Demo configuration file.
//!
//! ```toml
//! [shared]
//! app_name = "rtloop-demo"
//!
//! [process]
//! lock_all_memory = false
//!
//! [trace]
//! path = "demo.jsonl"
//! flush_period_ms = 100
//!
//! [[threads]]
//! name = "fast"
//! period_ns = 1000000
//! policy = "realtime_fixed_priority"
//! priority = 80
//! cpu_affinity = [2]
//! work_us = 100
//! ```

use rtloop_common::config::{ConfigError, ProcessRtConfig, SharedConfig, TraceSessionParams};
use rtloop_common::sched::CyclicConfig;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;

/// Whole demo file.
#[derive(Debug, Clone, Deserialize)]
pub struct DemoConfig {
    /// App name and log level.
    pub shared: SharedConfig,
    /// Process-wide RT preconditions.
    #[serde(default)]
    pub process: ProcessRtConfig,
    /// Trace destination; no session when absent.
    #[serde(default)]
    pub trace: Option<TraceConfig>,
    /// Cyclic threads, started in this order.
    pub threads: Vec<ThreadSpec>,
}

/// `[trace]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct TraceConfig {
    /// JSON Lines output file, truncated on start.
    pub path: PathBuf,
    /// Buffering parameters.
    #[serde(flatten)]
    pub params: TraceSessionParams,
}

/// One `[[threads]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadSpec {
    /// Thread name.
    pub name: String,
    /// Period, scheduling and tracer settings.
    #[serde(flatten)]
    pub cyclic: CyclicConfig,
    /// Busy-wait time per iteration [µs].
    #[serde(default)]
    pub work_us: u64,
    /// Stop after this many iterations (runs until stopped when absent).
    #[serde(default)]
    pub max_iterations: Option<u64>,
}

impl DemoConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `shared` is invalid
    /// - no thread is configured, or two threads share a name
    /// - a thread's cyclic configuration is invalid
    /// - a thread's work does not fit in its period
    /// - the trace parameters are invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.threads.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one [[threads]] entry is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for spec in &self.threads {
            if !names.insert(spec.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate thread name '{}'",
                    spec.name
                )));
            }
            spec.cyclic.validate().map_err(|e| {
                ConfigError::ValidationError(format!("thread '{}': {e}", spec.name))
            })?;
            let work_ns = spec.work_us.saturating_mul(1_000);
            if work_ns >= spec.cyclic.period_ns as u64 {
                return Err(ConfigError::ValidationError(format!(
                    "thread '{}': work_us {} does not fit in period_ns {}",
                    spec.name, spec.work_us, spec.cyclic.period_ns
                )));
            }
        }

        if let Some(trace) = &self.trace {
            trace.params.validate()?;
        }
        Ok(())
    }
}
