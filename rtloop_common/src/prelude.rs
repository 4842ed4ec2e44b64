//! Prelude module for common re-exports.
//!
//! ```rust
//! use rtloop_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    ConfigError, ConfigLoader, ProcessRtConfig, SharedConfig, TraceSessionParams,
};
pub use crate::sched::{CyclicConfig, SchedPolicy, SchedulingConfig, TracerConfig};

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::error::{RtError, RtResult};

// ─── Clock ──────────────────────────────────────────────────────────
pub use crate::clock::{Clock, MonotonicClock, SimulatedClock, now_ns, sleep_until_ns};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{DEFAULT_PERIOD_NS, NS_PER_MS, NS_PER_SEC};
