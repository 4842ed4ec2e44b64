//! Error types for the rtloop runtime.

use thiserror::Error;

/// Errors raised by thread, app and trace session operations.
///
/// Configuration errors surface at construction, scheduling errors at
/// start, lifecycle errors whenever an operation is called in the wrong
/// state. Nothing in this enum is ever produced from inside a running
/// cyclic loop.
#[derive(Error, Debug)]
pub enum RtError {
    /// The OS refused a scheduling policy, priority, affinity or memory-lock request.
    #[error("scheduling error on '{target}': {reason}")]
    Scheduling {
        /// Thread name, or `"process"` for process-wide preconditions.
        target: String,
        /// What was refused and why.
        reason: String,
    },

    /// Operation invoked in the wrong lifecycle state.
    #[error("lifecycle error: cannot {operation} '{target}' while {state}")]
    Lifecycle {
        /// The attempted operation (`start`, `join`, `register`, ...).
        operation: &'static str,
        /// Thread, app or session name.
        target: String,
        /// Current state as a human readable string.
        state: &'static str,
    },

    /// A thread body panicked; reported by `join`.
    #[error("thread '{thread}' panicked")]
    ThreadPanicked {
        /// Thread name.
        thread: String,
    },

    /// Invalid period, priority, affinity or tracer parameters.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Trace destination could not be opened or written.
    #[error("IO error on {context}: {source}")]
    Io {
        /// What was being done (`open trace file /tmp/x.trace`, ...).
        context: String,
        /// Source IO error
        #[source]
        source: std::io::Error,
    },
}

impl RtError {
    /// Build a scheduling error from a failed system call.
    pub fn scheduling(target: &str, reason: impl Into<String>) -> Self {
        Self::Scheduling {
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    /// Build a lifecycle error.
    pub fn lifecycle(operation: &'static str, target: &str, state: &'static str) -> Self {
        Self::Lifecycle {
            operation,
            target: target.to_string(),
            state,
        }
    }

    /// Build an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// `true` for [`RtError::Scheduling`].
    pub fn is_scheduling(&self) -> bool {
        matches!(self, Self::Scheduling { .. })
    }

    /// `true` for [`RtError::Lifecycle`].
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Lifecycle { .. })
    }
}

/// Result type for runtime operations
pub type RtResult<T> = Result<T, RtError>;
