//! Configuration loading and process-level configuration types.
//!
//! This module provides a standardized way to load TOML configuration
//! files, plus the two configuration blocks that are owned by the app
//! rather than by a single thread:
//!
//! - [`ProcessRtConfig`] — process-wide real-time preconditions applied once
//!   before any thread starts.
//! - [`TraceSessionParams`] — buffering of the trace session.
//!
//! # Usage
//!
//! ```rust,no_run
//! use rtloop_common::config::{ConfigLoader, SharedConfig, ConfigError};
//! use serde::Deserialize;
//! use std::path::Path;
//!
//! #[derive(Debug, Deserialize)]
//! struct MyAppConfig {
//!     shared: SharedConfig,
//!     duration_s: u64,
//! }
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = MyAppConfig::load(Path::new("config.toml"))?;
//!     println!("App: {}", config.shared.app_name);
//!     Ok(())
//! }
//! ```

use crate::consts::{
    DEFAULT_FILE_WRITE_PERIOD_MS, DEFAULT_FLUSH_PERIOD_MS, DEFAULT_TRACE_BUFFER_KB,
    MAX_TRACE_BUFFER_KB,
};
use crate::error::{RtError, RtResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Error type for configuration file loading.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<RtError> for ConfigError {
    fn from(e: RtError) -> Self {
        Self::ValidationError(e.to_string())
    }
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string accepted by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields of an rtloop application.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// app_name = "motion-loop"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application name, written into the trace process descriptor.
    pub app_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `app_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "app_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Process-wide real-time preconditions.
///
/// Applied exactly once by the app, before any registered thread starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessRtConfig {
    /// `mlockall(MCL_CURRENT | MCL_FUTURE)`: no page faults on any thread.
    pub lock_all_memory: bool,
    /// Stop glibc from returning heap memory to the OS and from serving
    /// large allocations through fresh `mmap` calls.
    pub disable_heap_trim: bool,
}

impl Default for ProcessRtConfig {
    fn default() -> Self {
        Self {
            lock_all_memory: false,
            disable_heap_trim: true,
        }
    }
}

impl ProcessRtConfig {
    /// Production preset: lock all memory and pin the heap.
    pub fn realtime() -> Self {
        Self {
            lock_all_memory: true,
            disable_heap_trim: true,
        }
    }

    /// Nothing applied. Useful for unprivileged test runs.
    pub fn none() -> Self {
        Self {
            lock_all_memory: false,
            disable_heap_trim: false,
        }
    }
}

/// Buffering parameters of a trace session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TraceSessionParams {
    /// In-memory encode buffer in front of the trace file [KiB].
    pub buffer_size_kb: u32,
    /// Period between drains of the per-thread tracers [ms].
    pub flush_period_ms: u32,
    /// Period between writes of the encode buffer to the file [ms].
    pub file_write_period_ms: u32,
}

impl Default for TraceSessionParams {
    fn default() -> Self {
        Self {
            buffer_size_kb: DEFAULT_TRACE_BUFFER_KB,
            flush_period_ms: DEFAULT_FLUSH_PERIOD_MS,
            file_write_period_ms: DEFAULT_FILE_WRITE_PERIOD_MS,
        }
    }
}

impl TraceSessionParams {
    /// Validate the parameters.
    ///
    /// # Errors
    ///
    /// Returns `RtError::Configuration` if any field is zero or the buffer
    /// is larger than [`MAX_TRACE_BUFFER_KB`].
    pub fn validate(&self) -> RtResult<()> {
        if self.buffer_size_kb == 0 {
            return Err(RtError::Configuration(
                "buffer_size_kb must be greater than zero".to_string(),
            ));
        }
        if self.buffer_size_kb > MAX_TRACE_BUFFER_KB {
            return Err(RtError::Configuration(format!(
                "buffer_size_kb {} exceeds {MAX_TRACE_BUFFER_KB}",
                self.buffer_size_kb
            )));
        }
        if self.flush_period_ms == 0 || self.file_write_period_ms == 0 {
            return Err(RtError::Configuration(
                "flush_period_ms and file_write_period_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// Default implementation for any type implementing
/// `serde::de::DeserializeOwned`.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
