//! # rtloop demo runner
//!
//! Builds an [`rtloop::app::App`] from a TOML file: one cyclic thread per
//! `[[threads]]` entry, each running a synthetic busy-wait workload, with an
//! optional trace session.
//!
//! ## Module Structure
//!
//! - [`config`] - `DemoConfig` file format and validation
//! - [`workload`] - The synthetic cyclic task
//! - [`runner`] - App assembly and the latency report

pub mod config;
pub mod runner;
pub mod workload;

use thiserror::Error;

/// Errors surfaced by the demo runner.
#[derive(Debug, Error)]
pub enum DemoError {
    /// The config file could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] rtloop_common::config::ConfigError),

    /// The runtime refused to build, start or join the app.
    #[error(transparent)]
    Runtime(#[from] rtloop_common::error::RtError),
}
