//! rtloop Common Library
//!
//! Shared building blocks for the rtloop workspace: the monotonic clock,
//! per-thread scheduling configuration, process and trace-session
//! configuration, and the runtime error taxonomy.
//!
//! # Module Structure
//!
//! - [`clock`] - Monotonic timestamps and absolute-time sleeps
//! - [`sched`] - Scheduling policy, CPU affinity and cyclic thread configuration
//! - [`config`] - TOML loading, process RT preconditions, trace session parameters
//! - [`error`] - `RtError` taxonomy shared by all runtime operations
//! - [`consts`] - Numeric limits and defaults
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use rtloop_common::prelude::*;
//!
//! let config = CyclicConfig::fifo(1_000_000, 80).with_cpu_affinity(&[2])?;
//! assert_eq!(config.period_ns, 1_000_000);
//! # Ok::<(), RtError>(())
//! ```

pub mod clock;
pub mod config;
pub mod consts;
pub mod error;
pub mod prelude;
pub mod sched;
