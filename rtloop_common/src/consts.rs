//! System-wide constants for the rtloop workspace.
//!
//! Single source of truth for numeric limits and defaults.

use static_assertions::const_assert;

/// Nanoseconds per second.
pub const NS_PER_SEC: i64 = 1_000_000_000;

/// Nanoseconds per millisecond.
pub const NS_PER_MS: i64 = 1_000_000;

/// Lowest `SCHED_FIFO` priority accepted by Linux.
pub const RT_PRIORITY_MIN: i32 = 1;

/// Highest `SCHED_FIFO` priority accepted by Linux.
pub const RT_PRIORITY_MAX: i32 = 99;

/// Maximum number of entries in a thread's CPU affinity list.
pub const MAX_AFFINITY_CPUS: usize = 64;

/// Default cyclic period (1 ms = 1 kHz).
pub const DEFAULT_PERIOD_NS: i64 = 1_000_000;

/// Default number of events a per-thread tracer buffer can hold.
pub const DEFAULT_TRACER_CAPACITY: usize = 16_384;

/// Default trace session buffer size [KiB].
pub const DEFAULT_TRACE_BUFFER_KB: u32 = 8_192;

/// Largest accepted trace session buffer [KiB] (256 MiB).
pub const MAX_TRACE_BUFFER_KB: u32 = 256 * 1024;

/// Default period between tracer drains [ms].
pub const DEFAULT_FLUSH_PERIOD_MS: u32 = 100;

/// Default period between buffered writes to the trace file [ms].
pub const DEFAULT_FILE_WRITE_PERIOD_MS: u32 = 1_000;

/// Default amount of stack prefaulted by a thread that locks memory [KiB].
pub const DEFAULT_STACK_PREFAULT_KB: usize = 256;

const_assert!(RT_PRIORITY_MIN > 0 && RT_PRIORITY_MIN <= RT_PRIORITY_MAX);
const_assert!(DEFAULT_PERIOD_NS > 0);
const_assert!(DEFAULT_TRACER_CAPACITY > 0);
const_assert!(DEFAULT_TRACE_BUFFER_KB <= MAX_TRACE_BUFFER_KB);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(MAX_AFFINITY_CPUS > 0 && MAX_AFFINITY_CPUS <= 1024);
        assert!(DEFAULT_FLUSH_PERIOD_MS > 0);
        assert!(DEFAULT_FILE_WRITE_PERIOD_MS >= DEFAULT_FLUSH_PERIOD_MS);
        assert_eq!(NS_PER_SEC, 1_000 * NS_PER_MS);
    }

    #[test]
    fn default_stack_prefault_fits_default_thread_stack() {
        // std spawns 2 MiB stacks by default.
        assert!(DEFAULT_STACK_PREFAULT_KB * 1024 < 2 * 1024 * 1024);
    }
}
