//! Per-thread scheduling configuration.
//!
//! [`SchedulingConfig`] is the complete OS-level tuning surface of a
//! thread: policy, priority, CPU placement and memory locking.
//! [`CyclicConfig`] adds the period and the tracer settings of a cyclic
//! thread. Both are plain data; they are validated once, when the thread
//! is constructed, and never change afterwards.
//!
//! # TOML Example
//!
//! ```toml
//! period_ns = 1000000
//! policy = "realtime_fixed_priority"
//! priority = 80
//! cpu_affinity = [2]
//! lock_memory = true
//!
//! [tracer]
//! trace_sleep = false
//! capacity = 16384
//! ```

use crate::consts::{
    DEFAULT_PERIOD_NS, DEFAULT_STACK_PREFAULT_KB, DEFAULT_TRACER_CAPACITY, MAX_AFFINITY_CPUS,
    RT_PRIORITY_MAX, RT_PRIORITY_MIN,
};
use crate::error::{RtError, RtResult};
use nix::sched::CpuSet;
use serde::{Deserialize, Serialize};

/// Default stack size of threads spawned through `std::thread` [KiB].
const STD_DEFAULT_STACK_KB: usize = 2 * 1024;

/// Stack headroom that must remain untouched after prefaulting [KiB].
const STACK_PREFAULT_HEADROOM_KB: usize = 64;

/// OS scheduling class of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedPolicy {
    /// `SCHED_OTHER`: default time-sharing scheduler, priority ignored.
    #[default]
    BestEffort,
    /// `SCHED_FIFO`: fixed-priority real-time, preempts all best-effort work.
    RealtimeFixedPriority,
}

/// OS scheduling configuration applied by a thread before its body runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Scheduling class.
    pub policy: SchedPolicy,
    /// `SCHED_FIFO` priority (1–99). Ignored for best-effort threads.
    pub priority: i32,
    /// CPUs the thread may run on. Empty = no restriction.
    pub cpu_affinity: heapless::Vec<usize, MAX_AFFINITY_CPUS>,
    /// Prefault the stack and lock all pages before running.
    pub lock_memory: bool,
    /// Stack touched before locking memory [KiB].
    pub stack_prefault_kb: usize,
    /// Thread stack size [KiB]. `None` = std default (2 MiB).
    pub stack_size_kb: Option<usize>,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            policy: SchedPolicy::BestEffort,
            priority: 0,
            cpu_affinity: heapless::Vec::new(),
            lock_memory: false,
            stack_prefault_kb: DEFAULT_STACK_PREFAULT_KB,
            stack_size_kb: None,
        }
    }
}

impl SchedulingConfig {
    /// Best-effort (`SCHED_OTHER`) thread with no pinning and no memory locking.
    pub fn best_effort() -> Self {
        Self::default()
    }

    /// `SCHED_FIFO` thread at `priority`.
    pub fn fifo(priority: i32) -> Self {
        Self {
            policy: SchedPolicy::RealtimeFixedPriority,
            priority,
            ..Self::default()
        }
    }

    /// Pin to the given CPUs.
    ///
    /// # Errors
    ///
    /// Returns `RtError::Configuration` if more than [`MAX_AFFINITY_CPUS`]
    /// CPUs are given.
    pub fn with_cpu_affinity(mut self, cpus: &[usize]) -> RtResult<Self> {
        self.cpu_affinity = heapless::Vec::from_slice(cpus).map_err(|_| {
            RtError::Configuration(format!(
                "{} CPUs listed, an affinity set holds at most {MAX_AFFINITY_CPUS}",
                cpus.len()
            ))
        })?;
        Ok(self)
    }

    /// Enable or disable memory locking.
    pub fn with_lock_memory(mut self, enabled: bool) -> Self {
        self.lock_memory = enabled;
        self
    }

    /// Set the thread stack size [KiB].
    pub fn with_stack_size_kb(mut self, kb: usize) -> Self {
        self.stack_size_kb = Some(kb);
        self
    }

    /// `true` when the policy is `SCHED_FIFO`.
    pub fn is_realtime(&self) -> bool {
        self.policy == SchedPolicy::RealtimeFixedPriority
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `RtError::Configuration` if:
    /// - the policy is real-time and `priority` is outside 1–99
    /// - a CPU index does not fit in the kernel CPU set
    /// - the prefaulted stack would not leave 64 KiB of headroom
    pub fn validate(&self) -> RtResult<()> {
        if self.is_realtime() && !(RT_PRIORITY_MIN..=RT_PRIORITY_MAX).contains(&self.priority) {
            return Err(RtError::Configuration(format!(
                "priority {} outside {RT_PRIORITY_MIN}..={RT_PRIORITY_MAX} for SCHED_FIFO",
                self.priority
            )));
        }

        let max_cpu = CpuSet::count();
        if let Some(cpu) = self.cpu_affinity.iter().find(|&&cpu| cpu >= max_cpu) {
            return Err(RtError::Configuration(format!(
                "cpu index {cpu} exceeds CPU set capacity {max_cpu}"
            )));
        }

        let stack_kb = self.stack_size_kb.unwrap_or(STD_DEFAULT_STACK_KB);
        if self.lock_memory && self.stack_prefault_kb + STACK_PREFAULT_HEADROOM_KB > stack_kb {
            return Err(RtError::Configuration(format!(
                "stack_prefault_kb {} leaves less than {STACK_PREFAULT_HEADROOM_KB} KiB of a {stack_kb} KiB stack",
                self.stack_prefault_kb
            )));
        }
        Ok(())
    }
}

/// Per-thread tracer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TracerConfig {
    /// Record a `Sleep` span around every absolute sleep.
    pub trace_sleep: bool,
    /// Events the per-thread buffer holds before new events are dropped.
    pub capacity: usize,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            trace_sleep: false,
            capacity: DEFAULT_TRACER_CAPACITY,
        }
    }
}

impl TracerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> RtResult<()> {
        if self.capacity == 0 {
            return Err(RtError::Configuration(
                "tracer capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration of a cyclic (fixed-period) thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CyclicConfig {
    /// Scheduling configuration shared with plain threads.
    #[serde(flatten)]
    pub sched: SchedulingConfig,
    /// Period [ns]. Must be positive.
    #[serde(default = "default_period_ns")]
    pub period_ns: i64,
    /// Tracer settings.
    #[serde(default)]
    pub tracer: TracerConfig,
}

fn default_period_ns() -> i64 {
    DEFAULT_PERIOD_NS
}

impl Default for CyclicConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PERIOD_NS)
    }
}

impl CyclicConfig {
    /// Best-effort cyclic thread with the given period.
    pub fn new(period_ns: i64) -> Self {
        Self {
            sched: SchedulingConfig::best_effort(),
            period_ns,
            tracer: TracerConfig::default(),
        }
    }

    /// `SCHED_FIFO` cyclic thread with the given period and priority.
    pub fn fifo(period_ns: i64, priority: i32) -> Self {
        Self {
            sched: SchedulingConfig::fifo(priority),
            ..Self::new(period_ns)
        }
    }

    /// Pin to the given CPUs. See [`SchedulingConfig::with_cpu_affinity`].
    pub fn with_cpu_affinity(mut self, cpus: &[usize]) -> RtResult<Self> {
        self.sched = self.sched.with_cpu_affinity(cpus)?;
        Ok(self)
    }

    /// Enable or disable memory locking.
    pub fn with_lock_memory(mut self, enabled: bool) -> Self {
        self.sched.lock_memory = enabled;
        self
    }

    /// Replace the tracer settings.
    pub fn with_tracer(mut self, tracer: TracerConfig) -> Self {
        self.tracer = tracer;
        self
    }

    /// Validate period, scheduling and tracer settings.
    pub fn validate(&self) -> RtResult<()> {
        if self.period_ns <= 0 {
            return Err(RtError::Configuration(format!(
                "period_ns must be positive, got {}",
                self.period_ns
            )));
        }
        self.sched.validate()?;
        self.tracer.validate()
    }
}
