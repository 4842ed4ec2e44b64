//! OS-level real-time setup.
//!
//! ## Thread Setup Sequence
//! Runs on the new thread, before its body:
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)` and prefault stack pages (if `lock_memory`).
//! 2. `sched_setaffinity` — pin to the configured CPUs (if any).
//! 3. `pthread_setschedparam` — `SCHED_FIFO` at the configured priority,
//!    or `SCHED_OTHER` for best-effort threads.
//!
//! ## Process Preconditions
//! Applied once per process by the app, before any thread starts:
//! `mlockall` for the whole process and glibc heap pinning
//! (`M_TRIM_THRESHOLD = -1`, `M_MMAP_MAX = 0`).
//!
//! Every refusal is returned as `RtError::Scheduling`. Nothing is
//! silently downgraded.

use nix::sched::{CpuSet, sched_setaffinity};
use nix::sys::mman::{MlockAllFlags, mlockall};
use nix::unistd::Pid;
use rtloop_common::config::ProcessRtConfig;
use rtloop_common::error::{RtError, RtResult};
use rtloop_common::sched::{SchedPolicy, SchedulingConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Size of one prefault stack frame [KiB].
const PREFAULT_CHUNK_KB: usize = 64;

static PROCESS_PRECONDITIONS_APPLIED: AtomicBool = AtomicBool::new(false);

/// Apply a thread's scheduling configuration to the calling thread.
pub fn apply_thread_scheduling(name: &str, config: &SchedulingConfig) -> RtResult<()> {
    if config.lock_memory {
        lock_memory(name)?;
        prefault_stack(config.stack_prefault_kb);
    }

    if !config.cpu_affinity.is_empty() {
        set_affinity(name, &config.cpu_affinity)?;
    }

    set_scheduler(name, config.policy, config.priority)?;

    debug!(
        thread = name,
        policy = ?config.policy,
        priority = config.priority,
        cpus = ?config.cpu_affinity.as_slice(),
        lock_memory = config.lock_memory,
        "scheduling applied"
    );
    Ok(())
}

/// Apply process-wide RT preconditions.
///
/// Only the first successful call in a process has an effect; later
/// calls return `Ok(false)`.
pub fn apply_process_preconditions(config: &ProcessRtConfig) -> RtResult<bool> {
    if PROCESS_PRECONDITIONS_APPLIED.load(Ordering::Acquire) {
        debug!("process RT preconditions already applied");
        return Ok(false);
    }

    if config.disable_heap_trim {
        disable_heap_trim()?;
    }
    if config.lock_all_memory {
        lock_memory("process")?;
    }

    PROCESS_PRECONDITIONS_APPLIED.store(true, Ordering::Release);
    info!(
        lock_all_memory = config.lock_all_memory,
        disable_heap_trim = config.disable_heap_trim,
        "process RT preconditions applied"
    );
    Ok(true)
}

/// Lock all current and future memory pages (prevent page faults in RT loops).
fn lock_memory(target: &str) -> RtResult<()> {
    mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE)
        .map_err(|e| RtError::scheduling(target, format!("mlockall failed: {e}")))
}

/// Prefault `kb` KiB of the calling thread's stack.
///
/// Touches the stack in 64 KiB frames so the pages are resident (and
/// locked, once `mlockall(MCL_FUTURE)` is in effect) before the loop runs.
pub fn prefault_stack(kb: usize) {
    if kb > 0 {
        touch_stack_frames(kb.div_ceil(PREFAULT_CHUNK_KB));
    }
}

#[inline(never)]
fn touch_stack_frames(frames: usize) {
    let mut buf = [0u8; PREFAULT_CHUNK_KB * 1024];
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid exclusive reference into a local array.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
    if frames > 1 {
        touch_stack_frames(frames - 1);
    }
}

/// Pin the calling thread to `cpus`.
fn set_affinity(name: &str, cpus: &[usize]) -> RtResult<()> {
    let mut cpuset = CpuSet::new();
    for &cpu in cpus {
        cpuset
            .set(cpu)
            .map_err(|e| RtError::scheduling(name, format!("CpuSet::set({cpu}) failed: {e}")))?;
    }
    sched_setaffinity(Pid::from_raw(0), &cpuset).map_err(|e| {
        RtError::scheduling(name, format!("sched_setaffinity({cpus:?}) failed: {e}"))
    })
}

/// Set the scheduling policy of the calling thread.
fn set_scheduler(name: &str, policy: SchedPolicy, priority: i32) -> RtResult<()> {
    let (os_policy, os_priority, label) = match policy {
        SchedPolicy::RealtimeFixedPriority => (libc::SCHED_FIFO, priority, "SCHED_FIFO"),
        SchedPolicy::BestEffort => (libc::SCHED_OTHER, 0, "SCHED_OTHER"),
    };
    let param = libc::sched_param {
        sched_priority: os_priority,
    };
    // SAFETY: `pthread_self()` is always a valid handle for the calling thread
    // and `param` outlives the call.
    let ret = unsafe { libc::pthread_setschedparam(libc::pthread_self(), os_policy, &param) };
    if ret != 0 {
        let err = std::io::Error::from_raw_os_error(ret);
        return Err(RtError::scheduling(
            name,
            format!("pthread_setschedparam({label}, {os_priority}) failed: {err}"),
        ));
    }
    Ok(())
}

/// Keep freed heap memory mapped and serve large allocations from the heap.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn disable_heap_trim() -> RtResult<()> {
    // SAFETY: mallopt only updates allocator tunables.
    let trim_ok = unsafe { libc::mallopt(libc::M_TRIM_THRESHOLD, -1) } == 1;
    // SAFETY: as above.
    let mmap_ok = unsafe { libc::mallopt(libc::M_MMAP_MAX, 0) } == 1;
    if !(trim_ok && mmap_ok) {
        return Err(RtError::scheduling(
            "process",
            "mallopt(M_TRIM_THRESHOLD / M_MMAP_MAX) rejected",
        ));
    }
    Ok(())
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn disable_heap_trim() -> RtResult<()> {
    Ok(()) // Only glibc exposes these tunables.
}

/// Kernel thread id of the calling thread.
#[inline]
pub fn current_tid() -> i32 {
    nix::unistd::gettid().as_raw()
}

/// `true` if the calling thread runs under `SCHED_FIFO` or `SCHED_RR`.
pub fn current_policy_is_realtime() -> bool {
    // SAFETY: sched_getscheduler(0) only queries the calling thread.
    let policy = unsafe { libc::sched_getscheduler(0) };
    policy == libc::SCHED_FIFO || policy == libc::SCHED_RR
}
