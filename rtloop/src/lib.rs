//! # rtloop
//!
//! Real-time thread runtime for Linux. Runs periodic ("cyclic") worker
//! threads on fixed-period absolute schedules under `SCHED_FIFO`, pinned
//! to CPUs with locked memory, and records their wakeup and loop latency
//! into a JSON Lines trace for offline analysis.
//!
//! ## Components
//!
//! 1. [`rt`] — OS scheduling setup (policy, priority, affinity, mlockall)
//! 2. [`thread::Thread`] — one OS thread, scheduling applied before its body
//! 3. [`cyclic::CyclicThread`] — drift-free fixed-period loop around a [`cyclic::CyclicTask`]
//! 4. [`tracer::Tracer`] — per-thread lock-free span/metric buffer
//! 5. [`session::TracingSession`] — drains all tracers into one trace file
//! 6. [`app::App`] — owns threads and session, start/stop/join as one unit
//!
//! ## Example
//!
//! ```rust,no_run
//! use rtloop::app::App;
//! use rtloop::cyclic::{CycleContext, CyclicTask, CyclicThread};
//! use rtloop_common::sched::CyclicConfig;
//!
//! struct Blink {
//!     ticks: u64,
//! }
//!
//! impl CyclicTask for Blink {
//!     fn run_loop(&mut self, ctx: &CycleContext<'_>, _elapsed_ns: i64) -> bool {
//!         let _span = ctx.span("Toggle");
//!         self.ticks += 1;
//!         false
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut app = App::new("blink");
//! let config = CyclicConfig::fifo(1_000_000, 80).with_cpu_affinity(&[2])?;
//! app.register_thread(CyclicThread::new("blink", config, Blink { ticks: 0 })?.into_thread()?)?;
//! app.start_trace_session("blink.jsonl")?;
//! app.run_for(std::time::Duration::from_secs(10))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Zero-Allocation RT Loop
//!
//! Tracer buffers are allocated when the thread is built. A running
//! cyclic loop performs no heap allocation, takes no blocking lock and
//! makes no system call apart from `clock_gettime` and `clock_nanosleep`.

pub mod app;
pub mod cyclic;
pub mod rt;
pub mod session;
pub mod thread;
pub mod tracer;
