//! Real-time thread: one OS thread with its scheduling applied before the body runs.
//!
//! ## Lifecycle
//! ```text
//! NotStarted ──start()──► Starting ──scheduling ok──► Running ──request_stop()──► StopRequested
//!                            │                           │                            │
//!                            └──scheduling refused──►  Stopped ◄──── body returns ────┘
//! ```
//!
//! `start()` blocks until the new thread has applied its [`SchedulingConfig`]
//! and reports the outcome, so a refused priority or affinity is returned to
//! the caller as [`RtError::Scheduling`] instead of being discovered later.

use crate::rt::{apply_thread_scheduling, current_tid};
use crate::tracer::Tracer;
use crossbeam::channel;
use rtloop_common::error::{RtError, RtResult};
use rtloop_common::sched::SchedulingConfig;
use static_assertions::assert_impl_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Thread lifecycle state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Constructed, `start()` not yet called.
    NotStarted = 0,
    /// OS thread spawned, scheduling being applied.
    Starting = 1,
    /// Body executing.
    Running = 2,
    /// Stop requested, body not yet returned.
    StopRequested = 3,
    /// OS thread exited (or never got past scheduling setup).
    Stopped = 4,
}

impl ThreadState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::NotStarted,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::StopRequested,
            _ => Self::Stopped,
        }
    }

    /// Lower-case label used in lifecycle errors.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::StopRequested => "stop requested",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ThreadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct ThreadShared {
    name: String,
    state: AtomicU8,
    tid: AtomicI32,
}

impl ThreadShared {
    fn new(name: String, state: ThreadState) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: AtomicU8::new(state as u8),
            tid: AtomicI32::new(0),
        })
    }

    #[inline]
    fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: ThreadState, to: ThreadState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Cloneable handle for requesting and observing a stop.
///
/// Bodies receive one in [`ThreadBody::run`] and poll
/// [`is_stop_requested`](Self::is_stop_requested) between units of work.
/// Any thread (including a signal handler thread) may call
/// [`request_stop`](Self::request_stop).
#[derive(Debug, Clone)]
pub struct StopHandle {
    shared: Arc<ThreadShared>,
}

assert_impl_all!(StopHandle: Send, Sync, Clone);

impl StopHandle {
    /// A handle not attached to any OS thread, already in `Running` state.
    ///
    /// Lets a body be driven synchronously on the calling thread.
    pub fn detached(name: &str) -> Self {
        Self {
            shared: ThreadShared::new(name.to_string(), ThreadState::Running),
        }
    }

    /// Move `Starting`/`Running` to `StopRequested`. Never blocks.
    ///
    /// Returns `true` if this call changed the state. Calls before start or
    /// after the thread stopped are no-ops.
    pub fn request_stop(&self) -> bool {
        let mut current = self.shared.state.load(Ordering::Acquire);
        loop {
            match ThreadState::from_u8(current) {
                ThreadState::Starting | ThreadState::Running => {}
                _ => return false,
            }
            match self.shared.state.compare_exchange_weak(
                current,
                ThreadState::StopRequested as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// `true` once a stop has been requested.
    #[inline]
    pub fn is_stop_requested(&self) -> bool {
        self.shared.state() == ThreadState::StopRequested
    }

    /// Name of the thread this handle controls.
    pub fn thread_name(&self) -> &str {
        &self.shared.name
    }
}

/// Work executed on a real-time thread after its scheduling is applied.
pub trait ThreadBody: Send + 'static {
    /// Run until `stop.is_stop_requested()` is observed (or the work is done).
    fn run(&mut self, stop: &StopHandle);

    /// Tracer owned by this body, if any. Bound to the thread's tid at start.
    fn tracer(&self) -> Option<Tracer> {
        None
    }
}

/// Adapter running a closure as a [`ThreadBody`].
pub struct FnBody<F>(pub F);

impl<F> ThreadBody for FnBody<F>
where
    F: FnMut(&StopHandle) + Send + 'static,
{
    fn run(&mut self, stop: &StopHandle) {
        (self.0)(stop)
    }
}

/// Marks the thread `Stopped` when the body returns or unwinds.
struct ExitGuard(Arc<ThreadShared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.set_state(ThreadState::Stopped);
    }
}

/// One OS thread with real-time scheduling.
pub struct Thread {
    shared: Arc<ThreadShared>,
    config: SchedulingConfig,
    tracer: Option<Tracer>,
    body: Option<Box<dyn ThreadBody>>,
    handle: Option<JoinHandle<()>>,
    panicked: bool,
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("tid", &self.tid())
            .field("config", &self.config)
            .finish()
    }
}

impl Thread {
    /// Create a thread. The configuration is validated here; nothing runs
    /// until [`start`](Self::start).
    pub fn new(
        name: impl Into<String>,
        config: SchedulingConfig,
        body: impl ThreadBody,
    ) -> RtResult<Self> {
        let name = name.into();
        config.validate().map_err(|e| match e {
            RtError::Configuration(msg) => RtError::Configuration(format!("thread '{name}': {msg}")),
            other => other,
        })?;
        let tracer = body.tracer();
        Ok(Self {
            shared: ThreadShared::new(name, ThreadState::NotStarted),
            config,
            tracer,
            body: Some(Box::new(body)),
            handle: None,
            panicked: false,
        })
    }

    /// Create a thread running `f`.
    pub fn from_fn<F>(name: impl Into<String>, config: SchedulingConfig, f: F) -> RtResult<Self>
    where
        F: FnMut(&StopHandle) + Send + 'static,
    {
        Self::new(name, config, FnBody(f))
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ThreadState {
        self.shared.state()
    }

    /// Scheduling configuration applied at start.
    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    /// Kernel thread id, once started.
    pub fn tid(&self) -> Option<i32> {
        match self.shared.tid.load(Ordering::Acquire) {
            0 => None,
            tid => Some(tid),
        }
    }

    /// The body's tracer, if it has one.
    pub fn tracer(&self) -> Option<&Tracer> {
        self.tracer.as_ref()
    }

    /// Handle for requesting a stop from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Spawn the OS thread and wait for its scheduling setup.
    ///
    /// # Errors
    /// - `Lifecycle` if the thread was already started.
    /// - `Scheduling` if the OS refused any part of the configuration; the
    ///   OS thread has exited and the thread is `Stopped`.
    /// - `ThreadPanicked` if setup panicked.
    pub fn start(&mut self) -> RtResult<()> {
        if !self
            .shared
            .transition(ThreadState::NotStarted, ThreadState::Starting)
        {
            return Err(RtError::lifecycle(
                "start",
                &self.shared.name,
                self.state().as_str(),
            ));
        }
        let Some(mut body) = self.body.take() else {
            self.shared.set_state(ThreadState::Stopped);
            return Err(RtError::lifecycle("start", &self.shared.name, "without body"));
        };

        let (ack_tx, ack_rx) = channel::bounded::<RtResult<()>>(1);
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let tracer = self.tracer.clone();

        let mut builder = std::thread::Builder::new().name(self.shared.name.clone());
        if let Some(kb) = self.config.stack_size_kb {
            builder = builder.stack_size(kb * 1024);
        }

        let spawned = builder.spawn(move || {
            shared.tid.store(current_tid(), Ordering::Release);
            if let Some(tracer) = &tracer {
                tracer.bind_current_thread();
            }

            if let Err(e) = apply_thread_scheduling(&shared.name, &config) {
                shared.set_state(ThreadState::Stopped);
                let _ = ack_tx.send(Err(e));
                return;
            }

            // A stop requested while starting stays requested.
            shared.transition(ThreadState::Starting, ThreadState::Running);
            let _exit = ExitGuard(Arc::clone(&shared));
            let _ = ack_tx.send(Ok(()));
            drop(ack_tx);

            let stop = StopHandle {
                shared: Arc::clone(&shared),
            };
            body.run(&stop);
            debug!(thread = %shared.name, "body returned");
        });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.set_state(ThreadState::Stopped);
                return Err(RtError::scheduling(
                    &self.shared.name,
                    format!("spawn failed: {e}"),
                ));
            }
        };

        match ack_rx.recv() {
            Ok(Ok(())) => {
                info!(
                    thread = %self.shared.name,
                    tid = self.tid().unwrap_or_default(),
                    policy = ?self.config.policy,
                    priority = self.config.priority,
                    "thread started"
                );
                self.handle = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                warn!(thread = %self.shared.name, error = %e, "thread failed to start");
                Err(e)
            }
            Err(_) => {
                // Sender dropped without an answer: setup panicked.
                let _ = handle.join();
                self.shared.set_state(ThreadState::Stopped);
                self.panicked = true;
                Err(RtError::ThreadPanicked {
                    thread: self.shared.name.clone(),
                })
            }
        }
    }

    /// Request a cooperative stop. Non-blocking; repeated calls are no-ops.
    pub fn request_stop(&self) {
        if self.stop_handle().request_stop() {
            debug!(thread = %self.shared.name, "stop requested");
        }
    }

    /// Block until the OS thread has exited.
    ///
    /// # Errors
    /// - `Lifecycle` if the thread was never started.
    /// - `ThreadPanicked` if the body panicked (reported on every call).
    pub fn join(&mut self) -> RtResult<()> {
        if self.state() == ThreadState::NotStarted {
            return Err(RtError::lifecycle(
                "join",
                &self.shared.name,
                ThreadState::NotStarted.as_str(),
            ));
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                self.panicked = true;
            } else {
                info!(thread = %self.shared.name, "thread joined");
            }
            self.shared.set_state(ThreadState::Stopped);
        }
        if self.panicked {
            return Err(RtError::ThreadPanicked {
                thread: self.shared.name.clone(),
            });
        }
        Ok(())
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.request_stop();
            if let Err(e) = self.join() {
                warn!(thread = %self.shared.name, error = %e, "thread ended abnormally");
            }
        }
    }
}
