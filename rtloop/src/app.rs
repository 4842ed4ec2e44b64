//! Process-level coordinator: owns the threads and the trace session.
//!
//! ## Lifecycle
//! ```text
//! Constructed ──start()──► Started ──request_stop()──► StopRequested ──join()──► Joined
//!      │                      └─────────────────join()───────────────────────────▲
//!      └──start() fails: started threads stopped and joined ─────────────────────┘
//! ```
//!
//! `start()` applies process-wide RT preconditions once, then starts the
//! threads in registration order. If any thread fails to start, the ones
//! already running are stopped and joined before the error is returned,
//! so a failed start never leaves threads behind.

use crate::rt::apply_process_preconditions;
use crate::session::TracingSession;
use crate::thread::{StopHandle, Thread, ThreadState};
use parking_lot::{Condvar, Mutex};
use rtloop_common::config::{ProcessRtConfig, TraceSessionParams};
use rtloop_common::error::{RtError, RtResult};
use static_assertions::assert_impl_all;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Poll interval of [`App::run_for`] while waiting for threads or a stop.
const RUN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// App lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    /// Threads may be registered.
    Constructed,
    /// All threads running.
    Started,
    /// Stop signalled, not yet joined.
    StopRequested,
    /// All threads joined, session stopped. Terminal.
    Joined,
}

impl AppState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Constructed => "constructed",
            Self::Started => "started",
            Self::StopRequested => "stop requested",
            Self::Joined => "joined",
        }
    }
}

#[derive(Default)]
struct StopSignal {
    threads: Mutex<Vec<StopHandle>>,
    requested: Mutex<bool>,
    wake: Condvar,
}

/// Cloneable handle that stops every thread of an [`App`].
///
/// Safe to move into a Ctrl-C handler.
#[derive(Clone, Default)]
pub struct AppStopHandle {
    signal: Arc<StopSignal>,
}

assert_impl_all!(AppStopHandle: Send, Sync, Clone);

impl std::fmt::Debug for AppStopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppStopHandle")
            .field("requested", &self.is_stop_requested())
            .finish()
    }
}

impl AppStopHandle {
    /// Request a stop of every registered thread. Never blocks on the threads.
    ///
    /// A request made before or while the app starts is kept: every thread
    /// started afterwards is stopped as soon as it runs.
    pub fn request_stop(&self) {
        // Set before forwarding so a concurrent `App::start` observes it.
        *self.signal.requested.lock() = true;
        for handle in self.signal.threads.lock().iter() {
            handle.request_stop();
        }
        self.signal.wake.notify_all();
    }

    /// `true` once [`request_stop`](Self::request_stop) was called.
    pub fn is_stop_requested(&self) -> bool {
        *self.signal.requested.lock()
    }

    /// Wait until a stop is requested or `timeout` passes.
    /// Returns `true` if a stop was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut requested = self.signal.requested.lock();
        if !*requested {
            self.signal.wake.wait_for(&mut requested, timeout);
        }
        *requested
    }

    fn track(&self, handle: StopHandle) {
        self.signal.threads.lock().push(handle);
    }
}

/// Real-time application: registered threads plus an optional trace session.
pub struct App {
    name: String,
    process_rt: ProcessRtConfig,
    threads: Vec<Thread>,
    session: Option<TracingSession>,
    state: AppState,
    stop: AppStopHandle,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("threads", &self.thread_names())
            .field("session", &self.session)
            .finish()
    }
}

impl App {
    /// New app with the default process preconditions
    /// (heap trimming disabled, no process-wide `mlockall`).
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_process_config(name, ProcessRtConfig::default())
    }

    /// New app with explicit process preconditions.
    pub fn with_process_config(name: impl Into<String>, process_rt: ProcessRtConfig) -> Self {
        Self {
            name: name.into(),
            process_rt,
            threads: Vec::new(),
            session: None,
            state: AppState::Constructed,
            stop: AppStopHandle::default(),
        }
    }

    /// App name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> AppState {
        self.state
    }

    /// Registered threads, in registration order.
    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    /// Names of the registered threads, in registration order.
    pub fn thread_names(&self) -> Vec<&str> {
        self.threads.iter().map(Thread::name).collect()
    }

    /// First thread registered under `name`.
    pub fn thread(&self, name: &str) -> Option<&Thread> {
        self.threads.iter().find(|t| t.name() == name)
    }

    /// The trace session, if one was started.
    pub fn session(&self) -> Option<&TracingSession> {
        self.session.as_ref()
    }

    /// Handle for stopping the app from another thread or a signal handler.
    pub fn stop_handle(&self) -> AppStopHandle {
        self.stop.clone()
    }

    /// Append a thread. Its tracer joins the trace session, if any.
    ///
    /// # Errors
    /// `Lifecycle` once the app has been started.
    pub fn register_thread(&mut self, thread: Thread) -> RtResult<()> {
        if self.state != AppState::Constructed {
            return Err(RtError::lifecycle(
                "register",
                thread.name(),
                self.state.as_str(),
            ));
        }
        if let (Some(session), Some(tracer)) = (&self.session, thread.tracer()) {
            session.register(tracer);
        }
        self.stop.track(thread.stop_handle());
        self.threads.push(thread);
        Ok(())
    }

    /// Start tracing to `path` with default buffering parameters.
    pub fn start_trace_session(&mut self, path: impl AsRef<Path>) -> RtResult<()> {
        self.start_trace_session_with(path, TraceSessionParams::default())
    }

    /// Start tracing to `path`. Only allowed once, before [`start`](Self::start).
    ///
    /// # Errors
    /// - `Lifecycle` after `start` or if a session already exists.
    /// - `Io` / `Configuration` from [`TracingSession::start`].
    pub fn start_trace_session_with(
        &mut self,
        path: impl AsRef<Path>,
        params: TraceSessionParams,
    ) -> RtResult<()> {
        if self.state != AppState::Constructed {
            return Err(RtError::lifecycle(
                "start trace session of",
                &self.name,
                self.state.as_str(),
            ));
        }
        if self.session.is_some() {
            return Err(RtError::lifecycle(
                "start trace session of",
                &self.name,
                "tracing",
            ));
        }

        let mut session = TracingSession::new(self.name.clone());
        for tracer in self.threads.iter().filter_map(Thread::tracer) {
            session.register(tracer);
        }
        session.start(path, params)?;
        self.session = Some(session);
        Ok(())
    }

    /// Apply process preconditions and start every thread in registration order.
    ///
    /// # Errors
    /// - `Lifecycle` if called twice.
    /// - `Scheduling` (or any thread start error) after rolling back: every
    ///   thread started so far is stopped and joined, the trace session is
    ///   stopped and the app is `Joined`.
    pub fn start(&mut self) -> RtResult<()> {
        if self.state != AppState::Constructed {
            return Err(RtError::lifecycle("start", &self.name, self.state.as_str()));
        }

        if let Err(e) = apply_process_preconditions(&self.process_rt) {
            error!(app = %self.name, error = %e, "process RT preconditions refused");
            self.rollback(0);
            return Err(e);
        }

        for index in 0..self.threads.len() {
            if let Err(e) = self.threads[index].start() {
                error!(
                    app = %self.name,
                    thread = self.threads[index].name(),
                    error = %e,
                    "thread failed to start, rolling back"
                );
                self.rollback(index);
                return Err(e);
            }
            if self.stop.is_stop_requested() {
                self.threads[index].request_stop();
            }
        }

        info!(app = %self.name, threads = self.threads.len(), "app started");
        if self.stop.is_stop_requested() {
            self.state = AppState::StopRequested;
            info!(app = %self.name, "stop requested during start");
        } else {
            self.state = AppState::Started;
        }
        Ok(())
    }

    /// Stop and join the first `started` threads and close the session.
    fn rollback(&mut self, started: usize) {
        for thread in &self.threads[..started] {
            thread.request_stop();
        }
        for thread in &mut self.threads[..started] {
            if let Err(e) = thread.join() {
                warn!(thread = thread.name(), error = %e, "rollback join failed");
            }
        }
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.stop() {
                warn!(error = %e, "rollback trace session stop failed");
            }
        }
        self.state = AppState::Joined;
    }

    /// Signal every thread to stop. Non-blocking.
    pub fn request_stop(&mut self) {
        self.stop.request_stop();
        if self.state == AppState::Started {
            self.state = AppState::StopRequested;
            info!(app = %self.name, "stop requested");
        }
    }

    /// Join every thread in registration order, then stop the trace session.
    ///
    /// Returns the first error encountered; all threads are joined regardless.
    ///
    /// # Errors
    /// - `Lifecycle` if the app was never started.
    /// - `ThreadPanicked` / `Io` from the threads or the session.
    pub fn join(&mut self) -> RtResult<()> {
        match self.state {
            AppState::Constructed => {
                return Err(RtError::lifecycle("join", &self.name, self.state.as_str()));
            }
            AppState::Joined => return Ok(()),
            AppState::Started | AppState::StopRequested => {}
        }

        let mut first_error = None;
        for thread in &mut self.threads {
            if let Err(e) = thread.join() {
                error!(thread = thread.name(), error = %e, "thread join failed");
                first_error.get_or_insert(e);
            }
        }
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.stop() {
                error!(error = %e, "trace session stop failed");
                first_error.get_or_insert(e);
            }
        }

        self.state = AppState::Joined;
        info!(app = %self.name, "app joined");
        first_error.map_or(Ok(()), Err)
    }

    /// Start, run for `duration` (or until a stop is requested or every
    /// thread finished on its own), then stop and join.
    ///
    /// `Duration::MAX` runs until stopped.
    pub fn run_for(&mut self, duration: Duration) -> RtResult<()> {
        self.start()?;
        let deadline = Instant::now().checked_add(duration);
        loop {
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    (deadline - now).min(RUN_POLL_INTERVAL)
                }
                None => RUN_POLL_INTERVAL,
            };
            if self.stop.wait_timeout(wait) {
                break;
            }
            if self
                .threads
                .iter()
                .all(|t| t.state() == ThreadState::Stopped)
            {
                break;
            }
        }
        self.request_stop();
        self.join()
    }
}

impl Drop for App {
    fn drop(&mut self) {
        if matches!(self.state, AppState::Started | AppState::StopRequested) {
            self.request_stop();
            if let Err(e) = self.join() {
                warn!(app = %self.name, error = %e, "app dropped with errors");
            }
        }
    }
}
