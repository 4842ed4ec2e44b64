//! Process-wide trace session: drains every registered [`Tracer`] into one
//! JSON Lines file.
//!
//! ## Record Format
//! One JSON object per line, tagged by `type`:
//! ```text
//! {"type":"process","pid":4242,"name":"demo","clock":"CLOCK_MONOTONIC"}
//! {"type":"thread","tid":4250,"name":"fast"}
//! {"type":"metric","tid":4250,"name":"WakeupLatency","value":5310,"timestamp_ns":81234000}
//! {"type":"span","tid":4250,"name":"Sleep","start_ns":81000000,"end_ns":81234000}
//! {"type":"dropped","tid":4250,"count":12}
//! ```
//!
//! ## Drain Thread
//! Every `flush_period_ms` the drain thread pulls all tracer queues, holds
//! events back for one flush period so late arrivals from other threads
//! can still be ordered, and serializes the rest in timestamp order into
//! an in-memory buffer of `buffer_size_kb`. The buffer goes to the file
//! every `file_write_period_ms`, or earlier when full.
//!
//! Write failures while running are logged (rate limited) and counted.
//! The real-time threads never see them; the trace just loses data.

use crate::tracer::{TraceEvent, Tracer};
use parking_lot::{Condvar, Mutex};
use rtloop_common::clock::now_ns;
use rtloop_common::config::TraceSessionParams;
use rtloop_common::consts::NS_PER_MS;
use rtloop_common::error::{RtError, RtResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound of events pulled from one tracer per periodic flush.
/// The final drain at stop has no bound.
const MAX_DRAIN_PER_TRACER: usize = 1 << 16;

/// Name of the background drain thread.
const DRAIN_THREAD_NAME: &str = "rtloop-trace";

/// One line of a trace file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceRecord {
    /// Written once, first.
    Process {
        /// OS process id.
        pid: u32,
        /// Application name.
        name: String,
        /// Clock all timestamps refer to.
        clock: String,
    },
    /// Written once per thread, before its first event.
    Thread {
        /// Kernel thread id.
        tid: i32,
        /// Thread name.
        name: String,
    },
    /// Timed interval.
    Span {
        /// Kernel thread id.
        tid: i32,
        /// Span name.
        name: String,
        /// Start [ns].
        start_ns: i64,
        /// End [ns].
        end_ns: i64,
    },
    /// Sample.
    Metric {
        /// Kernel thread id.
        tid: i32,
        /// Metric name.
        name: String,
        /// Value.
        value: i64,
        /// Sample time [ns].
        timestamp_ns: i64,
    },
    /// Total events lost by a tracer so far.
    Dropped {
        /// Kernel thread id.
        tid: i32,
        /// Cumulative dropped events.
        count: u64,
    },
}

impl TraceRecord {
    /// Event timestamp for spans (end) and metrics; `None` for descriptors.
    pub fn timestamp_ns(&self) -> Option<i64> {
        match self {
            Self::Span { end_ns, .. } => Some(*end_ns),
            Self::Metric { timestamp_ns, .. } => Some(*timestamp_ns),
            _ => None,
        }
    }

    /// Thread id the record belongs to, if any.
    pub fn tid(&self) -> Option<i32> {
        match self {
            Self::Process { .. } => None,
            Self::Thread { tid, .. }
            | Self::Span { tid, .. }
            | Self::Metric { tid, .. }
            | Self::Dropped { tid, .. } => Some(*tid),
        }
    }
}

/// Read a trace file back.
///
/// # Errors
/// `RtError::Io` if the file cannot be read or a line is not a valid record.
pub fn read_trace(path: impl AsRef<Path>) -> RtResult<Vec<TraceRecord>> {
    let path = path.as_ref();
    let context = || format!("read trace file {}", path.display());
    let file = File::open(path).map_err(|e| RtError::io(context(), e))?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| RtError::io(context(), e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            RtError::io(
                context(),
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Destination of the drain thread's writes.
trait TraceSink: Write + Send {
    /// Flush to stable storage.
    fn sync(&mut self) -> std::io::Result<()> {
        self.flush()
    }
}

impl TraceSink for File {
    fn sync(&mut self) -> std::io::Result<()> {
        self.sync_all()
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet writing.
    Uninitialized,
    /// Drain thread running.
    Started,
    /// File closed; cannot be restarted.
    Stopped,
}

impl SessionState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Started => "started",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Default)]
struct DrainSignal {
    stop: Mutex<bool>,
    wake: Condvar,
}

impl DrainSignal {
    /// Wait up to `timeout`; returns `true` once stop was requested.
    fn wait(&self, timeout: Duration) -> bool {
        let mut stop = self.stop.lock();
        if !*stop {
            self.wake.wait_for(&mut stop, timeout);
        }
        *stop
    }

    fn request_stop(&self) {
        *self.stop.lock() = true;
        self.wake.notify_all();
    }
}

/// Totals reported by the drain thread when it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Records written to the file.
    pub records: u64,
    /// Failed mid-run writes.
    pub write_errors: u64,
}

/// Process-wide trace session.
pub struct TracingSession {
    app_name: String,
    state: SessionState,
    path: Option<PathBuf>,
    tracers: Arc<Mutex<Vec<Tracer>>>,
    signal: Arc<DrainSignal>,
    worker: Option<JoinHandle<RtResult<DrainReport>>>,
    report: Option<DrainReport>,
}

impl std::fmt::Debug for TracingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracingSession")
            .field("app_name", &self.app_name)
            .field("state", &self.state)
            .field("path", &self.path)
            .field("tracers", &self.tracers.lock().len())
            .finish()
    }
}

impl TracingSession {
    /// New session for `app_name`. Nothing is opened until [`start`](Self::start).
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            state: SessionState::Uninitialized,
            path: None,
            tracers: Arc::new(Mutex::new(Vec::new())),
            signal: Arc::new(DrainSignal::default()),
            worker: None,
            report: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Destination file, once started.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Drain totals, available after [`stop`](Self::stop).
    pub fn report(&self) -> Option<DrainReport> {
        self.report
    }

    /// Add a tracer to drain. Registering the same tracer twice has no effect.
    ///
    /// A tracer registered while the session runs starts recording at once.
    pub fn register(&self, tracer: &Tracer) {
        let mut tracers = self.tracers.lock();
        if tracers.iter().any(|t| t.same_as(tracer)) {
            return;
        }
        tracer.set_enabled(self.state == SessionState::Started);
        tracers.push(tracer.clone());
        debug!(thread = tracer.thread_name(), "tracer registered");
    }

    /// Create (or truncate) `path`, write the process record and start draining.
    ///
    /// # Errors
    /// - `Lifecycle` if the session was already started or stopped.
    /// - `Configuration` for zero-valued parameters.
    /// - `Io` if the file cannot be created or written.
    pub fn start(&mut self, path: impl AsRef<Path>, params: TraceSessionParams) -> RtResult<()> {
        if self.state != SessionState::Uninitialized {
            return Err(RtError::lifecycle(
                "start",
                "trace session",
                self.state.as_str(),
            ));
        }
        params.validate()?;

        let path = path.as_ref().to_path_buf();
        let mut file = File::create(&path)
            .map_err(|e| RtError::io(format!("create trace file {}", path.display()), e))?;

        let mut header = Vec::new();
        encode(
            &mut header,
            &TraceRecord::Process {
                pid: std::process::id(),
                name: self.app_name.clone(),
                clock: "CLOCK_MONOTONIC".to_string(),
            },
        );
        file.write_all(&header)
            .map_err(|e| RtError::io(format!("write trace file {}", path.display()), e))?;

        self.launch(path, Box::new(file), params, 1)
    }

    /// Spawn the drain thread writing to `sink` and enable every tracer.
    fn launch(
        &mut self,
        path: PathBuf,
        sink: Box<dyn TraceSink>,
        params: TraceSessionParams,
        records_written: u64,
    ) -> RtResult<()> {
        let worker = DrainWorker {
            sink,
            path: path.clone(),
            params,
            tracers: Arc::clone(&self.tracers),
            signal: Arc::clone(&self.signal),
            tracks: Vec::new(),
            pending: Vec::new(),
            scratch: Vec::new(),
            buffer: Vec::with_capacity(params.buffer_size_kb as usize * 1024),
            report: DrainReport {
                records: records_written,
                write_errors: 0,
            },
        };
        let handle = std::thread::Builder::new()
            .name(DRAIN_THREAD_NAME.to_string())
            .spawn(move || worker.run())
            .map_err(|e| RtError::io("spawn trace drain thread", e))?;

        {
            let tracers = self.tracers.lock();
            for tracer in tracers.iter() {
                tracer.set_enabled(true);
            }
        }
        info!(
            path = %path.display(),
            buffer_size_kb = params.buffer_size_kb,
            flush_period_ms = params.flush_period_ms,
            file_write_period_ms = params.file_write_period_ms,
            "trace session started"
        );
        self.worker = Some(handle);
        self.path = Some(path);
        self.state = SessionState::Started;
        Ok(())
    }

    /// Stop recording, drain everything recorded so far and close the file.
    ///
    /// No-op if the session never started or already stopped.
    ///
    /// # Errors
    /// `Io` if the final write or sync fails.
    pub fn stop(&mut self) -> RtResult<()> {
        if self.state != SessionState::Started {
            return Ok(());
        }
        self.state = SessionState::Stopped;

        for tracer in self.tracers.lock().iter() {
            tracer.set_enabled(false);
        }
        self.signal.request_stop();

        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        let report = handle.join().map_err(|_| RtError::ThreadPanicked {
            thread: DRAIN_THREAD_NAME.to_string(),
        })??;
        self.report = Some(report);
        info!(
            records = report.records,
            write_errors = report.write_errors,
            "trace session stopped"
        );
        Ok(())
    }
}

impl Drop for TracingSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "trace session did not stop cleanly");
        }
    }
}

/// Per-tracer bookkeeping on the drain thread.
#[derive(Default)]
struct Track {
    tid: i32,
    described: bool,
    dropped_reported: u64,
}

struct DrainWorker {
    sink: Box<dyn TraceSink>,
    path: PathBuf,
    params: TraceSessionParams,
    tracers: Arc<Mutex<Vec<Tracer>>>,
    signal: Arc<DrainSignal>,
    tracks: Vec<Track>,
    pending: Vec<(usize, TraceEvent)>,
    scratch: Vec<TraceEvent>,
    buffer: Vec<u8>,
    report: DrainReport,
}

impl DrainWorker {
    fn run(mut self) -> RtResult<DrainReport> {
        let flush_period = Duration::from_millis(u64::from(self.params.flush_period_ms));
        let write_period = Duration::from_millis(u64::from(self.params.file_write_period_ms));
        let holdback_ns = i64::from(self.params.flush_period_ms) * NS_PER_MS;
        let buffer_limit = self.params.buffer_size_kb as usize * 1024;
        let mut last_write = Instant::now();

        loop {
            let stopping = self.signal.wait(flush_period);

            if stopping {
                // Tracers are disabled by now: empty every queue.
                while self.collect(usize::MAX) > 0 {}
                self.emit_until(i64::MAX);
                self.write_buffer()
                    .map_err(|e| RtError::io(format!("flush trace file {}", self.path.display()), e))?;
                self.sink
                    .sync()
                    .map_err(|e| RtError::io(format!("sync trace file {}", self.path.display()), e))?;
                return Ok(self.report);
            }

            self.collect(MAX_DRAIN_PER_TRACER);
            self.emit_until(now_ns() - holdback_ns);

            if last_write.elapsed() >= write_period || self.buffer.len() >= buffer_limit {
                if let Err(e) = self.write_buffer() {
                    self.report.write_errors += 1;
                    let n = self.report.write_errors;
                    if n <= 10 || n % 1000 == 0 {
                        warn!(
                            path = %self.path.display(),
                            error = %e,
                            count = n,
                            "trace write failed, data lost"
                        );
                    }
                    self.buffer.clear();
                }
                last_write = Instant::now();
            }
        }
    }

    /// Pull up to `max_per_tracer` events from every queue into `pending`,
    /// emitting descriptors as threads appear. Returns the number pulled.
    fn collect(&mut self, max_per_tracer: usize) -> usize {
        let mut pulled = 0;
        let tracers = Arc::clone(&self.tracers);
        let tracers = tracers.lock();
        for (index, tracer) in tracers.iter().enumerate() {
            if index >= self.tracks.len() {
                self.tracks.push(Track::default());
            }

            self.scratch.clear();
            pulled += tracer.drain_into(&mut self.scratch, max_per_tracer);

            let tid = tracer.tid();
            let track = &mut self.tracks[index];
            if !track.described && (tid.is_some() || !self.scratch.is_empty()) {
                track.tid = tid.unwrap_or_default();
                track.described = true;
                let record = TraceRecord::Thread {
                    tid: track.tid,
                    name: tracer.thread_name().to_string(),
                };
                encode(&mut self.buffer, &record);
                self.report.records += 1;
            }

            let dropped = tracer.dropped();
            if dropped > track.dropped_reported {
                track.dropped_reported = dropped;
                let record = TraceRecord::Dropped {
                    tid: track.tid,
                    count: dropped,
                };
                encode(&mut self.buffer, &record);
                self.report.records += 1;
            }

            self.pending
                .extend(self.scratch.drain(..).map(|event| (index, event)));
        }
        pulled
    }

    /// Serialize pending events completed at or before `watermark`, oldest first.
    fn emit_until(&mut self, watermark: i64) {
        if self.pending.is_empty() {
            return;
        }
        self.pending.sort_by_key(|(_, event)| event.completed_at_ns());
        let ready = self
            .pending
            .partition_point(|(_, event)| event.completed_at_ns() <= watermark);

        for (index, event) in self.pending.drain(..ready) {
            let tid = self.tracks[index].tid;
            let record = match event {
                TraceEvent::Span {
                    name,
                    start_ns,
                    end_ns,
                } => TraceRecord::Span {
                    tid,
                    name: name.to_string(),
                    start_ns,
                    end_ns,
                },
                TraceEvent::Metric {
                    name,
                    value,
                    timestamp_ns,
                } => TraceRecord::Metric {
                    tid,
                    name: name.to_string(),
                    value,
                    timestamp_ns,
                },
            };
            encode(&mut self.buffer, &record);
            self.report.records += 1;
        }
    }

    fn write_buffer(&mut self) -> std::io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.sink.write_all(&self.buffer)?;
        self.buffer.clear();
        Ok(())
    }
}

/// Append `record` as one JSON line.
fn encode(buffer: &mut Vec<u8>, record: &TraceRecord) {
    // Serializing these plain records into a Vec cannot fail.
    if serde_json::to_writer(&mut *buffer, record).is_ok() {
        buffer.push(b'\n');
    }
}
