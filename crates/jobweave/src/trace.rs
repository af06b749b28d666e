//! Execution trace
//!
//! Per-worker event buffers recorded while logging is enabled. The trace can be
//! rendered as a Chrome `about://tracing` document: one complete (`"ph": "X"`)
//! slice per job run, plus zero-length slices for steals, continuation fires
//! and shutdown discards.

use crate::scheduler::{JobId, JobType};
use crate::JobResult;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// What a trace event records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    /// One dispatch of a job; `finished` is false when a coroutine suspended
    Run {
        /// Whether the job's body completed during this dispatch
        finished: bool,
    },
    /// Job taken from another worker's deque
    Steal {
        /// Worker the job was stolen from
        victim: usize,
    },
    /// A continuation was scheduled after its predecessor finished
    Continuation,
    /// Job dropped at shutdown without running
    Discard,
}

impl TraceKind {
    fn category(&self) -> &'static str {
        match self {
            TraceKind::Run { finished: true } => "run",
            TraceKind::Run { finished: false } => "suspend",
            TraceKind::Steal { .. } => "steal",
            TraceKind::Continuation => "continuation",
            TraceKind::Discard => "discard",
        }
    }
}

/// A single recorded event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// Start, relative to trace creation
    pub start: Duration,
    /// End, relative to trace creation
    pub end: Duration,
    /// Worker that recorded the event (`None` outside the pool)
    pub thread: Option<usize>,
    /// Job the event is about
    pub job: JobId,
    /// Trace category of the job
    pub job_type: Option<JobType>,
    /// Trace id of the job
    pub label: Option<u64>,
    /// Event kind
    pub kind: TraceKind,
}

#[derive(Serialize)]
struct ChromeArgs {
    id: u64,
    job: u64,
}

#[derive(Serialize)]
struct ChromeEvent<'a> {
    cat: &'a str,
    pid: u32,
    tid: usize,
    ts: u64,
    dur: u64,
    ph: &'static str,
    name: String,
    args: ChromeArgs,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChromeTrace<'a> {
    trace_events: Vec<ChromeEvent<'a>>,
    display_time_unit: &'static str,
}

/// Execution event log shared by all workers
pub struct ExecutionTrace {
    enabled: AtomicBool,
    epoch: Instant,
    threads: Vec<Mutex<Vec<TraceEvent>>>,
    external: Mutex<Vec<TraceEvent>>,
    type_names: RwLock<FxHashMap<JobType, String>>,
}

impl ExecutionTrace {
    /// Create a trace with one buffer per worker
    pub fn new(thread_count: usize, enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            epoch: Instant::now(),
            threads: (0..thread_count).map(|_| Mutex::new(Vec::new())).collect(),
            external: Mutex::new(Vec::new()),
            type_names: RwLock::new(FxHashMap::default()),
        }
    }

    /// Start recording
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    /// Stop recording (recorded events are kept)
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Whether events are being recorded
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Time since the trace was created
    pub fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Display name for a job type in exported traces
    pub fn set_type_name(&self, job_type: JobType, name: impl Into<String>) {
        self.type_names.write().insert(job_type, name.into());
    }

    /// Append an event to the buffer of `event.thread`
    pub fn record(&self, event: TraceEvent) {
        if !self.is_enabled() {
            return;
        }
        match event.thread.and_then(|index| self.threads.get(index)) {
            Some(buffer) => buffer.lock().push(event),
            None => self.external.lock().push(event),
        }
    }

    /// All recorded events, ordered by start time
    pub fn events(&self) -> Vec<TraceEvent> {
        let mut events: Vec<TraceEvent> = self
            .threads
            .iter()
            .chain(std::iter::once(&self.external))
            .flat_map(|buffer| buffer.lock().clone())
            .collect();
        events.sort_by_key(|event| (event.start, event.job));
        events
    }

    /// Number of recorded events
    pub fn len(&self) -> usize {
        self.threads
            .iter()
            .chain(std::iter::once(&self.external))
            .map(|buffer| buffer.lock().len())
            .sum()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every recorded event
    pub fn clear(&self) {
        for buffer in self.threads.iter().chain(std::iter::once(&self.external)) {
            buffer.lock().clear();
        }
    }

    /// Render the trace as a Chrome tracing document
    pub fn chrome_trace(&self) -> serde_json::Value {
        let type_names = self.type_names.read();
        let external_tid = self.threads.len();
        let events = self.events();

        let trace_events = events
            .iter()
            .map(|event| {
                let name = match event.job_type {
                    Some(job_type) => type_names
                        .get(&job_type)
                        .cloned()
                        .unwrap_or_else(|| format!("type {}", job_type.0)),
                    None => "job".to_string(),
                };
                ChromeEvent {
                    cat: event.kind.category(),
                    pid: 0,
                    tid: event.thread.unwrap_or(external_tid),
                    ts: event.start.as_micros() as u64,
                    dur: event.end.saturating_sub(event.start).as_micros() as u64,
                    ph: "X",
                    name,
                    args: ChromeArgs {
                        id: event.label.unwrap_or_else(|| event.job.as_u64()),
                        job: event.job.as_u64(),
                    },
                }
            })
            .collect();

        serde_json::to_value(ChromeTrace {
            trace_events,
            display_time_unit: "ms",
        })
        .unwrap_or(serde_json::Value::Null)
    }

    /// Write the Chrome trace to `path`, then clear the buffers
    pub fn save(&self, path: &Path) -> JobResult<()> {
        let document = self.chrome_trace();
        let text = serde_json::to_string_pretty(&document)
            .map_err(|e| crate::JobError::Io(e.to_string()))?;
        fs::write(path, text)?;
        debug!(path = %path.display(), "execution trace saved");
        self.clear();
        Ok(())
    }
}

impl std::fmt::Debug for ExecutionTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionTrace")
            .field("enabled", &self.is_enabled())
            .field("events", &self.len())
            .finish()
    }
}
