/*!
 * Performance Events
 * Per-process sampled-event buffer and its JSON report
 *
 * The buffer is created lazily on a process's first recorded event and
 * serialized next to the core dump during finalize. Capacity is fixed;
 * sampling past it drops events rather than reallocating on a hot path.
 */

use crate::core::errors::{VfsError, VfsResult};
use crate::core::limits::PERF_EVENT_BUFFER_CAPACITY;
use crate::core::types::Pid;
use crate::process::credentials::Credentials;
use crate::process::process::Process;
use crate::vfs::{OpenFlags, Vfs};
use log::info;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerfEventKind {
    Sample,
    ContextSwitch,
    SignalDelivered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerfEvent {
    pub kind: PerfEventKind,
    pub instruction_pointer: u64,
    pub timestamp: i64,
}

pub struct PerfEventBuffer {
    events: Mutex<Vec<PerfEvent>>,
    dropped: AtomicUsize,
}

impl PerfEventBuffer {
    pub fn new() -> PerfEventBuffer {
        PerfEventBuffer {
            events: Mutex::new(Vec::with_capacity(PERF_EVENT_BUFFER_CAPACITY)),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Record one event. Returns whether it was kept.
    pub fn record(&self, kind: PerfEventKind, instruction_pointer: u64, timestamp: i64) -> bool {
        let mut events = self.events.lock();
        if events.len() >= PERF_EVENT_BUFFER_CAPACITY {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        events.push(PerfEvent {
            kind,
            instruction_pointer,
            timestamp,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events dropped after the buffer filled.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Vec<PerfEvent> {
        self.events.lock().clone()
    }
}

impl Default for PerfEventBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct ReportBody {
    pid: Pid,
    name: String,
    dropped: usize,
    events: Vec<PerfEvent>,
}

/// JSON report writer, same shape as the core-dump writer.
pub struct PerfReport {
    process: Arc<Process>,
    vfs: Arc<Vfs>,
    path: String,
}

impl PerfReport {
    pub fn create(process: Arc<Process>, vfs: Arc<Vfs>, path: impl Into<String>) -> PerfReport {
        PerfReport {
            process,
            vfs,
            path: path.into(),
        }
    }

    pub fn write(&self) -> VfsResult<()> {
        let (events, dropped) = match self.process.perf_events() {
            Some(buffer) => (buffer.snapshot(), buffer.dropped()),
            None => (Vec::new(), 0),
        };
        let body = ReportBody {
            pid: self.process.pid(),
            name: self.process.name(),
            dropped,
            events,
        };
        let bytes = serde_json::to_vec_pretty(&body)
            .map_err(|e| VfsError::WriteFailed(e.to_string()))?;

        let file = self.vfs.open(
            &self.path,
            OpenFlags::CREATE | OpenFlags::WRITE | OpenFlags::TRUNCATE,
            0o600,
            &self.vfs.root_directory(),
            &Credentials::root(),
        )?;
        file.write(&bytes)?;

        info!(
            "performance report for pid {} written to {} ({} events)",
            self.process.pid(),
            self.path,
            body.events.len()
        );
        Ok(())
    }
}
