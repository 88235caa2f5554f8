//! Unrecognized-input records
//!
//! Every unknown detection is handed to a sink so missed phrasings can be
//! reviewed later. Forwarding is best effort: the detector logs and ignores
//! sink errors.

use chrono::Local;
use flume::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("sink queue is full")]
    Full,

    /// Writer thread is gone
    #[error("sink is closed")]
    Closed,
}

/// One line of the unrecognized-input log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnrecognizedRecord {
    pub timestamp: String,
    pub user_input: String,
    /// Closest command id, or "none"
    pub closest_match: String,
    pub confidence: f64,
    pub suggestions: Vec<String>,
}

impl UnrecognizedRecord {
    pub fn new(user_input: &str, closest: Option<&str>, confidence: f64, suggestion: Option<&str>) -> Self {
        Self {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            user_input: user_input.to_string(),
            closest_match: closest.unwrap_or("none").to_string(),
            confidence: (confidence * 100.0).round() / 100.0,
            suggestions: suggestion.map(str::to_string).into_iter().collect(),
        }
    }
}

pub trait UnrecognizedSink: Send {
    fn record(&self, record: UnrecognizedRecord) -> Result<(), SinkError>;
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl UnrecognizedSink for NullSink {
    fn record(&self, _record: UnrecognizedRecord) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps records in memory; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<UnrecognizedRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<UnrecognizedRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl UnrecognizedSink for MemorySink {
    fn record(&self, record: UnrecognizedRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }
}

/// Appends JSON lines from a background writer thread
pub struct JsonlSink {
    path: PathBuf,
    tx: Option<Sender<String>>,
    worker: Option<JoinHandle<()>>,
}

impl JsonlSink {
    /// Open `path` for appending. At most `capacity` records wait in the
    /// queue; beyond that `record` fails with [`SinkError::Full`].
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| SinkError::Open {
                path: path.clone(),
                source,
            })?;

        let (tx, rx) = flume::bounded(capacity.max(1));
        let worker_path = path.clone();
        let worker = std::thread::Builder::new()
            .name("voxmatch-sink".into())
            .spawn(move || run_writer(rx, BufWriter::new(file), &worker_path))
            .map_err(|source| SinkError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UnrecognizedSink for JsonlSink {
    fn record(&self, record: UnrecognizedRecord) -> Result<(), SinkError> {
        let line = serde_json::to_string(&record)?;
        let tx = self.tx.as_ref().ok_or(SinkError::Closed)?;
        tx.try_send(line).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Disconnected(_) => SinkError::Closed,
        })
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        // closing the channel lets the writer drain and exit
        self.tx.take();
        let panicked = self.worker.take().is_some_and(|w| w.join().is_err());
        if panicked {
            warn!(path = %self.path.display(), "sink writer panicked");
        }
    }
}

/// Writes queued lines until every sender is dropped. I/O errors are logged
/// and the line is skipped.
fn run_writer(rx: Receiver<String>, mut writer: BufWriter<File>, path: &Path) {
    let mut written = 0usize;
    for line in rx.iter() {
        let result = writeln!(writer, "{line}").and_then(|_| writer.flush());
        match result {
            Ok(()) => written += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "failed to write unrecognized record"),
        }
    }
    debug!(path = %path.display(), written, "sink writer finished");
}
