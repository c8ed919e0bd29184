//! Durable, append-only test history.
//!
//! Records are stored as JSON lines after a versioned header line. Readers work
//! on an immutable snapshot; `append` and `reset_all` serialize on one writer
//! lock so a reset never interleaves with an append.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::scoring::{HistoryStats, TestOutcome, WrongAnswer};

/// File name used inside the data directory.
pub const HISTORY_FILE: &str = "history.jsonl";

const HISTORY_FORMAT: &str = "gifttest-history";
const HISTORY_VERSION: u32 = 1;

/// One finished test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Bank the test was drawn from.
    pub source: String,
    pub categories: Vec<String>,
    pub outcome: TestOutcome,
    pub total_asked: usize,
    pub correct: usize,
    pub wrong: usize,
    pub percentage: f64,
    #[serde(default)]
    pub wrong_details: Vec<WrongAnswer>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    format: String,
    version: u32,
}

impl Header {
    fn current() -> Self {
        Self {
            format: HISTORY_FORMAT.to_string(),
            version: HISTORY_VERSION,
        }
    }
}

/// Proof that a reset was requested. Consumed by [`HistoryStore::reset_all`].
///
/// Only the newest token of a store is accepted, and only once.
#[derive(Debug)]
#[must_use = "a reset token does nothing until passed to reset_all"]
pub struct ResetToken {
    store: Uuid,
    generation: u64,
}

#[derive(Debug, Default)]
struct WriterState {
    reset_generation: u64,
    pending_reset: bool,
}

#[derive(Debug)]
pub struct HistoryStore {
    id: Uuid,
    path: Option<PathBuf>,
    snapshot: RwLock<Arc<Vec<HistoryRecord>>>,
    writer: Mutex<WriterState>,
}

impl HistoryStore {
    /// Open a history file. A missing file is an empty history.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(content) => parse_history(&path, &content)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(PersistenceError::io(&path, e)),
        };
        tracing::debug!(path = %path.display(), records = records.len(), "history loaded");

        Ok(Self::with_records(Some(path), records))
    }

    /// A store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self::with_records(None, Vec::new())
    }

    fn with_records(path: Option<PathBuf>, records: Vec<HistoryRecord>) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            snapshot: RwLock::new(Arc::new(records)),
            writer: Mutex::new(WriterState::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Append one record.
    ///
    /// The record joins the in-memory history even when writing it out fails;
    /// the error is still returned so the caller can report it.
    pub fn append(&self, record: HistoryRecord) -> Result<(), PersistenceError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let written = match &self.path {
            Some(path) => append_line(path, &record),
            None => Ok(()),
        };

        {
            let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
            Arc::make_mut(&mut snapshot).push(record);
        }

        match &written {
            Ok(()) => tracing::info!("history record appended"),
            Err(e) => tracing::warn!("failed to persist history record: {e}"),
        }
        written
    }

    /// Every record, newest first. Records with equal timestamps keep the most
    /// recently appended first.
    pub fn list(&self) -> Vec<HistoryRecord> {
        let mut records: Vec<HistoryRecord> = self.snapshot().iter().rev().cloned().collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records
    }

    /// Up to `limit` newest records, optionally only those from `source`.
    pub fn recent(&self, limit: usize, source: Option<&str>) -> Vec<HistoryRecord> {
        self.list()
            .into_iter()
            .filter(|r| source.is_none_or(|s| r.source == s))
            .take(limit)
            .collect()
    }

    pub fn stats(&self, source: Option<&str>) -> HistoryStats {
        HistoryStats::from_records(self.snapshot().iter(), source)
    }

    /// First step of a reset. Any earlier token stops being valid.
    pub fn request_reset(&self) -> ResetToken {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.reset_generation += 1;
        writer.pending_reset = true;
        ResetToken {
            store: self.id,
            generation: writer.reset_generation,
        }
    }

    /// Delete all history. The file is rewritten atomically with only the header.
    pub fn reset_all(&self, token: ResetToken) -> Result<(), PersistenceError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if token.store != self.id
            || token.generation != writer.reset_generation
            || !writer.pending_reset
        {
            return Err(PersistenceError::StaleResetToken);
        }
        writer.pending_reset = false;

        if let Some(path) = &self.path {
            rewrite_empty(path)?;
        }
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(Vec::new());

        tracing::info!("history reset");
        Ok(())
    }

    fn snapshot(&self) -> Arc<Vec<HistoryRecord>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn parse_history(path: &Path, content: &str) -> Result<Vec<HistoryRecord>, PersistenceError> {
    let mut lines = content.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());

    let Some((_, first)) = lines.next() else {
        return Ok(Vec::new());
    };
    let header: Header = serde_json::from_str(first).map_err(|_| PersistenceError::Version {
        what: "history",
        found: 0,
        expected: HISTORY_VERSION,
    })?;
    if header.format != HISTORY_FORMAT || header.version != HISTORY_VERSION {
        return Err(PersistenceError::Version {
            what: "history",
            found: header.version,
            expected: HISTORY_VERSION,
        });
    }

    let mut records = Vec::new();
    for (idx, line) in lines {
        match serde_json::from_str::<HistoryRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), line = idx + 1, "skipping unreadable history line: {e}");
            }
        }
    }
    Ok(records)
}

fn append_line(path: &Path, record: &HistoryRecord) -> Result<(), PersistenceError> {
    let mut line = serde_json::to_string(record).map_err(|source| PersistenceError::Encode {
        what: "history record",
        source,
    })?;
    line.push('\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
    }

    let needs_header = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| PersistenceError::io(path, e))?;

    if needs_header {
        line.insert_str(0, &header_line()?);
    }
    file.write_all(line.as_bytes())
        .map_err(|e| PersistenceError::io(path, e))
}

fn rewrite_empty(path: &Path) -> Result<(), PersistenceError> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => dir,
        None => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| PersistenceError::io(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| PersistenceError::io(dir, e))?;
    tmp.write_all(header_line()?.as_bytes())
        .map_err(|e| PersistenceError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| PersistenceError::io(path, e.error))?;
    Ok(())
}

fn header_line() -> Result<String, PersistenceError> {
    let mut header =
        serde_json::to_string(&Header::current()).map_err(|source| PersistenceError::Encode {
            what: "history header",
            source,
        })?;
    header.push('\n');
    Ok(header)
}
