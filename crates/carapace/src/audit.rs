//! Append-only audit trail.
//!
//! One [`AuditEntry`] per executed operation, serialized as one JSON object
//! per line. [`AuditLog`] is the file backend; anything else that can persist
//! entries implements [`AuditSink`].

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operation::OperationStatus;

/// File name of the JSONL log inside the audit directory.
pub const AUDIT_FILE_NAME: &str = "audit.log.jsonl";

/// Errors from persisting or reading audit entries.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The audit directory or file could not be created or written.
    #[error("audit log I/O error at {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// An entry could not be encoded or decoded.
    #[error("audit entry serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One immutable record describing one executed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Operation kind, e.g. `"write"`.
    pub action: String,
    /// The operation's subject path as submitted.
    #[serde(default)]
    pub path: Option<String>,
    /// `"ok"` or `"failed"`.
    pub status: OperationStatus,
    /// Wall-clock time spent on the operation.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Failure text, for failed operations.
    #[serde(default)]
    pub error: Option<String>,
    /// Free-form context; the executor stores the full operation here.
    #[serde(default)]
    pub details: serde_json::Value,
}

impl AuditEntry {
    /// Start an entry stamped with the current time.
    pub fn new(action: impl Into<String>, status: OperationStatus) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            path: None,
            status,
            duration_ms: None,
            error: None,
            details: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Set the subject path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the duration.
    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    /// Set the failure text.
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Set the details object.
    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Destination for audit entries.
///
/// An `Err` from [`append`](AuditSink::append) means the entry was not
/// persisted; the executor stops the batch when that happens.
pub trait AuditSink: Send + Sync + fmt::Debug {
    /// Persist one entry.
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

impl AuditSink for Arc<dyn AuditSink> {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        (**self).append(entry)
    }
}

/// JSONL audit log in a directory.
///
/// The file is opened in append mode for every entry, so external rotation or
/// deletion between batches is tolerated. Each line goes out in a single
/// `write_all`.
#[derive(Debug)]
pub struct AuditLog {
    log_path: PathBuf,
    lock: Mutex<()>,
}

impl AuditLog {
    /// Open (creating if needed) the audit directory `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, AuditError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| AuditError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            log_path: dir.join(AUDIT_FILE_NAME),
            lock: Mutex::new(()),
        })
    }

    /// Location of the JSONL file.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Convenience wrapper building and appending an entry in one call.
    pub fn record(
        &self,
        action: &str,
        path: Option<&str>,
        status: OperationStatus,
        duration_ms: Option<u64>,
        error: Option<&str>,
        details: serde_json::Value,
    ) -> Result<(), AuditError> {
        let mut entry = AuditEntry::new(action, status).details(details);
        entry.path = path.map(str::to_string);
        entry.duration_ms = duration_ms;
        entry.error = error.map(str::to_string);
        self.append(&entry)
    }

    /// Read every entry back, oldest first. A missing file yields no entries.
    pub fn entries(&self) -> Result<Vec<AuditEntry>, AuditError> {
        let file = match fs::File::open(&self.log_path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(AuditError::Io {
                    path: self.log_path.clone(),
                    source,
                });
            }
        };
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| AuditError::Io {
                path: self.log_path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }

    fn io_error(&self, source: io::Error) -> AuditError {
        AuditError::Io {
            path: self.log_path.clone(),
            source,
        }
    }
}

impl AuditSink for AuditLog {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        // The lock guards no data, so a poisoned one is still usable.
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| self.io_error(e))?;
        file.write_all(&line).map_err(|e| self.io_error(e))?;
        file.flush().map_err(|e| self.io_error(e))?;
        Ok(())
    }
}
