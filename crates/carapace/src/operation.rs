//! Typed workspace operations and their per-operation results.
//!
//! An [`Operation`] is only ever constructed by the validator, so every value
//! of this type carries exactly the fields its kind allows. Dispatch over the
//! kinds is an exhaustive `match`; there is no string-keyed lookup anywhere
//! downstream of validation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a `write` operation treats an existing target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Replace the file content entirely.
    Overwrite,
    /// Add to the end of the file, creating it if absent.
    Append,
    /// Write a new file; fail if the target already exists.
    Create,
}

impl WriteMode {
    /// Parse the wire spelling of a mode.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "overwrite" => Some(WriteMode::Overwrite),
            "append" => Some(WriteMode::Append),
            "create" => Some(WriteMode::Create),
            _ => None,
        }
    }

    /// The wire spelling of this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Overwrite => "overwrite",
            WriteMode::Append => "append",
            WriteMode::Create => "create",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single validated filesystem action.
///
/// Paths are kept as the caller supplied them; they are resolved against the
/// sandbox at execution time, never earlier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    /// Read a file as text and discard the content.
    Read {
        /// Target file.
        path: String,
    },
    /// Write text to a file.
    Write {
        /// Target file.
        path: String,
        /// Text to write.
        content: String,
        /// How an existing target is treated.
        mode: WriteMode,
    },
    /// Relocate a file or directory.
    Move {
        /// Source path.
        src: String,
        /// Destination path.
        dst: String,
    },
    /// Copy a file or a directory tree.
    Copy {
        /// Source path.
        src: String,
        /// Destination path.
        dst: String,
    },
    /// Create a directory and any missing parents.
    Mkdir {
        /// Directory to create.
        path: String,
    },
    /// Remove a file or a directory tree.
    Delete {
        /// Target path.
        path: String,
    },
    /// Archive a file or directory into a sibling `.zip`.
    Zip {
        /// File or directory to archive.
        path: String,
    },
    /// Extract an archive into a sibling directory.
    Unzip {
        /// Archive to extract.
        path: String,
    },
}

/// How much care an operation deserves before it is run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    /// Additive or read-only.
    Low,
    /// Replaces or relocates existing data.
    Caution,
    /// Removes data.
    Destructive,
}

impl Operation {
    /// The wire name of this operation's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Read { .. } => "read",
            Operation::Write { .. } => "write",
            Operation::Move { .. } => "move",
            Operation::Copy { .. } => "copy",
            Operation::Mkdir { .. } => "mkdir",
            Operation::Delete { .. } => "delete",
            Operation::Zip { .. } => "zip",
            Operation::Unzip { .. } => "unzip",
        }
    }

    /// Every path-like field, in declaration order.
    pub fn paths(&self) -> Vec<&str> {
        match self {
            Operation::Read { path }
            | Operation::Write { path, .. }
            | Operation::Mkdir { path }
            | Operation::Delete { path }
            | Operation::Zip { path }
            | Operation::Unzip { path } => vec![path.as_str()],
            Operation::Move { src, dst } | Operation::Copy { src, dst } => {
                vec![src.as_str(), dst.as_str()]
            }
        }
    }

    /// The path an audit entry is filed under: `path` if present, else `dst`.
    pub fn subject(&self) -> &str {
        match self {
            Operation::Read { path }
            | Operation::Write { path, .. }
            | Operation::Mkdir { path }
            | Operation::Delete { path }
            | Operation::Zip { path }
            | Operation::Unzip { path } => path,
            Operation::Move { dst, .. } | Operation::Copy { dst, .. } => dst,
        }
    }

    /// Graded risk of running this operation.
    pub fn risk(&self) -> Risk {
        match self {
            Operation::Delete { .. } => Risk::Destructive,
            Operation::Move { .. }
            | Operation::Write {
                mode: WriteMode::Overwrite,
                ..
            } => Risk::Caution,
            _ => Risk::Low,
        }
    }

    /// Whether a human should confirm this operation before it runs.
    ///
    /// True for `delete`, `move`, and `write` with `mode = overwrite`. The
    /// executor never consults this; gating is the caller's job.
    pub fn is_dangerous(&self) -> bool {
        self.risk() != Risk::Low
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Write { path, mode, .. } => write!(f, "write({mode}) {path}"),
            Operation::Move { src, dst } | Operation::Copy { src, dst } => {
                write!(f, "{} {} -> {}", self.kind(), src, dst)
            }
            other => write!(f, "{} {}", other.kind(), other.subject()),
        }
    }
}

/// Whether any operation in the batch is dangerous.
pub fn has_dangerous(operations: &[Operation]) -> bool {
    operations.iter().any(Operation::is_dangerous)
}

/// Outcome of one executed operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// The side effect completed.
    Ok,
    /// The operation was rejected or its side effect failed.
    Failed,
}

impl OperationStatus {
    /// The wire spelling of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Ok => "ok",
            OperationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const SUMMARY_LIMIT: usize = 120;

/// An executed operation paired with its outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    /// The operation as it was submitted.
    pub operation: Operation,
    /// Whether it succeeded.
    pub status: OperationStatus,
    /// Failure detail, present only when `status` is `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    /// A successful result.
    pub fn ok(operation: Operation) -> Self {
        Self {
            operation,
            status: OperationStatus::Ok,
            error: None,
        }
    }

    /// A failed result with a human-readable message.
    pub fn failed(operation: Operation, error: impl Into<String>) -> Self {
        Self {
            operation,
            status: OperationStatus::Failed,
            error: Some(error.into()),
        }
    }

    /// Returns true if the operation succeeded.
    pub fn is_ok(&self) -> bool {
        self.status == OperationStatus::Ok
    }

    /// The error flattened to one line and cut to a displayable length.
    pub fn error_summary(&self) -> String {
        let Some(error) = &self.error else {
            return String::new();
        };
        let line = error.replace(['\r', '\n'], " ");
        let line = line.trim();
        if line.chars().count() > SUMMARY_LIMIT {
            let cut: String = line.chars().take(SUMMARY_LIMIT - 3).collect();
            format!("{cut}...")
        } else {
            line.to_string()
        }
    }
}
