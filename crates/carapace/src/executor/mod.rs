//! Operation executor: runs a validated batch against one sandbox.
//!
//! Operations run strictly in order. A failure is captured in that
//! operation's [`OperationResult`] and the batch continues. Every operation,
//! failed or not, gets exactly one audit entry; if the audit sink refuses an
//! entry the batch stops with [`BatchAborted`].

mod archive;
mod fs_ops;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use thiserror::Error;

use crate::audit::{AuditEntry, AuditError, AuditSink};
use crate::limits::Limits;
use crate::operation::{Operation, OperationResult};
use crate::sandbox::{SandboxViolation, WorkspaceSandbox};

/// Why a single operation failed.
#[derive(Debug, Error)]
pub enum OperationError {
    /// A path was rejected by the sandbox
    #[error(transparent)]
    Sandbox(#[from] SandboxViolation),
    /// Filesystem error
    #[error("{context} {path}: {source}")]
    Io {
        /// What was being attempted, e.g. "cannot read"
        context: &'static str,
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// `create` mode found an existing target
    #[error("file exists: {0}")]
    AlreadyExists(PathBuf),
    /// The source of the operation does not exist
    #[error("file not found: {0}")]
    NotFound(PathBuf),
    /// The workspace root itself was targeted
    #[error("refusing to {0} the workspace root")]
    WorkspaceRoot(&'static str),
    /// A directory would be copied or moved into itself
    #[error("cannot place {src} inside itself at {dst}")]
    IntoItself {
        /// Source directory
        src: PathBuf,
        /// Destination inside it
        dst: PathBuf,
    },
    /// Source and destination name the same file
    #[error("{0} is the same file as its copy target")]
    SameFile(PathBuf),
    /// A symlink or junction was found while walking a source tree
    #[error("reparse point is not allowed in source tree: {0}")]
    ReparseInTree(PathBuf),
    /// Directory traversal error
    #[error("traversal error: {0}")]
    Walk(#[from] walkdir::Error),
    /// Archive read or write error
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    /// Archive entry name would land outside the extraction directory
    #[error("archive entry has an unsafe name: {0}")]
    UnsafeEntry(String),
    /// Archive entry is a symbolic link
    #[error("archive entry is a symbolic link: {0}")]
    SymlinkEntry(String),
    /// Extraction quota exceeded
    #[error("archive exceeds {what} limit of {limit}")]
    Quota {
        /// Which limit tripped
        what: &'static str,
        /// Configured value
        limit: u64,
    },
}

impl OperationError {
    /// Map an `io::Error` for `path`, turning `NotFound` into [`OperationError::NotFound`].
    pub(crate) fn io(
        context: &'static str,
        path: impl Into<PathBuf>,
    ) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| match source.kind() {
            io::ErrorKind::NotFound => OperationError::NotFound(path),
            _ => OperationError::Io {
                context,
                path,
                source,
            },
        }
    }
}

/// The audit sink refused an entry, so the batch stopped.
///
/// `results` holds every operation that ran, including the one at `index`
/// whose entry could not be written; its side effect has already happened.
#[derive(Debug, Error)]
#[error("audit write failed after operation #{index}; batch aborted")]
pub struct BatchAborted {
    /// Position of the operation whose audit entry failed
    pub index: usize,
    /// Results for operations `0..=index`
    pub results: Vec<OperationResult>,
    /// The audit failure
    #[source]
    pub source: AuditError,
}

/// Runs operations against one sandbox, recording each in one audit sink.
#[derive(Debug, Clone)]
pub struct OperationExecutor {
    sandbox: WorkspaceSandbox,
    audit: Arc<dyn AuditSink>,
    limits: Limits,
}

impl OperationExecutor {
    /// Create an executor with default [`Limits`].
    pub fn new(sandbox: WorkspaceSandbox, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            sandbox,
            audit,
            limits: Limits::default(),
        }
    }

    /// Replace the archive extraction limits.
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// The sandbox every path is resolved through.
    pub fn sandbox(&self) -> &WorkspaceSandbox {
        &self.sandbox
    }

    /// Execute `operations` in order.
    ///
    /// Returns one result per operation, in input order, unless the audit
    /// sink fails.
    pub fn execute(&self, operations: &[Operation]) -> Result<Vec<OperationResult>, BatchAborted> {
        let mut results = Vec::with_capacity(operations.len());
        for (index, op) in operations.iter().enumerate() {
            let start = Instant::now();
            let outcome = self.run(op);
            let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

            let result = match outcome {
                Ok(()) => {
                    tracing::debug!(
                        index,
                        action = op.kind(),
                        path = op.subject(),
                        duration_ms,
                        "operation ok"
                    );
                    OperationResult::ok(op.clone())
                }
                Err(e) => {
                    tracing::warn!(
                        index,
                        action = op.kind(),
                        path = op.subject(),
                        duration_ms,
                        error = %e,
                        "operation failed"
                    );
                    OperationResult::failed(op.clone(), e.to_string())
                }
            };

            let mut entry = AuditEntry::new(op.kind(), result.status)
                .path(op.subject())
                .duration_ms(duration_ms)
                .details(json!({ "operation": op }));
            entry.error = result.error.clone();
            let audited = self.audit.append(&entry);
            results.push(result);

            if let Err(source) = audited {
                tracing::error!(
                    index,
                    action = op.kind(),
                    path = op.subject(),
                    error = %source,
                    "audit write failed, aborting batch"
                );
                return Err(BatchAborted {
                    index,
                    results,
                    source,
                });
            }
        }
        Ok(results)
    }

    /// Resolve every path field, then perform the side effect.
    fn run(&self, op: &Operation) -> Result<(), OperationError> {
        let sandbox = &self.sandbox;
        match op {
            Operation::Read { path } => fs_ops::read(&sandbox.resolve(path)?),
            Operation::Write {
                path,
                content,
                mode,
            } => fs_ops::write(&sandbox.resolve(path)?, content, *mode),
            Operation::Move { src, dst } => {
                let (src, dst) = (sandbox.resolve(src)?, sandbox.resolve(dst)?);
                fs_ops::move_path(sandbox, &src, &dst)
            }
            Operation::Copy { src, dst } => {
                let (src, dst) = (sandbox.resolve(src)?, sandbox.resolve(dst)?);
                fs_ops::copy(sandbox, &src, &dst)
            }
            Operation::Mkdir { path } => fs_ops::mkdir(&sandbox.resolve(path)?),
            Operation::Delete { path } => fs_ops::delete(sandbox, &sandbox.resolve(path)?),
            Operation::Zip { path } => archive::zip(sandbox, &sandbox.resolve(path)?),
            Operation::Unzip { path } => {
                archive::unzip(sandbox, &sandbox.resolve(path)?, &self.limits)
            }
        }
    }
}
