//! One sandbox and one audit sink bound to one root.
//!
//! A [`Workspace`] is the unit callers hold on to. It is never re-pointed at
//! another root; build a new one instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::audit::{AuditError, AuditLog, AuditSink};
use crate::executor::{BatchAborted, OperationExecutor};
use crate::limits::Limits;
use crate::operation::{Operation, OperationResult};
use crate::sandbox::{NativeProbe, ReparseProbe, SandboxViolation, WorkspaceSandbox};
use crate::validator::{self, ValidationError};

/// Directory under the root that holds the audit log by default.
pub const DEFAULT_AUDIT_DIR: &str = "logs";

/// Errors from building or driving a [`Workspace`].
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The root is unusable
    #[error(transparent)]
    Sandbox(#[from] SandboxViolation),
    /// The audit log could not be opened
    #[error(transparent)]
    Audit(#[from] AuditError),
    /// The request was rejected before anything ran
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// An audit write failed mid-batch
    #[error(transparent)]
    Aborted(#[from] BatchAborted),
}

/// A bound workspace root with its audit trail.
#[derive(Debug, Clone)]
pub struct Workspace {
    executor: OperationExecutor,
    audit_log_path: Option<PathBuf>,
}

impl Workspace {
    /// Start configuring a workspace rooted at `root`.
    pub fn builder(root: impl AsRef<Path>) -> WorkspaceBuilder {
        WorkspaceBuilder::new(root)
    }

    /// Bind `root` with default settings.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        Self::builder(root).build()
    }

    /// The canonical root.
    pub fn root(&self) -> &Path {
        self.executor.sandbox().root()
    }

    /// The sandbox used for every path.
    pub fn sandbox(&self) -> &WorkspaceSandbox {
        self.executor.sandbox()
    }

    /// Location of the JSONL audit file, when the built-in log is in use.
    pub fn audit_log_path(&self) -> Option<&Path> {
        self.audit_log_path.as_deref()
    }

    /// Run already-validated operations.
    pub fn execute(&self, operations: &[Operation]) -> Result<Vec<OperationResult>, BatchAborted> {
        self.executor.execute(operations)
    }

    /// Validate a request document and run it.
    ///
    /// Nothing touches the filesystem if validation fails.
    pub fn apply(&self, request: &str) -> Result<Vec<OperationResult>, WorkspaceError> {
        let operations = validator::parse_operations(request)?;
        Ok(self.execute(&operations)?)
    }
}

/// Builder for [`Workspace`].
pub struct WorkspaceBuilder {
    root: PathBuf,
    audit_dir: Option<PathBuf>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    limits: Limits,
    probe: Option<Arc<dyn ReparseProbe>>,
}

impl std::fmt::Debug for WorkspaceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceBuilder")
            .field("root", &self.root)
            .field("audit_dir", &self.audit_dir)
            .field("has_audit_sink", &self.audit_sink.is_some())
            .field("limits", &self.limits)
            .field("has_probe", &self.probe.is_some())
            .finish()
    }
}

impl WorkspaceBuilder {
    /// Create a builder for `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            audit_dir: None,
            audit_sink: None,
            limits: Limits::default(),
            probe: None,
        }
    }

    /// Write the audit log under `dir` instead of `<root>/logs`.
    pub fn audit_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.audit_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Send audit entries to a custom sink. Overrides [`audit_dir`](Self::audit_dir).
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// Set archive extraction limits.
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Replace the platform re-parse point probe.
    pub fn reparse_probe(mut self, probe: Arc<dyn ReparseProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Validate the root and open the audit log.
    pub fn build(self) -> Result<Workspace, WorkspaceError> {
        let probe = self.probe.unwrap_or_else(|| Arc::new(NativeProbe));
        let sandbox = WorkspaceSandbox::with_probe(&self.root, probe)?;

        let (sink, audit_log_path): (Arc<dyn AuditSink>, _) = match self.audit_sink {
            Some(sink) => (sink, None),
            None => {
                let dir = self
                    .audit_dir
                    .unwrap_or_else(|| sandbox.root().join(DEFAULT_AUDIT_DIR));
                let log = AuditLog::open(dir)?;
                let path = log.log_path().to_path_buf();
                (Arc::new(log), Some(path))
            }
        };

        tracing::debug!(root = %sandbox.root().display(), "workspace bound");
        Ok(Workspace {
            executor: OperationExecutor::new(sandbox, sink).with_limits(self.limits),
            audit_log_path,
        })
    }
}
