//! Carapace: sandboxed, audited workspace file operations
//!
//! Carapace takes batches of file operations proposed by an untrusted
//! source (typically a language model), and runs them against a single
//! workspace directory:
//!
//! - [`validator`] turns a JSON request into a closed set of typed
//!   [`Operation`]s, or rejects the whole request.
//! - [`WorkspaceSandbox`] maps every path onto the workspace root and refuses
//!   anything that would escape it.
//! - [`OperationExecutor`] runs operations in order, isolating failures.
//! - [`AuditLog`] records one JSONL entry per executed operation.
//!
//! [`Workspace`] bundles all of this for one root.
//!
//! ```no_run
//! use carapace::Workspace;
//!
//! let workspace = Workspace::open("/srv/ws")?;
//! let results = workspace.apply(
//!     r#"{"operations": [{"type": "mkdir", "path": "docs"}]}"#,
//! )?;
//! assert!(results[0].is_ok());
//! # Ok::<(), carapace::WorkspaceError>(())
//! ```

mod audit;
mod executor;
mod limits;
mod operation;
mod sandbox;
mod workspace;

pub mod validator;

pub use audit::{AUDIT_FILE_NAME, AuditEntry, AuditError, AuditLog, AuditSink};
pub use executor::{BatchAborted, OperationError, OperationExecutor};
pub use limits::Limits;
pub use operation::{
    Operation, OperationResult, OperationStatus, Risk, WriteMode, has_dangerous,
};
pub use sandbox::{
    NativeProbe, ReparseProbe, ResolvedPath, SandboxViolation, ViolationReason, WorkspaceSandbox,
};
pub use validator::{ValidationError, extract_operations, parse_envelope, parse_operations};
pub use workspace::{DEFAULT_AUDIT_DIR, Workspace, WorkspaceBuilder, WorkspaceError};
