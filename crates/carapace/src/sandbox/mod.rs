//! Workspace sandbox: path containment for a single root directory.
//!
//! Every path an operation touches goes through [`WorkspaceSandbox::resolve`],
//! which returns an absolute, canonical path inside the root or a
//! [`SandboxViolation`]. Checks run in this order:
//!
//! 1. UNC and extended-length forms are rejected outright.
//! 2. Drive-qualified candidates must name the root's drive; other candidates
//!    are absolute as given or taken relative to the root.
//! 3. `.`/`..` are collapsed lexically, then the deepest existing ancestor is
//!    canonicalized and the remaining segments appended.
//! 4. The canonical result must have the canonical root as a component-wise
//!    prefix.
//! 5. No existing ancestor between the path and the root may be a re-parse
//!    point, since steps 1-4 cannot see through one.
//!
//! Nothing is cached: the filesystem can change between calls.

mod path;
mod probe;

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

pub use probe::{NativeProbe, ReparseProbe};

/// Why a path was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViolationReason {
    /// The workspace root could not be found or canonicalized.
    RootUnavailable,
    /// The workspace root exists but is not a directory.
    RootNotDirectory,
    /// Leading double separator: UNC share, device, or `\\?\` path.
    UncOrLongPath,
    /// Absolute path on a different drive than the root.
    CrossDrive,
    /// Drive-qualified but not anchored (`C:foo`).
    DriveRelative,
    /// The path is not representable as UTF-8 text.
    NotUtf8,
    /// The canonical path lies outside the root.
    EscapesWorkspace,
    /// An ancestor is a symlink, junction, or mount point.
    ReparsePoint,
    /// Ancestor metadata could not be read, so re-parse points could not be
    /// ruled out.
    ReparseUndetermined,
    /// Canonicalization failed for a reason other than absence.
    Unresolvable,
}

impl ViolationReason {
    /// Human-readable reason text.
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationReason::RootUnavailable => "Workspace root does not exist",
            ViolationReason::RootNotDirectory => "Workspace root is not a directory",
            ViolationReason::UncOrLongPath => "UNC/long paths are not allowed",
            ViolationReason::CrossDrive => "Cross-drive absolute paths are not allowed",
            ViolationReason::DriveRelative => "Drive-relative paths are not allowed",
            ViolationReason::NotUtf8 => "Path is not valid UTF-8",
            ViolationReason::EscapesWorkspace => "Path escapes workspace",
            ViolationReason::ReparsePoint => "Reparse point is not allowed",
            ViolationReason::ReparseUndetermined => "Unable to check path for reparse points",
            ViolationReason::Unresolvable => "Path cannot be resolved",
        }
    }
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected path, with the reason and the offending string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{reason}: {path}")]
pub struct SandboxViolation {
    /// Why the path was rejected.
    pub reason: ViolationReason,
    /// The offending path as text.
    pub path: String,
}

impl SandboxViolation {
    fn new(reason: ViolationReason, path: impl Into<String>) -> Self {
        Self {
            reason,
            path: path.into(),
        }
    }

    fn at(reason: ViolationReason, path: &Path) -> Self {
        Self::new(reason, path.display().to_string())
    }
}

/// An absolute, canonical path known to lie inside the workspace root.
///
/// Only [`WorkspaceSandbox::resolve`] constructs these. The value is a
/// snapshot: it says nothing about the filesystem after it was produced.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResolvedPath(PathBuf);

impl ResolvedPath {
    /// Borrow as a `Path`.
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Take ownership of the inner path.
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl std::ops::Deref for ResolvedPath {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

/// Path containment for one canonical workspace root.
#[derive(Clone)]
pub struct WorkspaceSandbox {
    root: PathBuf,
    case_insensitive: bool,
    probe: Arc<dyn ReparseProbe>,
}

impl fmt::Debug for WorkspaceSandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceSandbox")
            .field("root", &self.root)
            .field("case_insensitive", &self.case_insensitive)
            .field("probe", &self.probe)
            .finish()
    }
}

impl WorkspaceSandbox {
    /// Bind a sandbox to `root`, which must be an existing directory.
    pub fn create(root: impl AsRef<Path>) -> Result<Self, SandboxViolation> {
        Self::with_probe(root, Arc::new(NativeProbe))
    }

    /// Bind a sandbox using a custom re-parse point probe.
    pub fn with_probe(
        root: impl AsRef<Path>,
        probe: Arc<dyn ReparseProbe>,
    ) -> Result<Self, SandboxViolation> {
        let root = root.as_ref();
        let canonical = fs::canonicalize(root)
            .map_err(|_| SandboxViolation::at(ViolationReason::RootUnavailable, root))?;
        if !canonical.is_dir() {
            return Err(SandboxViolation::at(
                ViolationReason::RootNotDirectory,
                &canonical,
            ));
        }
        Ok(Self {
            root: canonical,
            case_insensitive: path::case_insensitive_default(),
            probe,
        })
    }

    /// The canonical workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a caller-supplied path string to a contained, canonical path.
    pub fn resolve(&self, candidate: &str) -> Result<ResolvedPath, SandboxViolation> {
        let resolved = self.resolve_inner(candidate);
        if let Err(violation) = &resolved {
            tracing::warn!(
                candidate = %candidate,
                reason = %violation.reason,
                path = %violation.path,
                "sandbox violation"
            );
        }
        resolved
    }

    /// Resolve a path derived from an already-resolved one (archive members,
    /// sibling archives) through the same checks.
    pub fn resolve_path(&self, candidate: &Path) -> Result<ResolvedPath, SandboxViolation> {
        let text = candidate
            .to_str()
            .ok_or_else(|| SandboxViolation::at(ViolationReason::NotUtf8, candidate))?;
        self.resolve(text)
    }

    /// Whether `path` is, lexically, the root or inside it.
    pub fn contains(&self, path: &Path) -> bool {
        path::starts_with(path, &self.root, self.case_insensitive)
    }

    /// Ask the sandbox's probe about a single path, without following it.
    pub(crate) fn is_reparse_point(&self, path: &Path) -> io::Result<bool> {
        self.probe.is_reparse_point(path)
    }

    fn resolve_inner(&self, candidate: &str) -> Result<ResolvedPath, SandboxViolation> {
        if path::is_unc_or_long(candidate) {
            return Err(SandboxViolation::new(
                ViolationReason::UncOrLongPath,
                candidate,
            ));
        }

        let normalized = path::normalize_separators(candidate);
        let target = match path::drive_letter(&normalized) {
            Some(drive) => {
                if path::path_drive(&self.root) != Some(drive) {
                    return Err(SandboxViolation::new(ViolationReason::CrossDrive, candidate));
                }
                if !path::is_drive_absolute(&normalized) {
                    return Err(SandboxViolation::new(
                        ViolationReason::DriveRelative,
                        candidate,
                    ));
                }
                PathBuf::from(normalized)
            }
            None if Path::new(&normalized).is_absolute() => PathBuf::from(normalized),
            None => self.root.join(normalized),
        };

        let lexical = path::lexical_normalize(&target);
        let canonical = canonicalize_lenient(&lexical)
            .map_err(|_| SandboxViolation::at(ViolationReason::Unresolvable, &lexical))?;

        if !self.contains(&canonical) {
            return Err(SandboxViolation::new(
                ViolationReason::EscapesWorkspace,
                candidate,
            ));
        }

        self.reject_reparse_points(&lexical)?;
        Ok(ResolvedPath(canonical))
    }

    /// Walk existing ancestors of `lexical` up to and including the root.
    fn reject_reparse_points(&self, lexical: &Path) -> Result<(), SandboxViolation> {
        for ancestor in lexical.ancestors() {
            match self.probe.is_reparse_point(ancestor) {
                Ok(true) => {
                    return Err(SandboxViolation::at(ViolationReason::ReparsePoint, ancestor));
                }
                Ok(false) => {}
                Err(e) if is_absent(&e) => continue,
                Err(_) => {
                    return Err(SandboxViolation::at(
                        ViolationReason::ReparseUndetermined,
                        ancestor,
                    ));
                }
            }
            if self.is_root(ancestor) {
                break;
            }
        }
        Ok(())
    }

    fn is_root(&self, path: &Path) -> bool {
        path::same_path(path, &self.root, self.case_insensitive)
            || fs::canonicalize(path)
                .is_ok_and(|c| path::same_path(&c, &self.root, self.case_insensitive))
    }
}

fn is_absent(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// Canonicalize the deepest existing ancestor and re-append the rest.
///
/// `path` must already be lexically normalized, so the appended segments are
/// plain names.
fn canonicalize_lenient(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path;
    let mut missing: Vec<OsString> = Vec::new();
    loop {
        match fs::canonicalize(existing) {
            Ok(mut base) => {
                for part in missing.iter().rev() {
                    base.push(part);
                }
                return Ok(base);
            }
            Err(e) if is_absent(&e) => match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    missing.push(name.to_os_string());
                    existing = parent;
                }
                _ => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}
