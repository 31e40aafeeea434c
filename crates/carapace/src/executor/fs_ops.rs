//! Plain file and directory operations on resolved paths.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::OperationError;
use crate::operation::WriteMode;
use crate::sandbox::{ResolvedPath, WorkspaceSandbox};

pub(crate) fn read(path: &ResolvedPath) -> Result<(), OperationError> {
    fs::read_to_string(path).map_err(OperationError::io("cannot read", path.as_path()))?;
    Ok(())
}

pub(crate) fn write(
    path: &ResolvedPath,
    content: &str,
    mode: WriteMode,
) -> Result<(), OperationError> {
    ensure_parent(path)?;
    let result = match mode {
        WriteMode::Overwrite => fs::write(path, content),
        WriteMode::Append => OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(content.as_bytes())),
        WriteMode::Create => match OpenOptions::new().write(true).create_new(true).open(path) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(OperationError::AlreadyExists(path.to_path_buf()));
            }
            opened => opened.and_then(|mut file| file.write_all(content.as_bytes())),
        },
    };
    result.map_err(OperationError::io("cannot write", path.as_path()))
}

pub(crate) fn mkdir(path: &ResolvedPath) -> Result<(), OperationError> {
    fs::create_dir_all(path)
        .map_err(OperationError::io("cannot create directory", path.as_path()))
}

/// Remove a file or tree. A missing target is not an error.
pub(crate) fn delete(
    sandbox: &WorkspaceSandbox,
    path: &ResolvedPath,
) -> Result<(), OperationError> {
    reject_root(sandbox, path, "delete")?;
    let meta = match path.symlink_metadata() {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(OperationError::io("cannot delete", path.as_path())(e)),
    };
    let removed = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.map_err(OperationError::io("cannot delete", path.as_path()))
}

/// Relocate `src`. An existing directory at `dst` receives `src` inside it.
pub(crate) fn move_path(
    sandbox: &WorkspaceSandbox,
    src: &ResolvedPath,
    dst: &ResolvedPath,
) -> Result<(), OperationError> {
    reject_root(sandbox, src, "move")?;
    let meta = src
        .symlink_metadata()
        .map_err(OperationError::io("cannot move", src.as_path()))?;
    let target = place_into(src, dst)?;
    if meta.is_dir() && target.starts_with(src) {
        return Err(OperationError::IntoItself {
            src: src.to_path_buf(),
            dst: target,
        });
    }
    ensure_parent(&target)?;

    match fs::rename(src, &target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            let removed = if meta.is_dir() {
                copy_tree(sandbox, src, &target)?;
                fs::remove_dir_all(src)
            } else {
                fs::copy(src, &target)
                    .map_err(OperationError::io("cannot move", src.as_path()))?;
                fs::remove_file(src)
            };
            removed.map_err(OperationError::io("cannot remove moved source", src.as_path()))
        }
        Err(e) => Err(OperationError::io("cannot move", src.as_path())(e)),
    }
}

/// Copy a file, or merge a directory tree into `dst`.
pub(crate) fn copy(
    sandbox: &WorkspaceSandbox,
    src: &ResolvedPath,
    dst: &ResolvedPath,
) -> Result<(), OperationError> {
    let meta = fs::metadata(src).map_err(OperationError::io("cannot copy", src.as_path()))?;
    if meta.is_dir() {
        if dst.starts_with(src) {
            return Err(OperationError::IntoItself {
                src: src.to_path_buf(),
                dst: dst.to_path_buf(),
            });
        }
        return copy_tree(sandbox, src, dst);
    }
    let target = place_into(src, dst)?;
    if same_file(src, &target) {
        return Err(OperationError::SameFile(src.to_path_buf()));
    }
    ensure_parent(&target)?;
    fs::copy(src, &target).map_err(OperationError::io("cannot copy", src.as_path()))?;
    Ok(())
}

/// Whether `target` already exists and is `src`, directly or through a link.
fn same_file(src: &Path, target: &Path) -> bool {
    match (fs::canonicalize(src), fs::canonicalize(target)) {
        (Ok(a), Ok(b)) if a == b => true,
        #[cfg(unix)]
        _ => {
            use std::os::unix::fs::MetadataExt;
            match (fs::metadata(src), fs::metadata(target)) {
                (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
                _ => false,
            }
        }
        #[cfg(not(unix))]
        _ => false,
    }
}

/// Recreate `src` under `dst`, refusing any symlink or junction inside it.
fn copy_tree(sandbox: &WorkspaceSandbox, src: &Path, dst: &Path) -> Result<(), OperationError> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        reject_reparse(sandbox, &entry)?;
        let relative = entry.path().strip_prefix(src).unwrap_or(Path::new(""));
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .map_err(OperationError::io("cannot create directory", &target))?;
        } else {
            ensure_parent(&target)?;
            fs::copy(entry.path(), &target)
                .map_err(OperationError::io("cannot copy", entry.path()))?;
        }
    }
    Ok(())
}

/// Error out on a walked entry that redirects elsewhere.
pub(super) fn reject_reparse(
    sandbox: &WorkspaceSandbox,
    entry: &walkdir::DirEntry,
) -> Result<(), OperationError> {
    let redirected = entry.path_is_symlink()
        || sandbox
            .is_reparse_point(entry.path())
            .map_err(OperationError::io("cannot inspect", entry.path()))?;
    if redirected {
        return Err(OperationError::ReparseInTree(entry.path().to_path_buf()));
    }
    Ok(())
}

pub(super) fn ensure_parent(path: &Path) -> Result<(), OperationError> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent)
            .map_err(OperationError::io("cannot create directory", parent)),
        None => Ok(()),
    }
}

fn place_into(src: &Path, dst: &Path) -> Result<PathBuf, OperationError> {
    if dst.is_dir() {
        let name = src.file_name().ok_or(OperationError::WorkspaceRoot("copy"))?;
        Ok(dst.join(name))
    } else {
        Ok(dst.to_path_buf())
    }
}

fn reject_root(
    sandbox: &WorkspaceSandbox,
    path: &ResolvedPath,
    action: &'static str,
) -> Result<(), OperationError> {
    if path.as_path() == sandbox.root() {
        return Err(OperationError::WorkspaceRoot(action));
    }
    Ok(())
}
