//! `zip` and `unzip`.
//!
//! Archives sit next to their subject: `docs` becomes `docs.zip`, and
//! `docs.zip` extracts into `docs/`. Both the archive path and every
//! extracted entry are resolved through the sandbox before they are written.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path};

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::OperationError;
use super::fs_ops::{ensure_parent, reject_reparse};
use crate::limits::Limits;
use crate::sandbox::{ResolvedPath, WorkspaceSandbox};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Archive a file or directory tree into a sibling `<name>.zip`.
///
/// Directory entries are stored relative to the subject's parent, so the
/// top-level directory name is kept inside the archive.
pub(crate) fn zip(
    sandbox: &WorkspaceSandbox,
    subject: &ResolvedPath,
) -> Result<(), OperationError> {
    let meta = subject
        .symlink_metadata()
        .map_err(OperationError::io("cannot archive", subject.as_path()))?;
    let (Some(parent), Some(name)) = (subject.parent(), subject.file_name()) else {
        return Err(OperationError::WorkspaceRoot("zip"));
    };
    let mut archive_name = name.to_os_string();
    archive_name.push(".zip");
    let archive_path = sandbox.resolve_path(&parent.join(&archive_name))?;
    archive_name.push(".tmp");
    let staging_path = sandbox.resolve_path(&parent.join(archive_name))?;

    // Staged beside the target; it is replaced only after a complete write.
    let written = File::create(&staging_path)
        .map_err(OperationError::io("cannot create archive", staging_path.as_path()))
        .and_then(|file| write_archive(sandbox, subject, parent, meta.is_dir(), file));
    match written {
        Ok(()) => fs::rename(&staging_path, &archive_path)
            .map_err(OperationError::io("cannot create archive", archive_path.as_path())),
        Err(e) => {
            discard_partial(&staging_path);
            Err(e)
        }
    }
}

fn write_archive(
    sandbox: &WorkspaceSandbox,
    subject: &Path,
    parent: &Path,
    is_dir: bool,
    file: File,
) -> Result<(), OperationError> {
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    if is_dir {
        let walker = WalkDir::new(subject).follow_links(false).sort_by_file_name();
        for entry in walker {
            let entry = entry?;
            reject_reparse(sandbox, &entry)?;
            let entry_name = archive_entry_name(entry.path(), parent)?;
            if entry.file_type().is_dir() {
                writer.add_directory(entry_name, options)?;
            } else {
                writer.start_file(entry_name, options)?;
                append_file(&mut writer, entry.path())?;
            }
        }
    } else {
        writer.start_file(archive_entry_name(subject, parent)?, options)?;
        append_file(&mut writer, subject)?;
    }
    writer.finish()?;
    Ok(())
}

/// Remove a partially written file, logging when that fails.
fn discard_partial(path: &Path) {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), error = %e, "partial file left behind");
        }
        _ => {}
    }
}

/// Extract `<stem>.zip` into a sibling `<stem>/`, creating it if absent.
pub(crate) fn unzip(
    sandbox: &WorkspaceSandbox,
    archive_path: &ResolvedPath,
    limits: &Limits,
) -> Result<(), OperationError> {
    let file = File::open(archive_path)
        .map_err(OperationError::io("cannot open archive", archive_path.as_path()))?;
    let mut archive = ZipArchive::new(file)?;
    if archive.len() > limits.max_archive_entries {
        return Err(OperationError::Quota {
            what: "entry count",
            limit: limits.max_archive_entries as u64,
        });
    }

    let stem = archive_path
        .file_stem()
        .ok_or(OperationError::WorkspaceRoot("unzip"))?;
    let target_dir = sandbox.resolve_path(&archive_path.with_file_name(stem))?;
    fs::create_dir_all(&target_dir)
        .map_err(OperationError::io("cannot create directory", target_dir.as_path()))?;

    let mut total: u64 = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| OperationError::UnsafeEntry(name.clone()))?;
        if entry.unix_mode().is_some_and(|mode| mode & S_IFMT == S_IFLNK) {
            return Err(OperationError::SymlinkEntry(name));
        }
        let out = sandbox.resolve_path(&target_dir.join(&relative))?;

        if entry.is_dir() {
            fs::create_dir_all(&out)
                .map_err(OperationError::io("cannot create directory", out.as_path()))?;
            continue;
        }

        let remaining = limits.max_total_bytes.saturating_sub(total);
        let budget = limits.max_entry_bytes.min(remaining);
        ensure_parent(&out)?;
        let mut dest = File::create(&out)
            .map_err(OperationError::io("cannot extract", out.as_path()))?;
        let written = io::copy(&mut entry.by_ref().take(budget.saturating_add(1)), &mut dest)
            .map_err(OperationError::io("cannot extract", out.as_path()))?;
        if written > budget {
            drop(dest);
            discard_partial(&out);
            return Err(if budget == limits.max_entry_bytes {
                OperationError::Quota {
                    what: "entry size",
                    limit: limits.max_entry_bytes,
                }
            } else {
                OperationError::Quota {
                    what: "total size",
                    limit: limits.max_total_bytes,
                }
            });
        }
        total += written;
        tracing::trace!(entry = %name, bytes = written, "extracted");
    }
    Ok(())
}

/// Forward-slash entry name of `path` relative to `base`.
fn archive_entry_name(path: &Path, base: &Path) -> Result<String, OperationError> {
    let relative = path
        .strip_prefix(base)
        .map_err(|_| OperationError::UnsafeEntry(path.display().to_string()))?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| OperationError::UnsafeEntry(path.display().to_string()))?,
            ),
            _ => return Err(OperationError::UnsafeEntry(path.display().to_string())),
        }
    }
    Ok(parts.join("/"))
}

fn append_file(writer: &mut ZipWriter<File>, path: &Path) -> Result<(), OperationError> {
    let mut source = File::open(path).map_err(OperationError::io("cannot archive", path))?;
    io::copy(&mut source, writer).map_err(OperationError::io("cannot archive", path))?;
    Ok(())
}
