//! Re-parse point detection.
//!
//! String-level containment cannot see that an in-bounds directory entry is a
//! portal elsewhere, so the sandbox asks a [`ReparseProbe`] about every
//! existing ancestor of a resolved path.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Answers "is this path a filesystem redirection point?".
///
/// Implementations must not follow the final path component. Return an
/// `io::ErrorKind::NotFound` error for paths that do not exist; any other
/// error is treated by the sandbox as a violation.
pub trait ReparseProbe: Send + Sync + fmt::Debug {
    /// Returns true if `path` itself is a symlink, junction, or other
    /// redirecting filesystem object.
    fn is_reparse_point(&self, path: &Path) -> io::Result<bool>;
}

impl ReparseProbe for Arc<dyn ReparseProbe> {
    fn is_reparse_point(&self, path: &Path) -> io::Result<bool> {
        (**self).is_reparse_point(path)
    }
}

/// The platform's own notion of a re-parse point.
///
/// - Unix: symbolic links.
/// - Windows: any object carrying `FILE_ATTRIBUTE_REPARSE_POINT` (symlinks,
///   junctions, mount points).
/// - Elsewhere: undeterminable, so every existing path is reported as an error.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeProbe;

#[cfg(windows)]
const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x400;

impl ReparseProbe for NativeProbe {
    #[cfg(unix)]
    fn is_reparse_point(&self, path: &Path) -> io::Result<bool> {
        Ok(path.symlink_metadata()?.file_type().is_symlink())
    }

    #[cfg(windows)]
    fn is_reparse_point(&self, path: &Path) -> io::Result<bool> {
        use std::os::windows::fs::MetadataExt;

        let meta = path.symlink_metadata()?;
        Ok(meta.file_type().is_symlink()
            || meta.file_attributes() & FILE_ATTRIBUTE_REPARSE_POINT != 0)
    }

    #[cfg(not(any(unix, windows)))]
    fn is_reparse_point(&self, path: &Path) -> io::Result<bool> {
        path.symlink_metadata()?;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "re-parse point detection is unavailable on this platform",
        ))
    }
}
