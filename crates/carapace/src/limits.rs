//! Quotas for archive extraction

use serde::{Deserialize, Serialize};

/// Upper bounds applied while extracting an archive.
///
/// An archive that would exceed any of these fails its `unzip` operation.
/// Files already written before the quota tripped are left in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum number of entries in one archive
    pub max_archive_entries: usize,
    /// Maximum uncompressed size of a single entry, in bytes
    pub max_entry_bytes: u64,
    /// Maximum uncompressed size of all entries together, in bytes
    pub max_total_bytes: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_archive_entries: 10_000,
            max_entry_bytes: 256 * 1024 * 1024, // 256 MiB
            max_total_bytes: 1024 * 1024 * 1024, // 1 GiB
        }
    }
}
