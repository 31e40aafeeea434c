//! Lexical path handling: no filesystem access happens here.

use std::path::{Component, MAIN_SEPARATOR, Path, PathBuf, Prefix};

/// Whether path comparison should ignore case on this platform.
pub(crate) const fn case_insensitive_default() -> bool {
    cfg!(any(windows, target_os = "macos"))
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Detect UNC (`\\server\share`) and extended-length (`\\?\C:\...`) forms.
///
/// Any leading pair of separators counts, whichever way they lean.
pub(crate) fn is_unc_or_long(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    matches!((chars.next(), chars.next()), (Some(a), Some(b)) if is_separator(a) && is_separator(b))
}

/// Rewrite both separator styles to the platform separator.
pub(crate) fn normalize_separators(candidate: &str) -> String {
    candidate
        .chars()
        .map(|c| if is_separator(c) { MAIN_SEPARATOR } else { c })
        .collect()
}

/// Drive letter of a `X:`-prefixed string, uppercased.
pub(crate) fn drive_letter(candidate: &str) -> Option<char> {
    let mut chars = candidate.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic() => {
            Some(letter.to_ascii_uppercase())
        }
        _ => None,
    }
}

/// Whether a drive-qualified string is anchored (`C:\x`) rather than
/// drive-relative (`C:x`).
pub(crate) fn is_drive_absolute(candidate: &str) -> bool {
    candidate.chars().nth(2).is_some_and(is_separator)
}

/// Drive letter of an already-parsed path, if it carries one.
pub(crate) fn path_drive(path: &Path) -> Option<char> {
    match path.components().next()? {
        Component::Prefix(prefix) => match prefix.kind() {
            Prefix::Disk(d) | Prefix::VerbatimDisk(d) => Some((d as char).to_ascii_uppercase()),
            _ => None,
        },
        _ => None,
    }
}

/// Collapse `.` and `..` segments without consulting the filesystem.
///
/// `..` at the root stays at the root, matching `normpath` on an absolute path.
pub(crate) fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

fn component_eq(a: Component<'_>, b: Component<'_>, case_insensitive: bool) -> bool {
    if case_insensitive {
        a.as_os_str().to_string_lossy().to_lowercase()
            == b.as_os_str().to_string_lossy().to_lowercase()
    } else {
        a == b
    }
}

/// Component-wise prefix test, so `/ws2` is never "inside" `/ws`.
pub(crate) fn starts_with(path: &Path, base: &Path, case_insensitive: bool) -> bool {
    let mut path = path.components();
    for expected in base.components() {
        match path.next() {
            Some(actual) if component_eq(actual, expected, case_insensitive) => {}
            _ => return false,
        }
    }
    true
}

/// Component-wise equality under the same rules as [`starts_with`].
pub(crate) fn same_path(a: &Path, b: &Path, case_insensitive: bool) -> bool {
    a.components().count() == b.components().count() && starts_with(a, b, case_insensitive)
}
