//! End-to-end tests for the validate, sandbox, execute, audit pipeline.
//!
//! These tests cover:
//! - Request validation gating execution
//! - Batch ordering and per-operation failure isolation
//! - Write-mode semantics
//! - Archive round trips
//! - Audit trail completeness

use std::fs;
use std::path::Path;

use carapace::{
    AuditLog, Operation, OperationStatus, Workspace, WriteMode, has_dangerous, parse_envelope,
};
use tempfile::TempDir;

fn workspace() -> (TempDir, Workspace) {
    let dir = tempfile::tempdir().expect("tempdir");
    let workspace = Workspace::open(dir.path()).expect("open workspace");
    (dir, workspace)
}

fn audit_entries(workspace: &Workspace) -> Vec<carapace::AuditEntry> {
    let log_dir = workspace
        .audit_log_path()
        .and_then(Path::parent)
        .expect("built-in audit log");
    AuditLog::open(log_dir)
        .expect("reopen log")
        .entries()
        .expect("read entries")
}

fn statuses(results: &[carapace::OperationResult]) -> Vec<&'static str> {
    results.iter().map(|r| r.status.as_str()).collect()
}

// =============================================================================
// Write modes
// =============================================================================

mod write_modes {
    use super::*;

    #[test]
    fn test_second_create_fails_and_keeps_content() {
        let (dir, workspace) = workspace();
        let results = workspace
            .apply(
                r#"{"operations": [
                    {"type": "write", "path": "a.txt", "mode": "create", "content": "hi"},
                    {"type": "write", "path": "a.txt", "mode": "create", "content": "bye"}
                ]}"#,
            )
            .expect("apply");
        assert_eq!(statuses(&results), ["ok", "failed"]);
        assert_eq!(
            fs::read_to_string(dir.path().join("a.txt")).expect("read"),
            "hi"
        );
    }

    #[test]
    fn test_append_then_overwrite() {
        let (dir, workspace) = workspace();
        let write = |content: &str, mode| Operation::Write {
            path: "notes/log.txt".into(),
            content: content.into(),
            mode,
        };
        let results = workspace
            .execute(&[
                write("one\n", WriteMode::Append),
                write("two\n", WriteMode::Append),
            ])
            .expect("execute");
        assert_eq!(statuses(&results), ["ok", "ok"]);
        let path = dir.path().join("notes/log.txt");
        assert_eq!(fs::read_to_string(&path).expect("read"), "one\ntwo\n");

        workspace
            .execute(&[write("fresh", WriteMode::Overwrite)])
            .expect("execute");
        assert_eq!(fs::read_to_string(&path).expect("read"), "fresh");
    }
}

// =============================================================================
// Batch semantics
// =============================================================================

mod batches {
    use super::*;

    #[test]
    fn test_results_follow_request_order() {
        let (dir, workspace) = workspace();
        fs::create_dir(dir.path().join("src")).expect("mkdir");
        fs::write(dir.path().join("src/file.txt"), "data").expect("write");

        let results = workspace
            .execute(&[
                Operation::Mkdir { path: "dst".into() },
                Operation::Read {
                    path: "../outside.txt".into(),
                },
                Operation::Copy {
                    src: "src/file.txt".into(),
                    dst: "dst/copy.txt".into(),
                },
                Operation::Move {
                    src: "missing.txt".into(),
                    dst: "x.txt".into(),
                },
                Operation::Move {
                    src: "src/file.txt".into(),
                    dst: "dst/moved.txt".into(),
                },
            ])
            .expect("execute");

        assert_eq!(statuses(&results), ["ok", "failed", "ok", "failed", "ok"]);
        assert_eq!(results[3].operation.kind(), "move");
        assert!(dir.path().join("dst/copy.txt").exists());
        assert!(dir.path().join("dst/moved.txt").exists());
        assert!(!dir.path().join("src/file.txt").exists());
    }

    #[test]
    fn test_copy_onto_itself_fails_without_data_loss() {
        let (dir, workspace) = workspace();
        fs::create_dir(dir.path().join("d")).expect("mkdir");
        fs::write(dir.path().join("d/a.txt"), "precious").expect("write");

        let results = workspace
            .execute(&[
                Operation::Copy {
                    src: "d/a.txt".into(),
                    dst: "d".into(),
                },
                Operation::Copy {
                    src: "d/a.txt".into(),
                    dst: "d/a.txt".into(),
                },
            ])
            .expect("execute");

        assert_eq!(statuses(&results), ["failed", "failed"]);
        assert!(
            results[0]
                .error
                .as_deref()
                .expect("error text")
                .contains("same file")
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("d/a.txt")).expect("read"),
            "precious"
        );
    }

    #[test]
    fn test_invalid_request_runs_nothing() {
        let (dir, workspace) = workspace();
        let err = workspace
            .apply(
                r#"{"operations": [
                    {"type": "mkdir", "path": "first"},
                    {"type": "read", "path": "a", "extra": 1}
                ]}"#,
            )
            .expect_err("unknown field");
        assert_eq!(err.to_string(), "Operation #1 has unknown fields: extra");
        assert!(!dir.path().join("first").exists());
        assert!(audit_entries(&workspace).is_empty());
    }

    #[test]
    fn test_envelope_request() {
        let (dir, workspace) = workspace();
        let operations = parse_envelope(
            r#"{"response": "{\"operations\": [{\"type\": \"mkdir\", \"path\": \"wrapped\"}]}"}"#,
        )
        .expect("envelope");
        assert!(!has_dangerous(&operations));
        workspace.execute(&operations).expect("execute");
        assert!(dir.path().join("wrapped").is_dir());
    }
}

// =============================================================================
// Archives
// =============================================================================

mod archives {
    use super::*;

    #[test]
    fn test_zip_then_unzip_directory() {
        let (dir, workspace) = workspace();
        fs::create_dir(dir.path().join("docs")).expect("mkdir");
        fs::write(dir.path().join("docs/a.txt"), "a").expect("write");

        let results = workspace
            .execute(&[Operation::Zip {
                path: "docs".into(),
            }])
            .expect("zip");
        assert_eq!(statuses(&results), ["ok"]);
        assert!(dir.path().join("docs.zip").is_file());

        let archive = zip::ZipArchive::new(
            fs::File::open(dir.path().join("docs.zip")).expect("open archive"),
        )
        .expect("read archive");
        assert!(archive.file_names().any(|name| name == "docs/a.txt"));

        fs::remove_dir_all(dir.path().join("docs")).expect("remove docs");
        let results = workspace
            .execute(&[Operation::Unzip {
                path: "docs.zip".into(),
            }])
            .expect("unzip");
        assert_eq!(statuses(&results), ["ok"]);
        assert_eq!(
            fs::read_to_string(dir.path().join("docs/docs/a.txt")).expect("extracted"),
            "a"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_zip_keeps_previous_archive() {
        let (dir, workspace) = workspace();
        let outside = tempfile::tempdir().expect("outside");
        fs::create_dir(dir.path().join("docs")).expect("mkdir");
        fs::write(dir.path().join("docs/a.txt"), "a").expect("write");
        std::os::unix::fs::symlink(outside.path(), dir.path().join("docs/zz_portal"))
            .expect("symlink");
        fs::write(dir.path().join("docs.zip"), "previous archive bytes").expect("write");

        let results = workspace
            .execute(&[Operation::Zip {
                path: "docs".into(),
            }])
            .expect("execute");

        assert_eq!(statuses(&results), ["failed"]);
        assert_eq!(
            fs::read_to_string(dir.path().join("docs.zip")).expect("read"),
            "previous archive bytes"
        );
        assert!(!dir.path().join("docs.zip.tmp").exists());
    }

    #[test]
    fn test_unzip_missing_archive_fails() {
        let (_dir, workspace) = workspace();
        let results = workspace
            .execute(&[Operation::Unzip {
                path: "nothing.zip".into(),
            }])
            .expect("execute");
        assert_eq!(statuses(&results), ["failed"]);
    }
}

// =============================================================================
// Audit trail
// =============================================================================

mod audit_trail {
    use super::*;

    #[test]
    fn test_failed_move_is_audited() {
        let (_dir, workspace) = workspace();
        let results = workspace
            .execute(&[Operation::Move {
                src: "missing.txt".into(),
                dst: "x.txt".into(),
            }])
            .expect("execute");
        assert_eq!(statuses(&results), ["failed"]);

        let entries = audit_entries(&workspace);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "move");
        assert_eq!(entries[0].path.as_deref(), Some("x.txt"));
        assert_eq!(entries[0].status, OperationStatus::Failed);
        assert!(!entries[0].error.as_deref().unwrap_or_default().is_empty());
    }

    #[test]
    fn test_one_entry_per_operation() {
        let (_dir, workspace) = workspace();
        let operations = [
            Operation::Mkdir { path: "a".into() },
            Operation::Delete { path: "a".into() },
            Operation::Read {
                path: r"\\server\share\f".into(),
            },
            Operation::Delete {
                path: "never-existed".into(),
            },
        ];
        let results = workspace.execute(&operations).expect("execute");
        let entries = audit_entries(&workspace);

        assert_eq!(entries.len(), operations.len());
        for ((entry, result), op) in entries.iter().zip(&results).zip(&operations) {
            assert_eq!(entry.action, op.kind());
            assert_eq!(entry.path.as_deref(), Some(op.subject()));
            assert_eq!(entry.status, result.status);
            assert_eq!(entry.details["operation"]["type"], op.kind());
        }
        assert_eq!(
            results[2].error.as_deref(),
            Some(r"UNC/long paths are not allowed: \\server\share\f")
        );
    }

    #[test]
    fn test_entries_accumulate_across_batches() {
        let (_dir, workspace) = workspace();
        workspace
            .execute(&[Operation::Mkdir { path: "a".into() }])
            .expect("first");
        workspace
            .execute(&[Operation::Mkdir { path: "b".into() }])
            .expect("second");
        assert_eq!(audit_entries(&workspace).len(), 2);
    }
}

// =============================================================================
// Containment
// =============================================================================

#[cfg(unix)]
mod containment {
    use super::*;

    #[test]
    fn test_symlink_escape_is_refused() {
        let (dir, workspace) = workspace();
        let outside = tempfile::tempdir().expect("outside");
        fs::write(outside.path().join("secret.txt"), "secret").expect("write");
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).expect("symlink");

        let results = workspace
            .execute(&[
                Operation::Read {
                    path: "link/secret.txt".into(),
                },
                Operation::Write {
                    path: "link/planted.txt".into(),
                    content: "x".into(),
                    mode: WriteMode::Create,
                },
                Operation::Delete {
                    path: "link/secret.txt".into(),
                },
            ])
            .expect("execute");
        assert_eq!(statuses(&results), ["failed", "failed", "failed"]);
        assert!(outside.path().join("secret.txt").exists());
        assert!(!outside.path().join("planted.txt").exists());
    }
}
