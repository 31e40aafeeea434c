//! Carapace CLI
//!
//! Usage:
//!   carapace check [FILE] [--envelope]          Validate a request and show risk
//!   carapace resolve --workspace DIR PATH...    Show how paths resolve
//!   carapace apply --workspace DIR [FILE]       Validate, confirm, and execute
//!
//! Requests are read from FILE, or stdin when FILE is omitted. JSON goes to
//! stdout; logs and prompts go to stderr.

use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use carapace::{
    Limits, Operation, OperationResult, ValidationError, Workspace, WorkspaceSandbox,
    has_dangerous, parse_envelope, parse_operations,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const EXIT_OK: u8 = 0;
const EXIT_FAILED: u8 = 1;
const EXIT_REFUSED: u8 = 2;
const EXIT_ABORTED: u8 = 3;

/// Carapace - sandboxed, audited workspace file operations
#[derive(Parser, Debug)]
#[command(name = "carapace")]
#[command(about = "Validate and apply file operation batches inside a workspace sandbox")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a request and print each operation with its risk
    Check {
        /// Request file (stdin if omitted)
        file: Option<PathBuf>,
        /// Accept operations wrapped in a response envelope
        #[arg(long)]
        envelope: bool,
    },
    /// Resolve paths against a workspace without touching them
    Resolve {
        /// Workspace root
        #[arg(long, short)]
        workspace: PathBuf,
        /// Candidate paths
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Validate and execute a request
    Apply {
        /// Workspace root
        #[arg(long, short)]
        workspace: PathBuf,
        /// Request file (stdin if omitted)
        file: Option<PathBuf>,
        /// Run dangerous operations without asking
        #[arg(long, short)]
        yes: bool,
        /// Accept operations wrapped in a response envelope
        #[arg(long)]
        envelope: bool,
        /// Audit log directory (default: <workspace>/logs)
        #[arg(long)]
        audit_dir: Option<PathBuf>,
        /// Maximum total bytes a single unzip may extract
        #[arg(long)]
        max_extract_bytes: Option<u64>,
    },
}

fn main() -> ExitCode {
    // Logs go to stderr so stdout carries only JSON
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref()))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("carapace: {e:#}");
            ExitCode::from(EXIT_FAILED)
        }
    }
}

/// `RUST_LOG` when set and valid, INFO otherwise.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn run(cli: Cli) -> anyhow::Result<u8> {
    match cli.command {
        Command::Check { file, envelope } => check(file.as_deref(), envelope),
        Command::Resolve { workspace, paths } => resolve(&workspace, &paths),
        Command::Apply {
            workspace,
            file,
            yes,
            envelope,
            audit_dir,
            max_extract_bytes,
        } => {
            let mut limits = Limits::default();
            if let Some(bytes) = max_extract_bytes {
                limits.max_total_bytes = bytes;
            }
            let mut builder = Workspace::builder(&workspace).limits(limits);
            if let Some(dir) = audit_dir {
                builder = builder.audit_dir(dir);
            }
            let request = ApplyRequest {
                file: file.as_deref(),
                yes,
                envelope,
            };
            apply(builder.build()?, &request)
        }
    }
}

fn read_request(file: Option<&Path>) -> anyhow::Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("cannot read request {}", path.display())),
        None => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("failed to read stdin")?;
            Ok(text)
        }
    }
}

fn parse(text: &str, envelope: bool) -> Result<Vec<Operation>, ValidationError> {
    if envelope {
        parse_envelope(text)
    } else {
        parse_operations(text)
    }
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

fn check(file: Option<&Path>, envelope: bool) -> anyhow::Result<u8> {
    let text = read_request(file)?;
    let operations = match parse(&text, envelope) {
        Ok(operations) => operations,
        Err(e) => {
            eprintln!("carapace: {e}");
            return Ok(EXIT_FAILED);
        }
    };
    let listing: Vec<_> = operations
        .iter()
        .map(|op| json!({ "operation": op, "risk": op.risk() }))
        .collect();
    print_json(&json!({
        "operations": listing,
        "dangerous": has_dangerous(&operations),
    }))?;
    Ok(EXIT_OK)
}

fn resolve(workspace: &Path, paths: &[String]) -> anyhow::Result<u8> {
    let sandbox = WorkspaceSandbox::create(workspace)?;
    let mut all_ok = true;
    let report: Vec<_> = paths
        .iter()
        .map(|candidate| match sandbox.resolve(candidate) {
            Ok(resolved) => json!({ "path": candidate, "resolved": resolved.to_string() }),
            Err(violation) => {
                all_ok = false;
                json!({
                    "path": candidate,
                    "error": violation.to_string(),
                    "reason": violation.reason.as_str(),
                })
            }
        })
        .collect();
    print_json(&serde_json::Value::Array(report))?;
    Ok(if all_ok { EXIT_OK } else { EXIT_FAILED })
}

struct ApplyRequest<'a> {
    file: Option<&'a Path>,
    yes: bool,
    envelope: bool,
}

fn apply(workspace: Workspace, request: &ApplyRequest<'_>) -> anyhow::Result<u8> {
    let text = read_request(request.file)?;
    let operations = match parse(&text, request.envelope) {
        Ok(operations) => operations,
        Err(e) => {
            eprintln!("carapace: {e}");
            return Ok(EXIT_FAILED);
        }
    };

    if has_dangerous(&operations) && !request.yes {
        // Stdin is the request itself unless it came from a file.
        let can_prompt = request.file.is_some() && io::stdin().is_terminal();
        let approved = can_prompt
            && confirm(&operations, &mut io::stdin().lock(), &mut io::stderr())?;
        if !approved {
            eprintln!("carapace: batch contains dangerous operations; rerun with --yes to apply");
            return Ok(EXIT_REFUSED);
        }
    }

    tracing::info!(
        root = %workspace.root().display(),
        operations = operations.len(),
        "applying batch"
    );
    let outcome = workspace.execute(&operations);
    let results = match &outcome {
        Ok(results) => results.as_slice(),
        Err(aborted) => aborted.results.as_slice(),
    };

    report_failures(results, &mut io::stderr())?;
    print_json(&serde_json::to_value(results)?)?;

    if let Err(aborted) = &outcome {
        eprintln!("carapace: {aborted}: {}", aborted.source);
        return Ok(EXIT_ABORTED);
    }
    Ok(if results.iter().all(OperationResult::is_ok) {
        EXIT_OK
    } else {
        EXIT_FAILED
    })
}

/// List dangerous operations and ask for a yes/no answer.
fn confirm(
    operations: &[Operation],
    input: &mut impl BufRead,
    prompt: &mut impl Write,
) -> io::Result<bool> {
    writeln!(prompt, "The following operations need confirmation:")?;
    for (index, op) in operations.iter().enumerate() {
        if op.is_dangerous() {
            writeln!(prompt, "  #{index} [{:?}] {op}", op.risk())?;
        }
    }
    write!(prompt, "Proceed? [y/N] ")?;
    prompt.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// One line per failed operation, with its error cut to a readable length.
fn report_failures(results: &[OperationResult], out: &mut impl Write) -> io::Result<()> {
    for (index, result) in results.iter().enumerate() {
        if !result.is_ok() {
            writeln!(out, "#{index} {}: {}", result.operation, result.error_summary())?;
        }
    }
    Ok(())
}
