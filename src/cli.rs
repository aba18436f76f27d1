//! Command-line front end.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use serde::Serialize;

use crate::config::Config;
use crate::error::{ErrorKind, SyncError};
use crate::sync::diff::{self, DiffSummary, FileStatus};
use crate::sync::{
    CancelToken, DiffReport, Outcome, OutputSink, OutputStream, SyncEngine, SyncObserver, SyncRequest,
    TransferOptions, TransferPlan,
};

/// Exit code for preflight, configuration and tool errors.
pub const EXIT_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "synctools",
    version,
    about = "Push and pull whole directories between this machine and SSH hosts",
    long_about = "Push and pull whole directories between this machine and SSH hosts.\n\n\
                  Remote paths use the form [user@]host:/path. The directory is always \
                  synced into <PARENT>/<name of the local directory>."
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH", env = "SYNCTOOLS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Replace the host of every remote path
    #[arg(long, global = true, value_name = "HOST")]
    pub remote_host: Option<String>,

    /// Print the result as JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Push the local directory to <PARENT>/<name>
    #[command(after_help = "Example:\n  cd ~/work/proj && synctools to me@nas:/backup")]
    To {
        /// Destination parent, local or [user@]host:/path
        parent: String,
        #[command(flatten)]
        local: LocalDirArg,
        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Pull <PARENT>/<name> into the local directory
    #[command(after_help = "Example:\n  cd ~/work/proj && synctools from me@nas:/backup")]
    From {
        /// Source parent, local or [user@]host:/path
        parent: String,
        #[command(flatten)]
        local: LocalDirArg,
        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Sync SOURCE into DEST_PARENT/<name of SOURCE>
    Dirs {
        source: String,
        dest_parent: String,
        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Compare the local directory with <PARENT>/<name>
    Diff {
        /// Parent holding the directory to compare against
        parent: String,
        #[command(flatten)]
        local: LocalDirArg,
        /// List every file with sizes and timestamps
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
pub struct LocalDirArg {
    /// Local directory to use instead of the current one
    #[arg(short = 'C', long = "dir", value_name = "DIR", default_value = ".")]
    pub dir: String,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct TransferArgs {
    /// Delete destination files that are absent from the source
    #[arg(long, overrides_with = "no_delete")]
    pub delete: bool,

    /// Keep extraneous destination files even if the config enables deletion
    #[arg(long, overrides_with = "delete")]
    pub no_delete: bool,

    /// Show what would be transferred without changing anything
    #[arg(long, short = 'n')]
    pub dry_run: bool,

    /// Do not ask rsync for per-file progress
    #[arg(long)]
    pub no_progress: bool,
}

impl TransferArgs {
    fn options(self, config: &Config) -> TransferOptions {
        TransferOptions {
            delete_extraneous: !self.no_delete && (self.delete || config.delete_extraneous),
            dry_run: self.dry_run,
            progress: !self.no_progress,
        }
    }
}

/// Run the parsed command and return the process exit code.
pub async fn execute(cli: Cli) -> Result<i32> {
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "synctools", &mut std::io::stdout());
        return Ok(0);
    }

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(host) = cli.remote_host.clone() {
        config.remote_host = Some(host);
    }
    tracing::debug!(?config, "effective configuration");

    let json = cli.json;
    let engine = SyncEngine::from_config(&config);

    match cli.command {
        Commands::To {
            parent,
            local,
            transfer,
        } => {
            let options = transfer.options(&config);
            run_sync(json, engine, move |engine, sink, cancel, printer| {
                engine.sync_to_observed(&local.dir, &parent, options, sink, cancel, printer)
            })
            .await
        }
        Commands::From {
            parent,
            local,
            transfer,
        } => {
            let options = transfer.options(&config);
            run_sync(json, engine, move |engine, sink, cancel, printer| {
                engine.sync_from_observed(&parent, &local.dir, options, sink, cancel, printer)
            })
            .await
        }
        Commands::Dirs {
            source,
            dest_parent,
            transfer,
        } => {
            let options = transfer.options(&config);
            run_sync(json, engine, move |engine, sink, cancel, printer| {
                engine.sync_dirs_observed(&source, &dest_parent, options, sink, cancel, printer)
            })
            .await
        }
        Commands::Diff {
            parent,
            local,
            verbose,
        } => run_diff(json, verbose, engine, local.dir, parent).await,
        Commands::Completions { .. } => Ok(0),
    }
}

/// Prints the "FROM/TO" header once the request is known, and remembers it
/// for the JSON summary.
struct StatusPrinter {
    json: bool,
    request: Option<SyncRequest>,
}

impl SyncObserver for StatusPrinter {
    fn planned(&mut self, request: &SyncRequest, plan: &TransferPlan) {
        self.request = Some(request.clone());
        tracing::debug!(command = %plan.display_command(), "running rsync");
        if self.json {
            return;
        }
        let mut err = std::io::stderr().lock();
        let _ = writeln!(
            err,
            "{} {}\n{} {}{}\n",
            "Synchronizing FROM:".bold(),
            request.source.for_display(),
            "              TO:".bold(),
            request.destination.for_display(),
            if request.options.dry_run {
                " (dry run)".yellow().to_string()
            } else {
                String::new()
            },
        );
    }
}

#[derive(Serialize)]
struct SyncSummary<'a> {
    status: &'static str,
    exit_code: i32,
    request: Option<&'a SyncRequest>,
    outcome: &'a Outcome,
}

#[derive(Serialize)]
struct ErrorSummary {
    status: &'static str,
    exit_code: i32,
    kind: ErrorKind,
    message: String,
}

/// Run `op` on a blocking thread while Ctrl-C and SIGTERM cancel it, then
/// report the outcome.
async fn run_sync<F>(json: bool, engine: SyncEngine, op: F) -> Result<i32>
where
    F: FnOnce(
            &SyncEngine,
            &mut dyn OutputSink,
            &CancelToken,
            &mut StatusPrinter,
        ) -> Result<Outcome, SyncError>
        + Send
        + 'static,
{
    let cancel = CancelToken::new();
    let signals = tokio::spawn(cancel_on_signal(cancel.clone()));

    let (result, printer) = tokio::task::spawn_blocking(move || {
        let mut printer = StatusPrinter {
            json,
            request: None,
        };
        // Keep stdout clean for the JSON document.
        let mut sink = move |stream: OutputStream, data: &[u8]| {
            let _ = match (json, stream) {
                (false, OutputStream::Stdout) => {
                    let mut out = std::io::stdout().lock();
                    out.write_all(data).and_then(|_| out.flush())
                }
                _ => {
                    let mut err = std::io::stderr().lock();
                    err.write_all(data).and_then(|_| err.flush())
                }
            };
        };
        let result = op(&engine, &mut sink, &cancel, &mut printer);
        (result, printer)
    })
    .await
    .context("sync task panicked")?;
    signals.abort();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => return Ok(report_error(json, &err)),
    };

    let exit_code = outcome.exit_code();
    if json {
        let summary = SyncSummary {
            status: match outcome {
                Outcome::Succeeded(_) => "succeeded",
                Outcome::Failed(_) => "failed",
                Outcome::Interrupted => "interrupted",
            },
            exit_code,
            request: printer.request.as_ref(),
            outcome: &outcome,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(exit_code);
    }

    match &outcome {
        Outcome::Succeeded(report) => {
            eprintln!(
                "\n{} {} files, {} in {:.1}s",
                "✓ Synchronization completed:".green().bold(),
                report.files_transferred,
                diff::format_size(report.bytes_transferred).trim(),
                report.duration_ms as f64 / 1000.0
            );
        }
        Outcome::Failed(failure) => {
            tracing::warn!(code = failure.code, "rsync failed");
            eprintln!("\n{} {}", "✗ Synchronization failed:".red().bold(), failure.describe());
        }
        Outcome::Interrupted => {
            eprintln!("\n{}", "Synchronization interrupted".yellow().bold());
        }
    }
    Ok(exit_code)
}

async fn run_diff(
    json: bool,
    verbose: bool,
    engine: SyncEngine,
    local: String,
    parent: String,
) -> Result<i32> {
    let result = tokio::task::spawn_blocking(move || engine.diff(&local, &parent))
        .await
        .context("diff task panicked")?;
    let report = match result {
        Ok(report) => report,
        Err(err) => return Ok(report_error(json, &err)),
    };

    let summary = DiffSummary::from_results(&report.results);
    if json {
        #[derive(Serialize)]
        struct DiffDocument<'a> {
            status: &'static str,
            summary: &'a DiffSummary,
            #[serde(flatten)]
            report: &'a DiffReport,
        }
        let doc = DiffDocument {
            status: "ok",
            summary: &summary,
            report: &report,
        };
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(0);
    }

    print_diff(&report, &summary, verbose);
    Ok(0)
}

fn print_diff(report: &DiffReport, summary: &DiffSummary, verbose: bool) {
    let rule = "=".repeat(80);
    let thin = "-".repeat(80);

    eprintln!("Comparing LOCAL: {}", report.local.for_display());
    eprintln!("     with OTHER: {}\n", report.other.for_display());
    eprintln!("{rule}\n{}\n{rule}\n", "Directory Comparison Results".bold());

    eprintln!("Summary:");
    let hint = |status: FileStatus| match status {
        FileStatus::Newer => "files are NEWER locally (consider `synctools to`)",
        FileStatus::Older => "files are OLDER locally (consider `synctools from`)",
        FileStatus::Same => "files are the SAME",
        FileStatus::LocalOnly => "files exist only LOCALLY",
        FileStatus::RemoteOnly => "files exist only on the OTHER side",
        FileStatus::Conflict => "files have CONFLICTS (same mtime, different size)",
    };
    for status in FileStatus::ALL {
        let count = summary.count(status);
        if status == FileStatus::Conflict && count == 0 {
            continue;
        }
        eprintln!("  {count:4} {}", hint(status));
    }
    eprintln!();

    if summary.in_sync() {
        eprintln!("{}", "✓ Directories are in sync".green().bold());
    } else if verbose {
        eprintln!("Detailed Comparison:\n{thin}");
        for result in &report.results {
            eprintln!("\n{} {}", colored_label(result.status), result.path);
            for (side, info) in [("Local: ", result.local), ("Other: ", result.remote)] {
                match info {
                    Some(info) => eprintln!(
                        "  {side} {:>10}  {}",
                        diff::format_size(info.size),
                        diff::format_timestamp(info.mtime)
                    ),
                    None => eprintln!("  {side} (not present)"),
                }
            }
        }
    } else {
        eprintln!("Files requiring attention:\n{thin}");
        for result in report.results.iter().filter(|r| r.status != FileStatus::Same) {
            eprintln!("{} {}", colored_label(result.status), result.path);
        }
    }
    eprintln!("\n{rule}");
}

fn colored_label(status: FileStatus) -> String {
    let label = format!("{:12}", status.label());
    match status {
        FileStatus::Newer => label.green().to_string(),
        FileStatus::Older => label.yellow().to_string(),
        FileStatus::Same => label.dimmed().to_string(),
        FileStatus::LocalOnly | FileStatus::RemoteOnly => label.cyan().to_string(),
        FileStatus::Conflict => label.red().bold().to_string(),
    }
}

/// Print `err` and return the exit code for it.
fn report_error(json: bool, err: &SyncError) -> i32 {
    tracing::warn!(kind = %err.kind(), "{err}");
    if json {
        let doc = ErrorSummary {
            status: "error",
            exit_code: EXIT_ERROR,
            kind: err.kind(),
            message: err.to_string(),
        };
        if let Ok(text) = serde_json::to_string_pretty(&doc) {
            println!("{text}");
        }
        return EXIT_ERROR;
    }

    eprintln!("{} {err}", "Error:".red().bold());
    if let SyncError::ToolNotAvailable { .. } = err {
        eprintln!("Install rsync:");
        eprintln!("  Ubuntu/Debian: sudo apt-get install rsync");
        eprintln!("  macOS: brew install rsync (or use the built-in version)");
    }
    EXIT_ERROR
}

/// Cancel `token` on Ctrl-C or SIGTERM.
async fn cancel_on_signal(token: CancelToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("interrupt received, stopping transfer");
    token.cancel();
}
