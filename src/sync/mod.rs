//! Directory sync between this machine and SSH hosts.
//!
//! Wraps `rsync` over `ssh` so that whole-directory pushes and pulls are
//! validated before anything is spawned and report a structured outcome.
//!
//! # Architecture
//!
//! - **path**: [`PathRef`] (local or `[user@]host:path`) and [`PathResolver`]
//! - **remote**: [`RemoteShell`] probes, run over non-interactive ssh
//! - **preflight**: existence and topology checks on a [`SyncRequest`]
//! - **plan**: [`TransferPlanner`] builds the rsync command line
//! - **executor**: [`ProcessExecutor`] runs it, streams output, handles interrupts
//! - **diff**: per-file comparison of two trees
//! - **engine**: [`SyncEngine`], the entry points used by the CLI
//!
//! # Usage
//!
//! ```rust,ignore
//! use synctools::config::Config;
//! use synctools::sync::{CancelToken, Outcome, Passthrough, SyncEngine, TransferOptions};
//!
//! let engine = SyncEngine::from_config(&Config::load(None)?);
//! let cancel = CancelToken::new();
//!
//! match engine.sync_from("me@nas:/backup", ".", TransferOptions::default(), &mut Passthrough, &cancel)? {
//!     Outcome::Succeeded(report) => println!("{} files", report.files_transferred),
//!     Outcome::Failed(failure) => eprintln!("{}", failure.describe()),
//!     Outcome::Interrupted => eprintln!("interrupted"),
//! }
//! ```
//!
//! Remote→remote transfers are rejected; one side is always local.

pub mod diff;
pub mod engine;
pub mod executor;
pub mod path;
pub mod plan;
pub mod preflight;
pub mod remote;

pub use diff::{ComparisonResult, DiffSummary, FileInfo, FileStatus};
pub use engine::{DiffReport, SyncEngine, SyncObserver};
pub use executor::{
    CancelToken, Discard, ExitClass, Outcome, OutputSink, OutputStream, Passthrough,
    ProcessExecutor, TransferFailure, TransferReport, TransferRunner, TransferState,
};
pub use path::{PathRef, PathResolver};
pub use plan::{TransferPlan, TransferPlanner};
pub use preflight::{SyncRequest, TransferOptions};
pub use remote::{RemoteOutput, RemoteShell, SshShell};
