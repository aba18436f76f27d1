//! Error vocabulary shared by every stage of a sync.
//!
//! [`SyncError`] carries the offending path or host so that its `Display`
//! output is a single actionable line. [`ErrorKind`] is the flat, copyable
//! classification exposed to callers that only need to branch on the kind.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Errors produced while resolving, validating, planning or running a sync.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("invalid path '{input}': {reason}")]
    InvalidPathFormat { input: String, reason: String },

    #[error("source '{path}' does not exist{}", on_host(.host))]
    SourceNotFound { path: String, host: Option<String> },

    #[error("source '{path}' is not a directory{}", on_host(.host))]
    SourceNotDirectory { path: String, host: Option<String> },

    #[error("destination parent '{path}' does not exist{}", on_host(.host))]
    DestParentNotFound { path: String, host: Option<String> },

    #[error("destination parent '{path}' is not a directory{}", on_host(.host))]
    DestParentNotDirectory { path: String, host: Option<String> },

    #[error(
        "cannot sync '{source_display}' to '{destination}': remote-to-remote transfers are not supported by rsync"
    )]
    RemoteToRemoteUnsupported {
        source_display: String,
        destination: String,
    },

    #[error("host '{host}' is unreachable: {reason}")]
    RemoteUnreachable { host: String, reason: String },

    #[error("'{tool}' was not found on PATH; install it to use synctools")]
    ToolNotAvailable { tool: String },

    #[error("refusing to plan transfer: {0}")]
    PlanningRejected(String),

    #[error("'{path}' already exists and is not a directory{}", on_host(.host))]
    AlreadyExistsNotDir { path: String, host: Option<String> },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

fn on_host(host: &Option<String>) -> String {
    match host {
        Some(host) => format!(" on host '{host}'"),
        None => String::new(),
    }
}

impl SyncError {
    pub fn invalid_path(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPathFormat {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn unreachable(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RemoteUnreachable {
            host: host.into(),
            reason: reason.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// The flat kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPathFormat { .. } => ErrorKind::InvalidPathFormat,
            Self::SourceNotFound { .. } => ErrorKind::SourceNotFound,
            Self::SourceNotDirectory { .. } => ErrorKind::SourceNotDirectory,
            Self::DestParentNotFound { .. } => ErrorKind::DestParentNotFound,
            Self::DestParentNotDirectory { .. } => ErrorKind::DestParentNotDirectory,
            Self::RemoteToRemoteUnsupported { .. } => ErrorKind::RemoteToRemoteUnsupported,
            Self::RemoteUnreachable { .. } => ErrorKind::RemoteUnreachable,
            Self::ToolNotAvailable { .. } => ErrorKind::ToolNotAvailable,
            Self::PlanningRejected(_) => ErrorKind::PlanningRejected,
            Self::AlreadyExistsNotDir { .. } => ErrorKind::AlreadyExistsNotDir,
            Self::Io { .. } => ErrorKind::Io,
        }
    }
}

/// Classification of every way a sync can end other than success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidPathFormat,
    SourceNotFound,
    SourceNotDirectory,
    DestParentNotFound,
    DestParentNotDirectory,
    RemoteToRemoteUnsupported,
    RemoteUnreachable,
    ToolNotAvailable,
    PlanningRejected,
    AlreadyExistsNotDir,
    Io,
    /// The transfer tool exited non-zero.
    Failed,
    /// The transfer was cancelled while running.
    Interrupted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidPathFormat => "invalid-path-format",
            Self::SourceNotFound => "source-not-found",
            Self::SourceNotDirectory => "source-not-directory",
            Self::DestParentNotFound => "dest-parent-not-found",
            Self::DestParentNotDirectory => "dest-parent-not-directory",
            Self::RemoteToRemoteUnsupported => "remote-to-remote-unsupported",
            Self::RemoteUnreachable => "remote-unreachable",
            Self::ToolNotAvailable => "tool-not-available",
            Self::PlanningRejected => "planning-rejected",
            Self::AlreadyExistsNotDir => "already-exists-not-dir",
            Self::Io => "io",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}
