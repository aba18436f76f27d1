//! Checks run before any transfer side effect.

use serde::Serialize;

use super::path::PathRef;
use super::remote::RemoteShell;
use crate::error::SyncError;

/// What rsync should do beyond the always-on archive behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferOptions {
    /// Remove files at the destination that are absent from the source.
    pub delete_extraneous: bool,
    /// Report what would change without changing anything.
    pub dry_run: bool,
    /// Ask rsync for per-file progress output.
    pub progress: bool,
}

/// One source → destination sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncRequest {
    pub source: PathRef,
    pub destination: PathRef,
    pub options: TransferOptions,
}

impl SyncRequest {
    pub fn new(source: PathRef, destination: PathRef, options: TransferOptions) -> Self {
        Self {
            source,
            destination,
            options,
        }
    }
}

/// Validate `req` without touching the filesystem.
///
/// Checks run in a fixed order and the first failure is returned: source
/// exists, source is a directory, destination parent exists, destination
/// parent is a directory, and finally the topology. A probe that cannot reach
/// its host fails with `RemoteUnreachable` on the spot instead of being read
/// as "missing".
pub fn validate(req: &SyncRequest, shell: &dyn RemoteShell) -> Result<(), SyncError> {
    let source = &req.source;
    if !source.exists(shell)? {
        return Err(SyncError::SourceNotFound {
            path: describe(source),
            host: source.host().map(str::to_string),
        });
    }
    if !source.is_dir(shell)? {
        return Err(SyncError::SourceNotDirectory {
            path: describe(source),
            host: source.host().map(str::to_string),
        });
    }

    let parent = req.destination.parent();
    if !parent.exists(shell)? {
        return Err(SyncError::DestParentNotFound {
            path: describe(&parent),
            host: parent.host().map(str::to_string),
        });
    }
    if !parent.is_dir(shell)? {
        return Err(SyncError::DestParentNotDirectory {
            path: describe(&parent),
            host: parent.host().map(str::to_string),
        });
    }

    if source.is_remote() && req.destination.is_remote() {
        return Err(SyncError::RemoteToRemoteUnsupported {
            source_display: source.to_string(),
            destination: req.destination.to_string(),
        });
    }

    tracing::debug!(
        source = %source,
        destination = %req.destination,
        "preflight passed"
    );
    Ok(())
}

/// Path text for messages; the host is reported separately.
fn describe(path: &PathRef) -> String {
    match path {
        PathRef::Local { .. } => path.for_display(),
        PathRef::Remote { path, .. } => path.clone(),
    }
}
