//! Turning a validated request into an rsync command line.

use std::path::PathBuf;

use serde::Serialize;

use super::preflight::SyncRequest;
use crate::error::SyncError;

/// A concrete command ready to be spawned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferPlan {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Working directory for the child; inherits ours when `None`.
    pub cwd: Option<PathBuf>,
}

impl TransferPlan {
    pub fn new(command: Vec<String>) -> Self {
        Self { command, cwd: None }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }

    /// The command as a copy-pasteable shell line.
    pub fn display_command(&self) -> String {
        shell_words::join(&self.command)
    }
}

/// Builds rsync invocations.
#[derive(Debug, Clone)]
pub struct TransferPlanner {
    rsync: String,
    /// Value for `rsync -e` when one endpoint is remote.
    remote_shell: String,
}

impl Default for TransferPlanner {
    fn default() -> Self {
        Self::new("rsync", "ssh -o BatchMode=yes -o ConnectTimeout=10")
    }
}

impl TransferPlanner {
    pub fn new(rsync: impl Into<String>, remote_shell: impl Into<String>) -> Self {
        Self {
            rsync: rsync.into(),
            remote_shell: remote_shell.into(),
        }
    }

    pub fn rsync(&self) -> &str {
        &self.rsync
    }

    /// Build the command for `req`.
    ///
    /// Archive mode keeps permissions, symlinks, timestamps and structure, so
    /// re-running an unchanged sync transfers nothing. The source is rendered
    /// with a trailing `/` so its contents land directly in the destination.
    pub fn plan(&self, req: &SyncRequest) -> Result<TransferPlan, SyncError> {
        if req.source.is_remote() && req.destination.is_remote() {
            return Err(SyncError::PlanningRejected(format!(
                "both '{}' and '{}' are remote",
                req.source, req.destination
            )));
        }

        let mut command = vec![
            self.rsync.clone(),
            "--archive".to_string(),
            "--verbose".to_string(),
            "--human-readable".to_string(),
            "--stats".to_string(),
            // Keep spaces and shell metacharacters in remote names intact.
            "--protect-args".to_string(),
        ];

        let opts = &req.options;
        if opts.progress {
            command.push("--progress".to_string());
        }
        if opts.delete_extraneous {
            command.push("--delete".to_string());
        }
        if opts.dry_run {
            command.push("--dry-run".to_string());
        }
        if req.source.is_remote() || req.destination.is_remote() {
            command.push("-e".to_string());
            command.push(self.remote_shell.clone());
        }

        command.push("--".to_string());
        command.push(req.source.for_rsync_contents());
        command.push(req.destination.for_rsync_contents());

        let plan = TransferPlan::new(command);
        tracing::debug!(command = %plan.display_command(), "planned transfer");
        Ok(plan)
    }
}
