//! Entry points composing resolve → validate → plan → execute.
//!
//! # Example
//!
//! ```rust,ignore
//! use synctools::sync::{CancelToken, Passthrough, SyncEngine, TransferOptions};
//!
//! let engine = SyncEngine::from_config(&config);
//! let outcome = engine.sync_to(".", "me@backup:/srv", TransferOptions::default(),
//!     &mut Passthrough, &CancelToken::new())?;
//! std::process::exit(outcome.exit_code());
//! ```

use serde::Serialize;

use super::diff::{self, ComparisonResult};
use super::executor::{CancelToken, Outcome, OutputSink, ProcessExecutor, TransferRunner};
use super::path::{PathRef, PathResolver};
use super::plan::{TransferPlan, TransferPlanner};
use super::preflight::{self, SyncRequest, TransferOptions};
use super::remote::{RemoteShell, SshShell};
use crate::config::Config;
use crate::error::SyncError;

/// Observer for milestones of a sync, used by the CLI to print status lines.
pub trait SyncObserver {
    /// Called after validation, before any side effect.
    fn planned(&mut self, _request: &SyncRequest, _plan: &TransferPlan) {}
}

impl SyncObserver for () {}

/// Result of comparing a local directory with its counterpart.
#[derive(Debug, Clone, Serialize)]
pub struct DiffReport {
    pub local: PathRef,
    pub other: PathRef,
    pub results: Vec<ComparisonResult>,
}

/// Facade over the sync pipeline.
///
/// Generic over the remote probe and the transfer runner so tests can
/// substitute fakes for ssh and rsync.
///
/// # Limitations
///
/// No locking is done around a destination. Two runs writing into
/// overlapping destination trees at the same time get whatever rsync's
/// per-file semantics produce.
pub struct SyncEngine<S = SshShell, R = ProcessExecutor> {
    resolver: PathResolver,
    shell: S,
    planner: TransferPlanner,
    runner: R,
}

impl SyncEngine {
    /// Build an engine driving the real `ssh` and `rsync` binaries.
    pub fn from_config(config: &Config) -> Self {
        let shell = SshShell::new(&config.ssh_command)
            .with_connection_timeout(config.connect_timeout_secs)
            .with_probe_timeout(config.probe_timeout());
        let planner = TransferPlanner::new(&config.rsync_path, shell.rsync_shell());
        let runner = ProcessExecutor::new().with_interrupt_grace(config.interrupt_grace());
        let resolver = PathResolver::new().with_host_override(config.remote_host.clone());
        Self::with_parts(resolver, shell, planner, runner)
    }
}

impl<S: RemoteShell, R: TransferRunner> SyncEngine<S, R> {
    pub fn with_parts(resolver: PathResolver, shell: S, planner: TransferPlanner, runner: R) -> Self {
        Self {
            resolver,
            shell,
            planner,
            runner,
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Sync `source` into `<dest_parent>/<name of source>`.
    pub fn sync_dirs(
        &self,
        source: &str,
        dest_parent: &str,
        options: TransferOptions,
        sink: &mut dyn OutputSink,
        cancel: &CancelToken,
    ) -> Result<Outcome, SyncError> {
        self.sync_dirs_observed(source, dest_parent, options, sink, cancel, &mut ())
    }

    pub fn sync_dirs_observed(
        &self,
        source: &str,
        dest_parent: &str,
        options: TransferOptions,
        sink: &mut dyn OutputSink,
        cancel: &CancelToken,
        observer: &mut dyn SyncObserver,
    ) -> Result<Outcome, SyncError> {
        let source = self.resolver.resolve(source)?;
        let dest_parent = self.resolver.resolve(dest_parent)?;
        let request = self.nest_under(source, &dest_parent, options)?;
        self.run(request, sink, cancel, observer)
    }

    /// Push a local directory to `<dest_parent>/<name of local_source>`.
    ///
    /// `local_source` must be a local path; the parent may be local or remote.
    pub fn sync_to(
        &self,
        local_source: &str,
        dest_parent: &str,
        options: TransferOptions,
        sink: &mut dyn OutputSink,
        cancel: &CancelToken,
    ) -> Result<Outcome, SyncError> {
        self.sync_to_observed(local_source, dest_parent, options, sink, cancel, &mut ())
    }

    pub fn sync_to_observed(
        &self,
        local_source: &str,
        dest_parent: &str,
        options: TransferOptions,
        sink: &mut dyn OutputSink,
        cancel: &CancelToken,
        observer: &mut dyn SyncObserver,
    ) -> Result<Outcome, SyncError> {
        let source = self.resolver.resolve_local(local_source, "sync source")?;
        let dest_parent = self.resolver.resolve(dest_parent)?;
        let request = self.nest_under(source, &dest_parent, options)?;
        self.run(request, sink, cancel, observer)
    }

    /// Pull `<source_parent>/<name of local_destination>` into
    /// `local_destination`.
    ///
    /// `local_destination` must be a local path; the parent may be local or
    /// remote.
    pub fn sync_from(
        &self,
        source_parent: &str,
        local_destination: &str,
        options: TransferOptions,
        sink: &mut dyn OutputSink,
        cancel: &CancelToken,
    ) -> Result<Outcome, SyncError> {
        self.sync_from_observed(source_parent, local_destination, options, sink, cancel, &mut ())
    }

    pub fn sync_from_observed(
        &self,
        source_parent: &str,
        local_destination: &str,
        options: TransferOptions,
        sink: &mut dyn OutputSink,
        cancel: &CancelToken,
        observer: &mut dyn SyncObserver,
    ) -> Result<Outcome, SyncError> {
        let destination = self
            .resolver
            .resolve_local(local_destination, "sync destination")?;
        let source_parent = self.resolver.resolve(source_parent)?;
        let name = named(&destination, local_destination)?;
        let request = SyncRequest::new(source_parent.join(&name), destination, options);
        self.run(request, sink, cancel, observer)
    }

    /// Compare `local_dir` with `<other_parent>/<name of local_dir>`.
    pub fn diff(&self, local_dir: &str, other_parent: &str) -> Result<DiffReport, SyncError> {
        let local = self.resolver.resolve_local(local_dir, "local directory")?;
        let other_parent = self.resolver.resolve(other_parent)?;
        let name = named(&local, local_dir)?;
        let other = other_parent.join(&name);

        // Same checks as a sync pulling `other` into `local`.
        let probe = SyncRequest::new(other.clone(), local.clone(), TransferOptions::default());
        preflight::validate(&probe, &self.shell)?;
        if !local.is_dir(&self.shell)? {
            return Err(SyncError::SourceNotDirectory {
                path: local.for_display(),
                host: None,
            });
        }

        let PathRef::Local { path } = &local else {
            return Err(SyncError::invalid_path(local_dir, "local directory must be a local path"));
        };
        let results = diff::compare(path, &other, &self.shell)?;
        Ok(DiffReport {
            local,
            other,
            results,
        })
    }

    /// Run an already-built request: check the tool, validate, create the
    /// destination, plan, execute.
    pub fn sync_request(
        &self,
        request: SyncRequest,
        sink: &mut dyn OutputSink,
        cancel: &CancelToken,
    ) -> Result<Outcome, SyncError> {
        self.run(request, sink, cancel, &mut ())
    }

    fn run(
        &self,
        request: SyncRequest,
        sink: &mut dyn OutputSink,
        cancel: &CancelToken,
        observer: &mut dyn SyncObserver,
    ) -> Result<Outcome, SyncError> {
        self.runner.check_available(self.planner.rsync())?;
        preflight::validate(&request, &self.shell)?;
        let plan = self.planner.plan(&request)?;
        observer.planned(&request, &plan);

        if cancel.is_cancelled() {
            return Ok(Outcome::Interrupted);
        }
        request.destination.mkdir(true, &self.shell)?;

        tracing::info!(
            source = %request.source,
            destination = %request.destination,
            delete = request.options.delete_extraneous,
            "starting sync"
        );
        self.runner.execute(&plan, sink, cancel)
    }

    fn nest_under(
        &self,
        source: PathRef,
        dest_parent: &PathRef,
        options: TransferOptions,
    ) -> Result<SyncRequest, SyncError> {
        let name = named(&source, &source.to_string())?;
        let destination = dest_parent.join(&name);
        Ok(SyncRequest::new(source, destination, options))
    }
}

/// The final component of `path`, which must exist for nesting to make sense.
fn named(path: &PathRef, raw: &str) -> Result<String, SyncError> {
    let name = path.name();
    if name.is_empty() || name == "." || name == ".." || name == "~" {
        return Err(SyncError::invalid_path(raw, "path has no usable directory name"));
    }
    Ok(name)
}

impl<S: RemoteShell, R: TransferRunner> std::fmt::Debug for SyncEngine<S, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("resolver", &self.resolver)
            .field("planner", &self.planner)
            .finish_non_exhaustive()
    }
}
