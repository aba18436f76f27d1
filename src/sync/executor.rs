//! Running a [`TransferPlan`] as a child process.
//!
//! The executor walks `Pending -> Running -> {Succeeded, Failed, Interrupted}`.
//! Output is forwarded to an [`OutputSink`] chunk by chunk while the child runs.
//! Cancellation is cooperative: the caller flips a [`CancelToken`], the
//! executor forwards SIGINT to the child (escalating to a kill after a grace
//! period) and returns only once the child has been reaped.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;

use super::plan::TransferPlan;
use crate::error::SyncError;

/// rsync's RERR_SIGNAL: it received SIGINT, SIGTERM or SIGHUP.
const RSYNC_SIGNAL_EXIT: i32 = 20;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to keep collecting output after the child has exited.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Shared flag used to request cancellation of a running transfer.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransferState {
    Pending,
    Running { pid: u32 },
    Succeeded,
    Failed { code: i32 },
    Interrupted,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed { .. } | Self::Interrupted
        )
    }
}

/// Which child stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Receives child output as it is produced.
pub trait OutputSink {
    fn chunk(&mut self, stream: OutputStream, data: &[u8]);
}

impl<F: FnMut(OutputStream, &[u8])> OutputSink for F {
    fn chunk(&mut self, stream: OutputStream, data: &[u8]) {
        self(stream, data)
    }
}

/// Sink that drops everything.
pub struct Discard;

impl OutputSink for Discard {
    fn chunk(&mut self, _stream: OutputStream, _data: &[u8]) {}
}

/// Sink that mirrors child output onto this process's stdout/stderr.
pub struct Passthrough;

impl OutputSink for Passthrough {
    fn chunk(&mut self, stream: OutputStream, data: &[u8]) {
        use std::io::Write;
        // A closed terminal must not abort the transfer.
        let _ = match stream {
            OutputStream::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(data).and_then(|_| out.flush())
            }
            OutputStream::Stderr => {
                let mut err = std::io::stderr().lock();
                err.write_all(data).and_then(|_| err.flush())
            }
        };
    }
}

/// Known rsync exit statuses, from rsync's `errcode.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitClass {
    Syntax,
    Protocol,
    FileSelect,
    Unsupported,
    StartClient,
    SocketIo,
    FileIo,
    StreamIo,
    PartialTransfer,
    Vanished,
    DeleteLimit,
    Timeout,
    ConnectionTimeout,
    CommandNotFound,
    /// The remote shell (ssh) could not connect.
    ConnectionFailure,
}

impl ExitClass {
    /// Classify a non-zero rsync exit code; unknown codes stay unclassified.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => Self::Syntax,
            2 => Self::Protocol,
            3 => Self::FileSelect,
            4 => Self::Unsupported,
            5 => Self::StartClient,
            10 => Self::SocketIo,
            11 => Self::FileIo,
            12 => Self::StreamIo,
            23 => Self::PartialTransfer,
            24 => Self::Vanished,
            25 => Self::DeleteLimit,
            30 => Self::Timeout,
            35 => Self::ConnectionTimeout,
            127 => Self::CommandNotFound,
            255 => Self::ConnectionFailure,
            _ => return None,
        })
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Syntax => "syntax or usage error",
            Self::Protocol => "protocol incompatibility",
            Self::FileSelect => "errors selecting input/output files, dirs",
            Self::Unsupported => "requested action not supported",
            Self::StartClient => "error starting client-server protocol",
            Self::SocketIo => "error in socket IO",
            Self::FileIo => "error in file IO",
            Self::StreamIo => "error in rsync protocol data stream",
            Self::PartialTransfer => "partial transfer",
            Self::Vanished => "some files vanished before they could be transferred",
            Self::DeleteLimit => "skipped some deletes due to --max-delete",
            Self::Timeout => "timeout in data send/receive",
            Self::ConnectionTimeout => "timeout waiting for daemon connection",
            Self::CommandNotFound => "remote rsync not found",
            Self::ConnectionFailure => "remote shell connection failure",
        }
    }
}

/// A non-zero exit, with the raw code always preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransferFailure {
    pub code: i32,
    pub class: Option<ExitClass>,
}

impl TransferFailure {
    pub fn from_code(code: i32) -> Self {
        Self {
            code,
            class: ExitClass::from_code(code),
        }
    }

    pub fn describe(&self) -> String {
        match self.class {
            Some(class) => format!("rsync exited with code {} ({})", self.code, class.description()),
            None => format!("rsync exited with code {}", self.code),
        }
    }
}

/// Statistics parsed from rsync `--stats` output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    /// Number of regular files transferred.
    pub files_transferred: u64,
    /// Total bytes transferred.
    pub bytes_transferred: u64,
    /// Wall-clock duration of the child process.
    pub duration_ms: u64,
}

/// How a transfer ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded(TransferReport),
    Failed(TransferFailure),
    Interrupted,
}

impl Outcome {
    /// Process exit code to surface: 0, the tool's own code, or 130.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Succeeded(_) => 0,
            Self::Failed(failure) => failure.code,
            Self::Interrupted => 130,
        }
    }

    pub fn kind(&self) -> Option<crate::error::ErrorKind> {
        match self {
            Self::Succeeded(_) => None,
            Self::Failed(_) => Some(crate::error::ErrorKind::Failed),
            Self::Interrupted => Some(crate::error::ErrorKind::Interrupted),
        }
    }
}

/// Something that can carry out a [`TransferPlan`].
pub trait TransferRunner: Send + Sync {
    /// Fail with `ToolNotAvailable` if the transfer tool cannot be found.
    fn check_available(&self, program: &str) -> Result<(), SyncError>;

    fn execute(
        &self,
        plan: &TransferPlan,
        sink: &mut dyn OutputSink,
        cancel: &CancelToken,
    ) -> Result<Outcome, SyncError>;
}

/// Runs plans as real child processes.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    /// Time a child gets to exit after SIGINT before it is killed.
    interrupt_grace: Duration,
    state: Arc<Mutex<TransferState>>,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self {
            interrupt_grace: Duration::from_secs(5),
            state: Arc::new(Mutex::new(TransferState::Pending)),
        }
    }

    /// Set how long an interrupted child may take to exit on its own.
    pub fn with_interrupt_grace(mut self, grace: Duration) -> Self {
        self.interrupt_grace = grace;
        self
    }

    /// Handle for observing the current state from another thread.
    pub fn state_handle(&self) -> Arc<Mutex<TransferState>> {
        Arc::clone(&self.state)
    }

    pub fn state(&self) -> TransferState {
        *self.state.lock()
    }

    fn transition(&self, next: TransferState) {
        let mut state = self.state.lock();
        tracing::debug!(from = ?*state, to = ?next, "transfer state");
        *state = next;
    }
}

impl TransferRunner for ProcessExecutor {
    fn check_available(&self, program: &str) -> Result<(), SyncError> {
        which::which(program)
            .map(|_| ())
            .map_err(|_| SyncError::ToolNotAvailable {
                tool: program.to_string(),
            })
    }

    fn execute(
        &self,
        plan: &TransferPlan,
        sink: &mut dyn OutputSink,
        cancel: &CancelToken,
    ) -> Result<Outcome, SyncError> {
        self.transition(TransferState::Pending);

        let (program, args) = plan
            .command
            .split_first()
            .ok_or_else(|| SyncError::PlanningRejected("empty command".to_string()))?;
        self.check_available(program)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &plan.cwd {
            cmd.current_dir(cwd);
        }

        let start = Instant::now();
        let child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SyncError::ToolNotAvailable {
                tool: program.clone(),
            },
            _ => SyncError::io(format!("failed to start {program}"), e),
        })?;
        let mut guard = ChildGuard::new(child);
        let pid = guard.id();
        self.transition(TransferState::Running { pid });
        tracing::debug!(pid, command = %plan.display_command(), "transfer started");

        let (tx, rx) = crossbeam_channel::unbounded();
        let readers = guard.take_readers(&tx);
        drop(tx);

        let mut stdout_text = Vec::new();
        let mut interrupt_sent: Option<Instant> = None;
        let status = loop {
            pump(&rx, sink, &mut stdout_text, POLL_INTERVAL);

            if let Some(status) = guard.try_wait()? {
                break status;
            }

            if cancel.is_cancelled() {
                match interrupt_sent {
                    None => {
                        tracing::info!(pid, "interrupting transfer");
                        guard.interrupt();
                        interrupt_sent = Some(Instant::now());
                    }
                    Some(at) if at.elapsed() >= self.interrupt_grace => {
                        tracing::warn!(pid, "transfer ignored interrupt, killing");
                        guard.kill();
                    }
                    Some(_) => {}
                }
            }
        };

        // A grandchild (ssh) can keep the pipes open after rsync exits, so the
        // tail is only drained for a bounded time before readers are detached.
        let drain_deadline = Instant::now() + DRAIN_TIMEOUT;
        loop {
            let remaining = drain_deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(msg) => forward(msg, sink, &mut stdout_text),
                Err(_) => break,
            }
        }
        for reader in readers {
            if reader.is_finished() {
                let _ = reader.join();
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        // A cancel that lands after the child exited does not rewrite its result.
        let outcome = classify(status, interrupt_sent.is_some(), &stdout_text, duration_ms);

        match &outcome {
            Outcome::Succeeded(report) => {
                self.transition(TransferState::Succeeded);
                tracing::info!(
                    files = report.files_transferred,
                    bytes = report.bytes_transferred,
                    duration_ms,
                    "transfer completed"
                );
            }
            Outcome::Failed(failure) => {
                self.transition(TransferState::Failed { code: failure.code });
                tracing::warn!(code = failure.code, error = %failure.describe(), "transfer failed");
            }
            Outcome::Interrupted => {
                self.transition(TransferState::Interrupted);
                tracing::info!(duration_ms, "transfer interrupted");
            }
        }
        Ok(outcome)
    }
}

fn classify(
    status: ExitStatus,
    interrupted: bool,
    stdout: &[u8],
    duration_ms: u64,
) -> Outcome {
    if interrupted || killed_by_interrupt(&status) {
        return Outcome::Interrupted;
    }
    match status.code() {
        Some(0) => {
            let mut report = parse_rsync_stats(&String::from_utf8_lossy(stdout));
            report.duration_ms = duration_ms;
            Outcome::Succeeded(report)
        }
        Some(RSYNC_SIGNAL_EXIT) => Outcome::Interrupted,
        Some(code) => Outcome::Failed(TransferFailure::from_code(code)),
        // Killed by some other signal: report it shell-style.
        None => Outcome::Failed(TransferFailure::from_code(128 + signal_of(&status))),
    }
}

#[cfg(unix)]
fn signal_of(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().unwrap_or(0)
}

#[cfg(not(unix))]
fn signal_of(_status: &ExitStatus) -> i32 {
    0
}

#[cfg(unix)]
fn killed_by_interrupt(status: &ExitStatus) -> bool {
    matches!(signal_of(status), libc::SIGINT | libc::SIGTERM)
}

#[cfg(not(unix))]
fn killed_by_interrupt(_status: &ExitStatus) -> bool {
    false
}

type Chunk = (OutputStream, Vec<u8>);

fn pump(rx: &Receiver<Chunk>, sink: &mut dyn OutputSink, stdout: &mut Vec<u8>, wait: Duration) {
    match rx.recv_timeout(wait) {
        Ok(msg) => {
            forward(msg, sink, stdout);
            while let Ok(msg) = rx.try_recv() {
                forward(msg, sink, stdout);
            }
        }
        // Both readers finished; avoid spinning while the child exits.
        Err(RecvTimeoutError::Disconnected) => thread::sleep(wait),
        Err(RecvTimeoutError::Timeout) => {}
    }
}

fn forward((stream, data): Chunk, sink: &mut dyn OutputSink, stdout: &mut Vec<u8>) {
    if stream == OutputStream::Stdout {
        stdout.extend_from_slice(&data);
    }
    sink.chunk(stream, &data);
}

fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
    stream: OutputStream,
    tx: Sender<Chunk>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send((stream, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Owns the child for the duration of one `execute` call and reaps it on
/// every exit path.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    fn id(&self) -> u32 {
        self.child.id()
    }

    fn take_readers(&mut self, tx: &Sender<Chunk>) -> Vec<thread::JoinHandle<()>> {
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = self.child.stdout.take() {
            readers.push(spawn_reader(out, OutputStream::Stdout, tx.clone()));
        }
        if let Some(err) = self.child.stderr.take() {
            readers.push(spawn_reader(err, OutputStream::Stderr, tx.clone()));
        }
        readers
    }

    fn try_wait(&mut self) -> Result<Option<ExitStatus>, SyncError> {
        let status = self
            .child
            .try_wait()
            .map_err(|e| SyncError::io("failed to poll transfer process", e))?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status)
    }

    /// Ask the child to stop the way a terminal Ctrl-C would.
    #[cfg(unix)]
    fn interrupt(&mut self) {
        let Ok(pid) = libc::pid_t::try_from(self.child.id()) else {
            self.kill();
            return;
        };
        // SAFETY: `pid` is our own unreaped child, so it cannot have been
        // recycled for another process.
        let rc = unsafe { libc::kill(pid, libc::SIGINT) };
        if rc != 0 {
            self.kill();
        }
    }

    #[cfg(not(unix))]
    fn interrupt(&mut self) {
        self.kill();
    }

    fn kill(&mut self) {
        let _ = self.child.kill();
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Parse transfer statistics from rsync `--stats` output.
///
/// Handles both plain (`1234`) and human-readable (`1.23K`, `1,234`) numbers.
pub fn parse_rsync_stats(output: &str) -> TransferReport {
    let mut report = TransferReport::default();

    for line in output.lines() {
        let line = line.trim();

        // rsync 2.x says "Number of files transferred".
        if let Some(rest) = line
            .strip_prefix("Number of regular files transferred:")
            .or_else(|| line.strip_prefix("Number of files transferred:"))
        {
            report.files_transferred = parse_count(rest).unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("Total transferred file size:") {
            report.bytes_transferred = parse_count(rest).unwrap_or(0);
        }
    }

    report
}

/// Parse the first token of a stats value, honoring `,` separators and the
/// K/M/G/T suffixes a single `--human-readable` produces (powers of 1000).
fn parse_count(text: &str) -> Option<u64> {
    let token = text.split_whitespace().next()?.replace(',', "");
    let (digits, multiplier) = match token.chars().last()? {
        'K' => (&token[..token.len() - 1], 1e3),
        'M' => (&token[..token.len() - 1], 1e6),
        'G' => (&token[..token.len() - 1], 1e9),
        'T' => (&token[..token.len() - 1], 1e12),
        _ => (token.as_str(), 1f64),
    };
    if multiplier == 1f64 {
        return digits.parse().ok();
    }
    let value: f64 = digits.parse().ok()?;
    Some((value * multiplier).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sh(script: &str) -> TransferPlan {
        TransferPlan::new(vec!["sh".into(), "-c".into(), script.into()])
    }

    #[test]
    fn test_parse_rsync_stats() {
        let output = r#"
Number of files: 42 (reg: 40, dir: 2)
Number of regular files transferred: 10
Total file size: 9,999 bytes
Total transferred file size: 1,234 bytes
        "#;

        let report = parse_rsync_stats(output);
        assert_eq!(report.files_transferred, 10);
        assert_eq!(report.bytes_transferred, 1234);
    }

    #[test]
    fn test_parse_rsync_stats_human_readable() {
        let report = parse_rsync_stats("Total transferred file size: 1.02K bytes\n");
        assert_eq!(report.bytes_transferred, 1020);
        let report = parse_rsync_stats("Total transferred file size: 1.05M bytes\n");
        assert_eq!(report.bytes_transferred, 1_050_000);
    }

    #[test]
    fn test_parse_rsync_stats_empty() {
        assert_eq!(parse_rsync_stats(""), TransferReport::default());
    }

    #[test]
    fn test_exit_class_known_and_unknown() {
        assert_eq!(ExitClass::from_code(23), Some(ExitClass::PartialTransfer));
        assert_eq!(ExitClass::from_code(255), Some(ExitClass::ConnectionFailure));
        assert_eq!(ExitClass::from_code(42), None);
        assert_eq!(
            TransferFailure::from_code(42).describe(),
            "rsync exited with code 42"
        );
        assert_eq!(
            TransferFailure::from_code(23).describe(),
            "rsync exited with code 23 (partial transfer)"
        );
    }

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(Outcome::Succeeded(TransferReport::default()).exit_code(), 0);
        assert_eq!(Outcome::Failed(TransferFailure::from_code(23)).exit_code(), 23);
        assert_eq!(Outcome::Interrupted.exit_code(), 130);
        assert_eq!(Outcome::Interrupted.kind(), Some(ErrorKind::Interrupted));
    }

    #[cfg(unix)]
    #[test]
    fn test_late_cancel_keeps_clean_exit() {
        use std::os::unix::process::ExitStatusExt;
        let stats = b"Number of regular files transferred: 4\n";

        let clean = ExitStatus::from_raw(0);
        assert!(matches!(
            classify(clean, false, stats, 10),
            Outcome::Succeeded(TransferReport { files_transferred: 4, .. })
        ));
        assert_eq!(classify(clean, true, stats, 10), Outcome::Interrupted);

        let sigint = ExitStatus::from_raw(libc::SIGINT);
        assert_eq!(classify(sigint, false, b"", 10), Outcome::Interrupted);
        let partial = ExitStatus::from_raw(23 << 8);
        assert_eq!(
            classify(partial, false, b"", 10),
            Outcome::Failed(TransferFailure::from_code(23))
        );
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_missing_tool() {
        let executor = ProcessExecutor::new();
        let plan = TransferPlan::new(vec!["definitely-not-a-real-rsync-binary".into()]);
        let err = executor
            .execute(&plan, &mut Discard, &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolNotAvailable);
        assert_eq!(executor.state(), TransferState::Pending);
        assert!(!executor.state().is_terminal());
    }

    #[cfg(unix)]
    #[test]
    fn test_success_streams_output() {
        let executor = ProcessExecutor::new();
        let mut seen: Vec<(OutputStream, Vec<u8>)> = Vec::new();
        let mut sink = |stream: OutputStream, data: &[u8]| seen.push((stream, data.to_vec()));
        let outcome = executor
            .execute(
                &sh("echo 'Number of regular files transferred: 3'; echo warn >&2"),
                &mut sink,
                &CancelToken::new(),
            )
            .unwrap();

        match outcome {
            Outcome::Succeeded(report) => assert_eq!(report.files_transferred, 3),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(executor.state(), TransferState::Succeeded);
        assert!(seen.iter().any(|(s, d)| *s == OutputStream::Stderr && d == b"warn\n"));
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_preserves_code() {
        let executor = ProcessExecutor::new();
        let outcome = executor
            .execute(&sh("exit 23"), &mut Discard, &CancelToken::new())
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Failed(TransferFailure {
                code: 23,
                class: Some(ExitClass::PartialTransfer),
            })
        );
        assert_eq!(executor.state(), TransferState::Failed { code: 23 });
        assert!(executor.state().is_terminal());
    }

    #[cfg(unix)]
    #[test]
    fn test_rsync_signal_exit_is_interrupted() {
        let outcome = ProcessExecutor::new()
            .execute(&sh("exit 20"), &mut Discard, &CancelToken::new())
            .unwrap();
        assert_eq!(outcome, Outcome::Interrupted);
    }

    #[cfg(unix)]
    #[test]
    fn test_cwd_is_applied() {
        let tmp = tempfile::tempdir().unwrap();
        let mut out = Vec::new();
        let mut sink = |stream: OutputStream, data: &[u8]| {
            if stream == OutputStream::Stdout {
                out.extend_from_slice(data);
            }
        };
        ProcessExecutor::new()
            .execute(&sh("pwd").with_cwd(tmp.path()), &mut sink, &CancelToken::new())
            .unwrap();
        let printed = String::from_utf8(out).unwrap();
        let expected = tmp.path().canonicalize().unwrap();
        assert_eq!(
            std::path::Path::new(printed.trim()).canonicalize().unwrap(),
            expected
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_interrupt_reaps_child() {
        let executor = ProcessExecutor::new().with_interrupt_grace(Duration::from_secs(2));
        let state = executor.state_handle();
        let cancel = CancelToken::new();

        let canceller = {
            let cancel = cancel.clone();
            let state = Arc::clone(&state);
            thread::spawn(move || {
                let deadline = Instant::now() + Duration::from_secs(10);
                loop {
                    if let TransferState::Running { pid } = *state.lock() {
                        cancel.cancel();
                        return Some(pid);
                    }
                    if Instant::now() > deadline {
                        return None;
                    }
                    thread::sleep(Duration::from_millis(10));
                }
            })
        };

        let plan = TransferPlan::new(vec!["sleep".into(), "30".into()]);
        let start = Instant::now();
        let outcome = executor.execute(&plan, &mut Discard, &cancel).unwrap();
        let pid = canceller.join().unwrap().expect("transfer never reached Running");

        assert_eq!(outcome, Outcome::Interrupted);
        assert_eq!(executor.state(), TransferState::Interrupted);
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(
            !std::path::Path::new(&format!("/proc/{pid}")).exists(),
            "child {pid} still in the process table"
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_interrupt_escalates_to_kill() {
        let executor = ProcessExecutor::new().with_interrupt_grace(Duration::from_millis(200));
        let cancel = CancelToken::new();
        cancel.cancel();
        // The ignored SIGINT survives exec, so only the kill after the grace
        // period ends it.
        let plan = sh("trap '' INT; exec sleep 30");
        let start = Instant::now();
        let outcome = executor.execute(&plan, &mut Discard, &cancel).unwrap();
        assert_eq!(outcome, Outcome::Interrupted);
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
