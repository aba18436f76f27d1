//! Non-interactive command execution on SSH hosts.
//!
//! Every remote capability check (existence, directory test, mkdir, file
//! listing) goes through [`RemoteShell`]. The default implementation shells
//! out to `ssh` in batch mode so it never prompts, and bounds each call with a
//! wall-clock deadline on top of ssh's own `ConnectTimeout`.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::SyncError;

/// Exit status ssh reserves for its own failures (connection, auth, ...).
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// How often the deadline loop polls the child.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Result of a remote command that actually ran on the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    /// Exit status of the remote command.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs a single shell command on a remote host.
///
/// Implementations must return `Err(RemoteUnreachable)` when the host could
/// not be asked at all (transport failure, timeout), and `Ok` with the
/// command's exit status otherwise.
pub trait RemoteShell: Send + Sync {
    fn run(&self, host: &str, command: &str) -> Result<RemoteOutput, SyncError>;
}

impl<T: RemoteShell + ?Sized> RemoteShell for &T {
    fn run(&self, host: &str, command: &str) -> Result<RemoteOutput, SyncError> {
        (**self).run(host, command)
    }
}

impl<T: RemoteShell + ?Sized> RemoteShell for Box<T> {
    fn run(&self, host: &str, command: &str) -> Result<RemoteOutput, SyncError> {
        (**self).run(host, command)
    }
}

/// [`RemoteShell`] backed by the `ssh` binary.
#[derive(Debug, Clone)]
pub struct SshShell {
    program: String,
    /// ssh `ConnectTimeout` in seconds.
    connection_timeout: u64,
    /// Upper bound on a whole probe, connection included.
    probe_timeout: Duration,
}

impl Default for SshShell {
    fn default() -> Self {
        Self::new("ssh")
    }
}

impl SshShell {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            connection_timeout: 10,
            probe_timeout: Duration::from_secs(20),
        }
    }

    /// Set the ssh connection timeout.
    pub fn with_connection_timeout(mut self, seconds: u64) -> Self {
        self.connection_timeout = seconds;
        self
    }

    /// Set the wall-clock bound for a single probe.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn connection_timeout(&self) -> u64 {
        self.connection_timeout
    }

    /// Options that keep ssh from ever waiting on a human.
    pub fn batch_options(&self) -> Vec<String> {
        vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.connection_timeout),
        ]
    }

    /// The remote shell command line handed to `rsync -e`.
    pub fn rsync_shell(&self) -> String {
        let mut line = shell_words::quote(&self.program).into_owned();
        for option in self.batch_options() {
            line.push(' ');
            line.push_str(&option);
        }
        line
    }
}

impl RemoteShell for SshShell {
    fn run(&self, host: &str, command: &str) -> Result<RemoteOutput, SyncError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.batch_options())
            .arg("--")
            .arg(host)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::debug!(host = %host, command = %command, "remote probe");

        let output = run_with_deadline(cmd, self.probe_timeout).map_err(|e| match e {
            DeadlineError::Spawn(e) => {
                SyncError::unreachable(host, format!("failed to execute {}: {e}", self.program))
            }
            DeadlineError::TimedOut => SyncError::unreachable(
                host,
                format!("no answer within {}s", self.probe_timeout.as_secs()),
            ),
            DeadlineError::Signalled => {
                SyncError::unreachable(host, format!("{} was killed by a signal", self.program))
            }
        })?;

        if output.status == SSH_TRANSPORT_FAILURE {
            let reason = stderr_reason(&output.stderr).unwrap_or("ssh connection failed");
            tracing::warn!(host = %host, error = %reason, "ssh transport failure");
            return Err(SyncError::unreachable(host, reason));
        }

        Ok(output)
    }
}

#[derive(Debug)]
enum DeadlineError {
    Spawn(std::io::Error),
    TimedOut,
    Signalled,
}

/// Run `cmd` to completion, killing it if it outlives `timeout`.
///
/// stdout and stderr are drained on helper threads so a chatty child cannot
/// block on a full pipe while the deadline loop waits.
fn run_with_deadline(mut cmd: Command, timeout: Duration) -> Result<RemoteOutput, DeadlineError> {
    let mut child = cmd.spawn().map_err(DeadlineError::Spawn)?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(DeadlineError::Spawn(e));
            }
        }
    };

    // On timeout the drain threads are left detached: a grandchild may still
    // hold the pipes open.
    let status = status.ok_or(DeadlineError::TimedOut)?;

    let stdout = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
    let stderr = stderr.and_then(|h| h.join().ok()).unwrap_or_default();

    let code = status.code().ok_or(DeadlineError::Signalled)?;

    Ok(RemoteOutput {
        status: code,
        stdout,
        stderr,
    })
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// The last non-empty line of `stderr`, which is where ssh and the remote
/// shell put the fatal reason. Earlier lines go to the debug log.
pub fn stderr_reason(stderr: &str) -> Option<&str> {
    let mut lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let last = lines.pop()?;
    for line in lines {
        tracing::debug!(detail = %line, "remote stderr");
    }
    Some(last)
}

/// Quote a remote path for the remote shell.
///
/// A leading `~` or `~/` stays unquoted so the remote shell expands it to the
/// login user's home directory; everything else is quoted verbatim.
pub fn quote_remote_path(path: &str) -> String {
    if path == "~" {
        return "~".to_string();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if rest.is_empty() {
            return "~/".to_string();
        }
        return format!("~/{}", shell_words::quote(rest));
    }
    shell_words::quote(path).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_remote_path_plain() {
        assert_eq!(quote_remote_path("/srv/data"), "/srv/data");
        assert_eq!(quote_remote_path("/srv/my data"), "'/srv/my data'");
    }

    #[test]
    fn test_quote_remote_path_keeps_tilde_unquoted() {
        assert_eq!(quote_remote_path("~"), "~");
        assert_eq!(quote_remote_path("~/"), "~/");
        assert_eq!(quote_remote_path("~/a b"), "~/'a b'");
        assert_eq!(quote_remote_path("~/projects"), "~/projects");
    }

    #[test]
    fn test_rsync_shell_includes_batch_mode() {
        let shell = SshShell::default().with_connection_timeout(7);
        assert_eq!(
            shell.rsync_shell(),
            "ssh -o BatchMode=yes -o ConnectTimeout=7"
        );
        let spaced = SshShell::new("/opt/my tools/ssh").with_connection_timeout(3);
        assert_eq!(
            spaced.rsync_shell(),
            "'/opt/my tools/ssh' -o BatchMode=yes -o ConnectTimeout=3"
        );
    }

    #[test]
    fn test_stderr_reason_keeps_last_line() {
        let stderr = "Warning: Permanently added 'box' to the list of known hosts.\n\
                      user@box: Permission denied (publickey).\n\n";
        assert_eq!(
            stderr_reason(stderr),
            Some("user@box: Permission denied (publickey).")
        );
        assert_eq!(stderr_reason("  \n"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_transport_failure_message_is_one_line() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let fake = tmp.path().join("ssh");
        std::fs::write(
            &fake,
            "#!/bin/sh\n\
             echo \"Warning: Permanently added 'box' to the list of known hosts.\" >&2\n\
             echo 'user@box: Permission denied (publickey).' >&2\n\
             exit 255\n",
        )
        .unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let err = SshShell::new(fake.to_string_lossy())
            .run("box", "true")
            .unwrap_err();
        let message = err.to_string();
        assert_eq!(
            message,
            "host 'box' is unreachable: user@box: Permission denied (publickey)."
        );
        assert!(!message.contains('\n'));
    }

    #[test]
    fn test_missing_ssh_binary_is_unreachable() {
        let shell = SshShell::new("/nonexistent/ssh-binary-for-tests");
        let err = shell.run("somehost", "true").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::RemoteUnreachable);
    }

    #[cfg(unix)]
    #[test]
    fn test_probe_deadline_kills_hung_command() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let start = Instant::now();
        let result = run_with_deadline(cmd, Duration::from_millis(200));
        assert!(matches!(result, Err(DeadlineError::TimedOut)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_deadline_captures_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2; exit 3"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let output = run_with_deadline(cmd, Duration::from_secs(10)).unwrap();
        assert_eq!(output.status, 3);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }
}
