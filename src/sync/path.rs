//! Locality-tagged paths.
//!
//! A [`PathRef`] is either a directory on this machine or a `[user@]host:path`
//! location reached over SSH. Every operation whose behavior depends on where
//! the path lives (existence checks, mkdir, rendering for rsync) is a method
//! here, so callers never inspect path strings themselves.
//!
//! ```rust,ignore
//! use synctools::sync::{PathRef, PathResolver};
//!
//! let resolver = PathResolver::new();
//! assert!(matches!(resolver.resolve("relative/dir")?, PathRef::Local { .. }));
//! assert!(matches!(resolver.resolve("me@box:/srv")?, PathRef::Remote { .. }));
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::remote::{RemoteShell, quote_remote_path, stderr_reason};
use crate::error::SyncError;

/// Exit status the remote mkdir script uses for "exists but not a directory".
const MKDIR_NOT_DIR_STATUS: i32 = 3;

/// A directory reference, local or remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PathRef {
    Local { path: PathBuf },
    Remote { host: String, path: String },
}

impl PathRef {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::Local { path: path.into() }
    }

    pub fn remote(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Remote {
            host: host.into(),
            path: path.into(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// The `[user@]host` token for remote paths.
    pub fn host(&self) -> Option<&str> {
        match self {
            Self::Local { .. } => None,
            Self::Remote { host, .. } => Some(host),
        }
    }

    /// The path component, without any host prefix.
    pub fn path_str(&self) -> String {
        match self {
            Self::Local { path } => path.to_string_lossy().into_owned(),
            Self::Remote { path, .. } => path.clone(),
        }
    }

    /// Whether the path exists.
    pub fn exists(&self, shell: &dyn RemoteShell) -> Result<bool, SyncError> {
        match self {
            Self::Local { path } => Ok(path.exists()),
            Self::Remote { host, path } => remote_test(shell, host, "-e", path),
        }
    }

    /// Whether the path exists and is a directory.
    pub fn is_dir(&self, shell: &dyn RemoteShell) -> Result<bool, SyncError> {
        match self {
            Self::Local { path } => Ok(path.is_dir()),
            Self::Remote { host, path } => remote_test(shell, host, "-d", path),
        }
    }

    /// Create this directory.
    ///
    /// Succeeds when the directory already exists; fails with
    /// [`SyncError::AlreadyExistsNotDir`] when something other than a
    /// directory is in the way.
    pub fn mkdir(&self, parents: bool, shell: &dyn RemoteShell) -> Result<(), SyncError> {
        match self {
            Self::Local { path } => mkdir_local(path, parents),
            Self::Remote { host, path } => mkdir_remote(shell, host, path, parents),
        }
    }

    /// Append a path segment.
    pub fn join(&self, segment: &str) -> PathRef {
        match self {
            Self::Local { path } => Self::Local {
                path: path.join(segment),
            },
            Self::Remote { host, path } => {
                let base = path.trim_end_matches('/');
                let segment = segment.trim_matches('/');
                let joined = match (base.is_empty(), segment.is_empty()) {
                    (_, true) if path.starts_with('/') && base.is_empty() => "/".to_string(),
                    (_, true) => base.to_string(),
                    (true, false) if path.starts_with('/') => format!("/{segment}"),
                    (true, false) => segment.to_string(),
                    (false, false) => format!("{base}/{segment}"),
                };
                Self::Remote {
                    host: host.clone(),
                    path: joined,
                }
            }
        }
    }

    /// The containing directory.
    ///
    /// The parent of a bare relative name is `.`; the parent of `/` is `/`;
    /// the parent of `~` is `~` itself.
    pub fn parent(&self) -> PathRef {
        match self {
            Self::Local { path } => {
                let parent = match path.parent() {
                    Some(p) if p.as_os_str().is_empty() => PathBuf::from("."),
                    Some(p) => p.to_path_buf(),
                    None => path.clone(),
                };
                Self::Local { path: parent }
            }
            Self::Remote { host, path } => Self::Remote {
                host: host.clone(),
                path: remote_parent(path),
            },
        }
    }

    /// Final path component.
    ///
    /// Relative paths such as `.` are resolved against the working directory
    /// first so that the current directory still has a usable name.
    pub fn name(&self) -> String {
        match self {
            Self::Local { path } => {
                let resolved = path.canonicalize().unwrap_or_else(|_| path.clone());
                resolved
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            }
            Self::Remote { path, .. } => path
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string(),
        }
    }

    /// Human-facing rendering: absolute local paths, `host:path` for remotes.
    pub fn for_display(&self) -> String {
        match self {
            Self::Local { path } => path
                .canonicalize()
                .unwrap_or_else(|_| path.clone())
                .display()
                .to_string(),
            Self::Remote { host, path } => format!("{host}:{path}"),
        }
    }

    /// Rendering for an rsync operand, without a trailing separator.
    pub fn for_rsync(&self) -> String {
        match self {
            Self::Local { path } => {
                let text = path.to_string_lossy();
                // rsync reads `a:b` as host `a`; keep relative local names local.
                if !path.is_absolute() && text.contains(':') {
                    format!("./{text}")
                } else {
                    text.into_owned()
                }
            }
            Self::Remote { host, path } => {
                // rsync resolves relative remote paths against the login
                // directory, and --protect-args stops the remote shell from
                // expanding `~`.
                let path = if path == "~" || path == "~/" {
                    ".".to_string()
                } else if let Some(rest) = path.strip_prefix("~/") {
                    rest.to_string()
                } else {
                    path.clone()
                };
                format!("{host}:{path}")
            }
        }
    }

    /// [`for_rsync`](Self::for_rsync) with exactly one trailing `/`, so rsync
    /// copies the directory's contents rather than the directory itself.
    pub fn for_rsync_contents(&self) -> String {
        let rendered = self.for_rsync();
        if rendered.ends_with('/') {
            rendered
        } else {
            format!("{rendered}/")
        }
    }
}

impl fmt::Display for PathRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { path } => write!(f, "{}", path.display()),
            Self::Remote { host, path } => write!(f, "{host}:{path}"),
        }
    }
}

fn remote_test(
    shell: &dyn RemoteShell,
    host: &str,
    flag: &str,
    path: &str,
) -> Result<bool, SyncError> {
    let output = shell.run(host, &format!("test {flag} {}", quote_remote_path(path)))?;
    Ok(output.success())
}

fn mkdir_local(path: &Path, parents: bool) -> Result<(), SyncError> {
    if path.exists() && !path.is_dir() {
        return Err(SyncError::AlreadyExistsNotDir {
            path: path.display().to_string(),
            host: None,
        });
    }
    let result = if parents {
        std::fs::create_dir_all(path)
    } else {
        std::fs::create_dir(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(SyncError::io(
            format!("failed to create directory '{}'", path.display()),
            e,
        )),
    }
}

fn mkdir_remote(
    shell: &dyn RemoteShell,
    host: &str,
    path: &str,
    parents: bool,
) -> Result<(), SyncError> {
    let quoted = quote_remote_path(path);
    let mkdir = if parents { "mkdir -p" } else { "mkdir" };
    let script = format!(
        "if [ -e {quoted} ] && [ ! -d {quoted} ]; then exit {MKDIR_NOT_DIR_STATUS}; fi; \
         [ -d {quoted} ] || {mkdir} {quoted}"
    );
    let output = shell.run(host, &script)?;
    match output.status {
        0 => Ok(()),
        MKDIR_NOT_DIR_STATUS => Err(SyncError::AlreadyExistsNotDir {
            path: path.to_string(),
            host: Some(host.to_string()),
        }),
        status => Err(SyncError::io(
            format!("failed to create '{path}' on host '{host}'"),
            std::io::Error::other(match stderr_reason(&output.stderr) {
                Some(reason) => format!("mkdir exited with status {status}: {reason}"),
                None => format!("mkdir exited with status {status}"),
            }),
        )),
    }
}

fn remote_parent(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed == "~" {
        return "~".to_string();
    }
    match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
        None => ".".to_string(),
    }
}

/// Parses user-supplied path strings into [`PathRef`]s.
///
/// An optional host override replaces the host of every remote path it
/// resolves; test suites use it to point `box:/tmp/x` style arguments at
/// `localhost`.
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    host_override: Option<String>,
}

impl PathResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the host of every resolved remote path.
    pub fn with_host_override(mut self, host: Option<String>) -> Self {
        self.host_override = host.filter(|h| !h.is_empty());
        self
    }

    pub fn host_override(&self) -> Option<&str> {
        self.host_override.as_deref()
    }

    /// Parse `raw` into a local or remote path.
    pub fn resolve(&self, raw: &str) -> Result<PathRef, SyncError> {
        if raw.is_empty() {
            return Err(SyncError::invalid_path(raw, "path is empty"));
        }

        let Some((host, path)) = split_remote(raw) else {
            return Ok(PathRef::local(raw));
        };

        if host.is_empty() || host.ends_with('@') {
            return Err(SyncError::invalid_path(raw, "remote host is empty"));
        }
        if path.is_empty() {
            return Err(SyncError::invalid_path(raw, "remote path is empty"));
        }

        let host = self.host_override.as_deref().unwrap_or(host);
        tracing::trace!(input = %raw, host = %host, path = %path, "resolved remote path");
        Ok(PathRef::remote(host, path))
    }

    /// Resolve an argument that must name a local path.
    pub fn resolve_local(&self, raw: &str, role: &str) -> Result<PathRef, SyncError> {
        match self.resolve(raw)? {
            local @ PathRef::Local { .. } => Ok(local),
            PathRef::Remote { .. } => Err(SyncError::invalid_path(
                raw,
                format!("{role} must be a local path"),
            )),
        }
    }
}

/// Split `raw` into `(host, path)` if it uses remote syntax.
///
/// Returns `Some` with possibly-empty parts when the string looks remote, so
/// the caller can reject `host:` and `:/path` instead of treating them as
/// local names.
fn split_remote(raw: &str) -> Option<(&str, &str)> {
    let (prefix, rest) = raw.split_once(':')?;

    if is_drive_letter(prefix, rest) {
        return None;
    }
    if !is_host_token(prefix) {
        return None;
    }
    if !(rest.is_empty() || rest.starts_with('/') || rest.starts_with('~')) {
        return None;
    }
    Some((prefix, rest))
}

/// `C:\...` or `C:/...`: a Windows drive, never a host.
fn is_drive_letter(prefix: &str, rest: &str) -> bool {
    let mut chars = prefix.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if c.is_ascii_alphabetic())
        && (rest.starts_with('\\') || rest.starts_with('/') || rest.is_empty())
}

/// `[user@]host` where both parts use hostname-safe characters.
///
/// Empty hosts are accepted here and rejected by the resolver with a precise
/// message.
fn is_host_token(prefix: &str) -> bool {
    let host = match prefix.split_once('@') {
        Some((user, host)) => {
            if user.is_empty() || !user.chars().all(is_host_char) {
                return false;
            }
            host
        }
        None => prefix,
    };
    host.chars().all(is_host_char)
}

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::remote::RemoteOutput;
    use parking_lot::Mutex;

    /// Answers every command with a fixed status and records what was asked.
    struct ScriptedShell {
        status: i32,
        commands: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedShell {
        fn new(status: i32) -> Self {
            Self {
                status,
                commands: Mutex::new(Vec::new()),
            }
        }
    }

    impl RemoteShell for ScriptedShell {
        fn run(&self, host: &str, command: &str) -> Result<RemoteOutput, SyncError> {
            self.commands
                .lock()
                .push((host.to_string(), command.to_string()));
            Ok(RemoteOutput {
                status: self.status,
                ..Default::default()
            })
        }
    }

    struct DeadShell;

    impl RemoteShell for DeadShell {
        fn run(&self, host: &str, _command: &str) -> Result<RemoteOutput, SyncError> {
            Err(SyncError::unreachable(host, "no answer within 5s"))
        }
    }

    fn resolve(raw: &str) -> Result<PathRef, SyncError> {
        PathResolver::new().resolve(raw)
    }

    #[test]
    fn test_resolve_local_paths() {
        assert_eq!(resolve("/tmp/test").unwrap(), PathRef::local("/tmp/test"));
        assert_eq!(
            resolve("relative/path").unwrap(),
            PathRef::local("relative/path")
        );
        assert_eq!(resolve("~/documents").unwrap(), PathRef::local("~/documents"));
    }

    #[test]
    fn test_resolve_remote_with_user() {
        assert_eq!(
            resolve("user@host:/tmp/x").unwrap(),
            PathRef::remote("user@host", "/tmp/x")
        );
    }

    #[test]
    fn test_resolve_remote_variants() {
        assert_eq!(
            resolve("server:/home/data").unwrap(),
            PathRef::remote("server", "/home/data")
        );
        assert_eq!(
            resolve("user@server.example.com:/data").unwrap(),
            PathRef::remote("user@server.example.com", "/data")
        );
        assert_eq!(
            resolve("user@my-server:/data").unwrap(),
            PathRef::remote("user@my-server", "/data")
        );
        assert_eq!(
            resolve("my_user@host:/data").unwrap(),
            PathRef::remote("my_user@host", "/data")
        );
        assert_eq!(
            resolve("box:~/projects").unwrap(),
            PathRef::remote("box", "~/projects")
        );
    }

    #[test]
    fn test_windows_drive_is_local() {
        assert_eq!(resolve(r"C:\data").unwrap(), PathRef::local(r"C:\data"));
        assert_eq!(resolve("C:/Users/test").unwrap(), PathRef::local("C:/Users/test"));
    }

    #[test]
    fn test_colon_without_path_prefix_is_local() {
        assert_eq!(resolve("notes:v2").unwrap(), PathRef::local("notes:v2"));
        assert_eq!(
            resolve("dir with space:/x").unwrap(),
            PathRef::local("dir with space:/x")
        );
    }

    #[test]
    fn test_resolve_rejects_empty_parts() {
        for raw in ["", "host:", ":/tmp/x", "user@:/tmp/x", "user@host:"] {
            let err = resolve(raw).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::InvalidPathFormat, "{raw}");
        }
    }

    #[test]
    fn test_host_override_replaces_host() {
        let resolver = PathResolver::new().with_host_override(Some("localhost".into()));
        assert_eq!(
            resolver.resolve("prod:/srv/app").unwrap(),
            PathRef::remote("localhost", "/srv/app")
        );
        assert_eq!(resolver.resolve("/srv/app").unwrap(), PathRef::local("/srv/app"));
    }

    #[test]
    fn test_empty_override_is_ignored() {
        let resolver = PathResolver::new().with_host_override(Some(String::new()));
        assert!(resolver.host_override().is_none());
    }

    #[test]
    fn test_resolve_local_rejects_remote() {
        let err = PathResolver::new()
            .resolve_local("box:/src", "source")
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidPathFormat);
        assert!(err.to_string().contains("source must be a local path"));
    }

    #[test]
    fn test_remote_join_and_name() {
        let base = PathRef::remote("host", "/backup/");
        let joined = base.join("/myproject/");
        assert_eq!(joined, PathRef::remote("host", "/backup/myproject"));
        assert_eq!(joined.name(), "myproject");
        assert_eq!(PathRef::remote("host", "/").join("x"), PathRef::remote("host", "/x"));
        assert_eq!(PathRef::remote("host", "~").join("x"), PathRef::remote("host", "~/x"));
    }

    #[test]
    fn test_remote_parent() {
        assert_eq!(
            PathRef::remote("h", "/backup/proj").parent(),
            PathRef::remote("h", "/backup")
        );
        assert_eq!(PathRef::remote("h", "/backup").parent(), PathRef::remote("h", "/"));
        assert_eq!(PathRef::remote("h", "/").parent(), PathRef::remote("h", "/"));
        assert_eq!(PathRef::remote("h", "~/proj").parent(), PathRef::remote("h", "~"));
        assert_eq!(PathRef::remote("h", "~").parent(), PathRef::remote("h", "~"));
    }

    #[test]
    fn test_local_parent_of_bare_name() {
        assert_eq!(PathRef::local("proj").parent(), PathRef::local("."));
        assert_eq!(PathRef::local("/a/b").parent(), PathRef::local("/a"));
    }

    #[test]
    fn test_local_capabilities() {
        let tmp = tempfile::tempdir().unwrap();
        let shell = DeadShell;
        let dir = PathRef::local(tmp.path());
        assert!(dir.exists(&shell).unwrap());
        assert!(dir.is_dir(&shell).unwrap());

        let file = tmp.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        let file = PathRef::local(&file);
        assert!(file.exists(&shell).unwrap());
        assert!(!file.is_dir(&shell).unwrap());

        let missing = dir.join("missing");
        assert!(!missing.exists(&shell).unwrap());
        assert_eq!(missing.name(), "missing");
    }

    #[test]
    fn test_local_mkdir_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let shell = DeadShell;
        let nested = PathRef::local(tmp.path().join("a/b/c"));
        nested.mkdir(true, &shell).unwrap();
        nested.mkdir(true, &shell).unwrap();
        assert!(tmp.path().join("a/b/c").is_dir());

        let single = PathRef::local(tmp.path().join("single"));
        single.mkdir(false, &shell).unwrap();
        single.mkdir(false, &shell).unwrap();
    }

    #[test]
    fn test_local_mkdir_over_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("blocker");
        std::fs::write(&file, "x").unwrap();
        let err = PathRef::local(&file).mkdir(true, &DeadShell).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AlreadyExistsNotDir);
    }

    #[test]
    fn test_remote_exists_uses_quoted_test() {
        let shell = ScriptedShell::new(0);
        let path = PathRef::remote("me@box", "/srv/my data");
        assert!(path.exists(&shell).unwrap());
        assert!(path.is_dir(&shell).unwrap());
        let commands = shell.commands.lock();
        assert_eq!(commands[0], ("me@box".into(), "test -e '/srv/my data'".into()));
        assert_eq!(commands[1], ("me@box".into(), "test -d '/srv/my data'".into()));
    }

    #[test]
    fn test_remote_missing_is_false_not_error() {
        let shell = ScriptedShell::new(1);
        assert!(!PathRef::remote("box", "/nope").exists(&shell).unwrap());
    }

    #[test]
    fn test_remote_unreachable_is_not_false() {
        let err = PathRef::remote("box", "/srv").exists(&DeadShell).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::RemoteUnreachable);
    }

    #[test]
    fn test_remote_mkdir_not_dir() {
        let shell = ScriptedShell::new(MKDIR_NOT_DIR_STATUS);
        let err = PathRef::remote("box", "/srv/file").mkdir(true, &shell).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AlreadyExistsNotDir);
        assert!(shell.commands.lock()[0].1.contains("mkdir -p /srv/file"));
    }

    #[test]
    fn test_remote_mkdir_failure_is_one_line() {
        struct Denied;
        impl RemoteShell for Denied {
            fn run(&self, _host: &str, _command: &str) -> Result<RemoteOutput, SyncError> {
                Ok(RemoteOutput {
                    status: 1,
                    stdout: String::new(),
                    stderr: "motd banner\nmkdir: cannot create directory '/srv/x': Permission denied\n"
                        .into(),
                })
            }
        }
        let err = PathRef::remote("box", "/srv/x").mkdir(true, &Denied).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
        let message = err.to_string();
        assert!(!message.contains('\n'), "{message}");
        assert!(message.ends_with("Permission denied"), "{message}");
    }

    #[test]
    fn test_for_rsync_rendering() {
        assert_eq!(PathRef::local("/data/src").for_rsync(), "/data/src");
        assert_eq!(PathRef::local("notes:v2").for_rsync(), "./notes:v2");
        assert_eq!(PathRef::remote("u@h", "/x").for_rsync(), "u@h:/x");
        assert_eq!(PathRef::remote("h", "~/proj").for_rsync(), "h:proj");
        assert_eq!(PathRef::remote("h", "~").for_rsync(), "h:.");
    }

    #[test]
    fn test_for_rsync_contents_adds_single_slash() {
        assert_eq!(PathRef::local("/data/src").for_rsync_contents(), "/data/src/");
        assert_eq!(PathRef::local("/data/src/").for_rsync_contents(), "/data/src/");
        assert_eq!(PathRef::remote("h", "/x").for_rsync_contents(), "h:/x/");
    }
}
