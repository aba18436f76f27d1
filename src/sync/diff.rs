//! Comparing a local directory with its local or remote counterpart.
//!
//! Used to decide which direction to sync before running `to` or `from`.
//! Files are matched by relative path and compared on size and mtime; content
//! is never read.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Serialize;
use walkdir::WalkDir;

use super::path::PathRef;
use super::remote::{RemoteShell, quote_remote_path, stderr_reason};
use crate::error::SyncError;

/// Timestamps closer than this are treated as equal (filesystem precision).
const MTIME_TOLERANCE_SECS: f64 = 1.0;

/// Comparison status of one relative path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    /// Local copy is newer.
    Newer,
    /// Local copy is older.
    Older,
    /// Same size and mtime.
    Same,
    LocalOnly,
    RemoteOnly,
    /// Same mtime, different size.
    Conflict,
}

impl FileStatus {
    pub const ALL: [FileStatus; 6] = [
        Self::Newer,
        Self::Older,
        Self::Same,
        Self::LocalOnly,
        Self::RemoteOnly,
        Self::Conflict,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Newer => "NEWER",
            Self::Older => "OLDER",
            Self::Same => "SAME",
            Self::LocalOnly => "LOCAL_ONLY",
            Self::RemoteOnly => "REMOTE_ONLY",
            Self::Conflict => "CONFLICT",
        }
    }
}

/// Size and mtime of a file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FileInfo {
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub mtime: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    /// Path relative to the compared directories, `/`-separated.
    pub path: String,
    pub status: FileStatus,
    pub local: Option<FileInfo>,
    pub remote: Option<FileInfo>,
}

/// Per-status counts over a comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub newer: usize,
    pub older: usize,
    pub same: usize,
    pub local_only: usize,
    pub remote_only: usize,
    pub conflict: usize,
}

impl DiffSummary {
    pub fn from_results(results: &[ComparisonResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            *summary.slot(result.status) += 1;
        }
        summary
    }

    pub fn count(&self, status: FileStatus) -> usize {
        match status {
            FileStatus::Newer => self.newer,
            FileStatus::Older => self.older,
            FileStatus::Same => self.same,
            FileStatus::LocalOnly => self.local_only,
            FileStatus::RemoteOnly => self.remote_only,
            FileStatus::Conflict => self.conflict,
        }
    }

    /// Whether every file is present and identical on both sides.
    pub fn in_sync(&self) -> bool {
        self.newer + self.older + self.local_only + self.remote_only + self.conflict == 0
    }

    fn slot(&mut self, status: FileStatus) -> &mut usize {
        match status {
            FileStatus::Newer => &mut self.newer,
            FileStatus::Older => &mut self.older,
            FileStatus::Same => &mut self.same,
            FileStatus::LocalOnly => &mut self.local_only,
            FileStatus::RemoteOnly => &mut self.remote_only,
            FileStatus::Conflict => &mut self.conflict,
        }
    }
}

/// Classify one path from the information on each side.
pub fn classify(local: Option<&FileInfo>, remote: Option<&FileInfo>) -> Option<FileStatus> {
    match (local, remote) {
        (Some(l), Some(r)) if (l.mtime - r.mtime).abs() < MTIME_TOLERANCE_SECS => {
            if l.size == r.size {
                Some(FileStatus::Same)
            } else {
                Some(FileStatus::Conflict)
            }
        }
        (Some(l), Some(r)) if l.mtime > r.mtime => Some(FileStatus::Newer),
        (Some(_), Some(_)) => Some(FileStatus::Older),
        (Some(_), None) => Some(FileStatus::LocalOnly),
        (None, Some(_)) => Some(FileStatus::RemoteOnly),
        (None, None) => None,
    }
}

/// Compare `local_dir` with `other`, sorted by relative path.
pub fn compare(
    local_dir: &Path,
    other: &PathRef,
    shell: &dyn RemoteShell,
) -> Result<Vec<ComparisonResult>, SyncError> {
    let local = list_local(local_dir)?;
    let remote = match other {
        PathRef::Local { path } => list_local(path)?,
        PathRef::Remote { host, path } => list_remote(shell, host, path)?,
    };

    let paths: BTreeSet<&String> = local.keys().chain(remote.keys()).collect();
    let results: Vec<ComparisonResult> = paths
        .into_iter()
        .filter_map(|path| {
            let l = local.get(path);
            let r = remote.get(path);
            classify(l, r).map(|status| ComparisonResult {
                path: path.clone(),
                status,
                local: l.copied(),
                remote: r.copied(),
            })
        })
        .collect();

    tracing::debug!(
        local = %local_dir.display(),
        other = %other,
        files = results.len(),
        "compared directories"
    );
    Ok(results)
}

/// Regular files under `root`, keyed by `/`-separated relative path.
pub fn list_local(root: &Path) -> Result<BTreeMap<String, FileInfo>, SyncError> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let context = format!("failed to list '{}'", root.display());
            SyncError::io(context, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let meta = entry.metadata().map_err(|e| {
            let context = format!("failed to stat '{}'", entry.path().display());
            SyncError::io(context, e.into())
        })?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.insert(
            key,
            FileInfo {
                size: meta.len(),
                mtime,
            },
        );
    }
    Ok(files)
}

/// Regular files under a remote directory, from a single ssh round trip.
///
/// Tries GNU `stat -c` first and falls back to BSD `stat -f` (macOS).
pub fn list_remote(
    shell: &dyn RemoteShell,
    host: &str,
    dir: &str,
) -> Result<BTreeMap<String, FileInfo>, SyncError> {
    let quoted = quote_remote_path(dir);
    let command = format!(
        "cd {quoted} && {{ find . -type f -exec stat -c '%s %Y %n' {{}} + 2>/dev/null \
         || find . -type f -exec stat -f '%z %m %N' {{}} +; }}"
    );
    let output = shell.run(host, &command)?;
    if !output.success() {
        return Err(SyncError::io(
            format!("failed to list '{dir}' on host '{host}'"),
            std::io::Error::other(
                stderr_reason(&output.stderr)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("exit status {}", output.status)),
            ),
        ));
    }
    Ok(parse_stat_listing(&output.stdout))
}

/// Parse `<size> <mtime> ./<path>` lines; malformed lines are skipped.
pub fn parse_stat_listing(text: &str) -> BTreeMap<String, FileInfo> {
    let mut files = BTreeMap::new();
    for line in text.lines() {
        let mut parts = line.splitn(3, ' ');
        let (Some(size), Some(mtime), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let (Ok(size), Ok(mtime)) = (size.parse::<u64>(), mtime.parse::<f64>()) else {
            continue;
        };
        let path = path.strip_prefix("./").unwrap_or(path);
        if path.is_empty() || path == "." {
            continue;
        }
        files.insert(path.to_string(), FileInfo { size, mtime });
    }
    files
}

/// Human-readable size, e.g. `   1.5KB`.
pub fn format_size(size: u64) -> String {
    let mut value = size as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if value < 1024.0 {
            return format!("{value:6.1}{unit}");
        }
        value /= 1024.0;
    }
    format!("{value:6.1}TB")
}

/// Local-time rendering of an mtime.
pub fn format_timestamp(mtime: f64) -> String {
    chrono::DateTime::from_timestamp(mtime.trunc() as i64, 0)
        .map(|dt| {
            dt.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| "-".to_string())
}
