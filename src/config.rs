//! User configuration: defaults, `config.toml`, then environment overrides.
//!
//! ```toml
//! # ~/.config/synctools/config.toml
//! rsync_path = "/usr/local/bin/rsync"
//! connect_timeout_secs = 5
//! remote_host = "backup.lan"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_REMOTE_HOST: &str = "SYNCTOOLS_REMOTE_HOST";
pub const ENV_RSYNC: &str = "SYNCTOOLS_RSYNC";
pub const ENV_SSH: &str = "SYNCTOOLS_SSH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}'", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// rsync binary name or path.
    pub rsync_path: String,
    /// ssh binary used for probes and as rsync's remote shell.
    pub ssh_command: String,
    /// Passed to ssh as `ConnectTimeout`.
    pub connect_timeout_secs: u64,
    /// Wall-clock limit for one remote probe.
    pub probe_timeout_secs: u64,
    /// How long rsync may take to stop after SIGINT before it is killed.
    pub interrupt_grace_secs: u64,
    /// Replaces the host of every remote path when set.
    pub remote_host: Option<String>,
    pub delete_extraneous: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rsync_path: "rsync".to_string(),
            ssh_command: "ssh".to_string(),
            connect_timeout_secs: 10,
            probe_timeout_secs: 20,
            interrupt_grace_secs: 5,
            remote_host: None,
            delete_extraneous: false,
        }
    }
}

impl Config {
    /// `<config dir>/synctools/config.toml` for this platform.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "synctools").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `explicit` (which must exist) or the default location (which
    /// may not), then apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Overlay non-empty values from `lookup` onto this config.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(host) = get(ENV_REMOTE_HOST) {
            self.remote_host = Some(host);
        }
        if let Some(rsync) = get(ENV_RSYNC) {
            self.rsync_path = rsync;
        }
        if let Some(ssh) = get(ENV_SSH) {
            self.ssh_command = ssh;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rsync_path.trim().is_empty() {
            return Err(ConfigError::Invalid("rsync_path is empty".into()));
        }
        if self.ssh_command.trim().is_empty() {
            return Err(ConfigError::Invalid("ssh_command is empty".into()));
        }
        if self.connect_timeout_secs == 0 || self.probe_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be at least one second".into()));
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn interrupt_grace(&self) -> Duration {
        Duration::from_secs(self.interrupt_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serial_test::serial;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.rsync_path, "rsync");
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.probe_timeout(), Duration::from_secs(20));
        assert!(!config.delete_extraneous);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "remote_host = \"nas\"\ndelete_extraneous = true\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.remote_host.as_deref(), Some("nas"));
        assert!(config.delete_extraneous);
        assert_eq!(config.ssh_command, "ssh");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "rsnyc_path = \"x\"\n").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let err = Config::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_env_overrides_ignore_blank_values() {
        let env: HashMap<&str, &str> = [(ENV_RSYNC, "/opt/rsync"), (ENV_REMOTE_HOST, "  ")]
            .into_iter()
            .collect();
        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.rsync_path, "/opt/rsync");
        assert_eq!(config.remote_host, None);
    }

    #[test]
    fn test_zero_timeout_invalid() {
        let config = Config {
            probe_timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    #[serial]
    #[allow(unsafe_code)]
    fn test_load_reads_process_env() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "remote_host = \"from-file\"\n").unwrap();

        // SAFETY: serialized with every other env-mutating test.
        unsafe { std::env::set_var(ENV_REMOTE_HOST, "from-env") };
        let config = Config::load(Some(&path));
        unsafe { std::env::remove_var(ENV_REMOTE_HOST) };

        assert_eq!(config.unwrap().remote_host.as_deref(), Some("from-env"));
    }
}
