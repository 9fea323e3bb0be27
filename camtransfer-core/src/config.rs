use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ConfigError;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_DEVICE_PREFIX: &str = "capt_";
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2000;

/// Immutable pipeline settings, built once at startup and shared by the
/// capture loop, the worker pool and the recovery scanner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Directory captured files are saved to (and scanned on recovery).
    pub save_dir: PathBuf,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_true")]
    pub recover_unfinished: bool,
    #[serde(default = "default_true")]
    pub upload: bool,
    /// Remote directory files are sent to; the file name is appended.
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,
    /// Remove the local copy after a successful transfer. Disables protection.
    #[serde(default)]
    pub delete_local: bool,
    #[serde(default)]
    pub protect: bool,
    /// Replace the original by its protected artifact instead of writing alongside.
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default = "default_prefix")]
    pub device_prefix: String,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_true() -> bool {
    true
}

fn default_remote_dir() -> String {
    "/uploads".to_string()
}

fn default_prefix() -> String {
    DEFAULT_DEVICE_PREFIX.to_string()
}

fn default_poll_timeout_ms() -> u64 {
    DEFAULT_POLL_TIMEOUT_MS
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

impl PipelineConfig {
    /// Defaults for everything except the save directory.
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: save_dir.into(),
            workers: DEFAULT_WORKERS,
            recover_unfinished: true,
            upload: true,
            remote_dir: default_remote_dir(),
            delete_local: false,
            protect: false,
            overwrite: false,
            device_prefix: default_prefix(),
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.save_dir.is_dir() {
            return Err(ConfigError::InvalidSaveDir(self.save_dir.clone()));
        }
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }

    /// Local deletion only applies when the file was sent somewhere first.
    pub fn deletes_local(&self) -> bool {
        self.delete_local && self.upload
    }

    /// Protection runs only when enabled and the local copy is kept.
    pub fn protects(&self) -> bool {
        self.protect && !self.deletes_local()
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn target_path(&self, name: &str) -> PathBuf {
        self.save_dir.join(name)
    }

    /// Remote destination for a local file: `remote_dir` joined with its name.
    pub fn destination_for(&self, target: &Path) -> String {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = self.remote_dir.trim_end_matches('/');
        format!("{dir}/{name}")
    }

    /// Strip exactly one occurrence of the device prefix, if present.
    pub fn local_name<'a>(&self, device_name: &'a str) -> &'a str {
        device_name
            .strip_prefix(self.device_prefix.as_str())
            .filter(|rest| !rest.is_empty())
            .unwrap_or(device_name)
    }

    pub fn trace_loaded(&self) {
        info!(
            save_dir = %self.save_dir.display(),
            workers = self.workers,
            upload = self.upload,
            protect = self.protects(),
            delete_local = self.deletes_local(),
            recover_unfinished = self.recover_unfinished,
            "Loaded pipeline config"
        );
        debug!(?self, "Pipeline config loaded (full debug)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_local_requires_upload_and_disables_protect() {
        let mut config = PipelineConfig::new("/tmp");
        config.protect = true;
        config.delete_local = true;
        assert!(config.deletes_local());
        assert!(!config.protects());

        config.upload = false;
        assert!(!config.deletes_local());
        assert!(config.protects());
    }

    #[test]
    fn strips_one_device_prefix() {
        let config = PipelineConfig::new("/tmp");
        assert_eq!(config.local_name("capt_0001.jpg"), "0001.jpg");
        assert_eq!(config.local_name("capt_capt_0001.jpg"), "capt_0001.jpg");
        assert_eq!(config.local_name("IMG_0001.jpg"), "IMG_0001.jpg");
        assert_eq!(config.local_name("capt_"), "capt_");
    }

    #[test]
    fn destination_joins_remote_dir_and_name() {
        let mut config = PipelineConfig::new("/captures");
        assert_eq!(
            config.destination_for(Path::new("/captures/a.jpg")),
            "/uploads/a.jpg"
        );
        config.remote_dir = "/photos/".into();
        assert_eq!(
            config.destination_for(Path::new("/captures/a.jpg")),
            "/photos/a.jpg"
        );
    }

    #[test]
    fn validate_rejects_missing_dir_and_zero_workers() {
        let mut config = PipelineConfig::new("/definitely/not/here");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSaveDir(_))
        ));
        config.save_dir = std::env::temp_dir();
        config.workers = 0;
        assert_eq!(config.validate(), Err(ConfigError::NoWorkers));
    }
}
