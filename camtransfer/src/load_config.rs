//! `load_config` module: loads the static YAML config and injects environment
//! secrets, producing the immutable [`PipelineConfig`] plus the settings for
//! the concrete device, transfer target and protector.
//!
//! This is the only place untrusted YAML is parsed. Everything after this
//! point works with typed, validated values.
//!
//! # Errors
//! All failures are `anyhow::Error`s with the offending path or field in the
//! message, surfaced at the CLI boundary.

use anyhow::{anyhow, Result};
use camtransfer_core::config::{
    PipelineConfig, DEFAULT_DEVICE_PREFIX, DEFAULT_POLL_TIMEOUT_MS, DEFAULT_RECONNECT_DELAY_MS,
    DEFAULT_WORKERS,
};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Bearer token for the HTTP transfer target.
pub const UPLOAD_TOKEN_ENV: &str = "CAMTRANSFER_UPLOAD_TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    HotFolder,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceSection {
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    pub path: PathBuf,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetSection {
    Http { base_url: String },
    Directory { root: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,
    #[serde(default)]
    pub target: Option<TargetSection>,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            enabled: true,
            remote_dir: default_remote_dir(),
            target: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProtectSection {
    #[serde(default)]
    pub enabled: bool,
    /// Public half of the key pair. The private half never belongs here.
    #[serde(default)]
    pub public_key: Option<PathBuf>,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    save_dir: PathBuf,
    #[serde(default = "default_workers")]
    workers: usize,
    #[serde(default = "default_true")]
    recover_unfinished: bool,
    #[serde(default)]
    delete_local: bool,
    device: DeviceSection,
    #[serde(default)]
    upload: UploadSection,
    #[serde(default)]
    protect: ProtectSection,
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

/// Everything `camtransfer run` needs, resolved from YAML and environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub device: DeviceSection,
    pub target: Option<TargetSection>,
    pub public_key: Option<PathBuf>,
    pub upload_token: Option<String>,
}

/// Loads a static YAML config file (no secrets) and injects the optional
/// upload token from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let raw: RawConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if raw.upload.enabled && raw.upload.target.is_none() {
        error!(config_path = ?path_ref, "Upload enabled without a target");
        return Err(anyhow!(
            "upload.enabled is true but upload.target is missing"
        ));
    }
    if raw.protect.enabled && raw.protect.public_key.is_none() {
        error!(config_path = ?path_ref, "Protection enabled without a public key");
        return Err(anyhow!(
            "protect.enabled is true but protect.public_key is missing"
        ));
    }

    let pipeline = PipelineConfig {
        save_dir: raw.save_dir,
        workers: raw.workers,
        recover_unfinished: raw.recover_unfinished,
        upload: raw.upload.enabled,
        remote_dir: raw.upload.remote_dir,
        delete_local: raw.delete_local,
        protect: raw.protect.enabled,
        overwrite: raw.protect.overwrite,
        device_prefix: raw.device.prefix.clone(),
        poll_timeout_ms: raw.device.poll_timeout_ms,
        reconnect_delay_ms: raw.device.reconnect_delay_ms,
    };

    if pipeline.delete_local && pipeline.protect {
        warn!("delete_local is set: files are removed after upload and never encrypted");
    }
    if pipeline.delete_local && !pipeline.upload {
        warn!("delete_local has no effect while upload is disabled");
    }

    let upload_token = env::var(UPLOAD_TOKEN_ENV).ok().filter(|t| !t.is_empty());
    info!(
        upload_token_set = upload_token.is_some(),
        "Injected environment secrets"
    );

    Ok(AppConfig {
        pipeline,
        device: raw.device,
        target: raw.upload.target,
        public_key: raw.protect.public_key,
        upload_token,
    })
}
