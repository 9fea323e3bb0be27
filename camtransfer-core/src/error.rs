//! Error taxonomy for the capture pipeline.
//!
//! Device errors are recovered by the capture loop's reconnect cycle, job
//! errors end in the `FAILED` stage, and configuration errors are the only ones
//! allowed to stop the process (and only before any pipeline work starts).

use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by a device capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Device is not connected or cannot be found.
    #[error("device not found")]
    NotFound,

    #[error("device I/O error: {0}")]
    Io(String),

    #[error("device error: {0}")]
    Other(String),
}

impl DeviceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DeviceError::NotFound)
    }
}

impl From<std::io::Error> for DeviceError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => DeviceError::NotFound,
            _ => DeviceError::Io(e.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote rejected {destination}: {reason}")]
    Rejected { destination: String, reason: String },

    #[error("transfer failed: {0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum ProtectError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cipher failure: {0}")]
    Cipher(String),

    #[error("malformed protected artifact {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum SidecarError {
    #[error("no sidecar record at {}", .0.display())]
    NotFound(PathBuf),

    #[error("corrupt sidecar record at {}: {reason}", path.display())]
    CorruptRecord { path: PathBuf, reason: String },

    #[error("sidecar I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything that can end a job in the `FAILED` stage.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("transfer failure: {0}")]
    Transfer(#[from] TransferError),

    #[error("protect failure: {0}")]
    Protect(#[from] ProtectError),

    #[error("filesystem failure: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("sidecar failure: {0}")]
    Sidecar(#[from] SidecarError),

    #[error("{0} is enabled but no capability was configured")]
    MissingCapability(&'static str),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("save directory {} is not a directory", .0.display())]
    InvalidSaveDir(PathBuf),

    #[error("worker pool width must be at least 1")]
    NoWorkers,

    #[error("protection is enabled but no key material was provided")]
    MissingKeyMaterial,
}

/// Submission against a pool that is shutting down.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("worker pool is closed to new submissions")]
pub struct PoolClosed;
