//! # contract: capabilities the pipeline consumes
//!
//! The pipeline never talks to hardware, networks or ciphers directly. It is
//! handed three capabilities through the traits below:
//!
//! - [`Device`]: source of "new file" notifications and of the file bytes.
//! - [`Transfer`]: moves a local file to a remote destination string.
//! - [`Protector`]: turns a local file into a protected artifact and back.
//!
//! ## Mocking & Testing
//! - All traits are annotated for `mockall`, exported when the
//!   `test-export-mocks` feature is on, so downstream crates can script
//!   device sessions, transfer failures and cipher errors in their tests.
//!
//! ## Adding New Capabilities
//! - Implement the trait in the binary crate (or any crate depending on core).
//! - Map every upstream failure to the trait's error type; the pipeline turns
//!   those into the `FAILED` stage or into a device reconnect.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::{DeviceError, ProtectError, TransferError};

/// Progress callback: `(bytes transferred so far, total bytes)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Opaque handle to a file that still lives on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFile {
    /// Device-side folder the file was reported in.
    pub folder: String,
    /// File name as reported by the device, prefix included.
    pub name: String,
}

/// Result of one wait on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    FileAdded(DeviceFile),
    /// The wait timed out without anything happening.
    Timeout,
    /// Something happened that the pipeline does not care about.
    Other(String),
}

/// Source of newly produced files (a camera, a hot folder, ...).
///
/// Owned exclusively by the capture loop, hence `&mut self`.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Device: Send {
    /// Open the device. Returns a human-readable device name.
    async fn connect(&mut self) -> Result<String, DeviceError>;

    /// Wait at most `timeout` for the next event.
    async fn wait_for_event(&mut self, timeout: Duration) -> Result<DeviceEvent, DeviceError>;

    /// Copy the bytes of `file` to the local path `target`.
    async fn materialize(&mut self, file: &DeviceFile, target: &Path) -> Result<(), DeviceError>;

    /// Close the device. Called best-effort before reconnecting and at shutdown.
    async fn release(&mut self) -> Result<(), DeviceError>;
}

/// Moves a local file to a remote store.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Check that the remote is reachable. Called once at startup.
    async fn probe(&self) -> Result<(), TransferError>;

    /// Send `local` to `remote`, calling `on_progress` as bytes move.
    ///
    /// Progress reports may arrive out of order or repeat; consumers clamp.
    async fn send(
        &self,
        local: &Path,
        remote: &str,
        on_progress: ProgressFn,
    ) -> Result<(), TransferError>;
}

/// Content protection transform.
///
/// Asymmetric implementations take the public key in [`apply`](Protector::apply)
/// and the private key in [`invert`](Protector::invert), so whatever runs the
/// pipeline never needs the key that decrypts.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Protector: Send + Sync {
    /// Protect `path` with the encrypting key. With `overwrite` the original
    /// is removed after the artifact is written; otherwise it is left
    /// untouched. Returns the artifact path.
    async fn apply(
        &self,
        path: &Path,
        key: &KeyMaterial,
        overwrite: bool,
    ) -> Result<PathBuf, ProtectError>;

    /// Undo [`apply`](Protector::apply) with the decrypting key. Returns the
    /// restored file path.
    async fn invert(
        &self,
        path: &Path,
        key: &KeyMaterial,
        overwrite: bool,
    ) -> Result<PathBuf, ProtectError>;

    /// Whether `path` looks like an artifact produced by `apply`.
    fn is_protected(&self, path: &Path) -> bool;
}

/// Key bytes handed to a [`Protector`]. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial(<{} bytes redacted>)", self.0.len())
    }
}
