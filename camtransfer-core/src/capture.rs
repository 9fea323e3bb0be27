//! # capture: single producer turning device events into pipeline jobs
//!
//! The loop alternates between two connection states:
//!
//! - `Disconnected`: call [`Device::connect`] until it succeeds, pausing a
//!   fixed delay between attempts. There is no retry budget; the loop waits
//!   for the operator to plug the device back in.
//! - `Connected`: wait for the next event with a timeout. A timeout is an empty
//!   poll. Any device error releases the device, pauses, and drops back to
//!   `Disconnected`.
//!
//! The shutdown signal is checked between attempts and interrupts every wait
//! and pause, so an operator can stop the process even while the device is
//! missing.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::contract::{Device, DeviceEvent, DeviceFile, KeyMaterial};
use crate::error::DeviceError;
use crate::pipeline::{Job, Pipeline};
use crate::pool::JobSubmitter;
use crate::sidecar::SidecarStore;
use crate::stage::Stage;
use crate::status::StatusRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub captured: usize,
    pub device_errors: usize,
    pub connects: usize,
}

pub struct CaptureLoop<D: Device> {
    device: D,
    config: Arc<PipelineConfig>,
    sidecars: SidecarStore,
    status: StatusRegistry,
    submitter: JobSubmitter,
    key: Option<Arc<KeyMaterial>>,
    shutdown: watch::Receiver<bool>,
    state: ConnectionState,
    report: CaptureReport,
}

impl<D: Device> CaptureLoop<D> {
    pub fn new(
        device: D,
        pipeline: &Pipeline,
        submitter: JobSubmitter,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            device,
            config: pipeline.config().clone(),
            sidecars: pipeline.sidecars().clone(),
            status: pipeline.status().clone(),
            submitter,
            key: None,
            shutdown,
            state: ConnectionState::Disconnected,
            report: CaptureReport::default(),
        }
    }

    pub fn with_key(mut self, key: Option<Arc<KeyMaterial>>) -> Self {
        self.key = key;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run until the shutdown signal fires.
    pub async fn run(mut self) -> CaptureReport {
        info!("Waiting for device, connect and switch it on");
        while !self.is_shutdown() {
            match self.state {
                ConnectionState::Disconnected => self.connect().await,
                ConnectionState::Connected => self.poll_once().await,
            }
        }

        if self.state == ConnectionState::Connected {
            if let Err(e) = self.device.release().await {
                debug!(error = %e, "Device release at shutdown failed");
            }
        }
        info!(
            captured = self.report.captured,
            device_errors = self.report.device_errors,
            "Capture loop stopped"
        );
        self.report
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn connect(&mut self) {
        match self.device.connect().await {
            Ok(device_name) => {
                info!(device = %device_name, "Device connected");
                self.state = ConnectionState::Connected;
                self.report.connects += 1;
            }
            Err(DeviceError::NotFound) => {
                debug!("No device found, retrying");
                self.pause(self.config.reconnect_delay()).await;
            }
            Err(e) => {
                warn!(error = %e, "Device connect failed, retrying");
                self.pause(self.config.reconnect_delay()).await;
            }
        }
    }

    async fn poll_once(&mut self) {
        let timeout = self.config.poll_timeout();
        let event = tokio::select! {
            event = self.device.wait_for_event(timeout) => event,
            _ = shutdown_fired(&mut self.shutdown) => return,
        };

        match event {
            Ok(DeviceEvent::FileAdded(file)) => {
                if let Err(e) = self.capture(file).await {
                    self.on_device_error(e).await;
                }
            }
            Ok(DeviceEvent::Timeout) => {}
            Ok(DeviceEvent::Other(what)) => debug!(event = %what, "Ignoring device event"),
            Err(e) => self.on_device_error(e).await,
        }
    }

    async fn capture(&mut self, file: DeviceFile) -> Result<(), DeviceError> {
        let stripped = self.config.local_name(&file.name);
        let Some(name) = Path::new(stripped)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
        else {
            warn!(reported = %file.name, "Device reported a file without a usable name, skipping");
            return Ok(());
        };
        let target = self.config.target_path(&name);

        if let Err(e) = self.sidecars.write_status(&target, Stage::Saving).await {
            warn!(file = %name, error = %e, "Could not write sidecar before saving");
        }
        self.status.set(&name, Stage::Saving, None);

        if let Err(e) = self.device.materialize(&file, &target).await {
            // The sidecar stays at `saving` and the device offers the file
            // again once reconnected.
            self.status.set(&name, Stage::Failed, None);
            return Err(e);
        }
        info!(file = %name, path = %target.display(), "Saved file from device");

        self.status.set(&name, Stage::Waiting, None);
        let job = Job::new(
            target.clone(),
            self.config.destination_for(&target),
            self.key.clone(),
        );
        if self.submitter.submit(job).is_err() {
            warn!(file = %name, "Worker pool closed, file left for the next recovery scan");
        }
        self.report.captured += 1;
        Ok(())
    }

    async fn on_device_error(&mut self, error: DeviceError) {
        warn!(error = %error, "Device error, attempting to reconnect");
        self.report.device_errors += 1;
        if let Err(e) = self.device.release().await {
            debug!(error = %e, "Ignoring error while releasing device");
        }
        self.state = ConnectionState::Disconnected;
        self.pause(self.config.reconnect_delay()).await;
    }

    /// Sleep for `delay` unless shutdown fires first.
    async fn pause(&mut self, delay: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_fired(&mut self.shutdown) => {}
        }
    }
}

/// Resolves once the shutdown flag is set or its sender is gone.
async fn shutdown_fired(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
