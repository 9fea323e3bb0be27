//! Per-file job function: transfer → (delete local | protect) → done.
//!
//! A job owns its file's sidecar record and status entry from the moment it
//! starts until it returns. Sidecar writes always precede the matching status
//! update so the durable record never lags behind what the display shows.
//! Errors never leave [`Pipeline::process`]: they end the job in `FAILED`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::contract::{KeyMaterial, ProgressFn, Protector, Transfer};
use crate::error::JobError;
use crate::sidecar::{SidecarStore, REASON_KEY};
use crate::stage::Stage;
use crate::status::{percent, StatusRegistry};

/// One unit of pipeline work.
#[derive(Debug, Clone)]
pub struct Job {
    pub target: PathBuf,
    pub destination: String,
    pub key: Option<Arc<KeyMaterial>>,
}

impl Job {
    pub fn new(target: PathBuf, destination: String, key: Option<Arc<KeyMaterial>>) -> Self {
        Self {
            target,
            destination,
            key,
        }
    }

    /// Status registry key: the target's file name.
    pub fn name(&self) -> String {
        file_name(&self.target)
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    sidecars: SidecarStore,
    status: StatusRegistry,
    transfer: Option<Arc<dyn Transfer>>,
    protector: Option<Arc<dyn Protector>>,
}

impl Pipeline {
    pub fn new(config: Arc<PipelineConfig>, sidecars: SidecarStore, status: StatusRegistry) -> Self {
        Self {
            config,
            sidecars,
            status,
            transfer: None,
            protector: None,
        }
    }

    pub fn with_transfer(mut self, transfer: Arc<dyn Transfer>) -> Self {
        self.transfer = Some(transfer);
        self
    }

    pub fn with_protector(mut self, protector: Arc<dyn Protector>) -> Self {
        self.protector = Some(protector);
        self
    }

    pub fn config(&self) -> &Arc<PipelineConfig> {
        &self.config
    }

    pub fn status(&self) -> &StatusRegistry {
        &self.status
    }

    pub fn sidecars(&self) -> &SidecarStore {
        &self.sidecars
    }

    /// Run the job to a terminal stage and return that stage.
    pub async fn process(&self, job: &Job) -> Stage {
        let name = job.name();
        info!(file = %name, destination = %job.destination, "Job started");

        match self.run_steps(job, &name).await {
            Ok(()) => {
                self.status.set(&name, Stage::Done, Some(100));
                if let Err(e) = self.sidecars.delete(&job.target).await {
                    // The file is re-submitted on next start; transfer and
                    // protect tolerate running twice.
                    error!(file = %name, error = %e, "Failed to remove sidecar after completion");
                }
                info!(file = %name, "Job done");
                Stage::Done
            }
            Err(e) => {
                self.fail(job, &name, &e).await;
                Stage::Failed
            }
        }
    }

    async fn run_steps(&self, job: &Job, name: &str) -> Result<(), JobError> {
        if self.config.upload {
            let transfer = self
                .transfer
                .as_ref()
                .ok_or(JobError::MissingCapability("upload"))?;

            self.sidecars.write_status(&job.target, Stage::Uploading).await?;
            self.status.set(name, Stage::Uploading, Some(0));

            let status = self.status.clone();
            let progress_name = name.to_string();
            let on_progress: ProgressFn = Arc::new(move |transferred, total| {
                status.advance_progress(&progress_name, percent(transferred, total));
            });

            transfer
                .send(&job.target, &job.destination, on_progress)
                .await?;
            self.status.advance_progress(name, 100);
            debug!(file = %name, destination = %job.destination, "Transfer complete");
        }

        if self.config.deletes_local() {
            tokio::fs::remove_file(&job.target).await?;
            debug!(file = %name, "Removed local copy after transfer");
        } else if self.config.protects() {
            let protector = self
                .protector
                .as_ref()
                .ok_or(JobError::MissingCapability("protect"))?;
            let key = job
                .key
                .as_deref()
                .ok_or(JobError::MissingCapability("key material"))?;

            self.sidecars.write_status(&job.target, Stage::Encrypting).await?;
            self.status.set(name, Stage::Encrypting, None);

            let artifact = protector
                .apply(&job.target, key, self.config.overwrite)
                .await?;
            debug!(file = %name, artifact = %artifact.display(), "Protected artifact written");
        }

        Ok(())
    }

    async fn fail(&self, job: &Job, name: &str, cause: &JobError) {
        error!(file = %name, error = %cause, "Job failed");
        if let Err(e) = self.sidecars.write_status(&job.target, Stage::Failed).await {
            warn!(file = %name, error = %e, "Could not record failed status in sidecar");
        }
        if let Err(e) = self.sidecars.write(&job.target, REASON_KEY, &cause.to_string()).await {
            warn!(file = %name, error = %e, "Could not record failure reason in sidecar");
        }
        self.status.set(name, Stage::Failed, None);
    }
}
