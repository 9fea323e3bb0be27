//! Startup scan that resubmits files an earlier run left unfinished.
//!
//! Must complete before the capture loop starts: it relies on nobody else
//! touching sidecar records while it reads them.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::contract::KeyMaterial;
use crate::error::SidecarError;
use crate::pipeline::{file_name, Job, Pipeline};
use crate::pool::JobSubmitter;
use crate::sidecar::{SidecarStore, STATUS_KEY};
use crate::stage::Stage;
use crate::status::StatusRegistry;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Targets submitted again, in directory order.
    pub resubmitted: Vec<PathBuf>,
    /// Sidecars that already read `done`.
    pub skipped_done: usize,
    /// Sidecars whose target file no longer exists.
    pub orphaned: usize,
}

pub struct RecoveryScanner {
    config: Arc<PipelineConfig>,
    sidecars: SidecarStore,
    status: StatusRegistry,
}

impl RecoveryScanner {
    pub fn new(pipeline: &Pipeline) -> Self {
        Self {
            config: pipeline.config().clone(),
            sidecars: pipeline.sidecars().clone(),
            status: pipeline.status().clone(),
        }
    }

    /// Scan the save directory once and submit a job per unfinished file.
    ///
    /// Jobs restart from the top regardless of the recorded stage.
    pub async fn scan(
        &self,
        submitter: &JobSubmitter,
        key: Option<Arc<KeyMaterial>>,
    ) -> io::Result<RecoveryReport> {
        let dir = &self.config.save_dir;
        info!(dir = %dir.display(), "Checking for unfinished files");

        let mut entries = Vec::new();
        let mut listing = fs::read_dir(dir).await?;
        while let Some(entry) = listing.next_entry().await? {
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                entries.push(entry.path());
            }
        }
        entries.sort();

        let mut report = RecoveryReport::default();
        for path in entries {
            let Some(target) = self.sidecars.target_for(&path) else {
                continue;
            };
            if !fs::try_exists(&target).await.unwrap_or(false) {
                report.orphaned += 1;
                continue;
            }

            let recorded = match self.sidecars.read(&target).await {
                Ok(record) => record.get(STATUS_KEY).cloned(),
                Err(SidecarError::CorruptRecord { path, reason }) => {
                    warn!(path = %path.display(), %reason, "Corrupt sidecar treated as empty");
                    None
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable sidecar, skipping");
                    continue;
                }
            };

            if recorded.as_deref() == Some(Stage::Done.as_str()) {
                report.skipped_done += 1;
                continue;
            }

            let name = file_name(&target);
            info!(
                file = %name,
                recorded = recorded.as_deref().unwrap_or("<none>"),
                "Found unfinished file"
            );
            self.status.set(&name, Stage::Waiting, None);
            let job = Job::new(
                target.clone(),
                self.config.destination_for(&target),
                key.clone(),
            );
            if submitter.submit(job).is_err() {
                warn!(file = %name, "Worker pool closed during recovery scan");
                break;
            }
            report.resubmitted.push(target);
        }

        info!(
            resubmitted = report.resubmitted.len(),
            skipped_done = report.skipped_done,
            orphaned = report.orphaned,
            "Recovery scan complete"
        );
        Ok(report)
    }
}
