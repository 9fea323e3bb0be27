//! Hot-folder device: a directory that some other process fills with files,
//! such as a tethering spool or a mounted camera card.
//!
//! A file is reported once its size is unchanged across two consecutive scans,
//! so half-written files are never picked up. Files already present on the
//! first successful connect are treated as old and never reported, except
//! those an earlier run claimed but never finished saving. A missing
//! directory means the device is not connected.
//!
//! A reported file only counts as taken once [`Device::materialize`] succeeds.
//! Until then it is offered again after a failed copy or a reconnect.

use async_trait::async_trait;
use camtransfer_core::config::PipelineConfig;
use camtransfer_core::contract::{Device, DeviceEvent, DeviceFile};
use camtransfer_core::error::DeviceError;
use camtransfer_core::sidecar::SidecarStore;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug)]
pub struct HotFolderDevice {
    path: PathBuf,
    scan_interval: Duration,
    seeded: bool,
    /// Files saved by this device or present before the first connect.
    seen: HashSet<String>,
    /// Reported but not yet saved.
    in_flight: HashSet<String>,
    /// Candidate files and their size at the previous scan.
    pending: BTreeMap<String, u64>,
    unsaved: Option<UnsavedCheck>,
}

/// Where the capture loop saves files, so seeding can spot interrupted saves.
#[derive(Debug, Clone)]
struct UnsavedCheck {
    config: Arc<PipelineConfig>,
    sidecars: SidecarStore,
}

impl UnsavedCheck {
    /// A sidecar without its target means a save was claimed and never finished.
    async fn interrupted(&self, device_name: &str) -> bool {
        let Some(name) = Path::new(self.config.local_name(device_name)).file_name() else {
            return false;
        };
        let target = self.config.target_path(&name.to_string_lossy());
        let claimed = tokio::fs::try_exists(self.sidecars.path_for(&target))
            .await
            .unwrap_or(false);
        claimed && !tokio::fs::try_exists(&target).await.unwrap_or(true)
    }
}

impl HotFolderDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            scan_interval: DEFAULT_SCAN_INTERVAL,
            seeded: false,
            seen: HashSet::new(),
            in_flight: HashSet::new(),
            pending: BTreeMap::new(),
            unsaved: None,
        }
    }

    /// Let the first connect re-offer files whose save an earlier run left
    /// unfinished, instead of treating every existing file as old.
    pub fn with_save_location(mut self, config: Arc<PipelineConfig>, sidecars: SidecarStore) -> Self {
        self.unsaved = Some(UnsavedCheck { config, sidecars });
        self
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn list_files(&self) -> Result<BTreeMap<String, u64>, DeviceError> {
        let mut files = BTreeMap::new();
        let mut entries = tokio::fs::read_dir(&self.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let meta = entry.metadata().await?;
            if meta.is_file() {
                files.insert(name, meta.len());
            }
        }
        Ok(files)
    }

    /// One scan: returns the first file whose size held still since the last scan.
    async fn scan(&mut self) -> Result<Option<String>, DeviceError> {
        let current = self.list_files().await?;
        let mut stable = None;
        for (name, size) in &current {
            if self.is_taken(name) {
                continue;
            }
            if stable.is_none() && self.pending.get(name) == Some(size) {
                stable = Some(name.clone());
            }
        }
        self.pending = current
            .into_iter()
            .filter(|(name, _)| !self.is_taken(name))
            .collect();
        if let Some(name) = &stable {
            self.pending.remove(name);
            self.in_flight.insert(name.clone());
        }
        Ok(stable)
    }

    fn is_taken(&self, name: &str) -> bool {
        self.seen.contains(name) || self.in_flight.contains(name)
    }

    async fn seed(&mut self) -> Result<(), DeviceError> {
        let existing = self.list_files().await?;
        let mut reoffered = 0;
        for name in existing.into_keys() {
            if let Some(check) = &self.unsaved {
                if check.interrupted(&name).await {
                    info!(file = %name, "Offering again a file whose save was interrupted");
                    reoffered += 1;
                    continue;
                }
            }
            self.seen.insert(name);
        }
        info!(
            path = %self.path.display(),
            existing = self.seen.len(),
            reoffered,
            "Ignoring files already in hot folder"
        );
        self.seeded = true;
        Ok(())
    }
}

/// Copy `source` to `target` through `<target>.part`, so `target` only ever
/// appears complete.
async fn copy_into_place(source: &Path, target: &Path) -> Result<(), DeviceError> {
    // A missing source means the device went away.
    let mut reader = tokio::fs::File::open(source).await?;

    let mut part_name = target.file_name().unwrap_or_default().to_os_string();
    part_name.push(".part");
    let part = target.with_file_name(part_name);

    let written = async {
        let mut writer = tokio::fs::File::create(&part).await?;
        tokio::io::copy(&mut reader, &mut writer).await?;
        writer.flush().await?;
        writer.sync_all().await?;
        drop(writer);
        tokio::fs::rename(&part, target).await
    }
    .await;

    if let Err(e) = written {
        if let Err(cleanup) = tokio::fs::remove_file(&part).await {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %part.display(), error = %cleanup, "Could not remove partial copy");
            }
        }
        return Err(DeviceError::Io(format!("saving {}: {e}", target.display())));
    }
    Ok(())
}

#[async_trait]
impl Device for HotFolderDevice {
    async fn connect(&mut self) -> Result<String, DeviceError> {
        let meta = tokio::fs::metadata(&self.path).await?;
        if !meta.is_dir() {
            return Err(DeviceError::Other(format!(
                "{} is not a directory",
                self.path.display()
            )));
        }
        if !self.seeded {
            self.seed().await?;
        }
        Ok(format!("hot folder {}", self.path.display()))
    }

    async fn wait_for_event(&mut self, timeout: Duration) -> Result<DeviceEvent, DeviceError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(name) = self.scan().await? {
                debug!(file = %name, "New file settled in hot folder");
                return Ok(DeviceEvent::FileAdded(DeviceFile {
                    folder: self.path.display().to_string(),
                    name,
                }));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(DeviceEvent::Timeout);
            }
            tokio::time::sleep(self.scan_interval.min(deadline - now)).await;
        }
    }

    async fn materialize(&mut self, file: &DeviceFile, target: &Path) -> Result<(), DeviceError> {
        let source = Path::new(&file.folder).join(&file.name);
        let saved = copy_into_place(&source, target).await;
        self.in_flight.remove(&file.name);
        if saved.is_ok() {
            self.seen.insert(file.name.clone());
        }
        saved
    }

    async fn release(&mut self) -> Result<(), DeviceError> {
        self.pending.clear();
        self.in_flight.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camtransfer_core::stage::Stage;
    use std::fs;
    use tempfile::tempdir;

    fn device(path: &Path) -> HotFolderDevice {
        HotFolderDevice::new(path).with_scan_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn reports_only_new_settled_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("old.jpg"), b"old").unwrap();
        let mut device = device(dir.path());
        device.connect().await.unwrap();

        fs::write(dir.path().join("capt_0001.jpg"), b"new").unwrap();
        fs::write(dir.path().join(".hidden"), b"x").unwrap();

        let event = device.wait_for_event(Duration::from_secs(2)).await.unwrap();
        let file = match event {
            DeviceEvent::FileAdded(file) => file,
            other => panic!("expected a new file, got {other:?}"),
        };
        assert_eq!(file.name, "capt_0001.jpg");

        let event = device.wait_for_event(Duration::from_millis(50)).await.unwrap();
        assert_eq!(event, DeviceEvent::Timeout);

        let save = tempdir().unwrap();
        let target = save.path().join("0001.jpg");
        device.materialize(&file, &target).await.unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"new");
    }

    #[tokio::test]
    async fn missing_folder_is_not_found() {
        let dir = tempdir().unwrap();
        let mut device = device(&dir.path().join("unplugged"));
        assert_eq!(device.connect().await.unwrap_err(), DeviceError::NotFound);
    }

    #[tokio::test]
    async fn files_added_while_disconnected_are_reported_after_reconnect() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("card");
        fs::create_dir(&folder).unwrap();
        let mut device = device(&folder);
        device.connect().await.unwrap();
        device.release().await.unwrap();

        fs::write(folder.join("IMG_0002.jpg"), b"while away").unwrap();
        device.connect().await.unwrap();
        let event = device.wait_for_event(Duration::from_secs(2)).await.unwrap();
        assert!(matches!(event, DeviceEvent::FileAdded(f) if f.name == "IMG_0002.jpg"));
    }

    #[tokio::test]
    async fn failed_save_is_offered_again_after_reconnect() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("card");
        fs::create_dir(&folder).unwrap();
        let mut device = device(&folder);
        device.connect().await.unwrap();

        fs::write(folder.join("IMG_1.jpg"), b"frame").unwrap();
        let event = device.wait_for_event(Duration::from_secs(2)).await.unwrap();
        let file = match event {
            DeviceEvent::FileAdded(file) => file,
            other => panic!("expected a new file, got {other:?}"),
        };

        let missing = dir.path().join("gone").join("IMG_1.jpg");
        let err = device.materialize(&file, &missing).await.unwrap_err();
        assert!(matches!(err, DeviceError::Io(_)), "got {err:?}");

        device.release().await.unwrap();
        device.connect().await.unwrap();
        let event = device.wait_for_event(Duration::from_secs(2)).await.unwrap();
        assert!(matches!(&event, DeviceEvent::FileAdded(f) if f.name == "IMG_1.jpg"), "got {event:?}");

        let save = tempdir().unwrap();
        let target = save.path().join("IMG_1.jpg");
        device.materialize(&file, &target).await.unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"frame");
        assert!(!save.path().join("IMG_1.jpg.part").exists());

        let event = device.wait_for_event(Duration::from_millis(100)).await.unwrap();
        assert_eq!(event, DeviceEvent::Timeout);
    }

    #[tokio::test]
    async fn missing_source_is_not_found_and_leaves_no_partial_file() {
        let dir = tempdir().unwrap();
        let mut device = device(dir.path());
        let file = DeviceFile {
            folder: dir.path().display().to_string(),
            name: "vanished.jpg".into(),
        };
        let target = dir.path().join("saved.jpg");
        assert_eq!(
            device.materialize(&file, &target).await.unwrap_err(),
            DeviceError::NotFound
        );
        assert!(!target.exists());
        assert!(!dir.path().join("saved.jpg.part").exists());
    }

    #[tokio::test]
    async fn interrupted_save_from_earlier_run_is_offered_on_first_connect() {
        let folder = tempdir().unwrap();
        let save = tempdir().unwrap();
        fs::write(folder.path().join("capt_0001.jpg"), b"claimed").unwrap();
        fs::write(folder.path().join("capt_0002.jpg"), b"old").unwrap();

        let config = Arc::new(PipelineConfig::new(save.path()));
        let sidecars = SidecarStore::default();
        sidecars
            .write_status(&save.path().join("0001.jpg"), Stage::Saving)
            .await
            .unwrap();

        let mut device = device(folder.path()).with_save_location(config, sidecars);
        device.connect().await.unwrap();

        let event = device.wait_for_event(Duration::from_secs(2)).await.unwrap();
        assert!(matches!(&event, DeviceEvent::FileAdded(f) if f.name == "capt_0001.jpg"), "got {event:?}");
        let event = device.wait_for_event(Duration::from_millis(100)).await.unwrap();
        assert_eq!(event, DeviceEvent::Timeout);
    }
}
