use async_trait::async_trait;
use camtransfer_core::capture::CaptureLoop;
use camtransfer_core::config::PipelineConfig;
use camtransfer_core::contract::{Device, DeviceEvent, DeviceFile};
use camtransfer_core::error::DeviceError;
use camtransfer_core::pipeline::Pipeline;
use camtransfer_core::pool::WorkerPool;
use camtransfer_core::sidecar::SidecarStore;
use camtransfer_core::stage::Stage;
use camtransfer_core::status::StatusRegistry;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::sync::watch;

/// Plays back a fixed script of connect results and events, then requests shutdown.
struct ScriptedDevice {
    connects: VecDeque<Result<String, DeviceError>>,
    events: VecDeque<Result<DeviceEvent, DeviceError>>,
    files: HashMap<String, Vec<u8>>,
    failing_files: Vec<String>,
    releases: Arc<AtomicUsize>,
    shutdown: watch::Sender<bool>,
}

impl ScriptedDevice {
    fn new(shutdown: watch::Sender<bool>) -> Self {
        Self {
            connects: VecDeque::new(),
            events: VecDeque::new(),
            files: HashMap::new(),
            failing_files: Vec::new(),
            releases: Arc::new(AtomicUsize::new(0)),
            shutdown,
        }
    }

    fn file_added(mut self, name: &str, content: &[u8]) -> Self {
        self.files.insert(name.to_string(), content.to_vec());
        self.events.push_back(Ok(DeviceEvent::FileAdded(DeviceFile {
            folder: "/store_00010001/DCIM/100CANON".into(),
            name: name.to_string(),
        })));
        self
    }

    fn event(mut self, event: Result<DeviceEvent, DeviceError>) -> Self {
        self.events.push_back(event);
        self
    }

    fn connect_result(mut self, result: Result<String, DeviceError>) -> Self {
        self.connects.push_back(result);
        self
    }
}

#[async_trait]
impl Device for ScriptedDevice {
    async fn connect(&mut self) -> Result<String, DeviceError> {
        self.connects
            .pop_front()
            .unwrap_or_else(|| Ok("Scripted Camera".to_string()))
    }

    async fn wait_for_event(&mut self, _timeout: Duration) -> Result<DeviceEvent, DeviceError> {
        match self.events.pop_front() {
            Some(event) => event,
            None => {
                let _ = self.shutdown.send(true);
                Ok(DeviceEvent::Timeout)
            }
        }
    }

    async fn materialize(&mut self, file: &DeviceFile, target: &Path) -> Result<(), DeviceError> {
        if self.failing_files.contains(&file.name) {
            return Err(DeviceError::Io("USB transfer aborted".into()));
        }
        let bytes = self.files.get(&file.name).ok_or(DeviceError::NotFound)?;
        fs::write(target, bytes).map_err(DeviceError::from)
    }

    async fn release(&mut self) -> Result<(), DeviceError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn fast_config(dir: &TempDir) -> PipelineConfig {
    let mut config = PipelineConfig::new(dir.path());
    config.upload = false;
    config.reconnect_delay_ms = 1;
    config.poll_timeout_ms = 10;
    config
}

struct Harness {
    pipeline: Arc<Pipeline>,
    pool: WorkerPool,
    status: StatusRegistry,
}

fn harness(config: PipelineConfig) -> Harness {
    let status = StatusRegistry::new();
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(config),
        SidecarStore::default(),
        status.clone(),
    ));
    let pool = WorkerPool::spawn(2, pipeline.clone());
    Harness {
        pipeline,
        pool,
        status,
    }
}

#[tokio::test]
async fn test_capture_saves_files_and_submits_jobs() {
    let dir = tempdir().unwrap();
    let h = harness(fast_config(&dir));
    let (tx, rx) = watch::channel(false);

    let device = ScriptedDevice::new(tx)
        .file_added("capt_0001.jpg", b"first")
        .event(Ok(DeviceEvent::Timeout))
        .event(Ok(DeviceEvent::Other("battery level changed".into())))
        .file_added("IMG_0002.jpg", b"second");

    let capture = CaptureLoop::new(device, &h.pipeline, h.pool.submitter(), rx);
    let report = capture.run().await;
    h.pool.shutdown().await;

    assert_eq!(report.captured, 2);
    assert_eq!(report.device_errors, 0);
    assert_eq!(fs::read(dir.path().join("0001.jpg")).unwrap(), b"first");
    assert_eq!(fs::read(dir.path().join("IMG_0002.jpg")).unwrap(), b"second");
    assert!(!dir.path().join("capt_0001.jpg").exists());

    let sidecars = SidecarStore::default();
    for name in ["0001.jpg", "IMG_0002.jpg"] {
        assert_eq!(h.status.get(name).unwrap().stage, Stage::Done);
        assert!(!sidecars.path_for(&dir.path().join(name)).exists());
    }
}

#[tokio::test]
async fn test_device_error_releases_and_reconnects() {
    let dir = tempdir().unwrap();
    let h = harness(fast_config(&dir));
    let (tx, rx) = watch::channel(false);

    let device = ScriptedDevice::new(tx)
        .connect_result(Err(DeviceError::NotFound))
        .connect_result(Err(DeviceError::NotFound))
        .connect_result(Ok("Camera A".into()))
        .event(Err(DeviceError::Other("I/O in progress".into())))
        .connect_result(Err(DeviceError::Other("busy".into())))
        .file_added("capt_0003.jpg", b"after reconnect");
    let releases = device.releases.clone();

    let report = CaptureLoop::new(device, &h.pipeline, h.pool.submitter(), rx)
        .run()
        .await;
    h.pool.shutdown().await;

    assert_eq!(report.device_errors, 1);
    assert_eq!(report.connects, 2);
    assert_eq!(report.captured, 1);
    // One release after the error, one at shutdown.
    assert_eq!(releases.load(Ordering::SeqCst), 2);
    assert_eq!(h.status.get("0003.jpg").unwrap().stage, Stage::Done);
}

#[tokio::test]
async fn test_failed_materialize_is_not_submitted() {
    let dir = tempdir().unwrap();
    let h = harness(fast_config(&dir));
    let (tx, rx) = watch::channel(false);

    let mut device = ScriptedDevice::new(tx).file_added("capt_0004.jpg", b"lost");
    device.failing_files.push("capt_0004.jpg".into());

    let report = CaptureLoop::new(device, &h.pipeline, h.pool.submitter(), rx)
        .run()
        .await;
    h.pool.shutdown().await;

    assert_eq!(report.captured, 0);
    assert_eq!(report.device_errors, 1);
    let target = dir.path().join("0004.jpg");
    assert!(!target.exists());
    assert_eq!(
        SidecarStore::default().status(&target).await.unwrap(),
        Some(Stage::Saving)
    );
    assert_eq!(h.status.get("0004.jpg").unwrap().stage, Stage::Failed);
}

/// Never finds the device.
struct AbsentDevice {
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl Device for AbsentDevice {
    async fn connect(&mut self) -> Result<String, DeviceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(DeviceError::NotFound)
    }

    async fn wait_for_event(&mut self, _timeout: Duration) -> Result<DeviceEvent, DeviceError> {
        Err(DeviceError::NotFound)
    }

    async fn materialize(&mut self, _file: &DeviceFile, _target: &Path) -> Result<(), DeviceError> {
        Err(DeviceError::NotFound)
    }

    async fn release(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_shutdown_interrupts_reconnect_wait() {
    let dir = tempdir().unwrap();
    let mut config = fast_config(&dir);
    config.reconnect_delay_ms = 60_000;
    let h = harness(config);
    let (tx, rx) = watch::channel(false);

    let attempts = Arc::new(AtomicUsize::new(0));
    let device = AbsentDevice {
        attempts: attempts.clone(),
    };
    let capture = tokio::spawn(CaptureLoop::new(device, &h.pipeline, h.pool.submitter(), rx).run());

    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), capture)
        .await
        .expect("capture loop must stop promptly")
        .expect("capture task");
    h.pool.shutdown().await;

    assert_eq!(report.captured, 0);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}
