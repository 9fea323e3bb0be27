use camtransfer::load_config::{load_config, DeviceKind, TargetSection, UPLOAD_TOKEN_ENV};
use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn config_file(yaml: &str) -> NamedTempFile {
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), yaml).unwrap();
    config_file
}

/// A full config maps every section onto the pipeline settings.
#[tokio::test]
#[serial]
async fn test_load_config_full_http_target() {
    let config_file = config_file(
        r#"
save_dir: ./captures
workers: 2
recover_unfinished: false
delete_local: false
device:
  type: hot_folder
  path: /media/camera/DCIM
  prefix: cam_
  poll_timeout_ms: 1000
  reconnect_delay_ms: 500
upload:
  enabled: true
  remote_dir: /photos
  target:
    type: http
    base_url: https://store.example.com
protect:
  enabled: true
  public_key: camtransfer.pub
  overwrite: true
"#,
    );
    env::set_var(UPLOAD_TOKEN_ENV, "s3cret");

    let config = load_config(config_file.path()).expect("Config should load");

    assert_eq!(config.pipeline.save_dir, PathBuf::from("./captures"));
    assert_eq!(config.pipeline.workers, 2);
    assert!(!config.pipeline.recover_unfinished);
    assert_eq!(config.pipeline.remote_dir, "/photos");
    assert_eq!(config.pipeline.device_prefix, "cam_");
    assert_eq!(config.pipeline.poll_timeout_ms, 1000);
    assert_eq!(config.pipeline.reconnect_delay_ms, 500);
    assert!(config.pipeline.protects());
    assert!(config.pipeline.overwrite);
    assert_eq!(config.device.kind, DeviceKind::HotFolder);
    assert_eq!(config.device.path, PathBuf::from("/media/camera/DCIM"));
    assert_eq!(
        config.target,
        Some(TargetSection::Http {
            base_url: "https://store.example.com".into()
        })
    );
    assert_eq!(config.public_key, Some(PathBuf::from("camtransfer.pub")));
    assert_eq!(config.upload_token.as_deref(), Some("s3cret"));

    env::remove_var(UPLOAD_TOKEN_ENV);
}

/// Omitted sections fall back to defaults.
#[tokio::test]
#[serial]
async fn test_load_config_defaults() {
    let config_file = config_file(
        r#"
save_dir: ./captures
device:
  type: hot_folder
  path: ./spool
upload:
  target:
    type: directory
    root: /mnt/nas
"#,
    );
    env::remove_var(UPLOAD_TOKEN_ENV);

    let config = load_config(config_file.path()).expect("Config should load");

    assert_eq!(config.pipeline.workers, 4);
    assert!(config.pipeline.recover_unfinished);
    assert!(config.pipeline.upload);
    assert_eq!(config.pipeline.remote_dir, "/uploads");
    assert_eq!(config.pipeline.device_prefix, "capt_");
    assert_eq!(config.pipeline.poll_timeout_ms, 3000);
    assert_eq!(config.pipeline.reconnect_delay_ms, 2000);
    assert!(!config.pipeline.protect);
    assert!(!config.pipeline.delete_local);
    assert_eq!(
        config.target,
        Some(TargetSection::Directory {
            root: PathBuf::from("/mnt/nas")
        })
    );
    assert!(config.upload_token.is_none());
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_when_upload_has_no_target() {
    let config_file = config_file(
        r#"
save_dir: ./captures
device:
  type: hot_folder
  path: ./spool
"#,
    );
    let err = load_config(config_file.path()).unwrap_err();
    assert!(err.to_string().contains("upload.target"), "got: {err}");
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_when_protect_has_no_public_key() {
    let config_file = config_file(
        r#"
save_dir: ./captures
device:
  type: hot_folder
  path: ./spool
upload:
  enabled: false
protect:
  enabled: true
"#,
    );
    let err = load_config(config_file.path()).unwrap_err();
    assert!(err.to_string().contains("public_key"), "got: {err}");
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_for_unknown_device_type() {
    let config_file = config_file(
        r#"
save_dir: ./captures
device:
  type: ptp_camera
  path: ./spool
upload:
  enabled: false
"#,
    );
    let err = load_config(config_file.path()).unwrap_err();
    assert!(err.to_string().contains("parse"), "got: {err}");
}

/// If the config file is not valid YAML, load_config errors and reports as such.
#[tokio::test]
#[serial]
async fn test_load_config_errors_for_invalid_file() {
    let config_file = config_file("not-yaml: [:::");
    let err = load_config(config_file.path()).unwrap_err();
    let msg = err.to_string();
    assert!(
        msg.contains("parse") || msg.contains("YAML"),
        "Parse error expected, got: {msg}"
    );
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_for_missing_file() {
    let err = load_config("/definitely/not/here.yaml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
