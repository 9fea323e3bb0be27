//! # sidecar: durable per-file processing record
//!
//! Every file claimed by the pipeline gets a small companion file next to it
//! (`IMG_0001.JPG` → `IMG_0001.JPG.lock`) holding `key=value` lines. The record
//! is the only durable signal of in-flight work: it exists from the moment the
//! capture loop starts saving a file until the job for that file reaches
//! `DONE`, at which point it is deleted.
//!
//! ## Format
//! - UTF-8, one `key<sep>value` pair per line, default separator `=`.
//! - No escaping: a separator inside a key or value mis-parses. Newlines in
//!   values are flattened to spaces on write so a record always stays one pair
//!   per line.
//!
//! ## Concurrency
//! There is no locking. Callers guarantee a single writer per target, which the
//! pipeline gets for free because each file is owned by exactly one job.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::error::SidecarError;
use crate::stage::Stage;

pub const DEFAULT_SUFFIX: &str = ".lock";
pub const DEFAULT_SEPARATOR: char = '=';

pub const STATUS_KEY: &str = "status";
pub const REASON_KEY: &str = "reason";

/// Parsed contents of one sidecar file.
pub type SidecarRecord = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct SidecarStore {
    suffix: String,
    separator: char,
}

impl Default for SidecarStore {
    fn default() -> Self {
        Self::new(DEFAULT_SUFFIX, DEFAULT_SEPARATOR)
    }
}

impl SidecarStore {
    pub fn new(suffix: impl Into<String>, separator: char) -> Self {
        Self {
            suffix: suffix.into(),
            separator,
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Sidecar location for `target`: the suffix appended to the full file name.
    pub fn path_for(&self, target: &Path) -> PathBuf {
        let mut name = target.file_name().unwrap_or_default().to_os_string();
        name.push(&self.suffix);
        target.with_file_name(name)
    }

    /// Inverse of [`path_for`](Self::path_for): the target a sidecar belongs to,
    /// or `None` when `path` is not a sidecar.
    pub fn target_for(&self, sidecar: &Path) -> Option<PathBuf> {
        let name = sidecar.file_name()?.to_str()?;
        let target_name = name.strip_suffix(self.suffix.as_str())?;
        if target_name.is_empty() {
            return None;
        }
        Some(sidecar.with_file_name(target_name))
    }

    pub async fn read(&self, target: &Path) -> Result<SidecarRecord, SidecarError> {
        let path = self.path_for(target);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SidecarError::NotFound(path))
            }
            Err(e) => return Err(SidecarError::Io(e)),
        };
        let text = String::from_utf8(bytes).map_err(|e| SidecarError::CorruptRecord {
            path: path.clone(),
            reason: format!("not UTF-8: {e}"),
        })?;

        let mut record = SidecarRecord::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match line.split_once(self.separator) {
                Some((key, value)) => {
                    record.insert(key.trim().to_string(), value.trim().to_string());
                }
                None => {
                    return Err(SidecarError::CorruptRecord {
                        path,
                        reason: format!("line {} has no '{}' separator", idx + 1, self.separator),
                    })
                }
            }
        }
        Ok(record)
    }

    /// Last recorded stage, if the record exists and carries a valid `status`.
    pub async fn status(&self, target: &Path) -> Result<Option<Stage>, SidecarError> {
        let record = self.read(target).await?;
        Ok(record.get(STATUS_KEY).and_then(|s| s.parse().ok()))
    }

    /// Read-merge-write a single field.
    ///
    /// Other fields already in the record are preserved. A corrupt record is
    /// logged and replaced by one holding only the new field.
    pub async fn write(&self, target: &Path, key: &str, value: &str) -> Result<(), SidecarError> {
        let mut record = match self.read(target).await {
            Ok(record) => record,
            Err(SidecarError::NotFound(_)) => SidecarRecord::new(),
            Err(SidecarError::CorruptRecord { path, reason }) => {
                warn!(path = %path.display(), %reason, "Corrupt sidecar record, starting from empty");
                SidecarRecord::new()
            }
            Err(e) => return Err(e),
        };
        record.insert(key.to_string(), flatten(value));
        self.write_record(target, &record).await
    }

    pub async fn write_status(&self, target: &Path, stage: Stage) -> Result<(), SidecarError> {
        self.write(target, STATUS_KEY, stage.as_str()).await
    }

    /// Remove the sidecar. An already missing record is not an error.
    pub async fn delete(&self, target: &Path) -> Result<(), SidecarError> {
        let path = self.path_for(target);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Removed sidecar record");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Sidecar record already absent");
                Ok(())
            }
            Err(e) => Err(SidecarError::Io(e)),
        }
    }

    async fn write_record(&self, target: &Path, record: &SidecarRecord) -> Result<(), SidecarError> {
        let path = self.path_for(target);
        let mut body = String::new();
        for (key, value) in record {
            body.push_str(key);
            body.push(self.separator);
            body.push_str(value);
            body.push('\n');
        }

        // Rename over the old record so a crash never leaves it half written.
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

fn flatten(value: &str) -> String {
    value
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
