//! Standalone batch inversion of protected artifacts, outside the capture pipeline.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{error, info};

use crate::contract::{KeyMaterial, Protector};

#[derive(Debug, Default)]
pub struct InvertReport {
    pub restored: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Invert every protected artifact directly inside `dir`.
///
/// A failing file is logged and recorded; the rest of the directory is still
/// processed. Only listing the directory itself can fail the whole batch.
pub async fn invert_directory(
    dir: &Path,
    protector: &dyn Protector,
    key: &KeyMaterial,
    overwrite: bool,
) -> io::Result<InvertReport> {
    let mut candidates = Vec::new();
    let mut listing = fs::read_dir(dir).await?;
    while let Some(entry) = listing.next_entry().await? {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file && protector.is_protected(&entry.path()) {
            candidates.push(entry.path());
        }
    }
    candidates.sort();

    let mut report = InvertReport::default();
    for path in candidates {
        match protector.invert(&path, key, overwrite).await {
            Ok(restored) => {
                info!(artifact = %path.display(), restored = %restored.display(), "Decrypted");
                report.restored.push(restored);
            }
            Err(e) => {
                error!(artifact = %path.display(), error = %e, "Decryption failed");
                report.failed.push((path, e.to_string()));
            }
        }
    }
    Ok(report)
}
