//! # camtransfer CLI interface
//!
//! Command parsing and orchestration only. The pipeline, recovery and capture
//! logic live in `camtransfer-core`; this module wires the concrete device,
//! transfer target and protector into it.
//!
//! ## Subcommands
//! - `run`: recovery scan, then capture until Ctrl+C, then drain the pool.
//! - `decrypt`: batch-decrypt every `.enc` file in a directory with the private key.
//! - `create-key`: write a fresh public/private key pair.
//!
//! For programmatic and integration use, call [`run`] with a constructed [`Cli`].

use crate::device::HotFolderDevice;
use crate::display;
use crate::keys::{create_key_pair, load_private_key, load_public_key};
use crate::load_config::{load_config, DeviceKind};
use crate::protect::SealedProtector;
use crate::transfer;
use anyhow::{anyhow, Result};
use camtransfer_core::batch::invert_directory;
use camtransfer_core::capture::CaptureLoop;
use camtransfer_core::error::ConfigError;
use camtransfer_core::pipeline::Pipeline;
use camtransfer_core::pool::WorkerPool;
use camtransfer_core::recovery::RecoveryScanner;
use camtransfer_core::sidecar::SidecarStore;
use camtransfer_core::status::StatusRegistry;
use clap::{Parser, Subcommand};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// CLI for camtransfer: capture files from a device, upload and/or encrypt them.
#[derive(Parser, Debug)]
#[clap(
    name = "camtransfer",
    version,
    about = "Capture files from a camera or hot folder, then upload and/or encrypt them, surviving crashes and disconnects"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Capture and process files until interrupted, using the given config file
    Run {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Decrypt every `.enc` file in a directory
    Decrypt {
        /// Directory holding encrypted files
        #[clap(long)]
        dir: PathBuf,
        /// Private key file (`.priv`) matching the public key used for encryption
        #[clap(long)]
        key: PathBuf,
        /// Replace each encrypted file by its plaintext instead of writing `.dec` copies
        #[clap(long)]
        overwrite: bool,
    },
    /// Generate a new key pair. Refuses to replace existing key files
    CreateKey {
        /// Path stem: writes `<key>.pub` and `<key>.priv`
        #[clap(long)]
        key: PathBuf,
    },
}

/// Async CLI entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Run { config } => run_pipeline(&config).await,
        Commands::Decrypt {
            dir,
            key,
            overwrite,
        } => decrypt(&dir, &key, overwrite).await,
        Commands::CreateKey { key } => {
            info!(command = "create-key", stem = %key.display(), "Creating key pair");
            create_key_pair(&key).map(|_| ())
        }
    }
}

async fn decrypt(dir: &Path, key_path: &Path, overwrite: bool) -> Result<()> {
    info!(command = "decrypt", dir = %dir.display(), overwrite, "Decrypting directory");
    let key = load_private_key(key_path)?;
    let report = invert_directory(dir, &SealedProtector::new(), &key, overwrite)
        .await
        .map_err(|e| anyhow!("failed to list {}: {e}", dir.display()))?;
    info!(
        command = "decrypt",
        restored = report.restored.len(),
        failed = report.failed.len(),
        "Decryption complete"
    );
    Ok(())
}

async fn run_pipeline(config_path: &Path) -> Result<()> {
    let app = load_config(config_path)?;
    app.pipeline.validate()?;
    app.pipeline.trace_loaded();
    let config = Arc::new(app.pipeline);

    let key = match (config.protects(), &app.public_key) {
        (true, Some(path)) => Some(Arc::new(load_public_key(path)?)),
        (true, None) => return Err(ConfigError::MissingKeyMaterial.into()),
        (false, _) => None,
    };

    let status = StatusRegistry::new();
    let mut pipeline = Pipeline::new(config.clone(), SidecarStore::default(), status.clone());
    if config.upload {
        let target = app
            .target
            .as_ref()
            .ok_or_else(|| anyhow!("upload is enabled but no target is configured"))?;
        let transfer = transfer::from_target(target, app.upload_token.clone())?;
        if let Err(e) = transfer.probe().await {
            error!(error = %e, "Upload target check failed");
            return Err(anyhow!("upload target check failed: {e}"));
        }
        pipeline = pipeline.with_transfer(transfer);
    }
    if config.protects() {
        pipeline = pipeline.with_protector(Arc::new(SealedProtector::new()));
    }
    let pipeline = Arc::new(pipeline);

    let pool = WorkerPool::spawn(config.workers, pipeline.clone());

    if config.recover_unfinished {
        let report = RecoveryScanner::new(&pipeline)
            .scan(&pool.submitter(), key.clone())
            .await?;
        if !report.resubmitted.is_empty() {
            info!(count = report.resubmitted.len(), "Resuming unfinished files");
        }
    }

    let (display_tx, display_rx) = watch::channel(false);
    let display = display::spawn(status.clone(), display::DEFAULT_REFRESH, display_rx);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        forward_interrupts(signal::ctrl_c, shutdown_tx).await;
        std::process::exit(130);
    });

    let device = match app.device.kind {
        DeviceKind::HotFolder => HotFolderDevice::new(&app.device.path)
            .with_save_location(config.clone(), pipeline.sidecars().clone()),
    };
    let report = CaptureLoop::new(device, &pipeline, pool.submitter(), shutdown_rx)
        .with_key(key)
        .run()
        .await;

    info!("Waiting for in-flight files to finish");
    pool.shutdown().await;

    let _ = display_tx.send(true);
    if let Err(e) = display.await {
        warn!(error = %e, "Display task ended abnormally");
    }

    let (done, failed) = status.outcome_counts();
    info!(
        command = "run",
        captured = report.captured,
        done,
        failed,
        "Shutdown complete"
    );
    Ok(())
}

/// Turn interrupts from `next` into a shutdown request.
///
/// The first interrupt sets `shutdown` so in-flight files can drain. Returns
/// on the second one, leaving the caller to exit without waiting.
pub async fn forward_interrupts<F, Fut>(mut next: F, shutdown: watch::Sender<bool>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    let mut received = 0u32;
    loop {
        if let Err(e) = next().await {
            // Without a signal handler the process runs until killed.
            warn!(error = %e, "Unable to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        received += 1;
        if received == 1 {
            info!("Received Ctrl+C, finishing in-flight files. Press Ctrl+C again to exit now");
            let _ = shutdown.send(true);
        } else {
            warn!("Received second Ctrl+C, exiting without waiting for in-flight files");
            return;
        }
    }
}
