#![doc = "camtransfer-core: crash-safe capture-to-transfer pipeline."]

//! This crate contains the orchestration and recovery logic for camtransfer:
//! sidecar records, the stage machine, the live status registry, the worker
//! pool with its per-file job, the capture loop and the startup recovery scan.
//! Device drivers, transfer protocols and ciphers plug in through the traits in
//! [`contract`].
//!
//! # Usage
//! Build one [`config::PipelineConfig`], wrap a [`pipeline::Pipeline`] around
//! it with the capabilities you need, spawn a [`pool::WorkerPool`], run
//! [`recovery::RecoveryScanner::scan`] and then [`capture::CaptureLoop::run`].

pub mod batch;
pub mod capture;
pub mod config;
pub mod contract;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod recovery;
pub mod sidecar;
pub mod stage;
pub mod status;
