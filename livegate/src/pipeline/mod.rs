// livegate/src/pipeline/mod.rs
//
// Request pipeline for POST /process.
//
//   license gate ─► acquire image ─► stage temp file ─► engine (≤ 2 attempts)
//                                                          │
//                         cleanup ◄─ verdict ◄─────────────┘
//
// The gate runs before anything is read or written. Upload decode failures
// degrade to an empty image. The engine call runs on the blocking pool
// against a generation borrowed from the shared handle; a license error
// from the engine rebuilds the handle and retries once. The staged file is
// removed on every path, explicitly on the normal path and by its guard
// otherwise.

pub mod staging;
pub mod upload;
pub mod verdict;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, warn};

use crate::engine::{EngineError, EngineHandle, Meta, PipelineResult};
use crate::license::LicenseStore;
use crate::metrics::ServiceMetrics;

pub use staging::StagingArea;
pub use upload::ImageUpload;
pub use verdict::{LivenessReport, Verdict};

/// Engine attempts per request, the first call included.
pub const MAX_ATTEMPTS: u32 = 2;

pub const DEFAULT_MAX_BODY: usize = 16 * 1024 * 1024;

/// Failures that abort a request; answered with HTTP 409.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to stage image: {0}")]
    Staging(#[source] std::io::Error),

    #[error("engine task failed: {0}")]
    Task(#[from] JoinError),

    #[error("failed to serialize response: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Refused at the license gate; the engine was not touched.
    Unlicensed,
    Report(LivenessReport),
}

pub struct RequestPipeline {
    license:  LicenseStore,
    engine:   Arc<EngineHandle>,
    staging:  StagingArea,
    metrics:  Arc<ServiceMetrics>,
    meta:     Meta,
    gate:     bool,
    max_body: usize,
}

impl RequestPipeline {
    pub fn new(
        license: LicenseStore,
        engine:  Arc<EngineHandle>,
        staging: StagingArea,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            license,
            engine,
            staging,
            metrics,
            meta:     Meta::default(),
            gate:     true,
            max_body: DEFAULT_MAX_BODY,
        }
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    /// Turn the license gate on or off. Off is for development builds only.
    pub fn with_license_gate(mut self, enabled: bool) -> Self {
        self.gate = enabled;
        self
    }

    pub fn with_max_body(mut self, bytes: usize) -> Self {
        self.max_body = bytes;
        self
    }

    pub fn license(&self) -> &LicenseStore { &self.license }
    pub fn engine(&self) -> &EngineHandle { &self.engine }
    pub fn metrics(&self) -> &ServiceMetrics { &self.metrics }
    pub fn max_body(&self) -> usize { self.max_body }

    pub async fn check_liveness(&self, upload: ImageUpload) -> Result<Outcome, PipelineError> {
        self.metrics.record_request();

        if self.gate && !self.license.is_licensed() {
            self.metrics.record_unlicensed();
            debug!("request refused at license gate");
            return Ok(Outcome::Unlicensed);
        }

        let bytes = upload::acquire(upload).await;
        let artifact = self.staging.stage(&bytes).await.map_err(PipelineError::Staging)?;

        let engine  = Arc::clone(&self.engine);
        let metrics = Arc::clone(&self.metrics);
        let path    = artifact.path().to_path_buf();
        let meta    = self.meta;
        let outcome = tokio::task::spawn_blocking(move || {
            invoke_with_retry(&engine, &path, &meta, &metrics)
        })
        .await?;

        let report = LivenessReport::from_outcome(&outcome);
        self.metrics.record_report(&report);
        debug!(
            verdict = %report.verdict,
            quality = report.quality,
            probability = report.probability,
            state = %report.state,
            "liveness checked"
        );

        if let Err(e) = artifact.remove() {
            warn!(error = %e, "failed to remove staged image");
        }
        Ok(Outcome::Report(report))
    }
}

/// Run the liveness check, rebuilding the engine and retrying when the
/// engine reports its license missing. Returns the last outcome, which may
/// still be the license error once attempts run out.
///
/// A rebuild is only requested when another attempt will follow it.
pub fn invoke_with_retry(
    engine:  &EngineHandle,
    path:    &Path,
    meta:    &Meta,
    metrics: &ServiceMetrics,
) -> Result<PipelineResult, EngineError> {
    let mut generation = engine.acquire();
    let mut attempt = 1;
    loop {
        metrics.record_invocation();
        let outcome = generation.check_liveness(path, meta);
        match outcome {
            Err(ref e) if e.is_license_not_installed() && attempt < MAX_ATTEMPTS => {
                warn!(generation = generation.id(), attempt, "engine lost its license; rebuilding");
                metrics.record_license_retry();
                let stale = generation.id();
                generation = engine.recreate(stale).unwrap_or_else(|_| engine.acquire());
                attempt += 1;
            }
            _ => return outcome,
        }
    }
}
