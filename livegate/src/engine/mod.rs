// livegate/src/engine/mod.rs
//
// Detection engine boundary.
//
// The liveness engine is a vendor library with a C-style contract:
//   create(name, config)               -> pipeline | (code, message)
//   image_create_path(path)            -> image    | (code, message)
//   check_liveness(pipeline, image, meta) -> result + (code, message)
//   destroy(pipeline) / image_destroy(image)
//
// Here the contract is two traits. Destroy is Drop. The engine's
// (code, message) pair is folded into `EngineError` once, at this boundary;
// callers match on variants, never on message text.

pub mod fixture;
pub mod handle;
#[cfg(test)]
pub mod testing;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use handle::EngineHandle;

/// Message the engine reports when its license vanished underneath a live
/// pipeline instance. Compared case-insensitively.
pub const LICENSE_NOT_INSTALLED: &str = "License error: license is not installed";

// ── Status codes ──────────────────────────────────────────────────────────────

/// Engine status codes, in the vendor's declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineStatus {
    FaceTooClose,
    FaceCloseToBorder,
    FaceCropped,
    FaceNotFound,
    TooManyFaces,
    FaceTooSmall,
    FaceAngleTooLarge,
    FailedToReadImage,
    FailedToWriteImage,
    FailedToReadModel,
    FailedToBuildInterpreter,
    FailedToInvokeInterpreter,
    FailedToAllocate,
    InvalidConfig,
    NoSuchObjectInBuild,
    FailedToPreprocessImageWhilePredict,
    FailedToPreprocessImageWhileDetect,
    FailedToPredictLandmarks,
    InvalidFuseMode,
    Nullptr,
    LicenseError,
    InvalidMeta,
    Unknown,
    Ok,
    FaceIsOccluded,
    FailedToFetchCoremlDecryptionKey,
    EyesClosed,
}

impl EngineStatus {
    /// Map a raw vendor status code. Out-of-range codes become `Unknown`.
    pub fn from_code(code: i32) -> Self {
        use EngineStatus::*;
        const ORDER: [EngineStatus; 27] = [
            FaceTooClose, FaceCloseToBorder, FaceCropped, FaceNotFound, TooManyFaces,
            FaceTooSmall, FaceAngleTooLarge, FailedToReadImage, FailedToWriteImage,
            FailedToReadModel, FailedToBuildInterpreter, FailedToInvokeInterpreter,
            FailedToAllocate, InvalidConfig, NoSuchObjectInBuild,
            FailedToPreprocessImageWhilePredict, FailedToPreprocessImageWhileDetect,
            FailedToPredictLandmarks, InvalidFuseMode, Nullptr, LicenseError, InvalidMeta,
            Unknown, Ok, FaceIsOccluded, FailedToFetchCoremlDecryptionKey, EyesClosed,
        ];
        usize::try_from(code)
            .ok()
            .and_then(|i| ORDER.get(i).copied())
            .unwrap_or(Unknown)
    }

}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reuse the serde spelling so logs match the vendor's enum names.
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| format!("{:?}", self));
        f.write_str(&name)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The pipeline lost its license. The only condition that triggers a
    /// handle rebuild.
    #[error("{0}")]
    LicenseNotInstalled(String),

    /// Any other non-OK status; `message` is the engine's text, verbatim.
    #[error("{message}")]
    Status { status: EngineStatus, message: String },
}

impl EngineError {
    /// Classify a (status, message) pair coming out of the engine.
    pub fn from_status(status: EngineStatus, message: impl Into<String>) -> Self {
        let message = message.into();
        if message.eq_ignore_ascii_case(LICENSE_NOT_INSTALLED) {
            Self::LicenseNotInstalled(message)
        } else {
            Self::Status { status, message }
        }
    }

    pub fn status(&self) -> EngineStatus {
        match self {
            Self::LicenseNotInstalled(_) => EngineStatus::LicenseError,
            Self::Status { status, .. }  => *status,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::LicenseNotInstalled(m)  => m,
            Self::Status { message, .. } => message,
        }
    }

    pub fn is_license_not_installed(&self) -> bool {
        matches!(self, Self::LicenseNotInstalled(_))
    }
}

// ── Configuration + meta ──────────────────────────────────────────────────────

/// Liveness threshold profile, trading APCER against BPCER.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Calibration {
    #[default]
    Regular,
    Soft,
    Hardened,
}

/// Configuration handed to `EngineBackend::create`. Reused verbatim on every
/// rebuild of the shared handle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub calibration: Calibration,
    pub num_threads: Option<usize>,
    pub model_dir:   Option<PathBuf>,
}

/// Per-call meta information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Meta {
    pub calibration: Calibration,
}

// ── Image object ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat { Jpeg, Png, Bmp, Unknown }

impl ImageFormat {
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Self::Jpeg
        } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Self::Png
        } else if bytes.starts_with(b"BM") {
            Self::Bmp
        } else {
            Self::Unknown
        }
    }
}

/// Decoded-enough image handed to the pipeline. Dropping it releases the
/// engine-side image object.
#[derive(Debug, Clone)]
pub struct Image {
    pub(crate) path:   PathBuf,
    pub(crate) bytes:  Vec<u8>,
    pub(crate) format: ImageFormat,
}

impl Image {
    /// `image_create_path`: read the staged file and reject anything that is
    /// not a supported image container.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let bytes = std::fs::read(path).map_err(|e| {
            EngineError::from_status(
                EngineStatus::FailedToReadImage,
                format!("Failed to read image: {}", e),
            )
        })?;
        if bytes.is_empty() {
            return Err(EngineError::from_status(
                EngineStatus::FailedToReadImage,
                "Failed to read image: empty buffer",
            ));
        }
        let format = ImageFormat::sniff(&bytes);
        if format == ImageFormat::Unknown {
            return Err(EngineError::from_status(
                EngineStatus::FailedToReadImage,
                "Failed to read image: unsupported format",
            ));
        }
        Ok(Self { path: path.to_path_buf(), bytes, format })
    }

    pub fn path(&self) -> &Path { &self.path }
    pub fn bytes(&self) -> &[u8] { &self.bytes }
    pub fn format(&self) -> ImageFormat { self.format }
}

// ── Results ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityResult {
    pub score: f32,
    pub ok:    bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LivenessResult {
    pub score:       f32,
    /// Probability of a live subject, in [0, 1].
    pub probability: f32,
    pub ok:          bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub quality:  QualityResult,
    pub liveness: LivenessResult,
}

// ── Traits ────────────────────────────────────────────────────────────────────

/// Factory side of the engine: builds pipeline instances.
pub trait EngineBackend: Send + Sync + 'static {
    fn create(&self, name: &str, config: &EngineConfig)
        -> Result<Box<dyn LivenessPipeline>, EngineError>;
}

/// One live pipeline instance. Dropping the box destroys it.
pub trait LivenessPipeline: Send + Sync {
    fn open_image(&self, path: &Path) -> Result<Image, EngineError> {
        Image::open(path)
    }

    fn check_liveness(&self, image: &Image, meta: &Meta) -> Result<PipelineResult, EngineError>;
}
