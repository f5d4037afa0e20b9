// livegate/src/engine/fixture.rs
//
// Deterministic engine backend for development and integration runs.
//
// The vendor engine ships as a native library outside this repository and is
// plugged in behind `EngineBackend`. The fixture backend stands in for it:
//   - images are validated by container magic (JPEG / PNG / BMP),
//   - scores come from configuration,
//   - with a license file attached, an instance built while the file was
//     present keeps working only while it is still there, and reports the
//     vendor's "license is not installed" message otherwise. Rebuilding after
//     the file reappears heals it, which is what the request retry path
//     relies on.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    EngineBackend, EngineConfig, EngineError, EngineStatus, Image, LivenessPipeline, LivenessResult,
    Meta, PipelineResult, QualityResult, LICENSE_NOT_INSTALLED,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureScores {
    pub quality:        f32,
    pub liveness_score: f32,
    pub probability:    f32,
}

impl Default for FixtureScores {
    fn default() -> Self {
        Self { quality: 0.9, liveness_score: 2.5, probability: 0.95 }
    }
}

pub struct FixtureBackend {
    scores:       FixtureScores,
    license_file: Option<PathBuf>,
}

impl FixtureBackend {
    /// Shown in the startup banner; verdicts from this backend are not real.
    pub const DESCRIPTION: &'static str = "fixture (synthetic scores)";

    pub fn new(scores: FixtureScores) -> Self {
        Self { scores, license_file: None }
    }

    pub fn with_license_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.license_file = Some(path.into());
        self
    }
}

impl EngineBackend for FixtureBackend {
    fn create(&self, name: &str, config: &EngineConfig)
        -> Result<Box<dyn LivenessPipeline>, EngineError>
    {
        if let Some(dir) = &config.model_dir {
            if !dir.is_dir() {
                return Err(EngineError::from_status(
                    EngineStatus::FailedToReadModel,
                    format!("Model directory not found: {}", dir.display()),
                ));
            }
        }
        if name.trim().is_empty() {
            return Err(EngineError::from_status(
                EngineStatus::NoSuchObjectInBuild,
                "Pipeline name must not be empty",
            ));
        }
        let licensed = self.license_file.as_deref().map(Path::exists).unwrap_or(true);
        debug!(pipeline = name, licensed, "fixture pipeline created");
        Ok(Box::new(FixturePipeline {
            scores:       self.scores,
            license_file: self.license_file.clone(),
            licensed:     AtomicBool::new(licensed),
        }))
    }
}

struct FixturePipeline {
    scores:       FixtureScores,
    license_file: Option<PathBuf>,
    // Latches false: once the license is gone this instance stays unusable.
    licensed:     AtomicBool,
}

impl LivenessPipeline for FixturePipeline {
    fn check_liveness(&self, image: &Image, meta: &Meta) -> Result<PipelineResult, EngineError> {
        let still_there = self.license_file.as_deref().map(Path::exists).unwrap_or(true);
        if !still_there {
            self.licensed.store(false, Ordering::Relaxed);
        }
        if !self.licensed.load(Ordering::Relaxed) {
            return Err(EngineError::from_status(EngineStatus::LicenseError, LICENSE_NOT_INSTALLED));
        }
        debug!(
            path        = %image.path().display(),
            bytes       = image.bytes().len(),
            calibration = ?meta.calibration,
            "fixture liveness evaluated"
        );
        Ok(PipelineResult {
            quality:  QualityResult { score: self.scores.quality, ok: true },
            liveness: LivenessResult {
                score:       self.scores.liveness_score,
                probability: self.scores.probability.clamp(0.0, 1.0),
                ok:          true,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];

    #[test]
    fn scores_come_from_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.jpg");
        std::fs::write(&path, JPEG).unwrap();

        let backend = FixtureBackend::new(FixtureScores { quality: 0.7, liveness_score: 1.0, probability: 0.3 });
        let pipeline = backend.create("default", &EngineConfig::default()).unwrap();
        let image = pipeline.open_image(&path).unwrap();
        let result = pipeline.check_liveness(&image, &Meta::default()).unwrap();
        assert_eq!(result.quality.score, 0.7);
        assert_eq!(result.liveness.probability, 0.3);
    }

    #[test]
    fn opened_image_keeps_its_path_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("face.jpg");
        std::fs::write(&image_path, JPEG).unwrap();

        let pipeline = FixtureBackend::new(FixtureScores::default())
            .create("default", &EngineConfig::default())
            .unwrap();
        let image = pipeline.open_image(&image_path).unwrap();
        assert_eq!(image.path(), image_path.as_path());
        assert_eq!(image.bytes(), JPEG);
        assert!(pipeline.check_liveness(&image, &Meta::default()).is_ok());
    }

    #[test]
    fn missing_model_dir_fails_creation() {
        let config = EngineConfig { model_dir: Some("/definitely/not/here".into()), ..Default::default() };
        let err = FixtureBackend::new(FixtureScores::default())
            .create("default", &config)
            .err()
            .unwrap();
        assert_eq!(err.status(), EngineStatus::FailedToReadModel);
    }

    #[test]
    fn pipeline_loses_license_when_file_disappears_and_rebuild_heals() {
        let dir = tempfile::tempdir().unwrap();
        let license = dir.path().join("license.json");
        let image_path = dir.path().join("face.jpg");
        std::fs::write(&license, "{}").unwrap();
        std::fs::write(&image_path, JPEG).unwrap();

        let backend = FixtureBackend::new(FixtureScores::default()).with_license_file(&license);
        let pipeline = backend.create("default", &EngineConfig::default()).unwrap();
        let image = pipeline.open_image(&image_path).unwrap();
        assert!(pipeline.check_liveness(&image, &Meta::default()).is_ok());

        std::fs::remove_file(&license).unwrap();
        let err = pipeline.check_liveness(&image, &Meta::default()).unwrap_err();
        assert!(err.is_license_not_installed());

        std::fs::write(&license, "{}").unwrap();
        // The old instance stays broken; only a rebuild picks the license up again.
        assert!(pipeline.check_liveness(&image, &Meta::default()).is_err());
        let rebuilt = backend.create("default", &EngineConfig::default()).unwrap();
        assert!(rebuilt.check_liveness(&image, &Meta::default()).is_ok());
    }
}
