// livegate/src/config.rs
//
// Service configuration.
//
// `ServiceConfig` is what the daemon runs on; `main` fills it from the CLI.
// Engine tuning lives in an optional JSON file:
//
//   {
//     "calibration": "hardened",
//     "num_threads": 4,
//     "model_dir":   "/opt/livegate/models",
//     "fixture":     { "quality": 0.9, "liveness_score": 2.5, "probability": 0.95 }
//   }
//
// Every field is optional.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::fixture::FixtureScores;
use crate::engine::{EngineConfig, Meta};
use crate::license::monitor::DEFAULT_POLL_INTERVAL;
use crate::license::DEFAULT_PRODUCT;
use crate::pipeline::DEFAULT_MAX_BODY;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, #[source] source: std::io::Error },

    #[error("invalid engine config {path}: {source}")]
    Parse { path: PathBuf, #[source] source: serde_json::Error },

    #[error("license key must be hex: {0}")]
    LicenseKey(#[from] hex::FromHexError),

    #[error("poll interval must be at least one second")]
    PollInterval,
}

/// Contents of the `--engine-config` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    #[serde(flatten)]
    pub engine:  EngineConfig,
    pub fixture: FixtureScores,
}

impl EngineSettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        serde_json::from_slice(&raw)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    pub fn meta(&self) -> Meta {
        Meta { calibration: self.engine.calibration }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub bind:               SocketAddr,
    pub license_file:       PathBuf,
    /// Hex-encoded HMAC key; unsigned license files are accepted when unset.
    pub license_key:        Option<String>,
    pub product:            String,
    pub poll_interval_secs: u64,
    pub staging_dir:        PathBuf,
    pub pipeline:           String,
    pub engine:             EngineSettings,
    pub max_body_bytes:     usize,
    pub license_gate:       bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind:               SocketAddr::from(([0, 0, 0, 0], 8080)),
            license_file:       PathBuf::from("license.json"),
            license_key:        None,
            product:            DEFAULT_PRODUCT.to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            staging_dir:        default_staging_dir(),
            pipeline:           "default".to_string(),
            engine:             EngineSettings::default(),
            max_body_bytes:     DEFAULT_MAX_BODY,
            license_gate:       true,
        }
    }
}

impl ServiceConfig {
    pub fn poll_interval(&self) -> Result<Duration, ConfigError> {
        match self.poll_interval_secs {
            0 => Err(ConfigError::PollInterval),
            n => Ok(Duration::from_secs(n)),
        }
    }

    pub fn license_key_bytes(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        self.license_key
            .as_deref()
            .map(|k| hex::decode(k.trim()))
            .transpose()
            .map_err(ConfigError::from)
    }
}

pub fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("livegate")
}
