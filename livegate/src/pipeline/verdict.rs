// livegate/src/pipeline/verdict.rs
//
// Verdict classification and the JSON body returned by POST /process.
//
// Policy, first match wins:
//   quality < 0.5          → bad quality (overrides liveness)
//   probability >= 0.5     → genuine
//   otherwise              → spoofed

use std::fmt;

use serde::Serialize;

use crate::engine::{EngineError, PipelineResult};

pub const QUALITY_THRESHOLD:  f32 = 0.5;
pub const LIVENESS_THRESHOLD: f32 = 0.5;

pub const STATE_OK: &str = "OK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    #[serde(rename = "bad quality")]
    BadQuality,
    #[serde(rename = "genuine")]
    Genuine,
    #[serde(rename = "spoofed")]
    Spoofed,
}

impl Verdict {
    pub fn classify(quality: f32, probability: f32) -> Self {
        if quality < QUALITY_THRESHOLD {
            Self::BadQuality
        } else if probability >= LIVENESS_THRESHOLD {
            Self::Genuine
        } else {
            Self::Spoofed
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BadQuality => "bad quality",
            Self::Genuine    => "genuine",
            Self::Spoofed    => "spoofed",
        })
    }
}

/// Response body for a processed image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivenessReport {
    pub score:       f32,
    pub probability: f32,
    pub quality:     f32,
    #[serde(rename = "liveness result")]
    pub verdict:     Verdict,
    /// "OK", or the engine's error message verbatim.
    pub state:       String,
}

impl LivenessReport {
    /// Build the report from the last engine outcome. A failed invocation
    /// reports zeroed scores and its message as `state`.
    pub fn from_outcome(outcome: &Result<PipelineResult, EngineError>) -> Self {
        let (result, state) = match outcome {
            Ok(result) => (*result, STATE_OK.to_string()),
            Err(e)     => (PipelineResult::default(), e.message().to_string()),
        };
        Self {
            score:       result.liveness.score,
            probability: result.liveness.probability,
            quality:     result.quality.score,
            verdict:     Verdict::classify(result.quality.score, result.liveness.probability),
            state,
        }
    }

    pub fn is_ok(&self) -> bool { self.state == STATE_OK }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineStatus, LivenessResult, QualityResult};

    fn result(quality: f32, probability: f32) -> PipelineResult {
        PipelineResult {
            quality:  QualityResult { score: quality, ok: true },
            liveness: LivenessResult { score: 1.25, probability, ok: true },
        }
    }

    #[test]
    fn quality_gate_takes_precedence() {
        assert_eq!(Verdict::classify(0.4, 0.9), Verdict::BadQuality);
    }

    #[test]
    fn liveness_threshold_is_inclusive() {
        assert_eq!(Verdict::classify(0.9, 0.6), Verdict::Genuine);
        assert_eq!(Verdict::classify(0.9, 0.5), Verdict::Genuine);
        assert_eq!(Verdict::classify(0.9, 0.2), Verdict::Spoofed);
        assert_eq!(Verdict::classify(0.5, 0.49), Verdict::Spoofed);
    }

    #[test]
    fn report_serializes_with_wire_names() {
        let report = LivenessReport::from_outcome(&Ok(result(0.9, 0.6)));
        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["liveness result"], "genuine");
        assert_eq!(json["state"], "OK");
        assert_eq!(json["quality"].as_f64().unwrap() as f32, 0.9);
        assert_eq!(json["score"].as_f64().unwrap() as f32, 1.25);
    }

    #[test]
    fn engine_error_surfaces_verbatim_with_zero_scores() {
        let err = EngineError::from_status(EngineStatus::FaceNotFound, "Face detector can't find face");
        let report = LivenessReport::from_outcome(&Err(err));
        assert_eq!(report.state, "Face detector can't find face");
        assert_eq!(report.quality, 0.0);
        assert_eq!(report.verdict, Verdict::BadQuality);
        assert!(!report.is_ok());
    }
}
