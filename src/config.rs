//! Runtime configuration for the `odometry` tool
//!
//! Every section has working defaults; a JSON file only needs the keys it
//! changes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibration::{SequenceTargets, TurnaroundTargets};
use crate::error::Result;
use crate::records::load_json;
use crate::solver::SolverConfig;
use crate::turn_detect::TurnDetector;
use crate::types::{SEQUENCE_UNKNOWNS, TURNAROUND_BIAS_UNKNOWNS, TURNAROUND_UNKNOWNS};

/// Starting points for each solver
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialGuesses {
    /// `[D, W, ml, mr]`
    pub sequence: [f64; SEQUENCE_UNKNOWNS],
    /// `[ml, mr, W]`
    pub turnaround: [f64; TURNAROUND_UNKNOWNS],
    /// `[ml, mr, al, ar, W]`
    pub turnaround_bias: [f64; TURNAROUND_BIAS_UNKNOWNS],
}

impl Default for InitialGuesses {
    fn default() -> Self {
        Self {
            sequence: [20.0, 20.0, 1.0, 1.0],
            turnaround: [20.0, 20.0, 20.0],
            turnaround_bias: [20.0, 20.0, 0.0, 0.0, 20.0],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OdometryConfig {
    pub sequence: SequenceTargets,
    pub turnaround: TurnaroundTargets,
    pub detector: TurnDetector,
    pub solver: SolverConfig,
    /// Low-pass cutoff for the smoothed channels; `None` integrates raw rates
    pub smoothing_cutoff_hz: Option<f64>,
    pub initial: InitialGuesses,
}

impl Default for OdometryConfig {
    fn default() -> Self {
        Self {
            sequence: SequenceTargets::default(),
            turnaround: TurnaroundTargets::default(),
            detector: TurnDetector::default(),
            solver: SolverConfig::default(),
            smoothing_cutoff_hz: Some(6.0),
            initial: InitialGuesses::default(),
        }
    }
}

impl OdometryConfig {
    /// Load from a JSON (or `.json.gz`) file
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = load_json(path)?;
        log::debug!("loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    /// Load `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let json = r#"{
            "turnaround": { "round_trip_distance": 8.0 },
            "detector": { "min_run_length": 30 },
            "smoothing_cutoff_hz": null
        }"#;
        let config: OdometryConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.turnaround.round_trip_distance, 8.0);
        assert_eq!(config.turnaround.loop_heading_deg, 360.0);
        assert_eq!(config.detector.min_run_length, 30);
        assert_eq!(config.detector.rate_threshold, 0.1);
        assert_eq!(config.smoothing_cutoff_hz, None);
        assert_eq!(config.sequence, SequenceTargets::default());
        assert_eq!(config.initial.turnaround, [20.0, 20.0, 20.0]);
    }

    #[test]
    fn test_empty_document_is_default() {
        let config: OdometryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, OdometryConfig::default());
        assert_eq!(config.smoothing_cutoff_hz, Some(6.0));
    }

    #[test]
    fn test_missing_file() {
        let path = Path::new("/nonexistent/odometry.json");
        assert!(OdometryConfig::load(path).is_err());
        assert!(OdometryConfig::load_or_default(None).is_ok());
    }
}
