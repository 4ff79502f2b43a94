use thiserror::Error;

use crate::calibration::SegmentKind;

/// Odometry and calibration error types
#[derive(Error, Debug)]
pub enum OdometryError {
    #[error("Recording contains no samples")]
    EmptyRecording,

    #[error("No turn detected in recording, the maneuver must be redone")]
    NoTurnDetected,

    #[error("Turn window {start}..={end} leaves no trajectory on one side ({len} samples)")]
    DegenerateTurnWindow { start: usize, end: usize, len: usize },

    #[error("Physically invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Non-finite value in {0}")]
    NonFiniteTrace(&'static str),

    #[error("Expected {expected} parameters, got {got}")]
    ParameterCount { expected: usize, got: usize },

    #[error("Calibration sequence has no {0} segments")]
    MissingSegments(SegmentKind),

    #[error("Calibration already running")]
    AlreadyRunning,

    #[error("Calibration not running")]
    NotRunning,

    #[error("Invalid recorder state: {0}")]
    InvalidState(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for odometry operations
pub type Result<T> = std::result::Result<T, OdometryError>;

impl OdometryError {
    /// True when the operator has to repeat the maneuver rather than the caller
    /// retrying with different settings.
    pub fn requires_new_recording(&self) -> bool {
        matches!(
            self,
            OdometryError::EmptyRecording
                | OdometryError::NoTurnDetected
                | OdometryError::DegenerateTurnWindow { .. }
                | OdometryError::MissingSegments(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(OdometryError::NoTurnDetected.requires_new_recording());
        assert!(OdometryError::MissingSegments(SegmentKind::Forward).requires_new_recording());
        assert!(!OdometryError::InvalidParameters("diameter".into()).requires_new_recording());
        assert!(!OdometryError::NotRunning.requires_new_recording());
    }

    #[test]
    fn test_messages() {
        let err = OdometryError::DegenerateTurnWindow { start: 0, end: 10, len: 11 };
        assert!(err.to_string().contains("0..=10"));
        let err = OdometryError::MissingSegments(SegmentKind::TurnLeft);
        assert_eq!(err.to_string(), "Calibration sequence has no turnleft segments");
    }
}
