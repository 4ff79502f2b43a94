//! Differential-drive wheel odometry and calibration for a manual wheelchair
//! with one rate sensor per rear wheel.
//!
//! [`integrator::integrate`] turns corrected wheel rates into distance,
//! heading and a 2-D trajectory. The [`calibration`] solvers fit the
//! [`ParameterVector`] that corrects raw rates, either from a structured
//! course of straight legs and in-place turns or from a single out-and-back
//! run.

pub mod calibration;
pub mod config;
pub mod error;
pub mod integrator;
pub mod matching;
pub mod records;
pub mod smoothing;
pub mod solver;
pub mod synthetic;
pub mod turn_detect;
pub mod types;

pub use calibration::{
    calibrate_sequence, calibrate_turnaround, calibrate_turnaround_bias, Calibration,
    CalibrationMethod, CalibrationRecorder, CalibrationSequence, SequenceTargets,
    TurnaroundTargets,
};
pub use config::OdometryConfig;
pub use error::{OdometryError, Result};
pub use integrator::{integrate, Integration};
pub use solver::{SolverConfig, SolverReport, Termination};
pub use turn_detect::{TurnDetector, TurnWindow};
pub use types::{InputWarning, KinematicTrace, ParameterVector, RateSeries, SensorSample, WheelBias};
