/// Example: calibrate a simulated wheelchair from an out-and-back run
///
/// Usage:
///   cargo run --example synthetic_turnaround [output_dir]
///
/// This demonstrates:
/// - Building raw wheel rates from known parameters
/// - Solving gains and track width with the turnaround model
/// - Saving the calibration and a refreshed recording

use std::path::PathBuf;

use wheel_odometry::calibration::{calibrate_turnaround, TurnaroundTargets};
use wheel_odometry::records::{save_json, CalibrationRecord, RecordingRecord};
use wheel_odometry::synthetic::ManeuverBuilder;
use wheel_odometry::{ParameterVector, SolverConfig, TurnDetector};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Left wheel reads 10% high, right wheel 10% low
    let truth = ParameterVector::new(1.0, 22.0, 1.1, 0.9);
    let recording = ManeuverBuilder::new(truth, 0.01)
        .straight(5.0, 0.5)
        .pause(1.0)
        .spin(180.0, 3.0)
        .pause(1.0)
        .straight(5.0, 0.5)
        .build();
    log::info!("simulated {} samples", recording.len());

    let nominal = ParameterVector::nominal(1.0, 20.0);
    let before = nominal.trace(&recording).trace;
    log::info!(
        "uncalibrated: heading {:.1} deg, end point off by {:.3}",
        before.final_heading_deg(),
        before.closure_error()
    );

    let calibration = calibrate_turnaround(
        &recording,
        TurnaroundTargets::default(),
        TurnDetector::default(),
        [1.0, 1.0, 20.0],
        &SolverConfig::default(),
    )?;
    let after = calibration.parameters.trace(&recording).trace;
    log::info!(
        "calibrated: ml {:.4}, mr {:.4}, W {:.3}, heading {:.1} deg, end point off by {:.3}",
        calibration.parameters.gain_left,
        calibration.parameters.gain_right,
        calibration.parameters.track_width,
        after.final_heading_deg(),
        after.closure_error()
    );

    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&out_dir)?;

    let record = CalibrationRecord::new("simulated", "turnaround", &calibration, &[&recording])?;
    save_json(&out_dir.join("calibration.json"), &record)?;

    let mut stored = RecordingRecord::from_series(&recording);
    stored.refresh(&calibration.parameters, None);
    save_json(&out_dir.join("turnaround.json.gz"), &stored)?;
    log::info!("wrote calibration and recording to {}", out_dir.display());

    Ok(())
}
