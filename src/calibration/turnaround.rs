//! Turnaround self-calibration
//!
//! One out-and-back recording with a single 180° turn. With the right
//! parameters the return leg retraces the outbound leg, both legs are
//! straight, and the signed path length matches the known round trip.
//! Diameter is held at a nominal value since only relative scale matters.
//!
//! The bias variant adds per-wheel speed-difference terms and a closed-loop
//! recording whose end point must return to the origin after a known total
//! turn.

use std::cell::OnceCell;

use serde::{Deserialize, Serialize};

use super::{Calibration, CalibrationMethod};
use crate::error::{OdometryError, Result};
use crate::matching::{segment_rms, symmetric_rms};
use crate::solver::{solve, ResidualModel, SolverConfig};
use crate::turn_detect::{TurnDetector, TurnWindow};
use crate::types::{
    KinematicTrace, ParamVec, ParameterVector, RateSeries, ResidualVec, WheelBias,
    TURNAROUND_BIAS_UNKNOWNS, TURNAROUND_UNKNOWNS,
};

/// Known geometry of the turnaround and loop courses
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnaroundTargets {
    /// Outbound plus return leg
    pub round_trip_distance: f64,
    /// Diameter held fixed while gains absorb scale
    pub nominal_diameter: f64,
    /// Total heading change over the loop recording, degrees
    pub loop_heading_deg: f64,
}

impl Default for TurnaroundTargets {
    fn default() -> Self {
        Self {
            round_trip_distance: 10.0,
            nominal_diameter: 1.0,
            loop_heading_deg: 360.0,
        }
    }
}

/// Turn window detected once per recording and reused by every residual
/// evaluation against it.
#[derive(Debug, Default)]
pub struct TurnWindowCache {
    cell: OnceCell<Option<TurnWindow>>,
}

impl TurnWindowCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache that never detects and always yields `window`
    pub fn with_window(window: TurnWindow) -> Self {
        Self {
            cell: OnceCell::from(Some(window)),
        }
    }

    /// `None` until the first detection ran
    pub fn get(&self) -> Option<Option<TurnWindow>> {
        self.cell.get().copied()
    }

    pub fn get_or_detect(&self, detect: impl FnOnce() -> Option<TurnWindow>) -> Option<TurnWindow> {
        *self.cell.get_or_init(detect)
    }
}

/// The three turnaround residuals, named
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnaroundResiduals {
    /// Return leg against outbound leg, both directions averaged
    pub symmetry: f64,
    /// Reference round trip minus final displacement
    pub net_distance: f64,
    /// Each leg against the straight line to its far end, averaged
    pub straightness: f64,
}

impl TurnaroundResiduals {
    /// Score a trace split around `window`.
    pub fn evaluate(
        trace: &KinematicTrace,
        window: TurnWindow,
        round_trip_distance: f64,
    ) -> Result<Self> {
        let len = trace.trajectory.len();
        if window.is_empty() || window.start_index == 0 || window.end_index >= len {
            return Err(OdometryError::DegenerateTurnWindow {
                start: window.start_index,
                end: window.end_index,
                len,
            });
        }

        let first_half = &trace.trajectory[..window.start_index];
        let second_half = &trace.trajectory[window.end_index..];
        let origin = [0.0, 0.0];
        let outbound_end = first_half[first_half.len() - 1];
        let return_start = second_half[0];

        Ok(Self {
            symmetry: symmetric_rms(first_half, second_half),
            net_distance: round_trip_distance - trace.final_displacement(),
            straightness: 0.5
                * (segment_rms(first_half, origin, outbound_end)
                    + segment_rms(second_half, return_start, origin)),
        })
    }

    pub fn to_vec(self) -> Vec<f64> {
        vec![self.symmetry, self.net_distance, self.straightness]
    }
}

fn detect_window(
    cache: &TurnWindowCache,
    detector: &TurnDetector,
    trace: &KinematicTrace,
) -> Result<TurnWindow> {
    cache
        .get_or_detect(|| detector.detect(&trace.heading_deg))
        .ok_or(OdometryError::NoTurnDetected)
}

/// Residual model over `(ml, mr, W)`
pub struct TurnaroundModel<'a> {
    recording: &'a RateSeries,
    targets: TurnaroundTargets,
    detector: TurnDetector,
    cache: TurnWindowCache,
}

impl<'a> TurnaroundModel<'a> {
    pub fn new(recording: &'a RateSeries, targets: TurnaroundTargets, detector: TurnDetector) -> Self {
        Self {
            recording,
            targets,
            detector,
            cache: TurnWindowCache::new(),
        }
    }

    /// Use a known window instead of detecting one
    pub fn with_cache(mut self, cache: TurnWindowCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn turn_window(&self) -> Option<TurnWindow> {
        self.cache.get().flatten()
    }

    pub fn parameters(&self, p: &[f64]) -> Result<ParameterVector> {
        if p.len() != TURNAROUND_UNKNOWNS {
            return Err(OdometryError::ParameterCount {
                expected: TURNAROUND_UNKNOWNS,
                got: p.len(),
            });
        }
        Ok(ParameterVector::new(self.targets.nominal_diameter, p[2], p[0], p[1]))
    }

    /// Named residuals at `p`
    pub fn evaluate(&self, p: &[f64]) -> Result<TurnaroundResiduals> {
        if self.recording.is_empty() {
            return Err(OdometryError::EmptyRecording);
        }
        let params = self.parameters(p)?;
        let trace = params.trace(self.recording).trace;
        let window = detect_window(&self.cache, &self.detector, &trace)?;
        TurnaroundResiduals::evaluate(&trace, window, self.targets.round_trip_distance)
    }
}

impl ResidualModel for TurnaroundModel<'_> {
    fn dimension(&self) -> usize {
        TURNAROUND_UNKNOWNS
    }

    fn residuals(&self, p: &ParamVec) -> Result<ResidualVec> {
        Ok(ResidualVec::from_vec(self.evaluate(p.as_slice())?.to_vec()))
    }
}

/// Residual model over `(ml, mr, al, ar, W)` using a turnaround and a loop
pub struct TurnaroundBiasModel<'a> {
    turnaround: &'a RateSeries,
    loop_recording: &'a RateSeries,
    targets: TurnaroundTargets,
    detector: TurnDetector,
    cache: TurnWindowCache,
}

impl<'a> TurnaroundBiasModel<'a> {
    pub fn new(
        turnaround: &'a RateSeries,
        loop_recording: &'a RateSeries,
        targets: TurnaroundTargets,
        detector: TurnDetector,
    ) -> Self {
        Self {
            turnaround,
            loop_recording,
            targets,
            detector,
            cache: TurnWindowCache::new(),
        }
    }

    pub fn with_cache(mut self, cache: TurnWindowCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn turn_window(&self) -> Option<TurnWindow> {
        self.cache.get().flatten()
    }

    pub fn parameters(&self, p: &[f64]) -> Result<ParameterVector> {
        if p.len() != TURNAROUND_BIAS_UNKNOWNS {
            return Err(OdometryError::ParameterCount {
                expected: TURNAROUND_BIAS_UNKNOWNS,
                got: p.len(),
            });
        }
        Ok(
            ParameterVector::new(self.targets.nominal_diameter, p[4], p[0], p[1]).with_bias(
                WheelBias {
                    left: p[2],
                    right: p[3],
                },
            ),
        )
    }
}

impl ResidualModel for TurnaroundBiasModel<'_> {
    fn dimension(&self) -> usize {
        TURNAROUND_BIAS_UNKNOWNS
    }

    fn residuals(&self, p: &ParamVec) -> Result<ResidualVec> {
        if self.turnaround.is_empty() || self.loop_recording.is_empty() {
            return Err(OdometryError::EmptyRecording);
        }
        let params = self.parameters(p.as_slice())?;

        let trace = params.trace(self.turnaround).trace;
        let window = detect_window(&self.cache, &self.detector, &trace)?;
        let turnaround =
            TurnaroundResiduals::evaluate(&trace, window, self.targets.round_trip_distance)?;

        let loop_trace = params.trace(self.loop_recording).trace;
        let closure = loop_trace.closure_error();
        let heading = self.targets.loop_heading_deg - loop_trace.final_heading_deg();

        Ok(ResidualVec::from_vec(vec![
            turnaround.symmetry,
            turnaround.net_distance,
            turnaround.straightness,
            closure,
            heading,
        ]))
    }
}

/// Solve `(ml, mr, W)` from one turnaround recording.
///
/// `initial` is `[ml, mr, W]`. The turn window is detected at the initial
/// guess and kept for the whole solve.
pub fn calibrate_turnaround(
    recording: &RateSeries,
    targets: TurnaroundTargets,
    detector: TurnDetector,
    initial: [f64; TURNAROUND_UNKNOWNS],
    config: &SolverConfig,
) -> Result<Calibration> {
    let model = TurnaroundModel::new(recording, targets, detector);
    let report = solve(&model, &initial, config)?;
    let parameters = model.parameters(&report.parameters)?;

    log::info!(
        "turnaround calibration: ml {:.4}, mr {:.4}, W {:.4} (converged: {})",
        parameters.gain_left,
        parameters.gain_right,
        parameters.track_width,
        report.converged
    );

    Ok(Calibration {
        method: CalibrationMethod::Turnaround,
        parameters,
        report,
        turn_window: model.turn_window(),
    })
}

/// Solve `(ml, mr, al, ar, W)` from a turnaround and a closed loop.
///
/// `initial` is `[ml, mr, al, ar, W]`.
pub fn calibrate_turnaround_bias(
    turnaround: &RateSeries,
    loop_recording: &RateSeries,
    targets: TurnaroundTargets,
    detector: TurnDetector,
    initial: [f64; TURNAROUND_BIAS_UNKNOWNS],
    config: &SolverConfig,
) -> Result<Calibration> {
    let model = TurnaroundBiasModel::new(turnaround, loop_recording, targets, detector);
    let report = solve(&model, &initial, config)?;
    let parameters = model.parameters(&report.parameters)?;

    log::info!(
        "turnaround bias calibration: ml {:.4}, mr {:.4}, al {:.5}, ar {:.5}, W {:.4} (converged: {})",
        parameters.gain_left,
        parameters.gain_right,
        report.parameters[2],
        report.parameters[3],
        parameters.track_width,
        report.converged
    );

    Ok(Calibration {
        method: CalibrationMethod::TurnaroundBias,
        parameters,
        report,
        turn_window: model.turn_window(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::ManeuverBuilder;
    use approx::assert_abs_diff_eq;
    use std::cell::Cell;

    fn truth() -> ParameterVector {
        ParameterVector::new(1.0, 22.0, 1.1, 0.9)
    }

    fn out_and_back(params: ParameterVector) -> RateSeries {
        ManeuverBuilder::new(params, 0.01)
            .straight(5.0, 0.5)
            .pause(1.0)
            .spin(180.0, 3.0)
            .pause(1.0)
            .straight(5.0, 0.5)
            .build()
    }

    #[test]
    fn test_cache_detects_once() {
        let cache = TurnWindowCache::new();
        assert_eq!(cache.get(), None);
        let calls = Cell::new(0);
        let window = TurnWindow {
            start_index: 3,
            end_index: 9,
        };
        for _ in 0..3 {
            let got = cache.get_or_detect(|| {
                calls.set(calls.get() + 1);
                Some(window)
            });
            assert_eq!(got, Some(window));
        }
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.get(), Some(Some(window)));
    }

    #[test]
    fn test_residuals_vanish_at_truth() {
        let recording = out_and_back(truth());
        let model = TurnaroundModel::new(&recording, TurnaroundTargets::default(), TurnDetector::default());
        let r = model.evaluate(&[1.1, 0.9, 22.0]).unwrap();
        assert_abs_diff_eq!(r.symmetry, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(r.net_distance, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(r.straightness, 0.0, epsilon = 1e-9);
        assert!(model.turn_window().is_some());
    }

    #[test]
    fn test_wrong_track_width_breaks_symmetry() {
        let recording = out_and_back(truth());
        let model = TurnaroundModel::new(&recording, TurnaroundTargets::default(), TurnDetector::default());
        let r = model.evaluate(&[1.1, 0.9, 20.0]).unwrap();
        assert!(r.symmetry > 0.1, "{:?}", r);
        assert_abs_diff_eq!(r.net_distance, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_no_turn_is_reported() {
        let straight = ManeuverBuilder::new(truth(), 0.01).straight(5.0, 0.5).build();
        let err = calibrate_turnaround(
            &straight,
            TurnaroundTargets::default(),
            TurnDetector::default(),
            [1.0, 1.0, 20.0],
            &SolverConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, OdometryError::NoTurnDetected));
        assert!(err.requires_new_recording());
    }

    #[test]
    fn test_degenerate_window() {
        let recording = out_and_back(truth());
        let len = recording.len();
        let cache = TurnWindowCache::with_window(TurnWindow {
            start_index: 0,
            end_index: 40,
        });
        let model = TurnaroundModel::new(&recording, TurnaroundTargets::default(), TurnDetector::default())
            .with_cache(cache);
        assert!(matches!(
            model.evaluate(&[1.0, 1.0, 20.0]),
            Err(OdometryError::DegenerateTurnWindow { start: 0, .. })
        ));

        let cache = TurnWindowCache::with_window(TurnWindow {
            start_index: 10,
            end_index: len,
        });
        let model = TurnaroundModel::new(&recording, TurnaroundTargets::default(), TurnDetector::default())
            .with_cache(cache);
        assert!(model.evaluate(&[1.0, 1.0, 20.0]).is_err());

        let cache = TurnWindowCache::with_window(TurnWindow {
            start_index: 500,
            end_index: 200,
        });
        let model = TurnaroundModel::new(&recording, TurnaroundTargets::default(), TurnDetector::default())
            .with_cache(cache);
        assert!(matches!(
            model.evaluate(&[1.0, 1.0, 20.0]),
            Err(OdometryError::DegenerateTurnWindow { start: 500, end: 200, .. })
        ));
    }

    #[test]
    fn test_slow_turn_found() {
        // 180 degrees over 6 s at 100 Hz, 0.3 deg per sample
        let recording = ManeuverBuilder::new(truth(), 0.01)
            .straight(5.0, 1.0)
            .pause(1.0)
            .spin(180.0, 6.0)
            .pause(1.0)
            .straight(5.0, 1.0)
            .build();
        let model = TurnaroundModel::new(&recording, TurnaroundTargets::default(), TurnDetector::default());
        let r = model.evaluate(&[1.1, 0.9, 22.0]).unwrap();
        assert_abs_diff_eq!(r.symmetry, 0.0, epsilon = 1e-9);
        let window = model.turn_window().unwrap();
        assert!(window.start_index > 500 && window.end_index < recording.len() - 500);
    }

    #[test]
    fn test_empty_recording() {
        let empty = RateSeries::default();
        let model = TurnaroundModel::new(&empty, TurnaroundTargets::default(), TurnDetector::default());
        assert!(matches!(
            model.evaluate(&[1.0, 1.0, 20.0]),
            Err(OdometryError::EmptyRecording)
        ));
    }

    #[test]
    fn test_bias_parameter_layout() {
        let a = RateSeries::default();
        let model = TurnaroundBiasModel::new(&a, &a, TurnaroundTargets::default(), TurnDetector::default());
        let params = model.parameters(&[1.1, 0.9, 0.01, -0.02, 21.0]).unwrap();
        assert_eq!(params.gain_left, 1.1);
        assert_eq!(params.track_width, 21.0);
        assert_eq!(params.diameter, 1.0);
        assert_eq!(
            params.bias,
            Some(WheelBias {
                left: 0.01,
                right: -0.02
            })
        );
        assert!(model.parameters(&[1.0, 1.0, 20.0]).is_err());
    }
}
