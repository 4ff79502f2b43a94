//! Structured-sequence calibration
//!
//! Unknowns `(D, W, ml, mr)`, four residuals:
//!   r1 = w·(target distance − Σ forward distance, left rate on both wheels)
//!   r2 = w·(target distance − Σ forward distance, right rate on both wheels)
//!   r3 = target angle − (−Σ heading of right turns and their forward legs)
//!   r4 = target angle − Σ heading of left turns and their forward legs
//!
//! The residuals only see the products D·ml and D·mr, so the solved point is
//! rescaled afterwards to keep the initial guess's mean gain.

use serde::{Deserialize, Serialize};

use super::{Calibration, CalibrationMethod, CalibrationSegment, CalibrationSequence, SegmentKind};
use crate::error::{OdometryError, Result};
use crate::integrator::integrate;
use crate::solver::{solve, ResidualModel, SolverConfig};
use crate::types::{ParamVec, ParameterVector, RateSeries, ResidualVec, SEQUENCE_UNKNOWNS};

/// Ground truth of the calibration course
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceTargets {
    /// Sum of all forward legs
    pub forward_distance_total: f64,
    /// Accumulated turning per direction, degrees
    pub turn_angle_total_deg: f64,
    /// Scales the two distance residuals against the angle residuals
    pub distance_weight: f64,
    /// Treat the mean raw rate over pause steps as each wheel's zero reading
    pub zero_rate_from_pauses: bool,
}

impl Default for SequenceTargets {
    fn default() -> Self {
        Self {
            forward_distance_total: 40.0,
            turn_angle_total_deg: 360.0,
            distance_weight: 18.0,
            zero_rate_from_pauses: false,
        }
    }
}

/// Residual model over one recorded sequence
pub struct SequenceModel<'a> {
    forwards: Vec<&'a RateSeries>,
    right_group: Vec<&'a RateSeries>,
    left_group: Vec<&'a RateSeries>,
    targets: SequenceTargets,
    /// Raw zero reading per wheel
    zero_rate: (f64, f64),
}

impl<'a> SequenceModel<'a> {
    pub fn new(sequence: &'a CalibrationSequence, targets: SequenceTargets) -> Result<Self> {
        sequence.check_solvable()?;

        let zero_rate = if targets.zero_rate_from_pauses {
            let pauses = sequence.joined(SegmentKind::Pause);
            let z = pauses.mean_rates();
            log::info!(
                "zero-rate from {} pause samples: left {:.5}, right {:.5}",
                pauses.len(),
                z.0,
                z.1
            );
            z
        } else {
            (0.0, 0.0)
        };

        let series = |segments: Vec<&'a CalibrationSegment>| -> Vec<&'a RateSeries> {
            segments.into_iter().map(|s| &s.series).collect()
        };

        Ok(Self {
            forwards: sequence.of_kind(SegmentKind::Forward).map(|s| &s.series).collect(),
            right_group: series(sequence.turn_group(SegmentKind::TurnRight)),
            left_group: series(sequence.turn_group(SegmentKind::TurnLeft)),
            targets,
            zero_rate,
        })
    }

    pub fn zero_rate(&self) -> (f64, f64) {
        self.zero_rate
    }

    /// `(D, W, ml, mr)` as a ParameterVector, offsets cancelling the zero rate
    pub fn parameters(&self, p: &[f64]) -> Result<ParameterVector> {
        if p.len() != SEQUENCE_UNKNOWNS {
            return Err(OdometryError::ParameterCount {
                expected: SEQUENCE_UNKNOWNS,
                got: p.len(),
            });
        }
        let (diameter, track_width, gain_left, gain_right) = (p[0], p[1], p[2], p[3]);
        Ok(ParameterVector::new(diameter, track_width, gain_left, gain_right).with_offsets(
            -gain_left * self.zero_rate.0,
            -gain_right * self.zero_rate.1,
        ))
    }

    fn forward_distance(&self, params: &ParameterVector, use_left: bool) -> f64 {
        self.forwards
            .iter()
            .map(|series| {
                let corrected = params.correct(series);
                let rate = if use_left { &corrected.left } else { &corrected.right };
                integrate(&corrected.time, rate, rate, params.diameter, params.track_width)
                    .trace
                    .final_distance()
            })
            .sum()
    }

    fn heading_sum(params: &ParameterVector, group: &[&RateSeries]) -> f64 {
        group
            .iter()
            .map(|series| params.trace(series).trace.final_heading_deg())
            .sum()
    }
}

impl ResidualModel for SequenceModel<'_> {
    fn dimension(&self) -> usize {
        SEQUENCE_UNKNOWNS
    }

    fn residuals(&self, p: &ParamVec) -> Result<ResidualVec> {
        let params = self.parameters(p.as_slice())?;
        let t = &self.targets;

        let r1 = t.distance_weight * (t.forward_distance_total - self.forward_distance(&params, true));
        let r2 = t.distance_weight * (t.forward_distance_total - self.forward_distance(&params, false));
        let r3 = t.turn_angle_total_deg + Self::heading_sum(&params, &self.right_group);
        let r4 = t.turn_angle_total_deg - Self::heading_sum(&params, &self.left_group);

        Ok(ResidualVec::from_vec(vec![r1, r2, r3, r4]))
    }
}

/// Rescale `(D, ml, mr)` so the mean gain is `mean_gain`, keeping D·ml and D·mr.
fn normalize_gauge(p: &[f64], mean_gain: f64) -> Vec<f64> {
    let (diameter, track_width, gain_left, gain_right) = (p[0], p[1], p[2], p[3]);
    let product_left = diameter * gain_left;
    let product_right = diameter * gain_right;
    let scaled_diameter = (product_left + product_right) / (2.0 * mean_gain);
    if !scaled_diameter.is_finite() || scaled_diameter == 0.0 {
        return p.to_vec();
    }
    vec![
        scaled_diameter,
        track_width,
        product_left / scaled_diameter,
        product_right / scaled_diameter,
    ]
}

/// Solve `(D, W, ml, mr)` from a recorded sequence.
///
/// `initial` is `[D, W, ml, mr]`.
pub fn calibrate_sequence(
    sequence: &CalibrationSequence,
    targets: SequenceTargets,
    initial: [f64; SEQUENCE_UNKNOWNS],
    config: &SolverConfig,
) -> Result<Calibration> {
    let model = SequenceModel::new(sequence, targets)?;
    let mut report = solve(&model, &initial, config)?;

    let mean_gain = 0.5 * (initial[2] + initial[3]);
    report.parameters = normalize_gauge(&report.parameters, mean_gain);
    let parameters = model.parameters(&report.parameters)?;

    log::info!(
        "sequence calibration: D {:.4}, W {:.4}, ml {:.4}, mr {:.4} (converged: {})",
        parameters.diameter,
        parameters.track_width,
        parameters.gain_left,
        parameters.gain_right,
        report.converged
    );

    Ok(Calibration {
        method: CalibrationMethod::Sequence,
        parameters,
        report,
        turn_window: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::ManeuverBuilder;
    use approx::assert_relative_eq;

    fn segment(kind: SegmentKind, label: &str, series: RateSeries) -> CalibrationSegment {
        CalibrationSegment::with_series(kind, label, series)
    }

    fn course(truth: ParameterVector) -> CalibrationSequence {
        let leg = |distance: f64| ManeuverBuilder::new(truth, 0.02).straight(distance, 1.0).build();
        let spin = |deg: f64| ManeuverBuilder::new(truth, 0.02).spin(deg, 2.0).build();
        CalibrationSequence::new(vec![
            segment(SegmentKind::Forward, "forward1", leg(10.0)),
            segment(SegmentKind::TurnLeft, "turnleft1", spin(180.0)),
            segment(SegmentKind::Forward, "forward2", leg(10.0)),
            segment(SegmentKind::TurnRight, "turnright1", spin(-180.0)),
        ])
    }

    fn targets() -> SequenceTargets {
        SequenceTargets {
            forward_distance_total: 20.0,
            turn_angle_total_deg: 180.0,
            ..SequenceTargets::default()
        }
    }

    #[test]
    fn test_residuals_vanish_at_truth() {
        let truth = ParameterVector::nominal(23.0, 20.0);
        let sequence = course(truth);
        let model = SequenceModel::new(&sequence, targets()).unwrap();
        let r = model
            .residuals(&ParamVec::from_vec(vec![23.0, 20.0, 1.0, 1.0]))
            .unwrap();
        for value in r.iter() {
            assert!(value.abs() < 1e-9, "{:?}", r);
        }
    }

    #[test]
    fn test_residuals_see_only_products() {
        let sequence = course(ParameterVector::nominal(23.0, 20.0));
        let model = SequenceModel::new(&sequence, targets()).unwrap();
        let a = model
            .residuals(&ParamVec::from_vec(vec![20.0, 19.0, 1.2, 0.9]))
            .unwrap();
        let b = model
            .residuals(&ParamVec::from_vec(vec![40.0, 19.0, 0.6, 0.45]))
            .unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(x, y, epsilon = 1e-9, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_gauge_normalization() {
        let p = normalize_gauge(&[46.0, 20.0, 0.5, 0.5], 1.0);
        assert_relative_eq!(p[0], 23.0);
        assert_relative_eq!(p[2], 1.0);
        assert_relative_eq!(p[3], 1.0);
        assert_eq!(p[1], 20.0);
    }

    #[test]
    fn test_empty_segment_contributes_nothing() {
        let truth = ParameterVector::nominal(23.0, 20.0);
        let mut sequence = course(truth);
        sequence.push(segment(SegmentKind::Forward, "forward3", RateSeries::default()));
        sequence.push(segment(SegmentKind::TurnRight, "turnright2", RateSeries::default()));

        let model = SequenceModel::new(&sequence, targets()).unwrap();
        let r = model
            .residuals(&ParamVec::from_vec(vec![23.0, 20.0, 1.0, 1.0]))
            .unwrap();
        assert!(r.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_zero_rate_from_pauses() {
        let mut sequence = course(ParameterVector::nominal(23.0, 20.0));
        sequence.push(segment(
            SegmentKind::Pause,
            "pause1",
            RateSeries::new(vec![0.0, 0.1, 0.2], vec![0.01; 3], vec![-0.02; 3]),
        ));
        let targets = SequenceTargets {
            zero_rate_from_pauses: true,
            ..targets()
        };
        let model = SequenceModel::new(&sequence, targets).unwrap();
        assert_relative_eq!(model.zero_rate().0, 0.01);
        assert_relative_eq!(model.zero_rate().1, -0.02);

        let params = model.parameters(&[23.0, 20.0, 2.0, 1.0]).unwrap();
        assert_relative_eq!(params.offset_left, -0.02);
        assert_relative_eq!(params.offset_right, 0.02);
    }

    #[test]
    fn test_recovers_known_parameters() {
        let truth = ParameterVector::nominal(23.0, 20.0);
        let sequence = course(truth);
        let calibration = calibrate_sequence(
            &sequence,
            targets(),
            [20.0, 18.0, 1.05, 0.95],
            &SolverConfig::default(),
        )
        .unwrap();

        assert!(calibration.report.converged, "{:?}", calibration.report);
        let p = calibration.parameters;
        assert_relative_eq!(p.diameter, 23.0, max_relative = 0.01);
        assert_relative_eq!(p.track_width, 20.0, max_relative = 0.01);
        assert_relative_eq!(p.gain_left, 1.0, max_relative = 0.01);
        assert_relative_eq!(p.gain_right, 1.0, max_relative = 0.01);
        assert!(calibration.accept(&[&sequence.segments()[0].series]).is_ok());
    }

    #[test]
    fn test_missing_turns_rejected() {
        let truth = ParameterVector::nominal(23.0, 20.0);
        let sequence = CalibrationSequence::new(vec![segment(
            SegmentKind::Forward,
            "forward1",
            ManeuverBuilder::new(truth, 0.02).straight(10.0, 1.0).build(),
        )]);
        let err = calibrate_sequence(&sequence, targets(), [20.0, 20.0, 1.0, 1.0], &SolverConfig::default())
            .unwrap_err();
        assert!(err.requires_new_recording());
    }
}
