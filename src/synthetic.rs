//! Synthetic wheel-rate recordings from known parameters
//!
//! Each maneuver is a run of constant body rates closed by a zero sample, so
//! under the integrator's trapezoidal rule a maneuver contributes exactly
//! the requested distance or angle. Raw rates are produced by inverting the
//! parameter vector's correction, so correcting them with the same
//! parameters gives back the true rates.

use crate::types::{ParameterVector, RateSeries, SensorSample};

pub struct ManeuverBuilder {
    params: ParameterVector,
    dt: f64,
    step: usize,
    series: RateSeries,
}

impl ManeuverBuilder {
    /// Start at t = 0 with one stationary sample
    pub fn new(params: ParameterVector, dt: f64) -> Self {
        let mut builder = Self {
            params,
            dt,
            step: 0,
            series: RateSeries::default(),
        };
        builder.push_body(0.0, 0.0);
        builder
    }

    /// Raw rates whose correction gives the true wheel rates
    pub fn raw_rates(&self, true_left: f64, true_right: f64) -> (f64, f64) {
        let p = &self.params;
        let h = p.diameter / 2.0;
        let (al, ar) = p.bias.map(|b| (b.left, b.right)).unwrap_or((0.0, 0.0));
        let e = true_left - p.offset_left;
        let f = true_right - p.offset_right;

        let a = p.gain_left + al * h;
        let d = p.gain_right + ar * h;
        let det = a * d - al * ar * h * h;
        ((d * e + al * h * f) / det, (a * f + ar * h * e) / det)
    }

    /// Forward speed `v` and turn rate `omega` (rad/s) as one raw sample
    fn push_body(&mut self, v: f64, omega: f64) {
        let half_track = self.params.track_width / 2.0;
        let half_d = self.params.diameter / 2.0;
        let true_left = (v - omega * half_track) / half_d;
        let true_right = (v + omega * half_track) / half_d;
        let (left, right) = self.raw_rates(true_left, true_right);
        self.series
            .push(SensorSample::new(self.step as f64 * self.dt, left, right));
    }

    /// `steps` time steps at constant body rates, the last landing on zero
    fn constant(mut self, steps: usize, v: f64, omega: f64) -> Self {
        for _ in 1..steps {
            self.step += 1;
            self.push_body(v, omega);
        }
        self.step += 1;
        self.push_body(0.0, 0.0);
        self
    }

    fn steps_for(&self, duration: f64) -> usize {
        ((duration / self.dt).round() as usize).max(2)
    }

    /// Stand still for `duration` seconds
    pub fn pause(mut self, duration: f64) -> Self {
        let steps = (duration / self.dt).round() as usize;
        for _ in 0..steps {
            self.step += 1;
            self.push_body(0.0, 0.0);
        }
        self
    }

    /// Drive `distance` along the current heading at about `speed`.
    /// A negative distance reverses.
    pub fn straight(self, distance: f64, speed: f64) -> Self {
        let steps = self.steps_for(distance.abs() / speed.abs());
        let v = distance / ((steps - 1) as f64 * self.dt);
        self.constant(steps, v, 0.0)
    }

    /// Turn in place by `angle_deg` (positive = left) over `duration` seconds
    pub fn spin(self, angle_deg: f64, duration: f64) -> Self {
        let steps = self.steps_for(duration);
        let omega = angle_deg.to_radians() / ((steps - 1) as f64 * self.dt);
        self.constant(steps, 0.0, omega)
    }

    /// Drive a circular arc of `radius` through `angle_deg` (positive = left)
    pub fn arc(self, radius: f64, angle_deg: f64, speed: f64) -> Self {
        let length = (radius * angle_deg.to_radians()).abs();
        let steps = self.steps_for(length / speed.abs());
        let span = (steps - 1) as f64 * self.dt;
        self.constant(steps, length / span, angle_deg.to_radians() / span)
    }

    pub fn duration(&self) -> f64 {
        self.step as f64 * self.dt
    }

    pub fn build(self) -> RateSeries {
        self.series
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WheelBias;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn test_straight_is_exact() {
        let params = ParameterVector::new(0.6, 0.55, 1.3, 0.8).with_offsets(0.05, -0.02);
        let series = ManeuverBuilder::new(params, 0.01).straight(7.5, 1.2).build();
        let trace = params.trace(&series).trace;

        assert_relative_eq!(trace.final_distance(), 7.5, epsilon = 1e-9);
        assert_abs_diff_eq!(trace.final_heading_deg(), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(trace.velocity[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(*trace.velocity.last().unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_spin_is_exact() {
        let params = ParameterVector::new(1.0, 22.0, 1.1, 0.9);
        let series = ManeuverBuilder::new(params, 0.01).spin(-180.0, 3.0).build();
        let trace = params.trace(&series).trace;
        assert_relative_eq!(trace.final_heading_deg(), -180.0, epsilon = 1e-9);
        assert_abs_diff_eq!(trace.final_distance(), 0.0, epsilon = 1e-9);
        assert_eq!(series.len(), 301);
    }

    #[test]
    fn test_arc_closes_circle() {
        let params = ParameterVector::nominal(0.6, 0.55);
        let series = ManeuverBuilder::new(params, 0.005).arc(2.0, 360.0, 0.5).build();
        let trace = params.trace(&series).trace;
        assert_relative_eq!(trace.final_heading_deg(), 360.0, epsilon = 1e-9);
        assert!(trace.closure_error() < 1e-3, "{}", trace.closure_error());
        let top = trace.trajectory.iter().map(|p| p[1]).fold(f64::MIN, f64::max);
        assert_relative_eq!(top, 4.0, epsilon = 1e-3);
    }

    #[test]
    fn test_bias_inverts() {
        let params = ParameterVector::new(1.0, 20.0, 1.2, 0.8).with_bias(WheelBias {
            left: 0.05,
            right: -0.03,
        });
        let builder = ManeuverBuilder::new(params, 0.01);
        let (left, right) = builder.raw_rates(3.0, -1.0);
        let corrected = params.correct(&RateSeries::new(vec![0.0], vec![left], vec![right]));
        assert_relative_eq!(corrected.left[0], 3.0, epsilon = 1e-12);
        assert_relative_eq!(corrected.right[0], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pause_reads_zero_rate() {
        let params = ParameterVector::new(1.0, 20.0, 2.0, 0.5).with_offsets(0.1, -0.2);
        let builder = ManeuverBuilder::new(params, 0.1).pause(1.0);
        assert_relative_eq!(builder.duration(), 1.0, epsilon = 1e-9);
        let series = builder.build();
        assert_eq!(series.len(), 11);
        assert!(series.left.iter().all(|r| (r + 0.05).abs() < 1e-12));
        assert!(series.right.iter().all(|r| (r - 0.4).abs() < 1e-12));
    }
}
