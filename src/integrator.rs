//! Differential-drive dead reckoning
//!
//! Turns two wheel angular-rate channels into path length, heading, forward
//! speed and a planar trajectory. Pure function of its inputs: re-running over
//! a grown buffer recomputes everything from the first sample.
//!
//! Model (per sample):
//!   v_side = ω_side · D/2
//!   v      = (v_left + v_right) / 2
//!   ω_body = (v_right − v_left) / W
//!
//! Heading and arc length use the trapezoidal rule over the irregular time
//! axis; each step's arc length is laid down along the mid-step heading.

use crate::types::{InputWarning, KinematicTrace};

/// Trace plus the malformed-input warnings recovered while producing it.
#[derive(Clone, Debug, Default)]
pub struct Integration {
    pub trace: KinematicTrace,
    pub warnings: Vec<InputWarning>,
}

impl Integration {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[inline]
fn body_rates(omega_left: f64, omega_right: f64, half_diameter: f64, track_width: f64) -> (f64, f64) {
    let v_left = omega_left * half_diameter;
    let v_right = omega_right * half_diameter;
    (0.5 * (v_left + v_right), (v_right - v_left) / track_width)
}

/// Integrate wheel rates into a [`KinematicTrace`].
///
/// Empty input gives an empty trace. Channels of unequal length are
/// truncated to the shortest one and steps whose `dt` is not strictly
/// positive are skipped; both are reported in [`Integration::warnings`].
pub fn integrate(
    time: &[f64],
    omega_left: &[f64],
    omega_right: &[f64],
    diameter: f64,
    track_width: f64,
) -> Integration {
    let len = time.len().min(omega_left.len()).min(omega_right.len());
    let mut warnings = Vec::new();

    if time.len() != omega_left.len() || omega_left.len() != omega_right.len() {
        log::warn!(
            "channel lengths differ (time {}, left {}, right {}), truncating to {}",
            time.len(),
            omega_left.len(),
            omega_right.len(),
            len
        );
        warnings.push(InputWarning::ChannelLengthMismatch {
            time: time.len(),
            left: omega_left.len(),
            right: omega_right.len(),
            used: len,
        });
    }

    if len == 0 {
        return Integration {
            trace: KinematicTrace::default(),
            warnings,
        };
    }

    let half_d = diameter / 2.0;
    let mut trace = KinematicTrace::with_capacity(len);

    let (v0, _) = body_rates(omega_left[0], omega_right[0], half_d, track_width);
    trace.time.push(time[0]);
    trace.distance.push(0.0);
    trace.displacement.push(0.0);
    trace.heading_deg.push(0.0);
    trace.velocity.push(v0);
    trace.trajectory.push([0.0, 0.0]);

    let mut heading = 0.0_f64; // radians
    let mut distance = 0.0_f64;
    let mut displacement = 0.0_f64;
    let (mut x, mut y) = (0.0_f64, 0.0_f64);
    let mut skipped = 0usize;
    let mut first_skipped = None;

    for i in 1..len {
        let dt = time[i] - time[i - 1];
        let (v, w) = body_rates(omega_left[i], omega_right[i], half_d, track_width);

        // Also false for NaN
        if dt > 0.0 {
            let (v_prev, w_prev) =
                body_rates(omega_left[i - 1], omega_right[i - 1], half_d, track_width);
            let next_heading = heading + 0.5 * (w_prev + w) * dt;
            let ds = 0.5 * (v_prev + v) * dt;
            let mid = 0.5 * (heading + next_heading);

            x += ds * mid.cos();
            y += ds * mid.sin();
            distance += ds.abs();
            displacement += ds;
            heading = next_heading;
        } else {
            skipped += 1;
            first_skipped.get_or_insert(i);
        }

        trace.time.push(time[i]);
        trace.distance.push(distance);
        trace.displacement.push(displacement);
        trace.heading_deg.push(heading.to_degrees());
        trace.velocity.push(v);
        trace.trajectory.push([x, y]);
    }

    if let Some(first_index) = first_skipped {
        log::warn!(
            "skipped {} step(s) with non-increasing time, first at sample {}",
            skipped,
            first_index
        );
        warnings.push(InputWarning::NonIncreasingTime {
            skipped_steps: skipped,
            first_index,
        });
    }

    Integration { trace, warnings }
}
