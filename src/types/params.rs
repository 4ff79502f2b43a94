use serde::{Deserialize, Serialize};

use crate::error::{OdometryError, Result};
use crate::integrator::{integrate, Integration};
use crate::types::RateSeries;

/// Per-wheel correction proportional to the raw left/right speed difference.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WheelBias {
    pub left: f64,
    pub right: f64,
}

/// Physical constants consumed by the Integrator.
///
/// `diameter` and `track_width` share one length unit. Gains absorb any fixed
/// unit conversion of the raw rate channel, so no physical unit is assumed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterVector {
    #[serde(default = "nominal_diameter")]
    pub diameter: f64,
    #[serde(alias = "wheel_dist")]
    pub track_width: f64,
    #[serde(alias = "left_gain")]
    pub gain_left: f64,
    #[serde(alias = "right_gain")]
    pub gain_right: f64,
    #[serde(default, alias = "left_offset")]
    pub offset_left: f64,
    #[serde(default, alias = "right_offset")]
    pub offset_right: f64,
    /// Present only for parameters fitted with the bias model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bias: Option<WheelBias>,
}

fn nominal_diameter() -> f64 {
    1.0
}

impl ParameterVector {
    pub fn new(diameter: f64, track_width: f64, gain_left: f64, gain_right: f64) -> Self {
        Self {
            diameter,
            track_width,
            gain_left,
            gain_right,
            offset_left: 0.0,
            offset_right: 0.0,
            bias: None,
        }
    }

    /// Unit gains, no offsets, no bias
    pub fn nominal(diameter: f64, track_width: f64) -> Self {
        Self::new(diameter, track_width, 1.0, 1.0)
    }

    pub fn with_offsets(mut self, offset_left: f64, offset_right: f64) -> Self {
        self.offset_left = offset_left;
        self.offset_right = offset_right;
        self
    }

    pub fn with_bias(mut self, bias: WheelBias) -> Self {
        self.bias = Some(bias);
        self
    }

    /// Corrected rate of one wheel.
    ///
    /// `raw_speed_delta` is this wheel's raw surface speed minus the other
    /// wheel's, both from uncorrected rates.
    fn correct_one(&self, raw: f64, gain: f64, offset: f64, bias: f64, raw_speed_delta: f64) -> f64 {
        gain * raw + offset + bias * raw_speed_delta
    }

    /// Apply gains, offsets and (when present) the bias correction.
    pub fn correct(&self, series: &RateSeries) -> RateSeries {
        let half_d = self.diameter / 2.0;
        let bias = self.bias.unwrap_or(WheelBias { left: 0.0, right: 0.0 });
        series.map_rates(|left, right| {
            let left_speed = left * half_d;
            let right_speed = right * half_d;
            (
                self.correct_one(
                    left,
                    self.gain_left,
                    self.offset_left,
                    bias.left,
                    left_speed - right_speed,
                ),
                self.correct_one(
                    right,
                    self.gain_right,
                    self.offset_right,
                    bias.right,
                    right_speed - left_speed,
                ),
            )
        })
    }

    /// Correct the raw rates and run the Integrator over them.
    pub fn trace(&self, series: &RateSeries) -> Integration {
        let corrected = self.correct(series);
        integrate(
            &corrected.time,
            &corrected.left,
            &corrected.right,
            self.diameter,
            self.track_width,
        )
    }

    /// Reject values that cannot describe a real vehicle.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("diameter", self.diameter),
            ("track_width", self.track_width),
            ("gain_left", self.gain_left),
            ("gain_right", self.gain_right),
            ("offset_left", self.offset_left),
            ("offset_right", self.offset_right),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(OdometryError::InvalidParameters(format!(
                    "{} is not finite ({})",
                    name, value
                )));
            }
        }
        if let Some(bias) = self.bias {
            if !bias.left.is_finite() || !bias.right.is_finite() {
                return Err(OdometryError::InvalidParameters(
                    "bias is not finite".to_string(),
                ));
            }
        }
        if self.diameter <= 0.0 {
            return Err(OdometryError::InvalidParameters(format!(
                "diameter must be positive, got {}",
                self.diameter
            )));
        }
        if self.track_width <= 0.0 {
            return Err(OdometryError::InvalidParameters(format!(
                "track width must be positive, got {}",
                self.track_width
            )));
        }
        if self.gain_left == 0.0 || self.gain_right == 0.0 {
            return Err(OdometryError::InvalidParameters(
                "wheel gain of zero discards the sensor".to_string(),
            ));
        }
        Ok(())
    }
}
