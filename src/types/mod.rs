pub mod linalg;
pub mod params;

pub use linalg::*;
pub use params::{ParameterVector, WheelBias};

use serde::{Deserialize, Serialize};

/// One paired reading from both wheel sensors.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Seconds since recording start
    pub t: f64,
    pub omega_left: f64,
    pub omega_right: f64,
}

impl SensorSample {
    pub fn new(t: f64, omega_left: f64, omega_right: f64) -> Self {
        Self {
            t,
            omega_left,
            omega_right,
        }
    }
}

/// Time axis with the two aligned wheel-rate channels.
///
/// Channels are expected to share the time axis. Anything that consumes a
/// series goes through [`RateSeries::aligned_len`], so a misaligned series is
/// truncated to its shortest channel instead of indexing out of bounds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RateSeries {
    #[serde(alias = "time_from_start", alias = "elapsed_time_s")]
    pub time: Vec<f64>,
    #[serde(alias = "gyro_left")]
    pub left: Vec<f64>,
    #[serde(alias = "gyro_right")]
    pub right: Vec<f64>,
}

impl RateSeries {
    pub fn new(time: Vec<f64>, left: Vec<f64>, right: Vec<f64>) -> Self {
        Self { time, left, right }
    }

    pub fn from_samples(samples: &[SensorSample]) -> Self {
        let mut series = Self::default();
        for sample in samples {
            series.push(*sample);
        }
        series
    }

    pub fn push(&mut self, sample: SensorSample) {
        self.time.push(sample.t);
        self.left.push(sample.omega_left);
        self.right.push(sample.omega_right);
    }

    /// Length usable by every channel
    pub fn aligned_len(&self) -> usize {
        self.time.len().min(self.left.len()).min(self.right.len())
    }

    pub fn len(&self) -> usize {
        self.aligned_len()
    }

    pub fn is_empty(&self) -> bool {
        self.aligned_len() == 0
    }

    pub fn is_aligned(&self) -> bool {
        self.time.len() == self.left.len() && self.left.len() == self.right.len()
    }

    /// Copy truncated to the shortest channel, with a warning when anything
    /// had to be dropped.
    pub fn truncated(&self) -> (RateSeries, Option<InputWarning>) {
        let len = self.aligned_len();
        let warning = if self.is_aligned() {
            None
        } else {
            Some(InputWarning::ChannelLengthMismatch {
                time: self.time.len(),
                left: self.left.len(),
                right: self.right.len(),
                used: len,
            })
        };
        let series = RateSeries {
            time: self.time[..len].to_vec(),
            left: self.left[..len].to_vec(),
            right: self.right[..len].to_vec(),
        };
        (series, warning)
    }

    pub fn samples(&self) -> impl Iterator<Item = SensorSample> + '_ {
        (0..self.aligned_len())
            .map(move |i| SensorSample::new(self.time[i], self.left[i], self.right[i]))
    }

    /// Join several series end to end, keeping their time stamps.
    pub fn concat<'a>(parts: impl IntoIterator<Item = &'a RateSeries>) -> RateSeries {
        let mut joined = RateSeries::default();
        for part in parts {
            for sample in part.samples() {
                joined.push(sample);
            }
        }
        joined
    }

    /// Apply `f(left, right) -> (left', right')` to every aligned sample.
    pub fn map_rates(&self, mut f: impl FnMut(f64, f64) -> (f64, f64)) -> RateSeries {
        let len = self.aligned_len();
        let mut left = Vec::with_capacity(len);
        let mut right = Vec::with_capacity(len);
        for i in 0..len {
            let (l, r) = f(self.left[i], self.right[i]);
            left.push(l);
            right.push(r);
        }
        RateSeries {
            time: self.time[..len].to_vec(),
            left,
            right,
        }
    }

    /// Mean raw rate of each wheel, `(0, 0)` when empty
    pub fn mean_rates(&self) -> (f64, f64) {
        let len = self.aligned_len();
        if len == 0 {
            return (0.0, 0.0);
        }
        let n = len as f64;
        (
            self.left[..len].iter().sum::<f64>() / n,
            self.right[..len].iter().sum::<f64>() / n,
        )
    }
}

/// Recoverable input problem reported alongside a result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputWarning {
    /// Channels had different lengths; everything past `used` was ignored
    ChannelLengthMismatch {
        time: usize,
        left: usize,
        right: usize,
        used: usize,
    },
    /// Steps with `dt <= 0` (or non-finite) contributed nothing
    NonIncreasingTime { skipped_steps: usize, first_index: usize },
}

/// Output of one Integrator run. Every channel has one entry per input sample.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KinematicTrace {
    pub time: Vec<f64>,
    /// Cumulative path length, never decreasing
    pub distance: Vec<f64>,
    /// Cumulative signed arc length, negative while reversing
    pub displacement: Vec<f64>,
    pub heading_deg: Vec<f64>,
    pub velocity: Vec<f64>,
    pub trajectory: Vec<[f64; 2]>,
}

impl KinematicTrace {
    pub fn with_capacity(len: usize) -> Self {
        Self {
            time: Vec::with_capacity(len),
            distance: Vec::with_capacity(len),
            displacement: Vec::with_capacity(len),
            heading_deg: Vec::with_capacity(len),
            velocity: Vec::with_capacity(len),
            trajectory: Vec::with_capacity(len),
        }
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn final_distance(&self) -> f64 {
        self.distance.last().copied().unwrap_or(0.0)
    }

    pub fn final_displacement(&self) -> f64 {
        self.displacement.last().copied().unwrap_or(0.0)
    }

    pub fn final_heading_deg(&self) -> f64 {
        self.heading_deg.last().copied().unwrap_or(0.0)
    }

    pub fn end_point(&self) -> [f64; 2] {
        self.trajectory.last().copied().unwrap_or([0.0, 0.0])
    }

    /// Straight-line distance from the start to the last point
    pub fn closure_error(&self) -> f64 {
        let [x, y] = self.end_point();
        x.hypot(y)
    }

    /// Name of the first channel holding a NaN or infinity
    pub fn first_non_finite(&self) -> Option<&'static str> {
        let finite = |values: &[f64]| values.iter().all(|v| v.is_finite());
        if !finite(&self.distance) {
            Some("distance")
        } else if !finite(&self.displacement) {
            Some("displacement")
        } else if !finite(&self.heading_deg) {
            Some("heading")
        } else if !finite(&self.velocity) {
            Some("velocity")
        } else if !self
            .trajectory
            .iter()
            .all(|p| p[0].is_finite() && p[1].is_finite())
        {
            Some("trajectory")
        } else {
            None
        }
    }
}
