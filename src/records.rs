//! Persisted calibration and recording records
//!
//! Field names follow the stored documents (`smarthub_id`, `wheel_dist`,
//! `time_from_start`, …) through serde aliases, so existing files load as-is.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::calibration::{Calibration, CalibrationMethod};
use crate::error::Result;
use crate::integrator::Integration;
use crate::types::{InputWarning, KinematicTrace, ParameterVector, RateSeries};

fn is_gzip(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}

/// Read a `.json` or gzip-compressed `.json.gz` document
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    if is_gzip(path) {
        let reader = BufReader::new(GzDecoder::new(file));
        Ok(serde_json::from_reader(reader)?)
    } else {
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Write pretty JSON, gzip-compressed when the path ends in `.gz`
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)?;
    if is_gzip(path) {
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer_pretty(&mut encoder, value)?;
        encoder.finish()?.flush()?;
    } else {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
    }
    Ok(())
}

/// Stored calibration, keyed by device and a human-assigned name
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    #[serde(alias = "smarthub_id")]
    pub device_id: String,
    pub calibration_name: String,
    #[serde(default = "default_method")]
    pub method: CalibrationMethod,
    /// RFC 3339
    #[serde(alias = "date")]
    pub created: String,
    #[serde(flatten)]
    pub parameters: ParameterVector,
}

fn default_method() -> CalibrationMethod {
    CalibrationMethod::Sequence
}

impl CalibrationRecord {
    /// Build a record from a solved calibration.
    ///
    /// Runs [`Calibration::accept`] against `recordings` first; invalid
    /// parameters never reach a record.
    pub fn new(
        device_id: impl Into<String>,
        calibration_name: impl Into<String>,
        calibration: &Calibration,
        recordings: &[&RateSeries],
    ) -> Result<Self> {
        calibration.accept(recordings)?;
        Ok(Self {
            device_id: device_id.into(),
            calibration_name: calibration_name.into(),
            method: calibration.method,
            created: Utc::now().to_rfc3339(),
            parameters: calibration.parameters,
        })
    }
}

/// One stored recording: raw and smoothed rates plus the integrator output
/// computed from them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingRecord {
    #[serde(alias = "time_from_start")]
    pub elapsed_time_s: Vec<f64>,
    pub gyro_left: Vec<f64>,
    pub gyro_right: Vec<f64>,
    #[serde(default)]
    pub gyro_left_smoothed: Vec<f64>,
    #[serde(default)]
    pub gyro_right_smoothed: Vec<f64>,
    #[serde(default)]
    pub dist_m: Vec<f64>,
    #[serde(default)]
    pub disp_m: Vec<f64>,
    #[serde(default)]
    pub heading_deg: Vec<f64>,
    #[serde(default)]
    pub velocity: Vec<f64>,
    #[serde(default)]
    pub traj_x: Vec<f64>,
    #[serde(default)]
    pub traj_y: Vec<f64>,
}

impl RecordingRecord {
    pub fn from_series(series: &RateSeries) -> Self {
        let (series, _) = series.truncated();
        Self {
            elapsed_time_s: series.time,
            gyro_left: series.left,
            gyro_right: series.right,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.elapsed_time_s.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elapsed_time_s.is_empty()
    }

    fn has_smoothed(&self) -> bool {
        let n = self.len();
        n > 0 && self.gyro_left_smoothed.len() == n && self.gyro_right_smoothed.len() == n
    }

    /// Rate channels, the smoothed pair when requested and present
    pub fn rates(&self, prefer_smoothed: bool) -> RateSeries {
        if prefer_smoothed && self.has_smoothed() {
            RateSeries::new(
                self.elapsed_time_s.clone(),
                self.gyro_left_smoothed.clone(),
                self.gyro_right_smoothed.clone(),
            )
        } else {
            RateSeries::new(
                self.elapsed_time_s.clone(),
                self.gyro_left.clone(),
                self.gyro_right.clone(),
            )
        }
    }

    /// Previously stored integrator output, if complete and consistent
    pub fn cached_trace(&self) -> Option<KinematicTrace> {
        let n = self.len();
        let outputs = [
            &self.dist_m,
            &self.disp_m,
            &self.heading_deg,
            &self.velocity,
            &self.traj_x,
            &self.traj_y,
        ];
        if n == 0 || outputs.iter().any(|channel| channel.len() != n) {
            return None;
        }
        Some(KinematicTrace {
            time: self.elapsed_time_s.clone(),
            distance: self.dist_m.clone(),
            displacement: self.disp_m.clone(),
            heading_deg: self.heading_deg.clone(),
            velocity: self.velocity.clone(),
            trajectory: self
                .traj_x
                .iter()
                .zip(&self.traj_y)
                .map(|(x, y)| [*x, *y])
                .collect(),
        })
    }

    /// Stored trace when available, otherwise integrate with `params`
    pub fn trace(&self, params: &ParameterVector) -> Integration {
        match self.cached_trace() {
            Some(trace) => Integration {
                trace,
                warnings: Vec::new(),
            },
            None => params.trace(&self.rates(true)),
        }
    }

    /// Recompute the stored output with new parameters.
    ///
    /// With `cutoff_hz` the smoothed channels are rebuilt first.
    pub fn refresh(&mut self, params: &ParameterVector, cutoff_hz: Option<f64>) -> Vec<InputWarning> {
        if let Some(cutoff) = cutoff_hz {
            let smoothed = self.rates(false).smoothed(cutoff);
            self.gyro_left_smoothed = smoothed.left;
            self.gyro_right_smoothed = smoothed.right;
        }

        let Integration { trace, warnings } = params.trace(&self.rates(true));
        // Outputs share the (possibly truncated) trace length
        self.elapsed_time_s.truncate(trace.len());
        self.dist_m = trace.distance;
        self.disp_m = trace.displacement;
        self.heading_deg = trace.heading_deg;
        self.velocity = trace.velocity;
        self.traj_x = trace.trajectory.iter().map(|p| p[0]).collect();
        self.traj_y = trace.trajectory.iter().map(|p| p[1]).collect();
        log::info!(
            "refreshed recording: {} samples, {:.3} distance, {:.1} deg",
            self.len(),
            self.dist_m.last().copied().unwrap_or(0.0),
            self.heading_deg.last().copied().unwrap_or(0.0)
        );
        warnings
    }
}
