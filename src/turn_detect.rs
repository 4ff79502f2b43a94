//! Locates the deliberate turn inside a heading trace.
//!
//! A sample is "turning" when its heading change exceeds `rate_threshold`.
//! Index-consecutive turning samples form runs; a run counts as part of the
//! turn only if it is longer than `min_run_length` samples and its largest
//! heading change exceeds the peak threshold (`rate_threshold` unless
//! `peak_threshold` overrides it). All qualifying runs are joined and the
//! window spans the first to the last of them.

use serde::{Deserialize, Serialize};

/// Inclusive index range of a turn within a heading series
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnWindow {
    pub start_index: usize,
    pub end_index: usize,
}

impl TurnWindow {
    /// Zero for a reversed window
    pub fn len(&self) -> usize {
        (self.end_index + 1).saturating_sub(self.start_index)
    }

    pub fn is_empty(&self) -> bool {
        self.end_index < self.start_index
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start_index..=self.end_index).contains(&index)
    }
}

/// Thresholds in degrees per sample, run length in samples
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnDetector {
    pub min_run_length: usize,
    pub rate_threshold: f64,
    /// Minimum largest change a run needs; `None` means `rate_threshold`
    pub peak_threshold: Option<f64>,
}

impl Default for TurnDetector {
    fn default() -> Self {
        Self {
            min_run_length: 60,
            rate_threshold: 0.1,
            peak_threshold: None,
        }
    }
}

/// Per-sample heading change; the first entry is always 0
pub fn heading_deltas(heading: &[f64]) -> Vec<f64> {
    let mut deltas = Vec::with_capacity(heading.len());
    if heading.is_empty() {
        return deltas;
    }
    deltas.push(0.0);
    deltas.extend(heading.windows(2).map(|pair| pair[1] - pair[0]));
    deltas
}

impl TurnDetector {
    pub fn new(min_run_length: usize, rate_threshold: f64) -> Self {
        Self {
            min_run_length,
            rate_threshold,
            ..Self::default()
        }
    }

    pub fn with_peak_threshold(mut self, peak_threshold: f64) -> Self {
        self.peak_threshold = Some(peak_threshold);
        self
    }

    pub fn detect(&self, heading: &[f64]) -> Option<TurnWindow> {
        let deltas = heading_deltas(heading);
        let peak_threshold = self.peak_threshold.unwrap_or(self.rate_threshold);

        let mut first: Option<usize> = None;
        let mut last: Option<usize> = None;
        // (start, end, peak |delta|) of the run being grown
        let mut run: Option<(usize, usize, f64)> = None;

        let mut close = |run: (usize, usize, f64)| {
            let (start, end, peak) = run;
            if end - start + 1 > self.min_run_length && peak > peak_threshold {
                first.get_or_insert(start);
                last = Some(end);
            }
        };

        for (i, delta) in deltas.iter().enumerate() {
            let magnitude = delta.abs();
            if magnitude.is_nan() || magnitude <= self.rate_threshold {
                if let Some(done) = run.take() {
                    close(done);
                }
                continue;
            }
            run = match run {
                Some((start, _, peak)) => Some((start, i, peak.max(magnitude))),
                None => Some((i, i, magnitude)),
            };
        }
        if let Some(done) = run {
            close(done);
        }

        let window = match (first, last) {
            (Some(start_index), Some(end_index)) => Some(TurnWindow {
                start_index,
                end_index,
            }),
            _ => None,
        };

        match window {
            Some(w) => log::debug!(
                "turn window {}..={} ({} samples of {})",
                w.start_index,
                w.end_index,
                w.len(),
                heading.len()
            ),
            None => log::debug!("no turn found in {} heading samples", heading.len()),
        }
        window
    }
}

/// [`TurnDetector::detect`] with one threshold for both guards
pub fn detect_turn(heading: &[f64], min_run_length: usize, rate_threshold: f64) -> Option<TurnWindow> {
    TurnDetector::new(min_run_length, rate_threshold).detect(heading)
}
