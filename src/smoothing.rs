//! Offline low-pass smoothing of wheel-rate channels

use crate::types::RateSeries;

/// Normalised Hann weights: 0.5 - 0.5 * cos(2πi / (length-1))
fn hann_weights(length: usize) -> Vec<f64> {
    if length <= 1 {
        return vec![1.0];
    }
    if length == 2 {
        return vec![0.5, 0.5];
    }

    let mut weights: Vec<f64> = (0..length)
        .map(|i| {
            let angle = (2.0 * std::f64::consts::PI * i as f64) / (length as f64 - 1.0);
            0.5 - 0.5 * angle.cos()
        })
        .collect();

    let sum: f64 = weights.iter().sum();
    let total = if sum > 0.0 { sum } else { 1.0 };
    weights.iter_mut().for_each(|w| *w /= total);
    weights
}

/// Odd Hann window length whose main lobe passes roughly `cutoff_hz`.
pub fn window_for_cutoff(sample_rate_hz: f64, cutoff_hz: f64) -> usize {
    let valid = |x: f64| x.is_finite() && x > 0.0;
    if !valid(sample_rate_hz) || !valid(cutoff_hz) {
        return 1;
    }
    let n = (2.0 * sample_rate_hz / cutoff_hz).round().max(3.0) as usize;
    n | 1
}

/// Median spacing of a time axis, ignoring non-positive steps
fn median_interval(time: &[f64]) -> Option<f64> {
    let mut steps: Vec<f64> = time
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .filter(|dt| *dt > 0.0 && dt.is_finite())
        .collect();
    if steps.is_empty() {
        return None;
    }
    steps.sort_by(|a, b| a.total_cmp(b));
    Some(steps[steps.len() / 2])
}

/// Zero-phase low-pass over a whole recording.
///
/// Centred normalised Hann window sized from the median sample interval.
/// Near the ends the window is clipped and renormalised, so a constant input
/// comes back unchanged everywhere.
pub fn low_pass(values: &[f64], time: &[f64], cutoff_hz: f64) -> Vec<f64> {
    let len = values.len().min(time.len());
    let values = &values[..len];

    let Some(dt) = median_interval(&time[..len]) else {
        return values.to_vec();
    };
    // Longest odd window that fits the series
    let max_window = if len % 2 == 0 { len - 1 } else { len };
    let window = window_for_cutoff(1.0 / dt, cutoff_hz).min(max_window);
    if window <= 1 || len < 2 {
        return values.to_vec();
    }

    // Interior of an odd Hann window; the zero-weight endpoints are dropped
    let weights = hann_weights(window + 2);
    let weights = &weights[1..=window];
    let half = window / 2;

    (0..len)
        .map(|i| {
            let mut acc = 0.0;
            let mut norm = 0.0;
            for (k, w) in weights.iter().enumerate() {
                let j = i as isize + k as isize - half as isize;
                if j < 0 || j >= len as isize {
                    continue;
                }
                acc += values[j as usize] * w;
                norm += w;
            }
            if norm > 0.0 {
                acc / norm
            } else {
                values[i]
            }
        })
        .collect()
}

impl RateSeries {
    /// Both wheel channels passed through [`low_pass`]
    pub fn smoothed(&self, cutoff_hz: f64) -> RateSeries {
        let len = self.aligned_len();
        let time = &self.time[..len];
        RateSeries {
            time: time.to_vec(),
            left: low_pass(&self.left[..len], time, cutoff_hz),
            right: low_pass(&self.right[..len], time, cutoff_hz),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_window_for_cutoff() {
        // 100 Hz at 6 Hz cutoff: 2 * 100 / 6 = 33.3
        assert_eq!(window_for_cutoff(100.0, 6.0), 33);
        assert_eq!(window_for_cutoff(10.0, 6.0), 3);
        assert_eq!(window_for_cutoff(100.0, 0.0), 1);
        assert_eq!(window_for_cutoff(100.0, 5.0) % 2, 1);
    }

    #[test]
    fn test_low_pass_keeps_constant() {
        let time: Vec<f64> = (0..200).map(|i| i as f64 * 0.01).collect();
        let values = vec![2.5; 200];
        let out = low_pass(&values, &time, 6.0);
        for v in out {
            assert_relative_eq!(v, 2.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_low_pass_attenuates_fast_oscillation() {
        let time: Vec<f64> = (0..500).map(|i| i as f64 * 0.01).collect();
        // 40 Hz ripple on a 1.0 baseline
        let values: Vec<f64> = time
            .iter()
            .map(|t| 1.0 + 0.5 * (2.0 * std::f64::consts::PI * 40.0 * t).sin())
            .collect();
        let out = low_pass(&values, &time, 6.0);

        let interior = &out[50..450];
        let max_dev = interior
            .iter()
            .map(|v| (v - 1.0).abs())
            .fold(0.0, f64::max);
        assert!(max_dev < 0.05, "ripple left: {}", max_dev);
    }

    #[test]
    fn test_tiny_cutoff_uses_whole_series() {
        let time: Vec<f64> = (0..20).map(|i| i as f64 * 0.01).collect();
        let values: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert_eq!(window_for_cutoff(100.0, 1e-300), usize::MAX);

        let out = low_pass(&values, &time, 1e-300);
        assert_eq!(out.len(), 20);
        assert!(out.iter().all(|v| v.is_finite()));
        // 19-sample window centred on sample 9 spans 0..=18
        assert_relative_eq!(out[9], 9.0, epsilon = 1e-9);
    }

    #[test]
    fn test_low_pass_degenerate_time_axis() {
        let values = vec![1.0, 5.0, 2.0];
        assert_eq!(low_pass(&values, &[0.0, 0.0, 0.0], 6.0), values);
        assert!(low_pass(&[], &[], 6.0).is_empty());
    }

    #[test]
    fn test_series_smoothed_shape() {
        let time: Vec<f64> = (0..50).map(|i| i as f64 * 0.02).collect();
        let series = RateSeries::new(time, vec![1.0; 50], vec![-1.0; 48]);
        let smoothed = series.smoothed(6.0);
        assert_eq!(smoothed.time.len(), 48);
        assert!(smoothed.is_aligned());
        assert_relative_eq!(smoothed.right[10], -1.0, epsilon = 1e-12);
    }
}
