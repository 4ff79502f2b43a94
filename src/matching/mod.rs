//! Nearest-neighbour trajectory matching losses
//!
//! `nearest_neighbor_rms(a, b)` indexes `b` and measures every point of `a`
//! against it, so it is not symmetric; [`symmetric_rms`] averages both
//! directions.

pub mod point_tree;

pub use point_tree::{point_to_segment_distance, PointTree};

/// Root mean square of a sequence of distances
fn rms<I: IntoIterator<Item = f64>>(distances: I) -> f64 {
    let (sum, n) = distances
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), d| (sum + d * d, n + 1));
    if n == 0 {
        0.0
    } else {
        (sum / n as f64).sqrt()
    }
}

/// RMS distance from each point of `points_a` to its nearest neighbour in
/// `points_b`.
///
/// An empty `points_a` gives 0. An empty `points_b` with a non-empty
/// `points_a` has no defined distance and gives infinity.
pub fn nearest_neighbor_rms(points_a: &[[f64; 2]], points_b: &[[f64; 2]]) -> f64 {
    if points_a.is_empty() {
        return 0.0;
    }
    let tree = PointTree::from_points(points_b);
    if tree.is_empty() {
        return f64::INFINITY;
    }
    rms(points_a
        .iter()
        .map(|p| tree.nearest_distance(*p).unwrap_or(f64::INFINITY)))
}

/// Mean of [`nearest_neighbor_rms`] taken in both directions
pub fn symmetric_rms(points_a: &[[f64; 2]], points_b: &[[f64; 2]]) -> f64 {
    0.5 * (nearest_neighbor_rms(points_a, points_b) + nearest_neighbor_rms(points_b, points_a))
}

/// RMS distance of `points` from the straight segment `start`..`end`.
///
/// Exact segment distance, i.e. the limit of matching against an ever more
/// densely sampled reference line.
pub fn segment_rms(points: &[[f64; 2]], start: [f64; 2], end: [f64; 2]) -> f64 {
    rms(points
        .iter()
        .map(|p| point_to_segment_distance(*p, start, end)))
}
