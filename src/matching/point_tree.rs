use geo::{Coord, EuclideanDistance, Line, Point};
use rstar::RTree;

/// R-Tree over planar trajectory points for nearest-neighbour queries
///
/// # Usage
/// ```
/// use wheel_odometry::matching::PointTree;
///
/// let tree = PointTree::from_points(&[[0.0, 0.0], [1.0, 0.0]]);
/// assert_eq!(tree.nearest_distance([0.75, 0.0]), Some(0.25));
/// ```
pub struct PointTree {
    tree: RTree<[f64; 2]>,
}

impl PointTree {
    /// Bulk-load the index; non-finite points are left out
    pub fn from_points(points: &[[f64; 2]]) -> Self {
        let finite: Vec<[f64; 2]> = points
            .iter()
            .copied()
            .filter(|p| p[0].is_finite() && p[1].is_finite())
            .collect();
        PointTree {
            tree: RTree::bulk_load(finite),
        }
    }

    /// Euclidean distance to the nearest indexed point, `None` when empty
    pub fn nearest_distance(&self, query: [f64; 2]) -> Option<f64> {
        self.tree
            .nearest_neighbor(&query)
            .map(|p| (p[0] - query[0]).hypot(p[1] - query[1]))
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

/// Exact distance from `point` to the segment `start`..`end`
///
/// A zero-length segment degrades to point distance.
pub fn point_to_segment_distance(point: [f64; 2], start: [f64; 2], end: [f64; 2]) -> f64 {
    let line = Line::new(
        Coord { x: start[0], y: start[1] },
        Coord { x: end[0], y: end[1] },
    );
    Point::new(point[0], point[1]).euclidean_distance(&line)
}
