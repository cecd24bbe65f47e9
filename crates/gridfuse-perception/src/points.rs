//! Point rasterizer.
//!
//! Bins a point cloud expressed in the grid's working frame into the
//! [`LayerKind::SensorPoints`] layer.  A point counts as an obstacle when its
//! `z` is strictly above the height threshold; its cell is then set to the
//! top of the cost range.  Writes are idempotent: many points in one cell leave the
//! same value as one point.

use gridfuse_types::{LayerKind, Point3};
use tracing::debug;

use crate::grid::{CostRange, Grid};

/// Per-call accounting of what happened to each input point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointRasterStats {
    /// Points that marked a cell.
    pub accepted: usize,
    /// Points at or below the height threshold.
    pub below_threshold: usize,
    /// Points outside the grid extent.
    pub out_of_bounds: usize,
    /// Points with a NaN or infinite coordinate.
    pub non_finite: usize,
}

/// Height-filtered occupancy rasterizer.
#[derive(Debug, Clone, Copy)]
pub struct PointRasterizer {
    height_threshold: f32,
    range: CostRange,
}

impl PointRasterizer {
    pub fn new(height_threshold: f32, range: CostRange) -> Self {
        Self {
            height_threshold,
            range,
        }
    }

    /// Rebuild the sensor-points layer of `grid` from `points`.
    ///
    /// The layer is reset to the bottom of the cost range first, so cells no
    /// qualifying point falls in end up free and an empty cloud yields an
    /// all-free layer.
    pub fn rasterize(&self, grid: &mut Grid, points: &[Point3]) -> PointRasterStats {
        let geometry = grid.geometry().clone();
        let layer = grid.layer_mut(LayerKind::SensorPoints);
        layer.fill(self.range.min);

        let mut stats = PointRasterStats::default();
        for p in points {
            if !p.is_finite() {
                stats.non_finite += 1;
                continue;
            }
            if p.z <= self.height_threshold {
                stats.below_threshold += 1;
                continue;
            }
            match geometry.cell_at(p.x, p.y) {
                Some((row, col)) => {
                    layer.set(row, col, self.range.max);
                    stats.accepted += 1;
                }
                None => stats.out_of_bounds += 1,
            }
        }

        debug!(
            accepted = stats.accepted,
            below_threshold = stats.below_threshold,
            out_of_bounds = stats.out_of_bounds,
            non_finite = stats.non_finite,
            "sensor points rasterized"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::NEUTRAL_COST;

    fn grid() -> Grid {
        Grid::new("velodyne", 30.0, 50.0, 0.2, 0.0, 20.0).unwrap()
    }

    fn rasterizer() -> PointRasterizer {
        PointRasterizer::new(0.3, CostRange::default())
    }

    #[test]
    fn empty_cloud_gives_neutral_layer() {
        let mut g = grid();
        g.layer_mut(LayerKind::SensorPoints).fill(3.0);
        let stats = rasterizer().rasterize(&mut g, &[]);
        assert_eq!(stats, PointRasterStats::default());
        let layer = g.layer(LayerKind::SensorPoints);
        assert_eq!(layer.count(NEUTRAL_COST), layer.as_slice().len());
    }

    #[test]
    fn high_point_marks_its_cell() {
        let mut g = grid();
        let stats = rasterizer().rasterize(&mut g, &[Point3::new(1.05, 10.05, 1.0)]);
        assert_eq!(stats.accepted, 1);

        let (row, col) = g.geometry().cell_at(1.05, 10.05).unwrap();
        assert_eq!(g.layer(LayerKind::SensorPoints).get(row, col), Some(3.0));
        assert_eq!(g.layer(LayerKind::SensorPoints).count(3.0), 1);
    }

    #[test]
    fn low_points_are_ignored() {
        let mut g = grid();
        let stats = rasterizer().rasterize(
            &mut g,
            &[Point3::new(0.0, 20.0, 0.3), Point3::new(0.0, 20.0, -1.0)],
        );
        assert_eq!(stats.below_threshold, 2);
        assert_eq!(g.layer(LayerKind::SensorPoints).count(3.0), 0);
    }

    #[test]
    fn out_of_extent_point_is_dropped() {
        let mut g = grid();
        // length_x = 30 → anything beyond 15 m from the origin along x is out.
        let stats = rasterizer().rasterize(
            &mut g,
            &[Point3::new(15.5, 20.0, 1.0), Point3::new(0.0, f32::NAN, 1.0)],
        );
        assert_eq!(stats.out_of_bounds, 1);
        assert_eq!(stats.non_finite, 1);
        assert_eq!(g.layer(LayerKind::SensorPoints).count(3.0), 0);
    }

    #[test]
    fn rasterizing_twice_is_idempotent() {
        let cloud: Vec<Point3> = (0..200)
            .map(|i| {
                let f = i as f32;
                Point3::new((f * 0.37) % 14.0, 20.0 + (f * 0.91) % 24.0 - 12.0, 0.2 + (f % 3.0) * 0.2)
            })
            .collect();

        let mut g = grid();
        rasterizer().rasterize(&mut g, &cloud);
        let first = g.layer(LayerKind::SensorPoints).clone();
        rasterizer().rasterize(&mut g, &cloud);
        assert_eq!(g.layer(LayerKind::SensorPoints), &first);
    }

    #[test]
    fn repeated_points_set_rather_than_accumulate() {
        let mut g = grid();
        let p = Point3::new(2.0, 18.0, 2.0);
        let stats = rasterizer().rasterize(&mut g, &[p, p, p]);
        assert_eq!(stats.accepted, 3);
        let (row, col) = g.geometry().cell_at(p.x, p.y).unwrap();
        assert_eq!(g.layer(LayerKind::SensorPoints).get(row, col), Some(3.0));
    }

    #[test]
    fn previous_obstacles_are_cleared() {
        let mut g = grid();
        rasterizer().rasterize(&mut g, &[Point3::new(2.0, 18.0, 2.0)]);
        rasterizer().rasterize(&mut g, &[Point3::new(-2.0, 25.0, 2.0)]);
        let layer = g.layer(LayerKind::SensorPoints);
        assert_eq!(layer.count(3.0), 1);
        let (row, col) = g.geometry().cell_at(-2.0, 25.0).unwrap();
        assert_eq!(layer.get(row, col), Some(3.0));
    }
}
