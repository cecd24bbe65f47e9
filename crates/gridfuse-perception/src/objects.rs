//! Object rasterizer.
//!
//! Stamps the footprint of every detected object into the
//! [`LayerKind::Objects`] layer with the top of the cost range.  The footprint is the
//! object's convex hull when the detector supplied one, otherwise the
//! oriented box given by its pose and dimensions.  Both are grown by a
//! configurable safety margin before filling.

use gridfuse_types::{DetectedObject, LayerKind, Point2};
use tracing::{debug, trace};

use crate::grid::{CostRange, Grid};
use crate::polygon::stamp_polygon;

/// Footprint rasterizer for detected objects.
#[derive(Debug, Clone, Copy)]
pub struct ObjectRasterizer {
    range: CostRange,
    expand_size: f32,
}

impl ObjectRasterizer {
    /// `expand_size` is the margin (metres) added around every footprint;
    /// negative values are treated as zero.
    pub fn new(range: CostRange, expand_size: f32) -> Self {
        Self {
            range,
            expand_size: expand_size.max(0.0),
        }
    }

    /// Footprint polygon of `object` in the working frame, already expanded.
    ///
    /// Returns `None` when neither the hull nor the box yields three finite
    /// vertices.
    pub fn footprint(&self, object: &DetectedObject) -> Option<Vec<Point2>> {
        let footprint = if object.convex_hull.len() >= 3 {
            expand_hull(&object.convex_hull, self.expand_size)
        } else {
            oriented_box(object, self.expand_size)
        };
        (footprint.len() >= 3 && footprint.iter().all(Point2::is_finite)).then_some(footprint)
    }

    /// Rebuild the objects layer of `grid` from `objects`.
    ///
    /// Returns the number of objects that were stamped.
    pub fn rasterize(&self, grid: &mut Grid, objects: &[DetectedObject]) -> usize {
        let geometry = grid.geometry().clone();
        let layer = grid.layer_mut(LayerKind::Objects);
        layer.fill(self.range.min);

        let mut stamped = 0;
        for object in objects {
            let Some(footprint) = self.footprint(object) else {
                trace!(id = object.id, "skipping object with degenerate footprint");
                continue;
            };
            stamp_polygon(layer, &geometry, &footprint, self.range.max);
            stamped += 1;
        }

        debug!(objects = objects.len(), stamped, "objects rasterized");
        stamped
    }
}

/// Corners of the object's box, counter-clockwise, grown by `margin` on
/// every side.
fn oriented_box(object: &DetectedObject, margin: f32) -> Vec<Point2> {
    let half_l = object.dimensions.length * 0.5 + margin;
    let half_w = object.dimensions.width * 0.5 + margin;
    if !(half_l > 0.0 && half_w > 0.0) {
        return Vec::new();
    }
    let (sin, cos) = object.pose.yaw.sin_cos();
    [(half_l, half_w), (-half_l, half_w), (-half_l, -half_w), (half_l, -half_w)]
        .into_iter()
        .map(|(dx, dy)| {
            Point2::new(
                object.pose.x + dx * cos - dy * sin,
                object.pose.y + dx * sin + dy * cos,
            )
        })
        .collect()
}

/// Push every hull vertex `margin` further away from the vertex centroid.
fn expand_hull(hull: &[Point2], margin: f32) -> Vec<Point2> {
    if margin == 0.0 {
        return hull.to_vec();
    }
    let n = hull.len() as f32;
    let cx = hull.iter().map(|p| p.x).sum::<f32>() / n;
    let cy = hull.iter().map(|p| p.y).sum::<f32>() / n;
    hull.iter()
        .map(|p| {
            let (dx, dy) = (p.x - cx, p.y - cy);
            let dist = dx.hypot(dy);
            if dist <= f32::EPSILON {
                *p
            } else {
                let scale = (dist + margin) / dist;
                Point2::new(cx + dx * scale, cy + dy * scale)
            }
        })
        .collect()
}
