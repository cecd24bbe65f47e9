//! Polygon rasterizer.
//!
//! [`PolygonCells`] walks every cell whose centre lies inside a closed
//! polygon, one scanline per grid row.  Membership follows the even-odd
//! ray-crossing rule with half-open edges, so concave polygons are handled
//! and a centre lying exactly on a shared edge is claimed by one side only.
//!
//! [`PolygonRasterizer`] uses it to fill a set of polygons defined in another
//! frame (the static road area lives in `map`) into a grid layer: the
//! transform into the grid frame is resolved first, then every cell inside
//! any polygon gets the inside cost and every other cell the outside cost.

use std::time::Duration;

use chrono::{DateTime, Utc};
use gridfuse_types::{GridError, GridGeometry, LayerKind, Point2, Polygon};
use tracing::debug;

use crate::grid::{CostLayer, Grid};
use crate::transform::TransformLookup;

// ────────────────────────────────────────────────────────────────────────────
// PolygonCells
// ────────────────────────────────────────────────────────────────────────────

/// Iterator over `(row, col)` of every cell whose centre is inside a polygon.
///
/// Vertices are in the grid's frame (metres).  Cells outside the grid are
/// never yielded.
pub struct PolygonCells<'g> {
    geometry: &'g GridGeometry,
    vertices: Vec<Point2>,
    row: usize,
    row_end: usize,
    spans: Vec<(usize, usize)>,
    span: usize,
    col: usize,
}

impl<'g> PolygonCells<'g> {
    /// Returns `None` for polygons with fewer than three vertices or any
    /// non-finite coordinate.
    pub fn new(geometry: &'g GridGeometry, vertices: &[Point2]) -> Option<Self> {
        if vertices.len() < 3 || vertices.iter().any(|p| !p.is_finite()) {
            return None;
        }

        let (min_y, max_y) = vertices
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p.y), hi.max(p.y))
            });
        let low = geometry.origin_low();
        let res = geometry.resolution;
        // Rows whose centre may fall within [min_y, max_y].
        let first = ((min_y - low.y) / res - 0.5).ceil().max(0.0);
        let last = ((max_y - low.y) / res - 0.5).floor() + 1.0;
        let row_end = last.clamp(0.0, geometry.rows as f32) as usize;

        let mut cells = Self {
            geometry,
            vertices: vertices.to_vec(),
            row: first as usize,
            row_end,
            spans: Vec::new(),
            span: 0,
            col: 0,
        };
        cells.load_row();
        Some(cells)
    }

    /// Compute the column spans covered on the current row.
    fn load_row(&mut self) {
        self.spans.clear();
        self.span = 0;
        if self.row >= self.row_end {
            return;
        }

        let low = self.geometry.origin_low();
        let res = self.geometry.resolution;
        let y = self.geometry.cell_centre(self.row, 0).y;

        let mut crossings: Vec<f32> = Vec::with_capacity(self.vertices.len());
        let n = self.vertices.len();
        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            // Half-open: an edge counts when it straddles y with exactly one
            // endpoint strictly above.
            if (a.y > y) != (b.y > y) {
                crossings.push(a.x + (y - a.y) * (b.x - a.x) / (b.y - a.y));
            }
        }
        crossings.sort_by(f32::total_cmp);

        let cols = self.geometry.cols as f32;
        for pair in crossings.chunks_exact(2) {
            // Columns whose centre x lies in [pair[0], pair[1]).
            let start = ((pair[0] - low.x) / res - 0.5).ceil().clamp(0.0, cols) as usize;
            let end = ((pair[1] - low.x) / res - 0.5).ceil().clamp(0.0, cols) as usize;
            if start < end {
                self.spans.push((start, end));
            }
        }
        if let Some(&(start, _)) = self.spans.first() {
            self.col = start;
        }
    }
}

impl Iterator for PolygonCells<'_> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.row >= self.row_end {
                return None;
            }
            if let Some(&(_, end)) = self.spans.get(self.span) {
                if self.col < end {
                    let cell = (self.row, self.col);
                    self.col += 1;
                    return Some(cell);
                }
                self.span += 1;
                if let Some(&(start, _)) = self.spans.get(self.span) {
                    self.col = start;
                }
                continue;
            }
            self.row += 1;
            self.load_row();
        }
    }
}

/// Set every cell inside `vertices` to `value`.  Returns the number of cells
/// written.
pub fn stamp_polygon(
    layer: &mut CostLayer,
    geometry: &GridGeometry,
    vertices: &[Point2],
    value: f32,
) -> usize {
    let Some(cells) = PolygonCells::new(geometry, vertices) else {
        return 0;
    };
    cells.filter(|&(row, col)| layer.set(row, col, value)).count()
}

/// Overwrite `layer` with `outside` everywhere, then `inside` over the union
/// of `polygons`.  Returns the number of inside writes.
pub fn fill_polygons(
    layer: &mut CostLayer,
    geometry: &GridGeometry,
    polygons: &[Vec<Point2>],
    inside: f32,
    outside: f32,
) -> usize {
    layer.fill(outside);
    polygons
        .iter()
        .map(|poly| stamp_polygon(layer, geometry, poly, inside))
        .sum()
}

// ────────────────────────────────────────────────────────────────────────────
// PolygonRasterizer
// ────────────────────────────────────────────────────────────────────────────

/// Fills polygons defined in a foreign frame into one grid layer.
#[derive(Debug, Clone, Copy)]
pub struct PolygonRasterizer {
    inside_cost: f32,
    outside_cost: f32,
    timeout: Duration,
}

impl PolygonRasterizer {
    /// `timeout` bounds the transform lookup performed by every
    /// [`rasterize`][Self::rasterize] call.
    pub fn new(inside_cost: f32, outside_cost: f32, timeout: Duration) -> Self {
        Self {
            inside_cost,
            outside_cost,
            timeout,
        }
    }

    /// Fill `polygons` (expressed in `source_frame`) into the `kind` layer.
    ///
    /// The transform into the grid frame is looked up fresh on each call.
    ///
    /// # Errors
    ///
    /// Propagates [`GridError::TransformUnavailable`] from `tf`; the layer is
    /// left untouched in that case.
    pub fn rasterize(
        &self,
        grid: &mut Grid,
        kind: LayerKind,
        polygons: &[Polygon],
        source_frame: &str,
        tf: &dyn TransformLookup,
        stamp: Option<DateTime<Utc>>,
    ) -> Result<usize, GridError> {
        let transform = tf.lookup_transform(grid.frame_id(), source_frame, stamp, self.timeout)?;

        let local: Vec<Vec<Point2>> = polygons
            .iter()
            .map(|poly| {
                poly.vertices
                    .iter()
                    .map(|&v| {
                        let p = transform.apply(v);
                        Point2::new(p.x, p.y)
                    })
                    .collect()
            })
            .collect();

        let geometry = grid.geometry().clone();
        let inside = fill_polygons(
            grid.layer_mut(kind),
            &geometry,
            &local,
            self.inside_cost,
            self.outside_cost,
        );
        debug!(layer = %kind, polygons = polygons.len(), inside, "polygons rasterized");
        Ok(inside)
    }
}
