//! Multi-layer cost grid.
//!
//! A [`Grid`] owns one [`CostLayer`] per [`LayerKind`], all sharing the
//! grid's [`GridGeometry`].  Layers are allocated at construction, filled
//! with one base cost ([`NEUTRAL_COST`], or `grid_min_value` via
//! [`Grid::from_config`]), and never resized: a `(row, col)` index addresses
//! the same patch of ground in every layer.

use chrono::{DateTime, Utc};
use gridfuse_types::{GridConfig, GridError, GridGeometry, GridSnapshot, LayerKind};
use uuid::Uuid;

/// Cost every layer starts at.
pub const NEUTRAL_COST: f32 = 0.0;

// ────────────────────────────────────────────────────────────────────────────
// CostRange
// ────────────────────────────────────────────────────────────────────────────

/// Inclusive bounds on the cost any rasterizer may write.  Rasterizers reset
/// their layer to `min` and mark with `max`, so no write leaves the range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostRange {
    pub min: f32,
    pub max: f32,
}

impl CostRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn from_config(config: &GridConfig) -> Self {
        Self::new(config.grid_min_value, config.grid_max_value)
    }
}

impl Default for CostRange {
    fn default() -> Self {
        Self::new(0.0, 3.0)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CostLayer
// ────────────────────────────────────────────────────────────────────────────

/// Dense row-major array of costs.
#[derive(Debug, Clone, PartialEq)]
pub struct CostLayer {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl CostLayer {
    /// A `rows × cols` layer filled with `value`.
    pub fn new(rows: usize, cols: usize, value: f32) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// Wrap existing row-major data.
    ///
    /// # Errors
    ///
    /// [`GridError::DimensionMismatch`] when `data.len() != rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self, GridError> {
        if data.len() != rows * cols {
            return Err(GridError::DimensionMismatch {
                expected: (rows, cols),
                found: (data.len() / cols.max(1), cols),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`
    pub fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    /// Write `value` at `(row, col)`; out-of-range indices are ignored and
    /// reported as `false`.
    pub fn set(&mut self, row: usize, col: usize, value: f32) -> bool {
        if row < self.rows && col < self.cols {
            self.data[row * self.cols + col] = value;
            true
        } else {
            false
        }
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Number of cells holding exactly `value`.
    pub fn count(&self, value: f32) -> usize {
        self.data.iter().filter(|&&v| v == value).count()
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Grid
// ────────────────────────────────────────────────────────────────────────────

const LAYER_COUNT: usize = LayerKind::ALL.len();

fn slot(kind: LayerKind) -> usize {
    match kind {
        LayerKind::SensorPoints => 0,
        LayerKind::Vectormap => 1,
        LayerKind::Waypoint => 2,
        LayerKind::Objects => 3,
        LayerKind::Combined => 4,
    }
}

/// Fixed-geometry stack of cost layers.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    geometry: GridGeometry,
    layers: [CostLayer; LAYER_COUNT],
}

impl Grid {
    /// Allocate a grid centred at `(origin_x, origin_y)` in `frame`.
    ///
    /// # Errors
    ///
    /// [`GridError::Configuration`] for non-positive resolution or extent.
    pub fn new(
        frame: impl Into<String>,
        length_x: f32,
        length_y: f32,
        resolution: f32,
        origin_x: f32,
        origin_y: f32,
    ) -> Result<Self, GridError> {
        let geometry =
            GridGeometry::from_lengths(frame, length_x, length_y, resolution, origin_x, origin_y)?;
        Ok(Self::from_geometry(geometry))
    }

    /// Grid whose layers start at the configured `grid_min_value`.
    pub fn from_config(config: &GridConfig) -> Result<Self, GridError> {
        Ok(Self::filled(config.geometry()?, config.grid_min_value))
    }

    pub fn from_geometry(geometry: GridGeometry) -> Self {
        Self::filled(geometry, NEUTRAL_COST)
    }

    fn filled(geometry: GridGeometry, value: f32) -> Self {
        let blank = CostLayer::new(geometry.rows, geometry.cols, value);
        Self {
            layers: std::array::from_fn(|_| blank.clone()),
            geometry,
        }
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn frame_id(&self) -> &str {
        &self.geometry.frame_id
    }

    pub fn rows(&self) -> usize {
        self.geometry.rows
    }

    pub fn cols(&self) -> usize {
        self.geometry.cols
    }

    pub fn layer(&self, kind: LayerKind) -> &CostLayer {
        &self.layers[slot(kind)]
    }

    pub fn layer_mut(&mut self, kind: LayerKind) -> &mut CostLayer {
        &mut self.layers[slot(kind)]
    }

    /// Replace a layer wholesale.
    ///
    /// # Errors
    ///
    /// [`GridError::DimensionMismatch`] when `layer` does not match the grid.
    pub fn set_layer(&mut self, kind: LayerKind, layer: CostLayer) -> Result<(), GridError> {
        let expected = (self.rows(), self.cols());
        if layer.dims() != expected {
            return Err(GridError::DimensionMismatch {
                expected,
                found: layer.dims(),
            });
        }
        self.layers[slot(kind)] = layer;
        Ok(())
    }

    /// Copy every layer out for publishing.
    pub fn snapshot(&self, stamp: DateTime<Utc>) -> GridSnapshot {
        GridSnapshot {
            id: Uuid::new_v4(),
            stamp,
            geometry: self.geometry.clone(),
            layers: LayerKind::ALL
                .into_iter()
                .map(|kind| (kind, self.layer(kind).as_slice().to_vec()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_layers_share_dimensions_and_start_neutral() {
        let grid = Grid::new("velodyne", 30.0, 50.0, 0.2, 0.0, 20.0).unwrap();
        assert_eq!((grid.rows(), grid.cols()), (250, 150));
        for kind in LayerKind::ALL {
            let layer = grid.layer(kind);
            assert_eq!(layer.dims(), (250, 150), "{kind} has wrong dims");
            assert_eq!(layer.count(NEUTRAL_COST), 250 * 150);
        }
    }

    #[test]
    fn dimensions_follow_rounded_length_over_resolution() {
        for (lx, ly, res) in [(10.0, 4.0, 0.5), (7.3, 2.2, 0.25), (1.0, 1.0, 0.3)] {
            let grid = Grid::new("f", lx, ly, res, 0.0, 0.0).unwrap();
            let cols = (lx / res).round() as usize;
            let rows = (ly / res).round() as usize;
            for kind in LayerKind::ALL {
                assert_eq!(grid.layer(kind).dims(), (rows, cols));
            }
        }
    }

    #[test]
    fn invalid_geometry_is_a_configuration_error() {
        assert!(matches!(
            Grid::new("f", 10.0, 10.0, 0.0, 0.0, 0.0),
            Err(GridError::Configuration(_))
        ));
        assert!(matches!(
            Grid::new("f", -1.0, 10.0, 0.1, 0.0, 0.0),
            Err(GridError::Configuration(_))
        ));
    }

    #[test]
    fn set_layer_rejects_mismatched_dims() {
        let mut grid = Grid::new("f", 4.0, 2.0, 1.0, 0.0, 0.0).unwrap();
        let wrong = CostLayer::new(4, 2, 1.0);
        assert!(matches!(
            grid.set_layer(LayerKind::Objects, wrong),
            Err(GridError::DimensionMismatch { .. })
        ));

        let right = CostLayer::new(2, 4, 1.0);
        grid.set_layer(LayerKind::Objects, right.clone()).unwrap();
        assert_eq!(grid.layer(LayerKind::Objects), &right);
        assert_eq!(grid.layer(LayerKind::Waypoint).count(NEUTRAL_COST), 8);
    }

    #[test]
    fn layer_set_ignores_out_of_range() {
        let mut layer = CostLayer::new(2, 2, 0.0);
        assert!(layer.set(1, 1, 2.0));
        assert!(!layer.set(2, 0, 2.0));
        assert_eq!(layer.get(1, 1), Some(2.0));
        assert_eq!(layer.get(0, 2), None);
    }

    #[test]
    fn from_vec_checks_length() {
        assert!(CostLayer::from_vec(2, 2, vec![0.0; 4]).is_ok());
        assert!(CostLayer::from_vec(2, 2, vec![0.0; 3]).is_err());
    }

    #[test]
    fn snapshot_contains_every_layer() {
        let mut grid = Grid::new("velodyne", 2.0, 2.0, 1.0, 0.0, 0.0).unwrap();
        grid.layer_mut(LayerKind::Combined).set(0, 1, 3.0);
        let snap = grid.snapshot(Utc::now());
        assert_eq!(snap.layers.len(), LayerKind::ALL.len());
        assert_eq!(snap.geometry.frame_id, "velodyne");
        assert_eq!(snap.value(LayerKind::Combined, 0, 1), Some(3.0));
    }

    #[test]
    fn cost_range_follows_config() {
        let cfg = GridConfig {
            grid_min_value: -1.0,
            grid_max_value: 10.0,
            ..GridConfig::default()
        };
        assert_eq!(CostRange::from_config(&cfg), CostRange::new(-1.0, 10.0));
        assert_eq!(CostRange::from_config(&GridConfig::default()), CostRange::default());
    }
}
