//! `gridfuse-types` – shared data model for the gridfuse workspace.
//!
//! Everything that crosses a crate boundary lives here: sensor inputs, the
//! closed set of cost layers, grid geometry, emitted snapshots, the event
//! envelope routed over the bus, the runtime configuration and the global
//! [`GridError`].

pub mod config;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use config::GridConfig;

// ────────────────────────────────────────────────────────────────────────────
// Geometry primitives
// ────────────────────────────────────────────────────────────────────────────

/// A point in 3-D space (metres).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// A point on the ground plane (metres).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// A closed polygon.  The last vertex connects back to the first; the
/// closing vertex must not be repeated.
///
/// Vertices keep their `z` so that the polygon can be carried through a full
/// 3-D frame transform before being flattened onto the grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub vertices: Vec<Point3>,
}

impl Polygon {
    pub fn new(vertices: Vec<Point3>) -> Self {
        Self { vertices }
    }

    /// Build a flat polygon (z = 0) from ground-plane coordinates.
    pub fn from_xy(points: &[(f32, f32)]) -> Self {
        Self::new(points.iter().map(|&(x, y)| Point3::new(x, y, 0.0)).collect())
    }

    /// Ground-plane projection of the vertices.
    pub fn to_2d(&self) -> Vec<Point2> {
        self.vertices.iter().map(|p| Point2::new(p.x, p.y)).collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sensor inputs
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D point cloud expressed in the grid's working frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    pub frame_id: String,
    pub stamp: DateTime<Utc>,
    pub points: Vec<Point3>,
}

/// Planar pose: position plus heading measured counter-clockwise from +X.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    pub x: f32,
    pub y: f32,
    pub yaw: f32,
}

/// Bounding-box extents of a detected object (metres).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Extent along the object's heading.
    pub length: f32,
    /// Extent across the object's heading.
    pub width: f32,
    pub height: f32,
}

/// One object reported by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub id: u32,
    /// Classification label, e.g. `"car"` or `"pedestrian"`.
    #[serde(default)]
    pub label: String,
    pub pose: Pose2D,
    pub dimensions: Dimensions,
    /// Optional footprint hull in the working frame.  When it holds fewer
    /// than three points the oriented box from `pose` and `dimensions` is
    /// used instead.
    #[serde(default)]
    pub convex_hull: Vec<Point2>,
}

/// A batch of detected objects delivered together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectList {
    pub frame_id: String,
    pub stamp: DateTime<Utc>,
    pub objects: Vec<DetectedObject>,
}

/// One point of a planned path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub yaw: f32,
    /// Target velocity at this waypoint (m/s).
    pub velocity: f32,
}

/// A planned path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaypointList {
    pub stamp: DateTime<Utc>,
    pub waypoints: Vec<Waypoint>,
}

// ────────────────────────────────────────────────────────────────────────────
// Layers
// ────────────────────────────────────────────────────────────────────────────

/// The closed set of cost layers every grid carries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Height-filtered occupancy from the raw point cloud.
    SensorPoints,
    /// Static drivable-area polygons from the vector map.
    Vectormap,
    /// Planned path (reserved; never recomputed).
    Waypoint,
    /// Detected-object footprints.
    Objects,
    /// Fused output.
    Combined,
}

impl LayerKind {
    /// Every layer, in storage order.
    pub const ALL: [LayerKind; 5] = [
        LayerKind::SensorPoints,
        LayerKind::Vectormap,
        LayerKind::Waypoint,
        LayerKind::Objects,
        LayerKind::Combined,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LayerKind::SensorPoints => "sensor_points",
            LayerKind::Vectormap => "vectormap",
            LayerKind::Waypoint => "waypoint",
            LayerKind::Objects => "objects",
            LayerKind::Combined => "combined",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerKind {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LayerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| GridError::Configuration(format!("unknown layer name '{s}'")))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Grid geometry
// ────────────────────────────────────────────────────────────────────────────

/// Upper bound on cells per layer (64 MiB of `f32` per layer).
pub const MAX_GRID_CELLS: usize = 1 << 24;

/// Fixed geometry shared by every layer of a grid.
///
/// `origin_x`/`origin_y` locate the grid centre in `frame_id`.  Cell
/// `(row, col)` covers the half-open square starting at
/// `origin_low + (col, row) * resolution`; rows run along y, columns along x.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub frame_id: String,
    pub resolution: f32,
    pub origin_x: f32,
    pub origin_y: f32,
    pub rows: usize,
    pub cols: usize,
}

impl GridGeometry {
    /// Derive the cell counts from a physical size.
    ///
    /// `cols = round(length_x / resolution)`, `rows = round(length_y /
    /// resolution)`.  Geometry that yields an empty grid is rejected.
    pub fn from_lengths(
        frame_id: impl Into<String>,
        length_x: f32,
        length_y: f32,
        resolution: f32,
        origin_x: f32,
        origin_y: f32,
    ) -> Result<Self, GridError> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(GridError::Configuration(format!(
                "grid resolution must be positive, got {resolution}"
            )));
        }
        for (name, length) in [("length_x", length_x), ("length_y", length_y)] {
            if !(length.is_finite() && length > 0.0) {
                return Err(GridError::Configuration(format!(
                    "grid {name} must be positive, got {length}"
                )));
            }
        }
        if !(origin_x.is_finite() && origin_y.is_finite()) {
            return Err(GridError::Configuration(
                "grid origin must be finite".to_string(),
            ));
        }

        let cols = (f64::from(length_x) / f64::from(resolution)).round();
        let rows = (f64::from(length_y) / f64::from(resolution)).round();
        if rows < 1.0 || cols < 1.0 {
            return Err(GridError::Configuration(format!(
                "grid of {length_x} x {length_y} m at {resolution} m/cell has no cells"
            )));
        }
        if rows * cols > MAX_GRID_CELLS as f64 {
            return Err(GridError::Configuration(format!(
                "grid of {length_x} x {length_y} m at {resolution} m/cell exceeds \
                 {MAX_GRID_CELLS} cells per layer"
            )));
        }
        let (rows, cols) = (rows as usize, cols as usize);

        Ok(Self {
            frame_id: frame_id.into(),
            resolution,
            origin_x,
            origin_y,
            rows,
            cols,
        })
    }

    /// Number of cells per layer.
    pub fn len(&self) -> usize {
        self.rows.saturating_mul(self.cols)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Effective extent along x (`cols * resolution`).
    pub fn length_x(&self) -> f32 {
        self.cols as f32 * self.resolution
    }

    /// Effective extent along y (`rows * resolution`).
    pub fn length_y(&self) -> f32 {
        self.rows as f32 * self.resolution
    }

    /// Lower-left corner of the grid.
    pub fn origin_low(&self) -> Point2 {
        Point2::new(
            self.origin_x - self.length_x() * 0.5,
            self.origin_y - self.length_y() * 0.5,
        )
    }

    /// Cell containing `(x, y)`, or `None` outside the grid.
    pub fn cell_at(&self, x: f32, y: f32) -> Option<(usize, usize)> {
        let low = self.origin_low();
        let col = ((x - low.x) / self.resolution).floor();
        let row = ((y - low.y) / self.resolution).floor();
        // NaN fails both comparisons.
        if !(col >= 0.0 && row >= 0.0) {
            return None;
        }
        let (row, col) = (row as usize, col as usize);
        (row < self.rows && col < self.cols).then_some((row, col))
    }

    /// Centre of cell `(row, col)`.
    pub fn cell_centre(&self, row: usize, col: usize) -> Point2 {
        let low = self.origin_low();
        Point2::new(
            low.x + (col as f32 + 0.5) * self.resolution,
            low.y + (row as f32 + 0.5) * self.resolution,
        )
    }

    /// Row-major index of `(row, col)`.
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }
}

/// Immutable copy of a grid handed to the publishing collaborator after each
/// recompute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSnapshot {
    pub id: Uuid,
    pub stamp: DateTime<Utc>,
    pub geometry: GridGeometry,
    /// Row-major cost arrays, one per layer.
    pub layers: BTreeMap<LayerKind, Vec<f32>>,
}

impl GridSnapshot {
    pub fn layer(&self, kind: LayerKind) -> Option<&[f32]> {
        self.layers.get(&kind).map(Vec::as_slice)
    }

    /// Cost of `(row, col)` in `kind`, if both exist.
    pub fn value(&self, kind: LayerKind, row: usize, col: usize) -> Option<f32> {
        if row >= self.geometry.rows || col >= self.geometry.cols {
            return None;
        }
        self.layer(kind)?.get(self.geometry.index(row, col)).copied()
    }

    /// Flatten a layer into cell-centre points whose `z` carries the cost.
    ///
    /// This is the cost-cloud form downstream visualisers consume.
    pub fn layer_points(&self, kind: LayerKind) -> Vec<Point3> {
        let Some(data) = self.layer(kind) else {
            return Vec::new();
        };
        let g = &self.geometry;
        (0..g.rows)
            .flat_map(|row| (0..g.cols).map(move |col| (row, col)))
            .map(|(row, col)| {
                let c = g.cell_centre(row, col);
                Point3::new(c.x, c.y, data[g.index(row, col)])
            })
            .collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Events
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper routed over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "gridfuse-cli::replay"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a fresh envelope stamped now.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    PointCloud(PointCloud),
    ObjectList(ObjectList),
    WaypointList(WaypointList),
    /// A fused grid emitted by the pipeline.
    Costmap(GridSnapshot),
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type for configuration, frame lookup and plumbing failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GridError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Transform {source_frame} -> {target_frame} unavailable: {reason}")]
    TransformUnavailable {
        target_frame: String,
        source_frame: String,
        reason: String,
    },

    #[error("Layer dimension mismatch: expected {expected:?}, found {found:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Area load failed: {0}")]
    AreaLoad(String),

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> GridGeometry {
        GridGeometry::from_lengths("velodyne", 30.0, 50.0, 0.2, 0.0, 20.0).unwrap()
    }

    #[test]
    fn geometry_rounds_cell_counts() {
        let g = geometry();
        assert_eq!(g.cols, 150);
        assert_eq!(g.rows, 250);
        assert_eq!(g.len(), 150 * 250);

        let odd = GridGeometry::from_lengths("f", 10.3, 10.0, 1.0, 0.0, 0.0).unwrap();
        assert_eq!(odd.cols, 10);
        let up = GridGeometry::from_lengths("f", 10.6, 10.0, 1.0, 0.0, 0.0).unwrap();
        assert_eq!(up.cols, 11);
    }

    #[test]
    fn geometry_rejects_invalid_values() {
        assert!(GridGeometry::from_lengths("f", 10.0, 10.0, 0.0, 0.0, 0.0).is_err());
        assert!(GridGeometry::from_lengths("f", 10.0, 10.0, -1.0, 0.0, 0.0).is_err());
        assert!(GridGeometry::from_lengths("f", 0.0, 10.0, 1.0, 0.0, 0.0).is_err());
        assert!(GridGeometry::from_lengths("f", 10.0, f32::NAN, 1.0, 0.0, 0.0).is_err());
        assert!(GridGeometry::from_lengths("f", 0.2, 10.0, 1.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn geometry_rejects_oversized_grids() {
        let huge = GridGeometry::from_lengths("f", 1e9, 1e9, 1e-3, 0.0, 0.0);
        assert!(matches!(huge, Err(GridError::Configuration(_))));

        let tiny_cells = GridGeometry::from_lengths("f", 30.0, 50.0, f32::MIN_POSITIVE, 0.0, 0.0);
        assert!(matches!(tiny_cells, Err(GridError::Configuration(_))));

        let edge = GridGeometry::from_lengths("f", 4096.0, 4096.0, 1.0, 0.0, 0.0).unwrap();
        assert_eq!(edge.len(), MAX_GRID_CELLS);
        assert!(GridGeometry::from_lengths("f", 4097.0, 4096.0, 1.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn cell_at_maps_corners_and_rejects_outside() {
        let g = GridGeometry::from_lengths("f", 10.0, 10.0, 1.0, 0.0, 0.0).unwrap();
        assert_eq!(g.cell_at(-5.0, -5.0), Some((0, 0)));
        assert_eq!(g.cell_at(4.99, 4.99), Some((9, 9)));
        assert_eq!(g.cell_at(0.5, -0.5), Some((4, 5)));
        assert_eq!(g.cell_at(5.0, 0.0), None);
        assert_eq!(g.cell_at(-5.01, 0.0), None);
        assert_eq!(g.cell_at(f32::NAN, 0.0), None);
    }

    #[test]
    fn cell_centre_is_inverse_of_cell_at() {
        let g = geometry();
        let c = g.cell_centre(17, 42);
        assert_eq!(g.cell_at(c.x, c.y), Some((17, 42)));
    }

    #[test]
    fn layer_kind_parses_and_displays() {
        for kind in LayerKind::ALL {
            assert_eq!(kind.as_str().parse::<LayerKind>().unwrap(), kind);
            assert_eq!(kind.to_string(), kind.as_str());
        }
        assert!(matches!(
            "costmap".parse::<LayerKind>(),
            Err(GridError::Configuration(_))
        ));
    }

    #[test]
    fn layer_kind_serde_uses_snake_case() {
        let json = serde_json::to_string(&LayerKind::SensorPoints).unwrap();
        assert_eq!(json, "\"sensor_points\"");
    }

    #[test]
    fn snapshot_layer_points_carry_cost_in_z() {
        let g = GridGeometry::from_lengths("f", 2.0, 1.0, 1.0, 0.0, 0.0).unwrap();
        let mut layers = BTreeMap::new();
        layers.insert(LayerKind::Combined, vec![0.0, 3.0]);
        let snapshot = GridSnapshot {
            id: Uuid::new_v4(),
            stamp: Utc::now(),
            geometry: g,
            layers,
        };

        let points = snapshot.layer_points(LayerKind::Combined);
        assert_eq!(points.len(), 2);
        assert!((points[1].x - 0.5).abs() < 1e-6);
        assert!((points[1].y - 0.0).abs() < 1e-6);
        assert_eq!(points[1].z, 3.0);
        assert!(snapshot.layer_points(LayerKind::Objects).is_empty());
        assert_eq!(snapshot.value(LayerKind::Combined, 0, 1), Some(3.0));
        assert_eq!(snapshot.value(LayerKind::Combined, 1, 0), None);
    }

    #[test]
    fn snapshot_json_roundtrip_keeps_layer_keys() {
        let g = GridGeometry::from_lengths("f", 1.0, 1.0, 1.0, 0.0, 0.0).unwrap();
        let mut layers = BTreeMap::new();
        layers.insert(LayerKind::Vectormap, vec![3.0]);
        let snapshot = GridSnapshot {
            id: Uuid::new_v4(),
            stamp: Utc::now(),
            geometry: g,
            layers,
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"vectormap\""));
        let back: GridSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn event_payload_is_tagged() {
        let event = Event::new(
            "gridfuse-cli::replay",
            EventPayload::WaypointList(WaypointList {
                stamp: Utc::now(),
                waypoints: vec![],
            }),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"waypoint_list\""));
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        assert!(matches!(back.payload, EventPayload::WaypointList(_)));
    }

    #[test]
    fn grid_error_display() {
        let err = GridError::TransformUnavailable {
            target_frame: "velodyne".to_string(),
            source_frame: "map".to_string(),
            reason: "timed out".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("map -> velodyne"));
        assert!(text.contains("timed out"));
    }
}
