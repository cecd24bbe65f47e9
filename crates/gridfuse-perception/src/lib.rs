//! `gridfuse-perception` – the cost-grid fusion engine.
//!
//! Turns raw perception and map data into the layered cost grid that motion
//! planning reads to decide where the vehicle may drive.
//!
//! # Modules
//!
//! - [`grid`] – [`Grid`][grid::Grid]: fixed-geometry stack of named
//!   [`CostLayer`][grid::CostLayer]s sharing one frame, origin and resolution.
//! - [`transform`] – [`TfEngine`][transform::TfEngine] and
//!   [`TfBuffer`][transform::TfBuffer]: resolve rigid transforms between
//!   named frames, with a bounded wait for late data.
//! - [`points`] – [`PointRasterizer`][points::PointRasterizer]: bins a point
//!   cloud into a height-filtered occupancy layer.
//! - [`objects`] – [`ObjectRasterizer`][objects::ObjectRasterizer]: stamps
//!   detected-object footprints.
//! - [`polygon`] – [`PolygonRasterizer`][polygon::PolygonRasterizer]: fills
//!   road-area polygons from the map frame into the grid.
//! - [`fusion`] – [`FusionStage`][fusion::FusionStage]: pointwise-max
//!   reduction of a set of layers into the combined layer.

pub mod fusion;
pub mod grid;
pub mod objects;
pub mod points;
pub mod polygon;
pub mod transform;

pub use fusion::FusionStage;
pub use grid::{CostLayer, CostRange, Grid, NEUTRAL_COST};
pub use objects::ObjectRasterizer;
pub use points::{PointRasterStats, PointRasterizer};
pub use polygon::{PolygonCells, PolygonRasterizer};
pub use transform::{TfBuffer, TfEngine, Transform3D, TransformLookup};
