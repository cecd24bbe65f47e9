//! `gridfuse-runtime` – the costmap controller and its plumbing.
//!
//! # Modules
//!
//! - [`pipeline`] – [`CostmapPipeline`][pipeline::CostmapPipeline]: owns the
//!   grid, dispatches each input event to the stages it affects, refreshes
//!   the vector map, fuses, and returns a snapshot.  Snapshots leave through
//!   the [`GridPublisher`][pipeline::GridPublisher] seam.
//! - [`area`] – [`StaticAreaCache`][area::StaticAreaCache] and the
//!   [`AreaLoader`][area::AreaLoader] trait: lazily loaded road-area
//!   polygons kept for the process lifetime.
//! - [`driver`] – [`PipelineDriver`][driver::PipelineDriver]: serialises
//!   events from direct submitters or the bus merged input stream through
//!   one queue into the pipeline, and hands every costmap to a publisher.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export
//!   to Jaeger, Grafana Tempo, or any OTLP-compatible collector.

pub mod area;
pub mod driver;
pub mod pipeline;
pub mod telemetry;

pub use area::{AreaLoader, NoAreas, StaticAreaCache};
pub use driver::{BusPublisher, DriverHandle, DriverInput, DriverStats, PipelineDriver};
pub use pipeline::{CostmapPipeline, GridPublisher};
pub use telemetry::{init_tracing, TracerProviderGuard};
