//! [`CostmapPipeline`] – the grid lifecycle controller.
//!
//! Owns one [`Grid`] and every stage that writes into it.  Each input event
//! is dispatched on its payload variant:
//!
//! 1. **Point cloud** – rebuild `sensor_points`.
//! 2. **Object list** – rebuild `objects` (only when `use_objects` is set).
//! 3. **Waypoint list** – no-op; nothing is recomputed or emitted.
//!
//! After a point or object update the controller refreshes `vectormap` from
//! the [`StaticAreaCache`] and recomputes `combined` with the
//! [`FusionStage`], then returns a [`GridSnapshot`] for the caller to hand to
//! a [`GridPublisher`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use chrono::Utc;
//! use gridfuse_perception::TfEngine;
//! use gridfuse_runtime::area::NoAreas;
//! use gridfuse_runtime::pipeline::CostmapPipeline;
//! use gridfuse_types::{EventPayload, GridConfig, LayerKind, Point3, PointCloud};
//!
//! let mut pipeline =
//!     CostmapPipeline::new(GridConfig::default(), Arc::new(TfEngine::new()), Box::new(NoAreas))
//!         .unwrap();
//!
//! let cloud = PointCloud {
//!     frame_id: "velodyne".to_string(),
//!     stamp: Utc::now(),
//!     points: vec![Point3::new(1.0, 20.0, 1.0)],
//! };
//! let snapshot = pipeline.handle(&EventPayload::PointCloud(cloud)).unwrap().unwrap();
//! assert_eq!(snapshot.layer(LayerKind::Combined).unwrap().iter().filter(|&&c| c == 3.0).count(), 1);
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use gridfuse_perception::{
    CostRange, FusionStage, Grid, ObjectRasterizer, PointRasterizer, PolygonRasterizer,
    TransformLookup,
};
use gridfuse_types::{
    EventPayload, GridConfig, GridError, GridSnapshot, LayerKind, ObjectList, PointCloud,
    WaypointList,
};
use tracing::{debug, info, instrument, trace, warn};

use crate::area::{AreaLoader, StaticAreaCache};

// ─────────────────────────────────────────────────────────────────────────────
// Publisher seam
// ─────────────────────────────────────────────────────────────────────────────

/// Receives every snapshot the pipeline emits.
pub trait GridPublisher: Send {
    fn publish(&mut self, snapshot: &GridSnapshot) -> Result<(), GridError>;
}

/// Collects snapshots in memory.
impl GridPublisher for Vec<GridSnapshot> {
    fn publish(&mut self, snapshot: &GridSnapshot) -> Result<(), GridError> {
        self.push(snapshot.clone());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CostmapPipeline
// ─────────────────────────────────────────────────────────────────────────────

/// The single owner of the grid and of every stage that writes into it.
///
/// Not shared across tasks: events are handled one at a time in the order
/// [`handle`][Self::handle] is called.
pub struct CostmapPipeline {
    config: GridConfig,
    grid: Grid,
    points: PointRasterizer,
    objects: ObjectRasterizer,
    areas: PolygonRasterizer,
    fusion: FusionStage,
    area_cache: StaticAreaCache,
    loader: Box<dyn AreaLoader>,
    tf: Arc<dyn TransformLookup + Send + Sync>,
}

impl CostmapPipeline {
    /// Validate `config` and allocate the grid.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Configuration`] for invalid geometry, cost range
    /// or fusion layer set.
    pub fn new(
        config: GridConfig,
        tf: Arc<dyn TransformLookup + Send + Sync>,
        loader: Box<dyn AreaLoader>,
    ) -> Result<Self, GridError> {
        config.validate()?;
        let grid = Grid::from_config(&config)?;
        let range = CostRange::from_config(&config);

        let points = PointRasterizer::new(config.sensor_points_height_threshold, range);
        let objects = ObjectRasterizer::new(range, config.objects_expand_size);
        let areas = PolygonRasterizer::new(range.min, range.max, config.transform_timeout());
        let fusion = FusionStage::new(&config.fusion_layers)?;

        info!(
            frame = %config.working_frame,
            rows = grid.rows(),
            cols = grid.cols(),
            resolution = config.grid_resolution,
            fusion = ?fusion.inputs(),
            "costmap pipeline initialised"
        );

        Ok(Self {
            config,
            grid,
            points,
            objects,
            areas,
            fusion,
            area_cache: StaticAreaCache::new(),
            loader,
            tf,
        })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// `true` once the static area polygons have been loaded.
    pub fn static_area_loaded(&self) -> bool {
        self.area_cache.is_loaded()
    }

    /// Dispatch one input event.
    ///
    /// Returns `Ok(None)` when the event does not trigger a recompute
    /// (waypoints, disabled object input, or an output snapshot fed back in).
    ///
    /// # Errors
    ///
    /// Only [`GridError::AreaLoad`] from the static area loader is returned;
    /// an unavailable transform is logged and the previous vector-map layer
    /// is kept.
    #[instrument(skip_all, fields(kind = payload_kind(payload)))]
    pub fn handle(&mut self, payload: &EventPayload) -> Result<Option<GridSnapshot>, GridError> {
        match payload {
            EventPayload::PointCloud(cloud) => self.on_points(cloud).map(Some),
            EventPayload::ObjectList(list) => self.on_objects(list),
            EventPayload::WaypointList(list) => {
                self.on_waypoints(list);
                Ok(None)
            }
            EventPayload::Costmap(_) => {
                trace!("ignoring costmap payload on input path");
                Ok(None)
            }
        }
    }

    fn on_points(&mut self, cloud: &PointCloud) -> Result<GridSnapshot, GridError> {
        if cloud.frame_id != self.config.working_frame {
            debug!(
                cloud_frame = %cloud.frame_id,
                working_frame = %self.config.working_frame,
                "point cloud frame differs from working frame; using points as-is"
            );
        }
        self.points.rasterize(&mut self.grid, &cloud.points);
        self.finish(cloud.stamp)
    }

    fn on_objects(&mut self, list: &ObjectList) -> Result<Option<GridSnapshot>, GridError> {
        if !self.config.use_objects {
            debug!(objects = list.objects.len(), "object input disabled; event ignored");
            return Ok(None);
        }
        self.objects.rasterize(&mut self.grid, &list.objects);
        self.finish(list.stamp).map(Some)
    }

    fn on_waypoints(&self, list: &WaypointList) {
        trace!(
            waypoints = list.waypoints.len(),
            enabled = self.config.use_waypoints,
            "waypoint input does not affect the grid"
        );
    }

    /// Refresh the vector map, fuse, and snapshot.
    fn finish(&mut self, stamp: DateTime<Utc>) -> Result<GridSnapshot, GridError> {
        if self.config.use_static_area {
            self.refresh_vectormap()?;
        }
        self.fusion.apply(&mut self.grid)?;
        Ok(self.grid.snapshot(stamp))
    }

    fn refresh_vectormap(&mut self) -> Result<(), GridError> {
        let Some(polygons) = self.area_cache.ensure_loaded(self.loader.as_mut())? else {
            return Ok(());
        };
        match self.areas.rasterize(
            &mut self.grid,
            LayerKind::Vectormap,
            polygons,
            &self.config.map_frame,
            self.tf.as_ref(),
            None,
        ) {
            Ok(_) => Ok(()),
            Err(e @ GridError::TransformUnavailable { .. }) => {
                warn!(error = %e, "vector map not refreshed; keeping previous layer");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn payload_kind(payload: &EventPayload) -> &'static str {
    match payload {
        EventPayload::PointCloud(_) => "point_cloud",
        EventPayload::ObjectList(_) => "object_list",
        EventPayload::WaypointList(_) => "waypoint_list",
        EventPayload::Costmap(_) => "costmap",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::NoAreas;
    use gridfuse_perception::{TfEngine, Transform3D};
    use gridfuse_types::{
        DetectedObject, Dimensions, Point3, Polygon, Pose2D, Waypoint,
    };
    use std::sync::Mutex;

    fn cloud(points: Vec<Point3>) -> EventPayload {
        EventPayload::PointCloud(PointCloud {
            frame_id: "velodyne".to_string(),
            stamp: Utc::now(),
            points,
        })
    }

    fn objects(objects: Vec<DetectedObject>) -> EventPayload {
        EventPayload::ObjectList(ObjectList {
            frame_id: "velodyne".to_string(),
            stamp: Utc::now(),
            objects,
        })
    }

    fn car(x: f32, y: f32) -> DetectedObject {
        DetectedObject {
            id: 7,
            label: "car".to_string(),
            pose: Pose2D { x, y, yaw: 0.0 },
            dimensions: Dimensions {
                length: 4.0,
                width: 2.0,
                height: 1.5,
            },
            convex_hull: Vec::new(),
        }
    }

    fn static_tf() -> Arc<TfEngine> {
        let mut tf = TfEngine::new();
        tf.set_static_transform("velodyne", "map", Transform3D::identity());
        Arc::new(tf)
    }

    /// A 10 m square road area around the grid centre.
    fn road_loader() -> Box<dyn AreaLoader> {
        Box::new(|| -> Result<Vec<Polygon>, GridError> {
            Ok(vec![Polygon::from_xy(&[
                (-5.0, 15.0),
                (5.0, 15.0),
                (5.0, 25.0),
                (-5.0, 25.0),
            ])])
        })
    }

    fn value(snapshot: &GridSnapshot, kind: LayerKind, x: f32, y: f32) -> f32 {
        let (row, col) = snapshot.geometry.cell_at(x, y).unwrap();
        snapshot.value(kind, row, col).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let config = GridConfig {
            grid_min_value: 3.0,
            grid_max_value: 0.0,
            ..GridConfig::default()
        };
        assert!(matches!(
            CostmapPipeline::new(config, static_tf(), Box::new(NoAreas)),
            Err(GridError::Configuration(_))
        ));
    }

    #[test]
    fn default_scenario_high_point_elevates_combined() {
        let mut pipeline =
            CostmapPipeline::new(GridConfig::default(), static_tf(), Box::new(NoAreas)).unwrap();
        assert_eq!((pipeline.grid().rows(), pipeline.grid().cols()), (250, 150));

        let snapshot = pipeline
            .handle(&cloud(vec![Point3::new(1.0, 20.0, 1.0), Point3::new(-3.0, 10.0, 0.1)]))
            .unwrap()
            .unwrap();

        assert_eq!(value(&snapshot, LayerKind::SensorPoints, 1.0, 20.0), 3.0);
        assert_eq!(value(&snapshot, LayerKind::Combined, 1.0, 20.0), 3.0);
        // Low point filtered out.
        assert_eq!(value(&snapshot, LayerKind::SensorPoints, -3.0, 10.0), 0.0);
        // Loader has nothing yet.
        assert!(snapshot.layer(LayerKind::Vectormap).unwrap().iter().all(|&c| c == 0.0));
        assert!(!pipeline.static_area_loaded());
    }

    #[test]
    fn combined_is_max_of_points_and_vectormap() {
        let mut pipeline =
            CostmapPipeline::new(GridConfig::default(), static_tf(), road_loader()).unwrap();
        let snapshot = pipeline
            .handle(&cloud(vec![Point3::new(1.0, 20.0, 1.0)]))
            .unwrap()
            .unwrap();
        assert!(pipeline.static_area_loaded());

        // Inside the road: drivable unless a point is there.
        assert_eq!(value(&snapshot, LayerKind::Vectormap, 0.0, 18.0), 0.0);
        assert_eq!(value(&snapshot, LayerKind::Combined, 0.0, 18.0), 0.0);
        assert_eq!(value(&snapshot, LayerKind::Combined, 1.0, 20.0), 3.0);
        // Off the road: vector map dominates.
        assert_eq!(value(&snapshot, LayerKind::Vectormap, 10.0, 40.0), 3.0);
        assert_eq!(value(&snapshot, LayerKind::Combined, 10.0, 40.0), 3.0);

        let points = snapshot.layer(LayerKind::SensorPoints).unwrap();
        let map = snapshot.layer(LayerKind::Vectormap).unwrap();
        let combined = snapshot.layer(LayerKind::Combined).unwrap();
        for i in 0..combined.len() {
            assert_eq!(combined[i], points[i].max(map[i]));
        }
    }

    #[test]
    fn static_area_disabled_leaves_vectormap_neutral() {
        let config = GridConfig {
            use_static_area: false,
            ..GridConfig::default()
        };
        let mut pipeline = CostmapPipeline::new(config, static_tf(), road_loader()).unwrap();
        let snapshot = pipeline.handle(&cloud(vec![])).unwrap().unwrap();
        assert!(snapshot.layer(LayerKind::Vectormap).unwrap().iter().all(|&c| c == 0.0));
        assert!(!pipeline.static_area_loaded());
    }

    #[test]
    fn missing_transform_keeps_previous_vectormap() {
        let tf = Arc::new(Mutex::new(Some(Transform3D::identity())));

        struct Switchable(Arc<Mutex<Option<Transform3D>>>);
        impl TransformLookup for Switchable {
            fn lookup_transform(
                &self,
                target_frame: &str,
                source_frame: &str,
                _stamp: Option<DateTime<Utc>>,
                _timeout: std::time::Duration,
            ) -> Result<Transform3D, GridError> {
                (*self.0.lock().unwrap()).ok_or_else(|| GridError::TransformUnavailable {
                    target_frame: target_frame.to_string(),
                    source_frame: source_frame.to_string(),
                    reason: "switched off".to_string(),
                })
            }
        }

        let mut pipeline = CostmapPipeline::new(
            GridConfig::default(),
            Arc::new(Switchable(Arc::clone(&tf))),
            road_loader(),
        )
        .unwrap();
        let first = pipeline.handle(&cloud(vec![])).unwrap().unwrap();

        *tf.lock().unwrap() = None;
        let second = pipeline
            .handle(&cloud(vec![Point3::new(1.0, 20.0, 1.0)]))
            .unwrap()
            .expect("event still emits");

        assert_eq!(
            first.layer(LayerKind::Vectormap),
            second.layer(LayerKind::Vectormap)
        );
        assert_eq!(value(&second, LayerKind::Combined, 1.0, 20.0), 3.0);
    }

    #[test]
    fn first_transform_failure_leaves_neutral_vectormap() {
        let mut pipeline =
            CostmapPipeline::new(GridConfig::default(), Arc::new(TfEngine::new()), road_loader())
                .unwrap();
        let snapshot = pipeline.handle(&cloud(vec![])).unwrap().unwrap();
        assert!(snapshot.layer(LayerKind::Vectormap).unwrap().iter().all(|&c| c == 0.0));
    }

    #[test]
    fn area_load_error_propagates() {
        let loader = Box::new(|| -> Result<Vec<Polygon>, GridError> {
            Err(GridError::AreaLoad("corrupt map".to_string()))
        });
        let mut pipeline =
            CostmapPipeline::new(GridConfig::default(), static_tf(), loader).unwrap();
        assert!(matches!(
            pipeline.handle(&cloud(vec![])),
            Err(GridError::AreaLoad(_))
        ));
    }

    #[test]
    fn objects_ignored_when_disabled() {
        let mut pipeline =
            CostmapPipeline::new(GridConfig::default(), static_tf(), Box::new(NoAreas)).unwrap();
        assert!(pipeline.handle(&objects(vec![car(0.0, 20.0)])).unwrap().is_none());
        assert_eq!(pipeline.grid().layer(LayerKind::Objects).count(3.0), 0);
    }

    #[test]
    fn objects_rasterized_when_enabled() {
        let config = GridConfig {
            use_objects: true,
            fusion_layers: vec![LayerKind::SensorPoints, LayerKind::Vectormap, LayerKind::Objects],
            ..GridConfig::default()
        };
        let mut pipeline = CostmapPipeline::new(config, static_tf(), Box::new(NoAreas)).unwrap();
        let snapshot = pipeline.handle(&objects(vec![car(0.0, 20.0)])).unwrap().unwrap();

        // 4 m × 2 m at 0.2 m → 20 × 10 cells.
        let stamped = snapshot
            .layer(LayerKind::Objects)
            .unwrap()
            .iter()
            .filter(|&&c| c == 3.0)
            .count();
        assert_eq!(stamped, 200);
        assert_eq!(value(&snapshot, LayerKind::Combined, 0.5, 20.5), 3.0);
    }

    #[test]
    fn objects_excluded_from_default_fusion() {
        let config = GridConfig {
            use_objects: true,
            ..GridConfig::default()
        };
        let mut pipeline = CostmapPipeline::new(config, static_tf(), Box::new(NoAreas)).unwrap();
        let snapshot = pipeline.handle(&objects(vec![car(0.0, 20.0)])).unwrap().unwrap();
        assert_eq!(value(&snapshot, LayerKind::Objects, 0.5, 20.5), 3.0);
        assert_eq!(value(&snapshot, LayerKind::Combined, 0.5, 20.5), 0.0);
    }

    #[test]
    fn waypoints_are_a_no_op() {
        let mut pipeline =
            CostmapPipeline::new(GridConfig::default(), static_tf(), road_loader()).unwrap();
        let payload = EventPayload::WaypointList(WaypointList {
            stamp: Utc::now(),
            waypoints: vec![Waypoint {
                x: 0.0,
                y: 20.0,
                z: 0.0,
                yaw: 0.0,
                velocity: 5.0,
            }],
        });
        assert!(pipeline.handle(&payload).unwrap().is_none());
        assert!(!pipeline.static_area_loaded());
        assert_eq!(pipeline.grid().layer(LayerKind::Waypoint).count(0.0), 250 * 150);
    }

    #[test]
    fn snapshots_feed_publishers() {
        let mut pipeline =
            CostmapPipeline::new(GridConfig::default(), static_tf(), Box::new(NoAreas)).unwrap();
        let mut sink: Vec<GridSnapshot> = Vec::new();
        for _ in 0..3 {
            if let Some(snapshot) = pipeline.handle(&cloud(vec![])).unwrap() {
                sink.publish(&snapshot).unwrap();
            }
        }
        assert_eq!(sink.len(), 3);
        assert_eq!(sink[0].geometry.frame_id, "velodyne");
    }

    #[test]
    fn every_layer_stays_inside_the_cost_range() {
        let config = GridConfig {
            grid_min_value: 1.0,
            grid_max_value: 5.0,
            use_objects: true,
            ..GridConfig::default()
        };
        let mut pipeline = CostmapPipeline::new(config, static_tf(), road_loader()).unwrap();
        pipeline.handle(&objects(vec![car(3.0, 25.0)])).unwrap();
        let snapshot = pipeline
            .handle(&cloud(vec![Point3::new(1.0, 20.0, 1.0)]))
            .unwrap()
            .unwrap();

        for (kind, cells) in &snapshot.layers {
            assert!(
                cells.iter().all(|&c| (1.0..=5.0).contains(&c)),
                "{kind} wrote outside [1, 5]"
            );
        }
        assert_eq!(value(&snapshot, LayerKind::Combined, 1.0, 20.0), 5.0);
        assert_eq!(value(&snapshot, LayerKind::SensorPoints, -10.0, 40.0), 1.0);
    }
}
