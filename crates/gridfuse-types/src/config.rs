//! [`GridConfig`] – the fixed configuration surface read once at startup.
//!
//! Defaults reproduce the stock cost-map node: a 30 m × 50 m grid at
//! 0.2 m/cell attached to the `velodyne` frame and shifted 20 m forward,
//! costs in `[0, 3]`, and only the sensor-points and vector-map layers fused.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{GridError, GridGeometry, LayerKind};

/// Cost-grid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GridConfig {
    /// Frame the grid cells are defined in (moves with the sensor).
    #[serde(default = "default_working_frame")]
    pub working_frame: String,

    /// Static frame the road-area polygons are stored in.
    #[serde(default = "default_map_frame")]
    pub map_frame: String,

    /// Lowest cost any rasterizer may write (fully drivable).
    #[serde(default)]
    pub grid_min_value: f32,

    /// Highest cost any rasterizer may write (not drivable).
    #[serde(default = "default_grid_max_value")]
    pub grid_max_value: f32,

    /// Cell edge length in metres.
    #[serde(default = "default_grid_resolution")]
    pub grid_resolution: f32,

    #[serde(default = "default_grid_length_x")]
    pub grid_length_x: f32,

    #[serde(default = "default_grid_length_y")]
    pub grid_length_y: f32,

    /// Grid centre in the working frame.
    #[serde(default)]
    pub grid_position_x: f32,

    #[serde(default = "default_grid_position_y")]
    pub grid_position_y: f32,

    /// Points must be strictly higher than this to mark a cell occupied.
    /// Measured in the working frame, so it is negative when the sensor
    /// sits above the ground plane of interest.
    #[serde(default = "default_height_threshold")]
    pub sensor_points_height_threshold: f32,

    /// Fill the vector-map layer from the static road-area polygons.
    #[serde(default = "default_true")]
    pub use_static_area: bool,

    /// Accept waypoint events (they never trigger a recompute).
    #[serde(default = "default_true")]
    pub use_waypoints: bool,

    /// Accept detected-object events.
    #[serde(default)]
    pub use_objects: bool,

    /// Upper bound on how long a frame-transform lookup may block.
    #[serde(default = "default_transform_timeout_ms")]
    pub transform_timeout_ms: u64,

    /// Margin added around every object footprint (metres).
    #[serde(default)]
    pub objects_expand_size: f32,

    /// Layers reduced with pointwise max into the combined layer.
    #[serde(default = "default_fusion_layers")]
    pub fusion_layers: Vec<LayerKind>,
}

fn default_working_frame() -> String {
    "velodyne".to_string()
}
fn default_map_frame() -> String {
    "map".to_string()
}
fn default_grid_max_value() -> f32 {
    3.0
}
fn default_grid_resolution() -> f32 {
    0.2
}
fn default_grid_length_x() -> f32 {
    30.0
}
fn default_grid_length_y() -> f32 {
    50.0
}
fn default_grid_position_y() -> f32 {
    20.0
}
fn default_height_threshold() -> f32 {
    0.3
}
fn default_true() -> bool {
    true
}
fn default_transform_timeout_ms() -> u64 {
    1000
}
fn default_fusion_layers() -> Vec<LayerKind> {
    vec![LayerKind::SensorPoints, LayerKind::Vectormap]
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            working_frame: default_working_frame(),
            map_frame: default_map_frame(),
            grid_min_value: 0.0,
            grid_max_value: default_grid_max_value(),
            grid_resolution: default_grid_resolution(),
            grid_length_x: default_grid_length_x(),
            grid_length_y: default_grid_length_y(),
            grid_position_x: 0.0,
            grid_position_y: default_grid_position_y(),
            sensor_points_height_threshold: default_height_threshold(),
            use_static_area: true,
            use_waypoints: true,
            use_objects: false,
            transform_timeout_ms: default_transform_timeout_ms(),
            objects_expand_size: 0.0,
            fusion_layers: default_fusion_layers(),
        }
    }
}

impl GridConfig {
    /// Check every invariant the pipeline relies on.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Configuration`] describing the first violation.
    pub fn validate(&self) -> Result<(), GridError> {
        if self.working_frame.trim().is_empty() || self.map_frame.trim().is_empty() {
            return Err(GridError::Configuration(
                "frame names must not be empty".to_string(),
            ));
        }
        if !(self.grid_min_value.is_finite() && self.grid_max_value.is_finite()) {
            return Err(GridError::Configuration(
                "grid cost bounds must be finite".to_string(),
            ));
        }
        if self.grid_min_value >= self.grid_max_value {
            return Err(GridError::Configuration(format!(
                "grid_min_value ({}) must be below grid_max_value ({})",
                self.grid_min_value, self.grid_max_value
            )));
        }
        if !self.sensor_points_height_threshold.is_finite() {
            return Err(GridError::Configuration(
                "sensor_points_height_threshold must be finite".to_string(),
            ));
        }
        if !(self.objects_expand_size.is_finite() && self.objects_expand_size >= 0.0) {
            return Err(GridError::Configuration(format!(
                "objects_expand_size must be non-negative, got {}",
                self.objects_expand_size
            )));
        }
        if self.fusion_layers.is_empty() {
            return Err(GridError::Configuration(
                "fusion_layers must name at least one layer".to_string(),
            ));
        }
        if self.fusion_layers.contains(&LayerKind::Combined) {
            return Err(GridError::Configuration(
                "fusion_layers must not include the combined layer".to_string(),
            ));
        }
        self.geometry().map(|_| ())
    }

    /// Grid geometry described by this configuration.
    pub fn geometry(&self) -> Result<GridGeometry, GridError> {
        GridGeometry::from_lengths(
            self.working_frame.clone(),
            self.grid_length_x,
            self.grid_length_y,
            self.grid_resolution,
            self.grid_position_x,
            self.grid_position_y,
        )
    }

    /// Transform lookup timeout as a [`std::time::Duration`].
    pub fn transform_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.transform_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = GridConfig::default();
        cfg.validate().unwrap();
        let g = cfg.geometry().unwrap();
        assert_eq!((g.rows, g.cols), (250, 150));
        assert_eq!(g.frame_id, "velodyne");
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg: GridConfig = serde_json::from_str(r#"{"grid_resolution": 0.5}"#).unwrap();
        assert_eq!(cfg.grid_resolution, 0.5);
        assert_eq!(cfg.grid_max_value, 3.0);
        assert!(cfg.use_static_area);
        assert!(!cfg.use_objects);
        assert_eq!(
            cfg.fusion_layers,
            vec![LayerKind::SensorPoints, LayerKind::Vectormap]
        );
    }

    #[test]
    fn rejects_non_positive_geometry() {
        let cfg = GridConfig {
            grid_resolution: 0.0,
            ..GridConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(GridError::Configuration(_))));

        let cfg = GridConfig {
            grid_length_y: -5.0,
            ..GridConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(GridError::Configuration(_))));
    }

    #[test]
    fn rejects_oversized_geometry() {
        let cfg = GridConfig {
            grid_length_x: 1e9,
            grid_length_y: 1e9,
            grid_resolution: 1e-3,
            ..GridConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(GridError::Configuration(_))));
    }

    #[test]
    fn height_threshold_may_be_negative_but_not_nan() {
        let below_sensor = GridConfig {
            sensor_points_height_threshold: -5.0,
            ..GridConfig::default()
        };
        below_sensor.validate().unwrap();

        let nan = GridConfig {
            sensor_points_height_threshold: f32::NAN,
            ..GridConfig::default()
        };
        assert!(matches!(nan.validate(), Err(GridError::Configuration(_))));
    }

    #[test]
    fn rejects_inverted_cost_bounds() {
        let cfg = GridConfig {
            grid_min_value: 3.0,
            grid_max_value: 3.0,
            ..GridConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_combined_in_fusion_layers() {
        let cfg = GridConfig {
            fusion_layers: vec![LayerKind::SensorPoints, LayerKind::Combined],
            ..GridConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = GridConfig {
            fusion_layers: vec![],
            ..GridConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_fusion_layer_fails_to_parse() {
        let parsed: Result<GridConfig, _> =
            serde_json::from_str(r#"{"fusion_layers": ["sensor_points", "lanes"]}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn rejects_negative_expand_size() {
        let cfg = GridConfig {
            objects_expand_size: -0.5,
            ..GridConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
