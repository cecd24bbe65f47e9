//! Configuration Vault – reads/writes `~/.gridfuse/config.toml`.

use gridfuse_perception::transform::{Quaternion, Transform3D, Vec3};
use gridfuse_types::GridConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A fixed transform registered at startup, e.g. `map` → `velodyne` for a
/// stationary test rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticTransform {
    pub parent_frame: String,
    pub child_frame: String,
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub z: f32,
    /// Rotation about z, radians.
    #[serde(default)]
    pub yaw: f32,
}

impl StaticTransform {
    pub fn transform(&self) -> Transform3D {
        Transform3D::new(
            Vec3::new(self.x, self.y, self.z),
            Quaternion::from_yaw(self.yaw),
        )
    }
}

/// Persisted configuration stored in `~/.gridfuse/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// JSON file holding the road-area polygons in the map frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_area_file: Option<PathBuf>,

    /// Grid geometry, cost range and layer toggles.
    #[serde(default)]
    pub grid: GridConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub static_transforms: Vec<StaticTransform>,
}

/// Return the path to `~/.gridfuse/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".gridfuse").join("config.toml")
}

/// Load the config from the default location.  Returns `None` if the file
/// does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path and apply environment overrides.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `GRIDFUSE_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `GRIDFUSE_WORKING_FRAME` | `grid.working_frame` |
/// | `GRIDFUSE_MAP_FRAME` | `grid.map_frame` |
/// | `GRIDFUSE_RESOLUTION` | `grid.grid_resolution` |
/// | `GRIDFUSE_HEIGHT_THRESHOLD` | `grid.sensor_points_height_threshold` |
/// | `GRIDFUSE_USE_OBJECTS` | `grid.use_objects` |
/// | `GRIDFUSE_STATIC_AREA_FILE` | `static_area_file` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("GRIDFUSE_WORKING_FRAME") {
        cfg.grid.working_frame = v;
    }
    if let Ok(v) = std::env::var("GRIDFUSE_MAP_FRAME") {
        cfg.grid.map_frame = v;
    }
    if let Ok(v) = std::env::var("GRIDFUSE_RESOLUTION")
        && let Ok(res) = v.parse::<f32>()
    {
        cfg.grid.grid_resolution = res;
    }
    if let Ok(v) = std::env::var("GRIDFUSE_HEIGHT_THRESHOLD")
        && let Ok(threshold) = v.parse::<f32>()
    {
        cfg.grid.sensor_points_height_threshold = threshold;
    }
    if let Ok(v) = std::env::var("GRIDFUSE_USE_OBJECTS")
        && let Ok(flag) = v.parse::<bool>()
    {
        cfg.grid.use_objects = flag;
    }
    if let Ok(v) = std::env::var("GRIDFUSE_STATIC_AREA_FILE") {
        cfg.static_area_file = Some(PathBuf::from(v));
    }
}

/// Save the config to the default location, creating `~/.gridfuse/` if
/// necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
