//! Road-area polygons read from a JSON file.
//!
//! The file holds an array of polygons in the map frame:
//!
//! ```json
//! [{ "vertices": [{ "x": -5, "y": 15, "z": 0 }, { "x": 5, "y": 15, "z": 0 }, { "x": 0, "y": 25, "z": 0 }] }]
//! ```
//!
//! A missing file means the map is not available yet; the pipeline will ask
//! again on its next recompute.

use std::fs;
use std::path::PathBuf;

use gridfuse_runtime::AreaLoader;
use gridfuse_types::{GridError, Polygon};
use tracing::debug;

pub struct FileAreaLoader {
    path: PathBuf,
}

impl FileAreaLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AreaLoader for FileAreaLoader {
    fn load_areas(&mut self) -> Result<Vec<Polygon>, GridError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "static area file not present yet");
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| {
            GridError::AreaLoad(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        let polygons: Vec<Polygon> = serde_json::from_str(&raw).map_err(|e| {
            GridError::AreaLoad(format!("failed to parse {}: {}", self.path.display(), e))
        })?;
        Ok(polygons
            .into_iter()
            .filter(|p| p.vertices.len() >= 3)
            .collect())
    }
}
