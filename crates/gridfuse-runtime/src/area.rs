//! Static drivable-area cache.
//!
//! The road-area polygons come from a map loader that may not have anything
//! to offer yet when the first sensor frame arrives.  [`StaticAreaCache`]
//! asks the [`AreaLoader`] on demand until it returns a non-empty set, then
//! keeps that set for the rest of the process lifetime.

use gridfuse_types::{GridError, Polygon};
use tracing::{debug, info};

/// Source of drivable-area polygons expressed in the map frame.
///
/// Returning an empty vector means "nothing available yet"; the cache will
/// ask again on the next recompute.
pub trait AreaLoader: Send {
    fn load_areas(&mut self) -> Result<Vec<Polygon>, GridError>;
}

impl<F> AreaLoader for F
where
    F: FnMut() -> Result<Vec<Polygon>, GridError> + Send,
{
    fn load_areas(&mut self) -> Result<Vec<Polygon>, GridError> {
        self()
    }
}

/// A loader that never has any polygons.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAreas;

impl AreaLoader for NoAreas {
    fn load_areas(&mut self) -> Result<Vec<Polygon>, GridError> {
        Ok(Vec::new())
    }
}

/// Lazily populated, immutable-once-set polygon cache.
#[derive(Debug, Default)]
pub struct StaticAreaCache {
    areas: Option<Vec<Polygon>>,
}

impl StaticAreaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.areas.is_some()
    }

    /// Cached polygons, if the load has succeeded.
    pub fn areas(&self) -> Option<&[Polygon]> {
        self.areas.as_deref()
    }

    /// Populate the cache from `loader` unless it already holds polygons.
    ///
    /// Returns the cached set, or `None` while the loader still has nothing.
    /// Loader errors are returned and leave the cache empty.
    pub fn ensure_loaded(
        &mut self,
        loader: &mut dyn AreaLoader,
    ) -> Result<Option<&[Polygon]>, GridError> {
        if self.areas.is_none() {
            let polygons = loader.load_areas()?;
            if polygons.is_empty() {
                debug!("static area loader returned no polygons yet");
            } else {
                info!(polygons = polygons.len(), "static area cache populated");
                self.areas = Some(polygons);
            }
        }
        Ok(self.areas())
    }
}
