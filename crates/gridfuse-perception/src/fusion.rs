//! Layer Fusion Stage.
//!
//! Combines several cost layers of one grid into a single drivability
//! surface.  The rule is the cell-wise maximum:
//!
//! ```text
//! combined[i][j] = max(a[i][j], b[i][j], …)
//! ```
//!
//! The maximum is commutative, associative and idempotent, so the result does
//! not depend on the order the layers are listed in.  The highest-risk
//! signal in a cell wins outright; weak signals from other sources never add
//! up to it.
//!
//! # Example
//!
//! ```rust
//! use gridfuse_perception::fusion::combine;
//! use gridfuse_perception::grid::CostLayer;
//!
//! let a = CostLayer::from_vec(1, 3, vec![0.0, 3.0, 1.0]).unwrap();
//! let b = CostLayer::from_vec(1, 3, vec![2.0, 0.0, 1.0]).unwrap();
//!
//! let c = combine(&a, &b).unwrap();
//! assert_eq!(c.as_slice(), &[2.0, 3.0, 1.0]);
//! ```

use gridfuse_types::{GridError, LayerKind};
use tracing::debug;

use crate::grid::{CostLayer, Grid, NEUTRAL_COST};

// ────────────────────────────────────────────────────────────────────────────
// Pairwise rule
// ────────────────────────────────────────────────────────────────────────────

fn check_dims(a: &CostLayer, b: &CostLayer) -> Result<(), GridError> {
    if a.dims() != b.dims() {
        return Err(GridError::DimensionMismatch {
            expected: a.dims(),
            found: b.dims(),
        });
    }
    Ok(())
}

/// Cell-wise maximum of two layers.
///
/// # Errors
///
/// [`GridError::DimensionMismatch`] when the layers differ in shape.
pub fn combine(a: &CostLayer, b: &CostLayer) -> Result<CostLayer, GridError> {
    let mut out = a.clone();
    max_in_place(&mut out, b)?;
    Ok(out)
}

/// `acc[i][j] = max(acc[i][j], other[i][j])`.
pub fn max_in_place(acc: &mut CostLayer, other: &CostLayer) -> Result<(), GridError> {
    check_dims(acc, other)?;
    for (dst, &src) in acc.as_mut_slice().iter_mut().zip(other.as_slice()) {
        *dst = dst.max(src);
    }
    Ok(())
}

/// Reduce any number of layers with [`combine`].
///
/// Returns `Ok(None)` for an empty input.
pub fn combine_all<'a, I>(layers: I) -> Result<Option<CostLayer>, GridError>
where
    I: IntoIterator<Item = &'a CostLayer>,
{
    let mut iter = layers.into_iter();
    let Some(first) = iter.next() else {
        return Ok(None);
    };
    let mut acc = first.clone();
    for layer in iter {
        max_in_place(&mut acc, layer)?;
    }
    Ok(Some(acc))
}

// ────────────────────────────────────────────────────────────────────────────
// FusionStage
// ────────────────────────────────────────────────────────────────────────────

/// Writes the fused result of a configured set of layers into
/// [`LayerKind::Combined`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusionStage {
    inputs: Vec<LayerKind>,
}

impl FusionStage {
    /// Build a stage over `inputs`; duplicates are dropped.
    ///
    /// # Errors
    ///
    /// [`GridError::Configuration`] when `inputs` is empty or names the
    /// combined layer itself.
    pub fn new(inputs: &[LayerKind]) -> Result<Self, GridError> {
        if inputs.contains(&LayerKind::Combined) {
            return Err(GridError::Configuration(
                "the combined layer cannot be a fusion input".to_string(),
            ));
        }
        let mut unique: Vec<LayerKind> = Vec::with_capacity(inputs.len());
        for &kind in inputs {
            if !unique.contains(&kind) {
                unique.push(kind);
            }
        }
        if unique.is_empty() {
            return Err(GridError::Configuration(
                "fusion needs at least one input layer".to_string(),
            ));
        }
        Ok(Self { inputs: unique })
    }

    pub fn inputs(&self) -> &[LayerKind] {
        &self.inputs
    }

    /// Recompute [`LayerKind::Combined`] from the input layers.
    pub fn apply(&self, grid: &mut Grid) -> Result<(), GridError> {
        let fused = combine_all(self.inputs.iter().map(|&kind| grid.layer(kind)))?
            .unwrap_or_else(|| CostLayer::new(grid.rows(), grid.cols(), NEUTRAL_COST));
        grid.set_layer(LayerKind::Combined, fused)?;
        debug!(inputs = ?self.inputs, "combined layer recomputed");
        Ok(())
    }
}

impl Default for FusionStage {
    fn default() -> Self {
        Self {
            inputs: vec![LayerKind::SensorPoints, LayerKind::Vectormap],
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(values: &[f32]) -> CostLayer {
        CostLayer::from_vec(2, 3, values.to_vec()).unwrap()
    }

    fn samples() -> (CostLayer, CostLayer, CostLayer) {
        (
            layer(&[0.0, 1.0, 3.0, 0.5, 2.0, 0.0]),
            layer(&[2.0, 0.0, 1.0, 0.5, 2.5, 0.1]),
            layer(&[1.0, 3.0, 0.0, 0.0, 0.0, 0.2]),
        )
    }

    #[test]
    fn combine_is_pointwise_max() {
        let (a, b, _) = samples();
        let c = combine(&a, &b).unwrap();
        for i in 0..6 {
            assert_eq!(c.as_slice()[i], a.as_slice()[i].max(b.as_slice()[i]));
        }
    }

    #[test]
    fn combine_is_commutative() {
        let (a, b, _) = samples();
        assert_eq!(combine(&a, &b).unwrap(), combine(&b, &a).unwrap());
    }

    #[test]
    fn combine_is_associative() {
        let (a, b, c) = samples();
        let left = combine(&combine(&a, &b).unwrap(), &c).unwrap();
        let right = combine(&a, &combine(&b, &c).unwrap()).unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn combine_is_idempotent() {
        let (a, _, _) = samples();
        assert_eq!(combine(&a, &a).unwrap(), a);
    }

    #[test]
    fn combine_rejects_mismatched_layers() {
        let a = CostLayer::new(2, 3, 0.0);
        let b = CostLayer::new(3, 2, 0.0);
        assert!(matches!(
            combine(&a, &b),
            Err(GridError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn combine_all_is_order_independent() {
        let (a, b, c) = samples();
        let forward = combine_all([&a, &b, &c]).unwrap().unwrap();
        let backward = combine_all([&c, &b, &a]).unwrap().unwrap();
        assert_eq!(forward, backward);
        assert!(combine_all(std::iter::empty()).unwrap().is_none());
    }

    #[test]
    fn stage_writes_combined_layer() {
        let mut grid = Grid::new("velodyne", 3.0, 2.0, 1.0, 0.0, 0.0).unwrap();
        let (a, b, c) = samples();
        grid.set_layer(LayerKind::SensorPoints, a.clone()).unwrap();
        grid.set_layer(LayerKind::Vectormap, b.clone()).unwrap();
        grid.set_layer(LayerKind::Objects, c).unwrap();

        FusionStage::default().apply(&mut grid).unwrap();
        assert_eq!(grid.layer(LayerKind::Combined), &combine(&a, &b).unwrap());
    }

    #[test]
    fn stage_can_include_objects() {
        let mut grid = Grid::new("velodyne", 3.0, 2.0, 1.0, 0.0, 0.0).unwrap();
        let (a, b, c) = samples();
        grid.set_layer(LayerKind::SensorPoints, a.clone()).unwrap();
        grid.set_layer(LayerKind::Vectormap, b.clone()).unwrap();
        grid.set_layer(LayerKind::Objects, c.clone()).unwrap();

        let stage = FusionStage::new(&[
            LayerKind::Objects,
            LayerKind::SensorPoints,
            LayerKind::Vectormap,
            LayerKind::Objects,
        ])
        .unwrap();
        assert_eq!(stage.inputs().len(), 3);
        stage.apply(&mut grid).unwrap();
        assert_eq!(
            grid.layer(LayerKind::Combined),
            &combine_all([&a, &b, &c]).unwrap().unwrap()
        );
    }

    #[test]
    fn stage_rejects_bad_inputs() {
        assert!(FusionStage::new(&[]).is_err());
        assert!(FusionStage::new(&[LayerKind::Combined]).is_err());
    }
}
