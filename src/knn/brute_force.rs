//! Linear-scan reference solver used to cross-check the tree.

use num_traits::Float;

use super::search::Neighbor;
use crate::common_types::{squared_distance, PointSet};
use crate::error::{KdTreeError, Result};

/// Scans every point and returns the first one at the strict minimum distance.
pub fn nearest<F: Float>(points: &PointSet<F>, target: &[F]) -> Result<Neighbor<F>> {
    if points.is_empty() {
        return Err(KdTreeError::EmptyTree);
    }
    if target.len() != points.dimension() {
        return Err(KdTreeError::DimensionMismatch {
            expected: points.dimension(),
            found: target.len(),
        });
    }
    if target.iter().any(|c| !c.is_finite()) {
        return Err(KdTreeError::InvalidInput("query point has a non-finite coordinate".to_string()));
    }

    let mut best = Neighbor { index: 0, squared_distance: F::infinity() };
    for (index, point) in points.iter().enumerate() {
        let dist = squared_distance(target, point);
        if dist < best.squared_distance {
            best = Neighbor { index, squared_distance: dist };
        }
    }
    Ok(best)
}

/// Runs [`nearest`] for every query, in order.
pub fn nearest_batch<F: Float>(points: &PointSet<F>, queries: &PointSet<F>) -> Result<Vec<Neighbor<F>>> {
    queries.iter().map(|q| nearest(points, q)).collect()
}
