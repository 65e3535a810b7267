use num_traits::Float;

use crate::error::{KdTreeError, Result};

/// Index of a node inside a tree's node array.
pub type NodeIndex = usize;

/// Wire value standing in for an absent axis, point or child.
/// Kept identical to the legacy format (maximum representable index).
pub const INVALID_IDX: usize = usize::MAX;

/// An ordered collection of points that all share one dimensionality.
///
/// Coordinates are stored row-major in one flat buffer; point `i` occupies
/// `coords[i * dimension..(i + 1) * dimension]`. The position of a point is its
/// permanent identity, the tree only ever refers to points by that index.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PointSet<F> {
    coords: Vec<F>,
    dimension: usize,
    len: usize,
}

impl<F: Float> PointSet<F> {
    /// Builds a point set from rows, rejecting ragged input.
    pub fn new(rows: Vec<Vec<F>>) -> Result<Self> {
        let dimension = match rows.first() {
            Some(first) => first.len(),
            None => return Ok(Self::empty()),
        };
        if dimension == 0 {
            return Err(KdTreeError::InvalidInput(
                "points must have at least one coordinate".to_string(),
            ));
        }

        let mut coords = Vec::with_capacity(rows.len() * dimension);
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != dimension {
                return Err(KdTreeError::InvalidInput(format!(
                    "point {} has {} coordinates, expected {}",
                    idx,
                    row.len(),
                    dimension
                )));
            }
            coords.extend_from_slice(row);
        }

        Ok(PointSet { coords, dimension, len: rows.len() })
    }

    /// A point set with no points and no dimensionality.
    pub fn empty() -> Self {
        PointSet { coords: Vec::new(), dimension: 0, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of coordinates per point (0 for an empty set).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Coordinates of point `idx`.
    ///
    /// # Panics
    /// Panics if `idx >= self.len()`.
    pub fn point(&self, idx: usize) -> &[F] {
        let start = idx * self.dimension;
        &self.coords[start..start + self.dimension]
    }

    /// Coordinates of point `idx`, `None` when out of range.
    pub fn get(&self, idx: usize) -> Option<&[F]> {
        (idx < self.len).then(|| self.point(idx))
    }

    /// Iterates over the points in index order.
    pub fn iter(&self) -> impl Iterator<Item = &[F]> + '_ {
        // chunks_exact panics on 0, an empty set has nothing to yield anyway
        self.coords.chunks_exact(self.dimension.max(1))
    }
}

/// Squared Euclidean distance between two points of equal length.
pub fn squared_distance<F: Float>(a: &[F], b: &[F]) -> F {
    a.iter().zip(b.iter()).fold(F::zero(), |acc, (&x, &y)| {
        let diff = x - y;
        acc + diff * diff
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_set_rejects_ragged_rows() {
        let result = PointSet::new(vec![vec![1.0, 2.0], vec![3.0]]);
        assert!(matches!(result, Err(KdTreeError::InvalidInput(_))));
    }

    #[test]
    fn test_point_set_rejects_zero_dimension() {
        let result = PointSet::<f64>::new(vec![vec![], vec![]]);
        assert!(matches!(result, Err(KdTreeError::InvalidInput(_))));
    }

    #[test]
    fn test_point_set_keeps_insertion_order() {
        let points = PointSet::new(vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points.dimension(), 2);
        assert_eq!(points.point(1), &[3.0, 4.0]);
        assert_eq!(points.get(3), None);

        let rows: Vec<Vec<f64>> = points.iter().map(|p| p.to_vec()).collect();
        assert_eq!(rows, vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]);
    }

    #[test]
    fn test_empty_point_set() {
        let points = PointSet::<f32>::new(Vec::new()).unwrap();
        assert!(points.is_empty());
        assert_eq!(points.dimension(), 0);
        assert_eq!(points.iter().count(), 0);
    }

    #[test]
    fn test_squared_distance() {
        assert_eq!(squared_distance(&[1.0, 2.0, 3.0], &[4.0, 6.0, 3.0]), 25.0);
        assert_eq!(squared_distance::<f64>(&[], &[]), 0.0);
    }
}
