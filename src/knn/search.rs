//! Exact nearest-neighbor search over a built `KdTree`.
//!
//! A depth-first branch-and-bound: each subtree is paired with the
//! axis-aligned box its points are guaranteed to lie in, and a subtree is only
//! entered when that box comes strictly closer to the target than the best
//! point found so far.

use num_traits::Float;

use super::kd_tree::KdTree;
use crate::common_types::{squared_distance, NodeIndex};
use crate::error::{KdTreeError, Result};

/// The outcome of a nearest-neighbor query.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Neighbor<F> {
    /// Index of the closest point in the tree's `PointSet`.
    pub index: usize,
    pub squared_distance: F,
}

impl<F: Float> Neighbor<F> {
    /// Euclidean distance to the query point.
    pub fn distance(&self) -> F {
        self.squared_distance.sqrt()
    }
}

impl<F: Float> KdTree<F> {
    /// Index of the stored point closest to `target`.
    ///
    /// When several points are equally close, the first one met during the
    /// traversal (node before near subtree before far subtree) wins.
    pub fn get_nearest(&self, target: &[F]) -> Result<usize> {
        self.nearest(target).map(|n| n.index)
    }

    /// Like [`KdTree::get_nearest`], also reporting the squared distance.
    pub fn nearest(&self, target: &[F]) -> Result<Neighbor<F>> {
        self.bounded_search(target).map(|(found, _)| found)
    }

    /// Runs the search and also reports how many nodes it visited.
    fn bounded_search(&self, target: &[F]) -> Result<(Neighbor<F>, usize)> {
        let root = self.root().ok_or(KdTreeError::EmptyTree)?;
        if target.len() != self.dimension() {
            return Err(KdTreeError::DimensionMismatch {
                expected: self.dimension(),
                found: target.len(),
            });
        }
        if target.iter().any(|c| !c.is_finite()) {
            return Err(KdTreeError::InvalidInput("query point has a non-finite coordinate".to_string()));
        }

        let mut search = BoundedSearch {
            tree: self,
            target,
            closest: None,
            closest_norm: F::infinity(),
            min_range: vec![F::neg_infinity(); target.len()],
            max_range: vec![F::infinity(); target.len()],
            visited: 0,
        };
        search.visit(root);

        // The root is always visited and always recorded.
        let index = search.closest.ok_or(KdTreeError::EmptyTree)?;
        Ok((Neighbor { index, squared_distance: search.closest_norm }, search.visited))
    }
}

/// Per-query state. Lives on the caller's stack; the tree is only read.
struct BoundedSearch<'a, F> {
    tree: &'a KdTree<F>,
    target: &'a [F],
    closest: Option<usize>,
    closest_norm: F,
    // Box enclosing the subtree currently being visited.
    min_range: Vec<F>,
    max_range: Vec<F>,
    visited: usize,
}

impl<F: Float> BoundedSearch<'_, F> {
    fn visit(&mut self, node_idx: NodeIndex) {
        self.visited += 1;
        let tree = self.tree;
        let node = tree.nodes()[node_idx];
        let point = tree.points().point(node.point_index);

        let norm = squared_distance(self.target, point);
        // The first point is always recorded, even if its distance overflowed to infinity.
        if self.closest.is_none() || norm < self.closest_norm {
            self.closest_norm = norm;
            self.closest = Some(node.point_index);
        }

        let axis = node.axis;
        let split = point[axis];
        let target_coord = self.target[axis];

        let goes_left = target_coord < split;
        let (near, far) = if goes_left {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        if let Some(near) = near {
            let saved = self.tighten(axis, split, goes_left);
            self.visit(near);
            self.restore(axis, goes_left, saved);
        }

        if let Some(far) = far {
            let saved = self.tighten(axis, split, !goes_left);
            if self.distance_to_box() < self.closest_norm {
                self.visit(far);
            }
            self.restore(axis, !goes_left, saved);
        }
    }

    /// Shrinks the current box to one side of `split` and returns the bound it replaced.
    fn tighten(&mut self, axis: usize, split: F, left_side: bool) -> F {
        if left_side {
            std::mem::replace(&mut self.max_range[axis], split)
        } else {
            std::mem::replace(&mut self.min_range[axis], split)
        }
    }

    fn restore(&mut self, axis: usize, left_side: bool, saved: F) {
        if left_side {
            self.max_range[axis] = saved;
        } else {
            self.min_range[axis] = saved;
        }
    }

    /// Squared distance from the target to the nearest point of the current box.
    fn distance_to_box(&self) -> F {
        self.target
            .iter()
            .zip(self.min_range.iter().zip(self.max_range.iter()))
            .fold(F::zero(), |acc, (&t, (&lo, &hi))| {
                let clamped = t.max(lo).min(hi);
                let diff = t - clamped;
                acc + diff * diff
            })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::common_types::{squared_distance, PointSet};
    use crate::error::KdTreeError;
    use crate::knn::brute_force;
    use crate::knn::kd_tree::KdTree;

    fn build(rows: Vec<Vec<f64>>) -> KdTree<f64> {
        KdTree::build(PointSet::new(rows).unwrap()).unwrap()
    }

    #[test]
    fn test_square_with_center() {
        let tree = build(vec![
            vec![0.0, 0.0],
            vec![10.0, 0.0],
            vec![0.0, 10.0],
            vec![10.0, 10.0],
            vec![5.0, 5.0],
        ]);
        let nearest = tree.nearest(&[5.0, 6.0]).unwrap();
        assert_eq!(nearest.index, 4);
        assert_relative_eq!(nearest.distance(), 1.0);
    }

    #[test]
    fn test_duplicate_points() {
        let tree = build(vec![vec![1.0, 1.0], vec![1.0, 1.0]]);
        let nearest = tree.nearest(&[1.0, 1.0]).unwrap();
        assert!(nearest.index == 0 || nearest.index == 1);
        assert_eq!(nearest.distance(), 0.0);
    }

    #[test]
    fn test_one_dimensional() {
        let tree = build(vec![vec![1.0], vec![5.0], vec![9.0]]);
        let nearest = tree.nearest(&[6.0]).unwrap();
        assert_eq!(nearest.index, 1);
        assert_relative_eq!(nearest.distance(), 1.0);

        assert_eq!(tree.get_nearest(&[-100.0]).unwrap(), 0);
        assert_eq!(tree.get_nearest(&[8.0]).unwrap(), 2);
    }

    #[test]
    fn test_single_point_always_wins() {
        let tree = build(vec![vec![3.0, -2.0, 7.5]]);
        for query in [[0.0, 0.0, 0.0], [3.0, -2.0, 7.5], [1e9, -1e9, 42.0]] {
            assert_eq!(tree.get_nearest(&query).unwrap(), 0);
        }
    }

    #[test]
    fn test_tie_keeps_first_recorded() {
        // Query sits exactly between the two points; the root (median) is met first.
        let tree = build(vec![vec![0.0], vec![2.0]]);
        let root_point = tree.nodes()[tree.root().unwrap()].point_index;
        assert_eq!(tree.get_nearest(&[1.0]).unwrap(), root_point);
    }

    #[test]
    fn test_empty_tree() {
        let tree = KdTree::<f64>::empty();
        assert!(matches!(tree.get_nearest(&[1.0]), Err(KdTreeError::EmptyTree)));
    }

    #[test]
    fn test_non_finite_query_rejected() {
        let tree = build(vec![vec![1.0, 2.0]]);
        assert!(matches!(
            tree.get_nearest(&[f64::NAN, 0.0]),
            Err(KdTreeError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let tree = build(vec![vec![1.0, 2.0]]);
        let result = tree.get_nearest(&[1.0]);
        assert!(matches!(
            result,
            Err(KdTreeError::DimensionMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn test_matches_brute_force_on_random_data() {
        let mut rng = StdRng::seed_from_u64(42);
        for &(n, k) in &[(1, 2), (5, 1), (64, 2), (500, 3), (300, 6)] {
            let rows: Vec<Vec<f64>> = (0..n)
                .map(|_| (0..k).map(|_| rng.gen_range(-50.0..50.0)).collect())
                .collect();
            let points = PointSet::new(rows).unwrap();
            let tree = KdTree::build(points.clone()).unwrap();

            for _ in 0..200 {
                let query: Vec<f64> = (0..k).map(|_| rng.gen_range(-60.0..60.0)).collect();
                let expected = brute_force::nearest(&points, &query).unwrap();
                let found = tree.nearest(&query).unwrap();
                assert_eq!(found.squared_distance, expected.squared_distance, "n={} k={}", n, k);
                assert_eq!(
                    squared_distance(&query, points.point(found.index)),
                    found.squared_distance
                );
            }
        }
    }

    #[test]
    fn test_matches_brute_force_on_grid_with_ties() {
        // Integer grid: many exactly equidistant candidates.
        let mut rows = Vec::new();
        for x in 0..8 {
            for y in 0..8 {
                rows.push(vec![x as f64, y as f64]);
            }
        }
        let points = PointSet::new(rows).unwrap();
        let tree = KdTree::build(points.clone()).unwrap();

        for qx in 0..15 {
            for qy in 0..15 {
                let query = [qx as f64 * 0.5, qy as f64 * 0.5];
                let expected = brute_force::nearest(&points, &query).unwrap();
                let found = tree.nearest(&query).unwrap();
                assert_eq!(found.squared_distance, expected.squared_distance);
            }
        }
    }

    #[test]
    fn test_anisotropic_cloud() {
        // Long thin cloud along y: splits should mostly use axis 1.
        let mut rng = StdRng::seed_from_u64(9);
        let rows: Vec<Vec<f32>> = (0..400)
            .map(|_| vec![rng.gen_range(0.0..1.0), rng.gen_range(0.0..1000.0)])
            .collect();
        let points = PointSet::new(rows).unwrap();
        let tree = KdTree::build(points.clone()).unwrap();

        let root = tree.nodes()[tree.root().unwrap()];
        assert_eq!(root.axis, 1);

        for _ in 0..100 {
            let query: [f32; 2] = [rng.gen_range(-1.0..2.0), rng.gen_range(-10.0..1010.0)];
            let expected = brute_force::nearest(&points, &query).unwrap();
            assert_eq!(tree.nearest(&query).unwrap().squared_distance, expected.squared_distance);
        }
    }

    #[test]
    fn test_far_child_skipped_when_its_box_is_farther() {
        // Root 5 splits on x, query 8 descends right to 9 (distance 1).
        // The left box ends at x = 5, 9 away, so leaf 1 is never entered.
        let tree = build(vec![vec![1.0], vec![5.0], vec![9.0]]);
        let (found, visited) = tree.bounded_search(&[8.0]).unwrap();
        assert_eq!(found.index, 2);
        assert_eq!(visited, 2);
    }

    #[test]
    fn test_far_child_entered_when_its_box_is_closer() {
        // Root (10, 1) splits on y. Query (1, 2) descends to (5, 100) first,
        // but the y <= 1 box is only 1 away, so (0, 0) must still be checked.
        let tree = build(vec![vec![0.0, 0.0], vec![10.0, 1.0], vec![5.0, 100.0]]);
        assert_eq!(tree.nodes()[tree.root().unwrap()].axis, 1);
        let (found, visited) = tree.bounded_search(&[1.0, 2.0]).unwrap();
        assert_eq!(found.index, 0);
        assert_eq!(visited, 3);
    }

    #[test]
    fn test_query_on_stored_point_only_walks_its_path() {
        // Once distance 0 is found no box can be strictly closer, so every far
        // subtree is skipped and the visit count is bounded by the depth.
        let mut rng = StdRng::seed_from_u64(77);
        let rows: Vec<Vec<f64>> = (0..1023)
            .map(|_| vec![rng.gen_range(-100.0..100.0), rng.gen_range(-100.0..100.0)])
            .collect();
        let points = PointSet::new(rows).unwrap();
        let tree = KdTree::build(points.clone()).unwrap();
        assert_eq!(tree.depth(), 10);

        for (idx, point) in points.iter().enumerate() {
            let (found, visited) = tree.bounded_search(point).unwrap();
            assert_eq!(found.index, idx);
            assert!(visited <= tree.depth(), "point {} visited {} nodes", idx, visited);
        }
    }

    #[test]
    fn test_random_queries_visit_a_fraction_of_the_tree() {
        let mut rng = StdRng::seed_from_u64(78);
        let rows: Vec<Vec<f64>> = (0..1023)
            .map(|_| vec![rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0)])
            .collect();
        let tree = build(rows);

        let mut total = 0;
        for _ in 0..200 {
            let query = [rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0)];
            let (_, visited) = tree.bounded_search(&query).unwrap();
            assert!(visited < tree.len() / 4, "visited {} of {} nodes", visited, tree.len());
            total += visited;
        }
        assert!(total / 200 < 60, "average visit count {} too high", total / 200);
    }

    #[test]
    fn test_queries_share_tree_across_threads() {
        let tree = build(vec![vec![0.0, 0.0], vec![4.0, 4.0], vec![9.0, 1.0]]);
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let tree = &tree;
                    scope.spawn(move || tree.get_nearest(&[i as f64 * 3.0, 2.0]).unwrap())
                })
                .collect();
            let results: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(results, vec![0, 1, 1, 2]);
        });
    }
}
