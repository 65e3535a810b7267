//! The k-d tree itself: node layout, construction and structural validation.

use std::cmp::Ordering;

use num_traits::Float;
use tracing::{debug, trace};

use crate::common_types::{NodeIndex, PointSet};
use crate::error::{KdTreeError, Result};

/// One split of the tree. Children are indices into the owning tree's node array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    /// The coordinate this node splits on.
    pub axis: usize,
    /// Index of the stored point in the tree's `PointSet`.
    pub point_index: usize,
    /// Subtree holding points at or below the split value.
    pub left: Option<NodeIndex>,
    /// Subtree holding points at or above the split value.
    pub right: Option<NodeIndex>,
}

impl Node {
    /// True when the node has neither child.
    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}

/// A static k-d tree over an owned point set.
///
/// Nodes live in a flat array sized to the number of points; every point is
/// stored in exactly one node. The tree is immutable once built.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KdTree<F> {
    points: PointSet<F>,
    nodes: Vec<Node>,
    root: Option<NodeIndex>,
}

impl<F: Float> Default for KdTree<F> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<F: Float> KdTree<F> {
    /// A tree without points or root. Every query against it fails with `EmptyTree`.
    pub fn empty() -> Self {
        KdTree { points: PointSet::empty(), nodes: Vec::new(), root: None }
    }

    /// Builds a balanced tree over `points`.
    ///
    /// Each node splits on the axis with the widest coordinate spread among the
    /// points of its subtree (lowest axis wins ties) and stores the median
    /// point along that axis. The point set itself is never reordered: the
    /// partitioning runs on a permutation of point indices.
    ///
    /// # Errors
    /// `InvalidInput` if `points` is empty or holds a non-finite coordinate.
    pub fn build(points: PointSet<F>) -> Result<Self> {
        if points.is_empty() {
            return Err(KdTreeError::InvalidInput(
                "cannot build a tree from an empty point set".to_string(),
            ));
        }
        if let Some(idx) = points.iter().position(|p| p.iter().any(|c| !c.is_finite())) {
            return Err(KdTreeError::InvalidInput(format!(
                "point {} has a non-finite coordinate",
                idx
            )));
        }

        let mut order: Vec<usize> = (0..points.len()).collect();
        let mut builder = TreeBuilder {
            points: &points,
            nodes: Vec::with_capacity(points.len()),
        };
        let root = builder.split_tree(&mut order);
        let nodes = builder.nodes;

        let tree = KdTree { points, nodes, root };
        debug!(
            points = tree.len(),
            dimension = tree.dimension(),
            depth = tree.depth(),
            "built kd-tree"
        );
        Ok(tree)
    }

    /// Reassembles a tree from its persisted parts, checking every structural invariant.
    ///
    /// # Errors
    /// `MalformedPersistedTree` when a coordinate is not finite, an index is out
    /// of range, a point is stored twice or never, a node is shared or
    /// unreachable, or an axis does not exist in the point set.
    pub fn from_parts(points: PointSet<F>, root: Option<NodeIndex>, nodes: Vec<Node>) -> Result<Self> {
        let malformed = |msg: String| Err(KdTreeError::MalformedPersistedTree(msg));

        if points.is_empty() {
            if root.is_some() || !nodes.is_empty() {
                return malformed("tree without points must have no nodes and no root".to_string());
            }
            return Ok(Self::empty());
        }

        if let Some(idx) = points.iter().position(|p| p.iter().any(|c| !c.is_finite())) {
            return malformed(format!("point {} has a non-finite coordinate", idx));
        }

        let n = points.len();
        let root = match root {
            Some(r) if r < nodes.len() => r,
            Some(r) => return malformed(format!("root index {} out of range for {} nodes", r, nodes.len())),
            None => return malformed("non-empty tree has no root".to_string()),
        };
        if nodes.len() != n {
            return malformed(format!("{} nodes stored for {} points", nodes.len(), n));
        }

        let mut point_seen = vec![false; n];
        let mut has_parent = vec![false; n];
        for (idx, node) in nodes.iter().enumerate() {
            if node.axis >= points.dimension() {
                return malformed(format!(
                    "node {} splits on axis {} but points have {} dimensions",
                    idx,
                    node.axis,
                    points.dimension()
                ));
            }
            match point_seen.get_mut(node.point_index) {
                Some(seen) if *seen => {
                    return malformed(format!("point {} is stored by more than one node", node.point_index));
                }
                Some(seen) => *seen = true,
                None => {
                    return malformed(format!(
                        "node {} refers to point {} but only {} points exist",
                        idx, node.point_index, n
                    ));
                }
            }
            for child in [node.left, node.right].into_iter().flatten() {
                if child >= n {
                    return malformed(format!("node {} has child {} out of range", idx, child));
                }
                if child == root || has_parent[child] {
                    return malformed(format!("node {} is referenced as a child more than once", child));
                }
                has_parent[child] = true;
            }
        }

        // Every node has at most one parent and the root has none, so a walk
        // from the root cannot loop. Anything it misses sits on a detached cycle.
        let mut reached = 0;
        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            reached += 1;
            stack.extend([nodes[idx].left, nodes[idx].right].into_iter().flatten());
        }
        if reached != n {
            return malformed(format!("{} of {} nodes are unreachable from the root", n - reached, n));
        }

        Ok(KdTree { points, nodes, root: Some(root) })
    }

    pub fn points(&self) -> &PointSet<F> {
        &self.points
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn root(&self) -> Option<NodeIndex> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn dimension(&self) -> usize {
        self.points.dimension()
    }

    /// Number of nodes on the longest root-to-leaf path (0 for an empty tree).
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack: Vec<(NodeIndex, usize)> = self.root.map(|r| (r, 1)).into_iter().collect();
        while let Some((idx, level)) = stack.pop() {
            deepest = deepest.max(level);
            let node = &self.nodes[idx];
            stack.extend([node.left, node.right].into_iter().flatten().map(|c| (c, level + 1)));
        }
        deepest
    }
}

/// Recursive median-split construction over a permutation of point indices.
struct TreeBuilder<'a, F> {
    points: &'a PointSet<F>,
    nodes: Vec<Node>,
}

impl<F: Float> TreeBuilder<'_, F> {
    /// Builds the subtree for `range` and returns its node index, `None` for an empty range.
    /// Children are appended before their parent, so the root ends up last.
    fn split_tree(&mut self, range: &mut [usize]) -> Option<NodeIndex> {
        if range.is_empty() {
            return None;
        }

        let (axis, median) = self.find_split(range);
        let point_index = range[median];

        let (before, rest) = range.split_at_mut(median);
        let left = self.split_tree(before);
        let right = self.split_tree(&mut rest[1..]);

        self.nodes.push(Node { axis, point_index, left, right });
        Some(self.nodes.len() - 1)
    }

    /// Picks the widest axis of `range` and moves the median along it to `range.len() / 2`.
    /// Elements before the median compare less than or equal to it, elements after greater or equal.
    fn find_split(&self, range: &mut [usize]) -> (usize, usize) {
        let first = self.points.point(range[0]);
        let mut min = first.to_vec();
        let mut max = first.to_vec();
        for &idx in range[1..].iter() {
            for (axis, &c) in self.points.point(idx).iter().enumerate() {
                if c < min[axis] {
                    min[axis] = c;
                }
                if c > max[axis] {
                    max[axis] = c;
                }
            }
        }

        // Strict comparison keeps the lowest axis on ties.
        let mut axis = 0;
        let mut widest = max[0] - min[0];
        for candidate in 1..min.len() {
            let spread = max[candidate] - min[candidate];
            if spread > widest {
                widest = spread;
                axis = candidate;
            }
        }

        let median = range.len() / 2;
        let points = self.points;
        // Coordinates are finite (checked in `build`), so the fallback never fires.
        range.select_nth_unstable_by(median, |&a, &b| {
            points.point(a)[axis]
                .partial_cmp(&points.point(b)[axis])
                .unwrap_or(Ordering::Equal)
        });
        trace!(len = range.len(), axis, median = range[median], "split");

        (axis, median)
    }
}
