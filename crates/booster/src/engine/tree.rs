//! Regression tree storage.

use crate::persist::{TreeSchema, NO_CHILD};

/// Node index local to one tree (0 = root).
pub type NodeId = u32;

// ============================================================================
// TreeValidationError
// ============================================================================

/// Structural validation errors for [`RegTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeValidationError {
    /// Tree has no nodes.
    EmptyTree,
    /// Per-node arrays disagree in length.
    LengthMismatch { field: &'static str, len: usize, n_nodes: usize },
    /// A node has exactly one child.
    HalfLeaf { node: NodeId },
    /// A child pointer references an out-of-bounds node.
    ChildOutOfBounds {
        node: NodeId,
        side: &'static str,
        child: i64,
        n_nodes: usize,
    },
    /// A node references itself as a child.
    SelfLoop { node: NodeId },
    /// A node was reached by more than one path.
    DuplicateVisit { node: NodeId },
    /// A node exists in storage but is unreachable from the root.
    UnreachableNode { node: NodeId },
    /// A split uses a feature the model does not have.
    FeatureOutOfBounds { node: NodeId, feature: u32, n_features: u64 },
}

impl std::fmt::Display for TreeValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTree => write!(f, "tree has no nodes"),
            Self::LengthMismatch { field, len, n_nodes } => {
                write!(f, "{field} has {len} entries for {n_nodes} nodes")
            }
            Self::HalfLeaf { node } => write!(f, "node {node} has exactly one child"),
            Self::ChildOutOfBounds {
                node,
                side,
                child,
                n_nodes,
            } => write!(
                f,
                "node {node} {side} child {child} out of bounds ({n_nodes} nodes)"
            ),
            Self::SelfLoop { node } => write!(f, "node {node} is its own child"),
            Self::DuplicateVisit { node } => write!(f, "node {node} reached twice"),
            Self::UnreachableNode { node } => write!(f, "node {node} unreachable from root"),
            Self::FeatureOutOfBounds {
                node,
                feature,
                n_features,
            } => write!(
                f,
                "node {node} splits on feature {feature} but the model has {n_features}"
            ),
        }
    }
}

impl std::error::Error for TreeValidationError {}

// ============================================================================
// RegTree
// ============================================================================

/// Structure-of-Arrays regression tree with per-node statistics.
///
/// Leaves store `0` in both child slots. Nodes created by the grower always
/// have larger ids than their parent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegTree {
    split_indices: Vec<u32>,
    split_conditions: Vec<f32>,
    left_children: Vec<NodeId>,
    right_children: Vec<NodeId>,
    default_left: Vec<bool>,
    is_leaf: Vec<bool>,
    /// Leaf value, or shrunk node weight for splits.
    values: Vec<f32>,
    gains: Vec<f32>,
    covers: Vec<f32>,
}

impl RegTree {
    /// Single-leaf tree.
    pub fn leaf(value: f32, cover: f32) -> Self {
        let mut tree = Self::default();
        tree.push_leaf(value, cover);
        tree
    }

    // =========================================================================
    // Construction
    // =========================================================================

    pub(crate) fn push_leaf(&mut self, value: f32, cover: f32) -> NodeId {
        let id = self.n_nodes() as NodeId;
        self.split_indices.push(0);
        self.split_conditions.push(0.0);
        self.left_children.push(0);
        self.right_children.push(0);
        self.default_left.push(false);
        self.is_leaf.push(true);
        self.values.push(value);
        self.gains.push(0.0);
        self.covers.push(cover);
        id
    }

    pub(crate) fn set_leaf(&mut self, node: NodeId, value: f32, cover: f32) {
        let i = node as usize;
        self.values[i] = value;
        self.covers[i] = cover;
    }

    /// Turn leaf `node` into a split with two fresh leaf children.
    pub(crate) fn expand(
        &mut self,
        node: NodeId,
        feature: u32,
        condition: f32,
        default_left: bool,
        gain: f32,
    ) -> (NodeId, NodeId) {
        let left = self.push_leaf(0.0, 0.0);
        let right = self.push_leaf(0.0, 0.0);
        let i = node as usize;
        self.split_indices[i] = feature;
        self.split_conditions[i] = condition;
        self.left_children[i] = left;
        self.right_children[i] = right;
        self.default_left[i] = default_left;
        self.is_leaf[i] = false;
        self.gains[i] = gain;
        (left, right)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.is_leaf.len()
    }

    #[inline]
    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.is_leaf[node as usize]
    }

    #[inline]
    pub fn split_index(&self, node: NodeId) -> u32 {
        self.split_indices[node as usize]
    }

    #[inline]
    pub fn split_condition(&self, node: NodeId) -> f32 {
        self.split_conditions[node as usize]
    }

    #[inline]
    pub fn left_child(&self, node: NodeId) -> NodeId {
        self.left_children[node as usize]
    }

    #[inline]
    pub fn right_child(&self, node: NodeId) -> NodeId {
        self.right_children[node as usize]
    }

    #[inline]
    pub fn default_left(&self, node: NodeId) -> bool {
        self.default_left[node as usize]
    }

    #[inline]
    pub fn value(&self, node: NodeId) -> f32 {
        self.values[node as usize]
    }

    #[inline]
    pub fn gain(&self, node: NodeId) -> f32 {
        self.gains[node as usize]
    }

    #[inline]
    pub fn cover(&self, node: NodeId) -> f32 {
        self.covers[node as usize]
    }

    /// Child followed by the missing-value branch.
    #[inline]
    pub fn missing_child(&self, node: NodeId) -> NodeId {
        if self.default_left(node) {
            self.left_child(node)
        } else {
            self.right_child(node)
        }
    }

    /// Largest split feature index, if the tree has splits.
    pub fn max_split_index(&self) -> Option<u32> {
        (0..self.n_nodes() as NodeId)
            .filter(|&n| !self.is_leaf(n))
            .map(|n| self.split_index(n))
            .max()
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// Child taken for one row at split `node`.
    #[inline]
    pub fn next_node(&self, node: NodeId, row: &[f32]) -> NodeId {
        let fvalue = row
            .get(self.split_index(node) as usize)
            .copied()
            .unwrap_or(f32::NAN);
        if fvalue.is_nan() {
            self.missing_child(node)
        } else if fvalue < self.split_condition(node) {
            self.left_child(node)
        } else {
            self.right_child(node)
        }
    }

    /// Leaf reached by one row; NaN or absent features follow the default branch.
    pub fn traverse_to_leaf(&self, row: &[f32]) -> NodeId {
        let mut node = 0;
        while !self.is_leaf(node) {
            node = self.next_node(node, row);
        }
        node
    }

    /// Node ids in depth-first order, left subtree first.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.n_nodes());
        let mut stack = vec![0 as NodeId];
        while let Some(node) = stack.pop() {
            order.push(node);
            if !self.is_leaf(node) {
                stack.push(self.right_child(node));
                stack.push(self.left_child(node));
            }
        }
        order
    }

    /// Depth of every node (root = 0).
    pub fn depths(&self) -> Vec<u32> {
        let mut depths = vec![0u32; self.n_nodes()];
        for node in self.preorder() {
            if !self.is_leaf(node) {
                let d = depths[node as usize] + 1;
                depths[self.left_child(node) as usize] = d;
                depths[self.right_child(node) as usize] = d;
            }
        }
        depths
    }

    /// Cover-weighted mean output of each subtree.
    pub fn node_means(&self) -> Vec<f32> {
        let mut means = vec![0.0f32; self.n_nodes()];
        for node in self.preorder().into_iter().rev() {
            let i = node as usize;
            if self.is_leaf(node) {
                means[i] = self.values[i];
                continue;
            }
            let (l, r) = (self.left_child(node) as usize, self.right_child(node) as usize);
            let total = self.covers[l] + self.covers[r];
            means[i] = if total > 0.0 {
                (self.covers[l] * means[l] + self.covers[r] * means[r]) / total
            } else {
                self.values[i]
            };
        }
        means
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Validate structural invariants: bounds, no sharing, no cycles, all reachable.
    pub fn validate(&self, n_features: u64) -> Result<(), TreeValidationError> {
        let n_nodes = self.n_nodes();
        if n_nodes == 0 {
            return Err(TreeValidationError::EmptyTree);
        }

        let mut visited = vec![false; n_nodes];
        let mut stack: Vec<NodeId> = vec![0];
        while let Some(node) = stack.pop() {
            let i = node as usize;
            if visited[i] {
                return Err(TreeValidationError::DuplicateVisit { node });
            }
            visited[i] = true;
            if self.is_leaf(node) {
                continue;
            }

            let feature = self.split_index(node);
            if n_features > 0 && u64::from(feature) >= n_features {
                return Err(TreeValidationError::FeatureOutOfBounds {
                    node,
                    feature,
                    n_features,
                });
            }
            for (side, child) in [("left", self.left_child(node)), ("right", self.right_child(node))] {
                if child == node {
                    return Err(TreeValidationError::SelfLoop { node });
                }
                if child as usize >= n_nodes {
                    return Err(TreeValidationError::ChildOutOfBounds {
                        node,
                        side,
                        child: i64::from(child),
                        n_nodes,
                    });
                }
                stack.push(child);
            }
        }

        match visited.iter().position(|&v| !v) {
            Some(i) => Err(TreeValidationError::UnreachableNode { node: i as NodeId }),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Schema conversion
    // =========================================================================

    pub fn to_schema(&self) -> TreeSchema {
        let child = |node: usize, c: &[NodeId]| {
            if self.is_leaf[node] {
                NO_CHILD
            } else {
                c[node] as i32
            }
        };
        TreeSchema {
            split_indices: self.split_indices.clone(),
            split_conditions: self.split_conditions.clone(),
            left_children: (0..self.n_nodes()).map(|i| child(i, &self.left_children)).collect(),
            right_children: (0..self.n_nodes()).map(|i| child(i, &self.right_children)).collect(),
            default_left: self.default_left.clone(),
            base_weights: self.values.clone(),
            loss_changes: self.gains.clone(),
            sum_hessian: self.covers.clone(),
        }
    }

    /// Build from a persisted tree, validating its structure.
    pub fn from_schema(schema: &TreeSchema, n_features: u64) -> Result<Self, TreeValidationError> {
        let n_nodes = schema.num_nodes();
        let lengths = [
            ("split_indices", schema.split_indices.len()),
            ("split_conditions", schema.split_conditions.len()),
            ("right_children", schema.right_children.len()),
            ("default_left", schema.default_left.len()),
            ("base_weights", schema.base_weights.len()),
            ("loss_changes", schema.loss_changes.len()),
            ("sum_hessian", schema.sum_hessian.len()),
        ];
        if let Some(&(field, len)) = lengths.iter().find(|(_, len)| *len != n_nodes) {
            return Err(TreeValidationError::LengthMismatch { field, len, n_nodes });
        }

        let mut left_children = Vec::with_capacity(n_nodes);
        let mut right_children = Vec::with_capacity(n_nodes);
        let mut is_leaf = Vec::with_capacity(n_nodes);
        for node in 0..n_nodes {
            let (l, r) = (schema.left_children[node], schema.right_children[node]);
            let leaf = l == NO_CHILD && r == NO_CHILD;
            if !leaf && (l == NO_CHILD || r == NO_CHILD) {
                return Err(TreeValidationError::HalfLeaf { node: node as NodeId });
            }
            for (side, child) in [("left", l), ("right", r)] {
                if !leaf && (child < 0 || child as usize >= n_nodes) {
                    return Err(TreeValidationError::ChildOutOfBounds {
                        node: node as NodeId,
                        side,
                        child: i64::from(child),
                        n_nodes,
                    });
                }
            }
            is_leaf.push(leaf);
            left_children.push(if leaf { 0 } else { l as NodeId });
            right_children.push(if leaf { 0 } else { r as NodeId });
        }

        let tree = Self {
            split_indices: schema.split_indices.clone(),
            split_conditions: schema.split_conditions.clone(),
            left_children,
            right_children,
            default_left: schema.default_left.clone(),
            is_leaf,
            values: schema.base_weights.clone(),
            gains: schema.loss_changes.clone(),
            covers: schema.sum_hessian.clone(),
        };
        tree.validate(n_features)?;
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `f0 < 0.5 ? (f1 < 2.0 ? 1.0 : 2.0) : 3.0`, missing goes left at the root.
    fn sample_tree() -> RegTree {
        let mut tree = RegTree::leaf(0.0, 4.0);
        let (left, right) = tree.expand(0, 0, 0.5, true, 10.0);
        tree.set_leaf(right, 3.0, 1.0);
        let (ll, lr) = tree.expand(left, 1, 2.0, false, 5.0);
        tree.set_leaf(left, 0.0, 3.0);
        tree.set_leaf(ll, 1.0, 2.0);
        tree.set_leaf(lr, 2.0, 1.0);
        tree
    }

    #[test]
    fn traversal_follows_splits_and_defaults() {
        let tree = sample_tree();
        assert_eq!(tree.value(tree.traverse_to_leaf(&[0.0, 1.0])), 1.0);
        assert_eq!(tree.value(tree.traverse_to_leaf(&[0.0, 3.0])), 2.0);
        assert_eq!(tree.value(tree.traverse_to_leaf(&[1.0, 0.0])), 3.0);
        // Missing root feature goes left, missing f1 goes right.
        assert_eq!(tree.value(tree.traverse_to_leaf(&[f32::NAN, f32::NAN])), 2.0);
        // Short rows treat absent features as missing.
        assert_eq!(tree.value(tree.traverse_to_leaf(&[])), 2.0);
    }

    #[test]
    fn preorder_and_depths() {
        let tree = sample_tree();
        assert_eq!(tree.preorder(), vec![0, 1, 3, 4, 2]);
        assert_eq!(tree.depths(), vec![0, 1, 1, 2, 2]);
    }

    #[test]
    fn node_means_are_cover_weighted() {
        let tree = sample_tree();
        let means = tree.node_means();
        assert!((means[1] - (2.0 * 1.0 + 1.0 * 2.0) / 3.0).abs() < 1e-6);
        let root = (3.0 * means[1] + 1.0 * 3.0) / 4.0;
        assert!((means[0] - root).abs() < 1e-6);
    }

    #[test]
    fn schema_roundtrip_is_lossless() {
        let tree = sample_tree();
        let schema = tree.to_schema();
        assert_eq!(schema.left_children[2], NO_CHILD);
        let back = RegTree::from_schema(&schema, 2).unwrap();
        assert_eq!(back, tree);
    }

    #[test]
    fn from_schema_rejects_bad_structure() {
        let mut schema = sample_tree().to_schema();
        schema.left_children[0] = 99;
        assert!(matches!(
            RegTree::from_schema(&schema, 2),
            Err(TreeValidationError::ChildOutOfBounds { .. })
        ));

        let mut schema = sample_tree().to_schema();
        schema.left_children[0] = 0;
        assert_eq!(
            RegTree::from_schema(&schema, 2),
            Err(TreeValidationError::SelfLoop { node: 0 })
        );

        let mut schema = sample_tree().to_schema();
        schema.sum_hessian.pop();
        assert!(matches!(
            RegTree::from_schema(&schema, 2),
            Err(TreeValidationError::LengthMismatch { field: "sum_hessian", .. })
        ));

        let schema = sample_tree().to_schema();
        assert!(matches!(
            RegTree::from_schema(&schema, 1),
            Err(TreeValidationError::FeatureOutOfBounds { feature: 1, .. })
        ));
    }

    #[test]
    fn shared_child_is_detected() {
        let mut schema = sample_tree().to_schema();
        // Point the right root child at the left subtree.
        schema.right_children[0] = 1;
        assert!(matches!(
            RegTree::from_schema(&schema, 2),
            Err(TreeValidationError::DuplicateVisit { .. })
        ));
    }
}
