//! Plaintext and secret-shared representations of a complete binary decision tree.
//!
//! A tree of depth `D` has `D - 1` layers of internal nodes, layer `i` holding `2^i` nodes, and
//! a final layer of `2^(D-1)` leaves. Every internal node tests one feature against a
//! threshold: if the feature is strictly less than the threshold the walk continues with the
//! right child, otherwise with the left child. Leaves carry the category returned by the walk.

use std::{
    fmt,
    ops::{Index, IndexMut},
};

/// The largest supported tree depth.
pub const MAX_DEPTH: usize = 32;

/// The largest absolute value of thresholds, categories and features.
///
/// Keeping values within `±2^62` guarantees that differences never overflow a 64-bit ring.
pub const MAX_ABS_VALUE: i64 = (1 << 62) - 1;

/// Errors caused by a malformed model or tree shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A tree needs at least a root and a layer of leaves.
    #[error("depth must be at least 2, got {0}")]
    DepthTooSmall(usize),
    /// The depth exceeds [`MAX_DEPTH`].
    #[error("depth must be at most {MAX_DEPTH}, got {0}")]
    DepthTooLarge(usize),
    /// Nodes need at least one feature to test.
    #[error("the feature vector must not be empty")]
    NoFeatures,
    /// The number of internal layers does not match the depth.
    #[error("expected {expected} layers of {what}, got {actual}")]
    WrongLayerCount {
        /// Which part of the model is malformed.
        what: &'static str,
        /// The number of layers required by the depth.
        expected: usize,
        /// The number of layers provided.
        actual: usize,
    },
    /// A layer does not have `2^layer` entries.
    #[error("expected {expected} {what} in layer {layer}, got {actual}")]
    WrongLayerSize {
        /// Which part of the model is malformed.
        what: &'static str,
        /// The index of the malformed layer.
        layer: usize,
        /// The size required for the layer.
        expected: usize,
        /// The size provided.
        actual: usize,
    },
    /// A feature selector does not have one coordinate per feature.
    #[error("selector of node {node} has {actual} coordinates instead of {expected}")]
    WrongSelectorLength {
        /// The node with the malformed selector.
        node: NodeIndex,
        /// The number of features.
        expected: usize,
        /// The length of the selector.
        actual: usize,
    },
    /// A feature selector is not a one-hot vector.
    #[error("selector of node {node} is not one-hot")]
    NotOneHot {
        /// The node with the malformed selector.
        node: NodeIndex,
    },
    /// A feature index does not refer to a feature.
    #[error("node {node} tests feature {index}, but there are only {num_features} features")]
    FeatureIndexOutOfRange {
        /// The node testing the missing feature.
        node: NodeIndex,
        /// The feature index.
        index: usize,
        /// The number of features.
        num_features: usize,
    },
    /// The number of categories does not match the number of leaves.
    #[error("expected {expected} categories, got {actual}")]
    WrongCategoryCount {
        /// The number of leaves.
        expected: usize,
        /// The number of categories provided.
        actual: usize,
    },
    /// The shape has more values to share than fit into memory.
    #[error("a tree of depth {depth} over {num_features} features is too large")]
    ShapeTooLarge {
        /// The requested depth.
        depth: usize,
        /// The requested number of features.
        num_features: usize,
    },
    /// A threshold, category or feature exceeds [`MAX_ABS_VALUE`].
    #[error("value {0} is out of range")]
    ValueOutOfRange(i64),
}

/// The position of an internal node, addressed by layer and position within the layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex {
    /// The layer, 0 being the root.
    pub layer: usize,
    /// The position within the layer, counted from the left.
    pub position: usize,
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.layer, self.position)
    }
}

impl NodeIndex {
    /// The root of the tree.
    pub const ROOT: NodeIndex = NodeIndex {
        layer: 0,
        position: 0,
    };

    /// Creates the index of a node.
    pub fn new(layer: usize, position: usize) -> Self {
        Self { layer, position }
    }

    /// The parent node, `None` for the root.
    pub fn parent(&self) -> Option<NodeIndex> {
        self.ancestor(1)
    }

    /// The ancestor `distance` layers above, `None` if that is above the root.
    pub fn ancestor(&self, distance: usize) -> Option<NodeIndex> {
        if distance > self.layer {
            return None;
        }
        Some(NodeIndex {
            layer: self.layer - distance,
            position: self.position >> distance,
        })
    }

    /// The child taken when the node's comparison fails.
    pub fn left_child(&self) -> NodeIndex {
        NodeIndex {
            layer: self.layer + 1,
            position: 2 * self.position,
        }
    }

    /// The child taken when the node's comparison succeeds.
    pub fn right_child(&self) -> NodeIndex {
        NodeIndex {
            layer: self.layer + 1,
            position: 2 * self.position + 1,
        }
    }

    /// Whether the node is reached from its parent by a successful comparison.
    pub fn is_right_child(&self) -> bool {
        self.position % 2 == 1
    }
}

/// The parent of leaf `leaf` in a tree of the given depth, which must be at least 2.
pub(crate) fn leaf_parent(depth: usize, leaf: usize) -> NodeIndex {
    NodeIndex {
        layer: depth - 2,
        position: leaf / 2,
    }
}

/// Whether leaf `leaf` is reached from its parent by a successful comparison.
pub(crate) fn is_right_leaf(leaf: usize) -> bool {
    leaf % 2 == 1
}

/// Per-layer storage of one value per internal node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layers<T>(Vec<Vec<T>>);

impl<T> Layers<T> {
    /// Builds layers `0..num_layers` (layer `i` with `2^i` entries) from a function of the node.
    pub fn from_fn(num_layers: usize, mut f: impl FnMut(NodeIndex) -> T) -> Self {
        Layers(
            (0..num_layers)
                .map(|layer| {
                    (0..1 << layer)
                        .map(|position| f(NodeIndex { layer, position }))
                        .collect()
                })
                .collect(),
        )
    }

    /// Splits values listed layer by layer into `num_layers` layers.
    ///
    /// Returns `None` unless there are exactly `2^num_layers - 1` values.
    pub fn from_flat(num_layers: usize, values: Vec<T>) -> Option<Self> {
        if values.len() != (1 << num_layers) - 1 {
            return None;
        }
        let mut values = values.into_iter();
        Some(Layers(
            (0..num_layers)
                .map(|layer| values.by_ref().take(1 << layer).collect())
                .collect(),
        ))
    }

    /// Wraps per-layer vectors, checking that layer `i` has `2^i` entries.
    pub fn from_layers(
        what: &'static str,
        num_layers: usize,
        layers: Vec<Vec<T>>,
    ) -> Result<Self, ValidationError> {
        if layers.len() != num_layers {
            return Err(ValidationError::WrongLayerCount {
                what,
                expected: num_layers,
                actual: layers.len(),
            });
        }
        for (layer, entries) in layers.iter().enumerate() {
            if entries.len() != 1 << layer {
                return Err(ValidationError::WrongLayerSize {
                    what,
                    layer,
                    expected: 1 << layer,
                    actual: entries.len(),
                });
            }
        }
        Ok(Layers(layers))
    }

    /// The number of layers.
    pub fn num_layers(&self) -> usize {
        self.0.len()
    }

    /// The entries of one layer, `None` if there is no such layer.
    pub fn layer(&self, layer: usize) -> Option<&[T]> {
        self.0.get(layer).map(Vec::as_slice)
    }

    /// The value of a node, `None` if the node is outside of the layers.
    pub fn get(&self, node: NodeIndex) -> Option<&T> {
        self.0.get(node.layer).and_then(|l| l.get(node.position))
    }

    /// All node indexes, layer by layer.
    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.0.iter().enumerate().flat_map(|(layer, entries)| {
            (0..entries.len()).map(move |position| NodeIndex { layer, position })
        })
    }

    /// All values, layer by layer.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.iter().flatten()
    }

    /// Applies a function to every value, keeping the shape.
    pub fn map<U>(&self, mut f: impl FnMut(NodeIndex, &T) -> U) -> Layers<U> {
        Layers(
            self.0
                .iter()
                .enumerate()
                .map(|(layer, entries)| {
                    entries
                        .iter()
                        .enumerate()
                        .map(|(position, v)| f(NodeIndex { layer, position }, v))
                        .collect()
                })
                .collect(),
        )
    }
}

impl<T> Index<NodeIndex> for Layers<T> {
    type Output = T;

    fn index(&self, node: NodeIndex) -> &Self::Output {
        &self.0[node.layer][node.position]
    }
}

impl<T> IndexMut<NodeIndex> for Layers<T> {
    fn index_mut(&mut self, node: NodeIndex) -> &mut Self::Output {
        &mut self.0[node.layer][node.position]
    }
}

/// The public shape of a tree: its depth and the length of the feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeShape {
    depth: usize,
    num_features: usize,
}

impl TreeShape {
    /// Validates and creates a tree shape.
    pub fn new(depth: usize, num_features: usize) -> Result<Self, ValidationError> {
        if depth < 2 {
            return Err(ValidationError::DepthTooSmall(depth));
        }
        if depth > MAX_DEPTH {
            return Err(ValidationError::DepthTooLarge(depth));
        }
        if num_features == 0 {
            return Err(ValidationError::NoFeatures);
        }
        let shape = Self {
            depth,
            num_features,
        };
        shape
            .num_internal_nodes()
            .checked_mul(num_features)
            .and_then(|n| n.checked_add(shape.num_internal_nodes()))
            .and_then(|n| n.checked_add(shape.num_leaves()))
            .ok_or(ValidationError::ShapeTooLarge {
                depth,
                num_features,
            })?;
        Ok(shape)
    }

    /// The number of layers including the leaves.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The length of the feature vector.
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// The number of layers of internal nodes.
    pub fn internal_layers(&self) -> usize {
        self.depth - 1
    }

    /// `2^(D-1) - 1`
    pub fn num_internal_nodes(&self) -> usize {
        self.num_leaves() - 1
    }

    /// `2^(D-1)`
    pub fn num_leaves(&self) -> usize {
        1 << (self.depth - 1)
    }

    /// The number of values shared for a model of this shape: all selector coordinates, then
    /// all thresholds, then all categories.
    pub fn num_input_values(&self) -> usize {
        self.num_selector_values() + self.num_internal_nodes() + self.num_leaves()
    }

    /// The number of selector coordinates, one per feature and internal node.
    pub fn num_selector_values(&self) -> usize {
        self.num_internal_nodes() * self.num_features
    }
}

fn check_range(value: i64) -> Result<i64, ValidationError> {
    if value.unsigned_abs() > MAX_ABS_VALUE as u64 {
        Err(ValidationError::ValueOutOfRange(value))
    } else {
        Ok(value)
    }
}

/// A decision tree in plaintext, as held by the model owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionTreeModel {
    shape: TreeShape,
    feature_selectors: Layers<Vec<i64>>,
    thresholds: Layers<i64>,
    categories: Vec<i64>,
}

impl DecisionTreeModel {
    /// Validates and creates a model from one-hot feature selectors.
    pub fn new(
        depth: usize,
        num_features: usize,
        feature_selectors: Vec<Vec<Vec<i64>>>,
        thresholds: Vec<Vec<i64>>,
        categories: Vec<i64>,
    ) -> Result<Self, ValidationError> {
        let shape = TreeShape::new(depth, num_features)?;
        let feature_selectors =
            Layers::from_layers("feature selectors", shape.internal_layers(), feature_selectors)?;
        let thresholds = Layers::from_layers("thresholds", shape.internal_layers(), thresholds)?;
        for node in feature_selectors.nodes() {
            let selector = &feature_selectors[node];
            if selector.len() != num_features {
                return Err(ValidationError::WrongSelectorLength {
                    node,
                    expected: num_features,
                    actual: selector.len(),
                });
            }
            let ones = selector.iter().filter(|b| **b == 1).count();
            if ones != 1 || selector.iter().any(|b| *b != 0 && *b != 1) {
                return Err(ValidationError::NotOneHot { node });
            }
        }
        for threshold in thresholds.iter() {
            check_range(*threshold)?;
        }
        if categories.len() != shape.num_leaves() {
            return Err(ValidationError::WrongCategoryCount {
                expected: shape.num_leaves(),
                actual: categories.len(),
            });
        }
        for category in categories.iter() {
            check_range(*category)?;
        }
        Ok(Self {
            shape,
            feature_selectors,
            thresholds,
            categories,
        })
    }

    /// Validates and creates a model from the index of the feature tested at each node.
    pub fn from_feature_indexes(
        depth: usize,
        num_features: usize,
        feature_indexes: Vec<Vec<usize>>,
        thresholds: Vec<Vec<i64>>,
        categories: Vec<i64>,
    ) -> Result<Self, ValidationError> {
        let shape = TreeShape::new(depth, num_features)?;
        let feature_indexes =
            Layers::from_layers("feature indexes", shape.internal_layers(), feature_indexes)?;
        let mut selectors: Vec<Vec<Vec<i64>>> = vec![];
        for node in feature_indexes.nodes() {
            let index = feature_indexes[node];
            if index >= num_features {
                return Err(ValidationError::FeatureIndexOutOfRange {
                    node,
                    index,
                    num_features,
                });
            }
            if node.position == 0 {
                selectors.push(vec![]);
            }
            let selector = (0..num_features).map(|f| (f == index) as i64).collect();
            if let Some(layer) = selectors.last_mut() {
                layer.push(selector);
            }
        }
        Self::new(depth, num_features, selectors, thresholds, categories)
    }

    /// The public shape of the tree.
    pub fn shape(&self) -> TreeShape {
        self.shape
    }

    /// The number of layers including the leaves.
    pub fn depth(&self) -> usize {
        self.shape.depth()
    }

    /// The length of the feature vector.
    pub fn num_features(&self) -> usize {
        self.shape.num_features()
    }

    /// `2^(D-1) - 1`
    pub fn num_internal_nodes(&self) -> usize {
        self.shape.num_internal_nodes()
    }

    /// `2^(D-1)`
    pub fn num_leaves(&self) -> usize {
        self.shape.num_leaves()
    }

    /// The one-hot selector of an internal node.
    pub fn selector(&self, node: NodeIndex) -> Option<&[i64]> {
        self.feature_selectors.get(node).map(Vec::as_slice)
    }

    /// The threshold of an internal node.
    pub fn threshold(&self, node: NodeIndex) -> Option<i64> {
        self.thresholds.get(node).copied()
    }

    /// The category of leaf `k`, counted from the left.
    pub fn category(&self, k: usize) -> Option<i64> {
        self.categories.get(k).copied()
    }

    /// The one-hot selectors of all internal nodes.
    pub fn feature_selectors(&self) -> &Layers<Vec<i64>> {
        &self.feature_selectors
    }

    /// The thresholds of all internal nodes.
    pub fn thresholds(&self) -> &Layers<i64> {
        &self.thresholds
    }

    /// The categories of all leaves, from left to right.
    pub fn categories(&self) -> &[i64] {
        &self.categories
    }

    /// The index of the feature tested at the given node.
    pub fn feature_index(&self, node: NodeIndex) -> Option<usize> {
        self.feature_selectors
            .get(node)?
            .iter()
            .position(|b| *b == 1)
    }
}

/// A decision tree whose parameters are all secret-shared.
///
/// Produced by the input protocol, the one-hot structure of the selectors is not re-checked.
#[derive(Debug, Clone)]
pub struct SecretDecisionTreeModel<S> {
    shape: TreeShape,
    feature_selectors: Layers<Vec<S>>,
    thresholds: Layers<S>,
    categories: Vec<S>,
}

impl<S> SecretDecisionTreeModel<S> {
    pub(crate) fn from_parts(
        shape: TreeShape,
        feature_selectors: Layers<Vec<S>>,
        thresholds: Layers<S>,
        categories: Vec<S>,
    ) -> Self {
        Self {
            shape,
            feature_selectors,
            thresholds,
            categories,
        }
    }

    /// The public shape of the tree.
    pub fn shape(&self) -> TreeShape {
        self.shape
    }

    /// The number of layers including the leaves.
    pub fn depth(&self) -> usize {
        self.shape.depth()
    }

    /// The length of the feature vector.
    pub fn num_features(&self) -> usize {
        self.shape.num_features()
    }

    /// `2^(D-1) - 1`
    pub fn num_internal_nodes(&self) -> usize {
        self.shape.num_internal_nodes()
    }

    /// `2^(D-1)`
    pub fn num_leaves(&self) -> usize {
        self.shape.num_leaves()
    }

    /// The secret selector of an internal node.
    pub fn selector(&self, node: NodeIndex) -> Option<&[S]> {
        self.feature_selectors.get(node).map(Vec::as_slice)
    }

    /// The secret threshold of an internal node.
    pub fn threshold(&self, node: NodeIndex) -> Option<&S> {
        self.thresholds.get(node)
    }

    /// The secret category of leaf `k`.
    pub fn category(&self, k: usize) -> Option<&S> {
        self.categories.get(k)
    }

    /// The secret one-hot selectors of all internal nodes.
    pub fn feature_selectors(&self) -> &Layers<Vec<S>> {
        &self.feature_selectors
    }

    /// The secret thresholds of all internal nodes.
    pub fn thresholds(&self) -> &Layers<S> {
        &self.thresholds
    }

    /// The secret categories of all leaves, from left to right.
    pub fn categories(&self) -> &[S] {
        &self.categories
    }
}
