//! Oblivious evaluation of a secret-shared decision tree.
//!
//! The evaluation never branches on secret data. Every node is compared (phase A), the
//! comparisons are combined into one bit per node telling whether the path to it was taken
//! (phase B) and finally every leaf is weighted by whether it was reached (phase C), so that the
//! communication pattern depends only on the depth and the number of features.

use std::iter;

use tracing::{Level, debug, instrument};

use crate::{
    engine::Engine,
    model::{Layers, SecretDecisionTreeModel, is_right_leaf, leaf_parent},
    protocol::Error,
};

/// Evaluates the tree on a secret feature vector, returning the category of the reached leaf.
///
/// Costs one multiplication round for the selected features, the rounds of one batched
/// comparison, `ceil(log2(max(1, D - 2)))` rounds for the paths and two more multiplication
/// rounds at the leaves: one for the leaf indicators and one to weight them by the categories.
#[instrument(level = Level::DEBUG, skip_all, fields(depth = model.depth()), err)]
pub async fn evaluate<E: Engine>(
    engine: &mut E,
    model: &SecretDecisionTreeModel<E::Secret>,
    features: &[E::Secret],
) -> Result<E::Secret, Error> {
    let indicators = leaf_indicators(engine, model, features).await?;
    let pairs: Vec<_> = indicators
        .into_iter()
        .zip(model.categories().iter().cloned())
        .collect();
    let contributions = engine.mul(&pairs).await?;
    debug!(rounds = engine.rounds(), "evaluated tree");
    Ok(engine.sum(&contributions))
}

/// Secret bits, one per leaf from left to right, that are 1 exactly for the reached leaf.
pub(crate) async fn leaf_indicators<E: Engine>(
    engine: &mut E,
    model: &SecretDecisionTreeModel<E::Secret>,
    features: &[E::Secret],
) -> Result<Vec<E::Secret>, Error> {
    if features.len() != model.num_features() {
        return Err(Error::FeatureLengthMismatch {
            expected: model.num_features(),
            actual: features.len(),
        });
    }
    let less_than = compare_nodes(engine, model, features).await?;
    let partial = aggregate_paths(engine, &less_than).await?;

    let depth = model.depth();
    let pairs: Vec<_> = (0..model.num_leaves())
        .map(|k| {
            let parent = leaf_parent(depth, k);
            let branch = if is_right_leaf(k) {
                less_than[parent].clone()
            } else {
                engine.not(&less_than[parent])
            };
            (branch, partial[parent].clone())
        })
        .collect();
    engine.mul(&pairs).await.map_err(Error::from)
}

/// Phase A: a secret bit per node, 1 iff the selected feature is less than the threshold.
async fn compare_nodes<E: Engine>(
    engine: &mut E,
    model: &SecretDecisionTreeModel<E::Secret>,
    features: &[E::Secret],
) -> Result<Layers<E::Secret>, Error> {
    let vectors: Vec<(&[E::Secret], &[E::Secret])> = model
        .feature_selectors()
        .iter()
        .map(|selector| (features, selector.as_slice()))
        .collect();
    let selected = engine.inner_products(&vectors).await?;
    let pairs: Vec<_> = selected
        .into_iter()
        .zip(model.thresholds().iter().cloned())
        .collect();
    let less_than = engine.less_than(&pairs).await?;
    let actual = less_than.len();
    let less_than = Layers::from_flat(model.shape().internal_layers(), less_than).ok_or(
        Error::EngineResultCount {
            expected: model.num_internal_nodes(),
            actual,
        },
    )?;
    debug!(
        nodes = model.num_internal_nodes(),
        rounds = engine.rounds(),
        "compared all nodes"
    );
    Ok(less_than)
}

/// Phase B: a secret bit per node, 1 iff every decision on the path from the root leads to it.
async fn aggregate_paths<E: Engine>(
    engine: &mut E,
    less_than: &Layers<E::Secret>,
) -> Result<Layers<E::Secret>, Error> {
    let mut partial = Layers::from_fn(less_than.num_layers(), |node| match node.parent() {
        None => engine.constant(1),
        Some(parent) if node.is_right_child() => less_than[parent].clone(),
        Some(parent) => engine.not(&less_than[parent]),
    });
    for round in PathRound::all(less_than.num_layers()) {
        partial = round.run(engine, partial).await?;
    }
    debug!(rounds = engine.rounds(), "aggregated paths");
    Ok(partial)
}

/// One round of pointer jumping over the path bits.
///
/// Before the round with chunk `c`, the bit of every node covers the `min(c, layer)` edges
/// above it. Multiplying it with the bit of the ancestor `c` layers up doubles that coverage,
/// so after the round each node covers `min(2c, layer)` edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PathRound {
    chunk: usize,
}

impl PathRound {
    /// The rounds needed for a tree with `internal_layers` layers of internal nodes.
    ///
    /// The deepest internal nodes sit `internal_layers - 1` edges below the root, so that
    /// `ceil(log2(max(1, internal_layers - 1)))` rounds are needed.
    pub(crate) fn all(internal_layers: usize) -> impl Iterator<Item = PathRound> {
        let deepest = internal_layers.saturating_sub(1);
        iter::successors(Some(1usize), |c| Some(c * 2))
            .take_while(move |c| *c < deepest)
            .map(|chunk| PathRound { chunk })
    }

    async fn run<E: Engine>(
        self,
        engine: &mut E,
        mut partial: Layers<E::Secret>,
    ) -> Result<Layers<E::Secret>, Error> {
        let updates: Vec<_> = partial
            .nodes()
            .filter(|node| node.layer > self.chunk)
            .filter_map(|node| Some((node, node.ancestor(self.chunk)?)))
            .collect();
        let pairs: Vec<_> = updates
            .iter()
            .map(|(node, ancestor)| (partial[*node].clone(), partial[*ancestor].clone()))
            .collect();
        let products = engine.mul(&pairs).await?;
        if products.len() != updates.len() {
            return Err(Error::EngineResultCount {
                expected: updates.len(),
                actual: products.len(),
            });
        }
        for ((node, _), product) in updates.into_iter().zip(products) {
            partial[node] = product;
        }
        Ok(partial)
    }
}
