use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::{
    channel::SimpleChannel,
    engine::{RingEngine, SeededDealer},
    model::DecisionTreeModel,
};

pub(crate) const SEED: u64 = 0x5eed;

pub(crate) fn engines(channels: &[SimpleChannel]) -> Vec<RingEngine<'_, SimpleChannel>> {
    let n = channels.len();
    channels
        .iter()
        .enumerate()
        .map(|(p, ch)| RingEngine::new(ch, SeededDealer::new(SEED, p, n), p, n).unwrap())
        .collect()
}

/// Depth 4 over 4 features, going right whenever the feature is below the threshold.
///
/// `[11, 3, 5, 7] -> 1`, `[11, 0, 5, 7] -> 2`, `[5, 0, 5, 12] -> 3`, `[4, 0, 5, 7] -> 4`
pub(crate) fn scenario_model() -> DecisionTreeModel {
    DecisionTreeModel::from_feature_indexes(
        4,
        4,
        vec![vec![0], vec![1, 0], vec![2, 3, 3, 2]],
        vec![vec![10], vec![1, 5], vec![6, 8, 10, 4]],
        vec![5, 1, 6, 2, 3, 7, 4, 8],
    )
    .unwrap()
}

/// A random model with small values, so that ties between features and thresholds are common.
pub(crate) fn random_model(rng: &mut ChaCha20Rng, depth: usize, num_features: usize) -> DecisionTreeModel {
    let indexes = (0..depth - 1)
        .map(|layer| (0..1 << layer).map(|_| rng.random_range(0..num_features)).collect())
        .collect();
    let thresholds = (0..depth - 1)
        .map(|layer| (0..1 << layer).map(|_| rng.random_range(-8..8)).collect())
        .collect();
    let categories = (0..1 << (depth - 1)).map(|_| rng.random_range(-100..100)).collect();
    DecisionTreeModel::from_feature_indexes(depth, num_features, indexes, thresholds, categories)
        .unwrap()
}

pub(crate) fn rng() -> ChaCha20Rng {
    ChaCha20Rng::seed_from_u64(SEED)
}
