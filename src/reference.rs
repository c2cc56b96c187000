//! Plaintext evaluation of a decision tree, used to check the results of the secure protocol.

use crate::{
    model::{DecisionTreeModel, Layers, NodeIndex, is_right_leaf, leaf_parent},
    protocol::Error,
};

fn check_features(model: &DecisionTreeModel, features: &[i64]) -> Result<(), Error> {
    if features.len() != model.num_features() {
        return Err(Error::FeatureLengthMismatch {
            expected: model.num_features(),
            actual: features.len(),
        });
    }
    Ok(())
}

/// Computes the category the secure evaluation reveals, using the same bit arithmetic.
pub fn evaluate(model: &DecisionTreeModel, features: &[i64]) -> Result<i64, Error> {
    check_features(model, features)?;
    let less_than = model.feature_selectors().map(|node, selector| {
        let selected: i64 = selector.iter().zip(features).map(|(s, x)| s * x).sum();
        (selected < model.thresholds()[node]) as i64
    });
    let mut partial = Layers::from_fn(less_than.num_layers(), |_| 1);
    for node in less_than.nodes() {
        if let Some(parent) = node.parent() {
            let edge = if node.is_right_child() {
                less_than[parent]
            } else {
                1 - less_than[parent]
            };
            partial[node] = partial[parent] * edge;
        }
    }
    let depth = model.depth();
    Ok(model
        .categories()
        .iter()
        .enumerate()
        .map(|(k, category)| {
            let parent = leaf_parent(depth, k);
            let branch = if is_right_leaf(k) {
                less_than[parent]
            } else {
                1 - less_than[parent]
            };
            branch * partial[parent] * category
        })
        .sum())
}

/// Walks down from the root and returns the index of the reached leaf.
pub fn walk(model: &DecisionTreeModel, features: &[i64]) -> Result<usize, Error> {
    check_features(model, features)?;
    let mut node = NodeIndex::ROOT;
    loop {
        let feature = model
            .feature_index(node)
            .and_then(|i| features.get(i))
            .copied()
            .unwrap_or_default();
        let threshold = model.threshold(node).unwrap_or_default();
        let child = if feature < threshold {
            node.right_child()
        } else {
            node.left_child()
        };
        if child.layer == model.depth() - 1 {
            return Ok(child.position);
        }
        node = child;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{random_model, rng, scenario_model};

    #[test]
    fn classifies_the_scenarios() -> Result<(), Error> {
        let model = scenario_model();
        for (features, category, leaf) in [
            ([11, 3, 5, 7], 1, 1),
            ([11, 0, 5, 7], 2, 3),
            ([5, 0, 5, 12], 3, 4),
            ([4, 0, 5, 7], 4, 6),
        ] {
            assert_eq!(evaluate(&model, &features)?, category);
            assert_eq!(walk(&model, &features)?, leaf);
        }
        Ok(())
    }

    #[test]
    fn ties_are_not_less() -> Result<(), Error> {
        let model =
            DecisionTreeModel::from_feature_indexes(2, 1, vec![vec![0]], vec![vec![0]], vec![7, 9])?;
        assert_eq!(evaluate(&model, &[0])?, 7);
        assert_eq!(walk(&model, &[0])?, 0);
        assert_eq!(evaluate(&model, &[-1])?, 9);
        Ok(())
    }

    #[test]
    fn bit_arithmetic_matches_the_walk() -> Result<(), Error> {
        let mut rng = rng();
        for depth in 2..=7 {
            for _ in 0..20 {
                let model = random_model(&mut rng, depth, 3);
                for features in [[0, 0, 0], [-5, 3, 7], [8, -8, 1]] {
                    let leaf = walk(&model, &features)?;
                    assert_eq!(evaluate(&model, &features)?, model.categories()[leaf]);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn rejects_a_feature_vector_of_the_wrong_length() {
        let model = scenario_model();
        assert!(matches!(
            evaluate(&model, &[1, 2]),
            Err(Error::FeatureLengthMismatch {
                expected: 4,
                actual: 2
            })
        ));
    }
}
