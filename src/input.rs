//! Secret-sharing a decision tree between the model owner (Provider) and everyone else.
//!
//! The Provider shares every selector coordinate, threshold and category in one batched input,
//! in that order and layer by layer. The Receivers know only the depth and the number of
//! features and receive the same number of shares. Before anyone gets to use the shared model,
//! all parties jointly check that the selectors are well-formed, since a cheating Provider could
//! otherwise mix several features or scale a feature to manipulate the result.

use serde::{Deserialize, Serialize};
use tracing::{Level, debug, instrument, warn};

use crate::{
    config::Config,
    engine::{Engine, Reveal},
    model::{DecisionTreeModel, Layers, NodeIndex, SecretDecisionTreeModel, TreeShape},
    protocol::Error,
};

/// The check run on the shared feature selectors before the model is handed out.
///
/// Each check opens one value per selector coordinate or per selector to all parties. For an
/// honest Provider these values are constant and thus reveal nothing about the model.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsistencyCheck {
    /// Opens `b * (1 - b)` for every coordinate `b`.
    ///
    /// Guarantees that every coordinate is 0 or 1, but not that exactly one of them is 1. A
    /// selector of all zeros or with several ones passes.
    Booleanity,
    /// Opens the sum of every selector.
    ///
    /// Guarantees that the coordinates sum to 1, but not that they are bits. A selector such as
    /// `[2, -1]` passes.
    SumToOne,
    /// Runs both checks, with their openings batched into a single round.
    ///
    /// Guarantees a genuine one-hot selector: every coordinate is a bit and exactly one is set.
    #[default]
    Full,
}

impl ConsistencyCheck {
    fn checks_booleanity(&self) -> bool {
        matches!(self, Self::Booleanity | Self::Full)
    }

    fn checks_sum(&self) -> bool {
        matches!(self, Self::SumToOne | Self::Full)
    }
}

/// Shares a plaintext model as its owner.
///
/// `num_features` is the length of the feature vector the model will be evaluated on, as
/// agreed with the other parties.
#[instrument(level = Level::DEBUG, skip_all, fields(party = engine.party()), err)]
pub async fn input_as_provider<E: Engine>(
    engine: &mut E,
    model: &DecisionTreeModel,
    num_features: usize,
    config: &Config,
) -> Result<SecretDecisionTreeModel<E::Secret>, Error> {
    if num_features != model.num_features() {
        return Err(Error::FeatureLengthMismatch {
            expected: num_features,
            actual: model.num_features(),
        });
    }
    let mut values: Vec<i64> = model.feature_selectors().iter().flatten().copied().collect();
    values.extend(model.thresholds().iter());
    values.extend(model.categories());
    let owner = engine.party();
    share_model(engine, model.shape(), owner, Some(&values), config).await
}

/// Receives the shares of a model of the given shape from the `provider`.
#[instrument(level = Level::DEBUG, skip_all, fields(party = engine.party(), provider = provider), err)]
pub async fn input_as_receiver<E: Engine>(
    engine: &mut E,
    depth: usize,
    num_features: usize,
    provider: usize,
    config: &Config,
) -> Result<SecretDecisionTreeModel<E::Secret>, Error> {
    let shape = TreeShape::new(depth, num_features)?;
    share_model(engine, shape, provider, None, config).await
}

/// Inputs the flattened model of `owner` and checks its selectors.
pub(crate) async fn share_model<E: Engine>(
    engine: &mut E,
    shape: TreeShape,
    owner: usize,
    values: Option<&[i64]>,
    config: &Config,
) -> Result<SecretDecisionTreeModel<E::Secret>, Error> {
    let num_features = shape.num_features();
    let num_selector_values = shape.num_selector_values();
    let len = shape.num_input_values();
    let shares = engine.input(owner, values, len).await?;
    if shares.len() != len {
        return Err(Error::EngineResultCount {
            expected: len,
            actual: shares.len(),
        });
    }
    let (selectors, rest) = shares.split_at(num_selector_values);
    let (thresholds, categories) = rest.split_at(shape.num_internal_nodes());

    let mut selectors = selectors.chunks(num_features);
    let selectors = Layers::from_fn(shape.internal_layers(), |_| {
        selectors.next().map(<[_]>::to_vec).unwrap_or_default()
    });
    let thresholds = Layers::from_flat(shape.internal_layers(), thresholds.to_vec()).ok_or(
        Error::EngineResultCount {
            expected: len,
            actual: shares.len(),
        },
    )?;
    let model =
        SecretDecisionTreeModel::from_parts(shape, selectors, thresholds, categories.to_vec());
    debug!(
        nodes = shape.num_internal_nodes(),
        leaves = shape.num_leaves(),
        "received model shares"
    );

    check_selectors(engine, &model, config.consistency_check).await?;
    Ok(model)
}

/// Opens the values required by `check` and fails if any selector is malformed.
async fn check_selectors<E: Engine>(
    engine: &mut E,
    model: &SecretDecisionTreeModel<E::Secret>,
    check: ConsistencyCheck,
) -> Result<(), Error> {
    let nodes: Vec<NodeIndex> = model.feature_selectors().nodes().collect();
    let num_features = model.num_features();
    let mut to_open = vec![];
    if check.checks_booleanity() {
        let pairs: Vec<_> = model
            .feature_selectors()
            .iter()
            .flatten()
            .map(|b| (b.clone(), engine.not(b)))
            .collect();
        to_open.extend(engine.mul(&pairs).await?);
    }
    if check.checks_sum() {
        to_open.extend(
            model
                .feature_selectors()
                .iter()
                .map(|selector| engine.sum(selector)),
        );
    }
    let opened = engine
        .open(&to_open, Reveal::All)
        .await?
        .ok_or(Error::MissingOutput)?;
    if opened.len() != to_open.len() {
        return Err(Error::EngineResultCount {
            expected: to_open.len(),
            actual: opened.len(),
        });
    }

    let mut failed = vec![];
    let mut opened = opened.as_slice();
    if check.checks_booleanity() {
        let (products, rest) = opened.split_at(nodes.len() * num_features);
        for (node, products) in nodes.iter().zip(products.chunks(num_features)) {
            if products.iter().any(|p| *p != 0) {
                failed.push(*node);
            }
        }
        opened = rest;
    }
    if check.checks_sum() {
        for (node, sum) in nodes.iter().zip(opened) {
            if *sum != 1 && !failed.contains(node) {
                failed.push(*node);
            }
        }
    }
    if !failed.is_empty() {
        failed.sort();
        warn!(?check, nodes = ?failed, "feature selectors are not one-hot");
        return Err(Error::MaliciousBehavior {
            check,
            nodes: failed,
        });
    }
    debug!(?check, "feature selectors passed the consistency check");
    Ok(())
}

#[cfg(test)]
mod tests {
    use futures::future::join_all;

    use super::*;
    use crate::{channel::SimpleChannel, test_utils::engines};

    /// Depth 2 with 2 features: one selector, one threshold, two categories.
    async fn share_depth_2(
        selector: [i64; 2],
        check: ConsistencyCheck,
    ) -> Vec<Result<Vec<Option<Vec<i64>>>, Error>> {
        let channels = SimpleChannel::channels(2);
        let mut engines = engines(&channels);
        let values = [selector[0], selector[1], 0, 10, 20];
        let values = &values;
        let config = Config::default().with_consistency_check(check);
        let config = &config;
        join_all(engines.iter_mut().map(|engine| async move {
            let shape = TreeShape::new(2, 2)?;
            let own = (engine.party() == 0).then_some(&values[..]);
            let model = share_model(engine, shape, 0, own, config).await?;
            let mut opened = vec![];
            for selector in model.feature_selectors().iter() {
                opened.push(engine.open(selector, Reveal::All).await?);
            }
            Ok::<_, Error>(opened)
        }))
        .await
    }

    fn assert_malicious(results: Vec<Result<Vec<Option<Vec<i64>>>, Error>>, check: ConsistencyCheck) {
        for result in results {
            match result {
                Err(Error::MaliciousBehavior { check: c, nodes }) => {
                    assert_eq!(c, check);
                    assert_eq!(nodes, vec![NodeIndex::ROOT]);
                }
                other => panic!("expected malicious behavior, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn honest_selectors_pass_every_check() {
        for check in [
            ConsistencyCheck::Booleanity,
            ConsistencyCheck::SumToOne,
            ConsistencyCheck::Full,
        ] {
            for result in share_depth_2([0, 1], check).await {
                assert_eq!(result.unwrap(), vec![Some(vec![0, 1])]);
            }
        }
    }

    #[tokio::test]
    async fn non_bits_are_malicious() {
        assert_malicious(
            share_depth_2([2, 0], ConsistencyCheck::Full).await,
            ConsistencyCheck::Full,
        );
        assert_malicious(
            share_depth_2([2, -1], ConsistencyCheck::Booleanity).await,
            ConsistencyCheck::Booleanity,
        );
    }

    #[tokio::test]
    async fn each_check_alone_has_a_blind_spot() {
        for result in share_depth_2([2, -1], ConsistencyCheck::SumToOne).await {
            assert_eq!(result.unwrap(), vec![Some(vec![2, -1])]);
        }
        for result in share_depth_2([1, 1], ConsistencyCheck::Booleanity).await {
            assert_eq!(result.unwrap(), vec![Some(vec![1, 1])]);
        }
        assert_malicious(
            share_depth_2([1, 1], ConsistencyCheck::Full).await,
            ConsistencyCheck::Full,
        );
        assert_malicious(
            share_depth_2([0, 0], ConsistencyCheck::SumToOne).await,
            ConsistencyCheck::SumToOne,
        );
    }

    #[tokio::test]
    async fn reports_every_malformed_node() {
        let channels = SimpleChannel::channels(3);
        let mut engines = engines(&channels);
        // depth 3, 2 features: nodes (0, 0), (1, 0), (1, 1)
        let values = [0, 1, 1, -1, 1, 0, 5, 5, 5, 1, 2, 3, 4];
        let values = &values;
        let config = Config::default();
        let config = &config;
        let results = join_all(engines.iter_mut().map(|engine| async move {
            let shape = TreeShape::new(3, 2)?;
            let own = (engine.party() == 2).then_some(&values[..]);
            share_model(engine, shape, 2, own, config).await.map(|_| ())
        }))
        .await;
        for result in results {
            match result {
                Err(Error::MaliciousBehavior { nodes, .. }) => {
                    assert_eq!(nodes, vec![NodeIndex::new(1, 0)])
                }
                other => panic!("expected malicious behavior, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn provider_and_receiver_agree_on_the_model() {
        let model = crate::test_utils::scenario_model();
        let channels = SimpleChannel::channels(2);
        let mut engines = engines(&channels);
        let model = &model;
        let config = Config::default();
        let config = &config;
        let results = join_all(engines.iter_mut().map(|engine| async move {
            let shared = if engine.party() == 0 {
                input_as_provider(engine, model, 4, config).await?
            } else {
                input_as_receiver(engine, 4, 4, 0, config).await?
            };
            let thresholds: Vec<_> = shared.thresholds().iter().cloned().collect();
            let thresholds = engine.open(&thresholds, Reveal::All).await?;
            let categories = engine.open(shared.categories(), Reveal::All).await?;
            Ok::<_, Error>((thresholds, categories))
        }))
        .await;
        let expected_thresholds: Vec<i64> = model.thresholds().iter().copied().collect();
        for result in results {
            let (thresholds, categories) = result.unwrap();
            assert_eq!(thresholds, Some(expected_thresholds.clone()));
            assert_eq!(categories, Some(model.categories().to_vec()));
        }
    }

    #[tokio::test]
    async fn provider_rejects_a_different_feature_count() {
        let model = crate::test_utils::scenario_model();
        let channels = SimpleChannel::channels(2);
        let mut engines = engines(&channels);
        let err = input_as_provider(&mut engines[0], &model, 3, &Config::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::FeatureLengthMismatch {
                expected: 3,
                actual: 4
            }
        ));
    }

    #[tokio::test]
    async fn receiver_validates_the_shape() {
        let channels = SimpleChannel::channels(2);
        let mut engines = engines(&channels);
        let err = input_as_receiver(&mut engines[1], 1, 4, 0, &Config::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(crate::model::ValidationError::DepthTooSmall(1))
        ));
        let err = input_as_receiver(&mut engines[1], 3, 0, 0, &Config::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(crate::model::ValidationError::NoFeatures)
        ));
    }

    #[tokio::test]
    async fn receiver_rejects_an_oversized_shape_before_communicating() {
        let channels = SimpleChannel::channels(2);
        let mut engines = engines(&channels);
        let err = input_as_receiver(&mut engines[1], 32, usize::MAX / 4, 0, &Config::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(crate::model::ValidationError::ShapeTooLarge {
                depth: 32,
                num_features
            }) if num_features == usize::MAX / 4
        ));
        assert_eq!(engines[1].rounds(), 0);
    }
}
