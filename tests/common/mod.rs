// The module is built separately for each integration test, so if some items
// are only used in one test but not the other, this will result in warnings
#![allow(dead_code)]

use std::sync::Once;

use polytree::model::DecisionTreeModel;
use proptest::prelude::*;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

static TRACING: Once = Once::new();

pub(crate) fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_test_writer()
            .try_init();
    });
}

/// Depth 4 over 4 features: feature 0 at the root, features 1 and 0 below, then 2, 3, 3, 2.
pub(crate) fn depth_4_model() -> DecisionTreeModel {
    DecisionTreeModel::from_feature_indexes(
        4,
        4,
        vec![vec![0], vec![1, 0], vec![2, 3, 3, 2]],
        vec![vec![10], vec![1, 5], vec![6, 8, 10, 4]],
        vec![5, 1, 6, 2, 3, 7, 4, 8],
    )
    .unwrap()
}

/// A model of depth `2..=max_depth` over `1..=max_features` features with a matching feature
/// vector. Values are drawn from a small range so that ties are frequent.
pub(crate) fn model_and_features(
    max_depth: usize,
    max_features: usize,
) -> BoxedStrategy<(DecisionTreeModel, Vec<i64>)> {
    (2..=max_depth, 1..=max_features)
        .prop_flat_map(|(depth, num_features)| {
            let internal = (1 << (depth - 1)) - 1;
            (
                Just(depth),
                Just(num_features),
                prop::collection::vec(0..num_features, internal),
                prop::collection::vec(-6i64..6, internal),
                prop::collection::vec(-1000i64..1000, 1 << (depth - 1)),
                prop::collection::vec(-6i64..6, num_features),
            )
        })
        .prop_map(
            |(depth, num_features, indexes, thresholds, categories, features)| {
                let model = DecisionTreeModel::from_feature_indexes(
                    depth,
                    num_features,
                    layered(indexes),
                    layered(thresholds),
                    categories,
                )
                .unwrap();
                (model, features)
            },
        )
        .boxed()
}

fn layered<T>(values: Vec<T>) -> Vec<Vec<T>> {
    let mut values = values.into_iter();
    let mut layers = vec![];
    let mut size = 1;
    loop {
        let layer: Vec<T> = values.by_ref().take(size).collect();
        if layer.is_empty() {
            return layers;
        }
        layers.push(layer);
        size *= 2;
    }
}
