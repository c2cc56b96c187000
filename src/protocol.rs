//! Secure classification of a feature vector by a decision tree.
//!
//! One party (the Provider) owns the model, another party owns the feature vector and any
//! number of further parties help with the computation. Each party calls [`classify`] with its
//! own [`Engine`]; the Provider passes the model, the feature owner its features and everyone
//! else only the public shape. Nobody learns the model, the features or the path taken through
//! the tree, only the parties selected by [`Config::output`] learn the category.
//!
//! [`simulate_classification`] runs all parties in a single process.

use futures::future::try_join_all;
use tracing::{Level, debug, instrument};

use crate::{
    channel::SimpleChannel,
    config::Config,
    engine::{self, Engine, RingEngine, SeededDealer},
    evaluate::evaluate,
    input::{ConsistencyCheck, input_as_provider, input_as_receiver},
    model::{DecisionTreeModel, MAX_ABS_VALUE, NodeIndex, SecretDecisionTreeModel, ValidationError},
};

/// Errors raised while sharing or evaluating a model.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The model or its shape is malformed.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The underlying engine failed.
    #[error(transparent)]
    Engine(#[from] engine::Error),
    /// The feature vector does not have the agreed length.
    #[error("expected {expected} features, got {actual}")]
    FeatureLengthMismatch {
        /// The number of features agreed upon.
        expected: usize,
        /// The number of features provided.
        actual: usize,
    },
    /// The Provider shared feature selectors that are not one-hot.
    #[error("the {check:?} check failed for the selectors of nodes {nodes:?}")]
    MaliciousBehavior {
        /// The check that detected the malformed selectors.
        check: ConsistencyCheck,
        /// The nodes whose selectors are malformed.
        nodes: Vec<NodeIndex>,
    },
    /// A value was opened, but not to this party.
    #[error("the opened values were not revealed to this party")]
    MissingOutput,
    /// The engine returned a different number of results than operations were requested.
    #[error("expected {expected} results from the engine, got {actual}")]
    EngineResultCount {
        /// The number of requested operations.
        expected: usize,
        /// The number of results.
        actual: usize,
    },
}

/// The part a party plays when the model is shared.
#[derive(Debug, Clone, Copy)]
pub enum Role<'m> {
    /// The party owning the model.
    Provider(&'m DecisionTreeModel),
    /// A party receiving shares of a model with the given depth.
    Receiver {
        /// The index of the Provider.
        provider: usize,
        /// The depth of the model, known to all parties.
        depth: usize,
    },
}

/// Shares the model of the Provider among all parties and checks it.
pub async fn input_model<E: Engine>(
    engine: &mut E,
    role: Role<'_>,
    num_features: usize,
    config: &Config,
) -> Result<SecretDecisionTreeModel<E::Secret>, Error> {
    match role {
        Role::Provider(model) => input_as_provider(engine, model, num_features, config).await,
        Role::Receiver { provider, depth } => {
            input_as_receiver(engine, depth, num_features, provider, config).await
        }
    }
}

/// Runs the classification protocol for a single party.
///
/// The party `feature_owner` passes `Some(features)`, all others pass `None`. Returns the
/// category if this party is included in [`Config::output`] and `None` otherwise.
#[instrument(level = Level::DEBUG, skip_all, fields(party = engine.party()), err)]
pub async fn classify<E: Engine>(
    engine: &mut E,
    role: Role<'_>,
    feature_owner: usize,
    features: Option<&[i64]>,
    num_features: usize,
    config: &Config,
) -> Result<Option<i64>, Error> {
    if let Some(features) = features {
        if features.len() != num_features {
            return Err(Error::FeatureLengthMismatch {
                expected: num_features,
                actual: features.len(),
            });
        }
        if let Some(x) = features.iter().find(|x| x.unsigned_abs() > MAX_ABS_VALUE as u64) {
            return Err(ValidationError::ValueOutOfRange(*x).into());
        }
    }
    let model = input_model(engine, role, num_features, config).await?;
    let features = engine.input(feature_owner, features, num_features).await?;
    let category = evaluate(engine, &model, &features).await?;
    let Some(opened) = engine.open(&[category], config.output).await? else {
        debug!("category was revealed to other parties");
        return Ok(None);
    };
    match opened.first() {
        Some(category) => Ok(Some(*category)),
        None => Err(Error::MissingOutput),
    }
}

/// Simulates a classification among `parties` parties in a single process.
///
/// Party 0 is the Provider, party 1 owns the features and all others help. Returns the output
/// of every party, `None` for the parties excluded by [`Config::output`].
pub async fn simulate_classification(
    model: &DecisionTreeModel,
    features: &[i64],
    parties: usize,
    config: &Config,
) -> Result<Vec<Option<i64>>, Error> {
    if parties < 2 {
        return Err(engine::Error::InsufficientParties(parties).into());
    }
    let channels = SimpleChannel::channels_with_timeout(parties, config.recv_timeout());
    let mut engines = vec![];
    for (p, channel) in channels.iter().enumerate() {
        let dealer = SeededDealer::new(config.dealer_seed, p, parties);
        engines.push(RingEngine::new(channel, dealer, p, parties)?);
    }
    let provider = 0;
    let feature_owner = 1;
    let depth = model.depth();
    try_join_all(engines.iter_mut().map(|engine| async move {
        let role = if engine.party() == provider {
            Role::Provider(model)
        } else {
            Role::Receiver { provider, depth }
        };
        let own = (engine.party() == feature_owner).then_some(features);
        classify(engine, role, feature_owner, own, features.len(), config).await
    }))
    .await
}
