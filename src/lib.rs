//! Secure multi-party evaluation of decision trees over secret-shared data.
//!
//! A model owner and a feature owner jointly classify a feature vector without revealing the
//! model to the feature owner, the features to the model owner or the path through the tree to
//! anyone. Only the category of the reached leaf is revealed, and only to the designated output
//! parties.
//!
//! ## Main Components
//!
//! * [`model`]: Plaintext and secret-shared decision trees, addressed by [`model::NodeIndex`].
//! * [`input`]: Sharing a model, including the check that the shared selectors are one-hot.
//! * [`evaluate`]: The oblivious evaluation, whose communication only depends on the shape.
//! * [`protocol`]: The [`protocol::classify`] function which executes the protocol for a single
//!   party, and [`protocol::simulate_classification`] for running all parties in one process.
//! * [`engine`]: The secret-sharing arithmetic the protocols are built on.
//! * [`channel`]: Communication abstractions for exchanging data between parties.
//!
//! ## Example
//!
//! ```
//! use polytree::{config::Config, model::DecisionTreeModel, protocol::simulate_classification};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // a single comparison: feature 0 < 10 leads to the right leaf
//! let model = DecisionTreeModel::from_feature_indexes(
//!     2,
//!     1,
//!     vec![vec![0]],
//!     vec![vec![10]],
//!     vec![100, 200],
//! )?;
//! let outputs = simulate_classification(&model, &[3], 2, &Config::default()).await?;
//! assert_eq!(outputs, vec![Some(200), Some(200)]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Properties
//!
//! The protocols are secure against semi-honest parties, except that a model owner sharing
//! malformed feature selectors is caught by [`input::ConsistencyCheck`]. The bundled
//! [`engine::SeededDealer`] derives all correlated randomness from a shared seed and is only
//! suitable for tests and simulations.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod channel;
pub mod config;
pub mod engine;
pub mod evaluate;
pub mod input;
pub mod model;
pub mod protocol;
pub mod reference;

#[cfg(test)]
mod test_utils;
