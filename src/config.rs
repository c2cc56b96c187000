//! Settings shared by all parties of a classification.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{channel::DEFAULT_RECV_TIMEOUT, engine::Reveal, input::ConsistencyCheck};

/// Settings of the input protocol, the output and the simulation.
///
/// All parties must use the same settings, otherwise the protocol deadlocks or fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The check run on the shared model before evaluation.
    pub consistency_check: ConsistencyCheck,
    /// The parties learning the category.
    pub output: Reveal,
    /// The seed of the correlated randomness of a simulated classification.
    pub dealer_seed: u64,
    /// The time a simulated party waits for a message before giving up.
    pub recv_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            consistency_check: ConsistencyCheck::default(),
            output: Reveal::All,
            dealer_seed: 0,
            recv_timeout_secs: DEFAULT_RECV_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    /// Uses the given check for the shared model.
    pub fn with_consistency_check(mut self, check: ConsistencyCheck) -> Self {
        self.consistency_check = check;
        self
    }

    /// Reveals the category only to the given parties.
    pub fn with_output(mut self, output: Reveal) -> Self {
        self.output = output;
        self
    }

    /// Seeds the correlated randomness of a simulated classification.
    pub fn with_dealer_seed(mut self, seed: u64) -> Self {
        self.dealer_seed = seed;
        self
    }

    /// Gives up on a message after the given time (rounded down to whole seconds).
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout_secs = timeout.as_secs();
        self
    }

    /// The time to wait for a message.
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_secs(self.recv_timeout_secs)
    }
}
