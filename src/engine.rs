//! The secure arithmetic engine the tree protocols are built on.
//!
//! The [`Engine`] trait is the only view the protocols have of secret sharing: secrets can be
//! combined locally (additions, public constants, negation of bits) and through batched
//! operations that each cost a fixed number of communication rounds. A batched call is the
//! equivalent of a parallel scope, awaiting calls one after another is a sequential scope.
//!
//! [`RingEngine`] is an in-process implementation using additive sharing over `Z_2^64`, fed
//! by a [`SeededDealer`].

use std::{fmt, future::Future};

use serde::{Deserialize, Serialize};

use crate::channel;

mod dealer;
mod ring;

pub use dealer::SeededDealer;
pub use ring::{LESS_THAN_ROUNDS, RingEngine, Share};

/// Errors raised by an [`Engine`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A message could not be sent or received.
    #[error(transparent)]
    Channel(#[from] channel::Error),
    /// The specified party does not take part in the computation.
    #[error("party {0} does not take part in the computation")]
    NotAParty(usize),
    /// Secret sharing needs at least two parties.
    #[error("at least 2 parties are required, got {0}")]
    InsufficientParties(usize),
    /// The input owner provided a different number of values than announced.
    #[error("expected {expected} input values, got {actual}")]
    WrongInputCount {
        /// The announced number of values.
        expected: usize,
        /// The number of values actually provided.
        actual: usize,
    },
    /// The input owner called `input` without providing its values.
    #[error("party {0} owns the input but did not provide any values")]
    MissingInput(usize),
    /// The two vectors of an inner product differ in length.
    #[error("inner product of vectors with length {0} and {1}")]
    LengthMismatch(usize, usize),
}

/// Who learns the plaintext when secrets are opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reveal {
    /// Every party learns the values.
    All,
    /// Only the party with the given index learns the values.
    Party(usize),
}

impl Reveal {
    /// Returns true if the given party learns the opened values.
    pub fn includes(&self, party: usize) -> bool {
        match self {
            Reveal::All => true,
            Reveal::Party(p) => *p == party,
        }
    }
}

/// Secret-shared integer arithmetic among a fixed set of parties.
///
/// All parties must issue the same sequence of calls with the same lengths, only the input
/// owner passes actual values to [`Engine::input`].
pub trait Engine {
    /// This party's share of a secret integer.
    type Secret: Clone + fmt::Debug;

    /// The index of the party running this engine.
    fn party(&self) -> usize;

    /// The number of parties taking part in the computation.
    fn parties(&self) -> usize;

    /// The number of communication rounds performed so far.
    fn rounds(&self) -> usize;

    /// A sharing of a public constant.
    fn constant(&self, value: i64) -> Self::Secret;

    /// Adds two secrets.
    fn add(&self, a: &Self::Secret, b: &Self::Secret) -> Self::Secret;

    /// Subtracts `b` from `a`.
    fn sub(&self, a: &Self::Secret, b: &Self::Secret) -> Self::Secret;

    /// Multiplies a secret by a public constant.
    fn scale(&self, a: &Self::Secret, k: i64) -> Self::Secret;

    /// Complements a secret bit, `1 - b`.
    fn not(&self, bit: &Self::Secret) -> Self::Secret {
        self.sub(&self.constant(1), bit)
    }

    /// Sums up secrets, the sum of no secrets is a sharing of 0.
    fn sum(&self, values: &[Self::Secret]) -> Self::Secret {
        values
            .iter()
            .fold(self.constant(0), |acc, v| self.add(&acc, v))
    }

    /// Secret-shares `len` values owned by `owner`.
    ///
    /// The owner passes `Some(values)`, every other party passes `None`.
    fn input(
        &mut self,
        owner: usize,
        values: Option<&[i64]>,
        len: usize,
    ) -> impl Future<Output = Result<Vec<Self::Secret>, Error>>;

    /// Multiplies all pairs in a single round.
    fn mul(
        &mut self,
        pairs: &[(Self::Secret, Self::Secret)],
    ) -> impl Future<Output = Result<Vec<Self::Secret>, Error>>;

    /// Computes all inner products in a single multiplication round.
    fn inner_products(
        &mut self,
        vectors: &[(&[Self::Secret], &[Self::Secret])],
    ) -> impl Future<Output = Result<Vec<Self::Secret>, Error>> {
        async move {
            let mut pairs = vec![];
            for (a, b) in vectors {
                if a.len() != b.len() {
                    return Err(Error::LengthMismatch(a.len(), b.len()));
                }
                pairs.extend(a.iter().cloned().zip(b.iter().cloned()));
            }
            let products = self.mul(&pairs).await?;
            let mut products = products.as_slice();
            let mut sums = Vec::with_capacity(vectors.len());
            for (a, _) in vectors {
                let (terms, rest) = products.split_at(a.len());
                sums.push(self.sum(terms));
                products = rest;
            }
            Ok(sums)
        }
    }

    /// Compares all pairs, returning sharings of 1 where `a < b` and 0 otherwise.
    ///
    /// Takes the same number of rounds for every input.
    fn less_than(
        &mut self,
        pairs: &[(Self::Secret, Self::Secret)],
    ) -> impl Future<Output = Result<Vec<Self::Secret>, Error>>;

    /// Opens secrets, returning the values to every party included in `reveal`.
    fn open(
        &mut self,
        secrets: &[Self::Secret],
        reveal: Reveal,
    ) -> impl Future<Output = Result<Option<Vec<i64>>, Error>>;
}
