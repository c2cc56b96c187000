//! Correlated randomness for the [`RingEngine`](super::RingEngine), derived from a shared seed.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use super::Share;

/// The number of bits of a ring element.
pub(crate) const BITS: usize = 64;

/// A dealer handing out Beaver triples and bit-decomposed random masks.
///
/// Every party runs its own dealer from the same seed and keeps only its own share of each
/// value, so the parties stay in sync as long as they request the same sequence of values.
/// Since any party could recompute the shares of all others from the seed, this dealer is
/// only suitable for testing and simulation.
#[derive(Debug, Clone)]
pub struct SeededDealer {
    rng: ChaCha20Rng,
    p_own: usize,
    p_max: usize,
}

impl SeededDealer {
    /// Creates the dealer of party `p_own` out of `p_max` parties.
    pub fn new(seed: u64, p_own: usize, p_max: usize) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
            p_own,
            p_max,
        }
    }

    /// Splits `value` into additive shares and returns the share of this party.
    fn share(&mut self, value: u64) -> Share {
        let mut own = Share(0);
        let mut rest = value;
        for p in 0..self.p_max.saturating_sub(1) {
            let r: u64 = self.rng.random();
            rest = rest.wrapping_sub(r);
            if p == self.p_own {
                own = Share(r);
            }
        }
        if self.p_own + 1 == self.p_max {
            own = Share(rest);
        }
        own
    }

    /// Shares of a random triple `(a, b, c)` with `c = a * b`.
    pub(crate) fn triple(&mut self) -> (Share, Share, Share) {
        let a: u64 = self.rng.random();
        let b: u64 = self.rng.random();
        let c = a.wrapping_mul(b);
        (self.share(a), self.share(b), self.share(c))
    }

    /// Shares of the [`BITS`] bits (least significant first) of a random mask.
    pub(crate) fn bit_mask(&mut self) -> Vec<Share> {
        (0..BITS)
            .map(|_| {
                let bit: bool = self.rng.random();
                self.share(bit as u64)
            })
            .collect()
    }
}
