//! Additive secret sharing over the ring `Z_2^64`.
//!
//! A secret `x` is held as shares `x_0, ..., x_{n-1}` with `x = x_0 + ... + x_{n-1} mod 2^64`.
//! Signed values are embedded as two's complement. Additions and public constants are local,
//! products use Beaver triples and comparisons open a masked difference and compare it to the
//! bit-decomposed mask.

use std::ops::{Add, Mul, Neg, Sub};

use futures::future::{try_join, try_join_all};
use rand::random;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{Engine, Error, Reveal, SeededDealer, dealer::BITS};
use crate::channel::{Channel, recv_vec_from, send_to};

/// Index of the sign bit.
const TOP: usize = BITS - 1;

/// Length of the equality prefix scan, covering bits `TOP - 1` down to 1.
const SCAN_LEN: usize = TOP - 1;

/// Rounds of the equality prefix scan, `ceil(log2(SCAN_LEN))`.
const SCAN_ROUNDS: usize = (usize::BITS - (SCAN_LEN - 1).leading_zeros()) as usize;

/// The number of communication rounds of a single [`RingEngine::less_than`] call.
///
/// One round opens the masked differences, `SCAN_ROUNDS` compute the equality prefixes, one
/// round selects the borrow bit and a final round combines it with the sign bit.
pub const LESS_THAN_ROUNDS: usize = 1 + SCAN_ROUNDS + 2;

/// One party's additive share of a ring element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share(pub(crate) u64);

impl Add for Share {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Share(self.0.wrapping_add(rhs.0))
    }
}

impl Sub for Share {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Share(self.0.wrapping_sub(rhs.0))
    }
}

impl Neg for Share {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Share(self.0.wrapping_neg())
    }
}

impl Mul<u64> for Share {
    type Output = Self;

    fn mul(self, rhs: u64) -> Self::Output {
        Share(self.0.wrapping_mul(rhs))
    }
}

/// An [`Engine`] for `n >= 2` parties communicating over a [`Channel`].
///
/// Operands of comparisons must lie strictly within `±2^62`, otherwise their difference wraps
/// around and the result is meaningless.
#[derive(Debug)]
pub struct RingEngine<'ch, C: Channel> {
    channel: &'ch C,
    dealer: SeededDealer,
    p_own: usize,
    p_max: usize,
    rounds: usize,
}

impl<'ch, C: Channel> RingEngine<'ch, C> {
    /// Creates the engine of party `p_own` out of `p_max` parties.
    pub fn new(
        channel: &'ch C,
        dealer: SeededDealer,
        p_own: usize,
        p_max: usize,
    ) -> Result<Self, Error> {
        if p_max < 2 {
            return Err(Error::InsufficientParties(p_max));
        }
        if p_own >= p_max {
            return Err(Error::NotAParty(p_own));
        }
        Ok(Self {
            channel,
            dealer,
            p_own,
            p_max,
            rounds: 0,
        })
    }

    /// A sharing of a public ring element, held entirely by party 0.
    fn public(&self, value: u64) -> Share {
        if self.p_own == 0 {
            Share(value)
        } else {
            Share(0)
        }
    }

    /// Opens shares to every party in a single round.
    async fn open_all(&mut self, phase: &str, shares: &[Share]) -> Result<Vec<u64>, Error> {
        let channel = self.channel;
        let p_own = self.p_own;
        let p_max = self.p_max;
        self.rounds += 1;
        trace!(phase, len = shares.len(), round = self.rounds, "opening shares");
        let (_, received) = try_join(
            try_join_all(
                (0..p_max)
                    .filter(|p| *p != p_own)
                    .map(|p| send_to(channel, p, phase, shares)),
            ),
            try_join_all(
                (0..p_max)
                    .filter(|p| *p != p_own)
                    .map(|p| recv_vec_from::<Share>(channel, p, phase, shares.len())),
            ),
        )
        .await?;
        let mut values: Vec<u64> = shares.iter().map(|s| s.0).collect();
        for other in received {
            for (v, s) in values.iter_mut().zip(other) {
                *v = v.wrapping_add(s.0);
            }
        }
        Ok(values)
    }
}

impl<C: Channel> Engine for RingEngine<'_, C> {
    type Secret = Share;

    fn party(&self) -> usize {
        self.p_own
    }

    fn parties(&self) -> usize {
        self.p_max
    }

    fn rounds(&self) -> usize {
        self.rounds
    }

    fn constant(&self, value: i64) -> Share {
        self.public(value as u64)
    }

    fn add(&self, a: &Share, b: &Share) -> Share {
        *a + *b
    }

    fn sub(&self, a: &Share, b: &Share) -> Share {
        *a - *b
    }

    fn scale(&self, a: &Share, k: i64) -> Share {
        *a * (k as u64)
    }

    async fn input(
        &mut self,
        owner: usize,
        values: Option<&[i64]>,
        len: usize,
    ) -> Result<Vec<Share>, Error> {
        if owner >= self.p_max {
            return Err(Error::NotAParty(owner));
        }
        let channel = self.channel;
        let p_own = self.p_own;
        let p_max = self.p_max;
        if owner != p_own {
            self.rounds += 1;
            return Ok(recv_vec_from(channel, owner, "input", len).await?);
        }
        let Some(values) = values else {
            return Err(Error::MissingInput(owner));
        };
        if values.len() != len {
            return Err(Error::WrongInputCount {
                expected: len,
                actual: values.len(),
            });
        }
        self.rounds += 1;
        let mut own: Vec<Share> = values.iter().map(|v| Share(*v as u64)).collect();
        let mut shares_for_others = vec![vec![]; p_max];
        for p in (0..p_max).filter(|p| *p != p_own) {
            let r: Vec<Share> = (0..len).map(|_| Share(random())).collect();
            for (own, r) in own.iter_mut().zip(&r) {
                *own = *own - *r;
            }
            shares_for_others[p] = r;
        }
        let shares_for_others = &shares_for_others;
        try_join_all(
            (0..p_max)
                .filter(|p| *p != p_own)
                .map(|p| send_to(channel, p, "input", &shares_for_others[p])),
        )
        .await?;
        Ok(own)
    }

    async fn mul(&mut self, pairs: &[(Share, Share)]) -> Result<Vec<Share>, Error> {
        if pairs.is_empty() {
            return Ok(vec![]);
        }
        let triples: Vec<_> = (0..pairs.len()).map(|_| self.dealer.triple()).collect();
        let mut masked = Vec::with_capacity(2 * pairs.len());
        for ((x, y), (a, b, _)) in pairs.iter().zip(&triples) {
            masked.push(*x - *a);
            masked.push(*y - *b);
        }
        let opened = self.open_all("beaver", &masked).await?;
        let products = triples
            .iter()
            .zip(opened.chunks(2))
            .map(|((a, b, c), de)| {
                let (d, e) = (de[0], de[1]);
                *c + *b * d + *a * e + self.public(d.wrapping_mul(e))
            })
            .collect();
        Ok(products)
    }

    async fn less_than(&mut self, pairs: &[(Share, Share)]) -> Result<Vec<Share>, Error> {
        if pairs.is_empty() {
            return Ok(vec![]);
        }
        let masks: Vec<Vec<Share>> = (0..pairs.len()).map(|_| self.dealer.bit_mask()).collect();
        let mut masked = Vec::with_capacity(pairs.len());
        for ((a, b), bits) in pairs.iter().zip(&masks) {
            let r = bits
                .iter()
                .enumerate()
                .fold(Share(0), |acc, (i, bit)| acc + *bit * (1u64 << i));
            masked.push(*a - *b + r);
        }
        let opened = self.open_all("comparison mask", &masked).await?;

        // a - b = c - r, its sign bit is c[TOP] ^ r[TOP] ^ (r[..TOP] > c[..TOP]).
        let one = self.public(1);
        let mut prefix = Vec::with_capacity(pairs.len());
        let mut greater = Vec::with_capacity(pairs.len());
        for (c, bits) in opened.iter().zip(&masks) {
            let c_bit = |i: usize| (c >> i) & 1 == 1;
            prefix.push(
                (1..TOP)
                    .rev()
                    .map(|i| if c_bit(i) { bits[i] } else { one - bits[i] })
                    .collect::<Vec<_>>(),
            );
            greater.push(
                (0..TOP)
                    .map(|i| if c_bit(i) { Share(0) } else { bits[i] })
                    .collect::<Vec<_>>(),
            );
        }

        // prefix[t] becomes the product of the equality bits TOP - 1 down to TOP - 1 - t
        let mut stride = 1;
        while stride < SCAN_LEN {
            let mut round = Vec::with_capacity(pairs.len() * SCAN_LEN);
            for p in &prefix {
                for t in stride..SCAN_LEN {
                    round.push((p[t], p[t - stride]));
                }
            }
            let mut products = self.mul(&round).await?.into_iter();
            for p in prefix.iter_mut() {
                for t in stride..SCAN_LEN {
                    if let Some(product) = products.next() {
                        p[t] = product;
                    }
                }
            }
            stride *= 2;
        }

        // bit i decides the borrow iff all bits above it (up to TOP - 1) are equal
        let mut select = Vec::with_capacity(pairs.len() * SCAN_LEN);
        for (p, g) in prefix.iter().zip(&greater) {
            for i in 0..SCAN_LEN {
                select.push((g[i], p[SCAN_LEN - 1 - i]));
            }
        }
        let selected = self.mul(&select).await?;
        let borrow: Vec<Share> = selected
            .chunks(SCAN_LEN)
            .zip(&greater)
            .map(|(terms, g)| terms.iter().fold(g[TOP - 1], |acc, s| acc + *s))
            .collect();

        let sign: Vec<Share> = opened
            .iter()
            .zip(&masks)
            .map(|(c, bits)| {
                if (c >> TOP) & 1 == 1 {
                    one - bits[TOP]
                } else {
                    bits[TOP]
                }
            })
            .collect();
        let xor_pairs: Vec<_> = sign.iter().copied().zip(borrow.iter().copied()).collect();
        let both = self.mul(&xor_pairs).await?;
        Ok(sign
            .iter()
            .zip(&borrow)
            .zip(&both)
            .map(|((s, b), sb)| *s + *b - *sb * 2)
            .collect())
    }

    async fn open(&mut self, secrets: &[Share], reveal: Reveal) -> Result<Option<Vec<i64>>, Error> {
        let p_out = match reveal {
            Reveal::All => {
                let values = self.open_all("open", secrets).await?;
                return Ok(Some(values.into_iter().map(|v| v as i64).collect()));
            }
            Reveal::Party(p_out) => p_out,
        };
        if p_out >= self.p_max {
            return Err(Error::NotAParty(p_out));
        }
        let channel = self.channel;
        let p_own = self.p_own;
        let p_max = self.p_max;
        self.rounds += 1;
        if p_out != p_own {
            send_to(channel, p_out, "open", secrets).await?;
            return Ok(None);
        }
        let received = try_join_all(
            (0..p_max)
                .filter(|p| *p != p_own)
                .map(|p| recv_vec_from::<Share>(channel, p, "open", secrets.len())),
        )
        .await?;
        let mut values: Vec<u64> = secrets.iter().map(|s| s.0).collect();
        for other in received {
            for (v, s) in values.iter_mut().zip(other) {
                *v = v.wrapping_add(s.0);
            }
        }
        Ok(Some(values.into_iter().map(|v| v as i64).collect()))
    }
}
