//! Preimage search engines against the Davies-Meyer compression function
//! `H = Cipher_K(P) XOR P`, using splice-and-cut chunk separation: the round
//! sequence is split at an internal point, each half is driven by its own
//! one-byte degree of freedom, and the halves are joined through an ordered
//! multiset on a reduced match value instead of pairwise comparison.

use crate::aes::{State, INV_MIX_MATRIX};
use crate::gf;
use rand::Rng;
use smallvec::{smallvec, SmallVec};
use std::collections::BTreeMap;

pub mod four_round;
pub mod seven_deep;
pub mod seven_round;

/// The fixed key every attack instance runs under (the FIPS 197 appendix B
/// key; any key works, this one makes runs reproducible).
pub const SEARCH_KEY: [u8; 16] = [
    0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf, 0x4f, 0x3c,
];

/// The plaintext whose digest the drivers search a preimage for.
pub fn reference_plaintext() -> State {
    State::from_bytes(&[
        0x32, 0x88, 0x31, 0xe0, 0x43, 0x5a, 0x31, 0x37, 0xf6, 0x30, 0x98, 0x07, 0xa8, 0x8d, 0xa2,
        0x34,
    ])
}

/// Draws a uniformly random state.
pub fn random_state<R: Rng>(rng: &mut R) -> State {
    State::from_words([rng.gen(), rng.gen(), rng.gen(), rng.gen()])
}

/// An ordered multi-valued container keyed by match value. All forward chunk
/// results go in; every backward chunk result probes it for equal keys. This
/// turns the O(n^2) pairwise join into O(n log n), and duplicate match
/// values must all be kept since the reduction is lossy.
pub struct MatchSet {
    entries: BTreeMap<u32, SmallVec<[u32; 2]>>,
}

impl MatchSet {
    pub fn new() -> MatchSet {
        MatchSet {
            entries: BTreeMap::new(),
        }
    }

    /// Records that the forward neutral value `neutral` produced
    /// `match_value`.
    pub fn insert(&mut self, match_value: u32, neutral: u32) {
        self.entries
            .entry(match_value)
            .and_modify(|neutrals| neutrals.push(neutral))
            .or_insert_with(|| smallvec![neutral]);
    }

    /// Returns every forward neutral whose match value equals `match_value`.
    /// A hit is a candidate pair, necessary but not sufficient.
    pub fn candidates(&self, match_value: u32) -> &[u32] {
        self.entries
            .get(&match_value)
            .map(|neutrals| &neutrals[..])
            .unwrap_or(&[])
    }
}

// The reductions below compute, per column, a fixed linear combination of two
// state bytes. The factors are chosen from the inverse MixColumns circulant
// so that states equal at the split point give equal reductions on both
// sides, even though the two chunks see the state one MixColumns apart.
static MATCH_ROW_1: [usize; 4] = [0, 1, 0, 1];
static MATCH_ROW_2: [usize; 4] = [2, 3, 2, 3];
static MATCH_FACTOR_1: [u8; 4] = [0xd, 0xd, 0xe, 0xe];
static MATCH_FACTOR_2: [u8; 4] = [0xe, 0xe, 0xd, 0xd];

/// Reduces one column of a forward chunk result.
pub fn forward_match_col(state: &State, col: usize) -> u8 {
    gf::mul(MATCH_FACTOR_1[col], state.value[MATCH_ROW_1[col]][col])
        ^ gf::mul(MATCH_FACTOR_2[col], state.value[MATCH_ROW_2[col]][col])
}

/// Reduces one column of a backward chunk result. Equals the forward
/// reduction of the same column after MixColumns; the diagonal byte, which
/// carries the backward neutral, cancels out of the combination.
pub fn backward_match_col(state: &State, col: usize) -> u8 {
    let mut c_0 = gf::mul(INV_MIX_MATRIX[MATCH_ROW_1[col]][col], state.value[col][col]);
    let mut c_1 = gf::mul(INV_MIX_MATRIX[MATCH_ROW_2[col]][col], state.value[col][col]);

    for i in 0..4 {
        c_0 ^= gf::mul(INV_MIX_MATRIX[MATCH_ROW_1[col]][i], state.value[i][col]);
        c_1 ^= gf::mul(INV_MIX_MATRIX[MATCH_ROW_2[col]][i], state.value[i][col]);
    }

    gf::mul(MATCH_FACTOR_1[col], c_0) ^ gf::mul(MATCH_FACTOR_2[col], c_1)
}

/// Packs the four forward column reductions into one word.
pub fn forward_match(state: &State) -> u32 {
    let mut ret = 0;

    for col in 0..4 {
        ret <<= 8;
        ret |= u32::from(forward_match_col(state, col));
    }

    ret
}

/// Packs the four backward column reductions into one word.
pub fn backward_match(state: &State) -> u32 {
    let mut ret = 0;

    for col in 0..4 {
        ret <<= 8;
        ret |= u32::from(backward_match_col(state, col));
    }

    ret
}

/// The cheap one-byte filter applied before full verification.
pub fn partial_match(x: &State, y: &State) -> bool {
    x.value[0][0] == y.value[0][0]
}

/// Accepts a candidate plaintext only if its full 16-byte digest reproduces
/// the target, after the one-byte pre-filter.
pub fn verify_preimage(aes: &crate::aes::Aes, plaintext: &State, target: &State) -> bool {
    let digest = aes.compression(*plaintext);

    if !partial_match(&digest, target) {
        return false;
    }

    digest == *target
}
