//! The AES state grid and round primitives, parameterized by key length and
//! round count. The search engines need the cipher at sub-round granularity:
//! individual primitives, per-round application in both directions, and
//! readback of the expanded key schedule.

use crate::gf;
use itertools::Itertools;
use lazy_static::lazy_static;
use std::error::Error;
use std::fmt;

/// Number of columns in the state.
pub const N_B: usize = 4;

static S_BOX: [u8; 256] = [
    0x63, 0x7c, 0x77, 0x7b, 0xf2, 0x6b, 0x6f, 0xc5, 0x30, 0x01, 0x67, 0x2b, 0xfe, 0xd7, 0xab, 0x76,
    0xca, 0x82, 0xc9, 0x7d, 0xfa, 0x59, 0x47, 0xf0, 0xad, 0xd4, 0xa2, 0xaf, 0x9c, 0xa4, 0x72, 0xc0,
    0xb7, 0xfd, 0x93, 0x26, 0x36, 0x3f, 0xf7, 0xcc, 0x34, 0xa5, 0xe5, 0xf1, 0x71, 0xd8, 0x31, 0x15,
    0x04, 0xc7, 0x23, 0xc3, 0x18, 0x96, 0x05, 0x9a, 0x07, 0x12, 0x80, 0xe2, 0xeb, 0x27, 0xb2, 0x75,
    0x09, 0x83, 0x2c, 0x1a, 0x1b, 0x6e, 0x5a, 0xa0, 0x52, 0x3b, 0xd6, 0xb3, 0x29, 0xe3, 0x2f, 0x84,
    0x53, 0xd1, 0x00, 0xed, 0x20, 0xfc, 0xb1, 0x5b, 0x6a, 0xcb, 0xbe, 0x39, 0x4a, 0x4c, 0x58, 0xcf,
    0xd0, 0xef, 0xaa, 0xfb, 0x43, 0x4d, 0x33, 0x85, 0x45, 0xf9, 0x02, 0x7f, 0x50, 0x3c, 0x9f, 0xa8,
    0x51, 0xa3, 0x40, 0x8f, 0x92, 0x9d, 0x38, 0xf5, 0xbc, 0xb6, 0xda, 0x21, 0x10, 0xff, 0xf3, 0xd2,
    0xcd, 0x0c, 0x13, 0xec, 0x5f, 0x97, 0x44, 0x17, 0xc4, 0xa7, 0x7e, 0x3d, 0x64, 0x5d, 0x19, 0x73,
    0x60, 0x81, 0x4f, 0xdc, 0x22, 0x2a, 0x90, 0x88, 0x46, 0xee, 0xb8, 0x14, 0xde, 0x5e, 0x0b, 0xdb,
    0xe0, 0x32, 0x3a, 0x0a, 0x49, 0x06, 0x24, 0x5c, 0xc2, 0xd3, 0xac, 0x62, 0x91, 0x95, 0xe4, 0x79,
    0xe7, 0xc8, 0x37, 0x6d, 0x8d, 0xd5, 0x4e, 0xa9, 0x6c, 0x56, 0xf4, 0xea, 0x65, 0x7a, 0xae, 0x08,
    0xba, 0x78, 0x25, 0x2e, 0x1c, 0xa6, 0xb4, 0xc6, 0xe8, 0xdd, 0x74, 0x1f, 0x4b, 0xbd, 0x8b, 0x8a,
    0x70, 0x3e, 0xb5, 0x66, 0x48, 0x03, 0xf6, 0x0e, 0x61, 0x35, 0x57, 0xb9, 0x86, 0xc1, 0x1d, 0x9e,
    0xe1, 0xf8, 0x98, 0x11, 0x69, 0xd9, 0x8e, 0x94, 0x9b, 0x1e, 0x87, 0xe9, 0xce, 0x55, 0x28, 0xdf,
    0x8c, 0xa1, 0x89, 0x0d, 0xbf, 0xe6, 0x42, 0x68, 0x41, 0x99, 0x2d, 0x0f, 0xb0, 0x54, 0xbb, 0x16,
];

lazy_static! {
    static ref INV_S_BOX: [u8; 256] = {
        let mut table = [0; 256];
        for (i, &x) in S_BOX.iter().enumerate() {
            table[x as usize] = i as u8;
        }
        table
    };
}

/// MixColumns circulant. MDS over GF(2^8).
pub(crate) static MIX_MATRIX: [[u8; 4]; 4] = [
    [0x2, 0x3, 0x1, 0x1],
    [0x1, 0x2, 0x3, 0x1],
    [0x1, 0x1, 0x2, 0x3],
    [0x3, 0x1, 0x1, 0x2],
];

/// Field inverse of `MIX_MATRIX`.
pub(crate) static INV_MIX_MATRIX: [[u8; 4]; 4] = [
    [0xe, 0xb, 0xd, 0x9],
    [0x9, 0xe, 0xb, 0xd],
    [0xd, 0x9, 0xe, 0xb],
    [0xb, 0xd, 0x9, 0xe],
];

/// The 4x4 byte grid the cipher operates on. Plain value type; computation
/// paths that diverge (forward vs. backward chunks) each copy it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct State {
    pub value: [[u8; 4]; 4],
}

impl State {
    /// Builds a state from 16 bytes in row-major order.
    pub fn from_bytes(bytes: &[u8; 16]) -> State {
        let mut value = [[0; 4]; 4];

        for (i, &x) in bytes.iter().enumerate() {
            value[i / 4][i % 4] = x;
        }

        State { value }
    }

    /// Builds a state from four words, one big-endian word per row.
    pub fn from_words(words: [u32; 4]) -> State {
        let mut value = [[0; 4]; 4];

        for (i, &word) in words.iter().enumerate() {
            for j in 0..4 {
                value[i][j] = byte_in_word(word, j);
            }
        }

        State { value }
    }

    /// Replaces every byte through the S-box. The only non-linear step.
    pub fn sub_bytes(&mut self) {
        for row in self.value.iter_mut() {
            for x in row.iter_mut() {
                *x = S_BOX[*x as usize];
            }
        }
    }

    pub fn inv_sub_bytes(&mut self) {
        for row in self.value.iter_mut() {
            for x in row.iter_mut() {
                *x = INV_S_BOX[*x as usize];
            }
        }
    }

    /// Rotates row `r` left by `r` positions.
    pub fn shift_rows(&mut self) {
        for (r, row) in self.value.iter_mut().enumerate() {
            row.rotate_left(r);
        }
    }

    pub fn inv_shift_rows(&mut self) {
        for (r, row) in self.value.iter_mut().enumerate() {
            row.rotate_right(r);
        }
    }

    /// Multiplies each column by the MDS circulant.
    pub fn mix_columns(&mut self) {
        self.value = gf::matrix_mul(&MIX_MATRIX, &self.value);
    }

    pub fn inv_mix_columns(&mut self) {
        self.value = gf::matrix_mul(&INV_MIX_MATRIX, &self.value);
    }
}

impl std::ops::BitXor for State {
    type Output = State;

    fn bitxor(self, rhs: State) -> State {
        let mut ret = self;
        ret ^= rhs;
        ret
    }
}

impl std::ops::BitXorAssign for State {
    fn bitxor_assign(&mut self, rhs: State) {
        for (row, rhs_row) in self.value.iter_mut().zip(rhs.value.iter()) {
            for (x, y) in row.iter_mut().zip(rhs_row.iter()) {
                *x ^= y;
            }
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for row in self.value.iter() {
            writeln!(
                f,
                "{}",
                row.iter().format_with(" ", |x, g| g(&format_args!("{:02x}", x)))
            )?;
        }

        Ok(())
    }
}

/// Returned by `Aes::new` when the key buffer is shorter than the key length
/// parameter promises.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidKeyLength {
    pub expected: usize,
    pub actual: usize,
}

impl fmt::Display for InvalidKeyLength {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "key buffer holds {} bytes, key length parameter requires {}",
            self.actual, self.expected
        )
    }
}

impl Error for InvalidKeyLength {}

/// A cipher instance: key length in words, round count, and the expanded key
/// schedule. Immutable once constructed and cheap to clone, so chunk
/// computations that need divergent round key material can copy it freely.
#[derive(Clone, Debug)]
pub struct Aes {
    n_k: usize,
    n_r: usize,
    w: Vec<u32>,
}

impl Aes {
    /// Expands `key` into a schedule of `4 * (n_r + 1)` words. `key` must
    /// hold at least `4 * n_k` bytes.
    pub fn new(key: &[u8], n_k: usize, n_r: usize) -> Result<Aes, InvalidKeyLength> {
        if key.len() < 4 * n_k {
            return Err(InvalidKeyLength {
                expected: 4 * n_k,
                actual: key.len(),
            });
        }

        let mut w = vec![0_u32; N_B * (n_r + 1)];

        for i in 0..n_k {
            for j in 0..4 {
                w[i] <<= 8;
                w[i] |= u32::from(key[i * 4 + j]);
            }
        }

        let mut r_con: u8 = 1;

        for i in n_k..N_B * (n_r + 1) {
            let mut temp = w[i - 1];

            if i % n_k == 0 {
                temp = sub_word(rot_word(temp)) ^ (u32::from(r_con) << 24);
                r_con = gf::mul(2, r_con);
            } else if n_k > 6 && i % n_k == 4 {
                temp = sub_word(temp);
            }

            w[i] = w[i - n_k] ^ temp;
        }

        Ok(Aes { n_k, n_r, w })
    }

    /// Returns the round count.
    pub fn rounds(&self) -> usize {
        self.n_r
    }

    /// Returns the expanded key schedule.
    pub fn schedule(&self) -> &[u32] {
        &self.w
    }

    /// XORs round key `round` into the state. Self-inverse.
    pub fn add_round_key(&self, state: &mut State, round: usize) {
        let base = round * 4;

        for i in 0..4 {
            for j in 0..4 {
                state.value[i][j] ^= byte_in_word(self.w[base + j], i);
            }
        }
    }

    /// Applies one full round. The final round skips MixColumns.
    pub fn round(&self, state: &mut State, round: usize) {
        state.sub_bytes();
        state.shift_rows();
        if round != self.n_r {
            state.mix_columns();
        }
        self.add_round_key(state, round);
    }

    /// Exactly undoes `round`.
    pub fn inv_round(&self, state: &mut State, round: usize) {
        self.add_round_key(state, round);
        if round != self.n_r {
            state.inv_mix_columns();
        }
        state.inv_shift_rows();
        state.inv_sub_bytes();
    }

    /// Encrypts one block.
    pub fn cipher(&self, mut state: State) -> State {
        self.add_round_key(&mut state, 0);

        for round in 1..self.n_r {
            self.round(&mut state, round);
        }

        state.sub_bytes();
        state.shift_rows();
        // No MixColumns in the last round.
        self.add_round_key(&mut state, self.n_r);

        state
    }

    /// Decrypts one block.
    pub fn inv_cipher(&self, mut state: State) -> State {
        self.add_round_key(&mut state, self.n_r);

        for round in (1..self.n_r).rev() {
            state.inv_shift_rows();
            state.inv_sub_bytes();
            self.add_round_key(&mut state, round);
            state.inv_mix_columns();
        }

        state.inv_shift_rows();
        state.inv_sub_bytes();
        self.add_round_key(&mut state, 0);

        state
    }

    /// Davies-Meyer compression with this instance's fixed key:
    /// `cipher(state) XOR state`.
    pub fn compression(&self, state: State) -> State {
        self.cipher(state) ^ state
    }
}

/// Extracts byte `i` of a word, counting from the most significant end.
pub fn byte_in_word(x: u32, i: usize) -> u8 {
    (x >> (24 - i * 8)) as u8
}

/// Packs four bytes into a word, `x0` most significant.
pub fn word_from_bytes(x0: u8, x1: u8, x2: u8, x3: u8) -> u32 {
    u32::from(x0) << 24 | u32::from(x1) << 16 | u32::from(x2) << 8 | u32::from(x3)
}

/// Applies the S-box to each byte of a word.
pub fn sub_word(x: u32) -> u32 {
    let mut x = x;
    let mut ret = 0;

    for i in 0..4 {
        ret |= u32::from(S_BOX[(x & 0xff) as usize]) << (i * 8);
        x >>= 8;
    }

    ret
}

/// Rotates a word left by one byte.
pub fn rot_word(x: u32) -> u32 {
    x << 8 | x >> 24
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    // The FIPS 197 appendix B key.
    pub fn test_key() -> [u8; 16] {
        [
            0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf,
            0x4f, 0x3c,
        ]
    }

    fn state_from(x: u64, y: u64) -> State {
        let mut bytes = [0; 16];
        bytes[..8].copy_from_slice(&x.to_be_bytes());
        bytes[8..].copy_from_slice(&y.to_be_bytes());
        State::from_bytes(&bytes)
    }

    #[test]
    fn key_expansion() {
        let aes = Aes::new(&test_key(), 4, 10).unwrap();
        let w = aes.schedule();

        assert_eq!(w[40], 0xd014f9a8);
        assert_eq!(w[41], 0xc9ee2589);
        assert_eq!(w[42], 0xe13f0cc8);
        assert_eq!(w[43], 0xb6630ca6);
    }

    #[test]
    fn short_key_rejected() {
        let err = Aes::new(&test_key()[..12], 4, 10).unwrap_err();
        assert_eq!(err, InvalidKeyLength { expected: 16, actual: 12 });
    }

    // Round 1 intermediate states from FIPS 197 appendix B.
    fn start_of_round() -> State {
        state_from(0x19a09ae93df4c6f8, 0xe3e28d48be2b2a08)
    }

    fn after_sub_bytes() -> State {
        state_from(0xd4e0b81e27bfb441, 0x11985d52aef1e530)
    }

    fn after_shift_rows() -> State {
        state_from(0xd4e0b81ebfb44127, 0x5d52119830aef1e5)
    }

    fn after_mix_columns() -> State {
        state_from(0x04e0482866cbf806, 0x8119d326e59a7a4c)
    }

    fn result_of_round() -> State {
        state_from(0xa4686b029c9f5b6a, 0x7f35ea50f22b4349)
    }

    #[test]
    fn sub_bytes_round_trip() {
        let mut x = start_of_round();
        x.sub_bytes();
        assert_eq!(x, after_sub_bytes());

        x.inv_sub_bytes();
        assert_eq!(x, start_of_round());
    }

    #[test]
    fn shift_rows_round_trip() {
        let mut x = after_sub_bytes();
        x.shift_rows();
        assert_eq!(x, after_shift_rows());

        x.inv_shift_rows();
        assert_eq!(x, after_sub_bytes());
    }

    #[test]
    fn mix_columns_round_trip() {
        let mut x = after_shift_rows();
        x.mix_columns();
        assert_eq!(x, after_mix_columns());

        x.inv_mix_columns();
        assert_eq!(x, after_shift_rows());
    }

    #[test]
    fn add_round_key_vector() {
        let aes = Aes::new(&test_key(), 4, 10).unwrap();
        let mut x = after_mix_columns();
        aes.add_round_key(&mut x, 1);
        assert_eq!(x, result_of_round());

        aes.add_round_key(&mut x, 1);
        assert_eq!(x, after_mix_columns());
    }

    fn reference_plaintext() -> State {
        state_from(0x328831e0435a3137, 0xf6309807a88da234)
    }

    fn reference_ciphertext() -> State {
        state_from(0x3902dc1925dc116a, 0x8409850b1dfb9732)
    }

    #[test]
    fn cipher_vector() {
        let aes = Aes::new(&test_key(), 4, 10).unwrap();

        assert_eq!(aes.cipher(reference_plaintext()), reference_ciphertext());
        assert_eq!(aes.inv_cipher(reference_ciphertext()), reference_plaintext());
    }

    #[quickcheck]
    fn round_inverts(x: u64, y: u64, round: usize) -> bool {
        let aes = Aes::new(&test_key(), 4, 10).unwrap();
        let round = 1 + round % aes.rounds();
        let start = state_from(x, y);

        let mut state = start;
        aes.round(&mut state, round);
        aes.inv_round(&mut state, round);

        state == start
    }

    #[quickcheck]
    fn cipher_inverts(x: u64, y: u64) -> bool {
        let aes = Aes::new(&test_key(), 4, 10).unwrap();
        let plaintext = state_from(x, y);

        aes.inv_cipher(aes.cipher(plaintext)) == plaintext
    }

    #[quickcheck]
    fn compression_is_pure(x: u64, y: u64) -> bool {
        let aes = Aes::new(&test_key(), 4, 7).unwrap();
        let state = state_from(x, y);

        aes.compression(state) == aes.compression(state)
    }

    #[test]
    fn from_words_matches_from_bytes() {
        let x = State::from_words([0x328831e0, 0x435a3137, 0xf6309807, 0xa88da234]);
        assert_eq!(x, reference_plaintext());
    }
}
