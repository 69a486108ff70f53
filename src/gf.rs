//! Arithmetic in GF(2^8) modulo x^8 + x^4 + x^3 + x + 1, the field underlying
//! the cipher's diffusion layer.

/// Multiplies two field elements using shift-and-reduce.
pub fn mul(x: u8, y: u8) -> u8 {
    let mut x = x;
    let mut y = y;
    let mut ret = 0;

    while x != 0 {
        if x & 1 != 0 {
            ret ^= y;
        }

        if y & 0x80 != 0 {
            y <<= 1;
            y ^= 0x1b;
        } else {
            y <<= 1;
        }

        x >>= 1;
    }

    ret
}

/// Finds the multiplicative inverse of `x` by exhaustive search. Returns 0 for
/// `x = 0`, which has no inverse. Only used during key material
/// reconstruction and Gaussian elimination, so the O(255) cost is irrelevant.
pub fn inv_slow(x: u8) -> u8 {
    for i in 1..=0xff_u16 {
        if mul(i as u8, x) == 1 {
            return i as u8;
        }
    }

    0
}

/// Computes the 4x4 matrix product of `x` and `y` over the field.
pub fn matrix_mul(x: &[[u8; 4]; 4], y: &[[u8; 4]; 4]) -> [[u8; 4]; 4] {
    let mut ret = [[0; 4]; 4];

    for row in 0..4 {
        for col in 0..4 {
            for i in 0..4 {
                ret[row][col] ^= mul(x[row][i], y[i][col]);
            }
        }
    }

    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn mul_commutes(a: u8, b: u8) -> bool {
        mul(a, b) == mul(b, a)
    }

    #[quickcheck]
    fn mul_distributes_over_xor(a: u8, b: u8, c: u8) -> bool {
        mul(a, b ^ c) == mul(a, b) ^ mul(a, c)
    }

    #[test]
    fn mul_by_zero() {
        for a in 0..=0xff {
            assert_eq!(mul(a, 0), 0);
            assert_eq!(mul(0, a), 0);
        }
    }

    #[test]
    fn inverses() {
        assert_eq!(inv_slow(0), 0);

        for a in 1..=0xff {
            assert_eq!(mul(a, inv_slow(a)), 1);
        }
    }

    #[test]
    fn known_products() {
        // Worked examples from the AES specification.
        assert_eq!(mul(0x57, 0x13), 0xfe);
        assert_eq!(mul(0x57, 0x83), 0xc1);
    }
}
