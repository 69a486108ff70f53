//! A small interactive calculator over GF(2^8) and a Gaussian solver for
//! field-linear systems. The solver is what produced the baked solution
//! rows in the deep 7-round attack; the calculator exists for working out
//! new constraint constants by hand.

use crate::gf;
use crate::logging;
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

/// An augmented system over GF(2^8), one row per equation, the last column
/// holding the right-hand side.
pub type Matrix = Vec<Vec<u8>>;

/// Reduces an augmented system to reduced row echelon form by Gaussian
/// elimination over GF(2^8). Returns an empty matrix when the system has
/// more equations than columns. Pivots are taken from the diagonal; callers
/// are expected to order their equations so the diagonal stays invertible.
pub fn solve(matrix: &Matrix) -> Matrix {
    let mut a = matrix.clone();
    let n = a.len();
    if n == 0 {
        return a;
    }
    let m = a[0].len();
    if n > m {
        return Matrix::new();
    }

    for i in 0..n {
        let k = gf::inv_slow(a[i][i]);
        for j in i..m {
            a[i][j] = gf::mul(a[i][j], k);
        }

        let pivot_row = a[i].clone();
        for l in i + 1..n {
            let k = a[l][i];
            for j in i..m {
                a[l][j] ^= gf::mul(pivot_row[j], k);
            }
        }
    }

    for i in 0..n {
        for r in i + 1..n {
            let k = a[i][r];
            let lower_row = a[r].clone();
            for j in r..m {
                a[i][j] ^= gf::mul(lower_row[j], k);
            }
        }
    }

    a
}

struct Tokens<R: BufRead> {
    reader: R,
    queue: VecDeque<String>,
}

impl<R: BufRead> Tokens<R> {
    fn new(reader: R) -> Tokens<R> {
        Tokens {
            reader,
            queue: VecDeque::new(),
        }
    }

    /// Next whitespace-separated token, or `None` at end of input.
    fn next(&mut self) -> io::Result<Option<String>> {
        while self.queue.is_empty() {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.queue
                .extend(line.split_whitespace().map(str::to_owned));
        }

        Ok(self.queue.pop_front())
    }
}

fn parse_element(token: &str) -> Option<u8> {
    u8::from_str_radix(token, 16).ok()
}

/// One read-evaluate-print loop over arbitrary streams. Expressions are
/// `a b` (product), `a + b` (sum) and `a -1` (inverse), all in hex.
fn eval<R: BufRead, W: Write>(input: R, mut output: W) -> io::Result<()> {
    let mut tokens = Tokens::new(input);

    loop {
        write!(output, ">> ")?;
        output.flush()?;

        let a = match tokens.next()? {
            Some(token) => token,
            None => return Ok(()),
        };
        let op = match tokens.next()? {
            Some(token) => token,
            None => return Ok(()),
        };

        let a = match parse_element(&a) {
            Some(a) => a,
            None => {
                logging::warning(&format!("Not a field element: {}", a));
                continue;
            }
        };

        if op == "-1" {
            writeln!(output, "{:x}", gf::inv_slow(a))?;
        } else if op == "+" {
            let b = match tokens.next()? {
                Some(token) => token,
                None => return Ok(()),
            };
            match parse_element(&b) {
                Some(b) => writeln!(output, "{:x}", a ^ b)?,
                None => logging::warning(&format!("Not a field element: {}", b)),
            }
        } else {
            match parse_element(&op) {
                Some(b) => writeln!(output, "{:x}", gf::mul(a, b))?,
                None => logging::warning(&format!("Not a field element: {}", op)),
            }
        }
    }
}

/// Runs the calculator on standard input until end of input.
pub fn run() -> io::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    eval(stdin.lock(), stdout.lock())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_inverse_mix_columns_system() {
        // Rows 1..3 of the inverse MixColumns circulant against a chosen
        // solution vector.
        let solution = [0x0a, 0x14, 0x1e];
        let coefficients = [[0x9, 0xe, 0xb], [0xd, 0x9, 0xe], [0xb, 0xd, 0x9]];

        let mut system = Matrix::new();
        for row in coefficients.iter() {
            let rhs = row
                .iter()
                .zip(solution.iter())
                .fold(0, |acc, (&m, &x)| acc ^ gf::mul(m, x));
            system.push(vec![row[0], row[1], row[2], rhs]);
        }

        let solved = solve(&system);

        for r in 0..3 {
            for c in 0..3 {
                assert_eq!(solved[r][c], (r == c) as u8);
            }
            assert_eq!(solved[r][3], solution[r]);
        }
    }

    #[test]
    fn overdetermined_shape_is_rejected() {
        let system = vec![vec![1, 2], vec![3, 4], vec![5, 6]];
        assert!(solve(&system).is_empty());
    }

    #[test]
    fn eval_computes_products_sums_and_inverses() {
        let input = "57 13\n2 + 3\n53 -1\n";
        let mut output = Vec::new();

        eval(input.as_bytes(), &mut output).unwrap();

        let output = String::from_utf8(output).unwrap();
        assert_eq!(output, ">> fe\n>> 1\n>> ca\n>> ");
    }
}
