//! The 4-round attack. The round sequence is split after round 1: the
//! backward chunk is a single inverse step, the forward chunk runs rounds
//! 2..4, the feed-forward, and rounds 0..1 of the implied plaintext. The
//! forward neutral byte is `[0][0]` of the start state, the backward neutral
//! byte is `[0][3]`, so the two chunks range over independent columns.

use crate::aes::{Aes, State};
use crate::logging;
use crate::mitm::{random_state, reference_plaintext, verify_preimage, MatchSet, SEARCH_KEY};

/// One randomly drawn trial: a start state at the split point. The bytes not
/// owned by the two neutral positions stay fixed for the trial's 2x256
/// chunk computations.
pub struct Structure {
    aes: Aes,
    target: State,
    start: State,
}

impl Structure {
    /// Draws a fresh random structure.
    pub fn random(aes: Aes, target: State) -> Structure {
        let mut rng = rand::thread_rng();
        let start = random_state(&mut rng);

        Structure { aes, target, start }
    }

    /// Builds a structure around a known start state.
    pub fn with_start(aes: Aes, target: State, start: State) -> Structure {
        Structure { aes, target, start }
    }

    /// Advances the start state through rounds 2..4 and the feed-forward,
    /// yielding the plaintext this start state implies.
    fn compute_plaintext(&self, mut state: State) -> State {
        self.aes.add_round_key(&mut state, 2);
        self.aes.round(&mut state, 3);
        state.sub_bytes();
        state.shift_rows();
        self.aes.add_round_key(&mut state, 4);
        state ^ self.target
    }

    /// The forward chunk: wraps around through the feed-forward and advances
    /// the implied plaintext to the far side of the split point.
    fn forward(&self, state: State) -> State {
        let mut state = self.compute_plaintext(state);
        self.aes.add_round_key(&mut state, 0);
        self.aes.round(&mut state, 1);
        state
    }

    /// The backward chunk: one inverse step from the split point.
    fn backward(mut state: State) -> State {
        state.inv_mix_columns();
        state.inv_shift_rows();
        state.inv_sub_bytes();
        state
    }

    /// Bytes `[1][0]` and `[3][2]` of a chunk result, which depend on the
    /// backward neutral column only; the birthday join runs on these.
    fn match_value(state: &State) -> u32 {
        u32::from(state.value[1][0]) << 8 | u32::from(state.value[3][2])
    }

    /// Runs the 2x256 chunk computations for this structure and verifies
    /// every candidate pair. Returns the first verified preimage.
    pub fn search(&self) -> Option<State> {
        let mut results = MatchSet::new();
        let mut start = self.start;

        for i in 0..=0xff_u32 {
            start.value[0][0] = i as u8;
            let temp = self.forward(start);
            results.insert(Self::match_value(&temp), i);
        }

        for i in 0..=0xff_u32 {
            start.value[0][3] = i as u8;
            let temp = Self::backward(start);

            for &neutral in results.candidates(Self::match_value(&temp)) {
                start.value[0][0] = neutral as u8;
                start.value[0][3] = i as u8;
                let plaintext = self.compute_plaintext(start);

                if verify_preimage(&self.aes, &plaintext, &self.target) {
                    return Some(plaintext);
                }
            }
        }

        None
    }
}

/// Rebuilds the structure that contains `plaintext`, by advancing it to the
/// split point. Searching it must rediscover the plaintext; the drivers use
/// this to demonstrate the machinery before the blind search starts.
pub fn correct_structure(aes: &Aes, plaintext: State, target: State) -> Structure {
    let mut start = plaintext;
    aes.add_round_key(&mut start, 0);
    aes.round(&mut start, 1);
    start.sub_bytes();
    start.shift_rows();
    start.mix_columns();

    Structure::with_start(aes.clone(), target, start)
}

/// Draws and searches structures until a preimage of the reference digest is
/// found, or until `limit` structures have been tried.
pub fn run(limit: Option<usize>) -> Option<State> {
    let aes = Aes::new(&SEARCH_KEY, 4, 4).expect("search key holds 16 bytes");
    let target = aes.compression(reference_plaintext());

    logging::info(&format!("Search started. The goal is:\n{}", target));

    match correct_structure(&aes, reference_plaintext(), target).search() {
        Some(plaintext) => logging::info(&format!(
            "The planted structure recovers:\n{}",
            plaintext
        )),
        None => logging::error("The planted structure failed to recover its own plaintext."),
    }

    let timer = time::precise_time_s();
    let mut tested = 0;

    loop {
        if let Some(limit) = limit {
            if tested >= limit {
                logging::warning(&format!("No preimage found in {} structures.", tested));
                return None;
            }
        }

        if tested % 10_000 == 0 {
            logging::info(&format!("{} structures have been tested.", tested));
        }

        let structure = Structure::random(aes.clone(), target);

        if let Some(plaintext) = structure.search() {
            logging::success(&format!(
                "Found a solution after {} structures. [{:.1} s]\nPlaintext:\n{}H_n:\n{}",
                tested,
                time::precise_time_s() - timer,
                plaintext,
                aes.compression(plaintext)
            ));
            return Some(plaintext);
        }

        tested += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mitm::{reference_plaintext, SEARCH_KEY};

    #[test]
    fn planted_structure_recovers_preimage() {
        let aes = Aes::new(&SEARCH_KEY, 4, 4).unwrap();
        let target = aes.compression(reference_plaintext());

        let structure = correct_structure(&aes, reference_plaintext(), target);
        let plaintext = structure.search().expect("planted structure must match");

        assert_eq!(aes.compression(plaintext), target);
    }

    #[test]
    fn chunks_meet_for_the_planted_neutrals() {
        let aes = Aes::new(&SEARCH_KEY, 4, 4).unwrap();
        let target = aes.compression(reference_plaintext());
        let structure = correct_structure(&aes, reference_plaintext(), target);

        // For the start state holding the true plaintext, the forward and
        // backward chunks must land on the same state at the join.
        let forward = structure.forward(structure.start);
        let backward = Structure::backward(structure.start);

        assert_eq!(forward, backward);
    }
}
