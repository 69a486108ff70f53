//! The 7-round attack. The split sits after round 4: the forward chunk runs
//! rounds 5..7, the feed-forward, and rounds 0..1 plus the substitution and
//! permutation of round 2; the backward chunk inverts from the split down to
//! round 2's column mixing. The forward neutral byte feeds a whole column
//! through MixColumns under the `const_1` constraint, and the backward
//! neutral byte determines its two companion bytes through the fixed
//! `0xd1`/`0x69` relations under `const_2`, so every one of the 2x256 trials
//! keeps the rest of the state valid without redrawing it.

use crate::aes::{byte_in_word, Aes, State};
use crate::gf;
use crate::logging;
use crate::mitm::{
    backward_match, forward_match, random_state, reference_plaintext, verify_preimage, MatchSet,
    SEARCH_KEY,
};
use rand::Rng;
use std::sync::mpsc;

/// One trial assignment: the start state at the split point plus the two
/// constraint words tying the non-neutral bytes to the neutral ones.
pub struct Structure {
    aes: Aes,
    target: State,
    const_1: u32,
    const_2: u32,
    backward_start: State,
    forward_start: State,
}

impl Structure {
    /// Draws a fresh random structure and fixes it up so that both neutral
    /// bytes stay legal over their whole range.
    pub fn random(aes: Aes, target: State) -> Structure {
        let mut rng = rand::thread_rng();
        let const_1 = rng.gen::<u32>() & 0x00ff_ffff;
        let const_2 = rng.gen::<u32>() & 0xffff;
        let backward_start = random_state(&mut rng);

        let mut structure = Structure::from_parts(aes, target, const_1, const_2, backward_start);

        // Overwrite the forward neutral column with the constrained image of
        // const_1, and the backward neutral bytes with the image of neutral
        // value 0; those positions cannot simply be zeroed.
        let mut temp = State::default();
        for i in 0..4 {
            temp.value[i][0] = byte_in_word(const_1, i);
        }
        temp.mix_columns();
        for i in 0..4 {
            structure.backward_start.value[i][0] = temp.value[i][0];
        }

        let temp = structure.get_backward_neutral(0);
        structure.backward_start.value[0][3] = temp.value[0][3];
        structure.backward_start.value[2][1] = temp.value[2][1];
        structure.backward_start.value[3][2] = temp.value[3][2];

        structure.forward_start = derive_forward_start(&structure.aes, structure.backward_start);
        structure
    }

    /// Builds a structure from explicit parts; the forward-side start is
    /// derived by pushing the backward-side start through the split.
    pub fn from_parts(
        aes: Aes,
        target: State,
        const_1: u32,
        const_2: u32,
        backward_start: State,
    ) -> Structure {
        let forward_start = derive_forward_start(&aes, backward_start);

        Structure {
            aes,
            target,
            const_1,
            const_2,
            backward_start,
            forward_start,
        }
    }

    /// Expands a forward neutral byte into its column image at the forward
    /// side of the split, constrained by `const_1`.
    fn get_forward_neutral(&self, neutral: u8) -> State {
        let mut temp = State::default();

        for i in 1..4 {
            temp.value[i][0] = byte_in_word(self.const_1, i);
        }
        temp.value[0][0] = neutral;
        temp.mix_columns();

        self.aes.add_round_key(&mut temp, 4);
        temp.sub_bytes();
        temp.shift_rows();

        temp
    }

    /// The two companion bytes a backward neutral value drags along, per the
    /// forward MixColumns relation under `const_2`.
    fn calculate_backward_bytes(&self, neutral: u8) -> (u8, u8) {
        let c_1 = (self.const_2 >> 8) as u8;
        let c_2 = self.const_2 as u8;

        (gf::mul(0xd1, neutral) ^ c_1, gf::mul(0x69, neutral) ^ c_2)
    }

    /// Expands a backward neutral byte into its image at the backward side
    /// of the split.
    fn get_backward_neutral(&self, neutral: u8) -> State {
        let (b_2, b_3) = self.calculate_backward_bytes(neutral);
        let mut temp = State::default();
        temp.value[0][3] = neutral;
        temp.value[2][3] = b_2;
        temp.value[3][3] = b_3;

        temp.inv_shift_rows();
        temp.inv_sub_bytes();
        self.aes.add_round_key(&mut temp, 4);

        temp
    }

    /// Completes rounds 5..7 and the feed-forward, yielding the plaintext
    /// implied by a start state.
    fn compute_plaintext(&self, mut state: State) -> State {
        state.mix_columns();
        self.aes.add_round_key(&mut state, 5);
        self.aes.round(&mut state, 6);
        self.aes.round(&mut state, 7);
        state ^ self.target
    }

    /// Assembles the full start state implied by a candidate neutral pair.
    fn compute_start(&self, neutral_1: u8, neutral_2: u8) -> State {
        let mut start = self.forward_start;

        let forward_neutral = self.get_forward_neutral(neutral_1);
        for j in 0..4 {
            let k = (4 - j) & 3;
            start.value[j][k] = forward_neutral.value[j][k];
        }

        let (b_2, b_3) = self.calculate_backward_bytes(neutral_2);
        start.value[0][3] = neutral_2;
        start.value[2][3] = b_2;
        start.value[3][3] = b_3;

        start
    }

    /// The forward chunk: wraparound plus rounds 0..1 and the first half of
    /// round 2.
    fn forward(&self, state: State) -> State {
        let mut state = self.compute_plaintext(state);
        self.aes.add_round_key(&mut state, 0);
        self.aes.round(&mut state, 1);
        state.sub_bytes();
        state.shift_rows();
        state
    }

    /// The backward chunk: inverts from the split point down to the other
    /// side of round 2's column mixing.
    fn backward(&self, mut state: State) -> State {
        state.inv_mix_columns();
        state.inv_shift_rows();
        state.inv_sub_bytes();
        self.aes.inv_round(&mut state, 3);
        self.aes.add_round_key(&mut state, 2);
        state
    }

    /// Runs the 2x256 chunk computations for this structure. Returns the
    /// first candidate pair that survives full verification.
    pub fn search(&self) -> Option<State> {
        let mut results = MatchSet::new();
        let mut forward_start = self.forward_start;

        for i in 0..=0xff_u32 {
            let forward_neutral = self.get_forward_neutral(i as u8);
            for j in 0..4 {
                let k = (4 - j) & 3;
                forward_start.value[j][k] = forward_neutral.value[j][k];
            }

            let temp = self.forward(forward_start);
            results.insert(forward_match(&temp), i);
        }

        let mut backward_start = self.backward_start;

        for i in 0..=0xff_u32 {
            let backward_neutral = self.get_backward_neutral(i as u8);
            backward_start.value[0][3] = backward_neutral.value[0][3];
            backward_start.value[2][1] = backward_neutral.value[2][1];
            backward_start.value[3][2] = backward_neutral.value[3][2];

            let temp = self.backward(backward_start);

            for &neutral in results.candidates(backward_match(&temp)) {
                let start = self.compute_start(neutral as u8, i as u8);
                let plaintext = self.compute_plaintext(start);

                if verify_preimage(&self.aes, &plaintext, &self.target) {
                    return Some(plaintext);
                }
            }
        }

        None
    }
}

fn derive_forward_start(aes: &Aes, backward_start: State) -> State {
    let mut state = backward_start;
    aes.add_round_key(&mut state, 4);
    state.sub_bytes();
    state.shift_rows();
    state
}

/// Rebuilds the structure containing `plaintext` by advancing it to the
/// split point and reading the constraint words off the true state. Returns
/// the structure together with the neutral pair that recovers the plaintext.
pub fn correct_structure(aes: &Aes, plaintext: State, target: State) -> (Structure, u8, u8) {
    let mut temp = plaintext;
    aes.add_round_key(&mut temp, 0);
    aes.round(&mut temp, 1);
    aes.round(&mut temp, 2);
    aes.round(&mut temp, 3);
    temp.sub_bytes();
    temp.shift_rows();

    let neutral_1 = temp.value[0][0];
    let mut const_1 = 0;
    for i in 1..4 {
        const_1 <<= 8;
        const_1 |= u32::from(temp.value[i][0]);
    }

    temp.mix_columns();
    let backward_start = temp;

    aes.add_round_key(&mut temp, 4);
    temp.sub_bytes();
    temp.shift_rows();

    let neutral_2 = temp.value[0][3];
    let c_1 = temp.value[0][3] ^ gf::mul(3, temp.value[2][3]) ^ temp.value[3][3];
    let c_2 = gf::mul(3, temp.value[0][3]) ^ temp.value[2][3] ^ gf::mul(2, temp.value[3][3]);
    let const_2 = u32::from(gf::mul(0xb9, c_1) ^ gf::mul(0xd1, c_2)) << 8
        | u32::from(gf::mul(0xd1, c_1) ^ gf::mul(0x68, c_2));

    let structure = Structure::from_parts(aes.clone(), target, const_1, const_2, backward_start);
    (structure, neutral_1, neutral_2)
}

/// Draws and searches structures until a preimage of the reference digest is
/// found, `threads` independent structures at a time. Workers own all their
/// mutable state; results come back over a channel drained after each batch
/// joins, so the first success ends the search without races.
pub fn run(threads: usize, limit: Option<usize>) -> Option<State> {
    let aes = Aes::new(&SEARCH_KEY, 4, 7).expect("search key holds 16 bytes");
    let target = aes.compression(reference_plaintext());

    logging::info(&format!("Search started. The goal is:\n{}", target));

    let (planted, neutral_1, neutral_2) = correct_structure(&aes, reference_plaintext(), target);
    match planted.search() {
        Some(plaintext) => logging::info(&format!(
            "The planted structure (neutrals {:02x}, {:02x}) recovers:\n{}",
            neutral_1, neutral_2, plaintext
        )),
        None => logging::error("The planted structure failed to recover its own plaintext."),
    }

    let timer = time::precise_time_s();
    let (result_tx, result_rx) = mpsc::channel();
    let mut tested = 0;

    loop {
        if let Some(limit) = limit {
            if tested >= limit {
                logging::warning(&format!("No preimage found in {} structures.", tested));
                return None;
            }
        }

        if tested % 10_000 < threads {
            logging::info(&format!("{} structures have been tested.", tested));
        }

        crossbeam_utils::thread::scope(|scope| {
            for _ in 0..threads {
                let result_tx = result_tx.clone();
                let aes = &aes;

                scope.spawn(move |_| {
                    let structure = Structure::random(aes.clone(), target);

                    if let Some(plaintext) = structure.search() {
                        result_tx
                            .send(plaintext)
                            .expect("Worker could not send result");
                    }
                });
            }
        })
        .expect("A search worker panicked");

        if let Ok(plaintext) = result_rx.try_recv() {
            logging::success(&format!(
                "Found a solution after {} structures. [{:.1} s]\nPlaintext:\n{}H_n:\n{}",
                tested,
                time::precise_time_s() - timer,
                plaintext,
                aes.compression(plaintext)
            ));
            return Some(plaintext);
        }

        tested += threads;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn planted_structure_recovers_preimage() {
        let aes = Aes::new(&SEARCH_KEY, 4, 7).unwrap();
        let target = aes.compression(reference_plaintext());

        let (structure, neutral_1, neutral_2) =
            correct_structure(&aes, reference_plaintext(), target);

        // The true neutral pair reassembles the exact reference plaintext.
        let start = structure.compute_start(neutral_1, neutral_2);
        assert_eq!(structure.compute_plaintext(start), reference_plaintext());

        let plaintext = structure.search().expect("planted structure must match");
        assert_eq!(aes.compression(plaintext), target);
    }

    #[test]
    fn chunks_meet_for_the_planted_neutrals() {
        let aes = Aes::new(&SEARCH_KEY, 4, 7).unwrap();
        let target = aes.compression(reference_plaintext());

        let (structure, neutral_1, neutral_2) =
            correct_structure(&aes, reference_plaintext(), target);

        let mut forward_start = structure.forward_start;
        let forward_neutral = structure.get_forward_neutral(neutral_1);
        for j in 0..4 {
            let k = (4 - j) & 3;
            forward_start.value[j][k] = forward_neutral.value[j][k];
        }
        let forward = structure.forward(forward_start);

        let mut backward_start = structure.backward_start;
        let backward_neutral = structure.get_backward_neutral(neutral_2);
        backward_start.value[0][3] = backward_neutral.value[0][3];
        backward_start.value[2][1] = backward_neutral.value[2][1];
        backward_start.value[3][2] = backward_neutral.value[3][2];
        let backward = structure.backward(backward_start);

        assert_eq!(forward_match(&forward), backward_match(&backward));
    }

    #[quickcheck]
    fn backward_neutral_relations(c_1: u8, c_2: u8, a_0: u8) -> bool {
        // The const_2 parameterization: given the two constraint bytes, the
        // companion bytes implied by any neutral value a_0 must satisfy the
        // forward MixColumns relations they were solved from.
        let a_2 = gf::mul(0xb9, c_1) ^ gf::mul(0xd1, c_2) ^ gf::mul(0xd1, a_0);
        let a_3 = gf::mul(0xd1, c_1) ^ gf::mul(0x68, c_2) ^ gf::mul(0x69, a_0);

        (a_0 ^ gf::mul(3, a_2) ^ a_3) == c_1 && (gf::mul(3, a_0) ^ a_2 ^ gf::mul(2, a_3)) == c_2
    }
}
