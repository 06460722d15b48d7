//! Probability-gated property selection.
//!
//! One value `r` in `[0, 1)` is drawn per iteration. Every satisfied
//! property with `prob >= r` is eligible, and one eligible property is
//! picked uniformly.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Result of one selection round.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Chosen { index: usize, draw: f64 },
    /// Candidates existed but none passed the probability gate.
    NoneEligible { draw: f64 },
}

pub fn is_eligible(prob: f64, draw: f64) -> bool {
    prob >= draw
}

pub struct SelectionPolicy {
    rng: ChaCha8Rng,
}

impl SelectionPolicy {
    /// Seeded policies replay the same choices for the same candidates.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self { rng }
    }

    pub fn draw(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Pick among `(index, prob)` candidates.
    pub fn select(&mut self, candidates: &[(usize, f64)]) -> Selection {
        let draw = self.draw();
        let eligible: Vec<usize> = candidates
            .iter()
            .filter(|(_, prob)| is_eligible(*prob, draw))
            .map(|(index, _)| *index)
            .collect();
        match eligible.choose(&mut self.rng) {
            Some(index) => Selection::Chosen {
                index: *index,
                draw,
            },
            None => Selection::NoneEligible { draw },
        }
    }
}

impl std::fmt::Debug for SelectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionPolicy").finish_non_exhaustive()
    }
}
