//! Calibration and sampling randomness.
//!
//! Full-featured RNG plumbing is an external collaborator; this thin
//! wrapper over [`rand::rngs::SmallRng`] is the minimum the Builder's
//! calibration simulations and `Hmm::sample` need, following the same
//! `SmallRng::seed_from_u64` usage seen elsewhere in this codebase (e.g.
//! `rank.rs`, `score_model.rs`).

use rand::{rngs::SmallRng, Rng, SeedableRng};

pub struct Randomness {
    rng: SmallRng,
}

impl Randomness {
    /// `seed = 0` means "nondeterministic", matching the Builder's
    /// `seed` convention (§4.1); any other value seeds deterministically.
    pub fn new(seed: u64) -> Self {
        let rng = if seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(seed)
        };
        Self { rng }
    }

    pub fn gen_range_f64(&mut self, lo: f64, hi: f64) -> f64 {
        self.rng.gen_range(lo..hi)
    }

    pub fn gen_usize(&mut self, upper_exclusive: usize) -> usize {
        self.rng.gen_range(0..upper_exclusive)
    }

    pub fn gen_bool(&mut self, p: f64) -> bool {
        self.rng.gen_bool(p.clamp(0.0, 1.0))
    }

    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        use rand::seq::SliceRandom;
        slice.shuffle(&mut self.rng);
    }

    pub(crate) fn inner(&mut self) -> &mut SmallRng {
        &mut self.rng
    }
}
