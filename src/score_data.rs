//! Auxiliary scoring tables derived from a (Profile, OptimizedProfile) pair:
//! the null2 / bias-filter correction table.

use crate::optimized_profile::OptimizedProfile;
use crate::profile::Profile;

/// Per-(Profile, OptimizedProfile) bias-correction data, consumed by the
/// Stage 2 bias filter and the Stage 5 null2 domain correction.
#[derive(Debug, Clone)]
pub struct ScoreData {
    kp: usize,
    /// `compo[residue]`: the profile's own average match-emission log-odds
    /// for each residue, used to fit the two-state bias-filter null model
    /// and as the basis for null2 correction.
    compo: Vec<f64>,
}

impl ScoreData {
    pub fn build(profile: &Profile, _optimized: &OptimizedProfile) -> Self {
        let k = profile.alphabet().k();
        let kp = profile.alphabet().kp();
        let m = profile.m().max(1);
        let mut compo = vec![0.0; kp];
        for residue in 0..k {
            let mut sum = 0.0;
            for node in 1..=profile.m() {
                sum += profile.match_score(node, residue as u8);
            }
            compo[residue] = sum / m as f64;
        }
        Self { kp, compo }
    }

    pub fn kp(&self) -> usize {
        self.kp
    }

    pub fn composition_bias(&self, residue: u8) -> f64 {
        self.compo.get(residue as usize).copied().unwrap_or(0.0)
    }

    /// Per-residue log-odds bias summed over a target's observed residue
    /// counts, the basis of the null2 score subtracted from domain scores
    /// in Stage 5 and of the two-state null refit in Stage 2. Summed, not
    /// averaged, so the correction scales with domain length the same way
    /// `raw_score` does.
    pub fn null2_correction(&self, residue_counts: &[usize]) -> f64 {
        residue_counts
            .iter()
            .enumerate()
            .map(|(residue, &count)| count as f64 * self.composition_bias(residue as u8))
            .sum::<f64>()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::alphabet::Alphabet;
    use crate::background::Background;
    use crate::hmm::Hmm;
    use crate::rng::Randomness;

    #[test]
    fn null2_zero_on_empty_counts() {
        let mut rng = Randomness::new(11);
        let hmm = Hmm::sample(Alphabet::Dna, 10, &mut rng).unwrap();
        let bg = Background::new(Alphabet::Dna, 100);
        let profile = Profile::configure(&hmm, &bg, 100, true, true).unwrap();
        let optimized = OptimizedProfile::from_profile(&profile).unwrap();
        let data = ScoreData::build(&profile, &optimized);
        assert_eq!(data.null2_correction(&[0, 0, 0, 0]), 0.0);
    }
}
