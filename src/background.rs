//! Null model: residue background frequencies and the geometric
//! length distribution used to score "random" sequence.

use crate::alphabet::Alphabet;
use crate::error::{PHmmError, Result};

/// Standard amino-acid background composition (Robinson & Robinson, the
/// table HMMER itself statically links), indexed in the order of
/// [`Alphabet::Amino`]'s canonical symbols `ACDEFGHIKLMNPQRSTVWY`.
const AMINO_BACKGROUND: [f64; 20] = [
    0.0787945, 0.0151600, 0.0535222, 0.0668298, 0.0397062, 0.0695071, 0.0229198, 0.0590092,
    0.0594422, 0.0963728, 0.0237718, 0.0414386, 0.0482904, 0.0395639, 0.0540978, 0.0683364,
    0.0540687, 0.0673417, 0.0114135, 0.0304133,
];

/// Background model: per-residue null frequencies, a length-distribution
/// transition probability, and the filter tuning factor omega used by the
/// MSV/bias filters.
#[derive(Debug, Clone)]
pub struct Background {
    alphabet: Alphabet,
    freqs: Vec<f64>,
    /// Geometric-distribution parameter: probability of *not* terminating
    /// the null model after each emitted residue.
    p1: f64,
    /// Effective target length the null model is scaled for.
    length: usize,
    omega: f64,
}

impl Background {
    /// Standard background composition for `alphabet`, configured for
    /// length `length` (HMMER's default `p1` is `L / (L + 1)`).
    pub fn new(alphabet: Alphabet, length: usize) -> Self {
        let freqs = match alphabet {
            Alphabet::Amino => AMINO_BACKGROUND.to_vec(),
            Alphabet::Dna | Alphabet::Rna => vec![0.25; 4],
        };
        let mut bg = Self {
            alphabet,
            freqs,
            p1: 0.0,
            length: 0,
            omega: 1.0 / 256.0,
        };
        bg.set_length(length);
        bg
    }

    pub fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    pub fn freqs(&self) -> &[f64] {
        &self.freqs
    }

    pub fn p1(&self) -> f64 {
        self.p1
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn omega(&self) -> f64 {
        self.omega
    }

    pub fn set_omega(&mut self, omega: f64) {
        self.omega = omega;
    }

    /// Rescale the geometric length distribution for a new target length.
    /// Called by the pipeline's Stage 0 length reconfiguration.
    pub fn set_length(&mut self, length: usize) {
        self.length = length.max(1);
        self.p1 = self.length as f64 / (self.length as f64 + 1.0);
    }

    /// Replace the background composition with an empirical one (e.g. fit
    /// from a target's own residue counts for the bias filter).
    pub fn set_from_composition(&mut self, composition: &[f64]) -> Result<()> {
        if composition.len() != self.alphabet.k() {
            return Err(PHmmError::InvalidParameter {
                name: "composition",
                reason: format!(
                    "expected {} frequencies, got {}",
                    self.alphabet.k(),
                    composition.len()
                ),
            });
        }
        let sum: f64 = composition.iter().sum();
        if (sum - 1.0).abs() > 1e-3 {
            return Err(PHmmError::InvalidParameter {
                name: "composition",
                reason: format!("frequencies sum to {sum}, expected 1.0"),
            });
        }
        self.freqs = composition.to_vec();
        Ok(())
    }

    /// Log-odds null score (nats) of observing `length` i.i.d. residues
    /// followed by termination, used as the baseline for MSV/Viterbi/Forward
    /// score conversion.
    pub fn null_one_score(&self, length: usize) -> f64 {
        length as f64 * self.p1.ln() + (1.0 - self.p1).ln()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn amino_freqs_sum_to_one() {
        let bg = Background::new(Alphabet::Amino, 400);
        let sum: f64 = bg.freqs().iter().sum();
        assert!((sum - 1.0).abs() < 1e-4, "sum was {sum}");
    }

    #[test]
    fn set_length_updates_p1() {
        let mut bg = Background::new(Alphabet::Amino, 400);
        bg.set_length(100);
        assert!((bg.p1() - 100.0 / 101.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_bad_composition() {
        let mut bg = Background::new(Alphabet::Dna, 100);
        assert!(bg.set_from_composition(&[0.1, 0.1, 0.1, 0.1]).is_err());
        assert!(bg.set_from_composition(&[0.25, 0.25, 0.25, 0.25]).is_ok());
    }
}
