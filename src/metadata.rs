//! Small per-model metadata views: statistical calibration parameters,
//! curated score cutoffs, and on-disk byte offsets.

use crate::error::{PHmmError, Result};

/// Statistical calibration for the MSV, Viterbi and Forward score
/// distributions, fit by the Builder's calibration simulations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalueParameters {
    /// MSV score distribution: location (mu) of the max-scoring-segment
    /// Gumbel approximation.
    pub m_mu: f64,
    /// MSV score distribution: Gumbel scale (lambda).
    pub m_lambda: f64,
    /// Viterbi score distribution: location.
    pub v_mu: f64,
    /// Viterbi score distribution: scale.
    pub v_lambda: f64,
    /// Forward score distribution: exponential-tail location (tau).
    pub f_tau: f64,
    /// Forward score distribution: exponential-tail rate (lambda).
    pub f_lambda: f64,
}

impl EvalueParameters {
    pub fn is_finite(&self) -> bool {
        [
            self.m_mu,
            self.m_lambda,
            self.v_mu,
            self.v_lambda,
            self.f_tau,
            self.f_lambda,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// A curated gathering/trusted/noise score pair, as embedded in a pressed
/// HMM's `GA`/`TC`/`NC` header lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScorePair {
    pub score1: f64,
    pub score2: f64,
}

/// Optional curated bit-score cutoffs for a model, any subset of which may
/// be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Cutoffs {
    pub gathering: Option<ScorePair>,
    pub trusted: Option<ScorePair>,
    pub noise: Option<ScorePair>,
}

/// Which curated cutoff pair a [`crate::pipeline::Pipeline`] should use in
/// place of the `E`/`T` thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitCutoffSelector {
    Gathering,
    Trusted,
    Noise,
}

impl Cutoffs {
    pub fn select(&self, selector: BitCutoffSelector) -> Result<ScorePair> {
        let (name, pair) = match selector {
            BitCutoffSelector::Gathering => ("gathering", self.gathering),
            BitCutoffSelector::Trusted => ("trusted", self.trusted),
            BitCutoffSelector::Noise => ("noise", self.noise),
        };
        pair.ok_or(PHmmError::MissingCutoffs { selector: name })
    }
}

/// Byte positions of a single model's record within each file of a pressed
/// HMM database (`.h3m`, `.h3f`, `.h3p`). Populated when an
/// [`crate::optimized_profile::OptimizedProfile`] is read out of (or written
/// into) a pressed database; zero for in-memory-only profiles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Offsets {
    pub model: u64,
    pub filter: u64,
    pub profile: u64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_cutoff_errors() {
        let cutoffs = Cutoffs::default();
        let err = cutoffs.select(BitCutoffSelector::Gathering).unwrap_err();
        assert!(matches!(err, PHmmError::MissingCutoffs { .. }));
    }

    #[test]
    fn present_cutoff_selects() {
        let cutoffs = Cutoffs {
            gathering: Some(ScorePair {
                score1: 25.0,
                score2: 20.0,
            }),
            ..Default::default()
        };
        let pair = cutoffs.select(BitCutoffSelector::Gathering).unwrap();
        assert_eq!(pair.score1, 25.0);
    }
}
