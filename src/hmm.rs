//! The core probabilistic profile-HMM: match/insert emissions, transition
//! probabilities, and identifying/calibration metadata.

use crate::alphabet::Alphabet;
use crate::error::{PHmmError, Result};
use crate::metadata::{Cutoffs, EvalueParameters};
use crate::rng::Randomness;

/// The seven transition kinds tracked per node, in the fixed order used
/// everywhere a `[f64; 7]` or `[i16; 7]` transition row appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Mm,
    Mi,
    Md,
    Im,
    Ii,
    Dm,
    Dd,
}

pub const TRANSITION_KINDS: [TransitionKind; 7] = [
    TransitionKind::Mm,
    TransitionKind::Mi,
    TransitionKind::Md,
    TransitionKind::Im,
    TransitionKind::Ii,
    TransitionKind::Dm,
    TransitionKind::Dd,
];

const EPS: f64 = 1e-5;

fn sums_to_one(row: &[f64], eps: f64) -> bool {
    let sum: f64 = row.iter().sum();
    (sum - 1.0).abs() <= eps
}

/// Optional free-text provenance and descriptive metadata.
#[derive(Debug, Clone, Default)]
pub struct HmmMetadata {
    pub accession: Option<String>,
    pub description: Option<String>,
    pub command_line: Vec<String>,
    pub creation_time: Option<String>,
    pub composition: Option<Vec<f64>>,
    pub checksum: Option<u32>,
    pub consensus: Option<String>,
    pub consensus_structure: Option<String>,
    pub consensus_accessibility: Option<String>,
    pub nseq: Option<usize>,
    pub nseq_effective: Option<f64>,
}

/// A probabilistic profile-HMM with `m` match nodes.
///
/// Nodes are 1-based throughout this crate's public API (`node 0` is the
/// implicit entry node and carries only a transition row, no emissions),
/// matching the textual HMM format's own node numbering.
#[derive(Debug, Clone)]
pub struct Hmm {
    alphabet: Alphabet,
    m: usize,
    name: String,
    meta: HmmMetadata,
    /// `match_emissions[i]` for `i in 1..=m`; `match_emissions[0]` is unused
    /// and kept zeroed so indices line up with 1-based node numbers.
    match_emissions: Vec<Vec<f64>>,
    insert_emissions: Vec<Vec<f64>>,
    /// `transitions[i]` are the transitions *leaving* node `i`, `i in 0..=m`.
    transitions: Vec<[f64; 7]>,
    evalue_parameters: Option<EvalueParameters>,
    cutoffs: Cutoffs,
}

impl Hmm {
    /// A freshly zeroed model of size `m`. Used by the Builder before
    /// accumulating observed counts.
    pub fn zeroed(alphabet: Alphabet, m: usize, name: impl Into<String>) -> Result<Self> {
        if m == 0 {
            return Err(PHmmError::InvalidParameter {
                name: "m",
                reason: "model must have at least one match node".into(),
            });
        }
        let k = alphabet.k();
        Ok(Self {
            alphabet,
            m,
            name: name.into(),
            meta: HmmMetadata::default(),
            match_emissions: vec![vec![0.0; k]; m + 1],
            insert_emissions: vec![vec![0.0; k]; m + 1],
            transitions: vec![[0.0; 7]; m + 1],
            evalue_parameters: None,
            cutoffs: Cutoffs::default(),
        })
    }

    pub fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn meta(&self) -> &HmmMetadata {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut HmmMetadata {
        &mut self.meta
    }

    pub fn evalue_parameters(&self) -> Option<EvalueParameters> {
        self.evalue_parameters
    }

    pub fn set_evalue_parameters(&mut self, params: EvalueParameters) {
        self.evalue_parameters = Some(params);
    }

    pub fn cutoffs(&self) -> &Cutoffs {
        &self.cutoffs
    }

    pub fn cutoffs_mut(&mut self) -> &mut Cutoffs {
        &mut self.cutoffs
    }

    pub fn match_emission(&self, node: usize) -> &[f64] {
        &self.match_emissions[node]
    }

    pub fn match_emission_mut(&mut self, node: usize) -> &mut [f64] {
        &mut self.match_emissions[node]
    }

    pub fn insert_emission(&self, node: usize) -> &[f64] {
        &self.insert_emissions[node]
    }

    pub fn insert_emission_mut(&mut self, node: usize) -> &mut [f64] {
        &mut self.insert_emissions[node]
    }

    pub fn transitions(&self, node: usize) -> &[f64; 7] {
        &self.transitions[node]
    }

    pub fn transitions_mut(&mut self, node: usize) -> &mut [f64; 7] {
        &mut self.transitions[node]
    }

    pub fn transition(&self, node: usize, kind: TransitionKind) -> f64 {
        self.transitions[node][kind as usize]
    }

    pub fn set_transition(&mut self, node: usize, kind: TransitionKind, value: f64) {
        self.transitions[node][kind as usize] = value;
    }

    /// Zero every emission and transition row in place, preserving `m`,
    /// alphabet and metadata. Used by the Builder to reset a scratch model
    /// between count-accumulation passes.
    pub fn zero(&mut self) {
        for row in self.match_emissions.iter_mut().chain(self.insert_emissions.iter_mut()) {
            row.iter_mut().for_each(|v| *v = 0.0);
        }
        for row in self.transitions.iter_mut() {
            *row = [0.0; 7];
        }
    }

    /// Multiply every emission and transition value by `factor`. Used by the
    /// Builder to rescale observed counts before mixing in Dirichlet priors.
    pub fn scale(&mut self, factor: f64) {
        for row in self.match_emissions.iter_mut().chain(self.insert_emissions.iter_mut()) {
            row.iter_mut().for_each(|v| *v *= factor);
        }
        for row in self.transitions.iter_mut() {
            row.iter_mut().for_each(|v| *v *= factor);
        }
    }

    /// Renormalize every per-node emission/transition distribution to sum to
    /// one. Rows that sum to zero are left as-is (a node with no observed
    /// inserts, for instance, keeps an all-zero insert-emission row; the
    /// corresponding `II`/`IM` transitions are never taken).
    pub fn renormalize(&mut self) {
        for row in self.match_emissions.iter_mut().chain(self.insert_emissions.iter_mut()) {
            normalize_row(row);
        }
        for row in self.transitions.iter_mut() {
            let sum: f64 = row.iter().sum();
            if sum > 0.0 {
                row.iter_mut().for_each(|v| *v /= sum);
            }
        }
    }

    /// Assert that `other_m` equals this model's `M`, for operations that
    /// combine two entities where equality is required (§7
    /// `ModelSizeMismatch`).
    pub fn assert_same_m(&self, other_m: usize) -> Result<()> {
        if self.m != other_m {
            Err(PHmmError::ModelSizeMismatch {
                a: self.m,
                b: other_m,
            })
        } else {
            Ok(())
        }
    }

    pub fn set_composition(&mut self, composition: Vec<f64>) -> Result<()> {
        if composition.len() != self.alphabet.k() {
            return Err(PHmmError::InvalidParameter {
                name: "composition",
                reason: format!(
                    "expected {} entries, got {}",
                    self.alphabet.k(),
                    composition.len()
                ),
            });
        }
        self.meta.composition = Some(composition);
        Ok(())
    }

    /// Validate sum-to-one invariants (§8 Invariant 1) within `eps`.
    pub fn validate(&self, eps: f64) -> Result<()> {
        for node in 1..=self.m {
            if !sums_to_one(&self.match_emissions[node], eps) {
                return Err(PHmmError::InvalidFormat(format!(
                    "match emissions at node {node} do not sum to 1"
                )));
            }
            let insert_sum: f64 = self.insert_emissions[node].iter().sum();
            if insert_sum > 0.0 && !sums_to_one(&self.insert_emissions[node], eps) {
                return Err(PHmmError::InvalidFormat(format!(
                    "insert emissions at node {node} do not sum to 1"
                )));
            }
        }
        for node in 0..=self.m {
            let sum: f64 = self.transitions[node].iter().sum();
            if sum > 0.0 && (sum - 1.0).abs() > eps {
                return Err(PHmmError::InvalidFormat(format!(
                    "transitions at node {node} do not sum to 1 (sum={sum})"
                )));
            }
        }
        Ok(())
    }

    /// Generate a random, fully normalized model of size `m`. Grounded in
    /// the Builder's own `renormalize` helper: emissions/transitions are
    /// drawn uniformly at random then renormalized, exactly as a
    /// maximum-entropy sampler would.
    pub fn sample(alphabet: Alphabet, m: usize, rng: &mut Randomness) -> Result<Self> {
        let mut hmm = Hmm::zeroed(alphabet, m, "sampled")?;
        let k = alphabet.k();
        for node in 0..=m {
            if node >= 1 {
                for c in 0..k {
                    hmm.match_emissions[node][c] = rng.gen_range_f64(0.01, 1.0);
                }
                for c in 0..k {
                    hmm.insert_emissions[node][c] = rng.gen_range_f64(0.01, 1.0);
                }
            }
            for t in 0..7 {
                hmm.transitions[node][t] = rng.gen_range_f64(0.01, 1.0);
            }
        }
        hmm.renormalize();
        Ok(hmm)
    }
}

fn normalize_row(row: &mut [f64]) {
    let sum: f64 = row.iter().sum();
    if sum > 0.0 {
        row.iter_mut().for_each(|v| *v /= sum);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zeroed_then_uniform_validates() {
        let mut hmm = Hmm::zeroed(Alphabet::Amino, 5, "test").unwrap();
        for node in 1..=5 {
            hmm.match_emission_mut(node).iter_mut().for_each(|v| *v = 1.0);
            hmm.insert_emission_mut(node).iter_mut().for_each(|v| *v = 1.0);
        }
        for node in 0..=5 {
            hmm.transitions_mut(node).iter_mut().for_each(|v| *v = 1.0);
        }
        hmm.renormalize();
        hmm.validate(1e-5).unwrap();
    }

    #[test]
    fn rejects_zero_m() {
        assert!(Hmm::zeroed(Alphabet::Dna, 0, "empty").is_err());
    }

    #[test]
    fn sample_validates() {
        let mut rng = Randomness::new(42);
        let hmm = Hmm::sample(Alphabet::Amino, 10, &mut rng).unwrap();
        hmm.validate(1e-5).unwrap();
        assert_eq!(hmm.m(), 10);
    }

    #[test]
    fn set_composition_checks_length() {
        let mut hmm = Hmm::zeroed(Alphabet::Dna, 3, "t").unwrap();
        assert!(hmm.set_composition(vec![0.25; 3]).is_err());
        assert!(hmm.set_composition(vec![0.25; 4]).is_ok());
    }
}
