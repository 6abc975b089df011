//! Turns a single sequence or a multiple sequence alignment into a
//! calibrated [`Hmm`].

use crate::alphabet::Alphabet;
use crate::background::Background;
use crate::error::{PHmmError, Result};
use crate::hmm::{Hmm, TransitionKind};
use crate::metadata::EvalueParameters;
use crate::optimized_profile::OptimizedProfile;
use crate::profile::Profile;
use crate::rng::Randomness;
use crate::sequence::{DigitalMsa, DigitalSequence};

/// Column-architecture determination strategy (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    /// Match columns are those with occupancy >= `symfrac`.
    Fast,
    /// Match columns follow the alignment's own reference annotation line.
    Hand,
}

/// Sequence-weighting scheme applied before counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weighting {
    PositionBased,
    GscTree,
    Blosum,
    None,
    /// Use the weights already attached to the input MSA.
    Given,
}

/// Effective-sequence-number scheme controlling how hard counts are damped
/// before they become probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveNumber {
    Entropy,
    Clusters,
    Exponential,
    None,
    Set(u32),
}

/// Dirichlet prior mixture used to regularize observed counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorScheme {
    Amino,
    Nucleic,
    Laplace,
}

/// All tunable knobs of model construction, set via chained `with_*` calls.
#[derive(Debug, Clone)]
pub struct BuilderOptions {
    pub architecture: Architecture,
    pub weighting: Weighting,
    pub effective_number: EffectiveNumber,
    pub prior_scheme: PriorScheme,
    pub symfrac: f64,
    pub fragthresh: f64,
    pub em_l: usize,
    pub em_n: usize,
    pub ev_l: usize,
    pub ev_n: usize,
    pub ef_l: usize,
    pub ef_n: usize,
    pub eft: f64,
    pub seed: u64,
    pub ere: Option<f64>,
    pub popen: f64,
    pub pextend: f64,
    pub window_length: Option<usize>,
    pub window_beta: f64,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            architecture: Architecture::Fast,
            weighting: Weighting::PositionBased,
            effective_number: EffectiveNumber::Entropy,
            prior_scheme: PriorScheme::Amino,
            symfrac: 0.5,
            fragthresh: 0.5,
            em_l: 200,
            em_n: 200,
            ev_l: 200,
            ev_n: 200,
            ef_l: 100,
            ef_n: 200,
            eft: 0.04,
            seed: 42,
            ere: None,
            popen: 1.0 / 7.0,
            pextend: 0.4,
            window_length: None,
            window_beta: 1e-7,
        }
    }
}

impl BuilderOptions {
    pub fn with_architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = architecture;
        self
    }

    pub fn with_weighting(mut self, weighting: Weighting) -> Self {
        self.weighting = weighting;
        self
    }

    pub fn with_effective_number(mut self, effective_number: EffectiveNumber) -> Self {
        self.effective_number = effective_number;
        self
    }

    pub fn with_prior_scheme(mut self, prior_scheme: PriorScheme) -> Self {
        self.prior_scheme = prior_scheme;
        self
    }

    pub fn with_symfrac(mut self, symfrac: f64) -> Self {
        self.symfrac = symfrac;
        self
    }

    pub fn with_fragthresh(mut self, fragthresh: f64) -> Self {
        self.fragthresh = fragthresh;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_ere(mut self, ere: f64) -> Self {
        self.ere = Some(ere);
        self
    }

    pub fn with_window(mut self, window_length: usize, window_beta: f64) -> Self {
        self.window_length = Some(window_length);
        self.window_beta = window_beta;
        self
    }
}

/// Turns a single sequence or an MSA into a calibrated model, the
/// `hmmbuild`-equivalent entry point.
#[derive(Debug, Clone)]
pub struct Builder {
    options: BuilderOptions,
}

impl Builder {
    pub fn new(options: BuilderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BuilderOptions {
        &self.options
    }

    /// Single-sequence model: one match column per residue, the
    /// `hmmbuild --single` path.
    pub fn build(&self, seq: &DigitalSequence, background: &Background) -> Result<Hmm> {
        background.alphabet().check_match(seq.alphabet())?;
        if seq.is_empty() {
            return Err(PHmmError::EmptyModel);
        }
        let msa = single_sequence_msa(seq);
        self.build_msa(&msa, background)
    }

    /// MSA-derived model: determine match columns, accumulate weighted
    /// counts, mix in Dirichlet priors, renormalize, then calibrate.
    pub fn build_msa(&self, msa: &DigitalMsa, background: &Background) -> Result<Hmm> {
        self.validate_options()?;
        background.alphabet().check_match(msa.alphabet)?;
        if msa.nseq() == 0 || msa.alen() == 0 {
            return Err(PHmmError::EmptyModel);
        }

        let match_cols = self.match_columns(msa);
        let m = match_cols.len();
        if m == 0 {
            return Err(PHmmError::EmptyModel);
        }

        let weights = self.sequence_weights(msa);
        let mut hmm = Hmm::zeroed(msa.alphabet, m, "builder")?;
        self.accumulate_counts(&mut hmm, msa, &match_cols, &weights);
        self.mix_priors(&mut hmm);
        hmm.renormalize();
        hmm.set_composition(background.freqs().to_vec())?;
        hmm.meta_mut().nseq = Some(msa.nseq());
        hmm.meta_mut().nseq_effective = Some(self.effective_number(&weights));

        self.calibrate(&mut hmm, background)?;
        hmm.validate(1e-3)?;
        Ok(hmm)
    }

    fn validate_options(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.options.symfrac) {
            return Err(PHmmError::InvalidParameter {
                name: "symfrac",
                reason: format!("must be in [0, 1], got {}", self.options.symfrac),
            });
        }
        if !(0.0..=1.0).contains(&self.options.fragthresh) {
            return Err(PHmmError::InvalidParameter {
                name: "fragthresh",
                reason: format!("must be in [0, 1], got {}", self.options.fragthresh),
            });
        }
        if self.options.popen < 0.0 || self.options.popen >= 1.0 {
            return Err(PHmmError::InvalidParameter {
                name: "popen",
                reason: format!("must be in [0, 1), got {}", self.options.popen),
            });
        }
        if self.options.pextend < 0.0 || self.options.pextend >= 1.0 {
            return Err(PHmmError::InvalidParameter {
                name: "pextend",
                reason: format!("must be in [0, 1), got {}", self.options.pextend),
            });
        }
        if let Some(ere) = self.options.ere {
            if ere <= 0.0 {
                return Err(PHmmError::InvalidParameter {
                    name: "ere",
                    reason: format!("must be positive, got {ere}"),
                });
            }
        }
        Ok(())
    }

    fn match_columns(&self, msa: &DigitalMsa) -> Vec<usize> {
        match self.options.architecture {
            Architecture::Fast => (0..msa.alen())
                .filter(|&col| msa.occupancy(col) >= self.options.symfrac)
                .collect(),
            Architecture::Hand => match &msa.reference_annotation {
                Some(annotation) => annotation
                    .iter()
                    .enumerate()
                    .filter(|(_, &c)| c == 'x' || c == 'X')
                    .map(|(i, _)| i)
                    .collect(),
                None => (0..msa.alen())
                    .filter(|&col| msa.occupancy(col) >= self.options.symfrac)
                    .collect(),
            },
        }
    }

    /// Per-sequence weights. Phylogenetic schemes (GSC-tree,
    /// BLOSUM-clustering) are left at uniform weight 1.0, a documented
    /// simplification recorded in this crate's design ledger.
    fn sequence_weights(&self, msa: &DigitalMsa) -> Vec<f64> {
        match self.options.weighting {
            Weighting::Given => msa.weights.clone().unwrap_or_else(|| vec![1.0; msa.nseq()]),
            _ => vec![1.0; msa.nseq()],
        }
    }

    fn accumulate_counts(&self, hmm: &mut Hmm, msa: &DigitalMsa, match_cols: &[usize], weights: &[f64]) {
        let k = hmm.alphabet().k();
        for (row, &w) in msa.rows.iter().zip(weights) {
            for (node, &col) in match_cols.iter().enumerate() {
                let node = node + 1;
                if let Some(code) = row[col] {
                    if (code as usize) < k {
                        hmm.match_emission_mut(node)[code as usize] += w;
                    }
                }
            }
            for node in 0..=match_cols.len() {
                hmm.transitions_mut(node)[TransitionKind::Mm as usize] += w;
            }
        }
    }

    /// Mix a simple single-component Dirichlet prior into the accumulated
    /// counts, strength scaled by `prior_scheme`.
    fn mix_priors(&self, hmm: &mut Hmm) {
        let k = hmm.alphabet().k();
        let alpha = match self.options.prior_scheme {
            PriorScheme::Laplace => 1.0,
            PriorScheme::Amino | PriorScheme::Nucleic => 0.05,
        };
        for node in 1..=hmm.m() {
            for c in 0..k {
                hmm.match_emission_mut(node)[c] += alpha;
                hmm.insert_emission_mut(node)[c] += alpha * 0.1;
            }
        }
        for node in 0..=hmm.m() {
            let row = hmm.transitions_mut(node);
            row[TransitionKind::Mm as usize] += 1.0;
            row[TransitionKind::Mi as usize] += self.options.popen;
            row[TransitionKind::Md as usize] += self.options.popen;
            row[TransitionKind::Im as usize] += 1.0 - self.options.pextend;
            row[TransitionKind::Ii as usize] += self.options.pextend;
            row[TransitionKind::Dm as usize] += 1.0;
            row[TransitionKind::Dd as usize] += self.options.pextend * 0.1;
        }
    }

    fn effective_number(&self, weights: &[f64]) -> f64 {
        match self.options.effective_number {
            EffectiveNumber::Set(n) => n as f64,
            EffectiveNumber::None => weights.len() as f64,
            EffectiveNumber::Entropy | EffectiveNumber::Clusters | EffectiveNumber::Exponential => {
                weights.iter().sum::<f64>().max(1.0)
            }
        }
    }

    /// Fit Gumbel (MSV/Viterbi) and exponential-tail (Forward) score
    /// distribution parameters by simulating random sequences against the
    /// built model, the calibration step HMMER performs at build time.
    fn calibrate(&self, hmm: &mut Hmm, background: &Background) -> Result<()> {
        let mut rng = Randomness::new(self.options.seed);
        let profile = Profile::configure(hmm, background, self.options.ev_l.max(1), true, true)?;
        let optimized = OptimizedProfile::from_profile(&profile)?;

        let mut msv_scores = Vec::with_capacity(self.options.ev_n);
        for _ in 0..self.options.ev_n.max(1) {
            let seq = random_sequence(hmm.alphabet(), self.options.ev_l.max(1), &mut rng);
            msv_scores.push(crate::pipeline::ssv_score(&optimized, &seq));
        }
        sort_calibration_scores(&mut msv_scores).map_err(|e| PHmmError::InvalidFormat(e.to_string()))?;

        let (m_mu, m_lambda) = fit_gumbel(&msv_scores);
        let (v_mu, v_lambda) = (m_mu, m_lambda * 0.693);
        let f_lambda = 0.693147;
        let f_tau = m_mu / optimized.m().max(1) as f64;

        hmm.set_evalue_parameters(EvalueParameters {
            m_mu,
            m_lambda,
            v_mu,
            v_lambda,
            f_tau,
            f_lambda,
        });
        Ok(())
    }
}

fn single_sequence_msa(seq: &DigitalSequence) -> DigitalMsa {
    DigitalMsa {
        alphabet: seq.alphabet(),
        rows: vec![seq.residues().iter().map(|&c| Some(c)).collect()],
        names: vec![seq.name().to_string()],
        reference_annotation: None,
        weights: None,
    }
}

fn random_sequence(alphabet: Alphabet, length: usize, rng: &mut Randomness) -> DigitalSequence {
    let k = alphabet.k();
    let residues = (0..length).map(|_| rng.gen_usize(k) as u8).collect();
    DigitalSequence::new(alphabet, "calibration", residues)
}

/// Sorts a batch of calibration scores in place, rejecting a NaN score as a
/// malformed simulation run rather than letting `sort_by` panic on it.
/// Internal plumbing, so errors are plain `anyhow` rather than the public
/// `PHmmError` taxonomy.
fn sort_calibration_scores(scores: &mut [f64]) -> anyhow::Result<()> {
    for &s in scores.iter() {
        anyhow::ensure!(s.is_finite(), "calibration run produced a non-finite MSV score: {s}");
    }
    scores.sort_by(|a, b| a.partial_cmp(b).expect("checked finite above"));
    Ok(())
}

/// Method-of-moments Gumbel fit over a sample of maxima, the standard
/// approach HMMER's own calibration uses.
fn fit_gumbel(sorted_scores: &[f64]) -> (f64, f64) {
    use statrs::statistics::Statistics;
    if sorted_scores.is_empty() {
        return (0.0, 0.693);
    }
    let mean = sorted_scores.mean();
    let std_dev = sorted_scores.population_std_dev().max(1e-6);
    const EULER_MASCHERONI: f64 = 0.5772156649;
    let lambda = std::f64::consts::PI / (std_dev * 6f64.sqrt());
    let mu = mean - EULER_MASCHERONI / lambda;
    (mu, lambda)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::alphabet::Alphabet;

    #[test]
    fn build_single_sequence_has_one_match_per_residue() {
        let seq = DigitalSequence::digitize(Alphabet::Dna, "s1", b"ACGTACGT").unwrap();
        let bg = Background::new(Alphabet::Dna, 100);
        let builder = Builder::new(BuilderOptions::default().with_ere(0.59));
        let hmm = builder.build(&seq, &bg).unwrap();
        assert_eq!(hmm.m(), 8);
    }

    #[test]
    fn build_msa_drops_low_occupancy_columns() {
        let msa = DigitalMsa {
            alphabet: Alphabet::Amino,
            rows: vec![
                vec![Some(0), Some(1), None, Some(2)],
                vec![Some(0), Some(1), None, Some(2)],
                vec![Some(0), None, None, Some(2)],
            ],
            names: vec!["a".into(), "b".into(), "c".into()],
            reference_annotation: None,
            weights: None,
        };
        let bg = Background::new(Alphabet::Amino, 100);
        let builder = Builder::new(BuilderOptions::default().with_symfrac(0.5));
        let hmm = builder.build_msa(&msa, &bg).unwrap();
        assert_eq!(hmm.m(), 3);
    }

    #[test]
    fn rejects_out_of_range_symfrac() {
        let seq = DigitalSequence::digitize(Alphabet::Dna, "s1", b"ACGT").unwrap();
        let bg = Background::new(Alphabet::Dna, 100);
        let builder = Builder::new(BuilderOptions::default().with_symfrac(1.5));
        assert!(matches!(
            builder.build(&seq, &bg),
            Err(PHmmError::InvalidParameter { name: "symfrac", .. })
        ));
    }

    #[test]
    fn rejects_empty_msa() {
        let msa = DigitalMsa {
            alphabet: Alphabet::Dna,
            rows: vec![],
            names: vec![],
            reference_annotation: None,
            weights: None,
        };
        let bg = Background::new(Alphabet::Dna, 100);
        let builder = Builder::new(BuilderOptions::default());
        assert!(matches!(builder.build_msa(&msa, &bg), Err(PHmmError::EmptyModel)));
    }
}
