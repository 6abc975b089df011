//! Log-odds score form of an [`Hmm`], configured against a [`Background`]
//! for a particular target length and search mode.

use crate::alphabet::Alphabet;
use crate::background::Background;
use crate::error::{PHmmError, Result};
use crate::hmm::Hmm;
use crate::metadata::{Cutoffs, EvalueParameters};

/// Special-state transition scores (nats) governing how a target may enter
/// (`N`/`B`), re-enter for another domain (`J`/`E`), and exit (`C`) the
/// model, plus the per-node local/glocal entry and exit score tables.
#[derive(Debug, Clone)]
pub struct SpecialTransitions {
    pub n_loop: f64,
    pub n_move: f64,
    pub e_to_c: f64,
    pub e_to_j: f64,
    pub j_loop: f64,
    pub j_move: f64,
    pub c_loop: f64,
    pub c_move: f64,
    /// `entry[k]`: score of `B -> M_k`, `k in 1..=m`.
    pub entry: Vec<f64>,
    /// `exit[k]`: score of `M_k -> E`, `k in 1..=m`.
    pub exit: Vec<f64>,
}

/// A score form of an [`Hmm`]: log-odds match emissions, transition scores
/// in nats, and the special states governing local/glocal, single/multihit
/// behavior, all configured for one target length `L`.
#[derive(Debug, Clone)]
pub struct Profile {
    alphabet: Alphabet,
    m: usize,
    length: usize,
    local: bool,
    multihit: bool,
    configured: bool,
    name: String,
    accession: Option<String>,
    description: Option<String>,
    /// `match_scores[node][residue]`, `node in 1..=m`.
    match_scores: Vec<Vec<f64>>,
    insert_scores: Vec<Vec<f64>>,
    /// Transition scores leaving node `i`, in nats (`ln` of the HMM's own
    /// transition probabilities; these are not log-odds since the null
    /// model has no competing state structure).
    transition_scores: Vec<[f64; 7]>,
    special: SpecialTransitions,
    evalue_parameters: Option<EvalueParameters>,
    cutoffs: Cutoffs,
}

impl Profile {
    /// `configure` must be called before a Profile is used for scoring
    /// (Invariant: `local`/`multihit` mirror the configuration, `M` equals
    /// the source HMM's `M`).
    pub fn configure(hmm: &Hmm, background: &Background, length: usize, local: bool, multihit: bool) -> Result<Self> {
        hmm.alphabet().check_match(background.alphabet())?;
        let m = hmm.m();
        let k = hmm.alphabet().k();
        let bg_freqs = background.freqs();

        let mut match_scores = vec![vec![0.0; k]; m + 1];
        let mut insert_scores = vec![vec![0.0; k]; m + 1];
        let mut transition_scores = vec![[0.0; 7]; m + 1];

        for node in 1..=m {
            for c in 0..k {
                match_scores[node][c] = log_odds(hmm.match_emission(node)[c], bg_freqs[c]);
                insert_scores[node][c] = log_odds(hmm.insert_emission(node)[c], bg_freqs[c]);
            }
        }
        for node in 0..=m {
            let row = hmm.transitions(node);
            for t in 0..7 {
                transition_scores[node][t] = ln_prob(row[t]);
            }
        }

        let special = configure_special(m, length, local, multihit);

        Ok(Self {
            alphabet: hmm.alphabet(),
            m,
            length,
            local,
            multihit,
            configured: true,
            name: hmm.name().to_string(),
            accession: hmm.meta().accession.clone(),
            description: hmm.meta().description.clone(),
            match_scores,
            insert_scores,
            transition_scores,
            special,
            evalue_parameters: hmm.evalue_parameters(),
            cutoffs: *hmm.cutoffs(),
        })
    }

    pub fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn multihit(&self) -> bool {
        self.multihit
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn accession(&self) -> Option<&str> {
        self.accession.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn evalue_parameters(&self) -> Option<EvalueParameters> {
        self.evalue_parameters
    }

    pub fn cutoffs(&self) -> &Cutoffs {
        &self.cutoffs
    }

    pub fn match_score(&self, node: usize, residue: u8) -> f64 {
        self.match_scores[node][residue as usize]
    }

    pub fn insert_score(&self, node: usize, residue: u8) -> f64 {
        self.insert_scores[node][residue as usize]
    }

    pub fn match_scores(&self, node: usize) -> &[f64] {
        &self.match_scores[node]
    }

    pub fn insert_scores(&self, node: usize) -> &[f64] {
        &self.insert_scores[node]
    }

    pub fn transition_score(&self, node: usize, kind: crate::hmm::TransitionKind) -> f64 {
        self.transition_scores[node][kind as usize]
    }

    pub fn transition_scores_row(&self, node: usize) -> &[f64; 7] {
        &self.transition_scores[node]
    }

    pub fn special(&self) -> &SpecialTransitions {
        &self.special
    }

    /// Reconstruct an already-scored Profile from its component parts, the
    /// inverse of the accessors above; used to load a pressed-database
    /// `.h3p` full-profile record without re-deriving from an `Hmm`.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        alphabet: Alphabet,
        m: usize,
        length: usize,
        local: bool,
        multihit: bool,
        name: String,
        accession: Option<String>,
        description: Option<String>,
        match_scores: Vec<Vec<f64>>,
        insert_scores: Vec<Vec<f64>>,
        transition_scores: Vec<[f64; 7]>,
        special: SpecialTransitions,
        evalue_parameters: Option<EvalueParameters>,
        cutoffs: Cutoffs,
    ) -> Self {
        Self {
            alphabet,
            m,
            length,
            local,
            multihit,
            configured: true,
            name,
            accession,
            description,
            match_scores,
            insert_scores,
            transition_scores,
            special,
            evalue_parameters,
            cutoffs,
        }
    }

    /// Re-derive the special-state transitions for a new target length,
    /// without re-deriving the emission/transition score tables. This is
    /// the pipeline's Stage 0 length reconfiguration.
    pub fn reconfigure_length(&mut self, length: usize) -> Result<()> {
        if !self.configured {
            return Err(PHmmError::Unconfigured);
        }
        self.length = length;
        self.special = configure_special(self.m, length, self.local, self.multihit);
        Ok(())
    }

    pub fn ensure_configured(&self) -> Result<()> {
        if self.configured {
            Ok(())
        } else {
            Err(PHmmError::Unconfigured)
        }
    }
}

fn log_odds(p: f64, f: f64) -> f64 {
    if p <= 0.0 {
        f64::NEG_INFINITY
    } else {
        (p / f).ln()
    }
}

fn ln_prob(p: f64) -> f64 {
    if p <= 0.0 {
        f64::NEG_INFINITY
    } else {
        p.ln()
    }
}

/// Plan7-style special-state configuration. N/C/J self-loop probability is
/// tied to the null model's own `p1` so that flanking "random" residues are
/// scored identically inside and outside the profile; local/glocal entry
/// and exit use the standard uniform-fragment distribution
/// `t(B,Mk) = 2(M-k+1) / (M(M+1))`.
fn configure_special(m: usize, length: usize, local: bool, multihit: bool) -> SpecialTransitions {
    let bg = Background::new(Alphabet::Amino, length.max(1));
    let p1 = bg.p1();
    let loop_score = p1.ln();
    let move_score = (1.0 - p1).ln();

    let (e_to_c, e_to_j) = if multihit {
        (0.5f64.ln(), 0.5f64.ln())
    } else {
        (0.0, f64::NEG_INFINITY)
    };

    let mut entry = vec![f64::NEG_INFINITY; m + 1];
    let mut exit = vec![f64::NEG_INFINITY; m + 1];
    if local {
        let denom = (m * (m + 1)) as f64;
        for k in 1..=m {
            let p_entry = 2.0 * (m - k + 1) as f64 / denom;
            entry[k] = p_entry.ln();
            let p_exit = 2.0 / (m - k + 2) as f64;
            exit[k] = p_exit.ln();
        }
    } else {
        entry[1] = 0.0; // ln(1.0)
        exit[m] = 0.0;
    }

    SpecialTransitions {
        n_loop: loop_score,
        n_move: move_score,
        e_to_c,
        e_to_j,
        j_loop: loop_score,
        j_move: move_score,
        c_loop: loop_score,
        c_move: move_score,
        entry,
        exit,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rng::Randomness;

    #[test]
    fn configure_preserves_m() {
        let mut rng = Randomness::new(1);
        let hmm = Hmm::sample(Alphabet::Amino, 12, &mut rng).unwrap();
        let bg = Background::new(Alphabet::Amino, 400);
        let profile = Profile::configure(&hmm, &bg, 400, true, true).unwrap();
        assert_eq!(profile.m(), hmm.m());
        assert!(profile.local());
        assert!(profile.multihit());
    }

    #[test]
    fn local_entry_sums_to_one_in_probability_space() {
        let mut rng = Randomness::new(2);
        let hmm = Hmm::sample(Alphabet::Dna, 8, &mut rng).unwrap();
        let bg = Background::new(Alphabet::Dna, 100);
        let profile = Profile::configure(&hmm, &bg, 100, true, false).unwrap();
        let sum: f64 = (1..=8).map(|k| profile.special().entry[k].exp()).sum();
        assert!((sum - 1.0).abs() < 1e-9, "sum was {sum}");
    }

    #[test]
    fn reconfigure_requires_prior_configure() {
        let mut rng = Randomness::new(3);
        let hmm = Hmm::sample(Alphabet::Dna, 5, &mut rng).unwrap();
        let bg = Background::new(Alphabet::Dna, 100);
        let mut profile = Profile::configure(&hmm, &bg, 100, false, true).unwrap();
        assert!(profile.reconfigure_length(250).is_ok());
        assert_eq!(profile.length(), 250);
    }
}
