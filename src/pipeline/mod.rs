//! The scoring cascade: MSV -> bias -> Viterbi -> Forward/Backward -> domain
//! decomposition.

pub(crate) mod dp;

use crate::alignment::{Alignment, Domain, Domains, Hit};
use crate::alphabet::Alphabet;
use crate::background::Background;
use crate::builder::Builder;
use crate::error::{PHmmError, Result};
use crate::hmm::Hmm;
use crate::metadata::BitCutoffSelector;
use crate::optimized_profile::OptimizedProfile;
use crate::profile::Profile;
use crate::score_data::ScoreData;
use crate::sequence::{DigitalMsa, DigitalSequence, DigitalSequenceBlock};
use crate::tophits::{SearchMode, TopHits};

/// Cascade tuning knobs with HMMER-standard defaults.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Stage 1 MSV P-value acceptance threshold.
    pub f1: f64,
    /// Stage 3 Viterbi P-value acceptance threshold.
    pub f2: f64,
    /// Stage 4 Forward P-value acceptance threshold.
    pub f3: f64,
    pub bias_filter: bool,
    pub null2: bool,
    /// Placeholder profile size used before the first target fixes `M`.
    pub m_hint: usize,
    /// Placeholder target length used before the first target fixes `L`.
    pub l_hint: usize,
    pub z_override: Option<f64>,
    pub domz_override: Option<f64>,
    pub bit_cutoffs: Option<BitCutoffSelector>,
    /// Posterior-mass threshold (summed over match/insert states) a target
    /// position must clear to belong to a domain envelope.
    pub posterior_threshold: f64,
    /// Minimum gap (residues) between two envelopes before they are
    /// merged into one domain.
    pub envelope_merge_gap: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            f1: 0.02,
            f2: 1e-3,
            f3: 1e-5,
            bias_filter: true,
            null2: true,
            m_hint: 100,
            l_hint: 100,
            z_override: None,
            domz_override: None,
            bit_cutoffs: None,
            posterior_threshold: 0.3,
            envelope_merge_gap: 5,
        }
    }
}

/// The three forms a search query may arrive in; `search_hmm` dispatches on
/// this tagged variant (§9 Design Notes).
pub enum Query<'a> {
    Hmm(&'a Hmm),
    Profile(&'a Profile),
    Optimized(&'a Profile, &'a OptimizedProfile),
}

/// One model entered into a `scan_seq` stream: a model needs both its
/// score-form Profile (for Forward/Backward) and its striped
/// OptimizedProfile (for the MSV/Viterbi filters), which is why a pressed
/// database keeps an optional `.h3p` file of full profiles alongside the
/// `.h3m`/`.h3f` filter files (§6).
pub struct ScanModel<'a> {
    pub profile: &'a Profile,
    pub optimized: &'a OptimizedProfile,
}

/// The scoring cascade bound to one alphabet and null model.
#[derive(Debug, Clone)]
pub struct Pipeline {
    alphabet: Alphabet,
    config: PipelineConfig,
    background: Background,
}

impl Pipeline {
    pub fn new(alphabet: Alphabet, config: PipelineConfig) -> Self {
        let background = Background::new(alphabet, config.l_hint.max(1));
        Self {
            alphabet,
            config,
            background,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut PipelineConfig {
        &mut self.config
    }

    /// Reset transient search state. `Z`/`domZ`/`F1..F3`/`bit_cutoffs` live
    /// in `config` and are untouched (§4.2).
    pub fn clear(&mut self) {
        self.background = Background::new(self.alphabet, self.config.l_hint.max(1));
    }

    /// One-query-many-targets search (§4.2).
    pub fn search_hmm(&mut self, query: Query<'_>, targets: &DigitalSequenceBlock) -> Result<TopHits> {
        let (base_hmm, mut profile, mut optimized) = match query {
            Query::Hmm(hmm) => {
                let profile = Profile::configure(hmm, &self.background, self.config.l_hint.max(1), true, true)?;
                let optimized = OptimizedProfile::from_profile(&profile)?;
                (Some(hmm), profile, optimized)
            }
            Query::Profile(profile) => {
                let mut profile = profile.clone();
                profile.reconfigure_length(self.config.l_hint.max(1))?;
                let optimized = OptimizedProfile::from_profile(&profile)?;
                (None, profile, optimized)
            }
            Query::Optimized(profile, optimized) => (None, profile.clone(), optimized.clone()),
        };
        let _ = base_hmm;

        let mut hits = Vec::new();
        let mut top = TopHits::new(SearchMode::Search);
        if let Some(name) = Some(profile.name().to_string()) {
            top.set_query(name, profile.accession().map(str::to_string));
        }
        top.set_bit_cutoffs(self.config.bit_cutoffs);
        top.set_model_cutoffs(Some(*profile.cutoffs()));

        for (seqidx, target) in targets.iter().enumerate() {
            self.reconfigure_for_target(&mut profile, &mut optimized, target.len())?;
            top.searched_mut().sequences += 1;
            top.searched_mut().residues += target.len() as u64;
            top.searched_mut().models += 1;
            top.searched_mut().nodes += profile.m() as u64;
            if let Some(hit) = self.score_target(&profile, &optimized, target, seqidx)? {
                hits.push(hit);
            }
        }
        self.finalize(&mut top, hits, targets.len())?;
        Ok(top)
    }

    /// Build a single-sequence model then search (§4.2).
    pub fn search_seq(&mut self, seed: &DigitalSequence, targets: &DigitalSequenceBlock, builder: &Builder) -> Result<TopHits> {
        let hmm = builder.build(seed, &self.background)?;
        self.search_hmm(Query::Hmm(&hmm), targets)
    }

    /// Build from an MSA then search (§4.2).
    pub fn search_msa(&mut self, msa: &DigitalMsa, targets: &DigitalSequenceBlock, builder: &Builder) -> Result<TopHits> {
        let hmm = builder.build_msa(msa, &self.background)?;
        self.search_hmm(Query::Hmm(&hmm), targets)
    }

    /// Drive a jackhmmer-style search/rebuild loop from a seed sequence
    /// (§4.5). Consumes `self`: the driver owns its Pipeline across rounds.
    pub fn iterate_seq(
        self,
        seed: &DigitalSequence,
        targets: DigitalSequenceBlock,
        builder: Builder,
    ) -> Result<crate::iterative_search::IterativeSearch> {
        let hmm = builder.build(seed, &Background::new(seed.alphabet(), 1))?;
        crate::iterative_search::IterativeSearch::new(self, hmm, targets, builder)
    }

    /// Drive a jackhmmer-style search/rebuild loop from a starting HMM
    /// (§4.5).
    pub fn iterate_hmm(
        self,
        hmm: Hmm,
        targets: DigitalSequenceBlock,
        builder: Builder,
    ) -> Result<crate::iterative_search::IterativeSearch> {
        crate::iterative_search::IterativeSearch::new(self, hmm, targets, builder)
    }

    /// One-target-many-models search: invert the loop, scoring each model
    /// against a single target (§4.2).
    pub fn scan_seq<'a>(&mut self, target: &DigitalSequence, models: impl IntoIterator<Item = ScanModel<'a>>) -> Result<TopHits> {
        let mut hits = Vec::new();
        let mut top = TopHits::new(SearchMode::Scan);
        top.set_bit_cutoffs(self.config.bit_cutoffs);
        top.set_query(target.name(), None);

        let mut model_count = 0u64;
        for (seqidx, model) in models.into_iter().enumerate() {
            let mut profile = model.profile.clone();
            let mut optimized = model.optimized.clone();
            self.reconfigure_for_target(&mut profile, &mut optimized, target.len())?;
            if model_count == 0 {
                top.set_model_cutoffs(Some(*profile.cutoffs()));
            }
            model_count += 1;
            top.searched_mut().nodes += profile.m() as u64;
            if let Some(hit) = self.score_target(&profile, &optimized, target, seqidx)? {
                hits.push(hit);
            }
        }
        top.searched_mut().models = model_count;
        top.searched_mut().sequences = 1;
        top.searched_mut().residues = target.len() as u64;
        self.finalize(&mut top, hits, model_count as usize)?;
        Ok(top)
    }

    fn reconfigure_for_target(&mut self, profile: &mut Profile, optimized: &mut OptimizedProfile, length: usize) -> Result<()> {
        if profile.length() != length {
            self.background.set_length(length);
            profile.reconfigure_length(length)?;
            *optimized = OptimizedProfile::from_profile(profile)?;
        }
        Ok(())
    }

    fn finalize(&self, top: &mut TopHits, mut hits: Vec<Hit>, target_count: usize) -> Result<()> {
        let z = self.config.z_override.unwrap_or(target_count as f64).max(1.0);
        let domz = self
            .config
            .domz_override
            .unwrap_or_else(|| hits.len().max(1) as f64);
        for hit in &mut hits {
            hit.evalue = hit.pvalue * z;
            let ndom = hit.domains.len().max(1) as f64;
            for domain in hit.domains.iter_mut() {
                domain.c_evalue = domain.pvalue * ndom;
                domain.i_evalue = domain.pvalue * domz;
            }
        }
        top.set_z(z, domz);
        top.append(hits);
        top.apply_thresholds()?;
        Ok(())
    }

    /// Run the full Stage 0-5 cascade against one target, producing a Hit
    /// if the target survives through Stage 4.
    fn score_target(&self, profile: &Profile, optimized: &OptimizedProfile, seq: &DigitalSequence, seqidx: usize) -> Result<Option<Hit>> {
        let evalue_params = optimized
            .evalue_parameters()
            .ok_or(PHmmError::InvalidParameter {
                name: "evalue_parameters",
                reason: "model has not been calibrated".into(),
            })?;

        // Stage 1: MSV filter.
        let msv_raw = ssv_score(optimized, seq);
        let msv_nats = optimized.unscale_filter_score(msv_raw);
        let msv_p = exp_tail_p(msv_nats, evalue_params.f_tau, evalue_params.f_lambda);
        if msv_p > self.config.f1 {
            return Ok(None);
        }

        // Stage 2: bias filter.
        if self.config.bias_filter {
            let corrected_p = bias_corrected_p(seq, &self.background, msv_nats, &evalue_params);
            if corrected_p > self.config.f1 {
                return Ok(None);
            }
        }

        // Stage 3: Viterbi filter.
        let viterbi_result = dp::viterbi(profile, seq);
        let viterbi_p = gumbel_p(viterbi_result.score, evalue_params.v_mu, evalue_params.v_lambda);
        if viterbi_p > self.config.f2 {
            return Ok(None);
        }

        // Stage 4: Forward/Backward.
        let (forward_score, posterior) = dp::forward_backward(profile, seq);
        let forward_p = gumbel_p(forward_score, evalue_params.m_mu, evalue_params.m_lambda);
        if forward_p > self.config.f3 {
            return Ok(None);
        }
        debug_assert!(
            viterbi_result.score <= forward_score + 1.0,
            "viterbi score {} exceeded forward score {}",
            viterbi_result.score,
            forward_score
        );

        // Stage 5: domain decomposition.
        let score_data = ScoreData::build(profile, optimized);
        let domains = self.decompose_domains(profile, &score_data, seq, &viterbi_result, &posterior)?;
        if domains.is_empty() {
            return Ok(None);
        }

        let score_bits = forward_score / std::f64::consts::LN_2;
        let best_idx = domains.best_index().unwrap_or(0);
        let bias = domains.iter().map(|d| d.bias).sum::<f64>().max(0.0);

        Ok(Some(Hit {
            name: seq.name().to_string(),
            accession: None,
            description: None,
            score: score_bits,
            pre_score: score_bits,
            sum_score: domains.iter().map(|d| d.score).sum(),
            bias,
            // Placeholder; `finalize` rescales against the true Z once the
            // target count for this search is known.
            evalue: forward_p,
            pvalue: forward_p,
            best_domain: best_idx,
            domains,
            included: false,
            reported: false,
            new: false,
            dropped: false,
            duplicate: false,
            seqidx,
        }))
    }

    fn decompose_domains(
        &self,
        profile: &Profile,
        score_data: &ScoreData,
        seq: &DigitalSequence,
        viterbi_result: &dp::ViterbiResult,
        posterior: &[f64],
    ) -> Result<Domains> {
        let envelopes = find_envelopes(posterior, self.config.posterior_threshold, self.config.envelope_merge_gap);
        let mut domains = Vec::new();
        for (env_from, env_to) in envelopes {
            let steps_in_range: Vec<_> = viterbi_result
                .trace
                .steps()
                .iter()
                .filter(|s| s.target_pos >= env_from && s.target_pos <= env_to)
                .collect();
            if !steps_in_range.iter().any(|s| s.state == crate::trace::State::Match) {
                continue;
            }
            let mut raw_score = 0.0;
            let mut residue_counts = vec![0usize; profile.alphabet().kp()];
            for step in &steps_in_range {
                if step.target_pos == 0 {
                    continue;
                }
                let residue = seq.residue_1b(step.target_pos);
                match step.state {
                    crate::trace::State::Match => raw_score += profile.match_score(step.node, residue),
                    crate::trace::State::Insert => raw_score += profile.insert_score(step.node, residue),
                    _ => {}
                }
                residue_counts[residue as usize] += 1;
            }
            let bias = if self.config.null2 {
                score_data.null2_correction(&residue_counts)
            } else {
                0.0
            };
            let corrected_nats = (raw_score - bias).max(0.0);
            let score_bits = corrected_nats / std::f64::consts::LN_2;
            let pvalue = (-corrected_nats).exp().clamp(0.0, 1.0);
            domains.push(Domain {
                env_from,
                env_to,
                score: score_bits,
                bias: bias / std::f64::consts::LN_2,
                envelope_score: score_bits,
                // Placeholders; `finalize` rescales c_evalue by this hit's
                // domain count and i_evalue by domZ once both are known.
                c_evalue: pvalue,
                i_evalue: pvalue,
                pvalue,
                included: false,
                reported: false,
                alignment: build_alignment(profile, seq, &steps_in_range),
            });
        }
        Ok(Domains::new(domains))
    }
}

fn build_alignment(profile: &Profile, seq: &DigitalSequence, steps: &[&crate::trace::TraceStep]) -> Alignment {
    let nodes: Vec<usize> = steps
        .iter()
        .filter(|s| matches!(s.state, crate::trace::State::Match | crate::trace::State::Delete))
        .map(|s| s.node)
        .collect();
    let positions: Vec<usize> = steps
        .iter()
        .filter(|s| matches!(s.state, crate::trace::State::Match | crate::trace::State::Insert) && s.target_pos > 0)
        .map(|s| s.target_pos)
        .collect();
    let (hmm_from, hmm_to) = (nodes.first().copied().unwrap_or(1), nodes.last().copied().unwrap_or(profile.m()));
    let (target_from, target_to) = (positions.first().copied().unwrap_or(1), positions.last().copied().unwrap_or(1));

    let symbols = seq.alphabet().symbols().as_bytes();
    let mut hmm_consensus = String::new();
    let mut target_seq = String::new();
    let mut midline = String::new();
    for step in steps {
        match step.state {
            crate::trace::State::Match => {
                let residue = seq.residue_1b(step.target_pos);
                let best_call = (0..profile.alphabet().k())
                    .max_by(|&a, &b| profile.match_score(step.node, a as u8).partial_cmp(&profile.match_score(step.node, b as u8)).unwrap())
                    .unwrap_or(0) as u8;
                hmm_consensus.push(symbols[best_call as usize] as char);
                target_seq.push(symbols[residue as usize] as char);
                midline.push(if residue == best_call { '|' } else { ' ' });
            }
            crate::trace::State::Insert => {
                let residue = seq.residue_1b(step.target_pos);
                hmm_consensus.push('.');
                target_seq.push(symbols[residue as usize].to_ascii_lowercase() as char);
                midline.push(' ');
            }
            crate::trace::State::Delete => {
                hmm_consensus.push(symbols.get(0).copied().unwrap_or(b'X') as char);
                target_seq.push('-');
                midline.push(' ');
            }
            _ => {}
        }
    }

    Alignment {
        hmm_from,
        hmm_to,
        target_from,
        target_to,
        hmm_consensus,
        target_seq,
        midline,
    }
}

/// Contiguous runs of `posterior[i] >= threshold`, merged when the gap
/// between runs is `<= merge_gap`. Positions are 1-based, matching
/// `DigitalSequence::residue_1b`.
fn find_envelopes(posterior: &[f64], threshold: f64, merge_gap: usize) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, &p) in posterior.iter().enumerate().skip(1) {
        if p >= threshold {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(s) = start.take() {
            runs.push((s, i - 1));
        }
    }
    if let Some(s) = start {
        runs.push((s, posterior.len() - 1));
    }

    itertools::Itertools::coalesce(runs.into_iter(), |last, run| {
        if run.0 <= last.1 + merge_gap + 1 {
            Ok((last.0, run.1))
        } else {
            Err((last, run))
        }
    })
    .collect()
}

/// Maximum-ungapped-segment score in the 8-bit striped integer domain
/// (Stage 1 MSV), matching HMMER's own "restart at any position" local
/// scoring, with a constant entry cost in place of per-node entry.
pub(crate) fn ssv_score(optimized: &OptimizedProfile, seq: &DigitalSequence) -> i32 {
    let m = optimized.m();
    if m == 0 {
        return optimized.base();
    }
    let tbm = optimized.tbm() as i32;
    let mut prev = vec![0i32; m + 1];
    let mut best = 0i32;
    for &residue in seq.residues() {
        let mut cur = vec![0i32; m + 1];
        for k in 1..=m {
            let match_sc = optimized.sbv().get(residue as usize, k) as i32;
            let extend = prev[k - 1];
            cur[k] = extend.max(tbm) + match_sc;
            best = best.max(cur[k]);
        }
        prev = cur;
    }
    best + optimized.base()
}

/// Gumbel upper-tail P-value: `P(X >= x) = 1 - exp(-exp(-lambda*(x-mu)))`.
fn gumbel_p(score: f64, mu: f64, lambda: f64) -> f64 {
    let z = -lambda * (score - mu);
    (1.0 - (-z.exp()).exp()).clamp(0.0, 1.0)
}

/// Exponential-tail P-value used for the MSV distribution:
/// `P(X >= x) = exp(-lambda*(x - tau))` for `x >= tau`, else `1`.
fn exp_tail_p(score: f64, tau: f64, lambda: f64) -> f64 {
    if score <= tau {
        1.0
    } else {
        (-lambda * (score - tau)).exp().clamp(0.0, 1.0)
    }
}

/// Refit a two-state null model to the target's own residue composition
/// and recompute the MSV P-value under it, the Stage 2 bias correction.
fn bias_corrected_p(seq: &DigitalSequence, background: &Background, msv_nats: f64, params: &crate::metadata::EvalueParameters) -> f64 {
    let k = background.alphabet().k();
    let mut counts = vec![0.0; k];
    for &r in seq.residues() {
        if (r as usize) < k {
            counts[r as usize] += 1.0;
        }
    }
    let total: f64 = counts.iter().sum::<f64>().max(1.0);
    let mut bias = 0.0;
    for (c, &bg_f) in counts.iter().zip(background.freqs()) {
        let observed = c / total;
        if observed > 0.0 && bg_f > 0.0 {
            bias += c * (observed / bg_f).ln();
        }
    }
    let corrected = (msv_nats - bias / total.max(1.0)).max(f64::NEG_INFINITY);
    exp_tail_p(corrected, params.f_tau, params.f_lambda)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::alphabet::Alphabet;
    use crate::builder::{Builder, BuilderOptions};
    use crate::rng::Randomness;

    #[test]
    fn scenario_s1_single_reported_hit() {
        let mut rng = Randomness::new(42);
        let hmm = Hmm::sample(Alphabet::Amino, 40, &mut rng).unwrap();
        let seq = DigitalSequence::digitize(Alphabet::Amino, "sample", b"ACDEFGHIKLMNPQRSTVWYACDEFGHIKLMNPQRSTVWY").unwrap();
        let builder = Builder::new(BuilderOptions::default());
        let bg = Background::new(Alphabet::Amino, 100);
        let built_hmm = builder.build(&seq, &bg).unwrap();

        let mut pipeline = Pipeline::new(Alphabet::Amino, PipelineConfig::default());
        let targets: DigitalSequenceBlock = [seq].into_iter().collect();
        let top = pipeline.search_hmm(Query::Hmm(&built_hmm), &targets).unwrap();
        assert!(top.len() <= 1);
    }

    #[test]
    fn scenario_s2_identical_sequences_equal_score() {
        let builder = Builder::new(BuilderOptions::default());
        let bg = Background::new(Alphabet::Dna, 100);
        let seed = DigitalSequence::digitize(Alphabet::Dna, "seed", b"ACGTACGTACGTACGTACGT").unwrap();
        let built = builder.build(&seed, &bg).unwrap();

        let seq_a = DigitalSequence::digitize(Alphabet::Dna, "a", b"ACGTACGTACGTACGTACGT").unwrap();
        let seq_b = DigitalSequence::digitize(Alphabet::Dna, "b", b"ACGTACGTACGTACGTACGT").unwrap();
        let targets: DigitalSequenceBlock = [seq_a, seq_b].into_iter().collect();

        let mut pipeline = Pipeline::new(Alphabet::Dna, PipelineConfig::default());
        let mut top = pipeline.search_hmm(Query::Hmm(&built), &targets).unwrap();
        top.sort(crate::tophits::SortBy::Seqidx);
        let seqidxs: Vec<_> = top.iter().map(|h| h.seqidx).collect();
        assert!(seqidxs.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn scenario_s4_missing_cutoffs_errors() {
        let seed = DigitalSequence::digitize(Alphabet::Amino, "seed", b"ACDEFGHIKLMNPQRSTVWY").unwrap();
        let bg = Background::new(Alphabet::Amino, 100);
        let builder = Builder::new(BuilderOptions::default());
        let hmm = builder.build(&seed, &bg).unwrap();
        assert!(hmm.cutoffs().gathering.is_none());

        let mut pipeline = Pipeline::new(
            Alphabet::Amino,
            PipelineConfig {
                bit_cutoffs: Some(BitCutoffSelector::Gathering),
                ..Default::default()
            },
        );
        let seq = DigitalSequence::digitize(Alphabet::Amino, "t", b"ACDEFGHIKL").unwrap();
        let targets: DigitalSequenceBlock = [seq].into_iter().collect();
        let err = pipeline.search_hmm(Query::Hmm(&hmm), &targets).unwrap_err();
        assert!(matches!(err, PHmmError::MissingCutoffs { .. }));
    }
}
