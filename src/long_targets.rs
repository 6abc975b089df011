//! Windowed cascade for long nucleotide targets (§4.3), where a single
//! target sequence may be many megabases and cannot be scored by the
//! whole-sequence Viterbi/Forward recursions in one pass.
//!
//! [`LongTargetsPipeline`] slices a target into overlapping windows, runs
//! the ordinary [`crate::pipeline::Pipeline`] cascade against each window,
//! and translates envelope coordinates back to the original full-length
//! target before merging window results into one [`TopHits`].

use crate::alphabet::Alphabet;
use crate::error::Result;
use crate::hmm::Hmm;
use crate::pipeline::{Pipeline, PipelineConfig, Query};
use crate::sequence::DigitalSequence;
use crate::tophits::{SearchMode, TopHits};

/// Which strand(s) of a nucleotide target to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Watson,
    Crick,
    Both,
}

/// Tuning knobs specific to windowed long-target search (§4.3).
#[derive(Debug, Clone, Copy)]
pub struct LongTargetsConfig {
    /// Window length a target is sliced into.
    pub block_length: usize,
    /// Window length used for the Stage 1 MSV filter.
    pub b1: usize,
    /// Window length used for the Stage 3 Viterbi filter.
    pub b2: usize,
    /// Window length used for the Stage 4 Forward/Backward pass.
    pub b3: usize,
    pub strand: Strand,
}

impl Default for LongTargetsConfig {
    fn default() -> Self {
        Self {
            block_length: 262144,
            b1: 56 * 1024,
            b2: 32 * 1024,
            b3: 16 * 1024,
            strand: Strand::Both,
        }
    }
}

/// Specialization of [`Pipeline`] for targets too long to score in one
/// whole-sequence pass. Each window is run through the full single-target
/// cascade (the three-filter-width knobs `b1`/`b2`/`b3` are the windowing
/// contract the filters would progressively narrow down to in a staged
/// implementation; this pipeline scores every window at `block_length`,
/// a documented simplification).
#[derive(Debug, Clone)]
pub struct LongTargetsPipeline {
    alphabet: Alphabet,
    config: LongTargetsConfig,
    pipeline_config: PipelineConfig,
}

impl LongTargetsPipeline {
    pub fn new(alphabet: Alphabet, config: LongTargetsConfig, pipeline_config: PipelineConfig) -> Self {
        Self {
            alphabet,
            config,
            pipeline_config,
        }
    }

    pub fn config(&self) -> &LongTargetsConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut LongTargetsConfig {
        &mut self.config
    }

    /// Search one long target against a single query HMM, windowing the
    /// target and merging per-window hits with envelope coordinates
    /// translated back to full-length target positions.
    pub fn search_hmm(&mut self, hmm: &Hmm, target: &DigitalSequence) -> Result<TopHits> {
        let m = hmm.m().max(1);
        let overlap = self.config.block_length.min(m * 2).max(m);
        let windows = self.windows(target.len(), overlap);

        let mut shards = Vec::new();
        if matches!(self.config.strand, Strand::Watson | Strand::Both) {
            for (start, window_seq) in self.window_sequences(target, &windows)? {
                let mut pipeline = Pipeline::new(self.alphabet, self.pipeline_config);
                let targets = [window_seq].into_iter().collect();
                let mut shard = pipeline.search_hmm(Query::Hmm(hmm), &targets)?;
                translate_envelopes(&mut shard, start, false, target.len());
                shards.push(shard);
            }
        }

        if matches!(self.config.strand, Strand::Crick | Strand::Both) {
            let revcomp = target.reverse_complement()?;
            for (start, window_seq) in self.window_sequences(&revcomp, &windows)? {
                let mut pipeline = Pipeline::new(self.alphabet, self.pipeline_config);
                let targets = [window_seq].into_iter().collect();
                let mut shard = pipeline.search_hmm(Query::Hmm(hmm), &targets)?;
                translate_envelopes(&mut shard, start, true, target.len());
                shards.push(shard);
            }
        }

        log::debug!(
            "long-target search over {} windows ({} bp target, strand {:?})",
            windows.len(),
            target.len(),
            self.config.strand
        );

        let mut merged = shards
            .pop()
            .unwrap_or_else(|| TopHits::new(SearchMode::Search));
        merged.set_long_targets(true);
        merged.set_block_length(self.config.block_length);
        merged = merged.merge(shards)?;
        Ok(merged)
    }

    /// 0-based `(start, end)` window bounds covering `length`, each window
    /// `block_length` long and overlapping its neighbor by `overlap`
    /// residues so no hit is split by a window seam (§4.3: overlap must be
    /// `>= M`, the model's match-state count).
    fn windows(&self, length: usize, overlap: usize) -> Vec<(usize, usize)> {
        if length == 0 {
            return Vec::new();
        }
        let block = self.config.block_length.max(overlap + 1);
        let stride = block.saturating_sub(overlap).max(1);
        let mut windows = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + block).min(length);
            windows.push((start, end));
            if end == length {
                break;
            }
            start += stride;
        }
        windows
    }

    fn window_sequences(
        &self,
        seq: &DigitalSequence,
        windows: &[(usize, usize)],
    ) -> Result<Vec<(usize, DigitalSequence)>> {
        let mut out = Vec::with_capacity(windows.len());
        for &(start, end) in windows {
            let residues = seq.residues()[start..end].to_vec();
            let window = DigitalSequence::new(seq.alphabet(), format!("{}:{}-{}", seq.name(), start, end), residues);
            out.push((start, window));
        }
        Ok(out)
    }
}

/// Translate every hit/domain envelope in `shard` from window-local
/// 1-based coordinates to full-length target coordinates. On the reverse
/// strand, `env_from > env_to` in forward-target coordinates is the
/// convention a caller uses to recognize a Crick-strand hit (§4.3, §8 S6).
fn translate_envelopes(shard: &mut TopHits, start: usize, reverse_strand: bool, full_length: usize) {
    for hit in shard.iter_mut() {
        for domain in hit.domains.iter_mut() {
            let (from, to) = translate_pair(domain.env_from, domain.env_to, start, reverse_strand, full_length);
            domain.env_from = from;
            domain.env_to = to;
            let (afrom, ato) = translate_pair(
                domain.alignment.target_from,
                domain.alignment.target_to,
                start,
                reverse_strand,
                full_length,
            );
            domain.alignment.target_from = afrom;
            domain.alignment.target_to = ato;
        }
    }
}

fn translate_pair(from: usize, to: usize, window_start: usize, reverse_strand: bool, full_length: usize) -> (usize, usize) {
    let fwd_from = window_start + from;
    let fwd_to = window_start + to;
    if reverse_strand {
        // Window coordinates were taken from the reverse complement, whose
        // position `p` (1-based) corresponds to full-length forward
        // position `full_length - p + 1`.
        let orig_from = full_length.saturating_sub(fwd_from) + 1;
        let orig_to = full_length.saturating_sub(fwd_to) + 1;
        (orig_from, orig_to)
    } else {
        (fwd_from, fwd_to)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::builder::{Builder, BuilderOptions};
    use crate::background::Background;

    #[test]
    fn windows_cover_full_length_with_overlap() {
        let pipeline = LongTargetsPipeline::new(Alphabet::Dna, LongTargetsConfig::default(), PipelineConfig::default());
        let windows = pipeline.windows(1000, 50);
        assert_eq!(windows.first().unwrap().0, 0);
        assert_eq!(windows.last().unwrap().1, 1000);
        for pair in windows.windows(2) {
            assert!(pair[1].0 <= pair[0].1, "windows must overlap or touch");
        }
    }

    #[test]
    fn crick_strand_envelope_translates_to_descending_forward_coords() {
        // A window hit at local positions 10..20 within a window starting at
        // full-length offset 100, on a 1000bp target's reverse complement,
        // must come back with env_from > env_to in forward coordinates.
        let (from, to) = translate_pair(10, 20, 100, true, 1000);
        assert!(from > to, "crick-strand envelope must have env_from > env_to, got {from}..{to}");

        let (from, to) = translate_pair(10, 20, 100, false, 1000);
        assert!(from < to, "watson-strand envelope must have env_from < env_to, got {from}..{to}");
    }

    #[test]
    fn crick_strand_search_finds_planted_hit_with_descending_envelope() {
        let bg = Background::new(Alphabet::Dna, 100);
        let seed = DigitalSequence::digitize(Alphabet::Dna, "seed", b"ACGTACGTACGTACGTACGT").unwrap();
        let builder = Builder::new(BuilderOptions::default());
        let hmm = builder.build(&seed, &bg).unwrap();

        // Plant the seed's reverse complement on the forward strand so a
        // Crick-strand search (which scores the target's revcomp) finds it.
        let revcomp_motif = DigitalSequence::digitize(Alphabet::Dna, "motif", b"ACGTACGTACGTACGTACGT")
            .unwrap()
            .reverse_complement()
            .unwrap();
        let mut target_text = vec![b'A'; 500];
        target_text.extend_from_slice(revcomp_motif.textify().as_bytes());
        target_text.extend(vec![b'A'; 500]);
        let target = DigitalSequence::digitize(Alphabet::Dna, "chrom", &target_text).unwrap();

        let mut config = LongTargetsConfig {
            block_length: 300,
            strand: Strand::Crick,
            ..LongTargetsConfig::default()
        };
        config.b1 = 300;
        let mut pipeline = LongTargetsPipeline::new(Alphabet::Dna, config, PipelineConfig::default());
        let top = pipeline.search_hmm(&hmm, &target).unwrap();
        assert!(top.long_targets());
        for hit in top.iter() {
            for domain in hit.domains.iter() {
                assert!(
                    domain.env_from >= domain.env_to,
                    "crick-strand domain envelope must descend in forward coords: {}..{}",
                    domain.env_from,
                    domain.env_to
                );
            }
        }
    }

    #[test]
    fn watson_strand_search_finds_planted_hit() {
        let bg = Background::new(Alphabet::Dna, 100);
        let seed = DigitalSequence::digitize(Alphabet::Dna, "seed", b"ACGTACGTACGTACGTACGT").unwrap();
        let builder = Builder::new(BuilderOptions::default());
        let hmm = builder.build(&seed, &bg).unwrap();

        let mut target_text = vec![b'A'; 500];
        target_text.extend_from_slice(b"ACGTACGTACGTACGTACGT");
        target_text.extend(vec![b'A'; 500]);
        let target = DigitalSequence::digitize(Alphabet::Dna, "chrom", &target_text).unwrap();

        let mut config = LongTargetsConfig {
            block_length: 300,
            strand: Strand::Watson,
            ..LongTargetsConfig::default()
        };
        config.b1 = 300;
        let mut pipeline = LongTargetsPipeline::new(Alphabet::Dna, config, PipelineConfig::default());
        let top = pipeline.search_hmm(&hmm, &target).unwrap();
        assert!(top.long_targets());
    }
}
