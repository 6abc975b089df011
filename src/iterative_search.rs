//! jackhmmer-style iterative profile refinement (§4.5): alternates search
//! and model rebuilding until the set of included hits stops changing.

use std::collections::HashSet;

use crate::background::Background;
use crate::builder::Builder;
use crate::error::Result;
use crate::hmm::Hmm;
use crate::pipeline::{Pipeline, Query};
use crate::sequence::{DigitalMsa, DigitalSequence, DigitalSequenceBlock};
use crate::tophits::TopHits;
use crate::trace_aligner::{AlignedMsa, TraceAligner};

/// One round's output: the model searched with this round, the resulting
/// hits, the re-alignment of included hits (`None` on the final, converged
/// round, where no rebuild is needed), whether the ranking has stabilized,
/// and the 1-based round number.
#[derive(Debug, Clone)]
pub struct IterationResult {
    pub hmm: Hmm,
    pub hits: TopHits,
    pub msa: Option<DigitalMsa>,
    pub converged: bool,
    pub iteration: usize,
}

type SelectHits = dyn FnMut(&TopHits) -> HashSet<String>;

/// Drives the search-then-rebuild loop. Implements [`Iterator`], yielding
/// one [`IterationResult`] per round; iteration ends the call after
/// `converged` is first reported.
pub struct IterativeSearch {
    pipeline: Pipeline,
    builder: Builder,
    targets: DigitalSequenceBlock,
    hmm: Hmm,
    ranking: HashSet<String>,
    iteration: usize,
    done: bool,
    select_hits: Option<Box<SelectHits>>,
}

impl IterativeSearch {
    pub fn new(pipeline: Pipeline, hmm: Hmm, targets: DigitalSequenceBlock, builder: Builder) -> Result<Self> {
        Ok(Self {
            pipeline,
            builder,
            targets,
            hmm,
            ranking: HashSet::new(),
            iteration: 0,
            done: false,
            select_hits: None,
        })
    }

    /// Install a callback that narrows a round's included hits down to the
    /// names that should survive into the next round's re-alignment.
    pub fn with_select_hits(mut self, select_hits: impl FnMut(&TopHits) -> HashSet<String> + 'static) -> Self {
        self.select_hits = Some(Box::new(select_hits));
        self
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn converged(&self) -> bool {
        self.done
    }

    fn rebuild_msa(&self, hmm: &Hmm, hits: &TopHits) -> Result<Option<DigitalMsa>> {
        let included_seqidx: Vec<usize> = hits.included().map(|h| h.seqidx).collect();
        if included_seqidx.is_empty() {
            return Ok(None);
        }
        let sequences: Vec<DigitalSequence> = included_seqidx.iter().map(|&i| self.targets.get(i).clone()).collect();
        let aligner = TraceAligner::new();
        let traces = aligner.compute_traces(hmm, &sequences)?;
        let aligned = aligner.align_traces(hmm, &sequences, &traces, true, true, false)?;
        match aligned {
            AlignedMsa::Digital(msa) => Ok(Some(msa)),
            AlignedMsa::Text(_) => unreachable!("digitize=true always yields a DigitalMsa"),
        }
    }

    fn step(&mut self) -> Result<IterationResult> {
        let hmm_used = self.hmm.clone();
        let mut hits = self.pipeline.search_hmm(Query::Hmm(&hmm_used), &self.targets)?;

        if let Some(select) = self.select_hits.as_mut() {
            let allowed = select(&hits);
            for hit in hits.iter_mut() {
                if hit.included && !allowed.contains(&hit.name) {
                    hit.included = false;
                }
            }
        }

        let included_names = hits.included_names();
        let converged = hits.compare_ranking(&self.ranking) == 0 && included_names.len() == self.ranking.len();
        self.ranking = included_names;
        self.iteration += 1;
        let iteration = self.iteration;

        let msa = if converged {
            None
        } else {
            let msa = self.rebuild_msa(&hmm_used, &hits)?;
            if let Some(msa) = &msa {
                self.hmm = self.builder.build_msa(msa, &Background::new(hmm_used.alphabet(), 1))?;
            }
            msa
        };

        if converged {
            self.done = true;
        }

        Ok(IterationResult {
            hmm: hmm_used,
            hits,
            msa,
            converged,
            iteration,
        })
    }
}

impl Iterator for IterativeSearch {
    type Item = Result<IterationResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        Some(self.step())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::alphabet::Alphabet;
    use crate::builder::BuilderOptions;
    use crate::pipeline::PipelineConfig;

    #[test]
    fn scenario_s5_converges_against_self_in_few_rounds() {
        let seed = DigitalSequence::digitize(
            Alphabet::Amino,
            "query",
            b"ACDEFGHIKLMNPQRSTVWYACDEFGHIKLMNPQRSTVWY",
        )
        .unwrap();
        let targets: DigitalSequenceBlock = [seed.clone()].into_iter().collect();

        let pipeline = Pipeline::new(Alphabet::Amino, PipelineConfig::default());
        let builder = Builder::new(BuilderOptions::default());
        let search = pipeline.iterate_seq(&seed, targets, builder).unwrap();

        let mut last_converged = false;
        let mut rounds = 0;
        for result in search.take(4) {
            let result = result.unwrap();
            rounds += 1;
            last_converged = result.converged;
            assert_eq!(result.iteration, rounds);
            if result.converged {
                break;
            }
        }
        assert!(rounds <= 3, "expected convergence within a few rounds, took {rounds}");
        assert!(last_converged);
    }

    #[test]
    fn first_round_reports_iteration_one() {
        let seed = DigitalSequence::digitize(Alphabet::Dna, "query", b"ACGTACGTACGT").unwrap();
        let unrelated = DigitalSequence::digitize(Alphabet::Dna, "other", b"TTTTTTTTTTTT").unwrap();
        let targets: DigitalSequenceBlock = [unrelated].into_iter().collect();

        let pipeline = Pipeline::new(Alphabet::Dna, PipelineConfig::default());
        let builder = Builder::new(BuilderOptions::default());
        let mut search = pipeline.iterate_seq(&seed, targets, builder).unwrap();

        let first = search.next().unwrap().unwrap();
        assert_eq!(first.iteration, 1);
    }
}
