//! Viterbi-alignment of sequences to a fixed HMM, independent of any
//! search threshold (§4.6): the `hmmalign`-equivalent entry point.

use crate::alphabet::Alphabet;
use crate::background::Background;
use crate::error::Result;
use crate::hmm::Hmm;
use crate::pipeline::dp;
use crate::profile::Profile;
use crate::sequence::{DigitalMsa, DigitalSequence, TextMsa};
use crate::trace::{State, Trace, Traces};

/// Aligns sequences to a fixed model by Viterbi traceback, with no
/// acceptance threshold: every input sequence yields a trace.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceAligner;

impl TraceAligner {
    pub fn new() -> Self {
        Self
    }

    /// Viterbi-align each sequence to `hmm`, one Profile reconfiguration
    /// per distinct target length.
    pub fn compute_traces(&self, hmm: &Hmm, sequences: &[DigitalSequence]) -> Result<Traces> {
        let background = Background::new(hmm.alphabet(), 1);
        let mut profile: Option<Profile> = None;
        let mut traces = Vec::with_capacity(sequences.len());
        for seq in sequences {
            hmm.alphabet().check_match(seq.alphabet())?;
            let length = seq.len().max(1);
            match &mut profile {
                Some(p) if p.length() == length => {}
                Some(p) => p.reconfigure_length(length)?,
                None => profile = Some(Profile::configure(hmm, &background, length, true, true)?),
            }
            let p = profile.as_ref().unwrap();
            let result = dp::viterbi(p, seq);
            traces.push(result.trace);
        }
        Ok(Traces::new(traces))
    }

    /// Stack traces into an MSA. Insert-state runs are expanded into their
    /// own columns (the union of insert-run lengths at each node across all
    /// sequences), so no sequence's insertions are truncated.
    pub fn align_traces(
        &self,
        hmm: &Hmm,
        sequences: &[DigitalSequence],
        traces: &Traces,
        digitize: bool,
        trim: bool,
        all_consensus_cols: bool,
    ) -> Result<AlignedMsa> {
        if traces.len() != sequences.len() {
            return Err(crate::error::PHmmError::InvalidParameter {
                name: "traces",
                reason: "one trace is required per sequence".into(),
            });
        }
        let m = hmm.m();

        let mut insert_runs = vec![0usize; m + 1];
        for trace in traces.iter() {
            let mut run_node = 0usize;
            let mut run_len = 0usize;
            for step in trace.steps() {
                match step.state {
                    State::Insert => {
                        run_node = step.node;
                        run_len += 1;
                    }
                    _ => {
                        if run_len > 0 {
                            insert_runs[run_node] = insert_runs[run_node].max(run_len);
                        }
                        run_len = 0;
                    }
                }
            }
            if run_len > 0 {
                insert_runs[run_node] = insert_runs[run_node].max(run_len);
            }
        }

        // Column layout: for each node 1..=m, one match column followed by
        // `insert_runs[node]` insert columns.
        let mut column_offsets = vec![0usize; m + 1];
        let mut total_cols = 0usize;
        for node in 1..=m {
            column_offsets[node] = total_cols;
            total_cols += 1 + insert_runs[node];
        }

        let mut rows: Vec<Vec<Option<u8>>> = Vec::with_capacity(sequences.len());
        for (trace, seq) in traces.iter().zip(sequences.iter()) {
            let mut row = vec![None; total_cols];
            let mut insert_cursor = vec![0usize; m + 1];
            for step in trace.steps() {
                match step.state {
                    State::Match if step.target_pos > 0 => {
                        row[column_offsets[step.node]] = Some(seq.residue_1b(step.target_pos));
                    }
                    State::Insert if step.target_pos > 0 => {
                        let slot = insert_cursor[step.node];
                        insert_cursor[step.node] += 1;
                        row[column_offsets[step.node] + 1 + slot] = Some(seq.residue_1b(step.target_pos));
                    }
                    _ => {}
                }
            }
            rows.push(row);
        }

        let keep: Vec<usize> = if all_consensus_cols || !trim {
            (0..total_cols).collect()
        } else {
            (0..total_cols).filter(|&c| rows.iter().any(|r| r[c].is_some())).collect()
        };
        let rows: Vec<Vec<Option<u8>>> = rows.into_iter().map(|row| keep.iter().map(|&c| row[c]).collect()).collect();
        let names: Vec<String> = sequences.iter().map(|s| s.name().to_string()).collect();

        let digital = DigitalMsa {
            alphabet: hmm.alphabet(),
            rows,
            names,
            reference_annotation: None,
            weights: None,
        };
        if digitize {
            Ok(AlignedMsa::Digital(digital))
        } else {
            Ok(AlignedMsa::Text(digital.textify()))
        }
    }
}

/// The two MSA representations `align_traces` may return, selected by its
/// `digitize` flag.
#[derive(Debug, Clone)]
pub enum AlignedMsa {
    Digital(DigitalMsa),
    Text(TextMsa),
}

impl AlignedMsa {
    pub fn alphabet(&self) -> Alphabet {
        match self {
            AlignedMsa::Digital(msa) => msa.alphabet,
            AlignedMsa::Text(msa) => msa.alphabet,
        }
    }

    pub fn nseq(&self) -> usize {
        match self {
            AlignedMsa::Digital(msa) => msa.nseq(),
            AlignedMsa::Text(msa) => msa.nseq(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rng::Randomness;

    #[test]
    fn compute_traces_yields_one_trace_per_sequence() {
        let mut rng = Randomness::new(7);
        let hmm = Hmm::sample(Alphabet::Dna, 10, &mut rng).unwrap();
        let seqs = vec![
            DigitalSequence::digitize(Alphabet::Dna, "a", b"ACGTACGTAC").unwrap(),
            DigitalSequence::digitize(Alphabet::Dna, "b", b"ACGTACGTAC").unwrap(),
        ];
        let aligner = TraceAligner::new();
        let traces = aligner.compute_traces(&hmm, &seqs).unwrap();
        assert_eq!(traces.len(), 2);
    }

    #[test]
    fn align_traces_produces_consistent_column_count() {
        let mut rng = Randomness::new(9);
        let hmm = Hmm::sample(Alphabet::Dna, 6, &mut rng).unwrap();
        let seqs = vec![
            DigitalSequence::digitize(Alphabet::Dna, "a", b"ACGTAC").unwrap(),
            DigitalSequence::digitize(Alphabet::Dna, "b", b"ACGTAC").unwrap(),
        ];
        let aligner = TraceAligner::new();
        let traces = aligner.compute_traces(&hmm, &seqs).unwrap();
        let msa = aligner.align_traces(&hmm, &seqs, &traces, true, false, true).unwrap();
        match msa {
            AlignedMsa::Digital(msa) => {
                assert_eq!(msa.nseq(), 2);
                assert_eq!(msa.rows[0].len(), msa.rows[1].len());
            }
            AlignedMsa::Text(_) => panic!("expected digital MSA"),
        }
    }
}
