//! Append-only accumulator of [`Hit`]s during a search, post-processable
//! into a sorted, thresholded result set.

use std::collections::HashSet;
use std::io::Write;

use crate::alignment::Hit;
use crate::error::{PHmmError, Result};
use crate::metadata::{BitCutoffSelector, Cutoffs};
use crate::sequence::DigitalMsa;
use crate::trace::{State, Trace, Traces};

/// Which search mode produced a [`TopHits`]: one query against many
/// targets, or one target against many models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Search,
    Scan,
}

/// The two supported sort orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    /// E-value ascending, `(name, seqidx)` tie-break (§9 Open Question c).
    Key,
    /// Original target iteration order.
    Seqidx,
}

/// Score/E-value thresholds controlling which hits and domains are flagged
/// reported/included.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub e: f64,
    pub t: Option<f64>,
    pub dome: f64,
    pub domt: Option<f64>,
    pub ince: f64,
    pub inct: Option<f64>,
    pub incdome: f64,
    pub incdomt: Option<f64>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            e: 10.0,
            t: None,
            dome: 10.0,
            domt: None,
            ince: 0.01,
            inct: None,
            incdome: 0.01,
            incdomt: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchedCounts {
    pub models: u64,
    pub nodes: u64,
    pub sequences: u64,
    pub residues: u64,
}

/// Append-only accumulator during a search, post-processable into a sorted,
/// thresholded result set.
#[derive(Debug, Clone)]
pub struct TopHits {
    query_name: Option<String>,
    query_accession: Option<String>,
    hits: Vec<Hit>,
    z: f64,
    domz: f64,
    thresholds: Thresholds,
    bit_cutoffs: Option<BitCutoffSelector>,
    model_cutoffs: Option<Cutoffs>,
    searched: SearchedCounts,
    mode: SearchMode,
    long_targets: bool,
    block_length: Option<usize>,
    sorted_by: Option<SortBy>,
}

impl Default for TopHits {
    fn default() -> Self {
        Self::new(SearchMode::Search)
    }
}

impl TopHits {
    pub fn new(mode: SearchMode) -> Self {
        Self {
            query_name: None,
            query_accession: None,
            hits: Vec::new(),
            z: 0.0,
            domz: 0.0,
            thresholds: Thresholds::default(),
            bit_cutoffs: None,
            model_cutoffs: None,
            searched: SearchedCounts::default(),
            mode,
            long_targets: false,
            block_length: None,
            sorted_by: None,
        }
    }

    pub fn set_query(&mut self, name: impl Into<String>, accession: Option<String>) {
        self.query_name = Some(name.into());
        self.query_accession = accession;
    }

    pub fn query_name(&self) -> Option<&str> {
        self.query_name.as_deref()
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    pub fn set_long_targets(&mut self, long_targets: bool) {
        self.long_targets = long_targets;
    }

    pub fn long_targets(&self) -> bool {
        self.long_targets
    }

    pub fn set_block_length(&mut self, block_length: usize) {
        self.block_length = Some(block_length);
    }

    pub fn z(&self) -> f64 {
        self.z
    }

    pub fn dom_z(&self) -> f64 {
        self.domz
    }

    /// Set `Z`/`domZ` explicitly; callers overriding search-space size must
    /// do this before thresholding for the override to take effect.
    pub fn set_z(&mut self, z: f64, domz: f64) {
        self.z = z;
        self.domz = domz;
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn set_thresholds(&mut self, thresholds: Thresholds) {
        self.thresholds = thresholds;
    }

    pub fn set_bit_cutoffs(&mut self, selector: Option<BitCutoffSelector>) {
        self.bit_cutoffs = selector;
    }

    /// The querying model's own curated cutoffs, consulted when
    /// `bit_cutoffs` is set in place of the `E`/`T` thresholds.
    pub fn set_model_cutoffs(&mut self, cutoffs: Option<Cutoffs>) {
        self.model_cutoffs = cutoffs;
    }

    pub fn searched(&self) -> SearchedCounts {
        self.searched
    }

    pub fn searched_mut(&mut self) -> &mut SearchedCounts {
        &mut self.searched
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hit> {
        self.hits.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Hit> {
        self.hits.iter_mut()
    }

    pub fn get(&self, i: usize) -> &Hit {
        &self.hits[i]
    }

    /// Append fully-formed hits for one target. Atomic with respect to a
    /// single target: either all of a target's hits are appended or none
    /// are (callers build the `Vec` before calling this).
    pub fn append(&mut self, hits: impl IntoIterator<Item = Hit>) {
        self.hits.extend(hits);
        self.sorted_by = None;
    }

    pub fn reported(&self) -> impl Iterator<Item = &Hit> {
        self.hits.iter().filter(|h| h.reported)
    }

    pub fn included(&self) -> impl Iterator<Item = &Hit> {
        self.hits.iter().filter(|h| h.included)
    }

    pub fn is_sorted(&self, by: SortBy) -> bool {
        self.sorted_by == Some(by)
    }

    /// Stable sort by the chosen key. Two invocations on the same inputs
    /// produce byte-identical ordering (§8 Invariant 5): `sort_by` is
    /// documented stable and the key itself is fully deterministic
    /// (`(E, name, seqidx)` or raw `seqidx`).
    pub fn sort(&mut self, by: SortBy) {
        match by {
            SortBy::Key => self.hits.sort_by(|a, b| a.sort_key().cmp(&b.sort_key())),
            SortBy::Seqidx => self.hits.sort_by_key(|h| h.seqidx),
        }
        self.sorted_by = Some(by);
    }

    /// Combine multiple shards (e.g. from parallel worker threads) into one.
    /// Recomputes E-values against the summed `Z`/`domZ` and re-applies
    /// thresholds; not commutative with sort, so callers must merge before
    /// sorting (§4.4).
    pub fn merge(mut self, others: impl IntoIterator<Item = TopHits>) -> Result<Self> {
        let mut total_z = self.z;
        let mut total_domz = self.domz;
        let mode = self.mode;
        for other in others {
            if other.mode != mode {
                return Err(PHmmError::InvalidParameter {
                    name: "mode",
                    reason: "cannot merge a search-mode and scan-mode TopHits".into(),
                });
            }
            total_z += other.z;
            total_domz += other.domz;
            self.hits.extend(other.hits);
            self.searched.models += other.searched.models;
            self.searched.nodes += other.searched.nodes;
            self.searched.sequences += other.searched.sequences;
            self.searched.residues += other.searched.residues;
        }
        self.z = total_z;
        self.domz = total_domz;
        for hit in self.hits.iter_mut() {
            hit.evalue = hit.pvalue * total_z;
            for domain in hit.domains.iter_mut() {
                domain.i_evalue = domain.pvalue * total_domz;
            }
        }
        self.sorted_by = None;
        self.apply_thresholds()?;
        Ok(self)
    }

    /// Recompute `reported`/`included` flags in place against the current
    /// `Z`/`domZ` and thresholds (or bit cutoffs, if selected). Collection
    /// length is unchanged.
    pub fn apply_thresholds(&mut self) -> Result<()> {
        let bit_cutoffs = self.bit_cutoffs;
        let thresholds = self.thresholds;
        let selected_pair = match bit_cutoffs {
            Some(selector) => {
                let cutoffs = self.model_cutoffs.ok_or(PHmmError::MissingCutoffs {
                    selector: selector_name(selector),
                })?;
                Some(cutoffs.select(selector)?)
            }
            None => None,
        };
        for hit in self.hits.iter_mut() {
            let (reported, included) = if let Some(pair) = selected_pair {
                let r = hit.score >= pair.score1;
                (r, r)
            } else {
                let reported = match thresholds.t {
                    Some(t) => hit.score >= t,
                    None => hit.evalue <= thresholds.e,
                };
                let included = match thresholds.inct {
                    Some(t) => hit.score >= t,
                    None => hit.evalue <= thresholds.ince,
                };
                (reported, included)
            };
            hit.reported = reported;
            hit.included = included && reported;

            for domain in hit.domains.iter_mut() {
                let dom_reported = match thresholds.domt {
                    Some(t) => domain.score >= t,
                    None => domain.i_evalue <= thresholds.dome,
                };
                let dom_included = match thresholds.incdomt {
                    Some(t) => domain.score >= t,
                    None => domain.i_evalue <= thresholds.incdome,
                };
                domain.reported = dom_reported && hit.reported;
                domain.included = dom_included && hit.included && domain.reported;
            }
        }
        Ok(())
    }

    /// Count of currently-included hits whose name is absent from `keyhash`.
    /// Used by [`crate::iterative_search::IterativeSearch`] for convergence
    /// detection.
    pub fn compare_ranking(&self, keyhash: &HashSet<String>) -> usize {
        self.included().filter(|h| !keyhash.contains(&h.name)).count()
    }

    /// The set of currently-included hit names, the `ranking` snapshot
    /// `IterativeSearch` compares subsequent rounds against.
    pub fn included_names(&self) -> HashSet<String> {
        self.included().map(|h| h.name.clone()).collect()
    }

    /// Reconstruct an MSA of included hits by walking each included
    /// domain's trace. `trim` drops flanking non-match columns,
    /// `all_consensus_cols` forces every model match column to appear even
    /// where no included hit has a residue there.
    pub fn to_msa(&self, traces: &Traces, trim: bool, all_consensus_cols: bool) -> Result<DigitalMsa> {
        let included: Vec<&Hit> = self.included().collect();
        if included.is_empty() {
            return Err(PHmmError::InvalidParameter {
                name: "included",
                reason: "no included hits to build an MSA from".into(),
            });
        }
        let m = traces.iter().map(Trace::m).max().unwrap_or(0);
        let mut rows = Vec::with_capacity(included.len());
        let mut names = Vec::with_capacity(included.len());
        for (i, hit) in included.iter().enumerate() {
            let trace = traces.get(i);
            let mut row = vec![None; m];
            for step in trace.steps() {
                if step.state == State::Match && step.node >= 1 && step.node <= m {
                    row[step.node - 1] = Some(0u8);
                }
            }
            rows.push(row);
            names.push(hit.name.clone());
        }
        let keep: Vec<usize> = if all_consensus_cols || !trim {
            (0..m).collect()
        } else {
            (0..m).filter(|&c| rows.iter().any(|r| r[c].is_some())).collect()
        };
        let rows = rows
            .into_iter()
            .map(|row| keep.iter().map(|&c| row[c]).collect())
            .collect();
        Ok(DigitalMsa {
            alphabet: crate::alphabet::Alphabet::Amino,
            rows,
            names,
            reference_annotation: None,
            weights: None,
        })
    }

    /// Write a human-readable table. `format` selects one of the three
    /// layouts named in §4.4.
    pub fn write<W: Write>(&self, mut out: W, format: WriteFormat, header: bool) -> std::io::Result<()> {
        match format {
            WriteFormat::Targets => {
                if header {
                    writeln!(out, "# target name        accession  E-value  score  bias")?;
                }
                for hit in self.reported() {
                    writeln!(
                        out,
                        "{:<20} {:<10} {:.2e} {:6.1} {:5.1}",
                        hit.name,
                        hit.accession.as_deref().unwrap_or("-"),
                        hit.evalue,
                        hit.score,
                        hit.bias
                    )?;
                }
            }
            WriteFormat::Domain => {
                if header {
                    writeln!(out, "# target name        domain  score  c-Evalue  i-Evalue")?;
                }
                for hit in self.reported() {
                    for (i, domain) in hit.domains.reported().iter().enumerate() {
                        writeln!(
                            out,
                            "{:<20} {:>3}/{:<3} {:6.1} {:.2e} {:.2e}",
                            hit.name,
                            i + 1,
                            hit.domains.reported().len(),
                            domain.score,
                            domain.c_evalue,
                            domain.i_evalue
                        )?;
                    }
                }
            }
            WriteFormat::Pfam => {
                for hit in self.reported() {
                    for domain in hit.domains.reported().iter() {
                        writeln!(
                            out,
                            "{}\t{}\t{}\t{:.2e}",
                            hit.name, domain.env_from, domain.env_to, domain.i_evalue
                        )?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn selector_name(selector: BitCutoffSelector) -> &'static str {
    match selector {
        BitCutoffSelector::Gathering => "gathering",
        BitCutoffSelector::Trusted => "trusted",
        BitCutoffSelector::Noise => "noise",
    }
}

/// Output table layout selector for [`TopHits::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFormat {
    Targets,
    Domain,
    Pfam,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::alignment::{Alignment, Domains};

    fn hit(name: &str, evalue: f64, score: f64, seqidx: usize) -> Hit {
        Hit {
            name: name.to_string(),
            accession: None,
            description: None,
            score,
            pre_score: score,
            sum_score: score,
            bias: 0.0,
            evalue,
            pvalue: evalue / 100.0,
            best_domain: 0,
            domains: Domains::new(vec![crate::alignment::Domain {
                env_from: 1,
                env_to: 10,
                score,
                bias: 0.0,
                envelope_score: score,
                c_evalue: evalue,
                i_evalue: evalue,
                pvalue: evalue / 100.0,
                included: false,
                reported: false,
                alignment: Alignment {
                    hmm_from: 1,
                    hmm_to: 10,
                    target_from: 1,
                    target_to: 10,
                    hmm_consensus: "ACGTACGTAC".into(),
                    target_seq: "ACGTACGTAC".into(),
                    midline: "||||||||||".into(),
                },
            }]),
            included: false,
            reported: false,
            new: false,
            dropped: false,
            duplicate: false,
            seqidx,
        }
    }

    #[test]
    fn sort_key_is_stable_and_repeatable() {
        let mut th = TopHits::new(SearchMode::Search);
        th.append([hit("b", 1e-5, 20.0, 1), hit("a", 1e-5, 20.0, 0), hit("c", 1e-9, 30.0, 2)]);
        th.sort(SortBy::Key);
        let names: Vec<_> = th.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);

        let mut th2 = TopHits::new(SearchMode::Search);
        th2.append([hit("b", 1e-5, 20.0, 1), hit("a", 1e-5, 20.0, 0), hit("c", 1e-9, 30.0, 2)]);
        th2.sort(SortBy::Key);
        let names2: Vec<_> = th2.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, names2);
    }

    #[test]
    fn seqidx_sort_restores_input_order() {
        let mut th = TopHits::new(SearchMode::Search);
        th.append([hit("b", 1e-2, 5.0, 1), hit("a", 1e-9, 30.0, 0)]);
        th.sort(SortBy::Seqidx);
        let idxs: Vec<_> = th.iter().map(|h| h.seqidx).collect();
        assert_eq!(idxs, vec![0, 1]);
    }

    #[test]
    fn merge_identity_up_to_rethreshold() {
        let mut a = TopHits::new(SearchMode::Search);
        a.set_z(1.0, 1.0);
        a.append([hit("x", 1e-9, 40.0, 0)]);
        a.apply_thresholds().unwrap();

        let empty = TopHits::new(SearchMode::Search);
        let merged = a.clone().merge([empty]).unwrap();
        assert_eq!(merged.len(), a.len());
        assert_eq!(merged.get(0).name, a.get(0).name);
    }

    #[test]
    fn apply_thresholds_sets_flags_without_changing_length() {
        let mut th = TopHits::new(SearchMode::Search);
        th.set_z(1.0, 1.0);
        th.append([hit("good", 1e-9, 40.0, 0), hit("bad", 50.0, 1.0, 1)]);
        let before = th.len();
        th.apply_thresholds().unwrap();
        assert_eq!(th.len(), before);
        assert!(th.get(0).reported);
        assert!(!th.get(1).reported);
    }

    #[test]
    fn compare_ranking_counts_new_hits() {
        let mut th = TopHits::new(SearchMode::Search);
        th.set_z(1.0, 1.0);
        th.append([hit("known", 1e-9, 40.0, 0), hit("novel", 1e-9, 35.0, 1)]);
        th.apply_thresholds().unwrap();
        let mut seen = HashSet::new();
        seen.insert("known".to_string());
        assert_eq!(th.compare_ranking(&seen), 1);
    }
}
