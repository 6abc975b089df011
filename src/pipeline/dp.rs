//! Plan7 dynamic programming: Viterbi (max-product, with traceback) and
//! Forward/Backward (sum-product, log-space), shared by the filter cascade
//! and the trace aligner.
//!
//! Matrices are flat `Vec<f64>` of shape `(L+1) x (M+1)`, row-major by
//! target position. This isn't the memory-checkpointed scheme a
//! production implementation would use for very long targets, but it is
//! observably identical in the scores and traces it produces.

use crate::hmm::TransitionKind;
use crate::profile::Profile;
use crate::sequence::DigitalSequence;
use crate::trace::{State, Trace, TraceStep};

fn idx(i: usize, k: usize, m: usize) -> usize {
    i * (m + 1) + k
}

fn lse(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        b
    } else if b == f64::NEG_INFINITY {
        a
    } else {
        let hi = a.max(b);
        hi + ((a - hi).exp() + (b - hi).exp()).ln()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Back {
    None,
    Enter,
    FromM,
    FromI,
    FromD,
}

/// Result of a Viterbi alignment: the optimal score (nats) and its trace.
pub struct ViterbiResult {
    pub score: f64,
    pub trace: Trace,
}

/// Optimal (max-product) alignment of `seq` to `profile`, with full
/// traceback. Used by both the Stage 3 filter score and
/// [`crate::trace_aligner::TraceAligner::compute_traces`].
pub fn viterbi(profile: &Profile, seq: &DigitalSequence) -> ViterbiResult {
    let m = profile.m();
    let l = seq.len();
    let special = profile.special();
    let neg = f64::NEG_INFINITY;

    let mut mat = vec![neg; (l + 1) * (m + 1)];
    let mut ins = vec![neg; (l + 1) * (m + 1)];
    let mut del = vec![neg; (l + 1) * (m + 1)];
    let mut back_m = vec![Back::None; (l + 1) * (m + 1)];
    let mut back_i = vec![Back::None; (l + 1) * (m + 1)];

    let mut n = vec![neg; l + 1];
    let mut b = vec![neg; l + 1];
    let mut e = vec![neg; l + 1];
    let mut j = vec![neg; l + 1];
    let mut c = vec![neg; l + 1];

    n[0] = 0.0;
    b[0] = n[0] + special.n_move;

    for i in 1..=l {
        let residue = seq.residue_1b(i);
        for k in 1..=m {
            let mut best = b[i - 1] + special.entry[k];
            let mut from = Back::Enter;
            if k >= 2 {
                let prev_m = mat[idx(i - 1, k - 1, m)] + profile.transition_score(k - 1, TransitionKind::Mm);
                if prev_m > best {
                    best = prev_m;
                    from = Back::FromM;
                }
                let prev_i = ins[idx(i - 1, k - 1, m)] + profile.transition_score(k - 1, TransitionKind::Im);
                if prev_i > best {
                    best = prev_i;
                    from = Back::FromI;
                }
                let prev_d = del[idx(i - 1, k - 1, m)] + profile.transition_score(k - 1, TransitionKind::Dm);
                if prev_d > best {
                    best = prev_d;
                    from = Back::FromD;
                }
            }
            mat[idx(i, k, m)] = best + profile.match_score(k, residue);
            back_m[idx(i, k, m)] = from;

            let stay_m = mat[idx(i - 1, k, m)] + profile.transition_score(k, TransitionKind::Mi);
            let stay_i = ins[idx(i - 1, k, m)] + profile.transition_score(k, TransitionKind::Ii);
            let (ibest, ifrom) = if stay_m >= stay_i {
                (stay_m, Back::FromM)
            } else {
                (stay_i, Back::FromI)
            };
            ins[idx(i, k, m)] = ibest + profile.insert_score(k, residue);
            back_i[idx(i, k, m)] = ifrom;
        }
        for k in 2..=m {
            let from_m = mat[idx(i, k - 1, m)] + profile.transition_score(k - 1, TransitionKind::Md);
            let from_d = del[idx(i, k - 1, m)] + profile.transition_score(k - 1, TransitionKind::Dd);
            del[idx(i, k, m)] = from_m.max(from_d);
        }

        let mut e_i = neg;
        for k in 1..=m {
            e_i = e_i.max(mat[idx(i, k, m)] + special.exit[k]);
        }
        e[i] = e_i;
        j[i] = (j[i - 1] + special.j_loop).max(e[i] + special.e_to_j);
        c[i] = (c[i - 1] + special.c_loop).max(e[i] + special.e_to_c);
        n[i] = n[i - 1] + special.n_loop;
        b[i] = (n[i] + special.n_move).max(j[i] + special.j_move);
    }

    let score = c[l] + special.c_move;
    let trace = traceback(profile, seq, &mat, &del, &back_m, &back_i, &e, &j, &c, &n);
    ViterbiResult { score, trace }
}

#[allow(clippy::too_many_arguments)]
fn traceback(
    profile: &Profile,
    _seq: &DigitalSequence,
    mat: &[f64],
    del: &[f64],
    back_m: &[Back],
    back_i: &[Back],
    e: &[f64],
    j_row: &[f64],
    c: &[f64],
    _n: &[f64],
) -> Trace {
    let m = profile.m();
    let l = seq.len();
    let mut steps = Vec::new();
    steps.push(TraceStep {
        state: State::C,
        node: 0,
        target_pos: 0,
        posterior: None,
    });

    let mut i = l;
    let mut state = State::C;
    let mut node = 0usize;

    while i > 0 || state == State::B {
        match state {
            State::C => {
                if c[i] == e[i] + profile.special().e_to_c && i > 0 {
                    state = State::E;
                } else {
                    steps.push(TraceStep {
                        state: State::C,
                        node: 0,
                        target_pos: 0,
                        posterior: None,
                    });
                    i -= 1;
                }
            }
            State::E => {
                let mut best_k = 1;
                let mut best = f64::NEG_INFINITY;
                for k in 1..=m {
                    let v = mat[idx(i, k, m)] + profile.special().exit[k];
                    if v > best {
                        best = v;
                        best_k = k;
                    }
                }
                node = best_k;
                state = State::Match;
                steps.push(TraceStep {
                    state: State::E,
                    node: 0,
                    target_pos: 0,
                    posterior: None,
                });
            }
            State::Match => {
                steps.push(TraceStep {
                    state: State::Match,
                    node,
                    target_pos: i,
                    posterior: None,
                });
                let from = back_m[idx(i, node, m)];
                i -= 1;
                match from {
                    Back::Enter => {
                        state = State::B;
                    }
                    Back::FromM => {
                        node -= 1;
                        state = State::Match;
                    }
                    Back::FromI => {
                        node -= 1;
                        state = State::Insert;
                    }
                    Back::FromD => {
                        node -= 1;
                        state = State::Delete;
                    }
                    Back::None => {
                        state = State::B;
                    }
                }
            }
            State::Insert => {
                steps.push(TraceStep {
                    state: State::Insert,
                    node,
                    target_pos: i,
                    posterior: None,
                });
                let from = back_i[idx(i, node, m)];
                i -= 1;
                state = match from {
                    Back::FromI => State::Insert,
                    _ => State::Match,
                };
            }
            State::Delete => {
                steps.push(TraceStep {
                    state: State::Delete,
                    node,
                    target_pos: 0,
                    posterior: None,
                });
                if node >= 2 && del[idx(i, node, m)] == mat[idx(i, node - 1, m)] + profile.transition_score(node - 1, TransitionKind::Md) {
                    node -= 1;
                    state = State::Match;
                } else if node >= 2 {
                    node -= 1;
                    state = State::Delete;
                } else {
                    state = State::B;
                }
            }
            State::B => {
                steps.push(TraceStep {
                    state: State::B,
                    node: 0,
                    target_pos: 0,
                    posterior: None,
                });
                if j_row[i] + profile.special().j_move > f64::NEG_INFINITY && i > 0 && j_row[i] + profile.special().j_move >= profile.special().n_move {
                    state = State::J;
                } else {
                    state = State::N;
                }
            }
            State::J => {
                steps.push(TraceStep {
                    state: State::J,
                    node: 0,
                    target_pos: 0,
                    posterior: None,
                });
                state = State::E;
            }
            State::N => {
                steps.push(TraceStep {
                    state: State::N,
                    node: 0,
                    target_pos: 0,
                    posterior: None,
                });
                if i == 0 {
                    break;
                }
                i -= 1;
            }
        }
    }
    steps.reverse();
    Trace::new(m, steps)
}

/// Full Forward score (nats), the sum over all alignments rather than the
/// single best one.
pub fn forward(profile: &Profile, seq: &DigitalSequence) -> f64 {
    forward_matrices(profile, seq).0
}

/// Forward score plus, for each target position, the total posterior mass
/// in a match or insert state there (summed over nodes) — the signal
/// Stage 5 domain decomposition segments into envelopes.
pub fn forward_backward(profile: &Profile, seq: &DigitalSequence) -> (f64, Vec<f64>) {
    let (fwd_score, mat_f, ins_f, _del_f) = forward_matrices(profile, seq);
    let (bwd_score, mat_b, ins_b, _del_b) = backward_matrices(profile, seq);
    debug_assert!((fwd_score - bwd_score).abs() < 1.0 + fwd_score.abs() * 1e-3);

    let m = profile.m();
    let l = seq.len();
    let mut posterior = vec![0.0; l + 1];
    for i in 1..=l {
        let mut mass = 0.0;
        for k in 1..=m {
            let pm = (mat_f[idx(i, k, m)] + mat_b[idx(i, k, m)] - fwd_score).exp();
            let pi = (ins_f[idx(i, k, m)] + ins_b[idx(i, k, m)] - fwd_score).exp();
            mass += pm + pi;
        }
        posterior[i] = mass.clamp(0.0, 1.0);
    }
    (fwd_score, posterior)
}

type Matrices = (f64, Vec<f64>, Vec<f64>, Vec<f64>);

fn forward_matrices(profile: &Profile, seq: &DigitalSequence) -> Matrices {
    let m = profile.m();
    let l = seq.len();
    let special = profile.special();
    let neg = f64::NEG_INFINITY;

    let mut mat = vec![neg; (l + 1) * (m + 1)];
    let mut ins = vec![neg; (l + 1) * (m + 1)];
    let mut del = vec![neg; (l + 1) * (m + 1)];
    let mut n = vec![neg; l + 1];
    let mut b = vec![neg; l + 1];
    let mut e = vec![neg; l + 1];
    let mut j = vec![neg; l + 1];
    let mut c = vec![neg; l + 1];

    n[0] = 0.0;
    b[0] = n[0] + special.n_move;

    for i in 1..=l {
        let residue = seq.residue_1b(i);
        for k in 1..=m {
            let mut acc = b[i - 1] + special.entry[k];
            if k >= 2 {
                acc = lse(acc, mat[idx(i - 1, k - 1, m)] + profile.transition_score(k - 1, TransitionKind::Mm));
                acc = lse(acc, ins[idx(i - 1, k - 1, m)] + profile.transition_score(k - 1, TransitionKind::Im));
                acc = lse(acc, del[idx(i - 1, k - 1, m)] + profile.transition_score(k - 1, TransitionKind::Dm));
            }
            mat[idx(i, k, m)] = acc + profile.match_score(k, residue);

            let stay = lse(
                mat[idx(i - 1, k, m)] + profile.transition_score(k, TransitionKind::Mi),
                ins[idx(i - 1, k, m)] + profile.transition_score(k, TransitionKind::Ii),
            );
            ins[idx(i, k, m)] = stay + profile.insert_score(k, residue);
        }
        for k in 2..=m {
            del[idx(i, k, m)] = lse(
                mat[idx(i, k - 1, m)] + profile.transition_score(k - 1, TransitionKind::Md),
                del[idx(i, k - 1, m)] + profile.transition_score(k - 1, TransitionKind::Dd),
            );
        }
        let mut e_i = neg;
        for k in 1..=m {
            e_i = lse(e_i, mat[idx(i, k, m)] + special.exit[k]);
        }
        e[i] = e_i;
        j[i] = lse(j[i - 1] + special.j_loop, e[i] + special.e_to_j);
        c[i] = lse(c[i - 1] + special.c_loop, e[i] + special.e_to_c);
        n[i] = n[i - 1] + special.n_loop;
        b[i] = lse(n[i] + special.n_move, j[i] + special.j_move);
    }

    (c[l] + special.c_move, mat, ins, del)
}

/// Backward matrices, indexed identically to the forward ones so that
/// `mat_f[i,k] + mat_b[i,k] - score` is the posterior log-probability of
/// visiting `M_k` at position `i`.
fn backward_matrices(profile: &Profile, seq: &DigitalSequence) -> Matrices {
    let m = profile.m();
    let l = seq.len();
    let special = profile.special();
    let neg = f64::NEG_INFINITY;

    let mut mat = vec![neg; (l + 1) * (m + 1)];
    let mut ins = vec![neg; (l + 1) * (m + 1)];
    let mut del = vec![neg; (l + 1) * (m + 1)];
    let mut n = vec![neg; l + 1];
    let mut b = vec![neg; l + 1];
    let mut e = vec![neg; l + 1];
    let mut j = vec![neg; l + 1];
    let mut c = vec![neg; l + 1];

    c[l] = special.c_move;
    e[l] = special.e_to_c + c[l];
    for k in 1..=m {
        mat[idx(l, k, m)] = special.exit[k] + e[l];
    }

    for i in (0..l).rev() {
        let next_residue = seq.residue_1b(i + 1);
        for k in 1..=m {
            let mut acc = neg;
            if k < m {
                acc = lse(
                    acc,
                    profile.transition_score(k, TransitionKind::Mm)
                        + profile.match_score(k + 1, next_residue)
                        + mat[idx(i + 1, k + 1, m)],
                );
                acc = lse(
                    acc,
                    profile.transition_score(k, TransitionKind::Md) + del[idx(i + 1, k + 1, m)],
                );
            }
            acc = lse(
                acc,
                profile.transition_score(k, TransitionKind::Mi) + profile.insert_score(k, next_residue) + ins[idx(i + 1, k, m)],
            );
            mat[idx(i, k, m)] = acc;

            let mut iacc = profile.transition_score(k, TransitionKind::Ii) + profile.insert_score(k, next_residue) + ins[idx(i + 1, k, m)];
            if k < m {
                iacc = lse(
                    iacc,
                    profile.transition_score(k, TransitionKind::Im)
                        + profile.match_score(k + 1, next_residue)
                        + mat[idx(i + 1, k + 1, m)],
                );
            }
            ins[idx(i, k, m)] = iacc;
        }
        for k in (1..m).rev() {
            let mut dacc = special.exit[k];
            dacc = lse(
                dacc,
                profile.transition_score(k, TransitionKind::Dm)
                    + profile.match_score(k + 1, next_residue)
                    + mat[idx(i + 1, k + 1, m)],
            );
            dacc = lse(dacc, profile.transition_score(k, TransitionKind::Dd) + del[idx(i + 1, k, m)]);
            del[idx(i, k, m)] = dacc;
        }

        c[i] = special.c_loop + c[i + 1];
        let e_i = special.e_to_c + c[i];
        j[i] = special.e_to_j + e_i;
        let mut b_i = neg;
        for k in 1..=m {
            b_i = lse(b_i, special.entry[k] + profile.match_score(k, next_residue) + mat[idx(i + 1, k, m)]);
        }
        b[i] = b_i;
        n[i] = lse(special.n_move + b[i], special.n_loop + n[i + 1]);
        e[i] = e_i;
    }

    (n[0], mat, ins, del)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::alphabet::Alphabet;
    use crate::background::Background;
    use crate::hmm::Hmm;
    use crate::rng::Randomness;

    #[test]
    fn viterbi_score_is_finite_and_trace_nonempty() {
        let mut rng = Randomness::new(5);
        let hmm = Hmm::sample(Alphabet::Dna, 10, &mut rng).unwrap();
        let bg = Background::new(Alphabet::Dna, 20);
        let profile = Profile::configure(&hmm, &bg, 20, true, true).unwrap();
        let seq = DigitalSequence::new(Alphabet::Dna, "t", vec![0, 1, 2, 3, 0, 1, 2, 3, 0, 1]);
        let result = viterbi(&profile, &seq);
        assert!(result.score.is_finite());
        assert!(!result.trace.is_empty());
    }

    #[test]
    fn forward_score_at_least_viterbi_score() {
        let mut rng = Randomness::new(6);
        let hmm = Hmm::sample(Alphabet::Dna, 8, &mut rng).unwrap();
        let bg = Background::new(Alphabet::Dna, 20);
        let profile = Profile::configure(&hmm, &bg, 20, true, true).unwrap();
        let seq = DigitalSequence::new(Alphabet::Dna, "t", vec![0, 1, 2, 3, 0, 1, 2, 3]);
        let v = viterbi(&profile, &seq).score;
        let f = forward(&profile, &seq);
        assert!(f >= v - 1e-6, "forward {f} should be >= viterbi {v}");
    }
}
