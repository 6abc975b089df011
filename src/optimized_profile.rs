//! Striped, quantized integer form of a [`Profile`], laid out for
//! vectorized (lane-interleaved) filter execution.
//!
//! Real SIMD execution needs an actual target-ISA vector width and
//! intrinsics; this crate models the *layout* (interleaving stride, integer
//! quantization, scalar rescaling constants) faithfully and scores each lane
//! with plain scalar arithmetic, which is observably identical to a SIMD
//! implementation — the striping only changes memory order, not the scores
//! produced.

use crate::error::Result;
use crate::metadata::{Cutoffs, EvalueParameters, Offsets};
use crate::profile::Profile;

/// Lane width pressed databases are expected to have been built with. Real
/// HMMER uses the host's SIMD width (16/32/64 bytes); we fix it at 16 so the
/// striping is deterministic across hosts, matching the documented minimum.
pub const VECTOR_WIDTH: usize = 16;

/// `nats -> 1/3-bit fixed point` scale used by both filter matrices, the
/// same precision real profile-HMM filters use.
pub fn nats_to_thirdbits(nats: f64) -> f64 {
    nats / std::f64::consts::LN_2 * 3.0
}

fn quantize_i8(nats: f64, bias: f64) -> i8 {
    let v = (nats_to_thirdbits(nats) + bias).round();
    v.clamp(i8::MIN as f64, i8::MAX as f64) as i8
}

fn quantize_i16(nats: f64) -> i16 {
    let v = nats_to_thirdbits(nats).round();
    v.clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// A striped residue x node matrix: `lanes[residue]` holds node scores
/// reordered so that position `i` within the lane corresponds to model node
/// `(i % n_vectors) * VECTOR_WIDTH + (i / n_vectors) + 1`, the standard
/// striped/interleaved layout that lets a SIMD lane scan `VECTOR_WIDTH`
/// disjoint stretches of the model in parallel.
#[derive(Debug, Clone)]
pub struct StripedMatrix<T> {
    kp: usize,
    m: usize,
    n_vectors: usize,
    lanes: Vec<Vec<T>>,
}

impl<T: Copy + Default> StripedMatrix<T> {
    fn build(kp: usize, m: usize, mut score_at: impl FnMut(usize, usize) -> T) -> Self {
        let n_vectors = m.div_ceil(VECTOR_WIDTH).max(1);
        let padded = n_vectors * VECTOR_WIDTH;
        let mut lanes = vec![vec![T::default(); padded]; kp];
        for residue in 0..kp {
            for i in 0..padded {
                let node = (i % n_vectors) * VECTOR_WIDTH + (i / n_vectors) + 1;
                lanes[residue][i] = if node <= m {
                    score_at(residue, node)
                } else {
                    T::default()
                };
            }
        }
        Self {
            kp,
            m,
            n_vectors,
            lanes,
        }
    }

    pub fn kp(&self) -> usize {
        self.kp
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn n_vectors(&self) -> usize {
        self.n_vectors
    }

    /// Score for `residue` at 1-based model node `node`, un-striping the
    /// lookup for callers that want the logical (node-major) view.
    pub fn get(&self, residue: usize, node: usize) -> T {
        debug_assert!(node >= 1 && node <= self.m);
        let node0 = node - 1;
        let i = (node0 % self.n_vectors) * VECTOR_WIDTH + node0 / self.n_vectors;
        self.lanes[residue][i]
    }

    pub fn lane(&self, residue: usize) -> &[T] {
        &self.lanes[residue]
    }

    /// All lanes, in residue order, for serialization.
    pub fn lanes(&self) -> &[Vec<T>] {
        &self.lanes
    }

    /// Reconstruct a striped matrix from its already-striped lane data, the
    /// on-disk pressed-format representation (§6): no re-derivation from a
    /// Profile is needed, since the lanes are stored exactly as laid out.
    pub fn from_lanes(kp: usize, m: usize, n_vectors: usize, lanes: Vec<Vec<T>>) -> Self {
        Self { kp, m, n_vectors, lanes }
    }
}

/// Layout-transformed, integer-quantized form of a [`Profile`] suitable for
/// vectorized filter execution.
#[derive(Debug, Clone)]
pub struct OptimizedProfile {
    m: usize,
    local: bool,
    multihit: bool,
    name: String,
    /// 16-bit striped match scores, used by the Viterbi filter (Stage 3).
    rbv: StripedMatrix<i16>,
    /// 8-bit striped match scores, used by the MSV/SSV filter (Stage 1).
    sbv: StripedMatrix<i8>,
    /// Constant B->Mk entry cost (1/3-bit units) used by the filters'
    /// fixed-cost local-entry approximation.
    tbm: i8,
    /// Constant E->C exit cost (1/3-bit units).
    tec: i8,
    /// Constant J/B join cost (1/3-bit units), used when `multihit`.
    tjb: i8,
    /// Integer baseline added to keep filter scores non-negative.
    base: i32,
    /// Bias term (1/3-bit units) subtracted per residue to account for
    /// background composition in the unbiased SSV filter.
    bias: u8,
    offsets: Offsets,
    evalue_parameters: Option<EvalueParameters>,
    cutoffs: Cutoffs,
}

impl OptimizedProfile {
    /// Convert a [`Profile`] into its striped/quantized form. Deterministic:
    /// calling twice on the same Profile yields identical output.
    pub fn from_profile(profile: &Profile) -> Result<Self> {
        profile.ensure_configured()?;
        let m = profile.m();
        let kp = profile.alphabet().kp();
        let k = profile.alphabet().k();

        let base: i32 = 100;
        let bias_nats = profile
            .match_scores(1)
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max)
            .max(0.0);
        let bias = nats_to_thirdbits(bias_nats).round().clamp(0.0, u8::MAX as f64) as u8;

        let rbv = StripedMatrix::build(kp, m, |residue, node| {
            if residue < k {
                quantize_i16(profile.match_score(node, residue as u8))
            } else {
                0
            }
        });
        let sbv = StripedMatrix::build(kp, m, |residue, node| {
            if residue < k {
                quantize_i8(profile.match_score(node, residue as u8), bias as f64)
            } else {
                0
            }
        });

        let special = profile.special();
        let tbm = quantize_i8(
            special.entry.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            0.0,
        );
        let tec = quantize_i8(special.e_to_c, 0.0);
        let tjb = quantize_i8(special.j_move, 0.0);

        Ok(Self {
            m,
            local: profile.local(),
            multihit: profile.multihit(),
            name: profile.name().to_string(),
            rbv,
            sbv,
            tbm,
            tec,
            tjb,
            base,
            bias,
            offsets: Offsets::default(),
            evalue_parameters: profile.evalue_parameters(),
            cutoffs: *profile.cutoffs(),
        })
    }

    pub fn m(&self) -> usize {
        self.m
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

    pub fn rbv(&self) -> &StripedMatrix<i16> {
        &self.rbv
    }

    pub fn sbv(&self) -> &StripedMatrix<i8> {
        &self.sbv
    }

    pub fn tbm(&self) -> i8 {
        self.tbm
    }

    pub fn tec(&self) -> i8 {
        self.tec
    }

    pub fn tjb(&self) -> i8 {
        self.tjb
    }

    pub fn base(&self) -> i32 {
        self.base
    }

    pub fn bias(&self) -> u8 {
        self.bias
    }

    pub fn offsets(&self) -> Offsets {
        self.offsets
    }

    pub fn set_offsets(&mut self, offsets: Offsets) {
        self.offsets = offsets;
    }

    pub fn evalue_parameters(&self) -> Option<EvalueParameters> {
        self.evalue_parameters
    }

    pub fn cutoffs(&self) -> &Cutoffs {
        &self.cutoffs
    }

    /// Reconstruct an `OptimizedProfile` from its component parts, the
    /// inverse of reading every accessor below; used when loading a
    /// pressed-database record rather than re-deriving from a `Profile`.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        m: usize,
        local: bool,
        multihit: bool,
        name: String,
        rbv: StripedMatrix<i16>,
        sbv: StripedMatrix<i8>,
        tbm: i8,
        tec: i8,
        tjb: i8,
        base: i32,
        bias: u8,
        offsets: Offsets,
        evalue_parameters: Option<EvalueParameters>,
        cutoffs: Cutoffs,
    ) -> Self {
        Self {
            m,
            local,
            multihit,
            name,
            rbv,
            sbv,
            tbm,
            tec,
            tjb,
            base,
            bias,
            offsets,
            evalue_parameters,
            cutoffs,
        }
    }

    /// Convert an 8-bit filter raw score back to nats, reversing the
    /// quantization applied by [`Self::from_profile`]. Used by Stage 1/2 to
    /// convert the integer MSV score to a P-value.
    pub fn unscale_filter_score(&self, raw: i32) -> f64 {
        (raw - self.base) as f64 * std::f64::consts::LN_2 / 3.0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::alphabet::Alphabet;
    use crate::background::Background;
    use crate::hmm::Hmm;
    use crate::rng::Randomness;

    #[test]
    fn conversion_preserves_m() {
        let mut rng = Randomness::new(7);
        let hmm = Hmm::sample(Alphabet::Amino, 20, &mut rng).unwrap();
        let bg = Background::new(Alphabet::Amino, 400);
        let profile = Profile::configure(&hmm, &bg, 400, true, true).unwrap();
        let optimized = OptimizedProfile::from_profile(&profile).unwrap();
        assert_eq!(optimized.m(), hmm.m());
    }

    #[test]
    fn striped_matrix_roundtrips_logical_index() {
        let m = 37;
        let matrix = StripedMatrix::build(4, m, |residue, node| (residue * 1000 + node) as i32);
        for residue in 0..4 {
            for node in 1..=m {
                assert_eq!(matrix.get(residue, node), (residue * 1000 + node) as i32);
            }
        }
    }

    #[test]
    fn conversion_is_deterministic() {
        let mut rng = Randomness::new(9);
        let hmm = Hmm::sample(Alphabet::Dna, 15, &mut rng).unwrap();
        let bg = Background::new(Alphabet::Dna, 200);
        let profile = Profile::configure(&hmm, &bg, 200, true, false).unwrap();
        let a = OptimizedProfile::from_profile(&profile).unwrap();
        let b = OptimizedProfile::from_profile(&profile).unwrap();
        for residue in 0..profile.alphabet().k() {
            assert_eq!(a.rbv().lane(residue), b.rbv().lane(residue));
            assert_eq!(a.sbv().lane(residue), b.sbv().lane(residue));
        }
    }
}
