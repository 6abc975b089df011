//! Binary pressed-database format (§6): `.h3m` (binary HMMs), `.h3f`
//! (binary SSV/MSV filter profiles), `.h3p` (binary full profiles) and
//! `.h3i` (a name-indexed table of each model's byte offsets into the
//! other three).
//!
//! Every file opens with a magic `u32` that also records byte order: a
//! reader that sees the magic byte-swapped knows the file was written on a
//! big-endian host and switches to big-endian reads for the rest of the
//! file. Every record is self-delimiting (length-prefixed strings and
//! vectors), so the four files can be read independently of one another.

use std::io::{Read, Write};

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::alphabet::Alphabet;
use crate::error::{PHmmError, Result};
use crate::hmm::Hmm;
use crate::metadata::{Cutoffs, EvalueParameters, Offsets, ScorePair};
use crate::optimized_profile::{OptimizedProfile, StripedMatrix};
use crate::profile::{Profile, SpecialTransitions};

pub const H3M_MAGIC: u32 = 0xe8ed_4ac7;
pub const H3F_MAGIC: u32 = 0xe8ed_4ac8;
pub const H3P_MAGIC: u32 = 0xe8ed_4ac9;
pub const H3I_MAGIC: u32 = 0xe8ed_4aca;

/// Byte order a pressed file was written with, determined from how its
/// magic number reads back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

fn read_magic<R: Read>(input: &mut R, expected: u32) -> Result<Endian> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    if LittleEndian::read_u32(&buf) == expected {
        Ok(Endian::Little)
    } else if BigEndian::read_u32(&buf) == expected {
        Ok(Endian::Big)
    } else {
        Err(PHmmError::CorruptFile("bad magic number".into()))
    }
}

pub(crate) fn write_magic<W: Write>(out: &mut W, magic: u32) -> Result<()> {
    out.write_u32::<LittleEndian>(magic)?;
    Ok(())
}

struct Cursor<R> {
    input: R,
    endian: Endian,
}

impl<R: Read> Cursor<R> {
    fn u32(&mut self) -> Result<u32> {
        Ok(match self.endian {
            Endian::Little => self.input.read_u32::<LittleEndian>()?,
            Endian::Big => self.input.read_u32::<BigEndian>()?,
        })
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(match self.endian {
            Endian::Little => self.input.read_u64::<LittleEndian>()?,
            Endian::Big => self.input.read_u64::<BigEndian>()?,
        })
    }

    fn i8(&mut self) -> Result<i8> {
        Ok(self.input.read_i8()?)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.input.read_u8()?)
    }

    fn i16(&mut self) -> Result<i16> {
        Ok(match self.endian {
            Endian::Little => self.input.read_i16::<LittleEndian>()?,
            Endian::Big => self.input.read_i16::<BigEndian>()?,
        })
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(match self.endian {
            Endian::Little => self.input.read_i32::<LittleEndian>()?,
            Endian::Big => self.input.read_i32::<BigEndian>()?,
        })
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(match self.endian {
            Endian::Little => self.input.read_f64::<LittleEndian>()?,
            Endian::Big => self.input.read_f64::<BigEndian>()?,
        })
    }

    fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let mut buf = vec![0u8; len];
        self.input.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|e| PHmmError::CorruptFile(e.to_string()))
    }

    fn option_string(&mut self) -> Result<Option<String>> {
        if self.bool()? {
            Ok(Some(self.string()?))
        } else {
            Ok(None)
        }
    }

    fn f64_vec(&mut self) -> Result<Vec<f64>> {
        let len = self.u32()? as usize;
        (0..len).map(|_| self.f64()).collect()
    }

    fn option_f64_vec(&mut self) -> Result<Option<Vec<f64>>> {
        if self.bool()? {
            Ok(Some(self.f64_vec()?))
        } else {
            Ok(None)
        }
    }

    fn option_u64(&mut self) -> Result<Option<u64>> {
        if self.bool()? {
            Ok(Some(self.u64()?))
        } else {
            Ok(None)
        }
    }

    fn option_f64(&mut self) -> Result<Option<f64>> {
        if self.bool()? {
            Ok(Some(self.f64()?))
        } else {
            Ok(None)
        }
    }

    fn alphabet(&mut self) -> Result<Alphabet> {
        match self.u8()? {
            0 => Ok(Alphabet::Dna),
            1 => Ok(Alphabet::Rna),
            2 => Ok(Alphabet::Amino),
            other => Err(PHmmError::CorruptFile(format!("unknown alphabet tag {other}"))),
        }
    }

    fn score_pair(&mut self) -> Result<Option<ScorePair>> {
        if self.bool()? {
            Ok(Some(ScorePair {
                score1: self.f64()?,
                score2: self.f64()?,
            }))
        } else {
            Ok(None)
        }
    }

    fn cutoffs(&mut self) -> Result<Cutoffs> {
        Ok(Cutoffs {
            gathering: self.score_pair()?,
            trusted: self.score_pair()?,
            noise: self.score_pair()?,
        })
    }

    fn evalue_parameters(&mut self) -> Result<Option<EvalueParameters>> {
        if self.bool()? {
            Ok(Some(EvalueParameters {
                m_mu: self.f64()?,
                m_lambda: self.f64()?,
                v_mu: self.f64()?,
                v_lambda: self.f64()?,
                f_tau: self.f64()?,
                f_lambda: self.f64()?,
            }))
        } else {
            Ok(None)
        }
    }
}

fn write_string<W: Write>(out: &mut W, s: &str) -> Result<()> {
    out.write_u32::<LittleEndian>(s.len() as u32)?;
    out.write_all(s.as_bytes())?;
    Ok(())
}

fn write_option_string<W: Write>(out: &mut W, s: &Option<String>) -> Result<()> {
    match s {
        Some(s) => {
            out.write_u8(1)?;
            write_string(out, s)?;
        }
        None => out.write_u8(0)?,
    }
    Ok(())
}

fn write_f64_slice<W: Write>(out: &mut W, values: &[f64]) -> Result<()> {
    out.write_u32::<LittleEndian>(values.len() as u32)?;
    for v in values {
        out.write_f64::<LittleEndian>(*v)?;
    }
    Ok(())
}

fn write_option_f64_vec<W: Write>(out: &mut W, values: &Option<Vec<f64>>) -> Result<()> {
    match values {
        Some(values) => {
            out.write_u8(1)?;
            write_f64_slice(out, values)?;
        }
        None => out.write_u8(0)?,
    }
    Ok(())
}

fn write_option_u64<W: Write>(out: &mut W, v: Option<u64>) -> Result<()> {
    match v {
        Some(v) => {
            out.write_u8(1)?;
            out.write_u64::<LittleEndian>(v)?;
        }
        None => out.write_u8(0)?,
    }
    Ok(())
}

fn write_option_f64<W: Write>(out: &mut W, v: Option<f64>) -> Result<()> {
    match v {
        Some(v) => {
            out.write_u8(1)?;
            out.write_f64::<LittleEndian>(v)?;
        }
        None => out.write_u8(0)?,
    }
    Ok(())
}

fn write_alphabet<W: Write>(out: &mut W, alphabet: Alphabet) -> Result<()> {
    let tag: u8 = match alphabet {
        Alphabet::Dna => 0,
        Alphabet::Rna => 1,
        Alphabet::Amino => 2,
    };
    out.write_u8(tag)?;
    Ok(())
}

fn write_score_pair<W: Write>(out: &mut W, pair: Option<ScorePair>) -> Result<()> {
    match pair {
        Some(pair) => {
            out.write_u8(1)?;
            out.write_f64::<LittleEndian>(pair.score1)?;
            out.write_f64::<LittleEndian>(pair.score2)?;
        }
        None => out.write_u8(0)?,
    }
    Ok(())
}

fn write_cutoffs<W: Write>(out: &mut W, cutoffs: &Cutoffs) -> Result<()> {
    write_score_pair(out, cutoffs.gathering)?;
    write_score_pair(out, cutoffs.trusted)?;
    write_score_pair(out, cutoffs.noise)?;
    Ok(())
}

fn write_evalue_parameters<W: Write>(out: &mut W, params: Option<EvalueParameters>) -> Result<()> {
    match params {
        Some(p) => {
            out.write_u8(1)?;
            for v in [p.m_mu, p.m_lambda, p.v_mu, p.v_lambda, p.f_tau, p.f_lambda] {
                out.write_f64::<LittleEndian>(v)?;
            }
        }
        None => out.write_u8(0)?,
    }
    Ok(())
}

/// Write one model's record to a `.h3m` binary HMM stream.
pub fn write_hmm<W: Write>(out: &mut W, hmm: &Hmm) -> Result<()> {
    let m = hmm.m();
    let k = hmm.alphabet().k();
    out.write_u32::<LittleEndian>(m as u32)?;
    write_alphabet(out, hmm.alphabet())?;
    write_string(out, hmm.name())?;
    let meta = hmm.meta();
    write_option_string(out, &meta.accession)?;
    write_option_string(out, &meta.description)?;
    write_option_string(out, &meta.creation_time)?;
    write_option_string(out, &meta.consensus)?;
    write_option_string(out, &meta.consensus_structure)?;
    write_option_string(out, &meta.consensus_accessibility)?;
    out.write_u32::<LittleEndian>(meta.command_line.len() as u32)?;
    for line in &meta.command_line {
        write_string(out, line)?;
    }
    write_option_u64(out, meta.nseq.map(|v| v as u64))?;
    write_option_f64(out, meta.nseq_effective)?;
    write_option_u64(out, meta.checksum.map(|v| v as u64))?;
    write_option_f64_vec(out, &meta.composition)?;
    for node in 1..=m {
        write_f64_slice(out, &hmm.match_emission(node)[..k])?;
    }
    for node in 1..=m {
        write_f64_slice(out, &hmm.insert_emission(node)[..k])?;
    }
    for node in 0..=m {
        write_f64_slice(out, hmm.transitions(node))?;
    }
    write_evalue_parameters(out, hmm.evalue_parameters())?;
    write_cutoffs(out, hmm.cutoffs())?;
    Ok(())
}

fn read_hmm_record<R: Read>(cur: &mut Cursor<R>) -> Result<Hmm> {
    let m = cur.u32()? as usize;
    let alphabet = cur.alphabet()?;
    let name = cur.string()?;
    let mut hmm = Hmm::zeroed(alphabet, m, name)?;

    let meta = hmm.meta_mut();
    meta.accession = cur.option_string()?;
    meta.description = cur.option_string()?;
    meta.creation_time = cur.option_string()?;
    meta.consensus = cur.option_string()?;
    meta.consensus_structure = cur.option_string()?;
    meta.consensus_accessibility = cur.option_string()?;
    let n_cmd = cur.u32()? as usize;
    let mut command_line = Vec::with_capacity(n_cmd);
    for _ in 0..n_cmd {
        command_line.push(cur.string()?);
    }
    meta.command_line = command_line;
    meta.nseq = cur.option_u64()?.map(|v| v as usize);
    meta.nseq_effective = cur.option_f64()?;
    meta.checksum = cur.option_u64()?.map(|v| v as u32);
    meta.composition = cur.option_f64_vec()?;

    for node in 1..=m {
        let row = cur.f64_vec()?;
        hmm.match_emission_mut(node).copy_from_slice(&row);
    }
    for node in 1..=m {
        let row = cur.f64_vec()?;
        hmm.insert_emission_mut(node).copy_from_slice(&row);
    }
    for node in 0..=m {
        let row = cur.f64_vec()?;
        if row.len() != 7 {
            return Err(PHmmError::CorruptFile(format!(
                "transition row at node {node} has {} entries, expected 7",
                row.len()
            )));
        }
        hmm.transitions_mut(node).copy_from_slice(&row);
    }
    if let Some(params) = cur.evalue_parameters()? {
        hmm.set_evalue_parameters(params);
    }
    *hmm.cutoffs_mut() = cur.cutoffs()?;
    Ok(hmm)
}

/// Read every model out of a `.h3m` binary HMM stream, in file order.
pub fn read_hmms<R: Read>(input: &mut R) -> Result<Vec<Hmm>> {
    let endian = read_magic(input, H3M_MAGIC)?;
    let mut cur = Cursor { input, endian };
    let mut out = Vec::new();
    loop {
        match read_hmm_record(&mut cur) {
            Ok(hmm) => out.push(hmm),
            Err(PHmmError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

/// Write a `.h3m` binary HMM stream (magic header, then one record per
/// model).
pub fn write_hmms<W: Write>(out: &mut W, hmms: &[Hmm]) -> Result<()> {
    write_magic(out, H3M_MAGIC)?;
    for hmm in hmms {
        write_hmm(out, hmm)?;
    }
    Ok(())
}

fn write_striped_i16<W: Write>(out: &mut W, matrix: &StripedMatrix<i16>) -> Result<()> {
    out.write_u32::<LittleEndian>(matrix.kp() as u32)?;
    out.write_u32::<LittleEndian>(matrix.m() as u32)?;
    out.write_u32::<LittleEndian>(matrix.n_vectors() as u32)?;
    for residue in 0..matrix.kp() {
        let lane = matrix.lane(residue);
        out.write_u32::<LittleEndian>(lane.len() as u32)?;
        for v in lane {
            out.write_i16::<LittleEndian>(*v)?;
        }
    }
    Ok(())
}

fn write_striped_i8<W: Write>(out: &mut W, matrix: &StripedMatrix<i8>) -> Result<()> {
    out.write_u32::<LittleEndian>(matrix.kp() as u32)?;
    out.write_u32::<LittleEndian>(matrix.m() as u32)?;
    out.write_u32::<LittleEndian>(matrix.n_vectors() as u32)?;
    for residue in 0..matrix.kp() {
        let lane = matrix.lane(residue);
        out.write_u32::<LittleEndian>(lane.len() as u32)?;
        for v in lane {
            out.write_i8(*v)?;
        }
    }
    Ok(())
}

fn read_striped_i16<R: Read>(cur: &mut Cursor<R>) -> Result<StripedMatrix<i16>> {
    let kp = cur.u32()? as usize;
    let m = cur.u32()? as usize;
    let n_vectors = cur.u32()? as usize;
    let mut lanes = Vec::with_capacity(kp);
    for _ in 0..kp {
        let len = cur.u32()? as usize;
        let mut lane = Vec::with_capacity(len);
        for _ in 0..len {
            lane.push(cur.i16()?);
        }
        lanes.push(lane);
    }
    Ok(StripedMatrix::from_lanes(kp, m, n_vectors, lanes))
}

fn read_striped_i8<R: Read>(cur: &mut Cursor<R>) -> Result<StripedMatrix<i8>> {
    let kp = cur.u32()? as usize;
    let m = cur.u32()? as usize;
    let n_vectors = cur.u32()? as usize;
    let mut lanes = Vec::with_capacity(kp);
    for _ in 0..kp {
        let len = cur.u32()? as usize;
        let mut lane = Vec::with_capacity(len);
        for _ in 0..len {
            lane.push(cur.i8()?);
        }
        lanes.push(lane);
    }
    Ok(StripedMatrix::from_lanes(kp, m, n_vectors, lanes))
}

fn write_offsets<W: Write>(out: &mut W, offsets: Offsets) -> Result<()> {
    out.write_u64::<LittleEndian>(offsets.model)?;
    out.write_u64::<LittleEndian>(offsets.filter)?;
    out.write_u64::<LittleEndian>(offsets.profile)?;
    Ok(())
}

fn read_offsets<R: Read>(cur: &mut Cursor<R>) -> Result<Offsets> {
    Ok(Offsets {
        model: cur.u64()?,
        filter: cur.u64()?,
        profile: cur.u64()?,
    })
}

/// Write one model's record to a `.h3f` binary filter-profile stream.
pub fn write_optimized_profile<W: Write>(out: &mut W, profile: &OptimizedProfile) -> Result<()> {
    out.write_u32::<LittleEndian>(profile.m() as u32)?;
    out.write_u8(profile.local() as u8)?;
    out.write_u8(profile.multihit() as u8)?;
    write_string(out, profile.name())?;
    write_striped_i16(out, profile.rbv())?;
    write_striped_i8(out, profile.sbv())?;
    out.write_i8(profile.tbm())?;
    out.write_i8(profile.tec())?;
    out.write_i8(profile.tjb())?;
    out.write_i32::<LittleEndian>(profile.base())?;
    out.write_u8(profile.bias())?;
    write_offsets(out, profile.offsets())?;
    write_evalue_parameters(out, profile.evalue_parameters())?;
    write_cutoffs(out, profile.cutoffs())?;
    Ok(())
}

fn read_optimized_profile_record<R: Read>(cur: &mut Cursor<R>) -> Result<OptimizedProfile> {
    let m = cur.u32()? as usize;
    let local = cur.bool()?;
    let multihit = cur.bool()?;
    let name = cur.string()?;
    let rbv = read_striped_i16(cur)?;
    let sbv = read_striped_i8(cur)?;
    let tbm = cur.i8()?;
    let tec = cur.i8()?;
    let tjb = cur.i8()?;
    let base = cur.i32()?;
    let bias = cur.u8()?;
    let offsets = read_offsets(cur)?;
    let evalue_parameters = cur.evalue_parameters()?;
    let cutoffs = cur.cutoffs()?;
    Ok(OptimizedProfile::from_parts(
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
    ))
}

/// Read every model out of a `.h3f` binary filter-profile stream, in file
/// order.
pub fn read_optimized_profiles<R: Read>(input: &mut R) -> Result<Vec<OptimizedProfile>> {
    let endian = read_magic(input, H3F_MAGIC)?;
    let mut cur = Cursor { input, endian };
    let mut out = Vec::new();
    loop {
        match read_optimized_profile_record(&mut cur) {
            Ok(profile) => out.push(profile),
            Err(PHmmError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

/// Write a `.h3f` binary filter-profile stream.
pub fn write_optimized_profiles<W: Write>(out: &mut W, profiles: &[OptimizedProfile]) -> Result<()> {
    write_magic(out, H3F_MAGIC)?;
    for profile in profiles {
        write_optimized_profile(out, profile)?;
    }
    Ok(())
}

/// Write one model's record to a `.h3p` binary full-profile stream.
pub fn write_profile<W: Write>(out: &mut W, profile: &Profile) -> Result<()> {
    let m = profile.m();
    let k = profile.alphabet().k();
    write_alphabet(out, profile.alphabet())?;
    out.write_u32::<LittleEndian>(m as u32)?;
    out.write_u32::<LittleEndian>(profile.length() as u32)?;
    out.write_u8(profile.local() as u8)?;
    out.write_u8(profile.multihit() as u8)?;
    write_string(out, profile.name())?;
    write_option_string(out, &profile.accession().map(str::to_string))?;
    write_option_string(out, &profile.description().map(str::to_string))?;
    for node in 1..=m {
        write_f64_slice(out, &profile.match_scores(node)[..k])?;
    }
    for node in 1..=m {
        write_f64_slice(out, &profile.insert_scores(node)[..k])?;
    }
    for node in 0..=m {
        write_f64_slice(out, profile.transition_scores_row(node))?;
    }
    let special = profile.special();
    for v in [
        special.n_loop,
        special.n_move,
        special.e_to_c,
        special.e_to_j,
        special.j_loop,
        special.j_move,
        special.c_loop,
        special.c_move,
    ] {
        out.write_f64::<LittleEndian>(v)?;
    }
    write_f64_slice(out, &special.entry)?;
    write_f64_slice(out, &special.exit)?;
    write_evalue_parameters(out, profile.evalue_parameters())?;
    write_cutoffs(out, profile.cutoffs())?;
    Ok(())
}

fn read_profile_record<R: Read>(cur: &mut Cursor<R>) -> Result<Profile> {
    let alphabet = cur.alphabet()?;
    let m = cur.u32()? as usize;
    let length = cur.u32()? as usize;
    let local = cur.bool()?;
    let multihit = cur.bool()?;
    let name = cur.string()?;
    let accession = cur.option_string()?;
    let description = cur.option_string()?;

    let mut match_scores = vec![vec![0.0; alphabet.k()]; m + 1];
    for node in 1..=m {
        match_scores[node] = cur.f64_vec()?;
    }
    let mut insert_scores = vec![vec![0.0; alphabet.k()]; m + 1];
    for node in 1..=m {
        insert_scores[node] = cur.f64_vec()?;
    }
    let mut transition_scores = vec![[0.0; 7]; m + 1];
    for node in 0..=m {
        let row = cur.f64_vec()?;
        if row.len() != 7 {
            return Err(PHmmError::CorruptFile(format!(
                "transition row at node {node} has {} entries, expected 7",
                row.len()
            )));
        }
        transition_scores[node].copy_from_slice(&row);
    }
    let n_loop = cur.f64()?;
    let n_move = cur.f64()?;
    let e_to_c = cur.f64()?;
    let e_to_j = cur.f64()?;
    let j_loop = cur.f64()?;
    let j_move = cur.f64()?;
    let c_loop = cur.f64()?;
    let c_move = cur.f64()?;
    let entry = cur.f64_vec()?;
    let exit = cur.f64_vec()?;
    let special = SpecialTransitions {
        n_loop,
        n_move,
        e_to_c,
        e_to_j,
        j_loop,
        j_move,
        c_loop,
        c_move,
        entry,
        exit,
    };
    let evalue_parameters = cur.evalue_parameters()?;
    let cutoffs = cur.cutoffs()?;

    Ok(Profile::from_parts(
        alphabet,
        m,
        length,
        local,
        multihit,
        name,
        accession,
        description,
        match_scores,
        insert_scores,
        transition_scores,
        special,
        evalue_parameters,
        cutoffs,
    ))
}

/// Read every model out of a `.h3p` binary full-profile stream, in file
/// order.
pub fn read_profiles<R: Read>(input: &mut R) -> Result<Vec<Profile>> {
    let endian = read_magic(input, H3P_MAGIC)?;
    let mut cur = Cursor { input, endian };
    let mut out = Vec::new();
    loop {
        match read_profile_record(&mut cur) {
            Ok(profile) => out.push(profile),
            Err(PHmmError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

/// Write a `.h3p` binary full-profile stream.
pub fn write_profiles<W: Write>(out: &mut W, profiles: &[Profile]) -> Result<()> {
    write_magic(out, H3P_MAGIC)?;
    for profile in profiles {
        write_profile(out, profile)?;
    }
    Ok(())
}

/// One model's name and its byte offsets into the `.h3m`/`.h3f`/`.h3p`
/// sibling files, as stored in `.h3i`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub name: String,
    pub offsets: Offsets,
}

/// Write the `.h3i` index: a name-keyed table of each model's byte offsets
/// into the other three pressed files.
pub fn write_index<W: Write>(out: &mut W, entries: &[IndexEntry]) -> Result<()> {
    write_magic(out, H3I_MAGIC)?;
    out.write_u32::<LittleEndian>(entries.len() as u32)?;
    for entry in entries {
        write_string(out, &entry.name)?;
        write_offsets(out, entry.offsets)?;
    }
    Ok(())
}

/// Read the `.h3i` index.
pub fn read_index<R: Read>(input: &mut R) -> Result<Vec<IndexEntry>> {
    let endian = read_magic(input, H3I_MAGIC)?;
    let mut cur = Cursor { input, endian };
    let n = cur.u32()? as usize;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let name = cur.string()?;
        let offsets = read_offsets(&mut cur)?;
        out.push(IndexEntry { name, offsets });
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::background::Background;
    use crate::rng::Randomness;
    use std::io::Cursor as IoCursor;

    #[test]
    fn hmm_roundtrips_through_binary() {
        let mut rng = Randomness::new(11);
        let mut hmm = Hmm::sample(Alphabet::Amino, 14, &mut rng).unwrap();
        hmm.set_evalue_parameters(EvalueParameters {
            m_mu: 1.0,
            m_lambda: 0.7,
            v_mu: 2.0,
            v_lambda: 0.7,
            f_tau: 3.0,
            f_lambda: 0.3,
        });
        hmm.meta_mut().accession = Some("PH00001".into());
        hmm.meta_mut().command_line = vec!["phmmer build".into()];

        let mut buf = Vec::new();
        write_hmms(&mut buf, std::slice::from_ref(&hmm)).unwrap();
        let mut back = read_hmms(&mut IoCursor::new(buf)).unwrap();
        assert_eq!(back.len(), 1);
        let restored = back.remove(0);
        assert_eq!(restored.m(), hmm.m());
        assert_eq!(restored.name(), hmm.name());
        assert_eq!(restored.meta().accession, hmm.meta().accession);
        assert_eq!(restored.evalue_parameters(), hmm.evalue_parameters());
        for node in 1..=hmm.m() {
            for c in 0..hmm.alphabet().k() {
                assert!((restored.match_emission(node)[c] - hmm.match_emission(node)[c]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn optimized_profile_roundtrips_through_binary() {
        let mut rng = Randomness::new(5);
        let hmm = Hmm::sample(Alphabet::Dna, 9, &mut rng).unwrap();
        let bg = Background::new(Alphabet::Dna, 200);
        let profile = Profile::configure(&hmm, &bg, 200, true, true).unwrap();
        let optimized = OptimizedProfile::from_profile(&profile).unwrap();

        let mut buf = Vec::new();
        write_optimized_profiles(&mut buf, std::slice::from_ref(&optimized)).unwrap();
        let mut back = read_optimized_profiles(&mut IoCursor::new(buf)).unwrap();
        assert_eq!(back.len(), 1);
        let restored = back.remove(0);
        assert_eq!(restored.m(), optimized.m());
        for residue in 0..hmm.alphabet().kp() {
            assert_eq!(restored.sbv().lane(residue), optimized.sbv().lane(residue));
            assert_eq!(restored.rbv().lane(residue), optimized.rbv().lane(residue));
        }
    }

    #[test]
    fn profile_roundtrips_through_binary() {
        let mut rng = Randomness::new(6);
        let hmm = Hmm::sample(Alphabet::Amino, 11, &mut rng).unwrap();
        let bg = Background::new(Alphabet::Amino, 300);
        let profile = Profile::configure(&hmm, &bg, 300, false, true).unwrap();

        let mut buf = Vec::new();
        write_profiles(&mut buf, std::slice::from_ref(&profile)).unwrap();
        let mut back = read_profiles(&mut IoCursor::new(buf)).unwrap();
        assert_eq!(back.len(), 1);
        let restored = back.remove(0);
        assert_eq!(restored.m(), profile.m());
        assert_eq!(restored.local(), profile.local());
        let sum: f64 = (1..=profile.m()).map(|k| restored.special().entry[k]).sum();
        let orig_sum: f64 = (1..=profile.m()).map(|k| profile.special().entry[k]).sum();
        assert!((sum - orig_sum).abs() < 1e-9);
    }

    #[test]
    fn index_roundtrips() {
        let entries = vec![
            IndexEntry {
                name: "modelA".into(),
                offsets: Offsets { model: 0, filter: 0, profile: 0 },
            },
            IndexEntry {
                name: "modelB".into(),
                offsets: Offsets { model: 512, filter: 256, profile: 1024 },
            },
        ];
        let mut buf = Vec::new();
        write_index(&mut buf, &entries).unwrap();
        let back = read_index(&mut IoCursor::new(buf)).unwrap();
        assert_eq!(back, entries);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0u8, 1, 2, 3];
        assert!(read_hmms(&mut IoCursor::new(buf)).is_err());
    }
}
