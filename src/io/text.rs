//! Line-oriented, versioned, magic-prefixed HMM text format (§6): one
//! header block of tagged records, then an `HMM` section of columnar
//! per-node emission/transition probabilities, terminated by `//`.

use std::io::{BufRead, Write};

use crate::alphabet::Alphabet;
use crate::error::{PHmmError, Result};
use crate::hmm::{Hmm, TRANSITION_KINDS};
use crate::metadata::{Cutoffs, EvalueParameters, ScorePair};

const MAGIC: &str = "HMMPHMM/f";

/// Serialize `hmm` into the text format. Round-trippable via [`read`].
pub fn write<W: Write>(hmm: &Hmm, out: &mut W) -> Result<()> {
    writeln!(out, "{MAGIC} [libphmm]")?;
    writeln!(out, "NAME  {}", hmm.name())?;
    if let Some(acc) = &hmm.meta().accession {
        writeln!(out, "ACC   {acc}")?;
    }
    if let Some(desc) = &hmm.meta().description {
        writeln!(out, "DESC  {desc}")?;
    }
    writeln!(out, "LENG  {}", hmm.m())?;
    writeln!(out, "ALPH  {}", hmm.alphabet().name())?;
    if let Some(nseq) = hmm.meta().nseq {
        writeln!(out, "NSEQ  {nseq}")?;
    }
    if let Some(effn) = hmm.meta().nseq_effective {
        writeln!(out, "EFFN  {effn}")?;
    }
    if let Some(checksum) = hmm.meta().checksum {
        writeln!(out, "CKSUM {checksum}")?;
    }
    for (tag, pair) in [
        ("GA", hmm.cutoffs().gathering),
        ("TC", hmm.cutoffs().trusted),
        ("NC", hmm.cutoffs().noise),
    ] {
        if let Some(p) = pair {
            writeln!(out, "{tag}    {} {}", p.score1, p.score2)?;
        }
    }
    if let Some(params) = hmm.evalue_parameters() {
        writeln!(out, "STATS LOCAL MSV     {} {}", params.m_mu, params.m_lambda)?;
        writeln!(out, "STATS LOCAL VITERBI {} {}", params.v_mu, params.v_lambda)?;
        writeln!(out, "STATS LOCAL FORWARD {} {}", params.f_tau, params.f_lambda)?;
    }
    if let Some(composition) = &hmm.meta().composition {
        writeln!(out, "COMPO {}", join(composition))?;
    }

    writeln!(out, "HMM")?;
    writeln!(out, "          {}", join(hmm.insert_emission(0)))?;
    writeln!(out, "          {}", join_transitions(hmm.transitions(0)))?;
    for node in 1..=hmm.m() {
        writeln!(out, "  {:<6} {}", node, join(hmm.match_emission(node)))?;
        writeln!(out, "          {}", join(hmm.insert_emission(node)))?;
        writeln!(out, "          {}", join_transitions(hmm.transitions(node)))?;
    }
    writeln!(out, "//")?;
    Ok(())
}

fn join(values: &[f64]) -> String {
    values.iter().map(|v| format!("{v:.6}")).collect::<Vec<_>>().join(" ")
}

fn join_transitions(values: &[f64; 7]) -> String {
    join(values)
}

/// Parse the text format written by [`write`].
pub fn read<R: BufRead>(input: &mut R) -> Result<Hmm> {
    let mut lines = input.lines();
    let magic = lines
        .next()
        .ok_or_else(|| PHmmError::InvalidFormat("empty HMM file".into()))??;
    if !magic.starts_with(MAGIC) {
        return Err(PHmmError::InvalidFormat(format!("unrecognized magic line {magic:?}")));
    }

    let mut name = None;
    let mut accession = None;
    let mut description = None;
    let mut m = None;
    let mut alphabet = None;
    let mut nseq = None;
    let mut nseq_effective = None;
    let mut checksum = None;
    let mut composition = None;
    let mut cutoffs = Cutoffs::default();
    let mut m_mu = None;
    let mut m_lambda = None;
    let mut v_mu = None;
    let mut v_lambda = None;
    let mut f_tau = None;
    let mut f_lambda = None;

    loop {
        let line = lines
            .next()
            .ok_or_else(|| PHmmError::InvalidFormat("HMM file ended before HMM section".into()))??;
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("NAME") => name = Some(fields.collect::<Vec<_>>().join(" ")),
            Some("ACC") => accession = Some(fields.collect::<Vec<_>>().join(" ")),
            Some("DESC") => description = Some(fields.collect::<Vec<_>>().join(" ")),
            Some("LENG") => m = Some(parse_usize(fields.next(), "LENG")?),
            Some("ALPH") => alphabet = Some(Alphabet::parse(fields.next().unwrap_or(""))?),
            Some("NSEQ") => nseq = Some(parse_usize(fields.next(), "NSEQ")?),
            Some("EFFN") => nseq_effective = Some(parse_f64(fields.next(), "EFFN")?),
            Some("CKSUM") => checksum = Some(parse_usize(fields.next(), "CKSUM")? as u32),
            Some("COMPO") => composition = Some(parse_f64_list(fields)?),
            Some("GA") => cutoffs.gathering = Some(parse_score_pair(fields)?),
            Some("TC") => cutoffs.trusted = Some(parse_score_pair(fields)?),
            Some("NC") => cutoffs.noise = Some(parse_score_pair(fields)?),
            Some("STATS") => {
                let kind = fields.next().unwrap_or("");
                let dist = fields.next().unwrap_or("");
                let a = parse_f64(fields.next(), "STATS")?;
                let b = parse_f64(fields.next(), "STATS")?;
                if kind == "LOCAL" {
                    match dist {
                        "MSV" => {
                            m_mu = Some(a);
                            m_lambda = Some(b);
                        }
                        "VITERBI" => {
                            v_mu = Some(a);
                            v_lambda = Some(b);
                        }
                        "FORWARD" => {
                            f_tau = Some(a);
                            f_lambda = Some(b);
                        }
                        _ => {}
                    }
                }
            }
            Some("HMM") => break,
            Some(other) => {
                return Err(PHmmError::InvalidFormat(format!("unknown header tag {other:?}")));
            }
            None => {}
        }
    }

    let name = name.ok_or_else(|| PHmmError::InvalidFormat("missing NAME".into()))?;
    let m = m.ok_or_else(|| PHmmError::InvalidFormat("missing LENG".into()))?;
    let alphabet = alphabet.ok_or_else(|| PHmmError::InvalidFormat("missing ALPH".into()))?;

    let mut hmm = Hmm::zeroed(alphabet, m, name)?;
    *hmm.meta_mut() = crate::hmm::HmmMetadata {
        accession,
        description,
        command_line: Vec::new(),
        creation_time: None,
        composition,
        checksum,
        consensus: None,
        consensus_structure: None,
        consensus_accessibility: None,
        nseq,
        nseq_effective,
    };
    *hmm.cutoffs_mut() = cutoffs;
    if let (Some(m_mu), Some(m_lambda), Some(v_mu), Some(v_lambda), Some(f_tau), Some(f_lambda)) =
        (m_mu, m_lambda, v_mu, v_lambda, f_tau, f_lambda)
    {
        hmm.set_evalue_parameters(EvalueParameters {
            m_mu,
            m_lambda,
            v_mu,
            v_lambda,
            f_tau,
            f_lambda,
        });
    }

    // Node 0: insert emissions, then transitions.
    let insert0 = lines.next().ok_or_else(|| PHmmError::InvalidFormat("truncated HMM section".into()))??;
    parse_f64_list(insert0.split_whitespace())?
        .into_iter()
        .enumerate()
        .for_each(|(c, v)| hmm.insert_emission_mut(0)[c] = v);
    let trans0 = lines.next().ok_or_else(|| PHmmError::InvalidFormat("truncated HMM section".into()))??;
    set_transitions(&mut hmm, 0, &parse_f64_list(trans0.split_whitespace())?)?;

    for node in 1..=m {
        let match_line = lines
            .next()
            .ok_or_else(|| PHmmError::InvalidFormat(format!("truncated HMM section at node {node}")))??;
        let mut fields = match_line.split_whitespace();
        let tag = fields.next().unwrap_or("");
        if tag.parse::<usize>().ok() != Some(node) {
            return Err(PHmmError::InvalidFormat(format!("expected node {node}, found {tag:?}")));
        }
        let match_values = parse_f64_list(fields)?;
        for (c, v) in match_values.into_iter().enumerate() {
            hmm.match_emission_mut(node)[c] = v;
        }

        let insert_line = lines
            .next()
            .ok_or_else(|| PHmmError::InvalidFormat(format!("truncated HMM section at node {node}")))??;
        for (c, v) in parse_f64_list(insert_line.split_whitespace())?.into_iter().enumerate() {
            hmm.insert_emission_mut(node)[c] = v;
        }

        let trans_line = lines
            .next()
            .ok_or_else(|| PHmmError::InvalidFormat(format!("truncated HMM section at node {node}")))??;
        set_transitions(&mut hmm, node, &parse_f64_list(trans_line.split_whitespace())?)?;
    }

    let terminator = lines.next().ok_or_else(|| PHmmError::InvalidFormat("missing // terminator".into()))??;
    if terminator.trim() != "//" {
        return Err(PHmmError::InvalidFormat(format!("expected // terminator, found {terminator:?}")));
    }

    Ok(hmm)
}

fn set_transitions(hmm: &mut Hmm, node: usize, values: &[f64]) -> Result<()> {
    if values.len() != 7 {
        return Err(PHmmError::InvalidFormat(format!(
            "node {node}: expected 7 transition values, got {}",
            values.len()
        )));
    }
    for (kind, &v) in TRANSITION_KINDS.iter().zip(values) {
        hmm.set_transition(node, *kind, v);
    }
    Ok(())
}

fn parse_usize(field: Option<&str>, tag: &str) -> Result<usize> {
    field
        .ok_or_else(|| PHmmError::InvalidFormat(format!("{tag}: missing value")))?
        .parse()
        .map_err(|_| PHmmError::InvalidFormat(format!("{tag}: not an integer")))
}

fn parse_f64(field: Option<&str>, tag: &str) -> Result<f64> {
    field
        .ok_or_else(|| PHmmError::InvalidFormat(format!("{tag}: missing value")))?
        .parse()
        .map_err(|_| PHmmError::InvalidFormat(format!("{tag}: not a number")))
}

fn parse_f64_list<'a>(fields: impl Iterator<Item = &'a str>) -> Result<Vec<f64>> {
    fields
        .map(|f| f.parse::<f64>().map_err(|_| PHmmError::InvalidFormat(format!("{f:?} is not a number"))))
        .collect()
}

fn parse_score_pair<'a>(mut fields: impl Iterator<Item = &'a str>) -> Result<ScorePair> {
    let score1 = parse_f64(fields.next(), "cutoff")?;
    let score2 = parse_f64(fields.next(), "cutoff")?;
    Ok(ScorePair { score1, score2 })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rng::Randomness;
    use std::io::Cursor;

    #[test]
    fn roundtrip_sampled_hmm() {
        let mut rng = Randomness::new(11);
        let mut hmm = Hmm::sample(Alphabet::Dna, 5, &mut rng).unwrap();
        hmm.set_evalue_parameters(EvalueParameters {
            m_mu: 1.0,
            m_lambda: 0.7,
            v_mu: 1.1,
            v_lambda: 0.7,
            f_tau: 2.0,
            f_lambda: 0.69,
        });
        hmm.set_composition(vec![0.25; 4]).unwrap();
        hmm.cutoffs_mut().gathering = Some(ScorePair { score1: 25.0, score2: 20.0 });

        let mut buf = Vec::new();
        write(&hmm, &mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        let read_back = read(&mut cursor).unwrap();

        assert_eq!(read_back.m(), hmm.m());
        assert_eq!(read_back.name(), hmm.name());
        assert_eq!(read_back.alphabet(), hmm.alphabet());
        for node in 1..=hmm.m() {
            for c in 0..hmm.alphabet().k() {
                assert!((read_back.match_emission(node)[c] - hmm.match_emission(node)[c]).abs() < 1e-6);
            }
        }
        let params = read_back.evalue_parameters().unwrap();
        assert!((params.m_mu - 1.0).abs() < 1e-9);
        assert_eq!(read_back.cutoffs().gathering.unwrap().score1, 25.0);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut cursor = Cursor::new(b"NOT-AN-HMM\n".to_vec());
        assert!(matches!(read(&mut cursor), Err(PHmmError::InvalidFormat(_))));
    }
}
