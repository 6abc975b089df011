//! FASTA loading for the CLI. Parsing is an external collaborator at the
//! library boundary (§1); this binary leans on `bio::io::fasta` the way the
//! teacher leans on `bio_types`/`noodles` for its own file formats.

use std::path::Path;

use bio::io::fasta::Reader;
use eyre::{eyre, Context, Result};
use libphmm::{Alphabet, DigitalSequence};

pub fn read_block(path: impl AsRef<Path>, alphabet: Alphabet) -> Result<Vec<DigitalSequence>> {
    let path = path.as_ref();
    let reader = Reader::from_file(path).wrap_err_with(|| format!("opening {}", path.display()))?;
    let mut out = Vec::new();
    for record in reader.records() {
        let record = record.wrap_err_with(|| format!("reading record from {}", path.display()))?;
        let seq = DigitalSequence::digitize(alphabet, record.id(), record.seq())?;
        out.push(seq);
    }
    Ok(out)
}

pub fn read_first(path: impl AsRef<Path>, alphabet: Alphabet) -> Result<DigitalSequence> {
    let path = path.as_ref();
    read_block(path, alphabet)?
        .into_iter()
        .next()
        .ok_or_else(|| eyre!("{} has no sequences", path.display()))
}
