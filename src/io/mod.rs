//! On-disk HMM formats: the line-oriented text format ([`text`]) and the
//! binary pressed-database format ([`pressed`]), plus forward-iterator
//! readers over both.

pub mod pressed;
pub mod text;

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::{PHmmError, Result};
use crate::hmm::Hmm;
use crate::optimized_profile::OptimizedProfile;

/// A forward iterator over models in a textual HMM file, with `rewind()`
/// support and idempotent closing.
///
/// Holds the whole file path rather than a dangling reader so `rewind()`
/// can reopen it; `HMMFile` is a cursor over a resource, not the resource
/// itself.
pub struct HMMFile {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    closed: bool,
}

impl HMMFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            path,
            reader: Some(BufReader::new(file)),
            closed: false,
        })
    }

    /// True if this file begins with a pressed-database magic number rather
    /// than the textual format's magic line.
    pub fn is_pressed(path: impl AsRef<Path>) -> Result<bool> {
        let mut file = File::open(path)?;
        let mut buf = [0u8; 4];
        if file.read_exact(&mut buf).is_err() {
            return Ok(false);
        }
        let magic = u32::from_le_bytes(buf);
        let magic_be = u32::from_be_bytes(buf);
        Ok([pressed::H3M_MAGIC, pressed::H3F_MAGIC, pressed::H3P_MAGIC, pressed::H3I_MAGIC]
            .iter()
            .any(|m| *m == magic || *m == magic_be))
    }

    /// Read the next model, or `None` at end of file.
    pub fn next_hmm(&mut self) -> Result<Option<Hmm>> {
        if self.closed {
            return Err(PHmmError::InvalidFormat("read from a closed HMMFile".into()));
        }
        let reader = self.reader.as_mut().expect("open reader while not closed");
        if reader.fill_buf()?.is_empty() {
            return Ok(None);
        }
        Ok(Some(text::read(reader)?))
    }

    /// Reposition back to the start of the file.
    pub fn rewind(&mut self) -> Result<()> {
        let file = File::open(&self.path)?;
        self.reader = Some(BufReader::new(file));
        self.closed = false;
        Ok(())
    }

    /// Release the underlying file descriptor. Calling this more than once
    /// is a no-op.
    pub fn close(&mut self) {
        self.reader = None;
        self.closed = true;
    }

    pub fn closed(&self) -> bool {
        self.closed
    }
}

impl Drop for HMMFile {
    fn drop(&mut self) {
        self.close();
    }
}

impl Iterator for HMMFile {
    type Item = Result<Hmm>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_hmm() {
            Ok(Some(hmm)) => Some(Ok(hmm)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// A forward iterator over a pressed binary database's `.h3f` filter
/// profiles, with `rewind()` support and idempotent closing.
///
/// The whole `.h3f` stream is decoded eagerly on open/rewind (§6 notes this
/// as a deliberate simplification versus true per-record lazy decoding) and
/// served from an in-memory cursor.
pub struct HMMPressedFile {
    path: PathBuf,
    profiles: Vec<OptimizedProfile>,
    position: usize,
    closed: bool,
}

impl HMMPressedFile {
    pub fn open(h3f_path: impl AsRef<Path>) -> Result<Self> {
        let path = h3f_path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let profiles = pressed::read_optimized_profiles(&mut file)?;
        Ok(Self {
            path,
            profiles,
            position: 0,
            closed: false,
        })
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Read the next filter profile, or `None` when exhausted.
    pub fn next_profile(&mut self) -> Result<Option<OptimizedProfile>> {
        if self.closed {
            return Err(PHmmError::InvalidFormat("read from a closed HMMPressedFile".into()));
        }
        if self.position >= self.profiles.len() {
            return Ok(None);
        }
        let profile = self.profiles[self.position].clone();
        self.position += 1;
        Ok(Some(profile))
    }

    pub fn rewind(&mut self) -> Result<()> {
        let mut file = File::open(&self.path)?;
        self.profiles = pressed::read_optimized_profiles(&mut file)?;
        self.position = 0;
        self.closed = false;
        Ok(())
    }

    pub fn close(&mut self) {
        self.profiles.clear();
        self.position = 0;
        self.closed = true;
    }

    pub fn closed(&self) -> bool {
        self.closed
    }
}

impl Drop for HMMPressedFile {
    fn drop(&mut self) {
        self.close();
    }
}

impl Iterator for HMMPressedFile {
    type Item = Result<OptimizedProfile>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_profile() {
            Ok(Some(profile)) => Some(Ok(profile)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Write a textual HMM file containing a single model (the common case for
/// `hmmbuild`-style single-model output).
pub fn write_text_file(path: impl AsRef<Path>, hmm: &Hmm) -> Result<()> {
    let mut out = File::create(path)?;
    text::write(hmm, &mut out)
}

/// Press a set of models into the four sibling pressed-database files
/// (`<stem>.h3m`, `.h3f`, `.h3i`, `.h3p`), recording each model's byte
/// offsets in the index.
pub fn press(stem: impl AsRef<Path>, hmms: &[Hmm], profiles: &[crate::profile::Profile], optimized: &[OptimizedProfile]) -> Result<()> {
    let stem = stem.as_ref();
    if hmms.len() != profiles.len() || hmms.len() != optimized.len() {
        return Err(PHmmError::InvalidFormat(
            "press requires equal-length hmms/profiles/optimized slices".into(),
        ));
    }

    let mut h3m = File::create(stem.with_extension("h3m"))?;
    let mut h3f = File::create(stem.with_extension("h3f"))?;
    let mut h3p = File::create(stem.with_extension("h3p"))?;
    pressed::write_magic(&mut h3m, pressed::H3M_MAGIC)?;
    pressed::write_magic(&mut h3f, pressed::H3F_MAGIC)?;
    pressed::write_magic(&mut h3p, pressed::H3P_MAGIC)?;

    let mut entries = Vec::with_capacity(hmms.len());
    for ((hmm, profile), optimized) in hmms.iter().zip(profiles).zip(optimized) {
        let model_offset = stream_len(&h3m)?;
        pressed::write_hmm(&mut h3m, hmm)?;
        let filter_offset = stream_len(&h3f)?;
        pressed::write_optimized_profile(&mut h3f, optimized)?;
        let profile_offset = stream_len(&h3p)?;
        pressed::write_profile(&mut h3p, profile)?;
        entries.push(pressed::IndexEntry {
            name: hmm.name().to_string(),
            offsets: crate::metadata::Offsets {
                model: model_offset,
                filter: filter_offset,
                profile: profile_offset,
            },
        });
    }

    let mut h3i = File::create(stem.with_extension("h3i"))?;
    pressed::write_index(&mut h3i, &entries)?;
    Ok(())
}

fn stream_len(file: &File) -> Result<u64> {
    Ok(file.metadata()?.len())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::alphabet::Alphabet;
    use crate::background::Background;
    use crate::profile::Profile;
    use crate::rng::Randomness;
    use tempfile::tempdir;

    #[test]
    fn text_file_roundtrips_and_closes() {
        let mut rng = Randomness::new(3);
        let hmm = Hmm::sample(Alphabet::Dna, 6, &mut rng).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.hmm");
        write_text_file(&path, &hmm).unwrap();

        let mut file = HMMFile::open(&path).unwrap();
        let read_back = file.next_hmm().unwrap().unwrap();
        assert_eq!(read_back.m(), hmm.m());
        assert!(file.next_hmm().unwrap().is_none());

        file.close();
        assert!(file.closed());
        assert!(file.next_hmm().is_err());

        file.rewind().unwrap();
        assert!(!file.closed());
        assert!(file.next_hmm().unwrap().is_some());
    }

    #[test]
    fn press_then_open_pressed_file() {
        let mut rng = Randomness::new(4);
        let hmm = Hmm::sample(Alphabet::Amino, 8, &mut rng).unwrap();
        let bg = Background::new(Alphabet::Amino, 250);
        let profile = Profile::configure(&hmm, &bg, 250, true, true).unwrap();
        let optimized = OptimizedProfile::from_profile(&profile).unwrap();

        let dir = tempdir().unwrap();
        let stem = dir.path().join("db");
        press(&stem, &[hmm.clone()], &[profile], &[optimized]).unwrap();

        assert!(HMMFile::is_pressed(stem.with_extension("h3m")).unwrap());

        let mut pressed_file = HMMPressedFile::open(stem.with_extension("h3f")).unwrap();
        assert_eq!(pressed_file.len(), 1);
        let profile = pressed_file.next_profile().unwrap().unwrap();
        assert_eq!(profile.m(), hmm.m());
        assert!(pressed_file.next_profile().unwrap().is_none());

        let index = pressed::read_index(&mut File::open(stem.with_extension("h3i")).unwrap()).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].name, hmm.name());
    }
}
