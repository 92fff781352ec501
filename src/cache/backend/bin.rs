//! On-disk backend: framed binary records, gzip-compressed at close.
//!
//! The working file is a series of frames, each a four-byte little-endian
//! length followed by that many bytes of a bincode-encoded `Vec<Commit>`.
//! Every frame is a complete document, so appending new frames never
//! requires touching earlier ones; that redundancy is the price of an
//! append-only file. When the session ends the whole file is gzipped at
//! the fastest setting, and any sibling files left over from earlier
//! fingerprints are deleted.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::warn;

use crate::cache::{Backend, CommitHits};
use crate::error::Error;
use crate::git::Commit;

/// Largest encoded frame a single `add` may produce.
const MAX_FRAME_LEN: usize = 0x7FFF_FFFF;

pub struct BinBackend {
    dir: PathBuf,
    path: PathBuf,
    was_opened: bool,
    is_dirty: bool,
}

impl BinBackend {
    /// Backend storing at `<dir>/<fingerprint>.bin[.gz]`.
    pub fn new(dir: PathBuf, fingerprint: &str) -> BinBackend {
        let path = dir.join(format!("{fingerprint}.bin"));
        BinBackend {
            dir,
            path,
            was_opened: false,
            is_dirty: false,
        }
    }

    fn compressed_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".gz");
        PathBuf::from(name)
    }
}

impl Backend for BinBackend {
    fn name(&self) -> &'static str {
        "bin"
    }

    fn open(&mut self) -> Result<()> {
        self.was_opened = true;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("could not create cache dir {}", self.dir.display()))?;
        uncompress(&self.compressed_path(), &self.path)
    }

    fn close(&mut self) -> Result<()> {
        if self.is_dirty {
            compress(&self.path, &self.compressed_path())?;
        }

        if self.path.exists() {
            fs::remove_file(&self.path).with_context(|| {
                format!("could not remove working cache file {}", self.path.display())
            })?;
        }

        // Drop cache files for fingerprints that are no longer selected.
        let keep = self.compressed_path();
        if let Ok(entries) = fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path != keep {
                    if let Err(err) = fs::remove_file(&path) {
                        warn!("failed to delete old cache file: {err}");
                    }
                }
            }
        }

        Ok(())
    }

    fn get(&mut self, revs: &[String]) -> Result<CommitHits> {
        assert!(self.was_opened, "cache not yet open");

        let looking_for: HashSet<String> = revs.iter().cloned().collect();

        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                // No working file means nothing cached yet; not an error.
                return Ok(Box::new(std::iter::empty()));
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("could not open cache file {}", self.path.display())
                })
            }
        };

        Ok(Box::new(CachedCommits {
            reader: BufReader::new(file),
            pending: Vec::new().into_iter(),
            looking_for,
            seen: HashSet::new(),
            state: ReadState::Streaming,
        }))
    }

    fn add(&mut self, commits: &[Commit]) -> Result<()> {
        assert!(self.was_opened, "cache not yet open");
        self.is_dirty = true;

        let data = bincode::serialize(&commits.to_vec())
            .context("could not encode commits for cache")?;
        anyhow::ensure!(
            data.len() <= MAX_FRAME_LEN,
            "cannot add more than {MAX_FRAME_LEN} bytes to cache at once"
        );

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("could not open cache file {}", self.path.display()))?;
        let mut writer = BufWriter::new(file);

        writer
            .write_all(&(data.len() as u32).to_le_bytes())
            .and_then(|_| writer.write_all(&data))
            .and_then(|_| writer.flush())
            .context("could not append cache frame")?;

        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("could not clear cache dir {}", self.dir.display())),
        }
    }
}

enum ReadState {
    Streaming,
    Done,
}

/// Streams frames lazily, yielding only the requested commits and flagging
/// duplicates among them.
struct CachedCommits {
    reader: BufReader<File>,
    pending: std::vec::IntoIter<Commit>,
    looking_for: HashSet<String>,
    seen: HashSet<String>,
    state: ReadState,
}

impl CachedCommits {
    fn next_frame(&mut self) -> Result<Option<Vec<Commit>>> {
        let mut prefix = [0u8; 4];
        match self.reader.read_exact(&mut prefix) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err).context("could not read cache frame length"),
        }

        let len = u32::from_le_bytes(prefix) as usize;
        let mut data = vec![0u8; len];
        self.reader
            .read_exact(&mut data)
            .context("could not read cache frame")?;

        let commits: Vec<Commit> =
            bincode::deserialize(&data).context("could not decode cache frame")?;
        Ok(Some(commits))
    }
}

impl Iterator for CachedCommits {
    type Item = Result<Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if matches!(self.state, ReadState::Done) {
                return None;
            }

            for commit in self.pending.by_ref() {
                if !self.looking_for.contains(&commit.hash) {
                    continue;
                }

                if !self.seen.insert(commit.hash.clone()) {
                    self.state = ReadState::Done;
                    return Some(Err(
                        Error::DuplicateCacheEntry(commit.hash.clone()).into()
                    ));
                }

                return Some(Ok(commit));
            }

            match self.next_frame() {
                Ok(Some(commits)) => self.pending = commits.into_iter(),
                Ok(None) => {
                    self.state = ReadState::Done;
                    return None;
                }
                Err(err) => {
                    self.state = ReadState::Done;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Inflate the gzipped file to the working location, if it exists.
fn uncompress(source: &Path, target: &Path) -> Result<()> {
    let file = match File::open(source) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("could not open {}", source.display()))
        }
    };

    let mut decoder = GzDecoder::new(BufReader::new(file));
    let out = File::create(target)
        .with_context(|| format!("could not create {}", target.display()))?;
    let mut writer = BufWriter::new(out);

    io::copy(&mut decoder, &mut writer).context("could not uncompress cache file")?;
    writer.flush().context("could not flush cache file")?;
    Ok(())
}

/// Deflate the working file to the gzipped location.
fn compress(source: &Path, target: &Path) -> Result<()> {
    let file = match File::open(source) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("could not open {}", source.display()))
        }
    };

    let out = File::create(target)
        .with_context(|| format!("could not create {}", target.display()))?;
    let mut reader = BufReader::new(file);
    let mut encoder = GzEncoder::new(BufWriter::new(out), Compression::fast());

    io::copy(&mut reader, &mut encoder).context("could not compress cache file")?;
    encoder
        .finish()
        .context("could not finish compressing cache file")?
        .flush()
        .context("could not flush compressed cache file")?;
    Ok(())
}
