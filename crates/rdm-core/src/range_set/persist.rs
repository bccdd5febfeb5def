//! Double-buffered range metadata on disk.
//!
//! Two slots, `<output>.meta0` and `<output>.meta1`, are written alternately so
//! one of them always holds a complete earlier snapshot even if the process
//! dies halfway through a write. Each slot carries a generation counter; the
//! valid slot with the highest generation wins on load. A slot also records
//! the server's validator (ETag or Last-Modified) so a resource that changed
//! without changing size is not resumed.
//!
//! Slot layout (little-endian):
//!
//! ```text
//! magic "RDMM" | version u8 | generation u64 | file_size u64
//! | validator_len u32 | validator (utf-8, empty = none) | count u64
//! | count x (start u64, end u64) | sha256 of everything before it
//! ```

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::range::Range;

/// Current on-disk format version.
pub const METADATA_VERSION: u8 = 2;

const MAGIC: &[u8; 4] = b"RDMM";
const HEADER_LEN: usize = 4 + 1 + 8 + 8 + 4 + 8;
const DIGEST_LEN: usize = 32;
const SLOT_SUFFIXES: [&str; 2] = [".meta0", ".meta1"];

/// Why a metadata slot could not be used.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata I/O: {0}")]
    Io(#[from] io::Error),
    #[error("bad metadata magic")]
    BadMagic,
    #[error("unsupported metadata version {0}")]
    UnsupportedVersion(u8),
    #[error("metadata truncated")]
    Truncated,
    #[error("metadata digest mismatch")]
    DigestMismatch,
    #[error("metadata describes a {found}-byte resource, expected {expected}")]
    FileSizeMismatch { expected: u64, found: u64 },
    #[error("invalid range {start}-{end} in metadata")]
    InvalidRange { start: u64, end: u64 },
    #[error("resource changed since metadata was written (validator {found:?}, now {expected:?})")]
    ValidatorMismatch {
        expected: Option<String>,
        found: Option<String>,
    },
}

/// Decoded contents of one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Snapshot {
    pub(crate) generation: u64,
    pub(crate) file_size: u64,
    pub(crate) validator: Option<String>,
    pub(crate) ranges: Vec<Range>,
}

/// Alternating pair of metadata files for one output file.
#[derive(Debug)]
pub struct MetadataStore {
    paths: [PathBuf; 2],
    next_slot: usize,
    generation: u64,
    validator: Option<String>,
}

impl MetadataStore {
    /// Slots next to the output file: `file.iso.meta0` and `file.iso.meta1`.
    pub fn for_output(output: &Path) -> Self {
        let paths = SLOT_SUFFIXES.map(|suffix| {
            let mut o = output.as_os_str().to_owned();
            o.push(suffix);
            PathBuf::from(o)
        });
        MetadataStore {
            paths,
            next_slot: 0,
            generation: 0,
            validator: None,
        }
    }

    /// Validator of the remote resource. Saved with every snapshot; `load`
    /// rejects slots written under a different one.
    pub fn with_validator(mut self, validator: Option<String>) -> Self {
        self.validator = validator;
        self
    }

    pub fn paths(&self) -> &[PathBuf; 2] {
        &self.paths
    }

    /// True if either slot exists on disk.
    pub fn exists(&self) -> bool {
        self.paths.iter().any(|p| p.exists())
    }

    /// Loads the newest valid snapshot for a resource of `file_size` bytes.
    ///
    /// Unreadable or corrupt slots are skipped; returns `None` when neither slot
    /// is usable. The next `save` targets the slot that did not win.
    pub fn load(&mut self, file_size: u64) -> Option<Vec<Range>> {
        let mut best: Option<(usize, Snapshot)> = None;
        for (slot, path) in self.paths.iter().enumerate() {
            match read_slot(path, file_size, self.validator.as_deref()) {
                Ok(snap) => {
                    let newer = best
                        .as_ref()
                        .map_or(true, |(_, b)| snap.generation > b.generation);
                    if newer {
                        best = Some((slot, snap));
                    }
                }
                Err(MetadataError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring unusable range metadata");
                }
            }
        }

        match best {
            Some((slot, snap)) => {
                tracing::debug!(
                    path = %self.paths[slot].display(),
                    generation = snap.generation,
                    "loaded range metadata"
                );
                self.generation = snap.generation;
                self.next_slot = 1 - slot;
                Some(snap.ranges)
            }
            None => {
                self.generation = 0;
                self.next_slot = 0;
                None
            }
        }
    }

    /// Writes `ranges` to the slot not written last, syncs it, then flips slots.
    pub fn save(&mut self, file_size: u64, ranges: &[Range]) -> io::Result<()> {
        let generation = self.generation + 1;
        let bytes = encode(generation, file_size, self.validator.as_deref(), ranges);
        let path = &self.paths[self.next_slot];

        let mut file = File::create(path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        self.generation = generation;
        self.next_slot = 1 - self.next_slot;
        Ok(())
    }

    /// Deletes both slots; missing files are fine.
    pub fn remove(&self) -> io::Result<()> {
        for path in &self.paths {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn read_slot(
    path: &Path,
    file_size: u64,
    validator: Option<&str>,
) -> Result<Snapshot, MetadataError> {
    let bytes = fs::read(path)?;
    let snap = decode(&bytes)?;
    if snap.file_size != file_size {
        return Err(MetadataError::FileSizeMismatch {
            expected: file_size,
            found: snap.file_size,
        });
    }
    if snap.validator.as_deref() != validator {
        return Err(MetadataError::ValidatorMismatch {
            expected: validator.map(String::from),
            found: snap.validator,
        });
    }
    if let Some(last) = snap.ranges.last() {
        if last.end >= file_size {
            return Err(MetadataError::InvalidRange {
                start: last.start,
                end: last.end,
            });
        }
    }
    Ok(snap)
}

pub(crate) fn encode(
    generation: u64,
    file_size: u64,
    validator: Option<&str>,
    ranges: &[Range],
) -> Vec<u8> {
    let validator = validator.unwrap_or("").as_bytes();
    let mut out =
        Vec::with_capacity(HEADER_LEN + validator.len() + ranges.len() * 16 + DIGEST_LEN);
    out.extend_from_slice(MAGIC);
    out.push(METADATA_VERSION);
    out.extend_from_slice(&generation.to_le_bytes());
    out.extend_from_slice(&file_size.to_le_bytes());
    out.extend_from_slice(&(validator.len() as u32).to_le_bytes());
    out.extend_from_slice(validator);
    out.extend_from_slice(&(ranges.len() as u64).to_le_bytes());
    for r in ranges {
        out.extend_from_slice(&r.start.to_le_bytes());
        out.extend_from_slice(&r.end.to_le_bytes());
    }
    let digest = Sha256::digest(&out);
    out.extend_from_slice(&digest);
    out
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Snapshot, MetadataError> {
    if bytes.len() < HEADER_LEN + DIGEST_LEN {
        return Err(MetadataError::Truncated);
    }
    if &bytes[..4] != MAGIC {
        return Err(MetadataError::BadMagic);
    }
    let (body, digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
    if Sha256::digest(body).as_slice() != digest {
        return Err(MetadataError::DigestMismatch);
    }

    let mut cur = Cursor { buf: body, pos: 4 };
    let version = cur.take(1)?[0];
    if version != METADATA_VERSION {
        return Err(MetadataError::UnsupportedVersion(version));
    }
    let generation = cur.u64()?;
    let file_size = cur.u64()?;
    let validator_len = cur.u32()? as usize;
    let validator = match cur.take(validator_len)? {
        [] => None,
        raw => Some(
            std::str::from_utf8(raw)
                .map_err(|_| MetadataError::Truncated)?
                .to_string(),
        ),
    };
    let count = cur.u64()?;
    if count != (cur.remaining() / 16) as u64 || cur.remaining() % 16 != 0 {
        return Err(MetadataError::Truncated);
    }

    let mut ranges: Vec<Range> = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let start = cur.u64()?;
        let end = cur.u64()?;
        // Stored ranges are coalesced: they never overlap or touch.
        let touches = ranges
            .last()
            .map_or(false, |prev| start <= prev.end.saturating_add(1));
        if start > end || touches {
            return Err(MetadataError::InvalidRange { start, end });
        }
        ranges.push(Range::new(start, end));
    }

    Ok(Snapshot {
        generation,
        file_size,
        validator,
        ranges,
    })
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], MetadataError> {
        if self.remaining() < n {
            return Err(MetadataError::Truncated);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u32(&mut self) -> Result<u32, MetadataError> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(b))
    }

    fn u64(&mut self) -> Result<u64, MetadataError> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(b))
    }
}
