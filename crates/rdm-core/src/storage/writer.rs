//! Positioned writer for the output file.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
#[cfg(unix)]
use std::os::unix::fs::FileExt;

/// The output file, owned by the single writer thread.
#[derive(Debug)]
pub struct OutputFile {
    file: File,
    path: PathBuf,
}

impl OutputFile {
    pub(crate) fn from_file_and_path(file: File, path: PathBuf) -> Self {
        Self { file, path }
    }

    /// Open an existing output file for resume (read+write, no truncation).
    pub fn open_existing(path: &Path) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open existing output file: {}", path.display()))?;
        Ok(OutputFile {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Write all of `data` at `offset`. Does not move the file cursor.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.file
            .write_all_at(data, offset)
            .with_context(|| format!("write of {} bytes at {} failed", data.len(), offset))
    }

    /// Seek + write fallback for non-Unix targets.
    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = self.file.try_clone()?;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)
            .with_context(|| format!("write of {} bytes at {} failed", data.len(), offset))
    }

    /// Flush file data (not metadata) to disk.
    pub fn sync_data(&self) -> Result<()> {
        self.file.sync_data().context("output sync_data failed")
    }

    /// Flush data and metadata to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().context("output sync failed")
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata().context("output metadata failed")?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
