//! Builder for creating and preallocating the output file.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};

use super::writer::OutputFile;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Builder for a fresh output file. Call `preallocate` then `build`.
pub struct OutputFileBuilder {
    file: File,
    path: PathBuf,
}

impl OutputFileBuilder {
    /// Create the output file at `path`, truncating anything already there.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("failed to create output file: {}", path.display()))?;
        Ok(OutputFileBuilder {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Preallocate `size` bytes. On Unix tries `posix_fallocate` for real block
    /// allocation; falls back to `set_len` on failure or non-Unix.
    pub fn preallocate(&mut self, size: u64) -> Result<()> {
        #[cfg(unix)]
        {
            if size > 0 {
                let fd = self.file.as_raw_fd();
                let r = unsafe { libc::posix_fallocate(fd, 0, size as libc::off_t) };
                if r == 0 {
                    return Ok(());
                }
                tracing::debug!(errno = r, "posix_fallocate failed, falling back to set_len");
            }
        }
        self.file
            .set_len(size)
            .context("failed to preallocate output file")?;
        Ok(())
    }

    pub fn build(self) -> OutputFile {
        OutputFile::from_file_and_path(self.file, self.path)
    }
}
