//! Output file and range set for one run: resume when the file and its
//! metadata agree with the probed size and validator, otherwise start fresh.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::range_set::{MetadataStore, RangeSet};
use crate::storage::{OutputFile, OutputFileBuilder};

pub(super) fn prepare_output(
    path: &Path,
    file_size: u64,
    range_size: u64,
    validator: Option<&str>,
) -> Result<(OutputFile, RangeSet)> {
    let store = MetadataStore::for_output(path).with_validator(validator.map(String::from));

    if store.exists() {
        match fs::metadata(path) {
            Ok(meta) if meta.len() == file_size => {
                let ranges = RangeSet::open(file_size, range_size, store);
                if ranges.is_resumed() {
                    let file = OutputFile::open_existing(path)?;
                    info!(
                        path = %path.display(),
                        downloaded = ranges.bytes_downloaded(),
                        "resuming existing download"
                    );
                    return Ok((file, ranges));
                }
                ranges
                    .discard_metadata()
                    .context("failed to remove unusable range metadata")?;
                return Ok((create_fresh(path, file_size, &ranges)?, ranges));
            }
            Ok(meta) => warn!(
                path = %path.display(),
                found = meta.len(),
                expected = file_size,
                "output size changed; restarting download"
            ),
            Err(_) => warn!(
                path = %path.display(),
                "output file missing; restarting download"
            ),
        }
        store
            .remove()
            .context("failed to remove stale range metadata")?;
    }

    let ranges = RangeSet::open(file_size, range_size, store);
    let file = create_fresh(path, file_size, &ranges)?;
    Ok((file, ranges))
}

fn create_fresh(path: &Path, file_size: u64, ranges: &RangeSet) -> Result<OutputFile> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut builder = OutputFileBuilder::create(path)?;
    builder.preallocate(file_size)?;
    let file = builder.build();
    // Metadata exists from the start, so an interrupted fresh run resumes.
    ranges
        .persist()
        .context("failed to write initial range metadata")?;
    debug!(path = %path.display(), size = file_size, "created output file");
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range_set::Range;

    #[test]
    fn fresh_when_nothing_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let (file, ranges) = prepare_output(&path, 100, 10, None).unwrap();
        assert!(!ranges.is_resumed());
        assert_eq!(ranges.snapshot(), vec![Range::new(0, 99)]);
        assert_eq!(file.len().unwrap(), 100);
        assert!(MetadataStore::for_output(&path).exists());
    }

    #[test]
    fn resumes_when_file_and_metadata_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        {
            let (file, ranges) = prepare_output(&path, 100, 10, None).unwrap();
            file.write_at(0, &[7u8; 40]).unwrap();
            ranges.mark_written(0, 39).unwrap();
        }
        let (_file, ranges) = prepare_output(&path, 100, 10, None).unwrap();
        assert!(ranges.is_resumed());
        assert_eq!(ranges.snapshot(), vec![Range::new(40, 99)]);
        assert_eq!(&fs::read(&path).unwrap()[..40], &[7u8; 40]);
    }

    #[test]
    fn restarts_when_output_vanished() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        {
            let (_file, ranges) = prepare_output(&path, 100, 10, None).unwrap();
            ranges.mark_written(0, 49).unwrap();
        }
        fs::remove_file(&path).unwrap();
        let (file, ranges) = prepare_output(&path, 100, 10, None).unwrap();
        assert!(!ranges.is_resumed());
        assert_eq!(ranges.bytes_downloaded(), 0);
        assert_eq!(file.len().unwrap(), 100);
    }

    #[test]
    fn restarts_when_remote_size_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        {
            let (_file, ranges) = prepare_output(&path, 100, 10, None).unwrap();
            ranges.mark_written(0, 49).unwrap();
        }
        let (file, ranges) = prepare_output(&path, 200, 10, None).unwrap();
        assert!(!ranges.is_resumed());
        assert_eq!(ranges.snapshot(), vec![Range::new(0, 199)]);
        assert_eq!(file.len().unwrap(), 200);
    }

    #[test]
    fn restarts_when_validator_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        {
            let (file, ranges) = prepare_output(&path, 100, 10, Some("v1")).unwrap();
            file.write_at(0, &[7u8; 50]).unwrap();
            ranges.mark_written(0, 49).unwrap();
        }
        let (_file, ranges) = prepare_output(&path, 100, 10, Some("v1")).unwrap();
        assert!(ranges.is_resumed());
        drop(ranges);

        let (_file, ranges) = prepare_output(&path, 100, 10, Some("v2")).unwrap();
        assert!(!ranges.is_resumed());
        assert_eq!(ranges.snapshot(), vec![Range::new(0, 99)]);
        assert_eq!(fs::read(&path).unwrap(), vec![0u8; 100]);
    }

    #[test]
    fn restarts_when_metadata_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        fs::write(&path, vec![0u8; 100]).unwrap();
        let store = MetadataStore::for_output(&path);
        for slot in store.paths() {
            fs::write(slot, b"garbage").unwrap();
        }
        let (_file, ranges) = prepare_output(&path, 100, 10, None).unwrap();
        assert!(!ranges.is_resumed());
        assert_eq!(ranges.snapshot(), vec![Range::new(0, 99)]);
    }
}
