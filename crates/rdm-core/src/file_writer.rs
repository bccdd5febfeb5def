//! Single consumer of the chunk queue.
//!
//! Writes each chunk at its offset, syncs it, then marks the span written in
//! the range set (which persists the metadata). Any failure here is fatal for
//! the download: the writer trips the stop token and returns the error.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{debug, error};

use crate::chunk::{Chunk, ChunkReceiver, WriterMessage};
use crate::control::StopToken;
use crate::range_set::RangeSet;
use crate::storage::OutputFile;

/// Totals for one writer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterReport {
    pub chunks_written: u64,
    pub bytes_written: u64,
    pub releases: u64,
}

pub struct FileWriter {
    file: OutputFile,
    ranges: Arc<RangeSet>,
    queue: ChunkReceiver,
    stop: StopToken,
}

impl FileWriter {
    pub fn new(file: OutputFile, ranges: Arc<RangeSet>, queue: ChunkReceiver, stop: StopToken) -> Self {
        Self {
            file,
            ranges,
            queue,
            stop,
        }
    }

    /// Drains the queue until `Finished` (or every sender is gone).
    pub fn run(self) -> Result<WriterReport> {
        let result = self.drain();
        match &result {
            Ok(report) => debug!(
                chunks = report.chunks_written,
                bytes = report.bytes_written,
                "writer finished"
            ),
            Err(e) => {
                error!(error = %format!("{e:#}"), "writer failed; aborting download");
                self.stop.stop();
            }
        }
        // Dropping `self` closes the receiver so blocked fetchers fail fast.
        result
    }

    fn drain(&self) -> Result<WriterReport> {
        let mut report = WriterReport::default();
        while let Ok(msg) = self.queue.recv() {
            match msg {
                WriterMessage::Chunk(chunk) => {
                    self.write_chunk(&chunk)?;
                    report.chunks_written += 1;
                    report.bytes_written += chunk.len() as u64;
                }
                WriterMessage::Release { start, ack } => {
                    self.ranges
                        .release(start)
                        .with_context(|| format!("release of range at {start} failed"))?;
                    report.releases += 1;
                    debug!(start, "range released");
                    // The fetcher may already have stopped waiting.
                    let _ = ack.send(());
                }
                WriterMessage::Finished => break,
            }
        }
        self.file.sync()?;
        Ok(report)
    }

    fn write_chunk(&self, chunk: &Chunk) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let start = chunk.offset();
        let end = start + chunk.len() as u64 - 1;
        self.file.write_at(start, chunk.data())?;
        self.file.sync_data()?;
        self.ranges
            .mark_written(start, end)
            .with_context(|| format!("recording bytes {start}-{end} as written failed"))
    }

    pub fn spawn(self) -> io::Result<JoinHandle<Result<WriterReport>>> {
        thread::Builder::new()
            .name("rdm-writer".to_string())
            .spawn(move || self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_queue;
    use crate::range_set::{MetadataStore, Range, RangeSetError};
    use crate::storage::OutputFileBuilder;
    use std::sync::mpsc;

    fn output(dir: &tempfile::TempDir, size: u64) -> (std::path::PathBuf, OutputFile) {
        let path = dir.path().join("out.bin");
        let mut builder = OutputFileBuilder::create(&path).unwrap();
        builder.preallocate(size).unwrap();
        (path, builder.build())
    }

    #[test]
    fn writes_chunks_and_marks_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let (path, file) = output(&dir, 100);
        let ranges = Arc::new(RangeSet::fresh(100, 100));
        let (tx, rx) = chunk_queue(16);
        let writer = FileWriter::new(file, Arc::clone(&ranges), rx, StopToken::new());

        tx.send(WriterMessage::Chunk(Chunk::new(80, vec![b'c'; 20]))).unwrap();
        tx.send(WriterMessage::Chunk(Chunk::new(0, vec![b'a'; 20]))).unwrap();
        tx.send(WriterMessage::Finished).unwrap();
        let report = writer.run().unwrap();

        assert_eq!(report.chunks_written, 2);
        assert_eq!(report.bytes_written, 40);
        assert_eq!(ranges.snapshot(), vec![Range::new(20, 79)]);
        let content = std::fs::read(&path).unwrap();
        assert_eq!(&content[0..20], &[b'a'; 20]);
        assert_eq!(&content[80..100], &[b'c'; 20]);
    }

    #[test]
    fn release_is_applied_in_queue_order() {
        let dir = tempfile::tempdir().unwrap();
        let (_path, file) = output(&dir, 100);
        let ranges = Arc::new(RangeSet::fresh(100, 100));
        let claimed = ranges.claim().unwrap();
        assert_eq!(claimed, Range::new(0, 99));

        let (tx, rx) = chunk_queue(16);
        let (ack, acked) = mpsc::sync_channel(1);
        tx.send(WriterMessage::Chunk(Chunk::new(0, vec![1; 30]))).unwrap();
        tx.send(WriterMessage::Release { start: 30, ack }).unwrap();
        tx.send(WriterMessage::Finished).unwrap();

        let report = FileWriter::new(file, Arc::clone(&ranges), rx, StopToken::new())
            .run()
            .unwrap();
        assert_eq!(report.releases, 1);
        acked.recv().unwrap();
        assert_eq!(ranges.claim(), Some(Range::new(30, 99)));
    }

    #[test]
    fn persists_after_each_write() {
        let dir = tempfile::tempdir().unwrap();
        let (path, file) = output(&dir, 64);
        let store = MetadataStore::for_output(&path);
        let ranges = Arc::new(RangeSet::open(64, 64, store));
        let (tx, rx) = chunk_queue(4);
        tx.send(WriterMessage::Chunk(Chunk::new(0, vec![5; 16]))).unwrap();
        tx.send(WriterMessage::Finished).unwrap();
        FileWriter::new(file, ranges, rx, StopToken::new())
            .run()
            .unwrap();

        let mut reopened = MetadataStore::for_output(&path);
        assert_eq!(reopened.load(64), Some(vec![Range::new(16, 63)]));
    }

    #[test]
    fn write_outside_pending_is_fatal_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let (_path, file) = output(&dir, 100);
        let ranges = Arc::new(RangeSet::from_ranges(100, 100, &[Range::new(50, 99)]));
        let stop = StopToken::new();
        let (tx, rx) = chunk_queue(4);
        tx.send(WriterMessage::Chunk(Chunk::new(0, vec![0; 10]))).unwrap();
        tx.send(WriterMessage::Finished).unwrap();

        let err = FileWriter::new(file, ranges, rx, stop.clone())
            .run()
            .unwrap_err();
        assert!(format!("{err:#}").contains("0-9"));
        assert!(stop.is_stopped());
    }

    #[test]
    fn metadata_write_failure_is_fatal_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let (path, file) = output(&dir, 64);
        let store = MetadataStore::for_output(&path);
        // Directories in place of both slots: every save fails.
        for slot in store.paths() {
            std::fs::create_dir(slot).unwrap();
        }
        let ranges = Arc::new(RangeSet::open(64, 64, store));
        assert!(matches!(
            ranges.mark_written(0, 7),
            Err(RangeSetError::Persist(_))
        ));

        let stop = StopToken::new();
        let (tx, rx) = chunk_queue(4);
        tx.send(WriterMessage::Chunk(Chunk::new(8, vec![3; 8]))).unwrap();
        tx.send(WriterMessage::Finished).unwrap();
        let err = FileWriter::new(file, Arc::clone(&ranges), rx, stop.clone())
            .run()
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<RangeSetError>(),
            Some(RangeSetError::Persist(_))
        ));
        assert!(stop.is_stopped());
        assert!(path.exists());
        assert!(MetadataStore::for_output(&path).paths().iter().all(|p| p.is_dir()));
    }

    #[test]
    fn stops_when_all_senders_drop() {
        let dir = tempfile::tempdir().unwrap();
        let (_path, file) = output(&dir, 10);
        let ranges = Arc::new(RangeSet::fresh(10, 10));
        let (tx, rx) = chunk_queue(4);
        let handle = FileWriter::new(file, ranges, rx, StopToken::new())
            .spawn()
            .unwrap();
        tx.send(WriterMessage::Chunk(Chunk::new(0, vec![1; 10]))).unwrap();
        drop(tx);
        let report = handle.join().unwrap().unwrap();
        assert_eq!(report.bytes_written, 10);
    }
}
