//! Data carried from fetchers to the single file writer.

use std::sync::mpsc::{self, Receiver, SyncSender};

/// Wire chunk size: bytes read per buffer and debited from the token bucket.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// A run of bytes at an absolute offset in the output file. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    offset: u64,
    data: Vec<u8>,
}

impl Chunk {
    pub fn new(offset: u64, data: Vec<u8>) -> Self {
        Chunk { offset, data }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Everything the writer consumes, in queue order.
#[derive(Debug)]
pub enum WriterMessage {
    /// Bytes to write at their offset.
    Chunk(Chunk),
    /// A fetcher gave up on the range now starting at `start`. Applied after
    /// that fetcher's earlier chunks; the writer acknowledges on `ack`.
    Release { start: u64, ack: SyncSender<()> },
    /// End of work: drain nothing further and close the file.
    Finished,
}

pub type ChunkSender = SyncSender<WriterMessage>;
pub type ChunkReceiver = Receiver<WriterMessage>;

/// Bounded queue; senders block while `capacity` messages are waiting.
pub fn chunk_queue(capacity: usize) -> (ChunkSender, ChunkReceiver) {
    mpsc::sync_channel(capacity.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_accessors() {
        let c = Chunk::new(4096, vec![1, 2, 3]);
        assert_eq!(c.offset(), 4096);
        assert_eq!(c.data(), &[1, 2, 3]);
        assert_eq!(c.len(), 3);
        assert!(!c.is_empty());
    }

    #[test]
    fn queue_applies_backpressure() {
        let (tx, rx) = chunk_queue(2);
        tx.try_send(WriterMessage::Chunk(Chunk::new(0, vec![0]))).unwrap();
        tx.try_send(WriterMessage::Chunk(Chunk::new(1, vec![1]))).unwrap();
        assert!(tx.try_send(WriterMessage::Finished).is_err());
        assert!(matches!(rx.recv().unwrap(), WriterMessage::Chunk(c) if c.offset() == 0));
        tx.try_send(WriterMessage::Finished).unwrap();
    }
}
