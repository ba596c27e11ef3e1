// src/models.rs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One contiguous byte range of a partitioned transfer.
///
/// Non-final chunks use an inclusive `range_to`. The final chunk's
/// `range_to` is the total length of the resource and means "fetch to end".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the partition, stable across resumes.
    pub index: u64,
    pub url: String,
    /// Spill file holding this chunk's bytes until the join.
    pub path: PathBuf,
    pub range_from: u64,
    pub range_to: u64,
    /// Whether this is the final chunk of the partition.
    pub last: bool,
}

impl Chunk {
    /// Returns the number of bytes this chunk still has to fetch.
    pub fn remaining_bytes(&self) -> u64 {
        if self.last {
            self.range_to.saturating_sub(self.range_from)
        } else {
            self.range_to
                .saturating_add(1)
                .saturating_sub(self.range_from)
        }
    }

    /// A satisfied chunk is complete and must never hit the network.
    pub fn is_satisfied(&self) -> bool {
        self.remaining_bytes() == 0
    }

    /// Value of the `Range` header for the remainder of this chunk.
    ///
    /// The final chunk is always open-ended so it drains the real end of
    /// the stream even when the probed length was approximate.
    pub fn range_header(&self) -> String {
        if self.last {
            format!("bytes={}-", self.range_from)
        } else {
            format!("bytes={}-{}", self.range_from, self.range_to)
        }
    }

    /// Snapshot of this chunk after `written` more bytes reached disk.
    pub fn advanced(&self, written: u64) -> Chunk {
        Chunk {
            range_from: self.range_from + written,
            ..self.clone()
        }
    }
}

/// The resumable checkpoint of a transfer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferState {
    pub url: String,
    pub chunks: Vec<Chunk>,
}

impl TransferState {
    pub fn new(url: impl Into<String>, mut chunks: Vec<Chunk>) -> Self {
        chunks.sort_by_key(|c| c.index);
        Self {
            url: url.into(),
            chunks,
        }
    }

    /// Bytes still missing across all chunks.
    pub fn remaining_bytes(&self) -> u64 {
        self.chunks.iter().map(Chunk::remaining_bytes).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.chunks.iter().all(Chunk::is_satisfied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(from: u64, to: u64, last: bool) -> Chunk {
        Chunk {
            index: 0,
            url: "http://foo.bar/file".into(),
            path: PathBuf::from("/tmp/file.part000000"),
            range_from: from,
            range_to: to,
            last,
        }
    }

    #[test]
    fn final_chunk_uses_sentinel_end() {
        let c = chunk(90, 100, true);
        assert_eq!(c.remaining_bytes(), 10);
        assert_eq!(c.range_header(), "bytes=90-");
        assert!(chunk(100, 100, true).is_satisfied());
        assert!(chunk(120, 100, true).is_satisfied());
    }

    #[test]
    fn inner_chunk_uses_inclusive_end() {
        let c = chunk(0, 9, false);
        assert_eq!(c.remaining_bytes(), 10);
        assert_eq!(c.range_header(), "bytes=0-9");

        // One byte left, not yet satisfied.
        assert!(!chunk(9, 9, false).is_satisfied());
        assert!(chunk(10, 9, false).is_satisfied());
    }

    #[test]
    fn advanced_moves_only_the_start() {
        let c = chunk(10, 19, false).advanced(4);
        assert_eq!(c.range_from, 14);
        assert_eq!(c.range_to, 19);
        assert_eq!(c.remaining_bytes(), 6);
    }

    #[test]
    fn state_orders_chunks_by_index() {
        let mut a = chunk(0, 9, false);
        let mut b = chunk(10, 20, true);
        a.index = 0;
        b.index = 1;
        let state = TransferState::new("http://foo.bar/file", vec![b, a]);
        assert_eq!(state.chunks[0].index, 0);
        assert_eq!(state.chunks[1].index, 1);
        assert_eq!(state.remaining_bytes(), 20);
        assert!(!state.is_complete());
    }
}
