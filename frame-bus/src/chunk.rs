use std::fmt::{Display, Formatter};

use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Key,
    Delta,
}

/// One unit of encoder output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    timestamp: i64,
    duration: Option<i64>,
    kind: ChunkKind,
    data: Bytes,
}

impl EncodedChunk {
    pub fn new(timestamp: i64, duration: Option<i64>, kind: ChunkKind, data: Bytes) -> Self {
        Self {
            timestamp,
            duration,
            kind,
            data,
        }
    }

    /// Microseconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Microseconds, when the encoder reported one.
    pub fn duration(&self) -> Option<i64> {
        self.duration
    }

    /// Presentation end of this chunk in microseconds.
    pub fn end_time(&self) -> i64 {
        self.timestamp + self.duration.unwrap_or(0)
    }

    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    pub fn is_key(&self) -> bool {
        self.kind == ChunkKind::Key
    }

    pub fn byte_length(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

impl Display for EncodedChunk {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "EncodedChunk timestamp: {}, duration: {:?}, is_key: {}, byte_length: {}",
            self.timestamp,
            self.duration,
            self.is_key(),
            self.data.len()
        )
    }
}
