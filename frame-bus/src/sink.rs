use std::sync::Arc;

use futures::StreamExt;

use crate::{
    chunk::EncodedChunk,
    error::Result,
    report::{Bitrate, LogReporter, Metric, Reporter},
    stage::ChunkStream,
};

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Running byte total and end time of one encoded stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BitrateAccumulator {
    total_bytes: u64,
    end_time: i64,
    chunks: u64,
}

impl BitrateAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, chunk: &EncodedChunk) {
        self.total_bytes += chunk.byte_length() as u64;
        self.end_time = chunk.end_time();
        self.chunks += 1;
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// End of the last chunk seen, in microseconds.
    pub fn end_time(&self) -> i64 {
        self.end_time
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    /// `round(bytes * 8 / seconds)`, or `NoData` when no time span was covered.
    pub fn finalize(self) -> Bitrate {
        if self.end_time <= 0 {
            return Bitrate::NoData;
        }
        let seconds = self.end_time as f64 / MICROS_PER_SECOND;
        Bitrate::Measured((self.total_bytes as f64 * 8.0 / seconds).round() as u64)
    }
}

/// Terminal stage that measures a branch's average bitrate.
pub struct BitrateSink {
    name: String,
    reporter: Arc<dyn Reporter>,
}

impl BitrateSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reporter: Arc::new(LogReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drains `chunks` and reports the outcome once, under this sink's name.
    pub async fn run(self, mut chunks: ChunkStream) -> Result<Bitrate> {
        let mut acc = BitrateAccumulator::new();
        while let Some(item) = chunks.next().await {
            match item {
                Ok(chunk) => acc.add(&chunk),
                Err(e) => {
                    self.reporter
                        .report(&self.name, &Metric::Failed(e.to_string()));
                    return Err(e);
                }
            }
        }

        log::debug!(
            "{}: {} chunks, {} bytes, ends at {}us",
            self.name,
            acc.chunks(),
            acc.total_bytes(),
            acc.end_time()
        );
        let bitrate = acc.finalize();
        self.reporter.report(&self.name, &Metric::Bitrate(bitrate));
        Ok(bitrate)
    }
}

#[cfg(test)]
#[path = "sink_test.rs"]
mod sink_test;
