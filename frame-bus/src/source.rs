use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;

use crate::{
    error::{PipelineError, Result},
    frame::{Frame, FrameLedger, FrameRate, VideoImage},
    report::{LogReporter, Metric, Reporter},
    stage::FrameStream,
};

/// Produces decoded pictures in presentation order.
#[async_trait]
pub trait Decoder: Send {
    /// Waits until the next picture is decoded. `Ok(None)` once playback ended.
    async fn next_image(&mut self) -> anyhow::Result<Option<VideoImage>>;
}

/// Side-effect consumer shown every pulled frame once.
pub trait Renderer: Send {
    fn render(&mut self, frame: &Frame);
}

/// Shared view of a source's progress, readable after the source has been
/// moved into the pipeline.
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    produced: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
}

impl SourceStats {
    pub fn frames_produced(&self) -> u64 {
        self.produced.load(Ordering::Acquire)
    }

    /// True once the decoder signalled end of media.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// Turns decoder output into frames stamped at a fixed nominal rate.
pub struct FrameSource {
    name: String,
    decoder: Box<dyn Decoder>,
    rate: FrameRate,
    ledger: FrameLedger,
    stats: SourceStats,
    reporter: Arc<dyn Reporter>,
    renderer: Option<Box<dyn Renderer>>,
    done: bool,
}

impl FrameSource {
    pub fn new(decoder: Box<dyn Decoder>, rate: FrameRate) -> Self {
        Self {
            name: "source".to_string(),
            decoder,
            rate,
            ledger: FrameLedger::new(),
            stats: SourceStats::default(),
            reporter: Arc::new(LogReporter),
            renderer: None,
            done: false,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Ledger every frame of this source, and every clone of one, leases from.
    pub fn ledger(&self) -> FrameLedger {
        self.ledger.clone()
    }

    pub fn stats(&self) -> SourceStats {
        self.stats.clone()
    }

    pub fn rate(&self) -> FrameRate {
        self.rate
    }

    pub async fn next_frame(&mut self) -> Option<Result<Frame>> {
        if self.done {
            return None;
        }

        match self.decoder.next_image().await {
            Ok(Some(image)) => {
                let index = self.stats.produced.load(Ordering::Acquire);
                let frame = Frame::new(
                    image,
                    self.rate.timestamp_at(index),
                    self.rate.duration_at(index),
                    &self.ledger,
                );
                self.stats.produced.store(index + 1, Ordering::Release);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.render(&frame);
                }
                log::trace!("{}: frame {} at {}us", self.name, index, frame.timestamp());
                Some(Ok(frame))
            }
            Ok(None) => {
                self.done = true;
                self.stats.finished.store(true, Ordering::Release);
                let produced = self.stats.frames_produced();
                log::info!("{}: end of media after {} frames", self.name, produced);
                self.reporter.report(&self.name, &Metric::Frames(produced));
                None
            }
            Err(e) => {
                self.done = true;
                let err = PipelineError::source(e);
                self.reporter
                    .report(&self.name, &Metric::Failed(err.to_string()));
                Some(Err(err))
            }
        }
    }

    pub fn into_stream(self) -> FrameStream {
        Box::pin(futures::stream::unfold(self, |mut source| async move {
            source.next_frame().await.map(|item| (item, source))
        }))
    }
}

#[cfg(test)]
#[path = "source_test.rs"]
mod source_test;
