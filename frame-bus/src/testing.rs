//! Scripted collaborators for driving the pipeline without a media backend.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    chunk::{ChunkKind, EncodedChunk},
    encoder::{EncodeOptions, Encoder, EncoderConfig},
    frame::{Frame, PixelFormat, VideoImage},
    source::Decoder,
};

/// Decodes `frames` flat pictures whose luma value is the frame index mod 256.
pub struct ScriptedDecoder {
    frames: u64,
    emitted: u64,
    width: u32,
    height: u32,
    fail_at: Option<u64>,
}

impl ScriptedDecoder {
    pub fn new(frames: u64) -> Self {
        Self {
            frames,
            emitted: 0,
            width: 16,
            height: 16,
            fail_at: None,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Fails instead of producing frame `index`.
    pub fn failing_at(mut self, index: u64) -> Self {
        self.fail_at = Some(index);
        self
    }
}

#[async_trait]
impl Decoder for ScriptedDecoder {
    async fn next_image(&mut self) -> anyhow::Result<Option<VideoImage>> {
        tokio::task::yield_now().await;
        if self.fail_at == Some(self.emitted) {
            anyhow::bail!("decoder error at frame {}", self.emitted);
        }
        if self.emitted == self.frames {
            return Ok(None);
        }
        let image = VideoImage::filled(
            self.width,
            self.height,
            PixelFormat::Yuv420p,
            (self.emitted % 256) as u8,
        )?;
        self.emitted += 1;
        Ok(Some(image))
    }
}

/// What a [`ScriptedEncoder`] was asked to do.
#[derive(Debug, Default, Clone)]
pub struct ProbeLog {
    pub configured: Vec<EncoderConfig>,
    pub forced: Vec<bool>,
    pub timestamps: Vec<i64>,
    pub luma: Vec<u8>,
    pub flushes: u32,
}

#[derive(Debug, Default, Clone)]
pub struct EncoderProbe {
    inner: Arc<Mutex<ProbeLog>>,
}

impl EncoderProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> ProbeLog {
        self.inner.lock().clone()
    }

    /// Branch positions that were submitted with a forced keyframe.
    pub fn forced_positions(&self) -> Vec<usize> {
        self.inner
            .lock()
            .forced
            .iter()
            .enumerate()
            .filter(|(_, forced)| **forced)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn submitted(&self) -> usize {
        self.inner.lock().forced.len()
    }

    pub fn flushes(&self) -> u32 {
        self.inner.lock().flushes
    }
}

/// Emits one chunk per frame, holding back `latency` chunks until more
/// frames arrive or the encoder is flushed.
pub struct ScriptedEncoder {
    probe: EncoderProbe,
    config: Option<EncoderConfig>,
    held: VecDeque<EncodedChunk>,
    ready: VecDeque<EncodedChunk>,
    latency: usize,
    key_bytes: usize,
    delta_bytes: usize,
    fail_configure: bool,
    fail_at: Option<usize>,
    fail_receive_at: Option<usize>,
    fail_flush: bool,
    received: usize,
    delay: Option<Duration>,
}

impl ScriptedEncoder {
    pub fn new(probe: EncoderProbe) -> Self {
        Self {
            probe,
            config: None,
            held: VecDeque::new(),
            ready: VecDeque::new(),
            latency: 0,
            key_bytes: 4000,
            delta_bytes: 1000,
            fail_configure: false,
            fail_at: None,
            fail_receive_at: None,
            fail_flush: false,
            received: 0,
            delay: None,
        }
    }

    pub fn with_latency(mut self, latency: usize) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_chunk_sizes(mut self, key_bytes: usize, delta_bytes: usize) -> Self {
        self.key_bytes = key_bytes;
        self.delta_bytes = delta_bytes;
        self
    }

    pub fn rejecting_config(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    /// Fails when asked to encode the frame at branch position `index`.
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Fails when the chunk at output position `index` is collected.
    pub fn failing_receive_at(mut self, index: usize) -> Self {
        self.fail_receive_at = Some(index);
        self
    }

    /// Fails the end-of-stream flush.
    pub fn failing_flush(mut self) -> Self {
        self.fail_flush = true;
        self
    }

    /// Sleeps this long on every encode.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Encoder for ScriptedEncoder {
    async fn configure(&mut self, config: &EncoderConfig) -> anyhow::Result<()> {
        if self.fail_configure {
            anyhow::bail!("unsupported configuration: {}", config.preference);
        }
        self.probe.inner.lock().configured.push(config.clone());
        self.config = Some(config.clone());
        Ok(())
    }

    async fn encode(&mut self, frame: &Frame, options: EncodeOptions) -> anyhow::Result<()> {
        if self.config.is_none() {
            anyhow::bail!("encode called before configure");
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let position = {
            let mut log = self.probe.inner.lock();
            let position = log.forced.len();
            if self.fail_at == Some(position) {
                anyhow::bail!("encode error at frame {}", position);
            }
            log.forced.push(options.force_keyframe);
            log.timestamps.push(frame.timestamp());
            log.luma.push(frame.image().data().first().copied().unwrap_or(0));
            position
        };

        let (kind, size) = if options.force_keyframe || position == 0 {
            (ChunkKind::Key, self.key_bytes)
        } else {
            (ChunkKind::Delta, self.delta_bytes)
        };
        self.held.push_back(EncodedChunk::new(
            frame.timestamp(),
            Some(frame.duration()),
            kind,
            Bytes::from(vec![0u8; size]),
        ));
        while self.held.len() > self.latency {
            if let Some(chunk) = self.held.pop_front() {
                self.ready.push_back(chunk);
            }
        }
        Ok(())
    }

    fn receive_chunk(&mut self) -> anyhow::Result<Option<EncodedChunk>> {
        if self.ready.is_empty() {
            return Ok(None);
        }
        if self.fail_receive_at == Some(self.received) {
            anyhow::bail!("output error at chunk {}", self.received);
        }
        self.received += 1;
        Ok(self.ready.pop_front())
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        tokio::task::yield_now().await;
        if self.fail_flush {
            anyhow::bail!("flush failed");
        }
        self.probe.inner.lock().flushes += 1;
        self.ready.extend(self.held.drain(..));
        Ok(())
    }
}
