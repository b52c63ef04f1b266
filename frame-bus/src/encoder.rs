use std::collections::VecDeque;
use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::{
    chunk::EncodedChunk,
    error::{PipelineError, Result},
    frame::{Frame, FrameRate},
    stage::{ChunkStream, FrameStream},
};

/// Which kind of encoder implementation a branch asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncoderPreference {
    #[default]
    NoPreference,
    PreferSoftware,
    PreferHardware,
}

impl Display for EncoderPreference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EncoderPreference::NoPreference => "no-preference",
            EncoderPreference::PreferSoftware => "prefer-software",
            EncoderPreference::PreferHardware => "prefer-hardware",
        };
        f.write_str(name)
    }
}

pub const DEFAULT_GOP_SIZE: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderConfig {
    // "h264", "hevc", "vp9", "av1"
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub framerate: FrameRate,
    // bps
    pub bitrate: u64,
    pub preference: EncoderPreference,
    // frames between forced keyframes
    pub gop_size: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            codec: "h264".to_string(),
            width: 1280,
            height: 720,
            framerate: FrameRate::NTSC,
            bitrate: 2_000_000,
            preference: EncoderPreference::NoPreference,
            gop_size: DEFAULT_GOP_SIZE,
        }
    }
}

impl EncoderConfig {
    /// Defaults with every option the caller set taking precedence.
    pub fn merged(options: &EncoderOptions) -> Self {
        let defaults = Self::default();
        Self {
            codec: options.codec.clone().unwrap_or(defaults.codec),
            width: options.width.unwrap_or(defaults.width),
            height: options.height.unwrap_or(defaults.height),
            framerate: options.framerate.unwrap_or(defaults.framerate),
            bitrate: options.bitrate.unwrap_or(defaults.bitrate),
            preference: options.preference.unwrap_or(defaults.preference),
            gop_size: options.gop_size.unwrap_or(defaults.gop_size),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.codec.is_empty() {
            anyhow::bail!("codec must not be empty");
        }
        if self.width == 0 || self.height == 0 {
            anyhow::bail!("invalid video size {}x{}", self.width, self.height);
        }
        if self.bitrate == 0 {
            anyhow::bail!("bitrate must be positive");
        }
        if self.gop_size == 0 {
            anyhow::bail!("gop_size must be positive");
        }
        Ok(())
    }

    /// Whether the frame at `position` in a branch gets a forced keyframe.
    pub fn forces_keyframe(&self, position: u64) -> bool {
        self.gop_size != 0 && position % self.gop_size as u64 == 0
    }
}

/// Caller overrides for [`EncoderConfig`]. `None` keeps the default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderOptions {
    pub codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub framerate: Option<FrameRate>,
    pub bitrate: Option<u64>,
    pub preference: Option<EncoderPreference>,
    pub gop_size: Option<u32>,
}

impl EncoderOptions {
    pub fn with_preference(mut self, preference: EncoderPreference) -> Self {
        self.preference = Some(preference);
        self
    }

    pub fn with_gop_size(mut self, gop_size: u32) -> Self {
        self.gop_size = Some(gop_size);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeOptions {
    pub force_keyframe: bool,
}

/// An external video encoder.
///
/// Output is collected with [`Encoder::receive_chunk`] after each `encode`
/// and after `flush`; errors come back from whichever call hit them.
#[async_trait]
pub trait Encoder: Send {
    async fn configure(&mut self, config: &EncoderConfig) -> anyhow::Result<()>;

    async fn encode(&mut self, frame: &Frame, options: EncodeOptions) -> anyhow::Result<()>;

    /// Next chunk that is ready, without waiting. `Ok(None)` when none is.
    fn receive_chunk(&mut self) -> anyhow::Result<Option<EncodedChunk>>;

    /// Waits until every submitted frame has been emitted.
    async fn flush(&mut self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Uninitialized,
    Configuring,
    Encoding,
    Flushing,
    Terminated,
    Failed,
}

impl Display for EncoderState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Encodes one branch's frames, forcing a keyframe every `gop_size` frames.
///
/// The encoder is configured when the first frame arrives and flushed when
/// upstream ends. A failure ends only this stream; the upstream is dropped
/// so a tee feeding it stops waiting on this branch.
pub struct EncodeTransform {
    name: String,
    upstream: Option<FrameStream>,
    encoder: Box<dyn Encoder>,
    config: EncoderConfig,
    state: EncoderState,
    submitted: u64,
    keyframes_forced: u64,
    pending: VecDeque<EncodedChunk>,
}

impl EncodeTransform {
    pub fn new(
        name: &str,
        upstream: FrameStream,
        encoder: Box<dyn Encoder>,
        options: &EncoderOptions,
    ) -> Self {
        Self {
            name: name.to_string(),
            upstream: Some(upstream),
            encoder,
            config: EncoderConfig::merged(options),
            state: EncoderState::Uninitialized,
            submitted: 0,
            keyframes_forced: 0,
            pending: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn frames_submitted(&self) -> u64 {
        self.submitted
    }

    pub fn keyframes_forced(&self) -> u64 {
        self.keyframes_forced
    }

    pub async fn next_chunk(&mut self) -> Option<Result<EncodedChunk>> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(Ok(chunk));
            }
            if matches!(self.state, EncoderState::Terminated | EncoderState::Failed) {
                return None;
            }

            let next = match self.upstream.as_mut() {
                Some(upstream) => upstream.next().await,
                None => None,
            };
            let step = match next {
                Some(Ok(frame)) => self.submit(frame).await,
                Some(Err(e)) => Err(e),
                None => self.finish().await,
            };
            if let Err(e) = step {
                return Some(Err(self.fail(e)));
            }
        }
    }

    pub fn into_stream(self) -> ChunkStream {
        Box::pin(futures::stream::unfold(self, |mut transform| async move {
            transform.next_chunk().await.map(|item| (item, transform))
        }))
    }

    async fn submit(&mut self, frame: Frame) -> Result<()> {
        if self.state == EncoderState::Uninitialized {
            self.configure().await?;
        }

        let force_keyframe = self.config.forces_keyframe(self.submitted);
        let result = self
            .encoder
            .encode(&frame, EncodeOptions { force_keyframe })
            .await;
        frame.release();
        result.map_err(|e| PipelineError::encode(&self.name, e))?;

        self.submitted += 1;
        if force_keyframe {
            self.keyframes_forced += 1;
        }
        self.drain()
    }

    async fn configure(&mut self) -> Result<()> {
        self.state = EncoderState::Configuring;
        log::info!(
            "{}: configuring {} encoder {}x{} @ {} fps, {} bps, {}, gop {}",
            self.name,
            self.config.codec,
            self.config.width,
            self.config.height,
            self.config.framerate,
            self.config.bitrate,
            self.config.preference,
            self.config.gop_size
        );
        self.config
            .validate()
            .map_err(|e| PipelineError::configure(&self.name, e))?;
        self.encoder
            .configure(&self.config)
            .await
            .map_err(|e| PipelineError::configure(&self.name, e))?;
        self.state = EncoderState::Encoding;
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        while let Some(chunk) = self
            .encoder
            .receive_chunk()
            .map_err(|e| PipelineError::encode(&self.name, e))?
        {
            self.pending.push_back(chunk);
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        // An encoder that never saw a frame was never configured; nothing to flush.
        let configured = self.state == EncoderState::Encoding;
        self.state = EncoderState::Flushing;
        self.upstream = None;
        if configured {
            self.encoder
                .flush()
                .await
                .map_err(|e| PipelineError::encode(&self.name, e))?;
            self.drain()?;
        }
        self.state = EncoderState::Terminated;
        log::info!(
            "{}: encoder finished, {} frames submitted, {} keyframes forced",
            self.name,
            self.submitted,
            self.keyframes_forced
        );
        Ok(())
    }

    fn fail(&mut self, err: PipelineError) -> PipelineError {
        log::error!("{}: {} (state {})", self.name, err, self.state);
        self.state = EncoderState::Failed;
        self.upstream = None;
        self.pending.clear();
        err
    }
}

#[cfg(test)]
#[path = "encoder_test.rs"]
mod encoder_test;
