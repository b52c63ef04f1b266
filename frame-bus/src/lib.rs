//! Pull-driven frame pipeline: decode once, fan out, encode per branch and
//! measure what each branch produced.
//!
//! ```text
//!                                  ┌─► EncodeTransform ─► BitrateSink
//! FrameSource (Decoder) ──► tee ───┤
//!                                  └─► EncodeTransform ─► BitrateSink
//! ```

pub mod chunk;
pub mod encoder;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod frame;
pub mod report;
pub mod sink;
pub mod source;
pub mod stage;
pub mod tee;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use chunk::{ChunkKind, EncodedChunk};
pub use encoder::{
    EncodeOptions, EncodeTransform, Encoder, EncoderConfig, EncoderOptions, EncoderPreference,
    EncoderState,
};
pub use error::{PipelineError, Result};
pub use frame::{Frame, FrameLedger, FrameRate, PixelFormat, VideoImage};
pub use report::{Bitrate, LogReporter, MemoryReporter, Metric, Reporter};
pub use sink::{BitrateAccumulator, BitrateSink};
pub use source::{Decoder, FrameSource, Renderer, SourceStats};
pub use stage::{ChunkStream, FrameStream};
pub use tee::{TeeOutput, tee};
