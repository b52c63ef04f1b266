//! FFmpeg-backed [`Decoder`](crate::source::Decoder) and
//! [`Encoder`](crate::encoder::Encoder).

mod decoder;
mod encoder;
mod hw;
mod planes;
mod scaler;

pub use decoder::FfmpegDecoder;
pub use encoder::FfmpegEncoder;
pub use hw::{find_hw_encoder, pixel_format_for_encoder, software_encoder_name};

/// Registers FFmpeg components. Call once at startup.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}
