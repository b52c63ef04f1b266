use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{Context, Flags};

/// Converts pictures to one fixed format and size.
pub struct Scaler {
    context: Context,
    src: (Pixel, u32, u32),
}

impl Scaler {
    pub fn new(
        src: (Pixel, u32, u32),
        dst: (Pixel, u32, u32),
    ) -> anyhow::Result<Self> {
        let context = Context::get(src.0, src.1, src.2, dst.0, dst.1, dst.2, Flags::BILINEAR)?;
        Ok(Self { context, src })
    }

    /// Whether this scaler was built for pictures shaped like `frame`.
    pub fn accepts(&self, frame: &ffmpeg_next::frame::Video) -> bool {
        self.src == (frame.format(), frame.width(), frame.height())
    }

    pub fn run(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
        dst: &mut ffmpeg_next::frame::Video,
    ) -> anyhow::Result<()> {
        self.context.run(frame, dst).map_err(|e| e.into())
    }
}

unsafe impl Send for Scaler {}
