use async_trait::async_trait;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video;
use tokio::sync::mpsc;

use super::{planes, scaler::Scaler};
use crate::{
    frame::{FrameRate, VideoImage},
    source::Decoder,
};

type ImageSender = mpsc::Sender<anyhow::Result<VideoImage>>;

struct DecodeJob {
    input: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::codec::decoder::Video,
    stream_index: usize,
}

/// Decodes the best video stream of a media file into YUV420P pictures.
///
/// Decoding runs on a blocking thread that starts with the first pull and
/// stays at most one picture ahead of the consumer.
pub struct FfmpegDecoder {
    path: String,
    job: Option<DecodeJob>,
    rx: Option<mpsc::Receiver<anyhow::Result<VideoImage>>>,
    frame_rate: Option<FrameRate>,
}

impl FfmpegDecoder {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let input = ffmpeg_next::format::input(&path)
            .map_err(|e| anyhow::anyhow!("open {}: {}", path, e))?;

        let (stream_index, parameters, avg_rate) = {
            let stream = input
                .streams()
                .best(ffmpeg_next::media::Type::Video)
                .ok_or_else(|| anyhow::anyhow!("no video stream in {}", path))?;
            (stream.index(), stream.parameters(), stream.avg_frame_rate())
        };

        let decoder = ffmpeg_next::codec::context::Context::from_parameters(parameters)?
            .decoder()
            .video()?;
        if decoder.format() == Pixel::None || decoder.width() == 0 || decoder.height() == 0 {
            anyhow::bail!("missing codec parameters for {}", path);
        }
        log::info!(
            "opened {}: stream {}, {}x{} {:?}, avg rate {}",
            path,
            stream_index,
            decoder.width(),
            decoder.height(),
            decoder.format(),
            avg_rate
        );

        let frame_rate = u32::try_from(avg_rate.numerator())
            .ok()
            .zip(u32::try_from(avg_rate.denominator()).ok())
            .and_then(|(num, den)| FrameRate::new(num, den).ok());

        Ok(Self {
            path: path.to_string(),
            job: Some(DecodeJob {
                input,
                decoder,
                stream_index,
            }),
            rx: None,
            frame_rate,
        })
    }

    /// Average frame rate the container declares, if any.
    pub fn frame_rate(&self) -> Option<FrameRate> {
        self.frame_rate
    }

    fn start(&mut self, job: DecodeJob) {
        let (tx, rx) = mpsc::channel(1);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = job.run(&tx) {
                log::error!("decode {} failed: {:#}", path, e);
                let _ = tx.blocking_send(Err(e));
            }
            log::debug!("decode {}: EOF", path);
        });
        self.rx = Some(rx);
    }
}

#[async_trait]
impl Decoder for FfmpegDecoder {
    async fn next_image(&mut self) -> anyhow::Result<Option<VideoImage>> {
        if let Some(job) = self.job.take() {
            self.start(job);
        }
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await.transpose(),
            None => Ok(None),
        }
    }
}

impl DecodeJob {
    fn run(mut self, tx: &ImageSender) -> anyhow::Result<()> {
        let mut scaler = None;
        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder.send_packet(&packet)?;
            if !Self::receive_frames(&mut self.decoder, &mut scaler, tx)? {
                return Ok(());
            }
        }
        self.decoder.send_eof()?;
        Self::receive_frames(&mut self.decoder, &mut scaler, tx)?;
        Ok(())
    }

    /// Forwards every ready frame. `Ok(false)` once the consumer is gone.
    fn receive_frames(
        decoder: &mut ffmpeg_next::codec::decoder::Video,
        scaler: &mut Option<Scaler>,
        tx: &ImageSender,
    ) -> anyhow::Result<bool> {
        let mut frame = Video::empty();
        loop {
            match decoder.receive_frame(&mut frame) {
                Ok(()) => {
                    let image = Self::to_image(&frame, scaler)?;
                    if tx.blocking_send(Ok(image)).is_err() {
                        return Ok(false);
                    }
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(true),
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    return Ok(true);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn to_image(frame: &Video, scaler: &mut Option<Scaler>) -> anyhow::Result<VideoImage> {
        if frame.format() == Pixel::YUV420P {
            return planes::from_video_frame(frame);
        }
        if !scaler.as_ref().is_some_and(|s| s.accepts(frame)) {
            let (w, h) = (frame.width(), frame.height());
            *scaler = Some(Scaler::new(
                (frame.format(), w, h),
                (Pixel::YUV420P, w, h),
            )?);
        }
        let Some(active) = scaler.as_mut() else {
            anyhow::bail!("no scaler for {:?}", frame.format());
        };
        let mut converted = Video::empty();
        active.run(frame, &mut converted)?;
        planes::from_video_frame(&converted)
    }
}
