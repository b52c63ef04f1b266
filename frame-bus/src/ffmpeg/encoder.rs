use async_trait::async_trait;
use bytes::Bytes;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::{Dictionary, Packet, Rational, picture};

use super::{
    hw::{find_hw_encoder, is_hw_encoder, pixel_format_for_encoder, software_encoder_name},
    planes,
    scaler::Scaler,
};
use crate::{
    chunk::{ChunkKind, EncodedChunk},
    encoder::{EncodeOptions, Encoder, EncoderConfig, EncoderPreference},
    frame::Frame,
};

const MICROS: Rational = Rational(1, 1_000_000);

struct Session {
    encoder: ffmpeg_next::codec::encoder::Video,
    name: String,
    time_base: Rational,
    format: Pixel,
    width: u32,
    height: u32,
    frame_duration: i64,
    scaler: Option<Scaler>,
    flushed: bool,
}

/// [`Encoder`] over an FFmpeg video encoder picked by preference.
///
/// Hardware preference never falls back to software. With no preference a
/// hardware encoder is tried first and software is used when none is found
/// or it refuses to open.
#[derive(Default)]
pub struct FfmpegEncoder {
    session: Option<Session>,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// FFmpeg name of the opened encoder, once configured.
    pub fn encoder_name(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.name.as_str())
    }

    fn software_codec(config: &EncoderConfig) -> anyhow::Result<ffmpeg_next::Codec> {
        let name = software_encoder_name(&config.codec);
        ffmpeg_next::encoder::find_by_name(name)
            .ok_or_else(|| anyhow::anyhow!("codec not found: {}", name))
    }

    fn open(codec: ffmpeg_next::Codec, config: &EncoderConfig) -> anyhow::Result<Session> {
        let name = codec.name().to_string();
        let format = pixel_format_for_encoder(&name);

        let mut encoder = ffmpeg_next::codec::Context::new_with_codec(codec)
            .encoder()
            .video()?;
        encoder.set_width(config.width);
        encoder.set_height(config.height);
        encoder.set_format(format);
        encoder.set_frame_rate(Some(Rational::new(
            config.framerate.num() as i32,
            config.framerate.den() as i32,
        )));
        encoder.set_time_base(MICROS);
        encoder.set_bit_rate(config.bitrate as usize);
        encoder.set_gop(config.gop_size);

        let mut opts = Dictionary::new();
        if !is_hw_encoder(&name) {
            opts.set("preset", "ultrafast");
            opts.set("tune", "zerolatency");
        }
        let encoder = encoder
            .open_with(opts)
            .map_err(|e| anyhow::anyhow!("open {}: {}", name, e))?;
        let time_base: Rational = unsafe { (*encoder.0.as_ptr()).time_base.into() };

        log::info!(
            "encoder opened: {} {}x{} {:?} @ {} bps, time base {}",
            name,
            config.width,
            config.height,
            format,
            config.bitrate,
            time_base
        );

        Ok(Session {
            encoder,
            name,
            time_base,
            format,
            width: config.width,
            height: config.height,
            frame_duration: config.framerate.duration_at(0),
            scaler: None,
            flushed: false,
        })
    }

    fn session(&mut self) -> anyhow::Result<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("encoder is not configured"))
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn configure(&mut self, config: &EncoderConfig) -> anyhow::Result<()> {
        let session = match config.preference {
            EncoderPreference::PreferHardware => {
                let codec = find_hw_encoder(&config.codec).ok_or_else(|| {
                    anyhow::anyhow!("no hardware encoder available for {}", config.codec)
                })?;
                Self::open(codec, config)?
            }
            EncoderPreference::PreferSoftware => Self::open(Self::software_codec(config)?, config)?,
            EncoderPreference::NoPreference => match find_hw_encoder(&config.codec) {
                Some(codec) => match Self::open(codec, config) {
                    Ok(session) => session,
                    Err(e) => {
                        log::warn!("hardware encoder failed: {:#}, falling back to software", e);
                        Self::open(Self::software_codec(config)?, config)?
                    }
                },
                None => {
                    log::info!(
                        "no hardware encoder found for {}, using software",
                        config.codec
                    );
                    Self::open(Self::software_codec(config)?, config)?
                }
            },
        };
        self.session = Some(session);
        Ok(())
    }

    async fn encode(&mut self, frame: &Frame, options: EncodeOptions) -> anyhow::Result<()> {
        let session = self.session()?;
        let source = planes::to_video_frame(frame.image());

        let mut video = if source.format() == session.format
            && source.width() == session.width
            && source.height() == session.height
        {
            source
        } else {
            if !session.scaler.as_ref().is_some_and(|s| s.accepts(&source)) {
                session.scaler = Some(Scaler::new(
                    (source.format(), source.width(), source.height()),
                    (session.format, session.width, session.height),
                )?);
            }
            let Some(scaler) = session.scaler.as_mut() else {
                anyhow::bail!("no scaler for {:?}", source.format());
            };
            let mut converted = ffmpeg_next::frame::Video::empty();
            scaler.run(&source, &mut converted)?;
            converted
        };

        video.set_pts(Some(frame.timestamp()));
        if options.force_keyframe {
            video.set_kind(picture::Type::I);
        }
        session.encoder.send_frame(&video)?;
        Ok(())
    }

    fn receive_chunk(&mut self) -> anyhow::Result<Option<EncodedChunk>> {
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };

        let mut packet = Packet::empty();
        match session.encoder.receive_packet(&mut packet) {
            Ok(()) => {
                packet.rescale_ts(session.time_base, MICROS);
                let duration = if packet.duration() > 0 {
                    packet.duration()
                } else {
                    session.frame_duration
                };
                let kind = if packet.is_key() {
                    ChunkKind::Key
                } else {
                    ChunkKind::Delta
                };
                let data = packet.data().map(Bytes::copy_from_slice).unwrap_or_default();
                Ok(Some(EncodedChunk::new(
                    packet.pts().unwrap_or(0),
                    Some(duration),
                    kind,
                    data,
                )))
            }
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        let session = self.session()?;
        if !session.flushed {
            session.encoder.send_eof()?;
            session.flushed = true;
        }
        Ok(())
    }
}
