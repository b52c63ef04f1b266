//! Copies between tightly packed [`VideoImage`]s and strided FFmpeg frames.

use bytes::BytesMut;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video;

use crate::frame::{PixelFormat, VideoImage};

pub fn pixel_of(format: PixelFormat) -> Pixel {
    match format {
        PixelFormat::Yuv420p => Pixel::YUV420P,
        PixelFormat::Nv12 => Pixel::NV12,
        PixelFormat::Rgba => Pixel::RGBA,
    }
}

pub fn format_of(pixel: Pixel) -> Option<PixelFormat> {
    match pixel {
        Pixel::YUV420P => Some(PixelFormat::Yuv420p),
        Pixel::NV12 => Some(PixelFormat::Nv12),
        Pixel::RGBA => Some(PixelFormat::Rgba),
        _ => None,
    }
}

/// Bytes of picture data in one row of `plane`, without padding.
fn row_bytes(format: PixelFormat, plane: usize, width: u32) -> usize {
    let width = width as usize;
    match (format, plane) {
        (PixelFormat::Rgba, _) => width * 4,
        (_, 0) => width,
        (PixelFormat::Yuv420p, _) => width.div_ceil(2),
        (PixelFormat::Nv12, _) => width.div_ceil(2) * 2,
    }
}

pub fn to_video_frame(image: &VideoImage) -> Video {
    let format = image.format();
    let mut frame = Video::new(pixel_of(format), image.width(), image.height());
    let data = image.data();
    let mut offset = 0;
    for plane in 0..frame.planes() {
        let row = row_bytes(format, plane, image.width());
        let rows = frame.plane_height(plane) as usize;
        let stride = frame.stride(plane);
        let dst = frame.data_mut(plane);
        for r in 0..rows {
            dst[r * stride..r * stride + row].copy_from_slice(&data[offset..offset + row]);
            offset += row;
        }
    }
    frame
}

pub fn from_video_frame(frame: &Video) -> anyhow::Result<VideoImage> {
    let format = format_of(frame.format())
        .ok_or_else(|| anyhow::anyhow!("unsupported pixel format {:?}", frame.format()))?;
    let mut data = BytesMut::with_capacity(format.image_size(frame.width(), frame.height()));
    for plane in 0..frame.planes() {
        let row = row_bytes(format, plane, frame.width());
        let rows = frame.plane_height(plane) as usize;
        let stride = frame.stride(plane);
        let src = frame.data(plane);
        for r in 0..rows {
            data.extend_from_slice(&src[r * stride..r * stride + row]);
        }
    }
    VideoImage::new(frame.width(), frame.height(), format, data.freeze())
}
