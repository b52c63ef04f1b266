//! Encoder discovery for software and hardware-accelerated codecs.

use ffmpeg_next::format::Pixel;

/// FFmpeg software encoder for a codec name such as `"h264"`.
pub fn software_encoder_name(codec: &str) -> &str {
    match codec {
        "h264" | "avc" => "libx264",
        "hevc" | "h265" => "libx265",
        "vp9" => "libvpx-vp9",
        "vp8" => "libvpx",
        "av1" => "libaom-av1",
        other => other,
    }
}

/// Try to find a hardware-accelerated encoder for the given codec name.
/// Returns the first one FFmpeg was built with, or None.
pub fn find_hw_encoder(codec: &str) -> Option<ffmpeg_next::Codec> {
    let hw_names: &[&str] = match codec {
        "libx264" | "h264" | "avc" => &["h264_nvenc", "h264_vaapi", "h264_qsv", "h264_v4l2m2m"],
        "libx265" | "hevc" | "h265" => &["hevc_nvenc", "hevc_vaapi", "hevc_qsv", "hevc_v4l2m2m"],
        "libvpx-vp9" | "vp9" => &["vp9_vaapi", "vp9_qsv"],
        "libaom-av1" | "libsvtav1" | "av1" => &["av1_nvenc", "av1_vaapi", "av1_qsv"],
        _ => &[],
    };

    for name in hw_names {
        if let Some(codec) = ffmpeg_next::encoder::find_by_name(name) {
            log::info!("found hardware encoder: {}", name);
            return Some(codec);
        }
    }
    None
}

pub fn is_hw_encoder(name: &str) -> bool {
    name.contains("nvenc") || name.contains("vaapi") || name.contains("qsv") || name.contains("v4l2m2m")
}

/// Input pixel format for an encoder: hardware encoders take NV12, software
/// ones YUV420P.
pub fn pixel_format_for_encoder(encoder_name: &str) -> Pixel {
    if is_hw_encoder(encoder_name) {
        Pixel::NV12
    } else {
        Pixel::YUV420P
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_software_encoder_name() {
        assert_eq!(software_encoder_name("h264"), "libx264");
        assert_eq!(software_encoder_name("hevc"), "libx265");
        assert_eq!(software_encoder_name("mpeg4"), "mpeg4");
    }

    #[test]
    fn test_pixel_format_for_encoder() {
        assert_eq!(pixel_format_for_encoder("h264_nvenc"), Pixel::NV12);
        assert_eq!(pixel_format_for_encoder("h264_vaapi"), Pixel::NV12);
        assert_eq!(pixel_format_for_encoder("libx264"), Pixel::YUV420P);
    }
}
