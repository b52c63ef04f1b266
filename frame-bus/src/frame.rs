use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

const MICROS_PER_SECOND: u128 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Planar YUV 4:2:0
    Yuv420p,
    /// Y plane followed by interleaved UV, 4:2:0
    Nv12,
    /// Packed 8-bit RGBA
    Rgba,
}

impl PixelFormat {
    /// Bytes needed for a tightly packed image of this format.
    pub fn image_size(self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::Yuv420p | PixelFormat::Nv12 => {
                let chroma = w.div_ceil(2) * h.div_ceil(2);
                w * h + chroma * 2
            }
            PixelFormat::Rgba => w * h * 4,
        }
    }
}

/// Decoded picture payload. Cloning shares the pixel bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoImage {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Bytes,
}

impl VideoImage {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Bytes) -> anyhow::Result<Self> {
        if width == 0 || height == 0 {
            anyhow::bail!("invalid video size {}x{}", width, height);
        }
        let expected = format.image_size(width, height);
        if data.len() < expected {
            anyhow::bail!(
                "image data too short for {}x{} {:?}: {} < {}",
                width,
                height,
                format,
                data.len(),
                expected
            );
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// An image with every byte set to `value`.
    pub fn filled(width: u32, height: u32, format: PixelFormat, value: u8) -> anyhow::Result<Self> {
        let data = vec![value; format.image_size(width, height)];
        Self::new(width, height, format, Bytes::from(data))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// Nominal frame rate as a rational `num / den` frames per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FrameRate {
    num: u32,
    den: u32,
}

impl FrameRate {
    /// 29.97 fps
    pub const NTSC: FrameRate = FrameRate {
        num: 30000,
        den: 1001,
    };

    pub fn new(num: u32, den: u32) -> anyhow::Result<Self> {
        if num == 0 || den == 0 {
            anyhow::bail!("invalid frame rate {}/{}", num, den);
        }
        Ok(Self { num, den })
    }

    pub fn num(&self) -> u32 {
        self.num
    }

    pub fn den(&self) -> u32 {
        self.den
    }

    pub fn fps(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Presentation time of frame `index`, in microseconds, rounded to nearest.
    pub fn timestamp_at(&self, index: u64) -> i64 {
        let num = self.num as u128;
        let scaled = index as u128 * MICROS_PER_SECOND * self.den as u128;
        ((scaled + num / 2) / num) as i64
    }

    /// Nominal duration of frame `index`, the gap to the next timestamp.
    pub fn duration_at(&self, index: u64) -> i64 {
        self.timestamp_at(index + 1) - self.timestamp_at(index)
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::NTSC
    }
}

impl Display for FrameRate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl FromStr for FrameRate {
    type Err = anyhow::Error;

    /// Accepts `"30000/1001"` or a whole number such as `"25"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('/') {
            Some((num, den)) => Self::new(num.trim().parse()?, den.trim().parse()?),
            None => Self::new(s.parse()?, 1),
        }
    }
}

impl TryFrom<String> for FrameRate {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FrameRate> for String {
    fn from(rate: FrameRate) -> Self {
        rate.to_string()
    }
}

/// Counts frame acquisitions and releases.
///
/// Every [`Frame`] holds a lease on the ledger it was created from, and
/// returns it when the frame is released. A balanced ledger (`live() == 0`)
/// after a run means no frame leaked.
#[derive(Debug, Clone, Default)]
pub struct FrameLedger {
    inner: Arc<LedgerCounters>,
}

#[derive(Debug, Default)]
struct LedgerCounters {
    acquired: AtomicU64,
    released: AtomicU64,
}

impl FrameLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquired(&self) -> u64 {
        self.inner.acquired.load(Ordering::Acquire)
    }

    pub fn released(&self) -> u64 {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Frames currently held by some consumer.
    pub fn live(&self) -> u64 {
        let released = self.released();
        self.acquired().saturating_sub(released)
    }
}

#[derive(Debug)]
struct Lease {
    ledger: FrameLedger,
}

impl Lease {
    fn acquire(ledger: &FrameLedger) -> Self {
        ledger.inner.acquired.fetch_add(1, Ordering::AcqRel);
        Self {
            ledger: ledger.clone(),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.ledger.inner.released.fetch_add(1, Ordering::AcqRel);
    }
}

/// A decoded frame owned by exactly one consumer.
///
/// `clone` hands out an independently owned frame that shares pixel bytes
/// and takes its own lease. Release with [`Frame::release`] or by dropping.
#[derive(Debug)]
pub struct Frame {
    image: VideoImage,
    timestamp: i64,
    duration: i64,
    lease: Lease,
}

impl Frame {
    pub fn new(image: VideoImage, timestamp: i64, duration: i64, ledger: &FrameLedger) -> Self {
        Self {
            image,
            timestamp,
            duration,
            lease: Lease::acquire(ledger),
        }
    }

    /// Microseconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Microseconds.
    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn image(&self) -> &VideoImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width
    }

    pub fn height(&self) -> u32 {
        self.image.height
    }

    pub fn ledger(&self) -> &FrameLedger {
        &self.lease.ledger
    }

    /// Mutates this frame's pixels. The frame gets its own buffer first, so
    /// clones handed to other consumers are unaffected.
    pub fn write_pixels<F>(&mut self, f: F)
    where
        F: FnOnce(&mut [u8]),
    {
        let mut buf = BytesMut::from(&self.image.data[..]);
        f(&mut buf);
        self.image.data = buf.freeze();
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Clone for Frame {
    fn clone(&self) -> Self {
        Self {
            image: self.image.clone(),
            timestamp: self.timestamp,
            duration: self.duration,
            lease: Lease::acquire(&self.lease.ledger),
        }
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "Frame width: {}, height: {}, format: {:?}, timestamp: {}, duration: {}, data_len: {}",
            self.image.width,
            self.image.height,
            self.image.format,
            self.timestamp,
            self.duration,
            self.image.data.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> VideoImage {
        VideoImage::filled(4, 2, PixelFormat::Yuv420p, 16).unwrap()
    }

    #[test]
    fn test_image_size() {
        assert_eq!(PixelFormat::Yuv420p.image_size(4, 2), 8 + 2 * 2);
        assert_eq!(PixelFormat::Yuv420p.image_size(3, 3), 9 + 4 * 2);
        assert_eq!(PixelFormat::Rgba.image_size(2, 2), 16);
    }

    #[test]
    fn test_image_rejects_short_data() {
        let err = VideoImage::new(4, 4, PixelFormat::Rgba, Bytes::from_static(&[0; 8]));
        assert!(err.is_err());
        assert!(VideoImage::filled(0, 4, PixelFormat::Rgba, 0).is_err());
    }

    #[test]
    fn test_frame_rate_timestamps() {
        let rate = FrameRate::NTSC;
        assert_eq!(rate.timestamp_at(0), 0);
        assert_eq!(rate.timestamp_at(1), 33367);
        assert_eq!(rate.timestamp_at(2), 66733);
        assert_eq!(rate.timestamp_at(30000), 1_001_000_000);
        assert_eq!(rate.duration_at(0), 33367);
        assert_eq!(rate.duration_at(1), 33366);

        let rate = FrameRate::new(25, 1).unwrap();
        assert_eq!(rate.timestamp_at(3), 120_000);
        assert_eq!(rate.duration_at(7), 40_000);
    }

    #[test]
    fn test_frame_rate_parse() {
        assert_eq!("30000/1001".parse::<FrameRate>().unwrap(), FrameRate::NTSC);
        assert_eq!("25".parse::<FrameRate>().unwrap(), FrameRate::new(25, 1).unwrap());
        assert!("0/1".parse::<FrameRate>().is_err());
        assert!("abc".parse::<FrameRate>().is_err());
        assert_eq!(FrameRate::NTSC.to_string(), "30000/1001");
    }

    #[test]
    fn test_frame_rate_serde() {
        let rate: FrameRate = serde_json::from_str("\"60/1\"").unwrap();
        assert_eq!(rate.fps(), 60.0);
        assert_eq!(serde_json::to_string(&rate).unwrap(), "\"60/1\"");
        assert!(serde_json::from_str::<FrameRate>("\"30/0\"").is_err());
    }

    #[test]
    fn test_ledger_counts_clones_and_releases() {
        let ledger = FrameLedger::new();
        let frame = Frame::new(image(), 0, 33_367, &ledger);
        assert_eq!(ledger.live(), 1);

        let copy = frame.clone();
        assert_eq!(ledger.acquired(), 2);
        assert_eq!(ledger.live(), 2);

        frame.release();
        assert_eq!(ledger.live(), 1);
        drop(copy);
        assert_eq!(ledger.live(), 0);
        assert_eq!(ledger.released(), 2);
    }

    #[test]
    fn test_write_pixels_does_not_touch_clones() {
        let ledger = FrameLedger::new();
        let mut a = Frame::new(image(), 1000, 40, &ledger);
        let b = a.clone();

        a.write_pixels(|px| px.fill(200));

        assert!(a.image().data().iter().all(|&p| p == 200));
        assert!(b.image().data().iter().all(|&p| p == 16));
        assert_eq!(b.timestamp(), 1000);
    }
}
