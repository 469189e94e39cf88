//! Frame and packet types for video and audio.
//!
//! [`VideoFrame`] owns a single contiguous allocation holding all planes of
//! one picture; plane offsets are 32-byte aligned so converter and encoder
//! code can rely on the alignment. [`AudioPacket`] owns planar `f32` samples
//! for one delivery from a producer.

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{Error, Result};

/// Maximum number of planes a pixel format can use.
pub const MAX_PLANES: usize = 3;

/// Maximum number of audio channels a packet or source can carry.
pub const MAX_AUDIO_CHANNELS: usize = 8;

/// Upper bound on a single video frame allocation (512 MiB).
///
/// Purely a sanity cap against corrupted dimensions; real frames are orders
/// of magnitude smaller.
pub const MAX_VIDEO_BYTES: usize = 512 * 1024 * 1024;

/// Plane offsets are aligned to this many bytes within a frame allocation.
const PLANE_ALIGNMENT: usize = 32;

/// Video pixel format identifiers (FourCC codes).
///
/// The discriminants are the little-endian FourCC of each format, so a value
/// read from a capture device header converts directly via `try_from`.
///
/// This enum is marked `#[non_exhaustive]` so new formats can be added
/// without breaking existing code. Always use a wildcard pattern when
/// matching.
///
/// # Examples
///
/// ```
/// use framesync::PixelFormat;
///
/// let format = PixelFormat::Nv12;
/// assert_eq!(format.plane_count(), 2);
///
/// // When matching, always include a wildcard for forward compatibility
/// match format {
///     PixelFormat::Bgra | PixelFormat::Rgba => println!("packed RGB"),
///     PixelFormat::Nv12 | PixelFormat::I420 => println!("planar 4:2:0"),
///     _ => println!("other"),
/// }
/// ```
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u32)]
pub enum PixelFormat {
    /// Packed YCbCr 4:2:2 (16 bits per pixel).
    Uyvy = 0x5956_5955,
    /// Semi-planar YCbCr 4:2:0, luma plane plus interleaved chroma plane.
    Nv12 = 0x3231_564E,
    /// Planar YCbCr 4:2:0 (three planes).
    I420 = 0x3032_3449,
    /// Planar YCbCr 4:4:4 (three full-resolution planes).
    I444 = 0x3434_3449,
    /// Blue-Green-Red-Alpha (32 bits per pixel).
    Bgra = 0x4152_4742,
    /// Blue-Green-Red with padding byte (32 bits per pixel).
    Bgrx = 0x5852_4742,
    /// Red-Green-Blue-Alpha (32 bits per pixel).
    Rgba = 0x4142_4752,
}

impl PixelFormat {
    /// Number of planes this format stores.
    #[must_use]
    pub fn plane_count(self) -> usize {
        match self {
            PixelFormat::Uyvy | PixelFormat::Bgra | PixelFormat::Bgrx | PixelFormat::Rgba => 1,
            PixelFormat::Nv12 => 2,
            PixelFormat::I420 | PixelFormat::I444 => 3,
        }
    }

    /// Whether this format is a packed 4-byte RGB variant.
    #[must_use]
    pub fn is_packed_rgb(self) -> bool {
        matches!(
            self,
            PixelFormat::Bgra | PixelFormat::Bgrx | PixelFormat::Rgba
        )
    }
}

/// Color space of a video frame or output.
///
/// `Default` negotiates as BT.709 during subscriber format matching (see
/// [`crate::convert`]); the remaining values follow broadcast conventions.
/// The numeric coefficients belong to the external converter, not this
/// crate.
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
#[repr(u32)]
pub enum ColorSpace {
    /// Unspecified; treated as BT.709 when matching.
    Default = 0,
    /// BT.601 (standard definition).
    Bt601 = 1,
    /// BT.709 (high definition).
    Bt709 = 2,
    /// sRGB primaries with BT.709 transfer.
    Srgb = 3,
    /// BT.2100 with PQ transfer.
    Bt2100Pq = 4,
    /// BT.2100 with HLG transfer.
    Bt2100Hlg = 5,
}

/// Quantization range of a video frame or output.
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
#[repr(u32)]
pub enum ColorRange {
    /// Unspecified; treated as partial.
    Default = 0,
    /// Limited/video range (16..235 for 8-bit luma).
    Partial = 1,
    /// Full range (0..255).
    Full = 2,
}

/// Byte layout of one plane inside a [`VideoFrame`] allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Byte offset of the plane within the frame buffer.
    pub offset: usize,
    /// Bytes per row.
    pub linesize: usize,
    /// Number of rows.
    pub rows: usize,
}

impl PlaneLayout {
    fn len(&self) -> usize {
        self.linesize * self.rows
    }
}

fn align_plane(offset: usize) -> usize {
    (offset + PLANE_ALIGNMENT - 1) & !(PLANE_ALIGNMENT - 1)
}

/// Computes the plane layouts and total buffer size for one frame.
///
/// Chroma planes of 4:2:0 formats round odd dimensions up, matching what
/// capture hardware produces.
///
/// # Errors
///
/// Returns [`Error::InvalidFrame`] for zero dimensions or a total size over
/// [`MAX_VIDEO_BYTES`].
pub fn plane_layout(
    format: PixelFormat,
    width: u32,
    height: u32,
) -> Result<(usize, Vec<PlaneLayout>)> {
    if width == 0 || height == 0 {
        return Err(Error::InvalidFrame(format!(
            "Frame dimensions must be non-zero, got {width}x{height}"
        )));
    }

    let w = width as usize;
    let h = height as usize;
    let half_w = w.div_ceil(2);
    let half_h = h.div_ceil(2);

    let shapes: &[(usize, usize)] = match format {
        PixelFormat::Bgra | PixelFormat::Bgrx | PixelFormat::Rgba => &[(w * 4, h)],
        PixelFormat::Uyvy => &[(w * 2, h)],
        PixelFormat::Nv12 => &[(w, h), (half_w * 2, half_h)],
        PixelFormat::I420 => &[(w, h), (half_w, half_h), (half_w, half_h)],
        PixelFormat::I444 => &[(w, h), (w, h), (w, h)],
    };

    let mut planes = Vec::with_capacity(shapes.len());
    let mut offset = 0usize;
    for &(linesize, rows) in shapes {
        offset = align_plane(offset);
        planes.push(PlaneLayout {
            offset,
            linesize,
            rows,
        });
        // Plane byte totals of extreme u32 dimensions do not fit in usize.
        offset = linesize
            .checked_mul(rows)
            .and_then(|len| offset.checked_add(len))
            .filter(|&total| total <= MAX_VIDEO_BYTES)
            .ok_or_else(|| {
                Error::InvalidFrame(format!(
                    "Frame exceeds maximum size: {format:?} {width}x{height} > {MAX_VIDEO_BYTES} bytes"
                ))
            })?;
    }

    Ok((offset, planes))
}

/// One video frame with owned pixel data.
///
/// A frame's buffer layout is fixed at allocation; `timestamp` is the only
/// field expected to change as the frame moves through a cache or pool.
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Presentation time in nanoseconds on the engine's monotonic timeline.
    pub timestamp: u64,
    data: Vec<u8>,
    planes: Vec<PlaneLayout>,
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("timestamp", &self.timestamp)
            .field("data (bytes)", &self.data.len())
            .field("planes", &self.planes.len())
            .finish()
    }
}

impl VideoFrame {
    /// Allocates a zeroed frame for the given shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFrame`] for zero dimensions or an oversized
    /// allocation.
    pub fn alloc(format: PixelFormat, width: u32, height: u32) -> Result<VideoFrame> {
        let (size, planes) = plane_layout(format, width, height)?;
        Ok(VideoFrame {
            width,
            height,
            format,
            timestamp: 0,
            data: vec![0u8; size],
            planes,
        })
    }

    /// Create a builder for configuring a video frame.
    pub fn builder() -> VideoFrameBuilder {
        VideoFrameBuilder::new()
    }

    /// Whether this frame has the given shape.
    #[must_use]
    pub fn matches_shape(&self, format: PixelFormat, width: u32, height: u32) -> bool {
        self.format == format && self.width == width && self.height == height
    }

    /// Number of planes in this frame.
    #[must_use]
    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    /// Bytes per row of plane `index`.
    ///
    /// Returns 0 for an out-of-range index.
    #[must_use]
    pub fn linesize(&self, index: usize) -> usize {
        self.planes.get(index).map_or(0, |p| p.linesize)
    }

    /// Read access to plane `index`.
    #[must_use]
    pub fn plane(&self, index: usize) -> &[u8] {
        match self.planes.get(index) {
            Some(p) => &self.data[p.offset..p.offset + p.len()],
            None => &[],
        }
    }

    /// Write access to plane `index`.
    pub fn plane_mut(&mut self, index: usize) -> &mut [u8] {
        match self.planes.get(index) {
            Some(p) => {
                let (offset, len) = (p.offset, p.len());
                &mut self.data[offset..offset + len]
            }
            None => &mut [],
        }
    }

    /// The whole backing buffer, all planes included.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the whole backing buffer.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copies another frame's pixels and timestamp into this frame.
    ///
    /// Both frames must share a shape; layouts of same-shape frames are
    /// identical, so this is a single buffer copy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFrame`] on shape mismatch.
    pub fn copy_content_from(&mut self, other: &VideoFrame) -> Result<()> {
        if !self.matches_shape(other.format, other.width, other.height) {
            return Err(Error::InvalidFrame(format!(
                "Cannot copy {:?} {}x{} into {:?} {}x{}",
                other.format, other.width, other.height, self.format, self.width, self.height
            )));
        }
        self.data.copy_from_slice(&other.data);
        self.timestamp = other.timestamp;
        Ok(())
    }

    /// Reshapes this frame in place, reusing the allocation when possible.
    pub(crate) fn reset_shape(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let (size, planes) = plane_layout(format, width, height)?;
        self.data.clear();
        self.data.resize(size, 0);
        self.planes = planes;
        self.format = format;
        self.width = width;
        self.height = height;
        self.timestamp = 0;
        Ok(())
    }

    #[cfg(feature = "image-encoding")]
    fn packed_rgba_rows(&self) -> Result<Vec<u8>> {
        if !self.format.is_packed_rgb() {
            return Err(Error::Encoding(format!(
                "Unsupported format for image encoding: {:?}. Only BGRA/BGRX/RGBA are supported.",
                self.format
            )));
        }

        let tight = self.width as usize * 4;
        let plane = self.plane(0);
        let linesize = self.linesize(0);

        let mut rgba = Vec::with_capacity(tight * self.height as usize);
        for row in plane.chunks_exact(linesize) {
            rgba.extend_from_slice(&row[..tight]);
        }

        if matches!(self.format, PixelFormat::Bgra | PixelFormat::Bgrx) {
            for chunk in rgba.chunks_exact_mut(4) {
                chunk.swap(0, 2);
            }
        }
        Ok(rgba)
    }

    /// Encode the frame as PNG bytes.
    ///
    /// Intended for debugging delivered output: dump what a subscriber
    /// received and inspect it. Only packed RGB formats are supported;
    /// planar frames must go through a converter first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if the format is not BGRA/BGRX/RGBA or
    /// the PNG writer fails.
    #[cfg(feature = "image-encoding")]
    pub fn encode_png(&self) -> Result<Vec<u8>> {
        use png::{BitDepth, ColorType, Encoder};

        let rgba = self.packed_rgba_rows()?;

        let mut png_data = Vec::new();
        let mut encoder = Encoder::new(&mut png_data, self.width, self.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);

        encoder
            .write_header()
            .and_then(|mut writer| writer.write_image_data(&rgba))
            .map_err(|e| Error::Encoding(format!("PNG encoding failed: {e}")))?;

        Ok(png_data)
    }

    /// Encode the frame as JPEG bytes with the given quality (1..=100).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if the format is not BGRA/BGRX/RGBA or
    /// the JPEG encoder fails.
    #[cfg(feature = "image-encoding")]
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        use jpeg_encoder::{ColorType as JpegColorType, Encoder as JpegEncoder};

        let rgba = self.packed_rgba_rows()?;
        // JPEG has no alpha channel.
        let rgb: Vec<u8> = rgba
            .chunks_exact(4)
            .flat_map(|chunk| [chunk[0], chunk[1], chunk[2]])
            .collect();

        let mut jpeg_data = Vec::new();
        let encoder = JpegEncoder::new(&mut jpeg_data, quality);
        encoder
            .encode(
                &rgb,
                self.width as u16,
                self.height as u16,
                JpegColorType::Rgb,
            )
            .map_err(|e| Error::Encoding(format!("JPEG encoding failed: {e}")))?;

        Ok(jpeg_data)
    }

    /// Encode the frame as a base64 data URL for embedding in HTML/JSON.
    ///
    /// Produces `data:image/png;base64,...` or `data:image/jpeg;base64,...`.
    ///
    /// # Errors
    ///
    /// Propagates the underlying [`encode_png`](Self::encode_png) or
    /// [`encode_jpeg`](Self::encode_jpeg) error.
    #[cfg(feature = "image-encoding")]
    pub fn encode_data_url(&self, format: ImageFormat) -> Result<String> {
        use base64::{engine::general_purpose::STANDARD, Engine};

        let (mime_type, image_bytes) = match format {
            ImageFormat::Png => ("image/png", self.encode_png()?),
            ImageFormat::Jpeg(quality) => ("image/jpeg", self.encode_jpeg(quality)?),
        };

        let base64_data = STANDARD.encode(&image_bytes);
        Ok(format!("data:{mime_type};base64,{base64_data}"))
    }
}

/// Output image format for [`VideoFrame::encode_data_url`].
#[cfg(feature = "image-encoding")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Lossless PNG.
    Png,
    /// JPEG with quality 1..=100.
    Jpeg(u8),
}

/// Builder for configuring a [`VideoFrame`] with ergonomic method chaining.
#[derive(Debug, Clone)]
pub struct VideoFrameBuilder {
    width: Option<u32>,
    height: Option<u32>,
    format: Option<PixelFormat>,
    timestamp: Option<u64>,
}

impl VideoFrameBuilder {
    /// Create a new builder with no fields set.
    pub fn new() -> Self {
        Self {
            width: None,
            height: None,
            format: None,
            timestamp: None,
        }
    }

    /// Set the frame resolution.
    #[must_use]
    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Set the pixel format.
    #[must_use]
    pub fn format(mut self, format: PixelFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Set the presentation timestamp in nanoseconds.
    #[must_use]
    pub fn timestamp(mut self, ts: u64) -> Self {
        self.timestamp = Some(ts);
        self
    }

    /// Build the frame, allocating a zeroed buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFrame`] for an invalid shape.
    pub fn build(self) -> Result<VideoFrame> {
        let width = self.width.unwrap_or(1920);
        let height = self.height.unwrap_or(1080);
        let format = self.format.unwrap_or(PixelFormat::Bgra);

        let mut frame = VideoFrame::alloc(format, width, height)?;
        frame.timestamp = self.timestamp.unwrap_or(0);
        Ok(frame)
    }
}

impl Default for VideoFrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One delivery of planar `f32` audio from a producer.
///
/// Samples are stored channel-major: all of channel 0, then all of
/// channel 1, and so on. `sample_rate` is public so callers feeding a
/// degenerate stream (rate 0) get the documented no-op behavior instead of
/// an error path.
#[derive(Debug, Clone)]
pub struct AudioPacket {
    pub sample_rate: u32,
    pub channels: usize,
    pub frames: usize,
    /// Capture time of the first sample, nanoseconds in the producer's
    /// timing domain.
    pub timestamp: u64,
    data: Vec<f32>,
}

impl AudioPacket {
    /// Create a builder for configuring an audio packet.
    pub fn builder() -> AudioPacketBuilder {
        AudioPacketBuilder::new()
    }

    /// Samples for one channel.
    ///
    /// Returns `None` for an out-of-range channel.
    #[must_use]
    pub fn plane(&self, channel: usize) -> Option<&[f32]> {
        if channel >= self.channels {
            return None;
        }
        let start = channel * self.frames;
        Some(&self.data[start..start + self.frames])
    }

    /// Duration of this packet in nanoseconds (0 when the rate is 0).
    #[must_use]
    pub fn duration_ns(&self) -> u64 {
        crate::clock::frames_to_ns(self.frames as u64, self.sample_rate)
    }
}

/// Builder for configuring an [`AudioPacket`] with ergonomic method chaining.
#[derive(Debug, Clone)]
pub struct AudioPacketBuilder {
    sample_rate: Option<u32>,
    channels: Option<usize>,
    frames: Option<usize>,
    timestamp: Option<u64>,
    data: Option<Vec<f32>>,
}

impl AudioPacketBuilder {
    /// Create a new builder with no fields set.
    pub fn new() -> Self {
        Self {
            sample_rate: None,
            channels: None,
            frames: None,
            timestamp: None,
            data: None,
        }
    }

    /// Set the sample rate.
    #[must_use]
    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    /// Set the number of channels.
    #[must_use]
    pub fn channels(mut self, channels: usize) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Set the number of frames (samples per channel).
    #[must_use]
    pub fn frames(mut self, frames: usize) -> Self {
        self.frames = Some(frames);
        self
    }

    /// Set the capture timestamp in nanoseconds.
    #[must_use]
    pub fn timestamp(mut self, ts: u64) -> Self {
        self.timestamp = Some(ts);
        self
    }

    /// Provide channel-major sample data.
    ///
    /// Length must equal `channels * frames`; without this call the packet
    /// is built with silence.
    #[must_use]
    pub fn data(mut self, data: Vec<f32>) -> Self {
        self.data = Some(data);
        self
    }

    /// Build the packet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFrame`] if:
    /// - The channel count is 0 or above [`MAX_AUDIO_CHANNELS`]
    /// - The frame count is 0
    /// - Supplied data length does not equal `channels * frames`
    pub fn build(self) -> Result<AudioPacket> {
        let sample_rate = self.sample_rate.unwrap_or(48_000);
        let channels = self.channels.unwrap_or(2);
        let frames = self.frames.unwrap_or(0);

        if channels == 0 || channels > MAX_AUDIO_CHANNELS {
            return Err(Error::InvalidFrame(format!(
                "Invalid channel count: {channels} (must be 1..={MAX_AUDIO_CHANNELS})"
            )));
        }
        if frames == 0 {
            return Err(Error::InvalidFrame("Packet has zero frames".into()));
        }

        let expected = channels * frames;
        let data = match self.data {
            Some(data) => {
                if data.len() != expected {
                    return Err(Error::InvalidFrame(format!(
                        "Data length {} does not match {channels} channels x {frames} frames",
                        data.len()
                    )));
                }
                data
            }
            None => vec![0.0; expected],
        };

        Ok(AudioPacket {
            sample_rate,
            channels,
            frames,
            timestamp: self.timestamp.unwrap_or(0),
            data,
        })
    }
}

impl Default for AudioPacketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_rgb_layout_is_single_plane() {
        let (size, planes) = plane_layout(PixelFormat::Bgra, 1920, 1080).unwrap();
        assert_eq!(planes.len(), 1);
        assert_eq!(planes[0].linesize, 1920 * 4);
        assert_eq!(size, 1920 * 1080 * 4);
    }

    #[test]
    fn nv12_layout_has_aligned_chroma_offset() {
        let (_, planes) = plane_layout(PixelFormat::Nv12, 1280, 720).unwrap();
        assert_eq!(planes.len(), 2);
        assert_eq!(planes[0].linesize, 1280);
        assert_eq!(planes[1].linesize, 1280);
        assert_eq!(planes[1].rows, 360);
        assert_eq!(planes[1].offset % 32, 0);
    }

    #[test]
    fn i420_odd_dimensions_round_chroma_up() {
        let (_, planes) = plane_layout(PixelFormat::I420, 639, 479).unwrap();
        assert_eq!(planes[1].linesize, 320);
        assert_eq!(planes[1].rows, 240);
        assert_eq!(planes[2].linesize, 320);
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(plane_layout(PixelFormat::Bgra, 0, 1080).is_err());
        assert!(VideoFrame::alloc(PixelFormat::Uyvy, 640, 0).is_err());
    }

    #[test]
    fn extreme_dimensions_are_rejected() {
        // Past the byte cap without overflowing.
        assert!(matches!(
            plane_layout(PixelFormat::Bgra, 16_384, 16_384),
            Err(Error::InvalidFrame(_))
        ));
        // Plane byte totals past usize.
        assert!(matches!(
            plane_layout(PixelFormat::Bgra, u32::MAX, u32::MAX),
            Err(Error::InvalidFrame(_))
        ));
        assert!(matches!(
            plane_layout(PixelFormat::I420, u32::MAX, u32::MAX),
            Err(Error::InvalidFrame(_))
        ));
        assert!(VideoFrame::alloc(PixelFormat::Uyvy, u32::MAX, u32::MAX).is_err());
    }

    #[test]
    fn frame_builder_applies_defaults() {
        let frame = VideoFrame::builder().build().unwrap();
        assert_eq!(frame.width, 1920);
        assert_eq!(frame.height, 1080);
        assert_eq!(frame.format, PixelFormat::Bgra);
        assert_eq!(frame.timestamp, 0);
        assert_eq!(frame.data().len(), 1920 * 1080 * 4);
    }

    #[test]
    fn plane_accessors_cover_whole_buffer() {
        let frame = VideoFrame::alloc(PixelFormat::I444, 64, 64).unwrap();
        let total: usize = (0..frame.plane_count()).map(|i| frame.plane(i).len()).sum();
        // Three aligned 64x64 planes with no tail padding.
        assert_eq!(total, frame.data().len());
        assert!(frame.plane(3).is_empty());
    }

    #[test]
    fn copy_content_requires_matching_shape() {
        let mut dst = VideoFrame::alloc(PixelFormat::Bgra, 64, 64).unwrap();
        let mut src = VideoFrame::alloc(PixelFormat::Bgra, 64, 64).unwrap();
        src.timestamp = 77;
        src.plane_mut(0)[0] = 0xAB;
        dst.copy_content_from(&src).unwrap();
        assert_eq!(dst.plane(0)[0], 0xAB);
        assert_eq!(dst.timestamp, 77);

        let other = VideoFrame::alloc(PixelFormat::Nv12, 64, 64).unwrap();
        assert!(dst.copy_content_from(&other).is_err());
    }

    #[test]
    fn reset_shape_reuses_frame() {
        let mut frame = VideoFrame::alloc(PixelFormat::Bgra, 32, 32).unwrap();
        frame.timestamp = 5;
        frame.reset_shape(PixelFormat::Nv12, 64, 48).unwrap();
        assert!(frame.matches_shape(PixelFormat::Nv12, 64, 48));
        assert_eq!(frame.timestamp, 0);
        assert!(frame.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn pixel_format_fourcc_roundtrip() {
        let raw: u32 = PixelFormat::Nv12.into();
        assert_eq!(raw, u32::from_le_bytes(*b"NV12"));
        assert_eq!(PixelFormat::try_from(raw).unwrap(), PixelFormat::Nv12);
        assert!(PixelFormat::try_from(0xDEAD_BEEFu32).is_err());
    }

    #[test]
    fn audio_packet_builder_validates() {
        let packet = AudioPacket::builder()
            .sample_rate(48_000)
            .channels(2)
            .frames(480)
            .timestamp(123)
            .build()
            .unwrap();
        assert_eq!(packet.plane(0).unwrap().len(), 480);
        assert_eq!(packet.plane(1).unwrap().len(), 480);
        assert!(packet.plane(2).is_none());
        assert_eq!(packet.duration_ns(), 10_000_000);

        assert!(AudioPacket::builder().channels(0).frames(10).build().is_err());
        assert!(AudioPacket::builder().channels(9).frames(10).build().is_err());
        assert!(AudioPacket::builder().channels(2).frames(0).build().is_err());
        assert!(AudioPacket::builder()
            .channels(2)
            .frames(4)
            .data(vec![0.0; 7])
            .build()
            .is_err());
    }

    #[test]
    fn audio_packet_planes_are_channel_major() {
        let data: Vec<f32> = (0..8).map(|i| i as f32).collect();
        let packet = AudioPacket::builder()
            .channels(2)
            .frames(4)
            .data(data)
            .build()
            .unwrap();
        assert_eq!(packet.plane(0).unwrap(), &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(packet.plane(1).unwrap(), &[4.0, 5.0, 6.0, 7.0]);
    }

    #[cfg(feature = "image-encoding")]
    #[test]
    fn encode_png_rejects_planar_formats() {
        let frame = VideoFrame::alloc(PixelFormat::Nv12, 64, 64).unwrap();
        assert!(frame.encode_png().is_err());
    }

    #[cfg(feature = "image-encoding")]
    #[test]
    fn encode_png_produces_png_magic() {
        let frame = VideoFrame::alloc(PixelFormat::Bgra, 16, 16).unwrap();
        let bytes = frame.encode_png().unwrap();
        assert_eq!(&bytes[..8], &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n']);
    }
}
