//! Subscriber format negotiation and the scaler seam.
//!
//! The synchronization core never touches pixel math. When a subscriber asks
//! for a shape other than the output's native one, the output asks its
//! [`ScalerFactory`] for a [`FrameScaler`] and runs frames through it before
//! delivery. The default factory refuses every conversion, which turns a
//! mismatched `connect` into an explicit error instead of silently wrong
//! output; applications wire in a real converter (swscale, libyuv, a GPU
//! path) by implementing the two traits.

use crate::{
    frames::{ColorRange, ColorSpace, PixelFormat, VideoFrame},
    Result,
};

/// Desired shape of frames delivered to one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleInfo {
    pub format: PixelFormat,
    /// Target width; 0 means "use the output's native width".
    pub width: u32,
    /// Target height; 0 means "use the output's native height".
    pub height: u32,
    pub range: ColorRange,
    pub colorspace: ColorSpace,
}

impl ScaleInfo {
    /// A scale request for `format` at native size with unspecified
    /// range/colorspace.
    #[must_use]
    pub fn new(format: PixelFormat) -> Self {
        Self {
            format,
            width: 0,
            height: 0,
            range: ColorRange::Default,
            colorspace: ColorSpace::Default,
        }
    }

    /// Sets an explicit target size.
    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Sets an explicit quantization range.
    #[must_use]
    pub fn with_range(mut self, range: ColorRange) -> Self {
        self.range = range;
        self
    }

    /// Sets an explicit color space.
    #[must_use]
    pub fn with_colorspace(mut self, colorspace: ColorSpace) -> Self {
        self.colorspace = colorspace;
        self
    }

    /// Fills zero dimensions from the native shape.
    #[must_use]
    pub fn normalized_against(mut self, native: &ScaleInfo) -> Self {
        if self.width == 0 {
            self.width = native.width;
        }
        if self.height == 0 {
            self.height = native.height;
        }
        self
    }

    /// Whether delivering `native` frames to this request needs a scaler.
    ///
    /// Range and colorspace comparisons use the equivalence classes of
    /// [`match_range`] and [`match_space`], so e.g. an sRGB request against
    /// a BT.709 output is served without conversion.
    #[must_use]
    pub fn scale_required(&self, native: &ScaleInfo) -> bool {
        self.width != native.width
            || self.height != native.height
            || self.format != native.format
            || !match_range(self.range, native.range)
            || !match_space(self.colorspace, native.colorspace)
    }
}

/// Whether two ranges quantize identically (everything non-full is partial).
#[must_use]
pub fn match_range(a: ColorRange, b: ColorRange) -> bool {
    (a == ColorRange::Full) == (b == ColorRange::Full)
}

/// Collapses a color space to its conversion equivalence class.
///
/// Default and sRGB share BT.709 math; HLG shares PQ primaries. These are
/// the only distinctions the converter seam cares about.
#[must_use]
pub fn collapse_space(cs: ColorSpace) -> ColorSpace {
    match cs {
        ColorSpace::Default | ColorSpace::Srgb => ColorSpace::Bt709,
        ColorSpace::Bt2100Hlg => ColorSpace::Bt2100Pq,
        other => other,
    }
}

/// Whether two color spaces convert identically.
#[must_use]
pub fn match_space(a: ColorSpace, b: ColorSpace) -> bool {
    collapse_space(a) == collapse_space(b)
}

/// A pixel-format/size/colorspace converter for one subscriber.
///
/// Implementations may keep per-instance scratch state; the output
/// guarantees a scaler is only ever invoked from one thread at a time.
/// Returning `false` skips delivery to that subscriber for the current
/// frame only.
pub trait FrameScaler: Send {
    /// Converts `src` into `dst` (already allocated at the target shape).
    fn scale(&mut self, src: &VideoFrame, dst: &mut VideoFrame) -> bool;
}

/// Opaque by design: scaler state is implementation-private, but a `Debug`
/// impl lets `Result<Box<dyn FrameScaler>>` be unwrapped in callers.
impl std::fmt::Debug for dyn FrameScaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn FrameScaler")
    }
}

/// Creates [`FrameScaler`] instances on demand.
///
/// Called under the subscriber-registry lock during `connect`, never on the
/// delivery path.
pub trait ScalerFactory: Send + Sync {
    /// Builds a scaler converting `from` frames into `to` frames.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ScalerUnavailable`] when the conversion is
    /// not supported; the `connect` that requested it fails.
    fn create(&self, from: &ScaleInfo, to: &ScaleInfo) -> Result<Box<dyn FrameScaler>>;
}

/// The default [`ScalerFactory`]: refuses every conversion.
///
/// Outputs built without an explicit factory use this, so a subscriber
/// requesting a non-native shape gets an immediate
/// [`crate::Error::ScalerUnavailable`] from `connect`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoScalerFactory;

impl ScalerFactory for NoScalerFactory {
    fn create(&self, from: &ScaleInfo, to: &ScaleInfo) -> Result<Box<dyn FrameScaler>> {
        Err(crate::Error::ScalerUnavailable(format!(
            "no converter configured for {:?} {}x{} -> {:?} {}x{}",
            from.format, from.width, from.height, to.format, to.width, to.height
        )))
    }
}
