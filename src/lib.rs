#![forbid(unsafe_code)]

extern crate alloc;

pub mod cache;
pub mod dither;
pub mod error;
pub mod histogram;
pub mod octree;
pub mod palette;
pub mod pixel_map;
pub mod remap;
pub mod wu;

pub use dither::{Dither, ErrorDiffusion};
pub use error::QuantizeError;
pub use imgref::{ImgRef, ImgVec};
pub use octree::OctreeQuantizer;
pub use palette::Palette;
pub use remap::IndexedFrame;
pub use rgb::RGBA8;
pub use wu::WuQuantizer;

/// Which cache backs nearest-color matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMatchingMode {
    /// Direct-indexed approximate cache. Fastest, may return a near-nearest entry.
    Coarse,
    /// Exact for the first 512 distinct colors, approximate after that.
    #[default]
    Hybrid,
    /// No cache; every miss is a full palette scan.
    ///
    /// Applies wherever the pixel map answers: dithered passes, and octree colors the
    /// tree has no path for. A Wu quantizer without dithering answers from its box tags
    /// in every mode, which can differ from the nearest entry.
    Exact,
}

/// Palette-building algorithm for [`quantize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// Variance-minimizing box cuts over an RGBA moment histogram.
    #[default]
    Wu,
    /// Bit-plane octree with bottom-up leaf reduction. Palette entries are opaque.
    Octree,
}

/// Configuration shared by both quantizers.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizerOptions {
    /// Maximum number of palette colors (1..=256).
    pub max_colors: u32,
    /// Error diffusion for the second pass. `None` maps pixels directly.
    pub dither: Option<ErrorDiffusion>,
    /// Fraction of the error handed to the ditherer (0.0–1.0).
    pub dither_scale: f32,
    /// Palette entries whose `alpha / 255` is below this become
    /// `threshold_replacement_color`.
    pub transparency_threshold: f32,
    pub threshold_replacement_color: RGBA8,
    pub color_matching_mode: ColorMatchingMode,
}

impl Default for QuantizerOptions {
    fn default() -> Self {
        Self {
            max_colors: 256,
            dither: Some(ErrorDiffusion::FloydSteinberg),
            dither_scale: 1.0,
            transparency_threshold: 64.0 / 255.0,
            threshold_replacement_color: RGBA8::new(0, 0, 0, 0),
            color_matching_mode: ColorMatchingMode::Hybrid,
        }
    }
}

impl QuantizerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_colors(mut self, n: u32) -> Self {
        self.max_colors = n;
        self
    }

    pub fn dither(mut self, dither: Option<ErrorDiffusion>) -> Self {
        self.dither = dither;
        self
    }

    pub fn dither_scale(mut self, scale: f32) -> Self {
        self.dither_scale = scale;
        self
    }

    pub fn transparency_threshold(mut self, threshold: f32) -> Self {
        self.transparency_threshold = threshold;
        self
    }

    pub fn threshold_replacement_color(mut self, color: RGBA8) -> Self {
        self.threshold_replacement_color = color;
        self
    }

    pub fn color_matching_mode(mut self, mode: ColorMatchingMode) -> Self {
        self.color_matching_mode = mode;
        self
    }

    pub fn is_dithering(&self) -> bool {
        self.dither.is_some()
    }

    pub fn validate(&self) -> Result<(), QuantizeError> {
        if self.max_colors < 1 || self.max_colors > 256 {
            return Err(QuantizeError::InvalidMaxColors(self.max_colors));
        }
        if !(0.0..=1.0).contains(&self.dither_scale) {
            return Err(QuantizeError::InvalidDitherScale(self.dither_scale));
        }
        if !(0.0..=1.0).contains(&self.transparency_threshold) {
            return Err(QuantizeError::InvalidTransparencyThreshold(
                self.transparency_threshold,
            ));
        }
        Ok(())
    }
}

/// Two-pass palette quantizer.
///
/// Feed sample regions with [`add_palette_colors`](Quantizer::add_palette_colors), then
/// read [`palette`](Quantizer::palette) or map frames. The palette is resolved on first
/// read; after that no more colors can be added until [`clear`](Quantizer::clear).
pub trait Quantizer {
    fn options(&self) -> &QuantizerOptions;

    /// Accumulate the colors of `region` into the histogram.
    fn add_palette_colors(&mut self, region: ImgRef<'_, RGBA8>) -> Result<(), QuantizeError>;

    /// The resolved palette, resolving it first if needed.
    fn palette(&mut self) -> Result<&Palette, QuantizeError>;

    /// Palette index and color for one pixel.
    fn quantized_color(&mut self, color: RGBA8) -> Result<(u8, RGBA8), QuantizeError>;

    /// Map every pixel of `source` using the configured dithering.
    fn quantize_frame(&mut self, source: ImgRef<'_, RGBA8>) -> Result<IndexedFrame, QuantizeError>;

    /// Map every pixel of `source` through a caller-supplied ditherer.
    fn quantize_frame_with<D: Dither + ?Sized>(
        &mut self,
        source: ImgRef<'_, RGBA8>,
        dither: &D,
    ) -> Result<IndexedFrame, QuantizeError>
    where
        Self: Sized;

    /// Forget the histogram, palette and cache.
    fn clear(&mut self);
}

/// Build a palette from the whole image and map it in one call.
pub fn quantize(
    image: ImgRef<'_, RGBA8>,
    algorithm: Algorithm,
    options: &QuantizerOptions,
) -> Result<IndexedFrame, QuantizeError> {
    match algorithm {
        Algorithm::Wu => run(WuQuantizer::new(options.clone())?, image),
        Algorithm::Octree => run(OctreeQuantizer::new(options.clone())?, image),
    }
}

fn run<Q: Quantizer>(mut quantizer: Q, image: ImgRef<'_, RGBA8>) -> Result<IndexedFrame, QuantizeError> {
    quantizer.add_palette_colors(image)?;
    quantizer.quantize_frame(image)
}
