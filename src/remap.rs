use alloc::vec;
use alloc::vec::Vec;

use imgref::{Img, ImgRef, ImgVec};
use rgb::RGBA8;

use crate::dither::Dither;
use crate::error::QuantizeError;
use crate::palette::Palette;
use crate::pixel_map::PaletteMatcher;

/// A quantized frame: one palette index per pixel plus the palette they index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedFrame {
    width: usize,
    height: usize,
    palette: Palette,
    indices: Vec<u8>,
}

impl IndexedFrame {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Row-major indices, `width * height` long.
    pub fn index_buf(&self) -> &[u8] {
        &self.indices
    }

    pub fn indices(&self) -> ImgRef<'_, u8> {
        Img::new(&self.indices[..], self.width, self.height)
    }

    /// Palette color of the pixel at `(x, y)`.
    pub fn color_at(&self, x: usize, y: usize) -> Option<RGBA8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.palette.get(self.indices[y * self.width + x])
    }

    /// Expand back to full color.
    pub fn to_rgba(&self) -> ImgVec<RGBA8> {
        let entries = self.palette.entries();
        let pixels = self
            .indices
            .iter()
            .map(|&i| entries.get(i as usize).copied().unwrap_or_default())
            .collect();
        Img::new(pixels, self.width, self.height)
    }

    pub fn into_parts(self) -> (Palette, Vec<u8>) {
        (self.palette, self.indices)
    }
}

/// Index lookup straight from the structures a quantizer built while resolving.
pub(crate) trait DirectLookup {
    /// `None` when the structure has no answer and an exact scan is needed.
    fn direct_index(&self, color: RGBA8) -> Option<u8>;
}

/// Everything that exists only after the palette has been resolved.
#[derive(Debug)]
pub(crate) struct Resolved<L> {
    pub(crate) palette: Palette,
    pub(crate) matcher: PaletteMatcher,
    pub(crate) lookup: L,
}

impl<L: DirectLookup> Resolved<L> {
    pub(crate) fn new(
        palette: Palette,
        matcher: PaletteMatcher,
        lookup: L,
    ) -> Self {
        Self {
            palette,
            matcher,
            lookup,
        }
    }

    #[inline]
    fn entry(&self, index: u8) -> RGBA8 {
        self.palette.entries()[index as usize]
    }

    #[inline]
    fn transparent_hit(&self, color: RGBA8) -> Option<u8> {
        self.palette.transparent_index().filter(|_| color.a == 0)
    }

    /// Single-color query. Dithering quantizers always go through the cached pixel map.
    pub(crate) fn quantized_color(&mut self, color: RGBA8, dithering: bool) -> (u8, RGBA8) {
        if !dithering {
            if let Some(index) = self
                .transparent_hit(color)
                .or_else(|| self.lookup.direct_index(color))
            {
                return (index, self.entry(index));
            }
        }
        self.matcher.closest_color(color)
    }

    /// Shared-read lookup for the non-dithered pass.
    #[inline]
    fn direct_color(&self, color: RGBA8) -> u8 {
        match self
            .transparent_hit(color)
            .or_else(|| self.lookup.direct_index(color))
        {
            Some(index) => index,
            None => self.matcher.closest_uncached(color).0,
        }
    }

    fn frame(&self, width: usize, height: usize, indices: Vec<u8>) -> IndexedFrame {
        IndexedFrame {
            width,
            height,
            palette: self.palette.clone(),
            indices,
        }
    }
}

impl<L: DirectLookup + Sync> Resolved<L> {
    /// Second pass without dithering. Rows are independent.
    pub(crate) fn map_direct(&self, source: ImgRef<'_, RGBA8>) -> Result<IndexedFrame, QuantizeError> {
        let (width, height) = checked_dims(source)?;
        let mut indices = vec![0u8; width * height];

        #[cfg(feature = "threads")]
        {
            use rayon::prelude::*;
            indices
                .par_chunks_mut(width)
                .zip(source.rows().collect::<Vec<_>>())
                .for_each(|(out, row)| self.map_row(row, out));
        }

        #[cfg(not(feature = "threads"))]
        {
            for (out, row) in indices.chunks_mut(width).zip(source.rows()) {
                self.map_row(row, out);
            }
        }

        Ok(self.frame(width, height, indices))
    }

    fn map_row(&self, row: &[RGBA8], out: &mut [u8]) {
        // Runs of one color are common; skip the lookup for repeats.
        let mut previous: Option<(RGBA8, u8)> = None;
        for (slot, &px) in out.iter_mut().zip(row) {
            let index = match previous {
                Some((color, index)) if color == px => index,
                _ => self.direct_color(px),
            };
            previous = Some((px, index));
            *slot = index;
        }
    }
}

impl<L: DirectLookup> Resolved<L> {
    /// Second pass with error diffusion, strictly in raster order.
    ///
    /// The transparent shortcut follows the alpha of `source`, never the diffused
    /// alpha. With `alpha_error` unset the ditherer spreads color error only.
    pub(crate) fn map_dithered<D: Dither + ?Sized>(
        &mut self,
        source: ImgRef<'_, RGBA8>,
        dither: &D,
        scale: f32,
        alpha_error: bool,
    ) -> Result<IndexedFrame, QuantizeError> {
        let (width, height) = checked_dims(source)?;
        let mut work: ImgVec<RGBA8> = Img::new(source.pixels().collect(), width, height);
        let mut indices = vec![0u8; width * height];

        for (y, row) in source.rows().enumerate() {
            for (x, original) in row.iter().enumerate() {
                let at = y * width + x;
                let mut px = work.buf()[at];
                if original.a != 0 {
                    // Diffused alpha must not reach the transparent shortcut.
                    px.a = px.a.max(1);
                }
                let (index, matched) = self.matcher.closest_color(px);
                indices[at] = index;
                if alpha_error {
                    dither.diffuse(&mut work, x, y, px, matched, scale);
                } else {
                    dither.diffuse_rgb(&mut work, x, y, px, matched, scale);
                }
            }
        }

        Ok(self.frame(width, height, indices))
    }
}

fn checked_dims(source: ImgRef<'_, RGBA8>) -> Result<(usize, usize), QuantizeError> {
    let (width, height) = (source.width(), source.height());
    if width == 0 || height == 0 {
        return Err(QuantizeError::ZeroDimension);
    }
    Ok((width, height))
}
