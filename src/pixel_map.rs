//! Nearest-palette-entry matching by squared Euclidean RGBA distance.

use alloc::vec::Vec;

use rgb::RGBA8;

use crate::ColorMatchingMode;
use crate::cache::{CoarseCache, ColorIndexCache, HybridCache, NullCache};
use crate::error::QuantizeError;
use crate::palette::MAX_PALETTE_LEN;

/// Squared Euclidean distance over all four channels.
#[inline]
pub fn distance_sq(a: RGBA8, b: RGBA8) -> u32 {
    let dr = a.r as i32 - b.r as i32;
    let dg = a.g as i32 - b.g as i32;
    let db = a.b as i32 - b.b as i32;
    let da = a.a as i32 - b.a as i32;
    (dr * dr + dg * dg + db * db + da * da) as u32
}

/// Index of the first entry at minimum distance. `palette` must be non-empty.
#[inline]
fn nearest_index(palette: &[RGBA8], color: RGBA8) -> u8 {
    let mut best = 0usize;
    let mut best_dist = u32::MAX;
    for (i, &entry) in palette.iter().enumerate() {
        let d = distance_sq(entry, color);
        if d < best_dist {
            best_dist = d;
            best = i;
            if d == 0 {
                break;
            }
        }
    }
    best as u8
}

/// Maps colors to their closest palette entry, memoizing results in `C`.
#[derive(Debug)]
pub struct EuclideanPixelMap<C: ColorIndexCache> {
    palette: Vec<RGBA8>,
    transparent_index: Option<u8>,
    cache: C,
}

impl<C: ColorIndexCache> EuclideanPixelMap<C> {
    pub fn new(palette: &[RGBA8]) -> Result<Self, QuantizeError> {
        if palette.is_empty() {
            return Err(QuantizeError::EmptyPalette);
        }
        if palette.len() > MAX_PALETTE_LEN {
            return Err(QuantizeError::PaletteTooLarge(palette.len()));
        }
        Ok(Self {
            palette: palette.to_vec(),
            transparent_index: None,
            cache: C::new(),
        })
    }

    /// Route every alpha-0 query to `index`. Out-of-range indices are ignored.
    pub fn with_transparent_index(mut self, index: Option<u8>) -> Self {
        self.transparent_index = index.filter(|&i| (i as usize) < self.palette.len());
        self
    }

    pub fn palette(&self) -> &[RGBA8] {
        &self.palette
    }

    pub fn transparent_index(&self) -> Option<u8> {
        self.transparent_index
    }

    /// Closest palette entry to `color`, consulting and filling the cache.
    #[inline]
    pub fn closest_color(&mut self, color: RGBA8) -> (u8, RGBA8) {
        if let Some(index) = self.transparent_hit(color) {
            return (index, self.palette[index as usize]);
        }
        if let Some(index) = self.cache.try_get(color) {
            return (index, self.palette[index as usize]);
        }
        let index = nearest_index(&self.palette, color);
        self.cache.try_add(color, index);
        (index, self.palette[index as usize])
    }

    /// Exact lookup that leaves the cache untouched.
    #[inline]
    pub fn closest_uncached(&self, color: RGBA8) -> (u8, RGBA8) {
        let index = self
            .transparent_hit(color)
            .unwrap_or_else(|| nearest_index(&self.palette, color));
        (index, self.palette[index as usize])
    }

    /// Drop every cached result.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    #[inline]
    fn transparent_hit(&self, color: RGBA8) -> Option<u8> {
        self.transparent_index.filter(|_| color.a == 0)
    }
}

/// A pixel map with its cache variant picked once from [`ColorMatchingMode`].
#[derive(Debug)]
pub enum PaletteMatcher {
    Coarse(EuclideanPixelMap<CoarseCache>),
    Hybrid(EuclideanPixelMap<HybridCache>),
    Exact(EuclideanPixelMap<NullCache>),
}

impl PaletteMatcher {
    pub fn new(
        mode: ColorMatchingMode,
        palette: &[RGBA8],
        transparent_index: Option<u8>,
    ) -> Result<Self, QuantizeError> {
        Ok(match mode {
            ColorMatchingMode::Coarse => {
                Self::Coarse(EuclideanPixelMap::new(palette)?.with_transparent_index(transparent_index))
            }
            ColorMatchingMode::Hybrid => {
                Self::Hybrid(EuclideanPixelMap::new(palette)?.with_transparent_index(transparent_index))
            }
            ColorMatchingMode::Exact => {
                Self::Exact(EuclideanPixelMap::new(palette)?.with_transparent_index(transparent_index))
            }
        })
    }

    pub fn mode(&self) -> ColorMatchingMode {
        match self {
            Self::Coarse(_) => ColorMatchingMode::Coarse,
            Self::Hybrid(_) => ColorMatchingMode::Hybrid,
            Self::Exact(_) => ColorMatchingMode::Exact,
        }
    }

    #[inline]
    pub fn closest_color(&mut self, color: RGBA8) -> (u8, RGBA8) {
        match self {
            Self::Coarse(map) => map.closest_color(color),
            Self::Hybrid(map) => map.closest_color(color),
            Self::Exact(map) => map.closest_color(color),
        }
    }

    #[inline]
    pub fn closest_uncached(&self, color: RGBA8) -> (u8, RGBA8) {
        match self {
            Self::Coarse(map) => map.closest_uncached(color),
            Self::Hybrid(map) => map.closest_uncached(color),
            Self::Exact(map) => map.closest_uncached(color),
        }
    }

    pub fn clear(&mut self) {
        match self {
            Self::Coarse(map) => map.clear(),
            Self::Hybrid(map) => map.clear(),
            Self::Exact(map) => map.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn gray_palette() -> Vec<RGBA8> {
        vec![
            RGBA8::new(0, 0, 0, 255),
            RGBA8::new(85, 85, 85, 255),
            RGBA8::new(170, 170, 170, 255),
            RGBA8::new(255, 255, 255, 255),
        ]
    }

    fn brute_force(palette: &[RGBA8], color: RGBA8) -> u32 {
        palette
            .iter()
            .map(|&p| distance_sq(p, color))
            .min()
            .unwrap()
    }

    #[test]
    fn rejects_bad_palettes() {
        assert_eq!(
            EuclideanPixelMap::<NullCache>::new(&[]).unwrap_err(),
            QuantizeError::EmptyPalette
        );
        let big = vec![RGBA8::new(0, 0, 0, 0); 300];
        assert_eq!(
            EuclideanPixelMap::<NullCache>::new(&big).unwrap_err(),
            QuantizeError::PaletteTooLarge(300)
        );
    }

    #[test]
    fn exact_matches_brute_force() {
        let palette = gray_palette();
        let mut map = EuclideanPixelMap::<NullCache>::new(&palette).unwrap();
        for v in (0..=255u8).step_by(7) {
            let c = RGBA8::new(v, v.wrapping_mul(3), 255 - v, 200);
            let (index, matched) = map.closest_color(c);
            assert_eq!(matched, palette[index as usize]);
            assert_eq!(distance_sq(matched, c), brute_force(&palette, c));
        }
    }

    #[test]
    fn ties_keep_first_entry() {
        let palette = vec![RGBA8::new(10, 0, 0, 255), RGBA8::new(30, 0, 0, 255)];
        let map = EuclideanPixelMap::<NullCache>::new(&palette).unwrap();
        assert_eq!(map.closest_uncached(RGBA8::new(20, 0, 0, 255)).0, 0);
    }

    #[test]
    fn transparent_index_wins_for_alpha_zero() {
        let mut palette = gray_palette();
        palette.push(RGBA8::new(0, 0, 0, 0));
        let mut map = EuclideanPixelMap::<HybridCache>::new(&palette)
            .unwrap()
            .with_transparent_index(Some(4));
        assert_eq!(map.closest_color(RGBA8::new(255, 255, 255, 0)).0, 4);
        assert_eq!(map.closest_uncached(RGBA8::new(90, 80, 70, 0)).0, 4);
        assert_eq!(map.closest_color(RGBA8::new(255, 255, 255, 255)).0, 3);
    }

    #[test]
    fn hybrid_is_exact_for_first_512_colors() {
        let palette: Vec<RGBA8> = (0..64u32)
            .map(|i| RGBA8::new((i * 4) as u8, (255 - i * 4) as u8, (i * 37 % 256) as u8, 255))
            .collect();
        let mut map = EuclideanPixelMap::<HybridCache>::new(&palette).unwrap();
        let queries: Vec<RGBA8> = (0..512u32)
            .map(|i| RGBA8::new((i * 7) as u8, (i * 13) as u8, (i / 2) as u8, 255))
            .collect();

        for &q in &queries {
            map.closest_color(q);
        }
        // Second pass hits the accurate tier.
        for &q in &queries {
            let (_, matched) = map.closest_color(q);
            assert_eq!(distance_sq(matched, q), brute_force(&palette, q));
        }
    }

    #[test]
    fn matcher_dispatches_by_mode() {
        let palette = gray_palette();
        for mode in [
            ColorMatchingMode::Coarse,
            ColorMatchingMode::Hybrid,
            ColorMatchingMode::Exact,
        ] {
            let mut matcher = PaletteMatcher::new(mode, &palette, None).unwrap();
            assert_eq!(matcher.mode(), mode);
            assert_eq!(matcher.closest_color(RGBA8::new(250, 250, 250, 255)).0, 3);
            matcher.clear();
            assert_eq!(matcher.closest_uncached(RGBA8::new(80, 90, 80, 255)).0, 1);
        }
    }
}
