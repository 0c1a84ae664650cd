use imgref::Img;
use palquant::cache::{AccurateCache, ColorIndexCache, HybridCache};
use palquant::histogram::{ColorBox, MomentTable};
use palquant::pixel_map::distance_sq;
use palquant::{Algorithm, ColorMatchingMode, QuantizerOptions, RGBA8};
use proptest::prelude::*;

fn rgba() -> impl Strategy<Value = RGBA8> {
    any::<[u8; 4]>().prop_map(|[r, g, b, a]| RGBA8::new(r, g, b, a))
}

/// A small image as `(width, height, pixels)`.
fn image() -> impl Strategy<Value = (usize, usize, Vec<RGBA8>)> {
    (1usize..12, 1usize..12).prop_flat_map(|(w, h)| {
        (Just(w), Just(h), prop::collection::vec(rgba(), w * h))
    })
}

fn algorithm() -> impl Strategy<Value = Algorithm> {
    prop_oneof![Just(Algorithm::Wu), Just(Algorithm::Octree)]
}

proptest! {
    // Every Wu run allocates the full moment table.
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn palette_never_exceeds_max_colors(
        (w, h, pixels) in image(),
        max in 1u32..=256,
        algorithm in algorithm(),
        dither in any::<bool>(),
    ) {
        let options = QuantizerOptions::new()
            .max_colors(max)
            .dither(dither.then_some(palquant::ErrorDiffusion::FloydSteinberg));
        let frame = palquant::quantize(Img::new(&pixels[..], w, h), algorithm, &options).unwrap();
        prop_assert!(frame.palette().len() >= 1);
        prop_assert!(frame.palette().len() <= max as usize);
        prop_assert_eq!(frame.index_buf().len(), w * h);
        for &i in frame.index_buf() {
            prop_assert!((i as usize) < frame.palette().len());
        }
    }

    #[test]
    fn exact_mode_frame_indices_are_nearest(
        (w, h, pixels) in image(),
        max in 2u32..=32,
    ) {
        // Dithering routes every pixel through the pixel map.
        let options = QuantizerOptions::new()
            .max_colors(max)
            .dither_scale(0.0)
            .color_matching_mode(ColorMatchingMode::Exact);
        let frame = palquant::quantize(Img::new(&pixels[..], w, h), Algorithm::Octree, &options).unwrap();
        let palette = frame.palette();
        for (i, &p) in pixels.iter().enumerate() {
            let got = palette.entries()[frame.index_buf()[i] as usize];
            let best = palette.entries().iter().map(|&e| distance_sq(e, p)).min().unwrap();
            if p.a == 0 && palette.transparent_index().is_some() {
                prop_assert_eq!(Some(frame.index_buf()[i]), palette.transparent_index());
            } else {
                prop_assert_eq!(distance_sq(got, p), best);
            }
        }
    }

    #[test]
    fn full_cube_volume_matches_sums(pixels in prop::collection::vec(rgba(), 1..200)) {
        let mut table = MomentTable::new();
        for &p in &pixels {
            prop_assert!(table.add_sample(p));
        }
        table.convert_to_cumulative();
        let m = table.volume(&ColorBox::full()).unwrap();
        prop_assert_eq!(m.weight, pixels.len() as i64);
        prop_assert_eq!(m.r, pixels.iter().map(|p| p.r as i64).sum::<i64>());
        prop_assert_eq!(m.g, pixels.iter().map(|p| p.g as i64).sum::<i64>());
        prop_assert_eq!(m.b, pixels.iter().map(|p| p.b as i64).sum::<i64>());
        prop_assert_eq!(m.a, pixels.iter().map(|p| p.a as i64).sum::<i64>());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn accurate_cache_hits_are_exact(
        entries in prop::collection::hash_map(any::<u32>(), any::<u8>(), 1..600),
    ) {
        let mut cache = AccurateCache::new();
        let mut stored = Vec::new();
        for (&key, &index) in &entries {
            let color = RGBA8::new((key >> 24) as u8, (key >> 16) as u8, (key >> 8) as u8, key as u8);
            if cache.try_add(color, index) {
                stored.push((color, index));
            }
        }
        prop_assert_eq!(stored.len(), entries.len().min(AccurateCache::CAPACITY));
        for (color, index) in stored {
            prop_assert_eq!(cache.try_get(color), Some(index));
        }
    }

    #[test]
    fn hybrid_cache_always_answers_after_add(color in rgba(), index in any::<u8>()) {
        let mut cache = HybridCache::new();
        prop_assert!(cache.try_add(color, index));
        prop_assert_eq!(cache.try_get(color), Some(index));
    }
}
