//! Wu's color quantizer over a 4-D (R,G,B,A) moment histogram.
//!
//! The histogram is converted to prefix sums once, then the color cube is split
//! recursively along the axis that maximizes between-group variance. Every resulting
//! box is one palette entry, and its cells are tagged with the entry index so the
//! second pass can map pixels with a single table read.

use alloc::vec;
use alloc::vec::Vec;

use imgref::ImgRef;
use rgb::RGBA8;

use crate::dither::Dither;
use crate::error::QuantizeError;
use crate::histogram::{Axis, ColorBox, Moment, MomentTable, TABLE_LENGTH, cell_of, table_index};
use crate::palette::{Palette, PaletteBuilder};
use crate::pixel_map::PaletteMatcher;
use crate::remap::{DirectLookup, IndexedFrame, Resolved};
use crate::{Quantizer, QuantizerOptions};

/// Best cut along `axis` within `first..last`.
///
/// Returns the score and the cut position, or `None` when every position leaves one
/// side empty.
pub(crate) fn maximize(
    table: &MomentTable,
    cube: &ColorBox,
    axis: Axis,
    first: u8,
    last: u8,
    whole: &Moment,
) -> (f64, Option<u8>) {
    let bottom = table.bottom(cube, axis);
    let mut max = 0.0;
    let mut cut = None;

    for i in first..last {
        let half = bottom + table.top(cube, axis, i);
        if half.weight == 0 {
            continue;
        }
        let rest = *whole - half;
        if rest.weight == 0 {
            continue;
        }

        let score = half.magnitude_sq() / half.weight as f64 + rest.magnitude_sq() / rest.weight as f64;
        if score > max {
            max = score;
            cut = Some(i);
        }
    }

    (max, cut)
}

/// Split `set1` along its best axis. `set1` keeps the lower half, `set2` receives the
/// upper half. Returns `false` and leaves both boxes untouched when no cut exists.
pub(crate) fn cut(table: &MomentTable, set1: &mut ColorBox, set2: &mut ColorBox) -> bool {
    let whole = table.box_moment(set1);

    let mut best: Option<(Axis, f64, Option<u8>)> = None;
    for axis in Axis::ALL {
        let (score, position) = maximize(
            table,
            set1,
            axis,
            set1.min_of(axis) + 1,
            set1.max_of(axis),
            &whole,
        );
        // Earlier axes win ties.
        if best.is_none_or(|(_, s, _)| score > s) {
            best = Some((axis, score, position));
        }
    }

    let Some((axis, _, Some(position))) = best else {
        return false;
    };

    set2.min = set1.min;
    set2.max = set1.max;
    set2.set_min(axis, position);
    set1.set_max(axis, position);

    set1.update_volume();
    set2.update_volume();
    true
}

/// `Σc² − ‖m‖²/w` over the box.
pub(crate) fn variance(table: &MomentTable, cube: &ColorBox) -> f64 {
    let volume = table.box_moment(cube);
    if volume.weight <= 0 {
        return 0.0;
    }
    volume.moment2 - volume.magnitude_sq() / volume.weight as f64
}

/// Cut the full cube into at most `max_colors` boxes.
///
/// Stops early once no box has positive variance left; the result then holds only the
/// boxes produced so far.
pub(crate) fn build_cube(table: &MomentTable, max_colors: usize) -> Vec<ColorBox> {
    let max_colors = max_colors.max(1);
    let mut cubes = vec![ColorBox::default(); max_colors];
    let mut vv = vec![0.0f64; max_colors];
    cubes[0] = ColorBox::full();

    let mut count = max_colors;
    let mut next = 0usize;
    let mut i = 1usize;

    while i < max_colors {
        // `next` always precedes `i`.
        let (head, tail) = cubes.split_at_mut(i);
        let (lower, upper) = (&mut head[next], &mut tail[0]);

        if cut(table, lower, upper) {
            vv[next] = if lower.volume > 1 { variance(table, lower) } else { 0.0 };
            vv[i] = if upper.volume > 1 { variance(table, upper) } else { 0.0 };
        } else {
            vv[next] = 0.0;
            i -= 1;
        }

        next = 0;
        let mut temp = vv[0];
        for (k, &v) in vv.iter().enumerate().take(i + 1).skip(1) {
            if v > temp {
                temp = v;
                next = k;
            }
        }

        if temp <= 0.0 {
            count = i + 1;
            log::debug!("wu: stopped at {count} of {max_colors} boxes, no variance left");
            break;
        }

        i += 1;
    }

    cubes.truncate(count);
    cubes
}

/// Tag every cell of the box interior with `label`.
pub fn mark(tags: &mut [u8], cube: &ColorBox, label: u8) {
    let [r0, g0, b0, a0] = cube.min.map(|v| v as usize + 1);
    let [r1, g1, b1, a1] = cube.max.map(|v| v as usize);
    for r in r0..=r1 {
        for g in g0..=g1 {
            for b in b0..=b1 {
                let start = table_index(r, g, b, a0);
                let end = table_index(r, g, b, a1);
                if start <= end {
                    tags[start..=end].fill(label);
                }
            }
        }
    }
}

/// Cell-to-palette-index map built by [`mark`].
#[derive(Debug)]
pub(crate) struct TagTable {
    tags: Vec<u8>,
}

impl DirectLookup for TagTable {
    #[inline]
    fn direct_index(&self, color: RGBA8) -> Option<u8> {
        let [r, g, b, a] = cell_of(color);
        Some(self.tags[table_index(r, g, b, a)])
    }
}

/// Wu quantizer. Holds a ~57 MB moment table for its whole lifetime.
pub struct WuQuantizer {
    options: QuantizerOptions,
    moments: MomentTable,
    sampled: bool,
    resolved: Option<Resolved<TagTable>>,
}

impl WuQuantizer {
    pub fn new(options: QuantizerOptions) -> Result<Self, QuantizeError> {
        options.validate()?;
        Ok(Self {
            options,
            moments: MomentTable::new(),
            sampled: false,
            resolved: None,
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    fn resolve(&mut self) -> Result<&mut Resolved<TagTable>, QuantizeError> {
        if self.resolved.is_none() {
            let resolved = self.build_palette()?;
            self.resolved = Some(resolved);
        }
        self.resolved.as_mut().ok_or(QuantizeError::PaletteNotBuilt)
    }

    fn build_palette(&mut self) -> Result<Resolved<TagTable>, QuantizeError> {
        if !self.sampled {
            return Err(QuantizeError::PaletteNotBuilt);
        }

        self.moments.convert_to_cumulative();
        let cubes = build_cube(&self.moments, self.options.max_colors as usize);

        let mut tags = vec![0u8; TABLE_LENGTH];
        let mut builder = PaletteBuilder::new(
            cubes.len(),
            self.options.transparency_threshold,
            self.options.threshold_replacement_color,
        );
        for (label, cube) in cubes.iter().enumerate() {
            mark(&mut tags, cube, label as u8);
            builder.push(self.moments.box_moment(cube).mean().unwrap_or_default());
        }
        let palette: Palette = builder.build()?;
        log::debug!(
            "wu: resolved {} colors (max {}), transparent index {:?}",
            palette.len(),
            self.options.max_colors,
            palette.transparent_index()
        );

        let matcher = PaletteMatcher::new(
            self.options.color_matching_mode,
            palette.entries(),
            palette.transparent_index(),
        )?;
        Ok(Resolved::new(palette, matcher, TagTable { tags }))
    }
}

impl Quantizer for WuQuantizer {
    fn options(&self) -> &QuantizerOptions {
        &self.options
    }

    fn add_palette_colors(&mut self, region: ImgRef<'_, RGBA8>) -> Result<(), QuantizeError> {
        if region.width() == 0 || region.height() == 0 {
            return Err(QuantizeError::ZeroDimension);
        }
        if self.resolved.is_some() || self.moments.is_cumulative() {
            return Err(QuantizeError::PaletteAlreadyResolved);
        }
        for row in region.rows() {
            for &px in row {
                self.moments.add_sample(px);
            }
        }
        self.sampled = true;
        Ok(())
    }

    fn palette(&mut self) -> Result<&Palette, QuantizeError> {
        Ok(&self.resolve()?.palette)
    }

    fn quantized_color(&mut self, color: RGBA8) -> Result<(u8, RGBA8), QuantizeError> {
        let dithering = self.options.is_dithering();
        Ok(self.resolve()?.quantized_color(color, dithering))
    }

    fn quantize_frame(&mut self, source: ImgRef<'_, RGBA8>) -> Result<IndexedFrame, QuantizeError> {
        let (dither, scale) = (self.options.dither, self.options.dither_scale);
        let resolved = self.resolve()?;
        match dither {
            Some(kernel) => resolved.map_dithered(source, &kernel, scale, true),
            None => resolved.map_direct(source),
        }
    }

    fn quantize_frame_with<D: Dither + ?Sized>(
        &mut self,
        source: ImgRef<'_, RGBA8>,
        dither: &D,
    ) -> Result<IndexedFrame, QuantizeError> {
        let scale = self.options.dither_scale;
        self.resolve()?.map_dithered(source, dither, scale, true)
    }

    fn clear(&mut self) {
        self.moments.clear();
        self.sampled = false;
        self.resolved = None;
    }
}
