//! Octree quantizer.
//!
//! Colors are inserted down an 8-ary tree, one bit of R, G and B per level. Once the
//! stream ends, the deepest internal nodes are folded into leaves until the leaf count
//! fits the palette, and each leaf average becomes one entry.

use alloc::vec::Vec;

use imgref::ImgRef;
use rgb::RGBA8;

use crate::dither::Dither;
use crate::error::QuantizeError;
use crate::palette::{Palette, PaletteBuilder};
use crate::pixel_map::PaletteMatcher;
use crate::remap::{DirectLookup, IndexedFrame, Resolved};
use crate::{Quantizer, QuantizerOptions};

/// Arena index of an absent child or the end of a reducible chain.
const NONE: u32 = u32::MAX;
const ROOT: u32 = 0;
const MAX_DEPTH: usize = 8;

/// Tree depth needed for `max_colors` leaves: `ceil(log2(max_colors))` within `1..=8`.
pub fn bits_for_colors(max_colors: u32) -> u8 {
    let bits = u32::BITS - max_colors.max(1).saturating_sub(1).leading_zeros();
    bits.clamp(1, MAX_DEPTH as u32) as u8
}

/// Child slot at `level`: `(R_bit << 2) | (G_bit << 1) | B_bit` from bit `7 - level`.
#[inline]
fn child_slot(color: RGBA8, level: usize) -> usize {
    let shift = 7 - level;
    (((color.r >> shift) & 1) << 2 | ((color.g >> shift) & 1) << 1 | ((color.b >> shift) & 1))
        as usize
}

#[derive(Debug, Clone)]
struct Node {
    leaf: bool,
    red: u64,
    green: u64,
    blue: u64,
    pixel_count: u64,
    palette_index: u8,
    children: [u32; 8],
    next_reducible: u32,
}

impl Node {
    fn new(leaf: bool, next_reducible: u32) -> Self {
        Self {
            leaf,
            red: 0,
            green: 0,
            blue: 0,
            pixel_count: 0,
            palette_index: 0,
            children: [NONE; 8],
            next_reducible,
        }
    }

    #[inline]
    fn increment(&mut self, color: RGBA8) {
        self.red += color.r as u64;
        self.green += color.g as u64;
        self.blue += color.b as u64;
        self.pixel_count += 1;
    }

    fn average(&self) -> RGBA8 {
        if self.pixel_count == 0 {
            return RGBA8::new(0, 0, 0, 255);
        }
        let channel = |sum: u64| (sum / self.pixel_count).min(255) as u8;
        RGBA8::new(channel(self.red), channel(self.green), channel(self.blue), 255)
    }
}

/// Arena-backed color octree. Alpha is ignored.
#[derive(Debug, Clone)]
pub struct Octree {
    nodes: Vec<Node>,
    /// Head of the most-recently-created-first chain of internal nodes per level.
    reducible: [u32; MAX_DEPTH + 1],
    max_color_bits: u8,
    leaves: usize,
    previous: Option<(RGBA8, u32)>,
}

impl Octree {
    /// A tree whose leaves sit at depth `max_color_bits` (clamped to `1..=8`).
    pub fn new(max_color_bits: u8) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            reducible: [NONE; MAX_DEPTH + 1],
            max_color_bits: max_color_bits.clamp(1, MAX_DEPTH as u8),
            leaves: 0,
            previous: None,
        };
        tree.push_node(0);
        tree
    }

    pub fn for_max_colors(max_colors: u32) -> Self {
        Self::new(bits_for_colors(max_colors))
    }

    pub fn max_color_bits(&self) -> u8 {
        self.max_color_bits
    }

    pub fn leaves(&self) -> usize {
        self.leaves
    }

    fn push_node(&mut self, level: usize) -> u32 {
        let id = self.nodes.len() as u32;
        if level == self.max_color_bits as usize {
            self.leaves += 1;
            self.nodes.push(Node::new(true, NONE));
        } else {
            self.nodes.push(Node::new(false, self.reducible[level]));
            self.reducible[level] = id;
        }
        id
    }

    /// Accumulate one color into its leaf, creating nodes on the way.
    pub fn add_color(&mut self, color: RGBA8) {
        if let Some((previous, node)) = self.previous {
            if previous == color {
                self.nodes[node as usize].increment(color);
                return;
            }
        }

        let mut node = ROOT;
        let mut level = 0;
        loop {
            if self.nodes[node as usize].leaf {
                self.nodes[node as usize].increment(color);
                self.previous = Some((color, node));
                return;
            }
            let slot = child_slot(color, level);
            let mut child = self.nodes[node as usize].children[slot];
            if child == NONE {
                child = self.push_node(level + 1);
                self.nodes[node as usize].children[slot] = child;
            }
            node = child;
            level += 1;
        }
    }

    /// Fold the most recently created node of the deepest populated level into a leaf.
    ///
    /// Returns the net number of leaves removed, or `None` once nothing is left to fold.
    pub fn reduce(&mut self) -> Option<usize> {
        let mut level = self.max_color_bits as usize - 1;
        while level > 0 && self.reducible[level] == NONE {
            level -= 1;
        }

        let id = self.reducible[level];
        if id == NONE {
            return None;
        }
        self.reducible[level] = self.nodes[id as usize].next_reducible;

        let children = self.nodes[id as usize].children;
        let (mut red, mut green, mut blue, mut count) = (0, 0, 0, 0);
        let mut merged = 0usize;
        for child in children.into_iter().filter(|&c| c != NONE) {
            let c = &self.nodes[child as usize];
            red += c.red;
            green += c.green;
            blue += c.blue;
            count += c.pixel_count;
            merged += 1;
        }

        let node = &mut self.nodes[id as usize];
        node.red += red;
        node.green += green;
        node.blue += blue;
        node.pixel_count += count;
        node.children = [NONE; 8];
        node.leaf = true;

        self.leaves = self.leaves + 1 - merged;
        self.previous = None;
        Some(merged.saturating_sub(1))
    }

    /// Reduce until at most `max_colors` leaves remain, then number the leaves
    /// depth-first and return their average colors in index order.
    pub fn palletize(&mut self, max_colors: usize) -> Vec<RGBA8> {
        while self.leaves > max_colors {
            if self.reduce().is_none() {
                break;
            }
        }

        let mut palette = Vec::with_capacity(self.leaves);
        let mut stack = Vec::with_capacity(MAX_DEPTH * 8);
        stack.push(ROOT);
        while let Some(id) = stack.pop() {
            let node = &mut self.nodes[id as usize];
            if node.leaf {
                if node.pixel_count == 0 {
                    continue;
                }
                node.palette_index = palette.len() as u8;
                palette.push(node.average());
            } else {
                stack.extend(node.children.iter().rev().filter(|&&c| c != NONE));
            }
        }
        palette
    }

    /// Palette index of the leaf on `color`'s path, or `None` when the path is absent.
    pub fn palette_index(&self, color: RGBA8) -> Option<u8> {
        let mut node = &self.nodes[ROOT as usize];
        let mut level = 0;
        while !node.leaf {
            let child = node.children[child_slot(color, level)];
            if child == NONE {
                log::trace!("octree: no child on the path of {color:?} at level {level}");
                return None;
            }
            node = &self.nodes[child as usize];
            level += 1;
        }
        Some(node.palette_index)
    }
}

/// A palletized tree plus the slot that fully transparent pixels map to.
#[derive(Debug)]
pub(crate) struct TreeLookup {
    tree: Octree,
    clear_slot: Option<u8>,
}

impl DirectLookup for TreeLookup {
    #[inline]
    fn direct_index(&self, color: RGBA8) -> Option<u8> {
        if color.a == 0 {
            return self.clear_slot;
        }
        self.tree.palette_index(color)
    }
}

/// Octree quantizer. Fully transparent samples reserve one palette slot instead of
/// entering the tree.
pub struct OctreeQuantizer {
    options: QuantizerOptions,
    tree: Octree,
    sampled: bool,
    has_transparent: bool,
    resolved: Option<Resolved<TreeLookup>>,
}

impl OctreeQuantizer {
    pub fn new(options: QuantizerOptions) -> Result<Self, QuantizeError> {
        options.validate()?;
        Ok(Self {
            tree: Octree::for_max_colors(options.max_colors),
            options,
            sampled: false,
            has_transparent: false,
            resolved: None,
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    fn resolve(&mut self) -> Result<&mut Resolved<TreeLookup>, QuantizeError> {
        if self.resolved.is_none() {
            let resolved = self.build_palette()?;
            self.resolved = Some(resolved);
        }
        self.resolved.as_mut().ok_or(QuantizeError::PaletteNotBuilt)
    }

    fn build_palette(&mut self) -> Result<Resolved<TreeLookup>, QuantizeError> {
        if !self.sampled {
            return Err(QuantizeError::PaletteNotBuilt);
        }

        let max_colors = self.options.max_colors as usize;
        let leaf_budget = if self.has_transparent && max_colors > 1 {
            max_colors - 1
        } else {
            max_colors
        };

        let bits = self.tree.max_color_bits();
        let mut tree = core::mem::replace(&mut self.tree, Octree::new(bits));
        let colors = tree.palletize(leaf_budget);

        let mut builder = PaletteBuilder::new(
            colors.len() + 1,
            self.options.transparency_threshold,
            self.options.threshold_replacement_color,
        );
        for color in colors {
            builder.push(color);
        }
        let clear_slot = (self.has_transparent && builder.len() < max_colors)
            .then(|| builder.push_transparent());
        let palette = builder.build()?;
        log::debug!(
            "octree: resolved {} colors (max {}), transparent index {:?}",
            palette.len(),
            max_colors,
            palette.transparent_index()
        );

        let matcher = PaletteMatcher::new(
            self.options.color_matching_mode,
            palette.entries(),
            palette.transparent_index(),
        )?;
        Ok(Resolved::new(palette, matcher, TreeLookup { tree, clear_slot }))
    }
}

impl Quantizer for OctreeQuantizer {
    fn options(&self) -> &QuantizerOptions {
        &self.options
    }

    fn add_palette_colors(&mut self, region: ImgRef<'_, RGBA8>) -> Result<(), QuantizeError> {
        if region.width() == 0 || region.height() == 0 {
            return Err(QuantizeError::ZeroDimension);
        }
        if self.resolved.is_some() {
            return Err(QuantizeError::PaletteAlreadyResolved);
        }
        for row in region.rows() {
            for &px in row {
                if px.a == 0 {
                    self.has_transparent = true;
                } else {
                    self.tree.add_color(px);
                }
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
            Some(kernel) => resolved.map_dithered(source, &kernel, scale, false),
            None => resolved.map_direct(source),
        }
    }

    fn quantize_frame_with<D: Dither + ?Sized>(
        &mut self,
        source: ImgRef<'_, RGBA8>,
        dither: &D,
    ) -> Result<IndexedFrame, QuantizeError> {
        let scale = self.options.dither_scale;
        self.resolve()?.map_dithered(source, dither, scale, false)
    }

    fn clear(&mut self) {
        self.tree = Octree::for_max_colors(self.options.max_colors);
        self.sampled = false;
        self.has_transparent = false;
        self.resolved = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use imgref::Img;

    fn corners() -> Vec<RGBA8> {
        (0..8u8)
            .map(|i| {
                let c = |bit: u8| if i & bit != 0 { 255 } else { 0 };
                RGBA8::new(c(4), c(2), c(1), 255)
            })
            .collect()
    }

    #[test]
    fn color_bits_follow_log2() {
        assert_eq!(bits_for_colors(1), 1);
        assert_eq!(bits_for_colors(2), 1);
        assert_eq!(bits_for_colors(3), 2);
        assert_eq!(bits_for_colors(16), 4);
        assert_eq!(bits_for_colors(17), 5);
        assert_eq!(bits_for_colors(256), 8);
    }

    #[test]
    fn child_slot_takes_rgb_bits() {
        let c = RGBA8::new(0b1000_0000, 0b0100_0000, 0b1100_0000, 7);
        assert_eq!(child_slot(c, 0), 0b101);
        assert_eq!(child_slot(c, 1), 0b011);
        assert_eq!(child_slot(c, 7), 0);
    }

    #[test]
    fn corners_get_their_own_leaves() {
        let mut tree = Octree::for_max_colors(8);
        for c in corners() {
            tree.add_color(c);
        }
        assert_eq!(tree.leaves(), 8);
        let palette = tree.palletize(8);
        // Depth-first order follows the child slot, which is the corner number.
        assert_eq!(palette, corners());
        for (i, c) in corners().into_iter().enumerate() {
            assert_eq!(tree.palette_index(c), Some(i as u8));
        }
    }

    #[test]
    fn reduce_folds_deepest_level_first() {
        let mut tree = Octree::new(3);
        tree.add_color(RGBA8::new(0, 0, 0, 255));
        tree.add_color(RGBA8::new(0, 0, 32, 255));
        tree.add_color(RGBA8::new(0, 0, 64, 255));
        assert_eq!(tree.leaves(), 3);

        // The newest level-2 node holds only the third color.
        assert_eq!(tree.reduce(), Some(0));
        assert_eq!(tree.leaves(), 3);
        // Next comes the parent of the first two.
        assert_eq!(tree.reduce(), Some(1));
        assert_eq!(tree.leaves(), 2);

        let palette = tree.palletize(1);
        assert_eq!(tree.leaves(), 1);
        assert_eq!(palette, vec![RGBA8::new(0, 0, 32, 255)]);
    }

    #[test]
    fn reduce_stops_at_root() {
        let mut tree = Octree::new(1);
        tree.add_color(RGBA8::new(0, 0, 0, 255));
        tree.add_color(RGBA8::new(255, 255, 255, 255));
        assert_eq!(tree.reduce(), Some(1));
        assert_eq!(tree.reduce(), None);
        assert_eq!(tree.leaves(), 1);
    }

    #[test]
    fn repeated_color_reuses_leaf() {
        let mut tree = Octree::for_max_colors(256);
        let c = RGBA8::new(10, 20, 30, 255);
        tree.add_color(c);
        let nodes = tree.nodes.len();
        tree.add_color(c);
        tree.add_color(c);
        assert_eq!(tree.nodes.len(), nodes);
        assert_eq!(tree.palletize(256), vec![c]);
    }

    #[test]
    fn missing_path_is_none() {
        let mut tree = Octree::for_max_colors(256);
        tree.add_color(RGBA8::new(0, 0, 0, 255));
        tree.palletize(256);
        assert_eq!(tree.palette_index(RGBA8::new(255, 255, 255, 255)), None);
        let lookup = TreeLookup {
            tree,
            clear_slot: None,
        };
        assert_eq!(lookup.direct_index(RGBA8::new(0, 0, 0, 0)), None);
        assert_eq!(lookup.direct_index(RGBA8::new(0, 0, 0, 255)), Some(0));
    }

    #[test]
    fn palette_respects_budget() {
        let pixels: Vec<RGBA8> = (0..4096u32)
            .map(|i| RGBA8::new((i * 7) as u8, (i * 11 >> 2) as u8, (i >> 4) as u8, 255))
            .collect();
        let img = Img::new(&pixels[..], 64, 64);
        for max in [1, 2, 7, 16, 100, 256] {
            let options = QuantizerOptions::new().max_colors(max).dither(None);
            let mut q = OctreeQuantizer::new(options).unwrap();
            q.add_palette_colors(img).unwrap();
            let len = q.palette().unwrap().len();
            assert!(len >= 1 && len <= max as usize, "max {max} gave {len}");
            let frame = q.quantize_frame(img).unwrap();
            assert!(frame.index_buf().iter().all(|&i| (i as usize) < len));
        }
    }

    #[test]
    fn transparent_pixels_get_reserved_slot() {
        let pixels = vec![
            RGBA8::new(255, 0, 0, 255),
            RGBA8::new(0, 0, 255, 255),
            RGBA8::new(17, 99, 3, 0),
            RGBA8::new(0, 0, 0, 0),
        ];
        let img = Img::new(&pixels[..], 2, 2);
        let options = QuantizerOptions::new().max_colors(3).dither(None);
        let mut q = OctreeQuantizer::new(options).unwrap();
        q.add_palette_colors(img).unwrap();

        let palette = q.palette().unwrap().clone();
        assert_eq!(palette.len(), 3);
        let t = palette.transparent_index().unwrap();
        assert_eq!(palette.get(t), Some(RGBA8::new(0, 0, 0, 0)));

        let frame = q.quantize_frame(img).unwrap();
        assert_eq!(frame.index_buf()[2], t);
        assert_eq!(frame.index_buf()[3], t);
        assert_eq!(frame.color_at(0, 0), Some(RGBA8::new(255, 0, 0, 255)));
        assert_eq!(frame.color_at(1, 0), Some(RGBA8::new(0, 0, 255, 255)));
    }

    #[test]
    fn opaque_replacement_reserves_no_transparent_index() {
        let replacement = RGBA8::new(255, 0, 255, 255);
        let pixels = vec![
            RGBA8::new(10, 200, 10, 255),
            RGBA8::new(10, 200, 10, 255),
            RGBA8::new(0, 0, 0, 0),
            RGBA8::new(90, 90, 90, 0),
        ];
        let img = Img::new(&pixels[..], 2, 2);
        let options = QuantizerOptions::new()
            .dither(None)
            .threshold_replacement_color(replacement);
        let mut q = OctreeQuantizer::new(options).unwrap();
        q.add_palette_colors(img).unwrap();

        let palette = q.palette().unwrap().clone();
        assert_eq!(palette.transparent_index(), None);
        assert_eq!(palette.entries(), &[RGBA8::new(10, 200, 10, 255), replacement]);
        let frame = q.quantize_frame(img).unwrap();
        assert_eq!(frame.index_buf(), &[0, 0, 1, 1]);
    }

    #[test]
    fn fully_transparent_image() {
        let pixels = vec![RGBA8::new(1, 2, 3, 0); 4];
        let img = Img::new(&pixels[..], 2, 2);
        let mut q = OctreeQuantizer::new(QuantizerOptions::new().dither(None)).unwrap();
        q.add_palette_colors(img).unwrap();
        assert_eq!(q.palette().unwrap().entries(), &[RGBA8::new(0, 0, 0, 0)]);
        assert_eq!(q.quantized_color(RGBA8::new(200, 0, 0, 255)).unwrap().0, 0);
    }

    #[test]
    fn unseen_color_falls_back_to_nearest() {
        let pixels = vec![RGBA8::new(0, 0, 0, 255), RGBA8::new(250, 250, 250, 255)];
        let img = Img::new(&pixels[..], 2, 1);
        let mut q = OctreeQuantizer::new(QuantizerOptions::new().dither(None)).unwrap();
        q.add_palette_colors(img).unwrap();
        let (_, color) = q.quantized_color(RGBA8::new(240, 10, 240, 255)).unwrap();
        assert_eq!(color, RGBA8::new(250, 250, 250, 255));
    }

    #[test]
    fn clear_resets_state() {
        let px = [RGBA8::new(5, 5, 5, 255)];
        let mut q = OctreeQuantizer::new(QuantizerOptions::new()).unwrap();
        q.add_palette_colors(Img::new(&px[..], 1, 1)).unwrap();
        q.palette().unwrap();
        assert_eq!(
            q.add_palette_colors(Img::new(&px[..], 1, 1)),
            Err(QuantizeError::PaletteAlreadyResolved)
        );
        q.clear();
        assert!(!q.is_resolved());
        assert_eq!(q.palette().unwrap_err(), QuantizeError::PaletteNotBuilt);
    }
}
