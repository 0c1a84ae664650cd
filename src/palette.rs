use alloc::vec::Vec;

use rgb::RGBA8;

use crate::error::QuantizeError;

/// Largest palette any quantizer produces.
pub const MAX_PALETTE_LEN: usize = 256;

/// A resolved color palette. Index = position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    entries: Vec<RGBA8>,
    transparent_index: Option<u8>,
}

impl Palette {
    /// Build a palette from explicit entries.
    pub fn new(entries: Vec<RGBA8>) -> Result<Self, QuantizeError> {
        Self::with_transparent_index(entries, None)
    }

    /// Build a palette with an explicit transparent index.
    ///
    /// An out-of-range index is dropped.
    pub fn with_transparent_index(
        entries: Vec<RGBA8>,
        transparent_index: Option<u8>,
    ) -> Result<Self, QuantizeError> {
        if entries.is_empty() {
            return Err(QuantizeError::EmptyPalette);
        }
        if entries.len() > MAX_PALETTE_LEN {
            return Err(QuantizeError::PaletteTooLarge(entries.len()));
        }
        let transparent_index = transparent_index.filter(|&i| (i as usize) < entries.len());
        Ok(Self {
            entries,
            transparent_index,
        })
    }

    /// Palette entries in index order.
    pub fn entries(&self) -> &[RGBA8] {
        &self.entries
    }

    /// Entry at `index`, if any.
    pub fn get(&self, index: u8) -> Option<RGBA8> {
        self.entries.get(index as usize).copied()
    }

    /// Index that fully transparent pixels map to, if one was reserved.
    pub fn transparent_index(&self) -> Option<u8> {
        self.transparent_index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Alpha values for a PNG tRNS chunk, truncated after the last non-opaque entry.
    /// `None` when every entry is opaque.
    pub fn alpha_table(&self) -> Option<Vec<u8>> {
        let last = self.entries.iter().rposition(|e| e.a != 255)?;
        Some(self.entries[..=last].iter().map(|e| e.a).collect())
    }
}

/// Accumulates resolved colors and applies the transparency threshold.
pub(crate) struct PaletteBuilder {
    entries: Vec<RGBA8>,
    transparent_index: Option<u8>,
    threshold: f32,
    replacement: RGBA8,
}

impl PaletteBuilder {
    pub(crate) fn new(capacity: usize, threshold: f32, replacement: RGBA8) -> Self {
        Self {
            entries: Vec::with_capacity(capacity.min(MAX_PALETTE_LEN)),
            transparent_index: None,
            threshold,
            replacement,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Push a resolved color. Entries whose normalized alpha falls below the threshold
    /// are replaced; the first such entry becomes the transparent index when the
    /// replacement itself is fully transparent.
    pub(crate) fn push(&mut self, color: RGBA8) {
        let index = self.entries.len() as u8;
        if (color.a as f32 / 255.0) < self.threshold {
            self.entries.push(self.replacement);
            if self.replacement.a == 0 && self.transparent_index.is_none() {
                self.transparent_index = Some(index);
            }
        } else {
            self.entries.push(color);
        }
    }

    /// Push the replacement color as the slot for fully transparent pixels and
    /// return its index. It becomes the transparent index only when the replacement
    /// itself has alpha 0, as in [`PaletteBuilder::push`].
    pub(crate) fn push_transparent(&mut self) -> u8 {
        let index = self.entries.len() as u8;
        self.entries.push(self.replacement);
        if self.replacement.a == 0 {
            self.transparent_index = Some(index);
        }
        index
    }

    pub(crate) fn build(self) -> Result<Palette, QuantizeError> {
        Palette::with_transparent_index(self.entries, self.transparent_index)
    }
}
