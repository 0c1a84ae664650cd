use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum QuantizeError {
    #[error("image dimensions cannot be zero")]
    ZeroDimension,

    #[error("max_colors must be between 1 and 256, got {0}")]
    InvalidMaxColors(u32),

    #[error("dither_scale must be within 0.0..=1.0, got {0}")]
    InvalidDitherScale(f32),

    #[error("transparency_threshold must be within 0.0..=1.0, got {0}")]
    InvalidTransparencyThreshold(f32),

    #[error("palette must contain at least one color")]
    EmptyPalette,

    #[error("palette holds at most 256 colors, got {0}")]
    PaletteTooLarge(usize),

    /// The palette was read before any colors were added.
    #[error("palette has not been built: no colors were added")]
    PaletteNotBuilt,

    /// Colors were added after the palette had been resolved.
    #[error("palette is already resolved; call clear() before adding colors")]
    PaletteAlreadyResolved,
}
