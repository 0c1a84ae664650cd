use alloc::vec;
use alloc::vec::Vec;
use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use rgb::RGBA8;

/// Bits kept per color channel when binning.
pub const INDEX_BITS: u32 = 5;
/// Bits kept for alpha when binning.
pub const INDEX_ALPHA_BITS: u32 = 5;
/// Bins per color axis, including the zero row used by the prefix sums.
pub const INDEX_COUNT: usize = (1 << INDEX_BITS) + 1;
/// Bins along the alpha axis, including the zero row.
pub const INDEX_ALPHA_COUNT: usize = (1 << INDEX_ALPHA_BITS) + 1;
/// Number of cells in the 4-D table (`33^4`).
pub const TABLE_LENGTH: usize = INDEX_COUNT * INDEX_COUNT * INDEX_COUNT * INDEX_ALPHA_COUNT;

/// Flat offset of a discretized `(r, g, b, a)` cell.
#[inline]
pub fn table_index(r: usize, g: usize, b: usize, a: usize) -> usize {
    ((r * INDEX_COUNT + g) * INDEX_COUNT + b) * INDEX_ALPHA_COUNT + a
}

/// Discretized cell coordinates of a pixel, already offset by one.
#[inline]
pub fn cell_of(color: RGBA8) -> [usize; 4] {
    [
        (color.r >> (8 - INDEX_BITS)) as usize + 1,
        (color.g >> (8 - INDEX_BITS)) as usize + 1,
        (color.b >> (8 - INDEX_BITS)) as usize + 1,
        (color.a >> (8 - INDEX_ALPHA_BITS)) as usize + 1,
    ]
}

/// Histogram accumulator over a region of color space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moment {
    pub r: i64,
    pub g: i64,
    pub b: i64,
    pub a: i64,
    /// Number of pixels accumulated.
    pub weight: i64,
    /// Sum of squared channel magnitudes.
    pub moment2: f64,
}

impl Moment {
    /// Moment of a single pixel.
    pub fn of_pixel(color: RGBA8) -> Self {
        let (r, g, b, a) = (color.r as i64, color.g as i64, color.b as i64, color.a as i64);
        Self {
            r,
            g,
            b,
            a,
            weight: 1,
            moment2: (r * r + g * g + b * b + a * a) as f64,
        }
    }

    /// `‖(r, g, b, a)‖²` of the channel sums.
    #[inline]
    pub fn magnitude_sq(&self) -> f64 {
        let (r, g, b, a) = (self.r as f64, self.g as f64, self.b as f64, self.a as f64);
        r * r + g * g + b * b + a * a
    }

    /// Mean color of the accumulated pixels, or `None` for an empty moment.
    pub fn mean(&self) -> Option<RGBA8> {
        if self.weight <= 0 {
            return None;
        }
        let w = self.weight as f64;
        let channel = |sum: i64| (sum as f64 / w).round().clamp(0.0, 255.0) as u8;
        Some(RGBA8::new(
            channel(self.r),
            channel(self.g),
            channel(self.b),
            channel(self.a),
        ))
    }
}

impl Add for Moment {
    type Output = Self;

    #[inline]
    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl AddAssign for Moment {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.r += rhs.r;
        self.g += rhs.g;
        self.b += rhs.b;
        self.a += rhs.a;
        self.weight += rhs.weight;
        self.moment2 += rhs.moment2;
    }
}

impl Sub for Moment {
    type Output = Self;

    #[inline]
    fn sub(mut self, rhs: Self) -> Self {
        self -= rhs;
        self
    }
}

impl SubAssign for Moment {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        self.r -= rhs.r;
        self.g -= rhs.g;
        self.b -= rhs.b;
        self.a -= rhs.a;
        self.weight -= rhs.weight;
        self.moment2 -= rhs.moment2;
    }
}

impl Neg for Moment {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self {
            r: -self.r,
            g: -self.g,
            b: -self.b,
            a: -self.a,
            weight: -self.weight,
            moment2: -self.moment2,
        }
    }
}

/// Axis of the 4-D color cube, in cut priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    R,
    G,
    B,
    A,
}

impl Axis {
    pub const ALL: [Axis; 4] = [Axis::R, Axis::G, Axis::B, Axis::A];

    #[inline]
    fn slot(self) -> usize {
        match self {
            Axis::R => 0,
            Axis::G => 1,
            Axis::B => 2,
            Axis::A => 3,
        }
    }
}

/// Axis-aligned cuboid of histogram cells. Minimums are exclusive, maximums inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColorBox {
    pub min: [u8; 4],
    pub max: [u8; 4],
    pub volume: i32,
}

impl ColorBox {
    /// The box spanning every populated cell.
    pub fn full() -> Self {
        let mut cube = Self {
            min: [0; 4],
            max: [
                (INDEX_COUNT - 1) as u8,
                (INDEX_COUNT - 1) as u8,
                (INDEX_COUNT - 1) as u8,
                (INDEX_ALPHA_COUNT - 1) as u8,
            ],
            volume: 0,
        };
        cube.update_volume();
        cube
    }

    #[inline]
    pub fn min_of(&self, axis: Axis) -> u8 {
        self.min[axis.slot()]
    }

    #[inline]
    pub fn max_of(&self, axis: Axis) -> u8 {
        self.max[axis.slot()]
    }

    #[inline]
    pub fn set_min(&mut self, axis: Axis, value: u8) {
        self.min[axis.slot()] = value;
    }

    #[inline]
    pub fn set_max(&mut self, axis: Axis, value: u8) {
        self.max[axis.slot()] = value;
    }

    /// Recompute `volume = Δr·Δg·Δb·Δa`.
    pub fn update_volume(&mut self) {
        self.volume = (0..4)
            .map(|i| self.max[i] as i32 - self.min[i] as i32)
            .product();
    }
}

/// Flat 4-D table of moments, raw per-cell sums until converted to cumulative sums.
pub struct MomentTable {
    moments: Vec<Moment>,
    cumulative: bool,
}

impl Default for MomentTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MomentTable {
    pub fn new() -> Self {
        Self {
            moments: vec![Moment::default(); TABLE_LENGTH],
            cumulative: false,
        }
    }

    /// Whether the prefix-sum pass has run.
    pub fn is_cumulative(&self) -> bool {
        self.cumulative
    }

    /// Add one pixel to its cell.
    ///
    /// Returns `false` and drops the sample once
    /// [`MomentTable::convert_to_cumulative`] has run.
    #[inline]
    pub fn add_sample(&mut self, color: RGBA8) -> bool {
        if self.cumulative {
            return false;
        }
        let [r, g, b, a] = cell_of(color);
        self.moments[table_index(r, g, b, a)] += Moment::of_pixel(color);
        true
    }

    /// Turn per-cell sums into 4-D prefix sums over R, G, B, then A.
    ///
    /// Runs once; later calls return immediately.
    pub fn convert_to_cumulative(&mut self) {
        if self.cumulative {
            return;
        }

        let mut volume = vec![Moment::default(); INDEX_COUNT * INDEX_ALPHA_COUNT];
        let mut area = vec![Moment::default(); INDEX_ALPHA_COUNT];
        let base = table_index(1, 0, 0, 0);

        for r in 1..INDEX_COUNT {
            volume.fill(Moment::default());

            for g in 1..INDEX_COUNT {
                area.fill(Moment::default());

                for b in 1..INDEX_COUNT {
                    let mut line = Moment::default();

                    for a in 1..INDEX_ALPHA_COUNT {
                        let ind1 = table_index(r, g, b, a);
                        line += self.moments[ind1];
                        area[a] += line;

                        let inv = b * INDEX_ALPHA_COUNT + a;
                        volume[inv] += area[a];

                        self.moments[ind1] = self.moments[ind1 - base] + volume[inv];
                    }
                }
            }
        }

        self.cumulative = true;
    }

    #[inline]
    fn at(&self, r: u8, g: u8, b: u8, a: u8) -> Moment {
        self.moments[table_index(r as usize, g as usize, b as usize, a as usize)]
    }

    /// Exact moment of the box, or `None` while the table still holds raw cell sums.
    pub fn volume(&self, cube: &ColorBox) -> Option<Moment> {
        self.cumulative.then(|| self.box_moment(cube))
    }

    /// 16-term inclusion-exclusion. The table must be cumulative.
    pub(crate) fn box_moment(&self, cube: &ColorBox) -> Moment {
        debug_assert!(self.cumulative, "volume queried before prefix sums");
        let mut sum = Moment::default();
        for corner in 0u32..16 {
            let pick = |bit: u32, slot: usize| {
                if corner & bit != 0 {
                    cube.min[slot]
                } else {
                    cube.max[slot]
                }
            };
            let m = self.at(pick(8, 0), pick(4, 1), pick(2, 2), pick(1, 3));
            if corner.count_ones() % 2 == 0 {
                sum += m;
            } else {
                sum -= m;
            }
        }
        sum
    }

    /// Signed 8-term sum over the three axes other than `axis`, with `axis` fixed at
    /// `position`.
    fn face(&self, cube: &ColorBox, axis: Axis, position: u8) -> Moment {
        let fixed = axis.slot();
        let mut sum = Moment::default();
        for corner in 0u32..8 {
            let mut coords = [0u8; 4];
            let mut bit = 4u32;
            for (slot, coord) in coords.iter_mut().enumerate() {
                if slot == fixed {
                    *coord = position;
                    continue;
                }
                *coord = if corner & bit != 0 {
                    cube.min[slot]
                } else {
                    cube.max[slot]
                };
                bit >>= 1;
            }
            let m = self.at(coords[0], coords[1], coords[2], coords[3]);
            if corner.count_ones() % 2 == 0 {
                sum += m;
            } else {
                sum -= m;
            }
        }
        sum
    }

    /// Part of the box moment that does not depend on the cut position along `axis`.
    #[inline]
    pub(crate) fn bottom(&self, cube: &ColorBox, axis: Axis) -> Moment {
        -self.face(cube, axis, cube.min_of(axis))
    }

    /// Position-dependent part of the moment of the lower half `(min, position]`.
    #[inline]
    pub(crate) fn top(&self, cube: &ColorBox, axis: Axis, position: u8) -> Moment {
        self.face(cube, axis, position)
    }

    /// Reset every cell to zero and forget the prefix sums.
    pub fn clear(&mut self) {
        self.moments.fill(Moment::default());
        self.cumulative = false;
    }
}
