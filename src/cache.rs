//! Fixed-memory caches from RGBA colors to palette indices.
//!
//! Every variant implements [`ColorIndexCache`]. The variant is chosen once, when the
//! pixel map is built, and the per-pixel path is monomorphized over it.

use alloc::boxed::Box;
use alloc::vec;

use rgb::RGBA8;

const EMPTY: i16 = -1;

/// A cache of palette indices keyed by RGBA color.
pub trait ColorIndexCache {
    /// Create an empty cache.
    fn new() -> Self
    where
        Self: Sized;

    /// Store `index` for `color`. Returns whether the entry was stored.
    fn try_add(&mut self, color: RGBA8, index: u8) -> bool;

    /// Look up the index stored for `color`.
    fn try_get(&self, color: RGBA8) -> Option<u8>;

    /// Forget every entry.
    fn clear(&mut self);
}

/// Pack as `R<<24 | G<<16 | B<<8 | A`.
#[inline]
pub fn packed_key(color: RGBA8) -> u32 {
    (color.r as u32) << 24 | (color.g as u32) << 16 | (color.b as u32) << 8 | color.a as u32
}

#[inline]
fn to_index(value: i16) -> Option<u8> {
    u8::try_from(value).ok()
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    key: u32,
    value: i16,
    next: i16,
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            key: 0,
            value: EMPTY,
            next: EMPTY,
        }
    }
}

/// Exact cache holding up to [`AccurateCache::CAPACITY`] distinct colors.
///
/// Buckets fold all four channels into 9 bits; collisions chain through the entry
/// array. Once full, inserts fail and existing entries are left untouched.
#[derive(Debug)]
pub struct AccurateCache {
    buckets: Box<[i16]>,
    entries: Box<[Entry]>,
    count: usize,
}

impl AccurateCache {
    pub const CAPACITY: usize = 512;

    #[inline]
    fn bucket(key: u32) -> usize {
        (((key >> 16) ^ (key >> 8) ^ key) & 0x1FF) as usize
    }

    /// Number of stored colors.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == Self::CAPACITY
    }
}

impl ColorIndexCache for AccurateCache {
    fn new() -> Self {
        Self {
            buckets: vec![EMPTY; Self::CAPACITY].into_boxed_slice(),
            entries: vec![Entry::default(); Self::CAPACITY].into_boxed_slice(),
            count: 0,
        }
    }

    fn try_add(&mut self, color: RGBA8, index: u8) -> bool {
        if self.is_full() {
            return false;
        }

        let key = packed_key(color);
        let bucket = Self::bucket(key);

        let mut i = self.buckets[bucket];
        while i != EMPTY {
            let e = self.entries[i as usize];
            if e.key == key {
                // Never overwrite.
                return false;
            }
            i = e.next;
        }

        let slot = self.count;
        self.count += 1;
        if self.is_full() {
            log::trace!("accurate color cache reached {} entries", Self::CAPACITY);
        }

        self.entries[slot] = Entry {
            key,
            value: index as i16,
            next: self.buckets[bucket],
        };
        self.buckets[bucket] = slot as i16;
        true
    }

    fn try_get(&self, color: RGBA8) -> Option<u8> {
        let key = packed_key(color);
        let mut i = self.buckets[Self::bucket(key)];
        while i != EMPTY {
            let e = &self.entries[i as usize];
            if e.key == key {
                return to_index(e.value);
            }
            i = e.next;
        }
        None
    }

    fn clear(&mut self) {
        self.buckets.fill(EMPTY);
        self.count = 0;
    }
}

/// Approximate direct-indexed cache at 5,5,5,6 bits of precision.
///
/// There is no collision handling: the last write to a bucket wins, so a hit returns
/// the index chosen for some color sharing the truncated bucket.
#[derive(Debug)]
pub struct CoarseCache {
    slots: Box<[i16]>,
}

impl CoarseCache {
    const RGB_BITS: u32 = 5;
    const ALPHA_BITS: u32 = 6;
    /// Number of direct slots (`2^21`).
    pub const SLOT_COUNT: usize = 1 << (Self::RGB_BITS * 3 + Self::ALPHA_BITS);

    #[inline]
    fn slot(color: RGBA8) -> usize {
        let r = (color.r >> (8 - Self::RGB_BITS)) as usize;
        let g = (color.g >> (8 - Self::RGB_BITS)) as usize;
        let b = (color.b >> (8 - Self::RGB_BITS)) as usize;
        let a = (color.a >> (8 - Self::ALPHA_BITS)) as usize;
        (r << (Self::RGB_BITS * 2 + Self::ALPHA_BITS))
            | (g << (Self::RGB_BITS + Self::ALPHA_BITS))
            | (b << Self::ALPHA_BITS)
            | a
    }
}

impl ColorIndexCache for CoarseCache {
    fn new() -> Self {
        Self {
            slots: vec![EMPTY; Self::SLOT_COUNT].into_boxed_slice(),
        }
    }

    #[inline]
    fn try_add(&mut self, color: RGBA8, index: u8) -> bool {
        self.slots[Self::slot(color)] = index as i16;
        true
    }

    #[inline]
    fn try_get(&self, color: RGBA8) -> Option<u8> {
        to_index(self.slots[Self::slot(color)])
    }

    fn clear(&mut self) {
        self.slots.fill(EMPTY);
    }
}

/// [`AccurateCache`] backed by [`CoarseCache`] once the exact tier misses or fills.
#[derive(Debug)]
pub struct HybridCache {
    accurate: AccurateCache,
    coarse: CoarseCache,
}

impl ColorIndexCache for HybridCache {
    fn new() -> Self {
        Self {
            accurate: AccurateCache::new(),
            coarse: CoarseCache::new(),
        }
    }

    #[inline]
    fn try_add(&mut self, color: RGBA8, index: u8) -> bool {
        self.accurate.try_add(color, index) || self.coarse.try_add(color, index)
    }

    #[inline]
    fn try_get(&self, color: RGBA8) -> Option<u8> {
        self.accurate
            .try_get(color)
            .or_else(|| self.coarse.try_get(color))
    }

    fn clear(&mut self) {
        self.accurate.clear();
        self.coarse.clear();
    }
}

/// Stores nothing; every lookup misses.
#[derive(Debug, Default)]
pub struct NullCache;

impl ColorIndexCache for NullCache {
    fn new() -> Self {
        Self
    }

    #[inline]
    fn try_add(&mut self, _color: RGBA8, _index: u8) -> bool {
        false
    }

    #[inline]
    fn try_get(&self, _color: RGBA8) -> Option<u8> {
        None
    }

    fn clear(&mut self) {}
}
