//! Group metadata: the fingerprint table, the bit-sliced 16-lane group word and
//! the triangular prober.
//!
//! A group covers 15 data lanes plus one control lane. Each data lane holds an
//! 8-bit code: `0` for empty, `1` for the sentinel, and `2..=255` for an
//! occupied slot tagged with its fingerprint. The code is stored bit-sliced
//! across two `u64` words: word 0 holds the low nibble and word 1 the high
//! nibble, each split into four 16-bit planes (one plane per bit, one bit per
//! lane). Lane 15 of the eight planes is the control lane and holds the eight
//! overflow flags, one per value of `hash & 7`.

use core::fmt::Debug;

/// Number of data lanes (and slots) per group.
pub(crate) const GROUP_WIDTH: usize = 15;

/// Lane of the last group that holds the sentinel.
pub(crate) const SENTINEL_LANE: usize = GROUP_WIDTH - 1;

const EMPTY: u8 = 0;
const SENTINEL: u8 = 1;

/// Mask of the 15 data lanes in a folded 16-bit lane mask.
const DATA_LANES: u16 = 0x7FFF;

/// Bit 0 of each of the four 16-bit planes.
const PLANE_BASE: u64 = 0x0001_0001_0001_0001;

/// Bit 15 (the control lane) of each of the four 16-bit planes.
const OVERFLOW_BITS: u64 = PLANE_BASE << 15;

const fn build_fingerprints() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        // 0 and 1 are reserved for empty and sentinel.
        table[i] = if i < 2 { i as u8 + 8 } else { i as u8 };
        i += 1;
    }
    table
}

/// For each nibble value, one bit in lane 0 of every plane whose bit is set.
const fn build_spread() -> [u64; 16] {
    let mut table = [0u64; 16];
    let mut n = 0;
    while n < 16 {
        let mut plane = 0;
        while plane < 4 {
            if n & (1 << plane) != 0 {
                table[n] |= 1 << (16 * plane);
            }
            plane += 1;
        }
        n += 1;
    }
    table
}

/// For each nibble value, a full plane of ones for every bit that is set.
const fn build_broadcast() -> [u64; 16] {
    let mut table = [0u64; 16];
    let mut n = 0;
    while n < 16 {
        let mut plane = 0;
        while plane < 4 {
            if n & (1 << plane) != 0 {
                table[n] |= 0xFFFF << (16 * plane);
            }
            plane += 1;
        }
        n += 1;
    }
    table
}

pub(crate) const FINGERPRINTS: [u8; 256] = build_fingerprints();
const SPREAD: [u64; 16] = build_spread();
const BROADCAST: [u64; 16] = build_broadcast();

/// Maps a hash to its 8-bit lane tag in `2..=255`.
///
/// Only the low byte of the hash contributes. The tag is a filter and plays
/// no part in placement.
#[inline(always)]
pub(crate) fn fingerprint(hash: u64) -> u8 {
    FINGERPRINTS[(hash & 0xFF) as usize]
}

/// Returns the home group of `hash` for a table with `bucket_mask + 1`
/// groups, taken from the top bits of the hash.
///
/// Doubling the group count only brings one more hash bit into play, so an
/// element's new home is either `2h` or `2h + 1` for an old home `h`.
#[inline(always)]
pub(crate) fn home_group(hash: u64, bucket_mask: usize) -> usize {
    let bits = (bucket_mask as u64).wrapping_add(1).trailing_zeros();
    hash.checked_shr(64 - bits).unwrap_or(0) as usize
}

/// Metadata for 15 slots plus the overflow byte.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
#[repr(C, align(16))]
pub(crate) struct Group {
    planes: [u64; 2],
}

impl Group {
    /// A group with every lane empty and no overflow recorded.
    pub(crate) const EMPTY: Group = Group { planes: [0; 2] };

    /// An empty group carrying only the sentinel. Unallocated tables scan
    /// this group so iteration ends immediately.
    pub(crate) const SENTINEL_ONLY: Group = Group {
        planes: [1 << SENTINEL_LANE, 0],
    };

    #[inline(always)]
    fn set_code(&mut self, lane: usize, code: u8) {
        debug_assert!(lane < GROUP_WIDTH);
        let keep = !(PLANE_BASE << lane);
        self.planes[0] = (self.planes[0] & keep) | (SPREAD[(code & 0xF) as usize] << lane);
        self.planes[1] = (self.planes[1] & keep) | (SPREAD[(code >> 4) as usize] << lane);
    }

    /// Reads back the code stored in `lane`.
    pub(crate) fn code(&self, lane: usize) -> u8 {
        debug_assert!(lane < GROUP_WIDTH);
        let mut code = 0u8;
        for plane in 0..4 {
            let shift = 16 * plane + lane;
            code |= (((self.planes[0] >> shift) & 1) as u8) << plane;
            code |= (((self.planes[1] >> shift) & 1) as u8) << (plane + 4);
        }
        code
    }

    /// Marks `lane` as occupied by an element with the given fingerprint.
    #[inline(always)]
    pub(crate) fn set(&mut self, lane: usize, fingerprint: u8) {
        debug_assert!(fingerprint > SENTINEL);
        self.set_code(lane, fingerprint);
    }

    /// Marks `lane` as empty.
    #[inline(always)]
    pub(crate) fn reset(&mut self, lane: usize) {
        self.set_code(lane, EMPTY);
    }

    pub(crate) fn set_sentinel(&mut self) {
        self.set_code(SENTINEL_LANE, SENTINEL);
    }

    #[inline(always)]
    pub(crate) fn is_sentinel(&self, lane: usize) -> bool {
        const LANE: u64 = PLANE_BASE << SENTINEL_LANE;
        lane == SENTINEL_LANE
            && self.planes[0] & LANE == SPREAD[SENTINEL as usize] << SENTINEL_LANE
            && self.planes[1] & LANE == 0
    }

    /// Lanes whose code equals `fingerprint`, one bit per lane.
    #[inline(always)]
    pub(crate) fn matches(&self, fingerprint: u8) -> u16 {
        let x = self.planes[0] ^ BROADCAST[(fingerprint & 0xF) as usize];
        let x = !((self.planes[1] ^ BROADCAST[(fingerprint >> 4) as usize]) | x);
        let y = (x & (x >> 32)) as u32;
        let y = y & (y >> 16);
        (y as u16) & DATA_LANES
    }

    /// Lanes holding any non-empty code. The sentinel counts as occupied.
    #[inline(always)]
    pub(crate) fn occupied(&self) -> u16 {
        let x = self.planes[0] | self.planes[1];
        let y = (x | (x >> 32)) as u32;
        let y = y | (y >> 16);
        (y as u16) & DATA_LANES
    }

    #[inline(always)]
    pub(crate) fn available(&self) -> u16 {
        !self.occupied() & DATA_LANES
    }

    #[inline(always)]
    fn overflow_bit(hash: u64) -> (usize, u64) {
        let plane = (hash & 7) as usize;
        (plane / 4, 1 << (16 * (plane % 4) + 15))
    }

    /// Whether some element with the same `hash & 7` was pushed past this
    /// group when it was inserted.
    #[inline(always)]
    pub(crate) fn is_overflowed(&self, hash: u64) -> bool {
        let (word, bit) = Self::overflow_bit(hash);
        self.planes[word] & bit != 0
    }

    #[inline(always)]
    pub(crate) fn mark_overflow(&mut self, hash: u64) {
        let (word, bit) = Self::overflow_bit(hash);
        self.planes[word] |= bit;
    }

    pub(crate) fn clear_overflow(&mut self) {
        self.planes[0] &= !OVERFLOW_BITS;
        self.planes[1] &= !OVERFLOW_BITS;
    }

    /// The eight overflow flags, bit `b` for `hash & 7 == b`.
    pub(crate) fn overflow_flags(&self) -> u8 {
        let mut flags = 0u8;
        for b in 0..8u64 {
            if self.is_overflowed(b) {
                flags |= 1 << b;
            }
        }
        flags
    }
}

impl Debug for Group {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for lane in 0..GROUP_WIDTH {
            if lane > 0 {
                f.write_str(" ")?;
            }
            match self.code(lane) {
                EMPTY => f.write_str("..")?,
                SENTINEL => f.write_str("$$")?,
                code => write!(f, "{code:02x}")?,
            }
        }
        write!(f, " | {:08b}", self.overflow_flags())
    }
}

/// Triangular probe sequence over a power-of-two number of groups.
///
/// Visits `base + i * (i + 1) / 2 (mod B)` for `i = 0, 1, 2, ...`, which
/// touches every group exactly once in the first `B` steps.
pub(crate) struct Prober {
    pos: usize,
    step: usize,
}

impl Prober {
    #[inline(always)]
    pub(crate) fn new(base: usize) -> Self {
        Prober { pos: base, step: 0 }
    }

    #[inline(always)]
    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    /// Moves to the next group. Returns `false` once all `bucket_mask + 1`
    /// groups have been visited.
    #[inline(always)]
    pub(crate) fn next(&mut self, bucket_mask: usize) -> bool {
        self.step += 1;
        self.pos = (self.pos + self.step) & bucket_mask;
        self.step <= bucket_mask
    }
}
