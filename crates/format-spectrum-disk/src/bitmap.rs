//! Bit array helpers for the per-byte clock-mark map.
//!
//! Bit `n` lives in byte `n / 8`, least significant bit first. Positions
//! past the end of the map read as clear and ignore writes.

#[must_use]
pub fn test(bitmap: &[u8], bit: usize) -> bool {
    bitmap
        .get(bit >> 3)
        .is_some_and(|b| b & (1 << (bit & 7)) != 0)
}

pub fn set(bitmap: &mut [u8], bit: usize) {
    if let Some(b) = bitmap.get_mut(bit >> 3) {
        *b |= 1 << (bit & 7);
    }
}

pub fn reset(bitmap: &mut [u8], bit: usize) {
    if let Some(b) = bitmap.get_mut(bit >> 3) {
        *b &= !(1 << (bit & 7));
    }
}

/// Bytes needed for a map covering `bits` positions.
#[must_use]
pub const fn len_for(bits: usize) -> usize {
    bits.div_ceil(8)
}
