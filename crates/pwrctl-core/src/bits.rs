//! Little-endian bit-field packing
//!
//! Bit `n` of a byte range is bit `n % 8` of byte `n / 8`, matching the
//! AXI-Lite register byte order of the board. Fields may straddle byte
//! boundaries and are at most 64 bits wide.

/// Whether `value` can be stored in a field of `bit_size` bits
pub fn fits(value: u64, bit_size: u32) -> bool {
    value & !mask(bit_size) == 0
}

/// Mask covering the low `bit_size` bits
pub fn mask(bit_size: u32) -> u64 {
    if bit_size >= 64 {
        u64::MAX
    } else {
        (1u64 << bit_size) - 1
    }
}

/// Extract `[bit_offset, bit_offset + bit_size)` from `bytes`
///
/// Bits beyond the end of `bytes` read as zero.
pub fn extract_bits(bytes: &[u8], bit_offset: u32, bit_size: u32) -> u64 {
    debug_assert!(bit_size <= 64);

    let mut value = 0u64;
    for i in 0..bit_size {
        let bit = bit_offset + i;
        let Some(byte) = bytes.get((bit / 8) as usize) else {
            break;
        };
        if (byte >> (bit % 8)) & 1 != 0 {
            value |= 1 << i;
        }
    }
    value
}

/// Store the low `bit_size` bits of `value` at `bit_offset`, leaving every
/// other bit of `bytes` untouched
pub fn insert_bits(bytes: &mut [u8], bit_offset: u32, bit_size: u32, value: u64) {
    debug_assert!(bit_size <= 64);

    for i in 0..bit_size {
        let bit = bit_offset + i;
        let Some(byte) = bytes.get_mut((bit / 8) as usize) else {
            break;
        };
        let m = 1u8 << (bit % 8);
        if (value >> i) & 1 != 0 {
            *byte |= m;
        } else {
            *byte &= !m;
        }
    }
}

/// Number of bytes needed to hold `bit_count` bits
pub fn bytes_for_bits(bit_count: u32) -> u32 {
    bit_count.div_ceil(8)
}
