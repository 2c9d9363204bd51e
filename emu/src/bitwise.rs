use std::ops::RangeInclusive;

/// Helpers to pick apart the fixed-width integers hardware registers are
/// made of. Bit 0 is the least significant bit.
///
/// Hardware register layouts are always expressed through these explicit
/// mask/shift accessors, never through native bitfields.
pub trait Bits: Copy {
    fn get_bit(self, bit_idx: u32) -> bool;
    fn set_bit(&mut self, bit_idx: u32, value: bool);

    /// Returns the bits in `range`, shifted down to position 0.
    fn get_bits(self, range: RangeInclusive<u32>) -> Self;

    fn get_byte(self, byte_nth: u32) -> u8;
    fn set_byte(&mut self, byte_nth: u32, value: u8);
}

macro_rules! impl_bits {
    ($($t:ty),* $(,)?) => {$(
        impl Bits for $t {
            fn get_bit(self, bit_idx: u32) -> bool {
                debug_assert!(bit_idx < <$t>::BITS);
                (self >> bit_idx) & 1 != 0
            }

            fn set_bit(&mut self, bit_idx: u32, value: bool) {
                debug_assert!(bit_idx < <$t>::BITS);
                if value {
                    *self |= 1 << bit_idx;
                } else {
                    *self &= !(1 << bit_idx);
                }
            }

            fn get_bits(self, range: RangeInclusive<u32>) -> Self {
                let (start, end) = (*range.start(), *range.end());
                debug_assert!(start <= end && end < <$t>::BITS);
                let width = end - start + 1;
                let mask = if width == <$t>::BITS {
                    <$t>::MAX
                } else {
                    (1 << width) - 1
                };
                (self >> start) & mask
            }

            fn get_byte(self, byte_nth: u32) -> u8 {
                debug_assert!(byte_nth * 8 < <$t>::BITS);
                (self >> (byte_nth * 8)) as u8
            }

            fn set_byte(&mut self, byte_nth: u32, value: u8) {
                debug_assert!(byte_nth * 8 < <$t>::BITS);
                let shift = byte_nth * 8;
                *self = (*self & !((0xFF as $t) << shift)) | ((value as $t) << shift);
            }
        }
    )*};
}

impl_bits!(u8, u16, u32, u64);

/// Sign-extends the low `bits` bits of `value` into a full word.
///
/// Branch offsets and halfword/byte loads need this; a plain `as i32`
/// would zero-extend instead.
#[must_use]
pub const fn sign_extend(value: u32, bits: u32) -> i32 {
    debug_assert!(bits > 0 && bits < 32);
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn get_and_set_single_bits() {
        let mut v: u16 = 0;
        v.set_bit(9, true);
        assert!(v.get_bit(9));
        assert_eq!(v, 0x0200);

        v.set_bit(9, false);
        assert_eq!(v, 0);
    }

    #[test]
    fn get_bit_ranges() {
        let v: u32 = 0xBEEF_1234;
        assert_eq!(v.get_bits(0..=3), 0x4);
        assert_eq!(v.get_bits(16..=31), 0xBEEF);
        assert_eq!(v.get_bits(0..=31), 0xBEEF_1234);
    }

    #[test]
    fn byte_accessors() {
        let mut v: u32 = 0x11223344;
        assert_eq!(v.get_byte(0), 0x44);
        assert_eq!(v.get_byte(3), 0x11);

        v.set_byte(2, 0xAB);
        assert_eq!(v, 0x11AB3344);
    }

    #[test]
    fn sign_extension() {
        // 11-bit THUMB branch offset, negative.
        assert_eq!(sign_extend(0x7FF, 11), -1);
        assert_eq!(sign_extend(0x3FF, 11), 0x3FF);
        // 24-bit ARM branch offset.
        assert_eq!(sign_extend(0x80_0000, 24), -0x80_0000);
    }
}
