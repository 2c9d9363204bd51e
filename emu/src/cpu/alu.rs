//! Flag-exact arithmetic and the barrel shifter.
//!
//! Everything here is pure: operands in, `(result, flags)` out. The
//! instruction handlers in `arm`/`thumb` decide which flags actually land
//! in CPSR.

use crate::bitwise::Bits;

/// Result of an arithmetic operation together with its C and V outputs.
/// N and Z are always derived from `result` at the call site.
#[derive(Debug, Clone, Copy)]
pub struct AluResult {
    pub result: u32,
    pub carry: bool,
    pub overflow: bool,
}

fn unsigned_add_overflows(a: u32, b: u32) -> bool {
    a.checked_add(b).is_none()
}

fn signed_add_overflows(a: u32, b: u32) -> bool {
    (a as i32).checked_add(b as i32).is_none()
}

// Carry on subtraction means "no borrow occurred".
fn unsigned_sub_no_borrow(a: u32, b: u32) -> bool {
    a >= b
}

fn signed_sub_overflows(a: u32, b: u32) -> bool {
    (a as i32).checked_sub(b as i32).is_none()
}

#[must_use]
pub fn add(a: u32, b: u32) -> AluResult {
    AluResult {
        result: a.wrapping_add(b),
        carry: unsigned_add_overflows(a, b),
        overflow: signed_add_overflows(a, b),
    }
}

#[must_use]
pub fn sub(a: u32, b: u32) -> AluResult {
    AluResult {
        result: a.wrapping_sub(b),
        carry: unsigned_sub_no_borrow(a, b),
        overflow: signed_sub_overflows(a, b),
    }
}

/// ADC chains two partial additions (operands first, then the carry) and
/// ORs both partial overflows into the final flags. Computing C/V from the
/// final value directly misses overflows that happen in only one step.
#[must_use]
pub fn adc(a: u32, b: u32, carry_in: bool) -> AluResult {
    let c = u32::from(carry_in);
    let partial = a.wrapping_add(b);
    AluResult {
        result: partial.wrapping_add(c),
        carry: unsigned_add_overflows(a, b) | unsigned_add_overflows(partial, c),
        overflow: signed_add_overflows(a, b) | signed_add_overflows(partial, c),
    }
}

/// SBC is `a - b + carry - 1`, which is exactly `a + !b + carry`; the
/// carry and overflow fall out of the [`adc`] chain for free.
#[must_use]
pub fn sbc(a: u32, b: u32, carry_in: bool) -> AluResult {
    adc(a, !b, carry_in)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftKind {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

impl From<u32> for ShiftKind {
    fn from(bits: u32) -> Self {
        match bits & 0b11 {
            0b00 => Self::Lsl,
            0b01 => Self::Lsr,
            0b10 => Self::Asr,
            _ => Self::Ror,
        }
    }
}

/// Logical shift left. Returns `(result, carry_out)`.
///
/// Amount 0 leaves the carry untouched; 1-32 shift normally (32 pushes
/// bit 0 into the carry); anything larger zeroes both.
#[must_use]
pub fn lsl(value: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    match amount {
        0 => (value, carry_in),
        1..=31 => (value << amount, value.get_bit(32 - amount)),
        32 => (0, value.get_bit(0)),
        _ => (0, false),
    }
}

/// Logical shift right, same amount classes as [`lsl`].
#[must_use]
pub fn lsr(value: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    match amount {
        0 => (value, carry_in),
        1..=31 => (value >> amount, value.get_bit(amount - 1)),
        32 => (0, value.get_bit(31)),
        _ => (0, false),
    }
}

/// Arithmetic shift right. Amounts >= 32 replicate the sign bit into both
/// the result and the carry.
#[must_use]
pub fn asr(value: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    match amount {
        0 => (value, carry_in),
        1..=31 => (
            ((value as i32) >> amount) as u32,
            value.get_bit(amount - 1),
        ),
        _ => {
            let sign = value.get_bit(31);
            (if sign { u32::MAX } else { 0 }, sign)
        }
    }
}

/// Rotate right. Amounts are taken modulo 32, except that a rotate by an
/// exact multiple of 32 leaves the value unchanged with bit 31 as carry.
#[must_use]
pub fn ror(value: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    if amount == 0 {
        return (value, carry_in);
    }
    let effective = amount % 32;
    if effective == 0 {
        (value, value.get_bit(31))
    } else {
        (value.rotate_right(effective), value.get_bit(effective - 1))
    }
}

/// Shift by a register-specified amount (only the low byte counts).
#[must_use]
pub fn shift_by_register(kind: ShiftKind, value: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    let amount = amount & 0xFF;
    match kind {
        ShiftKind::Lsl => lsl(value, amount, carry_in),
        ShiftKind::Lsr => lsr(value, amount, carry_in),
        ShiftKind::Asr => asr(value, amount, carry_in),
        ShiftKind::Ror => ror(value, amount, carry_in),
    }
}

/// Shift by an immediate 5-bit amount from the instruction word.
///
/// A zero amount is re-purposed by the encoding: LSR#0/ASR#0 mean a shift
/// by 32, ROR#0 means RRX (rotate right through carry by one).
#[must_use]
pub fn shift_by_immediate(kind: ShiftKind, value: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    match (kind, amount) {
        (ShiftKind::Lsl, _) => lsl(value, amount, carry_in),
        (ShiftKind::Lsr, 0) => lsr(value, 32, carry_in),
        (ShiftKind::Lsr, _) => lsr(value, amount, carry_in),
        (ShiftKind::Asr, 0) => asr(value, 32, carry_in),
        (ShiftKind::Asr, _) => asr(value, amount, carry_in),
        (ShiftKind::Ror, 0) => {
            // RRX: carry moves into bit 31, bit 0 moves out.
            let result = (value >> 1) | (u32::from(carry_in) << 31);
            (result, value.get_bit(0))
        }
        (ShiftKind::Ror, _) => ror(value, amount, carry_in),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    #[test]
    fn shift_by_zero_preserves_carry() {
        for kind in [ShiftKind::Lsl, ShiftKind::Lsr, ShiftKind::Asr, ShiftKind::Ror] {
            for carry in [false, true] {
                let (result, carry_out) = shift_by_register(kind, 0xDEAD_BEEF, 0, carry);
                assert_eq!(result, 0xDEAD_BEEF);
                assert_eq!(carry_out, carry);
            }
        }
    }

    #[test]
    fn shift_by_32_boundary() {
        assert_eq!(lsl(0x8000_0001, 32, false), (0, true));
        assert_eq!(lsr(0x8000_0001, 32, false), (0, true));
        assert_eq!(asr(0x8000_0000, 32, false), (u32::MAX, true));
        assert_eq!(asr(0x7FFF_FFFF, 32, true), (0, false));
    }

    #[test]
    fn logical_shifts_over_32_zero_result_and_carry() {
        assert_eq!(lsl(u32::MAX, 33, true), (0, false));
        assert_eq!(lsr(u32::MAX, 200, true), (0, false));
    }

    #[test]
    fn asr_over_32_replicates_sign() {
        assert_eq!(asr(0xF000_0000, 40, false), (u32::MAX, true));
        assert_eq!(asr(0x7000_0000, 40, true), (0, false));
    }

    #[test]
    fn ror_multiple_of_32_keeps_value() {
        assert_eq!(ror(0x8000_0001, 32, false), (0x8000_0001, true));
        assert_eq!(ror(0x0000_0001, 64, true), (0x0000_0001, false));
    }

    #[test]
    fn shifts_match_reference_for_small_amounts() {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        for _ in 0..1000 {
            let value: u32 = rng.r#gen();
            let amount: u32 = rng.gen_range(1..32);

            let (result, carry) = lsl(value, amount, false);
            assert_eq!(result, value << amount);
            assert_eq!(carry, (value >> (32 - amount)) & 1 != 0);

            let (result, carry) = lsr(value, amount, false);
            assert_eq!(result, value >> amount);
            assert_eq!(carry, (value >> (amount - 1)) & 1 != 0);

            let (result, _) = asr(value, amount, false);
            assert_eq!(result, ((value as i32) >> amount) as u32);

            let (result, _) = ror(value, amount, false);
            assert_eq!(result, value.rotate_right(amount));
        }
    }

    #[test]
    fn rrx_rotates_through_carry() {
        let (result, carry) = shift_by_immediate(ShiftKind::Ror, 0x0000_0003, 0, true);
        assert_eq!(result, 0x8000_0001);
        assert!(carry);
    }

    #[test]
    fn add_sets_carry_on_unsigned_overflow() {
        let r = add(0xFFFF_FFFF, 1);
        assert_eq!(r.result, 0);
        assert!(r.carry);
        assert!(!r.overflow);

        let r = add(0x7FFF_FFFF, 1);
        assert!(!r.carry);
        assert!(r.overflow);
    }

    #[test]
    fn sub_carry_means_no_borrow() {
        let r = sub(5, 3);
        assert_eq!(r.result, 2);
        assert!(r.carry);

        let r = sub(3, 5);
        assert_eq!(r.result, 3u32.wrapping_sub(5));
        assert!(!r.carry);
    }

    #[test]
    fn adc_ors_partial_overflows() {
        // a + b does not overflow, but adding the carry does.
        let r = adc(0xFFFF_FFFE, 1, true);
        assert_eq!(r.result, 0);
        assert!(r.carry);
        assert!(!r.overflow);

        // Signed overflow only in the carry step.
        let r = adc(0x7FFF_FFFE, 1, true);
        assert!(r.overflow);
    }

    #[test]
    fn sbc_behaves_like_sub_with_carry_set() {
        let with_carry = sbc(10, 3, true);
        let plain = sub(10, 3);
        assert_eq!(with_carry.result, plain.result);
        assert_eq!(with_carry.carry, plain.carry);

        // Carry clear borrows one more.
        let r = sbc(10, 3, false);
        assert_eq!(r.result, 6);
    }

    #[test]
    fn sbc_reports_borrow() {
        let r = sbc(0, 0, false);
        assert_eq!(r.result, u32::MAX);
        assert!(!r.carry);
        assert!(!r.overflow);

        let r = sbc(0, 0x8000_0000, false);
        assert_eq!(r.result, 0x7FFF_FFFF);
        assert!(!r.carry);
        assert!(!r.overflow);
    }
}
