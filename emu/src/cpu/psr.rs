//! # Program Status Registers (CPSR and SPSR)
//!
//! ```text
//! 31 30 29 28 27      8 7 6 5 4   0
//! ┌──┬──┬──┬──┬────────┬─┬─┬─┬─────┐
//! │N │Z │C │V │Reserved│I│F│T│Mode │
//! └──┴──┴──┴──┴────────┴─┴─┴─┴─────┘
//! ```
//!
//! The register is stored as a plain `u32` with mask/shift accessors per
//! field. Each exception mode has a SPSR that receives a copy of CPSR on
//! exception entry; see `register_bank` for where those live.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::condition::Condition;
use crate::cpu::cpu_modes::Mode;

/// Program Status Register (CPSR or SPSR).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Psr(u32);

impl Psr {
    pub(crate) fn can_execute(self, cond: Condition) -> bool {
        use Condition::{AL, CC, CS, EQ, GE, GT, HI, LE, LS, LT, MI, NE, NV, PL, VC, VS};
        match cond {
            EQ => self.zero_flag(),
            NE => !self.zero_flag(),
            CS => self.carry_flag(),
            CC => !self.carry_flag(),
            MI => self.sign_flag(),
            PL => !self.sign_flag(),
            VS => self.overflow_flag(),
            VC => !self.overflow_flag(),
            HI => self.carry_flag() && !self.zero_flag(),
            LS => !self.carry_flag() || self.zero_flag(),
            GE => self.sign_flag() == self.overflow_flag(),
            LT => self.sign_flag() != self.overflow_flag(),
            GT => !self.zero_flag() && (self.sign_flag() == self.overflow_flag()),
            LE => self.zero_flag() || (self.sign_flag() != self.overflow_flag()),
            AL => true,
            NV => false, // Reserved on ARMv4, never executes.
        }
    }

    /// N => Bit 31, bit 31 of the last flag-setting result.
    #[must_use]
    pub fn sign_flag(self) -> bool {
        self.0.get_bit(31)
    }

    /// Z => Bit 30, last flag-setting result was zero.
    #[must_use]
    pub fn zero_flag(self) -> bool {
        self.0.get_bit(30)
    }

    /// C => Bit 29, carry out of the adder or the barrel shifter.
    #[must_use]
    pub fn carry_flag(self) -> bool {
        self.0.get_bit(29)
    }

    /// V => Bit 28, signed overflow.
    #[must_use]
    pub fn overflow_flag(self) -> bool {
        self.0.get_bit(28)
    }

    /// I => Bit 7, IRQ disable (1 = IRQs masked).
    #[must_use]
    pub fn irq_disable(self) -> bool {
        self.0.get_bit(7)
    }

    /// F => Bit 6, FIQ disable. The AGB never asserts FIQ but the bit is
    /// architecturally there and software can read it back.
    #[must_use]
    pub fn fiq_disable(self) -> bool {
        self.0.get_bit(6)
    }

    /// T => Bit 5, instruction set state (0 = ARM, 1 = THUMB).
    #[must_use]
    pub fn state_bit(self) -> bool {
        self.0.get_bit(5)
    }

    /// M4-M0 => Bits 4-0, the operating mode.
    ///
    /// The BIOS occasionally writes invalid mode values to a SPSR; reading
    /// those back falls back to Supervisor instead of panicking.
    #[must_use]
    pub fn mode(self) -> Mode {
        let mode_bits = self.0 & 0b11111;
        Mode::try_from(mode_bits).unwrap_or_else(|bits| {
            tracing::debug!("invalid mode bits {bits:#07b} in PSR {:#010X}", self.0);
            Mode::Supervisor
        })
    }

    pub fn set_sign_flag(&mut self, value: bool) {
        self.0.set_bit(31, value);
    }

    pub fn set_zero_flag(&mut self, value: bool) {
        self.0.set_bit(30, value);
    }

    pub fn set_carry_flag(&mut self, value: bool) {
        self.0.set_bit(29, value);
    }

    pub fn set_overflow_flag(&mut self, value: bool) {
        self.0.set_bit(28, value);
    }

    /// Sets N and Z from a result word, the way every logical op does.
    pub fn set_nz(&mut self, result: u32) {
        self.set_sign_flag(result.get_bit(31));
        self.set_zero_flag(result == 0);
    }

    pub fn set_irq_disable(&mut self, value: bool) {
        self.0.set_bit(7, value);
    }

    pub fn set_fiq_disable(&mut self, value: bool) {
        self.0.set_bit(6, value);
    }

    pub fn set_state_bit(&mut self, value: bool) {
        self.0.set_bit(5, value);
    }

    /// Overwrites the mode field M4-M0.
    pub const fn set_mode(&mut self, mode: Mode) {
        self.0 = (self.0 & !0b11111) | mode as u32;
    }

    #[must_use]
    pub fn cpu_state(self) -> CpuState {
        self.state_bit().into()
    }

    pub fn set_cpu_state(&mut self, state: CpuState) {
        self.set_state_bit(state.into());
    }

    /// Replaces only the flag byte (bits 31-24), for `MSR xPSR_flg`.
    pub fn set_flags_raw(&mut self, value: u32) {
        self.0 = (self.0 & 0x00FF_FFFF) | (value & 0xFF00_0000);
    }
}

impl From<Mode> for Psr {
    fn from(mode: Mode) -> Self {
        let mut psr = Self(0);
        psr.set_mode(mode);
        psr
    }
}

impl From<u32> for Psr {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<Psr> for u32 {
    fn from(psr: Psr) -> Self {
        psr.0
    }
}

/// The CPU execution state (which instruction set decodes fetches).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    /// 16-bit instructions.
    Thumb,
    /// 32-bit instructions.
    Arm,
}

impl From<CpuState> for bool {
    fn from(state: CpuState) -> Self {
        match state {
            CpuState::Arm => false,
            CpuState::Thumb => true,
        }
    }
}

impl From<bool> for CpuState {
    fn from(state: bool) -> Self {
        if state { Self::Thumb } else { Self::Arm }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn flag_accessors() {
        let mut cpsr = Psr::default();
        cpsr.set_carry_flag(true);
        assert!(cpsr.carry_flag());
        assert!(!cpsr.zero_flag());

        cpsr.set_nz(0);
        assert!(cpsr.zero_flag());
        assert!(!cpsr.sign_flag());

        cpsr.set_nz(0x8000_0000);
        assert!(!cpsr.zero_flag());
        assert!(cpsr.sign_flag());
    }

    #[test]
    fn mode_round_trip() {
        let mut cpsr = Psr::default();
        cpsr.set_mode(Mode::Irq);
        assert_eq!(cpsr.mode(), Mode::Irq);
        assert_eq!(u32::from(cpsr) & 0b11111, 0b10010);

        cpsr.set_mode(Mode::System);
        assert_eq!(cpsr.mode(), Mode::System);
    }

    #[test]
    fn condition_checks() {
        let mut cpsr = Psr::default();
        cpsr.set_zero_flag(true);
        assert!(cpsr.can_execute(Condition::EQ));
        assert!(!cpsr.can_execute(Condition::NE));
        assert!(cpsr.can_execute(Condition::AL));
        assert!(!cpsr.can_execute(Condition::NV));

        // LT: N != V
        cpsr.set_sign_flag(true);
        cpsr.set_overflow_flag(false);
        assert!(cpsr.can_execute(Condition::LT));
        assert!(!cpsr.can_execute(Condition::GE));
    }

    #[test]
    fn state_bit_selects_instruction_set() {
        let mut cpsr = Psr::default();
        assert_eq!(cpsr.cpu_state(), CpuState::Arm);
        cpsr.set_cpu_state(CpuState::Thumb);
        assert_eq!(cpsr.cpu_state(), CpuState::Thumb);
    }
}
