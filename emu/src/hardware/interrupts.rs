//! Interrupt controller (IE, IF, IME).

use serde::{Deserialize, Serialize};

/// The 14 interrupt sources, by their bit position in IE/IF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    VBlank = 0,
    HBlank = 1,
    VCount = 2,
    Timer0 = 3,
    Timer1 = 4,
    Timer2 = 5,
    Timer3 = 6,
    Serial = 7,
    Dma0 = 8,
    Dma1 = 9,
    Dma2 = 10,
    Dma3 = 11,
    Keypad = 12,
    Gamepak = 13,
}

impl Interrupt {
    #[must_use]
    pub const fn timer(idx: usize) -> Self {
        match idx {
            0 => Self::Timer0,
            1 => Self::Timer1,
            2 => Self::Timer2,
            _ => Self::Timer3,
        }
    }

    #[must_use]
    pub const fn dma(idx: usize) -> Self {
        match idx {
            0 => Self::Dma0,
            1 => Self::Dma1,
            2 => Self::Dma2,
            _ => Self::Dma3,
        }
    }
}

/// IE (0x4000200), IF (0x4000202) and IME (0x4000208).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct InterruptControl {
    pub interrupt_enable: u16,
    pub interrupt_request: u16,
    pub master_enable: bool,
}

impl InterruptControl {
    /// Raises a source's bit in IF. The CPU samples [`Self::is_asserted`]
    /// at instruction boundaries; this only latches the request.
    pub fn request(&mut self, source: Interrupt) {
        self.interrupt_request |= 1 << source as u16;
    }

    /// An IRQ reaches the core when IME is set and IE & IF is non-zero.
    #[must_use]
    pub const fn is_asserted(&self) -> bool {
        self.master_enable && (self.interrupt_enable & self.interrupt_request) != 0
    }

    /// Pending sources regardless of IME, which is what ends a halt.
    #[must_use]
    pub const fn has_pending(&self) -> bool {
        (self.interrupt_enable & self.interrupt_request) != 0
    }

    /// IF writes acknowledge: every 1 bit written clears that request.
    pub fn acknowledge(&mut self, mask: u16) {
        self.interrupt_request &= !mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn assertion_needs_all_three_gates() {
        let mut ic = InterruptControl::default();
        ic.request(Interrupt::VBlank);
        assert!(!ic.is_asserted());

        ic.interrupt_enable = 1 << Interrupt::VBlank as u16;
        assert!(!ic.is_asserted());
        assert!(ic.has_pending());

        ic.master_enable = true;
        assert!(ic.is_asserted());
    }

    #[test]
    fn write_one_to_clear() {
        let mut ic = InterruptControl::default();
        ic.request(Interrupt::Timer0);
        ic.request(Interrupt::Dma3);
        ic.acknowledge(1 << Interrupt::Timer0 as u16);
        assert_eq!(ic.interrupt_request, 1 << Interrupt::Dma3 as u16);
    }
}
