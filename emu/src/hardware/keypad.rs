//! Keypad input (KEYINPUT, KEYCNT).

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

/// Physical buttons, by their bit in KEYINPUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GbaButton {
    A = 0,
    B = 1,
    Select = 2,
    Start = 3,
    Right = 4,
    Left = 5,
    Up = 6,
    Down = 7,
    R = 8,
    L = 9,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keypad {
    /// KEYINPUT (0x4000130), active low: a clear bit means pressed.
    pub key_input: u16,
    /// KEYCNT (0x4000132): per-button IRQ select, bit 14 enable,
    /// bit 15 mode (0 = any selected, 1 = all selected).
    pub key_interrupt_control: u16,
}

impl Default for Keypad {
    fn default() -> Self {
        Self {
            key_input: 0x03FF,
            key_interrupt_control: 0,
        }
    }
}

impl Keypad {
    pub fn set_button(&mut self, button: GbaButton, pressed: bool) {
        self.key_input.set_bit(button as u32, !pressed);
    }

    /// Whether the current input state satisfies the KEYCNT condition.
    #[must_use]
    pub fn interrupt_condition_met(&self) -> bool {
        if !self.key_interrupt_control.get_bit(14) {
            return false;
        }
        let selected = self.key_interrupt_control & 0x03FF;
        let pressed = !self.key_input & 0x03FF;
        if self.key_interrupt_control.get_bit(15) {
            selected != 0 && (pressed & selected) == selected
        } else {
            (pressed & selected) != 0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn buttons_are_active_low() {
        let mut keypad = Keypad::default();
        assert_eq!(keypad.key_input, 0x03FF);

        keypad.set_button(GbaButton::A, true);
        assert_eq!(keypad.key_input, 0x03FE);

        keypad.set_button(GbaButton::A, false);
        assert_eq!(keypad.key_input, 0x03FF);
    }

    #[test]
    fn irq_condition_any_and_all() {
        let mut keypad = Keypad::default();
        // Select A + B, enable, any mode.
        keypad.key_interrupt_control = (1 << 14) | 0b11;
        keypad.set_button(GbaButton::A, true);
        assert!(keypad.interrupt_condition_met());

        // All mode requires both.
        keypad.key_interrupt_control |= 1 << 15;
        assert!(!keypad.interrupt_condition_met());
        keypad.set_button(GbaButton::B, true);
        assert!(keypad.interrupt_condition_met());
    }

    #[test]
    fn irq_disabled_without_enable_bit() {
        let mut keypad = Keypad::default();
        keypad.key_interrupt_control = 0b11;
        keypad.set_button(GbaButton::A, true);
        assert!(!keypad.interrupt_condition_met());
    }
}
