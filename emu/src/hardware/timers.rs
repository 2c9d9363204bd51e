//! The four 16-bit timers.
//!
//! Free-running timers are not ticked cycle by cycle. Instead the counter
//! is derived from the elapsed cycles on demand and a single overflow
//! event sits in the scheduler. Cascade timers have no clock of their own
//! and are stepped directly from the previous timer's overflow.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::bus::Bus;
use crate::hardware::interrupts::Interrupt;
use crate::scheduler::EventKind;

const PRESCALERS: [u64; 4] = [1, 64, 256, 1024];

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Timer {
    /// TMxCNT_L on write; the value loaded on enable and on overflow.
    pub reload: u16,
    /// TMxCNT_H.
    pub control: u16,
    /// Counter value at `sync_cycle`. Live value is derived from this.
    counter: u16,
    sync_cycle: u64,
}

impl Timer {
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.control.get_bit(7)
    }

    fn irq_on_overflow(&self) -> bool {
        self.control.get_bit(6)
    }

    /// Count-up mode: ticks on the previous timer's overflow instead of
    /// the prescaled clock. Meaningless on timer 0.
    fn cascade(&self) -> bool {
        self.control.get_bit(2)
    }

    fn prescaler(&self) -> u64 {
        PRESCALERS[self.control.get_bits(0..=1) as usize]
    }

    fn ticks_until_overflow(&self) -> u64 {
        0x1_0000 - u64::from(self.counter)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Timers {
    pub timers: [Timer; 4],
}

impl Bus {
    /// Current counter value, derived from elapsed cycles for running
    /// free timers.
    pub(crate) fn timer_counter(&self, idx: usize) -> u16 {
        let timer = &self.timers.timers[idx];
        if !timer.enabled() || timer.cascade() {
            return timer.counter;
        }
        let elapsed = (self.cycles - timer.sync_cycle) / timer.prescaler();
        timer.counter.wrapping_add(elapsed as u16)
    }

    pub(crate) fn timer_control_write(&mut self, idx: usize, value: u16) {
        // Freeze the derived value before the control bits change.
        let current = self.timer_counter(idx);

        self.scheduler.cancel(EventKind::TimerOverflow(idx));

        let rising = !self.timers.timers[idx].enabled() && value.get_bit(7);
        let timer = &mut self.timers.timers[idx];
        timer.control = value;
        timer.counter = if rising { timer.reload } else { current };
        timer.sync_cycle = self.cycles;

        if timer.enabled() && !timer.cascade() {
            let due = self.cycles + timer.ticks_until_overflow() * timer.prescaler();
            self.scheduler.schedule(EventKind::TimerOverflow(idx), due);
        }
    }

    /// Scheduler event handler for a free-running timer reaching 0x10000.
    pub(crate) fn timer_overflow(&mut self, idx: usize, at: u64) {
        {
            let timer = &mut self.timers.timers[idx];
            timer.counter = timer.reload;
            timer.sync_cycle = at;
        }
        let timer = &self.timers.timers[idx];
        let due = at + timer.ticks_until_overflow() * timer.prescaler();
        self.scheduler.schedule(EventKind::TimerOverflow(idx), due);

        self.handle_overflow_effects(idx);
    }

    fn handle_overflow_effects(&mut self, idx: usize) {
        if self.timers.timers[idx].irq_on_overflow() {
            self.interrupts.request(Interrupt::timer(idx));
        }
        if idx < 2 {
            self.apu_timer_overflow(idx);
        }
        if idx < 3 {
            self.tick_cascade(idx + 1);
        }
    }

    fn tick_cascade(&mut self, idx: usize) {
        let timer = &self.timers.timers[idx];
        if !timer.enabled() || !timer.cascade() {
            return;
        }
        let timer = &mut self.timers.timers[idx];
        let (next, overflowed) = timer.counter.overflowing_add(1);
        timer.counter = if overflowed { timer.reload } else { next };
        if overflowed {
            self.handle_overflow_effects(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn prescaler_selection() {
        let mut timer = Timer::default();
        assert_eq!(timer.prescaler(), 1);
        timer.control = 0b01;
        assert_eq!(timer.prescaler(), 64);
        timer.control = 0b10;
        assert_eq!(timer.prescaler(), 256);
        timer.control = 0b11;
        assert_eq!(timer.prescaler(), 1024);
    }

    #[test]
    fn ticks_until_overflow_from_reload() {
        let timer = Timer {
            counter: 0xFFFE,
            ..Default::default()
        };
        assert_eq!(timer.ticks_until_overflow(), 2);
    }
}
