//! The four DMA channels.
//!
//! Register writes only latch state; the actual copies run as scheduler
//! events so the CPU finishes its current instruction first (the bus is
//! handed over about 3 cycles after the trigger).

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::bus::{Access, Bus};
use crate::hardware::interrupts::Interrupt;
use crate::scheduler::EventKind;

/// Valid address bits per channel. Channel 0 cannot reach the cartridge;
/// only channel 3 may write to it.
const SOURCE_MASKS: [u32; 4] = [0x07FF_FFFF, 0x0FFF_FFFF, 0x0FFF_FFFF, 0x0FFF_FFFF];
const DESTINATION_MASKS: [u32; 4] = [0x07FF_FFFF, 0x07FF_FFFF, 0x07FF_FFFF, 0x0FFF_FFFF];
const COUNT_MASKS: [u32; 4] = [0x3FFF, 0x3FFF, 0x3FFF, 0xFFFF];

pub const FIFO_A_ADDRESS: u32 = 0x0400_00A0;
pub const FIFO_B_ADDRESS: u32 = 0x0400_00A4;

/// When a latched channel actually starts copying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DmaTiming {
    Immediate,
    VBlank,
    HBlank,
    /// Sound FIFO refill for channels 1/2, video capture for channel 3.
    Special,
}

impl From<u16> for DmaTiming {
    fn from(bits: u16) -> Self {
        match bits & 0b11 {
            0b00 => Self::Immediate,
            0b01 => Self::VBlank,
            0b10 => Self::HBlank,
            _ => Self::Special,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddressAdjustment {
    Increment,
    Decrement,
    Fixed,
    /// Increment, and reload the base when a repeat re-triggers.
    IncrementReload,
}

impl From<u16> for AddressAdjustment {
    fn from(bits: u16) -> Self {
        match bits & 0b11 {
            0b00 => Self::Increment,
            0b01 => Self::Decrement,
            0b10 => Self::Fixed,
            _ => Self::IncrementReload,
        }
    }
}

impl AddressAdjustment {
    const fn step(self, unit: u32) -> u32 {
        match self {
            Self::Increment | Self::IncrementReload => unit,
            Self::Decrement => unit.wrapping_neg(),
            Self::Fixed => 0,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DmaChannel {
    /// DMAxSAD, write only.
    pub source: u32,
    /// DMAxDAD, write only.
    pub destination: u32,
    /// DMAxCNT_L, write only.
    pub count: u16,
    /// DMAxCNT_H.
    pub control: u16,

    // The transfer engine works on these latched copies; the registers
    // above keep whatever the game last wrote.
    internal_source: u32,
    internal_destination: u32,
    internal_count: u32,
}

impl DmaChannel {
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.control.get_bit(15)
    }

    #[must_use]
    pub fn timing(&self) -> DmaTiming {
        DmaTiming::from(self.control.get_bits(12..=13))
    }

    fn irq_on_completion(&self) -> bool {
        self.control.get_bit(14)
    }

    fn word_transfer(&self) -> bool {
        self.control.get_bit(10)
    }

    fn repeat(&self) -> bool {
        self.control.get_bit(9)
    }

    fn source_adjustment(&self) -> AddressAdjustment {
        AddressAdjustment::from(self.control.get_bits(7..=8))
    }

    fn destination_adjustment(&self) -> AddressAdjustment {
        AddressAdjustment::from(self.control.get_bits(5..=6))
    }

    /// The latched destination, used to match a FIFO channel to its FIFO.
    #[must_use]
    pub(crate) const fn fifo_destination(&self) -> u32 {
        self.internal_destination
    }

    /// Copies the registers into the internal latches, applied on the
    /// rising edge of the enable bit. Addresses are aligned to the unit.
    fn latch(&mut self, idx: usize) {
        let align = if self.word_transfer() { !3 } else { !1 };
        self.internal_source = self.source & SOURCE_MASKS[idx] & align;
        self.internal_destination = self.destination & DESTINATION_MASKS[idx] & align;
        self.reload_count(idx);
    }

    /// A stored count of 0 means the channel's maximum length.
    fn reload_count(&mut self, idx: usize) {
        let count = u32::from(self.count) & COUNT_MASKS[idx];
        self.internal_count = if count == 0 { COUNT_MASKS[idx] + 1 } else { count };
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DmaController {
    pub channels: [DmaChannel; 4],
    /// True while a transfer is on the bus. ROM prefetch is suppressed
    /// for the duration.
    pub active: bool,
}

const fn is_gamepak(address: u32) -> bool {
    matches!(address >> 24, 0x08..=0x0D)
}

impl Bus {
    /// Handles a write to DMAxCNT_H.
    pub(crate) fn dma_control_write(&mut self, idx: usize, value: u16) {
        let was_enabled = self.dma.channels[idx].enabled();
        self.dma.channels[idx].control = value;

        let channel = &mut self.dma.channels[idx];
        if was_enabled || !channel.enabled() {
            return;
        }

        channel.latch(idx);
        match channel.timing() {
            DmaTiming::Immediate => {
                // Bus handoff takes ~3 cycles after the enabling store.
                self.scheduler
                    .schedule(EventKind::DmaTransfer(DmaTiming::Immediate), self.cycles + 3);
            }
            DmaTiming::Special if idx == 3 => {
                tracing::warn!("video capture DMA enabled on channel 3, not implemented");
            }
            // VBlank/HBlank/FIFO channels wait for their trigger.
            _ => {}
        }
    }

    /// Called by the video scanline machine (and tests) when a timing
    /// window opens. Schedules one transfer event if any channel waits
    /// on that window.
    pub(crate) fn trigger_dma(&mut self, timing: DmaTiming) {
        let any = self
            .dma
            .channels
            .iter()
            .any(|ch| ch.enabled() && ch.timing() == timing);
        if any {
            self.scheduler
                .schedule(EventKind::DmaTransfer(timing), self.cycles + 3);
        }
    }

    /// Runs every enabled channel matching `timing`, lowest index first.
    pub(crate) fn run_dma_transfers(&mut self, timing: DmaTiming) {
        self.dma.active = true;
        let mut first = true;
        for idx in 0..4 {
            let channel = &self.dma.channels[idx];
            if !channel.enabled() || channel.timing() != timing {
                continue;
            }
            // FIFO refills on channels 1/2 are driven by DmaFifo events.
            if timing == DmaTiming::Special {
                continue;
            }
            self.run_dma_channel(idx, first);
            first = false;
        }
        self.dma.active = false;
    }

    fn run_dma_channel(&mut self, idx: usize, first_in_window: bool) {
        let channel = self.dma.channels[idx].clone();
        let word = channel.word_transfer();
        let unit = if word { 4 } else { 2 };
        let source_step = channel.source_adjustment().step(unit);
        let destination_step = channel.destination_adjustment().step(unit);

        let mut source = channel.internal_source;
        let mut destination = channel.internal_destination;

        // Two idle cycles when the bus is first handed over, plus two
        // more when both endpoints sit in the cartridge space.
        if first_in_window {
            self.idle(2);
        }
        if is_gamepak(source) && is_gamepak(destination) {
            self.idle(2);
        }

        tracing::debug!(
            channel = idx,
            source = format_args!("{source:#010X}"),
            destination = format_args!("{destination:#010X}"),
            count = channel.internal_count,
            word,
            "dma transfer"
        );

        let mut access = Access::NonSequential;
        for _ in 0..channel.internal_count {
            if word {
                let value = self.read_word(source, access);
                self.write_word(destination, value, access);
            } else {
                let value = self.read_half_word(source, access);
                self.write_half_word(destination, value, access);
            }
            source = source.wrapping_add(source_step);
            destination = destination.wrapping_add(destination_step);
            access = Access::Sequential;
        }

        let channel = &mut self.dma.channels[idx];
        channel.internal_source = source;
        channel.internal_destination = destination;

        // Repeat re-latches the count (and the destination for control
        // 0b11) and leaves the channel armed for its next trigger; an
        // immediate channel can only fire again on an enable rising edge.
        if channel.repeat() {
            channel.reload_count(idx);
            if channel.destination_adjustment() == AddressAdjustment::IncrementReload {
                let align = if word { !3 } else { !1 };
                channel.internal_destination =
                    channel.destination & DESTINATION_MASKS[idx] & align;
            }
        } else {
            channel.control.set_bit(15, false);
        }

        if self.dma.channels[idx].irq_on_completion() {
            self.interrupts.request(Interrupt::dma(idx));
        }
    }

    /// Sound FIFO refill: always 4 words to a fixed destination, without
    /// touching the latched count.
    pub(crate) fn run_dma_fifo(&mut self, idx: usize) {
        let channel = &self.dma.channels[idx];
        if !channel.enabled() || channel.timing() != DmaTiming::Special {
            return;
        }
        let channel = channel.clone();
        let source_step = channel.source_adjustment().step(4);
        let mut source = channel.internal_source;
        let destination = channel.internal_destination;

        self.dma.active = true;
        self.idle(2);

        let mut access = Access::NonSequential;
        for _ in 0..4 {
            let value = self.read_word(source, access);
            self.write_word(destination, value, access);
            source = source.wrapping_add(source_step);
            access = Access::Sequential;
        }

        self.dma.active = false;
        let channel = &mut self.dma.channels[idx];
        channel.internal_source = source;
        if channel.repeat() {
            channel.internal_count = 4;
        } else {
            channel.control.set_bit(15, false);
        }
        if self.dma.channels[idx].irq_on_completion() {
            self.interrupts.request(Interrupt::dma(idx));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn latch_masks_and_aligns() {
        let mut channel = DmaChannel {
            source: 0xFFFF_FFFF,
            destination: 0x0800_0003,
            count: 0x0005,
            control: 1 << 10, // word size
            ..Default::default()
        };
        channel.latch(0);
        assert_eq!(channel.internal_source, 0x07FF_FFFC);
        assert_eq!(channel.internal_destination, 0x0000_0000);
        assert_eq!(channel.internal_count, 5);

        channel.latch(3);
        assert_eq!(channel.internal_source, 0x0FFF_FFFC);
        assert_eq!(channel.internal_destination, 0x0800_0000);
    }

    #[test]
    fn count_zero_means_maximum() {
        let mut channel = DmaChannel::default();
        channel.reload_count(0);
        assert_eq!(channel.internal_count, 0x4000);
        channel.reload_count(3);
        assert_eq!(channel.internal_count, 0x1_0000);
    }

    #[test]
    fn timing_decodes_from_control() {
        let mut channel = DmaChannel::default();
        channel.control = 0b01 << 12;
        assert_eq!(channel.timing(), DmaTiming::VBlank);
        channel.control = 0b10 << 12;
        assert_eq!(channel.timing(), DmaTiming::HBlank);
        channel.control = 0b11 << 12;
        assert_eq!(channel.timing(), DmaTiming::Special);
    }

    #[test]
    fn gamepak_region_detection() {
        assert!(is_gamepak(0x0800_0000));
        assert!(is_gamepak(0x0DFF_FFFF));
        assert!(!is_gamepak(0x0300_0000));
        assert!(!is_gamepak(0x0E00_0000));
    }
}
