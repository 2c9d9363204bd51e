//! Direct Sound: the two sample FIFOs and the output sample clock.
//!
//! Only the DMA-fed channels A/B are mixed; the four legacy PSG channels
//! are not generated. Mixed stereo frames land in a shared ring buffer
//! that the frontend drains at its own pace.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::bus::Bus;
use crate::gba::CYCLES_PER_SECOND;
use crate::hardware::dma::{DmaTiming, FIFO_A_ADDRESS, FIFO_B_ADDRESS};
use crate::scheduler::EventKind;

const FIFO_CAPACITY: usize = 32;
/// A FIFO at or below this level after a pop asks DMA for 4 more words.
const FIFO_REFILL_THRESHOLD: usize = 16;
/// Upper bound on buffered output frames before the producer drops.
const SAMPLE_BUFFER_CAPACITY: usize = 16 * 1024;

/// Stereo output frames, left and right as signed 16-bit samples.
pub type SampleBuffer = VecDeque<(i16, i16)>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Apu {
    pub fifo_a: VecDeque<i8>,
    pub fifo_b: VecDeque<i8>,
    /// Last sample popped from each FIFO, held until the next timer tick.
    latched_a: i8,
    latched_b: i8,

    /// SOUNDCNT_H (0x4000082): Direct Sound routing and timer selects.
    pub control_h: u16,
    /// SOUNDCNT_X (0x4000084): bit 7 is the master enable.
    pub control_x: u16,
    /// SOUNDBIAS (0x4000088), stored for readback only.
    pub bias: u16,

    pub sample_rate: u32,
    #[serde(skip)]
    pub samples: Arc<Mutex<SampleBuffer>>,
}

impl Default for Apu {
    fn default() -> Self {
        Self {
            fifo_a: VecDeque::with_capacity(FIFO_CAPACITY),
            fifo_b: VecDeque::with_capacity(FIFO_CAPACITY),
            latched_a: 0,
            latched_b: 0,
            control_h: 0,
            control_x: 0,
            bias: 0x0200,
            sample_rate: 48_000,
            samples: Arc::default(),
        }
    }
}

impl Apu {
    #[must_use]
    pub fn master_enabled(&self) -> bool {
        self.control_x.get_bit(7)
    }

    /// The timer (0 or 1) that clocks FIFO A.
    fn timer_select_a(&self) -> usize {
        usize::from(self.control_h.get_bit(10))
    }

    fn timer_select_b(&self) -> usize {
        usize::from(self.control_h.get_bit(14))
    }

    /// A byte written into FIFO A. Full FIFOs drop the sample.
    pub fn push_fifo_a(&mut self, value: u8) {
        if self.fifo_a.len() < FIFO_CAPACITY {
            self.fifo_a.push_back(value as i8);
        }
    }

    pub fn push_fifo_b(&mut self, value: u8) {
        if self.fifo_b.len() < FIFO_CAPACITY {
            self.fifo_b.push_back(value as i8);
        }
    }

    /// SOUNDCNT_H writes; bits 11/15 reset the FIFOs and read back as 0.
    pub fn write_control_h(&mut self, value: u16) {
        if value.get_bit(11) {
            self.fifo_a.clear();
        }
        if value.get_bit(15) {
            self.fifo_b.clear();
        }
        self.control_h = value & !(1 << 11 | 1 << 15);
    }

    fn mix(&self) -> (i16, i16) {
        // Both channels at full volume to both sides, averaged.
        let mono = (i16::from(self.latched_a) + i16::from(self.latched_b)) * 128;
        (mono, mono)
    }

    pub(crate) fn cycles_per_sample(&self) -> u64 {
        CYCLES_PER_SECOND / u64::from(self.sample_rate)
    }
}

impl Bus {
    /// Timer overflow feed. Pops the next sample for every FIFO clocked
    /// by `timer_idx` and asks DMA for more data when a FIFO runs low.
    pub(crate) fn apu_timer_overflow(&mut self, timer_idx: usize) {
        if !self.apu.master_enabled() {
            return;
        }

        if self.apu.timer_select_a() == timer_idx {
            if let Some(sample) = self.apu.fifo_a.pop_front() {
                self.apu.latched_a = sample;
            }
            if self.apu.fifo_a.len() <= FIFO_REFILL_THRESHOLD {
                self.request_fifo_refill(FIFO_A_ADDRESS);
            }
        }
        if self.apu.timer_select_b() == timer_idx {
            if let Some(sample) = self.apu.fifo_b.pop_front() {
                self.apu.latched_b = sample;
            }
            if self.apu.fifo_b.len() <= FIFO_REFILL_THRESHOLD {
                self.request_fifo_refill(FIFO_B_ADDRESS);
            }
        }
    }

    /// Channels 1 and 2 serve the FIFOs; the one whose latched
    /// destination matches gets a refill event.
    fn request_fifo_refill(&mut self, fifo_address: u32) {
        for idx in 1..=2 {
            let channel = &self.dma.channels[idx];
            if channel.enabled()
                && channel.timing() == DmaTiming::Special
                && channel.fifo_destination() == fifo_address
            {
                self.scheduler
                    .schedule(EventKind::DmaFifo(idx), self.cycles + 3);
                return;
            }
        }
    }

    /// Scheduler event handler: emit one output frame and rearm.
    pub(crate) fn apu_sample(&mut self, at: u64) {
        let frame = self.apu.mix();
        if let Ok(mut samples) = self.apu.samples.lock() {
            if samples.len() < SAMPLE_BUFFER_CAPACITY {
                samples.push_back(frame);
            }
        }
        let period = self.apu.cycles_per_sample();
        self.scheduler
            .schedule(EventKind::ApuSample, at + period);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fifo_drops_when_full() {
        let mut apu = Apu::default();
        for i in 0..40 {
            apu.push_fifo_a(i);
        }
        assert_eq!(apu.fifo_a.len(), FIFO_CAPACITY);
        assert_eq!(apu.fifo_a.front(), Some(&0));
    }

    #[test]
    fn control_h_reset_bits_clear_fifos() {
        let mut apu = Apu::default();
        apu.push_fifo_a(1);
        apu.push_fifo_b(2);
        apu.write_control_h((1 << 11) | (1 << 15) | 0x0B0F);
        assert!(apu.fifo_a.is_empty());
        assert!(apu.fifo_b.is_empty());
        assert_eq!(apu.control_h, 0x0B0F);
    }

    #[test]
    fn timer_selects() {
        let mut apu = Apu::default();
        apu.control_h = (1 << 10) | (0 << 14);
        assert_eq!(apu.timer_select_a(), 1);
        assert_eq!(apu.timer_select_b(), 0);
    }
}
