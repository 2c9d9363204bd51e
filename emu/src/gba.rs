//! The machine aggregate: CPU + bus + peripherals, snapshots, input.
//!
//! This is the only type frontends talk to. The framebuffer and audio
//! ring buffer are handed out as shared handles so a render/audio thread
//! can read them without touching the core.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::bus::{BIOS_SIZE, Bus};
use crate::cartridge::{Cartridge, CartridgeHeader};
use crate::cpu::arm7tdmi::Arm7tdmi;
use crate::hardware::apu::SampleBuffer;
use crate::hardware::interrupts::Interrupt;
use crate::hardware::keypad::GbaButton;

/// The 16.78 MHz system clock.
pub const CYCLES_PER_SECOND: u64 = 1 << 24;

#[derive(Debug)]
pub enum BiosError {
    /// The BIOS image must be exactly 16 KiB.
    InvalidSize(usize),
}

impl fmt::Display for BiosError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSize(size) => {
                write!(f, "bios image is {size} bytes, expected {BIOS_SIZE}")
            }
        }
    }
}

impl std::error::Error for BiosError {}

#[derive(Debug)]
pub enum SnapshotError {
    Encode(bincode::error::EncodeError),
    Decode(bincode::error::DecodeError),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "snapshot serialization failed: {e}"),
            Self::Decode(e) => write!(f, "snapshot deserialization failed: {e}"),
        }
    }
}

impl std::error::Error for SnapshotError {}

#[derive(Debug)]
pub struct Gba {
    pub cpu: Arm7tdmi,
}

impl Gba {
    pub fn new(bios: Vec<u8>, cartridge: Cartridge) -> Result<Self, BiosError> {
        if bios.len() != BIOS_SIZE {
            return Err(BiosError::InvalidSize(bios.len()));
        }
        Ok(Self {
            cpu: Arm7tdmi::new(Bus::new(bios, cartridge)),
        })
    }

    /// Hardware reset. Backup memory survives; everything else restarts
    /// from the reset vector.
    pub fn reset(&mut self) {
        let bios = std::mem::take(&mut self.cpu.bus.memory.bios);
        let rom = self.cpu.bus.cartridge.take_rom();
        let mut cartridge = self.cpu.bus.cartridge.clone();
        cartridge.attach_rom(rom);

        let frame = Arc::clone(&self.cpu.bus.video.frame);
        let samples = Arc::clone(&self.cpu.bus.apu.samples);
        self.cpu = Arm7tdmi::new(Bus::new(bios, cartridge));
        self.cpu.bus.video.frame = frame;
        self.cpu.bus.apu.samples = samples;
    }

    /// Executes a single instruction (or burns halt time).
    pub fn step(&mut self) {
        self.cpu.step();
    }

    /// Runs until the next full frame has been presented.
    pub fn run_frame(&mut self) {
        let target = self.cpu.bus.video.frame_count + 1;
        while self.cpu.bus.video.frame_count < target {
            self.cpu.step();
        }
    }

    #[must_use]
    pub const fn frame_count(&self) -> u64 {
        self.cpu.bus.video.frame_count
    }

    #[must_use]
    pub const fn cycles(&self) -> u64 {
        self.cpu.bus.cycles
    }

    #[must_use]
    pub const fn header(&self) -> &CartridgeHeader {
        &self.cpu.bus.cartridge.header
    }

    /// Shared handle to the last presented frame (RGBA8, 240x160).
    #[must_use]
    pub fn framebuffer(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.cpu.bus.video.frame)
    }

    /// Shared handle to the mixed audio frames.
    #[must_use]
    pub fn audio_samples(&self) -> Arc<Mutex<SampleBuffer>> {
        Arc::clone(&self.cpu.bus.apu.samples)
    }

    /// Updates one key and raises the keypad interrupt if KEYCNT's
    /// condition is now met.
    pub fn set_key(&mut self, button: GbaButton, pressed: bool) {
        self.cpu.bus.keypad.set_button(button, pressed);
        if self.cpu.bus.keypad.interrupt_condition_met() {
            self.cpu.bus.interrupts.request(Interrupt::Keypad);
        }
    }

    /// Marks the cartridge's GPIO real-time clock as fitted or absent.
    pub fn set_rtc_present(&mut self, present: bool) {
        self.cpu.bus.cartridge.rtc_present = present;
    }

    /// Serializes the whole machine state except the ROM image.
    pub fn save_state(&self) -> Result<Vec<u8>, SnapshotError> {
        bincode::serde::encode_to_vec(&self.cpu, bincode::config::standard())
            .map_err(SnapshotError::Encode)
    }

    /// Restores a snapshot taken by [`Self::save_state`]. The ROM stays
    /// attached and the framebuffer/audio handles held by frontends stay
    /// valid.
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), SnapshotError> {
        let (mut cpu, _): (Arm7tdmi, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(SnapshotError::Decode)?;

        cpu.bus.cartridge.attach_rom(self.cpu.bus.cartridge.take_rom());
        cpu.bus.video.frame = Arc::clone(&self.cpu.bus.video.frame);
        cpu.bus.apu.samples = Arc::clone(&self.cpu.bus.apu.samples);
        self.cpu = cpu;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_gba() -> Gba {
        let cartridge = Cartridge::new(vec![0; 0x8000]).unwrap();
        Gba::new(vec![0; BIOS_SIZE], cartridge).unwrap()
    }

    #[test]
    fn rejects_wrong_bios_size() {
        let cartridge = Cartridge::new(vec![0; 0x8000]).unwrap();
        assert!(Gba::new(vec![0; 100], cartridge).is_err());
    }

    #[test]
    fn snapshot_round_trip_replays_identically() {
        let mut gba = test_gba();
        for _ in 0..64 {
            gba.step();
        }
        let snapshot = gba.save_state().unwrap();

        let mut trace = Vec::new();
        for _ in 0..128 {
            gba.step();
            trace.push((gba.cpu.registers.program_counter(), gba.cycles()));
        }

        gba.load_state(&snapshot).unwrap();
        let mut replay = Vec::new();
        for _ in 0..128 {
            gba.step();
            replay.push((gba.cpu.registers.program_counter(), gba.cycles()));
        }

        assert_eq!(trace, replay);
    }

    #[test]
    fn snapshot_keeps_rom_attached() {
        let mut gba = test_gba();
        let snapshot = gba.save_state().unwrap();
        gba.load_state(&snapshot).unwrap();
        // OOB-latch behavior only applies past the end of a real image,
        // so an attached 32K ROM still reads zeros at its start.
        assert_eq!(gba.cpu.bus.cartridge.read_rom(0), 0);
        assert_eq!(gba.cpu.bus.cartridge.read_rom(0x8000), 0x00);
    }

    #[test]
    fn rtc_presence_survives_snapshots() {
        let mut gba = test_gba();
        gba.set_rtc_present(true);
        let snapshot = gba.save_state().unwrap();

        gba.set_rtc_present(false);
        gba.load_state(&snapshot).unwrap();
        assert!(gba.cpu.bus.cartridge.rtc_present);
    }

    #[test]
    fn run_frame_advances_exactly_one_frame() {
        let mut gba = test_gba();
        gba.run_frame();
        assert_eq!(gba.frame_count(), 1);
        // 228 scanlines of 1232 cycles each.
        assert!(gba.cycles() >= 228 * 1232);
    }

    #[test]
    fn keypad_interrupt_raised_on_match() {
        let mut gba = test_gba();
        gba.cpu.bus.keypad.key_interrupt_control = 0x4000 | 0x0001; // A, any
        gba.set_key(GbaButton::A, true);
        let pending = gba.cpu.bus.interrupts.interrupt_request;
        assert_ne!(pending & (1 << Interrupt::Keypad as u16), 0);
    }

    #[test]
    fn reset_preserves_backup_memory() {
        let mut rom = vec![0; 0x8000];
        rom[0x1000..0x1006].copy_from_slice(b"SRAM_V");
        let cartridge = Cartridge::new(rom).unwrap();
        let mut gba = Gba::new(vec![0; BIOS_SIZE], cartridge).unwrap();

        gba.cpu.bus.cartridge.write_backup(0x0E00_0000, 0x5A);
        gba.reset();
        assert_eq!(gba.cpu.bus.cartridge.read_backup(0x0E00_0000), 0x5A);
        assert_eq!(gba.cycles(), 0);
    }
}
