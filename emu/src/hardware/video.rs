//! Display timing and the bitmap-mode renderer.
//!
//! The scanline machine is two alternating scheduler events: `HBlankStart`
//! fires 960 cycles into each line, `HBlankEnd` 272 cycles later. A full
//! line is 1232 cycles, a frame is 228 lines (160 visible + 68 blank).
//!
//! Rendering happens per scanline when HBlank opens, into an RGBA8 frame
//! that is published to the frontend when VBlank starts. Bitmap modes
//! 3/4/5 are rendered; the tiled modes 0-2 fall back to the backdrop
//! color.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::bus::Bus;
use crate::hardware::dma::DmaTiming;
use crate::hardware::interrupts::Interrupt;
use crate::scheduler::EventKind;

pub const DISPLAY_WIDTH: usize = 240;
pub const DISPLAY_HEIGHT: usize = 160;
pub const FRAME_BUFFER_BYTES: usize = DISPLAY_WIDTH * DISPLAY_HEIGHT * 4;

pub const VISIBLE_LINE_CYCLES: u64 = 960;
pub const HBLANK_CYCLES: u64 = 272;
pub const SCANLINE_CYCLES: u64 = VISIBLE_LINE_CYCLES + HBLANK_CYCLES;
pub const TOTAL_SCANLINES: u16 = 228;
pub const VBLANK_START_LINE: u16 = 160;

fn blank_frame() -> Vec<u8> {
    vec![0; FRAME_BUFFER_BYTES]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    /// DISPCNT (0x4000000).
    pub dispcnt: u16,
    /// DISPSTAT (0x4000004): flags in bits 0-2, IRQ enables in 3-5,
    /// the VCount match target in 8-15.
    pub dispstat: u16,
    /// VCOUNT (0x4000006), current scanline.
    pub vcount: u16,
    pub frame_count: u64,

    /// Scanlines are composed here, then swapped into `frame` at VBlank.
    #[serde(skip, default = "blank_frame")]
    work: Vec<u8>,
    /// The last completed frame, shared with the frontend. RGBA8,
    /// 240x160, row major.
    #[serde(skip)]
    pub frame: Arc<Mutex<Vec<u8>>>,
}

impl Default for Video {
    fn default() -> Self {
        Self {
            dispcnt: 0,
            dispstat: 0,
            vcount: 0,
            frame_count: 0,
            work: blank_frame(),
            frame: Arc::new(Mutex::new(blank_frame())),
        }
    }
}

impl Video {
    fn mode(&self) -> u16 {
        self.dispcnt.get_bits(0..=2)
    }

    fn forced_blank(&self) -> bool {
        self.dispcnt.get_bit(7)
    }

    /// Mode 4/5 page flip.
    fn frame_select(&self) -> bool {
        self.dispcnt.get_bit(4)
    }

    fn vcount_target(&self) -> u16 {
        self.dispstat >> 8
    }
}

/// BGR555 to RGBA8, replicating the top bits into the low ones.
fn bgr555_to_rgba(color: u16) -> [u8; 4] {
    let expand = |c: u16| {
        let c = (c & 0x1F) as u8;
        (c << 3) | (c >> 2)
    };
    [expand(color), expand(color >> 5), expand(color >> 10), 0xFF]
}

impl Bus {
    pub(crate) fn hblank_start(&mut self, at: u64) {
        self.video.dispstat.set_bit(1, true);

        if self.video.vcount < VBLANK_START_LINE {
            self.render_scanline(self.video.vcount);
            self.trigger_dma(DmaTiming::HBlank);
        }
        if self.video.dispstat.get_bit(4) {
            self.interrupts.request(Interrupt::HBlank);
        }

        self.scheduler
            .schedule(EventKind::HBlankEnd, at + HBLANK_CYCLES);
    }

    pub(crate) fn hblank_end(&mut self, at: u64) {
        self.video.dispstat.set_bit(1, false);
        self.video.vcount = (self.video.vcount + 1) % TOTAL_SCANLINES;

        let matched = self.video.vcount == self.video.vcount_target();
        self.video.dispstat.set_bit(2, matched);
        if matched && self.video.dispstat.get_bit(5) {
            self.interrupts.request(Interrupt::VCount);
        }

        match self.video.vcount {
            VBLANK_START_LINE => {
                self.video.dispstat.set_bit(0, true);
                if self.video.dispstat.get_bit(3) {
                    self.interrupts.request(Interrupt::VBlank);
                }
                self.trigger_dma(DmaTiming::VBlank);
                self.present_frame();
            }
            0 => self.video.dispstat.set_bit(0, false),
            _ => {}
        }

        self.scheduler
            .schedule(EventKind::HBlankStart, at + VISIBLE_LINE_CYCLES);
    }

    fn present_frame(&mut self) {
        if let Ok(mut frame) = self.video.frame.lock() {
            std::mem::swap(&mut *frame, &mut self.video.work);
        }
        self.video.frame_count += 1;
    }

    fn backdrop_color(&self) -> [u8; 4] {
        let color =
            u16::from(self.memory.palette_ram[0]) | (u16::from(self.memory.palette_ram[1]) << 8);
        bgr555_to_rgba(color)
    }

    fn render_scanline(&mut self, line: u16) {
        let y = line as usize;
        let row = y * DISPLAY_WIDTH * 4;

        if self.video.forced_blank() {
            self.video.work[row..row + DISPLAY_WIDTH * 4].fill(0xFF);
            return;
        }

        match self.video.mode() {
            3 => {
                for x in 0..DISPLAY_WIDTH {
                    let offset = (y * DISPLAY_WIDTH + x) * 2;
                    let color = u16::from(self.memory.vram[offset])
                        | (u16::from(self.memory.vram[offset + 1]) << 8);
                    let pixel = row + x * 4;
                    self.video.work[pixel..pixel + 4].copy_from_slice(&bgr555_to_rgba(color));
                }
            }
            4 => {
                let page = if self.video.frame_select() { 0xA000 } else { 0 };
                for x in 0..DISPLAY_WIDTH {
                    let index = self.memory.vram[page + y * DISPLAY_WIDTH + x] as usize;
                    let color = u16::from(self.memory.palette_ram[index * 2])
                        | (u16::from(self.memory.palette_ram[index * 2 + 1]) << 8);
                    let pixel = row + x * 4;
                    self.video.work[pixel..pixel + 4].copy_from_slice(&bgr555_to_rgba(color));
                }
            }
            5 => {
                // 160x128 window, backdrop outside it.
                let page = if self.video.frame_select() { 0xA000 } else { 0 };
                let backdrop = self.backdrop_color();
                for x in 0..DISPLAY_WIDTH {
                    let pixel = row + x * 4;
                    if x < 160 && y < 128 {
                        let offset = page + (y * 160 + x) * 2;
                        let color = u16::from(self.memory.vram[offset])
                            | (u16::from(self.memory.vram[offset + 1]) << 8);
                        self.video.work[pixel..pixel + 4]
                            .copy_from_slice(&bgr555_to_rgba(color));
                    } else {
                        self.video.work[pixel..pixel + 4].copy_from_slice(&backdrop);
                    }
                }
            }
            _ => {
                // Tiled modes render as backdrop only.
                let backdrop = self.backdrop_color();
                for x in 0..DISPLAY_WIDTH {
                    let pixel = row + x * 4;
                    self.video.work[pixel..pixel + 4].copy_from_slice(&backdrop);
                }
            }
        }
    }
}
