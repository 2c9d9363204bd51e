//! Cycle-accurate Game Boy Advance emulation core.
//!
//! The crate is organized around five mutually recursive pieces:
//!
//! - [`scheduler`]: a priority queue of timestamped events, the single
//!   source of truth for "when does X happen".
//! - [`cpu`]: the ARM7TDMI interpreter (ARM and THUMB instruction sets,
//!   2-stage pipeline model, banked registers).
//! - [`bus`]: address decoding, wait states and the ROM prefetch buffer.
//!   Every memory access charges cycles here, which is what drives the
//!   scheduler forward.
//! - [`hardware`]: the peripherals living behind the I/O window (DMA,
//!   interrupt control, timers, video timing, audio FIFOs, keypad).
//! - [`gba`]: the machine aggregate tying everything together, plus
//!   snapshot save/load.
//!
//! Frontends consume the core through [`gba::Gba`] only: run frames, read
//! the framebuffer and audio ring buffer, inject key state.

#[allow(clippy::cast_possible_truncation)]
pub mod bitwise;

#[allow(clippy::missing_panics_doc)]
#[allow(clippy::cast_lossless)]
#[allow(clippy::unreadable_literal)]
pub mod bus;

#[allow(clippy::similar_names)]
pub mod cartridge;
pub mod cpu;
pub mod gba;
pub mod hardware;
pub mod ring_buffer;
pub mod scheduler;
