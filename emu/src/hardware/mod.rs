//! Memory-mapped peripherals.
//!
//! Each module owns the register state for one block of the IO page and,
//! where the peripheral does work over time, an `impl Bus` block with the
//! event handlers the scheduler dispatches into.

pub mod apu;
pub mod dma;
pub mod interrupts;
pub mod keypad;
pub mod timers;
pub mod video;
