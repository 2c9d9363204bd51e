use serde::{Deserialize, Serialize};

pub const REG_SP: usize = 13;
pub const REG_LR: usize = 14;
pub const REG_PROGRAM_COUNTER: usize = 15;

/// The 16 general purpose registers currently visible (R0-R15, R15 = PC).
///
/// Bank switching swaps values in and out of here; at any point this holds
/// exactly the registers the active mode sees.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Registers([u32; 16]);

impl Registers {
    #[must_use]
    pub const fn register_at(&self, reg: usize) -> u32 {
        self.0[reg]
    }

    pub const fn set_register_at(&mut self, reg: usize, value: u32) {
        self.0[reg] = value;
    }

    #[must_use]
    pub const fn program_counter(&self) -> u32 {
        self.0[REG_PROGRAM_COUNTER]
    }

    pub const fn set_program_counter(&mut self, value: u32) {
        self.0[REG_PROGRAM_COUNTER] = value;
    }

    pub const fn advance_program_counter(&mut self, bytes: u32) {
        self.0[REG_PROGRAM_COUNTER] = self.0[REG_PROGRAM_COUNTER].wrapping_add(bytes);
    }
}
