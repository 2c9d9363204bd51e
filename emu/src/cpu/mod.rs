mod alu;
mod arm;

#[allow(clippy::cast_lossless)]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::module_name_repetitions)]
pub mod arm7tdmi;
mod condition;
mod cpu_modes;
pub mod psr;
mod register_bank;
mod registers;
mod thumb;

pub use cpu_modes::Mode;
pub use registers::Registers;
