use serde::{Deserialize, Serialize};

use crate::cpu::psr::Psr;

/// Storage for the registers of every mode that is not currently active.
///
/// FIQ banks R8-R14; the other privileged modes bank R13/R14; User and
/// System share the `user` copies. Each privileged mode also keeps a SPSR.
/// The invariant is that for the active mode these slots are stale and the
/// live values sit in [`super::Registers`]; `store`/`restore` on the core
/// keep the two in sync across mode switches.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RegisterBank {
    pub r8_user: u32,
    pub r9_user: u32,
    pub r10_user: u32,
    pub r11_user: u32,
    pub r12_user: u32,
    pub r13_user: u32,
    pub r14_user: u32,

    pub r8_fiq: u32,
    pub r9_fiq: u32,
    pub r10_fiq: u32,
    pub r11_fiq: u32,
    pub r12_fiq: u32,
    pub r13_fiq: u32,
    pub r14_fiq: u32,
    pub spsr_fiq: Psr,

    pub r13_irq: u32,
    pub r14_irq: u32,
    pub spsr_irq: Psr,

    pub r13_svc: u32,
    pub r14_svc: u32,
    pub spsr_svc: Psr,

    pub r13_abt: u32,
    pub r14_abt: u32,
    pub spsr_abt: Psr,

    pub r13_und: u32,
    pub r14_und: u32,
    pub spsr_und: Psr,
}
