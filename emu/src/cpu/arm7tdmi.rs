//! The CPU core: pipeline, mode banking and exception entry.
//!
//! The core owns the [`Bus`]; every fetch and data access flows through it
//! and charges cycles there. R15 always holds the address of the *next*
//! fetch, which keeps it two fetch widths ahead of the executing
//! instruction exactly like the real 2-deep pipeline: reading R15 from an
//! instruction yields `address + 8` in ARM state and `address + 4` in
//! THUMB state.

use serde::{Deserialize, Serialize};

use crate::bus::{Access, Bus};
use crate::cpu::Mode;
use crate::cpu::condition::Condition;
use crate::cpu::psr::{CpuState, Psr};
use crate::cpu::register_bank::RegisterBank;
use crate::cpu::registers::{REG_LR, Registers};

pub const IRQ_VECTOR: u32 = 0x0000_0018;
pub const SWI_VECTOR: u32 = 0x0000_0008;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arm7tdmi {
    pub bus: Bus,
    pub registers: Registers,
    pub cpsr: Psr,
    pub register_bank: RegisterBank,

    /// Fetched-but-not-retired opcodes: `[0]` executes next, `[1]` was
    /// fetched last.
    pipeline: [u32; 2],
    /// Access kind for the next opcode fetch.
    fetch_access: Access,
    /// Set when the executing instruction wrote PC; suppresses the usual
    /// PC advance for that instruction.
    pipeline_reloaded: bool,
}

impl Arm7tdmi {
    #[must_use]
    pub fn new(bus: Bus) -> Self {
        let mut cpu = Self {
            bus,
            registers: Registers::default(),
            cpsr: Psr::default(),
            register_bank: RegisterBank::default(),
            pipeline: [0; 2],
            fetch_access: Access::NonSequential,
            pipeline_reloaded: false,
        };
        cpu.reset();
        cpu
    }

    /// Power-on state: Supervisor mode, ARM state, IRQ/FIQ masked,
    /// execution from the reset vector.
    pub fn reset(&mut self) {
        self.registers = Registers::default();
        self.register_bank = RegisterBank::default();
        self.cpsr = Psr::from(Mode::Supervisor);
        self.cpsr.set_irq_disable(true);
        self.cpsr.set_fiq_disable(true);
        self.registers.set_program_counter(0);
        self.reload_pipeline();
    }

    /// Executes one instruction (or burns halt cycles), pumping due
    /// events and polling the IRQ line at the boundary.
    pub fn step(&mut self) {
        self.bus.process_events();

        if self.bus.halted {
            // Nothing to execute: jump straight to the next event.
            let next = self.bus.scheduler.next_due().unwrap_or(self.bus.cycles + 1);
            self.bus.cycles = next.max(self.bus.cycles + 1);
            return;
        }

        if self.bus.interrupts.is_asserted() && !self.cpsr.irq_disable() {
            self.enter_irq();
            return;
        }

        match self.cpsr.cpu_state() {
            CpuState::Arm => {
                let opcode = self.pipeline[0];
                self.pipeline[0] = self.pipeline[1];
                self.pipeline[1] = self
                    .bus
                    .fetch_word(self.registers.program_counter(), self.fetch_access);
                self.fetch_access = Access::Sequential;
                self.pipeline_reloaded = false;

                let condition = Condition::from(opcode >> 28);
                if self.cpsr.can_execute(condition) {
                    self.execute_arm(opcode);
                }
                if !self.pipeline_reloaded {
                    self.registers.advance_program_counter(4);
                }
            }
            CpuState::Thumb => {
                let opcode = self.pipeline[0];
                self.pipeline[0] = self.pipeline[1];
                self.pipeline[1] = u32::from(
                    self.bus
                        .fetch_half_word(self.registers.program_counter(), self.fetch_access),
                );
                self.fetch_access = Access::Sequential;
                self.pipeline_reloaded = false;

                self.execute_thumb(opcode as u16);
                if !self.pipeline_reloaded {
                    self.registers.advance_program_counter(2);
                }
            }
        }
    }

    /// Refills both pipeline stages from the current PC. Both fetches are
    /// non-sequential: the fetch stream was broken by the PC write.
    pub(crate) fn reload_pipeline(&mut self) {
        match self.cpsr.cpu_state() {
            CpuState::Arm => {
                let pc = self.registers.program_counter() & !3;
                self.pipeline[0] = self.bus.fetch_word(pc, Access::NonSequential);
                self.pipeline[1] = self.bus.fetch_word(pc.wrapping_add(4), Access::NonSequential);
                self.registers.set_program_counter(pc.wrapping_add(8));
            }
            CpuState::Thumb => {
                let pc = self.registers.program_counter() & !1;
                self.pipeline[0] =
                    u32::from(self.bus.fetch_half_word(pc, Access::NonSequential));
                self.pipeline[1] = u32::from(
                    self.bus
                        .fetch_half_word(pc.wrapping_add(2), Access::NonSequential),
                );
                self.registers.set_program_counter(pc.wrapping_add(4));
            }
        }
        self.fetch_access = Access::Sequential;
        self.pipeline_reloaded = true;
    }

    /// Writes PC and refills the pipeline. The state bit is not touched;
    /// use [`Self::branch_exchange`] for BX semantics.
    pub(crate) fn branch_to(&mut self, address: u32) {
        self.registers.set_program_counter(address);
        self.reload_pipeline();
    }

    pub(crate) fn branch_exchange(&mut self, address: u32) {
        let thumb = address & 1 != 0;
        self.cpsr
            .set_cpu_state(if thumb { CpuState::Thumb } else { CpuState::Arm });
        self.branch_to(address & if thumb { !1 } else { !3 });
    }

    /// Word load with the misaligned-address behavior of LDR: the bus
    /// always reads the aligned word, then the result is rotated so the
    /// addressed byte lands in the low lane.
    pub(crate) fn read_word_rotated(&mut self, address: u32, access: Access) -> u32 {
        self.bus
            .read_word(address, access)
            .rotate_right((address & 3) * 8)
    }

    // ------------------------------------------------------------------
    // Exceptions
    // ------------------------------------------------------------------

    fn enter_irq(&mut self) {
        // The instruction at the head of the pipeline has not executed;
        // the handler returns to it with `SUBS PC, LR, #4`.
        let width = match self.cpsr.cpu_state() {
            CpuState::Arm => 4,
            CpuState::Thumb => 2,
        };
        let unexecuted = self.registers.program_counter().wrapping_sub(2 * width);
        self.enter_exception(Mode::Irq, IRQ_VECTOR, unexecuted.wrapping_add(4));
    }

    /// Software interrupt. The handler returns to the following
    /// instruction with `MOVS PC, LR`.
    pub(crate) fn enter_swi(&mut self) {
        let width = match self.cpsr.cpu_state() {
            CpuState::Arm => 4,
            CpuState::Thumb => 2,
        };
        let next = self.registers.program_counter().wrapping_sub(width);
        self.enter_exception(Mode::Supervisor, SWI_VECTOR, next);
    }

    fn enter_exception(&mut self, mode: Mode, vector: u32, lr: u32) {
        let old_cpsr = self.cpsr;
        self.swap_mode(mode);
        self.cpsr.set_mode(mode);
        self.set_spsr(old_cpsr);
        self.cpsr.set_irq_disable(true);
        self.cpsr.set_cpu_state(CpuState::Arm);
        self.registers.set_register_at(REG_LR, lr);
        self.registers.set_program_counter(vector);
        self.reload_pipeline();
    }

    // ------------------------------------------------------------------
    // Banking
    // ------------------------------------------------------------------

    /// Parks the active mode's banked registers and pulls in the target
    /// mode's. The CPSR mode field is not changed here.
    pub(crate) fn swap_mode(&mut self, new_mode: Mode) {
        let old_mode = self.cpsr.mode();
        if old_mode == new_mode {
            return;
        }
        self.store_bank(old_mode);
        self.load_bank(new_mode);
    }

    fn store_bank(&mut self, mode: Mode) {
        let r = |i| self.registers.register_at(i);
        if mode == Mode::Fiq {
            self.register_bank.r8_fiq = r(8);
            self.register_bank.r9_fiq = r(9);
            self.register_bank.r10_fiq = r(10);
            self.register_bank.r11_fiq = r(11);
            self.register_bank.r12_fiq = r(12);
        } else {
            self.register_bank.r8_user = r(8);
            self.register_bank.r9_user = r(9);
            self.register_bank.r10_user = r(10);
            self.register_bank.r11_user = r(11);
            self.register_bank.r12_user = r(12);
        }
        let (r13, r14) = (r(13), r(14));
        match mode {
            Mode::User | Mode::System => {
                self.register_bank.r13_user = r13;
                self.register_bank.r14_user = r14;
            }
            Mode::Fiq => {
                self.register_bank.r13_fiq = r13;
                self.register_bank.r14_fiq = r14;
            }
            Mode::Irq => {
                self.register_bank.r13_irq = r13;
                self.register_bank.r14_irq = r14;
            }
            Mode::Supervisor => {
                self.register_bank.r13_svc = r13;
                self.register_bank.r14_svc = r14;
            }
            Mode::Abort => {
                self.register_bank.r13_abt = r13;
                self.register_bank.r14_abt = r14;
            }
            Mode::Undefined => {
                self.register_bank.r13_und = r13;
                self.register_bank.r14_und = r14;
            }
        }
    }

    fn load_bank(&mut self, mode: Mode) {
        if mode == Mode::Fiq {
            self.registers.set_register_at(8, self.register_bank.r8_fiq);
            self.registers.set_register_at(9, self.register_bank.r9_fiq);
            self.registers
                .set_register_at(10, self.register_bank.r10_fiq);
            self.registers
                .set_register_at(11, self.register_bank.r11_fiq);
            self.registers
                .set_register_at(12, self.register_bank.r12_fiq);
        } else {
            self.registers.set_register_at(8, self.register_bank.r8_user);
            self.registers.set_register_at(9, self.register_bank.r9_user);
            self.registers
                .set_register_at(10, self.register_bank.r10_user);
            self.registers
                .set_register_at(11, self.register_bank.r11_user);
            self.registers
                .set_register_at(12, self.register_bank.r12_user);
        }
        let (r13, r14) = match mode {
            Mode::User | Mode::System => (self.register_bank.r13_user, self.register_bank.r14_user),
            Mode::Fiq => (self.register_bank.r13_fiq, self.register_bank.r14_fiq),
            Mode::Irq => (self.register_bank.r13_irq, self.register_bank.r14_irq),
            Mode::Supervisor => (self.register_bank.r13_svc, self.register_bank.r14_svc),
            Mode::Abort => (self.register_bank.r13_abt, self.register_bank.r14_abt),
            Mode::Undefined => (self.register_bank.r13_und, self.register_bank.r14_und),
        };
        self.registers.set_register_at(13, r13);
        self.registers.set_register_at(14, r14);
    }

    /// The active mode's SPSR. User and System have none; reading it
    /// there is unpredictable on hardware, we return CPSR.
    #[must_use]
    pub fn spsr(&self) -> Psr {
        match self.cpsr.mode() {
            Mode::Fiq => self.register_bank.spsr_fiq,
            Mode::Irq => self.register_bank.spsr_irq,
            Mode::Supervisor => self.register_bank.spsr_svc,
            Mode::Abort => self.register_bank.spsr_abt,
            Mode::Undefined => self.register_bank.spsr_und,
            Mode::User | Mode::System => self.cpsr,
        }
    }

    pub(crate) fn set_spsr(&mut self, value: Psr) {
        match self.cpsr.mode() {
            Mode::Fiq => self.register_bank.spsr_fiq = value,
            Mode::Irq => self.register_bank.spsr_irq = value,
            Mode::Supervisor => self.register_bank.spsr_svc = value,
            Mode::Abort => self.register_bank.spsr_abt = value,
            Mode::Undefined => self.register_bank.spsr_und = value,
            Mode::User | Mode::System => {}
        }
    }

    /// Replaces the whole CPSR, swapping register banks when the mode
    /// field changed (MSR, or a flag-setting instruction writing PC).
    pub(crate) fn write_cpsr(&mut self, value: Psr) {
        self.swap_mode(value.mode());
        self.cpsr = value;
    }

    /// Restores CPSR from the active SPSR (exception return).
    pub(crate) fn restore_cpsr(&mut self) {
        let spsr = self.spsr();
        self.write_cpsr(spsr);
    }

    /// User-bank view of a register, for the LDM/STM S-bit forms.
    pub(crate) fn user_register(&self, idx: usize) -> u32 {
        match (self.cpsr.mode(), idx) {
            (Mode::User | Mode::System, _) => self.registers.register_at(idx),
            (Mode::Fiq, 8) => self.register_bank.r8_user,
            (Mode::Fiq, 9) => self.register_bank.r9_user,
            (Mode::Fiq, 10) => self.register_bank.r10_user,
            (Mode::Fiq, 11) => self.register_bank.r11_user,
            (Mode::Fiq, 12) => self.register_bank.r12_user,
            (_, 13) => self.register_bank.r13_user,
            (_, 14) => self.register_bank.r14_user,
            _ => self.registers.register_at(idx),
        }
    }

    pub(crate) fn set_user_register(&mut self, idx: usize, value: u32) {
        match (self.cpsr.mode(), idx) {
            (Mode::User | Mode::System, _) => self.registers.set_register_at(idx, value),
            (Mode::Fiq, 8) => self.register_bank.r8_user = value,
            (Mode::Fiq, 9) => self.register_bank.r9_user = value,
            (Mode::Fiq, 10) => self.register_bank.r10_user = value,
            (Mode::Fiq, 11) => self.register_bank.r11_user = value,
            (Mode::Fiq, 12) => self.register_bank.r12_user = value,
            (_, 13) => self.register_bank.r13_user = value,
            (_, 14) => self.register_bank.r14_user = value,
            _ => self.registers.set_register_at(idx, value),
        }
    }

    /// Booth's algorithm terminates early on small multipliers; 1 to 4
    /// idle cycles depending on the significant byte count.
    pub(crate) fn multiplier_idle_cycles(operand: u32) -> u64 {
        match operand {
            0x0000_0000..=0x0000_00FF | 0xFFFF_FF00..=0xFFFF_FFFF => 1,
            0x0000_0100..=0x0000_FFFF | 0xFFFF_0000..=0xFFFF_FEFF => 2,
            0x0001_0000..=0x00FF_FFFF | 0xFF00_0000..=0xFFFE_FFFF => 3,
            _ => 4,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bus::BIOS_SIZE;
    use crate::cartridge::Cartridge;
    use pretty_assertions::assert_eq;

    pub(crate) fn test_cpu() -> Arm7tdmi {
        let cartridge = Cartridge::new(vec![0; 0x4000]).unwrap();
        Arm7tdmi::new(Bus::new(vec![0; BIOS_SIZE], cartridge))
    }

    /// Loads ARM opcodes at the reset vector and reloads the pipeline.
    pub(crate) fn load_arm(cpu: &mut Arm7tdmi, opcodes: &[u32]) {
        for (i, opcode) in opcodes.iter().enumerate() {
            cpu.bus.memory.bios[i * 4..i * 4 + 4].copy_from_slice(&opcode.to_le_bytes());
        }
        cpu.registers.set_program_counter(0);
        cpu.reload_pipeline();
    }

    pub(crate) fn load_thumb(cpu: &mut Arm7tdmi, opcodes: &[u16]) {
        for (i, opcode) in opcodes.iter().enumerate() {
            cpu.bus.memory.bios[i * 2..i * 2 + 2].copy_from_slice(&opcode.to_le_bytes());
        }
        cpu.cpsr.set_cpu_state(CpuState::Thumb);
        cpu.registers.set_program_counter(0);
        cpu.reload_pipeline();
    }

    #[test]
    fn reset_state() {
        let cpu = test_cpu();
        assert_eq!(cpu.cpsr.mode(), Mode::Supervisor);
        assert!(cpu.cpsr.irq_disable());
        assert_eq!(cpu.cpsr.cpu_state(), CpuState::Arm);
        // Pipeline filled: PC is two instructions ahead.
        assert_eq!(cpu.registers.program_counter(), 8);
    }

    #[test]
    fn pc_reads_two_ahead() {
        let mut cpu = test_cpu();
        // MOV R0, PC
        load_arm(&mut cpu, &[0xE1A0_000F]);
        cpu.step();
        assert_eq!(cpu.registers.register_at(0), 8);
    }

    #[test]
    fn pipeline_reload_fetches_nonsequentially() {
        let mut cpu = test_cpu();
        // B #0 (branch to pc+8, i.e. offset 0)
        load_arm(&mut cpu, &[0xEA00_0000]);
        cpu.bus.fetch_log.clear();
        cpu.step();

        let log: Vec<_> = cpu.bus.fetch_log.iter().copied().collect();
        // One pipeline fetch for the executing instruction, then the two
        // refill fetches of the branch, both non-sequential.
        assert_eq!(log.len(), 3);
        assert_eq!(log[1], (8, Access::NonSequential));
        assert_eq!(log[2], (12, Access::NonSequential));
    }

    #[test]
    fn mode_switch_banks_sp_and_lr() {
        let mut cpu = test_cpu();
        cpu.registers.set_register_at(13, 0x1111);
        cpu.registers.set_register_at(14, 0x2222);

        cpu.swap_mode(Mode::Irq);
        cpu.cpsr.set_mode(Mode::Irq);
        cpu.registers.set_register_at(13, 0x3333);

        cpu.swap_mode(Mode::Supervisor);
        cpu.cpsr.set_mode(Mode::Supervisor);
        assert_eq!(cpu.registers.register_at(13), 0x1111);
        assert_eq!(cpu.registers.register_at(14), 0x2222);

        cpu.swap_mode(Mode::Irq);
        cpu.cpsr.set_mode(Mode::Irq);
        assert_eq!(cpu.registers.register_at(13), 0x3333);
    }

    #[test]
    fn irq_entry_switches_mode_and_vector() {
        let mut cpu = test_cpu();
        // NOPs (MOV R0, R0).
        load_arm(&mut cpu, &[0xE1A0_0000; 4]);
        cpu.cpsr.set_irq_disable(false);
        cpu.step();

        cpu.bus.interrupts.master_enable = true;
        cpu.bus.interrupts.interrupt_enable = 1;
        cpu.bus.interrupts.interrupt_request = 1;
        cpu.step();

        assert_eq!(cpu.cpsr.mode(), Mode::Irq);
        assert!(cpu.cpsr.irq_disable());
        assert_eq!(cpu.registers.program_counter(), IRQ_VECTOR + 8);
        // One instruction retired before the IRQ: the unexecuted one sits
        // at 4, LR must be that + 4.
        assert_eq!(cpu.registers.register_at(REG_LR), 8);
        assert_eq!(u32::from(cpu.register_bank.spsr_irq) & 0b11111, 0b10011);
    }

    #[test]
    fn irq_masked_by_disable_bit() {
        let mut cpu = test_cpu();
        load_arm(&mut cpu, &[0xE1A0_0000; 4]);
        cpu.bus.interrupts.master_enable = true;
        cpu.bus.interrupts.interrupt_enable = 1;
        cpu.bus.interrupts.interrupt_request = 1;

        cpu.step();
        assert_eq!(cpu.cpsr.mode(), Mode::Supervisor);
    }

    #[test]
    fn halt_skips_to_next_event() {
        let mut cpu = test_cpu();
        cpu.bus.halted = true;
        let before = cpu.bus.cycles;
        cpu.step();
        assert!(cpu.bus.cycles > before);
    }

    #[test]
    fn multiplier_early_termination() {
        assert_eq!(Arm7tdmi::multiplier_idle_cycles(0x0000_0042), 1);
        assert_eq!(Arm7tdmi::multiplier_idle_cycles(0xFFFF_FFFF), 1);
        assert_eq!(Arm7tdmi::multiplier_idle_cycles(0x0000_1234), 2);
        assert_eq!(Arm7tdmi::multiplier_idle_cycles(0x0012_3456), 3);
        assert_eq!(Arm7tdmi::multiplier_idle_cycles(0x1234_5678), 4);
    }
}
