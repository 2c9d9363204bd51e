//! The 32-bit instruction set.
//!
//! Decode is a cascade of mask tests ordered from most to least specific;
//! the miscellaneous encodings (BX, MRS/MSR, multiplies, SWP) overlap the
//! data-processing space and must match first. Coprocessor instructions
//! do not exist on this chip and halt the core with a diagnostic.

use crate::bitwise::{Bits, sign_extend};
use crate::bus::Access;
use crate::cpu::Mode;
use crate::cpu::alu::{self, ShiftKind};
use crate::cpu::arm7tdmi::Arm7tdmi;
use crate::cpu::psr::Psr;
use crate::cpu::registers::{REG_LR, REG_PROGRAM_COUNTER};

impl Arm7tdmi {
    pub(crate) fn execute_arm(&mut self, opcode: u32) {
        if opcode & 0x0FFF_FFF0 == 0x012F_FF10 {
            let rm = self.registers.register_at((opcode & 0xF) as usize);
            self.branch_exchange(rm);
        } else if opcode & 0x0FBF_0FFF == 0x010F_0000 {
            self.mrs(opcode);
        } else if opcode & 0x0FB0_FFF0 == 0x0120_F000 {
            let value = self.registers.register_at((opcode & 0xF) as usize);
            self.msr(opcode, value);
        } else if opcode & 0x0FB0_F000 == 0x0320_F000 {
            let rotate = opcode.get_bits(8..=11) * 2;
            let (value, _) = alu::ror(opcode & 0xFF, rotate, self.cpsr.carry_flag());
            self.msr(opcode, value);
        } else if opcode & 0x0FC0_00F0 == 0x0000_0090 {
            self.multiply(opcode);
        } else if opcode & 0x0F80_00F0 == 0x0080_0090 {
            self.multiply_long(opcode);
        } else if opcode & 0x0FB0_0FF0 == 0x0100_0090 {
            self.single_data_swap(opcode);
        } else if opcode & 0x0E00_0090 == 0x0000_0090 {
            self.halfword_transfer(opcode);
        } else if opcode & 0x0C00_0000 == 0x0000_0000 {
            self.data_processing(opcode);
        } else if opcode & 0x0C00_0000 == 0x0400_0000 {
            self.single_data_transfer(opcode);
        } else if opcode & 0x0E00_0000 == 0x0800_0000 {
            self.block_data_transfer(opcode);
        } else if opcode & 0x0E00_0000 == 0x0A00_0000 {
            self.branch(opcode);
        } else if opcode & 0x0F00_0000 == 0x0F00_0000 {
            self.enter_swi();
        } else {
            // Remaining encodings are the coprocessor space.
            panic!("unimplemented ARM opcode class: {opcode:#010X}");
        }
    }

    // ------------------------------------------------------------------
    // PSR transfers
    // ------------------------------------------------------------------

    fn mrs(&mut self, opcode: u32) {
        let rd = opcode.get_bits(12..=15) as usize;
        let value = if opcode.get_bit(22) {
            self.spsr()
        } else {
            self.cpsr
        };
        self.registers.set_register_at(rd, value.into());
    }

    fn msr(&mut self, opcode: u32, value: u32) {
        let mut mask = 0u32;
        for (field, bits) in [
            (16, 0x0000_00FFu32),
            (17, 0x0000_FF00),
            (18, 0x00FF_0000),
            (19, 0xFF00_0000),
        ] {
            if opcode.get_bit(field) {
                mask |= bits;
            }
        }

        if opcode.get_bit(22) {
            let merged = (u32::from(self.spsr()) & !mask) | (value & mask);
            self.set_spsr(Psr::from(merged));
        } else {
            // User code cannot touch the control byte.
            if self.cpsr.mode() == Mode::User {
                mask &= 0xFF00_0000;
            }
            let merged = (u32::from(self.cpsr) & !mask) | (value & mask);
            self.write_cpsr(Psr::from(merged));
        }
    }

    // ------------------------------------------------------------------
    // Multiplies
    // ------------------------------------------------------------------

    fn multiply(&mut self, opcode: u32) {
        let rd = opcode.get_bits(16..=19) as usize;
        let rn = opcode.get_bits(12..=15) as usize;
        let rs = opcode.get_bits(8..=11) as usize;
        let rm = (opcode & 0xF) as usize;
        let accumulate = opcode.get_bit(21);

        let multiplier = self.registers.register_at(rs);
        let mut result = self
            .registers
            .register_at(rm)
            .wrapping_mul(multiplier);
        let mut idle = Self::multiplier_idle_cycles(multiplier);
        if accumulate {
            result = result.wrapping_add(self.registers.register_at(rn));
            idle += 1;
        }
        self.bus.idle(idle);
        self.registers.set_register_at(rd, result);
        if opcode.get_bit(20) {
            self.cpsr.set_nz(result);
        }
    }

    fn multiply_long(&mut self, opcode: u32) {
        let rd_hi = opcode.get_bits(16..=19) as usize;
        let rd_lo = opcode.get_bits(12..=15) as usize;
        let rs = opcode.get_bits(8..=11) as usize;
        let rm = (opcode & 0xF) as usize;
        let signed = opcode.get_bit(22);
        let accumulate = opcode.get_bit(21);

        let multiplier = self.registers.register_at(rs);
        let multiplicand = self.registers.register_at(rm);
        let mut result = if signed {
            (i64::from(multiplicand as i32) * i64::from(multiplier as i32)) as u64
        } else {
            u64::from(multiplicand) * u64::from(multiplier)
        };
        let mut idle = Self::multiplier_idle_cycles(multiplier) + 1;
        if accumulate {
            let acc = (u64::from(self.registers.register_at(rd_hi)) << 32)
                | u64::from(self.registers.register_at(rd_lo));
            result = result.wrapping_add(acc);
            idle += 1;
        }
        self.bus.idle(idle);
        self.registers.set_register_at(rd_lo, result as u32);
        self.registers.set_register_at(rd_hi, (result >> 32) as u32);
        if opcode.get_bit(20) {
            self.cpsr.set_sign_flag(result.get_bit(63));
            self.cpsr.set_zero_flag(result == 0);
        }
    }

    fn single_data_swap(&mut self, opcode: u32) {
        let rn = opcode.get_bits(16..=19) as usize;
        let rd = opcode.get_bits(12..=15) as usize;
        let rm = (opcode & 0xF) as usize;
        let address = self.registers.register_at(rn);
        let source = self.registers.register_at(rm);

        let loaded = if opcode.get_bit(22) {
            let value = self.bus.read_byte(address, Access::NonSequential);
            self.bus.write_byte(address, source as u8, Access::Sequential);
            u32::from(value)
        } else {
            let value = self.read_word_rotated(address, Access::NonSequential);
            self.bus.write_word(address, source, Access::Sequential);
            value
        };
        self.bus.idle(1);
        self.registers.set_register_at(rd, loaded);
    }

    // ------------------------------------------------------------------
    // Data processing
    // ------------------------------------------------------------------

    fn data_processing(&mut self, opcode: u32) {
        let op = opcode.get_bits(21..=24);
        let set_flags = opcode.get_bit(20);
        let rn = opcode.get_bits(16..=19) as usize;
        let rd = opcode.get_bits(12..=15) as usize;
        let carry_in = self.cpsr.carry_flag();

        // With a register-specified shift amount, R15 reads one fetch
        // further ahead and the shift costs an internal cycle.
        let register_shift = !opcode.get_bit(25) && opcode.get_bit(4);
        let read_operand = |cpu: &Self, idx: usize| {
            let value = cpu.registers.register_at(idx);
            if register_shift && idx == REG_PROGRAM_COUNTER {
                value.wrapping_add(4)
            } else {
                value
            }
        };

        let (operand2, shifter_carry) = if opcode.get_bit(25) {
            let rotate = opcode.get_bits(8..=11) * 2;
            alu::ror(opcode & 0xFF, rotate, carry_in)
        } else {
            let rm = (opcode & 0xF) as usize;
            let kind = ShiftKind::from(opcode.get_bits(5..=6));
            let value = read_operand(self, rm);
            if register_shift {
                let rs = opcode.get_bits(8..=11) as usize;
                let amount = self.registers.register_at(rs) & 0xFF;
                self.bus.idle(1);
                alu::shift_by_register(kind, value, amount, carry_in)
            } else {
                alu::shift_by_immediate(kind, value, opcode.get_bits(7..=11), carry_in)
            }
        };
        let operand1 = read_operand(self, rn);

        enum Flags {
            Logical,
            Arithmetic { carry: bool, overflow: bool },
        }

        let (result, flags, writes_rd) = match op {
            0x0 => (operand1 & operand2, Flags::Logical, true), // AND
            0x1 => (operand1 ^ operand2, Flags::Logical, true), // EOR
            0x2 | 0xA => {
                let r = alu::sub(operand1, operand2); // SUB / CMP
                (
                    r.result,
                    Flags::Arithmetic {
                        carry: r.carry,
                        overflow: r.overflow,
                    },
                    op == 0x2,
                )
            }
            0x3 => {
                let r = alu::sub(operand2, operand1); // RSB
                (
                    r.result,
                    Flags::Arithmetic {
                        carry: r.carry,
                        overflow: r.overflow,
                    },
                    true,
                )
            }
            0x4 | 0xB => {
                let r = alu::add(operand1, operand2); // ADD / CMN
                (
                    r.result,
                    Flags::Arithmetic {
                        carry: r.carry,
                        overflow: r.overflow,
                    },
                    op == 0x4,
                )
            }
            0x5 => {
                let r = alu::adc(operand1, operand2, carry_in);
                (
                    r.result,
                    Flags::Arithmetic {
                        carry: r.carry,
                        overflow: r.overflow,
                    },
                    true,
                )
            }
            0x6 => {
                let r = alu::sbc(operand1, operand2, carry_in);
                (
                    r.result,
                    Flags::Arithmetic {
                        carry: r.carry,
                        overflow: r.overflow,
                    },
                    true,
                )
            }
            0x7 => {
                let r = alu::sbc(operand2, operand1, carry_in); // RSC
                (
                    r.result,
                    Flags::Arithmetic {
                        carry: r.carry,
                        overflow: r.overflow,
                    },
                    true,
                )
            }
            0x8 => (operand1 & operand2, Flags::Logical, false), // TST
            0x9 => (operand1 ^ operand2, Flags::Logical, false), // TEQ
            0xC => (operand1 | operand2, Flags::Logical, true),  // ORR
            0xD => (operand2, Flags::Logical, true),             // MOV
            0xE => (operand1 & !operand2, Flags::Logical, true), // BIC
            _ => (!operand2, Flags::Logical, true),              // MVN
        };

        if set_flags {
            if rd == REG_PROGRAM_COUNTER {
                // Exception return form: flags come from SPSR wholesale.
                self.restore_cpsr();
            } else {
                self.cpsr.set_nz(result);
                match flags {
                    Flags::Logical => self.cpsr.set_carry_flag(shifter_carry),
                    Flags::Arithmetic { carry, overflow } => {
                        self.cpsr.set_carry_flag(carry);
                        self.cpsr.set_overflow_flag(overflow);
                    }
                }
            }
        }

        if writes_rd {
            if rd == REG_PROGRAM_COUNTER {
                self.branch_to(result);
            } else {
                self.registers.set_register_at(rd, result);
            }
        }
    }

    // ------------------------------------------------------------------
    // Loads and stores
    // ------------------------------------------------------------------

    fn single_data_transfer(&mut self, opcode: u32) {
        let pre_index = opcode.get_bit(24);
        let up = opcode.get_bit(23);
        let byte = opcode.get_bit(22);
        let writeback = opcode.get_bit(21);
        let load = opcode.get_bit(20);
        let rn = opcode.get_bits(16..=19) as usize;
        let rd = opcode.get_bits(12..=15) as usize;

        let offset = if opcode.get_bit(25) {
            let rm = self.registers.register_at((opcode & 0xF) as usize);
            let kind = ShiftKind::from(opcode.get_bits(5..=6));
            alu::shift_by_immediate(kind, rm, opcode.get_bits(7..=11), self.cpsr.carry_flag()).0
        } else {
            opcode & 0xFFF
        };

        let base = self.registers.register_at(rn);
        let offset_address = if up {
            base.wrapping_add(offset)
        } else {
            base.wrapping_sub(offset)
        };
        let address = if pre_index { offset_address } else { base };

        if load {
            let value = if byte {
                u32::from(self.bus.read_byte(address, Access::NonSequential))
            } else {
                self.read_word_rotated(address, Access::NonSequential)
            };
            self.bus.idle(1);
            if (!pre_index || writeback) && rn != rd {
                self.registers.set_register_at(rn, offset_address);
            }
            if rd == REG_PROGRAM_COUNTER {
                self.branch_to(value);
            } else {
                self.registers.set_register_at(rd, value);
            }
        } else {
            // STR of R15 stores one fetch width further ahead.
            let mut value = self.registers.register_at(rd);
            if rd == REG_PROGRAM_COUNTER {
                value = value.wrapping_add(4);
            }
            if byte {
                self.bus.write_byte(address, value as u8, Access::NonSequential);
            } else {
                self.bus.write_word(address, value, Access::NonSequential);
            }
            if !pre_index || writeback {
                self.registers.set_register_at(rn, offset_address);
            }
        }
    }

    fn halfword_transfer(&mut self, opcode: u32) {
        let pre_index = opcode.get_bit(24);
        let up = opcode.get_bit(23);
        let writeback = opcode.get_bit(21);
        let load = opcode.get_bit(20);
        let rn = opcode.get_bits(16..=19) as usize;
        let rd = opcode.get_bits(12..=15) as usize;
        let signed = opcode.get_bit(6);
        let halfword = opcode.get_bit(5);

        let offset = if opcode.get_bit(22) {
            (opcode.get_bits(8..=11) << 4) | (opcode & 0xF)
        } else {
            self.registers.register_at((opcode & 0xF) as usize)
        };

        let base = self.registers.register_at(rn);
        let offset_address = if up {
            base.wrapping_add(offset)
        } else {
            base.wrapping_sub(offset)
        };
        let address = if pre_index { offset_address } else { base };

        if load {
            let value = match (signed, halfword) {
                (false, true) => {
                    // Misaligned LDRH rotates the halfword.
                    let half = self.bus.read_half_word(address, Access::NonSequential);
                    u32::from(half).rotate_right((address & 1) * 8)
                }
                (true, false) => {
                    let byte = self.bus.read_byte(address, Access::NonSequential);
                    sign_extend(u32::from(byte), 8) as u32
                }
                (true, true) => {
                    // Misaligned LDRSH degrades to a sign-extended byte.
                    if address & 1 != 0 {
                        let byte = self.bus.read_byte(address, Access::NonSequential);
                        sign_extend(u32::from(byte), 8) as u32
                    } else {
                        let half = self.bus.read_half_word(address, Access::NonSequential);
                        sign_extend(u32::from(half), 16) as u32
                    }
                }
                (false, false) => unreachable!("matched by the multiply/swap masks"),
            };
            self.bus.idle(1);
            if (!pre_index || writeback) && rn != rd {
                self.registers.set_register_at(rn, offset_address);
            }
            if rd == REG_PROGRAM_COUNTER {
                self.branch_to(value);
            } else {
                self.registers.set_register_at(rd, value);
            }
        } else {
            let mut value = self.registers.register_at(rd);
            if rd == REG_PROGRAM_COUNTER {
                value = value.wrapping_add(4);
            }
            self.bus
                .write_half_word(address, value as u16, Access::NonSequential);
            if !pre_index || writeback {
                self.registers.set_register_at(rn, offset_address);
            }
        }
    }

    fn block_data_transfer(&mut self, opcode: u32) {
        let pre_index = opcode.get_bit(24);
        let up = opcode.get_bit(23);
        let s_bit = opcode.get_bit(22);
        let writeback = opcode.get_bit(21);
        let load = opcode.get_bit(20);
        let rn = opcode.get_bits(16..=19) as usize;
        let rlist = opcode & 0xFFFF;

        // An empty list transfers R15 and moves the base a full 0x40.
        let (regs, size) = if rlist == 0 {
            (1u32 << 15, 0x40)
        } else {
            (rlist, rlist.count_ones() * 4)
        };

        let base = self.registers.register_at(rn);
        let (start, new_base) = if up {
            (base, base.wrapping_add(size))
        } else {
            (base.wrapping_sub(size), base.wrapping_sub(size))
        };
        // Normalize descending forms to an ascending walk.
        let bump_before = pre_index == up;

        let user_bank = s_bit && !(load && regs.get_bit(15));
        let restore_cpsr = s_bit && load && regs.get_bit(15);

        let mut address = start;
        let mut access = Access::NonSequential;

        if load {
            if writeback && !regs.get_bit(rn as u32) {
                self.registers.set_register_at(rn, new_base);
            }
            let mut new_pc = None;
            for idx in 0..16u32 {
                if !regs.get_bit(idx) {
                    continue;
                }
                if bump_before {
                    address = address.wrapping_add(4);
                }
                let value = self.bus.read_word(address, access);
                access = Access::Sequential;
                if !bump_before {
                    address = address.wrapping_add(4);
                }
                if idx == 15 {
                    new_pc = Some(value);
                } else if user_bank {
                    self.set_user_register(idx as usize, value);
                } else {
                    self.registers.set_register_at(idx as usize, value);
                }
            }
            self.bus.idle(1);
            if restore_cpsr {
                self.restore_cpsr();
            }
            if let Some(pc) = new_pc {
                self.branch_to(pc);
            }
        } else {
            let mut first = true;
            for idx in 0..16u32 {
                if !regs.get_bit(idx) {
                    continue;
                }
                if bump_before {
                    address = address.wrapping_add(4);
                }
                let value = if idx == 15 {
                    self.registers.program_counter().wrapping_add(4)
                } else if user_bank {
                    self.user_register(idx as usize)
                } else {
                    self.registers.register_at(idx as usize)
                };
                self.bus.write_word(address, value, access);
                access = Access::Sequential;
                if !bump_before {
                    address = address.wrapping_add(4);
                }
                // Base writeback lands after the first store, so a base
                // register first in the list stores its old value.
                if writeback && first {
                    self.registers.set_register_at(rn, new_base);
                }
                first = false;
            }
        }
    }

    fn branch(&mut self, opcode: u32) {
        let offset = sign_extend(opcode & 0x00FF_FFFF, 24) << 2;
        if opcode.get_bit(24) {
            let lr = self.registers.program_counter().wrapping_sub(4);
            self.registers.set_register_at(REG_LR, lr);
        }
        let target = self
            .registers
            .program_counter()
            .wrapping_add(offset as u32);
        self.branch_to(target);
    }
}
