//! The 16-bit instruction set.
//!
//! Nineteen fixed formats, decoded from the top bits down. Most formats
//! are narrow encodings of the 32-bit operations and reuse the same ALU
//! and bus helpers.

use crate::bitwise::{Bits, sign_extend};
use crate::bus::Access;
use crate::cpu::alu::{self, ShiftKind};
use crate::cpu::arm7tdmi::Arm7tdmi;
use crate::cpu::registers::{REG_LR, REG_PROGRAM_COUNTER, REG_SP};

impl Arm7tdmi {
    pub(crate) fn execute_thumb(&mut self, opcode: u16) {
        let opcode = u32::from(opcode);
        match opcode >> 13 {
            0b000 => {
                if opcode.get_bits(11..=12) == 0b11 {
                    self.thumb_add_subtract(opcode);
                } else {
                    self.thumb_move_shifted(opcode);
                }
            }
            0b001 => self.thumb_immediate_ops(opcode),
            0b010 => match opcode.get_bits(10..=12) {
                0b000 => self.thumb_alu_ops(opcode),
                0b001 => self.thumb_hi_register_ops(opcode),
                0b010 | 0b011 => self.thumb_pc_relative_load(opcode),
                _ => {
                    if opcode.get_bit(9) {
                        self.thumb_load_store_sign_extended(opcode);
                    } else {
                        self.thumb_load_store_register_offset(opcode);
                    }
                }
            },
            0b011 => self.thumb_load_store_immediate(opcode),
            0b100 => {
                if opcode.get_bit(12) {
                    self.thumb_sp_relative_load_store(opcode);
                } else {
                    self.thumb_load_store_halfword(opcode);
                }
            }
            0b101 => {
                if opcode.get_bit(12) {
                    if opcode.get_bits(9..=11) == 0b010 || opcode.get_bits(9..=11) == 0b110 {
                        self.thumb_push_pop(opcode);
                    } else {
                        self.thumb_adjust_stack_pointer(opcode);
                    }
                } else {
                    self.thumb_load_address(opcode);
                }
            }
            0b110 => {
                if opcode.get_bit(12) {
                    match opcode.get_bits(8..=11) {
                        0xF => self.enter_swi(),
                        // Condition 0b1110 is an undefined encoding here,
                        // not an always-taken branch.
                        0xE => panic!("unimplemented THUMB opcode: {opcode:#06X}"),
                        _ => self.thumb_conditional_branch(opcode),
                    }
                } else {
                    self.thumb_multiple_load_store(opcode);
                }
            }
            _ => match opcode.get_bits(11..=12) {
                0b00 => self.thumb_unconditional_branch(opcode),
                0b10 => self.thumb_long_branch_setup(opcode),
                0b11 => self.thumb_long_branch_complete(opcode),
                _ => panic!("unimplemented THUMB opcode: {opcode:#06X}"),
            },
        }
    }

    /// Format 1: LSL/LSR/ASR by a 5-bit immediate.
    fn thumb_move_shifted(&mut self, opcode: u32) {
        let kind = ShiftKind::from(opcode.get_bits(11..=12));
        let amount = opcode.get_bits(6..=10);
        let rs = opcode.get_bits(3..=5) as usize;
        let rd = (opcode & 0b111) as usize;

        let value = self.registers.register_at(rs);
        let (result, carry) = alu::shift_by_immediate(kind, value, amount, self.cpsr.carry_flag());
        self.registers.set_register_at(rd, result);
        self.cpsr.set_nz(result);
        self.cpsr.set_carry_flag(carry);
    }

    /// Format 2: three-operand ADD/SUB with a register or 3-bit immediate.
    fn thumb_add_subtract(&mut self, opcode: u32) {
        let subtract = opcode.get_bit(9);
        let operand = if opcode.get_bit(10) {
            opcode.get_bits(6..=8)
        } else {
            self.registers.register_at(opcode.get_bits(6..=8) as usize)
        };
        let rs = opcode.get_bits(3..=5) as usize;
        let rd = (opcode & 0b111) as usize;

        let source = self.registers.register_at(rs);
        let r = if subtract {
            alu::sub(source, operand)
        } else {
            alu::add(source, operand)
        };
        self.registers.set_register_at(rd, r.result);
        self.cpsr.set_nz(r.result);
        self.cpsr.set_carry_flag(r.carry);
        self.cpsr.set_overflow_flag(r.overflow);
    }

    /// Format 3: MOV/CMP/ADD/SUB with an 8-bit immediate.
    fn thumb_immediate_ops(&mut self, opcode: u32) {
        let rd = opcode.get_bits(8..=10) as usize;
        let immediate = opcode & 0xFF;
        let current = self.registers.register_at(rd);

        match opcode.get_bits(11..=12) {
            0b00 => {
                self.registers.set_register_at(rd, immediate);
                self.cpsr.set_nz(immediate);
            }
            0b01 => {
                let r = alu::sub(current, immediate);
                self.cpsr.set_nz(r.result);
                self.cpsr.set_carry_flag(r.carry);
                self.cpsr.set_overflow_flag(r.overflow);
            }
            0b10 => {
                let r = alu::add(current, immediate);
                self.registers.set_register_at(rd, r.result);
                self.cpsr.set_nz(r.result);
                self.cpsr.set_carry_flag(r.carry);
                self.cpsr.set_overflow_flag(r.overflow);
            }
            _ => {
                let r = alu::sub(current, immediate);
                self.registers.set_register_at(rd, r.result);
                self.cpsr.set_nz(r.result);
                self.cpsr.set_carry_flag(r.carry);
                self.cpsr.set_overflow_flag(r.overflow);
            }
        }
    }

    /// Format 4: the 16 register-to-register ALU operations.
    fn thumb_alu_ops(&mut self, opcode: u32) {
        let rs = opcode.get_bits(3..=5) as usize;
        let rd = (opcode & 0b111) as usize;
        let source = self.registers.register_at(rs);
        let current = self.registers.register_at(rd);
        let carry_in = self.cpsr.carry_flag();

        let logical = |cpu: &mut Self, result: u32, write: bool| {
            cpu.cpsr.set_nz(result);
            if write {
                cpu.registers.set_register_at(rd, result);
            }
        };
        let arithmetic = |cpu: &mut Self, r: alu::AluResult, write: bool| {
            cpu.cpsr.set_nz(r.result);
            cpu.cpsr.set_carry_flag(r.carry);
            cpu.cpsr.set_overflow_flag(r.overflow);
            if write {
                cpu.registers.set_register_at(rd, r.result);
            }
        };
        let shift = |cpu: &mut Self, kind: ShiftKind| {
            cpu.bus.idle(1);
            let (result, carry) = alu::shift_by_register(kind, current, source, carry_in);
            cpu.cpsr.set_nz(result);
            cpu.cpsr.set_carry_flag(carry);
            cpu.registers.set_register_at(rd, result);
        };

        match opcode.get_bits(6..=9) {
            0x0 => logical(self, current & source, true),
            0x1 => logical(self, current ^ source, true),
            0x2 => shift(self, ShiftKind::Lsl),
            0x3 => shift(self, ShiftKind::Lsr),
            0x4 => shift(self, ShiftKind::Asr),
            0x5 => arithmetic(self, alu::adc(current, source, carry_in), true),
            0x6 => arithmetic(self, alu::sbc(current, source, carry_in), true),
            0x7 => shift(self, ShiftKind::Ror),
            0x8 => logical(self, current & source, false), // TST
            0x9 => arithmetic(self, alu::sub(0, source), true), // NEG
            0xA => arithmetic(self, alu::sub(current, source), false), // CMP
            0xB => arithmetic(self, alu::add(current, source), false), // CMN
            0xC => logical(self, current | source, true),
            0xD => {
                self.bus.idle(Self::multiplier_idle_cycles(current));
                let result = current.wrapping_mul(source);
                logical(self, result, true);
            }
            0xE => logical(self, current & !source, true), // BIC
            _ => logical(self, !source, true),             // MVN
        }
    }

    /// Format 5: ADD/CMP/MOV on the full register file, and BX.
    ///
    /// The three ALU forms with both high-bit selectors clear do not
    /// exist in the encoding (the assembler can never emit them); what
    /// real silicon does there is unknown, so it is asserted rather than
    /// emulated.
    fn thumb_hi_register_ops(&mut self, opcode: u32) {
        let h1 = opcode.get_bit(7);
        let h2 = opcode.get_bit(6);
        let rs = (opcode.get_bits(3..=5) as usize) | (usize::from(h2) << 3);
        let rd = ((opcode & 0b111) as usize) | (usize::from(h1) << 3);
        let source = self.registers.register_at(rs);

        match opcode.get_bits(8..=9) {
            0b00 => {
                debug_assert!(h1 || h2);
                let result = self.registers.register_at(rd).wrapping_add(source);
                if rd == REG_PROGRAM_COUNTER {
                    self.branch_to(result);
                } else {
                    self.registers.set_register_at(rd, result);
                }
            }
            0b01 => {
                debug_assert!(h1 || h2);
                let r = alu::sub(self.registers.register_at(rd), source);
                self.cpsr.set_nz(r.result);
                self.cpsr.set_carry_flag(r.carry);
                self.cpsr.set_overflow_flag(r.overflow);
            }
            0b10 => {
                debug_assert!(h1 || h2);
                if rd == REG_PROGRAM_COUNTER {
                    self.branch_to(source);
                } else {
                    self.registers.set_register_at(rd, source);
                }
            }
            _ => self.branch_exchange(source),
        }
    }

    /// Format 6: LDR from a PC-relative word address.
    fn thumb_pc_relative_load(&mut self, opcode: u32) {
        let rd = opcode.get_bits(8..=10) as usize;
        let offset = (opcode & 0xFF) << 2;
        let base = self.registers.program_counter() & !2;
        let value = self.read_word_rotated(base.wrapping_add(offset), Access::NonSequential);
        self.bus.idle(1);
        self.registers.set_register_at(rd, value);
    }

    /// Format 7: word/byte load-store with register offset.
    fn thumb_load_store_register_offset(&mut self, opcode: u32) {
        let load = opcode.get_bit(11);
        let byte = opcode.get_bit(10);
        let offset = self.registers.register_at(opcode.get_bits(6..=8) as usize);
        let base = self.registers.register_at(opcode.get_bits(3..=5) as usize);
        let rd = (opcode & 0b111) as usize;
        let address = base.wrapping_add(offset);

        if load {
            let value = if byte {
                u32::from(self.bus.read_byte(address, Access::NonSequential))
            } else {
                self.read_word_rotated(address, Access::NonSequential)
            };
            self.bus.idle(1);
            self.registers.set_register_at(rd, value);
        } else {
            let value = self.registers.register_at(rd);
            if byte {
                self.bus.write_byte(address, value as u8, Access::NonSequential);
            } else {
                self.bus.write_word(address, value, Access::NonSequential);
            }
        }
    }

    /// Format 8: halfword and sign-extended load-store, register offset.
    fn thumb_load_store_sign_extended(&mut self, opcode: u32) {
        let h = opcode.get_bit(11);
        let sign = opcode.get_bit(10);
        let offset = self.registers.register_at(opcode.get_bits(6..=8) as usize);
        let base = self.registers.register_at(opcode.get_bits(3..=5) as usize);
        let rd = (opcode & 0b111) as usize;
        let address = base.wrapping_add(offset);

        match (sign, h) {
            (false, false) => {
                let value = self.registers.register_at(rd) as u16;
                self.bus.write_half_word(address, value, Access::NonSequential);
            }
            (false, true) => {
                let half = self.bus.read_half_word(address, Access::NonSequential);
                let value = u32::from(half).rotate_right((address & 1) * 8);
                self.bus.idle(1);
                self.registers.set_register_at(rd, value);
            }
            (true, false) => {
                let byte = self.bus.read_byte(address, Access::NonSequential);
                self.bus.idle(1);
                self.registers
                    .set_register_at(rd, sign_extend(u32::from(byte), 8) as u32);
            }
            (true, true) => {
                let value = if address & 1 != 0 {
                    let byte = self.bus.read_byte(address, Access::NonSequential);
                    sign_extend(u32::from(byte), 8) as u32
                } else {
                    let half = self.bus.read_half_word(address, Access::NonSequential);
                    sign_extend(u32::from(half), 16) as u32
                };
                self.bus.idle(1);
                self.registers.set_register_at(rd, value);
            }
        }
    }

    /// Format 9: word/byte load-store with 5-bit immediate offset.
    fn thumb_load_store_immediate(&mut self, opcode: u32) {
        let byte = opcode.get_bit(12);
        let load = opcode.get_bit(11);
        let rd = (opcode & 0b111) as usize;
        let base = self.registers.register_at(opcode.get_bits(3..=5) as usize);
        let offset = if byte {
            opcode.get_bits(6..=10)
        } else {
            opcode.get_bits(6..=10) << 2
        };
        let address = base.wrapping_add(offset);

        if load {
            let value = if byte {
                u32::from(self.bus.read_byte(address, Access::NonSequential))
            } else {
                self.read_word_rotated(address, Access::NonSequential)
            };
            self.bus.idle(1);
            self.registers.set_register_at(rd, value);
        } else {
            let value = self.registers.register_at(rd);
            if byte {
                self.bus.write_byte(address, value as u8, Access::NonSequential);
            } else {
                self.bus.write_word(address, value, Access::NonSequential);
            }
        }
    }

    /// Format 10: halfword load-store with immediate offset.
    fn thumb_load_store_halfword(&mut self, opcode: u32) {
        let load = opcode.get_bit(11);
        let rd = (opcode & 0b111) as usize;
        let base = self.registers.register_at(opcode.get_bits(3..=5) as usize);
        let address = base.wrapping_add(opcode.get_bits(6..=10) << 1);

        if load {
            let half = self.bus.read_half_word(address, Access::NonSequential);
            let value = u32::from(half).rotate_right((address & 1) * 8);
            self.bus.idle(1);
            self.registers.set_register_at(rd, value);
        } else {
            let value = self.registers.register_at(rd) as u16;
            self.bus.write_half_word(address, value, Access::NonSequential);
        }
    }

    /// Format 11: SP-relative word load-store.
    fn thumb_sp_relative_load_store(&mut self, opcode: u32) {
        let load = opcode.get_bit(11);
        let rd = opcode.get_bits(8..=10) as usize;
        let address = self
            .registers
            .register_at(REG_SP)
            .wrapping_add((opcode & 0xFF) << 2);

        if load {
            let value = self.read_word_rotated(address, Access::NonSequential);
            self.bus.idle(1);
            self.registers.set_register_at(rd, value);
        } else {
            let value = self.registers.register_at(rd);
            self.bus.write_word(address, value, Access::NonSequential);
        }
    }

    /// Format 12: address generation from PC or SP.
    fn thumb_load_address(&mut self, opcode: u32) {
        let rd = opcode.get_bits(8..=10) as usize;
        let offset = (opcode & 0xFF) << 2;
        let base = if opcode.get_bit(11) {
            self.registers.register_at(REG_SP)
        } else {
            self.registers.program_counter() & !2
        };
        self.registers.set_register_at(rd, base.wrapping_add(offset));
    }

    /// Format 13: ADD SP, #±imm.
    fn thumb_adjust_stack_pointer(&mut self, opcode: u32) {
        let offset = (opcode & 0x7F) << 2;
        let sp = self.registers.register_at(REG_SP);
        let new_sp = if opcode.get_bit(7) {
            sp.wrapping_sub(offset)
        } else {
            sp.wrapping_add(offset)
        };
        self.registers.set_register_at(REG_SP, new_sp);
    }

    /// Format 14: PUSH/POP, optionally with LR/PC.
    fn thumb_push_pop(&mut self, opcode: u32) {
        let load = opcode.get_bit(11);
        let with_link = opcode.get_bit(8);
        let rlist = opcode & 0xFF;

        if load {
            let mut address = self.registers.register_at(REG_SP);
            let mut access = Access::NonSequential;
            for idx in 0..8u32 {
                if !rlist.get_bit(idx) {
                    continue;
                }
                let value = self.bus.read_word(address, access);
                access = Access::Sequential;
                self.registers.set_register_at(idx as usize, value);
                address = address.wrapping_add(4);
            }
            let mut new_pc = None;
            if with_link {
                new_pc = Some(self.bus.read_word(address, access));
                address = address.wrapping_add(4);
            }
            self.registers.set_register_at(REG_SP, address);
            self.bus.idle(1);
            if let Some(pc) = new_pc {
                // Bit 0 is ignored: POP PC cannot change state here.
                self.branch_to(pc & !1);
            }
        } else {
            let count = rlist.count_ones() + u32::from(with_link);
            let mut address = self
                .registers
                .register_at(REG_SP)
                .wrapping_sub(count * 4);
            self.registers.set_register_at(REG_SP, address);
            let mut access = Access::NonSequential;
            for idx in 0..8u32 {
                if !rlist.get_bit(idx) {
                    continue;
                }
                let value = self.registers.register_at(idx as usize);
                self.bus.write_word(address, value, access);
                access = Access::Sequential;
                address = address.wrapping_add(4);
            }
            if with_link {
                let value = self.registers.register_at(REG_LR);
                self.bus.write_word(address, value, access);
            }
        }
    }

    /// Format 15: LDMIA/STMIA with writeback.
    fn thumb_multiple_load_store(&mut self, opcode: u32) {
        let load = opcode.get_bit(11);
        let rb = opcode.get_bits(8..=10) as usize;
        let rlist = opcode & 0xFF;
        let mut address = self.registers.register_at(rb);

        if rlist == 0 {
            // Degenerate empty list: R15 transfers, base moves by 0x40.
            if load {
                let value = self.bus.read_word(address, Access::NonSequential);
                self.bus.idle(1);
                self.registers.set_register_at(rb, address.wrapping_add(0x40));
                self.branch_to(value & !1);
            } else {
                let value = self.registers.program_counter().wrapping_add(2);
                self.bus.write_word(address, value, Access::NonSequential);
                self.registers.set_register_at(rb, address.wrapping_add(0x40));
            }
            return;
        }

        let mut access = Access::NonSequential;
        if load {
            let base_in_list = rlist.get_bit(rb as u32);
            for idx in 0..8u32 {
                if !rlist.get_bit(idx) {
                    continue;
                }
                let value = self.bus.read_word(address, access);
                access = Access::Sequential;
                self.registers.set_register_at(idx as usize, value);
                address = address.wrapping_add(4);
            }
            self.bus.idle(1);
            if !base_in_list {
                self.registers.set_register_at(rb, address);
            }
        } else {
            let mut first = true;
            let final_base = address.wrapping_add(rlist.count_ones() * 4);
            for idx in 0..8u32 {
                if !rlist.get_bit(idx) {
                    continue;
                }
                let value = self.registers.register_at(idx as usize);
                self.bus.write_word(address, value, access);
                access = Access::Sequential;
                address = address.wrapping_add(4);
                if first {
                    self.registers.set_register_at(rb, final_base);
                    first = false;
                }
            }
        }
    }

    /// Format 16: conditional branch with a signed 8-bit offset.
    fn thumb_conditional_branch(&mut self, opcode: u32) {
        let condition = crate::cpu::condition::Condition::from(opcode.get_bits(8..=11));
        if !self.cpsr.can_execute(condition) {
            return;
        }
        let offset = (sign_extend(opcode & 0xFF, 8) << 1) as u32;
        let target = self.registers.program_counter().wrapping_add(offset);
        self.branch_to(target);
    }

    /// Format 18: unconditional branch with a signed 11-bit offset.
    fn thumb_unconditional_branch(&mut self, opcode: u32) {
        let offset = (sign_extend(opcode & 0x7FF, 11) << 1) as u32;
        let target = self.registers.program_counter().wrapping_add(offset);
        self.branch_to(target);
    }

    /// Format 19, first half: latch the high part of the BL target in LR.
    fn thumb_long_branch_setup(&mut self, opcode: u32) {
        let offset = (sign_extend(opcode & 0x7FF, 11) << 12) as u32;
        let lr = self.registers.program_counter().wrapping_add(offset);
        self.registers.set_register_at(REG_LR, lr);
    }

    /// Format 19, second half: jump and leave the return address (with
    /// the THUMB bit set) in LR.
    fn thumb_long_branch_complete(&mut self, opcode: u32) {
        let target = self
            .registers
            .register_at(REG_LR)
            .wrapping_add((opcode & 0x7FF) << 1);
        let return_address = self.registers.program_counter().wrapping_sub(2) | 1;
        self.registers.set_register_at(REG_LR, return_address);
        self.branch_to(target);
    }
}
