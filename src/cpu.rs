use tracing::warn;

use crate::device::RunState;
use crate::memory::Memory;

#[derive(Debug)]
pub struct CPU {
    // Registers
    pub a: u8,      // Accumulator
    pub x: u8,      // X Index Register
    pub y: u8,      // Y Index Register
    pub pc: u16,    // Program Counter
    pub sp: u8,     // Stack Pointer
    pub status: u8, // Status Register

    // Internal state
    pub cycles: u64,
    pub state: RunState,
}

// Status register flags
pub const CARRY_FLAG: u8 = 0x01;
pub const ZERO_FLAG: u8 = 0x02;
pub const INTERRUPT_DISABLE: u8 = 0x04;
pub const DECIMAL_MODE: u8 = 0x08;
pub const BREAK_COMMAND: u8 = 0x10;
pub const UNUSED_FLAG: u8 = 0x20;
pub const OVERFLOW_FLAG: u8 = 0x40;
pub const NEGATIVE_FLAG: u8 = 0x80;

pub const RESET_VECTOR: u16 = 0xFFFC;
const STACK_PAGE: u16 = 0x0100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    Implicit,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Relative,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndexedIndirect,
    IndirectIndexed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Lda, Ldx, Ldy, Sta, Stx, Sty,
    Adc, Sbc, Cmp, Cpx, Cpy,
    And, Ora, Eor, Bit,
    Inc, Dec, Inx, Iny, Dex, Dey,
    Asl, Lsr, Rol, Ror,
    Tax, Tay, Txa, Tya, Tsx, Txs,
    Pha, Pla, Php, Plp,
    Jmp, Jsr, Rts, Rti, Brk,
    Clc, Sec, Cli, Sei, Cld, Sed, Clv,
    Bcc, Bcs, Beq, Bne, Bmi, Bpl, Bvc, Bvs,
    Nop,
}

/// Decode an opcode into its operation and addressing mode. Undocumented
/// opcodes decode to `None`.
pub fn decode(opcode: u8) -> Option<(Op, AddressingMode)> {
    use AddressingMode::*;
    use Op::*;

    let decoded = match opcode {
        0xA9 => (Lda, Immediate),
        0xA5 => (Lda, ZeroPage),
        0xB5 => (Lda, ZeroPageX),
        0xAD => (Lda, Absolute),
        0xBD => (Lda, AbsoluteX),
        0xB9 => (Lda, AbsoluteY),
        0xA1 => (Lda, IndexedIndirect),
        0xB1 => (Lda, IndirectIndexed),

        0xA2 => (Ldx, Immediate),
        0xA6 => (Ldx, ZeroPage),
        0xB6 => (Ldx, ZeroPageY),
        0xAE => (Ldx, Absolute),
        0xBE => (Ldx, AbsoluteY),

        0xA0 => (Ldy, Immediate),
        0xA4 => (Ldy, ZeroPage),
        0xB4 => (Ldy, ZeroPageX),
        0xAC => (Ldy, Absolute),
        0xBC => (Ldy, AbsoluteX),

        0x85 => (Sta, ZeroPage),
        0x95 => (Sta, ZeroPageX),
        0x8D => (Sta, Absolute),
        0x9D => (Sta, AbsoluteX),
        0x99 => (Sta, AbsoluteY),
        0x81 => (Sta, IndexedIndirect),
        0x91 => (Sta, IndirectIndexed),

        0x86 => (Stx, ZeroPage),
        0x96 => (Stx, ZeroPageY),
        0x8E => (Stx, Absolute),
        0x84 => (Sty, ZeroPage),
        0x94 => (Sty, ZeroPageX),
        0x8C => (Sty, Absolute),

        0x69 => (Adc, Immediate),
        0x65 => (Adc, ZeroPage),
        0x75 => (Adc, ZeroPageX),
        0x6D => (Adc, Absolute),
        0x7D => (Adc, AbsoluteX),
        0x79 => (Adc, AbsoluteY),
        0x61 => (Adc, IndexedIndirect),
        0x71 => (Adc, IndirectIndexed),

        0xE9 => (Sbc, Immediate),
        0xE5 => (Sbc, ZeroPage),
        0xF5 => (Sbc, ZeroPageX),
        0xED => (Sbc, Absolute),
        0xFD => (Sbc, AbsoluteX),
        0xF9 => (Sbc, AbsoluteY),
        0xE1 => (Sbc, IndexedIndirect),
        0xF1 => (Sbc, IndirectIndexed),

        0xC9 => (Cmp, Immediate),
        0xC5 => (Cmp, ZeroPage),
        0xD5 => (Cmp, ZeroPageX),
        0xCD => (Cmp, Absolute),
        0xDD => (Cmp, AbsoluteX),
        0xD9 => (Cmp, AbsoluteY),
        0xC1 => (Cmp, IndexedIndirect),
        0xD1 => (Cmp, IndirectIndexed),

        0xE0 => (Cpx, Immediate),
        0xE4 => (Cpx, ZeroPage),
        0xEC => (Cpx, Absolute),
        0xC0 => (Cpy, Immediate),
        0xC4 => (Cpy, ZeroPage),
        0xCC => (Cpy, Absolute),

        0x29 => (And, Immediate),
        0x25 => (And, ZeroPage),
        0x35 => (And, ZeroPageX),
        0x2D => (And, Absolute),
        0x3D => (And, AbsoluteX),
        0x39 => (And, AbsoluteY),
        0x21 => (And, IndexedIndirect),
        0x31 => (And, IndirectIndexed),

        0x09 => (Ora, Immediate),
        0x05 => (Ora, ZeroPage),
        0x15 => (Ora, ZeroPageX),
        0x0D => (Ora, Absolute),
        0x1D => (Ora, AbsoluteX),
        0x19 => (Ora, AbsoluteY),
        0x01 => (Ora, IndexedIndirect),
        0x11 => (Ora, IndirectIndexed),

        0x49 => (Eor, Immediate),
        0x45 => (Eor, ZeroPage),
        0x55 => (Eor, ZeroPageX),
        0x4D => (Eor, Absolute),
        0x5D => (Eor, AbsoluteX),
        0x59 => (Eor, AbsoluteY),
        0x41 => (Eor, IndexedIndirect),
        0x51 => (Eor, IndirectIndexed),

        0x24 => (Bit, ZeroPage),
        0x2C => (Bit, Absolute),

        0xE6 => (Inc, ZeroPage),
        0xF6 => (Inc, ZeroPageX),
        0xEE => (Inc, Absolute),
        0xFE => (Inc, AbsoluteX),
        0xC6 => (Dec, ZeroPage),
        0xD6 => (Dec, ZeroPageX),
        0xCE => (Dec, Absolute),
        0xDE => (Dec, AbsoluteX),
        0xE8 => (Inx, Implicit),
        0xC8 => (Iny, Implicit),
        0xCA => (Dex, Implicit),
        0x88 => (Dey, Implicit),

        0x0A => (Asl, Accumulator),
        0x06 => (Asl, ZeroPage),
        0x16 => (Asl, ZeroPageX),
        0x0E => (Asl, Absolute),
        0x1E => (Asl, AbsoluteX),
        0x4A => (Lsr, Accumulator),
        0x46 => (Lsr, ZeroPage),
        0x56 => (Lsr, ZeroPageX),
        0x4E => (Lsr, Absolute),
        0x5E => (Lsr, AbsoluteX),
        0x2A => (Rol, Accumulator),
        0x26 => (Rol, ZeroPage),
        0x36 => (Rol, ZeroPageX),
        0x2E => (Rol, Absolute),
        0x3E => (Rol, AbsoluteX),
        0x6A => (Ror, Accumulator),
        0x66 => (Ror, ZeroPage),
        0x76 => (Ror, ZeroPageX),
        0x6E => (Ror, Absolute),
        0x7E => (Ror, AbsoluteX),

        0xAA => (Tax, Implicit),
        0xA8 => (Tay, Implicit),
        0x8A => (Txa, Implicit),
        0x98 => (Tya, Implicit),
        0xBA => (Tsx, Implicit),
        0x9A => (Txs, Implicit),

        0x48 => (Pha, Implicit),
        0x68 => (Pla, Implicit),
        0x08 => (Php, Implicit),
        0x28 => (Plp, Implicit),

        0x4C => (Jmp, Absolute),
        0x6C => (Jmp, Indirect),
        0x20 => (Jsr, Absolute),
        0x60 => (Rts, Implicit),
        0x40 => (Rti, Implicit),
        0x00 => (Brk, Implicit),

        0x18 => (Clc, Implicit),
        0x38 => (Sec, Implicit),
        0x58 => (Cli, Implicit),
        0x78 => (Sei, Implicit),
        0xD8 => (Cld, Implicit),
        0xF8 => (Sed, Implicit),
        0xB8 => (Clv, Implicit),

        0x90 => (Bcc, Relative),
        0xB0 => (Bcs, Relative),
        0xF0 => (Beq, Relative),
        0xD0 => (Bne, Relative),
        0x30 => (Bmi, Relative),
        0x10 => (Bpl, Relative),
        0x50 => (Bvc, Relative),
        0x70 => (Bvs, Relative),

        0xEA => (Nop, Implicit),

        _ => return None,
    };
    Some(decoded)
}

impl CPU {
    pub fn new() -> Self {
        CPU {
            a: 0,
            x: 0,
            y: 0,
            pc: 0,
            sp: 0xFD,
            status: UNUSED_FLAG | INTERRUPT_DISABLE,
            cycles: 0,
            state: RunState::Running,
        }
    }

    pub fn reset(&mut self, memory: &Memory) {
        *self = CPU::new();
        self.pc = memory.read_u16(RESET_VECTOR);
    }

    /// Execute one instruction. `BRK` halts the core cleanly and an
    /// undocumented opcode crashes it; either way the PC is left just past
    /// the offending opcode and later calls do nothing.
    pub fn step(&mut self, memory: &mut Memory) -> RunState {
        if self.state != RunState::Running {
            return self.state;
        }

        let opcode = self.fetch(memory);
        match decode(opcode) {
            Some((op, mode)) => self.execute(memory, op, mode),
            None => {
                warn!(
                    "undocumented opcode ${:02X} at ${:04X}, core crashed",
                    opcode,
                    self.pc.wrapping_sub(1)
                );
                self.state = RunState::Crashed;
            }
        }

        self.cycles += 1;
        self.state
    }

    // Getters
    pub fn get_register_a(&self) -> u8 { self.a }
    pub fn get_register_x(&self) -> u8 { self.x }
    pub fn get_pc(&self) -> u16 { self.pc }
    pub fn get_sp(&self) -> u8 { self.sp }
    pub fn run_state(&self) -> RunState { self.state }

    // Flag operations
    pub fn set_flag(&mut self, flag: u8, value: bool) {
        if value {
            self.status |= flag;
        } else {
            self.status &= !flag;
        }
    }

    pub fn get_flag(&self, flag: u8) -> bool {
        (self.status & flag) != 0
    }

    fn update_zero_and_negative_flags(&mut self, value: u8) {
        self.set_flag(ZERO_FLAG, value == 0);
        self.set_flag(NEGATIVE_FLAG, (value & 0x80) != 0);
    }

    fn fetch(&mut self, memory: &Memory) -> u8 {
        let value = memory.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        value
    }

    fn fetch_u16(&mut self, memory: &Memory) -> u16 {
        let low = self.fetch(memory) as u16;
        let high = self.fetch(memory) as u16;
        (high << 8) | low
    }

    /// Resolve the effective address of the current operand, consuming its
    /// bytes from the instruction stream.
    fn operand_address(&mut self, memory: &Memory, mode: AddressingMode) -> u16 {
        match mode {
            AddressingMode::Immediate => {
                let addr = self.pc;
                self.pc = self.pc.wrapping_add(1);
                addr
            }
            AddressingMode::ZeroPage => self.fetch(memory) as u16,
            AddressingMode::ZeroPageX => self.fetch(memory).wrapping_add(self.x) as u16,
            AddressingMode::ZeroPageY => self.fetch(memory).wrapping_add(self.y) as u16,
            AddressingMode::Absolute => self.fetch_u16(memory),
            AddressingMode::AbsoluteX => self.fetch_u16(memory).wrapping_add(self.x as u16),
            AddressingMode::AbsoluteY => self.fetch_u16(memory).wrapping_add(self.y as u16),
            AddressingMode::Indirect => {
                let ptr = self.fetch_u16(memory);
                // 6502 bug: the high byte never crosses a page boundary
                let high_ptr = (ptr & 0xFF00) | (ptr.wrapping_add(1) & 0x00FF);
                let low = memory.read(ptr) as u16;
                let high = memory.read(high_ptr) as u16;
                (high << 8) | low
            }
            AddressingMode::IndexedIndirect => {
                let ptr = self.fetch(memory).wrapping_add(self.x);
                self.zero_page_pointer(memory, ptr)
            }
            AddressingMode::IndirectIndexed => {
                let ptr = self.fetch(memory);
                self.zero_page_pointer(memory, ptr).wrapping_add(self.y as u16)
            }
            AddressingMode::Relative => {
                let offset = self.fetch(memory) as i8;
                self.pc.wrapping_add(offset as i16 as u16)
            }
            AddressingMode::Implicit | AddressingMode::Accumulator => 0,
        }
    }

    fn zero_page_pointer(&self, memory: &Memory, ptr: u8) -> u16 {
        let low = memory.read(ptr as u16) as u16;
        let high = memory.read(ptr.wrapping_add(1) as u16) as u16;
        (high << 8) | low
    }

    fn operand(&mut self, memory: &Memory, mode: AddressingMode) -> u8 {
        let addr = self.operand_address(memory, mode);
        memory.read(addr)
    }

    /// Read-modify-write against the accumulator or memory.
    fn modify(&mut self, memory: &mut Memory, mode: AddressingMode, f: fn(&mut CPU, u8) -> u8) {
        if mode == AddressingMode::Accumulator {
            let value = self.a;
            self.a = f(self, value);
            return;
        }
        let addr = self.operand_address(memory, mode);
        let value = f(self, memory.read(addr));
        memory.write(addr, value);
    }

    fn execute(&mut self, memory: &mut Memory, op: Op, mode: AddressingMode) {
        match op {
            Op::Lda => {
                self.a = self.operand(memory, mode);
                self.update_zero_and_negative_flags(self.a);
            }
            Op::Ldx => {
                self.x = self.operand(memory, mode);
                self.update_zero_and_negative_flags(self.x);
            }
            Op::Ldy => {
                self.y = self.operand(memory, mode);
                self.update_zero_and_negative_flags(self.y);
            }
            Op::Sta => {
                let addr = self.operand_address(memory, mode);
                memory.write(addr, self.a);
            }
            Op::Stx => {
                let addr = self.operand_address(memory, mode);
                memory.write(addr, self.x);
            }
            Op::Sty => {
                let addr = self.operand_address(memory, mode);
                memory.write(addr, self.y);
            }

            Op::Adc => {
                let value = self.operand(memory, mode);
                self.adc(value);
            }
            Op::Sbc => {
                let value = self.operand(memory, mode);
                self.adc(!value);
            }
            Op::Cmp => {
                let value = self.operand(memory, mode);
                self.compare(self.a, value);
            }
            Op::Cpx => {
                let value = self.operand(memory, mode);
                self.compare(self.x, value);
            }
            Op::Cpy => {
                let value = self.operand(memory, mode);
                self.compare(self.y, value);
            }

            Op::And => {
                let value = self.operand(memory, mode);
                self.a &= value;
                self.update_zero_and_negative_flags(self.a);
            }
            Op::Ora => {
                let value = self.operand(memory, mode);
                self.a |= value;
                self.update_zero_and_negative_flags(self.a);
            }
            Op::Eor => {
                let value = self.operand(memory, mode);
                self.a ^= value;
                self.update_zero_and_negative_flags(self.a);
            }
            Op::Bit => {
                let value = self.operand(memory, mode);
                self.set_flag(ZERO_FLAG, self.a & value == 0);
                self.set_flag(OVERFLOW_FLAG, value & 0x40 != 0);
                self.set_flag(NEGATIVE_FLAG, value & 0x80 != 0);
            }

            Op::Inc => self.modify(memory, mode, |cpu, v| {
                let r = v.wrapping_add(1);
                cpu.update_zero_and_negative_flags(r);
                r
            }),
            Op::Dec => self.modify(memory, mode, |cpu, v| {
                let r = v.wrapping_sub(1);
                cpu.update_zero_and_negative_flags(r);
                r
            }),
            Op::Inx => {
                self.x = self.x.wrapping_add(1);
                self.update_zero_and_negative_flags(self.x);
            }
            Op::Iny => {
                self.y = self.y.wrapping_add(1);
                self.update_zero_and_negative_flags(self.y);
            }
            Op::Dex => {
                self.x = self.x.wrapping_sub(1);
                self.update_zero_and_negative_flags(self.x);
            }
            Op::Dey => {
                self.y = self.y.wrapping_sub(1);
                self.update_zero_and_negative_flags(self.y);
            }

            Op::Asl => self.modify(memory, mode, |cpu, v| {
                cpu.set_flag(CARRY_FLAG, v & 0x80 != 0);
                let r = v << 1;
                cpu.update_zero_and_negative_flags(r);
                r
            }),
            Op::Lsr => self.modify(memory, mode, |cpu, v| {
                cpu.set_flag(CARRY_FLAG, v & 0x01 != 0);
                let r = v >> 1;
                cpu.update_zero_and_negative_flags(r);
                r
            }),
            Op::Rol => self.modify(memory, mode, |cpu, v| {
                let carry_in = cpu.get_flag(CARRY_FLAG) as u8;
                cpu.set_flag(CARRY_FLAG, v & 0x80 != 0);
                let r = (v << 1) | carry_in;
                cpu.update_zero_and_negative_flags(r);
                r
            }),
            Op::Ror => self.modify(memory, mode, |cpu, v| {
                let carry_in = (cpu.get_flag(CARRY_FLAG) as u8) << 7;
                cpu.set_flag(CARRY_FLAG, v & 0x01 != 0);
                let r = (v >> 1) | carry_in;
                cpu.update_zero_and_negative_flags(r);
                r
            }),

            Op::Tax => {
                self.x = self.a;
                self.update_zero_and_negative_flags(self.x);
            }
            Op::Tay => {
                self.y = self.a;
                self.update_zero_and_negative_flags(self.y);
            }
            Op::Txa => {
                self.a = self.x;
                self.update_zero_and_negative_flags(self.a);
            }
            Op::Tya => {
                self.a = self.y;
                self.update_zero_and_negative_flags(self.a);
            }
            Op::Tsx => {
                self.x = self.sp;
                self.update_zero_and_negative_flags(self.x);
            }
            Op::Txs => self.sp = self.x, // no flags

            Op::Pha => self.push(memory, self.a),
            Op::Pla => {
                self.a = self.pop(memory);
                self.update_zero_and_negative_flags(self.a);
            }
            Op::Php => self.push(memory, self.status | BREAK_COMMAND | UNUSED_FLAG),
            Op::Plp => self.status = (self.pop(memory) & !BREAK_COMMAND) | UNUSED_FLAG,

            Op::Jmp => self.pc = self.operand_address(memory, mode),
            Op::Jsr => {
                let target = self.operand_address(memory, mode);
                self.push_u16(memory, self.pc.wrapping_sub(1));
                self.pc = target;
            }
            Op::Rts => self.pc = self.pop_u16(memory).wrapping_add(1),
            Op::Rti => {
                self.status = (self.pop(memory) & !BREAK_COMMAND) | UNUSED_FLAG;
                self.pc = self.pop_u16(memory);
            }
            Op::Brk => self.state = RunState::Done,

            Op::Clc => self.set_flag(CARRY_FLAG, false),
            Op::Sec => self.set_flag(CARRY_FLAG, true),
            Op::Cli => self.set_flag(INTERRUPT_DISABLE, false),
            Op::Sei => self.set_flag(INTERRUPT_DISABLE, true),
            Op::Cld => self.set_flag(DECIMAL_MODE, false),
            Op::Sed => self.set_flag(DECIMAL_MODE, true),
            Op::Clv => self.set_flag(OVERFLOW_FLAG, false),

            Op::Bcc => self.branch_if(memory, !self.get_flag(CARRY_FLAG)),
            Op::Bcs => self.branch_if(memory, self.get_flag(CARRY_FLAG)),
            Op::Beq => self.branch_if(memory, self.get_flag(ZERO_FLAG)),
            Op::Bne => self.branch_if(memory, !self.get_flag(ZERO_FLAG)),
            Op::Bmi => self.branch_if(memory, self.get_flag(NEGATIVE_FLAG)),
            Op::Bpl => self.branch_if(memory, !self.get_flag(NEGATIVE_FLAG)),
            Op::Bvc => self.branch_if(memory, !self.get_flag(OVERFLOW_FLAG)),
            Op::Bvs => self.branch_if(memory, self.get_flag(OVERFLOW_FLAG)),

            Op::Nop => {}
        }
    }

    // Binary mode only; SBC is ADC of the one's complement.
    fn adc(&mut self, value: u8) {
        let carry = self.get_flag(CARRY_FLAG) as u16;
        let result = self.a as u16 + value as u16 + carry;

        let overflow = (self.a ^ result as u8) & (value ^ result as u8) & 0x80 != 0;

        self.set_flag(CARRY_FLAG, result > 0xFF);
        self.set_flag(OVERFLOW_FLAG, overflow);

        self.a = result as u8;
        self.update_zero_and_negative_flags(self.a);
    }

    fn compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.set_flag(CARRY_FLAG, register >= value);
        self.update_zero_and_negative_flags(result);
    }

    fn branch_if(&mut self, memory: &Memory, condition: bool) {
        let target = self.operand_address(memory, AddressingMode::Relative);
        if condition {
            self.pc = target;
        }
    }

    // Stack operations
    pub fn push(&mut self, memory: &mut Memory, value: u8) {
        memory.write(STACK_PAGE + self.sp as u16, value);
        self.sp = self.sp.wrapping_sub(1);
    }

    pub fn pop(&mut self, memory: &Memory) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        memory.read(STACK_PAGE + self.sp as u16)
    }

    fn push_u16(&mut self, memory: &mut Memory, value: u16) {
        self.push(memory, (value >> 8) as u8);
        self.push(memory, (value & 0xFF) as u8);
    }

    fn pop_u16(&mut self, memory: &Memory) -> u16 {
        let low = self.pop(memory) as u16;
        let high = self.pop(memory) as u16;
        (high << 8) | low
    }
}

impl Default for CPU {
    fn default() -> Self {
        CPU::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceModel;

    /// Memory with `program` at the start of flash and the reset vector
    /// pointing at it.
    fn boot(program: &[u8]) -> (CPU, Memory) {
        let mut memory = Memory::new(&DeviceModel::Mcu65x8.specs());
        memory.load_flash(0, program);
        memory.write_u16(RESET_VECTOR, 0x8000);
        let mut cpu = CPU::new();
        cpu.reset(&memory);
        (cpu, memory)
    }

    fn run(cpu: &mut CPU, memory: &mut Memory, steps: usize) {
        for _ in 0..steps {
            cpu.step(memory);
        }
    }

    #[test]
    fn test_lda_immediate() {
        let (mut cpu, mut memory) = boot(&[0xA9, 0x42]); // LDA #$42
        cpu.step(&mut memory);

        assert_eq!(cpu.get_register_a(), 0x42);
        assert_eq!(cpu.get_pc(), 0x8002);
        assert!(!cpu.get_flag(ZERO_FLAG));
        assert!(!cpu.get_flag(NEGATIVE_FLAG));
    }

    #[test]
    fn test_adc_carry_and_overflow() {
        // LDA #$FF, ADC #$01 -> 0 with carry
        let (mut cpu, mut memory) = boot(&[0xA9, 0xFF, 0x69, 0x01]);
        run(&mut cpu, &mut memory, 2);
        assert_eq!(cpu.get_register_a(), 0x00);
        assert!(cpu.get_flag(CARRY_FLAG));
        assert!(cpu.get_flag(ZERO_FLAG));

        // LDA #$50, ADC #$50 -> signed overflow
        let (mut cpu, mut memory) = boot(&[0xA9, 0x50, 0x69, 0x50]);
        run(&mut cpu, &mut memory, 2);
        assert_eq!(cpu.get_register_a(), 0xA0);
        assert!(cpu.get_flag(OVERFLOW_FLAG));
        assert!(cpu.get_flag(NEGATIVE_FLAG));
    }

    #[test]
    fn test_sbc_borrow() {
        // SEC, LDA #$10, SBC #$20
        let (mut cpu, mut memory) = boot(&[0x38, 0xA9, 0x10, 0xE9, 0x20]);
        run(&mut cpu, &mut memory, 3);
        assert_eq!(cpu.get_register_a(), 0xF0);
        assert!(!cpu.get_flag(CARRY_FLAG));
        assert!(cpu.get_flag(NEGATIVE_FLAG));
    }

    #[test]
    fn test_cmp_sets_carry_and_zero() {
        // LDA #$30, CMP #$30, CPX #$01
        let (mut cpu, mut memory) = boot(&[0xA9, 0x30, 0xC9, 0x30, 0xE0, 0x01]);
        run(&mut cpu, &mut memory, 2);
        assert!(cpu.get_flag(CARRY_FLAG));
        assert!(cpu.get_flag(ZERO_FLAG));

        cpu.step(&mut memory);
        assert!(!cpu.get_flag(CARRY_FLAG));
        assert!(cpu.get_flag(NEGATIVE_FLAG));
    }

    #[test]
    fn test_indexed_store_into_sram() {
        // LDX #$02, LDA #$7E, STA $0200,X
        let (mut cpu, mut memory) = boot(&[0xA2, 0x02, 0xA9, 0x7E, 0x9D, 0x00, 0x02]);
        run(&mut cpu, &mut memory, 3);
        assert_eq!(memory.sram()[0x202], 0x7E);
    }

    #[test]
    fn test_indirect_indexed_addressing() {
        // pointer at $10 -> $0300; LDY #$04, LDA #$99, STA ($10),Y
        let (mut cpu, mut memory) = boot(&[0xA0, 0x04, 0xA9, 0x99, 0x91, 0x10]);
        memory.write_u16(0x0010, 0x0300);
        run(&mut cpu, &mut memory, 3);
        assert_eq!(memory.read(0x0304), 0x99);
    }

    #[test]
    fn test_jsr_rts() {
        // JSR $8010 ; LDX #$01 ; ... $8010: LDA #$55, RTS
        let mut program = vec![0xEA; 0x20];
        program[..5].copy_from_slice(&[0x20, 0x10, 0x80, 0xA2, 0x01]);
        program[0x10..0x13].copy_from_slice(&[0xA9, 0x55, 0x60]);
        let (mut cpu, mut memory) = boot(&program);

        cpu.step(&mut memory);
        assert_eq!(cpu.get_pc(), 0x8010);
        assert_eq!(cpu.get_sp(), 0xFB);
        run(&mut cpu, &mut memory, 3);
        assert_eq!(cpu.get_register_a(), 0x55);
        assert_eq!(cpu.get_register_x(), 0x01);
        assert_eq!(cpu.get_sp(), 0xFD);
    }

    #[test]
    fn test_jmp_indirect_page_boundary_bug() {
        let (mut cpu, mut memory) = boot(&[0x6C, 0xFF, 0x02]); // JMP ($02FF)
        memory.write(0x02FF, 0x34);
        memory.write(0x0200, 0x12);
        memory.write(0x0300, 0x99);
        cpu.step(&mut memory);
        assert_eq!(cpu.get_pc(), 0x1234);
    }

    #[test]
    fn test_branch_backwards() {
        // LDX #$03 ; loop: DEX ; BNE loop
        let (mut cpu, mut memory) = boot(&[0xA2, 0x03, 0xCA, 0xD0, 0xFD, 0x00]);
        let mut steps = 0;
        while cpu.step(&mut memory) == RunState::Running {
            steps += 1;
        }
        assert_eq!(cpu.get_register_x(), 0);
        assert_eq!(steps, 7);
        assert_eq!(cpu.run_state(), RunState::Done);
    }

    #[test]
    fn test_shift_and_rotate() {
        // LDA #$81, ASL A, ROL A
        let (mut cpu, mut memory) = boot(&[0xA9, 0x81, 0x0A, 0x2A]);
        run(&mut cpu, &mut memory, 2);
        assert_eq!(cpu.get_register_a(), 0x02);
        assert!(cpu.get_flag(CARRY_FLAG));
        cpu.step(&mut memory);
        assert_eq!(cpu.get_register_a(), 0x05);
        assert!(!cpu.get_flag(CARRY_FLAG));
    }

    #[test]
    fn test_stack_push_pull() {
        // LDA #$42, PHA, LDA #$00, PLA
        let (mut cpu, mut memory) = boot(&[0xA9, 0x42, 0x48, 0xA9, 0x00, 0x68]);
        run(&mut cpu, &mut memory, 2);
        assert_eq!(memory.read(0x01FD), 0x42);
        run(&mut cpu, &mut memory, 2);
        assert_eq!(cpu.get_register_a(), 0x42);
        assert_eq!(cpu.get_sp(), 0xFD);
    }

    #[test]
    fn test_uart_write_from_firmware() {
        // LDA #'A', STA $7F00
        let (mut cpu, mut memory) = boot(&[0xA9, b'A', 0x8D, 0x00, 0x7F]);
        run(&mut cpu, &mut memory, 2);
        assert_eq!(memory.take_serial(), vec![b'A']);
    }

    #[test]
    fn test_brk_is_done() {
        let (mut cpu, mut memory) = boot(&[0x00, 0xEA]); // BRK, NOP
        assert_eq!(cpu.run_state(), RunState::Running);

        assert_eq!(cpu.step(&mut memory), RunState::Done);
        assert_eq!(cpu.get_pc(), 0x8001);

        // Subsequent steps do nothing
        assert_eq!(cpu.step(&mut memory), RunState::Done);
        assert_eq!(cpu.get_pc(), 0x8001);
        assert_eq!(cpu.cycles, 1);
    }

    #[test]
    fn test_undocumented_opcode_crashes() {
        let (mut cpu, mut memory) = boot(&[0xEA, 0x02]); // NOP, JAM
        assert_eq!(cpu.step(&mut memory), RunState::Running);
        assert_eq!(cpu.step(&mut memory), RunState::Crashed);
        assert_eq!(cpu.get_pc(), 0x8002);
        assert_eq!(cpu.step(&mut memory), RunState::Crashed);
    }

    #[test]
    fn test_decode_covers_documented_set() {
        assert_eq!(decode(0xA9), Some((Op::Lda, AddressingMode::Immediate)));
        assert_eq!(decode(0x6C), Some((Op::Jmp, AddressingMode::Indirect)));
        assert_eq!(decode(0xFF), None);
        let documented = (0..=255u8).filter(|&op| decode(op).is_some()).count();
        assert_eq!(documented, 151);
    }
}
