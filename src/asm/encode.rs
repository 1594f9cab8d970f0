//! Programmatic instruction encoder.
//!
//! Builds instruction words from typed operands and checks them against the
//! instruction table, the same way the decoder does. There is no text
//! syntax here; tests and the built-in self-test drive it directly:
//!
//! ```
//! use vm32::asm::encode::{imm, reg, Program};
//! use vm32::isa::Opcode;
//!
//! let mut p = Program::new();
//! p.emit(Opcode::Mov, &[reg(0), imm(5)]).unwrap();
//! p.emit(Opcode::Halt, &[]).unwrap();
//! assert_eq!(p.len(), 3);
//! ```

use crate::cpu::decode::{encode, Instruction, OperandDescriptor};
use crate::cpu::registers::{SpecialRegister, NO_REGISTER, REGISTER_COUNT};
use crate::isa::{Opcode, OperandType};
use thiserror::Error;

/// Segment a memory operand goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSegment {
    Ds,
    Es,
}

/// One source-level operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Immediate(u32),
    Register(u8),
    /// `seg:base(address)`, or `seg:base[address]` when `indirect`.
    Memory {
        segment: DataSegment,
        base: Option<u8>,
        address: u32,
        indirect: bool,
    },
    Special(SpecialRegister),
}

impl Operand {
    fn kind(&self) -> OperandType {
        match *self {
            Operand::Immediate(_) => OperandType::Immediate,
            Operand::Register(_) => OperandType::Register,
            Operand::Memory {
                segment, indirect, ..
            } => match (segment, indirect) {
                (DataSegment::Ds, false) => OperandType::MemorySingleDs,
                (DataSegment::Es, false) => OperandType::MemorySingleEs,
                (DataSegment::Ds, true) => OperandType::MemoryDoubleDs,
                (DataSegment::Es, true) => OperandType::MemoryDoubleEs,
            },
            Operand::Special(_) => OperandType::SpecialRegister,
        }
    }

    /// Register field of the descriptor byte.
    fn register_field(&self) -> Result<u8, EncodeError> {
        match *self {
            Operand::Register(r) | Operand::Memory { base: Some(r), .. } => {
                if r >= REGISTER_COUNT {
                    Err(EncodeError::RegisterOutOfRange(r))
                } else {
                    Ok(r)
                }
            }
            Operand::Memory { base: None, .. } => Ok(NO_REGISTER),
            Operand::Special(reg) => Ok(reg.index()),
            Operand::Immediate(_) => Ok(0),
        }
    }

    fn extra_word(&self) -> Option<u32> {
        match *self {
            Operand::Immediate(value) => Some(value),
            Operand::Memory { address, .. } => Some(address),
            Operand::Register(_) | Operand::Special(_) => None,
        }
    }
}

pub fn imm(value: u32) -> Operand {
    Operand::Immediate(value)
}

pub fn reg(index: u8) -> Operand {
    Operand::Register(index)
}

pub fn special(reg: SpecialRegister) -> Operand {
    Operand::Special(reg)
}

fn memory(segment: DataSegment, base: Option<u8>, address: u32, indirect: bool) -> Operand {
    Operand::Memory {
        segment,
        base,
        address,
        indirect,
    }
}

/// `ds:(address)`
pub fn ds(address: u32) -> Operand {
    memory(DataSegment::Ds, None, address, false)
}

/// `es:(address)`
pub fn es(address: u32) -> Operand {
    memory(DataSegment::Es, None, address, false)
}

/// `ds:rN(address)`
pub fn ds_indexed(base: u8, address: u32) -> Operand {
    memory(DataSegment::Ds, Some(base), address, false)
}

/// `es:rN(address)`
pub fn es_indexed(base: u8, address: u32) -> Operand {
    memory(DataSegment::Es, Some(base), address, false)
}

/// `ds:[address]`
pub fn ds_indirect(address: u32) -> Operand {
    memory(DataSegment::Ds, None, address, true)
}

/// `es:[address]`
pub fn es_indirect(address: u32) -> Operand {
    memory(DataSegment::Es, None, address, true)
}

/// Encode one instruction with privilege requirement 0.
pub fn encode_instruction(opcode: Opcode, operands: &[Operand]) -> Result<Vec<u32>, EncodeError> {
    encode_with_privilege(opcode, 0, operands)
}

/// Encode one instruction: the instruction word followed by its extra words.
pub fn encode_with_privilege(
    opcode: Opcode,
    privilege: u8,
    operands: &[Operand],
) -> Result<Vec<u32>, EncodeError> {
    let info = opcode.info();
    if operands.len() != info.arity {
        return Err(EncodeError::ArityMismatch {
            opcode,
            expected: info.arity,
            found: operands.len(),
        });
    }

    let mut descriptors = [None, None];
    for (position, operand) in operands.iter().enumerate() {
        let kind = operand.kind();
        if !info.legal_types(position).contains(kind) {
            return Err(EncodeError::IllegalOperand {
                opcode,
                position: position + 1,
                kind,
            });
        }
        descriptors[position] = Some(OperandDescriptor::new(kind, operand.register_field()?));
    }

    let instr = Instruction {
        opcode,
        required_privilege: privilege,
        operands: descriptors,
    };
    let mut words = vec![encode(&instr)];
    words.extend(operands.iter().filter_map(Operand::extra_word));
    Ok(words)
}

/// A program image under construction, starting at address 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    words: Vec<u32>,
}

impl Program {
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Address the next word will be placed at.
    pub fn here(&self) -> u32 {
        self.words.len() as u32
    }

    /// Append an instruction, returning its address.
    pub fn emit(&mut self, opcode: Opcode, operands: &[Operand]) -> Result<u32, EncodeError> {
        self.emit_with_privilege(opcode, 0, operands)
    }

    pub fn emit_with_privilege(
        &mut self,
        opcode: Opcode,
        privilege: u8,
        operands: &[Operand],
    ) -> Result<u32, EncodeError> {
        let addr = self.here();
        self.words
            .extend(encode_with_privilege(opcode, privilege, operands)?);
        Ok(addr)
    }

    /// Append raw data words, returning the address of the first.
    pub fn data(&mut self, words: &[u32]) -> u32 {
        let addr = self.here();
        self.words.extend_from_slice(words);
        addr
    }

    /// Pad with `NOP`s up to `addr`. Does nothing if already past it.
    pub fn pad_to(&mut self, addr: u32) {
        let nop = encode(&Instruction {
            opcode: Opcode::Nop,
            required_privilege: 0,
            operands: [None, None],
        });
        while self.here() < addr {
            self.words.push(nop);
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn into_words(self) -> Vec<u32> {
        self.words
    }
}

/// Errors that can occur during encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("{opcode} takes {expected} operand(s), got {found}")]
    ArityMismatch {
        opcode: Opcode,
        expected: usize,
        found: usize,
    },

    #[error("operand {position}: {kind:?} is not allowed for {opcode}")]
    IllegalOperand {
        opcode: Opcode,
        position: usize,
        kind: OperandType,
    },

    #[error("register r{0} does not exist")]
    RegisterOutOfRange(u8),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::decode;

    #[test]
    fn test_encode_mov_immediate() {
        let words = encode_instruction(Opcode::Mov, &[reg(3), imm(0xDEAD)]).unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(words[1], 0xDEAD);
        let instr = decode(words[0]).unwrap();
        assert_eq!(instr.opcode, Opcode::Mov);
        assert_eq!(instr.operands[0].map(|d| d.register), Some(3));
    }

    #[test]
    fn test_extra_words_in_operand_order() {
        let words = encode_instruction(Opcode::Add, &[ds_indexed(2, 0x100), imm(7)]).unwrap();
        assert_eq!(&words[1..], &[0x100, 7]);
        let instr = decode(words[0]).unwrap();
        assert_eq!(instr.operands[0].and_then(|d| d.base_register()), Some(2));
    }

    #[test]
    fn test_memory_without_base_uses_reserved_register() {
        let words = encode_instruction(Opcode::Push, &[es_indirect(0x40)]).unwrap();
        let d = decode(words[0]).unwrap().operands[0].unwrap();
        assert_eq!(d.kind, OperandType::MemoryDoubleEs);
        assert_eq!(d.register, NO_REGISTER);
    }

    #[test]
    fn test_rejects_bad_operands() {
        assert_eq!(
            encode_instruction(Opcode::Halt, &[imm(1)]),
            Err(EncodeError::ArityMismatch {
                opcode: Opcode::Halt,
                expected: 0,
                found: 1
            })
        );
        assert!(matches!(
            encode_instruction(Opcode::Add, &[imm(1), imm(2)]),
            Err(EncodeError::IllegalOperand { position: 1, .. })
        ));
        assert_eq!(
            encode_instruction(Opcode::Push, &[reg(31)]),
            Err(EncodeError::RegisterOutOfRange(31))
        );
    }

    #[test]
    fn test_privilege_byte() {
        let words = encode_with_privilege(Opcode::Cli, 2, &[]).unwrap();
        assert_eq!(decode(words[0]).unwrap().required_privilege, 2);
    }

    #[test]
    fn test_program_layout() {
        let mut p = Program::new();
        assert_eq!(p.emit(Opcode::Jmp, &[imm(0x10)]).unwrap(), 0);
        p.pad_to(0x10);
        assert_eq!(p.emit(Opcode::Halt, &[]).unwrap(), 0x10);
        assert_eq!(p.data(&[1, 2]), 0x11);
        assert_eq!(p.len(), 0x13);
        assert_eq!(decode(p.words()[5]).unwrap().opcode, Opcode::Nop);
    }
}
