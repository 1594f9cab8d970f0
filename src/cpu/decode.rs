//! Instruction word decoder for VM32.
//!
//! An instruction word is `{opcode, requiredPrivilege, operand1, operand2}`
//! in little-endian byte order. Decoding validates the opcode and every
//! operand descriptor against the instruction table, so the executor only
//! ever sees operand combinations that are legal for the opcode.

use crate::cpu::registers::{SpecialRegister, NO_REGISTER};
use crate::isa::{Opcode, OperandType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One operand descriptor byte: register index in bits 0-4, type in bits 5-7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperandDescriptor {
    pub register: u8,
    pub kind: OperandType,
}

impl OperandDescriptor {
    pub fn new(kind: OperandType, register: u8) -> Self {
        Self { register, kind }
    }

    /// Split a descriptor byte. Returns `None` for the unassigned tag 7.
    pub fn from_byte(byte: u8) -> Option<Self> {
        let kind = OperandType::from_tag(byte >> 5)?;
        Some(Self {
            register: byte & 0x1F,
            kind,
        })
    }

    pub fn to_byte(self) -> u8 {
        (self.kind.tag() << 5) | (self.register & 0x1F)
    }

    /// Base register for memory modes, `None` for the reserved index 31.
    pub fn base_register(self) -> Option<u8> {
        (self.register != NO_REGISTER).then_some(self.register)
    }
}

/// A decoded instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub required_privilege: u8,
    /// Operand descriptors, present up to the opcode's arity.
    pub operands: [Option<OperandDescriptor>; 2],
}

impl Instruction {
    /// Number of extra words following the instruction word.
    pub fn extra_words(&self) -> usize {
        self.operands
            .iter()
            .flatten()
            .filter(|op| op.kind.needs_extra_word())
            .count()
    }

    /// Total length in words.
    pub fn len(&self) -> usize {
        1 + self.extra_words()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Decode a 32-bit instruction word.
pub fn decode(word: u32) -> Result<Instruction, DecodeError> {
    let [op, privilege, first, second] = word.to_le_bytes();

    let opcode = Opcode::from_u8(op).ok_or(DecodeError::InvalidOpcode(op))?;
    let info = opcode.info();

    let mut operands = [None, None];
    for (position, byte) in [first, second].into_iter().enumerate().take(info.arity) {
        let descriptor = OperandDescriptor::from_byte(byte).ok_or(DecodeError::InvalidOperandType {
            position: position + 1,
            tag: byte >> 5,
        })?;

        if !info.legal_types(position).contains(descriptor.kind) {
            return Err(DecodeError::IllegalOperand {
                opcode,
                position: position + 1,
                kind: descriptor.kind,
            });
        }

        match descriptor.kind {
            OperandType::Register if descriptor.register == NO_REGISTER => {
                return Err(DecodeError::ReservedRegister {
                    position: position + 1,
                });
            }
            OperandType::SpecialRegister
                if SpecialRegister::from_index(descriptor.register).is_none() =>
            {
                return Err(DecodeError::UnknownSpecialRegister(descriptor.register));
            }
            _ => {}
        }

        operands[position] = Some(descriptor);
    }

    Ok(Instruction {
        opcode,
        required_privilege: privilege,
        operands,
    })
}

/// Encode an instruction back to its instruction word.
///
/// Unused operand slots are written as zero.
pub fn encode(instr: &Instruction) -> u32 {
    let byte = |slot: Option<OperandDescriptor>| slot.map_or(0, OperandDescriptor::to_byte);
    u32::from_le_bytes([
        instr.opcode.code(),
        instr.required_privilege,
        byte(instr.operands[0]),
        byte(instr.operands[1]),
    ])
}

/// Errors that can occur during instruction decoding.
///
/// All of them are delivered to the guest as `INTR_INVALID_INSTR`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid opcode: {0:#04x}")]
    InvalidOpcode(u8),

    #[error("operand {position}: unassigned type tag {tag}")]
    InvalidOperandType { position: usize, tag: u8 },

    #[error("operand {position}: {kind:?} is not allowed for {opcode}")]
    IllegalOperand {
        opcode: Opcode,
        position: usize,
        kind: OperandType,
    },

    #[error("operand {position}: register 31 is reserved")]
    ReservedRegister { position: usize },

    #[error("unknown special register {0}")]
    UnknownSpecialRegister(u8),
}
