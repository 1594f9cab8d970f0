//! VM32 instruction set metadata.
//!
//! This table is shared by the simulator, the encoder and the disassembler:
//! opcode values, mnemonics, operand arity and the operand types that are
//! legal in each operand position.
//!
//! # Instruction word
//!
//! ```text
//!  31        24 23        16 15         8 7          0
//! +------------+------------+------------+------------+
//! | operand 2  | operand 1  | privilege  |   opcode   |
//! +------------+------------+------------+------------+
//! ```
//!
//! Each operand descriptor packs a register index in bits 0-4 (31 = none)
//! and an operand type tag in bits 5-7. Immediate and memory operands are
//! followed by one extra word each, operand 1's before operand 2's.

use serde::{Deserialize, Serialize};
use std::fmt;

/// VM32 opcodes, grouped by the high nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    // ==================== Arithmetic ====================
    Add = 0x00,
    Sub = 0x01,
    Mul = 0x02,
    Div = 0x03,
    Mod = 0x04,

    // ==================== Bitwise ====================
    Or = 0x10,
    Xor = 0x11,
    And = 0x12,
    Not = 0x13,
    Shl = 0x14,
    Shr = 0x15,

    // ==================== Misc ====================
    Mov = 0x20,
    Nop = 0x21,
    Halt = 0x22,
    Print = 0x23,

    // ==================== Compare ====================
    Cmp = 0x30,

    // ==================== Branches ====================
    Jmp = 0x40,
    Jz = 0x41,
    Jnz = 0x42,
    Jgt = 0x43,
    Jge = 0x44,
    Call = 0x45,
    Ret = 0x46,
    Retn = 0x47,

    // ==================== Stack ====================
    Push = 0x50,
    Pop = 0x51,
    Enter = 0x52,
    Leave = 0x53,
    GetArgument = 0x54,

    // ==================== Interrupts / VM ====================
    Int = 0x60,
    Reti = 0x61,
    VmResume = 0x62,
    Cli = 0x63,
    Sti = 0x64,
}

impl Opcode {
    /// Decode an opcode byte.
    pub fn from_u8(byte: u8) -> Option<Self> {
        INSTRUCTION_TABLE
            .iter()
            .find(|info| info.opcode as u8 == byte)
            .map(|info| info.opcode)
    }

    /// The opcode byte.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Static metadata for this opcode.
    pub fn info(self) -> &'static InstructionInfo {
        INSTRUCTION_TABLE
            .iter()
            .find(|info| info.opcode == self)
            .unwrap_or(&INSTRUCTION_TABLE[0])
    }

    /// Assembly mnemonic.
    pub fn mnemonic(self) -> &'static str {
        self.info().mnemonic
    }

    /// Number of operands the instruction takes.
    pub fn arity(self) -> usize {
        self.info().arity
    }

    /// Look up an opcode by mnemonic, case-insensitively.
    pub fn from_mnemonic(name: &str) -> Option<Self> {
        INSTRUCTION_TABLE
            .iter()
            .find(|info| info.mnemonic.eq_ignore_ascii_case(name))
            .map(|info| info.opcode)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Operand addressing modes, as encoded in bits 5-7 of an operand descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperandType {
    /// Literal value in the following word.
    Immediate = 0,
    /// General-purpose register.
    Register = 1,
    /// `ds:reg(addr)`: one dereference through the data segment.
    MemorySingleDs = 2,
    /// `es:reg(addr)`: one dereference through the extra segment.
    MemorySingleEs = 3,
    /// `ds:reg[addr]`: pointer-to-pointer through the data segment.
    MemoryDoubleDs = 4,
    /// `es:reg[addr]`: pointer-to-pointer through the extra segment.
    MemoryDoubleEs = 5,
    /// Control register.
    SpecialRegister = 6,
}

impl OperandType {
    pub const ALL: [OperandType; 7] = [
        OperandType::Immediate,
        OperandType::Register,
        OperandType::MemorySingleDs,
        OperandType::MemorySingleEs,
        OperandType::MemoryDoubleDs,
        OperandType::MemoryDoubleEs,
        OperandType::SpecialRegister,
    ];

    /// Decode a 3-bit type tag. Tag 7 is unassigned.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Whether this mode consumes an extra word after the instruction word.
    pub fn needs_extra_word(self) -> bool {
        !matches!(self, OperandType::Register | OperandType::SpecialRegister)
    }

    /// Whether this mode dereferences memory.
    pub fn is_memory(self) -> bool {
        matches!(
            self,
            OperandType::MemorySingleDs
                | OperandType::MemorySingleEs
                | OperandType::MemoryDoubleDs
                | OperandType::MemoryDoubleEs
        )
    }

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// A set of operand types, stored as a bitmask over type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandTypes(u8);

impl OperandTypes {
    pub const NONE: OperandTypes = OperandTypes(0);

    pub const IMMEDIATE: OperandTypes = OperandTypes(OperandType::Immediate.bit());

    /// Modes that can receive a result: register or memory.
    pub const DESTINATION: OperandTypes = OperandTypes(
        OperandType::Register.bit()
            | OperandType::MemorySingleDs.bit()
            | OperandType::MemorySingleEs.bit()
            | OperandType::MemoryDoubleDs.bit()
            | OperandType::MemoryDoubleEs.bit(),
    );

    /// Modes that can supply a value.
    pub const SOURCE: OperandTypes =
        OperandTypes(Self::DESTINATION.0 | OperandType::Immediate.bit());

    /// `MOV` additionally accepts control registers on either side.
    pub const MOV_DESTINATION: OperandTypes =
        OperandTypes(Self::DESTINATION.0 | OperandType::SpecialRegister.bit());
    pub const MOV_SOURCE: OperandTypes =
        OperandTypes(Self::SOURCE.0 | OperandType::SpecialRegister.bit());

    pub fn contains(self, kind: OperandType) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn iter(self) -> impl Iterator<Item = OperandType> {
        OperandType::ALL.into_iter().filter(move |t| self.contains(*t))
    }
}

/// Static metadata for one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionInfo {
    pub opcode: Opcode,
    pub mnemonic: &'static str,
    pub arity: usize,
    pub operand1: OperandTypes,
    pub operand2: OperandTypes,
}

impl InstructionInfo {
    /// Legal operand types for a zero-based operand position.
    pub fn legal_types(&self, position: usize) -> OperandTypes {
        match position {
            0 if self.arity > 0 => self.operand1,
            1 if self.arity > 1 => self.operand2,
            _ => OperandTypes::NONE,
        }
    }
}

const fn entry(
    opcode: Opcode,
    mnemonic: &'static str,
    arity: usize,
    operand1: OperandTypes,
    operand2: OperandTypes,
) -> InstructionInfo {
    InstructionInfo { opcode, mnemonic, arity, operand1, operand2 }
}

use OperandTypes as T;

/// The VM32 instruction table.
pub static INSTRUCTION_TABLE: [InstructionInfo; 34] = [
    entry(Opcode::Add, "ADD", 2, T::DESTINATION, T::SOURCE),
    entry(Opcode::Sub, "SUB", 2, T::DESTINATION, T::SOURCE),
    entry(Opcode::Mul, "MUL", 2, T::DESTINATION, T::SOURCE),
    entry(Opcode::Div, "DIV", 2, T::DESTINATION, T::SOURCE),
    entry(Opcode::Mod, "MOD", 2, T::DESTINATION, T::SOURCE),
    entry(Opcode::Or, "OR", 2, T::DESTINATION, T::SOURCE),
    entry(Opcode::Xor, "XOR", 2, T::DESTINATION, T::SOURCE),
    entry(Opcode::And, "AND", 2, T::DESTINATION, T::SOURCE),
    entry(Opcode::Not, "NOT", 2, T::DESTINATION, T::SOURCE),
    entry(Opcode::Shl, "SHL", 2, T::DESTINATION, T::SOURCE),
    entry(Opcode::Shr, "SHR", 2, T::DESTINATION, T::SOURCE),
    entry(Opcode::Mov, "MOV", 2, T::MOV_DESTINATION, T::MOV_SOURCE),
    entry(Opcode::Nop, "NOP", 0, T::NONE, T::NONE),
    entry(Opcode::Halt, "HALT", 0, T::NONE, T::NONE),
    entry(Opcode::Print, "PRINT", 1, T::SOURCE, T::NONE),
    entry(Opcode::Cmp, "CMP", 2, T::DESTINATION, T::SOURCE),
    entry(Opcode::Jmp, "JMP", 1, T::SOURCE, T::NONE),
    entry(Opcode::Jz, "JZ", 1, T::SOURCE, T::NONE),
    entry(Opcode::Jnz, "JNZ", 1, T::SOURCE, T::NONE),
    entry(Opcode::Jgt, "JGT", 1, T::SOURCE, T::NONE),
    entry(Opcode::Jge, "JGE", 1, T::SOURCE, T::NONE),
    entry(Opcode::Call, "CALL", 1, T::SOURCE, T::NONE),
    entry(Opcode::Ret, "RET", 0, T::NONE, T::NONE),
    entry(Opcode::Retn, "RETN", 1, T::SOURCE, T::NONE),
    entry(Opcode::Push, "PUSH", 1, T::SOURCE, T::NONE),
    entry(Opcode::Pop, "POP", 1, T::DESTINATION, T::NONE),
    entry(Opcode::Enter, "ENTER", 1, T::SOURCE, T::NONE),
    entry(Opcode::Leave, "LEAVE", 0, T::NONE, T::NONE),
    entry(Opcode::GetArgument, "GETARGUMENT", 2, T::DESTINATION, T::SOURCE),
    entry(Opcode::Int, "INT", 1, T::IMMEDIATE, T::NONE),
    entry(Opcode::Reti, "RETI", 0, T::NONE, T::NONE),
    entry(Opcode::VmResume, "VMRESUME", 1, T::SOURCE, T::NONE),
    entry(Opcode::Cli, "CLI", 0, T::NONE, T::NONE),
    entry(Opcode::Sti, "STI", 0, T::NONE, T::NONE),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_bytes_are_unique() {
        for (i, a) in INSTRUCTION_TABLE.iter().enumerate() {
            for b in &INSTRUCTION_TABLE[i + 1..] {
                assert_ne!(a.opcode.code(), b.opcode.code(), "{} / {}", a.mnemonic, b.mnemonic);
            }
        }
    }

    #[test]
    fn test_from_u8() {
        assert_eq!(Opcode::from_u8(0x00), Some(Opcode::Add));
        assert_eq!(Opcode::from_u8(0x47), Some(Opcode::Retn));
        assert_eq!(Opcode::from_u8(0x62), Some(Opcode::VmResume));
        assert_eq!(Opcode::from_u8(0x05), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn test_info_matches_opcode() {
        for info in &INSTRUCTION_TABLE {
            assert_eq!(info.opcode.info().mnemonic, info.mnemonic);
            assert_eq!(Opcode::from_mnemonic(info.mnemonic), Some(info.opcode));
        }
    }

    #[test]
    fn test_operand_type_sets() {
        assert!(!OperandTypes::DESTINATION.contains(OperandType::Immediate));
        assert!(!OperandTypes::DESTINATION.contains(OperandType::SpecialRegister));
        assert!(OperandTypes::SOURCE.contains(OperandType::Immediate));
        assert!(OperandTypes::MOV_DESTINATION.contains(OperandType::SpecialRegister));
        assert_eq!(OperandTypes::IMMEDIATE.iter().count(), 1);
        assert_eq!(OperandTypes::MOV_SOURCE.iter().count(), 7);
    }

    #[test]
    fn test_legal_types_respects_arity() {
        let info = Opcode::Push.info();
        assert_eq!(info.legal_types(0), OperandTypes::SOURCE);
        assert_eq!(info.legal_types(1), OperandTypes::NONE);
        assert_eq!(Opcode::Halt.info().legal_types(0), OperandTypes::NONE);
    }

    #[test]
    fn test_extra_words() {
        assert!(OperandType::Immediate.needs_extra_word());
        assert!(OperandType::MemoryDoubleEs.needs_extra_word());
        assert!(!OperandType::Register.needs_extra_word());
        assert!(!OperandType::SpecialRegister.needs_extra_word());
        assert_eq!(OperandType::from_tag(7), None);
    }
}
