//! Disassembler for VM32 memory images.
//!
//! Converts instruction words back to readable assembly. Undecodable words
//! are shown as `INV: 0x...` so that data mixed into code stays visible.

use crate::cpu::decode::{decode, Instruction, OperandDescriptor};
use crate::cpu::registers::SpecialRegister;
use crate::isa::OperandType;

/// Width of the raw-words column, enough for three words.
const RAW_COLUMN: usize = 3 * 9;

/// Disassemble the instruction at the start of `words`.
///
/// Returns the text and the number of words consumed (at least 1 for a
/// non-empty slice). Extra words cut off by the end of the slice print
/// as `?`.
pub fn disassemble_instruction(words: &[u32]) -> (String, usize) {
    let Some(&word) = words.first() else {
        return (String::new(), 0);
    };
    match decode(word) {
        Ok(instr) => {
            let len = instr.len().min(words.len());
            (format_instruction(&instr, &words[1..len]), len)
        }
        Err(_) => (format!("INV: {:#x}", word), 1),
    }
}

/// Disassemble a whole image, one line per instruction.
///
/// `base` is the address of `words[0]`.
pub fn disassemble(words: &[u32], base: u32) -> String {
    let mut output = String::new();
    output.push_str("; VM32 Disassembly\n");
    output.push_str("; -----------------\n\n");

    let mut offset = 0;
    while offset < words.len() {
        let (text, len) = disassemble_instruction(&words[offset..]);
        let raw = &words[offset..offset + len];
        let hex: Vec<String> = raw.iter().map(|w| format!("{:08x}", w)).collect();
        let addr = base.wrapping_add(offset as u32);
        output.push_str(&format!("{:#010x}:\t{:<width$}\t{}", addr, hex.join(" "), text, width = RAW_COLUMN));
        if text.starts_with("INV") {
            output.push_str(&format!("\t|{}|", ascii(raw)));
        }
        output.push('\n');
        offset += len;
    }

    output
}

/// Printable bytes of `words`, little-endian, `.` for the rest.
fn ascii(words: &[u32]) -> String {
    words
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .map(|b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}

/// Format a decoded instruction as assembly text.
fn format_instruction(instr: &Instruction, extra: &[u32]) -> String {
    let mut extra = extra.iter().copied();
    let operands: Vec<String> = instr
        .operands
        .iter()
        .flatten()
        .map(|desc| {
            let word = if desc.kind.needs_extra_word() { extra.next() } else { None };
            format_operand(desc, word)
        })
        .collect();

    let mut text = instr.opcode.mnemonic().to_string();
    if !operands.is_empty() {
        text.push(' ');
        text.push_str(&operands.join(", "));
    }
    if instr.required_privilege != 0 {
        text.push_str(&format!("  ; pl {}", instr.required_privilege));
    }
    text
}

fn format_operand(desc: &OperandDescriptor, word: Option<u32>) -> String {
    let literal = word.map_or_else(|| "?".to_string(), |w| format!("{:#x}", w));
    let base = desc
        .base_register()
        .map(|r| format!("r{}", r))
        .unwrap_or_default();
    match desc.kind {
        OperandType::Immediate => literal,
        OperandType::Register => format!("r{}", desc.register),
        OperandType::MemorySingleDs => format!("ds:{}({})", base, literal),
        OperandType::MemorySingleEs => format!("es:{}({})", base, literal),
        OperandType::MemoryDoubleDs => format!("ds:{}[{}]", base, literal),
        OperandType::MemoryDoubleEs => format!("es:{}[{}]", base, literal),
        OperandType::SpecialRegister => SpecialRegister::from_index(desc.register)
            .map_or_else(|| format!("sr{}", desc.register), |r| r.name().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::encode::{ds_indexed, encode_instruction, encode_with_privilege, es_indirect, imm, reg, special};
    use crate::isa::Opcode;

    #[test]
    fn test_disassemble_halt() {
        let words = encode_instruction(Opcode::Halt, &[]).unwrap();
        assert_eq!(disassemble_instruction(&words), ("HALT".to_string(), 1));
    }

    #[test]
    fn test_disassemble_operands() {
        let words = encode_instruction(Opcode::Mov, &[ds_indexed(1, 0x10), imm(0x2A)]).unwrap();
        assert_eq!(disassemble_instruction(&words), ("MOV ds:r1(0x10), 0x2a".to_string(), 3));

        let words = encode_instruction(Opcode::Add, &[reg(4), es_indirect(0x200)]).unwrap();
        assert_eq!(disassemble_instruction(&words).0, "ADD r4, es:[0x200]");

        let words = encode_instruction(Opcode::Mov, &[special(SpecialRegister::VmTbl), reg(0)]).unwrap();
        assert_eq!(disassemble_instruction(&words).0, "MOV VMTBL, r0");
    }

    #[test]
    fn test_disassemble_privilege_and_truncation() {
        let words = encode_with_privilege(Opcode::Jmp, 2, &[imm(0x40)]).unwrap();
        assert_eq!(disassemble_instruction(&words).0, "JMP 0x40  ; pl 2");
        assert_eq!(disassemble_instruction(&words[..1]), ("JMP ?  ; pl 2".to_string(), 1));
    }

    #[test]
    fn test_invalid_word() {
        assert_eq!(disassemble_instruction(&[0x4443_4205]), ("INV: 0x44434205".to_string(), 1));
        assert_eq!(disassemble_instruction(&[]), (String::new(), 0));
    }

    #[test]
    fn test_listing() {
        let mut words = encode_instruction(Opcode::Push, &[imm(7)]).unwrap();
        words.push(0x0041_4205);
        let listing = disassemble(&words, 0x100);
        let lines: Vec<&str> = listing.lines().skip(3).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0x00000100:\t"));
        assert!(lines[0].ends_with("PUSH 0x7"));
        assert!(lines[1].starts_with("0x00000102:\t00414205"));
        assert!(lines[1].ends_with("|.BA.|"));
    }
}
