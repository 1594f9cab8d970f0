//! Integer ALU and branch conditions.
//!
//! Pure functions over 32-bit words; all arithmetic wraps modulo 2^32.

use crate::cpu::fault::Fault;
use crate::cpu::registers::Flags;
use crate::isa::Opcode;

/// Two-operand ALU operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Or,
    Xor,
    And,
    Shl,
    Shr,
}

impl AluOp {
    /// The ALU operation behind an opcode. `NOT` is an alias of `XOR`.
    pub fn from_opcode(opcode: Opcode) -> Option<Self> {
        Some(match opcode {
            Opcode::Add => AluOp::Add,
            Opcode::Sub => AluOp::Sub,
            Opcode::Mul => AluOp::Mul,
            Opcode::Div => AluOp::Div,
            Opcode::Mod => AluOp::Mod,
            Opcode::Or => AluOp::Or,
            Opcode::Xor | Opcode::Not => AluOp::Xor,
            Opcode::And => AluOp::And,
            Opcode::Shl => AluOp::Shl,
            Opcode::Shr => AluOp::Shr,
            _ => return None,
        })
    }
}

/// Compute `a op b`.
pub fn evaluate(op: AluOp, a: u32, b: u32) -> Result<u32, Fault> {
    let result = match op {
        AluOp::Add => a.wrapping_add(b),
        AluOp::Sub => a.wrapping_sub(b),
        AluOp::Mul => a.wrapping_mul(b),
        AluOp::Div => a.checked_div(b).ok_or(Fault::DivideByZero)?,
        AluOp::Mod => a.checked_rem(b).ok_or(Fault::DivideByZero)?,
        AluOp::Or => a | b,
        AluOp::Xor => a ^ b,
        AluOp::And => a & b,
        // Shifting out every bit yields zero.
        AluOp::Shl => a.checked_shl(b).unwrap_or(0),
        AluOp::Shr => a.checked_shr(b).unwrap_or(0),
    };
    Ok(result)
}

/// Flags produced by `CMP a, b` (unsigned).
pub fn compare(a: u32, b: u32) -> Flags {
    Flags::new(a == b, a >= b)
}

/// Conditions tested by the conditional jumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Always,
    Zero,
    NotZero,
    Greater,
    GreaterEqual,
}

impl Condition {
    pub fn from_opcode(opcode: Opcode) -> Option<Self> {
        match opcode {
            Opcode::Jmp => Some(Condition::Always),
            Opcode::Jz => Some(Condition::Zero),
            Opcode::Jnz => Some(Condition::NotZero),
            Opcode::Jgt => Some(Condition::Greater),
            Opcode::Jge => Some(Condition::GreaterEqual),
            _ => None,
        }
    }
}

pub fn branch_taken(cond: Condition, flags: Flags) -> bool {
    match cond {
        Condition::Always => true,
        Condition::Zero => flags.zero(),
        Condition::NotZero => !flags.zero(),
        Condition::Greater => flags.greater_equal() && !flags.zero(),
        Condition::GreaterEqual => flags.greater_equal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_wrapping_arithmetic() {
        assert_eq!(evaluate(AluOp::Add, 0xFFFF_FFFF, 1), Ok(0));
        assert_eq!(evaluate(AluOp::Sub, 0, 1), Ok(0xFFFF_FFFF));
        assert_eq!(evaluate(AluOp::Mul, 0x8000_0000, 2), Ok(0));
    }

    #[test]
    fn test_division() {
        assert_eq!(evaluate(AluOp::Div, 17, 5), Ok(3));
        assert_eq!(evaluate(AluOp::Mod, 17, 5), Ok(2));
        assert_eq!(evaluate(AluOp::Div, 17, 0), Err(Fault::DivideByZero));
        assert_eq!(evaluate(AluOp::Mod, 17, 0), Err(Fault::DivideByZero));
    }

    #[test]
    fn test_shifts() {
        assert_eq!(evaluate(AluOp::Shl, 1, 31), Ok(0x8000_0000));
        assert_eq!(evaluate(AluOp::Shl, 1, 32), Ok(0));
        assert_eq!(evaluate(AluOp::Shr, 0x8000_0000, 31), Ok(1));
        assert_eq!(evaluate(AluOp::Shr, 0xFFFF_FFFF, 100), Ok(0));
    }

    #[test]
    fn test_not_is_xor() {
        assert_eq!(AluOp::from_opcode(Opcode::Not), Some(AluOp::Xor));
        assert_eq!(evaluate(AluOp::Xor, 0x0F0F, 0xFFFF_FFFF), Ok(0xFFFF_F0F0));
        assert_eq!(AluOp::from_opcode(Opcode::Mov), None);
    }

    #[test]
    fn test_compare_and_branch() {
        let gt = compare(5, 3);
        assert!(branch_taken(Condition::Greater, gt));
        assert!(branch_taken(Condition::GreaterEqual, gt));
        assert!(branch_taken(Condition::NotZero, gt));

        let eq = compare(3, 3);
        assert!(!branch_taken(Condition::Greater, eq));
        assert!(branch_taken(Condition::GreaterEqual, eq));
        assert!(branch_taken(Condition::Zero, eq));

        let lt = compare(3, 5);
        assert!(!branch_taken(Condition::Greater, lt));
        assert!(!branch_taken(Condition::GreaterEqual, lt));
        assert!(branch_taken(Condition::Always, lt));
    }

    proptest! {
        #[test]
        fn prop_add_wraps(a: u32, b: u32) {
            let expected = ((u64::from(a) + u64::from(b)) % (1u64 << 32)) as u32;
            prop_assert_eq!(evaluate(AluOp::Add, a, b).unwrap(), expected);
        }

        #[test]
        fn prop_sub_undoes_add(a: u32, b: u32) {
            let sum = evaluate(AluOp::Add, a, b).unwrap();
            prop_assert_eq!(evaluate(AluOp::Sub, sum, b).unwrap(), a);
        }

        #[test]
        fn prop_div_mod_identity(a: u32, b in 1u32..) {
            let q = evaluate(AluOp::Div, a, b).unwrap();
            let r = evaluate(AluOp::Mod, a, b).unwrap();
            prop_assert_eq!(q * b + r, a);
        }

        #[test]
        fn prop_compare_matches_ordering(a: u32, b: u32) {
            let flags = compare(a, b);
            prop_assert_eq!(branch_taken(Condition::Greater, flags), a > b);
            prop_assert_eq!(branch_taken(Condition::GreaterEqual, flags), a >= b);
            prop_assert_eq!(branch_taken(Condition::Zero, flags), a == b);
        }
    }
}
