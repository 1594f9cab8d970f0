//! Faults, fatal errors and the interrupt/trap numbering.
//!
//! Two channels are kept apart:
//! - [`Fault`]: a guest-visible condition. Always delivered to the guest as
//!   an interrupt or a VM-exit; never escapes [`Cpu::step`](crate::Cpu::step).
//! - [`CpuError`]: an invariant violation or corrupted hypervisor state.
//!   Escapes `step` and stops the run.

use crate::cpu::decode::DecodeError;
use crate::cpu::descriptor::{SegmentKind, TableKind};
use crate::cpu::memory::MemoryError;
use crate::isa::Opcode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Interrupt numbers.
pub const INTR_RESET: u32 = 0;
pub const INTR_SEG_VIOL: u32 = 1;
pub const INTR_INVALID_INSTR: u32 = 2;
pub const INTR_DIV_BY_ZERO: u32 = 3;
pub const INTR_HV_TRAP: u32 = 4;
pub const INTR_TIMER: u32 = 5;
pub const INTR_SOFTWARE: u32 = 6;
pub const INTR_PRIVILEGE_VIOL: u32 = 7;

/// Highest deliverable interrupt number.
pub const MAX_INTERRUPT: u32 = 32;

/// First interrupt vector; vector `n` is at `base + n * stride`.
pub const INTERRUPT_VECTOR_BASE: u32 = 0;

/// Words per vector: room for one `JMP imm`.
pub const INTERRUPT_VECTOR_STRIDE: u32 = 2;

/// Why a guest exited to the hypervisor. Pushed on the hypervisor stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum TrapReason {
    SegmentViolation = 0,
    InvalidInstruction = 1,
    DivideByZero = 2,
    HypervisorTrap = 3,
    Software = 4,
    PrivilegeViolation = 5,
    SpecialRegisterRead = 6,
    SpecialRegisterWrite = 7,
    Halt = 8,
    HardwareAccess = 9,
    VmResume = 10,
    Timer = 11,
}

impl TrapReason {
    pub fn code(self) -> u32 {
        self as u32
    }

    /// The trap reported when interrupt `number` is raised inside a guest.
    pub fn from_interrupt(number: u32) -> Self {
        match number {
            INTR_SEG_VIOL => TrapReason::SegmentViolation,
            INTR_INVALID_INSTR => TrapReason::InvalidInstruction,
            INTR_DIV_BY_ZERO => TrapReason::DivideByZero,
            INTR_SOFTWARE => TrapReason::Software,
            INTR_TIMER => TrapReason::Timer,
            INTR_PRIVILEGE_VIOL => TrapReason::PrivilegeViolation,
            _ => TrapReason::HypervisorTrap,
        }
    }
}

/// A recoverable, guest-visible fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("segment violation in {kind} segment at offset {offset:#010x}")]
    SegmentViolation { kind: SegmentKind, offset: u32 },

    #[error("invalid instruction: {0}")]
    InvalidInstruction(#[from] DecodeError),

    #[error("VMRESUME into invalid slot {0}")]
    InvalidVmSlot(u32),

    #[error("division by zero")]
    DivideByZero,

    #[error("privilege violation: instruction requires level {required}, current level is {current}")]
    PrivilegeViolation { required: u8, current: u32 },

    #[error("software interrupt {number}")]
    SoftwareInterrupt { number: u32, return_ip: u32 },

    /// Guest operation that must be emulated by the hypervisor.
    #[error("VM trap {reason:?}")]
    VmTrap {
        reason: TrapReason,
        resume_ip: u32,
        extra: Vec<u32>,
    },
}

/// A fatal simulator error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("malformed {table} table at {base:#010x}, row {row}: {reason}")]
    MalformedDescriptorTable {
        table: TableKind,
        base: u32,
        row: usize,
        reason: String,
    },

    #[error("{opcode} produced a result but operand 1 has no write target")]
    MissingWriteTarget { opcode: Opcode },

    /// The dispatch table routed an opcode to a handler that does not cover it.
    #[error("no handler covers {opcode}")]
    NoHandler { opcode: Opcode },

    #[error("register r{0} does not exist")]
    InvalidRegister(u8),

    #[error("interrupt number {0} out of range (max {MAX_INTERRUPT})")]
    InterruptOutOfRange(u32),

    #[error("VM slot {0} is not present in the VM table")]
    UnknownVmSlot(u32),

    #[error("VM-exit requested while no guest is running")]
    NotInGuest,

    /// A fault raised while pushing the frame of interrupt `number`.
    #[error("double fault while delivering interrupt {number}: {fault}")]
    DoubleFault { number: u32, fault: Box<Fault> },

    #[error("console output failed: {0}")]
    Console(String),
}

/// Either kind of abnormal completion of an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Exception {
    #[error(transparent)]
    Fault(Fault),
    #[error(transparent)]
    Fatal(CpuError),
}

impl From<Fault> for Exception {
    fn from(fault: Fault) -> Self {
        Exception::Fault(fault)
    }
}

impl From<CpuError> for Exception {
    fn from(err: CpuError) -> Self {
        Exception::Fatal(err)
    }
}

impl From<MemoryError> for Exception {
    fn from(err: MemoryError) -> Self {
        Exception::Fatal(CpuError::Memory(err))
    }
}

impl From<DecodeError> for Exception {
    fn from(err: DecodeError) -> Self {
        Exception::Fault(Fault::InvalidInstruction(err))
    }
}

pub type ExecResult<T> = Result<T, Exception>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_to_trap_reason() {
        assert_eq!(TrapReason::from_interrupt(INTR_SEG_VIOL), TrapReason::SegmentViolation);
        assert_eq!(TrapReason::from_interrupt(INTR_TIMER), TrapReason::Timer);
        assert_eq!(TrapReason::from_interrupt(INTR_HV_TRAP), TrapReason::HypervisorTrap);
        assert_eq!(TrapReason::from_interrupt(INTR_PRIVILEGE_VIOL).code(), 5);
    }

    #[test]
    fn test_conversions_pick_the_right_channel() {
        let e: Exception = DecodeError::InvalidOpcode(0xEE).into();
        assert!(matches!(e, Exception::Fault(Fault::InvalidInstruction(_))));

        let e: Exception = MemoryError::AddressOutOfBounds(1 << 32).into();
        assert!(matches!(e, Exception::Fatal(CpuError::Memory(_))));
    }

    #[test]
    fn test_error_messages() {
        let fault = Fault::SegmentViolation {
            kind: SegmentKind::Stack,
            offset: 0x1FFF,
        };
        assert_eq!(fault.to_string(), "segment violation in Stack segment at offset 0x00001fff");
        assert_eq!(
            CpuError::InterruptOutOfRange(40).to_string(),
            "interrupt number 40 out of range (max 32)"
        );
    }
}
