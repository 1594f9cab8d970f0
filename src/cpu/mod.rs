//! CPU emulation for VM32.
//!
//! The machine is a 32-bit word-addressed CPU with:
//! - a sparse 2^32-word physical memory
//! - 31 memory-backed general-purpose registers and 10 control registers
//! - optional segmentation through a descriptor table, with typed segments
//! - vectored interrupts and a one-shot timer
//! - single-level trap-and-emulate virtualization

pub mod memory;
pub mod registers;
pub mod decode;
pub mod descriptor;
pub mod fault;
pub mod state;
pub mod alu;
pub mod console;
pub mod execute;

pub use memory::{Memory, MemoryError};
pub use registers::{Flags, InterruptControl, SpecialRegister};
pub use decode::{Instruction, OperandDescriptor, DecodeError};
pub use descriptor::{SegmentDescriptor, SegmentKind, VmDescriptor};
pub use fault::{CpuError, Fault, TrapReason};
pub use state::{CpuState, SegmentRole};
pub use console::Console;
pub use execute::{Cpu, RunState, WriteTarget};
