//! # VM32 Simulator
//!
//! A simulator for VM32, a small 32-bit word-addressed machine with
//! segmentation, vectored interrupts, a timer and single-level
//! trap-and-emulate virtualization.
//!
//! Programs are raw little-endian word images loaded at address 0 and run
//! through [`Cpu`].

pub mod isa;
pub mod cpu;
pub mod asm;

#[cfg(feature = "tui")]
pub mod tui;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-export commonly used types
pub use isa::Opcode;
pub use cpu::{Console, Cpu, CpuError, CpuState, Fault, Memory, RunState};
pub use asm::{disassemble, load_image, save_image, ImageError, Program};

#[cfg(feature = "tui")]
pub use tui::run_debugger;
