//! Program tooling for VM32.
//!
//! This module provides:
//! - A typed instruction encoder for building images in code
//! - A disassembler (image words to readable text)
//! - Raw image file loading and saving

pub mod encode;
pub mod disasm;
pub mod image;

pub use encode::{encode_instruction, EncodeError, Operand, Program};
pub use disasm::{disassemble, disassemble_instruction};
pub use image::{load_image, save_image, ImageError};
