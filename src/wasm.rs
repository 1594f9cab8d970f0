//! WebAssembly bindings for the VM32 simulator.
//!
//! This module provides JavaScript-friendly wrappers around the core simulator.

use wasm_bindgen::prelude::*;
use crate::cpu::memory::words_from_le_bytes;
use crate::cpu::registers::SpecialRegister;
use crate::asm::disasm::disassemble_instruction;
use crate::{Console, Cpu};

/// Initialize panic hook for better error messages in console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// WebAssembly-friendly CPU wrapper. `PRINT` output is captured.
#[wasm_bindgen]
pub struct WasmCpu {
    cpu: Cpu,
    image: Vec<u32>,
}

#[wasm_bindgen]
impl WasmCpu {
    /// Create a new CPU instance.
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self {
            cpu: Cpu::with_console(Console::capture()),
            image: Vec::new(),
        }
    }

    /// Load a little-endian memory image. Returns its length in words.
    #[wasm_bindgen]
    pub fn load_image(&mut self, bytes: &[u8]) -> Result<usize, JsError> {
        let words = words_from_le_bytes(bytes).map_err(|e| JsError::new(&e.to_string()))?;
        self.image = words;
        self.reset()?;
        Ok(self.image.len())
    }

    /// Step once. Returns the disassembly of the instruction that ran.
    #[wasm_bindgen]
    pub fn step(&mut self) -> Result<String, JsError> {
        if !self.cpu.is_running() {
            return Err(JsError::new("CPU is halted"));
        }

        let text = self.current_instruction();
        self.cpu.step().map_err(|e| JsError::new(&e.to_string()))?;
        Ok(text)
    }

    /// Run until halt, error or `max_steps`. Returns total cycles.
    #[wasm_bindgen]
    pub fn run(&mut self, max_steps: u32) -> Result<u64, JsError> {
        self.cpu
            .run_limited(u64::from(max_steps))
            .map_err(|e| JsError::new(&e.to_string()))?;
        Ok(self.cpu.cycles)
    }

    /// Reset the CPU and reload the image.
    #[wasm_bindgen]
    pub fn reset(&mut self) -> Result<(), JsError> {
        self.cpu = Cpu::with_console(Console::capture());
        self.cpu
            .load_image(&self.image)
            .map_err(|e| JsError::new(&e.to_string()))
    }

    #[wasm_bindgen]
    pub fn is_running(&self) -> bool {
        self.cpu.is_running()
    }

    #[wasm_bindgen]
    pub fn is_halted(&self) -> bool {
        self.cpu.is_halted()
    }

    #[wasm_bindgen]
    pub fn cycles(&self) -> u64 {
        self.cpu.cycles
    }

    /// Instruction pointer (segment offset).
    #[wasm_bindgen]
    pub fn ip(&self) -> u32 {
        self.cpu.state.ip
    }

    /// Stack pointer (segment offset).
    #[wasm_bindgen]
    pub fn sp(&self) -> u32 {
        self.cpu.state.sp
    }

    /// General-purpose register `index`, or `undefined` if unmapped.
    #[wasm_bindgen]
    pub fn register(&mut self, index: u8) -> Option<u32> {
        self.cpu.register(index).ok()
    }

    /// Special register by index (0 = SEGTBL ... 9 = INT).
    #[wasm_bindgen]
    pub fn special_register(&self, index: u8) -> Option<u32> {
        SpecialRegister::from_index(index).map(|r| self.cpu.special_register(r))
    }

    /// Physical memory word at `addr`.
    #[wasm_bindgen]
    pub fn memory_at(&self, addr: u32) -> u32 {
        self.cpu.mem.read_word(u64::from(addr)).unwrap_or_default()
    }

    /// `len` physical words starting at `addr`. Unwritten cells read as 0xFFFFFFFF.
    #[wasm_bindgen]
    pub fn memory_range(&self, addr: u32, len: u32) -> js_sys::Uint32Array {
        let words: Vec<u32> = (0..len)
            .map(|i| self.memory_at(addr.wrapping_add(i)))
            .collect();
        js_sys::Uint32Array::from(words.as_slice())
    }

    /// Architectural state as JSON.
    #[wasm_bindgen]
    pub fn state_json(&mut self) -> Result<String, JsError> {
        self.cpu.dump_state().map_err(|e| JsError::new(&e.to_string()))
    }

    /// Drain console output produced since the last call.
    #[wasm_bindgen]
    pub fn take_output(&mut self) -> String {
        String::from_utf8_lossy(&self.cpu.take_console_output()).into_owned()
    }

    fn current_instruction(&mut self) -> String {
        let Ok(addr) = self.cpu.resulting_instruction_address() else {
            return String::from("??");
        };
        match self.cpu.mem.read_range(u64::from(addr), 3) {
            Ok(words) => disassemble_instruction(&words).0,
            Err(_) => String::from("??"),
        }
    }
}

impl Default for WasmCpu {
    fn default() -> Self {
        Self::new()
    }
}

/// Disassemble one instruction word plus its extra words.
#[wasm_bindgen]
pub fn wasm_disassemble(words: &[u32]) -> String {
    disassemble_instruction(words).0
}
