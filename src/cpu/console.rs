//! The console output port written by `PRINT`.

use crate::cpu::fault::CpuError;
use std::io::Write;

/// Where host-mode `PRINT` output goes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Console {
    /// Process stdout, flushed after every byte.
    #[default]
    Stdout,
    /// In-memory buffer, for tests, the debugger and wasm.
    Capture(Vec<u8>),
}

impl Console {
    pub fn capture() -> Self {
        Console::Capture(Vec::new())
    }

    /// Emit the low byte of `value`.
    pub fn emit(&mut self, value: u32) -> Result<(), CpuError> {
        let byte = (value & 0xFF) as u8;
        match self {
            Console::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(&[byte])
                    .and_then(|()| out.flush())
                    .map_err(|e| CpuError::Console(e.to_string()))
            }
            Console::Capture(buf) => {
                buf.push(byte);
                Ok(())
            }
        }
    }

    /// Drain captured output. Always empty for stdout.
    pub fn take(&mut self) -> Vec<u8> {
        match self {
            Console::Stdout => Vec::new(),
            Console::Capture(buf) => std::mem::take(buf),
        }
    }

    /// Captured output so far, without draining it.
    pub fn captured(&self) -> &[u8] {
        match self {
            Console::Stdout => &[],
            Console::Capture(buf) => buf,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_masks_to_byte() {
        let mut console = Console::capture();
        console.emit(0x141).unwrap();
        console.emit(u32::from(b'B')).unwrap();
        assert_eq!(console.captured(), b"AB");
        assert_eq!(console.take(), b"AB".to_vec());
        assert!(console.captured().is_empty());
    }

    #[test]
    fn test_stdout_has_nothing_to_take() {
        let mut console = Console::Stdout;
        assert!(console.take().is_empty());
    }
}
