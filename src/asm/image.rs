//! Raw memory image files.
//!
//! An image is a flat sequence of little-endian 32-bit words loaded at
//! physical address 0. There is no header.

use crate::cpu::memory::{words_from_le_bytes, MemoryError};
use std::path::Path;
use thiserror::Error;

/// Load an image file from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<Vec<u32>, ImageError> {
    let bytes = std::fs::read(path.as_ref()).map_err(|e| ImageError::Io(e.to_string()))?;
    Ok(words_from_le_bytes(&bytes)?)
}

/// Save words as an image file.
pub fn save_image<P: AsRef<Path>>(path: P, words: &[u32]) -> Result<(), ImageError> {
    std::fs::write(path.as_ref(), words_to_bytes(words)).map_err(|e| ImageError::Io(e.to_string()))
}

pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Errors that can occur while reading or writing images.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("vm32-{}-{}.bin", name, std::process::id()))
    }

    #[test]
    fn test_words_to_bytes_little_endian() {
        assert_eq!(words_to_bytes(&[0x0403_0201, 0x22]), vec![1, 2, 3, 4, 0x22, 0, 0, 0]);
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("roundtrip");
        save_image(&path, &[0x22, 0xDEAD_BEEF]).unwrap();
        assert_eq!(load_image(&path).unwrap(), vec![0x22, 0xDEAD_BEEF]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_misaligned_file() {
        let path = temp_path("misaligned");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        assert_eq!(load_image(&path), Err(ImageError::Memory(MemoryError::MisalignedImage(3))));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(load_image(temp_path("missing")), Err(ImageError::Io(_))));
    }
}
