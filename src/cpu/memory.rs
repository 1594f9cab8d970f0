//! VM32 physical memory.
//!
//! Memory is a sparse map from 32-bit word addresses to 32-bit words. There
//! is no byte addressing: the unit of storage and access is always one word.
//! Cells that were never written read back as [`UNINITIALIZED`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Highest valid physical address.
pub const MAX_ADDRESS: u64 = 0xFFFF_FFFF;

/// Value returned for a never-written cell.
pub const UNINITIALIZED: u32 = 0xFFFF_FFFF;

/// VM32 memory: up to 2^32 words, allocated on first write.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    words: BTreeMap<u32, u32>,
}

impl Memory {
    /// Create an empty memory.
    pub fn new() -> Self {
        Self {
            words: BTreeMap::new(),
        }
    }

    /// Build memory from a little-endian image loaded at address 0.
    pub fn from_image(bytes: &[u8]) -> Result<Self, MemoryError> {
        let words = words_from_le_bytes(bytes)?;
        let mut mem = Self::new();
        mem.write_blob(0, &words)?;
        Ok(mem)
    }

    /// Read one word.
    pub fn read_word(&self, addr: u64) -> Result<u32, MemoryError> {
        let addr = check_address(addr)?;
        Ok(self.words.get(&addr).copied().unwrap_or(UNINITIALIZED))
    }

    /// Write one word.
    ///
    /// The value is taken as `u64` so that a collaborator passing an unmasked
    /// value is caught instead of silently truncated.
    pub fn write_word(&mut self, addr: u64, value: u64) -> Result<(), MemoryError> {
        let addr = check_address(addr)?;
        let value = u32::try_from(value).map_err(|_| MemoryError::DataOutOfBounds {
            value,
            addr: addr as u64,
        })?;
        self.words.insert(addr, value);
        Ok(())
    }

    /// Write a run of words starting at `start`. Used for image loading.
    pub fn write_blob(&mut self, start: u64, words: &[u32]) -> Result<(), MemoryError> {
        if !words.is_empty() {
            check_address(start + words.len() as u64 - 1)?;
        }
        for (i, &word) in words.iter().enumerate() {
            self.write_word(start + i as u64, u64::from(word))?;
        }
        Ok(())
    }

    /// Read `len` consecutive words.
    pub fn read_range(&self, addr: u64, len: usize) -> Result<Vec<u32>, MemoryError> {
        (0..len as u64).map(|i| self.read_word(addr + i)).collect()
    }

    /// Number of cells that have been written.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

fn check_address(addr: u64) -> Result<u32, MemoryError> {
    u32::try_from(addr).map_err(|_| MemoryError::AddressOutOfBounds(addr))
}

/// Split a little-endian byte image into words.
pub fn words_from_le_bytes(bytes: &[u8]) -> Result<Vec<u32>, MemoryError> {
    if bytes.len() % 4 != 0 {
        return Err(MemoryError::MisalignedImage(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("written_cells", &self.words.len())
            .field("lowest", &self.words.keys().next())
            .field("highest", &self.words.keys().next_back())
            .finish()
    }
}

/// Errors that can occur during memory operations.
///
/// These are host-level faults: the CPU always masks values to 32 bits and
/// computes addresses inside the 32-bit space, so any of them indicates a
/// defect in a collaborator or in the core itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("address {0:#x} outside the 32-bit address space")]
    AddressOutOfBounds(u64),

    #[error("value {value:#x} for address {addr:#010x} does not fit in 32 bits")]
    DataOutOfBounds { value: u64, addr: u64 },

    #[error("image length {0} is not a multiple of 4 bytes")]
    MisalignedImage(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_memory_read_write() {
        let mut mem = Memory::new();
        mem.write_word(10, 42).unwrap();
        assert_eq!(mem.read_word(10).unwrap(), 42);
    }

    #[test]
    fn test_uninitialized_sentinel() {
        let mem = Memory::new();
        assert_eq!(mem.read_word(0).unwrap(), UNINITIALIZED);
        assert_eq!(mem.read_word(MAX_ADDRESS).unwrap(), UNINITIALIZED);
    }

    #[test]
    fn test_memory_bounds() {
        let mut mem = Memory::new();
        assert!(mem.write_word(MAX_ADDRESS, 1).is_ok());
        assert_eq!(
            mem.read_word(MAX_ADDRESS + 1),
            Err(MemoryError::AddressOutOfBounds(MAX_ADDRESS + 1))
        );
        assert_eq!(
            mem.write_word(MAX_ADDRESS + 1, 0),
            Err(MemoryError::AddressOutOfBounds(MAX_ADDRESS + 1))
        );
    }

    #[test]
    fn test_data_bounds() {
        let mut mem = Memory::new();
        assert!(mem.write_word(0, 0xFFFF_FFFF).is_ok());
        assert!(matches!(
            mem.write_word(0, 0x1_0000_0000),
            Err(MemoryError::DataOutOfBounds { .. })
        ));
        assert_eq!(mem.read_word(0).unwrap(), 0xFFFF_FFFF);
    }

    #[test]
    fn test_write_blob() {
        let mut mem = Memory::new();
        mem.write_blob(0x100, &[1, 2, 3]).unwrap();
        assert_eq!(mem.read_range(0x100, 4).unwrap(), vec![1, 2, 3, UNINITIALIZED]);
        assert_eq!(mem.len(), 3);
    }

    #[test]
    fn test_write_blob_past_end_is_rejected_up_front() {
        let mut mem = Memory::new();
        assert!(mem.write_blob(MAX_ADDRESS, &[1, 2]).is_err());
        assert!(mem.is_empty());
    }

    #[test]
    fn test_from_image_little_endian() {
        let mem = Memory::from_image(&[0x78, 0x56, 0x34, 0x12, 0x01, 0, 0, 0]).unwrap();
        assert_eq!(mem.read_word(0).unwrap(), 0x1234_5678);
        assert_eq!(mem.read_word(1).unwrap(), 1);
        assert_eq!(
            Memory::from_image(&[0, 0, 0]),
            Err(MemoryError::MisalignedImage(3))
        );
    }

    proptest! {
        #[test]
        fn prop_read_after_write(addr in 0u64..=MAX_ADDRESS, value: u32) {
            let mut mem = Memory::new();
            mem.write_word(addr, u64::from(value)).unwrap();
            prop_assert_eq!(mem.read_word(addr).unwrap(), value);
        }

        #[test]
        fn prop_unwritten_neighbour_is_sentinel(addr in 1u64..MAX_ADDRESS, value: u32) {
            let mut mem = Memory::new();
            mem.write_word(addr, u64::from(value)).unwrap();
            prop_assert_eq!(mem.read_word(addr + 1).unwrap(), UNINITIALIZED);
            prop_assert_eq!(mem.read_word(addr - 1).unwrap(), UNINITIALIZED);
        }
    }
}
