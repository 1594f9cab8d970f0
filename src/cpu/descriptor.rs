//! Segment and VM descriptor tables.
//!
//! Both tables live in physical memory as fixed-width rows and end with a
//! row made entirely of `0xFFFFFFFF`. They are parsed into snapshots that
//! are invalidated when the table register is written and re-parsed on the
//! next use (see [`TableCache`]).

use crate::cpu::fault::CpuError;
use crate::cpu::memory::Memory;
use crate::cpu::registers::Flags;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Table register value meaning "no table installed".
pub const NO_TABLE: u32 = 0xFFFF_FFFF;

/// Word value that fills a terminating row.
pub const TABLE_SENTINEL: u32 = 0xFFFF_FFFF;

/// Words per segment descriptor row.
pub const SEGMENT_ROW_WORDS: usize = 4;

/// Words per VM descriptor row.
pub const VM_ROW_WORDS: usize = 9;

/// Required size of a register segment, one word per register.
pub const REGISTER_SEGMENT_WORDS: u64 = 31;

/// VM slot holding the hypervisor's own saved context.
pub const HYPERVISOR_SLOT: u32 = 0;

/// Segment kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum SegmentKind {
    Code = 0,
    Data = 1,
    Register = 2,
    Stack = 3,
}

impl SegmentKind {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(SegmentKind::Code),
            1 => Some(SegmentKind::Data),
            2 => Some(SegmentKind::Register),
            3 => Some(SegmentKind::Stack),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SegmentKind::Code => "Code",
            SegmentKind::Data => "Data",
            SegmentKind::Register => "Register",
            SegmentKind::Stack => "Stack",
        };
        f.write_str(name)
    }
}

/// One row of the segment table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub start: u32,
    /// Last valid address, inclusive.
    pub limit: u32,
    pub kind: SegmentKind,
    pub privilege_level: u32,
}

impl SegmentDescriptor {
    /// Whether `addr` lies in `[start, limit]`.
    pub fn contains(&self, addr: u64) -> bool {
        u64::from(self.start) <= addr && addr <= u64::from(self.limit)
    }

    /// Number of words covered, zero for an inverted range.
    pub fn size(&self) -> u64 {
        (u64::from(self.limit) + 1).saturating_sub(u64::from(self.start))
    }

    fn from_row(row: &[u32; SEGMENT_ROW_WORDS]) -> Result<Self, String> {
        let [start, limit, kind, privilege_level] = *row;
        let kind = SegmentKind::from_code(kind).ok_or_else(|| format!("unknown segment kind {kind}"))?;
        let descriptor = Self {
            start,
            limit,
            kind,
            privilege_level,
        };
        if kind == SegmentKind::Register && descriptor.size() != REGISTER_SEGMENT_WORDS {
            return Err(format!(
                "register segment spans {} words, expected {}",
                descriptor.size(),
                REGISTER_SEGMENT_WORDS
            ));
        }
        Ok(descriptor)
    }

    pub fn to_row(&self) -> [u32; SEGMENT_ROW_WORDS] {
        [self.start, self.limit, self.kind.code(), self.privilege_level]
    }
}

/// One row of the VM table: a saved vCPU context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VmDescriptor {
    pub cs: u32,
    pub ds: u32,
    pub es: u32,
    pub ss: u32,
    pub rs: u32,
    pub ip: u32,
    pub sp: u32,
    pub flags: Flags,
    pub privilege_level: u32,
}

impl VmDescriptor {
    fn from_row(row: &[u32; VM_ROW_WORDS]) -> Self {
        let [cs, ds, es, ss, rs, ip, sp, flags, privilege_level] = *row;
        Self {
            cs,
            ds,
            es,
            ss,
            rs,
            ip,
            sp,
            flags: Flags(flags),
            privilege_level,
        }
    }

    pub fn to_row(&self) -> [u32; VM_ROW_WORDS] {
        [
            self.cs,
            self.ds,
            self.es,
            self.ss,
            self.rs,
            self.ip,
            self.sp,
            self.flags.bits(),
            self.privilege_level,
        ]
    }
}

/// Which table a parse error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Segment,
    Vm,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Segment => f.write_str("segment"),
            TableKind::Vm => f.write_str("VM"),
        }
    }
}

/// Read fixed-width rows from `base` up to, not including, the sentinel row.
fn read_rows<const N: usize>(mem: &Memory, base: u32) -> Result<Vec<[u32; N]>, CpuError> {
    let mut rows = Vec::new();
    let mut addr = u64::from(base);
    loop {
        let mut row = [0u32; N];
        for (i, word) in row.iter_mut().enumerate() {
            *word = mem.read_word(addr + i as u64)?;
        }
        if row.iter().all(|&w| w == TABLE_SENTINEL) {
            return Ok(rows);
        }
        rows.push(row);
        addr += N as u64;
    }
}

/// Parse the segment table at `base`.
pub fn parse_segment_table(mem: &Memory, base: u32) -> Result<Vec<SegmentDescriptor>, CpuError> {
    let rows = read_rows::<SEGMENT_ROW_WORDS>(mem, base)?;
    let segments = rows
        .iter()
        .enumerate()
        .map(|(row, words)| {
            SegmentDescriptor::from_row(words).map_err(|reason| CpuError::MalformedDescriptorTable {
                table: TableKind::Segment,
                base,
                row,
                reason,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    debug!(base, count = segments.len(), "parsed segment table");
    Ok(segments)
}

/// Parse the VM table at `base`.
pub fn parse_vm_table(mem: &Memory, base: u32) -> Result<Vec<VmDescriptor>, CpuError> {
    let slots: Vec<_> = read_rows::<VM_ROW_WORDS>(mem, base)?
        .iter()
        .map(VmDescriptor::from_row)
        .collect();
    debug!(base, count = slots.len(), "parsed VM table");
    Ok(slots)
}

/// A parsed table snapshot tagged with the version it was parsed at.
///
/// Writing the table register bumps the version; the snapshot is rebuilt the
/// next time it is needed, so the parsed table always reflects the latest
/// register write.
#[derive(Debug, Clone)]
pub struct TableCache<T> {
    version: u64,
    snapshot: Option<(u64, Vec<T>)>,
}

impl<T> Default for TableCache<T> {
    fn default() -> Self {
        Self {
            version: 0,
            snapshot: None,
        }
    }
}

impl<T> TableCache<T> {
    /// Mark the snapshot stale.
    pub fn invalidate(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    pub fn is_stale(&self) -> bool {
        !matches!(&self.snapshot, Some((version, _)) if *version == self.version)
    }

    /// Return the snapshot, re-parsing first if it is stale.
    pub fn get_or_parse<F>(&mut self, parse: F) -> Result<&[T], CpuError>
    where
        F: FnOnce() -> Result<Vec<T>, CpuError>,
    {
        if self.is_stale() {
            let rows = parse()?;
            self.snapshot = Some((self.version, rows));
        }
        Ok(self
            .snapshot
            .as_ref()
            .map(|(_, rows)| rows.as_slice())
            .unwrap_or(&[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_rows(mem: &mut Memory, base: u64, rows: &[&[u32]]) {
        let mut addr = base;
        for row in rows {
            mem.write_blob(addr, row).unwrap();
            addr += row.len() as u64;
        }
    }

    #[test]
    fn test_parse_segment_table() {
        let mut mem = Memory::new();
        write_rows(
            &mut mem,
            0x400,
            &[&[0x000, 0x0FF, 0, 0], &[0x100, 0x11E, 2, 0], &[0x200, 0x2FF, 3, 1]],
        );
        let table = parse_segment_table(&mem, 0x400).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table[1].kind, SegmentKind::Register);
        assert_eq!(table[2].privilege_level, 1);
        assert_eq!(table[0].to_row(), [0x000, 0x0FF, 0, 0]);
    }

    #[test]
    fn test_empty_table() {
        let mem = Memory::new();
        assert!(parse_segment_table(&mem, 0x400).unwrap().is_empty());
        assert!(parse_vm_table(&mem, 0x400).unwrap().is_empty());
    }

    #[test]
    fn test_partial_sentinel_row_is_a_descriptor() {
        let mut mem = Memory::new();
        write_rows(&mut mem, 0, &[&[0xFFFF_FFFF, 0xFFFF_FFFF, 1, 0]]);
        assert_eq!(parse_segment_table(&mem, 0).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_kind_is_malformed() {
        let mut mem = Memory::new();
        write_rows(&mut mem, 0, &[&[0, 10, 1, 0], &[0, 10, 7, 0]]);
        match parse_segment_table(&mem, 0) {
            Err(CpuError::MalformedDescriptorTable { table, row, .. }) => {
                assert_eq!(table, TableKind::Segment);
                assert_eq!(row, 1);
            }
            other => panic!("expected malformed table, got {:?}", other),
        }
    }

    #[test]
    fn test_register_segment_size_is_checked() {
        let mut mem = Memory::new();
        write_rows(&mut mem, 0, &[&[0x100, 0x11F, 2, 0]]);
        assert!(matches!(
            parse_segment_table(&mem, 0),
            Err(CpuError::MalformedDescriptorTable { .. })
        ));
    }

    #[test]
    fn test_vm_row_roundtrip() {
        let row = [1, 2, 3, 4, 5, 0x100, 0x1800, 3, 2];
        let vm = VmDescriptor::from_row(&row);
        assert_eq!(vm.ip, 0x100);
        assert!(vm.flags.zero());
        assert_eq!(vm.to_row(), row);
    }

    #[test]
    fn test_table_outside_address_space_is_fatal() {
        let mut mem = Memory::new();
        mem.write_word(0xFFFF_FFFE, 0).unwrap();
        assert!(matches!(
            parse_segment_table(&mem, 0xFFFF_FFFE),
            Err(CpuError::Memory(_))
        ));
    }

    #[test]
    fn test_table_cache_versions() {
        let mut cache: TableCache<u32> = TableCache::default();
        assert!(cache.is_stale());

        let mut parses = 0;
        let rows = cache
            .get_or_parse(|| {
                parses += 1;
                Ok(vec![1, 2])
            })
            .unwrap()
            .to_vec();
        assert_eq!(rows, vec![1, 2]);
        assert!(!cache.is_stale());

        cache.get_or_parse(|| panic!("fresh snapshot must not be re-parsed")).unwrap();

        cache.invalidate();
        assert!(cache.is_stale());
        let rows = cache.get_or_parse(|| Ok(vec![3])).unwrap().to_vec();
        assert_eq!(rows, vec![3]);
        assert_eq!(parses, 1);
    }
}
