//! Architectural CPU state and address translation.
//!
//! `CpuState` holds everything that is not memory: instruction and stack
//! pointers, flags, privilege level, segment selectors, the timer and the
//! virtualization bookkeeping. The general-purpose registers live in memory
//! and are reached through [`CpuState::register_address`].

use crate::cpu::descriptor::{
    parse_segment_table, parse_vm_table, SegmentDescriptor, SegmentKind, TableCache, VmDescriptor,
    HYPERVISOR_SLOT, NO_TABLE, VM_ROW_WORDS,
};
use crate::cpu::fault::{CpuError, ExecResult, Fault};
use crate::cpu::memory::{Memory, MemoryError, MAX_ADDRESS};
use crate::cpu::registers::{
    Flags, InterruptControl, SpecialRegister, FLAT_REGISTER_BASE, REGISTER_COUNT,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Stack pointer after reset. The first push lands just below the flat
/// register file.
pub const RESET_SP: u32 = 0x2000;

/// The logical address spaces an access can go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentRole {
    Instruction,
    Data,
    ExtraData,
    Stack,
    Register,
}

impl SegmentRole {
    /// The descriptor kind a selector must point at for this role.
    pub fn expected_kind(self) -> SegmentKind {
        match self {
            SegmentRole::Instruction => SegmentKind::Code,
            SegmentRole::Data | SegmentRole::ExtraData => SegmentKind::Data,
            SegmentRole::Stack => SegmentKind::Stack,
            SegmentRole::Register => SegmentKind::Register,
        }
    }
}

/// Architectural register state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuState {
    /// Instruction pointer (logical, CS-relative).
    pub ip: u32,
    /// Stack pointer (logical, SS-relative).
    pub sp: u32,
    pub flags: Flags,
    pub privilege_level: u32,

    // Segment selectors: indices into the segment table.
    pub cs: u32,
    pub ds: u32,
    pub es: u32,
    pub ss: u32,
    pub rs: u32,

    pub counter: u32,
    pub compare: u32,
    pub interrupt_control: InterruptControl,

    segtbl: u32,
    vmtbl: u32,
    in_vm: bool,
    vm_id: u32,

    #[serde(skip)]
    segments: TableCache<SegmentDescriptor>,
    #[serde(skip)]
    vms: TableCache<VmDescriptor>,
}

impl CpuState {
    /// Power-on state.
    pub fn new() -> Self {
        Self {
            ip: 0,
            sp: RESET_SP,
            flags: Flags::default(),
            privilege_level: 0,
            cs: 0,
            ds: 0,
            es: 0,
            ss: 0,
            rs: 0,
            counter: 0,
            compare: 0,
            interrupt_control: InterruptControl::default(),
            segtbl: NO_TABLE,
            vmtbl: NO_TABLE,
            in_vm: false,
            vm_id: 0,
            segments: TableCache::default(),
            vms: TableCache::default(),
        }
    }

    /// Restore power-on defaults.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    // ==================== Descriptor tables ====================

    /// Whether a segment table is installed.
    pub fn is_segmented(&self) -> bool {
        self.segtbl != NO_TABLE
    }

    /// The parsed segment table, empty in flat mode.
    pub fn segments(&mut self, mem: &Memory) -> Result<&[SegmentDescriptor], CpuError> {
        if self.segtbl == NO_TABLE {
            return Ok(&[]);
        }
        let base = self.segtbl;
        self.segments.get_or_parse(|| parse_segment_table(mem, base))
    }

    /// The parsed VM table, empty when none is installed.
    pub fn vm_slots(&mut self, mem: &Memory) -> Result<&[VmDescriptor], CpuError> {
        if self.vmtbl == NO_TABLE {
            return Ok(&[]);
        }
        let base = self.vmtbl;
        self.vms.get_or_parse(|| parse_vm_table(mem, base))
    }

    // ==================== Translation ====================

    fn selector(&self, role: SegmentRole) -> u32 {
        match role {
            SegmentRole::Instruction => self.cs,
            SegmentRole::Data => self.ds,
            SegmentRole::ExtraData => self.es,
            SegmentRole::Stack => self.ss,
            SegmentRole::Register => self.rs,
        }
    }

    /// Look up the descriptor selected for `role`, checking its kind.
    fn descriptor(&mut self, mem: &Memory, role: SegmentRole) -> ExecResult<Option<SegmentDescriptor>> {
        let selector = self.selector(role) as usize;
        let kind = role.expected_kind();
        let table = self.segments(mem)?;
        Ok(table.get(selector).copied().filter(|d| d.kind == kind))
    }

    /// Translate a logical address to a physical one.
    ///
    /// Flat mode is the identity. With a segment table the selector for
    /// `role` must name a descriptor of the right kind that covers `offset`.
    pub fn translate(&mut self, mem: &Memory, role: SegmentRole, offset: u32) -> ExecResult<u32> {
        if !self.is_segmented() {
            return Ok(offset);
        }
        match self.descriptor(mem, role)? {
            Some(d) if d.contains(u64::from(offset)) => Ok(offset),
            _ => Err(Fault::SegmentViolation {
                kind: role.expected_kind(),
                offset,
            }
            .into()),
        }
    }

    pub fn translate_instruction(&mut self, mem: &Memory, offset: u32) -> ExecResult<u32> {
        self.translate(mem, SegmentRole::Instruction, offset)
    }

    pub fn translate_data(&mut self, mem: &Memory, offset: u32) -> ExecResult<u32> {
        self.translate(mem, SegmentRole::Data, offset)
    }

    pub fn translate_extra_data(&mut self, mem: &Memory, offset: u32) -> ExecResult<u32> {
        self.translate(mem, SegmentRole::ExtraData, offset)
    }

    pub fn translate_stack(&mut self, mem: &Memory, offset: u32) -> ExecResult<u32> {
        self.translate(mem, SegmentRole::Stack, offset)
    }

    /// Physical address of general-purpose register `index`.
    pub fn register_address(&mut self, mem: &Memory, index: u8) -> ExecResult<u32> {
        if index >= REGISTER_COUNT {
            return Err(CpuError::InvalidRegister(index).into());
        }
        if !self.is_segmented() {
            return Ok(FLAT_REGISTER_BASE + u32::from(index));
        }
        let descriptor = self
            .descriptor(mem, SegmentRole::Register)?
            .ok_or(Fault::SegmentViolation {
                kind: SegmentKind::Register,
                offset: u32::from(index),
            })?;
        let addr = u64::from(descriptor.start) + u64::from(index);
        if addr > MAX_ADDRESS {
            return Err(MemoryError::AddressOutOfBounds(addr).into());
        }
        Ok(addr as u32)
    }

    pub fn read_register(&mut self, mem: &Memory, index: u8) -> ExecResult<u32> {
        let addr = self.register_address(mem, index)?;
        Ok(mem.read_word(u64::from(addr))?)
    }

    pub fn write_register(&mut self, mem: &mut Memory, index: u8, value: u32) -> ExecResult<()> {
        let addr = self.register_address(mem, index)?;
        mem.write_word(u64::from(addr), u64::from(value))?;
        Ok(())
    }

    /// Physical address of the next instruction, for debuggers.
    pub fn resulting_instruction_address(&mut self, mem: &Memory) -> ExecResult<u32> {
        let ip = self.ip;
        self.translate_instruction(mem, ip)
    }

    /// Physical address of the top of stack, for debuggers.
    pub fn resulting_stack_address(&mut self, mem: &Memory) -> ExecResult<u32> {
        let sp = self.sp;
        self.translate_stack(mem, sp)
    }

    // ==================== Special registers ====================

    pub fn read_special(&self, reg: SpecialRegister) -> u32 {
        match reg {
            SpecialRegister::SegTbl => self.segtbl,
            SpecialRegister::VmTbl => self.vmtbl,
            SpecialRegister::Cs => self.cs,
            SpecialRegister::Ds => self.ds,
            SpecialRegister::Es => self.es,
            SpecialRegister::Rs => self.rs,
            SpecialRegister::Ss => self.ss,
            SpecialRegister::Counter => self.counter,
            SpecialRegister::Compare => self.compare,
            SpecialRegister::Int => self.interrupt_control.bits(),
        }
    }

    /// Write a control register. Writing a table register drops the parsed
    /// snapshot of that table.
    pub fn write_special(&mut self, reg: SpecialRegister, value: u32) {
        match reg {
            SpecialRegister::SegTbl => {
                self.segtbl = value;
                self.segments.invalidate();
            }
            SpecialRegister::VmTbl => {
                self.vmtbl = value;
                self.vms.invalidate();
            }
            SpecialRegister::Cs => self.cs = value,
            SpecialRegister::Ds => self.ds = value,
            SpecialRegister::Es => self.es = value,
            SpecialRegister::Rs => self.rs = value,
            SpecialRegister::Ss => self.ss = value,
            SpecialRegister::Counter => self.counter = value,
            SpecialRegister::Compare => self.compare = value,
            SpecialRegister::Int => self.interrupt_control = InterruptControl(value),
        }
    }

    // ==================== Interrupts & timer ====================

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupt_control.interrupts_enabled()
    }

    pub fn set_interrupts_enabled(&mut self, on: bool) {
        self.interrupt_control.set(InterruptControl::ENABLED, on);
    }

    pub fn timer_pending(&self) -> bool {
        self.interrupt_control.timer_pending()
    }

    pub fn clear_timer_pending(&mut self) {
        self.interrupt_control.set(InterruptControl::TIMER_PENDING, false);
    }

    /// Advance the one-shot timer by one step.
    pub fn tick_timer(&mut self) {
        if !self.interrupt_control.timer_enabled() {
            return;
        }
        self.counter = self.counter.wrapping_add(1);
        if self.counter == self.compare {
            self.interrupt_control.set(InterruptControl::TIMER_PENDING, true);
            self.interrupt_control.set(InterruptControl::TIMER_ENABLED, false);
            debug!(counter = self.counter, "timer fired");
        }
    }

    // ==================== Virtualization ====================

    pub fn in_vm(&self) -> bool {
        self.in_vm
    }

    /// Slot of the running guest, 0 in host mode.
    pub fn vm_id(&self) -> u32 {
        self.vm_id
    }

    /// The current context as a VM table row.
    pub fn context(&self) -> VmDescriptor {
        VmDescriptor {
            cs: self.cs,
            ds: self.ds,
            es: self.es,
            ss: self.ss,
            rs: self.rs,
            ip: self.ip,
            sp: self.sp,
            flags: self.flags,
            privilege_level: self.privilege_level,
        }
    }

    fn load_context(&mut self, vm: &VmDescriptor) {
        self.cs = vm.cs;
        self.ds = vm.ds;
        self.es = vm.es;
        self.ss = vm.ss;
        self.rs = vm.rs;
        self.ip = vm.ip;
        self.sp = vm.sp;
        self.flags = vm.flags;
        self.privilege_level = vm.privilege_level;
    }

    fn slot(&mut self, mem: &Memory, id: u32) -> Result<VmDescriptor, CpuError> {
        self.vm_slots(mem)?
            .get(id as usize)
            .copied()
            .ok_or(CpuError::UnknownVmSlot(id))
    }

    /// Load guest slot `id` and switch to guest mode.
    pub fn enter_vm(&mut self, mem: &Memory, id: u32) -> Result<(), CpuError> {
        let vm = self.slot(mem, id)?;
        self.load_context(&vm);
        self.in_vm = true;
        self.vm_id = id;
        debug!(id, ip = vm.ip, "entering VM");
        Ok(())
    }

    /// Store the current context into slot `id`.
    pub fn save_vm_slot(&mut self, mem: &mut Memory, id: u32) -> Result<(), CpuError> {
        self.slot(mem, id)?;
        let addr = u64::from(self.vmtbl) + u64::from(id) * VM_ROW_WORDS as u64;
        mem.write_blob(addr, &self.context().to_row())?;
        self.vms.invalidate();
        Ok(())
    }

    /// Store the current context into the hypervisor slot.
    pub fn save_hypervisor_slot(&mut self, mem: &mut Memory) -> Result<(), CpuError> {
        self.save_vm_slot(mem, HYPERVISOR_SLOT)
    }

    /// Restore the hypervisor context from slot 0 and leave guest mode.
    pub fn leave_vm(&mut self, mem: &Memory) -> Result<(), CpuError> {
        let hypervisor = self.slot(mem, HYPERVISOR_SLOT)?;
        self.load_context(&hypervisor);
        self.in_vm = false;
        self.vm_id = HYPERVISOR_SLOT;
        Ok(())
    }
}

impl Default for CpuState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CpuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "IP={:08x} SP={:08x} FLAGS={:?} PRIV={} INT={:?}",
            self.ip, self.sp, self.flags, self.privilege_level, self.interrupt_control
        )?;
        writeln!(
            f,
            "CS={:08x} DS={:08x} ES={:08x} SS={:08x} RS={:08x}",
            self.cs, self.ds, self.es, self.ss, self.rs
        )?;
        writeln!(
            f,
            "SEGTBL={:08x} VMTBL={:08x} COUNTER={:08x} COMPARE={:08x}",
            self.segtbl, self.vmtbl, self.counter, self.compare
        )?;
        if self.in_vm {
            write!(f, "guest {}", self.vm_id)
        } else {
            write!(f, "host")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::descriptor::TABLE_SENTINEL;

    const SEGTBL: u64 = 0x4000;
    const VMTBL: u64 = 0x5000;

    /// Code 0x000-0x0FF, data 0x100-0x1FF, registers 0x300-0x31E, stack 0x400-0x4FF.
    fn segmented() -> (CpuState, Memory) {
        let mut mem = Memory::new();
        let rows: [[u32; 4]; 5] = [
            [0x000, 0x0FF, 0, 0],
            [0x100, 0x1FF, 1, 0],
            [0x300, 0x31E, 2, 0],
            [0x400, 0x4FF, 3, 0],
            [TABLE_SENTINEL; 4],
        ];
        for (i, row) in rows.iter().enumerate() {
            mem.write_blob(SEGTBL + 4 * i as u64, row).unwrap();
        }
        let mut state = CpuState::new();
        state.write_special(SpecialRegister::SegTbl, SEGTBL as u32);
        state.cs = 0;
        state.ds = 1;
        state.es = 1;
        state.rs = 2;
        state.ss = 3;
        (state, mem)
    }

    fn install_vm_table(state: &mut CpuState, mem: &mut Memory, guests: &[VmDescriptor]) {
        let mut addr = VMTBL;
        for vm in std::iter::once(&VmDescriptor::default()).chain(guests) {
            mem.write_blob(addr, &vm.to_row()).unwrap();
            addr += VM_ROW_WORDS as u64;
        }
        mem.write_blob(addr, &[TABLE_SENTINEL; VM_ROW_WORDS]).unwrap();
        state.write_special(SpecialRegister::VmTbl, VMTBL as u32);
    }

    #[test]
    fn test_reset_defaults() {
        let mut state = CpuState::new();
        state.ip = 7;
        state.set_interrupts_enabled(true);
        state.reset();
        assert_eq!(state.ip, 0);
        assert_eq!(state.sp, RESET_SP);
        assert!(!state.interrupts_enabled());
        assert!(!state.in_vm());
        assert!(!state.is_segmented());
        assert_eq!(state.read_special(SpecialRegister::VmTbl), NO_TABLE);
    }

    #[test]
    fn test_flat_translation_is_identity() {
        let mut state = CpuState::new();
        let mem = Memory::new();
        assert_eq!(state.translate_data(&mem, 0x1234).unwrap(), 0x1234);
        assert_eq!(state.translate_stack(&mem, 0xFFFF_FFFF).unwrap(), 0xFFFF_FFFF);
        assert_eq!(state.register_address(&mem, 5).unwrap(), FLAT_REGISTER_BASE + 5);
    }

    #[test]
    fn test_segmented_translation() {
        let (mut state, mem) = segmented();
        assert_eq!(state.translate_instruction(&mem, 0x10).unwrap(), 0x10);
        assert_eq!(state.translate_data(&mem, 0x1FF).unwrap(), 0x1FF);
        assert_eq!(state.register_address(&mem, 30).unwrap(), 0x31E);
        assert_eq!(
            state.translate_data(&mem, 0x200),
            Err(Fault::SegmentViolation {
                kind: SegmentKind::Data,
                offset: 0x200
            }
            .into())
        );
        assert_eq!(
            state.translate_stack(&mem, 0x10),
            Err(Fault::SegmentViolation {
                kind: SegmentKind::Stack,
                offset: 0x10
            }
            .into())
        );
    }

    #[test]
    fn test_selector_kind_mismatch_is_violation() {
        let (mut state, mem) = segmented();
        state.ds = 0; // code segment
        assert!(matches!(
            state.translate_data(&mem, 0x10),
            Err(crate::cpu::fault::Exception::Fault(Fault::SegmentViolation {
                kind: SegmentKind::Data,
                ..
            }))
        ));
        state.ss = 99; // past the end of the table
        assert!(state.translate_stack(&mem, 0x400).is_err());
    }

    #[test]
    fn test_register_index_out_of_range_is_fatal() {
        let mut state = CpuState::new();
        let mem = Memory::new();
        assert_eq!(
            state.register_address(&mem, 31),
            Err(CpuError::InvalidRegister(31).into())
        );
    }

    #[test]
    fn test_table_register_write_reparses() {
        let (mut state, mut mem) = segmented();
        assert_eq!(state.segments(&mem).unwrap().len(), 4);

        // Edits to the table are only seen after the register is rewritten.
        mem.write_blob(SEGTBL + 4, &[TABLE_SENTINEL; 4]).unwrap();
        assert_eq!(state.segments(&mem).unwrap().len(), 4);
        state.write_special(SpecialRegister::SegTbl, SEGTBL as u32);
        assert_eq!(state.segments(&mem).unwrap().len(), 1);
    }

    #[test]
    fn test_timer_is_one_shot() {
        let mut state = CpuState::new();
        state.write_special(SpecialRegister::Compare, 3);
        state.write_special(SpecialRegister::Int, InterruptControl::TIMER_ENABLED);
        state.tick_timer();
        state.tick_timer();
        assert!(!state.timer_pending());
        state.tick_timer();
        assert!(state.timer_pending());
        assert!(!state.interrupt_control.timer_enabled());
        state.tick_timer();
        assert_eq!(state.counter, 3);
    }

    #[test]
    fn test_vm_enter_save_leave() {
        let mut state = CpuState::new();
        let mut mem = Memory::new();
        let guest = VmDescriptor {
            ip: 0x100,
            sp: 0x1800,
            privilege_level: 1,
            ..VmDescriptor::default()
        };
        install_vm_table(&mut state, &mut mem, &[guest]);

        state.ip = 0x42;
        state.save_hypervisor_slot(&mut mem).unwrap();
        state.enter_vm(&mem, 1).unwrap();
        assert!(state.in_vm());
        assert_eq!(state.vm_id(), 1);
        assert_eq!(state.ip, 0x100);
        assert_eq!(state.privilege_level, 1);

        state.ip = 0x105;
        state.save_vm_slot(&mut mem, 1).unwrap();
        state.leave_vm(&mem).unwrap();
        assert!(!state.in_vm());
        assert_eq!(state.ip, 0x42);
        assert_eq!(state.vm_slots(&mem).unwrap()[1].ip, 0x105);
        assert_eq!(mem.read_word(VMTBL + 9 + 5).unwrap(), 0x105);
    }

    #[test]
    fn test_vm_slot_round_trip_keeps_every_field() {
        let mut state = CpuState::new();
        let mut mem = Memory::new();
        let guest = VmDescriptor {
            cs: 1,
            ds: 2,
            es: 3,
            ss: 4,
            rs: 5,
            ip: 0x100,
            sp: 0x1800,
            flags: Flags(3),
            privilege_level: 2,
        };
        install_vm_table(&mut state, &mut mem, &[guest]);

        state.enter_vm(&mem, 1).unwrap();
        assert_eq!(state.context(), guest);
        state.save_vm_slot(&mut mem, 1).unwrap();

        assert_eq!(mem.read_range(VMTBL + 9, 9).unwrap(), guest.to_row().to_vec());
        assert_eq!(state.vm_slots(&mem).unwrap()[1], guest);
    }

    #[test]
    fn test_unknown_slot() {
        let mut state = CpuState::new();
        let mut mem = Memory::new();
        assert_eq!(state.enter_vm(&mem, 1), Err(CpuError::UnknownVmSlot(1)));
        install_vm_table(&mut state, &mut mem, &[]);
        assert_eq!(state.save_vm_slot(&mut mem, 1), Err(CpuError::UnknownVmSlot(1)));
    }

    #[test]
    fn test_display_dump() {
        let state = CpuState::new();
        let dump = state.to_string();
        assert!(dump.starts_with("IP=00000000 SP=00002000"));
        assert!(dump.ends_with("host"));
    }
}
