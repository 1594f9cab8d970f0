//! VM32 register definitions.
//!
//! The register file itself lives in memory: each of the 31 general-purpose
//! registers is one word, at `0x2000 + index` in flat mode or inside the
//! register segment selected by `RS` once segmentation is on. This module
//! holds the register numbering, the control registers and the flag words.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of general-purpose registers (r0-r30).
pub const REGISTER_COUNT: u8 = 31;

/// Register index meaning "no base register" inside memory operands.
pub const NO_REGISTER: u8 = 31;

/// Physical base of the register file when no segment table is installed.
pub const FLAT_REGISTER_BASE: u32 = 0x2000;

/// Register used as frame pointer by `ENTER`, `LEAVE` and `GETARGUMENT`.
pub const FRAME_POINTER: u8 = 30;

/// Control registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SpecialRegister {
    /// Physical address of the segment descriptor table.
    SegTbl = 0,
    /// Physical address of the VM descriptor table.
    VmTbl = 1,
    Cs = 2,
    Ds = 3,
    Es = 4,
    Rs = 5,
    Ss = 6,
    /// Timer counter.
    Counter = 7,
    /// Timer compare value.
    Compare = 8,
    /// Interrupt control bits, see [`InterruptControl`].
    Int = 9,
}

impl SpecialRegister {
    pub const ALL: [SpecialRegister; 10] = [
        SpecialRegister::SegTbl,
        SpecialRegister::VmTbl,
        SpecialRegister::Cs,
        SpecialRegister::Ds,
        SpecialRegister::Es,
        SpecialRegister::Rs,
        SpecialRegister::Ss,
        SpecialRegister::Counter,
        SpecialRegister::Compare,
        SpecialRegister::Int,
    ];

    /// Decode the register field of a special-register operand.
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            SpecialRegister::SegTbl => "SEGTBL",
            SpecialRegister::VmTbl => "VMTBL",
            SpecialRegister::Cs => "CS",
            SpecialRegister::Ds => "DS",
            SpecialRegister::Es => "ES",
            SpecialRegister::Rs => "RS",
            SpecialRegister::Ss => "SS",
            SpecialRegister::Counter => "COUNTER",
            SpecialRegister::Compare => "COMPARE",
            SpecialRegister::Int => "INT",
        }
    }
}

impl fmt::Display for SpecialRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The flags word. Only `CMP` writes it.
///
/// Stored as the raw word so a VM snapshot round-trips verbatim.
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Flags(pub u32);

impl Flags {
    pub const ZERO: u32 = 1 << 0;
    pub const GREATER_EQUAL: u32 = 1 << 1;

    pub fn new(zero: bool, greater_equal: bool) -> Self {
        let mut bits = 0;
        if zero {
            bits |= Self::ZERO;
        }
        if greater_equal {
            bits |= Self::GREATER_EQUAL;
        }
        Flags(bits)
    }

    pub fn zero(self) -> bool {
        self.0 & Self::ZERO != 0
    }

    pub fn greater_equal(self) -> bool {
        self.0 & Self::GREATER_EQUAL != 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}{}]",
            if self.zero() { 'Z' } else { '-' },
            if self.greater_equal() { 'G' } else { '-' }
        )
    }
}

/// The `INT` control register.
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InterruptControl(pub u32);

impl InterruptControl {
    /// Global interrupt enable, toggled by `CLI`/`STI`.
    pub const ENABLED: u32 = 1 << 0;
    /// Timer runs while set; cleared when the timer fires.
    pub const TIMER_ENABLED: u32 = 1 << 1;
    /// Latched timer interrupt waiting for delivery.
    pub const TIMER_PENDING: u32 = 1 << 2;

    pub fn interrupts_enabled(self) -> bool {
        self.0 & Self::ENABLED != 0
    }

    pub fn timer_enabled(self) -> bool {
        self.0 & Self::TIMER_ENABLED != 0
    }

    pub fn timer_pending(self) -> bool {
        self.0 & Self::TIMER_PENDING != 0
    }

    pub fn set(&mut self, bit: u32, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for InterruptControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}{}{}]",
            if self.interrupts_enabled() { 'I' } else { '-' },
            if self.timer_enabled() { 'T' } else { '-' },
            if self.timer_pending() { 'P' } else { '-' }
        )
    }
}
