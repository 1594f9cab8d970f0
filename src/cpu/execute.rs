//! CPU execution engine for VM32.
//!
//! Implements the fetch-decode-execute cycle, interrupt delivery and the
//! trap-and-emulate VM-exit path.

use crate::cpu::alu::{self, AluOp, Condition};
use crate::cpu::console::Console;
use crate::cpu::decode::{decode, DecodeError, Instruction};
use crate::cpu::descriptor::HYPERVISOR_SLOT;
use crate::cpu::fault::{
    CpuError, Exception, ExecResult, Fault, TrapReason, INTERRUPT_VECTOR_BASE,
    INTERRUPT_VECTOR_STRIDE, INTR_DIV_BY_ZERO, INTR_HV_TRAP, INTR_INVALID_INSTR,
    INTR_PRIVILEGE_VIOL, INTR_SEG_VIOL, INTR_SOFTWARE, INTR_TIMER, MAX_INTERRUPT,
};
use crate::cpu::memory::{Memory, MemoryError};
use crate::cpu::registers::{SpecialRegister, FRAME_POINTER, REGISTER_COUNT};
use crate::cpu::state::{CpuState, SegmentRole};
use crate::isa::{Opcode, OperandType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// CPU is running normally.
    Running,
    /// CPU has halted (executed HALT in host mode).
    Halted,
    /// CPU stopped on a fatal error.
    Error,
}

/// Where an instruction's result is written back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget {
    Register(u8),
    /// Physical address.
    MemoryWord(u32),
    SpecialRegister(SpecialRegister),
}

/// An operand after addressing-mode resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOperand {
    pub value: u32,
    pub target: Option<WriteTarget>,
}

/// Everything a handler needs to know about the current instruction.
#[derive(Debug, Clone, Copy)]
pub struct Operands {
    pub opcode: Opcode,
    pub ip: u32,
    /// Address of the following instruction.
    pub next_ip: u32,
    pub first: Option<ResolvedOperand>,
    pub second: Option<ResolvedOperand>,
}

impl Operands {
    /// Value of operand 1. The decoder guarantees presence up to the arity.
    fn a(&self) -> u32 {
        self.first.map_or(0, |op| op.value)
    }

    /// Value of operand 2.
    fn b(&self) -> u32 {
        self.second.map_or(0, |op| op.value)
    }
}

/// How execution continues after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Fall through to `next_ip`.
    Next,
    Jump(u32),
    /// The handler already switched context (IP and all).
    Redirected,
    Halt,
}

/// Handler result: an optional value for operand 1 and the control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub result: Option<u32>,
    pub control: Control,
}

impl Outcome {
    fn next() -> Self {
        Self {
            result: None,
            control: Control::Next,
        }
    }

    fn value(result: u32) -> Self {
        Self {
            result: Some(result),
            control: Control::Next,
        }
    }

    fn jump(target: u32) -> Self {
        Self {
            result: None,
            control: Control::Jump(target),
        }
    }

    fn redirected() -> Self {
        Self {
            result: None,
            control: Control::Redirected,
        }
    }
}

type Handler = fn(&mut Cpu, &Operands) -> ExecResult<Outcome>;

/// The dispatch table.
fn handler(opcode: Opcode) -> Handler {
    match opcode {
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::Mod
        | Opcode::Or
        | Opcode::Xor
        | Opcode::Not
        | Opcode::And
        | Opcode::Shl
        | Opcode::Shr => Cpu::exec_alu,
        Opcode::Mov => Cpu::exec_mov,
        Opcode::Nop => Cpu::exec_nop,
        Opcode::Halt => Cpu::exec_halt,
        Opcode::Print => Cpu::exec_print,
        Opcode::Cmp => Cpu::exec_cmp,
        Opcode::Jmp | Opcode::Jz | Opcode::Jnz | Opcode::Jgt | Opcode::Jge => Cpu::exec_branch,
        Opcode::Call => Cpu::exec_call,
        Opcode::Ret => Cpu::exec_ret,
        Opcode::Retn => Cpu::exec_retn,
        Opcode::Push => Cpu::exec_push,
        Opcode::Pop => Cpu::exec_pop,
        Opcode::Enter => Cpu::exec_enter,
        Opcode::Leave => Cpu::exec_leave,
        Opcode::GetArgument => Cpu::exec_get_argument,
        Opcode::Int => Cpu::exec_int,
        Opcode::Reti => Cpu::exec_reti,
        Opcode::VmResume => Cpu::exec_vmresume,
        Opcode::Cli => Cpu::exec_cli,
        Opcode::Sti => Cpu::exec_sti,
    }
}

/// Turn a fault raised while pushing an interrupt frame into a double fault.
fn frame_error(number: u32) -> impl Fn(Exception) -> CpuError {
    move |e| match e {
        Exception::Fatal(err) => err,
        Exception::Fault(fault) => CpuError::DoubleFault {
            number,
            fault: Box::new(fault),
        },
    }
}

/// The VM32 CPU.
#[derive(Clone)]
pub struct Cpu {
    /// Architectural registers.
    pub state: CpuState,
    /// Physical memory.
    pub mem: Memory,
    /// Current execution state.
    pub run_state: RunState,
    /// Steps taken since reset.
    pub cycles: u64,
    console: Console,
    /// Last decoded instruction (for debugging).
    last_instr: Option<Instruction>,
}

impl Cpu {
    /// Create a CPU with empty memory that prints to stdout.
    pub fn new() -> Self {
        Self::with_console(Console::Stdout)
    }

    pub fn with_console(console: Console) -> Self {
        Self {
            state: CpuState::new(),
            mem: Memory::new(),
            run_state: RunState::Running,
            cycles: 0,
            console,
            last_instr: None,
        }
    }

    /// Create a CPU from a little-endian memory image.
    pub fn from_image(bytes: &[u8], console: Console) -> Result<Self, MemoryError> {
        let mut cpu = Self::with_console(console);
        cpu.mem = Memory::from_image(bytes)?;
        Ok(cpu)
    }

    /// Load words at physical address 0.
    pub fn load_image(&mut self, words: &[u32]) -> Result<(), MemoryError> {
        self.mem.write_blob(0, words)
    }

    /// Reset the architectural state. Memory is kept.
    pub fn reset(&mut self) {
        self.state.reset();
        self.run_state = RunState::Running;
        self.cycles = 0;
        self.last_instr = None;
    }

    /// Execute one step.
    ///
    /// Returns `Ok(true)` to keep going, `Ok(false)` once the CPU has halted
    /// and `Err` on a fatal error, after which the CPU stays stopped.
    pub fn step(&mut self) -> Result<bool, CpuError> {
        if self.run_state != RunState::Running {
            return Ok(false);
        }
        self.cycles += 1;

        match self.cycle() {
            Ok(()) => Ok(self.run_state == RunState::Running),
            Err(err) => {
                warn!(ip = self.state.ip, error = %err, "fatal error");
                self.run_state = RunState::Error;
                Err(err)
            }
        }
    }

    /// Run until halt or error.
    ///
    /// Returns the number of steps taken.
    pub fn run(&mut self) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;
        while self.step()? {}
        Ok(self.cycles - start_cycles)
    }

    /// Run for at most `max_steps` steps.
    pub fn run_limited(&mut self, max_steps: u64) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;
        let limit = self.cycles.saturating_add(max_steps);
        while self.cycles < limit && self.step()? {}
        Ok(self.cycles - start_cycles)
    }

    fn cycle(&mut self) -> Result<(), CpuError> {
        if self.state.timer_pending() && self.state.interrupts_enabled() {
            self.state.clear_timer_pending();
            let ip = self.state.ip;
            return self.raise_interrupt(INTR_TIMER, ip, &[]);
        }
        self.state.tick_timer();

        let ip = self.state.ip;
        match self.execute_at(ip) {
            Ok(()) => Ok(()),
            Err(Exception::Fatal(err)) => Err(err),
            Err(Exception::Fault(fault)) => self.deliver_fault(fault, ip),
        }
    }

    /// Route a fault to its interrupt, or straight to a VM-exit.
    fn deliver_fault(&mut self, fault: Fault, ip: u32) -> Result<(), CpuError> {
        debug!(ip, %fault, "fault");
        match fault {
            Fault::SegmentViolation { kind, offset } => {
                self.raise_interrupt(INTR_SEG_VIOL, ip, &[offset, kind.code()])
            }
            Fault::InvalidInstruction(_) | Fault::InvalidVmSlot(_) => {
                self.raise_interrupt(INTR_INVALID_INSTR, ip, &[])
            }
            Fault::DivideByZero => self.raise_interrupt(INTR_DIV_BY_ZERO, ip, &[]),
            Fault::PrivilegeViolation { .. } => self.raise_interrupt(INTR_PRIVILEGE_VIOL, ip, &[]),
            Fault::SoftwareInterrupt { number, return_ip } => {
                self.raise_interrupt(INTR_SOFTWARE, return_ip, &[number])
            }
            Fault::VmTrap {
                reason,
                resume_ip,
                extra,
            } => self.vm_exit(INTR_HV_TRAP, reason, resume_ip, &extra),
        }
    }

    // ==================== Interrupts & VM-exit ====================

    /// Deliver interrupt `number`.
    ///
    /// In host mode `extra` and then `return_ip` are pushed and execution
    /// continues at the interrupt vector. In a guest the interrupt becomes a
    /// VM-exit to the hypervisor.
    pub fn raise_interrupt(&mut self, number: u32, return_ip: u32, extra: &[u32]) -> Result<(), CpuError> {
        if number > MAX_INTERRUPT {
            return Err(CpuError::InterruptOutOfRange(number));
        }
        if self.state.in_vm() {
            let reason = TrapReason::from_interrupt(number);
            return self.vm_exit(number, reason, return_ip, extra);
        }

        debug!(number, return_ip, "interrupt");
        for &word in extra.iter().chain(std::iter::once(&return_ip)) {
            self.push(word).map_err(frame_error(number))?;
        }
        self.state.ip = INTERRUPT_VECTOR_BASE + number * INTERRUPT_VECTOR_STRIDE;
        Ok(())
    }

    /// Leave the running guest and report `reason` to the hypervisor.
    ///
    /// The guest is saved with `resume_ip`; the hypervisor finds `extra`, the
    /// reason and the guest id on its stack, guest id on top.
    pub fn raise_vm_exit(&mut self, reason: TrapReason, resume_ip: u32, extra: &[u32]) -> Result<(), CpuError> {
        self.vm_exit(INTR_HV_TRAP, reason, resume_ip, extra)
    }

    fn vm_exit(&mut self, number: u32, reason: TrapReason, resume_ip: u32, extra: &[u32]) -> Result<(), CpuError> {
        if !self.state.in_vm() {
            return Err(CpuError::NotInGuest);
        }
        let guest = self.state.vm_id();
        self.state.ip = resume_ip;
        self.state.save_vm_slot(&mut self.mem, guest)?;
        self.state.leave_vm(&self.mem)?;
        debug!(guest, ?reason, resume_ip, "VM exit");

        for &word in extra.iter().chain(&[reason.code(), guest]) {
            self.push(word).map_err(frame_error(number))?;
        }
        Ok(())
    }

    // ==================== Fetch / decode / resolve ====================

    fn execute_at(&mut self, ip: u32) -> ExecResult<()> {
        let phys = self.state.translate_instruction(&self.mem, ip)?;
        let word = self.mem.read_word(u64::from(phys))?;
        let instr = decode(word)?;
        self.last_instr = Some(instr);
        trace!(ip, opcode = %instr.opcode, "execute {word:#010x}");

        let required = instr.required_privilege;
        if u32::from(required) > self.state.privilege_level {
            return Err(Fault::PrivilegeViolation {
                required,
                current: self.state.privilege_level,
            }
            .into());
        }

        let mut cursor = ip.wrapping_add(1);
        let first = self.resolve(&instr, 0, ip, &mut cursor)?;
        let second = self.resolve(&instr, 1, ip, &mut cursor)?;
        let ops = Operands {
            opcode: instr.opcode,
            ip,
            next_ip: cursor,
            first,
            second,
        };

        let outcome = handler(instr.opcode)(self, &ops)?;

        if let Some(value) = outcome.result {
            let target = ops
                .first
                .and_then(|op| op.target)
                .ok_or(CpuError::MissingWriteTarget { opcode: ops.opcode })?;
            self.write_back(target, value)?;
        }

        match outcome.control {
            Control::Next => self.state.ip = ops.next_ip,
            Control::Jump(target) => self.state.ip = target,
            Control::Redirected => {}
            Control::Halt => {
                self.state.ip = ops.next_ip;
                self.run_state = RunState::Halted;
                info!(ip, cycles = self.cycles, "halted");
            }
        }
        Ok(())
    }

    /// Fetch the extra word at `cursor` through CS and advance it.
    fn fetch_extra(&mut self, cursor: &mut u32) -> ExecResult<u32> {
        let phys = self.state.translate_instruction(&self.mem, *cursor)?;
        *cursor = cursor.wrapping_add(1);
        Ok(self.mem.read_word(u64::from(phys))?)
    }

    fn resolve(
        &mut self,
        instr: &Instruction,
        position: usize,
        ip: u32,
        cursor: &mut u32,
    ) -> ExecResult<Option<ResolvedOperand>> {
        let Some(desc) = instr.operands[position] else {
            return Ok(None);
        };

        let resolved = match desc.kind {
            OperandType::Immediate => ResolvedOperand {
                value: self.fetch_extra(cursor)?,
                target: None,
            },
            OperandType::Register => ResolvedOperand {
                value: self.state.read_register(&self.mem, desc.register)?,
                target: Some(WriteTarget::Register(desc.register)),
            },
            OperandType::SpecialRegister => {
                let reg = SpecialRegister::from_index(desc.register)
                    .ok_or(DecodeError::UnknownSpecialRegister(desc.register))?;
                if self.state.in_vm() {
                    // Only MOV takes special registers (MOV_DESTINATION/MOV_SOURCE
                    // in isa.rs), so operand 1 is a write and operand 2 a read.
                    let reason = if position == 0 {
                        TrapReason::SpecialRegisterWrite
                    } else {
                        TrapReason::SpecialRegisterRead
                    };
                    return Err(Fault::VmTrap {
                        reason,
                        resume_ip: ip,
                        extra: vec![u32::from(reg.index())],
                    }
                    .into());
                }
                ResolvedOperand {
                    value: self.state.read_special(reg),
                    target: Some(WriteTarget::SpecialRegister(reg)),
                }
            }
            kind => {
                let role = match kind {
                    OperandType::MemorySingleDs | OperandType::MemoryDoubleDs => SegmentRole::Data,
                    _ => SegmentRole::ExtraData,
                };
                let literal = self.fetch_extra(cursor)?;
                let base = match desc.base_register() {
                    Some(r) => self.state.read_register(&self.mem, r)?,
                    None => 0,
                };
                let mut addr = self.state.translate(&self.mem, role, literal.wrapping_add(base))?;
                if matches!(kind, OperandType::MemoryDoubleDs | OperandType::MemoryDoubleEs) {
                    let pointer = self.mem.read_word(u64::from(addr))?;
                    addr = self.state.translate(&self.mem, role, pointer)?;
                }
                ResolvedOperand {
                    value: self.mem.read_word(u64::from(addr))?,
                    target: Some(WriteTarget::MemoryWord(addr)),
                }
            }
        };
        Ok(Some(resolved))
    }

    fn write_back(&mut self, target: WriteTarget, value: u32) -> ExecResult<()> {
        match target {
            WriteTarget::Register(index) => self.state.write_register(&mut self.mem, index, value),
            WriteTarget::MemoryWord(addr) => {
                self.mem.write_word(u64::from(addr), u64::from(value))?;
                Ok(())
            }
            WriteTarget::SpecialRegister(reg) => {
                self.state.write_special(reg, value);
                Ok(())
            }
        }
    }

    // ==================== Stack ====================

    /// Pre-decrement push. SP only moves once the write succeeded.
    fn push(&mut self, value: u32) -> ExecResult<()> {
        let sp = self.state.sp.wrapping_sub(1);
        let addr = self.state.translate_stack(&self.mem, sp)?;
        self.mem.write_word(u64::from(addr), u64::from(value))?;
        self.state.sp = sp;
        Ok(())
    }

    /// Post-increment pop.
    fn pop(&mut self) -> ExecResult<u32> {
        let sp = self.state.sp;
        let addr = self.state.translate_stack(&self.mem, sp)?;
        let value = self.mem.read_word(u64::from(addr))?;
        self.state.sp = sp.wrapping_add(1);
        Ok(value)
    }

    // ==================== Handlers ====================

    fn exec_alu(&mut self, ops: &Operands) -> ExecResult<Outcome> {
        let op = AluOp::from_opcode(ops.opcode).ok_or(CpuError::NoHandler { opcode: ops.opcode })?;
        Ok(Outcome::value(alu::evaluate(op, ops.a(), ops.b())?))
    }

    fn exec_mov(&mut self, ops: &Operands) -> ExecResult<Outcome> {
        Ok(Outcome::value(ops.b()))
    }

    fn exec_nop(&mut self, _ops: &Operands) -> ExecResult<Outcome> {
        Ok(Outcome::next())
    }

    fn exec_halt(&mut self, ops: &Operands) -> ExecResult<Outcome> {
        if self.state.in_vm() {
            return Err(Fault::VmTrap {
                reason: TrapReason::Halt,
                resume_ip: ops.next_ip,
                extra: Vec::new(),
            }
            .into());
        }
        Ok(Outcome {
            result: None,
            control: Control::Halt,
        })
    }

    fn exec_print(&mut self, ops: &Operands) -> ExecResult<Outcome> {
        let value = ops.a();
        if self.state.in_vm() {
            return Err(Fault::VmTrap {
                reason: TrapReason::HardwareAccess,
                resume_ip: ops.next_ip,
                extra: vec![value],
            }
            .into());
        }
        self.console.emit(value)?;
        Ok(Outcome::next())
    }

    fn exec_cmp(&mut self, ops: &Operands) -> ExecResult<Outcome> {
        self.state.flags = alu::compare(ops.a(), ops.b());
        Ok(Outcome::next())
    }

    fn exec_branch(&mut self, ops: &Operands) -> ExecResult<Outcome> {
        let cond = Condition::from_opcode(ops.opcode).ok_or(CpuError::NoHandler { opcode: ops.opcode })?;
        if alu::branch_taken(cond, self.state.flags) {
            Ok(Outcome::jump(ops.a()))
        } else {
            Ok(Outcome::next())
        }
    }

    fn exec_call(&mut self, ops: &Operands) -> ExecResult<Outcome> {
        self.push(ops.next_ip)?;
        Ok(Outcome::jump(ops.a()))
    }

    fn exec_ret(&mut self, _ops: &Operands) -> ExecResult<Outcome> {
        let ip = self.pop()?;
        Ok(Outcome::jump(ip))
    }

    /// Return and drop `n` argument words.
    fn exec_retn(&mut self, ops: &Operands) -> ExecResult<Outcome> {
        let ip = self.pop()?;
        self.state.sp = self.state.sp.wrapping_add(ops.a());
        Ok(Outcome::jump(ip))
    }

    fn exec_push(&mut self, ops: &Operands) -> ExecResult<Outcome> {
        self.push(ops.a())?;
        Ok(Outcome::next())
    }

    fn exec_pop(&mut self, _ops: &Operands) -> ExecResult<Outcome> {
        Ok(Outcome::value(self.pop()?))
    }

    fn exec_enter(&mut self, ops: &Operands) -> ExecResult<Outcome> {
        let fp = self.state.read_register(&self.mem, FRAME_POINTER)?;
        self.push(fp)?;
        let sp = self.state.sp;
        self.state.write_register(&mut self.mem, FRAME_POINTER, sp)?;
        self.state.sp = sp.wrapping_sub(ops.a());
        Ok(Outcome::next())
    }

    fn exec_leave(&mut self, _ops: &Operands) -> ExecResult<Outcome> {
        self.state.sp = self.state.read_register(&self.mem, FRAME_POINTER)?;
        let fp = self.pop()?;
        self.state.write_register(&mut self.mem, FRAME_POINTER, fp)?;
        Ok(Outcome::next())
    }

    /// Argument `n` sits above the saved frame pointer and return address.
    fn exec_get_argument(&mut self, ops: &Operands) -> ExecResult<Outcome> {
        let fp = self.state.read_register(&self.mem, FRAME_POINTER)?;
        let offset = fp.wrapping_add(2).wrapping_add(ops.b());
        let addr = self.state.translate_stack(&self.mem, offset)?;
        Ok(Outcome::value(self.mem.read_word(u64::from(addr))?))
    }

    fn exec_int(&mut self, ops: &Operands) -> ExecResult<Outcome> {
        Err(Fault::SoftwareInterrupt {
            number: ops.a(),
            return_ip: ops.next_ip,
        }
        .into())
    }

    fn exec_reti(&mut self, _ops: &Operands) -> ExecResult<Outcome> {
        let ip = self.pop()?;
        Ok(Outcome::jump(ip))
    }

    fn exec_vmresume(&mut self, ops: &Operands) -> ExecResult<Outcome> {
        let id = ops.a();
        if self.state.in_vm() {
            return Err(Fault::VmTrap {
                reason: TrapReason::VmResume,
                resume_ip: ops.ip,
                extra: vec![id],
            }
            .into());
        }
        let slots = self.state.vm_slots(&self.mem)?.len();
        if id == HYPERVISOR_SLOT || id as usize >= slots {
            return Err(Fault::InvalidVmSlot(id).into());
        }

        self.state.ip = ops.next_ip;
        self.state.save_hypervisor_slot(&mut self.mem)?;
        self.state.enter_vm(&self.mem, id)?;
        Ok(Outcome::redirected())
    }

    fn set_interrupts(&mut self, ops: &Operands, on: bool) -> ExecResult<Outcome> {
        if self.state.in_vm() {
            return Err(Fault::VmTrap {
                reason: TrapReason::SpecialRegisterWrite,
                resume_ip: ops.ip,
                extra: vec![u32::from(SpecialRegister::Int.index())],
            }
            .into());
        }
        self.state.set_interrupts_enabled(on);
        Ok(Outcome::next())
    }

    fn exec_cli(&mut self, ops: &Operands) -> ExecResult<Outcome> {
        self.set_interrupts(ops, false)
    }

    fn exec_sti(&mut self, ops: &Operands) -> ExecResult<Outcome> {
        self.set_interrupts(ops, true)
    }

    // ==================== Collaborator API ====================

    /// Read general-purpose register `index` through the current mapping.
    pub fn register(&mut self, index: u8) -> ExecResult<u32> {
        self.state.read_register(&self.mem, index)
    }

    pub fn set_register(&mut self, index: u8, value: u32) -> ExecResult<()> {
        self.state.write_register(&mut self.mem, index, value)
    }

    pub fn special_register(&self, reg: SpecialRegister) -> u32 {
        self.state.read_special(reg)
    }

    pub fn set_special_register(&mut self, reg: SpecialRegister, value: u32) {
        self.state.write_special(reg, value);
    }

    /// Physical address of the next instruction.
    pub fn resulting_instruction_address(&mut self) -> ExecResult<u32> {
        self.state.resulting_instruction_address(&self.mem)
    }

    /// Physical address of the top of the stack.
    pub fn resulting_stack_address(&mut self) -> ExecResult<u32> {
        self.state.resulting_stack_address(&self.mem)
    }

    /// Architectural state as pretty JSON.
    ///
    /// Registers that cannot be read through the current mapping are `null`.
    pub fn dump_state(&mut self) -> Result<String, serde_json::Error> {
        let registers: Vec<Option<u32>> = (0..REGISTER_COUNT)
            .map(|i| self.state.read_register(&self.mem, i).ok())
            .collect();
        let dump = StateDump {
            run_state: self.run_state,
            cycles: self.cycles,
            in_vm: self.state.in_vm(),
            vm_id: self.state.vm_id(),
            segtbl: self.state.read_special(SpecialRegister::SegTbl),
            vmtbl: self.state.read_special(SpecialRegister::VmTbl),
            state: &self.state,
            registers,
        };
        serde_json::to_string_pretty(&dump)
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    /// Drain captured console output.
    pub fn take_console_output(&mut self) -> Vec<u8> {
        self.console.take()
    }

    /// Get the last decoded instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Check if the CPU is halted.
    pub fn is_halted(&self) -> bool {
        self.run_state == RunState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.run_state == RunState::Running
    }
}

#[derive(Serialize)]
struct StateDump<'a> {
    run_state: RunState,
    cycles: u64,
    in_vm: bool,
    vm_id: u32,
    segtbl: u32,
    vmtbl: u32,
    state: &'a CpuState,
    registers: Vec<Option<u32>>,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("run_state", &self.run_state)
            .field("cycles", &self.cycles)
            .field("state", &self.state)
            .field("mem", &self.mem)
            .finish()
    }
}
