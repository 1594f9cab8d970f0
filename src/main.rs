//! VM32 Simulator - CLI Entry Point
//!
//! Commands:
//! - `vm32-sim run <image>` - Run a memory image until it halts
//! - `vm32-sim debug <image>` - Interactive debugger
//! - `vm32-sim disasm <image>` - Disassemble an image
//! - `vm32-sim test` - Built-in self-test

use clap::{Parser, Subcommand};
use tracing::Level;

#[derive(Parser)]
#[command(name = "vm32-sim")]
#[command(version)]
#[command(about = "Instruction-set simulator for the VM32 segmented, virtualizable 32-bit CPU")]
struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an image until it halts
    Run {
        /// Path to the little-endian word image, loaded at address 0
        image: String,
        /// Maximum number of steps to run
        #[arg(short, long, default_value = "1000000")]
        max_steps: u64,
        /// Print each instruction before it executes
        #[arg(short, long)]
        trace: bool,
        /// Print the final architectural state as JSON
        #[arg(long)]
        dump_state: bool,
    },
    /// Interactive debugger
    Debug {
        /// Path to the image to debug
        image: String,
    },
    /// Disassemble an image to readable text
    Disasm {
        /// Path to the image
        image: String,
        /// Address of the first word
        #[arg(short, long, default_value = "0", value_parser = parse_address)]
        base: u32,
    },
    /// Run the built-in self-test
    Test,
}

fn parse_address(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => Level::WARN,
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Some(Commands::Run { image, max_steps, trace, dump_state }) => {
            run_image(&image, max_steps, trace, dump_state);
        }
        Some(Commands::Debug { image }) => {
            debug_image(&image);
        }
        Some(Commands::Disasm { image, base }) => {
            disassemble_file(&image, base);
        }
        Some(Commands::Test) => {
            run_self_test();
        }
        None => {
            println!("VM32 Simulator v{}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Use --help for available commands");
        }
    }
}

fn load_or_exit(path: &str) -> Vec<u32> {
    match vm32::load_image(path) {
        Ok(words) if words.is_empty() => {
            eprintln!("Error: {} is empty", path);
            std::process::exit(1);
        }
        Ok(words) => words,
        Err(e) => {
            eprintln!("Error: failed to load {}: {}", path, e);
            std::process::exit(1);
        }
    }
}

fn run_image(path: &str, max_steps: u64, trace: bool, dump_state: bool) {
    use vm32::Cpu;
    use vm32::asm::disasm::disassemble_instruction;

    let words = load_or_exit(path);
    tracing::info!(path, words = words.len(), "loaded image");

    let mut cpu = Cpu::new();
    if let Err(e) = cpu.load_image(&words) {
        eprintln!("Error: failed to load image: {}", e);
        std::process::exit(1);
    }

    let mut steps = 0u64;
    let mut failed = false;
    while cpu.is_running() && steps < max_steps {
        if trace {
            let text = cpu
                .resulting_instruction_address()
                .ok()
                .and_then(|addr| cpu.mem.read_range(u64::from(addr), 3).ok())
                .map_or_else(|| "??".to_string(), |w| disassemble_instruction(&w).0);
            eprintln!("{:08x}  {}", cpu.state.ip, text);
        }
        steps += 1;
        if let Err(e) = cpu.step() {
            eprintln!("Error: CPU stopped at IP={:#010x}: {}", cpu.state.ip, e);
            failed = true;
            break;
        }
    }

    if dump_state {
        match cpu.dump_state() {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error: failed to serialize state: {}", e),
        }
    } else {
        eprintln!();
        eprintln!("{}", cpu.state);
        eprintln!("Cycles: {}  State: {:?}", cpu.cycles, cpu.run_state);
    }

    if cpu.is_running() && steps >= max_steps {
        eprintln!("Reached step limit ({}). Use --max-steps to increase.", max_steps);
    }
    if failed {
        std::process::exit(1);
    }
}

#[cfg(feature = "tui")]
fn debug_image(path: &str) {
    let words = load_or_exit(path);
    if let Err(e) = vm32::run_debugger(words) {
        eprintln!("Error: debugger failed: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "tui"))]
fn debug_image(_path: &str) {
    eprintln!("Error: built without the `tui` feature");
    std::process::exit(1);
}

fn disassemble_file(path: &str, base: u32) {
    let words = load_or_exit(path);
    print!("{}", vm32::disassemble(&words, base));
}

/// One self-test case: builds an image, runs it and checks the result.
struct Check {
    name: &'static str,
    run: fn() -> Result<(), String>,
}

fn run_self_test() {
    let checks = [
        Check { name: "HALT stops the CPU", run: check_halt },
        Check { name: "arithmetic wraps modulo 2^32", run: check_wrapping_add },
        Check { name: "CALL/RET with stack frame", run: check_call_frame },
        Check { name: "divide by zero interrupt", run: check_divide_by_zero },
        Check { name: "console output", run: check_print },
        Check { name: "guest PRINT exits to hypervisor", run: check_vm_exit },
    ];

    println!("VM32 Simulator Self-Test");
    println!();

    let mut failed = 0;
    for check in &checks {
        match (check.run)() {
            Ok(()) => println!("  ok    {}", check.name),
            Err(reason) => {
                println!("  FAIL  {}: {}", check.name, reason);
                failed += 1;
            }
        }
    }

    println!();
    println!("Results: {} passed, {} failed", checks.len() - failed, failed);
    if failed != 0 {
        std::process::exit(1);
    }
}

mod self_test {
    pub use vm32::asm::encode::{ds, imm, reg, special, EncodeError, Program};
    pub use vm32::isa::Opcode;
    pub use vm32::{Console, Cpu};

    pub fn build(f: impl FnOnce(&mut Program) -> Result<(), EncodeError>) -> Result<Program, String> {
        let mut p = Program::new();
        f(&mut p).map_err(|e| e.to_string())?;
        Ok(p)
    }

    pub fn run(p: &Program) -> Result<Cpu, String> {
        let mut cpu = Cpu::with_console(Console::capture());
        cpu.load_image(p.words()).map_err(|e| e.to_string())?;
        cpu.run_limited(10_000).map_err(|e| e.to_string())?;
        if !cpu.is_halted() {
            return Err(format!("did not halt, IP={:#x}", cpu.state.ip));
        }
        Ok(cpu)
    }

    pub fn expect(what: &str, got: u32, want: u32) -> Result<(), String> {
        if got == want {
            Ok(())
        } else {
            Err(format!("{} = {:#x}, expected {:#x}", what, got, want))
        }
    }

    pub fn register(cpu: &mut Cpu, index: u8) -> Result<u32, String> {
        cpu.register(index).map_err(|e| e.to_string())
    }

    pub fn memory(cpu: &Cpu, addr: u32) -> Result<u32, String> {
        cpu.mem.read_word(u64::from(addr)).map_err(|e| e.to_string())
    }
}

fn check_halt() -> Result<(), String> {
    use self_test::*;
    let p = build(|p| p.emit(Opcode::Halt, &[]).map(drop))?;
    let cpu = run(&p)?;
    expect("IP", cpu.state.ip, 0)
}

fn check_wrapping_add() -> Result<(), String> {
    use self_test::*;
    let p = build(|p| {
        p.emit(Opcode::Mov, &[reg(0), imm(0xFFFF_FFFF)])?;
        p.emit(Opcode::Add, &[reg(0), imm(2)])?;
        p.emit(Opcode::Halt, &[])?;
        Ok(())
    })?;
    let mut cpu = run(&p)?;
    expect("r0", register(&mut cpu, 0)?, 1)
}

fn check_call_frame() -> Result<(), String> {
    use self_test::*;
    let p = build(|p| {
        p.emit(Opcode::Push, &[imm(40)])?;
        p.emit(Opcode::Push, &[imm(2)])?;
        p.emit(Opcode::Call, &[imm(0x10)])?;
        p.emit(Opcode::Halt, &[])?;
        p.pad_to(0x10);
        p.emit(Opcode::Enter, &[imm(0)])?;
        p.emit(Opcode::GetArgument, &[reg(0), imm(0)])?;
        p.emit(Opcode::GetArgument, &[reg(1), imm(1)])?;
        p.emit(Opcode::Add, &[reg(0), reg(1)])?;
        p.emit(Opcode::Leave, &[])?;
        p.emit(Opcode::Retn, &[imm(2)])?;
        Ok(())
    })?;
    let mut cpu = run(&p)?;
    expect("r0", register(&mut cpu, 0)?, 42)?;
    expect("SP", cpu.state.sp, 0x2000)
}

fn check_divide_by_zero() -> Result<(), String> {
    use self_test::*;
    // Vector 3 jumps to a handler that records the fault and halts.
    let p = build(|p| {
        p.emit(Opcode::Jmp, &[imm(0x10)])?;
        p.pad_to(6);
        p.emit(Opcode::Jmp, &[imm(0x20)])?;
        p.pad_to(0x10);
        p.emit(Opcode::Mov, &[reg(0), imm(7)])?;
        p.emit(Opcode::Div, &[reg(0), imm(0)])?;
        p.emit(Opcode::Halt, &[])?;
        p.pad_to(0x20);
        p.emit(Opcode::Mov, &[ds(0x100), imm(0xD0)])?;
        p.emit(Opcode::Halt, &[])?;
        Ok(())
    })?;
    let mut cpu = run(&p)?;
    expect("r0", register(&mut cpu, 0)?, 7)?;
    expect("mem[0x100]", memory(&cpu, 0x100)?, 0xD0)
}

fn check_print() -> Result<(), String> {
    use self_test::*;
    let p = build(|p| {
        for byte in *b"VM32" {
            p.emit(Opcode::Print, &[imm(u32::from(byte))])?;
        }
        p.emit(Opcode::Halt, &[])?;
        Ok(())
    })?;
    let cpu = run(&p)?;
    if cpu.console().captured() == b"VM32" {
        Ok(())
    } else {
        Err(format!("output {:?}", String::from_utf8_lossy(cpu.console().captured())))
    }
}

fn check_vm_exit() -> Result<(), String> {
    use self_test::*;
    use vm32::cpu::descriptor::VmDescriptor;
    use vm32::cpu::registers::SpecialRegister;

    const VMTBL: u32 = 0x400;
    const GUEST: u32 = 0x100;

    // The hypervisor enters guest 1, which prints once. The exit lands after
    // VMRESUME with [value, reason, guest id] on the stack.
    let p = build(|p| {
        p.emit(Opcode::Mov, &[special(SpecialRegister::VmTbl), imm(VMTBL)])?;
        p.emit(Opcode::VmResume, &[imm(1)])?;
        p.emit(Opcode::Pop, &[reg(0)])?;
        p.emit(Opcode::Pop, &[reg(1)])?;
        p.emit(Opcode::Pop, &[reg(2)])?;
        p.emit(Opcode::Halt, &[])?;
        p.pad_to(GUEST);
        p.emit(Opcode::Print, &[imm(u32::from(b'!'))])?;
        p.emit(Opcode::Halt, &[])?;
        Ok(())
    })?;

    let mut image = p.into_words();
    let guest = VmDescriptor {
        ip: GUEST,
        sp: 0x3000,
        ..VmDescriptor::default()
    };
    let mut table = vec![0u32; 9];
    table.extend(guest.to_row());
    table.push(0xFFFF_FFFF);
    image.resize(VMTBL as usize, 0xFFFF_FFFF);
    image.extend(table);

    let mut cpu = Cpu::with_console(Console::capture());
    cpu.load_image(&image).map_err(|e| e.to_string())?;
    cpu.run_limited(100).map_err(|e| e.to_string())?;
    if !cpu.is_halted() {
        return Err(format!("did not halt, IP={:#x}", cpu.state.ip));
    }
    expect("guest id", register(&mut cpu, 0)?, 1)?;
    expect("reason", register(&mut cpu, 1)?, 9)?;
    expect("value", register(&mut cpu, 2)?, u32::from(b'!'))
}
