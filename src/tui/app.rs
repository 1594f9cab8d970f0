//! Debugger application state and logic.

use crate::asm::disasm::disassemble_instruction;
use crate::cpu::registers::REGISTER_COUNT;
use crate::{Console, Cpu};
use std::collections::HashSet;

/// Longest instruction in words.
const MAX_INSTRUCTION_WORDS: usize = 3;

/// Debugger application state.
pub struct DebuggerApp {
    /// The CPU being debugged.
    pub cpu: Cpu,
    /// Original image for reset.
    pub image: Vec<u32>,
    /// Breakpoints (by physical address).
    pub breakpoints: HashSet<u32>,
    /// Is the debugger running continuously?
    pub running: bool,
    /// Should we quit?
    pub should_quit: bool,
    /// Status message to display.
    pub status: String,
    /// First physical address shown in the memory view.
    pub mem_scroll: u32,
    /// Console output collected so far.
    pub output: String,
}

impl DebuggerApp {
    /// Create a new debugger with a loaded image.
    pub fn new(image: Vec<u32>) -> Self {
        let mut app = Self {
            cpu: Cpu::with_console(Console::capture()),
            image,
            breakpoints: HashSet::new(),
            running: false,
            should_quit: false,
            status: String::new(),
            mem_scroll: 0,
            output: String::new(),
        };
        app.reset();
        app.status = "Ready. Press 's' to step, 'r' to run, 'q' to quit.".into();
        app
    }

    /// Physical address of the next instruction, if the current mapping allows it.
    pub fn current_address(&mut self) -> Option<u32> {
        self.cpu.resulting_instruction_address().ok()
    }

    /// Step once.
    pub fn step(&mut self) {
        if !self.cpu.is_running() {
            self.status = format!("CPU stopped: {:?}", self.cpu.run_state);
            self.running = false;
            return;
        }

        let ip = self.cpu.state.ip;
        let text = self
            .current_address()
            .map(|addr| self.disassemble_at(addr).0)
            .unwrap_or_else(|| "??".into());
        match self.cpu.step() {
            Ok(_) => {
                self.status = format!("IP={:#010x}: {}", ip, text);
            }
            Err(e) => {
                self.status = format!("Error: {}", e);
                self.running = false;
            }
        }
        self.collect_output();
    }

    /// Run until halt, breakpoint, or error.
    pub fn run(&mut self) {
        self.running = true;
        self.status = "Running...".into();
    }

    /// Run one iteration of continuous execution.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }

        if !self.cpu.is_running() {
            self.running = false;
            self.status = format!("Stopped after {} cycles", self.cpu.cycles);
            return;
        }

        if let Some(addr) = self.current_address() {
            if self.breakpoints.contains(&addr) {
                self.running = false;
                self.status = format!("Breakpoint at {:#010x}", addr);
                return;
            }
        }

        self.step();
    }

    /// Toggle breakpoint at the current instruction.
    pub fn toggle_breakpoint(&mut self) {
        let Some(addr) = self.current_address() else {
            self.status = "Current IP is not mapped".into();
            return;
        };
        if self.breakpoints.remove(&addr) {
            self.status = format!("Removed breakpoint at {:#010x}", addr);
        } else {
            self.breakpoints.insert(addr);
            self.status = format!("Set breakpoint at {:#010x}", addr);
        }
    }

    /// Reset CPU and memory to the loaded image.
    pub fn reset(&mut self) {
        self.cpu = Cpu::with_console(Console::capture());
        if let Err(e) = self.cpu.load_image(&self.image) {
            self.status = format!("Error: {}", e);
        } else {
            self.status = "Reset. Ready.".into();
        }
        self.running = false;
        self.output.clear();
    }

    /// Disassembly starting at the current instruction.
    ///
    /// Instructions are variable length, so the listing only runs forward.
    pub fn get_disassembly(&mut self, lines: usize) -> Vec<(u32, String, bool)> {
        let Some(start) = self.current_address() else {
            return Vec::new();
        };

        let mut addr = start;
        let mut listing = Vec::with_capacity(lines);
        for _ in 0..lines {
            let (text, len) = self.disassemble_at(addr);
            listing.push((addr, text, addr == start));
            match addr.checked_add(len.max(1) as u32) {
                Some(next) => addr = next,
                None => break,
            }
        }
        listing
    }

    /// General-purpose registers through the current mapping.
    pub fn registers(&mut self) -> Vec<Option<u32>> {
        (0..REGISTER_COUNT).map(|i| self.cpu.register(i).ok()).collect()
    }

    fn disassemble_at(&self, addr: u32) -> (String, usize) {
        let words: Vec<u32> = (0..MAX_INSTRUCTION_WORDS as u64)
            .map_while(|i| self.cpu.mem.read_word(u64::from(addr) + i).ok())
            .collect();
        disassemble_instruction(&words)
    }

    fn collect_output(&mut self) {
        let bytes = self.cpu.take_console_output();
        self.output.push_str(&String::from_utf8_lossy(&bytes));
    }
}

/// Run the debugger with an image.
pub fn run_debugger(image: Vec<u32>) -> std::io::Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEventKind},
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
        ExecutableCommand,
    };
    use ratatui::prelude::*;
    use std::io::stdout;
    use std::time::Duration;

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut app = DebuggerApp::new(image);

    loop {
        terminal.draw(|frame| {
            super::ui::draw(frame, &mut app);
        })?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') => app.should_quit = true,
                        KeyCode::Char('s') => {
                            app.running = false;
                            app.step();
                        }
                        KeyCode::Char('r') => app.run(),
                        KeyCode::Char('p') => {
                            app.running = false;
                            app.status = "Paused.".into();
                        }
                        KeyCode::Char('b') => app.toggle_breakpoint(),
                        KeyCode::Char('x') => app.reset(),
                        KeyCode::Up => app.mem_scroll = app.mem_scroll.saturating_sub(1),
                        KeyCode::Down => app.mem_scroll = app.mem_scroll.saturating_add(1),
                        KeyCode::PageUp => app.mem_scroll = app.mem_scroll.saturating_sub(0x10),
                        KeyCode::PageDown => app.mem_scroll = app.mem_scroll.saturating_add(0x10),
                        _ => {}
                    }
                }
            }
        }

        // Several steps per frame while running
        for _ in 0..64 {
            if !app.running {
                break;
            }
            app.tick();
        }

        if app.should_quit {
            break;
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::encode::{imm, reg, Program};
    use crate::isa::Opcode;

    fn hello() -> Vec<u32> {
        let mut p = Program::new();
        p.emit(Opcode::Print, &[imm(u32::from(b'o'))]).unwrap();
        p.emit(Opcode::Print, &[imm(u32::from(b'k'))]).unwrap();
        p.emit(Opcode::Mov, &[reg(0), imm(1)]).unwrap();
        p.emit(Opcode::Halt, &[]).unwrap();
        p.into_words()
    }

    #[test]
    fn test_step_collects_output() {
        let mut app = DebuggerApp::new(hello());
        app.step();
        app.step();
        assert_eq!(app.output, "ok");
        assert!(app.status.contains("PRINT 0x6b"));
    }

    #[test]
    fn test_breakpoint_stops_run() {
        let mut app = DebuggerApp::new(hello());
        app.step();
        app.step();
        app.toggle_breakpoint();
        assert!(app.breakpoints.contains(&4));
        app.reset();
        app.run();
        for _ in 0..10 {
            app.tick();
        }
        assert_eq!(app.cpu.state.ip, 4);
        assert!(!app.running);
        assert!(app.status.contains("Breakpoint"));
    }

    #[test]
    fn test_disassembly_runs_forward() {
        let mut app = DebuggerApp::new(hello());
        let listing = app.get_disassembly(4);
        let addrs: Vec<u32> = listing.iter().map(|(a, _, _)| *a).collect();
        assert_eq!(addrs, vec![0, 2, 4, 6]);
        assert!(listing[0].2);
        assert_eq!(listing[3].1, "HALT");
    }
}
