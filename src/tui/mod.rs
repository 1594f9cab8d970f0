//! TUI debugger for the VM32 simulator.
//!
//! Provides an interactive terminal-based debugger with:
//! - General-purpose and control register views
//! - Physical memory view
//! - Step/run/breakpoint controls
//! - Disassembly view and captured console output

mod app;
mod ui;

pub use app::{DebuggerApp, run_debugger};
