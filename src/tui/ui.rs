//! UI rendering for the debugger.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, List, ListItem, Wrap},
    style::{Color, Style, Modifier},
};
use crate::cpu::memory::UNINITIALIZED;
use crate::cpu::registers::SpecialRegister;
use super::app::DebuggerApp;

/// Main draw function.
pub fn draw(frame: &mut Frame, app: &mut DebuggerApp) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(55),
            Constraint::Percentage(45),
        ])
        .split(frame.area());

    // Left side: code, registers and status
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(8),
            Constraint::Length(13),
            Constraint::Length(3),
        ])
        .split(chunks[0]);

    draw_disassembly(frame, left_chunks[0], app);
    draw_registers(frame, left_chunks[1], app);
    draw_status(frame, left_chunks[2], app);

    // Right side: memory, console output and help
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(8),
            Constraint::Length(6),
            Constraint::Length(4),
        ])
        .split(chunks[1]);

    draw_memory(frame, right_chunks[0], app);
    draw_output(frame, right_chunks[1], app);
    draw_help(frame, right_chunks[2]);
}

fn draw_disassembly(frame: &mut Frame, area: Rect, app: &mut DebuggerApp) {
    let disasm = app.get_disassembly((area.height as usize).saturating_sub(2));

    let items: Vec<ListItem> = disasm
        .iter()
        .map(|(addr, instr, is_current)| {
            let prefix = if *is_current { "▶ " } else { "  " };
            let bp = if app.breakpoints.contains(addr) { "●" } else { " " };
            let text = format!("{}{:08x}: {}", prefix, addr, instr);

            let style = if *is_current {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if app.breakpoints.contains(addr) {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };

            ListItem::new(format!("{} {}", bp, text)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Disassembly ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)));

    frame.render_widget(list, area);
}

fn draw_registers(frame: &mut Frame, area: Rect, app: &mut DebuggerApp) {
    let registers = app.registers();
    let value = Style::default().fg(Color::White);

    let mut content: Vec<Line> = registers
        .chunks(4)
        .enumerate()
        .map(|(row, regs)| {
            let spans: Vec<Span> = regs
                .iter()
                .enumerate()
                .flat_map(|(col, reg)| {
                    let text = reg.map_or_else(|| "--------".to_string(), |v| format!("{:08x}", v));
                    [
                        Span::raw(format!("r{:<2} ", row * 4 + col)),
                        Span::styled(format!("{}  ", text), value),
                    ]
                })
                .collect();
            Line::from(spans)
        })
        .collect();

    let state = &app.cpu.state;
    content.push(Line::from(vec![
        Span::raw("IP "),
        Span::styled(format!("{:08x}", state.ip), Style::default().fg(Color::Yellow)),
        Span::raw("  SP "),
        Span::styled(format!("{:08x}", state.sp), value),
        Span::raw(format!(
            "  PL {}  Z={} GE={}",
            state.privilege_level,
            u8::from(state.flags.zero()),
            u8::from(state.flags.greater_equal()),
        )),
    ]));

    let specials: Vec<Span> = SpecialRegister::ALL
        .iter()
        .map(|&reg| Span::raw(format!("{} {:x} ", reg.name(), app.cpu.special_register(reg))))
        .collect();
    content.push(Line::from(specials));

    let context = if state.in_vm() {
        format!("guest {}", state.vm_id())
    } else {
        "host".to_string()
    };
    content.push(Line::from(vec![
        Span::raw("Cycles: "),
        Span::styled(format!("{}", app.cpu.cycles), Style::default().fg(Color::Cyan)),
        Span::raw("   Mode: "),
        Span::styled(context, Style::default().fg(Color::Magenta)),
        Span::raw("   State: "),
        Span::styled(format!("{:?}", app.cpu.run_state),
            if app.cpu.is_running() {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Red)
            }),
    ]));

    let paragraph = Paragraph::new(content)
        .block(Block::default()
            .title(" Registers ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)));

    frame.render_widget(paragraph, area);
}

/// Physical memory, four words per row.
fn draw_memory(frame: &mut Frame, area: Rect, app: &mut DebuggerApp) {
    let visible_rows = (area.height as usize).saturating_sub(2) as u32;
    let current = app.current_address();

    let items: Vec<ListItem> = (0..visible_rows)
        .filter_map(|row| app.mem_scroll.checked_add(row * 4))
        .map(|base| {
            let words: Vec<u32> = (0..4u64)
                .map(|i| app.cpu.mem.read_word(u64::from(base) + i).unwrap_or(UNINITIALIZED))
                .collect();
            let cells: Vec<String> = words.iter().map(|w| format!("{:08x}", w)).collect();
            let text = format!("{:08x}: {}", base, cells.join(" "));

            let has_ip = current.is_some_and(|ip| ip >= base && ip - base < 4);
            let style = if has_ip {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if words.iter().any(|&w| w != UNINITIALIZED) {
                Style::default().fg(Color::White)
            } else {
                Style::default().fg(Color::DarkGray)
            };

            ListItem::new(text).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Memory ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)));

    frame.render_widget(list, area);
}

fn draw_output(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let output = Paragraph::new(app.output.clone())
        .wrap(Wrap { trim: false })
        .block(Block::default()
            .title(" Output ")
            .borders(Borders::ALL));

    frame.render_widget(output, area);
}

fn draw_status(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let status = Paragraph::new(app.status.clone())
        .style(Style::default().fg(Color::White))
        .block(Block::default()
            .title(" Status ")
            .borders(Borders::ALL));

    frame.render_widget(status, area);
}

fn draw_help(frame: &mut Frame, area: Rect) {
    let help = Paragraph::new(vec![
        Line::from("s: Step  r: Run  p: Pause  b: Breakpoint"),
        Line::from("x: Reset  ↑↓ PgUp PgDn: Scroll memory  q: Quit"),
    ])
    .style(Style::default().fg(Color::DarkGray))
    .block(Block::default()
        .title(" Help ")
        .borders(Borders::ALL));

    frame.render_widget(help, area);
}
