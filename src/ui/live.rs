// ui/live.rs
//! Full-screen live renderer: the 80x25 display panel next to a small status
//! block, redrawn between execution slices. The VM core never blocks on the
//! terminal; rendering happens from snapshots between steps.

use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;

use crate::kestrel::clock::CpuClock;
use crate::kestrel::vm::RunOutcome;
use crate::kestrel::{VmError, Vm};

/// Instructions executed between redraws when the pacing clock is off.
const UNPACED_SLICE: u64 = 10_000;

/// Run the program under a live ratatui view. Returns the VM error (if any)
/// after restoring the terminal, so the caller can print the report.
pub fn run_live(vm: &mut Vm, clock: &mut CpuClock, max_steps: u64) -> Result<u64, VmError> {
    let mut terminal = ratatui::init();
    let result = drive(vm, clock, max_steps, &mut terminal);
    ratatui::restore();
    result
}

fn drive(
    vm: &mut Vm,
    clock: &mut CpuClock,
    max_steps: u64,
    terminal: &mut ratatui::DefaultTerminal,
) -> Result<u64, VmError> {
    // When paced, redraw roughly every 1/30 s worth of instructions
    let slice = if clock.enabled() {
        (clock.frequency() as u64 / 30).max(1)
    } else {
        UNPACED_SLICE
    };

    let mut steps: u64 = 0;
    loop {
        let budget = slice.min(max_steps - steps);
        let mut ran = 0;
        let mut outcome = RunOutcome::BudgetExhausted;
        while ran < budget {
            if !vm.step()? {
                outcome = RunOutcome::Halted;
                break;
            }
            ran += 1;
            clock.tick();
        }
        steps += ran;

        // A broken terminal is not a VM fault; just stop the session
        if terminal.draw(|f| draw(f, vm, steps)).is_err() {
            return Ok(steps);
        }
        if outcome == RunOutcome::Halted || steps >= max_steps {
            return Ok(steps);
        }
        if quit_requested().unwrap_or(true) {
            return Ok(steps);
        }
    }
}

fn quit_requested() -> io::Result<bool> {
    while event::poll(Duration::ZERO)? {
        if let Event::Key(key) = event::read()? {
            if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn draw(f: &mut Frame, vm: &Vm, steps: u64) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(82), Constraint::Min(24)])
        .split(f.area());

    let display_lines: Vec<Line> = vm
        .memory
        .display
        .text()
        .lines()
        .map(|l| Line::from(l.to_string()))
        .collect();
    let display = Paragraph::new(display_lines).block(
        Block::default()
            .title("Display (80x25)")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)),
    );
    f.render_widget(display, chunks[0]);

    let status_lines = vec![
        Line::from(format!("PC: 0x{:08X}", vm.cpu.pc)),
        Line::from(format!("Instructions: {steps}")),
        Line::from(format!("Halted: {}", vm.cpu.halted)),
        Line::from(format!("WFI: {}", vm.cpu.waiting_for_interrupt)),
        Line::from(""),
        Line::from("q to quit"),
    ];
    let status = Paragraph::new(status_lines)
        .block(Block::default().title("Status").borders(Borders::ALL));
    f.render_widget(status, chunks[1]);
}
