// ui/prompt.rs
//! Interactive single-step prompt. Plain stdin/stdout, no terminal takeover;
//! the renderer and the VM core stay untouched.

use std::io::{self, BufRead, Write};

use crate::kestrel::vm::RunOutcome;
use crate::kestrel::{report, VmError, Vm};

const HELP: &str = "Commands:
  [Enter]    execute next instruction
  c          continue until halt/breakpoint
  r          show registers
  d          show display
  m <addr>   dump memory at address
  b <addr>   toggle breakpoint (address or label; b alone lists them)
  q          quit";

/// Drive the VM one instruction at a time from stdin. Returns the first VM
/// error so the caller can print the exception report.
pub fn run_prompt(vm: &mut Vm, max_steps: u64) -> Result<(), VmError> {
    println!("Step mode. {HELP}");
    let stdin = io::stdin();
    let mut steps: u64 = 0;

    while !vm.cpu.halted && steps < max_steps {
        let next = vm
            .current_instruction()
            .map(|i| i.to_string())
            .unwrap_or_else(|| "??".to_string());
        print!("[0x{:08X}] {next}> ", vm.cpu.pc);
        io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break; // EOF
        }
        let cmd = line.trim();

        match cmd {
            "" => {
                vm.step()?;
                steps += 1;
            }
            "c" => {
                let (outcome, n) = vm.run(max_steps - steps)?;
                steps += n;
                if let RunOutcome::Breakpoint(pc) = outcome {
                    println!("breakpoint hit at 0x{pc:08X}");
                }
            }
            "r" => println!("{}", report::dump_registers(&vm.cpu)),
            "d" => println!("{}", vm.memory.display.text()),
            "b" => {
                for addr in vm.breakpoints() {
                    println!("breakpoint at 0x{addr:08X}");
                }
            }
            "q" => break,
            _ => {
                if let Some(addr) = parse_addr(cmd, 'm') {
                    println!("{}", vm.memory.dump(addr, 128));
                } else if let Some(addr) =
                    parse_addr(cmd, 'b').or_else(|| parse_label(cmd, vm))
                {
                    if vm.remove_breakpoint(addr) {
                        println!("breakpoint removed at 0x{addr:08X}");
                    } else {
                        vm.add_breakpoint(addr);
                        println!("breakpoint set at 0x{addr:08X}");
                    }
                } else {
                    println!("{HELP}");
                }
            }
        }
    }
    Ok(())
}

fn parse_label(cmd: &str, vm: &Vm) -> Option<u32> {
    let name = cmd.strip_prefix('b')?.trim();
    vm.labels.get(name).copied()
}

fn parse_addr(cmd: &str, prefix: char) -> Option<u32> {
    let rest = cmd.strip_prefix(prefix)?.trim();
    if rest.is_empty() {
        return None;
    }
    if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        rest.parse().ok()
    }
}
