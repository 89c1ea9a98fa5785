mod kestrel;
mod ui;

use std::fs;
use std::process::ExitCode;

use clap::Parser;
use log::{debug, LevelFilter};

use kestrel::clock::CpuClock;
use kestrel::{report, Vm};

/// Educational 32-bit RISC virtual machine with a built-in assembler.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Assembly source file to execute
    file: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Step through execution interactively
    #[arg(short, long)]
    step: bool,

    /// Write-protect the text segment
    #[arg(short, long)]
    protect: bool,

    /// Maximum instructions to execute
    #[arg(short, long, default_value_t = 1_000_000)]
    max_instructions: u64,

    /// Skip the final display dump
    #[arg(long)]
    no_display: bool,

    /// Render the display live while the program runs
    #[arg(short, long)]
    live: bool,

    /// Target clock frequency in instructions per second
    #[arg(long)]
    clock_hz: Option<u32>,

    /// Disable the pacing clock even in live mode
    #[arg(long)]
    no_clock: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.debug { LevelFilter::Debug } else { LevelFilter::Warn })
        .init();

    let source = match fs::read_to_string(&args.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read {}: {e}", args.file);
            return ExitCode::FAILURE;
        }
    };

    let mut vm = Vm::new(args.protect);
    if let Err(e) = vm.load_program(&source) {
        eprintln!("assembly error: {e}");
        return ExitCode::FAILURE;
    }
    debug!("loaded {} instructions from {}", vm.text.len(), args.file);

    // The clock paces execution in live mode or when a rate was requested
    // explicitly; --no-clock always wins.
    let pace = !args.no_clock && (args.live || args.clock_hz.is_some());
    let mut clock = CpuClock::new(args.clock_hz.unwrap_or(1000), pace);

    let result = if args.step {
        ui::run_prompt(&mut vm, args.max_instructions)
    } else if args.live {
        ui::run_live(&mut vm, &mut clock, args.max_instructions).map(|steps| {
            println!("\nInstructions executed: {steps}");
        })
    } else {
        run_batch(&mut vm, &mut clock, args.max_instructions)
    };

    if let Err(e) = result {
        eprintln!("{}", report::format_report(&vm.cpu, &vm.memory, &vm.text, &e));
        return ExitCode::FAILURE;
    }

    if !args.no_display && !args.live {
        println!("{}", vm.memory.display.text());
    }
    ExitCode::SUCCESS
}

fn run_batch(vm: &mut Vm, clock: &mut CpuClock, max_steps: u64) -> Result<(), kestrel::VmError> {
    let mut steps: u64 = 0;
    while steps < max_steps {
        if !vm.step()? {
            break;
        }
        steps += 1;
        clock.tick();
    }
    if steps >= max_steps {
        eprintln!("warning: execution stopped after {max_steps} instructions");
    }
    println!("Instructions executed: {steps}");
    println!("Final PC: 0x{:08X}", vm.cpu.pc);
    Ok(())
}
