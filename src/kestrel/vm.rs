// kestrel/vm.rs
use std::collections::{HashMap, HashSet};

use log::debug;

use super::asm;
use super::errors::VmError;
use super::exec;
use super::instruction::Instruction;
use super::memory::Memory;
use super::registers::Cpu;

/// Why a `run` call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Halted,
    BudgetExhausted,
    Breakpoint(u32),
}

/// The assembled machine: CPU, memory (which owns the devices), and the
/// decoded program text.
pub struct Vm {
    pub cpu: Cpu,
    pub memory: Memory,
    pub text: Vec<Instruction>,
    /// Symbol table of the loaded program, kept for the debugger prompt.
    pub labels: HashMap<String, u32>,
    breakpoints: HashSet<u32>,
}

impl Vm {
    pub fn new(protect_text: bool) -> Self {
        Vm {
            cpu: Cpu::new(),
            memory: Memory::new(protect_text),
            text: Vec::new(),
            labels: HashMap::new(),
            breakpoints: HashSet::new(),
        }
    }

    /// Assemble and load a program: decoded text replaces the old image, the
    /// data section is written at its base address, and the CPU and timers
    /// are reset.
    pub fn load_program(&mut self, source: &str) -> Result<(), VmError> {
        let program = asm::assemble(source)?;
        debug!("assembled {} instructions, {} data bytes", program.text.len(), program.data.len());

        self.cpu.reset();
        self.memory.timer.reset();
        self.memory.rt_timer.reset();
        self.memory.display.reset();
        if !program.data.is_empty() {
            self.memory.load_program(&program.data, program.data_base)?;
        }
        self.text = program.text;
        self.labels = program.labels;
        Ok(())
    }

    /// One step of the machine; see `exec::step` for the phase ordering.
    pub fn step(&mut self) -> Result<bool, VmError> {
        exec::step(&mut self.cpu, &mut self.memory, &self.text)
    }

    /// Run until halt, a breakpoint, an error, or the instruction budget is
    /// exhausted. Returns the outcome and the number of steps taken.
    pub fn run(&mut self, max_steps: u64) -> Result<(RunOutcome, u64), VmError> {
        let mut steps = 0;
        while steps < max_steps {
            if !self.step()? {
                return Ok((RunOutcome::Halted, steps));
            }
            steps += 1;
            if self.breakpoints.contains(&self.cpu.pc) {
                return Ok((RunOutcome::Breakpoint(self.cpu.pc), steps));
            }
        }
        Ok((RunOutcome::BudgetExhausted, steps))
    }

    pub fn add_breakpoint(&mut self, addr: u32) {
        self.breakpoints.insert(addr);
    }

    pub fn remove_breakpoint(&mut self, addr: u32) -> bool {
        self.breakpoints.remove(&addr)
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = &u32> {
        self.breakpoints.iter()
    }

    /// The decoded instruction at PC, when PC is in bounds.
    pub fn current_instruction(&self) -> Option<Instruction> {
        if self.cpu.pc % 4 != 0 {
            return None;
        }
        self.text.get((self.cpu.pc / 4) as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kestrel::csr;
    use crate::kestrel::memory::{DATA_BASE, DISPLAY_BUFFER_BASE};

    fn run_to_halt(src: &str) -> Vm {
        let mut vm = Vm::new(false);
        vm.load_program(src).expect("assemble");
        let (outcome, _) = vm.run(1_000_000).expect("run");
        assert_eq!(outcome, RunOutcome::Halted);
        vm
    }

    #[test]
    fn factorial_of_five_by_repeated_addition() {
        // a0 = 5! computed with nested add loops (no MUL)
        let vm = run_to_halt(
            "
            addi a0, zero, 1      # accumulator
            addi t0, zero, 2      # factor
            addi t1, zero, 5      # limit
        outer:
            bltu t1, t0, done     # while factor <= limit
            mv t2, a0             # addend
            mv t3, t0
            addi t3, t3, -1       # remaining additions
            mv a0, t2
        inner:
            beq t3, zero, next
            add a0, a0, t2
            addi t3, t3, -1
            j inner
        next:
            addi t0, t0, 1
            j outer
        done:
            halt
            ",
        );
        assert_eq!(vm.cpu.read(10), 120);
    }

    #[test]
    fn factorial_of_five_with_mul() {
        let vm = run_to_halt(
            "
            addi a0, zero, 1
            addi t0, zero, 5
        loop:
            beq t0, zero, done
            mul a0, a0, t0
            addi t0, t0, -1
            j loop
        done:
            halt
            ",
        );
        assert_eq!(vm.cpu.read(10), 120);
    }

    #[test]
    fn fibonacci_prefix_lands_in_data_memory() {
        let vm = run_to_halt(
            "
            .data
            fib: .word 0, 0, 0, 0, 0, 0, 0, 0, 0, 0
            .text
            la a0, fib
            addi t0, zero, 0      # fib(0)
            addi t1, zero, 1      # fib(1)
            addi t2, zero, 10     # count
        loop:
            beq t2, zero, done
            sw t0, 0(a0)
            add t3, t0, t1
            mv t0, t1
            mv t1, t3
            addi a0, a0, 4
            addi t2, t2, -1
            j loop
        done:
            halt
            ",
        );
        let expected = [0u32, 1, 1, 2, 3, 5, 8, 13, 21, 34];
        for (i, want) in expected.iter().enumerate() {
            let got = vm.memory.read_word(DATA_BASE + 4 * i as u32).unwrap();
            assert_eq!(got, *want, "fib({i})");
        }
    }

    #[test]
    fn lui_addi_builds_exact_address() {
        let vm = run_to_halt("lui x1, 0x10\naddi x1, x1, 14\nhalt");
        assert_eq!(vm.cpu.read(1), 0x1000E);
    }

    #[test]
    fn cycle_timer_interrupt_fires_five_times_in_550_steps() {
        let mut vm = Vm::new(false);
        vm.load_program(
            "
            addi x10, x0, 0        # interrupt counter
            addi x1, x0, handler
            csrrw x0, 0x305, x1    # mtvec
            lui x1, 0xF8
            addi x1, x1, -512      # timer base 0xF7E00
            addi x2, x0, 100
            sw x2, 4(x1)           # compare = 100
            addi x2, x0, 0x0B      # enable | periodic | auto-reload
            sw x2, 8(x1)
            addi x2, x0, 0x80
            csrrw x0, 0x304, x2    # mie.MTIE
            addi x2, x0, 0x08
            csrrw x0, 0x300, x2    # mstatus.MIE
        loop:
            j loop
        handler:
            addi x10, x10, 1
            lui x1, 0xF8
            addi x1, x1, -512
            addi x2, x0, 0x0F      # keep mode bits, W1C pending
            sw x2, 8(x1)
            mret
            ",
        )
        .expect("assemble");

        for _ in 0..550 {
            vm.step().expect("step");
        }
        assert_eq!(vm.cpu.read(10), 5);
    }

    #[test]
    fn wfi_parks_until_the_timer_fires_then_resumes_after() {
        let mut vm = Vm::new(false);
        vm.load_program(
            "
            addi x1, x0, handler
            csrrw x0, 0x305, x1
            lui x1, 0xF8
            addi x1, x1, -512
            addi x2, x0, 50
            sw x2, 4(x1)           # compare = 50
            addi x2, x0, 0x0B
            sw x2, 8(x1)
            addi x2, x0, 0x80
            csrrw x0, 0x304, x2
            addi x2, x0, 0x08
            csrrw x0, 0x300, x2
            wfi
            addi x5, x0, 1         # runs only after the wake + mret
            halt
        handler:
            addi x6, x6, 1
            lui x1, 0xF8
            addi x1, x1, -512
            addi x2, x0, 0x0F
            sw x2, 8(x1)
            mret
            ",
        )
        .expect("assemble");

        // Step to the WFI and verify the core parks
        for _ in 0..13 {
            vm.step().expect("step");
        }
        assert!(vm.cpu.waiting_for_interrupt);
        let parked_pc = vm.cpu.pc;

        let (outcome, _) = vm.run(1_000).expect("run");
        assert_eq!(outcome, RunOutcome::Halted);
        assert_eq!(vm.cpu.read(6), 1, "handler ran once");
        assert_eq!(vm.cpu.read(5), 1, "execution resumed after wfi");
        assert_eq!(vm.cpu.csr.mepc, parked_pc);
    }

    #[test]
    fn pending_interrupt_respects_global_mask() {
        let mut vm = Vm::new(false);
        vm.load_program(
            "
            lui x1, 0xF8
            addi x1, x1, -512
            addi x2, x0, 5
            sw x2, 4(x1)           # compare = 5
            addi x2, x0, 0x0B
            sw x2, 8(x1)
            addi x2, x0, 0x80
            csrrw x0, 0x304, x2    # enabled in mie, but mstatus.MIE stays 0
            addi x3, x0, 64
        spin:
            addi x3, x3, -1
            bne x3, x0, spin
            csrrs x4, 0x344, x0    # read mip
            halt
            ",
        )
        .expect("assemble");
        let (outcome, _) = vm.run(10_000).expect("run");
        assert_eq!(outcome, RunOutcome::Halted);
        // pending is visible in mip but no trap was taken
        assert_eq!(vm.cpu.read(4) & csr::MIE_MTIE, csr::MIE_MTIE);
        assert_eq!(vm.cpu.csr.mepc, 0);
    }

    #[test]
    fn pending_bit_sticks_until_w1c() {
        let mut vm = Vm::new(false);
        vm.load_program(
            "
            lui x1, 0xF8
            addi x1, x1, -512
            addi x2, x0, 3
            sw x2, 4(x1)
            addi x2, x0, 0x01      # enable, one-shot
            sw x2, 8(x1)
            addi x3, x0, 32
        spin:
            addi x3, x3, -1
            bne x3, x0, spin
            lw x4, 16(x1)          # status: still pending
            addi x2, x0, 0x04
            sw x2, 8(x1)           # W1C
            lw x5, 16(x1)          # status: cleared
            halt
            ",
        )
        .expect("assemble");
        vm.run(10_000).expect("run");
        assert_eq!(vm.cpu.read(4) & 0x2, 0x2);
        assert_eq!(vm.cpu.read(5) & 0x2, 0);
    }

    #[test]
    fn protected_text_store_reports_address_and_pc() {
        let mut vm = Vm::new(true);
        vm.load_program("addi x1, x0, 7\nsw x1, 0(x0)\nhalt").expect("assemble");
        // the store sits at address 4
        let err = loop {
            match vm.step() {
                Ok(_) => continue,
                Err(e) => break e,
            }
        };
        assert_eq!(err.fault_address(), Some(0));
        assert_eq!(vm.cpu.pc, 4, "PC points at the faulting store");
        match err {
            VmError::Memory(crate::kestrel::MemoryError::Protected { addr }) => {
                assert_eq!(addr, 0)
            }
            other => panic!("expected protection error, got {other:?}"),
        }
    }

    #[test]
    fn display_store_shows_up_in_the_grid() {
        let vm = run_to_halt(
            "
            lui x1, 0xF0           # display buffer base
            addi x2, x0, 'H'
            sb x2, 0(x1)
            addi x2, x0, 'i'
            sb x2, 1(x1)
            halt
            ",
        );
        assert_eq!(vm.memory.display.cell_at(0, 0), b'H');
        assert_eq!(vm.memory.display.cell_at(1, 0), b'i');
        assert!(vm.memory.read_byte(DISPLAY_BUFFER_BASE).unwrap() == b'H');
    }

    #[test]
    fn double_halt_stays_halted() {
        let mut vm = run_to_halt("halt");
        for _ in 0..5 {
            assert!(!vm.step().unwrap());
        }
        assert!(vm.cpu.halted);
    }

    #[test]
    fn run_stops_at_breakpoints() {
        let mut vm = Vm::new(false);
        vm.load_program("addi x1, x0, 1\naddi x2, x0, 2\naddi x3, x0, 3\nhalt")
            .expect("assemble");
        vm.add_breakpoint(8);
        let (outcome, steps) = vm.run(100).expect("run");
        assert_eq!(outcome, RunOutcome::Breakpoint(8));
        assert_eq!(steps, 2);
        assert_eq!(vm.cpu.read(2), 2);
        assert_eq!(vm.cpu.read(3), 0);
        let (outcome, _) = vm.run(100).expect("run");
        assert_eq!(outcome, RunOutcome::Halted);
    }

    #[test]
    fn budget_exhaustion_is_reported() {
        let mut vm = Vm::new(false);
        vm.load_program("loop: j loop").expect("assemble");
        let (outcome, steps) = vm.run(25).expect("run");
        assert_eq!(outcome, RunOutcome::BudgetExhausted);
        assert_eq!(steps, 25);
    }

    #[test]
    fn reload_resets_cpu_and_timers() {
        let mut vm = Vm::new(false);
        vm.load_program("addi x1, x0, 9\nhalt").expect("assemble");
        vm.run(100).expect("run");
        assert_eq!(vm.cpu.read(1), 9);
        vm.load_program("halt").expect("assemble");
        assert_eq!(vm.cpu.read(1), 0);
        assert_eq!(vm.cpu.read(2), 0xBFFFC);
        assert!(!vm.cpu.halted);
        assert_eq!(vm.memory.timer.read_counter(), 0);
    }
}
