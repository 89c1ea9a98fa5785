// kestrel/report.rs
//! Formats a diagnostic snapshot of the machine at fault time. Pure string
//! building; the core carries the raw state and this module decides how a
//! human reads it.

use super::csr;
use super::errors::VmError;
use super::instruction::Instruction;
use super::memory::{self, Memory};
use super::registers::Cpu;

/// ABI names indexed by register number.
pub const REGISTER_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0/fp", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

/// The full exception report: error, fault localization, register and CSR
/// state, stack, and the instruction window around the faulting PC.
pub fn format_report(cpu: &Cpu, mem: &Memory, text: &[Instruction], err: &VmError) -> String {
    let mut out = String::new();
    out.push_str(&"=".repeat(70));
    out.push_str("\nVM EXCEPTION REPORT\n");
    out.push_str(&"=".repeat(70));
    out.push('\n');
    out.push_str(&format!("Error: {err}\n"));

    if let Some(addr) = err.fault_address() {
        out.push_str(&format!(
            "Fault address: 0x{addr:08X} ({} region)\n",
            Memory::region_name(addr)
        ));
    }
    out.push('\n');

    out.push_str(&dump_registers(cpu));
    out.push('\n');
    out.push_str(&dump_csrs(cpu));
    out.push('\n');
    out.push_str(&dump_stack(cpu, mem, 8));
    out.push('\n');
    out.push_str(&instruction_context(cpu, text, 2));

    if let Some(addr) = err.fault_address() {
        if (addr as usize) < memory::MEMORY_SIZE {
            out.push('\n');
            out.push_str("Memory around fault address:\n");
            out.push_str(&mem.dump(addr.saturating_sub(16), 48));
            out.push('\n');
        }
    }

    out
}

/// Register file in four columns with ABI names, hex and signed decimal.
pub fn dump_registers(cpu: &Cpu) -> String {
    let mut lines = vec!["Register state:".to_string()];
    for chunk in 0..8 {
        let row: Vec<String> = (0..4)
            .map(|col| {
                let reg = chunk * 4 + col;
                let value = cpu.read(reg as u8);
                format!(
                    "x{reg:<2} ({:>5}): 0x{value:08X} ({:>11})",
                    REGISTER_NAMES[reg],
                    value as i32
                )
            })
            .collect();
        lines.push(format!("  {}", row.join(" | ")));
    }
    lines.push(String::new());
    lines.push(format!("PC: 0x{:08X}", cpu.pc));
    lines.push(format!("Instructions retired: {}", cpu.instret));
    lines.push(format!("Halted: {}", cpu.halted));
    lines.push(format!("Waiting for interrupt: {}", cpu.waiting_for_interrupt));
    lines.join("\n") + "\n"
}

/// CSR file with the interrupt bits decoded.
pub fn dump_csrs(cpu: &Cpu) -> String {
    let c = &cpu.csr;
    let mut lines = vec!["Control and status registers:".to_string()];
    lines.push(format!("  MSTATUS (0x300): 0x{:08X}", c.mstatus));
    lines.push(format!(
        "    MIE (global interrupt enable): {}",
        if c.mstatus & csr::MSTATUS_MIE != 0 { "ENABLED" } else { "DISABLED" }
    ));
    lines.push(format!("  MIE     (0x304): 0x{:08X}", c.mie));
    lines.push(format!(
        "    MTIE (cycle timer): {}   RTIE (real-time timer): {}",
        yes_no(c.mie & csr::MIE_MTIE != 0),
        yes_no(c.mie & csr::MIE_RTIE != 0)
    ));
    lines.push(format!("  MTVEC   (0x305): 0x{:08X}", c.mtvec));
    lines.push(format!("  MEPC    (0x341): 0x{:08X}", c.mepc));
    lines.push(format!("  MCAUSE  (0x342): 0x{:08X}", c.mcause));
    lines.push(format!("  MIP     (0x344): 0x{:08X}", c.mip));
    lines.push(format!(
        "    MTIP (cycle timer): {}   RTIP (real-time timer): {}",
        yes_no(c.mip & csr::MIE_MTIE != 0),
        yes_no(c.mip & csr::MIE_RTIE != 0)
    ));
    lines.join("\n") + "\n"
}

fn yes_no(b: bool) -> &'static str {
    if b { "YES" } else { "NO" }
}

/// Words from `sp` upward (toward the stack top), annotated with offsets.
pub fn dump_stack(cpu: &Cpu, mem: &Memory, num_words: u32) -> String {
    let sp = cpu.read(2);
    let mut lines = vec![format!("Stack (sp = 0x{sp:08X}):")];
    if sp % 4 != 0 {
        lines.push("  sp is not word-aligned".to_string());
        return lines.join("\n") + "\n";
    }
    for i in 0..num_words {
        let addr = match sp.checked_add(i * 4) {
            Some(a) if (a as usize) + 4 <= memory::MEMORY_SIZE => a,
            _ => break,
        };
        match mem.read_word(addr) {
            Ok(word) => lines.push(format!("  sp+{:<3} 0x{addr:08X}: 0x{word:08X}", i * 4)),
            Err(_) => break,
        }
    }
    lines.join("\n") + "\n"
}

/// Disassembled window of instructions around the current PC.
pub fn instruction_context(cpu: &Cpu, text: &[Instruction], window: usize) -> String {
    let mut lines = vec!["Instruction context:".to_string()];
    if text.is_empty() {
        lines.push("  (no program loaded)".to_string());
        return lines.join("\n") + "\n";
    }
    let index = (cpu.pc / 4) as usize;
    let lo = index.saturating_sub(window);
    let hi = (index + window + 1).min(text.len());
    if lo >= text.len() {
        lines.push(format!("  PC 0x{:08X} is past the end of the program", cpu.pc));
        return lines.join("\n") + "\n";
    }
    for i in lo..hi {
        let marker = if i == index { ">>>" } else { "   " };
        lines.push(format!("  {marker} 0x{:08X}: {}", i * 4, text[i]));
    }
    lines.join("\n") + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kestrel::errors::MemoryError;
    use crate::kestrel::instruction::Instruction::*;

    fn fixture() -> (Cpu, Memory, Vec<Instruction>) {
        let mut cpu = Cpu::new();
        cpu.pc = 4;
        cpu.write(10, 120);
        let mem = Memory::new(false);
        let text = vec![
            Addi { rd: 1, rs1: 0, imm: 7 },
            Sw { rs2: 1, rs1: 0, imm: 0 },
            Halt,
        ];
        (cpu, mem, text)
    }

    #[test]
    fn report_names_error_and_fault_region() {
        let (cpu, mem, text) = fixture();
        let err = VmError::Memory(MemoryError::Protected { addr: 0 });
        let report = format_report(&cpu, &mem, &text, &err);
        assert!(report.contains("protected text segment"));
        assert!(report.contains("Fault address: 0x00000000 (TEXT region)"));
    }

    #[test]
    fn report_includes_registers_and_csrs() {
        let (mut cpu, mem, text) = fixture();
        cpu.csr.mstatus = csr::MSTATUS_MIE;
        cpu.csr.mie = csr::MIE_MTIE;
        let err = VmError::PcOutOfBounds(0x40);
        let report = format_report(&cpu, &mem, &text, &err);
        assert!(report.contains("x10 (   a0): 0x00000078"));
        assert!(report.contains("MIE (global interrupt enable): ENABLED"));
        assert!(report.contains("MTIE (cycle timer): YES"));
    }

    #[test]
    fn context_marks_the_faulting_instruction() {
        let (cpu, mem, text) = fixture();
        let err = VmError::Memory(MemoryError::OutOfBounds { addr: 0x200000, size: 4 });
        let report = format_report(&cpu, &mem, &text, &err);
        assert!(report.contains(">>> 0x00000004: sw x1, 0(x0)"));
    }

    #[test]
    fn stack_dump_reads_from_sp() {
        let (cpu, mut mem, _) = fixture();
        mem.write_word(cpu.read(2), 0xAABBCCDD).unwrap();
        let dump = dump_stack(&cpu, &mem, 2);
        assert!(dump.contains("0x000BFFFC: 0xAABBCCDD"));
    }

    #[test]
    fn pc_past_program_end_is_reported_in_context() {
        let (mut cpu, _, text) = fixture();
        cpu.pc = 0x4000;
        let ctx = instruction_context(&cpu, &text, 2);
        assert!(ctx.contains("past the end"));
    }
}
