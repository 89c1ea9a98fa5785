use std::collections::HashMap;

use crate::kestrel::instruction::Instruction;
use crate::kestrel::memory::{DATA_BASE, TEXT_BASE};

use super::errors::AsmError;
use super::program::Program;
use super::pseudo::parse_la;
use super::utils::*;

// ---------- API ----------

/// Two-pass assembly of a full source file.
///
/// Pass 1 walks the lines collecting label addresses against the text and
/// data cursors (pseudo-instructions counted at their expanded length).
/// Pass 2 parses every instruction with the complete symbol table in hand,
/// resolving labels to absolute addresses or PC-relative offsets.
pub fn assemble(source: &str) -> Result<Program, AsmError> {
    let lines = preprocess(source);

    enum Section {
        Text,
        Data,
    }
    let mut section = Section::Text;
    let mut pc_text = TEXT_BASE;
    let mut pc_data = DATA_BASE;
    let mut items: Vec<(u32, usize, String)> = Vec::new(); // (pc, line number, text)
    let mut data_bytes = Vec::<u8>::new();
    let mut labels = HashMap::<String, u32>::new();

    for (line_no, raw) in &lines {
        let lower = raw.to_lowercase();
        if lower == ".text" {
            section = Section::Text;
            continue;
        }
        if lower == ".data" {
            section = Section::Data;
            continue;
        }

        let mut line = raw.as_str();
        if let Some((label, rest)) = split_label(line) {
            let addr = match section {
                Section::Text => pc_text,
                Section::Data => pc_data,
            };
            labels.insert(label.to_string(), addr);
            line = rest;
            if line.is_empty() {
                continue;
            }
        }

        match section {
            Section::Text => {
                // `la` is the only pseudo-instruction that expands to more
                // than one machine instruction
                let words = if is_la(line) { 2 } else { 1 };
                items.push((pc_text, *line_no, line.to_string()));
                pc_text = pc_text.wrapping_add(4 * words);
            }
            Section::Data => {
                emit_data(line, &mut data_bytes)
                    .map_err(|msg| AsmError::new(*line_no, msg))?;
                pc_data = DATA_BASE + data_bytes.len() as u32;
            }
        }
    }

    // Second pass: every label is known, so instructions can be resolved
    let mut text = Vec::with_capacity(items.len());
    for (pc, line_no, line) in items {
        if is_la(&line) {
            let (lui, addi) =
                parse_la(&line, &labels).map_err(|msg| AsmError::new(line_no, msg))?;
            text.push(lui);
            text.push(addi);
        } else {
            let inst = parse_instr(&line, pc, &labels)
                .map_err(|msg| AsmError::new(line_no, msg))?;
            text.push(inst);
        }
    }

    Ok(Program { text, data: data_bytes, data_base: DATA_BASE, labels })
}

// ---------- Internals ----------

fn is_la(line: &str) -> bool {
    line.split_whitespace()
        .next()
        .is_some_and(|m| m.eq_ignore_ascii_case("la"))
}

/// A leading `ident:` label definition, if present. Only identifier-shaped
/// prefixes count, so colons inside string or character literals are left
/// alone. Label names stay case-sensitive.
fn split_label(line: &str) -> Option<(&str, &str)> {
    let idx = line.find(':')?;
    let label = line[..idx].trim();
    let mut chars = label.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((label, line[idx + 1..].trim()))
}

fn emit_data(line: &str, out: &mut Vec<u8>) -> Result<(), String> {
    let (directive, rest) = match line.find(char::is_whitespace) {
        Some(i) => line.split_at(i),
        None => (line, ""),
    };
    match directive.to_lowercase().as_str() {
        ".word" => {
            let values = split_operands(rest);
            if values.is_empty() {
                return Err(".word: expected at least one value".into());
            }
            for w in values {
                let v = parse_imm(&w)?;
                out.extend_from_slice(&(v as u32).to_le_bytes());
            }
            Ok(())
        }
        ".string" | ".asciiz" => {
            let bytes = parse_str_lit(rest)?;
            out.extend_from_slice(&bytes);
            out.push(0);
            Ok(())
        }
        other => Err(format!("unknown data directive: {other}")),
    }
}

fn parse_instr(
    s: &str,
    pc: u32,
    labels: &HashMap<String, u32>,
) -> Result<Instruction, String> {
    // e.g. "addi x1, x0, 10"
    let mut parts = s.split_whitespace();
    let mnemonic = parts.next().ok_or("empty line")?.to_lowercase();
    let rest = parts.collect::<Vec<_>>().join(" ");
    let ops = split_operands(&rest);

    use Instruction::*;

    let get_reg = |t: &str| parse_reg(t).ok_or_else(|| format!("unknown register '{t}'"));

    match mnemonic.as_str() {
        // ---------- Pseudo-instructions ----------
        "nop" => {
            if !ops.is_empty() {
                return Err("nop takes no operands".into());
            }
            Ok(Addi { rd: 0, rs1: 0, imm: 0 })
        }
        "mv" => {
            if ops.len() != 2 {
                return Err("mv: expected 'rd, rs'".into());
            }
            let rd = get_reg(&ops[0])?;
            let rs = get_reg(&ops[1])?;
            Ok(Addi { rd, rs1: rs, imm: 0 })
        }
        "j" => {
            if ops.len() != 1 {
                return Err("j: expected label/offset".into());
            }
            Ok(Jal { rd: 0, imm: branch_imm(&ops[0], pc, labels, 21, "j")? })
        }
        "call" => {
            if ops.len() != 1 {
                return Err("call: expected label/offset".into());
            }
            Ok(Jal { rd: 1, imm: branch_imm(&ops[0], pc, labels, 21, "call")? })
        }
        "ret" => {
            if !ops.is_empty() {
                return Err("ret takes no operands".into());
            }
            Ok(Jalr { rd: 0, rs1: 1, imm: 0 })
        }

        // ---------- R-type ----------
        "add" | "sub" | "and" | "or" | "xor" | "sll" | "srl" | "sra" | "slt" | "sltu"
        | "mul" | "div" | "divu" | "rem" | "remu" => {
            if ops.len() != 3 {
                return Err(format!("{mnemonic}: expected 'rd, rs1, rs2'"));
            }
            let rd = get_reg(&ops[0])?;
            let rs1 = get_reg(&ops[1])?;
            let rs2 = get_reg(&ops[2])?;
            Ok(match mnemonic.as_str() {
                "add" => Add { rd, rs1, rs2 },
                "sub" => Sub { rd, rs1, rs2 },
                "and" => And { rd, rs1, rs2 },
                "or" => Or { rd, rs1, rs2 },
                "xor" => Xor { rd, rs1, rs2 },
                "sll" => Sll { rd, rs1, rs2 },
                "srl" => Srl { rd, rs1, rs2 },
                "sra" => Sra { rd, rs1, rs2 },
                "slt" => Slt { rd, rs1, rs2 },
                "sltu" => Sltu { rd, rs1, rs2 },
                "mul" => Mul { rd, rs1, rs2 },
                "div" => Div { rd, rs1, rs2 },
                "divu" => Divu { rd, rs1, rs2 },
                "rem" => Rem { rd, rs1, rs2 },
                "remu" => Remu { rd, rs1, rs2 },
                _ => unreachable!(),
            })
        }

        // ---------- I-type ----------
        "addi" | "andi" | "ori" | "xori" | "slti" | "sltiu" => {
            if ops.len() != 3 {
                return Err(format!("{mnemonic}: expected 'rd, rs1, imm'"));
            }
            let rd = get_reg(&ops[0])?;
            let rs1 = get_reg(&ops[1])?;
            let imm = abs_imm(&ops[2], labels, 12, mnemonic.as_str())?;
            Ok(match mnemonic.as_str() {
                "addi" => Addi { rd, rs1, imm },
                "andi" => Andi { rd, rs1, imm },
                "ori" => Ori { rd, rs1, imm },
                "xori" => Xori { rd, rs1, imm },
                "slti" => Slti { rd, rs1, imm },
                "sltiu" => Sltiu { rd, rs1, imm },
                _ => unreachable!(),
            })
        }
        "slli" | "srli" | "srai" => {
            if ops.len() != 3 {
                return Err(format!("{mnemonic}: expected 'rd, rs1, shamt'"));
            }
            let rd = get_reg(&ops[0])?;
            let rs1 = get_reg(&ops[1])?;
            let shamt = check_unsigned(parse_imm(&ops[2])?, 5, mnemonic.as_str())? as u8;
            Ok(match mnemonic.as_str() {
                "slli" => Slli { rd, rs1, shamt },
                "srli" => Srli { rd, rs1, shamt },
                "srai" => Srai { rd, rs1, shamt },
                _ => unreachable!(),
            })
        }

        // ---------- Loads (rd, offset(base)) ----------
        "lb" | "lh" | "lw" | "lbu" | "lhu" => {
            if ops.len() != 2 {
                return Err(format!("{mnemonic}: expected 'rd, offset(base)'"));
            }
            let rd = get_reg(&ops[0])?;
            let (offset, rs1) = parse_mem_operand(&ops[1], mnemonic.as_str())?;
            let imm = check_signed(offset, 12, mnemonic.as_str())?;
            Ok(match mnemonic.as_str() {
                "lb" => Lb { rd, rs1, imm },
                "lh" => Lh { rd, rs1, imm },
                "lw" => Lw { rd, rs1, imm },
                "lbu" => Lbu { rd, rs1, imm },
                "lhu" => Lhu { rd, rs1, imm },
                _ => unreachable!(),
            })
        }

        // ---------- Stores (rs2, offset(base)) ----------
        "sb" | "sh" | "sw" => {
            if ops.len() != 2 {
                return Err(format!("{mnemonic}: expected 'rs2, offset(base)'"));
            }
            let rs2 = get_reg(&ops[0])?;
            let (offset, rs1) = parse_mem_operand(&ops[1], mnemonic.as_str())?;
            let imm = check_signed(offset, 12, mnemonic.as_str())?;
            Ok(match mnemonic.as_str() {
                "sb" => Sb { rs2, rs1, imm },
                "sh" => Sh { rs2, rs1, imm },
                "sw" => Sw { rs2, rs1, imm },
                _ => unreachable!(),
            })
        }

        // ---------- Branches (rs1, rs2, label/offset) ----------
        "beq" | "bne" | "blt" | "bge" | "bltu" | "bgeu" => {
            if ops.len() != 3 {
                return Err(format!("{mnemonic}: expected 'rs1, rs2, label/offset'"));
            }
            let rs1 = get_reg(&ops[0])?;
            let rs2 = get_reg(&ops[1])?;
            let imm = branch_imm(&ops[2], pc, labels, 13, mnemonic.as_str())?;
            Ok(match mnemonic.as_str() {
                "beq" => Beq { rs1, rs2, imm },
                "bne" => Bne { rs1, rs2, imm },
                "blt" => Blt { rs1, rs2, imm },
                "bge" => Bge { rs1, rs2, imm },
                "bltu" => Bltu { rs1, rs2, imm },
                "bgeu" => Bgeu { rs1, rs2, imm },
                _ => unreachable!(),
            })
        }

        // ---------- U-type ----------
        "lui" | "auipc" => {
            if ops.len() != 2 {
                return Err(format!("{mnemonic}: expected 'rd, imm'"));
            }
            let rd = get_reg(&ops[0])?;
            let imm = check_unsigned(parse_imm(&ops[1])?, 20, mnemonic.as_str())?;
            Ok(match mnemonic.as_str() {
                "lui" => Lui { rd, imm },
                "auipc" => Auipc { rd, imm },
                _ => unreachable!(),
            })
        }

        // jal: "jal rd, label" or the short form "jal label" (rd = ra)
        "jal" => match ops.len() {
            1 => Ok(Jal { rd: 1, imm: branch_imm(&ops[0], pc, labels, 21, "jal")? }),
            2 => Ok(Jal {
                rd: get_reg(&ops[0])?,
                imm: branch_imm(&ops[1], pc, labels, 21, "jal")?,
            }),
            _ => Err("jal: expected 'rd, label' or 'label'".into()),
        },
        "jalr" => {
            if ops.len() != 3 {
                return Err("jalr: expected 'rd, rs1, imm'".into());
            }
            let rd = get_reg(&ops[0])?;
            let rs1 = get_reg(&ops[1])?;
            let imm = check_signed(parse_imm(&ops[2])?, 12, "jalr")?;
            Ok(Jalr { rd, rs1, imm })
        }

        // ---------- Zicsr (rd, csr, rs1|uimm) ----------
        "csrrw" | "csrrs" | "csrrc" => {
            if ops.len() != 3 {
                return Err(format!("{mnemonic}: expected 'rd, csr, rs1'"));
            }
            let rd = get_reg(&ops[0])?;
            let csr = check_unsigned(parse_imm(&ops[1])?, 12, mnemonic.as_str())? as u16;
            let rs1 = get_reg(&ops[2])?;
            Ok(match mnemonic.as_str() {
                "csrrw" => Csrrw { rd, rs1, csr },
                "csrrs" => Csrrs { rd, rs1, csr },
                "csrrc" => Csrrc { rd, rs1, csr },
                _ => unreachable!(),
            })
        }
        "csrrwi" | "csrrsi" | "csrrci" => {
            if ops.len() != 3 {
                return Err(format!("{mnemonic}: expected 'rd, csr, uimm'"));
            }
            let rd = get_reg(&ops[0])?;
            let csr = check_unsigned(parse_imm(&ops[1])?, 12, mnemonic.as_str())? as u16;
            let uimm = check_unsigned(parse_imm(&ops[2])?, 5, mnemonic.as_str())? as u8;
            Ok(match mnemonic.as_str() {
                "csrrwi" => Csrrwi { rd, uimm, csr },
                "csrrsi" => Csrrsi { rd, uimm, csr },
                "csrrci" => Csrrci { rd, uimm, csr },
                _ => unreachable!(),
            })
        }

        // ---------- System ----------
        "mret" => {
            if !ops.is_empty() {
                return Err("mret takes no operands".into());
            }
            Ok(Mret)
        }
        "wfi" => {
            if !ops.is_empty() {
                return Err("wfi takes no operands".into());
            }
            Ok(Wfi)
        }
        "halt" => {
            if !ops.is_empty() {
                return Err("halt takes no operands".into());
            }
            Ok(Halt)
        }

        _ => Err(format!("unknown instruction: {mnemonic}")),
    }
}
