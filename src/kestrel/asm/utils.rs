use std::collections::HashMap;

// Lexical helpers shared by the assembler passes.

/// Strip comments and blank lines, keeping 1-based line numbers. `#` and `;`
/// open a comment only outside string and character literals.
pub(crate) fn preprocess(text: &str) -> Vec<(usize, String)> {
    text.lines()
        .enumerate()
        .map(|(i, l)| (i + 1, strip_comment(l).trim().to_string()))
        .filter(|(_, l)| !l.is_empty())
        .collect()
}

fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut in_char = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string || in_char => escaped = true,
            '"' if !in_char => in_string = !in_string,
            '\'' if !in_string => in_char = !in_char,
            '#' | ';' if !in_string && !in_char => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Split an operand list on commas, except inside string or character
/// literals.
pub(crate) fn split_operands(rest: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_string = false;
    let mut in_char = false;
    let mut escaped = false;
    for c in rest.chars() {
        if escaped {
            cur.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string || in_char => {
                cur.push(c);
                escaped = true;
            }
            '"' if !in_char => {
                cur.push(c);
                in_string = !in_string;
            }
            '\'' if !in_string => {
                cur.push(c);
                in_char = !in_char;
            }
            ',' if !in_string && !in_char => {
                out.push(cur.trim().to_string());
                cur.clear();
            }
            _ => cur.push(c),
        }
    }
    out.push(cur.trim().to_string());
    out.retain(|s| !s.is_empty());
    out
}

/// ABI register names in numeric order; index doubles as the register
/// number. `fp` is folded onto s0 separately since two names share slot 8.
const ABI_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1",
    "a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7",
    "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11",
    "t3", "t4", "t5", "t6",
];

/// Register number from `x0`..`x31` or an ABI name; case-insensitive.
pub(crate) fn parse_reg(s: &str) -> Option<u8> {
    let s = s.trim().to_lowercase();
    if let Some(num) = s.strip_prefix('x') {
        return match num.parse::<u8>() {
            Ok(n) if n < 32 => Some(n),
            _ => None,
        };
    }
    if s == "fp" {
        return Some(8);
    }
    ABI_NAMES.iter().position(|&name| name == s).map(|i| i as u8)
}

/// Integer literal: decimal, `0x` hex, `0b` binary, or a character literal,
/// with an optional leading minus on the numeric forms.
pub(crate) fn parse_imm(s: &str) -> Result<i32, String> {
    let s = s.trim();
    if s.starts_with('\'') {
        return parse_char_literal(s);
    }

    let (neg, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest.trim()),
        None => (false, s),
    };
    let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).ok()
    } else {
        digits.parse::<i64>().ok()
    };
    let magnitude = magnitude.ok_or_else(|| format!("invalid immediate: {s}"))?;
    let value = if neg { -magnitude } else { magnitude };
    if value < i32::MIN as i64 || value > u32::MAX as i64 {
        return Err(format!("immediate out of 32-bit range: {s}"));
    }
    Ok(value as u32 as i32)
}

fn parse_char_literal(s: &str) -> Result<i32, String> {
    let inner = s
        .strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .ok_or_else(|| format!("unterminated character literal: {s}"))?;
    let mut chars = inner.chars();
    let value = match (chars.next(), chars.next(), chars.next()) {
        (Some('\\'), Some(esc), None) => escape_byte(esc)? as i32,
        (Some(c), None, _) if c != '\\' => c as i32,
        (None, ..) => return Err("empty character literal".into()),
        _ => return Err(format!("multi-character literal not supported: {s}")),
    };
    Ok(value)
}

fn escape_byte(c: char) -> Result<u8, String> {
    match c {
        'n' => Ok(b'\n'),
        't' => Ok(b'\t'),
        'r' => Ok(b'\r'),
        '0' => Ok(0),
        '\\' => Ok(b'\\'),
        '\'' => Ok(b'\''),
        '"' => Ok(b'"'),
        _ => Err(format!("unknown escape sequence: \\{c}")),
    }
}

/// The bytes of a double-quoted string literal, escapes resolved.
pub(crate) fn parse_str_lit(s: &str) -> Result<Vec<u8>, String> {
    let s = s.trim();
    let inner = s
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .filter(|_| s.len() >= 2)
        .ok_or_else(|| format!("unterminated string literal: {s}"))?;

    let mut bytes = Vec::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            let esc = chars.next().ok_or("unterminated escape at end of string")?;
            bytes.push(escape_byte(esc)?);
        } else {
            bytes.push(c as u8);
        }
    }
    Ok(bytes)
}

/// Width check for the sign-extended immediate fields: 12-bit I/S-type
/// offsets, 13-bit branch and 21-bit jump displacements.
pub(crate) fn check_signed(imm: i32, bits: u32, ctx: &str) -> Result<i32, String> {
    let limit = 1i64 << (bits - 1);
    if ((-limit)..limit).contains(&i64::from(imm)) {
        Ok(imm)
    } else {
        Err(format!(
            "{ctx}: {imm} does not fit in a signed {bits}-bit field ({}..={})",
            -limit,
            limit - 1
        ))
    }
}

/// Width check for the zero-extended immediate fields: 5-bit shift amounts
/// and CSR immediates, 12-bit CSR addresses, 20-bit upper immediates.
pub(crate) fn check_unsigned(imm: i32, bits: u32, ctx: &str) -> Result<u32, String> {
    let value = imm as u32;
    if u64::from(value) < 1u64 << bits {
        Ok(value)
    } else {
        Err(format!(
            "{ctx}: 0x{value:X} does not fit in an unsigned {bits}-bit field"
        ))
    }
}

/// Branch/jump target: a numeric offset or a label resolved PC-relative.
/// Targets sit on 2-byte boundaries, so the offset must be even.
pub(crate) fn branch_imm(
    tok: &str,
    pc: u32,
    labels: &HashMap<String, u32>,
    bits: u32,
    ctx: &str,
) -> Result<i32, String> {
    let imm = match parse_imm(tok) {
        Ok(v) => v,
        Err(e) => {
            if !looks_like_label(tok) {
                return Err(e);
            }
            let target = labels
                .get(tok)
                .ok_or_else(|| format!("undefined label: {tok}"))?;
            (*target as i64 - pc as i64) as i32
        }
    };
    if imm & 1 != 0 {
        return Err(format!(
            "{ctx}: target offset {imm} is odd; instruction addresses are 2-byte aligned"
        ));
    }
    check_signed(imm, bits, ctx)
}

/// I-type immediate: a literal or a label resolved to its absolute address.
pub(crate) fn abs_imm(
    tok: &str,
    labels: &HashMap<String, u32>,
    bits: u32,
    ctx: &str,
) -> Result<i32, String> {
    let imm = match parse_imm(tok) {
        Ok(v) => v,
        Err(e) => match labels.get(tok) {
            Some(addr) => *addr as i32,
            None if looks_like_label(tok) => {
                return Err(format!("undefined label: {tok}"));
            }
            None => return Err(e),
        },
    };
    check_signed(imm, bits, ctx)
}

fn looks_like_label(tok: &str) -> bool {
    tok.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
}

/// An `offset(base)` memory operand as used by loads and stores. The offset
/// may be omitted (`(sp)` means zero); the base must name a register.
pub(crate) fn parse_mem_operand(op: &str, ctx: &str) -> Result<(i32, u8), String> {
    let body = op
        .trim()
        .strip_suffix(')')
        .and_then(|b| b.split_once('('))
        .ok_or_else(|| format!("{ctx}: '{op}' is not an 'offset(base)' operand"))?;
    let (offset_s, base_s) = body;
    let offset = match offset_s.trim() {
        "" => 0,
        s => parse_imm(s)?,
    };
    let base = parse_reg(base_s)
        .ok_or_else(|| format!("{ctx}: unknown base register '{}'", base_s.trim()))?;
    Ok((offset, base))
}
