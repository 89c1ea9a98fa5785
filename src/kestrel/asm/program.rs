use std::collections::HashMap;

use crate::kestrel::instruction::Instruction;

/// The output of a successful assembly: decoded text, the initialized data
/// image, and the resolved symbol table.
#[derive(Debug)]
pub struct Program {
    /// Decoded instructions, one per text word, starting at address 0.
    pub text: Vec<Instruction>,
    /// Raw bytes for the data segment, little-endian where multi-byte.
    pub data: Vec<u8>,
    /// Base address the data image loads at.
    pub data_base: u32,
    /// Label name to absolute byte address.
    pub labels: HashMap<String, u32>,
}
