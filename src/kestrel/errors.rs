// kestrel/errors.rs
use thiserror::Error;

use super::asm::AsmError;

/// Memory access failures. Each variant carries the faulting address so the
/// exception reporter can localize it without re-deriving state.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    #[error("memory access out of bounds: 0x{addr:08X} (size: {size})")]
    OutOfBounds { addr: u32, size: u32 },

    #[error("unaligned memory access: 0x{addr:08X} (must be {align}-byte aligned)")]
    Unaligned { addr: u32, align: u32 },

    #[error("write to protected text segment: 0x{addr:08X}")]
    Protected { addr: u32 },
}

impl MemoryError {
    pub fn address(&self) -> u32 {
        match *self {
            MemoryError::OutOfBounds { addr, .. }
            | MemoryError::Unaligned { addr, .. }
            | MemoryError::Protected { addr } => addr,
        }
    }
}

/// Fatal errors surfaced by `step`/`run`. The core never catches these
/// itself; the caller decides whether to wrap them in a formatted report.
#[derive(Error, Debug)]
pub enum VmError {
    #[error(transparent)]
    Assembly(#[from] AsmError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("PC out of bounds: 0x{0:08X}")]
    PcOutOfBounds(u32),

    #[error("PC not 4-byte aligned: 0x{0:08X}")]
    PcUnaligned(u32),

    #[error("WFI with interrupts globally disabled for {0} ticks (deadlock)")]
    WfiDeadlock(u64),
}

impl VmError {
    /// The faulting data address, when the error has one.
    pub fn fault_address(&self) -> Option<u32> {
        match self {
            VmError::Memory(e) => Some(e.address()),
            VmError::PcOutOfBounds(pc) | VmError::PcUnaligned(pc) => Some(*pc),
            _ => None,
        }
    }
}
