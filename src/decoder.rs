//! Capstone-based decoder for the x86 family.

use std::fmt;

use capstone::arch::x86::{ArchMode as X86Mode, ArchSyntax as X86Syntax};
use capstone::prelude::*;
use capstone::Capstone;

use crate::{Architecture, CaptureError, Decoder, InstructionStream, Insn, NativeCodeBuffer};

/// Errors that can occur during decoding
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    /// Capstone error
    #[error("Capstone error: {0}")]
    CapstoneError(#[from] capstone::Error),
}

/// A Capstone decoder fixed to one bit width, Intel syntax.
#[derive(Debug)]
pub enum CapstoneDecoder {
    X86_32(Capstone),
    X86_64(Capstone),
}

// SAFETY: Capstone's C-API handle is thread-safe if you never call
// `disasm_all` concurrently on the *same* handle, and `decode` takes `&self`
// on a handle that is never shared across concurrent captures.
unsafe impl Send for CapstoneDecoder {}
unsafe impl Sync for CapstoneDecoder {}

impl CapstoneDecoder {
    /// Create a decoder for a specific architecture
    pub fn for_architecture(arch: Architecture) -> Result<Self, DecoderError> {
        match arch {
            Architecture::X86_32 => Ok(CapstoneDecoder::X86_32(Self::build_x86(X86Mode::Mode32)?)),
            Architecture::X86_64 => Ok(CapstoneDecoder::X86_64(Self::build_x86(X86Mode::Mode64)?)),
        }
    }

    /// Build an x86 decoder. Syntax is pinned to Intel: the normalization
    /// heuristics expect mnemonic-first lines and `0x`-prefixed targets.
    fn build_x86(mode: X86Mode) -> Result<Capstone, DecoderError> {
        Ok(Capstone::new()
            .x86()
            .mode(mode)
            .syntax(X86Syntax::Intel)
            .detail(false)
            .build()?)
    }

    fn handle(&self) -> &Capstone {
        match self {
            CapstoneDecoder::X86_32(cs) | CapstoneDecoder::X86_64(cs) => cs,
        }
    }
}

impl fmt::Display for CapstoneDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapstoneDecoder::{}", self.architecture())
    }
}

impl Decoder for CapstoneDecoder {
    fn architecture(&self) -> Architecture {
        match self {
            CapstoneDecoder::X86_32(_) => Architecture::X86_32,
            CapstoneDecoder::X86_64(_) => Architecture::X86_64,
        }
    }

    fn decode(&self, buffer: &NativeCodeBuffer) -> Result<InstructionStream, CaptureError> {
        let decoded = self
            .handle()
            .disasm_all(buffer.bytes(), buffer.base())
            .map_err(DecoderError::from)?;

        let insns: Vec<Insn> = decoded
            .iter()
            .map(|i| {
                Insn::new(
                    i.address(),
                    i.bytes(),
                    i.mnemonic().unwrap_or(""),
                    i.op_str().unwrap_or(""),
                )
            })
            .collect();

        if insns.is_empty() {
            return Err(CaptureError::EmptyDisassembly { start: buffer.base() });
        }

        log::debug!(
            "{}: decoded {} instructions from {} bytes at 0x{:x}",
            self,
            insns.len(),
            buffer.len(),
            buffer.base()
        );
        InstructionStream::new(insns)
    }
}
