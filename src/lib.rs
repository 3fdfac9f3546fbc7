//! Core types, traits, and errors for the jitdiff capture-and-diff pipeline.
//!
//! This library locates the native code a just-in-time compiler produced for a
//! single function, disassembles it with Capstone, and diffs successive
//! captures of the same function after normalizing away address noise.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use jitdiff::{
//!     capture::capture_and_diff,
//!     config::CaptureConfig,
//!     platform::CompiledFunctionHandle,
//! };
//!
//! // The host runtime hands out the descriptor address of a compiled function.
//! let descriptor_addr = 0x7ff6_1234_0000;
//! let handle = CompiledFunctionHandle::new("Add", descriptor_addr, 4);
//!
//! let config = CaptureConfig::new("/tmp/jitdiff");
//!
//! // SAFETY: the descriptor belongs to a live, compiled function.
//! let outcome = unsafe { capture_and_diff(&handle, &config) }.unwrap();
//!
//! if let Some(diff) = outcome.diff {
//!     println!("{} additions, {} deletions", diff.additions, diff.deletions);
//! }
//! ```

pub mod platform;
pub mod memory;
pub mod decoder;
pub mod trim;
pub mod format;
pub mod normalize;
pub mod diff;
pub mod snapshot;
pub mod config;
pub mod capture;
mod pipeline_tests;

/// Represents an address in memory
pub type Address = u64;

use std::fmt;
use std::path::PathBuf;

/// Maximum instruction size in bytes
pub const MAX_INSTRUCTION_SIZE: usize = 16;

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insn {
    /// Address of the instruction
    pub addr: Address,
    /// Size of the instruction in bytes
    pub size: u8,
    /// Instruction mnemonic (e.g., "mov", "rep movsb")
    pub mnemonic: String,
    /// Instruction operands as string representation
    pub operands: String,
    /// Raw bytes of the instruction (up to MAX_INSTRUCTION_SIZE)
    pub bytes: [u8; MAX_INSTRUCTION_SIZE],
}

impl Insn {
    /// Build an instruction from its encoding, truncating at MAX_INSTRUCTION_SIZE.
    pub fn new(addr: Address, encoding: &[u8], mnemonic: &str, operands: &str) -> Self {
        let mut bytes = [0u8; MAX_INSTRUCTION_SIZE];
        let size = encoding.len().min(MAX_INSTRUCTION_SIZE);
        bytes[..size].copy_from_slice(&encoding[..size]);

        Self {
            addr,
            size: size as u8,
            mnemonic: mnemonic.to_string(),
            operands: operands.to_string(),
            bytes,
        }
    }

    /// Returns the instruction bytes, up to the actual instruction size.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.size as usize]
    }

    /// Address of the first byte past this instruction.
    pub fn end_address(&self) -> Address {
        self.addr + self.size as Address
    }

    /// The mnemonic without prefix words such as `rep`, `lock` or `bnd`.
    pub fn base_mnemonic(&self) -> &str {
        self.mnemonic.split_whitespace().last().unwrap_or("")
    }

    /// Single-byte near return (`c3`).
    pub fn is_short_return(&self) -> bool {
        self.base_mnemonic() == "ret" && self.size == 1
    }

    /// Breakpoint trap (`int3`).
    pub fn is_trap(&self) -> bool {
        self.base_mnemonic() == "int3"
    }

    /// Unconditional jump, direct or indirect.
    pub fn is_unconditional_jump(&self) -> bool {
        self.base_mnemonic() == "jmp"
    }

    /// True for the instructions that reliably end a function body.
    pub fn is_sentinel(&self) -> bool {
        self.is_short_return() || self.is_trap() || self.is_unconditional_jump()
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.mnemonic, self.operands)
    }
}

/// Contiguous, address-ordered run of decoded instructions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstructionStream {
    insns: Vec<Insn>,
}

impl InstructionStream {
    /// Wrap decoded instructions, checking that they are contiguous with no
    /// gaps or overlaps.
    pub fn new(insns: Vec<Insn>) -> Result<Self, CaptureError> {
        for pair in insns.windows(2) {
            if pair[0].end_address() != pair[1].addr {
                return Err(CaptureError::MalformedStream {
                    expected: pair[0].end_address(),
                    found: pair[1].addr,
                });
            }
        }

        Ok(Self { insns })
    }

    /// Get the instructions as a slice
    pub fn insns(&self) -> &[Insn] {
        &self.insns
    }

    /// Get the total number of instructions
    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Total number of bytes covered by the stream.
    pub fn byte_len(&self) -> usize {
        self.insns.iter().map(|i| i.size as usize).sum()
    }

    /// Keep only the first `len` instructions. A prefix of a contiguous
    /// stream is still contiguous.
    pub(crate) fn truncate(mut self, len: usize) -> Self {
        self.insns.truncate(len);
        self
    }

    pub fn last(&self) -> Option<&Insn> {
        self.insns.last()
    }
}

/// Supported architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub enum Architecture {
    /// 32-bit x86
    X86_32,
    /// 64-bit x86
    X86_64,
}

impl Architecture {
    /// Pointer width of the architecture in bytes.
    pub fn pointer_width(&self) -> usize {
        match self {
            Architecture::X86_32 => 4,
            Architecture::X86_64 => 8,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X86_32 => write!(f, "x86-32"),
            Architecture::X86_64 => write!(f, "x86-64"),
        }
    }
}

/// A freshly extracted copy of a function's native code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCodeBuffer {
    base: Address,
    bytes: Vec<u8>,
}

impl NativeCodeBuffer {
    /// Fails with `EmptyExtraction` when `bytes` is empty.
    pub fn new(base: Address, bytes: Vec<u8>) -> Result<Self, CaptureError> {
        if bytes.is_empty() {
            return Err(CaptureError::EmptyExtraction { start: base });
        }
        Ok(Self { base, bytes })
    }

    /// Virtual address the bytes were copied from
    pub fn base(&self) -> Address {
        self.base
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Decoder trait: turns a code buffer into an instruction stream.
pub trait Decoder: Send + Sync {
    /// Architecture this decoder is configured for.
    fn architecture(&self) -> Architecture;

    /// Decode `buffer` linearly from its base address.
    ///
    /// # Returns
    /// Instructions in increasing address order, each carrying its exact raw
    /// bytes. Fails with `EmptyDisassembly` if nothing decodes.
    fn decode(&self, buffer: &NativeCodeBuffer) -> Result<InstructionStream, CaptureError>;
}

/// Non-fatal conditions raised while capturing.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum CaptureWarning {
    /// No return, trap or jump was found; the full decoded stream was kept.
    NoTerminatorFound {
        /// Number of instructions kept
        instructions: usize,
    },
}

impl fmt::Display for CaptureWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureWarning::NoTerminatorFound { instructions } => write!(
                f,
                "no terminating instruction found, keeping all {} instructions",
                instructions
            ),
        }
    }
}

/// Error type for capture and diff operations
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Null handle or unusable function name
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Pointer width or host runtime version does not match the descriptor
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// The function's entry point has not been resolved yet
    #[error("Function {function} has not been compiled to native code yet")]
    NotYetCompiled { function: String },

    /// A replayed memory image has no bytes at this address
    #[error("Unmapped read of {len} bytes at 0x{addr:x}")]
    UnmappedRead { addr: Address, len: usize },

    /// No padding terminator was found within the scan ceiling
    #[error("Extraction from 0x{start:x} exceeded the {ceiling}-byte safety ceiling")]
    ExtractionOverrun { start: Address, ceiling: usize },

    /// The extractor found padding immediately at the entry point
    #[error("Nothing to extract at 0x{start:x}")]
    EmptyExtraction { start: Address },

    /// The decoder produced no instructions
    #[error("Nothing to disassemble at 0x{start:x}")]
    EmptyDisassembly { start: Address },

    /// Decoded instructions are not contiguous
    #[error("Instruction stream is not contiguous: expected 0x{expected:x}, found 0x{found:x}")]
    MalformedStream { expected: Address, found: Address },

    /// Decoder error
    #[error("Decoder error: {0}")]
    Decoder(#[from] decoder::DecoderError),

    /// Snapshot file could not be read or written
    #[error("Storage error on {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted capture could not be parsed back while diffing capture
    /// `current` against capture `baseline`
    #[error(
        "Malformed snapshot {function}_{index} (diffing {function}_{baseline} against \
         {function}_{current}), line {line}: {reason}"
    )]
    MalformedSnapshot {
        function: String,
        /// The capture that failed to parse
        index: u32,
        baseline: u32,
        current: u32,
        line: usize,
        reason: String,
    },

    /// Generic error
    #[error("{0}")]
    Generic(String),
}
