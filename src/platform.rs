//! Platform descriptors and the code locator.
//!
//! Finding a function's entry point means walking runtime-internal structures
//! whose layout depends on the host runtime version and the pointer width. A
//! `PlatformDescriptor` records that layout; `locate` refuses to read anything
//! unless the running process matches it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::memory::MemoryReader;
use crate::{Address, Architecture, CaptureError};

/// Opaque handle to a compiled function, as handed out by the host runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledFunctionHandle {
    /// Human-readable function name, also used for snapshot file names
    pub name: String,
    /// Address of the runtime's descriptor for this function
    pub descriptor: Address,
    /// Major version of the host runtime that owns the descriptor
    pub runtime_major: u32,
}

impl CompiledFunctionHandle {
    pub fn new(name: impl Into<String>, descriptor: Address, runtime_major: u32) -> Self {
        Self {
            name: name.into(),
            descriptor,
            runtime_major,
        }
    }

    /// Rejects null descriptors and names that cannot be used as file stems.
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.descriptor == 0 {
            return Err(CaptureError::InvalidInput(format!(
                "null descriptor for function '{}'",
                self.name
            )));
        }
        if self.name.is_empty() {
            return Err(CaptureError::InvalidInput("empty function name".into()));
        }
        if self.name.contains(['/', '\\']) || self.name == "." || self.name == ".." {
            return Err(CaptureError::InvalidInput(format!(
                "function name '{}' is not usable as a file name",
                self.name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for CompiledFunctionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ 0x{:x}", self.name, self.descriptor)
    }
}

/// Fixed layout facts for one (architecture, runtime version) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformDescriptor {
    /// Name used in error messages and logs
    pub name: String,
    /// Instruction set the runtime emits
    pub architecture: Architecture,
    /// Pointer width in bytes the offsets were derived for
    pub pointer_width: usize,
    /// Host runtime major version the offsets were derived for
    pub runtime_major: u32,
    /// Byte offsets to dereference, in order, starting at the function
    /// descriptor. The last read yields the native entry point.
    pub entry_point_chain: Vec<usize>,
}

impl PlatformDescriptor {
    /// Dynamic methods on the version 4 runtime, 64-bit process.
    ///
    /// descriptor[+0x20] -> code header; code header[+0x58] -> entry point.
    pub fn dynamic_method_v4_x64() -> Self {
        Self {
            name: "dynamic-method-v4/x86-64".to_string(),
            architecture: Architecture::X86_64,
            pointer_width: 8,
            runtime_major: 4,
            entry_point_chain: vec![0x4 * 8, 0xB * 8],
        }
    }

    /// Check the descriptor against the running process and the handle.
    ///
    /// This must pass before any memory is dereferenced.
    pub fn check(&self, handle: &CompiledFunctionHandle) -> Result<(), CaptureError> {
        let host_width = std::mem::size_of::<usize>();

        if self.pointer_width != host_width {
            return Err(CaptureError::UnsupportedPlatform(format!(
                "{}: descriptor assumes {}-byte pointers, process uses {}",
                self.name, self.pointer_width, host_width
            )));
        }
        if self.architecture.pointer_width() != self.pointer_width {
            return Err(CaptureError::UnsupportedPlatform(format!(
                "{}: {} does not use {}-byte pointers",
                self.name, self.architecture, self.pointer_width
            )));
        }
        if self.runtime_major != handle.runtime_major {
            return Err(CaptureError::UnsupportedPlatform(format!(
                "{}: descriptor targets runtime version {}, host runtime is {}",
                self.name, self.runtime_major, handle.runtime_major
            )));
        }
        if self.entry_point_chain.is_empty() {
            return Err(CaptureError::UnsupportedPlatform(format!(
                "{}: empty entry point chain",
                self.name
            )));
        }
        Ok(())
    }
}

impl Default for PlatformDescriptor {
    fn default() -> Self {
        Self::dynamic_method_v4_x64()
    }
}

/// Resolve the native entry point of `handle`.
///
/// Walks `platform.entry_point_chain` through `memory`. A null pointer at any
/// step means the runtime has not finished compiling the function.
pub fn locate(
    handle: &CompiledFunctionHandle,
    platform: &PlatformDescriptor,
    memory: &dyn MemoryReader,
) -> Result<Address, CaptureError> {
    handle.validate()?;
    platform.check(handle)?;

    let mut addr = handle.descriptor;
    for offset in &platform.entry_point_chain {
        let slot = addr.checked_add(*offset as Address).ok_or_else(|| {
            CaptureError::Generic(format!("pointer overflow walking descriptor of {}", handle))
        })?;
        addr = memory.read_word(slot, platform.pointer_width)?;
        if addr == 0 {
            return Err(CaptureError::NotYetCompiled {
                function: handle.name.clone(),
            });
        }
    }

    log::debug!("{}: native code at 0x{:x}", handle, addr);
    Ok(addr)
}
