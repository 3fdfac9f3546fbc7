//! Memory readers and the native code extractor.
//!
//! All raw dereferencing of process memory lives in [`ProcessMemory`]. The
//! rest of the crate reads through the [`MemoryReader`] trait, which also has
//! an owned implementation for replaying captured regions.

use crate::{Address, CaptureError, NativeCodeBuffer};

/// Default upper bound on how far the extractor scans for padding.
pub const DEFAULT_SCAN_CEILING: usize = 64 * 1024;

/// Read access to some address space.
pub trait MemoryReader {
    /// Read `len` bytes starting at `addr`.
    fn read_bytes(&self, addr: Address, len: usize) -> Result<Vec<u8>, CaptureError>;

    /// Read one little-endian word of `width` bytes (4 or 8).
    fn read_word(&self, addr: Address, width: usize) -> Result<u64, CaptureError> {
        let bytes = self.read_bytes(addr, width)?;
        word_from_le(&bytes)
    }
}

fn word_from_le(bytes: &[u8]) -> Result<u64, CaptureError> {
    match bytes.len() {
        4 => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(bytes);
            Ok(u32::from_le_bytes(buf) as u64)
        }
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            Ok(u64::from_le_bytes(buf))
        }
        n => Err(CaptureError::UnsupportedPlatform(format!("{}-byte words", n))),
    }
}

/// Unsynchronized reads of the current process's address space.
///
/// The JIT may still be writing near the function being read; nothing here
/// guards against that.
#[derive(Debug)]
pub struct ProcessMemory {
    _private: (),
}

impl ProcessMemory {
    /// # Safety
    ///
    /// Every address later passed to this reader must be mapped and readable
    /// for the requested length for as long as the read takes.
    pub unsafe fn assume_mapped() -> Self {
        ProcessMemory { _private: () }
    }
}

impl MemoryReader for ProcessMemory {
    fn read_bytes(&self, addr: Address, len: usize) -> Result<Vec<u8>, CaptureError> {
        if addr == 0 {
            return Err(CaptureError::UnmappedRead { addr, len });
        }
        let mut out = vec![0u8; len];
        // SAFETY: the constructor's contract guarantees the range is readable;
        // `out` is a fresh allocation so the ranges cannot overlap.
        unsafe {
            std::ptr::copy_nonoverlapping(addr as usize as *const u8, out.as_mut_ptr(), len);
        }
        Ok(out)
    }

    fn read_word(&self, addr: Address, width: usize) -> Result<u64, CaptureError> {
        if addr == 0 {
            return Err(CaptureError::UnmappedRead { addr, len: width });
        }
        // SAFETY: see `read_bytes`; unaligned reads are used because runtime
        // structures are not guaranteed to be word aligned.
        unsafe {
            match width {
                4 => Ok(std::ptr::read_unaligned(addr as usize as *const u32) as u64),
                8 => Ok(std::ptr::read_unaligned(addr as usize as *const u64)),
                n => Err(CaptureError::UnsupportedPlatform(format!("{}-byte words", n))),
            }
        }
    }
}

/// A set of owned byte regions placed at virtual addresses.
#[derive(Debug, Clone, Default)]
pub struct RegionMemory {
    regions: Vec<(Address, Vec<u8>)>,
}

impl RegionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `bytes` at `base`. Later mappings shadow earlier ones.
    pub fn map(&mut self, base: Address, bytes: Vec<u8>) {
        self.regions.push((base, bytes));
    }
}

impl MemoryReader for RegionMemory {
    fn read_bytes(&self, addr: Address, len: usize) -> Result<Vec<u8>, CaptureError> {
        let unmapped = CaptureError::UnmappedRead { addr, len };
        let end = addr.checked_add(len as Address).ok_or(CaptureError::UnmappedRead { addr, len })?;

        self.regions
            .iter()
            .rev()
            .find(|(base, bytes)| {
                let region_end = base.checked_add(bytes.len() as Address);
                *base <= addr && region_end.is_some_and(|region_end| end <= region_end)
            })
            .map(|(base, bytes)| {
                let start = (addr - base) as usize;
                bytes[start..start + len].to_vec()
            })
            .ok_or(unmapped)
    }
}

/// Copy a function body starting at `start`.
///
/// Scans forward one word at a time until two consecutive zero words, the
/// padding the code allocator leaves between functions. The stop word itself
/// is excluded.
pub fn extract(
    start: Address,
    memory: &dyn MemoryReader,
    word_size: usize,
    ceiling: usize,
) -> Result<NativeCodeBuffer, CaptureError> {
    let step = word_size as Address;
    let mut len = 0usize;
    let mut current = memory.read_word(start, word_size)?;

    loop {
        if len >= ceiling {
            return Err(CaptureError::ExtractionOverrun { start, ceiling });
        }
        let next_addr = start
            .checked_add(len as Address + step)
            .ok_or(CaptureError::UnmappedRead { addr: start, len: len + 2 * word_size })?;
        let next = memory.read_word(next_addr, word_size)?;
        if current == 0 && next == 0 {
            break;
        }
        current = next;
        len += word_size;
    }

    if len == 0 {
        return Err(CaptureError::EmptyExtraction { start });
    }

    log::debug!("extracted {} bytes from 0x{:x}", len, start);
    NativeCodeBuffer::new(start, memory.read_bytes(start, len)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODE: Address = 0x40_0000;

    fn code_region(body: &[u8], padding: usize) -> RegionMemory {
        let mut bytes = body.to_vec();
        bytes.resize(body.len() + padding, 0);
        let mut memory = RegionMemory::new();
        memory.map(CODE, bytes);
        memory
    }

    #[test]
    fn test_extract_stops_at_double_zero_word() {
        // 12 bytes of code pads to two words, then two zero words.
        let body = [0x55, 0x48, 0x89, 0xe5, 0xb8, 0x01, 0x00, 0x00, 0x00, 0x5d, 0xc3, 0xcc];
        let memory = code_region(&body, 4 + 16);

        let buffer = extract(CODE, &memory, 8, DEFAULT_SCAN_CEILING).unwrap();
        assert_eq!(buffer.base(), CODE);
        assert_eq!(buffer.len(), 16);
        assert_eq!(&buffer.bytes()[..12], &body);
    }

    #[test]
    fn test_single_zero_word_is_not_padding() {
        let mut body = vec![0x90u8; 8];
        body.extend_from_slice(&[0u8; 8]);
        body.extend_from_slice(&[0xc3, 0, 0, 0, 0, 0, 0, 0]);
        let memory = code_region(&body, 16);

        let buffer = extract(CODE, &memory, 8, DEFAULT_SCAN_CEILING).unwrap();
        assert_eq!(buffer.len(), 24);
    }

    #[test]
    fn test_padding_at_entry_is_empty() {
        let memory = code_region(&[], 32);

        let err = extract(CODE, &memory, 8, DEFAULT_SCAN_CEILING).unwrap_err();
        assert!(matches!(err, CaptureError::EmptyExtraction { start: CODE }));
    }

    #[test]
    fn test_overrun_past_ceiling() {
        let memory = code_region(&[0x90; 256], 16);

        let err = extract(CODE, &memory, 8, 64).unwrap_err();
        assert!(matches!(err, CaptureError::ExtractionOverrun { start: CODE, ceiling: 64 }));
    }

    #[test]
    fn test_unmapped_read_surfaces() {
        // No padding before the region ends.
        let memory = code_region(&[0x90; 16], 0);

        let err = extract(CODE, &memory, 8, DEFAULT_SCAN_CEILING).unwrap_err();
        assert!(matches!(err, CaptureError::UnmappedRead { .. }));
    }

    #[test]
    fn test_region_at_top_of_address_space() {
        let mut fits = RegionMemory::new();
        fits.map(u64::MAX - 8, vec![0xaa; 8]);
        assert_eq!(fits.read_bytes(u64::MAX - 8, 8).unwrap(), vec![0xaa; 8]);

        // Ends one past the last addressable byte.
        let mut wraps = RegionMemory::new();
        wraps.map(u64::MAX - 3, vec![0xbb; 4]);
        assert!(matches!(
            wraps.read_bytes(u64::MAX - 3, 2),
            Err(CaptureError::UnmappedRead { .. })
        ));
    }

    /// Every address reads back as non-zero code.
    struct Unpadded;

    impl MemoryReader for Unpadded {
        fn read_bytes(&self, _addr: Address, len: usize) -> Result<Vec<u8>, CaptureError> {
            Ok(vec![0x90; len])
        }
    }

    #[test]
    fn test_scan_past_address_space_is_unmapped() {
        let start = u64::MAX - 7;

        let err = extract(start, &Unpadded, 8, usize::MAX).unwrap_err();
        assert!(matches!(err, CaptureError::UnmappedRead { addr, .. } if addr == start));
    }

    #[test]
    fn test_process_memory_reads_live_heap() {
        let words: Vec<u64> = vec![0x1122_3344_5566_7788, 0, 0];
        let memory = unsafe { ProcessMemory::assume_mapped() };

        let addr = words.as_ptr() as Address;
        assert_eq!(memory.read_word(addr, 8).unwrap(), 0x1122_3344_5566_7788);
        assert_eq!(memory.read_word(addr, 4).unwrap(), 0x5566_7788);

        let buffer = extract(addr, &memory, 8, DEFAULT_SCAN_CEILING).unwrap();
        assert_eq!(buffer.bytes(), &0x1122_3344_5566_7788u64.to_le_bytes());
    }
}
