//! The capture-and-diff entry point.
//!
//! locate -> extract -> decode -> trim -> format -> persist, then, when an
//! older capture exists, normalize both, diff, collapse, and persist the
//! rendered diff.

use std::path::PathBuf;

use crate::config::CaptureConfig;
use crate::decoder::CapstoneDecoder;
use crate::diff::{self, DiffReport};
use crate::format::{format_capture, DisassemblyText, Listing};
use crate::memory::{self, MemoryReader, ProcessMemory};
use crate::normalize::normalize;
use crate::platform::{self, CompiledFunctionHandle, PlatformDescriptor};
use crate::snapshot::SnapshotStore;
use crate::trim::trim;
use crate::{CaptureError, CaptureWarning, Decoder};

/// One freshly taken capture, not yet persisted.
#[derive(Debug, Clone)]
pub struct Capture {
    pub text: DisassemblyText,
    pub warnings: Vec<CaptureWarning>,
}

/// A diff persisted next to a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffArtifact {
    /// Index of the oldest capture the diff was taken against
    pub baseline_index: u32,
    pub path: PathBuf,
    pub additions: usize,
    pub deletions: usize,
}

/// What `capture_and_diff` wrote.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub function: String,
    pub index: u32,
    pub snapshot_path: PathBuf,
    pub diff: Option<DiffArtifact>,
    pub warnings: Vec<CaptureWarning>,
}

/// Disassemble the native code of `handle` without touching the disk.
pub fn capture(
    handle: &CompiledFunctionHandle,
    platform: &PlatformDescriptor,
    memory: &dyn MemoryReader,
    decoder: &dyn Decoder,
    scan_ceiling: usize,
) -> Result<Capture, CaptureError> {
    if decoder.architecture() != platform.architecture {
        return Err(CaptureError::UnsupportedPlatform(format!(
            "{} decoder cannot read {} code",
            decoder.architecture(),
            platform.architecture
        )));
    }

    let entry = platform::locate(handle, platform, memory)?;
    let buffer = memory::extract(entry, memory, platform.pointer_width, scan_ceiling)?;
    let trimmed = trim(decoder.decode(&buffer)?);

    log::debug!(
        "{}: {} instructions, {} bytes after trimming",
        handle.name,
        trimmed.stream.len(),
        trimmed.stream.byte_len()
    );

    Ok(Capture {
        text: format_capture(&handle.name, handle.descriptor, &trimmed.stream),
        warnings: trimmed.warning.into_iter().collect(),
    })
}

/// Normalize two persisted captures and produce the collapsed diff.
///
/// `old_index` and `new_index` only label parse errors, which name both.
pub fn diff_captures(
    function: &str,
    old: &str,
    old_index: u32,
    new: &str,
    new_index: u32,
) -> Result<DiffReport, CaptureError> {
    let old = Listing::parse(old)
        .map_err(|e| e.into_capture_error(function, old_index, old_index, new_index))?;
    let new = Listing::parse(new)
        .map_err(|e| e.into_capture_error(function, new_index, old_index, new_index))?;

    Ok(diff::postprocess(diff::diff(&normalize(&old), &normalize(&new))))
}

/// Capture `handle`, persist it, and diff it against the oldest stored
/// capture of the same function.
///
/// The capture and its diff are both computed before anything is written, so
/// a failed capture or an unreadable baseline leaves the store untouched. A
/// stale diff artifact at the target path is replaced.
pub fn capture_and_diff_with(
    handle: &CompiledFunctionHandle,
    config: &CaptureConfig,
    memory: &dyn MemoryReader,
    decoder: &dyn Decoder,
) -> Result<CaptureOutcome, CaptureError> {
    let capture = capture(handle, &config.platform, memory, decoder, config.scan_ceiling)?;
    let function = handle.name.as_str();

    let store = SnapshotStore::open(&config.snapshot_root)?;
    let existing = store.indices(function)?;

    let (index, baseline) = match (existing.first(), existing.last()) {
        (Some(&min), Some(&max)) => {
            let next = max.checked_add(1).ok_or_else(|| {
                CaptureError::InvalidInput(format!(
                    "{}: capture index {} is the last one available",
                    function, max
                ))
            })?;
            (next, Some(min))
        }
        _ => (0, None),
    };

    let report = match baseline {
        Some(baseline_index) => {
            let old = store.load(function, baseline_index)?;
            let report = diff_captures(function, &old, baseline_index, capture.text.as_str(), index)?;
            Some((baseline_index, report))
        }
        None => None,
    };

    let snapshot_path = store.save_capture(function, index, &capture.text)?;

    let diff = match report {
        Some((baseline_index, report)) => {
            let path = store.save_diff(function, baseline_index, index, &report.render())?;
            Some(DiffArtifact {
                baseline_index,
                path,
                additions: report.additions,
                deletions: report.deletions,
            })
        }
        None => None,
    };

    Ok(CaptureOutcome {
        function: function.to_string(),
        index,
        snapshot_path,
        diff,
        warnings: capture.warnings,
    })
}

/// Capture from the current process with a Capstone decoder.
///
/// # Safety
///
/// `handle.descriptor` must point at a live runtime descriptor laid out as
/// `config.platform` describes, and the code it leads to must stay mapped
/// for the duration of the call.
pub unsafe fn capture_and_diff(
    handle: &CompiledFunctionHandle,
    config: &CaptureConfig,
) -> Result<CaptureOutcome, CaptureError> {
    let memory = ProcessMemory::assume_mapped();
    let decoder = CapstoneDecoder::for_architecture(config.platform.architecture)?;
    capture_and_diff_with(handle, config, &memory, &decoder)
}
