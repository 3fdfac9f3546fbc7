//! Capture configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::memory::DEFAULT_SCAN_CEILING;
use crate::platform::PlatformDescriptor;
use crate::CaptureError;

/// Everything a capture needs besides the function handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Directory holding captures and diffs
    pub snapshot_root: PathBuf,
    /// Runtime layout used to find entry points
    pub platform: PlatformDescriptor,
    /// Maximum bytes the extractor scans before giving up
    pub scan_ceiling: usize,
}

impl CaptureConfig {
    pub fn new(snapshot_root: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_root: snapshot_root.into(),
            ..Self::default()
        }
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| CaptureError::Storage {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&raw).map_err(|e| {
            CaptureError::InvalidInput(format!("config {}: {}", path.display(), e))
        })
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            snapshot_root: std::env::temp_dir().join("jitdiff"),
            platform: PlatformDescriptor::default(),
            scan_ceiling: DEFAULT_SCAN_CEILING,
        }
    }
}
