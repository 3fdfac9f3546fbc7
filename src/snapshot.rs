//! On-disk store of captures and diff artifacts.
//!
//! Layout, one directory per installation:
//!
//! - `<function>_<index>.txt` – one capture, never overwritten
//! - `<function>_<baseline><index>.diff` – capture `index` diffed against the
//!   oldest capture `baseline`
//!
//! Index assignment is not locked. Callers must not capture the same
//! function concurrently.

use std::fs;
use std::path::{Path, PathBuf};

use crate::format::DisassemblyText;
use crate::CaptureError;

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Use `root`, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CaptureError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| storage(&root, source))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn capture_path(&self, function: &str, index: u32) -> PathBuf {
        self.root.join(format!("{}_{}.txt", function, index))
    }

    pub fn diff_path(&self, function: &str, baseline: u32, index: u32) -> PathBuf {
        self.root.join(format!("{}_{}{}.diff", function, baseline, index))
    }

    /// Sorted indices of the stored captures of `function`.
    pub fn indices(&self, function: &str) -> Result<Vec<u32>, CaptureError> {
        let entries = fs::read_dir(&self.root).map_err(|source| storage(&self.root, source))?;
        let mut indices = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|source| storage(&self.root, source))?;
            let name = entry.file_name();
            if let Some(index) = name.to_str().and_then(|name| capture_index(name, function)) {
                indices.push(index);
            }
        }

        indices.sort_unstable();
        Ok(indices)
    }

    /// Read one capture back.
    pub fn load(&self, function: &str, index: u32) -> Result<String, CaptureError> {
        let path = self.capture_path(function, index);
        fs::read_to_string(&path).map_err(|source| storage(&path, source))
    }

    /// Persist a capture. Existing files are never overwritten.
    pub fn save_capture(
        &self,
        function: &str,
        index: u32,
        text: &DisassemblyText,
    ) -> Result<PathBuf, CaptureError> {
        let path = self.capture_path(function, index);
        write_new(&path, text.as_str())?;
        log::info!("saved capture {}", path.display());
        Ok(path)
    }

    /// Persist a rendered diff, replacing any stale diff of the same pair.
    pub fn save_diff(
        &self,
        function: &str,
        baseline: u32,
        index: u32,
        rendered: &str,
    ) -> Result<PathBuf, CaptureError> {
        let path = self.diff_path(function, baseline, index);
        fs::write(&path, rendered).map_err(|source| storage(&path, source))?;
        log::info!("saved diff {}", path.display());
        Ok(path)
    }
}

/// `Some(index)` if `file_name` is exactly `<function>_<digits>.txt`.
fn capture_index(file_name: &str, function: &str) -> Option<u32> {
    let digits = file_name
        .strip_suffix(".txt")?
        .strip_prefix(function)?
        .strip_prefix('_')?;

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn write_new(path: &Path, contents: &str) -> Result<(), CaptureError> {
    use std::io::Write;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| storage(path, source))?;
    file.write_all(contents.as_bytes())
        .map_err(|source| storage(path, source))
}

fn storage(path: &Path, source: std::io::Error) -> CaptureError {
    CaptureError::Storage {
        path: path.to_path_buf(),
        source,
    }
}
