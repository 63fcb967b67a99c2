//! Upload assembly engine: part storage, merging and size verification

use std::path::{Path, PathBuf};
use upstitch_core::*;

pub mod assembler;
pub mod guard;
pub mod part_store;
pub mod verify;

pub use assembler::*;
pub use guard::*;
pub use part_store::*;
pub use verify::*;

/// Default number of assembled upload identifiers remembered by the merge guard
pub const DEFAULT_ASSEMBLED_HISTORY: usize = 1024;

/// Directories and limits for one upload receiver
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Holds assembled files and, transiently, stored parts
    pub upload_dir: PathBuf,
    /// Staging area for multipart file fields
    pub temp_dir: PathBuf,
    pub assembled_history: usize,
}

impl UploadConfig {
    pub fn new(upload_dir: impl AsRef<Path>, temp_dir: impl AsRef<Path>) -> Self {
        UploadConfig {
            upload_dir: upload_dir.as_ref().to_path_buf(),
            temp_dir: temp_dir.as_ref().to_path_buf(),
            assembled_history: DEFAULT_ASSEMBLED_HISTORY,
        }
    }

    pub fn with_assembled_history(mut self, capacity: usize) -> Self {
        self.assembled_history = capacity;
        self
    }

    /// Create the upload and temp directories if they don't exist
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.upload_dir)?;
        std::fs::create_dir_all(&self.temp_dir)?;
        Ok(())
    }

    /// Create a config rooted in a fresh temporary directory for testing
    #[cfg(any(test, feature = "test-utils"))]
    pub fn temp() -> Result<(Self, tempfile::TempDir)> {
        let root = tempfile::tempdir()?;
        let config = Self::new(root.path().join("uploads"), root.path().join("uploads-tmp"));
        config.ensure_dirs()?;
        Ok((config, root))
    }
}
