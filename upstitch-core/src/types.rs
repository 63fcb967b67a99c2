//! Core data types for upstitch

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Width of the zero-padded index in a stored part's file name
pub const PART_INDEX_WIDTH: usize = 5;

/// Longest upload identifier accepted from a client
pub const MAX_UPLOAD_ID_LEN: usize = 128;

/// Client-supplied token grouping every part of one logical upload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(String);

impl UploadId {
    /// Create a new upload identifier with validation
    pub fn new(id: &str) -> crate::Result<Self> {
        if id.is_empty() {
            return Err(crate::UploadError::InvalidUploadId("empty identifier".to_string()));
        }

        if id.len() > MAX_UPLOAD_ID_LEN {
            return Err(crate::UploadError::InvalidUploadId(format!(
                "identifier longer than {} characters",
                MAX_UPLOAD_ID_LEN
            )));
        }

        // Used verbatim in part file names, so nothing path-like may get through
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(crate::UploadError::InvalidUploadId(format!(
                "invalid characters in '{}'",
                id
            )));
        }

        Ok(UploadId(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the stored part with the given index
    pub fn part_file_name(&self, index: u32) -> String {
        format!("{}_{:0width$}", self.0, index, width = PART_INDEX_WIDTH)
    }

    /// Parse the part index out of a file name belonging to this upload.
    ///
    /// Matches `<id>_` followed by ASCII digits only; staging files and
    /// parts of other uploads return `None`.
    pub fn parse_part_index(&self, file_name: &str) -> Option<u32> {
        let digits = file_name.strip_prefix(self.0.as_str())?.strip_prefix('_')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of an assembled file inside the upload directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileName(String);

impl FileName {
    /// Reduce a client-supplied name to its final path component.
    ///
    /// Browsers may send a full client path, so both `/` and `\` count as
    /// separators.
    pub fn new(raw: &str) -> crate::Result<Self> {
        let name = raw.rsplit(['/', '\\']).next().unwrap_or_default();

        if name.is_empty() || name == "." || name == ".." {
            return Err(crate::UploadError::InvalidFileName(format!("'{}'", raw)));
        }

        if name.contains('\0') {
            return Err(crate::UploadError::InvalidFileName(
                "null byte in name".to_string(),
            ));
        }

        Ok(FileName(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of one part within a chunked upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartDescriptor {
    pub upload_id: UploadId,
    pub index: u32,
    pub total: u32,
}

impl PartDescriptor {
    pub fn new(upload_id: UploadId, index: u32, total: u32) -> crate::Result<Self> {
        if total == 0 || index >= total {
            return Err(crate::UploadError::InvalidPart { index, total });
        }

        Ok(PartDescriptor {
            upload_id,
            index,
            total,
        })
    }

    /// Index of the part whose arrival triggers the merge
    pub fn last_index(&self) -> u32 {
        self.total - 1
    }

    pub fn is_last(&self) -> bool {
        self.index == self.last_index()
    }
}

/// A part file on disk, as seen when the upload directory was listed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPart {
    pub upload_id: UploadId,
    pub index: u32,
    pub path: PathBuf,
    /// Length reported by the directory entry when the part was listed
    pub len: u64,
}

/// Result of handling one upload request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl UploadOutcome {
    pub fn success() -> Self {
        UploadOutcome {
            success: true,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        UploadOutcome {
            success: false,
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

impl From<crate::Result<()>> for UploadOutcome {
    fn from(result: crate::Result<()>) -> Self {
        match result {
            Ok(()) => UploadOutcome::success(),
            Err(e) => UploadOutcome::failure(e.to_string()),
        }
    }
}
