//! Error types for upstitch

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The whole-file body on disk disagrees with the declared Content-Length
    #[error("Unexpected file size mismatch. Actual bytes {actual}. Expected bytes {expected}.")]
    SizeMismatch { actual: u64, expected: u64 },

    /// A part yielded fewer bytes than its reported length while merging
    #[error("Merge failed on part {part}: read {read} of {expected} bytes")]
    Merge { part: String, read: u64, expected: u64 },

    #[error("Malformed request: {0}")]
    Parse(String),

    #[error("Missing required parameter: {0}")]
    MissingParam(String),

    #[error("Invalid upload identifier: {0}")]
    InvalidUploadId(String),

    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error("Invalid part {index} of {total}")]
    InvalidPart { index: u32, total: u32 },
}
