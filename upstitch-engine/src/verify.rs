//! Size verification for whole-file uploads

use std::path::Path;
use tracing::warn;
use upstitch_core::*;

/// Compares what reached the disk with what the client declared
pub struct SizeVerifier;

impl SizeVerifier {
    /// Check the on-disk size of `path` against `expected`, returning the actual size
    pub async fn verify(path: &Path, expected: u64) -> Result<u64> {
        let actual = tokio::fs::metadata(path).await?.len();

        if actual != expected {
            warn!(
                "Expected file {} to be {} bytes; file on disk is {} bytes",
                path.display(),
                expected,
                actual
            );
            return Err(UploadError::SizeMismatch { actual, expected });
        }

        Ok(actual)
    }
}
