//! Core data models and types for upstitch

pub mod error;
pub mod response;
pub mod types;

pub use error::*;
pub use types::*;

/// Result type alias for upstitch operations
pub type Result<T> = std::result::Result<T, UploadError>;
