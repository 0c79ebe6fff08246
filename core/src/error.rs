/// Error types for the conversation store
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Version conflict on {path}: expected {expected}")]
    Conflict { path: String, expected: u64 },

    /// A multi-document operation committed some writes before failing.
    /// The committed steps are named so the inconsistency window is
    /// visible to the caller instead of silently swallowed.
    #[error("Partial write in {op} (committed: {committed}; failed at {failed}): {cause}")]
    PartialWrite {
        op: &'static str,
        committed: String,
        failed: &'static str,
        cause: String,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;
