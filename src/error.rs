//! Error types for fanline

/// Result type alias for fanline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for fanline
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
    /// Transport-level errors while reaching the backend
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    /// Backend rejected a write
    #[error("Backend error: {0}")]
    Backend(#[from] tonic::Status),
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Series label lookup used before installation.
    ///
    /// The ingestion path must install the lookup with
    /// `set_labels_by_ref_func` before the first `export` call; hitting
    /// this is a programming error, and `export` panics on it.
    #[error("series label lookup used before installation")]
    LabelLookupMissing,
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
