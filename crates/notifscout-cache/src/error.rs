use thiserror::Error;

/// Result type for cache construction and backend I/O
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors a cache backend can hit
///
/// Only construction surfaces these to callers. Once a cache is open, the
/// backends count failures in their metrics and carry on.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("LSM store error: {0}")]
    Lsm(#[from] fjall::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode cache entry: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode cache entry: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Unknown cache backend: {0}")]
    UnknownBackend(String),

    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),
}
