use std::fmt;
use thiserror::Error;

/// All the ways things can go wrong in NotifScout
///
/// Single-record predicates never error; a record missing a field just doesn't match.
/// Everything collection-wide funnels into this one enum so callers only match once.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid filter near '{fragment}': {message}")]
    ParseError { fragment: String, message: String },

    #[error("Filter reference failed: {0}")]
    ReferenceError(String),

    #[error("Deadline exceeded after processing {processed} of {total} notifications")]
    DeadlineExceeded { processed: usize, total: usize },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Notification source error: {0}")]
    SourceError(#[from] notifscout_api::SourceError),

    #[error("Cache storage error: {0}")]
    CacheError(#[from] notifscout_cache::CacheError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn parse(fragment: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ParseError {
            fragment: fragment.into(),
            message: message.into(),
        }
    }
}

/// A collection-wide operation ran out of time
///
/// Carries whatever was collected before the deadline so the caller can
/// decide whether degraded output is good enough. Converts into
/// [`Error::DeadlineExceeded`] (dropping the partial result) via `?`.
pub struct DeadlineExceeded<T> {
    pub partial: T,
    pub processed: usize,
    pub total: usize,
}

impl<T> DeadlineExceeded<T> {
    pub fn into_partial(self) -> T {
        self.partial
    }
}

impl<T> fmt::Debug for DeadlineExceeded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlineExceeded")
            .field("processed", &self.processed)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for DeadlineExceeded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Deadline exceeded after processing {} of {} notifications",
            self.processed, self.total
        )
    }
}

impl<T> std::error::Error for DeadlineExceeded<T> {}

impl<T> From<DeadlineExceeded<T>> for Error {
    fn from(e: DeadlineExceeded<T>) -> Self {
        Error::DeadlineExceeded {
            processed: e.processed,
            total: e.total,
        }
    }
}
