// Core business logic lives here - filtering, scoring and sorting notifications
pub mod config;
pub mod error;
pub mod filter;
pub mod pipeline;
mod pool;
pub mod scoring;
pub mod sorter;

pub use config::{CacheConfig, Config, EngineConfig, ScoringConfig, SortConfig};
pub use error::{DeadlineExceeded, Error};
pub use filter::{Filter, FilterEngine, FilterStore, IndexKey, NamedFilterStore, QueryParser};
pub use pipeline::NotificationPipeline;
pub use pool::default_concurrency;
pub use scoring::{NotificationScore, ScoreFactors, Scorer};
pub use sorter::{SortCriterion, SortDirection, SortField, Sorter};

/// Result type alias because typing Result<T, Error> everywhere is tedious
pub type Result<T> = std::result::Result<T, Error>;
