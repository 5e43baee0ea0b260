// Caching layer with interchangeable backends
// Keeps recomputation down and lets results survive a restart

pub mod cache;
pub mod envelope;
pub mod error;
pub mod lsm;
pub mod memory;
pub mod metrics;
pub mod null;
pub mod prefetch;
pub mod sqlite;

pub use cache::{Cache, CacheExt};
pub use error::{CacheError, Result};
pub use lsm::LsmCache;
pub use memory::MemoryCache;
pub use metrics::{CacheMetrics, CacheStats};
pub use null::NullCache;
pub use sqlite::SqliteCache;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Which storage engine backs a cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Caching switched off
    Null,
    #[default]
    Memory,
    /// SQLite, single-writer B-tree on disk
    Sqlite,
    /// fjall, LSM tree on disk
    Lsm,
}

impl CacheBackend {
    pub fn is_persistent(&self) -> bool {
        matches!(self, CacheBackend::Sqlite | CacheBackend::Lsm)
    }
}

impl FromStr for CacheBackend {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "null" | "none" | "off" => Ok(CacheBackend::Null),
            "memory" | "mem" => Ok(CacheBackend::Memory),
            "sqlite" | "btree" => Ok(CacheBackend::Sqlite),
            "lsm" | "fjall" => Ok(CacheBackend::Lsm),
            other => Err(CacheError::UnknownBackend(other.to_string())),
        }
    }
}

impl std::fmt::Display for CacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheBackend::Null => write!(f, "null"),
            CacheBackend::Memory => write!(f, "memory"),
            CacheBackend::Sqlite => write!(f, "sqlite"),
            CacheBackend::Lsm => write!(f, "lsm"),
        }
    }
}

/// Everything needed to open a cache
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    /// Where persistent backends keep their files
    pub directory: PathBuf,
    /// Namespace inside the store (table / partition name)
    pub bucket: String,
    pub prefetch_queue_size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            directory: PathBuf::from(".notifscout-cache"),
            bucket: "notifications".to_string(),
            prefetch_queue_size: prefetch::DEFAULT_QUEUE_SIZE,
        }
    }
}

impl CacheSettings {
    pub fn validate(&self) -> Result<()> {
        if self.prefetch_queue_size == 0 {
            return Err(CacheError::InvalidConfig(
                "prefetch_queue_size must be positive".into(),
            ));
        }
        validate_bucket(&self.bucket)
    }
}

/// Bucket names end up as SQL table names and fjall partition names
fn validate_bucket(bucket: &str) -> Result<()> {
    let valid = !bucket.is_empty()
        && bucket.len() <= 64
        && bucket.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidConfig(format!(
            "bucket name {:?} must be 1-64 ASCII letters, digits or underscores",
            bucket
        )))
    }
}

/// Open the configured backend. Failing to create storage is fatal.
pub fn open(settings: &CacheSettings) -> Result<Arc<dyn Cache>> {
    settings.validate()?;

    let cache: Arc<dyn Cache> = match settings.backend {
        CacheBackend::Null => Arc::new(NullCache::new()),
        CacheBackend::Memory => Arc::new(MemoryCache::new(settings.prefetch_queue_size)?),
        CacheBackend::Sqlite => Arc::new(SqliteCache::open(
            &settings.directory,
            &settings.bucket,
            settings.prefetch_queue_size,
        )?),
        CacheBackend::Lsm => Arc::new(LsmCache::open(
            &settings.directory.join("lsm"),
            &settings.bucket,
            settings.prefetch_queue_size,
        )?),
    };

    info!("Cache backend ready: {}", cache.backend());
    Ok(cache)
}
