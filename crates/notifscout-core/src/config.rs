use crate::pool::default_concurrency;
use crate::scoring::ScoreFactors;
use crate::sorter::SortCriterion;
use crate::{Error, Result};
use notifscout_cache::{CacheBackend, CacheSettings};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Main configuration structure
///
/// Loaded from `notifscout/config.toml` in the platform config dir, then
/// flat `section.key = value` overrides go on top via [`Config::apply`].
/// Priority: overrides > file > defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub scoring: ScoringConfig,
    /// Scoring weights, `[score]` in the file
    pub score: ScoreFactors,
    pub sort: SortConfig,
    pub cache: CacheConfig,
}

impl Config {
    /// Load config from the default location, or defaults if there's no file yet
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            // No config file? Use defaults
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {}", e)))
    }

    /// XDG on Linux, Application Support on macOS, AppData on Windows
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::ConfigError("Could not find config directory".into()))?
            .join("notifscout");

        Ok(config_dir.join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.scoring.validate()?;
        self.score.validate()?;
        self.sort.validate()?;
        self.cache.validate()
    }

    /// Layer flat overrides such as `engine.batch_size = "50"` on top
    ///
    /// All or nothing: the first bad key or value is reported and `self`
    /// is left as it was.
    pub fn apply(&mut self, overrides: &HashMap<String, String>) -> Result<()> {
        let mut next = self.clone();

        // Sorted so the first error reported doesn't depend on hash order
        let sorted: BTreeMap<_, _> = overrides.iter().collect();
        for (key, value) in sorted {
            next.apply_one(key, value.trim())?;
        }

        next.validate()?;
        *self = next;
        Ok(())
    }

    fn apply_one(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "engine.concurrency" => self.engine.concurrency = parse_positive(key, value)?,
            "engine.batch_size" => self.engine.batch_size = parse_positive(key, value)?,
            "engine.timeout_ms" => self.engine.timeout_ms = parse_positive(key, value)?,
            "engine.use_indexes" => self.engine.use_indexes = parse_bool(key, value)?,

            "scoring.concurrency" => self.scoring.concurrency = parse_positive(key, value)?,
            "scoring.batch_size" => self.scoring.batch_size = parse_positive(key, value)?,
            "scoring.timeout_ms" => self.scoring.timeout_ms = parse_positive(key, value)?,
            "scoring.cache_ttl_secs" => self.scoring.cache_ttl_secs = parse_positive(key, value)?,

            "sort.parallel" => self.sort.parallel = parse_bool(key, value)?,
            "sort.batch_size" => self.sort.batch_size = parse_positive(key, value)?,
            "sort.criteria" => {
                self.sort.criteria = value
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(String::from)
                    .collect()
            }

            "cache.backend" => {
                self.cache.backend = value
                    .parse()
                    .map_err(|e| Error::ConfigError(format!("{}: {}", key, e)))?
            }
            "cache.directory" => self.cache.directory = Some(PathBuf::from(value)),
            "cache.bucket" => self.cache.bucket = value.to_string(),
            "cache.ttl_secs" => self.cache.ttl_secs = parse_positive(key, value)?,
            "cache.prefetch_queue_size" => {
                self.cache.prefetch_queue_size = parse_positive(key, value)?
            }

            _ => {
                if let Some(repo) = key.strip_prefix("score.repo.") {
                    if repo.is_empty() {
                        return Err(Error::ConfigError(format!(
                            "{}: missing repository name",
                            key
                        )));
                    }
                    let weight = parse_weight(key, value)?;
                    self.score.custom_repo_weights.insert(repo.to_string(), weight);
                } else if let Some(name) = key.strip_prefix("score.") {
                    let weight = parse_weight(key, value)?;
                    self.score.set_weight(name, weight)?;
                } else {
                    return Err(Error::ConfigError(format!(
                        "unknown configuration key: {}",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Whole numbers > 0, for concurrency, batch and queue sizes, timeouts and TTLs
fn parse_positive<T: TryFrom<i64>>(key: &str, value: &str) -> Result<T> {
    let parsed: i64 = value.parse().map_err(|_| {
        Error::ConfigError(format!("{} must be a positive integer, got {:?}", key, value))
    })?;
    if parsed <= 0 {
        return Err(Error::ConfigError(format!(
            "{} must be positive, got {}",
            key, parsed
        )));
    }
    T::try_from(parsed)
        .map_err(|_| Error::ConfigError(format!("{} is out of range: {}", key, parsed)))
}

fn parse_weight(key: &str, value: &str) -> Result<f64> {
    match value.parse::<f64>() {
        Ok(weight) if weight.is_finite() => Ok(weight),
        _ => Err(Error::ConfigError(format!(
            "{} must be a number, got {:?}",
            key, value
        ))),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(Error::ConfigError(format!(
            "{} must be true or false, got {:?}",
            key, value
        ))),
    }
}

fn check_positive(name: &str, value: u64) -> Result<()> {
    if value == 0 {
        Err(Error::ConfigError(format!("{} must be positive", name)))
    } else {
        Ok(())
    }
}

/// Filter engine tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker count for big collections
    pub concurrency: usize,
    /// Collections smaller than this are filtered inline
    pub batch_size: usize,
    pub timeout_ms: u64,
    pub use_indexes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            batch_size: 100,
            timeout_ms: 30_000,
            use_indexes: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        check_positive("engine.concurrency", self.concurrency as u64)?;
        check_positive("engine.batch_size", self.batch_size as u64)?;
        check_positive("engine.timeout_ms", self.timeout_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Scorer tuning, same shape as the engine's plus the score cache TTL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub concurrency: usize,
    pub batch_size: usize,
    pub timeout_ms: u64,
    pub cache_ttl_secs: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            batch_size: 100,
            timeout_ms: 30_000,
            cache_ttl_secs: 300,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        check_positive("scoring.concurrency", self.concurrency as u64)?;
        check_positive("scoring.batch_size", self.batch_size as u64)?;
        check_positive("scoring.timeout_ms", self.timeout_ms)?;
        check_positive("scoring.cache_ttl_secs", self.cache_ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    pub parallel: bool,
    /// Collections at least this big are sorted in parallel batches
    pub batch_size: usize,
    /// Default ordering, e.g. `["status:desc", "time:desc"]`
    pub criteria: Vec<String>,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            batch_size: 1000,
            criteria: vec!["time:desc".to_string()],
        }
    }
}

impl SortConfig {
    pub fn validate(&self) -> Result<()> {
        check_positive("sort.batch_size", self.batch_size as u64)?;
        self.parsed_criteria().map(|_| ())
    }

    pub fn parsed_criteria(&self) -> Result<Vec<SortCriterion>> {
        self.criteria.iter().map(|c| c.parse()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,

    /// Where on-disk backends live. Defaults to the platform cache dir.
    pub directory: Option<PathBuf>,

    pub bucket: String,

    /// How long pipeline results stay cached
    pub ttl_secs: u64,

    pub prefetch_queue_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let settings = CacheSettings::default();
        Self {
            backend: settings.backend,
            directory: None,
            bucket: settings.bucket,
            ttl_secs: 300,
            prefetch_queue_size: settings.prefetch_queue_size,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        check_positive("cache.ttl_secs", self.ttl_secs)?;
        self.settings()
            .validate()
            .map_err(|e| Error::ConfigError(e.to_string()))
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn settings(&self) -> CacheSettings {
        let directory = self.directory.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .map(|dir| dir.join("notifscout"))
                .unwrap_or_else(|| PathBuf::from(".notifscout-cache"))
        });

        CacheSettings {
            backend: self.backend,
            directory,
            bucket: self.bucket.clone(),
            prefetch_queue_size: self.prefetch_queue_size,
        }
    }
}
