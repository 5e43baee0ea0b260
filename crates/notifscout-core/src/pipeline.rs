// Query pipeline with result caching
use crate::config::{Config, EngineConfig};
use crate::filter::{Filter, FilterEngine, FilterStore, QueryParser};
use crate::scoring::Scorer;
use crate::sorter::Sorter;
use crate::Result;
use notifscout_api::{Notification, NotificationFilters, NotificationSource};
use notifscout_cache::{Cache, CacheExt};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// parse -> filter -> sort, checking the cache before doing any of it
pub struct NotificationPipeline {
    parser: QueryParser,
    engine: EngineConfig,
    sorter: Sorter,
    cache: Option<Arc<dyn Cache>>,
    result_ttl: Duration,
}

impl NotificationPipeline {
    pub fn new(parser: QueryParser, engine: EngineConfig, sorter: Sorter) -> Result<Self> {
        engine.validate()?;
        Ok(Self {
            parser,
            engine,
            sorter,
            cache: None,
            result_ttl: Duration::from_secs(300),
        })
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>, result_ttl: Duration) -> Self {
        self.cache = Some(cache);
        self.result_ttl = result_ttl;
        self
    }

    /// Wire everything up from config. The cache, when given, holds both
    /// scores and query results.
    pub fn from_config(
        config: &Config,
        cache: Option<Arc<dyn Cache>>,
        store: Option<Arc<dyn FilterStore>>,
    ) -> Result<Self> {
        config.validate()?;

        let mut scorer = Scorer::new(config.score.clone(), config.scoring.clone())?;
        if let Some(cache) = &cache {
            scorer = scorer.with_cache(Arc::clone(cache));
        }

        let mut parser = QueryParser::new().with_scorer(Arc::new(scorer));
        if let Some(store) = store {
            parser = parser.with_store(store);
        }

        let sorter = Sorter::from_config(config.sort.parsed_criteria()?, &config.sort)?;
        let pipeline = Self::new(parser, config.engine.clone(), sorter)?;

        Ok(match cache {
            Some(cache) => pipeline.with_cache(cache, config.cache.ttl()),
            None => pipeline,
        })
    }

    pub fn parse(&self, query: &str) -> Result<Box<dyn Filter>> {
        self.parser.parse(query)
    }

    pub fn sorter(&self) -> &Sorter {
        &self.sorter
    }

    /// Run `query` over `notifications`, cache-first
    pub async fn run(&self, query: &str, notifications: Vec<Notification>) -> Result<Vec<Notification>> {
        let key = format!("results:{:016x}", self.fingerprint(query, &notifications));

        // Try cache first if available
        if let Some(cache) = &self.cache {
            if let Some(results) = cache.get_json::<Vec<Notification>>(&key) {
                info!("Cache hit! {} results for {:?}", results.len(), query);
                return Ok(results);
            }
            debug!("Cache miss for {:?}", query);
        }

        let filter: Arc<dyn Filter> = Arc::from(self.parser.parse(query)?);
        debug!("Running {}", filter.describe());

        let total = notifications.len();
        let engine = FilterEngine::new(Some(filter), self.engine.clone())?;
        let matched = engine.filter(notifications).await?;
        let results = self.sorter.sort(&matched);
        info!("{} of {} notifications matched", results.len(), total);

        if let Some(cache) = &self.cache {
            cache.set_json(&key, &results, Some(self.result_ttl));
        }

        Ok(results)
    }

    /// Pull from `source`, then [`run`](Self::run)
    pub async fn fetch_and_run(
        &self,
        source: &dyn NotificationSource,
        filters: &NotificationFilters,
        query: &str,
    ) -> Result<Vec<Notification>> {
        let notifications = source.fetch(filters).await?;
        self.run(query, notifications).await
    }

    /// Same query, same ordering and the same records (by id and update time) hash alike
    fn fingerprint(&self, query: &str, notifications: &[Notification]) -> u64 {
        let mut hasher = DefaultHasher::new();
        query.trim().hash(&mut hasher);
        for criterion in self.sorter.criteria() {
            criterion.to_string().hash(&mut hasher);
        }
        for n in notifications {
            n.id.hash(&mut hasher);
            n.updated_at.timestamp_millis().hash(&mut hasher);
        }
        hasher.finish()
    }
}
