use super::index::FieldIndex;
use super::Filter;
use crate::config::EngineConfig;
use crate::error::DeadlineExceeded;
use crate::pool;
use crate::Result;
use notifscout_api::Notification;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Runs one filter over whole collections
///
/// Collections below `batch_size` are filtered inline and keep their order.
/// Bigger ones go through the worker pool, where output order follows
/// whichever worker finished first.
pub struct FilterEngine {
    filter: Option<Arc<dyn Filter>>,
    config: EngineConfig,
}

impl FilterEngine {
    pub fn new(filter: Option<Arc<dyn Filter>>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { filter, config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn filter(
        &self,
        notifications: Vec<Notification>,
    ) -> std::result::Result<Vec<Notification>, DeadlineExceeded<Vec<Notification>>> {
        let Some(filter) = &self.filter else {
            return Ok(notifications);
        };
        if notifications.is_empty() {
            return Ok(notifications);
        }

        let candidates = self.candidates(filter.as_ref(), &notifications);
        let count = candidates
            .as_ref()
            .map_or(notifications.len(), Vec::len);

        if count < self.config.batch_size {
            self.filter_sequential(filter.as_ref(), notifications, candidates)
        } else {
            self.filter_concurrent(Arc::clone(filter), notifications, candidates)
                .await
        }
    }

    /// Positions worth looking at, or `None` for all of them
    fn candidates(&self, filter: &dyn Filter, notifications: &[Notification]) -> Option<Vec<usize>> {
        if !self.config.use_indexes {
            return None;
        }
        let key = filter.index_key()?;
        let positions = FieldIndex::build(notifications).lookup(&key).to_vec();
        debug!(
            "Index {:?} narrowed {} notifications to {}",
            key,
            notifications.len(),
            positions.len()
        );
        Some(positions)
    }

    fn filter_sequential(
        &self,
        filter: &dyn Filter,
        notifications: Vec<Notification>,
        candidates: Option<Vec<usize>>,
    ) -> std::result::Result<Vec<Notification>, DeadlineExceeded<Vec<Notification>>> {
        let deadline = Instant::now() + self.config.timeout();
        let order = candidates.unwrap_or_else(|| (0..notifications.len()).collect());
        let total = order.len();

        let mut matched = Vec::new();
        let mut timed_out = None;
        for (processed, &position) in order.iter().enumerate() {
            if Instant::now() >= deadline {
                timed_out = Some(processed);
                break;
            }
            if filter.apply(&notifications[position]) {
                matched.push(position);
            }
        }

        let mut slots: Vec<Option<Notification>> = notifications.into_iter().map(Some).collect();
        let kept: Vec<Notification> = matched
            .into_iter()
            .filter_map(|position| slots[position].take())
            .collect();

        match timed_out {
            Some(processed) => {
                warn!("Filter hit its deadline after {} of {} notifications", processed, total);
                Err(DeadlineExceeded {
                    partial: kept,
                    processed,
                    total,
                })
            }
            None => Ok(kept),
        }
    }

    async fn filter_concurrent(
        &self,
        filter: Arc<dyn Filter>,
        notifications: Vec<Notification>,
        candidates: Option<Vec<usize>>,
    ) -> std::result::Result<Vec<Notification>, DeadlineExceeded<Vec<Notification>>> {
        let order = Arc::new(candidates.unwrap_or_else(|| (0..notifications.len()).collect()));
        let records = Arc::new(notifications);
        let total = order.len();
        debug!(
            "Filtering {} notifications with {} workers",
            total, self.config.concurrency
        );

        let outcome = pool::run(
            total,
            self.config.concurrency,
            self.config.batch_size,
            self.config.timeout(),
            {
                let records = Arc::clone(&records);
                move |slot| {
                    let notification = &records[order[slot]];
                    filter.apply(notification).then(|| notification.clone())
                }
            },
        )
        .await;

        if outcome.timed_out {
            warn!(
                "Filter hit its deadline after {} of {} notifications",
                outcome.processed, total
            );
            return Err(DeadlineExceeded {
                partial: outcome.results,
                processed: outcome.processed,
                total,
            });
        }
        Ok(outcome.results)
    }
}
