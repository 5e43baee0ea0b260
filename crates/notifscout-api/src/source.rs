// Where notifications come from. The real GitHub client lives outside this
// workspace; anything that can hand back a Vec<Notification> plugs in here.
use crate::notifications::{Notification, NotificationFilters};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode notifications: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Trait for notification sources
///
/// The network client implements this; tests and the CLI use the
/// file-backed and in-memory versions below.
#[async_trait::async_trait]
pub trait NotificationSource: Send + Sync {
    async fn fetch(&self, filters: &NotificationFilters) -> Result<Vec<Notification>, SourceError>;
}

/// Reads a JSON array of notifications (the shape GitHub's `/notifications` returns)
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl NotificationSource for JsonFileSource {
    async fn fetch(&self, filters: &NotificationFilters) -> Result<Vec<Notification>, SourceError> {
        let raw = tokio::fs::read(&self.path).await?;
        let all: Vec<Notification> = serde_json::from_slice(&raw)?;
        debug!("Loaded {} notifications from {:?}", all.len(), self.path);

        Ok(all.into_iter().filter(|n| filters.matches(n)).collect())
    }
}

/// Fixed set of notifications, handy for tests and offline runs
pub struct StaticSource {
    notifications: Vec<Notification>,
}

impl StaticSource {
    pub fn new(notifications: Vec<Notification>) -> Self {
        Self { notifications }
    }
}

#[async_trait::async_trait]
impl NotificationSource for StaticSource {
    async fn fetch(&self, filters: &NotificationFilters) -> Result<Vec<Notification>, SourceError> {
        Ok(self
            .notifications
            .iter()
            .filter(|n| filters.matches(n))
            .cloned()
            .collect())
    }
}
