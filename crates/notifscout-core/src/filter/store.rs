use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Where `@name` references come from
#[cfg_attr(test, mockall::automock)]
pub trait FilterStore: Send + Sync {
    /// The stored expression, or [`Error::ReferenceError`] when there's no such name
    fn lookup(&self, name: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedFilter {
    pub expression: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Saved filters, kept as JSON next to the rest of the app data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamedFilterStore {
    filters: BTreeMap<String, NamedFilter>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl NamedFilterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the store from the default location, or start empty
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::store_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut store = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            serde_json::from_str::<NamedFilterStore>(&contents).map_err(|e| {
                Error::ConfigError(format!("Failed to parse filter store: {}", e))
            })?
        } else {
            Self::new()
        };
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    /// Save back to where it was loaded from (default location for a fresh store)
    pub fn save(&self) -> Result<()> {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => Self::store_path()?,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        Ok(())
    }

    /// Add or replace a filter. Names are what goes after `@`.
    pub fn set(&mut self, name: &str, expression: &str, description: Option<String>) -> Result<()> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::ConfigError(format!(
                "filter name {:?} may only use letters, digits, '-' and '_'",
                name
            )));
        }

        self.filters.insert(
            name.to_string(),
            NamedFilter {
                expression: expression.to_string(),
                description,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&NamedFilter> {
        self.filters.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<NamedFilter> {
        self.filters.remove(name)
    }

    /// Sorted by name
    pub fn list(&self) -> impl Iterator<Item = (&str, &NamedFilter)> {
        self.filters.iter().map(|(name, filter)| (name.as_str(), filter))
    }

    fn store_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| Error::ConfigError("Could not find data directory".into()))?
            .join("notifscout");

        Ok(data_dir.join("filters.json"))
    }
}

impl FilterStore for NamedFilterStore {
    fn lookup(&self, name: &str) -> Result<String> {
        self.filters
            .get(name)
            .map(|f| f.expression.clone())
            .ok_or_else(|| Error::ReferenceError(format!("no saved filter named @{}", name)))
    }
}
