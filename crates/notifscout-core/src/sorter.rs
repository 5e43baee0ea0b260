use crate::config::SortConfig;
use crate::{Error, Result};
use notifscout_api::Notification;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Repository,
    Type,
    Title,
    Time,
    /// Read sorts before unread when ascending
    Status,
    Reason,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::Repository => "repository",
            SortField::Type => "type",
            SortField::Title => "title",
            SortField::Time => "time",
            SortField::Status => "status",
            SortField::Reason => "reason",
        }
    }

    fn compare(&self, a: &Notification, b: &Notification) -> Ordering {
        match self {
            SortField::Repository => cmp_ignore_case(a.repo_full_name(), b.repo_full_name()),
            SortField::Type => a.subject_type().as_str().cmp(b.subject_type().as_str()),
            SortField::Title => cmp_ignore_case(a.title(), b.title()),
            SortField::Time => a.updated_at().cmp(&b.updated_at()),
            SortField::Status => a.is_unread().cmp(&b.is_unread()),
            SortField::Reason => a.reason().as_str().cmp(b.reason().as_str()),
        }
    }
}

impl FromStr for SortField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "repository" | "repo" => Ok(SortField::Repository),
            "type" => Ok(SortField::Type),
            "title" => Ok(SortField::Title),
            "time" | "updated" => Ok(SortField::Time),
            "status" => Ok(SortField::Status),
            "reason" => Ok(SortField::Reason),
            other => Err(Error::ConfigError(format!("unknown sort field: {}", other))),
        }
    }
}

fn cmp_ignore_case(a: &str, b: &str) -> Ordering {
    a.bytes()
        .map(|c| c.to_ascii_lowercase())
        .cmp(b.bytes().map(|c| c.to_ascii_lowercase()))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// One link of the tie-break chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortCriterion {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortCriterion {
    pub fn asc(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Descending,
        }
    }

    fn compare(&self, a: &Notification, b: &Notification) -> Ordering {
        let ordering = self.field.compare(a, b);
        match self.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

/// `field`, `field:asc` or `field:desc`
impl FromStr for SortCriterion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (field, direction) = match s.split_once(':') {
            Some((field, direction)) => (field, direction.trim()),
            None => (s, "asc"),
        };

        let direction = match direction.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => SortDirection::Ascending,
            "desc" | "descending" => SortDirection::Descending,
            other => {
                return Err(Error::ConfigError(format!(
                    "unknown sort direction in {:?}: {}",
                    s, other
                )))
            }
        };

        Ok(Self {
            field: field.parse()?,
            direction,
        })
    }
}

impl fmt::Display for SortCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.direction {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        };
        write!(f, "{}:{}", self.field.as_str(), direction)
    }
}

/// Multi-key sorter
///
/// Sorting never touches the input slice. Big inputs are cut into batches,
/// sorted on the rayon pool, then merged back; output is the same either way.
#[derive(Debug, Clone)]
pub struct Sorter {
    criteria: Vec<SortCriterion>,
    parallel: bool,
    batch_size: usize,
}

impl Sorter {
    pub fn new(criteria: Vec<SortCriterion>) -> Self {
        let defaults = SortConfig::default();
        Self {
            criteria,
            parallel: defaults.parallel,
            batch_size: defaults.batch_size,
        }
    }

    pub fn from_config(criteria: Vec<SortCriterion>, config: &SortConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            criteria,
            parallel: config.parallel,
            batch_size: config.batch_size,
        })
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Zero is bumped to one
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn criteria(&self) -> &[SortCriterion] {
        &self.criteria
    }

    /// First non-equal criterion wins
    pub fn compare(&self, a: &Notification, b: &Notification) -> Ordering {
        self.criteria
            .iter()
            .map(|c| c.compare(a, b))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    pub fn sort(&self, notifications: &[Notification]) -> Vec<Notification> {
        if notifications.len() <= 1 || self.criteria.is_empty() {
            return notifications.to_vec();
        }

        if self.parallel && notifications.len() >= self.batch_size {
            return self.sort_parallel(notifications);
        }

        let mut sorted = notifications.to_vec();
        sorted.sort_by(|a, b| self.compare(a, b));
        sorted
    }

    fn sort_parallel(&self, notifications: &[Notification]) -> Vec<Notification> {
        let mut batches: Vec<Vec<Notification>> = notifications
            .chunks(self.batch_size)
            .map(<[Notification]>::to_vec)
            .collect();
        debug!(
            "Sorting {} notifications in {} batches",
            notifications.len(),
            batches.len()
        );

        batches
            .par_iter_mut()
            .for_each(|batch| batch.sort_by(|a, b| self.compare(a, b)));

        self.merge(batches)
    }

    /// k-way merge by linear scan over the batch heads
    ///
    /// Only a strictly smaller head replaces the current pick, so equal
    /// elements come out in batch order and the overall sort stays stable.
    fn merge(&self, batches: Vec<Vec<Notification>>) -> Vec<Notification> {
        let total = batches.iter().map(Vec::len).sum();
        let mut heads: Vec<VecDeque<Notification>> =
            batches.into_iter().map(VecDeque::from).collect();
        let mut merged = Vec::with_capacity(total);

        loop {
            let mut best: Option<usize> = None;
            for (i, batch) in heads.iter().enumerate() {
                let Some(candidate) = batch.front() else {
                    continue;
                };
                best = match best {
                    Some(b) => match heads[b].front() {
                        Some(current) if self.compare(candidate, current).is_lt() => Some(i),
                        _ => Some(b),
                    },
                    None => Some(i),
                };
            }

            match best.and_then(|b| heads[b].pop_front()) {
                Some(next) => merged.push(next),
                None => break,
            }
        }

        merged
    }
}

impl Default for Sorter {
    /// Newest first
    fn default() -> Self {
        Self::new(vec![SortCriterion::desc(SortField::Time)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use notifscout_api::{NotificationReason, SubjectType};

    fn fixture(id: &str, repo: &str, title: &str, unread: bool, minutes: i64) -> Notification {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Notification::new(
            id,
            repo,
            SubjectType::Issue,
            title,
            NotificationReason::Comment,
            unread,
            base + Duration::minutes(minutes),
        )
    }

    fn ids(notifications: &[Notification]) -> Vec<&str> {
        notifications.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_parse_criterion() {
        let c: SortCriterion = "time:desc".parse().unwrap();
        assert_eq!(c, SortCriterion::desc(SortField::Time));

        let c: SortCriterion = "Repository".parse().unwrap();
        assert_eq!(c, SortCriterion::asc(SortField::Repository));
        assert_eq!(c.to_string(), "repository:asc");

        assert!("time:sideways".parse::<SortCriterion>().is_err());
        assert!("stars:asc".parse::<SortCriterion>().is_err());
    }

    #[test]
    fn test_repository_is_case_insensitive() {
        let input = vec![
            fixture("1", "zeta/b", "t", true, 0),
            fixture("2", "Alpha/a", "t", true, 0),
            fixture("3", "beta/c", "t", true, 0),
        ];
        let sorted = Sorter::new(vec![SortCriterion::asc(SortField::Repository)]).sort(&input);
        assert_eq!(ids(&sorted), vec!["2", "3", "1"]);
    }

    #[test]
    fn test_status_then_time() {
        let input = vec![
            fixture("read-old", "a/a", "t", false, 0),
            fixture("unread-old", "a/a", "t", true, 1),
            fixture("read-new", "a/a", "t", false, 2),
            fixture("unread-new", "a/a", "t", true, 3),
        ];
        let sorter = Sorter::new(vec![
            SortCriterion::desc(SortField::Status),
            SortCriterion::desc(SortField::Time),
        ]);
        assert_eq!(
            ids(&sorter.sort(&input)),
            vec!["unread-new", "unread-old", "read-new", "read-old"]
        );

        let ascending = Sorter::new(vec![SortCriterion::asc(SortField::Status)]);
        assert_eq!(ids(&ascending.sort(&input))[0], "read-old");
    }

    #[test]
    fn test_input_untouched_and_trivial_cases() {
        let input = vec![
            fixture("b", "a/a", "t", true, 5),
            fixture("a", "a/a", "t", true, 1),
        ];
        let snapshot = input.clone();

        let sorted = Sorter::default().sort(&input);
        assert_eq!(ids(&sorted), vec!["b", "a"]);
        assert_eq!(input, snapshot);

        assert_eq!(Sorter::new(vec![]).sort(&input), input);
        assert!(Sorter::default().sort(&[]).is_empty());
    }

    #[test]
    fn test_parallel_merge_is_stable() {
        // Lots of ties on repository so stability actually matters
        let input: Vec<_> = (0..257)
            .map(|i| {
                fixture(
                    &format!("n{:03}", i),
                    &format!("org/repo{}", i % 3),
                    "t",
                    i % 2 == 0,
                    i,
                )
            })
            .collect();

        let criteria = vec![SortCriterion::asc(SortField::Repository)];
        let sequential = Sorter::new(criteria.clone())
            .with_parallel(false)
            .sort(&input);
        let parallel = Sorter::new(criteria).with_batch_size(16).sort(&input);

        assert_eq!(ids(&parallel), ids(&sequential));
    }
}
