use super::{Filter, IndexKey};
use crate::error::Error;
use crate::scoring::Scorer;
use crate::Result;
use chrono::{DateTime, Utc};
use glob::{MatchOptions, Pattern};
use notifscout_api::{Notification, SubjectType};
use regex::{Regex, RegexBuilder};
use std::sync::Arc;

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

fn is_literal(pattern: &str) -> bool {
    !pattern.contains(['*', '?', '['])
}

fn compile_glob(key: &str, pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern)
        .map_err(|e| Error::parse(format!("{}:{}", key, pattern), format!("bad glob: {}", e.msg)))
}

/// Matches everything, what an empty query parses to
#[derive(Debug, Clone, Copy, Default)]
pub struct AllFilter;

impl Filter for AllFilter {
    fn apply(&self, _notification: &Notification) -> bool {
        true
    }

    fn describe(&self) -> String {
        "all".to_string()
    }
}

/// `type:pr`, `type:issue`, ...
#[derive(Debug, Clone)]
pub struct TypeFilter {
    subject_type: SubjectType,
}

impl TypeFilter {
    /// Accepts the usual spellings ("pr", "PullRequest", "pull_request")
    pub fn new(subject_type: &str) -> Self {
        Self {
            subject_type: SubjectType::parse(subject_type),
        }
    }
}

impl Filter for TypeFilter {
    fn apply(&self, notification: &Notification) -> bool {
        notification
            .subject_type()
            .as_str()
            .eq_ignore_ascii_case(self.subject_type.as_str())
    }

    fn describe(&self) -> String {
        format!("type:{}", self.subject_type.as_str())
    }

    fn index_key(&self) -> Option<IndexKey> {
        Some(IndexKey::Type(self.subject_type.as_str().to_ascii_lowercase()))
    }
}

/// `reason:mention`, `reason:review-requested`, ...
#[derive(Debug, Clone)]
pub struct ReasonFilter {
    reason: String,
}

impl ReasonFilter {
    pub fn new(reason: &str) -> Self {
        Self {
            reason: reason.trim().to_ascii_lowercase().replace('-', "_"),
        }
    }
}

impl Filter for ReasonFilter {
    fn apply(&self, notification: &Notification) -> bool {
        notification.reason().as_str() == self.reason
    }

    fn describe(&self) -> String {
        format!("reason:{}", self.reason)
    }
}

/// `is:read` / `is:unread`
#[derive(Debug, Clone, Copy)]
pub struct StatusFilter {
    unread: bool,
}

impl StatusFilter {
    pub fn unread() -> Self {
        Self { unread: true }
    }

    pub fn read() -> Self {
        Self { unread: false }
    }
}

impl Filter for StatusFilter {
    fn apply(&self, notification: &Notification) -> bool {
        notification.is_unread() == self.unread
    }

    fn describe(&self) -> String {
        let state = if self.unread { "unread" } else { "read" };
        format!("is:{}", state)
    }

    fn index_key(&self) -> Option<IndexKey> {
        Some(IndexKey::Unread(self.unread))
    }
}

/// Glob over the repository full name, case-insensitive
#[derive(Debug, Clone)]
pub struct RepoFilter {
    raw: String,
    pattern: Pattern,
}

impl RepoFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: compile_glob("repo", pattern)?,
            raw: pattern.to_string(),
        })
    }
}

impl Filter for RepoFilter {
    fn apply(&self, notification: &Notification) -> bool {
        self.pattern
            .matches_with(notification.repo_full_name(), GLOB_OPTIONS)
    }

    fn describe(&self) -> String {
        format!("repo:{}", self.raw)
    }

    fn index_key(&self) -> Option<IndexKey> {
        is_literal(&self.raw).then(|| IndexKey::Repository(self.raw.to_ascii_lowercase()))
    }
}

/// Glob over the repository owner login
#[derive(Debug, Clone)]
pub struct OrgFilter {
    raw: String,
    pattern: Pattern,
}

impl OrgFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: compile_glob("org", pattern)?,
            raw: pattern.to_string(),
        })
    }
}

impl Filter for OrgFilter {
    fn apply(&self, notification: &Notification) -> bool {
        self.pattern
            .matches_with(notification.owner_login(), GLOB_OPTIONS)
    }

    fn describe(&self) -> String {
        format!("org:{}", self.raw)
    }

    fn index_key(&self) -> Option<IndexKey> {
        is_literal(&self.raw).then(|| IndexKey::Organization(self.raw.to_ascii_lowercase()))
    }
}

/// Bare words: case-insensitive substring over title, repository, type and reason
#[derive(Debug, Clone)]
pub struct TextFilter {
    needle: String,
}

impl TextFilter {
    pub fn new(text: &str) -> Self {
        Self {
            needle: text.to_lowercase(),
        }
    }
}

impl Filter for TextFilter {
    fn apply(&self, notification: &Notification) -> bool {
        [
            notification.title(),
            notification.repo_full_name(),
            notification.subject_type().as_str(),
            notification.reason().as_str(),
        ]
        .iter()
        .any(|haystack| haystack.to_lowercase().contains(&self.needle))
    }

    fn describe(&self) -> String {
        format!("{:?}", self.needle)
    }
}

/// Case-insensitive regex over one named field
///
/// Fields: `title` (or `subject`), `id`, `url`, `owner`, `name`,
/// `full_name`, `type`, `reason`. Anything else never matches.
#[derive(Debug, Clone)]
pub struct RegexFilter {
    field: String,
    regex: Regex,
}

impl RegexFilter {
    pub fn new(field: &str, pattern: &str) -> Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::parse(format!("{}:{}", field, pattern), format!("bad regex: {}", e)))?;

        Ok(Self {
            field: field.to_ascii_lowercase(),
            regex,
        })
    }

    fn field_value<'a>(&self, notification: &'a Notification) -> Option<&'a str> {
        let value = match self.field.as_str() {
            "title" | "subject" => notification.title(),
            "id" => &notification.id,
            "url" => &notification.url,
            "owner" => notification.owner_login(),
            "name" => &notification.repository.name,
            "full_name" => notification.repo_full_name(),
            "type" => notification.subject_type().as_str(),
            "reason" => notification.reason().as_str(),
            _ => return None,
        };
        Some(value)
    }
}

impl Filter for RegexFilter {
    fn apply(&self, notification: &Notification) -> bool {
        self.field_value(notification)
            .is_some_and(|value| self.regex.is_match(value))
    }

    fn describe(&self) -> String {
        format!("{}:/{}/", self.field, self.regex.as_str())
    }
}

/// Half-open window on `updated_at`: `since <= t < before`
#[derive(Debug, Clone, Copy)]
pub struct TimeFilter {
    since: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
}

impl TimeFilter {
    pub fn new(since: Option<DateTime<Utc>>, before: Option<DateTime<Utc>>) -> Self {
        Self { since, before }
    }

    pub fn since(since: DateTime<Utc>) -> Self {
        Self::new(Some(since), None)
    }

    pub fn before(before: DateTime<Utc>) -> Self {
        Self::new(None, Some(before))
    }
}

impl Filter for TimeFilter {
    fn apply(&self, notification: &Notification) -> bool {
        let t = notification.updated_at();
        self.since.map_or(true, |since| t >= since) && self.before.map_or(true, |before| t < before)
    }

    fn describe(&self) -> String {
        let fmt = |t: Option<DateTime<Utc>>| t.map(|t| t.to_rfc3339()).unwrap_or_default();
        format!("updated:[{}, {})", fmt(self.since), fmt(self.before))
    }
}

/// Inclusive range on the relevance score
#[derive(Clone)]
pub struct ScoreFilter {
    min: Option<i32>,
    max: Option<i32>,
    scorer: Arc<Scorer>,
}

impl ScoreFilter {
    /// Raw bounds, where 0 leaves that side open
    pub fn new(min: u8, max: u8, scorer: Arc<Scorer>) -> Self {
        let bound = |b: u8| (b != 0).then_some(i32::from(b));
        Self::range(bound(min), bound(max), scorer)
    }

    /// Explicit inclusive bounds. `max` below `min` matches nothing.
    pub fn range(min: Option<i32>, max: Option<i32>, scorer: Arc<Scorer>) -> Self {
        Self { min, max, scorer }
    }
}

impl Filter for ScoreFilter {
    fn apply(&self, notification: &Notification) -> bool {
        let total = i32::from(self.scorer.score(notification).total);
        self.min.map_or(true, |min| total >= min) && self.max.map_or(true, |max| total <= max)
    }

    fn describe(&self) -> String {
        match (self.min, self.max) {
            (Some(min), Some(max)) if min == max => format!("score:{}", min),
            (Some(min), Some(max)) => format!("score:{}..{}", min, max),
            (Some(min), None) => format!("score:>={}", min),
            (None, Some(max)) => format!("score:<={}", max),
            (None, None) => "score:*".to_string(),
        }
    }
}

impl std::fmt::Debug for ScoreFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoreFilter")
            .field("min", &self.min)
            .field("max", &self.max)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use notifscout_api::NotificationReason;

    fn pr(repo: &str, title: &str, unread: bool) -> Notification {
        Notification::new(
            "1",
            repo,
            SubjectType::PullRequest,
            title,
            NotificationReason::ReviewRequested,
            unread,
            Utc::now(),
        )
    }

    #[test]
    fn test_type_filter_accepts_aliases() {
        let n = pr("a/b", "t", true);
        assert!(TypeFilter::new("pr").apply(&n));
        assert!(TypeFilter::new("PULLREQUEST").apply(&n));
        assert!(!TypeFilter::new("issue").apply(&n));
    }

    #[test]
    fn test_reason_filter_normalises() {
        let n = pr("a/b", "t", true);
        assert!(ReasonFilter::new("review-requested").apply(&n));
        assert!(ReasonFilter::new("Review_Requested").apply(&n));
        assert!(!ReasonFilter::new("mention").apply(&n));
    }

    #[test]
    fn test_repo_glob_is_case_insensitive() {
        let n = pr("Rust-Lang/Cargo", "t", true);
        assert!(RepoFilter::new("rust-lang/*").unwrap().apply(&n));
        assert!(RepoFilter::new("rust-lang/cargo").unwrap().apply(&n));
        assert!(!RepoFilter::new("tokio-rs/*").unwrap().apply(&n));
        assert!(OrgFilter::new("rust-*").unwrap().apply(&n));
    }

    #[test]
    fn test_only_literal_globs_are_indexable() {
        assert_eq!(
            RepoFilter::new("Octo/Hello").unwrap().index_key(),
            Some(IndexKey::Repository("octo/hello".into()))
        );
        assert_eq!(RepoFilter::new("octo/*").unwrap().index_key(), None);
    }

    #[test]
    fn test_bad_glob_is_a_parse_error() {
        assert!(matches!(RepoFilter::new("[oops"), Err(Error::ParseError { .. })));
    }

    #[test]
    fn test_text_filter_searches_several_fields() {
        let n = pr("octo/hello", "Fix the Widget", false);
        assert!(TextFilter::new("widget").apply(&n));
        assert!(TextFilter::new("OCTO").apply(&n));
        assert!(TextFilter::new("pullrequest").apply(&n));
        assert!(TextFilter::new("review").apply(&n));
        assert!(!TextFilter::new("gadget").apply(&n));
    }

    #[test]
    fn test_regex_filter_fields() {
        let n = pr("octo/hello", "Bump serde to 1.0.200", true);
        assert!(RegexFilter::new("title", r"^bump \w+").unwrap().apply(&n));
        assert!(RegexFilter::new("owner", "^octo$").unwrap().apply(&n));
        assert!(RegexFilter::new("name", "hel+o").unwrap().apply(&n));
        assert!(!RegexFilter::new("milestone", ".*").unwrap().apply(&n));
        assert!(RegexFilter::new("title", "(unclosed").is_err());
    }

    #[test]
    fn test_time_window_is_half_open() {
        let n = pr("a/b", "t", true);
        let t = n.updated_at();
        assert!(TimeFilter::since(t).apply(&n));
        assert!(!TimeFilter::before(t).apply(&n));
        assert!(TimeFilter::new(Some(t - Duration::hours(1)), Some(t + Duration::seconds(1))).apply(&n));
    }

    #[test]
    fn test_score_filter_bounds() {
        let cache = Arc::new(notifscout_cache::MemoryCache::new(4).unwrap());
        let scorer = Arc::new(Scorer::default().with_cache(cache));
        let n = pr("a/b", "t", true);
        let total = i32::from(scorer.score(&n).total);

        assert!(ScoreFilter::new(0, 0, scorer.clone()).apply(&n));
        assert!(ScoreFilter::range(Some(total), Some(total), scorer.clone()).apply(&n));
        assert!(!ScoreFilter::range(Some(total + 1), None, scorer.clone()).apply(&n));
        assert!(!ScoreFilter::range(None, Some(total - 1), scorer).apply(&n));
    }
}
