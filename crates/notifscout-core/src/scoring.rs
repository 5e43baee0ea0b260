use crate::config::ScoringConfig;
use crate::error::{DeadlineExceeded, Error};
use crate::pool;
use crate::Result;
use chrono::{DateTime, Utc};
use notifscout_api::{Notification, NotificationReason, SubjectType};
use notifscout_cache::{Cache, CacheExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Activity sub-score until comment/reaction counts are wired in
pub const PLACEHOLDER_ACTIVITY: f64 = 0.5;

/// Involvement sub-score until author/assignee/mention detection is wired in
pub const PLACEHOLDER_INVOLVEMENT: f64 = 0.5;

/// Sub-score for types, reasons and repositories with no configured weight
pub const NEUTRAL: f64 = 0.5;

/// Weights that feed the relevance score
///
/// Weights are free-form. The defaults sum to 1.0 across the six top-level
/// factors so a perfect notification lands near 100, but nothing stops a
/// config from pushing totals into the clamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreFactors {
    pub age_weight: f64,
    pub activity_weight: f64,
    pub involvement_weight: f64,
    pub type_weight: f64,
    pub reason_weight: f64,
    pub repo_weight: f64,

    /// Decay per day for the age factor
    pub age_decay: f64,
    /// Ages beyond this stop losing points
    pub max_age_hours: f64,

    pub pr_weight: f64,
    pub issue_weight: f64,
    pub release_weight: f64,
    pub discussion_weight: f64,
    pub commit_weight: f64,

    pub assignee_weight: f64,
    pub author_weight: f64,
    pub mention_weight: f64,
    pub team_mention_weight: f64,
    pub review_weight: f64,
    pub comment_weight: f64,
    pub state_change_weight: f64,
    pub subscribed_weight: f64,

    /// Per-repository override for the repository sub-score, keyed by "owner/name"
    pub custom_repo_weights: BTreeMap<String, f64>,
}

impl Default for ScoreFactors {
    fn default() -> Self {
        Self {
            age_weight: 0.25,
            activity_weight: 0.15,
            involvement_weight: 0.20,
            type_weight: 0.15,
            reason_weight: 0.15,
            repo_weight: 0.10,

            age_decay: 0.1,
            max_age_hours: 720.0, // 30 days

            pr_weight: 0.8,
            issue_weight: 0.6,
            release_weight: 0.7,
            discussion_weight: 0.5,
            commit_weight: 0.4,

            assignee_weight: 0.9,
            author_weight: 0.7,
            mention_weight: 0.8,
            team_mention_weight: 0.6,
            review_weight: 0.9,
            comment_weight: 0.6,
            state_change_weight: 0.5,
            subscribed_weight: 0.3,

            custom_repo_weights: BTreeMap::new(),
        }
    }
}

impl ScoreFactors {
    /// Names accepted by [`ScoreFactors::set_weight`]
    pub const WEIGHT_NAMES: &'static [&'static str] = &[
        "age_weight",
        "activity_weight",
        "involvement_weight",
        "type_weight",
        "reason_weight",
        "repo_weight",
        "age_decay",
        "max_age_hours",
        "pr_weight",
        "issue_weight",
        "release_weight",
        "discussion_weight",
        "commit_weight",
        "assignee_weight",
        "author_weight",
        "mention_weight",
        "team_mention_weight",
        "review_weight",
        "comment_weight",
        "state_change_weight",
        "subscribed_weight",
    ];

    /// Current value of a named weight
    pub fn weight(&self, name: &str) -> Option<f64> {
        let value = match name {
            "age_weight" => self.age_weight,
            "activity_weight" => self.activity_weight,
            "involvement_weight" => self.involvement_weight,
            "type_weight" => self.type_weight,
            "reason_weight" => self.reason_weight,
            "repo_weight" => self.repo_weight,
            "age_decay" => self.age_decay,
            "max_age_hours" => self.max_age_hours,
            "pr_weight" => self.pr_weight,
            "issue_weight" => self.issue_weight,
            "release_weight" => self.release_weight,
            "discussion_weight" => self.discussion_weight,
            "commit_weight" => self.commit_weight,
            "assignee_weight" => self.assignee_weight,
            "author_weight" => self.author_weight,
            "mention_weight" => self.mention_weight,
            "team_mention_weight" => self.team_mention_weight,
            "review_weight" => self.review_weight,
            "comment_weight" => self.comment_weight,
            "state_change_weight" => self.state_change_weight,
            "subscribed_weight" => self.subscribed_weight,
            _ => return None,
        };
        Some(value)
    }

    fn weight_mut(&mut self, name: &str) -> Option<&mut f64> {
        let slot = match name {
            "age_weight" => &mut self.age_weight,
            "activity_weight" => &mut self.activity_weight,
            "involvement_weight" => &mut self.involvement_weight,
            "type_weight" => &mut self.type_weight,
            "reason_weight" => &mut self.reason_weight,
            "repo_weight" => &mut self.repo_weight,
            "age_decay" => &mut self.age_decay,
            "max_age_hours" => &mut self.max_age_hours,
            "pr_weight" => &mut self.pr_weight,
            "issue_weight" => &mut self.issue_weight,
            "release_weight" => &mut self.release_weight,
            "discussion_weight" => &mut self.discussion_weight,
            "commit_weight" => &mut self.commit_weight,
            "assignee_weight" => &mut self.assignee_weight,
            "author_weight" => &mut self.author_weight,
            "mention_weight" => &mut self.mention_weight,
            "team_mention_weight" => &mut self.team_mention_weight,
            "review_weight" => &mut self.review_weight,
            "comment_weight" => &mut self.comment_weight,
            "state_change_weight" => &mut self.state_change_weight,
            "subscribed_weight" => &mut self.subscribed_weight,
            _ => return None,
        };
        Some(slot)
    }

    /// Set a named weight. Unknown names and non-finite values are configuration errors.
    pub fn set_weight(&mut self, name: &str, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(Error::ConfigError(format!(
                "weight {} must be a finite number, got {}",
                name, value
            )));
        }
        let slot = self
            .weight_mut(name)
            .ok_or_else(|| Error::ConfigError(format!("unknown score weight: {}", name)))?;
        *slot = value;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for name in Self::WEIGHT_NAMES {
            if let Some(value) = self.weight(name) {
                if !value.is_finite() {
                    return Err(Error::ConfigError(format!(
                        "weight {} must be a finite number",
                        name
                    )));
                }
            }
        }
        if let Some((repo, _)) = self.custom_repo_weights.iter().find(|(_, w)| !w.is_finite()) {
            return Err(Error::ConfigError(format!(
                "custom weight for {} must be a finite number",
                repo
            )));
        }
        Ok(())
    }

    /// Stable-within-a-build hash of the weights, used in score cache keys
    pub fn fingerprint(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        // BTreeMap keeps the serialized order stable
        serde_json::to_string(self)
            .unwrap_or_default()
            .hash(&mut hasher);
        hasher.finish()
    }

    fn type_score(&self, subject_type: &SubjectType) -> f64 {
        match subject_type {
            SubjectType::PullRequest => self.pr_weight,
            SubjectType::Issue => self.issue_weight,
            SubjectType::Release => self.release_weight,
            SubjectType::Discussion => self.discussion_weight,
            SubjectType::Commit => self.commit_weight,
            _ => NEUTRAL,
        }
    }

    fn reason_score(&self, reason: NotificationReason) -> f64 {
        match reason {
            NotificationReason::Assign => self.assignee_weight,
            NotificationReason::Author => self.author_weight,
            NotificationReason::Mention => self.mention_weight,
            NotificationReason::TeamMention => self.team_mention_weight,
            NotificationReason::ReviewRequested => self.review_weight,
            NotificationReason::Comment => self.comment_weight,
            NotificationReason::StateChange => self.state_change_weight,
            NotificationReason::Subscribed => self.subscribed_weight,
            _ => NEUTRAL,
        }
    }

    fn repo_score(&self, full_name: &str) -> f64 {
        self.custom_repo_weights
            .get(full_name)
            .copied()
            .unwrap_or(NEUTRAL)
    }
}

/// Relevance score for one notification
///
/// `total` is a ranking signal, not a probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationScore {
    pub total: u8,
    /// Weighted contribution of each factor, before scaling to 0-100
    pub components: BTreeMap<String, f64>,
    pub factors: ScoreFactors,
}

/// Scores notifications, one at a time or a whole collection at once
#[derive(Clone)]
pub struct Scorer {
    factors: ScoreFactors,
    config: ScoringConfig,
    fingerprint: u64,
    current_user: Option<String>,
    cache: Option<Arc<dyn Cache>>,
}

impl Scorer {
    pub fn new(factors: ScoreFactors, config: ScoringConfig) -> Result<Self> {
        factors.validate()?;
        config.validate()?;

        Ok(Self {
            fingerprint: factors.fingerprint(),
            factors,
            config,
            current_user: None,
            cache: None,
        })
    }

    /// Remember computed scores in `cache` for `cache_ttl_secs`
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Reserved for involvement scoring
    pub fn with_current_user(mut self, login: impl Into<String>) -> Self {
        self.current_user = Some(login.into());
        self
    }

    pub fn factors(&self) -> &ScoreFactors {
        &self.factors
    }

    pub fn current_user(&self) -> Option<&str> {
        self.current_user.as_deref()
    }

    fn cache_key(&self, notification: &Notification) -> String {
        format!(
            "score:{:016x}:{}:{}",
            self.fingerprint,
            notification.id,
            notification.updated_at.timestamp()
        )
    }

    /// Score one notification, going through the cache when there is one
    pub fn score(&self, notification: &Notification) -> NotificationScore {
        let Some(cache) = &self.cache else {
            return self.compute(notification, Utc::now());
        };

        let key = self.cache_key(notification);
        if let Some(score) = cache.get_json::<NotificationScore>(&key) {
            return score;
        }

        let score = self.compute(notification, Utc::now());
        cache.set_json(&key, &score, Some(self.config.cache_ttl()));
        score
    }

    /// Pure scoring against an explicit clock
    pub fn compute(&self, notification: &Notification, now: DateTime<Utc>) -> NotificationScore {
        let f = &self.factors;

        let age_hours = (now - notification.updated_at).num_seconds().max(0) as f64 / 3600.0;
        let age = (-f.age_decay * age_hours.min(f.max_age_hours) / 24.0).exp();

        let mut components = BTreeMap::new();
        components.insert("age".to_string(), age * f.age_weight);
        components.insert(
            "activity".to_string(),
            PLACEHOLDER_ACTIVITY * f.activity_weight,
        );
        components.insert(
            "involvement".to_string(),
            PLACEHOLDER_INVOLVEMENT * f.involvement_weight,
        );
        components.insert(
            "type".to_string(),
            f.type_score(notification.subject_type()) * f.type_weight,
        );
        components.insert(
            "reason".to_string(),
            f.reason_score(notification.reason()) * f.reason_weight,
        );
        components.insert(
            "repository".to_string(),
            f.repo_score(notification.repo_full_name()) * f.repo_weight,
        );

        let sum: f64 = components.values().sum();
        // NaN clamps to 0 through the `as` cast
        let total = (sum * 100.0).clamp(0.0, 100.0) as u8;

        NotificationScore {
            total,
            components,
            factors: f.clone(),
        }
    }

    /// Score a whole collection
    ///
    /// Small collections run inline; big ones fan out over the worker pool.
    /// Either way the result is keyed by notification id.
    pub async fn score_all(
        &self,
        notifications: Vec<Notification>,
    ) -> std::result::Result<HashMap<String, NotificationScore>, DeadlineExceeded<HashMap<String, NotificationScore>>>
    {
        let total = notifications.len();
        if total == 0 {
            return Ok(HashMap::new());
        }

        if total < self.config.batch_size {
            return self.score_sequential(&notifications);
        }

        debug!("Scoring {} notifications concurrently", total);
        let records = Arc::new(notifications);
        let scorer = Arc::new(self.clone());
        let outcome = pool::run(
            total,
            self.config.concurrency,
            self.config.batch_size,
            self.config.timeout(),
            {
                let records = Arc::clone(&records);
                move |slot| {
                    let notification = &records[slot];
                    Some((notification.id.clone(), scorer.score(notification)))
                }
            },
        )
        .await;

        let scores: HashMap<_, _> = outcome.results.into_iter().collect();
        if outcome.timed_out {
            warn!(
                "Scoring hit its deadline after {} of {} notifications",
                outcome.processed, total
            );
            return Err(DeadlineExceeded {
                partial: scores,
                processed: outcome.processed,
                total,
            });
        }
        Ok(scores)
    }

    fn score_sequential(
        &self,
        notifications: &[Notification],
    ) -> std::result::Result<HashMap<String, NotificationScore>, DeadlineExceeded<HashMap<String, NotificationScore>>>
    {
        let deadline = Instant::now() + self.config.timeout();
        let mut scores = HashMap::with_capacity(notifications.len());

        for (processed, notification) in notifications.iter().enumerate() {
            if Instant::now() >= deadline {
                return Err(DeadlineExceeded {
                    partial: scores,
                    processed,
                    total: notifications.len(),
                });
            }
            scores.insert(notification.id.clone(), self.score(notification));
        }
        Ok(scores)
    }
}

impl Default for Scorer {
    fn default() -> Self {
        let factors = ScoreFactors::default();
        Self {
            fingerprint: factors.fingerprint(),
            factors,
            config: ScoringConfig::default(),
            current_user: None,
            cache: None,
        }
    }
}

impl std::fmt::Debug for Scorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scorer")
            .field("fingerprint", &format_args!("{:016x}", self.fingerprint))
            .field("config", &self.config)
            .field("current_user", &self.current_user)
            .field("cached", &self.cache.as_ref().map(|c| c.backend()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use notifscout_cache::MemoryCache;

    fn notification(subject_type: SubjectType, reason: NotificationReason, age_hours: i64) -> Notification {
        notification_at(Utc::now(), subject_type, reason, age_hours)
    }

    fn notification_at(
        now: DateTime<Utc>,
        subject_type: SubjectType,
        reason: NotificationReason,
        age_hours: i64,
    ) -> Notification {
        Notification::new(
            "n1",
            "octo/hello",
            subject_type,
            "title",
            reason,
            true,
            now - ChronoDuration::hours(age_hours),
        )
    }

    /// Mixed records older than the age cap, so scores don't depend on the wall clock
    fn aged_collection(len: usize) -> Vec<Notification> {
        let now = Utc::now();
        let types = [SubjectType::PullRequest, SubjectType::Issue, SubjectType::Release];
        let reasons = [
            NotificationReason::Mention,
            NotificationReason::Comment,
            NotificationReason::Subscribed,
            NotificationReason::ReviewRequested,
        ];
        (0..len)
            .map(|i| {
                Notification::new(
                    format!("n{}", i),
                    if i % 2 == 0 { "octo/hello" } else { "octo/world" },
                    types[i % types.len()].clone(),
                    "t",
                    reasons[i % reasons.len()],
                    i % 5 != 0,
                    now - ChronoDuration::hours(24 * 60 + i as i64),
                )
            })
            .collect()
    }

    #[test]
    fn test_fresh_review_request_outranks_old_subscription() {
        let scorer = Scorer::default();
        let now = Utc::now();

        let hot = scorer.compute(
            &notification(SubjectType::PullRequest, NotificationReason::ReviewRequested, 0),
            now,
        );
        let cold = scorer.compute(
            &notification(SubjectType::Commit, NotificationReason::Subscribed, 24 * 20),
            now,
        );

        assert!(hot.total > cold.total, "{} vs {}", hot.total, cold.total);
        assert_eq!(hot.components.len(), 6);
    }

    #[test]
    fn test_default_weights_for_fresh_pr_review() {
        let scorer = Scorer::default();
        let n = notification(SubjectType::PullRequest, NotificationReason::ReviewRequested, 0);
        let score = scorer.compute(&n, n.updated_at());

        // 0.25 + 0.075 + 0.1 + 0.12 + 0.135 + 0.05 = 0.73, truncated
        assert!((72..=73).contains(&score.total), "got {}", score.total);
    }

    #[test]
    fn test_unknown_type_and_reason_are_neutral() {
        let scorer = Scorer::default();
        let n = notification(
            SubjectType::Other("Mystery".into()),
            NotificationReason::Other,
            0,
        );
        let score = scorer.compute(&n, n.updated_at());
        assert!((score.components["type"] - NEUTRAL * 0.15).abs() < 1e-9);
        assert!((score.components["reason"] - NEUTRAL * 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_custom_repo_weight() {
        let mut factors = ScoreFactors::default();
        factors
            .custom_repo_weights
            .insert("octo/hello".to_string(), 1.0);
        let scorer = Scorer::new(factors, ScoringConfig::default()).unwrap();

        let n = notification(SubjectType::Issue, NotificationReason::Comment, 1);
        let score = scorer.compute(&n, Utc::now());
        assert!((score.components["repository"] - 0.10).abs() < 1e-9);
    }

    #[test]
    fn test_total_stays_in_bounds_under_extreme_weights() {
        let mut huge = ScoreFactors::default();
        for name in ScoreFactors::WEIGHT_NAMES {
            huge.set_weight(name, 1e6).unwrap();
        }
        let mut negative = ScoreFactors::default();
        for name in ScoreFactors::WEIGHT_NAMES {
            negative.set_weight(name, -1e6).unwrap();
        }

        for factors in [huge, negative, ScoreFactors::default()] {
            let scorer = Scorer::new(factors, ScoringConfig::default()).unwrap();
            for age in [0, 5, 1000, 100_000] {
                let n = notification(SubjectType::Release, NotificationReason::Mention, age);
                let total = scorer.compute(&n, Utc::now()).total;
                assert!(total <= 100);
            }
        }
    }

    #[test]
    fn test_age_decays() {
        let scorer = Scorer::default();
        let now = Utc::now();
        let at = |hours| {
            scorer.compute(
                &notification_at(now, SubjectType::Issue, NotificationReason::Mention, hours),
                now,
            )
        };
        let fresh = at(0);
        let week = at(24 * 7);
        let capped = at(24 * 365);
        let at_cap = at(720);

        assert!(fresh.components["age"] > week.components["age"]);
        assert!((capped.components["age"] - at_cap.components["age"]).abs() < 1e-9);
    }

    #[test]
    fn test_weight_reads_match_set_weight() {
        let mut factors = ScoreFactors::default();
        assert_eq!(factors.weight("age_weight"), Some(0.25));
        assert_eq!(factors.weight("vibes_weight"), None);

        factors.set_weight("review_weight", 2.5).unwrap();
        assert_eq!(factors.weight("review_weight"), Some(2.5));
        assert!(ScoreFactors::WEIGHT_NAMES
            .iter()
            .all(|name| factors.weight(name).is_some()));
    }

    #[test]
    fn test_validate_rejects_non_finite_weights() {
        let mut factors = ScoreFactors::default();
        factors.max_age_hours = f64::INFINITY;
        assert!(matches!(factors.validate(), Err(Error::ConfigError(_))));

        let mut factors = ScoreFactors::default();
        factors.custom_repo_weights.insert("octo/hello".into(), f64::NAN);
        assert!(matches!(factors.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_set_weight_rejects_unknown_and_nan() {
        let mut factors = ScoreFactors::default();
        assert!(matches!(
            factors.set_weight("vibes_weight", 1.0),
            Err(Error::ConfigError(_))
        ));
        assert!(matches!(
            factors.set_weight("age_weight", f64::NAN),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_scores_are_cached() {
        let cache = Arc::new(MemoryCache::new(4).unwrap());
        let scorer = Scorer::default().with_cache(cache.clone());
        let n = notification(SubjectType::Issue, NotificationReason::Mention, 3);

        let first = scorer.score(&n);
        let second = scorer.score(&n);
        assert_eq!(first, second);

        let stats = cache.metrics();
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_score_all_concurrent_matches_sequential() {
        let notifications = aged_collection(250);
        let concurrent = Scorer::new(
            ScoreFactors::default(),
            ScoringConfig {
                batch_size: 10,
                concurrency: 4,
                ..ScoringConfig::default()
            },
        )
        .unwrap();
        let sequential = Scorer::new(
            ScoreFactors::default(),
            ScoringConfig {
                batch_size: 1000,
                ..ScoringConfig::default()
            },
        )
        .unwrap();

        let fanned_out = concurrent.score_all(notifications.clone()).await.unwrap();
        let inline = sequential.score_all(notifications.clone()).await.unwrap();
        assert_eq!(fanned_out.len(), 250);
        assert_eq!(inline.len(), 250);

        let now = Utc::now();
        for n in &notifications {
            let expected = sequential.compute(n, now).total;
            assert_eq!(fanned_out[&n.id].total, expected, "{}", n.id);
            assert_eq!(inline[&n.id].total, expected, "{}", n.id);
        }
    }

    #[tokio::test]
    async fn test_score_all_concurrent_deadline_returns_partial() {
        let scorer = Scorer::new(
            ScoreFactors::default(),
            ScoringConfig {
                batch_size: 100,
                concurrency: 2,
                timeout_ms: 1,
                ..ScoringConfig::default()
            },
        )
        .unwrap();

        let err = scorer.score_all(aged_collection(200_000)).await.unwrap_err();
        assert_eq!(err.total, 200_000);
        assert!(err.processed < err.total);
        assert!(err.partial.len() <= err.processed);
    }

    #[tokio::test]
    async fn test_score_all_sequential_deadline_returns_partial() {
        let scorer = Scorer::new(
            ScoreFactors::default(),
            ScoringConfig {
                batch_size: 1_000_000,
                timeout_ms: 1,
                ..ScoringConfig::default()
            },
        )
        .unwrap();

        let err = scorer.score_all(aged_collection(200_000)).await.unwrap_err();
        assert_eq!(err.total, 200_000);
        assert!(err.processed < err.total);
        assert_eq!(err.partial.len(), err.processed);
    }
}
