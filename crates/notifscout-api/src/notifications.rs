use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// GitHub notification thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub repository: NotificationRepository,
    pub subject: NotificationSubject,
    pub reason: NotificationReason,
    pub unread: bool,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub url: String,
}

/// Minimal repository info in notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRepository {
    #[serde(default)]
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub owner: NotificationOwner,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub html_url: String,
}

/// Repository owner in notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationOwner {
    pub login: String,
}

/// Subject of the notification (Issue, PR, etc.)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSubject {
    pub title: String,
    #[serde(rename = "type")]
    pub subject_type: SubjectType,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub latest_comment_url: Option<String>,
}

impl Notification {
    /// Build a notification from the handful of fields the pipeline cares about.
    ///
    /// Owner and short name are derived from `full_name` ("owner/name").
    pub fn new(
        id: impl Into<String>,
        full_name: impl Into<String>,
        subject_type: SubjectType,
        title: impl Into<String>,
        reason: NotificationReason,
        unread: bool,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let full_name = full_name.into();
        let (owner, name) = match full_name.split_once('/') {
            Some((owner, name)) => (owner.to_string(), name.to_string()),
            None => (String::new(), full_name.clone()),
        };

        Self {
            id: id.into(),
            repository: NotificationRepository {
                id: 0,
                name,
                html_url: format!("https://github.com/{}", full_name),
                full_name,
                owner: NotificationOwner { login: owner },
                private: false,
            },
            subject: NotificationSubject {
                title: title.into(),
                subject_type,
                url: None,
                latest_comment_url: None,
            },
            reason,
            unread,
            updated_at,
            last_read_at: None,
            url: String::new(),
        }
    }

    pub fn repo_full_name(&self) -> &str {
        &self.repository.full_name
    }

    pub fn owner_login(&self) -> &str {
        &self.repository.owner.login
    }

    pub fn title(&self) -> &str {
        &self.subject.title
    }

    pub fn subject_type(&self) -> &SubjectType {
        &self.subject.subject_type
    }

    pub fn reason(&self) -> NotificationReason {
        self.reason
    }

    pub fn is_unread(&self) -> bool {
        self.unread
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Kind of thing the notification is about.
///
/// Unknown kinds keep their original spelling so filters can still match them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubjectType {
    PullRequest,
    Issue,
    Discussion,
    Release,
    Commit,
    CheckSuite,
    Other(String),
}

impl SubjectType {
    pub fn as_str(&self) -> &str {
        match self {
            SubjectType::PullRequest => "PullRequest",
            SubjectType::Issue => "Issue",
            SubjectType::Discussion => "Discussion",
            SubjectType::Release => "Release",
            SubjectType::Commit => "Commit",
            SubjectType::CheckSuite => "CheckSuite",
            SubjectType::Other(other) => other,
        }
    }

    /// Lenient parse used by the query language ("pr", "pull_request", "PullRequest" all work)
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "pullrequest" | "pr" => SubjectType::PullRequest,
            "issue" => SubjectType::Issue,
            "discussion" => SubjectType::Discussion,
            "release" => SubjectType::Release,
            "commit" => SubjectType::Commit,
            "checksuite" => SubjectType::CheckSuite,
            _ => SubjectType::Other(value.to_string()),
        }
    }
}

impl From<String> for SubjectType {
    fn from(value: String) -> Self {
        SubjectType::parse(&value)
    }
}

impl From<SubjectType> for String {
    fn from(value: SubjectType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for SubjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification reason types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationReason {
    Assign,          // Assigned to you
    Author,          // You're the author
    Comment,         // Commented on
    Invitation,      // Invited to contribute
    Manual,          // Manually subscribed
    Mention,         // Mentioned you
    ReviewRequested, // Review requested
    SecurityAlert,   // Security vulnerability
    StateChange,     // Issue/PR state changed
    Subscribed,      // Watching the repo
    TeamMention,     // Team mentioned
    #[serde(other)]
    Other,
}

impl NotificationReason {
    /// Wire spelling, also what the query language matches against
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationReason::Assign => "assign",
            NotificationReason::Author => "author",
            NotificationReason::Comment => "comment",
            NotificationReason::Invitation => "invitation",
            NotificationReason::Manual => "manual",
            NotificationReason::Mention => "mention",
            NotificationReason::ReviewRequested => "review_requested",
            NotificationReason::SecurityAlert => "security_alert",
            NotificationReason::StateChange => "state_change",
            NotificationReason::Subscribed => "subscribed",
            NotificationReason::TeamMention => "team_mention",
            NotificationReason::Other => "other",
        }
    }
}

impl std::fmt::Display for NotificationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationReason::Assign => write!(f, "Assigned"),
            NotificationReason::Author => write!(f, "Author"),
            NotificationReason::Comment => write!(f, "Comment"),
            NotificationReason::Invitation => write!(f, "Invitation"),
            NotificationReason::Manual => write!(f, "Manual"),
            NotificationReason::Mention => write!(f, "Mention"),
            NotificationReason::ReviewRequested => write!(f, "Review"),
            NotificationReason::SecurityAlert => write!(f, "Security"),
            NotificationReason::StateChange => write!(f, "State Change"),
            NotificationReason::Subscribed => write!(f, "Subscribed"),
            NotificationReason::TeamMention => write!(f, "Team Mention"),
            NotificationReason::Other => write!(f, "Other"),
        }
    }
}

/// Parameters passed to a notification source when fetching
#[derive(Debug, Clone, Default)]
pub struct NotificationFilters {
    /// Only show unread notifications
    pub unread_only: bool,
    /// Filter by repository (owner/repo)
    pub repository: Option<String>,
    /// Show only participating (exclude watching notifications)
    pub participating: bool,
}

impl NotificationFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unread_only(mut self) -> Self {
        self.unread_only = true;
        self
    }

    pub fn repository(mut self, repo: String) -> Self {
        self.repository = Some(repo);
        self
    }

    pub fn participating(mut self) -> Self {
        self.participating = true;
        self
    }

    /// Whether a fetched notification satisfies these parameters
    pub fn matches(&self, notification: &Notification) -> bool {
        if self.unread_only && !notification.unread {
            return false;
        }
        if let Some(repo) = &self.repository {
            if !notification.repo_full_name().eq_ignore_ascii_case(repo) {
                return false;
            }
        }
        if self.participating && notification.reason == NotificationReason::Subscribed {
            return false;
        }
        true
    }
}
