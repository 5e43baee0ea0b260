use super::IndexKey;
use notifscout_api::Notification;
use std::collections::HashMap;

/// Positions of notifications grouped by the fields filters can be indexed on
///
/// Built per engine call and thrown away afterwards.
pub(crate) struct FieldIndex {
    buckets: HashMap<IndexKey, Vec<usize>>,
}

impl FieldIndex {
    pub fn build(notifications: &[Notification]) -> Self {
        let mut buckets: HashMap<IndexKey, Vec<usize>> = HashMap::new();

        for (position, n) in notifications.iter().enumerate() {
            let keys = [
                IndexKey::Repository(n.repo_full_name().to_ascii_lowercase()),
                IndexKey::Organization(n.owner_login().to_ascii_lowercase()),
                IndexKey::Type(n.subject_type().as_str().to_ascii_lowercase()),
                IndexKey::Unread(n.is_unread()),
            ];
            for key in keys {
                buckets.entry(key).or_default().push(position);
            }
        }

        Self { buckets }
    }

    /// Ascending positions in the bucket, empty when nothing has that value
    pub fn lookup(&self, key: &IndexKey) -> &[usize] {
        self.buckets.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use notifscout_api::{NotificationReason, SubjectType};

    #[test]
    fn test_buckets() {
        let notifications = vec![
            Notification::new("0", "Octo/Hello", SubjectType::Issue, "t", NotificationReason::Mention, true, Utc::now()),
            Notification::new("1", "octo/world", SubjectType::PullRequest, "t", NotificationReason::Mention, false, Utc::now()),
            Notification::new("2", "other/hello", SubjectType::Issue, "t", NotificationReason::Mention, true, Utc::now()),
        ];
        let index = FieldIndex::build(&notifications);

        assert_eq!(index.lookup(&IndexKey::Repository("octo/hello".into())), &[0]);
        assert_eq!(index.lookup(&IndexKey::Organization("octo".into())), &[0, 1]);
        assert_eq!(index.lookup(&IndexKey::Type("issue".into())), &[0, 2]);
        assert_eq!(index.lookup(&IndexKey::Unread(false)), &[1]);
        assert!(index.lookup(&IndexKey::Type("release".into())).is_empty());
    }
}
