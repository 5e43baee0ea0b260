// Notification records and the sources that produce them
pub mod notifications;
pub mod source;

// Re-export common types
pub use notifications::{
    Notification, NotificationFilters, NotificationOwner, NotificationReason,
    NotificationRepository, NotificationSubject, SubjectType,
};
pub use source::{JsonFileSource, NotificationSource, SourceError, StaticSource};
