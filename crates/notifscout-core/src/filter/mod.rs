// Filter expression language and the engine that evaluates it
//
// Every filter variant is its own struct behind the `Filter` trait. The
// parser builds trees of them, the engine runs a tree over a collection.

pub mod engine;
mod index;
pub mod logic;
pub mod parser;
pub mod predicates;
pub mod store;

pub use engine::FilterEngine;
pub use logic::{AndFilter, NotFilter, OrFilter};
pub use parser::QueryParser;
pub use predicates::{
    AllFilter, OrgFilter, ReasonFilter, RegexFilter, RepoFilter, ScoreFilter, StatusFilter,
    TextFilter, TimeFilter, TypeFilter,
};
pub use store::{FilterStore, NamedFilter, NamedFilterStore};

use notifscout_api::Notification;
use std::fmt;

/// A predicate over one notification
///
/// `apply` never fails: a record without the field a filter looks at simply
/// doesn't match.
pub trait Filter: Send + Sync {
    fn apply(&self, notification: &Notification) -> bool;

    /// Human-readable form, e.g. `(repo:rust-lang/* AND is:unread)`
    fn describe(&self) -> String;

    /// Index bucket that holds every possible match, if there is one
    ///
    /// The engine only uses it to narrow the candidates; the full filter still
    /// runs on every candidate.
    fn index_key(&self) -> Option<IndexKey> {
        None
    }
}

impl fmt::Debug for dyn Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filter({})", self.describe())
    }
}

/// Exact-match bucket in the engine's per-call index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    /// Full name, lowercased
    Repository(String),
    /// Owner login, lowercased
    Organization(String),
    /// Subject type, lowercased
    Type(String),
    Unread(bool),
}
