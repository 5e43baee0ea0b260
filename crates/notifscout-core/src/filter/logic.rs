use super::{Filter, IndexKey};
use notifscout_api::Notification;

fn join(children: &[Box<dyn Filter>], op: &str, empty: &str) -> String {
    match children {
        [] => empty.to_string(),
        [only] => only.describe(),
        _ => {
            let parts: Vec<String> = children.iter().map(|c| c.describe()).collect();
            format!("({})", parts.join(&format!(" {} ", op)))
        }
    }
}

/// Every child must match. No children matches everything.
pub struct AndFilter {
    children: Vec<Box<dyn Filter>>,
}

impl AndFilter {
    pub fn new(children: Vec<Box<dyn Filter>>) -> Self {
        Self { children }
    }
}

impl Filter for AndFilter {
    fn apply(&self, notification: &Notification) -> bool {
        self.children.iter().all(|c| c.apply(notification))
    }

    fn describe(&self) -> String {
        join(&self.children, "AND", "all")
    }

    // Any child's bucket is a superset of the conjunction
    fn index_key(&self) -> Option<IndexKey> {
        self.children.iter().find_map(|c| c.index_key())
    }
}

/// At least one child must match. No children matches nothing.
pub struct OrFilter {
    children: Vec<Box<dyn Filter>>,
}

impl OrFilter {
    pub fn new(children: Vec<Box<dyn Filter>>) -> Self {
        Self { children }
    }
}

impl Filter for OrFilter {
    fn apply(&self, notification: &Notification) -> bool {
        self.children.iter().any(|c| c.apply(notification))
    }

    fn describe(&self) -> String {
        join(&self.children, "OR", "none")
    }
}

pub struct NotFilter {
    child: Box<dyn Filter>,
}

impl NotFilter {
    pub fn new(child: Box<dyn Filter>) -> Self {
        Self { child }
    }
}

impl Filter for NotFilter {
    fn apply(&self, notification: &Notification) -> bool {
        !self.child.apply(notification)
    }

    fn describe(&self) -> String {
        format!("NOT {}", self.child.describe())
    }
}
