use crate::error::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What actually gets stored per key: the payload plus its absolute expiry
///
/// Persistent backends write this as a MessagePack blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub value: Vec<u8>,
    /// Unix epoch milliseconds, `None` means the entry never expires
    pub expires_at: Option<i64>,
}

impl Envelope {
    pub fn new(value: &[u8], ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|ttl| {
            let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            now_millis().saturating_add(ttl_ms)
        });

        Self {
            value: value.to_vec(),
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        matches!(self.expires_at, Some(at) if now_ms >= at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
