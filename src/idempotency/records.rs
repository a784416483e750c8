use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The two record kinds stored per request id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Meta,
    Response,
}

impl RecordKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            RecordKind::Meta => "::meta",
            RecordKind::Response => "::response",
        }
    }

    /// Composite storage key, `"<request_id>::<kind>"`.
    pub fn key_for(&self, request_id: &str) -> String {
        format!("{}{}", request_id, self.suffix())
    }

    /// Kind of a composite key, or `None` for keys this crate did not write.
    pub fn of(full_key: &str) -> Option<Self> {
        if full_key.ends_with(RecordKind::Meta.suffix()) {
            Some(RecordKind::Meta)
        } else if full_key.ends_with(RecordKind::Response.suffix()) {
            Some(RecordKind::Response)
        } else {
            None
        }
    }
}

/// The issued idempotency key for a request id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
    pub key: String,
    /// Absolute expiry in epoch milliseconds; `None` and `0` never expire.
    pub expires_at: Option<i64>,
}

impl KeyRecord {
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at != 0 && expires_at < now_millis)
    }
}

/// A cached response payload for a request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub response_data: Value,
    pub saved_at: i64,
}

impl ResponseRecord {
    /// True once the response is strictly older than `threshold_ms`.
    /// A zero `saved_at` carries no age and is never swept.
    pub fn is_older_than(&self, threshold_ms: u64, now_millis: i64) -> bool {
        if self.saved_at == 0 {
            return false;
        }
        let age = i128::from(now_millis) - i128::from(self.saved_at);
        age > i128::from(threshold_ms)
    }
}
