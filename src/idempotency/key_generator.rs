use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Produces a fresh, collision-free idempotency key on every call.
#[cfg_attr(test, mockall::automock)]
pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Configuration for key generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyGeneratorConfig {
    /// Optional prefix joined to the key with an underscore
    pub key_prefix: Option<String>,
}

/// Random (v4) UUID keys.
#[derive(Debug, Clone, Default)]
pub struct UuidKeyGenerator {
    config: KeyGeneratorConfig,
}

impl UuidKeyGenerator {
    pub fn new(config: KeyGeneratorConfig) -> Self {
        Self { config }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::new(KeyGeneratorConfig {
            key_prefix: Some(prefix.into()),
        })
    }
}

impl KeyGenerator for UuidKeyGenerator {
    fn generate(&self) -> String {
        let id = Uuid::new_v4();
        match &self.config.key_prefix {
            Some(prefix) => format!("{}_{}", prefix, id),
            None => id.to_string(),
        }
    }
}

/// Attributes describing one logical operation, for callers that want a
/// request identity derived from the operation rather than chosen by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestAttributes {
    pub client_id: String,
    pub operation_type: String,
    pub fields: BTreeMap<String, String>,
}

impl RequestAttributes {
    pub fn new(client_id: impl Into<String>, operation_type: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            operation_type: operation_type.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Stable request id: `"<prefix>_<sha256 hex>"`.
    ///
    /// Fields are hashed in name order, so insertion order does not matter.
    pub fn request_id(&self, prefix: &str) -> String {
        let mut hasher = Sha256::new();

        hasher.update(self.client_id.as_bytes());
        hasher.update(b"|");
        hasher.update(self.operation_type.as_bytes());

        for (name, value) in &self.fields {
            hasher.update(b"|");
            hasher.update(name.as_bytes());
            hasher.update(b":");
            hasher.update(value.as_bytes());
        }

        format!("{}_{}", prefix, hex::encode(hasher.finalize()))
    }
}
