use crate::error::Result;
use crate::idempotency::store::IdempotencyStore;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// One logical request bound to an [`IdempotencyStore`].
///
/// Every per-request call delegates to the store with this session's request
/// id. `export_session` and `import_session` are the exception: they cover
/// the whole underlying table, not just this request, so a single session
/// handle can back up or restore everything.
#[derive(Debug, Clone)]
pub struct IdempotencySession {
    request_id: String,
    store: IdempotencyStore,
}

impl IdempotencySession {
    pub fn new(store: IdempotencyStore, request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            store,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub async fn create_key(&self, ttl_ms: Option<u64>) -> Result<String> {
        self.store.create_key(&self.request_id, ttl_ms).await
    }

    pub async fn get_key(&self) -> Result<Option<String>> {
        self.store.get_key(&self.request_id).await
    }

    pub async fn save_response<T>(&self, response: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.store.save_response(&self.request_id, response).await
    }

    pub async fn get_response<T>(&self) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.store.get_response(&self.request_id).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear(&self.request_id).await
    }

    /// Exports the entire store, not only this session's records.
    pub async fn export_session(&self) -> Result<String> {
        self.store.export_store().await
    }

    /// Imports into the entire store; keys for other requests are written too.
    pub async fn import_session(&self, blob: &str) -> Result<usize> {
        self.store.import_store(blob).await
    }
}
