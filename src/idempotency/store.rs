use crate::config::StorageSettings;
use crate::error::{AppError, Result};
use crate::idempotency::clock::{Clock, SystemClock};
use crate::idempotency::key_generator::{KeyGenerator, UuidKeyGenerator};
use crate::idempotency::records::{KeyRecord, RecordKind, ResponseRecord};
use crate::idempotency::session::IdempotencySession;
use crate::idempotency::stats::IdempotencyStats;
use crate::observability::{get_metrics, mask_sensitive, LatencyTimer};
use crate::storage::{KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore, TxMode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Age after which `auto_cleanup_default` sweeps a saved response: 7 days.
pub const DEFAULT_RESPONSE_THRESHOLD_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Records removed by one cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub keys_removed: u64,
    pub responses_removed: u64,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.keys_removed + self.responses_removed
    }
}

/// Idempotency keys and cached responses, addressed by request id.
///
/// Cloning is cheap and every clone shares the same storage handle. Each
/// request id owns two independent records: the issued key (`::meta`) and
/// the cached response (`::response`).
#[derive(Clone)]
pub struct IdempotencyStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    keys: Arc<dyn KeyGenerator>,
    stats: Arc<IdempotencyStats>,
}

impl fmt::Debug for IdempotencyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdempotencyStore")
            .field("backend", &self.kv.backend())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl IdempotencyStore {
    /// Store over `kv` using the system clock and random UUID keys.
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self::with_collaborators(kv, Arc::new(SystemClock), Arc::new(UuidKeyGenerator::default()))
    }

    pub fn with_collaborators(
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        keys: Arc<dyn KeyGenerator>,
    ) -> Self {
        Self {
            kv,
            clock,
            keys,
            stats: Arc::new(IdempotencyStats::new()),
        }
    }

    /// Opens the durable SQLite-backed store.
    pub async fn open(settings: &StorageSettings) -> Result<Self> {
        let kv = SqliteKeyValueStore::open(settings).await?;
        Ok(Self::new(Arc::new(kv)))
    }

    /// Non-durable store, for tests and short-lived processes.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeyValueStore::new()))
    }

    /// Releases the storage handle. Shared by every clone and session.
    pub async fn close(&self) {
        self.kv.close().await;
    }

    pub fn stats(&self) -> Arc<IdempotencyStats> {
        Arc::clone(&self.stats)
    }

    /// Binds `request_id` to a session handle over this store.
    pub fn session(&self, request_id: impl Into<String>) -> IdempotencySession {
        IdempotencySession::new(self.clone(), request_id)
    }

    fn observe<T>(&self, operation: &'static str, timer: &LatencyTimer, result: &Result<T>) {
        get_metrics().record_storage_op(
            operation,
            self.kv.backend(),
            timer.elapsed_ms(),
            result.is_ok(),
        );
    }

    /// Issues a fresh key for `request_id`, replacing any previous one.
    ///
    /// `ttl_ms` of `None` or `Some(0)` issues a key that never expires.
    pub async fn create_key(&self, request_id: &str, ttl_ms: Option<u64>) -> Result<String> {
        let timer = LatencyTimer::new();
        let result = self.create_key_inner(request_id, ttl_ms).await;
        self.observe("create_key", &timer, &result);
        result
    }

    async fn create_key_inner(&self, request_id: &str, ttl_ms: Option<u64>) -> Result<String> {
        let key = self.keys.generate();
        let ttl_ms = ttl_ms.filter(|ttl| *ttl > 0);
        let expires_at = ttl_ms.map(|ttl| {
            let now = self.clock.now_millis();
            i64::try_from(ttl).map_or(i64::MAX, |ttl| now.saturating_add(ttl))
        });

        let record = KeyRecord {
            key: key.clone(),
            expires_at,
        };
        self.kv
            .put(&RecordKind::Meta.key_for(request_id), &serde_json::to_value(&record)?)
            .await?;

        self.stats.record_key_created();
        get_metrics().record_key_created(expires_at.is_some());
        tracing::debug!(
            request_id = %mask_sensitive(request_id, 4),
            expires_at = ?expires_at,
            "Issued idempotency key"
        );

        Ok(key)
    }

    /// Returns the live key for `request_id`.
    ///
    /// An expired key is evicted on read: the key and the cached response
    /// are both deleted and `None` is returned.
    pub async fn get_key(&self, request_id: &str) -> Result<Option<String>> {
        let timer = LatencyTimer::new();
        let result = self.get_key_inner(request_id).await;
        self.observe("get_key", &timer, &result);
        result
    }

    async fn get_key_inner(&self, request_id: &str) -> Result<Option<String>> {
        let meta_key = RecordKind::Meta.key_for(request_id);

        let Some(raw) = self.kv.get(&meta_key).await? else {
            self.stats.record_key_miss();
            get_metrics().record_key_lookup("miss");
            return Ok(None);
        };
        let record: KeyRecord = serde_json::from_value(raw)?;

        if !record.is_expired_at(self.clock.now_millis()) {
            self.stats.record_key_hit();
            get_metrics().record_key_lookup("hit");
            return Ok(Some(record.key));
        }

        // Re-check under the write transaction; the key may have been
        // reissued since the first read.
        let mut tx = self.kv.transaction(TxMode::ReadWrite).await?;
        let current = tx
            .get(&meta_key)
            .await?
            .map(serde_json::from_value::<KeyRecord>)
            .transpose()?;

        if let Some(current) = current {
            if !current.is_expired_at(self.clock.now_millis()) {
                self.stats.record_key_hit();
                get_metrics().record_key_lookup("hit");
                return Ok(Some(current.key));
            }
        }

        tx.delete(&meta_key).await?;
        tx.delete(&RecordKind::Response.key_for(request_id)).await?;
        tx.commit().await?;

        self.stats.record_key_expired();
        get_metrics().record_key_lookup("expired");
        tracing::info!(
            request_id = %mask_sensitive(request_id, 4),
            "Idempotency key expired, cleared request records"
        );

        Ok(None)
    }

    /// Caches `response` for `request_id`, replacing any previous response.
    pub async fn save_response<T>(&self, request_id: &str, response: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let timer = LatencyTimer::new();
        let result = self.save_response_inner(request_id, response).await;
        self.observe("save_response", &timer, &result);
        result
    }

    async fn save_response_inner<T>(&self, request_id: &str, response: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let record = ResponseRecord {
            response_data: serde_json::to_value(response)?,
            saved_at: self.clock.now_millis(),
        };
        self.kv
            .put(
                &RecordKind::Response.key_for(request_id),
                &serde_json::to_value(&record)?,
            )
            .await?;

        self.stats.record_response_saved();
        get_metrics().record_response_saved();
        tracing::debug!(request_id = %mask_sensitive(request_id, 4), "Cached response");

        Ok(())
    }

    /// Returns the cached response for `request_id`.
    ///
    /// No expiry is checked here. Responses outlive an expired key until an
    /// explicit `clear`, an expired-key read, or a cleanup sweep.
    pub async fn get_response<T>(&self, request_id: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let timer = LatencyTimer::new();
        let result = self.get_response_inner(request_id).await;
        self.observe("get_response", &timer, &result);
        result
    }

    async fn get_response_inner<T>(&self, request_id: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let raw = self.kv.get(&RecordKind::Response.key_for(request_id)).await?;

        let response = match raw {
            Some(raw) => {
                let record: ResponseRecord = serde_json::from_value(raw)?;
                Some(serde_json::from_value::<T>(record.response_data)?)
            }
            None => None,
        };

        self.stats.record_response_lookup(response.is_some());
        get_metrics().record_response_lookup(response.is_some());

        Ok(response)
    }

    /// Deletes the key and the cached response for `request_id` together.
    pub async fn clear(&self, request_id: &str) -> Result<()> {
        let timer = LatencyTimer::new();
        let result = self.clear_inner(request_id).await;
        self.observe("clear", &timer, &result);
        result
    }

    async fn clear_inner(&self, request_id: &str) -> Result<()> {
        let mut tx = self.kv.transaction(TxMode::ReadWrite).await?;
        tx.delete(&RecordKind::Meta.key_for(request_id)).await?;
        tx.delete(&RecordKind::Response.key_for(request_id)).await?;
        tx.commit().await?;

        tracing::debug!(request_id = %mask_sensitive(request_id, 4), "Cleared request records");
        Ok(())
    }

    /// Serializes every record in the table as one JSON object mapping the
    /// composite key to its record.
    pub async fn export_store(&self) -> Result<String> {
        let timer = LatencyTimer::new();
        let result = self.export_store_inner().await;
        self.observe("export_store", &timer, &result);
        result
    }

    async fn export_store_inner(&self) -> Result<String> {
        let mut tx = self.kv.transaction(TxMode::ReadOnly).await?;
        let snapshot: BTreeMap<String, Value> = tx.entries().await?.into_iter().collect();
        tx.commit().await?;

        get_metrics().record_export(snapshot.len() as u64);
        tracing::info!(records = snapshot.len(), "Exported idempotency store");

        Ok(serde_json::to_string(&snapshot)?)
    }

    /// Writes every record in `blob` back into the table in one transaction.
    ///
    /// Existing records at the imported keys are replaced; records outside
    /// the blob are left alone. The blob is fully validated before anything
    /// is written. Returns the number of records written.
    pub async fn import_store(&self, blob: &str) -> Result<usize> {
        let timer = LatencyTimer::new();
        let result = self.import_store_inner(blob).await;
        self.observe("import_store", &timer, &result);
        result
    }

    async fn import_store_inner(&self, blob: &str) -> Result<usize> {
        let entries = parse_import(blob)?;

        let mut tx = self.kv.transaction(TxMode::ReadWrite).await?;
        for (key, record) in &entries {
            tx.put(key, record).await?;
        }
        tx.commit().await?;

        get_metrics().record_import(entries.len() as u64);
        tracing::info!(records = entries.len(), "Imported idempotency records");

        Ok(entries.len())
    }

    /// One sweep over the whole table.
    ///
    /// Removes keys whose expiry has passed and responses saved more than
    /// `threshold_ms` ago. The two rules are independent of each other.
    pub async fn auto_cleanup(&self, threshold_ms: u64) -> Result<SweepReport> {
        let timer = LatencyTimer::new();
        let result = self.auto_cleanup_inner(threshold_ms).await;
        self.observe("auto_cleanup", &timer, &result);

        if let Ok(report) = &result {
            self.stats.record_swept(report.total());
            get_metrics().record_cleanup(
                report.keys_removed,
                report.responses_removed,
                timer.elapsed_ms(),
            );
        }
        result
    }

    /// [`auto_cleanup`](Self::auto_cleanup) with the 7 day response threshold.
    pub async fn auto_cleanup_default(&self) -> Result<SweepReport> {
        self.auto_cleanup(DEFAULT_RESPONSE_THRESHOLD_MS).await
    }

    async fn auto_cleanup_inner(&self, threshold_ms: u64) -> Result<SweepReport> {
        let now = self.clock.now_millis();
        let mut report = SweepReport::default();

        let mut tx = self.kv.transaction(TxMode::ReadWrite).await?;
        for (key, record) in tx.entries().await? {
            let evict = match RecordKind::of(&key) {
                Some(RecordKind::Meta) => KeyRecord::deserialize(&record)
                    .map(|meta| meta.is_expired_at(now))
                    .unwrap_or(false),
                Some(RecordKind::Response) => ResponseRecord::deserialize(&record)
                    .map(|response| response.is_older_than(threshold_ms, now))
                    .unwrap_or(false),
                None => false,
            };
            if !evict {
                continue;
            }

            tx.delete(&key).await?;
            match RecordKind::of(&key) {
                Some(RecordKind::Meta) => report.keys_removed += 1,
                _ => report.responses_removed += 1,
            }
        }
        tx.commit().await?;

        tracing::info!(
            keys_removed = report.keys_removed,
            responses_removed = report.responses_removed,
            "Idempotency cleanup sweep finished"
        );

        Ok(report)
    }
}

/// Parses an export blob, checking each known record against its shape.
fn parse_import(blob: &str) -> Result<BTreeMap<String, Value>> {
    let parsed: Value = serde_json::from_str(blob)?;
    let Value::Object(entries) = parsed else {
        return Err(AppError::Format(
            "import blob must be a JSON object".to_string(),
        ));
    };

    for (key, record) in &entries {
        let checked = match RecordKind::of(key) {
            Some(RecordKind::Meta) => KeyRecord::deserialize(record).map(|_| ()),
            Some(RecordKind::Response) => ResponseRecord::deserialize(record).map(|_| ()),
            None => Ok(()),
        };
        checked.map_err(|e| AppError::Format(format!("record {}: {}", key, e)))?;
    }

    Ok(entries.into_iter().collect())
}
