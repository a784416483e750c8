use crate::config::StorageSettings;
use crate::error::{AppError, Result};
use crate::storage::{KeyValueStore, KvTransaction, TxMode};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Durable backend over a single SQLite table.
///
/// Writers are serialized in-process by `write_gate`; SQLite's file locking
/// and `busy_timeout` serialize writers across processes.
#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
}

impl SqliteKeyValueStore {
    /// Opens (creating if needed) the database and applies pending migrations.
    pub async fn open(settings: &StorageSettings) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&settings.url)
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(settings.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!(url = %settings.url, "Opened idempotency database");

        Ok(Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode(raw: String) -> Result<Value> {
    Ok(serde_json::from_str(&raw)?)
}

const SELECT_ONE: &str = r#"
    SELECT record FROM idempotency_records WHERE record_key = ?1
"#;

const UPSERT: &str = r#"
    INSERT INTO idempotency_records (record_key, record)
    VALUES (?1, ?2)
    ON CONFLICT (record_key) DO UPDATE SET record = excluded.record
"#;

const DELETE_ONE: &str = r#"
    DELETE FROM idempotency_records WHERE record_key = ?1
"#;

const SELECT_ALL: &str = r#"
    SELECT record_key, record FROM idempotency_records ORDER BY record_key
"#;

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let raw = sqlx::query_scalar::<_, String>(SELECT_ONE)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::from_sqlx)?;

        raw.map(decode).transpose()
    }

    async fn put(&self, key: &str, record: &Value) -> Result<()> {
        let raw = serde_json::to_string(record)?;
        let _gate = self.write_gate.lock().await;
        sqlx::query(UPSERT)
            .bind(key)
            .bind(raw)
            .execute(&self.pool)
            .await
            .map_err(AppError::from_sqlx)?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        sqlx::query(DELETE_ONE)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(AppError::from_sqlx)?;

        Ok(())
    }

    async fn transaction(&self, mode: TxMode) -> Result<Box<dyn KvTransaction>> {
        let gate = match mode {
            TxMode::ReadWrite => Some(Arc::clone(&self.write_gate).lock_owned().await),
            TxMode::ReadOnly => None,
        };
        let tx = self.pool.begin().await.map_err(AppError::from_sqlx)?;

        Ok(Box::new(SqliteTransaction {
            tx,
            mode,
            _gate: gate,
        }))
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Closed idempotency database");
    }
}

struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
    mode: TxMode,
    // Released when the transaction commits or is dropped.
    _gate: Option<OwnedMutexGuard<()>>,
}

impl SqliteTransaction {
    fn ensure_writable(&self) -> Result<()> {
        match self.mode {
            TxMode::ReadWrite => Ok(()),
            TxMode::ReadOnly => Err(AppError::ReadOnlyTransaction),
        }
    }
}

#[async_trait]
impl KvTransaction for SqliteTransaction {
    fn mode(&self) -> TxMode {
        self.mode
    }

    async fn get(&mut self, key: &str) -> Result<Option<Value>> {
        let raw = sqlx::query_scalar::<_, String>(SELECT_ONE)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(AppError::from_sqlx)?;

        raw.map(decode).transpose()
    }

    async fn put(&mut self, key: &str, record: &Value) -> Result<()> {
        self.ensure_writable()?;
        let raw = serde_json::to_string(record)?;
        sqlx::query(UPSERT)
            .bind(key)
            .bind(raw)
            .execute(&mut *self.tx)
            .await
            .map_err(AppError::from_sqlx)?;

        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<()> {
        self.ensure_writable()?;
        sqlx::query(DELETE_ONE)
            .bind(key)
            .execute(&mut *self.tx)
            .await
            .map_err(AppError::from_sqlx)?;

        Ok(())
    }

    async fn entries(&mut self) -> Result<Vec<(String, Value)>> {
        let rows = sqlx::query_as::<_, (String, String)>(SELECT_ALL)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(AppError::from_sqlx)?;

        // A corrupt row must not block sweeps or exports of the rest.
        Ok(rows
            .into_iter()
            .filter_map(|(key, raw)| match decode(raw) {
                Ok(record) => Some((key, record)),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping undecodable record");
                    None
                }
            })
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let SqliteTransaction { tx, _gate, .. } = *self;
        tx.commit().await.map_err(AppError::from_sqlx)?;
        drop(_gate);
        Ok(())
    }
}
