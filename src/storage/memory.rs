use crate::error::{AppError, Result};
use crate::storage::{KeyValueStore, KvTransaction, TxMode};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Table = BTreeMap<String, Value>;

/// In-process backend over an ordered map.
///
/// Every transaction holds the table lock until it commits or is dropped, so
/// transactions are fully serialized. Writes are staged on a copy and swapped
/// in on commit.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    table: Arc<Mutex<Table>>,
    closed: Arc<AtomicBool>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently committed.
    pub async fn len(&self) -> usize {
        self.table.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::StorageUnavailable(
                "in-memory store has been closed".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_open()?;
        Ok(self.table.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, record: &Value) -> Result<()> {
        self.ensure_open()?;
        self.table
            .lock()
            .await
            .insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        self.table.lock().await.remove(key);
        Ok(())
    }

    async fn transaction(&self, mode: TxMode) -> Result<Box<dyn KvTransaction>> {
        self.ensure_open()?;
        let guard = Arc::clone(&self.table).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            staged,
            mode,
        }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Table>,
    staged: Table,
    mode: TxMode,
}

impl MemoryTransaction {
    fn ensure_writable(&self) -> Result<()> {
        match self.mode {
            TxMode::ReadWrite => Ok(()),
            TxMode::ReadOnly => Err(AppError::ReadOnlyTransaction),
        }
    }
}

#[async_trait]
impl KvTransaction for MemoryTransaction {
    fn mode(&self) -> TxMode {
        self.mode
    }

    async fn get(&mut self, key: &str) -> Result<Option<Value>> {
        Ok(self.staged.get(key).cloned())
    }

    async fn put(&mut self, key: &str, record: &Value) -> Result<()> {
        self.ensure_writable()?;
        self.staged.insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<()> {
        self.ensure_writable()?;
        self.staged.remove(key);
        Ok(())
    }

    async fn entries(&mut self) -> Result<Vec<(String, Value)>> {
        Ok(self
            .staged
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            mut guard,
            staged,
            mode,
        } = *self;
        if mode == TxMode::ReadWrite {
            *guard = staged;
        }
        Ok(())
    }
}
