//! Key-value persistence behind the idempotency store.
//!
//! A backend exposes a single logical table of JSON records addressed by a
//! string key, with point reads and writes plus explicit transactions. The
//! idempotency layer never touches a backend's native types, so the same
//! store logic runs over SQLite in production and an in-memory map in tests.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryKeyValueStore;
pub use sqlite::SqliteKeyValueStore;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Access mode requested when opening a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

/// A persistent ordered map of records with transactional read-modify-write.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Short name used in logs and metric labels.
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Writes `record` at `key`, replacing whatever was there.
    async fn put(&self, key: &str, record: &Value) -> Result<()>;

    /// Removes `key`. Absent keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Opens a transaction over the whole table.
    ///
    /// Dropping the returned handle without calling
    /// [`KvTransaction::commit`] discards its writes.
    async fn transaction(&self, mode: TxMode) -> Result<Box<dyn KvTransaction>>;

    /// Releases the underlying handle. Later operations fail with
    /// `StorageUnavailable`.
    async fn close(&self);
}

/// An open transaction. Reads observe the transaction's own writes.
#[async_trait]
pub trait KvTransaction: Send {
    fn mode(&self) -> TxMode;

    async fn get(&mut self, key: &str) -> Result<Option<Value>>;

    async fn put(&mut self, key: &str, record: &Value) -> Result<()>;

    async fn delete(&mut self, key: &str) -> Result<()>;

    /// One cursor pass over every record, in key order.
    ///
    /// Visited keys may be deleted through this transaction before it
    /// commits; the deletions become visible atomically on commit.
    /// Stored rows that cannot be decoded are logged and left out.
    async fn entries(&mut self) -> Result<Vec<(String, Value)>>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
