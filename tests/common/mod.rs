#![allow(dead_code)]

use idempotency_store::config::StorageSettings;
use idempotency_store::idempotency::{IdempotencyStore, ManualClock, UuidKeyGenerator};
use idempotency_store::storage::{MemoryKeyValueStore, SqliteKeyValueStore};
use std::sync::Arc;
use tempfile::TempDir;

/// A store under a manual clock. Keep `_dir` alive for the test's duration.
pub struct Harness {
    pub store: IdempotencyStore,
    pub clock: Arc<ManualClock>,
    pub _dir: Option<TempDir>,
}

pub fn memory_store() -> Harness {
    let clock = Arc::new(ManualClock::new(0));
    let store = IdempotencyStore::with_collaborators(
        Arc::new(MemoryKeyValueStore::new()),
        clock.clone(),
        Arc::new(UuidKeyGenerator::default()),
    );
    Harness {
        store,
        clock,
        _dir: None,
    }
}

pub async fn sqlite_store() -> Harness {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let kv = open_sqlite(&dir, "idempotency.db").await;

    let clock = Arc::new(ManualClock::new(0));
    let store = IdempotencyStore::with_collaborators(
        Arc::new(kv),
        clock.clone(),
        Arc::new(UuidKeyGenerator::default()),
    );
    Harness {
        store,
        clock,
        _dir: Some(dir),
    }
}

pub async fn open_sqlite(dir: &TempDir, name: &str) -> SqliteKeyValueStore {
    SqliteKeyValueStore::open(&StorageSettings::for_path(dir.path().join(name)))
        .await
        .expect("Failed to open sqlite store")
}

/// Both backends, so every scenario runs against each.
pub async fn all_backends() -> Vec<Harness> {
    vec![memory_store(), sqlite_store().await]
}
