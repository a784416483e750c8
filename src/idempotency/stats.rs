use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// In-process counters for one store handle and its sessions.
#[derive(Debug, Default)]
pub struct IdempotencyStats {
    pub keys_created: AtomicU64,
    pub key_hits: AtomicU64,
    pub key_misses: AtomicU64,
    pub keys_expired: AtomicU64,
    pub responses_saved: AtomicU64,
    pub response_hits: AtomicU64,
    pub response_misses: AtomicU64,
    pub records_swept: AtomicU64,
}

impl IdempotencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_key_created(&self) {
        self.keys_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_key_hit(&self) {
        self.key_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_key_miss(&self) {
        self.key_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// An expired key also counts as a miss.
    pub fn record_key_expired(&self) {
        self.keys_expired.fetch_add(1, Ordering::Relaxed);
        self.record_key_miss();
    }

    pub fn record_response_saved(&self) {
        self.responses_saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response_lookup(&self, hit: bool) {
        if hit {
            self.response_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.response_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_swept(&self, count: u64) {
        self.records_swept.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            keys_created: self.keys_created.load(Ordering::Relaxed),
            key_hits: self.key_hits.load(Ordering::Relaxed),
            key_misses: self.key_misses.load(Ordering::Relaxed),
            keys_expired: self.keys_expired.load(Ordering::Relaxed),
            responses_saved: self.responses_saved.load(Ordering::Relaxed),
            response_hits: self.response_hits.load(Ordering::Relaxed),
            response_misses: self.response_misses.load(Ordering::Relaxed),
            records_swept: self.records_swept.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub keys_created: u64,
    pub key_hits: u64,
    pub key_misses: u64,
    pub keys_expired: u64,
    pub responses_saved: u64,
    pub response_hits: u64,
    pub response_misses: u64,
    pub records_swept: u64,
}

impl StatsSnapshot {
    /// Share of key lookups that found a live key.
    pub fn key_hit_rate(&self) -> f64 {
        let total = self.key_hits + self.key_misses;
        if total == 0 {
            0.0
        } else {
            self.key_hits as f64 / total as f64
        }
    }

    /// Share of response lookups served from cache, i.e. retries that avoided
    /// re-running their side effect.
    pub fn response_hit_rate(&self) -> f64 {
        let total = self.response_hits + self.response_misses;
        if total == 0 {
            0.0
        } else {
            self.response_hits as f64 / total as f64
        }
    }
}
