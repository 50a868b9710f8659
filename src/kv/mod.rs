//! In-process key-value store with per-key expiry.
//!
//! Holds short-lived secrets: hashed OTP codes (`otp:{email}`), failed
//! code attempts (`otp_attempts:{email}`) and hashed refresh tokens
//! (`refresh:{user_id}`). Entries are dropped lazily on read
//! and by a periodic sweep.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct KvEntry {
    value: String,
    expires_at: Instant,
}

impl KvEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Default)]
pub struct KvStore {
    entries: DashMap<String, KvEntry>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key` for `ttl`, replacing any previous value
    pub fn set_ex(&self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) {
        self.entries.insert(
            key.into(),
            KvEntry {
                value: value.into(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        None
    }

    /// Remove a key, returning its value if it was still live
    pub fn take(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .remove(key)
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(_, entry)| entry.value)
    }

    /// Increment a counter and return its new value.
    ///
    /// A missing or expired counter starts at 1 and lives for `ttl`; a live
    /// one keeps its original expiry.
    pub fn incr(&self, key: &str, ttl: Duration) -> u64 {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| KvEntry {
            value: "0".to_string(),
            expires_at: now + ttl,
        });
        if entry.is_expired(now) {
            entry.value = "0".to_string();
            entry.expires_at = now + ttl;
        }
        let count = entry.value.parse::<u64>().unwrap_or(0).saturating_add(1);
        entry.value = count.to_string();
        count
    }

    pub fn del(&self, key: &str) -> bool {
        self.take(key).is_some()
    }

    /// Drop expired entries, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Spawn a background task that periodically sweeps expired keys
pub fn spawn_cleanup_task(store: Arc<KvStore>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(cleanup_interval_secs.max(1));
        loop {
            tokio::time::sleep(interval).await;
            let removed = store.cleanup_expired();
            if removed > 0 {
                tracing::debug!(removed, remaining = store.len(), "KV store cleanup complete");
            }
        }
    });
}
