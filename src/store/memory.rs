//! In-process counter store.
//!
//! Backs the gate in tests and single-process deployments. Entries carry an
//! absolute expiry and are checked lazily on access; `purge_expired` sweeps
//! the whole map so the cache cannot grow without bound.
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use papaya::HashMap;

use super::{CounterStore, StoreError, WindowSlot};

#[derive(Clone, Debug)]
enum Stored {
    Counter(u64),
    Window { count: u64, window_start: i64 },
    Text(String),
}

#[derive(Clone, Debug)]
struct Entry {
    value: Stored,
    expires_at: i64,
}

impl Entry {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at > now
    }
}

/// Lazy-TTL map of stored entries. Increment operations go through papaya's
/// atomic update-or-insert so concurrent callers on the same key never lose
/// counts.
#[derive(Default)]
pub struct MemoryStore {
    entries: HashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all expired entries to keep the map from growing endlessly
    pub fn purge_expired(&self) {
        let now = Utc::now().timestamp_millis();
        // pin_owned is expensive but we need to mutate potentially the whole map
        self.entries.pin_owned().retain(|_k, entry| entry.is_live(now));
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn incr_window(
        &self,
        key: &str,
        window: Duration,
    ) -> std::result::Result<WindowSlot, StoreError> {
        let now = Utc::now().timestamp_millis();
        let window_ms = window.as_millis() as i64;
        let guard = self.entries.pin();
        let entry = guard.update_or_insert_with(
            key.to_string(),
            |existing| match &existing.value {
                Stored::Window {
                    count,
                    window_start,
                } if existing.is_live(now) => Entry {
                    value: Stored::Window {
                        count: count + 1,
                        window_start: *window_start,
                    },
                    expires_at: existing.expires_at,
                },
                // Expired window or a clobbered key: restart
                _ => Entry {
                    value: Stored::Window {
                        count: 1,
                        window_start: now,
                    },
                    expires_at: now + window_ms,
                },
            },
            || Entry {
                value: Stored::Window {
                    count: 1,
                    window_start: now,
                },
                expires_at: now + window_ms,
            },
        );
        match &entry.value {
            Stored::Window {
                count,
                window_start,
            } => Ok(WindowSlot {
                count: *count,
                window_start: *window_start,
            }),
            _ => Err(StoreError::Corrupt(format!(
                "expected window entry at {}",
                key
            ))),
        }
    }

    async fn incr_counter(
        &self,
        key: &str,
        by: u64,
        ttl: Duration,
    ) -> std::result::Result<u64, StoreError> {
        let now = Utc::now().timestamp_millis();
        let ttl_ms = ttl.as_millis() as i64;
        let guard = self.entries.pin();
        let entry = guard.update_or_insert_with(
            key.to_string(),
            |existing| match &existing.value {
                Stored::Counter(value) if existing.is_live(now) => Entry {
                    value: Stored::Counter(value + by),
                    expires_at: existing.expires_at,
                },
                _ => Entry {
                    value: Stored::Counter(by),
                    expires_at: now + ttl_ms,
                },
            },
            || Entry {
                value: Stored::Counter(by),
                expires_at: now + ttl_ms,
            },
        );
        match &entry.value {
            Stored::Counter(value) => Ok(*value),
            _ => Err(StoreError::Corrupt(format!(
                "expected counter entry at {}",
                key
            ))),
        }
    }

    async fn get_counter(&self, key: &str) -> std::result::Result<Option<u64>, StoreError> {
        let now = Utc::now().timestamp_millis();
        match self.entries.pin().get(key) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                Stored::Counter(value) => Ok(Some(*value)),
                _ => Err(StoreError::Corrupt(format!(
                    "expected counter entry at {}",
                    key
                ))),
            },
            _ => Ok(None),
        }
    }

    async fn set_value(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> std::result::Result<(), StoreError> {
        let now = Utc::now().timestamp_millis();
        self.entries.pin().insert(
            key.to_string(),
            Entry {
                value: Stored::Text(value.to_string()),
                expires_at: now + ttl.as_millis() as i64,
            },
        );
        Ok(())
    }

    async fn get_value(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
        let now = Utc::now().timestamp_millis();
        match self.entries.pin().get(key) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                Stored::Text(value) => Ok(Some(value.clone())),
                _ => Err(StoreError::Corrupt(format!(
                    "expected text entry at {}",
                    key
                ))),
            },
            _ => Ok(None),
        }
    }

    async fn remove(&self, key: &str) -> std::result::Result<(), StoreError> {
        self.entries.pin().remove(key);
        Ok(())
    }
}
