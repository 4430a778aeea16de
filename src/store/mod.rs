//! Counter store seam.
//!
//! Every piece of cross-request state (window counters, the load gauge,
//! usage counters, duplicate/debounce records) lives behind this trait so
//! that any store with atomic increment-with-expiry semantics can back the
//! gate. No transactions are assumed across keys: every mutation is a
//! single self-contained operation.
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub mod memory;

pub use memory::MemoryStore;

/// Errors surfaced by a counter store backend
#[derive(Clone, Debug)]
pub enum StoreError {
    /// Backend unreachable or refused the operation
    Unavailable(String),

    /// Operation exceeded the configured per-call bound
    Timeout(String),

    /// Entry existed but did not hold the expected shape
    Corrupt(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            StoreError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            StoreError::Corrupt(msg) => write!(f, "Corrupt entry: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Snapshot of one counting window after an atomic increment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowSlot {
    /// Post-increment count, includes the call that produced this slot
    pub count: u64,
    /// Unix milliseconds at which the current window opened
    pub window_start: i64,
}

/// Contract for the shared, atomically-incrementable, key-expiring store.
///
/// The increment operations must be atomic increment-and-read: callers never
/// perform a separate read-then-write against their own copy.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counting window at `key`, starting a fresh window when
    /// none exists or the previous one has expired. Returns the
    /// post-increment state.
    async fn incr_window(&self, key: &str, window: Duration)
        -> std::result::Result<WindowSlot, StoreError>;

    /// Atomically add `by` to a plain counter. TTL applies from the moment
    /// the counter is (re)created, not on every increment.
    async fn incr_counter(
        &self,
        key: &str,
        by: u64,
        ttl: Duration,
    ) -> std::result::Result<u64, StoreError>;

    async fn get_counter(&self, key: &str) -> std::result::Result<Option<u64>, StoreError>;

    async fn set_value(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> std::result::Result<(), StoreError>;

    async fn get_value(&self, key: &str) -> std::result::Result<Option<String>, StoreError>;

    async fn remove(&self, key: &str) -> std::result::Result<(), StoreError>;
}

/// Bound a store future by the configured timeout. A hung store call must
/// never wedge a request handler; it becomes a `StoreError::Timeout` that
/// the caller converts into a fail-open outcome.
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> std::result::Result<T, StoreError>
where
    F: Future<Output = std::result::Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(format!(
            "store call exceeded {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Shared handle to a counter store with the per-call timeout applied to
/// every operation. All components hold one of these rather than the raw
/// trait object.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn CounterStore>,
    timeout: Duration,
}

impl StoreHandle {
    pub fn new(store: Arc<dyn CounterStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn incr_window(
        &self,
        key: &str,
        window: Duration,
    ) -> std::result::Result<WindowSlot, StoreError> {
        bounded(self.timeout, self.store.incr_window(key, window)).await
    }

    pub async fn incr_counter(
        &self,
        key: &str,
        by: u64,
        ttl: Duration,
    ) -> std::result::Result<u64, StoreError> {
        bounded(self.timeout, self.store.incr_counter(key, by, ttl)).await
    }

    pub async fn get_counter(&self, key: &str) -> std::result::Result<Option<u64>, StoreError> {
        bounded(self.timeout, self.store.get_counter(key)).await
    }

    pub async fn set_value(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> std::result::Result<(), StoreError> {
        bounded(self.timeout, self.store.set_value(key, value, ttl)).await
    }

    pub async fn get_value(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
        bounded(self.timeout, self.store.get_value(key)).await
    }

    pub async fn remove(&self, key: &str) -> std::result::Result<(), StoreError> {
        bounded(self.timeout, self.store.remove(key)).await
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("timeout", &self.timeout)
            .finish()
    }
}
