//! Sliding-window admission over the counter store.
//!
//! One counting window per key: a single atomic increment-and-read decides
//! each call, so concurrent callers on the same key can never both observe
//! the last free slot. The store restarts a window lazily when an increment
//! finds the previous one expired; nothing is purged on a schedule.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::settings::Operation;
use crate::store::StoreHandle;

/// Identifier used for the system-wide ceiling key
pub const GLOBAL_SCOPE_ID: &str = "global";

/// Namespace of a counting window
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Parsing,
    Reply,
    Global,
}

impl From<Operation> for Scope {
    fn from(operation: Operation) -> Self {
        match operation {
            Operation::Parsing => Scope::Parsing,
            Operation::Reply => Scope::Reply,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Parsing => write!(f, "parsing"),
            Scope::Reply => write!(f, "reply"),
            Scope::Global => write!(f, "global"),
        }
    }
}

/// Identifies one counting window in the store.
///
/// Keys are `(scope, identifier)` only. Tier deliberately does not
/// participate: it feeds limit computation upstream, so a mid-window tier
/// change keeps the same window instead of silently resetting it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub scope: Scope,
    pub identifier: String,
}

impl RateLimitKey {
    pub fn for_user(operation: Operation, user_id: &str) -> Self {
        Self {
            scope: operation.into(),
            identifier: user_id.to_string(),
        }
    }

    pub fn global() -> Self {
        Self {
            scope: Scope::Global,
            identifier: GLOBAL_SCOPE_ID.to_string(),
        }
    }

    /// Render the store key for this window
    pub fn storage_key(&self) -> String {
        format!("rl:{}:{}", self.scope, self.identifier)
    }
}

/// Outcome of one window check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct WindowDecision {
    pub admitted: bool,
    pub remaining: u32,
    /// Unix milliseconds when the current window falls away
    pub reset_at: i64,
}

/// Admits or rejects single calls against `(limit, window)` pairs.
///
/// Stateless besides the store handle; the same limiter instance serves
/// every key. Store failures propagate: fail-open policy belongs to the
/// quota resolver, not here.
#[derive(Clone, Debug)]
pub struct SlidingWindowLimiter {
    store: StoreHandle,
}

impl SlidingWindowLimiter {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Record this call against `key` and decide it. Admitted iff fewer
    /// than `limit` calls landed in the current window before this one;
    /// a call that finds the window exactly full is rejected.
    pub async fn admit(
        &self,
        key: &RateLimitKey,
        limit: u32,
        window: Duration,
    ) -> Result<WindowDecision> {
        let slot = self.store.incr_window(&key.storage_key(), window).await?;
        let reset_at = slot.window_start + window.as_millis() as i64;
        if slot.count <= u64::from(limit) {
            Ok(WindowDecision {
                admitted: true,
                remaining: limit - slot.count as u32,
                reset_at,
            })
        } else {
            Ok(WindowDecision {
                admitted: false,
                remaining: 0,
                reset_at,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::time::{self, Duration};

    use super::*;
    use crate::store::MemoryStore;

    fn new_limiter() -> SlidingWindowLimiter {
        let store = StoreHandle::new(Arc::new(MemoryStore::new()), Duration::from_millis(500));
        SlidingWindowLimiter::new(store)
    }

    #[tokio::test]
    async fn first_n_calls_admitted_then_rejected() {
        let limiter = new_limiter();
        let key = RateLimitKey::for_user(Operation::Parsing, "u1");
        let window = Duration::from_secs(60);

        for n in 0..5u32 {
            let decision = limiter.admit(&key, 5, window).await.unwrap();
            assert!(decision.admitted);
            assert_eq!(decision.remaining, 4 - n);
        }

        let rejected = limiter.admit(&key, 5, window).await.unwrap();
        assert!(!rejected.admitted);
        assert_eq!(rejected.remaining, 0);
        assert!(rejected.reset_at > Utc::now().timestamp_millis());
    }

    #[tokio::test]
    async fn full_window_ties_reject() {
        let limiter = new_limiter();
        let key = RateLimitKey::for_user(Operation::Reply, "u1");
        let window = Duration::from_secs(60);

        assert!(limiter.admit(&key, 1, window).await.unwrap().admitted);
        // count == limit exactly: no admission
        assert!(!limiter.admit(&key, 1, window).await.unwrap().admitted);
    }

    #[tokio::test]
    async fn window_expiry_restores_quota() {
        let limiter = new_limiter();
        let key = RateLimitKey::for_user(Operation::Parsing, "u1");
        let window = Duration::from_millis(100);

        for _ in 0..3 {
            limiter.admit(&key, 3, window).await.unwrap();
        }
        assert!(!limiter.admit(&key, 3, window).await.unwrap().admitted);

        time::sleep(Duration::from_millis(150)).await;
        let fresh = limiter.admit(&key, 3, window).await.unwrap();
        assert!(fresh.admitted);
        assert_eq!(fresh.remaining, 2);
    }

    #[tokio::test]
    async fn keys_do_not_share_windows() {
        let limiter = new_limiter();
        let window = Duration::from_secs(60);

        let parsing = RateLimitKey::for_user(Operation::Parsing, "u1");
        let reply = RateLimitKey::for_user(Operation::Reply, "u1");
        let other_user = RateLimitKey::for_user(Operation::Parsing, "u2");

        for _ in 0..2 {
            limiter.admit(&parsing, 2, window).await.unwrap();
        }
        assert!(!limiter.admit(&parsing, 2, window).await.unwrap().admitted);

        // same user, different scope: untouched
        assert!(limiter.admit(&reply, 2, window).await.unwrap().admitted);
        // same scope, different user: untouched
        assert!(limiter.admit(&other_user, 2, window).await.unwrap().admitted);
    }

    #[tokio::test]
    async fn reset_at_is_window_start_plus_window() {
        let limiter = new_limiter();
        let key = RateLimitKey::global();
        let window = Duration::from_secs(60);

        let before = Utc::now().timestamp_millis();
        let first = limiter.admit(&key, 10, window).await.unwrap();
        let after = Utc::now().timestamp_millis();

        assert!(first.reset_at >= before + 60_000);
        assert!(first.reset_at <= after + 60_000);

        // later calls inside the same window keep the same reset point
        let second = limiter.admit(&key, 10, window).await.unwrap();
        assert_eq!(second.reset_at, first.reset_at);
    }

    #[test]
    fn storage_keys_are_namespaced() {
        let key = RateLimitKey::for_user(Operation::Parsing, "u42");
        assert_eq!(key.storage_key(), "rl:parsing:u42");
        assert_eq!(RateLimitKey::global().storage_key(), "rl:global:global");
    }
}
