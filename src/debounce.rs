//! Burst debouncing.
//!
//! Collapses a rapid run of messages from one caller into a single
//! downstream attempt carrying only the most recent message. The latest
//! message per user is persisted in the counter store with a short TTL;
//! the pending timer itself is process-local memory, owned by whichever
//! handler received the message. Under horizontal replication that timer
//! ownership is a known gap: callers should route a given user's messages
//! to one instance (sticky routing) to keep the cancellation guarantee.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use papaya::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::store::StoreHandle;

/// Latest message for one user, persisted with a short TTL
#[derive(Clone, Debug, Deserialize, Serialize)]
struct DebounceRecord {
    message_id: String,
    text: String,
    received_at: i64,
}

/// Process-local handle for one user's pending timer
struct PendingTimer {
    message_id: String,
    cancel: Notify,
}

fn debounce_key(user_id: &str) -> String {
    format!("debounce:{}", user_id)
}

/// Per-user debounce with at most one active timer per user per process.
/// Scheduling a new timer for a user unconditionally cancels the previous
/// one; there is no cancellation from outside.
pub struct Debouncer {
    store: StoreHandle,
    state_ttl: Duration,
    pending: HashMap<String, Arc<PendingTimer>>,
}

impl Debouncer {
    pub fn new(store: StoreHandle, state_ttl: Duration) -> Self {
        Self {
            store,
            state_ttl,
            pending: HashMap::new(),
        }
    }

    /// Number of timers currently pending in this process
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Wait out the debounce delay and report whether this message is the
    /// one that should proceed downstream. Superseded messages resolve
    /// `false` and are silently dropped by the caller. Store failures fail
    /// open: the message proceeds after the delay.
    pub async fn should_process(
        &self,
        user_id: &str,
        message_id: &str,
        text: &str,
        delay: Duration,
    ) -> bool {
        let record = DebounceRecord {
            message_id: message_id.to_string(),
            text: text.to_string(),
            received_at: Utc::now().timestamp_millis(),
        };
        match serde_json::to_string(&record) {
            Ok(json) => {
                if let Err(err) = self
                    .store
                    .set_value(&debounce_key(user_id), &json, self.state_ttl)
                    .await
                {
                    warn!(user_id = %user_id, error = %err, "Failed persisting debounce record");
                }
            }
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "Failed encoding debounce record");
            }
        }

        let timer = Arc::new(PendingTimer {
            message_id: message_id.to_string(),
            cancel: Notify::new(),
        });
        // Replacing the map entry cancels the previous timer for this user
        {
            let guard = self.pending.pin();
            if let Some(previous) = guard.insert(user_id.to_string(), timer.clone()) {
                debug!(
                    user_id = %user_id,
                    superseded = %previous.message_id,
                    by = %message_id,
                    "Cancelling pending debounce timer"
                );
                previous.cancel.notify_one();
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = timer.cancel.notified() => {
                return false;
            }
        }

        let survived = self.is_still_latest(user_id, message_id).await;
        if survived {
            // This burst is settled; drop its state
            if let Err(err) = self.store.remove(&debounce_key(user_id)).await {
                warn!(user_id = %user_id, error = %err, "Failed clearing debounce record");
            }
        }
        // Advisory cleanup only: superseding is decided by the stored record.
        // A fired timer leaves the map either way, including one whose record
        // was overwritten by another instance without a local cancellation.
        let guard = self.pending.pin();
        if let Some(current) = guard.get(user_id) {
            if Arc::ptr_eq(current, &timer) {
                guard.remove(user_id);
            }
        }
        survived
    }

    /// Re-read the persisted latest message after the timer fires. A record
    /// that expired before the timer fired counts as still-latest.
    async fn is_still_latest(&self, user_id: &str, message_id: &str) -> bool {
        match self.store.get_value(&debounce_key(user_id)).await {
            Ok(Some(json)) => match serde_json::from_str::<DebounceRecord>(&json) {
                Ok(record) => record.message_id == message_id,
                Err(err) => {
                    warn!(user_id = %user_id, error = %err, "Unreadable debounce record, processing");
                    true
                }
            },
            Ok(None) => true,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "Store failure on debounce check, processing");
                true
            }
        }
    }
}
