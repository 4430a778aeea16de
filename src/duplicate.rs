//! Duplicate suppression.
//!
//! Suppresses content-identical repeats from one caller inside a short
//! trailing window, independently of the debouncer: retried submissions are
//! caught even across debounce boundaries. Every incoming message
//! overwrites the stored record for its user regardless of the outcome.
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::StoreHandle;

#[derive(Clone, Debug, Deserialize, Serialize)]
struct RecentMessage {
    text: String,
    received_at: i64,
}

fn recent_key(user_id: &str) -> String {
    format!("lastmsg:{}", user_id)
}

#[derive(Clone, Debug)]
pub struct DuplicateDetector {
    store: StoreHandle,
}

impl DuplicateDetector {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// A message is a duplicate iff a previous record exists for the user,
    /// it is younger than `window`, and the trimmed texts match exactly.
    /// Store failure reads as not-duplicate: suppression is best-effort and
    /// must never block a legitimate message.
    pub async fn is_duplicate(&self, user_id: &str, text: &str, window: Duration) -> bool {
        let trimmed = text.trim();
        let now = Utc::now().timestamp_millis();

        let previous = match self.store.get_value(&recent_key(user_id)).await {
            Ok(value) => value,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "Store failure on duplicate check");
                None
            }
        };

        let duplicate = previous
            .and_then(|json| serde_json::from_str::<RecentMessage>(&json).ok())
            .map(|record| {
                now - record.received_at < window.as_millis() as i64 && record.text == trimmed
            })
            .unwrap_or(false);

        // Always remember the newest message, duplicate or not
        let record = RecentMessage {
            text: trimmed.to_string(),
            received_at: now,
        };
        match serde_json::to_string(&record) {
            Ok(json) => {
                if let Err(err) = self.store.set_value(&recent_key(user_id), &json, window).await {
                    warn!(user_id = %user_id, error = %err, "Failed persisting recent message");
                }
            }
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "Failed encoding recent message");
            }
        }

        duplicate
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time::{self, Duration};

    use super::*;
    use crate::store::MemoryStore;

    fn new_detector() -> DuplicateDetector {
        let store = StoreHandle::new(Arc::new(MemoryStore::new()), Duration::from_millis(500));
        DuplicateDetector::new(store)
    }

    #[tokio::test]
    async fn repeat_inside_window_is_duplicate() {
        let detector = new_detector();
        let window = Duration::from_secs(10);

        assert!(!detector.is_duplicate("u3", "besok rapat jam 9", window).await);
        assert!(detector.is_duplicate("u3", "besok rapat jam 9", window).await);
    }

    #[tokio::test]
    async fn repeat_after_window_is_fresh() {
        let detector = new_detector();
        let window = Duration::from_millis(80);

        assert!(!detector.is_duplicate("u3", "besok rapat jam 9", window).await);
        time::sleep(Duration::from_millis(120)).await;
        assert!(!detector.is_duplicate("u3", "besok rapat jam 9", window).await);
    }

    #[tokio::test]
    async fn comparison_ignores_surrounding_whitespace() {
        let detector = new_detector();
        let window = Duration::from_secs(10);

        assert!(!detector.is_duplicate("u1", "  beli kopi ", window).await);
        assert!(detector.is_duplicate("u1", "beli kopi", window).await);
    }

    #[tokio::test]
    async fn different_text_is_not_duplicate() {
        let detector = new_detector();
        let window = Duration::from_secs(10);

        assert!(!detector.is_duplicate("u1", "beli kopi", window).await);
        assert!(!detector.is_duplicate("u1", "beli teh", window).await);
        // the record was overwritten by the newest message
        assert!(detector.is_duplicate("u1", "beli teh", window).await);
        // and the original text no longer matches
        assert!(!detector.is_duplicate("u1", "beli kopi", window).await);
    }

    #[tokio::test]
    async fn users_are_independent() {
        let detector = new_detector();
        let window = Duration::from_secs(10);

        assert!(!detector.is_duplicate("u1", "hello", window).await);
        assert!(!detector.is_duplicate("u2", "hello", window).await);
    }
}
