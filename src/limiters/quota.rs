//! Tiered, load-adaptive quota resolution.
//!
//! Composes the effective per-user limit from the tier table, the system
//! load gauge and the call priority, checks the system-wide ceiling first,
//! then delegates to the sliding-window limiter. This is the only component
//! that owns fail-open policy: a store failure at any step admits the call
//! and logs, because throttling-layer outages must never block the product.
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::load_gauge::LoadGauge;
use crate::settings::{
    AdmissionSettings, Operation, Priority, Tier, FAIL_OPEN_REMAINING, LOAD_SHED_FACTOR,
    LOAD_SHED_THRESHOLD, PRIORITY_HIGH_MULTIPLIER, PRIORITY_LOW_MULTIPLIER,
};

use super::sliding_window::{RateLimitKey, SlidingWindowLimiter};

pub const PARSING_QUOTA_HINT: &str =
    "Parsing quota reached for this hour. Direct commands like /add or /list are not metered.";
pub const REPLY_QUOTA_HINT: &str =
    "Reply quota reached for this hour. Please wait a little before sending more messages.";
pub const SYSTEM_BUSY_HINT: &str =
    "The assistant is handling a lot of traffic right now. Please try again in a few minutes.";

/// Why a call was not admitted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The caller's own quota is exhausted
    QuotaExceeded,
    /// The system-wide ceiling is exhausted; the caller personally is fine
    SystemBusy,
}

/// Decision returned for every admission check
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Unix milliseconds when the deciding window resets
    pub reset_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AdmissionDecision {
    fn admitted(remaining: u32, reset_at: i64) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_at,
            reason: None,
            message: None,
        }
    }

    fn quota_exceeded(operation: Operation, reset_at: i64) -> Self {
        let hint = match operation {
            Operation::Parsing => PARSING_QUOTA_HINT,
            Operation::Reply => REPLY_QUOTA_HINT,
        };
        Self {
            allowed: false,
            remaining: 0,
            reset_at,
            reason: Some(DenyReason::QuotaExceeded),
            message: Some(hint.to_string()),
        }
    }

    fn system_busy(reset_at: i64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at,
            reason: Some(DenyReason::SystemBusy),
            message: Some(SYSTEM_BUSY_HINT.to_string()),
        }
    }

    fn fail_open(reset_at: i64) -> Self {
        Self {
            allowed: true,
            remaining: FAIL_OPEN_REMAINING,
            reset_at,
            reason: None,
            message: None,
        }
    }
}

/// Effective limit for one call: tier base, halved under high load, then
/// scaled by priority. Step order is fixed; each step floors to an integer,
/// so the priority multiplier applies to the already-shed limit.
pub fn effective_limit(base: u32, load: f64, priority: Priority) -> u32 {
    let adjusted = if load > LOAD_SHED_THRESHOLD {
        (f64::from(base) * LOAD_SHED_FACTOR).floor() as u32
    } else {
        base
    };
    match priority {
        Priority::High => (f64::from(adjusted) * PRIORITY_HIGH_MULTIPLIER).floor() as u32,
        Priority::Low => (f64::from(adjusted) * PRIORITY_LOW_MULTIPLIER).floor() as u32,
        Priority::Normal => adjusted,
    }
}

#[derive(Clone, Debug)]
pub struct QuotaResolver {
    settings: AdmissionSettings,
    limiter: SlidingWindowLimiter,
    gauge: LoadGauge,
}

impl QuotaResolver {
    pub fn new(settings: AdmissionSettings, limiter: SlidingWindowLimiter, gauge: LoadGauge) -> Self {
        Self {
            settings,
            limiter,
            gauge,
        }
    }

    /// Decide one call. Never returns `Err` for store trouble: that path
    /// fails open with a logged warning.
    pub async fn check_admission(
        &self,
        user_id: &str,
        operation: Operation,
        tier: Tier,
        priority: Priority,
    ) -> AdmissionDecision {
        match self.resolve(user_id, operation, tier, priority).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(
                    user_id = %user_id,
                    operation = %operation,
                    error = %err,
                    "Counter store failure during admission check, failing open"
                );
                let reset_at =
                    Utc::now().timestamp_millis() + self.settings.window.as_millis() as i64;
                AdmissionDecision::fail_open(reset_at)
            }
        }
    }

    async fn resolve(
        &self,
        user_id: &str,
        operation: Operation,
        tier: Tier,
        priority: Priority,
    ) -> Result<AdmissionDecision> {
        let base = self.settings.tiers.base_limit(tier, operation);
        let load = self.gauge.read().await?;
        let limit = effective_limit(base, load, priority);
        debug!(
            user_id = %user_id,
            operation = %operation,
            tier = %tier,
            priority = %priority,
            load,
            limit,
            "Resolved effective limit"
        );

        // System-wide ceiling first; a caller with personal quota to spare
        // still waits when the whole system is saturated.
        let global = self
            .limiter
            .admit(
                &RateLimitKey::global(),
                self.settings.global_limit,
                self.settings.global_window,
            )
            .await?;
        if !global.admitted {
            return Ok(AdmissionDecision::system_busy(global.reset_at));
        }

        let key = RateLimitKey::for_user(operation, user_id);
        let window = self
            .limiter
            .admit(&key, limit, self.settings.window)
            .await?;
        if window.admitted {
            Ok(AdmissionDecision::admitted(window.remaining, window.reset_at))
        } else {
            Ok(AdmissionDecision::quota_exceeded(operation, window.reset_at))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{MemoryStore, StoreHandle};

    fn new_resolver(settings: AdmissionSettings) -> (QuotaResolver, LoadGauge) {
        let store = StoreHandle::new(
            Arc::new(MemoryStore::new()),
            settings.store_timeout,
        );
        let gauge = LoadGauge::new(store.clone(), settings.load_gauge_ttl);
        let limiter = SlidingWindowLimiter::new(store);
        (
            QuotaResolver::new(settings, limiter, gauge.clone()),
            gauge,
        )
    }

    #[test]
    fn effective_limit_composition() {
        // below threshold: base untouched
        assert_eq!(effective_limit(50, 0.0, Priority::Normal), 50);
        assert_eq!(effective_limit(50, 0.8, Priority::Normal), 50);
        // above threshold: halved
        assert_eq!(effective_limit(50, 0.9, Priority::Normal), 25);
        // priority composes after the load adjustment
        assert_eq!(effective_limit(50, 0.9, Priority::High), 30);
        assert_eq!(effective_limit(50, 0.9, Priority::Low), 20);
        // and without load shedding
        assert_eq!(effective_limit(50, 0.3, Priority::High), 60);
        assert_eq!(effective_limit(50, 0.3, Priority::Low), 40);
        // odd bases floor at every step
        assert_eq!(effective_limit(5, 0.9, Priority::Normal), 2);
        assert_eq!(effective_limit(5, 0.9, Priority::High), 2);
    }

    #[tokio::test]
    async fn free_tier_parsing_enforces_base_limit() {
        let (resolver, _gauge) = new_resolver(AdmissionSettings::default());

        for _ in 0..50 {
            let decision = resolver
                .check_admission("u1", Operation::Parsing, Tier::Free, Priority::Normal)
                .await;
            assert!(decision.allowed);
        }
        let decision = resolver
            .check_admission("u1", Operation::Parsing, Tier::Free, Priority::Normal)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::QuotaExceeded));
        assert_eq!(decision.remaining, 0);
        assert!(decision.reset_at > Utc::now().timestamp_millis());
        // parsing rejections point at the unmetered commands
        assert!(decision.message.as_deref().unwrap().contains("/add"));
    }

    #[tokio::test]
    async fn reply_rejections_suggest_waiting() {
        let mut settings = AdmissionSettings::default();
        settings.tiers.free.reply = 2;
        let (resolver, _gauge) = new_resolver(settings);

        for _ in 0..2 {
            resolver
                .check_admission("u1", Operation::Reply, Tier::Free, Priority::Normal)
                .await;
        }
        let decision = resolver
            .check_admission("u1", Operation::Reply, Tier::Free, Priority::Normal)
            .await;
        assert!(!decision.allowed);
        assert!(decision.message.as_deref().unwrap().contains("wait"));
    }

    #[tokio::test]
    async fn high_load_halves_the_limit() {
        let (resolver, gauge) = new_resolver(AdmissionSettings::default());
        gauge.write(0.9).await.unwrap();

        for _ in 0..25 {
            let decision = resolver
                .check_admission("u1", Operation::Parsing, Tier::Free, Priority::Normal)
                .await;
            assert!(decision.allowed);
        }
        // 26th call rejected even though the unshedded limit is 50
        let decision = resolver
            .check_admission("u1", Operation::Parsing, Tier::Free, Priority::Normal)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::QuotaExceeded));
    }

    #[tokio::test]
    async fn priority_scales_the_shed_limit_not_the_base() {
        let (resolver, gauge) = new_resolver(AdmissionSettings::default());
        gauge.write(0.9).await.unwrap();

        // floor(floor(50 * 0.5) * 1.2) = 30
        for _ in 0..30 {
            let decision = resolver
                .check_admission("u1", Operation::Parsing, Tier::Free, Priority::High)
                .await;
            assert!(decision.allowed);
        }
        let decision = resolver
            .check_admission("u1", Operation::Parsing, Tier::Free, Priority::High)
            .await;
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn global_ceiling_short_circuits() {
        let mut settings = AdmissionSettings::default();
        settings.global_limit = 3;
        let (resolver, _gauge) = new_resolver(settings);

        // three different users drain the global window
        for user in ["u1", "u2", "u3"] {
            let decision = resolver
                .check_admission(user, Operation::Parsing, Tier::Enterprise, Priority::Normal)
                .await;
            assert!(decision.allowed);
        }
        // a fourth user with a full personal quota is still refused
        let decision = resolver
            .check_admission("u4", Operation::Parsing, Tier::Enterprise, Priority::Normal)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::SystemBusy));
        assert!(decision.message.as_deref().unwrap().contains("traffic"));
    }

    #[tokio::test]
    async fn decision_serializes_without_empty_fields() {
        let decision = AdmissionDecision::admitted(49, 1_700_000_000_000);
        let json = serde_json::to_string(&decision).unwrap();
        assert!(!json.contains("reason"));
        assert!(!json.contains("message"));

        let denied = AdmissionDecision::quota_exceeded(Operation::Parsing, 1_700_000_000_000);
        let json = serde_json::to_string(&denied).unwrap();
        assert!(json.contains("quota_exceeded"));
    }
}
