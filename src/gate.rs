//! Admission gate facade.
//!
//! Wires the shaping components around one shared counter store and exposes
//! the boundary the surrounding message-handling path consumes: duplicate
//! check, debounce, quota check, usage reporting. `process_message` runs
//! the full inbound pipeline in order.
use std::sync::Arc;
use std::time::Duration;

use crate::debounce::Debouncer;
use crate::duplicate::DuplicateDetector;
use crate::error::Result;
use crate::limiters::quota::{AdmissionDecision, QuotaResolver};
use crate::limiters::sliding_window::SlidingWindowLimiter;
use crate::load_gauge::LoadGauge;
use crate::settings::{AdmissionSettings, Operation, Priority, Tier};
use crate::store::{CounterStore, StoreHandle};
use crate::usage::{UsageSummary, UsageTracker};

/// Outcome of the full inbound pipeline for one message
#[derive(Clone, Debug, PartialEq)]
pub enum MessageOutcome {
    /// Content-identical repeat inside the duplicate window; drop silently
    Duplicate,
    /// A newer message from the same user superseded this one mid-debounce
    Superseded,
    /// The message survived shaping; here is its quota decision
    Decision(AdmissionDecision),
}

pub struct AdmissionGate {
    settings: AdmissionSettings,
    resolver: QuotaResolver,
    usage: UsageTracker,
    debouncer: Debouncer,
    duplicates: DuplicateDetector,
}

impl AdmissionGate {
    pub fn new(store: Arc<dyn CounterStore>, settings: AdmissionSettings) -> Self {
        let handle = StoreHandle::new(store, settings.store_timeout);
        let gauge = LoadGauge::new(handle.clone(), settings.load_gauge_ttl);
        let limiter = SlidingWindowLimiter::new(handle.clone());
        let resolver = QuotaResolver::new(settings.clone(), limiter, gauge.clone());
        let usage = UsageTracker::new(settings.clone(), handle.clone(), gauge);
        let debouncer = Debouncer::new(handle.clone(), settings.debounce_state_ttl);
        let duplicates = DuplicateDetector::new(handle);
        Self {
            settings,
            resolver,
            usage,
            debouncer,
            duplicates,
        }
    }

    pub fn settings(&self) -> &AdmissionSettings {
        &self.settings
    }

    /// Quota decision for one call, under tier, load and priority scaling
    pub async fn check_admission(
        &self,
        user_id: &str,
        operation: Operation,
        tier: Tier,
        priority: Priority,
    ) -> AdmissionDecision {
        self.resolver
            .check_admission(user_id, operation, tier, priority)
            .await
    }

    /// Duplicate check with the configured window; called synchronously
    /// before admission
    pub async fn check_duplicate(&self, user_id: &str, text: &str) -> bool {
        self.duplicates
            .is_duplicate(user_id, text, self.settings.duplicate_window)
            .await
    }

    /// Debounce with the configured delay; resolves after the delay
    pub async fn debounce(&self, user_id: &str, message_id: &str, text: &str) -> bool {
        self.debounce_with_delay(user_id, message_id, text, self.settings.debounce_delay)
            .await
    }

    pub async fn debounce_with_delay(
        &self,
        user_id: &str,
        message_id: &str,
        text: &str,
        delay: Duration,
    ) -> bool {
        self.debouncer
            .should_process(user_id, message_id, text, delay)
            .await
    }

    /// Report a completed downstream call for analytics and load tracking
    pub async fn report_usage(
        &self,
        user_id: &str,
        operation: Operation,
        tokens_used: u64,
        success: bool,
        tier: Tier,
    ) -> Result<()> {
        self.usage
            .record_usage(user_id, operation, tokens_used, success, tier)
            .await
    }

    /// Advisory usage summary for one user's current day
    pub async fn usage_summary(&self, user_id: &str) -> Result<UsageSummary> {
        self.usage.summarize(user_id).await
    }

    /// Full inbound pipeline: duplicate suppression, then debouncing, then
    /// the quota decision for whichever message survives the burst.
    pub async fn process_message(
        &self,
        user_id: &str,
        message_id: &str,
        text: &str,
        operation: Operation,
        tier: Tier,
        priority: Priority,
    ) -> MessageOutcome {
        if self.check_duplicate(user_id, text).await {
            return MessageOutcome::Duplicate;
        }
        if !self.debounce(user_id, message_id, text).await {
            return MessageOutcome::Superseded;
        }
        let decision = self
            .check_admission(user_id, operation, tier, priority)
            .await;
        MessageOutcome::Decision(decision)
    }
}
