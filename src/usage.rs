//! Per-user usage accounting and load derivation.
//!
//! Invoked after a downstream call completes, never on the admission path.
//! Counters here are advisory: they feed human-facing recommendations and
//! the system load gauge, while enforcement lives entirely in the quota
//! resolver.
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::load_gauge::LoadGauge;
use crate::settings::{
    AdmissionSettings, Operation, Tier, SYSTEM_USAGE_TTL_DAYS, USER_USAGE_TTL_DAYS,
};
use crate::store::StoreHandle;

/// Parsing usage above this share of quota suggests direct commands
pub const HEAVY_USE_PERCENT: f64 = 80.0;
/// Free-tier parsing usage above this share suggests an upgrade
pub const FREE_TIER_UPGRADE_PERCENT: f64 = 50.0;

pub const CHEAPER_COMMANDS_TIP: &str =
    "You are close to your parsing quota. Direct commands like /add and /list are not metered.";
pub const UPGRADE_TIP: &str =
    "You have used over half of the free parsing quota today. A premium tier raises the limit.";

/// One operation's usage for the day
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct OperationUsage {
    pub count: u64,
    pub tokens: u64,
    pub success: u64,
    pub percent_used: f64,
}

/// Advisory summary for one user's day
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct UsageSummary {
    pub day: String,
    pub tier: Tier,
    pub parsing: OperationUsage,
    pub reply: OperationUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

#[derive(Clone, Debug)]
pub struct UsageTracker {
    settings: AdmissionSettings,
    store: StoreHandle,
    gauge: LoadGauge,
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

fn user_key(user_id: &str, day: &str, operation: Operation, field: &str) -> String {
    format!("usage:{}:{}:{}:{}", user_id, day, operation, field)
}

fn user_tier_key(user_id: &str, day: &str) -> String {
    format!("usage:{}:{}:tier", user_id, day)
}

fn system_key(day: &str, operation: Operation) -> String {
    format!("usage:system:{}:{}:tokens", day, operation)
}

impl UsageTracker {
    pub fn new(settings: AdmissionSettings, store: StoreHandle, gauge: LoadGauge) -> Self {
        Self {
            settings,
            store,
            gauge,
        }
    }

    /// Record one completed downstream call and refresh the load gauge from
    /// the system-wide token aggregate.
    pub async fn record_usage(
        &self,
        user_id: &str,
        operation: Operation,
        tokens_used: u64,
        success: bool,
        tier: Tier,
    ) -> Result<()> {
        let day = today();
        let user_ttl = Duration::from_secs(USER_USAGE_TTL_DAYS * 86_400);
        let system_ttl = Duration::from_secs(SYSTEM_USAGE_TTL_DAYS * 86_400);

        self.store
            .incr_counter(&user_key(user_id, &day, operation, "count"), 1, user_ttl)
            .await?;
        self.store
            .incr_counter(
                &user_key(user_id, &day, operation, "tokens"),
                tokens_used,
                user_ttl,
            )
            .await?;
        if success {
            self.store
                .incr_counter(&user_key(user_id, &day, operation, "success"), 1, user_ttl)
                .await?;
        }
        // Remember the tier as last reported so summaries need no tier input
        self.store
            .set_value(&user_tier_key(user_id, &day), &tier.to_string(), user_ttl)
            .await?;

        let mut system_tokens = self
            .store
            .incr_counter(&system_key(&day, operation), tokens_used, system_ttl)
            .await?;
        // The gauge reflects all operations, not just the one recorded here
        let other = match operation {
            Operation::Parsing => Operation::Reply,
            Operation::Reply => Operation::Parsing,
        };
        system_tokens += self
            .store
            .get_counter(&system_key(&day, other))
            .await?
            .unwrap_or(0);

        let load = (system_tokens as f64 / self.settings.daily_token_budget as f64).min(1.0);
        self.gauge.write(load).await?;
        debug!(
            user_id = %user_id,
            operation = %operation,
            tokens_used,
            system_tokens,
            load,
            "Recorded usage"
        );
        Ok(())
    }

    /// Advisory daily summary with quota-share percentages and an optional
    /// recommendation. Never used for enforcement.
    pub async fn summarize(&self, user_id: &str) -> Result<UsageSummary> {
        let day = today();
        let tier = match self.store.get_value(&user_tier_key(user_id, &day)).await? {
            Some(raw) => raw.parse::<Tier>().unwrap_or_else(|_| {
                warn!(user_id = %user_id, raw = %raw, "Unparseable stored tier, assuming free");
                Tier::Free
            }),
            None => Tier::Free,
        };

        let parsing = self.operation_usage(user_id, &day, Operation::Parsing, tier).await?;
        let reply = self.operation_usage(user_id, &day, Operation::Reply, tier).await?;

        let recommendation = if parsing.percent_used > HEAVY_USE_PERCENT {
            Some(CHEAPER_COMMANDS_TIP.to_string())
        } else if tier == Tier::Free && parsing.percent_used > FREE_TIER_UPGRADE_PERCENT {
            Some(UPGRADE_TIP.to_string())
        } else {
            None
        };

        Ok(UsageSummary {
            day,
            tier,
            parsing,
            reply,
            recommendation,
        })
    }

    async fn operation_usage(
        &self,
        user_id: &str,
        day: &str,
        operation: Operation,
        tier: Tier,
    ) -> Result<OperationUsage> {
        let count = self
            .store
            .get_counter(&user_key(user_id, day, operation, "count"))
            .await?
            .unwrap_or(0);
        let tokens = self
            .store
            .get_counter(&user_key(user_id, day, operation, "tokens"))
            .await?
            .unwrap_or(0);
        let success = self
            .store
            .get_counter(&user_key(user_id, day, operation, "success"))
            .await?
            .unwrap_or(0);

        let limit = self.settings.tiers.base_limit(tier, operation);
        let percent_used = if limit > 0 {
            count as f64 / f64::from(limit) * 100.0
        } else {
            0.0
        };
        Ok(OperationUsage {
            count,
            tokens,
            success,
            percent_used,
        })
    }
}
