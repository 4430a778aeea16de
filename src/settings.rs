//! Swiftlet admission settings
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GateError;
use crate::gate_input_error;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Per-user rate limit window (seconds)
pub const DEFAULT_WINDOW_SECONDS: u64 = 3600;
/// System-wide ceiling across all callers
pub const DEFAULT_GLOBAL_LIMIT: u32 = 5000;
pub const DEFAULT_GLOBAL_WINDOW_SECONDS: u64 = 3600;

/// Above this load reading, base limits are halved
pub const LOAD_SHED_THRESHOLD: f64 = 0.8;
pub const LOAD_SHED_FACTOR: f64 = 0.5;
pub const PRIORITY_HIGH_MULTIPLIER: f64 = 1.2;
pub const PRIORITY_LOW_MULTIPLIER: f64 = 0.8;

pub const DEFAULT_LOAD_GAUGE_TTL_SECONDS: u64 = 300;
pub const DEFAULT_DAILY_TOKEN_BUDGET: u64 = 2_000_000;

pub const DEFAULT_DEBOUNCE_DELAY_MS: u64 = 3000;
pub const DEFAULT_DEBOUNCE_STATE_TTL_MS: u64 = 10_000;
pub const DEFAULT_DUPLICATE_WINDOW_MS: u64 = 10_000;

pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 1000;
/// Remaining-calls placeholder reported when the store is down and we admit anyway
pub const FAIL_OPEN_REMAINING: u32 = 999;

/// Retention for per-user usage counters
pub const USER_USAGE_TTL_DAYS: u64 = 7;
/// Retention for the system-wide usage aggregate
pub const SYSTEM_USAGE_TTL_DAYS: u64 = 30;

/// Quota class a caller belongs to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Premium,
    Enterprise,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Free => write!(f, "free"),
            Tier::Premium => write!(f, "premium"),
            Tier::Enterprise => write!(f, "enterprise"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "premium" => Ok(Tier::Premium),
            "enterprise" => Ok(Tier::Enterprise),
            _ => Err(gate_input_error!("Unknown tier: {}", s)),
        }
    }
}

/// Kind of downstream call being admitted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Parsing,
    Reply,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Parsing => write!(f, "parsing"),
            Operation::Reply => write!(f, "reply"),
        }
    }
}

impl std::str::FromStr for Operation {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "parsing" => Ok(Operation::Parsing),
            "reply" => Ok(Operation::Reply),
            _ => Err(gate_input_error!("Unknown operation: {}", s)),
        }
    }
}

/// Per-call adjustment applied after tier and load scaling
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            _ => Err(gate_input_error!("Unknown priority: {}", s)),
        }
    }
}

/// Base calls-per-window for one tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TierQuota {
    pub parsing: u32,
    pub reply: u32,
}

impl TierQuota {
    pub fn limit_for(&self, operation: Operation) -> u32 {
        match operation {
            Operation::Parsing => self.parsing,
            Operation::Reply => self.reply,
        }
    }
}

/// Base limits per tier, before load and priority adjustments
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TierTable {
    pub free: TierQuota,
    pub premium: TierQuota,
    pub enterprise: TierQuota,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            free: TierQuota {
                parsing: 50,
                reply: 100,
            },
            premium: TierQuota {
                parsing: 200,
                reply: 500,
            },
            enterprise: TierQuota {
                parsing: 1000,
                reply: 2000,
            },
        }
    }
}

impl TierTable {
    pub fn base_limit(&self, tier: Tier, operation: Operation) -> u32 {
        match tier {
            Tier::Free => self.free.limit_for(operation),
            Tier::Premium => self.premium.limit_for(operation),
            Tier::Enterprise => self.enterprise.limit_for(operation),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AdmissionSettings {
    pub tiers: TierTable,

    // Per-user sliding window duration
    pub window: Duration,

    // System-wide ceiling: limit and window
    pub global_limit: u32,
    pub global_window: Duration,

    // Load gauge retention
    pub load_gauge_ttl: Duration,

    // Daily token consumption that maps to load = 1.0
    pub daily_token_budget: u64,

    // Burst shaping
    pub debounce_delay: Duration,
    pub debounce_state_ttl: Duration,
    pub duplicate_window: Duration,

    // Per-call bound on counter store operations
    pub store_timeout: Duration,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            tiers: TierTable::default(),
            window: Duration::from_secs(DEFAULT_WINDOW_SECONDS),
            global_limit: DEFAULT_GLOBAL_LIMIT,
            global_window: Duration::from_secs(DEFAULT_GLOBAL_WINDOW_SECONDS),
            load_gauge_ttl: Duration::from_secs(DEFAULT_LOAD_GAUGE_TTL_SECONDS),
            daily_token_budget: DEFAULT_DAILY_TOKEN_BUDGET,
            debounce_delay: Duration::from_millis(DEFAULT_DEBOUNCE_DELAY_MS),
            debounce_state_ttl: Duration::from_millis(DEFAULT_DEBOUNCE_STATE_TTL_MS),
            duplicate_window: Duration::from_millis(DEFAULT_DUPLICATE_WINDOW_MS),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
        }
    }
}
