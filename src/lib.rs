//! Swiftlet: admission control and burst shaping in front of an expensive,
//! externally metered LLM parse step.
//!
//! Every inbound chat message passes through duplicate suppression, per-user
//! debouncing and tiered, load-adaptive quota checks before it may reach the
//! downstream parse call. Cross-request state lives behind the
//! [`store::CounterStore`] seam; [`store::MemoryStore`] backs single-process
//! deployments and tests. The layer fails open on store trouble: throttling
//! outages never block the product.
pub mod debounce;
pub mod duplicate;
pub mod error;
pub mod gate;
pub mod limiters;
pub mod load_gauge;
pub mod settings;
pub mod store;
pub mod usage;

pub use error::{GateError, Result};
pub use gate::{AdmissionGate, MessageOutcome};
pub use limiters::{AdmissionDecision, DenyReason, RateLimitKey, Scope, SlidingWindowLimiter};
pub use load_gauge::LoadGauge;
pub use settings::{AdmissionSettings, Operation, Priority, Tier};
pub use store::{CounterStore, MemoryStore, StoreError, StoreHandle};
pub use usage::{UsageSummary, UsageTracker};
