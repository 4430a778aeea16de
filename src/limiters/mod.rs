pub mod quota;
pub mod sliding_window;

pub use quota::{AdmissionDecision, DenyReason, QuotaResolver};
pub use sliding_window::{RateLimitKey, Scope, SlidingWindowLimiter, WindowDecision};
