use std::fmt;

use crate::store::StoreError;

/// Main error type for the Swiftlet admission layer.
///
/// Quota rejections are *not* errors: they are ordinary decision values
/// returned to the caller. This type covers the exceptional paths only.
#[derive(Debug)]
pub enum GateError {
    /// Configuration errors (bad tier table, zero windows, ...)
    Config(String),

    /// Counter store failures (unavailable, timed out, corrupt entry)
    Store(StoreError),

    /// Invalid caller input (unknown tier/operation/priority)
    Input(String),

    /// Serialization/deserialization errors for stored records
    Serialization(serde_json::Error),
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateError::Config(msg) => write!(f, "Configuration error: {}", msg),
            GateError::Store(err) => write!(f, "Counter store error: {}", err),
            GateError::Input(msg) => write!(f, "Invalid input: {}", msg),
            GateError::Serialization(err) => write!(f, "Serialization error: {}", err),
        }
    }
}

impl std::error::Error for GateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GateError::Store(err) => Some(err),
            GateError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, GateError>;

impl GateError {
    /// Whether this error should trigger the fail-open path: the admission
    /// layer must never block the product because its own store is down.
    pub fn is_fail_open(&self) -> bool {
        matches!(self, GateError::Store(_))
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            GateError::Config(_) => "configuration_error",
            GateError::Store(_) => "store_error",
            GateError::Input(_) => "invalid_input",
            GateError::Serialization(_) => "serialization_error",
        }
    }
}

// Conversions from common error types
impl From<StoreError> for GateError {
    fn from(err: StoreError) -> Self {
        GateError::Store(err)
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        GateError::Serialization(err)
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! gate_config_error {
    ($msg:expr) => {
        $crate::error::GateError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::GateError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! gate_input_error {
    ($msg:expr) => {
        $crate::error::GateError::Input($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::GateError::Input(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let input_err = GateError::Input("Unknown tier: gold".to_string());
        assert_eq!(input_err.to_string(), "Invalid input: Unknown tier: gold");

        let store_err = GateError::Store(StoreError::Unavailable("connection refused".to_string()));
        assert!(store_err.to_string().contains("Counter store error"));
    }

    #[test]
    fn test_fail_open_classification() {
        assert!(GateError::Store(StoreError::Timeout("slow".to_string())).is_fail_open());
        assert!(!GateError::Input("bad".to_string()).is_fail_open());
        assert!(!GateError::Config("bad".to_string()).is_fail_open());
    }

    #[test]
    fn test_macros() {
        let err = gate_config_error!("Window of {} seconds is invalid", 0);
        assert_eq!(
            err.to_string(),
            "Configuration error: Window of 0 seconds is invalid"
        );

        let err = gate_input_error!("Unknown operation: render");
        assert_eq!(err.error_type(), "invalid_input");
    }
}
