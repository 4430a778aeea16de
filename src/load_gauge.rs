//! System load gauge.
//!
//! One short-lived scalar in `[0.0, 1.0]` shared by every gate instance.
//! Written by the usage tracker from aggregate token consumption, read by
//! the quota resolver on every admission decision. Passed explicitly to the
//! two components that need it; never ambient global state.
use std::time::Duration;

use tracing::warn;

use crate::error::Result;
use crate::store::StoreHandle;

pub const LOAD_GAUGE_KEY: &str = "system:load";

#[derive(Clone, Debug)]
pub struct LoadGauge {
    store: StoreHandle,
    ttl: Duration,
}

impl LoadGauge {
    pub fn new(store: StoreHandle, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Current load reading. An absent or expired gauge reads as 0.0.
    pub async fn read(&self) -> Result<f64> {
        match self.store.get_value(LOAD_GAUGE_KEY).await? {
            Some(raw) => match raw.parse::<f64>() {
                Ok(value) => Ok(value.clamp(0.0, 1.0)),
                Err(_) => {
                    warn!(raw = %raw, "Unparseable load gauge value, reading as 0.0");
                    Ok(0.0)
                }
            },
            None => Ok(0.0),
        }
    }

    /// Overwrite the gauge, clamped to `[0.0, 1.0]`, with its TTL applied
    pub async fn write(&self, load: f64) -> Result<()> {
        let clamped = load.clamp(0.0, 1.0);
        self.store
            .set_value(LOAD_GAUGE_KEY, &format!("{:.4}", clamped), self.ttl)
            .await?;
        Ok(())
    }
}
