//! Bridge configuration

use std::env;

use anyhow::{Context, Result};

/// Tunables for one bridge session, loaded from environment or defaulted
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Per-topic property broadcast buffer; overflow drops the oldest value
    pub broadcast_capacity: usize,
    /// Buffer of the fire-and-forget error broadcast
    pub error_channel_capacity: usize,
    /// Emit `StateMachineSettled` messages on the unsettled-to-settled edge
    pub settle_notifications: bool,
    /// Name given to the render worker thread
    pub worker_thread_name: String,
}

impl BridgeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            broadcast_capacity: env::var("MOTIV_BROADCAST_CAPACITY")
                .unwrap_or_else(|_| "64".to_string())
                .parse()
                .context("MOTIV_BROADCAST_CAPACITY must be a positive integer")?,
            error_channel_capacity: env::var("MOTIV_ERROR_CHANNEL_CAPACITY")
                .unwrap_or_else(|_| "64".to_string())
                .parse()
                .context("MOTIV_ERROR_CHANNEL_CAPACITY must be a positive integer")?,
            settle_notifications: env::var("MOTIV_SETTLE_NOTIFICATIONS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(true),
            worker_thread_name: env::var("MOTIV_WORKER_THREAD_NAME")
                .unwrap_or_else(|_| "motiv-render-worker".to_string()),
        })
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 64,
            error_channel_capacity: 64,
            settle_notifications: true,
            worker_thread_name: "motiv-render-worker".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = BridgeConfig::default();
        assert!(config.broadcast_capacity > 0);
        assert!(config.settle_notifications);
    }
}
