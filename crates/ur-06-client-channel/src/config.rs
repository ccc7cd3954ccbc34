//! # Client Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Payer-side configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// How long to wait for the event confirming a submitted transaction.
    pub event_wait_timeout: Duration,

    /// Delay between two event lookups while waiting.
    pub event_poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            event_wait_timeout: Duration::from_secs(60),
            event_poll_interval: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    /// Create a config for testing (short waits).
    pub fn for_testing() -> Self {
        Self {
            event_wait_timeout: Duration::from_millis(200),
            event_poll_interval: Duration::from_millis(10),
        }
    }
}
