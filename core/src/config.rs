use serde::Deserialize;
use std::time::Duration;

use crate::HubError;

/// Tuning knobs for a [`crate::Hub`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Number of fan-out workers.
    pub workers: usize,
    /// Capacity of the shared broadcast submission queue.
    pub queue_capacity: usize,
    /// Capacity of each connection's outbound queue.
    pub client_buffer: usize,
    /// Capacity of the eviction request queue.
    pub eviction_capacity: usize,
    /// How long a producer may wait on a full submission queue.
    pub submit_timeout_ms: u64,
    /// Upper bound for a single write to a client transport.
    pub write_timeout_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_capacity: 2048,
            client_buffer: 256,
            eviction_capacity: 1024,
            submit_timeout_ms: 1000,
            write_timeout_ms: 15_000,
        }
    }
}

impl HubConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Reject settings that would make channels or the pool unusable.
    pub fn validate(&self) -> Result<(), HubError> {
        let fields = [
            ("workers", self.workers as u64),
            ("queue_capacity", self.queue_capacity as u64),
            ("client_buffer", self.client_buffer as u64),
            ("eviction_capacity", self.eviction_capacity as u64),
            ("submit_timeout_ms", self.submit_timeout_ms),
            ("write_timeout_ms", self.write_timeout_ms),
        ];
        match fields.iter().find(|(_, v)| *v == 0) {
            Some((name, _)) => Err(HubError::InvalidConfig(name)),
            None => Ok(()),
        }
    }
}
