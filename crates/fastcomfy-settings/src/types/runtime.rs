//! Dispatch, event-session and alert threshold settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Dispatch and event-session tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    /// How long `generate` waits for a completion event.
    pub completion_timeout_secs: u64,
    /// Reconnect attempts after a lost event stream before giving up.
    pub max_reconnect_retries: u32,
    /// Fixed delay between reconnect attempts.
    pub reconnect_interval_ms: u64,
    /// Capacity of the queue between a session's reader and its consumer.
    pub event_queue_capacity: usize,
    /// Per-node timeout of the queue-depth query.
    pub queue_query_timeout_ms: u64,
    /// Timeout of a job submission request.
    pub submit_timeout_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            completion_timeout_secs: 60,
            max_reconnect_retries: 3,
            reconnect_interval_ms: 5_000,
            event_queue_capacity: 1_000,
            queue_query_timeout_ms: 5_000,
            submit_timeout_ms: 30_000,
        }
    }
}

impl RuntimeSettings {
    /// Completion wait window.
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }

    /// Delay between reconnect attempts.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Queue-depth query timeout.
    pub fn queue_query_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_query_timeout_ms)
    }

    /// Submission timeout.
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }
}

/// Alert sink and thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertSettings {
    /// Webhook URL. Empty means alerts are only logged.
    pub webhook: String,
    /// Minimum seconds between two alerts of the same kind and source.
    pub interval_secs: u64,
    /// Queue depth at which a node is reported.
    pub queue_warning_threshold: u64,
    /// CPU utilization percentage.
    pub cpu_percent: f64,
    /// RAM utilization percentage.
    pub ram_percent: f64,
    /// VRAM utilization percentage.
    pub vram_percent: f64,
    /// GPU temperature in degrees Celsius.
    pub gpu_temperature: f64,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            webhook: String::new(),
            interval_secs: 10,
            queue_warning_threshold: 5,
            cpu_percent: 70.0,
            ram_percent: 80.0,
            vram_percent: 98.0,
            gpu_temperature: 70.0,
        }
    }
}

impl AlertSettings {
    /// Rate-limit window per `(kind, source)`.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Whether a webhook is configured.
    pub fn has_webhook(&self) -> bool {
        !self.webhook.trim().is_empty()
    }
}
