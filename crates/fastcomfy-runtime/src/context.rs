//! Collaborators and tuning shared by every tenant runtime.

use std::sync::Arc;
use std::time::Duration;

use fastcomfy_backend::{BackendClient, ClientTimeouts, MonitorThresholds, ReconnectPolicy, SessionConfig};
use fastcomfy_core::{Alerter, LogAlerter};
use fastcomfy_settings::GatewaySettings;

/// Everything a [`TenantRuntime`](crate::TenantRuntime) needs besides its job.
#[derive(Clone)]
pub struct RuntimeContext {
    /// Shared HTTP client for all nodes.
    pub client: BackendClient,
    /// Threshold alert sink.
    pub alerter: Arc<dyn Alerter>,
    /// Event session tuning.
    pub session: SessionConfig,
    /// Resource-monitor thresholds.
    pub thresholds: MonitorThresholds,
    /// Queue depth at or above which a node raises an alert.
    pub queue_warning_threshold: u64,
    /// How long `generate` waits for the completion event.
    pub completion_timeout: Duration,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            client: BackendClient::default(),
            alerter: Arc::new(LogAlerter),
            session: SessionConfig::default(),
            thresholds: MonitorThresholds::default(),
            queue_warning_threshold: 5,
            completion_timeout: Duration::from_secs(60),
        }
    }
}

impl RuntimeContext {
    /// Build the context described by `settings`.
    pub fn from_settings(settings: &GatewaySettings, alerter: Arc<dyn Alerter>) -> Self {
        let runtime = &settings.runtime;
        let alerts = &settings.alerts;
        Self {
            client: BackendClient::new(ClientTimeouts {
                submit: runtime.submit_timeout(),
                queue_query: runtime.queue_query_timeout(),
                ..ClientTimeouts::default()
            }),
            alerter,
            session: SessionConfig {
                reconnect: ReconnectPolicy {
                    max_retries: runtime.max_reconnect_retries,
                    interval: runtime.reconnect_interval(),
                },
                queue_capacity: runtime.event_queue_capacity,
            },
            thresholds: MonitorThresholds {
                cpu_percent: alerts.cpu_percent,
                ram_percent: alerts.ram_percent,
                vram_percent: alerts.vram_percent,
                gpu_temperature: alerts.gpu_temperature,
            },
            queue_warning_threshold: alerts.queue_warning_threshold,
            completion_timeout: runtime.completion_timeout(),
        }
    }
}
