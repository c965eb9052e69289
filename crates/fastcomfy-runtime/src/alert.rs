//! Webhook alerting.
//!
//! Alerts are posted as chat-bot text messages. Each `(kind, source)` pair is
//! sent at most once per interval; suppressed repeats only reach the log.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use fastcomfy_core::{AlertKind, Alerter, LogAlerter};
use fastcomfy_settings::AlertSettings;
use serde_json::json;
use tracing::{debug, warn};

const TAG: &str = "[fast-comfy-gateway]";

/// Alerter that posts to a webhook, rate-limited per `(kind, source)`.
pub struct WebhookAlerter {
    http: reqwest::Client,
    webhook: String,
    interval: Duration,
    last_sent: DashMap<(AlertKind, String), Instant>,
}

impl WebhookAlerter {
    /// Create an alerter posting to `webhook` at most once per `interval`
    /// for each `(kind, source)` pair.
    pub fn new(webhook: impl Into<String>, interval: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhook: webhook.into(),
            interval,
            last_sent: DashMap::new(),
        }
    }

    /// Record an attempt and report whether it is outside the quiet window.
    fn admit(&self, kind: AlertKind, source: &str) -> bool {
        let now = Instant::now();
        match self.last_sent.entry((kind, source.to_owned())) {
            Entry::Occupied(mut entry) => {
                if now.duration_since(*entry.get()) >= self.interval {
                    let _ = entry.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                let _ = entry.insert(now);
                true
            }
        }
    }
}

impl Alerter for WebhookAlerter {
    fn warn(&self, kind: AlertKind, source: &str, message: &str) {
        if !self.admit(kind, source) {
            debug!(kind = %kind, source, "alert suppressed by rate limit");
            return;
        }
        warn!(kind = %kind, source, message, "threshold alert");

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(kind = %kind, "no async runtime, webhook alert not sent");
            return;
        };
        let body = json!({
            "msg_type": "text",
            "content": {"text": format!("{TAG} {kind} on {source}: {message}")},
        });
        let request = self.http.post(&self.webhook).json(&body);
        let _ = handle.spawn(async move {
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(status = %status, body = %body, "webhook rejected alert");
                }
                Err(e) => warn!(error = %e, "webhook alert failed"),
            }
        });
    }
}

/// Alerter for `settings`: webhook when configured, log-only otherwise.
pub fn alerter_from_settings(settings: &AlertSettings) -> Arc<dyn Alerter> {
    if settings.has_webhook() {
        Arc::new(WebhookAlerter::new(
            settings.webhook.clone(),
            settings.interval(),
        ))
    } else {
        Arc::new(LogAlerter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn repeats_inside_window_are_suppressed() {
        let alerter = WebhookAlerter::new("http://unused", Duration::from_secs(60));
        assert!(alerter.admit(AlertKind::Cpu, "node-a"));
        assert!(!alerter.admit(AlertKind::Cpu, "node-a"));
    }

    #[test]
    fn pairs_are_limited_independently() {
        let alerter = WebhookAlerter::new("http://unused", Duration::from_secs(60));
        assert!(alerter.admit(AlertKind::Cpu, "node-a"));
        assert!(alerter.admit(AlertKind::Cpu, "node-b"));
        assert!(alerter.admit(AlertKind::Ram, "node-a"));
    }

    #[test]
    fn zero_interval_never_suppresses() {
        let alerter = WebhookAlerter::new("http://unused", Duration::ZERO);
        assert!(alerter.admit(AlertKind::Vram, "n"));
        assert!(alerter.admit(AlertKind::Vram, "n"));
    }

    #[test]
    fn settings_without_webhook_log_only() {
        // log-only alerter never panics outside a runtime
        let alerter = alerter_from_settings(&AlertSettings::default());
        alerter.warn(AlertKind::Cpu, "n", "hot");
    }

    #[tokio::test]
    async fn posts_text_message_once_per_window() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let alerter = WebhookAlerter::new(format!("{}/hook", server.uri()), Duration::from_secs(60));
        alerter.warn(AlertKind::GpuTemperature, "http://n:8188", "GPU 0 at 80°C");
        alerter.warn(AlertKind::GpuTemperature, "http://n:8188", "GPU 0 at 81°C");

        let mut received = Vec::new();
        for _ in 0..50 {
            received = server.received_requests().await.unwrap_or_default();
            if !received.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        // give a second, suppressed post the chance to show up
        tokio::time::sleep(Duration::from_millis(100)).await;
        let received_after = server.received_requests().await.unwrap_or_default();
        assert_eq!(received.len(), 1);
        assert_eq!(received_after.len(), 1);

        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body["msg_type"], "text");
        let text = body["content"]["text"].as_str().unwrap();
        assert!(text.starts_with("[fast-comfy-gateway] gpu_temperature_warning on http://n:8188"));
    }
}
