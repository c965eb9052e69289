//! Outbound alerting seam.
//!
//! Threshold breaches are reported through [`Alerter::warn`]. Implementations
//! own rate limiting per `(kind, source)` pair, so callers fire on every
//! breach they observe.

use std::fmt;

use serde::Serialize;
use tracing::warn;

/// Category of a threshold breach.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum AlertKind {
    /// A backend's queue depth reached the warning threshold.
    #[serde(rename = "queue_warning")]
    QueueDepth,
    /// CPU utilization reached the threshold.
    #[serde(rename = "cpu_warning")]
    Cpu,
    /// RAM utilization reached the threshold.
    #[serde(rename = "ram_warning")]
    Ram,
    /// VRAM utilization reached the threshold.
    #[serde(rename = "vram_warning")]
    Vram,
    /// GPU temperature reached the threshold.
    #[serde(rename = "gpu_temperature_warning")]
    GpuTemperature,
}

impl AlertKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::QueueDepth => "queue_warning",
            Self::Cpu => "cpu_warning",
            Self::Ram => "ram_warning",
            Self::Vram => "vram_warning",
            Self::GpuTemperature => "gpu_temperature_warning",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for threshold alerts. Must not block the caller.
pub trait Alerter: Send + Sync {
    /// Report a breach of `kind` observed on `source` (usually a node address).
    fn warn(&self, kind: AlertKind, source: &str, message: &str);
}

/// Alerter that only writes a log line.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogAlerter;

impl Alerter for LogAlerter {
    fn warn(&self, kind: AlertKind, source: &str, message: &str) {
        warn!(kind = %kind, source, message, "threshold alert");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_serde() {
        for kind in [
            AlertKind::QueueDepth,
            AlertKind::Cpu,
            AlertKind::Ram,
            AlertKind::Vram,
            AlertKind::GpuTemperature,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }
    }

    #[test]
    fn log_alerter_is_object_safe() {
        let alerter: Box<dyn Alerter> = Box::new(LogAlerter);
        alerter.warn(AlertKind::Cpu, "http://a:8188", "cpu at 91%");
    }
}
