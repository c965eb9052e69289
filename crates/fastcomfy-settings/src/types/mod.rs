//! Settings type definitions.
//!
//! Every struct uses `#[serde(rename_all = "camelCase", default)]` so a
//! partial settings file deserializes with the remaining fields defaulted.

mod runtime;
mod storage;

pub use runtime::{AlertSettings, RuntimeSettings};
pub use storage::StorageSettings;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Directory watched for tenant job files.
    pub apis_dir: ApisDir,
    /// Hot reload of the job directory.
    pub hot_reload: HotReloadSettings,
    /// Dispatch and event-session tuning.
    pub runtime: RuntimeSettings,
    /// Threshold alerting.
    pub alerts: AlertSettings,
    /// Artifact persistence.
    pub storage: StorageSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl GatewaySettings {
    /// Reject values that would make the gateway misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.runtime.event_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "runtime.eventQueueCapacity must be at least 1".into(),
            ));
        }
        if self.runtime.completion_timeout_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "runtime.completionTimeoutSecs must be at least 1".into(),
            ));
        }
        if self.hot_reload.enabled && self.hot_reload.interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "hotReload.intervalSecs must be at least 1".into(),
            ));
        }
        if self.storage.enabled && self.storage.public_base_url.is_empty() {
            return Err(SettingsError::InvalidValue(
                "storage.publicBaseUrl is required when storage is enabled".into(),
            ));
        }
        Ok(())
    }
}

/// Job-file directory, serialized as a plain string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApisDir(pub PathBuf);

impl Default for ApisDir {
    fn default() -> Self {
        Self(PathBuf::from("./resource/apis"))
    }
}

impl std::ops::Deref for ApisDir {
    type Target = PathBuf;
    fn deref(&self) -> &PathBuf {
        &self.0
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl ServerSettings {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Hot-reload settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HotReloadSettings {
    /// Whether the job directory is re-scanned periodically.
    pub enabled: bool,
    /// Seconds between scans.
    pub interval_secs: u64,
}

impl Default for HotReloadSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
        }
    }
}

impl HotReloadSettings {
    /// Scan interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_serialize_camel_case() {
        let json = serde_json::to_value(GatewaySettings::default()).unwrap();
        assert_eq!(json["apisDir"], "./resource/apis");
        assert_eq!(json["hotReload"]["intervalSecs"], 5);
        assert_eq!(json["runtime"]["completionTimeoutSecs"], 60);
        assert_eq!(json["alerts"]["queueWarningThreshold"], 5);
    }

    #[test]
    fn defaults_validate() {
        GatewaySettings::default().validate().unwrap();
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let mut settings = GatewaySettings::default();
        settings.runtime.event_queue_capacity = 0;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn enabled_storage_needs_public_url() {
        let mut settings = GatewaySettings::default();
        settings.storage.enabled = true;
        settings.storage.public_base_url = String::new();
        assert!(settings.validate().is_err());
        settings.storage.public_base_url = "http://cdn.local".into();
        settings.validate().unwrap();
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let server = ServerSettings {
            host: "127.0.0.1".into(),
            port: 9000,
        };
        assert_eq!(server.bind_addr(), "127.0.0.1:9000");
    }
}
