//! # fastcomfy-settings
//!
//! Gateway configuration, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`GatewaySettings::default()`]
//! 2. **Settings file**: JSON, camelCase keys, deep-merged over defaults
//! 3. **Environment variables**: `FASTCOMFY_*` overrides
//!
//! Settings are loaded once by the binary and passed down explicitly.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_documented_values() {
        let settings = GatewaySettings::default();
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.runtime.completion_timeout_secs, 60);
        assert_eq!(settings.runtime.max_reconnect_retries, 3);
        assert_eq!(settings.runtime.reconnect_interval_ms, 5_000);
        assert_eq!(settings.runtime.event_queue_capacity, 1_000);
        assert_eq!(settings.alerts.queue_warning_threshold, 5);
        assert!(!settings.alerts.has_webhook());
        assert!(!settings.storage.enabled);
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings_path(), std::path::PathBuf::from("./config.json"));
    }
}
