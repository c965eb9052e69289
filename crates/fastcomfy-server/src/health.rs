//! `/health` endpoint.

use std::time::Instant;

use fastcomfy_runtime::{TenantSnapshot, TenantStatus};
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered tenants.
    pub tenants: usize,
    /// Tenants currently online.
    pub online: usize,
}

/// Build a health response from a tenant listing.
pub fn health_check(start_time: Instant, tenants: &[TenantSnapshot]) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        tenants: tenants.len(),
        online: tenants
            .iter()
            .filter(|t| t.status == TenantStatus::Online)
            .count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fastcomfy_core::TenantToken;

    fn tenant(status: TenantStatus) -> TenantSnapshot {
        TenantSnapshot {
            token: TenantToken::new("t"),
            name: "n".into(),
            description: String::new(),
            status,
            message: String::new(),
            nodes: 1,
        }
    }

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), &[]);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        assert!(health_check(start, &[]).uptime_secs >= 59);
    }

    #[test]
    fn counts_online_tenants() {
        let tenants = [
            tenant(TenantStatus::Online),
            tenant(TenantStatus::Exception),
            tenant(TenantStatus::Online),
        ];
        let resp = health_check(Instant::now(), &tenants);
        assert_eq!(resp.tenants, 3);
        assert_eq!(resp.online, 2);
    }
}
