//! Gateway shutdown: stop taking requests, let in-flight ones finish, then
//! drain the tenant registry.
//!
//! Order matters. A dispatch that is still waiting for its completion event
//! needs its tenant's event sessions, so tenants are only stopped after the
//! HTTP tasks are done or the drain window has passed.

use std::sync::Arc;
use std::time::Duration;

use fastcomfy_runtime::{TenantRegistry, TenantStatus};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long HTTP tasks get before tenants are stopped regardless.
const DEFAULT_DRAIN_WINDOW: Duration = Duration::from_secs(30);

/// What a drain did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrainReport {
    /// Every HTTP task finished inside the window.
    pub http_drained: bool,
    /// Tenants that were online when the registry drain began.
    pub tenants_stopped: usize,
}

/// Owns the gateway's shutdown sequence.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    registry: Arc<TenantRegistry>,
}

impl ShutdownCoordinator {
    /// Coordinator for `registry`.
    pub fn new(registry: Arc<TenantRegistry>) -> Self {
        Self {
            token: CancellationToken::new(),
            registry,
        }
    }

    /// Cancelled once the server should stop accepting connections.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop accepting connections. Tenants keep running.
    pub fn stop_accepting(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has started.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop accepting, wait up to `window` for `http` tasks, then stop hot
    /// reload and every tenant. The registry is drained even when the window
    /// runs out.
    pub async fn drain(&self, http: Vec<JoinHandle<()>>, window: Option<Duration>) -> DrainReport {
        let window = window.unwrap_or(DEFAULT_DRAIN_WINDOW);
        self.stop_accepting();

        info!(
            tasks = http.len(),
            window_secs = window.as_secs(),
            "waiting for in-flight requests"
        );
        let http_drained = tokio::time::timeout(window, futures::future::join_all(http))
            .await
            .is_ok();
        if !http_drained {
            warn!("in-flight requests still running after {window:?}, stopping tenants anyway");
        }

        let tenants_stopped = self
            .registry
            .list_status()
            .iter()
            .filter(|t| t.status == TenantStatus::Online)
            .count();
        self.registry.shutdown().await;
        info!(http_drained, tenants_stopped, "gateway drained");

        DrainReport {
            http_drained,
            tenants_stopped,
        }
    }
}
