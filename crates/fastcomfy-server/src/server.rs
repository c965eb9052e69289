//! `GatewayServer`: axum router over a [`TenantRegistry`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use fastcomfy_runtime::TenantRegistry;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::envelope::ApiResponse;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from handlers.
#[derive(Clone)]
pub struct AppState {
    /// Tenant registry.
    pub registry: Arc<TenantRegistry>,
    /// When the server started.
    pub start_time: Instant,
}

/// Body of `POST /api/generate_sync`.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// Tenant token.
    #[serde(default)]
    pub token: String,
    /// Variable values, by variable name.
    #[serde(default)]
    pub vars: Map<String, Value>,
}

/// The gateway's HTTP front end.
pub struct GatewayServer {
    registry: Arc<TenantRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    artifacts: Option<PathBuf>,
    start_time: Instant,
}

impl GatewayServer {
    /// Create a server over `registry`.
    pub fn new(registry: Arc<TenantRegistry>) -> Self {
        Self {
            shutdown: Arc::new(ShutdownCoordinator::new(Arc::clone(&registry))),
            registry,
            artifacts: None,
            start_time: Instant::now(),
        }
    }

    /// Serve files under `root` at `/artifacts`.
    #[must_use]
    pub fn with_artifact_dir(mut self, root: impl Into<PathBuf>) -> Self {
        self.artifacts = Some(root.into());
        self
    }

    /// Shutdown coordinator. [`ShutdownCoordinator::stop_accepting`] ends
    /// [`serve`](Self::serve); [`ShutdownCoordinator::drain`] also stops
    /// every tenant.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Build the router with every route.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: Arc::clone(&self.registry),
            start_time: self.start_time,
        };

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/api/generate_sync", post(generate_handler))
            .route("/api/list", get(list_handler))
            .route("/api/start/{token}", post(start_handler))
            .route("/api/stop/{token}", post(stop_handler))
            .route("/api/reload", post(reload_handler))
            .with_state(state);
        if let Some(root) = &self.artifacts {
            router = router.nest_service("/artifacts", ServeDir::new(root));
        }
        router.layer(TraceLayer::new_for_http())
    }

    /// Serve on `listener` until the shutdown coordinator fires, then let
    /// in-flight requests finish.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let token = self.shutdown.token();
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "gateway listening");
        }
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let tenants = state.registry.list_status();
    Json(health::health_check(state.start_time, &tenants))
}

/// POST /api/generate_sync
async fn generate_handler(
    State(state): State<AppState>,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> ApiResponse {
    let Ok(Json(req)) = body else {
        return ApiResponse::fail(StatusCode::BAD_REQUEST, "invalid_request", "invalid request body");
    };
    if req.token.is_empty() {
        return ApiResponse::fail(StatusCode::BAD_REQUEST, "invalid_request", "missing token");
    }

    match state.registry.dispatch(&req.token, &req.vars).await {
        Ok(generation) => ApiResponse::ok(generation.outputs)
            .with_prompt_id(Some(generation.prompt_id.as_str())),
        Err(e) => {
            warn!(tenant = %req.token, code = e.code(), error = %e, "dispatch failed");
            e.into()
        }
    }
}

/// GET /api/list
async fn list_handler(State(state): State<AppState>) -> ApiResponse {
    ApiResponse::ok(state.registry.list_status())
}

/// POST /api/start/{token}
async fn start_handler(State(state): State<AppState>, Path(token): Path<String>) -> ApiResponse {
    match state.registry.start_tenant(&token).await {
        Ok(()) => ApiResponse::ok(format!("tenant [{token}] started")),
        Err(e) => e.into(),
    }
}

/// POST /api/stop/{token}
async fn stop_handler(State(state): State<AppState>, Path(token): Path<String>) -> ApiResponse {
    match state.registry.stop_tenant(&token).await {
        Ok(()) => ApiResponse::ok(format!("tenant [{token}] stopped")),
        Err(e) => e.into(),
    }
}

/// POST /api/reload
async fn reload_handler(State(state): State<AppState>) -> ApiResponse {
    match state.registry.reload_all().await {
        Ok(count) => ApiResponse::ok(json!({ "tenants": count })),
        Err(e) => e.into(),
    }
}
