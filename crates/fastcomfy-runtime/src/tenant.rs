//! Tenant runtime: one job template served by a pool of backend nodes.
//!
//! A runtime owns one [`NodeEventConsumer`] per configured node, all feeding a
//! shared [`CompletionRegistry`]. `generate` resolves the template, picks the
//! least-loaded live node, submits, and waits for the completion event routed
//! back through that registry.
//!
//! Startup is all or nothing: if any node fails to connect, every consumer
//! opened so far is stopped again and the runtime reports `exception`.

use std::fmt;
use std::sync::Arc;

use fastcomfy_backend::{
    BackendError, BackendNode, CompletionRegistry, NodeEventConsumer, SessionState, WaitError,
};
use fastcomfy_core::{DispatchError, JobDefinition, PromptId, TenantToken, resolve};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::balancer::NodeSelector;
use crate::context::RuntimeContext;

/// Lifecycle status of a tenant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    /// Not started, or stopped.
    Offline,
    /// Every node session is open.
    Online,
    /// Startup failed, or a node session failed permanently.
    Exception,
}

impl TenantStatus {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Online => "online",
            Self::Exception => "exception",
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a tenant, as listed to operators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TenantSnapshot {
    /// Tenant identity.
    pub token: TenantToken,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Lifecycle status.
    pub status: TenantStatus,
    /// Human-readable detail for the status.
    #[serde(rename = "msg")]
    pub message: String,
    /// Number of configured backend nodes.
    pub nodes: usize,
}

/// A finished generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Generation {
    /// Correlation id assigned by the backend.
    pub prompt_id: PromptId,
    /// Backend view URLs of every output, in reported order.
    pub outputs: Vec<String>,
}

/// Runtime for one tenant.
pub struct TenantRuntime {
    job: JobDefinition,
    ctx: RuntimeContext,
    selector: NodeSelector,
    completions: Arc<CompletionRegistry>,
    consumers: RwLock<Vec<NodeEventConsumer>>,
    status: RwLock<(TenantStatus, String)>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl TenantRuntime {
    /// Create a stopped runtime.
    pub fn new(job: JobDefinition, ctx: RuntimeContext) -> Self {
        let selector = NodeSelector::new(
            ctx.client.clone(),
            Arc::clone(&ctx.alerter),
            ctx.queue_warning_threshold,
        );
        Self {
            job,
            ctx,
            selector,
            completions: CompletionRegistry::new(),
            consumers: RwLock::new(Vec::new()),
            status: RwLock::new((TenantStatus::Offline, "not started".into())),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Tenant identity.
    pub fn token(&self) -> &TenantToken {
        &self.job.token
    }

    /// The job definition this runtime serves.
    pub fn job(&self) -> &JobDefinition {
        &self.job
    }

    /// Open a consumer for every configured node.
    ///
    /// On the first failure every consumer opened so far is stopped, the
    /// status becomes `exception`, and the error is returned. Starting a
    /// running tenant opens a second set of connections.
    pub async fn start(&self) -> Result<(), BackendError> {
        let _guard = self.lifecycle.lock().await;
        let token = &self.job.token;
        let mut opened = Vec::with_capacity(self.job.nodes.len());

        for address in &self.job.nodes {
            match self.open(address).await {
                Ok(consumer) => opened.push(consumer),
                Err(e) => {
                    for consumer in &opened {
                        consumer.stop().await;
                    }
                    error!(tenant = %token, node = %address, error = %e, "tenant start failed, rolled back");
                    self.set_status(TenantStatus::Exception, format!("node {address} failed: {e}"));
                    return Err(e);
                }
            }
        }

        let count = opened.len();
        self.consumers.write().extend(opened);
        info!(tenant = %token, name = %self.job.name, nodes = count, "tenant online");
        self.set_status(TenantStatus::Online, format!("running on {count} node(s)"));
        Ok(())
    }

    async fn open(&self, address: &str) -> Result<NodeEventConsumer, BackendError> {
        let node = BackendNode::parse(address)?;
        let consumer = NodeEventConsumer::new(
            node,
            self.job.token.clone(),
            self.ctx.session,
            Arc::clone(&self.completions),
            Arc::clone(&self.ctx.alerter),
            self.ctx.thresholds,
        )?;
        consumer.start().await?;
        Ok(consumer)
    }

    /// Stop every consumer and go `offline`. No-op when already stopped.
    pub async fn stop(&self) {
        let _guard = self.lifecycle.lock().await;
        let consumers = std::mem::take(&mut *self.consumers.write());
        if consumers.is_empty() && self.status.read().0 == TenantStatus::Offline {
            return;
        }
        for consumer in &consumers {
            consumer.stop().await;
        }
        info!(tenant = %self.job.token, "tenant offline");
        self.set_status(TenantStatus::Offline, "stopped".into());
    }

    /// Stop, then start.
    pub async fn restart(&self) -> Result<(), BackendError> {
        self.stop().await;
        self.start().await
    }

    /// Current status. A running tenant with a permanently failed node
    /// session reports `exception` naming the node.
    pub fn status(&self) -> (TenantStatus, String) {
        let (status, message) = self.status.read().clone();
        if status != TenantStatus::Online {
            return (status, message);
        }
        let failed: Vec<String> = self
            .consumers
            .read()
            .iter()
            .filter(|c| c.state() == SessionState::Failed)
            .map(|c| c.node().to_string())
            .collect();
        if failed.is_empty() {
            (status, message)
        } else {
            (
                TenantStatus::Exception,
                format!("event stream failed on {}", failed.join(", ")),
            )
        }
    }

    /// Snapshot for listings.
    pub fn snapshot(&self) -> TenantSnapshot {
        let (status, message) = self.status();
        TenantSnapshot {
            token: self.job.token.clone(),
            name: self.job.name.clone(),
            description: self.job.description.clone(),
            status,
            message,
            nodes: self.job.nodes.len(),
        }
    }

    /// Nodes whose event session can still deliver completions.
    pub fn live_nodes(&self) -> Vec<BackendNode> {
        self.consumers
            .read()
            .iter()
            .filter(|c| c.is_live())
            .map(|c| c.node().clone())
            .collect()
    }

    /// Callers currently waiting for a completion.
    pub fn pending_completions(&self) -> usize {
        self.completions.len()
    }

    /// Run one job with `vars` and wait for its outputs.
    pub async fn generate(&self, vars: &Map<String, Value>) -> Result<Generation, DispatchError> {
        let token = &self.job.token;
        let resolved = resolve(&self.job, vars)?;

        let node = self
            .selector
            .select(&self.live_nodes())
            .await
            .ok_or(DispatchError::NoAvailableNode)?;

        let prompt_id = self
            .ctx
            .client
            .submit(&node, &resolved, token)
            .await
            .map_err(|e| {
                warn!(tenant = %token, node = %node, error = %e, "submission failed");
                DispatchError::Submission {
                    node: node.to_string(),
                    prompt_id: e.prompt_id().cloned(),
                    message: e.to_string(),
                }
            })?;

        let waiter = self.completions.register(prompt_id.clone());
        let timeout = self.ctx.completion_timeout;
        match waiter.wait(timeout).await {
            Ok(outputs) => {
                info!(tenant = %token, node = %node, prompt_id = %prompt_id, outputs = outputs.len(), "generation complete");
                Ok(Generation {
                    outputs: outputs.iter().map(|o| node.view_url(o)).collect(),
                    prompt_id,
                })
            }
            Err(WaitError::TimedOut) => {
                warn!(tenant = %token, node = %node, prompt_id = %prompt_id, "completion wait timed out");
                Err(DispatchError::CompletionTimeout { prompt_id, timeout })
            }
            Err(WaitError::Superseded) => Err(DispatchError::Submission {
                node: node.to_string(),
                prompt_id: Some(prompt_id),
                message: "backend reused a correlation id still in flight".into(),
            }),
        }
    }

    fn set_status(&self, status: TenantStatus, message: String) {
        *self.status.write() = (status, message);
    }
}
