//! Per-node event consumer.
//!
//! Owns one [`EventSession`] and a dispatch task that routes every decoded
//! event to its handler. Completion events resolve waiters in the tenant's
//! [`CompletionRegistry`]; resource samples are checked against alert
//! thresholds; everything else is logged.

use std::sync::Arc;

use fastcomfy_core::{AlertKind, Alerter, TenantToken};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::completion::CompletionRegistry;
use crate::errors::BackendError;
use crate::events::{BackendEvent, ExecutedData, MonitorData};
use crate::node::BackendNode;
use crate::session::{EventSession, SessionConfig, SessionState};

/// Resource-monitor alert thresholds. A sample at or above a value alerts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MonitorThresholds {
    /// CPU utilization, percent.
    pub cpu_percent: f64,
    /// RAM utilization, percent.
    pub ram_percent: f64,
    /// VRAM utilization, percent.
    pub vram_percent: f64,
    /// GPU temperature, degrees Celsius.
    pub gpu_temperature: f64,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            cpu_percent: 70.0,
            ram_percent: 80.0,
            vram_percent: 98.0,
            gpu_temperature: 70.0,
        }
    }
}

impl MonitorThresholds {
    /// Every threshold breached by `sample`, with a message.
    pub fn breaches(&self, sample: &MonitorData) -> Vec<(AlertKind, String)> {
        let mut out = Vec::new();
        if sample.cpu_utilization >= self.cpu_percent {
            out.push((
                AlertKind::Cpu,
                format!("CPU at {:.1}%, threshold {:.1}%", sample.cpu_utilization, self.cpu_percent),
            ));
        }
        if sample.ram_used_percent >= self.ram_percent {
            out.push((
                AlertKind::Ram,
                format!("RAM at {:.1}%, threshold {:.1}%", sample.ram_used_percent, self.ram_percent),
            ));
        }
        for (index, gpu) in sample.gpus.iter().enumerate() {
            if gpu.vram_used_percent >= self.vram_percent {
                out.push((
                    AlertKind::Vram,
                    format!(
                        "GPU {index} VRAM at {:.1}%, threshold {:.1}%",
                        gpu.vram_used_percent, self.vram_percent
                    ),
                ));
            }
            if gpu.gpu_temperature >= self.gpu_temperature {
                out.push((
                    AlertKind::GpuTemperature,
                    format!(
                        "GPU {index} at {:.0}°C, threshold {:.0}°C",
                        gpu.gpu_temperature, self.gpu_temperature
                    ),
                ));
            }
        }
        out
    }
}

/// Everything the dispatch task needs besides the event stream.
struct Handlers {
    node: BackendNode,
    token: TenantToken,
    completions: Arc<CompletionRegistry>,
    alerter: Arc<dyn Alerter>,
    thresholds: MonitorThresholds,
}

/// Event consumer for one (tenant, node) pair.
pub struct NodeEventConsumer {
    session: EventSession,
    handlers: Arc<Handlers>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl NodeEventConsumer {
    /// Create a stopped consumer.
    pub fn new(
        node: BackendNode,
        token: TenantToken,
        config: SessionConfig,
        completions: Arc<CompletionRegistry>,
        alerter: Arc<dyn Alerter>,
        thresholds: MonitorThresholds,
    ) -> Result<Self, BackendError> {
        let session = EventSession::new(node.clone(), &token, config)?;
        Ok(Self {
            session,
            handlers: Arc::new(Handlers {
                node,
                token,
                completions,
                alerter,
                thresholds,
            }),
            dispatcher: Mutex::new(None),
        })
    }

    /// Node this consumer listens to.
    pub fn node(&self) -> &BackendNode {
        &self.handlers.node
    }

    /// Connection state of the underlying session.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Whether the session can still deliver events.
    pub fn is_live(&self) -> bool {
        !matches!(
            self.session.state(),
            SessionState::Failed | SessionState::Disconnected
        )
    }

    /// Open the session and start dispatching.
    pub async fn start(&self) -> Result<(), BackendError> {
        let events = self.session.start().await?;
        let handlers = Arc::clone(&self.handlers);
        let task = tokio::spawn(dispatch(events, handlers));
        if let Some(previous) = self.dispatcher.lock().replace(task) {
            previous.abort();
        }
        info!(node = %self.handlers.node, tenant = %self.handlers.token, "node consumer started");
        Ok(())
    }

    /// Stop the session and wait for the dispatch task to drain.
    pub async fn stop(&self) {
        self.session.stop().await;
        let task = self.dispatcher.lock().take();
        if let Some(task) = task {
            // the event stream ends once the reader is gone
            if let Err(e) = task.await {
                warn!(node = %self.handlers.node, error = %e, "dispatch task panicked");
            }
            info!(node = %self.handlers.node, tenant = %self.handlers.token, "node consumer stopped");
        }
    }
}

async fn dispatch(mut events: ReceiverStream<BackendEvent>, handlers: Arc<Handlers>) {
    while let Some(event) = events.next().await {
        handlers.handle(event);
    }
}

impl Handlers {
    fn handle(&self, event: BackendEvent) {
        let node = &self.node;
        match event {
            BackendEvent::Executed(data) => self.on_executed(data),
            BackendEvent::Monitor(data) => self.on_monitor(&data),
            BackendEvent::Progress(d) => {
                debug!(%node, prompt_id = ?d.prompt_id, step = d.value, of = d.max, "progress");
            }
            BackendEvent::Executing(d) => {
                debug!(%node, prompt_id = ?d.prompt_id, exec_node = ?d.node, "executing");
            }
            BackendEvent::ExecutionCached(d) => {
                debug!(%node, prompt_id = ?d.prompt_id, cached = d.nodes.len(), "execution cached");
            }
            BackendEvent::ExecutionStart(d) => {
                debug!(%node, prompt_id = ?d.prompt_id, "execution start");
            }
            BackendEvent::ExecutionSuccess(d) => {
                debug!(%node, prompt_id = ?d.prompt_id, "execution success");
            }
            BackendEvent::ExecutionError(d) => {
                warn!(
                    %node,
                    prompt_id = ?d.prompt_id,
                    exec_node = ?d.node_id,
                    node_type = ?d.node_type,
                    exception = ?d.exception_type,
                    message = ?d.exception_message,
                    "execution error"
                );
            }
            BackendEvent::ExecutionInterrupted(d) => {
                warn!(%node, prompt_id = ?d.prompt_id, exec_node = ?d.node_id, "execution interrupted");
            }
            BackendEvent::Status(d) => {
                debug!(%node, queue_remaining = d.queue_remaining(), "status");
            }
            BackendEvent::ProgressState(d) => {
                for (id, progress) in &d.nodes {
                    debug!(
                        %node,
                        prompt_id = ?d.prompt_id,
                        exec_node = %id,
                        step = progress.value,
                        of = progress.max,
                        state = %progress.state,
                        "progress state"
                    );
                }
            }
            BackendEvent::Feedback(d) => {
                debug!(%node, exec_node = %d.node_id, widget = %d.widget_name, "node feedback");
            }
            BackendEvent::Connected => info!(%node, tenant = %self.token, "stream connected"),
            BackendEvent::ReconnectAttempt { attempt, error } => {
                warn!(%node, tenant = %self.token, attempt, error = %error, "stream reconnecting");
            }
            BackendEvent::ReconnectFailed { error } => {
                error!(%node, tenant = %self.token, error = %error, "stream failed permanently");
            }
            BackendEvent::ConnectionError { message }
            | BackendEvent::ReadError { message }
            | BackendEvent::ParseError { message } => {
                warn!(%node, tenant = %self.token, error = %message, "stream error");
            }
            BackendEvent::Unrecognized { kind, data } => {
                debug!(%node, kind = %kind, data = %data, "unrecognized event");
            }
        }
    }

    fn on_executed(&self, data: ExecutedData) {
        let outputs = data.output_descriptors();
        info!(
            node = %self.node,
            prompt_id = %data.prompt_id,
            exec_node = ?data.node,
            outputs = outputs.len(),
            "executed"
        );
        if !self.completions.resolve(&data.prompt_id, outputs) {
            debug!(node = %self.node, prompt_id = %data.prompt_id, "no waiter for completion, dropped");
        }
    }

    fn on_monitor(&self, data: &MonitorData) {
        for (kind, message) in self.thresholds.breaches(data) {
            self.alerter.warn(kind, self.node.as_str(), &message);
        }
    }
}
