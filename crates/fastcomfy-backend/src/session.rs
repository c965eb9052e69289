//! Persistent event-stream session to one backend node.
//!
//! State machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Reconnecting(1..=max) -> Failed
//!                                   ^               |
//!                                   +---------------+ (reconnect succeeded)
//! ```
//!
//! [`EventSession::start`] makes the first connection attempt inline and fails
//! if it does not succeed. Later losses are retried with a fixed delay up to
//! the retry budget; exhausting it fails the session for good. An explicit
//! `stop` + `start` re-enters the machine fresh.
//!
//! The reader never blocks on its consumer: events go through a bounded queue
//! with `try_send`, and an event that does not fit is dropped and logged.

use std::sync::Arc;
use std::time::Duration;

use fastcomfy_core::TenantToken;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::errors::BackendError;
use crate::events::{BackendEvent, decode_frame};
use crate::node::BackendNode;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Not started, or stopped.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Stream open.
    Connected,
    /// Waiting for, or performing, reconnect attempt `n`.
    Reconnecting(u32),
    /// Retry budget exhausted. Needs an explicit restart.
    Failed,
}

/// Reconnect budget and delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts after a connection loss before giving up.
    pub max_retries: u32,
    /// Fixed delay before each attempt.
    pub interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            interval: Duration::from_secs(5),
        }
    }
}

/// Session tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Reconnect behavior.
    pub reconnect: ReconnectPolicy,
    /// Capacity of the reader-to-consumer queue.
    pub queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            queue_capacity: 1000,
        }
    }
}

struct Running {
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

/// One persistent event stream to `node`, identified by `token`.
pub struct EventSession {
    node: BackendNode,
    url: Url,
    config: SessionConfig,
    state: Arc<RwLock<SessionState>>,
    running: Mutex<Option<Running>>,
}

impl EventSession {
    /// Create a stopped session.
    pub fn new(
        node: BackendNode,
        token: &TenantToken,
        config: SessionConfig,
    ) -> Result<Self, BackendError> {
        let url = node.event_url(token)?;
        Ok(Self {
            node,
            url,
            config,
            state: Arc::new(RwLock::new(SessionState::Disconnected)),
            running: Mutex::new(None),
        })
    }

    /// Node this session streams from.
    pub fn node(&self) -> &BackendNode {
        &self.node
    }

    /// Current connection state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Open the stream and start the reader.
    ///
    /// Returns the event sequence. It ends when the session is stopped or
    /// permanently fails. Calling `start` on a running session stops the
    /// previous reader first.
    pub async fn start(&self) -> Result<ReceiverStream<BackendEvent>, BackendError> {
        self.stop().await;
        *self.state.write() = SessionState::Connecting;

        let ws = match connect(&self.url).await {
            Ok(ws) => ws,
            Err(e) => {
                *self.state.write() = SessionState::Failed;
                return Err(e);
            }
        };
        *self.state.write() = SessionState::Connected;
        info!(node = %self.node, "event stream connected");

        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let cancel = CancellationToken::new();
        let reader = ReadLoop {
            node: self.node.clone(),
            url: self.url.clone(),
            policy: self.config.reconnect,
            state: Arc::clone(&self.state),
            tx,
            cancel: cancel.clone(),
        };
        reader.emit(BackendEvent::Connected);
        let reader = tokio::spawn(reader.run(ws));

        *self.running.lock() = Some(Running { cancel, reader });
        Ok(ReceiverStream::new(rx))
    }

    /// Close the stream and wait for the reader to exit. No-op when stopped.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(Running { cancel, reader }) = running else {
            return;
        };
        cancel.cancel();
        if let Err(e) = reader.await {
            warn!(node = %self.node, error = %e, "event reader task panicked");
        }
        *self.state.write() = SessionState::Disconnected;
        debug!(node = %self.node, "event stream stopped");
    }
}

async fn connect(url: &Url) -> Result<WsStream, BackendError> {
    let attempt = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await;
    match attempt {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(BackendError::Connect {
            url: url.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Err(BackendError::Connect {
            url: url.to_string(),
            message: format!("no answer within {}s", CONNECT_TIMEOUT.as_secs()),
        }),
    }
}

// ─── Reader ─────────────────────────────────────────────────────────────────

struct ReadLoop {
    node: BackendNode,
    url: Url,
    policy: ReconnectPolicy,
    state: Arc<RwLock<SessionState>>,
    tx: mpsc::Sender<BackendEvent>,
    cancel: CancellationToken,
}

/// How a read pass ended.
enum ReadEnd {
    Cancelled,
    Lost(String),
}

impl ReadLoop {
    async fn run(self, mut ws: WsStream) {
        loop {
            let error = match self.read(&mut ws).await {
                ReadEnd::Cancelled => {
                    let _ = ws.close(None).await;
                    return;
                }
                ReadEnd::Lost(error) => error,
            };
            match self.reconnect(error).await {
                Some(next) => ws = next,
                None => return,
            }
        }
    }

    async fn read(&self, ws: &mut WsStream) -> ReadEnd {
        loop {
            let frame = tokio::select! {
                () = self.cancel.cancelled() => return ReadEnd::Cancelled,
                frame = ws.next() => frame,
            };
            match frame {
                Some(Ok(Message::Text(text))) => {
                    let event = decode_frame(&text);
                    if let BackendEvent::ParseError { message } = &event {
                        debug!(node = %self.node, error = %message, "dropping undecodable frame");
                    }
                    self.emit(event);
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map_or_else(
                        || "closed by peer".to_owned(),
                        |f| format!("closed by peer: {} {}", f.code, f.reason.as_str()),
                    );
                    self.emit(BackendEvent::ReadError {
                        message: reason.clone(),
                    });
                    return ReadEnd::Lost(reason);
                }
                // previews and keepalives
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let message = e.to_string();
                    self.emit(BackendEvent::ReadError {
                        message: message.clone(),
                    });
                    return ReadEnd::Lost(message);
                }
                None => {
                    let message = "stream ended".to_owned();
                    self.emit(BackendEvent::ReadError {
                        message: message.clone(),
                    });
                    return ReadEnd::Lost(message);
                }
            }
        }
    }

    /// Retry until connected, cancelled, or out of budget.
    async fn reconnect(&self, mut error: String) -> Option<WsStream> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if attempt > self.policy.max_retries {
                warn!(node = %self.node, error = %error, "event stream retry budget exhausted");
                *self.state.write() = SessionState::Failed;
                self.emit(BackendEvent::ReconnectFailed { error });
                return None;
            }

            *self.state.write() = SessionState::Reconnecting(attempt);
            warn!(
                node = %self.node,
                attempt,
                delay_ms = u64::try_from(self.policy.interval.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "event stream lost, reconnecting"
            );
            self.emit(BackendEvent::ReconnectAttempt {
                attempt,
                error: error.clone(),
            });

            tokio::select! {
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(self.policy.interval) => {}
            }

            let result = tokio::select! {
                () = self.cancel.cancelled() => return None,
                result = connect(&self.url) => result,
            };
            match result {
                Ok(ws) => {
                    *self.state.write() = SessionState::Connected;
                    info!(node = %self.node, attempt, "event stream reconnected");
                    self.emit(BackendEvent::Connected);
                    return Some(ws);
                }
                Err(e) => {
                    error = e.to_string();
                    self.emit(BackendEvent::ConnectionError {
                        message: error.clone(),
                    });
                }
            }
        }
    }

    fn emit(&self, event: BackendEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(node = %self.node, kind = event.kind(), "event queue full, dropping event");
            }
            // consumer gone; the reader notices cancellation separately
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
