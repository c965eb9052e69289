//! Event session behavior against an in-process websocket backend.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use fastcomfy_backend::{
    BackendEvent, BackendNode, EventSession, ReconnectPolicy, SessionConfig, SessionState,
};
use fastcomfy_core::TenantToken;
use futures::StreamExt;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct Backend {
    connections: Arc<AtomicUsize>,
    last_client_id: Arc<parking_lot::Mutex<Option<String>>>,
}

async fn ws_handler(
    State(backend): State<Backend>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    *backend.last_client_id.lock() = params.get("clientId").cloned();
    let n = backend.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| serve(socket, n))
}

/// First connection sends one status frame and hangs up; later ones stay open.
async fn serve(mut socket: WebSocket, n: usize) {
    let status = json!({"type": "status", "data": {"status": {"exec_info": {"queue_remaining": 2}}}});
    let _ = socket.send(Message::Text(status.to_string().into())).await;
    if n == 0 {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    while let Some(Ok(_)) = socket.recv().await {}
}

async fn boot(backend: Backend) -> (SocketAddr, JoinHandle<()>) {
    let app = Router::new().route("/ws", get(ws_handler)).with_state(backend);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}

fn config(max_retries: u32) -> SessionConfig {
    SessionConfig {
        reconnect: ReconnectPolicy {
            max_retries,
            interval: Duration::from_millis(50),
        },
        queue_capacity: 64,
    }
}

#[tokio::test]
async fn reconnects_after_peer_close() {
    let backend = Backend::default();
    let (addr, _server) = boot(backend.clone()).await;
    let node = BackendNode::parse(&format!("http://{addr}")).unwrap();
    let session = EventSession::new(node, &TenantToken::new("tenant-a"), config(3)).unwrap();

    let mut events = session.start().await.unwrap();
    let mut kinds = Vec::new();
    while kinds.len() < 6 {
        let event = timeout(TIMEOUT, events.next()).await.unwrap().unwrap();
        kinds.push(event.kind().to_owned());
    }
    assert_eq!(
        kinds,
        vec![
            "ws_connected",
            "status",
            "ws_read_error",
            "ws_reconnect_attempt",
            "ws_connected",
            "status",
        ]
    );
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(backend.connections.load(Ordering::SeqCst), 2);
    assert_eq!(backend.last_client_id.lock().as_deref(), Some("tenant-a"));

    session.stop().await;
    assert_eq!(session.state(), SessionState::Disconnected);
    // stream ends once the reader exits
    assert!(timeout(TIMEOUT, events.next()).await.unwrap().is_none());
}

#[tokio::test]
async fn exhausted_budget_fails_permanently() {
    // accepts exactly one connection, hangs up, then stops listening
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = ws.close(None).await;
    });

    let node = BackendNode::parse(&format!("http://{addr}")).unwrap();
    let session = EventSession::new(node, &TenantToken::new("t"), config(2)).unwrap();
    let mut events = session.start().await.unwrap();
    server.await.unwrap();

    let mut attempts = 0;
    let mut connection_errors = 0;
    loop {
        let event = timeout(TIMEOUT, events.next()).await.unwrap();
        match event {
            Some(BackendEvent::ReconnectAttempt { attempt, .. }) => attempts = attempt,
            Some(BackendEvent::ConnectionError { .. }) => connection_errors += 1,
            Some(BackendEvent::ReconnectFailed { .. }) => break,
            Some(_) => {}
            None => panic!("stream ended before reconnect-failed"),
        }
    }
    assert_eq!(attempts, 2);
    assert_eq!(connection_errors, 2);
    // reader exits, stream closes, state stays failed
    assert!(timeout(TIMEOUT, events.next()).await.unwrap().is_none());
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn restart_after_stop_connects_again() {
    let backend = Backend::default();
    let (addr, _server) = boot(backend.clone()).await;
    let node = BackendNode::parse(&format!("http://{addr}")).unwrap();
    let session = EventSession::new(node, &TenantToken::new("t"), config(3)).unwrap();

    let _first = session.start().await.unwrap();
    session.stop().await;
    let mut second = session.start().await.unwrap();
    let event = timeout(TIMEOUT, second.next()).await.unwrap().unwrap();
    assert_eq!(event, BackendEvent::Connected);
    session.stop().await;
}

#[tokio::test]
async fn full_queue_drops_events_without_stalling_the_reader() {
    use futures::SinkExt;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (burst_sent_tx, burst_sent) = oneshot::channel();
    let (send_last, send_last_rx) = oneshot::channel::<()>();
    let _server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        for remaining in 0..5 {
            let frame = json!({"type": "status", "data": {"status": {"exec_info": {"queue_remaining": remaining}}}});
            ws.send(WsMessage::Text(frame.to_string().into())).await.unwrap();
        }
        let _ = burst_sent_tx.send(());
        send_last_rx.await.unwrap();
        let last = json!({"type": "progress", "data": {"value": 9, "max": 10}});
        ws.send(WsMessage::Text(last.to_string().into())).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let node = BackendNode::parse(&format!("http://{addr}")).unwrap();
    let mut cfg = config(3);
    cfg.queue_capacity = 1;
    let session = EventSession::new(node, &TenantToken::new("t"), cfg).unwrap();
    let mut events = session.start().await.unwrap();

    // the single slot holds the connected event; the burst has nowhere to go
    timeout(TIMEOUT, burst_sent).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(session.state(), SessionState::Connected);

    let first = timeout(TIMEOUT, events.next()).await.unwrap().unwrap();
    assert_eq!(first.kind(), "ws_connected");

    // the reader kept going and delivers frames once there is room again
    send_last.send(()).unwrap();
    let next = timeout(TIMEOUT, events.next()).await.unwrap().unwrap();
    assert!(matches!(next, BackendEvent::Progress(ref p) if p.value == 9), "got {next:?}");
    assert!(
        timeout(Duration::from_millis(200), events.next()).await.is_err(),
        "burst frames should have been dropped"
    );
    assert_eq!(session.state(), SessionState::Connected);

    session.stop().await;
}
