//! The server over a real socket, including graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use fastcomfy_runtime::{RuntimeContext, TenantRegistry, TenantStatus};
use fastcomfy_server::GatewayServer;
use serde_json::{Value, json};
use tokio::net::TcpListener;

#[tokio::test]
async fn serves_until_shutdown_fires() {
    let dir = tempfile::tempdir().unwrap();
    let job = json!({"name": "demo", "token": "tok", "comfyui_nodes": [], "prompt": {}});
    std::fs::write(dir.path().join("demo.json"), job.to_string()).unwrap();
    let registry = Arc::new(TenantRegistry::new(dir.path(), RuntimeContext::default()));
    let _ = registry.load().await.unwrap();

    let server = Arc::new(GatewayServer::new(Arc::clone(&registry)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve(listener).await.unwrap() })
    };

    let client = reqwest::Client::new();
    let list: Value = client
        .get(format!("http://{addr}/api/list"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["code"], 0);
    assert_eq!(list["data"][0]["token"], "tok");

    let resp = client
        .post(format!("http://{addr}/api/generate_sync"))
        .json(&json!({"token": "tok", "vars": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 503);

    let report = server
        .shutdown()
        .drain(vec![serving], Some(Duration::from_secs(5)))
        .await;
    assert!(report.http_drained);
    assert_eq!(report.tenants_stopped, 1);
    assert_eq!(registry.list_status()[0].status, TenantStatus::Offline);
}
