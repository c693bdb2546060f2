//! REST and peer endpoints served by a single simulated node

use clusterd::common::{HttpStore, KVStore};
use clusterd::metadata::MetadataStore;
use clusterd::transaction::{
    ErrorBody, HttpLockBackend, HttpTransport, LockManager, Transport, TxnCtx,
};
use clusterd::volume::{VolState, Volinfo};
use clusterd::{Config, Error, Node};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Serve a fresh node on an ephemeral port and return its base URL
async fn spawn_node() -> String {
    let router = Node::new(Config::default())
        .simulate_daemons(true)
        .router()
        .unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_health() {
    let base = spawn_node().await;
    let body: Value = Client::new()
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["node_id"], "localhost");
}

#[tokio::test]
async fn test_volume_lifecycle() {
    let base = spawn_node().await;
    let client = Client::new();

    let resp = client
        .post(format!("{}/v1/volumes", base))
        .json(&json!({ "name": "vol1", "bricks": ["localhost:/bricks/b1"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let vol: Volinfo = resp.json().await.unwrap();
    assert_eq!(vol.state, VolState::Created);

    let start = format!("{}/v1/volumes/vol1/start", base);
    let resp = client.post(&start).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let vol: Volinfo = resp.json().await.unwrap();
    assert_eq!(vol.state, VolState::Started);

    let resp = client.post(&start).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = resp.json().await.unwrap();
    assert!(body.error.contains("vol1"));

    let resp = client
        .post(format!("{}/v1/volumes/vol1/options", base))
        .json(&json!({ "options": { "replicate.self-heal-daemon": "on" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client
        .post(format!("{}/v1/volumes/vol1/stop", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let vols: Vec<Volinfo> = client
        .get(format!("{}/v1/volumes", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(vols.len(), 1);
    assert_eq!(vols[0].state, VolState::Stopped);
    assert_eq!(
        vols[0].option("replicate.self-heal-daemon"),
        Some("on")
    );
}

#[tokio::test]
async fn test_unknown_volume_is_404() {
    let base = spawn_node().await;
    let client = Client::new();

    let resp = client
        .get(format!("{}/v1/volumes/missing", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = client
        .post(format!("{}/v1/volumes/missing/stop", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let base = spawn_node().await;
    let client = Client::new();

    let resp = client
        .get(format!("{}/health", base))
        .header("X-Request-ID", "req-42")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-request-id"], "req-42");

    let resp = client.get(format!("{}/health", base)).send().await.unwrap();
    assert!(!resp.headers()["x-request-id"].is_empty());
}

#[tokio::test]
async fn test_peer_step_dispatch() {
    let base = spawn_node().await;
    let transport = HttpTransport::new(
        HashMap::from([("localhost".to_string(), base)]),
        Duration::from_secs(2),
    )
    .unwrap();

    let ctx = TxnCtx::new("req-1");
    let err = transport
        .run_step("localhost", "no.such.step", &ctx)
        .await
        .unwrap_err();
    match err {
        Error::RemoteDispatch { node, reason } => {
            assert_eq!(node, "localhost");
            assert!(reason.contains("no.such.step"), "{}", reason);
        }
        other => panic!("unexpected error: {}", other),
    }

    transport.cleanup("localhost", ctx.id()).await.unwrap();

    // a node without an address cannot be reached
    assert!(matches!(
        transport.run_step("node-9", "no.such.step", &ctx).await,
        Err(Error::RemoteDispatch { .. })
    ));
}

#[tokio::test]
async fn test_lock_table_over_http() {
    let base = spawn_node().await;
    let backend = Arc::new(HttpLockBackend::new(base, Duration::from_secs(2)).unwrap());
    let locks = LockManager::new(backend, Duration::from_millis(200));

    let mut held = locks.lock("vol1").await.unwrap();
    assert!(matches!(
        locks.lock("vol1").await,
        Err(Error::LockTimeout(_))
    ));
    let mut other = locks.lock("vol2").await.unwrap();
    other.release().await;

    held.release().await;
    let mut again = locks.lock("vol1").await.unwrap();
    again.release().await;
}

#[tokio::test]
async fn test_cluster_store_over_http() {
    let base = spawn_node().await;
    let client = Client::new();
    client
        .post(format!("{}/v1/volumes", base))
        .json(&json!({ "name": "vol1", "bricks": ["localhost:/bricks/b1"] }))
        .send()
        .await
        .unwrap();

    let kv = Arc::new(HttpStore::new(base, Duration::from_secs(2)).unwrap());
    let remote = MetadataStore::new(kv.clone()).for_node("node-2");
    assert_eq!(remote.get_volume("vol1").await.unwrap().state, VolState::Created);
    assert!(matches!(
        remote.get_volume("missing").await,
        Err(Error::VolumeNotFound(_))
    ));

    kv.put("scratch/a", b"1".to_vec()).await.unwrap();
    assert_eq!(kv.get("scratch/a").await.unwrap().unwrap(), b"1");
    assert_eq!(kv.list_prefix("scratch/").await.unwrap().len(), 1);
    kv.delete("scratch/a").await.unwrap();
    assert!(kv.get("scratch/a").await.unwrap().is_none());
}
