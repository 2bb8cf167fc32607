//! Router tests over an in-process engine with a scripted transport.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

use fleetbridge_api::server::{create_router, ServerState};
use fleetbridge_core::config::EngineConfig;
use fleetbridge_engine::transport::{CommandTransport, RawInbound, TransportError};
use fleetbridge_engine::Engine;

/// Echo device: acks and completes every command immediately.
struct EchoTransport {
    inbound_tx: mpsc::Sender<RawInbound>,
}

#[async_trait]
impl CommandTransport for EchoTransport {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let device_id = topic.split('/').nth(1).unwrap_or_default();
        let envelope: Value = serde_json::from_slice(payload).unwrap();
        let reply = json!({
            "correlation_id": envelope["correlation_id"],
            "success": true,
            "payload": {"echo": envelope["payload"]}
        });
        let _ = self
            .inbound_tx
            .send(RawInbound::new(
                format!("fleet/{device_id}/evt/result"),
                reply.to_string(),
            ))
            .await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

fn test_state() -> (ServerState, mpsc::Sender<RawInbound>) {
    let (inbound_tx, inbound_rx) = mpsc::channel(64);
    let transport = Arc::new(EchoTransport {
        inbound_tx: inbound_tx.clone(),
    });
    let config = EngineConfig {
        default_timeout_ms: 500,
        min_timeout_ms: 50,
        sweep_interval_ms: 25,
        ..EngineConfig::default()
    };
    let engine = Arc::new(Engine::new(transport, config.clone(), "fleet"));
    engine.start(inbound_rx);
    (ServerState::new(engine, config), inbound_tx)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let (state, _tx) = test_state();
    let response = create_router(state)
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["service"], "fleetbridge");
    assert_eq!(body["data"]["mqtt_connected"], true);
}

#[tokio::test]
async fn test_submit_command_round_trip() {
    let (state, _tx) = test_state();
    let request = Request::post("/api/commands")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"device_id": "r1", "payload": {"op": "dock"}}).to_string(),
        ))
        .unwrap();

    let response = create_router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["payload"]["echo"]["op"], "dock");
}

#[tokio::test]
async fn test_submit_rejects_empty_device() {
    let (state, _tx) = test_state();
    let request = Request::post("/api/commands")
        .header("content-type", "application/json")
        .body(Body::from(json!({"device_id": "", "payload": {}}).to_string()))
        .unwrap();

    let response = create_router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn test_device_state_unknown_then_known() {
    let (state, tx) = test_state();
    let router = create_router(state);

    let response = router
        .clone()
        .oneshot(Request::get("/api/devices/r9/state").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], "device_unknown");

    tx.send(RawInbound::new(
        "fleet/r9/evt/state",
        json!({"timestamp": 100, "state": {"battery": 64}}).to_string(),
    ))
    .await
    .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let response = router
        .oneshot(Request::get("/api/devices/r9/state").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["state"]["battery"], 64);
    assert_eq!(body["data"]["connectivity"], "online");
}

#[tokio::test]
async fn test_command_lookup_and_history() {
    let (state, _tx) = test_state();
    let router = create_router(state);

    let response = router
        .clone()
        .oneshot(
            Request::post("/api/commands")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"device_id": "r1", "payload": {"op": "scan"}}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let submitted = body_json(response).await;
    let id = submitted["data"]["correlation_id"].as_str().unwrap().to_string();

    let response = router
        .clone()
        .oneshot(
            Request::get(format!("/api/commands/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["status"], "completed");

    let response = router
        .oneshot(
            Request::get("/api/commands?device_id=r1&status=completed")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_command_lookup() {
    let (state, _tx) = test_state();
    let response = create_router(state)
        .oneshot(Request::get("/api/commands/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
