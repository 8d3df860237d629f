//! Integration tests that run the admin API in-process
//!
//! These tests exercise the API handlers directly using axum-test against a
//! registry of lazily connected channels, plus one live proxied call to check
//! the metrics it leaves behind.

mod e2e;

use axum_test::TestServer;
use grpc_gateway::demo::proto::echo::EchoRequest;
use grpc_gateway::demo::proto::helloworld::HelloRequest;
use grpc_gateway::{
    api::routes::{AppState, create_router},
    metrics,
    registry::{Registry, endpoint},
};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

// Global metrics handle - only initialize once per test process
static METRICS_HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> metrics_exporter_prometheus::PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| metrics::setup_metrics().expect("Failed to setup metrics"))
        .clone()
}

fn lazy_registry(backends: &[(&str, &str)], default: Option<&str>) -> Arc<Registry> {
    let mut builder = Registry::builder();
    for (name, address) in backends {
        let channel = endpoint(name, address)
            .expect("Invalid address")
            .connect_lazy();
        builder
            .register_channel(name, address, channel)
            .expect("Failed to register backend");
    }
    Arc::new(builder.build(default).expect("Failed to build registry"))
}

/// Helper to create a test server with the API
fn create_test_server(registry: Arc<Registry>) -> TestServer {
    let state = AppState {
        registry,
        routing_header: "x-backend-target".to_string(),
        prometheus_handle: get_metrics_handle(),
    };

    let app = create_router(state);
    TestServer::try_new(app).expect("Failed to create test server")
}

fn default_server() -> TestServer {
    create_test_server(lazy_registry(
        &[
            ("greeter", "127.0.0.1:50051"),
            ("calculator", "127.0.0.1:50052"),
        ],
        None,
    ))
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = default_server();

    let response = server.get("/health").await;

    assert_eq!(response.status_code(), 200);

    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["backends"], 2);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_health_degraded_without_backends() {
    let server = create_test_server(lazy_registry(&[], None));

    let response = server.get("/health").await;

    assert_eq!(response.status_code(), 503);

    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["backends"], 0);
}

#[tokio::test]
async fn test_list_backends_in_registration_order() {
    let server = default_server();

    let response = server.get("/backends").await;

    assert_eq!(response.status_code(), 200);

    let body: serde_json::Value = response.json();
    assert_eq!(body["routing_header"], "x-backend-target");

    let backends = body["backends"].as_array().unwrap();
    assert_eq!(backends.len(), 2);
    assert_eq!(backends[0]["name"], "greeter");
    assert_eq!(backends[0]["address"], "127.0.0.1:50051");
    assert_eq!(backends[0]["default"], true);
    assert_eq!(backends[1]["name"], "calculator");
    assert_eq!(backends[1]["default"], false);
}

#[tokio::test]
async fn test_explicit_default_is_reported() {
    let server = create_test_server(lazy_registry(
        &[
            ("greeter", "127.0.0.1:50051"),
            ("calculator", "127.0.0.1:50052"),
        ],
        Some("calculator"),
    ));

    let response = server.get("/backends/calculator").await;

    assert_eq!(response.status_code(), 200);

    let backend: serde_json::Value = response.json();
    assert_eq!(backend["name"], "calculator");
    assert_eq!(backend["default"], true);
}

#[tokio::test]
async fn test_get_nonexistent_backend() {
    let server = default_server();

    let response = server.get("/backends/billing").await;

    assert_eq!(response.status_code(), 404);

    let body: serde_json::Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("billing"));
}

#[tokio::test]
async fn test_metrics_after_proxied_call() {
    let server = default_server();

    let greeter = e2e::common::spawn_greeter().await;
    let proxy =
        e2e::common::spawn_proxy(e2e::common::registry(&[("greeter", &greeter)], None).await)
            .await;

    let mut client = e2e::common::greeter_client(&proxy).await;
    client
        .say_hello(e2e::common::routed(
            HelloRequest {
                name: "metrics".to_string(),
            },
            "greeter",
        ))
        .await
        .expect("SayHello through proxy failed");

    let response = server.get("/metrics").await;

    assert_eq!(response.status_code(), 200);

    let text = response.text();
    assert!(text.contains("grpc_gateway_calls_routed_total"));
    assert!(text.contains("grpc_gateway_messages_forwarded_total"));
}

#[tokio::test]
async fn test_caller_cancel_recorded_as_cancelled() {
    let server = default_server();

    let echo = e2e::common::spawn_echo("echo").await;
    let proxy =
        e2e::common::spawn_proxy(e2e::common::registry(&[("cancel-echo", &echo)], None).await)
            .await;

    let mut client = e2e::common::echo_client(&proxy).await;
    let (tx, rx) = mpsc::channel(1);
    let mut replies = client
        .bidi(e2e::common::routed(ReceiverStream::new(rx), "cancel-echo"))
        .await
        .expect("Bidi through proxy failed")
        .into_inner();

    tx.send(EchoRequest {
        message: "one".to_string(),
        count: 0,
    })
    .await
    .unwrap();
    let reply = replies.message().await.unwrap().unwrap();
    assert_eq!(reply.message, "one");

    // Caller goes away mid-call
    drop(replies);
    drop(tx);
    drop(client);

    let cancelled = |text: &str| {
        text.lines().any(|line| {
            line.starts_with("grpc_gateway_calls_completed_total")
                && line.contains(r#"backend="cancel-echo""#)
                && line.contains(r#"code="Cancelled""#)
        })
    };

    let mut text = String::new();
    for _ in 0..50 {
        text = server.get("/metrics").await.text();
        if cancelled(&text) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert!(cancelled(&text), "No cancelled call recorded:\n{}", text);
}
