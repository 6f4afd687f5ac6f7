//! Failure injection: slow, refusing and unauthenticated backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;

use common::{client, TestGateway};

fn config(base_url: &str, retry: &str, auth: &str) -> String {
    format!(
        r#"
listeners:
  - name: main
    bindAddress: 127.0.0.1:0
    routes:
      - {{ name: slow, pathPrefix: /slow, backends: [slow] }}
backends:
  - name: slow
    protocol: openai
    baseUrl: "{base_url}"
    requestTimeoutMs: 200
    retry: {retry}
    authInjection: {auth}
"#
    )
}

async fn slow_backend() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;
    server
}

async fn post(gateway: &TestGateway) -> (u16, Value) {
    let response = client()
        .post(gateway.url("/slow/v1/chat/completions"))
        .json(&json!({"model": "m", "messages": []}))
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_timeout_without_retry_is_single_attempt() {
    let backend = slow_backend().await;
    let gateway = TestGateway::start(&config(&backend.uri(), "{ enabled: false }", "{ type: none }")).await;

    let (status, body) = post(&gateway).await;

    assert_eq!(status, 504);
    assert_eq!(body["error"]["kind"], "UpstreamTimeout");
    assert_eq!(backend.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_timeout_with_retry_makes_max_attempts() {
    let backend = slow_backend().await;
    let gateway = TestGateway::start(&config(
        &backend.uri(),
        "{ enabled: true, maxAttempts: 3, baseDelayMs: 10, maxDelayMs: 20 }",
        "{ type: none }",
    ))
    .await;

    let (status, body) = post(&gateway).await;

    assert_eq!(status, 504);
    assert_eq!(body["error"]["kind"], "UpstreamTimeout");
    assert_eq!(backend.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_connection_refused_is_502() {
    let gateway = TestGateway::start(&config("http://127.0.0.1:9", "{ enabled: false }", "{ type: none }")).await;

    let (status, body) = post(&gateway).await;

    assert_eq!(status, 502);
    assert_eq!(body["error"]["kind"], "UpstreamConnectionFailed");
}

#[tokio::test]
async fn test_unresolved_credential_is_503_without_dispatch() {
    let backend = slow_backend().await;
    let gateway = TestGateway::start(&config(
        &backend.uri(),
        "{ enabled: false }",
        "{ type: envRef, name: LLM_GATEWAY_TEST_UNSET_KEY }",
    ))
    .await;

    let (status, body) = post(&gateway).await;

    assert_eq!(status, 503);
    assert_eq!(body["error"]["kind"], "AuthResolutionFailed");
    assert!(body["error"]["message"].as_str().unwrap().contains("LLM_GATEWAY_TEST_UNSET_KEY"));
    assert!(backend.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_oversized_body_is_413() {
    let backend = slow_backend().await;
    let yaml = format!(
        "security: {{ maxBodySize: 64 }}\n{}",
        config(&backend.uri(), "{ enabled: false }", "{ type: none }")
    );
    let gateway = TestGateway::start(&yaml).await;

    let response = client()
        .post(gateway.url("/slow/v1/chat/completions"))
        .body("x".repeat(1024))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 413);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "PayloadTooLarge");
    assert!(backend.received_requests().await.unwrap().is_empty());
}

/// Raw backend that accepts connections and closes them before answering.
async fn hang_up_backend() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            drop(socket);
        }
    });
    (format!("http://{}", addr), accepted)
}

#[tokio::test]
async fn test_connection_failures_retry_up_to_max_attempts() {
    let (base, accepted) = hang_up_backend().await;
    let gateway = TestGateway::start(&config(
        &base,
        "{ enabled: true, maxAttempts: 3, baseDelayMs: 10, maxDelayMs: 20 }",
        "{ type: none }",
    ))
    .await;

    let (status, body) = post(&gateway).await;

    assert_eq!(status, 502);
    assert_eq!(body["error"]["kind"], "UpstreamConnectionFailed");
    assert!(body["error"]["message"].as_str().unwrap().contains("3 attempt(s)"));
    assert_eq!(accepted.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unhealthy_backend_still_serves_when_it_is_the_only_choice() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "chatcmpl-1"})))
        .expect(1)
        .mount(&backend)
        .await;
    let gateway = TestGateway::start(&config(&backend.uri(), "{ enabled: false }", "{ type: none }")).await;
    let health = gateway.store.health().entry("slow");
    health.mark_failure(1);
    assert!(!health.is_healthy());

    let response = client()
        .post(gateway.url("/slow/v1/chat/completions"))
        .json(&json!({"model": "m", "messages": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-gateway-fail-open"], "true");
    assert_eq!(response.headers()["x-gateway-backend"], "slow");
}

#[tokio::test]
async fn test_stalled_body_fails_within_request_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n{\"par")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });
    let gateway = TestGateway::start(&config(
        &format!("http://{}", addr),
        "{ enabled: false }",
        "{ type: none }",
    ))
    .await;
    let started = Instant::now();

    let response = client()
        .post(gateway.url("/slow/v1/chat/completions"))
        .json(&json!({"model": "m", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.bytes().await.is_err());
    assert!(started.elapsed() < Duration::from_secs(3));
}
