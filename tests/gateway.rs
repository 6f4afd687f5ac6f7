//! End-to-end routing, injection and translation through a bound listener.

use serde_json::{json, Value};
use wiremock::matchers::{body_json, body_string, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use llm_gateway::config::{ConfigError, ReloadOutcome};

mod common;

use common::{client, start_sse_backend, TestGateway};

fn openai_config(base_url: &str) -> String {
    format!(
        r#"
listeners:
  - name: main
    bindAddress: 127.0.0.1:0
    routes:
      - name: openai
        pathPrefix: /openai
        backends: [openai-primary]
backends:
  - name: openai-primary
    protocol: openai
    model: gpt-4o-mini
    baseUrl: "{base_url}"
    authInjection: {{ type: staticKey, value: sk-gateway }}
"#
    )
}

fn anthropic_config(base_url: &str) -> String {
    format!(
        r#"
listeners:
  - name: main
    bindAddress: 127.0.0.1:0
    routes:
      - name: anthropic
        pathPrefix: /anthropic
        backends: [claude]
backends:
  - name: claude
    protocol: anthropic
    model: claude-3-5-sonnet
    baseUrl: "{base_url}"
    authInjection: {{ type: staticKey, value: sk-ant }}
"#
    )
}

/// OpenAI route with the given policies and backend auth injection.
fn policy_config(base_url: &str, policies: &str, auth: &str) -> String {
    format!(
        r#"
listeners:
  - name: main
    bindAddress: 127.0.0.1:0
    routes:
      - name: openai
        pathPrefix: /openai
        backends: [openai-primary]
        policies: {policies}
backends:
  - name: openai-primary
    protocol: openai
    baseUrl: "{base_url}"
    authInjection: {auth}
"#
    )
}

async fn models_backend() -> MockServer {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&backend)
        .await;
    backend
}

#[tokio::test]
async fn test_openai_route_injects_key() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-gateway"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": []
        })))
        .expect(1)
        .mount(&backend)
        .await;

    let gateway = TestGateway::start(&openai_config(&backend.uri())).await;
    let response = client()
        .post(gateway.url("/openai/v1/chat/completions"))
        .header("authorization", "Bearer caller-secret")
        .json(&json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.headers()["x-gateway-backend"], "openai-primary");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], "chatcmpl-1");

    let received = backend.received_requests().await.unwrap();
    let auth: Vec<_> = received[0].headers.get_all("authorization").iter().collect();
    assert_eq!(auth.len(), 1, "caller credential must not be forwarded");
}

#[tokio::test]
async fn test_unmatched_path_is_404_envelope() {
    let backend = MockServer::start().await;
    let gateway = TestGateway::start(&openai_config(&backend.uri())).await;

    let response = client().get(gateway.url("/openaiX/v1/models")).send().await.unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "NoRouteMatch");
    assert!(backend.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_anthropic_passthrough_is_byte_identical() {
    let backend = MockServer::start().await;
    let request_body = "{ \"model\":\"claude-3-haiku\",  \"max_tokens\": 5,\n \"messages\":[] }";
    let response_body = "{\"id\":\"msg_1\",  \"type\":\"message\" }";
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_string(request_body))
        .and(header("x-api-key", "sk-ant"))
        .and(header_exists("anthropic-version"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(response_body, "application/json"))
        .expect(1)
        .mount(&backend)
        .await;

    let gateway = TestGateway::start(&anthropic_config(&backend.uri())).await;
    let response = client()
        .post(gateway.url("/anthropic/v1/messages"))
        .header("content-type", "application/json")
        .body(request_body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), response_body);
}

#[tokio::test]
async fn test_completions_translated_to_messages() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_json(json!({
            "model": "claude-3-5-sonnet",
            "system": "Be brief.",
            "messages": [{"role": "user", "content": "Hello"}],
            "max_tokens": 64
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_9",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-5-sonnet",
            "content": [{"type": "text", "text": "Hi there"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 7, "output_tokens": 2}
        })))
        .expect(1)
        .mount(&backend)
        .await;

    let gateway = TestGateway::start(&anthropic_config(&backend.uri())).await;
    let response = client()
        .post(gateway.url("/anthropic/v1/chat/completions"))
        .json(&json!({
            "model": "gpt-4o",
            "max_tokens": 64,
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "Hello"}
            ]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response.headers().get("x-gateway-translation-loss").is_none());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["message"]["content"], "Hi there");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["total_tokens"], 9);
}

#[tokio::test]
async fn test_translated_stream_ends_with_done() {
    let backend = MockServer::start().await;
    let events = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_s\",\"model\":\"claude-3-5-sonnet\",\"usage\":{\"input_tokens\":3}}}\n\n",
        "event: content_block_start\n",
        "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Yo\"}}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":1}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(events, "text/event-stream"))
        .mount(&backend)
        .await;

    let gateway = TestGateway::start(&anthropic_config(&backend.uri())).await;
    let response = client()
        .post(gateway.url("/anthropic/v1/chat/completions"))
        .json(&json!({"model": "m", "stream": true, "messages": [{"role": "user", "content": "hey"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    let text = response.text().await.unwrap();
    assert!(text.contains("\"object\":\"chat.completion.chunk\""));
    assert!(text.contains("\"content\":\"Yo\""));
    assert!(text.trim_end().ends_with("data: [DONE]"));
}

#[tokio::test]
async fn test_mid_stream_drop_appends_error_event() {
    let backend = start_sse_backend(
        vec![
            "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n",
            "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"tial\"}}]}\n\n",
        ],
        false,
    )
    .await;

    let gateway = TestGateway::start(&openai_config(&backend)).await;
    let response = client()
        .post(gateway.url("/openai/v1/chat/completions"))
        .json(&json!({"model": "m", "stream": true, "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let text = response.text().await.unwrap();
    assert!(text.contains("\"content\":\"par\""));
    assert!(text.contains("\"content\":\"tial\""));
    assert!(text.contains("event: error\n"));
    assert!(text.contains("UpstreamConnectionFailed"));
}

#[tokio::test]
async fn test_upstream_error_is_forwarded() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": {"message": "slow down"}})))
        .mount(&backend)
        .await;

    let gateway = TestGateway::start(&openai_config(&backend.uri())).await;
    let response = client()
        .post(gateway.url("/openai/v1/chat/completions"))
        .json(&json!({"model": "m", "messages": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 429);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "slow down");
}

#[tokio::test]
async fn test_rejected_reload_keeps_serving() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&backend)
        .await;

    let gateway = TestGateway::start(&openai_config(&backend.uri())).await;
    let broken = openai_config(&backend.uri()).replace("backends: [openai-primary]", "backends: [openai-missing]");
    gateway.rewrite(&broken);

    let Err(ConfigError::Validation(errors)) = gateway.store.reload().await else {
        panic!("reload referencing a missing backend must be rejected");
    };
    assert!(errors.iter().any(|e| e.to_string().contains("openai-missing")));
    assert_eq!(gateway.store.snapshot().version, 1);

    let response = client().get(gateway.url("/openai/v1/models")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    // Restoring the original document is a no-op.
    gateway.rewrite(&openai_config(&backend.uri()));
    assert_eq!(gateway.store.reload().await.unwrap(), ReloadOutcome::Unchanged(1));
}

#[tokio::test]
async fn test_reload_adds_route() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&backend)
        .await;

    let gateway = TestGateway::start(&openai_config(&backend.uri())).await;
    assert_eq!(
        client().get(gateway.url("/v2/v1/models")).send().await.unwrap().status(),
        404
    );

    let extended = openai_config(&backend.uri()).replace(
        "backends:\n  - name: openai-primary",
        "      - name: second\n        pathPrefix: /v2\n        backends: [openai-primary]\nbackends:\n  - name: openai-primary",
    );
    gateway.rewrite(&extended);
    assert_eq!(gateway.store.reload().await.unwrap(), ReloadOutcome::Applied(2));

    assert_eq!(
        client().get(gateway.url("/v2/v1/models")).send().await.unwrap().status(),
        200
    );
}

#[tokio::test]
async fn test_forwarded_client_auth_reaches_backend() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("authorization", "Bearer caller-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(1)
        .mount(&backend)
        .await;

    let gateway = TestGateway::start(&policy_config(
        &backend.uri(),
        "{}",
        "{ type: staticKey, value: sk-gateway, forwardClientAuth: true }",
    ))
    .await;
    let response = client()
        .get(gateway.url("/openai/v1/models"))
        .header("authorization", "Bearer caller-secret")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let received = backend.received_requests().await.unwrap();
    assert_eq!(received[0].headers.get_all("authorization").iter().count(), 1);
}

#[tokio::test]
async fn test_query_param_credential_reaches_backend() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(query_param("key", "sk-query"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(1)
        .mount(&backend)
        .await;

    let gateway = TestGateway::start(&policy_config(
        &backend.uri(),
        "{}",
        "{ type: staticKey, value: sk-query, queryParam: key }",
    ))
    .await;
    let response = client()
        .get(gateway.url("/openai/v1/models?page=2&key=caller"))
        .header("authorization", "Bearer caller-secret")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let received = backend.received_requests().await.unwrap();
    assert!(!received[0].headers.contains_key("authorization"));
    assert_eq!(received[0].url.query_pairs().filter(|(k, _)| k == "key").count(), 1);
}

#[tokio::test]
async fn test_cors_preflight_is_answered_by_gateway() {
    let backend = models_backend().await;
    let gateway = TestGateway::start(&policy_config(
        &backend.uri(),
        "{ cors: { allowOrigins: [\"https://app.example\"], maxAgeSecs: 120 } }",
        "{ type: none }",
    ))
    .await;

    let response = client()
        .request(reqwest::Method::OPTIONS, gateway.url("/openai/v1/models"))
        .header("origin", "https://app.example")
        .header("access-control-request-method", "GET")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["access-control-allow-origin"], "https://app.example");
    assert_eq!(response.headers()["access-control-max-age"], "120");
    assert!(backend.received_requests().await.unwrap().is_empty());

    let proxied = client()
        .get(gateway.url("/openai/v1/models"))
        .header("origin", "https://app.example")
        .send()
        .await
        .unwrap();
    assert_eq!(proxied.status(), 200);
    assert_eq!(proxied.headers()["access-control-allow-origin"], "https://app.example");
}

#[tokio::test]
async fn test_rate_limited_route_returns_429() {
    let backend = models_backend().await;
    let gateway = TestGateway::start(&policy_config(
        &backend.uri(),
        "{ rateLimit: { requestsPerSecond: 1, burst: 2 } }",
        "{ type: none }",
    ))
    .await;

    for _ in 0..2 {
        let response = client().get(gateway.url("/openai/v1/models")).send().await.unwrap();
        assert_eq!(response.status(), 200);
    }
    let limited = client().get(gateway.url("/openai/v1/models")).send().await.unwrap();
    assert_eq!(limited.status(), 429);
    let body: Value = limited.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "RateLimited");
    assert_eq!(backend.received_requests().await.unwrap().len(), 2);
}
