//! Backend dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Selected backend + outbound body (passthrough bytes or translated JSON)
//!     → static headers, anthropic-version default, credential injection
//!     → attempt loop: deadline → send → passive health observation
//!         connection failure / timeout → backoff → next attempt (if allowed)
//!     → Dispatched { response, attempts, deadline, in-flight guard }
//!     → stream.rs pumps the body to the caller (translated or raw)
//! ```
//!
//! # Design Decisions
//! - Bodies are buffered once so every attempt sends identical bytes
//! - Any HTTP response ends the loop, whatever its status
//! - A buffered body read only gets what is left of its attempt's deadline
//! - The in-flight guard lives as long as the response body

pub mod stream;

use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;

use crate::backend::BackendDescriptor;
use crate::config::schema::{HealthCheckConfig, TimeoutConfig};
use crate::error::GatewayError;
use crate::health::passive::{self, Outcome};
use crate::health::InFlightGuard;
use crate::http::request::X_REQUEST_ID;
use crate::resilience::{AttemptFailure, Deadline};

pub use stream::{pump_body, CHANNEL_CAPACITY};

/// One request bound for a backend.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    /// Native path on the backend, with the caller's query string.
    pub path_and_query: String,
    /// Caller headers, already sanitized.
    pub headers: HeaderMap,
    pub body: Bytes,
    pub request_id: String,
}

/// A backend response whose head has arrived.
#[derive(Debug)]
pub struct Dispatched {
    pub response: reqwest::Response,
    pub attempts: u32,
    /// Deadline of the attempt that produced `response`.
    pub deadline: Deadline,
    pub guard: InFlightGuard,
}

impl Dispatched {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn is_event_stream(&self) -> bool {
        self.response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"))
    }
}

/// Shared upstream HTTP client.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
}

impl Dispatcher {
    pub fn new(timeouts: &TimeoutConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(timeouts.connect_ms))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send `request` to `backend`, retrying connection-level failures per its policy.
    pub async fn dispatch(
        &self,
        backend: &BackendDescriptor,
        request: OutboundRequest,
        health: &HealthCheckConfig,
    ) -> Result<Dispatched, GatewayError> {
        let mut url = backend
            .url_for(&request.path_and_query)
            .map_err(|e| GatewayError::UpstreamProtocolError {
                backend: backend.name.clone(),
                message: format!("invalid upstream URL: {}", e),
            })?;

        let mut headers = request.headers;
        backend.prepare_headers(&mut headers);
        backend.auth.apply(&backend.name, &mut headers, &mut url)?;
        if let Ok(value) = HeaderValue::from_str(&request.request_id) {
            headers.insert(X_REQUEST_ID, value);
        }

        let policy = backend.retry_policy();
        let guard = backend.health.begin_request();
        let mut attempt = 1;

        loop {
            let deadline = Deadline::after(backend.timeout);
            let send = self
                .client
                .request(request.method.clone(), url.clone())
                .headers(headers.clone())
                .body(request.body.clone())
                .send();

            let failure = match deadline.run(send).await {
                Ok(Ok(response)) => {
                    passive::observe(&backend.health, Outcome::Responded(response.status()), health);
                    tracing::debug!(
                        backend = %backend.name,
                        attempt,
                        status = %response.status(),
                        "Upstream responded"
                    );
                    return Ok(Dispatched {
                        response,
                        attempts: attempt,
                        deadline,
                        guard,
                    });
                }
                Ok(Err(e)) => {
                    let failure = AttemptFailure::from_send_error(&e);
                    match failure {
                        AttemptFailure::TimedOut => passive::observe(&backend.health, Outcome::TimedOut, health),
                        AttemptFailure::Connection(_) => {
                            passive::observe(&backend.health, Outcome::ConnectionFailed, health)
                        }
                        AttemptFailure::Rejected(_) => {}
                    }
                    failure
                }
                Err(_) => {
                    passive::observe(&backend.health, Outcome::TimedOut, health);
                    AttemptFailure::TimedOut
                }
            };

            tracing::warn!(
                backend = %backend.name,
                attempt,
                max_attempts = policy.max_attempts(),
                failure = ?failure,
                "Upstream attempt failed"
            );

            if !policy.should_retry(attempt, &failure) {
                return Err(match failure {
                    AttemptFailure::TimedOut => GatewayError::UpstreamTimeout {
                        backend: backend.name.clone(),
                        attempts: attempt,
                        timeout: backend.timeout,
                    },
                    AttemptFailure::Connection(message) => GatewayError::UpstreamConnectionFailed {
                        backend: backend.name.clone(),
                        attempts: attempt,
                        message,
                    },
                    AttemptFailure::Rejected(message) => GatewayError::UpstreamProtocolError {
                        backend: backend.name.clone(),
                        message,
                    },
                });
            }

            let delay = policy.delay_before(attempt + 1);
            tracing::info!(backend = %backend.name, attempt, delay = ?delay, "Retrying upstream request");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Read a complete response body within what is left of the attempt's deadline.
    pub async fn read_body(
        &self,
        backend: &BackendDescriptor,
        dispatched: Dispatched,
    ) -> Result<Bytes, GatewayError> {
        let Dispatched {
            response,
            attempts,
            deadline,
            guard,
        } = dispatched;
        let body = deadline.run(response.bytes()).await;
        drop(guard);

        match body {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(GatewayError::UpstreamConnectionFailed {
                backend: backend.name.clone(),
                attempts,
                message: format!("failed to read response body: {}", e),
            }),
            Err(_) => Err(GatewayError::UpstreamTimeout {
                backend: backend.name.clone(),
                attempts,
                timeout: deadline.budget(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{AuthInjectionConfig, AuthSource, BackendConfig, GatewayConfig, RetryConfig};
    use crate::backend::Dialect;
    use crate::health::{BackendHealth, HealthState};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn descriptor(base_url: &str, retry: Option<RetryConfig>, timeout_ms: u64) -> BackendDescriptor {
        let config = BackendConfig {
            name: "primary".into(),
            protocol: Dialect::OpenAi,
            model: None,
            base_url: base_url.to_string(),
            native_route_table: None,
            auth_injection: AuthInjectionConfig {
                source: AuthSource::StaticKey { value: "sk-upstream".into() },
                ..Default::default()
            },
            request_timeout_ms: Some(timeout_ms),
            retry,
            strict_translation: false,
            health_path: None,
            headers: BTreeMap::new(),
        };
        BackendDescriptor::from_config(&config, &GatewayConfig::default(), None, Arc::new(BackendHealth::new()))
            .unwrap()
    }

    fn outbound(path_and_query: &str) -> OutboundRequest {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer caller-key"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        OutboundRequest {
            method: Method::POST,
            path_and_query: path_and_query.to_string(),
            headers,
            body: Bytes::from_static(b"{\"model\":\"x\"}"),
            request_id: "req-1".into(),
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(&TimeoutConfig::default()).unwrap()
    }

    fn retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            enabled: true,
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_injects_credential_and_request_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(query_param("trace", "1"))
            .and(header("authorization", "Bearer sk-upstream"))
            .and(header("x-request-id", "req-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let backend = descriptor(&server.uri(), None, 1_000);
        let dispatched = dispatcher()
            .dispatch(&backend, outbound("/v1/chat/completions?trace=1"), &HealthCheckConfig::default())
            .await
            .unwrap();
        assert_eq!(dispatched.status(), StatusCode::OK);
        assert_eq!(dispatched.attempts, 1);
        assert_eq!(backend.health.in_flight(), 1);

        let body = dispatcher().read_body(&backend, dispatched).await.unwrap();
        assert_eq!(&body[..], b"ok");
        assert_eq!(backend.health.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_error_status_is_final() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let backend = descriptor(&server.uri(), Some(retry(3)), 1_000);
        let dispatched = dispatcher()
            .dispatch(&backend, outbound("/v1/chat/completions"), &HealthCheckConfig::default())
            .await
            .unwrap();
        assert_eq!(dispatched.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(dispatched.attempts, 1);
    }

    #[tokio::test]
    async fn test_timeout_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let backend = descriptor(&server.uri(), None, 50);
        let err = dispatcher()
            .dispatch(&backend, outbound("/v1/chat/completions"), &HealthCheckConfig::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::UpstreamTimeout {
                backend: "primary".into(),
                attempts: 1,
                timeout: Duration::from_millis(50),
            }
        );
        assert_eq!(backend.health.state(), HealthState::Unhealthy);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_retries_up_to_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let backend = descriptor(&server.uri(), Some(retry(3)), 50);
        let err = dispatcher()
            .dispatch(&backend, outbound("/v1/chat/completions"), &HealthCheckConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(matches!(err, GatewayError::UpstreamTimeout { attempts: 3, .. }));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    /// Raw backend that sends its head after `head_delay`, then a few body
    /// bytes of a longer declared length, then stalls.
    async fn stalled_backend(head_delay: Duration) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await;
            tokio::time::sleep(head_delay).await;
            tokio::io::AsyncWriteExt::write_all(
                &mut socket,
                b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n{\"par",
            )
            .await
            .unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_body_read_shares_the_attempt_deadline() {
        let base = stalled_backend(Duration::from_millis(300)).await;
        let backend = descriptor(&base, None, 500);
        let started = std::time::Instant::now();

        let dispatched = dispatcher()
            .dispatch(&backend, outbound("/v1/chat/completions"), &HealthCheckConfig::default())
            .await
            .unwrap();
        let err = dispatcher().read_body(&backend, dispatched).await.unwrap_err();

        assert_eq!(
            err,
            GatewayError::UpstreamTimeout {
                backend: "primary".into(),
                attempts: 1,
                timeout: Duration::from_millis(500),
            }
        );
        // Head plus body within one budget, not a fresh budget for the body.
        assert!(started.elapsed() < Duration::from_millis(750));
        assert_eq!(backend.health.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Nothing listens on the discard port.
        let backend = descriptor("http://127.0.0.1:9", Some(retry(2)), 1_000);
        let err = dispatcher()
            .dispatch(&backend, outbound("/v1/chat/completions"), &HealthCheckConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::UpstreamConnectionFailed { attempts: 2, .. }
        ));
        assert_eq!(backend.health.in_flight(), 0);
    }
}
