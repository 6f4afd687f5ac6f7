//! Response body pump.
//!
//! A producer task reads the upstream body chunk by chunk, optionally
//! translates it, and forwards it through a bounded channel that backs the
//! caller's response body. Dropping the caller side closes the channel and the
//! task stops reading, which drops the upstream connection.
//!
//! Plain bodies must finish within their attempt's deadline. Event streams may
//! run for as long as the backend keeps talking, but a gap longer than the
//! backend's timeout between chunks ends them.

use axum::body::Body;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::backend::BackendDescriptor;
use crate::config::schema::HealthCheckConfig;
use crate::dispatch::Dispatched;
use crate::error::GatewayError;
use crate::health::passive::{self, Outcome};
use crate::translate::stream::error_event;
use crate::translate::StreamTranslation;

/// Chunks buffered between the upstream reader and the caller.
pub const CHANNEL_CAPACITY: usize = 32;

/// Turn a dispatched response into a streaming body.
///
/// When `sse` is set and the upstream fails or goes quiet mid-body, the output
/// produced so far is kept and a terminal `event: error` frame is appended.
/// Otherwise the caller's body ends with an error.
pub fn pump_body(
    backend: &BackendDescriptor,
    dispatched: Dispatched,
    mut translation: Option<StreamTranslation>,
    sse: bool,
    health: HealthCheckConfig,
) -> Body {
    let (tx, mut rx) = mpsc::channel::<Result<Bytes, GatewayError>>(CHANNEL_CAPACITY);
    let Dispatched {
        response,
        attempts,
        deadline,
        guard,
    } = dispatched;
    let backend_name = backend.name.clone();
    let backend_health = std::sync::Arc::clone(&backend.health);

    tokio::spawn(async move {
        let _guard = guard;
        let mut upstream = response.bytes_stream();
        let mut expires = if sse { deadline.renewed() } else { deadline };

        loop {
            let next = tokio::select! {
                _ = tx.closed() => {
                    tracing::debug!(backend = %backend_name, "Client went away; abandoning upstream stream");
                    return;
                }
                _ = tokio::time::sleep_until(expires.instant()) => {
                    tracing::warn!(
                        backend = %backend_name,
                        timeout = ?deadline.budget(),
                        sse,
                        "Upstream body timed out"
                    );
                    passive::observe(&backend_health, Outcome::TimedOut, &health);
                    let error = GatewayError::UpstreamTimeout {
                        backend: backend_name.clone(),
                        attempts,
                        timeout: deadline.budget(),
                    };
                    let _ = tx.send(terminal(error, sse)).await;
                    return;
                }
                next = upstream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    if sse {
                        expires = deadline.renewed();
                    }
                    let out = match translation.as_mut() {
                        Some(t) => t.push(&chunk),
                        None => chunk,
                    };
                    if !out.is_empty() && tx.send(Ok(out)).await.is_err() {
                        return;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(backend = %backend_name, error = %e, "Upstream stream interrupted");
                    passive::observe(&backend_health, Outcome::ConnectionFailed, &health);
                    let error = GatewayError::UpstreamConnectionFailed {
                        backend: backend_name.clone(),
                        attempts,
                        message: format!("stream interrupted: {}", e),
                    };
                    let _ = tx.send(terminal(error, sse)).await;
                    return;
                }
                None => {
                    if let Some(t) = translation.as_mut() {
                        let tail = t.finish();
                        if !tail.is_empty() {
                            let _ = tx.send(Ok(tail)).await;
                        }
                    }
                    return;
                }
            }
        }
    });

    let stream = futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx));
    Body::from_stream(stream)
}

/// Last item for a failed body: an error frame on event streams, a body error otherwise.
fn terminal(error: GatewayError, sse: bool) -> Result<Bytes, GatewayError> {
    if sse {
        Ok(error_event(&error))
    } else {
        Err(error)
    }
}
