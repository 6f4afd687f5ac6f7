//! Request size limits.
//!
//! # Responsibilities
//! - Enforce maximum request body size
//! - Reject early on an oversized Content-Length
//!
//! # Design Decisions
//! - Limits checked before the body is buffered (early rejection)
//! - Return 413 Payload Too Large

use axum::body::Body;
use axum::http::header::CONTENT_LENGTH;
use axum::http::HeaderMap;
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};

use crate::error::GatewayError;

/// Buffer a request body, failing with `PayloadTooLarge` past `limit` bytes.
pub async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> Result<Bytes, GatewayError> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(GatewayError::PayloadTooLarge { limit });
    }

    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(GatewayError::PayloadTooLarge { limit })
        }
        Err(e) => Err(GatewayError::InvalidRequestBody {
            message: format!("failed to read request body: {}", e),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn test_within_limit() {
        let bytes = read_body(&HeaderMap::new(), Body::from("hello"), 16).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn test_streamed_body_over_limit() {
        let err = read_body(&HeaderMap::new(), Body::from(vec![0u8; 32]), 16)
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::PayloadTooLarge { limit: 16 });
    }

    #[tokio::test]
    async fn test_declared_length_over_limit() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1000"));
        let err = read_body(&headers, Body::empty(), 16).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::PAYLOAD_TOO_LARGE);
    }
}
