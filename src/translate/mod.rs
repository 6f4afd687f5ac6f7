//! Protocol translation subsystem.
//!
//! # Data Flow
//! ```text
//! Request path (translated sub-paths only):
//!     caller JSON → {openai,anthropic}::parse_request → RequestEnvelope
//!     → model rewrite → {openai,anthropic}::emit_request (+ dropped fields)
//!
//! Response path:
//!     backend JSON → parse_response → ResponseEnvelope → emit_response
//!     backend SSE  → stream::StreamTranslation (chunk by chunk, in order)
//! ```
//!
//! # Design Decisions
//! - Passthrough bodies never reach this module
//! - Same-dialect "translation" only rewrites `model`; everything else is kept
//! - Dropped fields are reported, or rejected under strict translation

pub mod anthropic;
pub mod envelope;
pub mod openai;
pub mod stream;

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde_json::Value;

use crate::backend::{BackendDescriptor, Dialect};
use crate::error::GatewayError;

pub use envelope::{RequestEnvelope, ResponseEnvelope};
pub use stream::{StreamTranslation, StreamTranslator};

/// A request body ready for the backend.
#[derive(Debug, Clone)]
pub struct TranslatedRequest {
    pub body: Bytes,
    /// Native endpoint on the backend.
    pub path: &'static str,
    pub stream: bool,
    /// Caller fields with no equivalent in the backend dialect.
    pub dropped: Vec<String>,
}

/// Translate a caller body written in `surface` for `backend`.
pub fn translate_request(
    body: &[u8],
    surface: Dialect,
    backend: &BackendDescriptor,
) -> Result<TranslatedRequest, GatewayError> {
    let path = backend
        .dialect
        .chat_path()
        .ok_or_else(|| GatewayError::UpstreamProtocolError {
            backend: backend.name.clone(),
            message: format!("the {} dialect does not accept translated requests", backend.dialect),
        })?;

    let value: Value = serde_json::from_slice(body).map_err(|e| GatewayError::InvalidRequestBody {
        message: format!("body is not valid JSON: {}", e),
    })?;

    if surface == backend.dialect {
        let mut value = value;
        let Some(fields) = value.as_object_mut() else {
            return Err(GatewayError::InvalidRequestBody {
                message: "request body must be a JSON object".to_string(),
            });
        };
        if let Some(model) = &backend.model {
            fields.insert("model".into(), Value::String(model.clone()));
        }
        let stream = fields.get("stream").and_then(Value::as_bool).unwrap_or(false);
        return Ok(TranslatedRequest {
            body: encode(&value)?,
            path,
            stream,
            dropped: Vec::new(),
        });
    }

    let invalid = |message: String| GatewayError::InvalidRequestBody { message };
    let mut envelope = match surface {
        Dialect::OpenAi => openai::parse_request(value).map_err(invalid)?,
        Dialect::Anthropic => anthropic::parse_request(value).map_err(invalid)?,
        Dialect::Mcp => {
            return Err(invalid("MCP bodies cannot be translated".to_string()));
        }
    };
    if let Some(model) = &backend.model {
        envelope.model = Some(model.clone());
    }

    let mut dropped = Vec::new();
    let emitted = match backend.dialect {
        Dialect::Anthropic => anthropic::emit_request(&envelope, &mut dropped),
        _ => openai::emit_request(&envelope, &mut dropped),
    };

    if backend.strict_translation {
        if let Some(field) = dropped.first() {
            return Err(GatewayError::UnsupportedDialectField {
                field: field.clone(),
                backend: backend.name.clone(),
                dialect: backend.dialect.as_str(),
            });
        }
    }

    Ok(TranslatedRequest {
        body: encode(&emitted)?,
        path,
        stream: envelope.stream,
        dropped,
    })
}

/// Translate a complete (non-streaming) backend response back into `surface`.
pub fn translate_response(
    body: &[u8],
    backend: &BackendDescriptor,
    surface: Dialect,
) -> Result<Bytes, GatewayError> {
    if backend.dialect == surface {
        return Ok(Bytes::copy_from_slice(body));
    }

    let protocol_error = |message: String| GatewayError::UpstreamProtocolError {
        backend: backend.name.clone(),
        message,
    };
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| protocol_error(format!("response is not valid JSON: {}", e)))?;

    let response = match backend.dialect {
        Dialect::OpenAi => openai::parse_response(&value),
        Dialect::Anthropic => anthropic::parse_response(&value),
        Dialect::Mcp => Err("MCP responses cannot be translated".to_string()),
    }
    .map_err(protocol_error)?;

    let emitted = match surface {
        Dialect::OpenAi => openai::emit_response(&response, unix_now()),
        _ => anthropic::emit_response(&response),
    };
    encode(&emitted)
}

/// Chunk-by-chunk translator for a streamed response, if the dialects differ.
pub fn stream_translation(backend: Dialect, surface: Dialect) -> Option<StreamTranslation> {
    let translator: Box<dyn StreamTranslator> = match (backend, surface) {
        (Dialect::Anthropic, Dialect::OpenAi) => Box::new(stream::AnthropicToOpenAi::new(unix_now())),
        (Dialect::OpenAi, Dialect::Anthropic) => Box::new(stream::OpenAiToAnthropic::new()),
        _ => return None,
    };
    Some(StreamTranslation::new(translator))
}

fn encode(value: &Value) -> Result<Bytes, GatewayError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| GatewayError::InvalidRequestBody {
            message: format!("failed to encode body: {}", e),
        })
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
