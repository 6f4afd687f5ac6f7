//! Canonical in-flight request and response forms.
//!
//! Both chat dialects parse into these types and emit from them. Top-level
//! fields a dialect has no canonical slot for are kept verbatim in
//! `extensions` so they can be re-emitted or reported as dropped.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    /// Result of a tool call (OpenAI `tool` role, Anthropic `tool_result` block).
    Tool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    Image(ImageSource),
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ContentPart::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolChoice {
    Auto,
    /// Model must call some tool (OpenAI `required`, Anthropic `any`).
    Required,
    None,
    Tool(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sampling {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    /// Anthropic only.
    pub top_k: Option<u64>,
    pub stop: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestEnvelope {
    pub model: Option<String>,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: Option<u64>,
    pub stream: bool,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: Option<ToolChoice>,
    pub sampling: Sampling,
    /// End-user identifier (OpenAI `user`, Anthropic `metadata.user_id`).
    pub user: Option<String>,
    /// Unknown top-level fields, in arrival order.
    pub extensions: Map<String, Value>,
    /// Nested inputs with no canonical slot (e.g. `messages.name`).
    pub unmapped: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    ContentFilter,
}

impl StopReason {
    pub fn from_openai(reason: &str) -> Self {
        match reason {
            "length" => StopReason::MaxTokens,
            "tool_calls" | "function_call" => StopReason::ToolUse,
            "content_filter" => StopReason::ContentFilter,
            _ => StopReason::EndTurn,
        }
    }

    pub fn as_openai(&self) -> &'static str {
        match self {
            StopReason::EndTurn | StopReason::StopSequence => "stop",
            StopReason::MaxTokens => "length",
            StopReason::ToolUse => "tool_calls",
            StopReason::ContentFilter => "content_filter",
        }
    }

    pub fn from_anthropic(reason: &str) -> Self {
        match reason {
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            "tool_use" => StopReason::ToolUse,
            "refusal" => StopReason::ContentFilter,
            _ => StopReason::EndTurn,
        }
    }

    pub fn as_anthropic(&self) -> &'static str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::MaxTokens => "max_tokens",
            StopReason::StopSequence => "stop_sequence",
            StopReason::ToolUse => "tool_use",
            StopReason::ContentFilter => "refusal",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub id: String,
    pub model: String,
    pub content: Vec<ContentPart>,
    pub stop_reason: Option<StopReason>,
    pub usage: Usage,
}

/// Parse a `data:` URL into an inline image, or keep it as a plain URL.
pub fn image_from_url(url: &str) -> ImageSource {
    url.strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .map(|(media_type, data)| ImageSource::Base64 {
            media_type: media_type.to_string(),
            data: data.to_string(),
        })
        .unwrap_or_else(|| ImageSource::Url(url.to_string()))
}

/// Flatten a tool result payload (string or content blocks) to text.
pub fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Record `field` once.
pub fn note(unmapped: &mut Vec<String>, field: &str) {
    if !unmapped.iter().any(|f| f == field) {
        unmapped.push(field.to_string());
    }
}

/// Record every key of `object` outside `known` as `<prefix>.<key>`.
///
/// `null` and `false` leave the default in place, so they are not reported.
pub fn note_unknown_keys(object: &Value, known: &[&str], prefix: &str, unmapped: &mut Vec<String>) {
    let Some(fields) = object.as_object() else {
        return;
    };
    for (key, value) in fields {
        if known.contains(&key.as_str()) || matches!(value, Value::Null | Value::Bool(false)) {
            continue;
        }
        note(unmapped, &format!("{}.{}", prefix, key));
    }
}
