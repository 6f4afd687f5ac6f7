//! Anthropic messages dialect.
//!
//! Parses `POST /v1/messages` bodies and `message` responses into canonical
//! envelopes, and emits them back.

use serde_json::{json, Map, Value};

use crate::translate::envelope::{
    note, note_unknown_keys, tool_result_text, ContentPart, ImageSource, Message, RequestEnvelope,
    ResponseEnvelope, Role, StopReason, ToolChoice, ToolSpec, Usage,
};

/// Anthropic requires `max_tokens`; used when the caller sent none.
pub const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Top-level request fields with a canonical slot.
const KNOWN_FIELDS: &[&str] = &[
    "model",
    "messages",
    "system",
    "max_tokens",
    "stream",
    "temperature",
    "top_p",
    "top_k",
    "stop_sequences",
    "tools",
    "tool_choice",
    "metadata",
];

pub fn parse_request(body: Value) -> Result<RequestEnvelope, String> {
    let Value::Object(fields) = body else {
        return Err("request body must be a JSON object".to_string());
    };

    let mut envelope = RequestEnvelope {
        model: fields.get("model").and_then(Value::as_str).map(str::to_string),
        max_tokens: fields.get("max_tokens").and_then(Value::as_u64),
        stream: fields.get("stream").and_then(Value::as_bool).unwrap_or(false),
        ..Default::default()
    };
    envelope.sampling.temperature = fields.get("temperature").and_then(Value::as_f64);
    envelope.sampling.top_p = fields.get("top_p").and_then(Value::as_f64);
    envelope.sampling.top_k = fields.get("top_k").and_then(Value::as_u64);
    if let Some(Value::Array(stops)) = fields.get("stop_sequences") {
        envelope.sampling.stop = stops
            .iter()
            .filter_map(|s| s.as_str().map(str::to_string))
            .collect();
    }

    envelope.system = match fields.get("system") {
        Some(Value::String(system)) => Some(system.clone()),
        Some(Value::Array(blocks)) => {
            let mut texts = Vec::with_capacity(blocks.len());
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") | None => {
                        note_unknown_keys(block, &["type", "text"], "system.text", &mut envelope.unmapped);
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            texts.push(text);
                        }
                    }
                    Some(other) => note(&mut envelope.unmapped, &format!("system.{}", other)),
                }
            }
            Some(texts.join("\n"))
        }
        _ => None,
    };

    if let Some(Value::Object(metadata)) = fields.get("metadata") {
        for (key, value) in metadata {
            if key == "user_id" {
                envelope.user = value.as_str().map(str::to_string);
            } else {
                note(&mut envelope.unmapped, &format!("metadata.{}", key));
            }
        }
    }

    let messages = match fields.get("messages") {
        Some(Value::Array(messages)) => messages,
        _ => return Err("'messages' must be an array".to_string()),
    };
    for (i, message) in messages.iter().enumerate() {
        let role = match message.get("role").and_then(Value::as_str) {
            Some("user") => Role::User,
            Some("assistant") => Role::Assistant,
            Some(other) => return Err(format!("messages[{}] has unsupported role '{}'", i, other)),
            None => return Err(format!("messages[{}] is missing 'role'", i)),
        };
        note_unknown_keys(message, &["role", "content"], "messages", &mut envelope.unmapped);
        let content = parse_content(message.get("content"), &mut envelope.unmapped)?;
        envelope.messages.push(Message { role, content });
    }

    if let Some(Value::Array(tools)) = fields.get("tools") {
        for tool in tools {
            // Server tools (`web_search_*` and friends) run on Anthropic's side only.
            match tool.get("type").and_then(Value::as_str) {
                None | Some("custom") => {}
                Some(kind) => note(&mut envelope.unmapped, &format!("tools.{}", kind)),
            }
            note_unknown_keys(
                tool,
                &["type", "name", "description", "input_schema"],
                "tools",
                &mut envelope.unmapped,
            );
            envelope.tools.push(ToolSpec {
                name: tool
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or("tool is missing 'name'")?
                    .to_string(),
                description: tool.get("description").and_then(Value::as_str).map(str::to_string),
                input_schema: tool
                    .get("input_schema")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object"})),
            });
        }
    }

    if let Some(choice) = fields.get("tool_choice") {
        note_unknown_keys(choice, &["type", "name"], "tool_choice", &mut envelope.unmapped);
    }
    envelope.tool_choice = fields.get("tool_choice").and_then(|choice| {
        match choice.get("type").and_then(Value::as_str) {
            Some("any") => Some(ToolChoice::Required),
            Some("none") => Some(ToolChoice::None),
            Some("tool") => choice
                .get("name")
                .and_then(Value::as_str)
                .map(|name| ToolChoice::Tool(name.to_string())),
            Some(_) => Some(ToolChoice::Auto),
            None => None,
        }
    });

    for (key, value) in fields {
        if !KNOWN_FIELDS.contains(&key.as_str()) {
            envelope.extensions.insert(key, value);
        }
    }

    Ok(envelope)
}

fn parse_content(content: Option<&Value>, unmapped: &mut Vec<String>) -> Result<Vec<ContentPart>, String> {
    match content {
        Some(Value::String(text)) => Ok(vec![ContentPart::Text(text.clone())]),
        Some(Value::Array(blocks)) => {
            let mut out = Vec::with_capacity(blocks.len());
            for block in blocks {
                if let Some(part) = parse_block(block, unmapped)? {
                    out.push(part);
                }
            }
            Ok(out)
        }
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(_) => Err("message content must be a string or an array".to_string()),
    }
}

fn parse_block(block: &Value, unmapped: &mut Vec<String>) -> Result<Option<ContentPart>, String> {
    let kind = block
        .get("type")
        .and_then(Value::as_str)
        .ok_or("content block is missing 'type'")?;
    let known: &[&str] = match kind {
        "text" => &["type", "text"],
        "image" => &["type", "source"],
        "tool_use" => &["type", "id", "name", "input"],
        "tool_result" => &["type", "tool_use_id", "content", "is_error"],
        other => {
            note(unmapped, &format!("messages.content.{}", other));
            return Ok(None);
        }
    };
    note_unknown_keys(block, known, &format!("messages.content.{}", kind), unmapped);

    let part = match kind {
        "text" => ContentPart::Text(
            block.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
        ),
        "image" => {
            let source = block.get("source").ok_or("image block is missing 'source'")?;
            let image = match source.get("type").and_then(Value::as_str) {
                Some("url") => ImageSource::Url(
                    source.get("url").and_then(Value::as_str).unwrap_or_default().to_string(),
                ),
                Some("base64") | None => ImageSource::Base64 {
                    media_type: source
                        .get("media_type")
                        .and_then(Value::as_str)
                        .unwrap_or("image/png")
                        .to_string(),
                    data: source.get("data").and_then(Value::as_str).unwrap_or_default().to_string(),
                },
                Some(other) => {
                    note(unmapped, &format!("messages.content.image.source.{}", other));
                    return Ok(None);
                }
            };
            ContentPart::Image(image)
        }
        "tool_use" => ContentPart::ToolUse {
            id: block.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
            name: block
                .get("name")
                .and_then(Value::as_str)
                .ok_or("tool_use block is missing 'name'")?
                .to_string(),
            input: block.get("input").cloned().unwrap_or_else(|| json!({})),
        },
        _ => ContentPart::ToolResult {
            tool_use_id: block
                .get("tool_use_id")
                .and_then(Value::as_str)
                .ok_or("tool_result block is missing 'tool_use_id'")?
                .to_string(),
            content: tool_result_text(block.get("content").unwrap_or(&Value::Null)),
            is_error: block.get("is_error").and_then(Value::as_bool).unwrap_or(false),
        },
    };
    Ok(Some(part))
}

/// Emit an Anthropic request. Fields with no Anthropic equivalent are appended to `dropped`.
pub fn emit_request(envelope: &RequestEnvelope, dropped: &mut Vec<String>) -> Value {
    // Anthropic only knows user/assistant; tool results ride in user turns and
    // consecutive turns of the same role are merged.
    let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();
    for message in &envelope.messages {
        let role = match message.role {
            Role::Assistant => "assistant",
            Role::User | Role::Tool => "user",
        };
        let blocks: Vec<Value> = message.content.iter().map(emit_block).collect();
        if blocks.is_empty() {
            continue;
        }
        match turns.last_mut() {
            Some((last, existing)) if *last == role => existing.extend(blocks),
            _ => turns.push((role, blocks)),
        }
    }

    let messages: Vec<Value> = turns
        .into_iter()
        .map(|(role, blocks)| {
            let content = match blocks.as_slice() {
                [single] if single["type"] == "text" => single["text"].clone(),
                _ => Value::Array(blocks),
            };
            json!({"role": role, "content": content})
        })
        .collect();

    let mut body = Map::new();
    if let Some(model) = &envelope.model {
        body.insert("model".into(), json!(model));
    }
    body.insert(
        "max_tokens".into(),
        json!(envelope.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
    );
    if let Some(system) = &envelope.system {
        body.insert("system".into(), json!(system));
    }
    body.insert("messages".into(), Value::Array(messages));
    if envelope.stream {
        body.insert("stream".into(), json!(true));
    }
    if let Some(temperature) = envelope.sampling.temperature {
        body.insert("temperature".into(), json!(temperature));
    }
    if let Some(top_p) = envelope.sampling.top_p {
        body.insert("top_p".into(), json!(top_p));
    }
    if let Some(top_k) = envelope.sampling.top_k {
        body.insert("top_k".into(), json!(top_k));
    }
    if !envelope.sampling.stop.is_empty() {
        body.insert("stop_sequences".into(), json!(envelope.sampling.stop));
    }
    if !envelope.tools.is_empty() {
        let tools: Vec<Value> = envelope
            .tools
            .iter()
            .map(|tool| {
                let mut out = json!({"name": tool.name, "input_schema": tool.input_schema});
                if let Some(description) = &tool.description {
                    out["description"] = json!(description);
                }
                out
            })
            .collect();
        body.insert("tools".into(), Value::Array(tools));
    }
    if let Some(choice) = &envelope.tool_choice {
        let choice = match choice {
            ToolChoice::Auto => json!({"type": "auto"}),
            ToolChoice::Required => json!({"type": "any"}),
            ToolChoice::None => json!({"type": "none"}),
            ToolChoice::Tool(name) => json!({"type": "tool", "name": name}),
        };
        body.insert("tool_choice".into(), choice);
    }
    if let Some(user) = &envelope.user {
        body.insert("metadata".into(), json!({"user_id": user}));
    }

    for field in envelope.unmapped.iter().chain(envelope.extensions.keys()) {
        note(dropped, field);
    }

    Value::Object(body)
}

fn emit_block(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text(text) => json!({"type": "text", "text": text}),
        ContentPart::Image(ImageSource::Base64 { media_type, data }) => json!({
            "type": "image",
            "source": {"type": "base64", "media_type": media_type, "data": data},
        }),
        ContentPart::Image(ImageSource::Url(url)) => json!({
            "type": "image",
            "source": {"type": "url", "url": url},
        }),
        ContentPart::ToolUse { id, name, input } => json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input,
        }),
        ContentPart::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let mut block = json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content,
            });
            if *is_error {
                block["is_error"] = json!(true);
            }
            block
        }
    }
}

pub fn parse_response(body: &Value) -> Result<ResponseEnvelope, String> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or("response has no content array")?;

    let mut content = Vec::with_capacity(blocks.len());
    let mut ignored = Vec::new();
    for block in blocks {
        if let Some(part) = parse_block(block, &mut ignored)? {
            content.push(part);
        }
    }

    Ok(ResponseEnvelope {
        id: body.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
        model: body.get("model").and_then(Value::as_str).unwrap_or_default().to_string(),
        content,
        stop_reason: body
            .get("stop_reason")
            .and_then(Value::as_str)
            .map(StopReason::from_anthropic),
        usage: Usage {
            input_tokens: body.pointer("/usage/input_tokens").and_then(Value::as_u64).unwrap_or(0),
            output_tokens: body.pointer("/usage/output_tokens").and_then(Value::as_u64).unwrap_or(0),
        },
    })
}

pub fn emit_response(response: &ResponseEnvelope) -> Value {
    json!({
        "id": response.id,
        "type": "message",
        "role": "assistant",
        "model": response.model,
        "content": response.content.iter().map(emit_block).collect::<Vec<_>>(),
        "stop_reason": response.stop_reason.map(|r| r.as_anthropic()),
        "stop_sequence": null,
        "usage": {
            "input_tokens": response.usage.input_tokens,
            "output_tokens": response.usage.output_tokens,
        },
    })
}
