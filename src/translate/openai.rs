//! OpenAI chat-completions dialect.
//!
//! Parses `POST /v1/chat/completions` bodies and `chat.completion` responses
//! into canonical envelopes, and emits them back.

use serde_json::{json, Map, Value};

use crate::translate::envelope::{
    image_from_url, note, note_unknown_keys, ContentPart, ImageSource, Message, RequestEnvelope,
    ResponseEnvelope, Role, StopReason, ToolChoice, ToolSpec, Usage,
};

/// Top-level request fields with a canonical slot.
const KNOWN_FIELDS: &[&str] = &[
    "model",
    "messages",
    "max_tokens",
    "max_completion_tokens",
    "stream",
    "temperature",
    "top_p",
    "stop",
    "tools",
    "tool_choice",
    "user",
];

pub fn parse_request(body: Value) -> Result<RequestEnvelope, String> {
    let Value::Object(fields) = body else {
        return Err("request body must be a JSON object".to_string());
    };

    let mut envelope = RequestEnvelope {
        model: take_string(&fields, "model"),
        stream: fields.get("stream").and_then(Value::as_bool).unwrap_or(false),
        max_tokens: fields
            .get("max_completion_tokens")
            .or_else(|| fields.get("max_tokens"))
            .and_then(Value::as_u64),
        user: take_string(&fields, "user"),
        ..Default::default()
    };
    envelope.sampling.temperature = fields.get("temperature").and_then(Value::as_f64);
    envelope.sampling.top_p = fields.get("top_p").and_then(Value::as_f64);
    envelope.sampling.stop = match fields.get("stop") {
        Some(Value::String(stop)) => vec![stop.clone()],
        Some(Value::Array(stops)) => stops
            .iter()
            .filter_map(|s| s.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };

    let messages = match fields.get("messages") {
        Some(Value::Array(messages)) => messages,
        _ => return Err("'messages' must be an array".to_string()),
    };
    let mut system = Vec::new();
    for (i, message) in messages.iter().enumerate() {
        parse_message(message, i, &mut system, &mut envelope)?;
    }
    if !system.is_empty() {
        envelope.system = Some(system.join("\n\n"));
    }

    if let Some(Value::Array(tools)) = fields.get("tools") {
        for tool in tools {
            let function = tool.get("function").ok_or("tool is missing 'function'")?;
            note_unknown_keys(tool, &["type", "function"], "tools", &mut envelope.unmapped);
            note_unknown_keys(
                function,
                &["name", "description", "parameters"],
                "tools.function",
                &mut envelope.unmapped,
            );
            envelope.tools.push(ToolSpec {
                name: function
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or("tool function is missing 'name'")?
                    .to_string(),
                description: function
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                input_schema: function
                    .get("parameters")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object"})),
            });
        }
    }

    if let Some(choice) = fields.get("tool_choice") {
        note_unknown_keys(choice, &["type", "function"], "tool_choice", &mut envelope.unmapped);
    }
    envelope.tool_choice = match fields.get("tool_choice") {
        Some(Value::String(choice)) => match choice.as_str() {
            "none" => Some(ToolChoice::None),
            "required" => Some(ToolChoice::Required),
            _ => Some(ToolChoice::Auto),
        },
        Some(choice @ Value::Object(_)) => choice
            .pointer("/function/name")
            .and_then(Value::as_str)
            .map(|name| ToolChoice::Tool(name.to_string())),
        _ => None,
    };

    for (key, value) in fields {
        if !KNOWN_FIELDS.contains(&key.as_str()) {
            envelope.extensions.insert(key, value);
        }
    }

    Ok(envelope)
}

fn take_string(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_message(
    message: &Value,
    index: usize,
    system: &mut Vec<String>,
    envelope: &mut RequestEnvelope,
) -> Result<(), String> {
    let role = message
        .get("role")
        .and_then(Value::as_str)
        .ok_or_else(|| format!("messages[{}] is missing 'role'", index))?;

    note_unknown_keys(
        message,
        &["role", "content", "tool_calls", "tool_call_id"],
        "messages",
        &mut envelope.unmapped,
    );

    let content = parse_content(message.get("content"), &mut envelope.unmapped)?;
    match role {
        "system" | "developer" => {
            system.push(
                content
                    .iter()
                    .filter_map(|c| match c {
                        ContentPart::Text(text) => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join(""),
            );
        }
        "user" => envelope.messages.push(Message {
            role: Role::User,
            content,
        }),
        "assistant" => {
            let mut content = content;
            if let Some(Value::Array(calls)) = message.get("tool_calls") {
                for call in calls {
                    let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
                    let name = call
                        .pointer("/function/name")
                        .and_then(Value::as_str)
                        .ok_or_else(|| format!("messages[{}] tool call is missing a name", index))?;
                    let arguments = call
                        .pointer("/function/arguments")
                        .and_then(Value::as_str)
                        .unwrap_or("{}");
                    let input = if arguments.trim().is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(arguments).map_err(|e| {
                            format!("messages[{}] tool call arguments are not JSON: {}", index, e)
                        })?
                    };
                    content.push(ContentPart::ToolUse {
                        id: id.to_string(),
                        name: name.to_string(),
                        input,
                    });
                }
            }
            envelope.messages.push(Message {
                role: Role::Assistant,
                content,
            });
        }
        "tool" => {
            let tool_use_id = message
                .get("tool_call_id")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("messages[{}] is missing 'tool_call_id'", index))?;
            let text = Message {
                role: Role::Tool,
                content,
            }
            .text();
            envelope.messages.push(Message {
                role: Role::Tool,
                content: vec![ContentPart::ToolResult {
                    tool_use_id: tool_use_id.to_string(),
                    content: text,
                    is_error: false,
                }],
            });
        }
        other => return Err(format!("messages[{}] has unsupported role '{}'", index, other)),
    }
    Ok(())
}

fn parse_content(content: Option<&Value>, unmapped: &mut Vec<String>) -> Result<Vec<ContentPart>, String> {
    match content {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(text)) => Ok(vec![ContentPart::Text(text.clone())]),
        Some(Value::Array(parts)) => {
            let mut out = Vec::with_capacity(parts.len());
            for part in parts {
                match part.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        note_unknown_keys(part, &["type", "text"], "messages.content.text", unmapped);
                        out.push(ContentPart::Text(
                            part.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
                        ));
                    }
                    Some("image_url") => {
                        let image = part.get("image_url").ok_or("image_url part is missing 'url'")?;
                        note_unknown_keys(part, &["type", "image_url"], "messages.content.image_url", unmapped);
                        note_unknown_keys(image, &["url"], "messages.content.image_url", unmapped);
                        let url = image
                            .get("url")
                            .and_then(Value::as_str)
                            .ok_or("image_url part is missing 'url'")?;
                        out.push(ContentPart::Image(image_from_url(url)));
                    }
                    Some(other) => note(unmapped, &format!("messages.content.{}", other)),
                    None => return Err("content part is missing 'type'".to_string()),
                }
            }
            Ok(out)
        }
        Some(_) => Err("message content must be a string or an array".to_string()),
    }
}

/// Emit an OpenAI request. Fields with no OpenAI equivalent are appended to `dropped`.
pub fn emit_request(envelope: &RequestEnvelope, dropped: &mut Vec<String>) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = &envelope.system {
        messages.push(json!({"role": "system", "content": system}));
    }

    for message in &envelope.messages {
        // Tool results travel as separate `tool` messages ahead of any remaining content.
        let mut rest = Vec::new();
        for part in &message.content {
            match part {
                ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    if *is_error {
                        note(dropped, "tool_result.is_error");
                    }
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content,
                    }));
                }
                other => rest.push(other),
            }
        }
        if rest.is_empty() {
            continue;
        }

        match message.role {
            Role::Assistant => {
                let text: String = rest
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::Text(text) => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                let calls: Vec<Value> = rest
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::ToolUse { id, name, input } => Some(json!({
                            "id": id,
                            "type": "function",
                            "function": {"name": name, "arguments": input.to_string()},
                        })),
                        _ => None,
                    })
                    .collect();
                let mut out = json!({
                    "role": "assistant",
                    "content": if text.is_empty() { Value::Null } else { Value::String(text) },
                });
                if !calls.is_empty() {
                    out["tool_calls"] = Value::Array(calls);
                }
                messages.push(out);
            }
            Role::User | Role::Tool => {
                let content = if rest.iter().all(|p| matches!(p, ContentPart::Text(_))) {
                    Value::String(
                        rest.iter()
                            .filter_map(|p| match p {
                                ContentPart::Text(text) => Some(text.as_str()),
                                _ => None,
                            })
                            .collect(),
                    )
                } else {
                    Value::Array(rest.iter().filter_map(|p| emit_part(p)).collect())
                };
                messages.push(json!({"role": "user", "content": content}));
            }
        }
    }

    let mut body = Map::new();
    if let Some(model) = &envelope.model {
        body.insert("model".into(), json!(model));
    }
    body.insert("messages".into(), Value::Array(messages));
    if let Some(max_tokens) = envelope.max_tokens {
        body.insert("max_tokens".into(), json!(max_tokens));
    }
    if envelope.stream {
        body.insert("stream".into(), json!(true));
        body.insert("stream_options".into(), json!({"include_usage": true}));
    }
    if let Some(temperature) = envelope.sampling.temperature {
        body.insert("temperature".into(), json!(temperature));
    }
    if let Some(top_p) = envelope.sampling.top_p {
        body.insert("top_p".into(), json!(top_p));
    }
    if envelope.sampling.top_k.is_some() {
        note(dropped, "top_k");
    }
    if !envelope.sampling.stop.is_empty() {
        body.insert("stop".into(), json!(envelope.sampling.stop));
    }
    if !envelope.tools.is_empty() {
        let tools: Vec<Value> = envelope
            .tools
            .iter()
            .map(|tool| {
                let mut function = json!({"name": tool.name, "parameters": tool.input_schema});
                if let Some(description) = &tool.description {
                    function["description"] = json!(description);
                }
                json!({"type": "function", "function": function})
            })
            .collect();
        body.insert("tools".into(), Value::Array(tools));
    }
    if let Some(choice) = &envelope.tool_choice {
        let choice = match choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::Required => json!("required"),
            ToolChoice::None => json!("none"),
            ToolChoice::Tool(name) => json!({"type": "function", "function": {"name": name}}),
        };
        body.insert("tool_choice".into(), choice);
    }
    if let Some(user) = &envelope.user {
        body.insert("user".into(), json!(user));
    }

    for field in envelope.unmapped.iter().chain(envelope.extensions.keys()) {
        note(dropped, field);
    }

    Value::Object(body)
}

fn emit_part(part: &ContentPart) -> Option<Value> {
    match part {
        ContentPart::Text(text) => Some(json!({"type": "text", "text": text})),
        ContentPart::Image(ImageSource::Url(url)) => {
            Some(json!({"type": "image_url", "image_url": {"url": url}}))
        }
        ContentPart::Image(ImageSource::Base64 { media_type, data }) => Some(json!({
            "type": "image_url",
            "image_url": {"url": format!("data:{};base64,{}", media_type, data)},
        })),
        ContentPart::ToolUse { .. } | ContentPart::ToolResult { .. } => None,
    }
}

pub fn parse_response(body: &Value) -> Result<ResponseEnvelope, String> {
    let choice = body
        .pointer("/choices/0")
        .ok_or("response has no choices")?;
    let message = choice.get("message").ok_or("choice has no message")?;

    let mut content = Vec::new();
    if let Some(text) = message.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            content.push(ContentPart::Text(text.to_string()));
        }
    }
    if let Some(Value::Array(calls)) = message.get("tool_calls") {
        for call in calls {
            let arguments = call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .unwrap_or("{}");
            content.push(ContentPart::ToolUse {
                id: call.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                name: call
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input: serde_json::from_str(arguments).unwrap_or_else(|_| json!({})),
            });
        }
    }

    Ok(ResponseEnvelope {
        id: body.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
        model: body.get("model").and_then(Value::as_str).unwrap_or_default().to_string(),
        content,
        stop_reason: choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(StopReason::from_openai),
        usage: Usage {
            input_tokens: body.pointer("/usage/prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
            output_tokens: body
                .pointer("/usage/completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        },
    })
}

pub fn emit_response(response: &ResponseEnvelope, created: u64) -> Value {
    let text: String = response
        .content
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    let calls: Vec<Value> = response
        .content
        .iter()
        .filter_map(|p| match p {
            ContentPart::ToolUse { id, name, input } => Some(json!({
                "id": id,
                "type": "function",
                "function": {"name": name, "arguments": input.to_string()},
            })),
            _ => None,
        })
        .collect();

    let mut message = json!({
        "role": "assistant",
        "content": if text.is_empty() && !calls.is_empty() { Value::Null } else { Value::String(text) },
    });
    if !calls.is_empty() {
        message["tool_calls"] = Value::Array(calls);
    }

    json!({
        "id": response.id,
        "object": "chat.completion",
        "created": created,
        "model": response.model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": response.stop_reason.map(|r| r.as_openai()),
        }],
        "usage": {
            "prompt_tokens": response.usage.input_tokens,
            "completion_tokens": response.usage.output_tokens,
            "total_tokens": response.usage.input_tokens + response.usage.output_tokens,
        },
    })
}
