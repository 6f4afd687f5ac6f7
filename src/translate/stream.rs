//! Streaming (SSE) translation.
//!
//! # Data Flow
//! ```text
//! upstream bytes → SseDecoder (frame on blank lines, tolerate split chunks)
//!     → StreamTranslator (one dialect's events → the other's, in order)
//!     → SSE frames for the client
//! ```
//!
//! Translators are stateful: block indices, tool-call slots and the final stop
//! reason are tracked across events.

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::translate::envelope::StopReason;

/// One decoded server-sent event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE parser.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns every event completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }

    /// Bytes received but not yet framed.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Option<String> = None;

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_string()),
            "data" => match &mut data {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            _ => {}
        }
    }

    if event.is_none() && data.is_none() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.unwrap_or_default(),
    })
}

/// Format an SSE frame.
pub fn frame(event: Option<&str>, data: &str) -> String {
    match event {
        Some(name) => format!("event: {}\ndata: {}\n\n", name, data),
        None => format!("data: {}\n\n", data),
    }
}

/// Terminal frame appended when the upstream stream breaks.
pub fn error_event(error: &GatewayError) -> Bytes {
    let body = json!({
        "type": "error",
        "error": {
            "kind": error.kind(),
            "message": error.to_string(),
        },
    });
    Bytes::from(frame(Some("error"), &body.to_string()))
}

/// Rewrites one dialect's stream events into another's.
pub trait StreamTranslator: Send {
    /// Frames to emit for one upstream event.
    fn on_event(&mut self, event: &SseEvent) -> Vec<String>;

    /// Frames to emit when the upstream stream ends cleanly.
    fn finish(&mut self) -> Vec<String>;
}

/// Decoder plus translator: bytes in, translated bytes out.
pub struct StreamTranslation {
    decoder: SseDecoder,
    translator: Box<dyn StreamTranslator>,
}

impl StreamTranslation {
    pub fn new(translator: Box<dyn StreamTranslator>) -> Self {
        Self {
            decoder: SseDecoder::new(),
            translator,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Bytes {
        let mut out = String::new();
        for event in self.decoder.push(chunk) {
            for frame in self.translator.on_event(&event) {
                out.push_str(&frame);
            }
        }
        Bytes::from(out)
    }

    pub fn finish(&mut self) -> Bytes {
        Bytes::from(self.translator.finish().concat())
    }
}

impl std::fmt::Debug for StreamTranslation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTranslation")
            .field("pending", &self.decoder.pending())
            .finish()
    }
}

/// Anthropic `messages` stream → OpenAI `chat.completion.chunk` stream.
#[derive(Debug)]
pub struct AnthropicToOpenAi {
    id: String,
    model: String,
    created: u64,
    /// Anthropic block index → OpenAI tool_calls index.
    tool_slots: HashMap<u64, usize>,
    input_tokens: u64,
    done: bool,
}

impl AnthropicToOpenAi {
    pub fn new(created: u64) -> Self {
        Self {
            id: String::new(),
            model: String::new(),
            created,
            tool_slots: HashMap::new(),
            input_tokens: 0,
            done: false,
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>, usage: Option<Value>) -> String {
        let mut chunk = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}],
        });
        if let Some(usage) = usage {
            chunk["usage"] = usage;
        }
        frame(None, &chunk.to_string())
    }
}

impl StreamTranslator for AnthropicToOpenAi {
    fn on_event(&mut self, event: &SseEvent) -> Vec<String> {
        let Ok(data) = serde_json::from_str::<Value>(&event.data) else {
            return Vec::new();
        };
        let kind = data
            .get("type")
            .and_then(Value::as_str)
            .or(event.event.as_deref())
            .unwrap_or_default();

        match kind {
            "message_start" => {
                let message = &data["message"];
                self.id = message["id"].as_str().unwrap_or_default().to_string();
                self.model = message["model"].as_str().unwrap_or_default().to_string();
                self.input_tokens = message
                    .pointer("/usage/input_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                vec![self.chunk(json!({"role": "assistant", "content": ""}), None, None)]
            }
            "content_block_start" => {
                let block = &data["content_block"];
                if block["type"] != "tool_use" {
                    return Vec::new();
                }
                let index = data["index"].as_u64().unwrap_or(0);
                let slot = self.tool_slots.len();
                self.tool_slots.insert(index, slot);
                vec![self.chunk(
                    json!({"tool_calls": [{
                        "index": slot,
                        "id": block["id"],
                        "type": "function",
                        "function": {"name": block["name"], "arguments": ""},
                    }]}),
                    None,
                    None,
                )]
            }
            "content_block_delta" => {
                let delta = &data["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => {
                        vec![self.chunk(json!({"content": delta["text"]}), None, None)]
                    }
                    Some("input_json_delta") => {
                        let index = data["index"].as_u64().unwrap_or(0);
                        let slot = self.tool_slots.get(&index).copied().unwrap_or(0);
                        vec![self.chunk(
                            json!({"tool_calls": [{
                                "index": slot,
                                "function": {"arguments": delta["partial_json"]},
                            }]}),
                            None,
                            None,
                        )]
                    }
                    _ => Vec::new(),
                }
            }
            "message_delta" => {
                let reason = data
                    .pointer("/delta/stop_reason")
                    .and_then(Value::as_str)
                    .map(StopReason::from_anthropic)
                    .unwrap_or(StopReason::EndTurn);
                let output_tokens = data
                    .pointer("/usage/output_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                vec![self.chunk(
                    json!({}),
                    Some(reason.as_openai()),
                    Some(json!({
                        "prompt_tokens": self.input_tokens,
                        "completion_tokens": output_tokens,
                        "total_tokens": self.input_tokens + output_tokens,
                    })),
                )]
            }
            "message_stop" => {
                self.done = true;
                vec![frame(None, "[DONE]")]
            }
            "error" => vec![frame(None, &json!({"error": data["error"]}).to_string())],
            // ping, content_block_stop
            _ => Vec::new(),
        }
    }

    fn finish(&mut self) -> Vec<String> {
        if self.done {
            Vec::new()
        } else {
            self.done = true;
            vec![frame(None, "[DONE]")]
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum OpenBlock {
    Text,
    Tool(u64),
}

/// OpenAI `chat.completion.chunk` stream → Anthropic `messages` stream.
#[derive(Debug, Default)]
pub struct OpenAiToAnthropic {
    started: bool,
    finished: bool,
    next_block: u64,
    open: Option<(OpenBlock, u64)>,
    /// OpenAI tool_calls index → Anthropic block index.
    tool_blocks: HashMap<u64, u64>,
    stop_reason: Option<StopReason>,
    input_tokens: u64,
    output_tokens: u64,
}

impl OpenAiToAnthropic {
    pub fn new() -> Self {
        Self::default()
    }

    fn event(kind: &str, data: Value) -> String {
        frame(Some(kind), &data.to_string())
    }

    fn close_open(&mut self, out: &mut Vec<String>) {
        if let Some((_, index)) = self.open.take() {
            out.push(Self::event(
                "content_block_stop",
                json!({"type": "content_block_stop", "index": index}),
            ));
        }
    }

    fn open_block(&mut self, kind: OpenBlock, block: Value, out: &mut Vec<String>) -> u64 {
        self.close_open(out);
        let index = self.next_block;
        self.next_block += 1;
        self.open = Some((kind, index));
        out.push(Self::event(
            "content_block_start",
            json!({"type": "content_block_start", "index": index, "content_block": block}),
        ));
        index
    }

    fn finalize(&mut self, out: &mut Vec<String>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.close_open(out);
        let reason = self.stop_reason.unwrap_or(StopReason::EndTurn);
        out.push(Self::event(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": {"stop_reason": reason.as_anthropic(), "stop_sequence": null},
                "usage": {"input_tokens": self.input_tokens, "output_tokens": self.output_tokens},
            }),
        ));
        out.push(Self::event("message_stop", json!({"type": "message_stop"})));
    }
}

impl StreamTranslator for OpenAiToAnthropic {
    fn on_event(&mut self, event: &SseEvent) -> Vec<String> {
        let mut out = Vec::new();
        if event.data.trim() == "[DONE]" {
            if self.started {
                self.finalize(&mut out);
            }
            return out;
        }
        let Ok(chunk) = serde_json::from_str::<Value>(&event.data) else {
            return out;
        };

        if let Some(error) = chunk.get("error") {
            out.push(Self::event("error", json!({"type": "error", "error": error})));
            return out;
        }

        if !self.started {
            self.started = true;
            out.push(Self::event(
                "message_start",
                json!({
                    "type": "message_start",
                    "message": {
                        "id": chunk["id"],
                        "type": "message",
                        "role": "assistant",
                        "model": chunk["model"],
                        "content": [],
                        "stop_reason": null,
                        "stop_sequence": null,
                        "usage": {"input_tokens": 0, "output_tokens": 0},
                    },
                }),
            ));
        }

        if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
            self.input_tokens = usage["prompt_tokens"].as_u64().unwrap_or(self.input_tokens);
            self.output_tokens = usage["completion_tokens"].as_u64().unwrap_or(self.output_tokens);
        }

        let Some(choice) = chunk.pointer("/choices/0") else {
            return out;
        };
        let delta = &choice["delta"];

        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                let index = match self.open {
                    Some((OpenBlock::Text, index)) => index,
                    _ => self.open_block(OpenBlock::Text, json!({"type": "text", "text": ""}), &mut out),
                };
                out.push(Self::event(
                    "content_block_delta",
                    json!({
                        "type": "content_block_delta",
                        "index": index,
                        "delta": {"type": "text_delta", "text": text},
                    }),
                ));
            }
        }

        if let Some(Value::Array(calls)) = delta.get("tool_calls") {
            for call in calls {
                let slot = call["index"].as_u64().unwrap_or(0);
                if let Some(id) = call.get("id").and_then(Value::as_str) {
                    let block = json!({
                        "type": "tool_use",
                        "id": id,
                        "name": call.pointer("/function/name").cloned().unwrap_or(Value::Null),
                        "input": {},
                    });
                    let index = self.open_block(OpenBlock::Tool(slot), block, &mut out);
                    self.tool_blocks.insert(slot, index);
                }
                let arguments = call
                    .pointer("/function/arguments")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if let (false, Some(index)) = (arguments.is_empty(), self.tool_blocks.get(&slot)) {
                    out.push(Self::event(
                        "content_block_delta",
                        json!({
                            "type": "content_block_delta",
                            "index": index,
                            "delta": {"type": "input_json_delta", "partial_json": arguments},
                        }),
                    ));
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.stop_reason = Some(StopReason::from_openai(reason));
            self.close_open(&mut out);
        }

        out
    }

    fn finish(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        if self.started {
            self.finalize(&mut out);
        }
        out
    }
}
