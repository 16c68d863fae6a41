//! Anthropic messages stream reassembly
//!
//! Converts an Anthropic messages event stream (`message_start`,
//! `content_block_delta`, `message_delta`, `message_stop`) into OpenAI
//! `chat.completion.chunk` SSE frames. Backend chunk boundaries carry no
//! meaning; the inner [`SseParser`] reassembles events before conversion.

use bytes::Bytes;
use serde_json::{json, Value};
use tracing::debug;

use crate::sse::{SseEvent, SseParser};

/// Stateful Anthropic-to-OpenAI stream transformer.
///
/// `push` accepts raw backend bytes and returns zero or more client-ready
/// SSE frames; `finish` flushes parser state and guarantees the terminal
/// `[DONE]` frame.
pub struct AnthropicStreamTransformer {
    parser: SseParser,
    model: String,
    id: String,
    created: i64,
    done: bool,
}

impl AnthropicStreamTransformer {
    pub fn new(model: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            parser: SseParser::new(),
            model: model.into(),
            id: id.into(),
            created: chrono::Utc::now().timestamp(),
            done: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let events = self.parser.push(chunk);
        let mut out = Vec::new();
        for event in events {
            out.extend(self.convert(&event));
        }
        out
    }

    pub fn finish(&mut self) -> Vec<Bytes> {
        let mut out = Vec::new();
        if let Some(event) = self.parser.finish() {
            out.extend(self.convert(&event));
        }
        if !self.done {
            self.done = true;
            out.push(done_frame());
        }
        out
    }

    fn convert(&mut self, event: &SseEvent) -> Vec<Bytes> {
        if self.done {
            return Vec::new();
        }
        let payload: Value = match serde_json::from_str(&event.data) {
            Ok(payload) => payload,
            Err(error) => {
                debug!(%error, "skipping non-JSON stream event");
                return Vec::new();
            }
        };
        match payload["type"].as_str() {
            Some("message_start") => {
                vec![self.chunk(json!({"role": "assistant", "content": ""}), None)]
            }
            Some("content_block_delta") => {
                let delta = &payload["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => {
                        let text = delta["text"].as_str().unwrap_or_default();
                        vec![self.chunk(json!({"content": text}), None)]
                    }
                    // Thinking deltas have no counterpart in the client
                    // protocol and are dropped.
                    _ => Vec::new(),
                }
            }
            Some("message_delta") => {
                let reason = finish_reason(payload["delta"]["stop_reason"].as_str());
                vec![self.chunk(json!({}), Some(reason))]
            }
            Some("message_stop") => {
                self.done = true;
                vec![done_frame()]
            }
            Some("error") => {
                debug!(data = %event.data, "backend stream reported an error event");
                self.done = true;
                vec![done_frame()]
            }
            // ping, content_block_start, content_block_stop
            _ => Vec::new(),
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> Bytes {
        sse_frame(&json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        }))
    }
}

fn finish_reason(stop_reason: Option<&str>) -> &'static str {
    match stop_reason {
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        // end_turn, stop_sequence, anything else
        _ => "stop",
    }
}

pub(crate) fn sse_frame(body: &Value) -> Bytes {
    Bytes::from(format!("data: {body}\n\n"))
}

pub(crate) fn done_frame() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}
