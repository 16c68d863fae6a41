//! OpenAI responses-protocol conversion
//!
//! The responses protocol differs from chat completions in both streaming
//! and one-shot shapes. [`ResponsesStreamTransformer`] reassembles
//! `response.output_text.delta` / `response.completed` event streams into
//! `chat.completion.chunk` frames; [`convert_response_to_chat_completion`]
//! maps a buffered response object.

use bytes::Bytes;
use serde_json::{json, Value};
use tracing::debug;

use crate::anthropic::{done_frame, sse_frame};
use crate::error::{Error, Result};
use crate::sse::{SseEvent, SseParser};

/// Stateful responses-to-chat-completions stream transformer.
pub struct ResponsesStreamTransformer {
    parser: SseParser,
    model: String,
    id: String,
    created: i64,
    sent_role: bool,
    done: bool,
}

impl ResponsesStreamTransformer {
    pub fn new(model: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            parser: SseParser::new(),
            model: model.into(),
            id: id.into(),
            created: chrono::Utc::now().timestamp(),
            sent_role: false,
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
            Some("response.created") => {
                self.sent_role = true;
                vec![self.chunk(json!({"role": "assistant", "content": ""}), None)]
            }
            Some("response.output_text.delta") => {
                let text = payload["delta"].as_str().unwrap_or_default();
                let mut out = Vec::new();
                if !self.sent_role {
                    self.sent_role = true;
                    out.push(self.chunk(json!({"role": "assistant", "content": ""}), None));
                }
                out.push(self.chunk(json!({"content": text}), None));
                out
            }
            Some("response.completed") => {
                self.done = true;
                vec![self.chunk(json!({}), Some("stop")), done_frame()]
            }
            Some("response.failed") | Some("error") => {
                debug!(data = %event.data, "backend stream reported an error event");
                self.done = true;
                vec![done_frame()]
            }
            // in_progress, output_item.*, content_part.* carry no text
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

/// Convert a buffered responses-protocol result into a `chat.completion`
/// object. The caller falls back to forwarding the raw payload when this
/// fails.
pub fn convert_response_to_chat_completion(resp: &Value) -> Result<Value> {
    let obj = resp
        .as_object()
        .ok_or_else(|| Error::Transform("response is not a JSON object".into()))?;

    let output_msg = obj
        .get("output")
        .and_then(Value::as_array)
        .and_then(|output| output.iter().find(|o| o["type"] == "message"));

    let content: String = output_msg
        .and_then(|m| m["content"].as_array())
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b["type"] == "output_text")
                .filter_map(|b| b["text"].as_str())
                .collect()
        })
        .unwrap_or_default();

    let id = match obj.get("id").and_then(Value::as_str) {
        Some(id) => format!("chatcmpl-{}", id.strip_prefix("resp_").unwrap_or(id)),
        None => format!("chatcmpl-{}", chrono::Utc::now().timestamp_millis()),
    };
    let created = obj
        .get("created_at")
        .and_then(Value::as_i64)
        .unwrap_or_else(|| chrono::Utc::now().timestamp());
    let finish_reason = if obj.get("status").and_then(Value::as_str) == Some("completed") {
        "stop"
    } else {
        "unknown"
    };
    let usage = obj.get("usage").cloned().unwrap_or(Value::Null);

    Ok(json!({
        "id": id,
        "object": "chat.completion",
        "created": created,
        "model": obj.get("model").and_then(Value::as_str).unwrap_or("unknown-model"),
        "choices": [{
            "index": 0,
            "message": {
                "role": output_msg
                    .and_then(|m| m["role"].as_str())
                    .unwrap_or("assistant"),
                "content": content,
            },
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": usage["input_tokens"].as_i64().unwrap_or(0),
            "completion_tokens": usage["output_tokens"].as_i64().unwrap_or(0),
            "total_tokens": usage["total_tokens"].as_i64().unwrap_or(0),
        },
    }))
}
