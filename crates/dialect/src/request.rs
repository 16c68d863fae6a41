//! Inbound request conversion
//!
//! Clients always speak chat completions on the aggregating route; the
//! backend may not. [`to_backend`] reshapes a chat-completions body into
//! the target family's wire shape and reports whether the caller asked
//! for streaming. Passthrough bodies are forwarded as-is.

use serde_json::{json, Map, Value};

use crate::BackendFamily;

const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Convert a chat-completions request body into the backend family's
/// shape. Returns the converted body and the caller's streaming flag.
pub fn to_backend(family: BackendFamily, body: &Value) -> (Value, bool) {
    let streaming = body["stream"].as_bool().unwrap_or(false);
    let converted = match family {
        BackendFamily::Passthrough => body.clone(),
        BackendFamily::Anthropic => to_messages(body),
        BackendFamily::OpenAi => to_responses(body),
    };
    (converted, streaming)
}

/// Split system messages off a chat-completions message list. System
/// content joins into one string; everything else keeps its order.
fn split_system(body: &Value) -> (Vec<String>, Vec<Value>) {
    let mut system = Vec::new();
    let mut rest = Vec::new();
    if let Some(messages) = body["messages"].as_array() {
        for message in messages {
            if message["role"] == "system" {
                if let Some(text) = message["content"].as_str() {
                    system.push(text.to_string());
                }
            } else {
                rest.push(message.clone());
            }
        }
    }
    (system, rest)
}

fn copy_if_present(src: &Value, dst: &mut Map<String, Value>, fields: &[&str]) {
    for field in fields {
        if let Some(value) = src.get(*field) {
            dst.insert((*field).to_string(), value.clone());
        }
    }
}

fn to_messages(body: &Value) -> Value {
    let (system, messages) = split_system(body);
    let mut out = Map::new();
    out.insert("model".into(), body["model"].clone());
    out.insert(
        "max_tokens".into(),
        json!(body["max_tokens"].as_u64().unwrap_or(DEFAULT_MAX_TOKENS)),
    );
    out.insert("messages".into(), Value::Array(messages));
    if !system.is_empty() {
        let blocks: Vec<Value> = system
            .iter()
            .map(|text| json!({"type": "text", "text": text}))
            .collect();
        out.insert("system".into(), Value::Array(blocks));
    }
    if body["stream"].as_bool().unwrap_or(false) {
        out.insert("stream".into(), json!(true));
    }
    copy_if_present(body, &mut out, &["temperature", "top_p", "stop_sequences"]);
    Value::Object(out)
}

fn to_responses(body: &Value) -> Value {
    let (system, messages) = split_system(body);
    let mut out = Map::new();
    out.insert("model".into(), body["model"].clone());
    let input: Vec<Value> = messages
        .iter()
        .map(|m| json!({"role": m["role"], "content": m["content"]}))
        .collect();
    out.insert("input".into(), Value::Array(input));
    if !system.is_empty() {
        out.insert("instructions".into(), json!(system.join("\n\n")));
    }
    if let Some(max_tokens) = body["max_tokens"].as_u64() {
        out.insert("max_output_tokens".into(), json!(max_tokens));
    }
    if body["stream"].as_bool().unwrap_or(false) {
        out.insert("stream".into(), json!(true));
    }
    copy_if_present(body, &mut out, &["temperature", "top_p"]);
    Value::Object(out)
}
