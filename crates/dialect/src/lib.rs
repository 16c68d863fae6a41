//! Backend wire-protocol dialects
//!
//! The gateway speaks the OpenAI chat-completions protocol to clients while
//! backends speak one of three dialects: the Anthropic messages protocol,
//! the OpenAI responses protocol, or a raw passthrough. This crate owns the
//! per-dialect pieces:
//! - SSE wire framing ([`sse`]) and streaming reassemblers ([`anthropic`],
//!   [`openai`]) that convert backend event streams into client-shaped
//!   `chat.completion.chunk` streams
//! - one-shot response conversion for buffered requests
//! - inbound request conversion ([`request`]) from chat completions to a
//!   backend family's shape
//! - direct-route payload edits ([`direct`]): system-prompt injection and
//!   reasoning-effort directives
//! - outbound header construction ([`headers`])

pub mod anthropic;
pub mod direct;
pub mod error;
pub mod headers;
pub mod openai;
pub mod request;
pub mod sse;

use serde::Deserialize;

pub use anthropic::AnthropicStreamTransformer;
pub use direct::ReasoningLevel;
pub use error::{Error, Result};
pub use openai::{convert_response_to_chat_completion, ResponsesStreamTransformer};
pub use request::to_backend;
pub use sse::{SseEvent, SseParser};

/// Wire protocol spoken by an upstream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendFamily {
    /// Anthropic messages protocol (`/v1/messages` event stream).
    Anthropic,
    /// OpenAI responses protocol (`/v1/responses` event stream).
    OpenAi,
    /// Bytes relayed verbatim, no reinterpretation.
    Passthrough,
}

impl std::fmt::Display for BackendFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAi => write!(f, "openai"),
            Self::Passthrough => write!(f, "passthrough"),
        }
    }
}
