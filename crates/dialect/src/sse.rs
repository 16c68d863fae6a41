//! Incremental server-sent-events wire framing
//!
//! Backends deliver SSE over arbitrary byte chunks; a single event can be
//! split across chunks and a single chunk can carry many events. The parser
//! is an explicit state machine over the wire framing: it buffers partial
//! lines and partial events across `push` calls and emits only complete
//! events.

/// One complete server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// Concatenated `data:` lines, joined with newlines.
    pub data: String,
}

/// Stateful SSE parser. Feed it raw bytes, get complete events back.
#[derive(Default)]
pub struct SseParser {
    buf: Vec<u8>,
    event_type: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk of bytes and return every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = strip_line_ending(&line);
            if let Some(event) = self.process_line(&String::from_utf8_lossy(line)) {
                events.push(event);
            }
        }
        events
    }

    /// Flush state at end of stream: a final unterminated line still counts,
    /// and a pending event without its terminating blank line is emitted.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buf.is_empty() {
            let line: Vec<u8> = self.buf.drain(..).collect();
            let line = strip_line_ending(&line);
            if let Some(event) = self.process_line(&String::from_utf8_lossy(line)) {
                return Some(event);
            }
        }
        self.take_event()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.take_event();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data_lines
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        } else if let Some(value) = line.strip_prefix("event:") {
            self.event_type = Some(value.trim().to_string());
        }
        // Other fields (id, retry) are irrelevant here.
        None
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        if self.event_type.is_none() && self.data_lines.is_empty() {
            return None;
        }
        let event = SseEvent {
            event: self.event_type.take(),
            data: self.data_lines.join("\n"),
        };
        self.data_lines.clear();
        Some(event)
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
