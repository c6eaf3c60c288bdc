use bytes::Bytes;
use serde::Serialize;

/// One server-sent event as parsed off the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE decoder. Feed it raw chunks as they arrive; it yields
/// complete events and keeps partial lines buffered across chunk boundaries.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let mut line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);
            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                self.flush_event(&mut events);
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            self.consume_field(&line);
        }

        events
    }

    /// Drain whatever remains after the upstream closed the connection.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            if line.ends_with('\r') {
                line.pop();
            }
            if !line.is_empty() && !line.starts_with(':') {
                self.consume_field(&line);
            }
        }
        let mut events = Vec::new();
        self.flush_event(&mut events);
        events
    }

    fn consume_field(&mut self, line: &str) {
        if let Some(value) = line.strip_prefix("event:") {
            let value = value.trim_start();
            self.event = (!value.is_empty()).then(|| value.to_string());
        } else if line == "event" {
            self.event = None;
        } else if let Some(value) = line.strip_prefix("data:") {
            self.data_lines.push(value.trim_start().to_string());
        } else if line == "data" {
            self.data_lines.push(String::new());
        }
    }

    fn flush_event(&mut self, events: &mut Vec<SseEvent>) {
        if self.event.is_none() && self.data_lines.is_empty() {
            return;
        }
        events.push(SseEvent {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
        });
        self.data_lines.clear();
    }
}

/// Serialize a payload as `event: <name>\ndata: <json>\n\n`.
pub fn frame_typed<T: Serialize>(event: &str, payload: &T) -> Option<Bytes> {
    let json = serde_json::to_vec(payload).ok()?;
    let mut out = Vec::with_capacity(json.len() + event.len() + 16);
    out.extend_from_slice(b"event: ");
    out.extend_from_slice(event.as_bytes());
    out.extend_from_slice(b"\ndata: ");
    out.extend_from_slice(&json);
    out.extend_from_slice(b"\n\n");
    Some(Bytes::from(out))
}

/// Serialize a payload as a bare `data: <json>\n\n` frame.
pub fn frame_data<T: Serialize>(payload: &T) -> Option<Bytes> {
    let json = serde_json::to_vec(payload).ok()?;
    let mut out = Vec::with_capacity(json.len() + 10);
    out.extend_from_slice(b"data: ");
    out.extend_from_slice(&json);
    out.extend_from_slice(b"\n\n");
    Some(Bytes::from(out))
}

/// Chat-completions streams end with a literal done marker.
pub fn frame_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typed_event_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("event: response.comp").is_empty());
        let events = parser.push_str("leted\ndata: {\"ok\":true}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("response.completed"));
        assert_eq!(events[0].data, "{\"ok\":true}");
    }

    #[test]
    fn joins_multiline_data() {
        let mut parser = SseParser::new();
        let events = parser.push_str("data: a\ndata: b\n\n");
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn finish_flushes_trailing_event() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: tail").is_empty());
        let events = parser.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "tail");
    }

    #[test]
    fn typed_frame_matches_wire_format() {
        let payload = serde_json::json!({"type": "response.completed"});
        let frame = frame_typed("response.completed", &payload).unwrap();
        assert_eq!(
            frame.as_ref(),
            b"event: response.completed\ndata: {\"type\":\"response.completed\"}\n\n"
        );
    }
}
