//! Line-delimited server-sent events.

use bytes::BytesMut;
use serde_json::Value;
use tracing::{debug, trace};

use super::Frame;

/// Incremental SSE framer.
///
/// Bytes are buffered until a newline arrives, so a frame may span any
/// number of reads and multi-byte characters may be split between them.
#[derive(Debug, Default)]
pub struct SseFramer {
    buffer: BytesMut,
    event: Option<String>,
}

impl SseFramer {
    /// Create an empty framer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read and return every frame it completes.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            if let Some(frame) = self.line(&String::from_utf8_lossy(&line[..pos])) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a final line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<Frame> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let rest = self.buffer.split();
        self.line(&String::from_utf8_lossy(&rest))
            .into_iter()
            .collect()
    }

    fn line(&mut self, line: &str) -> Option<Frame> {
        let line = line.trim();
        if line.is_empty() {
            self.event = None;
            return None;
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(event) = field(line, "event") {
            self.event = Some(event.to_owned());
            return None;
        }
        if let Some(data) = field(line, "data") {
            if data == "[DONE]" {
                return Some(Frame::Done);
            }
            return Some(Frame::Event {
                event: self.event.take(),
                data: data.to_owned(),
            });
        }
        if line.starts_with('{') {
            return bare_error(line);
        }
        trace!(line, "ignoring sse field");
        None
    }
}

fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    line.strip_prefix(name)
        .and_then(|rest| rest.strip_prefix(':'))
        .map(str::trim)
}

/// An error object sent without a `data:` prefix ends the stream.
fn bare_error(line: &str) -> Option<Frame> {
    match serde_json::from_str::<Value>(line) {
        Ok(value) if value.get("error").is_some() => Some(Frame::Error(value)),
        Ok(_) => {
            debug!(line, "ignoring bare json line in sse body");
            None
        }
        Err(e) => {
            debug!(error = %e, "ignoring unparsable bare line in sse body");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(event: Option<&str>, data: &str) -> Frame {
        Frame::Event {
            event: event.map(str::to_owned),
            data: data.to_owned(),
        }
    }

    #[test]
    fn test_data_lines_and_done() {
        let mut framer = SseFramer::new();
        let frames = framer.push(b"data: {\"a\":1}\n\n: keep-alive\ndata: [DONE]\n\n");
        assert_eq!(frames, vec![data(None, "{\"a\":1}"), Frame::Done]);
    }

    #[test]
    fn test_event_line_applies_to_next_data() {
        let mut framer = SseFramer::new();
        let frames = framer.push(b"event: ping\ndata: {}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(
            frames,
            vec![data(Some("ping"), "{}"), data(None, "{\"b\":2}")]
        );
    }

    #[test]
    fn test_line_split_across_reads() {
        let mut framer = SseFramer::new();
        assert!(framer.push(b"da").is_empty());
        assert!(framer.push(b"ta: {\"text\":\"h\xc3").is_empty());
        let frames = framer.push(b"\xa9\"}\r\n");
        assert_eq!(frames, vec![data(None, "{\"text\":\"h\u{e9}\"}")]);
    }

    #[test]
    fn test_bare_error_line() {
        let mut framer = SseFramer::new();
        let frames = framer.push(b"{\"error\":{\"message\":\"boom\"}}\n{\"ok\":true}\n");
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], Frame::Error(v) if v["error"]["message"] == "boom"));
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut framer = SseFramer::new();
        assert!(framer.push(b"data: {\"x\":1}").is_empty());
        assert_eq!(framer.finish(), vec![data(None, "{\"x\":1}")]);
        assert!(framer.finish().is_empty());
    }

    #[test]
    fn test_data_without_space() {
        let mut framer = SseFramer::new();
        assert_eq!(framer.push(b"data:[DONE]\n"), vec![Frame::Done]);
    }
}
