//! Balanced-brace JSON extraction for undelimited byte streams.
//!
//! AWS event-stream bodies interleave binary preludes, headers and CRCs
//! with JSON payloads. Payloads are recovered by tracking brace depth and
//! string state. A candidate span becomes a frame only when it parses as a
//! JSON object whose top-level keys include one of the expected markers.
//! A candidate is abandoned as soon as it holds a control byte JSON cannot
//! contain or outgrows [`MAX_CANDIDATE_BYTES`], and a rejected or abandoned
//! candidate is rescanned from the byte after its opening brace.

use serde_json::{Map, Value};
use tracing::{debug, trace};

use super::Frame;

/// Candidates longer than this are abandoned.
pub const MAX_CANDIDATE_BYTES: usize = 1 << 20;

/// Control bytes other than JSON whitespace never occur in a JSON text,
/// quoted or not. Event-stream length prefixes always contain them.
const fn is_foreign(byte: u8) -> bool {
    byte < 0x20 && !matches!(byte, b'\t' | b'\n' | b'\r')
}

/// Incremental balanced-brace scanner.
#[derive(Debug)]
pub struct BraceScanner {
    buffer: Vec<u8>,
    markers: &'static [&'static str],
    pos: usize,
    start: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl BraceScanner {
    /// Create a scanner accepting objects with any of the given top-level keys.
    #[must_use]
    pub const fn new(markers: &'static [&'static str]) -> Self {
        Self {
            buffer: Vec::new(),
            markers,
            pos: 0,
            start: 0,
            depth: 0,
            in_string: false,
            escaped: false,
        }
    }

    /// Bytes held back for the next read.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one read and return every frame it completes.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(bytes);
        self.scan()
    }

    /// Drop whatever incomplete data remains at end of input.
    pub fn finish(&mut self) -> Vec<Frame> {
        if !self.buffer.is_empty() {
            debug!(bytes = self.buffer.len(), "discarding incomplete trailing data");
            self.buffer.clear();
        }
        self.pos = 0;
        self.start = 0;
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
        Vec::new()
    }

    fn scan(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();

        while self.pos < self.buffer.len() {
            let byte = self.buffer[self.pos];

            if self.depth == 0 {
                if byte == b'{' {
                    let next = self.buffer[self.pos + 1..]
                        .iter()
                        .find(|b| !b.is_ascii_whitespace());
                    match next {
                        None => break,
                        Some(b'"' | b'}') => {
                            self.start = self.pos;
                            self.depth = 1;
                        }
                        Some(_) => {}
                    }
                }
                self.pos += 1;
                continue;
            }

            if is_foreign(byte) || self.pos - self.start >= MAX_CANDIDATE_BYTES {
                trace!(offset = self.start, "abandoning brace candidate");
                self.restart_after_candidate();
                continue;
            }

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                self.pos += 1;
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        let end = self.pos + 1;
                        if let Some(frame) = self.accept(&self.buffer[self.start..end]) {
                            frames.push(frame);
                        } else {
                            self.restart_after_candidate();
                            continue;
                        }
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }

        let keep_from = if self.depth > 0 { self.start } else { self.pos };
        if keep_from > 0 {
            self.buffer.drain(..keep_from);
            self.pos -= keep_from;
            self.start = self.start.saturating_sub(keep_from);
        }
        frames
    }

    /// Resume scanning at the byte after the current candidate's opening brace.
    fn restart_after_candidate(&mut self) {
        self.pos = self.start + 1;
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }

    fn accept(&self, candidate: &[u8]) -> Option<Frame> {
        let object = match serde_json::from_slice::<Map<String, Value>>(candidate) {
            Ok(object) => object,
            Err(e) => {
                trace!(error = %e, "rejecting brace candidate");
                return None;
            }
        };
        if !self.markers.iter().any(|m| object.contains_key(*m)) {
            trace!("rejecting brace candidate without markers");
            return None;
        }
        String::from_utf8(candidate.to_vec()).ok().map(Frame::Json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKERS: &[&str] = &["delta", "usage", "stopReason"];

    fn payloads(frames: &[Frame]) -> Vec<String> {
        frames
            .iter()
            .map(|f| match f {
                Frame::Json(s) => s.clone(),
                other => panic!("unexpected frame {other:?}"),
            })
            .collect()
    }

    fn body() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(b"\x00\x00\x00\x9b\x00\x00\x00K{\x8a:event-type\x07\x00\x11contentBlockDelta");
        body.extend_from_slice(br#"{"contentBlockIndex":0,"delta":{"text":"He said \"}{\" ok"},"p":"ab"}"#);
        body.extend_from_slice(b"\x12\x34\"\x56\x00\x00\x00\x55");
        body.extend_from_slice(br#"{"p":"xyz","noise":{"a":1}}"#);
        body.extend_from_slice(br#"{"stopReason":"end_turn"}"#);
        body.extend_from_slice(b"\xde\xad{");
        body.extend_from_slice(br#"{"usage":{"inputTokens":3,"outputTokens":4,"totalTokens":7}}"#);
        body.extend_from_slice(b"\xbe\xef");
        body
    }

    #[test]
    fn test_extracts_frames_from_binary_noise() {
        let mut scanner = BraceScanner::new(MARKERS);
        let frames = payloads(&scanner.push(&body()));
        assert_eq!(frames.len(), 3);
        assert!(frames[0].contains("He said"));
        assert_eq!(frames[1], r#"{"stopReason":"end_turn"}"#);
        assert!(frames[2].starts_with(r#"{"usage""#));
    }

    #[test]
    fn test_any_split_point_yields_same_frames() {
        let body = body();
        let whole = payloads(&BraceScanner::new(MARKERS).push(&body));
        for split in 0..=body.len() {
            let mut scanner = BraceScanner::new(MARKERS);
            let mut frames = scanner.push(&body[..split]);
            frames.extend(scanner.push(&body[split..]));
            assert_eq!(payloads(&frames), whole, "split at {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let body = body();
        let whole = payloads(&BraceScanner::new(MARKERS).push(&body));
        let mut scanner = BraceScanner::new(MARKERS);
        let frames: Vec<Frame> = body.iter().flat_map(|b| scanner.push(&[*b])).collect();
        assert_eq!(payloads(&frames), whole);
    }

    /// One event-stream message: prelude, `:event-type` header, payload, CRC.
    fn message(payload: &str) -> Vec<u8> {
        let headers: &[u8] = b"\x0b:event-type\x07\x00\x11contentBlockDelta";
        let total = 12 + headers.len() + payload.len() + 4;
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&u32::try_from(total).unwrap().to_be_bytes());
        out.extend_from_slice(&u32::try_from(headers.len()).unwrap().to_be_bytes());
        out.extend_from_slice(&[0xa1, 0xb2, 0xc3, 0xd4]);
        out.extend_from_slice(headers);
        out.extend_from_slice(payload.as_bytes());
        out.extend_from_slice(&[0xe5, 0xf6, 0x07, 0x18]);
        out
    }

    fn event_stream() -> (Vec<u8>, Vec<String>) {
        let mut payloads: Vec<String> = (0..20)
            .map(|i| format!(r#"{{"contentBlockIndex":0,"delta":{{"text":"t{i}"}},"p":"abcd"}}"#))
            .collect();
        payloads.push(r#"{"metrics":{"latencyMs":9},"usage":{"inputTokens":3,"outputTokens":20}}"#.to_owned());
        let body = payloads.iter().flat_map(|p| message(p)).collect();
        (body, payloads)
    }

    #[test]
    fn test_noise_braces_in_framing_do_not_swallow_frames() {
        let (clean, expected) = event_stream();
        let first = message(&expected[0]).len();
        let framing = (0..11).chain(first - 4..first - 1);
        for noise in [b"{\"", b"{}"] {
            for offset in framing.clone() {
                let mut body = clean.clone();
                body[offset..offset + 2].copy_from_slice(noise);
                let frames = payloads(&BraceScanner::new(MARKERS).push(&body));
                assert_eq!(frames, expected, "noise {noise:?} at {offset}");
            }
        }
    }

    #[test]
    fn test_noise_brace_with_split_reads() {
        let (mut body, expected) = event_stream();
        body[2..4].copy_from_slice(b"{\"");
        for split in 0..=body.len() {
            let mut scanner = BraceScanner::new(MARKERS);
            let mut frames = scanner.push(&body[..split]);
            frames.extend(scanner.push(&body[split..]));
            assert_eq!(payloads(&frames), expected, "split at {split}");
        }
    }

    #[test]
    fn test_oversized_candidate_is_abandoned() {
        let mut scanner = BraceScanner::new(MARKERS);
        let mut body = br#"{"delta":""#.to_vec();
        body.resize(MAX_CANDIDATE_BYTES + 16, b'x');
        assert!(scanner.push(&body).is_empty());
        assert!(scanner.pending() < 16);
        let frames = scanner.push(br#"{"stopReason":"end_turn"}"#);
        assert_eq!(payloads(&frames), vec![r#"{"stopReason":"end_turn"}"#.to_owned()]);
    }

    #[test]
    fn test_noise_between_frames_is_not_retained() {
        let mut scanner = BraceScanner::new(MARKERS);
        scanner.push(&[0xab; 4096]);
        assert_eq!(scanner.pending(), 0);
    }

    #[test]
    fn test_retains_incomplete_frame() {
        let mut scanner = BraceScanner::new(MARKERS);
        assert!(scanner.push(br#"{"delta":{"text":"par"#).is_empty());
        assert!(scanner.pending() > 0);
        let frames = scanner.push(br#"tial"}}"#);
        assert_eq!(payloads(&frames), vec![r#"{"delta":{"text":"partial"}}"#.to_owned()]);
        assert_eq!(scanner.pending(), 0);
    }
}
