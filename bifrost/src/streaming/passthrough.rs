//! Raw passthrough framing.
//!
//! Every read is forwarded as one frame, byte for byte. [`TelemetryTap`]
//! lets a decoder look at a copy of the same bytes as SSE events without
//! touching what is forwarded.

use bytes::Bytes;

use super::Frame;
use super::sse::SseFramer;

/// Forwards each read verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughFramer;

impl PassthroughFramer {
    /// Wrap one read as a raw frame. Empty reads produce nothing.
    #[must_use]
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        if bytes.is_empty() {
            Vec::new()
        } else {
            vec![Frame::Raw(Bytes::copy_from_slice(bytes))]
        }
    }
}

/// Side-channel SSE parser over forwarded bytes.
#[derive(Debug, Default)]
pub struct TelemetryTap {
    framer: SseFramer,
}

impl TelemetryTap {
    /// Create an empty tap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe a forwarded read and return the events it completes.
    pub fn observe(&mut self, bytes: &[u8]) -> Vec<(Option<String>, String)> {
        self.framer
            .push(bytes)
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Event { event, data } => Some((event, data)),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_forwards_verbatim() {
        let mut framer = PassthroughFramer;
        let frames = framer.push(b"event: x\ndata: {not json");
        assert_eq!(
            frames,
            vec![Frame::Raw(Bytes::from_static(b"event: x\ndata: {not json"))]
        );
        assert!(framer.push(b"").is_empty());
    }

    #[test]
    fn test_tap_sees_events_across_reads() {
        let mut tap = TelemetryTap::new();
        assert!(tap.observe(b"event: message_delta\nda").is_empty());
        let events = tap.observe(b"ta: {\"usage\":{}}\n\n");
        assert_eq!(
            events,
            vec![(Some("message_delta".to_owned()), "{\"usage\":{}}".to_owned())]
        );
    }
}
