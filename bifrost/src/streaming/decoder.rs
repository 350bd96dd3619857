//! Frames, decoder events and the per-provider decoder seam.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use super::brace::BraceScanner;
use super::passthrough::PassthroughFramer;
use super::sse::SseFramer;
use crate::error::BifrostError;
use crate::schemas::{ChunkDelta, Role, Usage};

/// One complete unit of upstream stream data.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// An SSE `data:` payload with the `event:` type that preceded it.
    Event {
        /// Event type, when the upstream names one.
        event: Option<String>,
        /// Payload.
        data: String,
    },
    /// A JSON object recovered without an outer delimiter.
    Json(String),
    /// Bytes forwarded verbatim.
    Raw(Bytes),
    /// The `[DONE]` sentinel.
    Done,
    /// An error object found outside the normal event framing.
    Error(Value),
}

impl Frame {
    /// JSON payload of the frame, if it carries one.
    #[must_use]
    pub fn payload(&self) -> Option<&str> {
        match self {
            Self::Event { data, .. } | Self::Json(data) => Some(data),
            _ => None,
        }
    }
}

/// How a stream body is cut into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Line-delimited server-sent events.
    Sse,
    /// Balanced-brace JSON accepted when a top-level key matches a marker.
    Brace(&'static [&'static str]),
    /// Raw bytes, one frame per read.
    Passthrough,
}

/// Framer selected by [`Framing`].
#[derive(Debug)]
pub enum FrameReader {
    /// SSE framer.
    Sse(SseFramer),
    /// Brace scanner.
    Brace(BraceScanner),
    /// Passthrough framer.
    Passthrough(PassthroughFramer),
}

impl FrameReader {
    /// Create the framer for a framing rule.
    #[must_use]
    pub fn new(framing: Framing) -> Self {
        match framing {
            Framing::Sse => Self::Sse(SseFramer::new()),
            Framing::Brace(markers) => Self::Brace(BraceScanner::new(markers)),
            Framing::Passthrough => Self::Passthrough(PassthroughFramer),
        }
    }

    /// Feed one read.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        match self {
            Self::Sse(f) => f.push(bytes),
            Self::Brace(f) => f.push(bytes),
            Self::Passthrough(f) => f.push(bytes),
        }
    }

    /// Signal end of input.
    pub fn finish(&mut self) -> Vec<Frame> {
        match self {
            Self::Sse(f) => f.finish(),
            Self::Brace(f) => f.finish(),
            Self::Passthrough(_) => Vec::new(),
        }
    }
}

/// What a decoded frame means for the stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A message started. A role produces a role chunk.
    Start {
        /// Upstream message id.
        id: Option<String>,
        /// Author role.
        role: Option<Role>,
    },
    /// Content, reasoning, refusal or audio fragment.
    Delta(ChunkDelta),
    /// A tool call began.
    ToolCallStart {
        /// Position of the call in the message.
        index: u32,
        /// Call id.
        id: Option<String>,
        /// Function name.
        name: String,
    },
    /// A fragment of tool call arguments.
    ToolCallArguments {
        /// Position of the call in the message.
        index: u32,
        /// Argument fragment.
        fragment: String,
    },
    /// A finish reason.
    ///
    /// The first reason seen is kept; an authoritative one replaces it.
    Finish {
        /// Canonical finish reason.
        reason: String,
        /// Whether this overrides an earlier reason.
        authoritative: bool,
    },
    /// Running or final usage.
    Usage(Usage),
    /// Bytes to forward unchanged.
    Raw(Bytes),
    /// Clean end of stream.
    Done,
    /// The upstream reported an error.
    Error(BifrostError),
}

/// Per-provider, per-stream frame interpreter.
///
/// A decoder is owned by exactly one stream task and is never shared, so
/// it may keep whatever state its protocol needs (tool call indices,
/// pending item ids).
pub trait StreamDecoder: Send + std::fmt::Debug {
    /// How this provider's stream body is framed.
    fn framing(&self) -> Framing {
        Framing::Sse
    }

    /// Interpret one frame.
    ///
    /// Frames that are valid but unrecognized produce no events.
    fn decode(&mut self, frame: &Frame) -> Vec<StreamEvent>;
}

/// Parse a frame payload, logging and skipping it on failure.
pub fn parse_payload<T: DeserializeOwned>(data: &str) -> Option<T> {
    match serde_json::from_str(data) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "skipping unparsable stream frame");
            None
        }
    }
}
