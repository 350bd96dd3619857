//! Canonical stream chunks.

use bytes::Bytes;
use serde::Serialize;

use super::{ExtraFields, Role, Usage};
use crate::error::BifrostError;

/// An incremental tool call fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ToolCallDelta {
    /// Position of the tool call within the message.
    pub index: u32,
    /// Call id, present on the first fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Function name, present on the first fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Argument fragment. Consumers concatenate fragments in order.
    pub arguments: String,
}

/// Content carried by a non-terminal chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChunkDelta {
    /// Author role, on the first chunk of a message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Text fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Reasoning fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    /// Refusal fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
    /// Tool call fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallDelta>,
    /// Audio fragment.
    #[serde(skip)]
    pub audio: Option<Bytes>,
    /// Upstream bytes forwarded verbatim in passthrough mode.
    #[serde(skip)]
    pub raw: Option<Bytes>,
}

impl ChunkDelta {
    /// A text fragment.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::default()
        }
    }

    /// A reasoning fragment.
    #[must_use]
    pub fn thought(text: impl Into<String>) -> Self {
        Self {
            thought: Some(text.into()),
            ..Self::default()
        }
    }

    /// A role marker.
    #[must_use]
    pub fn role(role: Role) -> Self {
        Self {
            role: Some(role),
            ..Self::default()
        }
    }

    /// An audio fragment.
    #[must_use]
    pub fn audio(audio: Bytes) -> Self {
        Self {
            audio: Some(audio),
            ..Self::default()
        }
    }

    /// A raw passthrough fragment.
    #[must_use]
    pub fn raw(raw: Bytes) -> Self {
        Self {
            raw: Some(raw),
            ..Self::default()
        }
    }
}

/// Summary carried by the success-terminal chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    /// Accumulated usage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Final finish reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// What a chunk carries.
#[derive(Debug, Clone)]
pub enum ChunkKind {
    /// Content or tool-call fragment.
    Delta(ChunkDelta),
    /// Success terminal.
    Done(StreamSummary),
    /// Error terminal.
    Error(BifrostError),
}

/// The unit flowing through a stream channel.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    /// Upstream message id, once seen.
    pub id: Option<String>,
    /// Model the stream serves.
    pub model: String,
    /// Payload.
    pub kind: ChunkKind,
    /// Gateway metadata. `chunk_index` is always set.
    pub extra_fields: ExtraFields,
}

impl StreamChunk {
    /// Whether this is a success or error terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.kind, ChunkKind::Done(_) | ChunkKind::Error(_))
    }

    /// The chunk index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.extra_fields.chunk_index.unwrap_or_default()
    }

    /// The delta, for content chunks.
    #[must_use]
    pub const fn delta(&self) -> Option<&ChunkDelta> {
        match &self.kind {
            ChunkKind::Delta(d) => Some(d),
            _ => None,
        }
    }

    /// The summary, for success terminals.
    #[must_use]
    pub const fn summary(&self) -> Option<&StreamSummary> {
        match &self.kind {
            ChunkKind::Done(s) => Some(s),
            _ => None,
        }
    }

    /// The error, for error terminals.
    #[must_use]
    pub const fn error(&self) -> Option<&BifrostError> {
        match &self.kind {
            ChunkKind::Error(e) => Some(e),
            _ => None,
        }
    }
}
