//! Converse event streams.
//!
//! The AWS event-stream envelope is binary; its JSON payloads are picked
//! out by the brace scanner and carry no event name, so each payload is
//! recognised by the keys it has.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::json;

use super::converse::{WireUsage, finish_reason};
use crate::error::BifrostError;
use crate::providers::common::unix_nanos;
use crate::schemas::{ChunkDelta, ModelProvider, Role, Usage};
use crate::streaming::{Frame, Framing, StreamDecoder, StreamEvent, parse_payload};

/// Top-level keys of Converse stream payloads.
const MARKERS: &[&str] = &[
    "role",
    "delta",
    "start",
    "stopReason",
    "usage",
    "contentBlockIndex",
    "metadata",
    "message",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolUseStart {
    #[serde(default)]
    tool_use_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockStart {
    #[serde(default)]
    tool_use: Option<ToolUseStart>,
}

#[derive(Debug, Deserialize)]
struct ToolUseDelta {
    #[serde(default)]
    input: String,
}

#[derive(Debug, Deserialize)]
struct ReasoningDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockDelta {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    tool_use: Option<ToolUseDelta>,
    #[serde(default)]
    reasoning_content: Option<ReasoningDelta>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    content_block_index: Option<u32>,
    #[serde(default)]
    start: Option<BlockStart>,
    #[serde(default)]
    delta: Option<BlockDelta>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    message: Option<String>,
}

impl Payload {
    fn is_exception(&self) -> bool {
        self.message.is_some()
            && self.role.is_none()
            && self.delta.is_none()
            && self.start.is_none()
            && self.stop_reason.is_none()
            && self.usage.is_none()
    }
}

/// Decodes `/converse-stream` payloads.
#[derive(Debug)]
pub(crate) struct ConverseStreamDecoder {
    provider: ModelProvider,
    tool_indices: HashMap<u32, u32>,
}

impl ConverseStreamDecoder {
    pub(crate) fn new(provider: ModelProvider) -> Self {
        Self {
            provider,
            tool_indices: HashMap::new(),
        }
    }

    fn events(&mut self, payload: Payload) -> Vec<StreamEvent> {
        if payload.is_exception() {
            let message = payload.message.unwrap_or_default();
            return vec![StreamEvent::Error(BifrostError::from_payload(
                &self.provider,
                None,
                &json!({ "message": message }),
            ))];
        }

        let mut events = Vec::new();
        if let Some(role) = payload.role {
            events.push(StreamEvent::Start {
                id: Some(format!("bedrock-{}", unix_nanos())),
                role: Some(role),
            });
        }
        let block = payload.content_block_index.unwrap_or_default();
        if let Some(call) = payload.start.and_then(|s| s.tool_use) {
            let position = u32::try_from(self.tool_indices.len()).unwrap_or(u32::MAX);
            let position = *self.tool_indices.entry(block).or_insert(position);
            events.push(StreamEvent::ToolCallStart {
                index: position,
                id: call.tool_use_id,
                name: call.name.unwrap_or_default(),
            });
        }
        if let Some(delta) = payload.delta {
            if let Some(text) = delta.text.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::Delta(ChunkDelta::text(text)));
            }
            if let Some(text) = delta
                .reasoning_content
                .and_then(|r| r.text)
                .filter(|t| !t.is_empty())
            {
                events.push(StreamEvent::Delta(ChunkDelta::thought(text)));
            }
            if let Some(tool) = delta.tool_use.filter(|t| !t.input.is_empty())
                && let Some(&index) = self.tool_indices.get(&block)
            {
                events.push(StreamEvent::ToolCallArguments {
                    index,
                    fragment: tool.input,
                });
            }
        }
        if let Some(reason) = payload.stop_reason {
            events.push(StreamEvent::Finish {
                reason: finish_reason(&reason),
                authoritative: true,
            });
        }
        // Metadata carries usage and closes the stream.
        if let Some(usage) = payload.usage {
            events.push(StreamEvent::Usage(Usage::from(usage)));
            events.push(StreamEvent::Done);
        }
        events
    }
}

impl StreamDecoder for ConverseStreamDecoder {
    fn framing(&self) -> Framing {
        Framing::Brace(MARKERS)
    }

    fn decode(&mut self, frame: &Frame) -> Vec<StreamEvent> {
        frame
            .payload()
            .and_then(parse_payload::<Payload>)
            .map(|payload| self.events(payload))
            .unwrap_or_default()
    }
}
