//! `streamGenerateContent?alt=sse` decoding.
//!
//! Every chunk is a complete `GenerateContentResponse`; the stream ends
//! with the body.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde_json::json;

use super::content::{GenerateContentResponse, finish_reason};
use crate::error::BifrostError;
use crate::schemas::{ChunkDelta, ModelProvider, Role, Usage};
use crate::streaming::{Frame, StreamDecoder, StreamEvent, parse_payload};

/// What the stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Chat,
    Speech,
    Transcription,
}

#[derive(Debug)]
pub(crate) struct GeminiStreamDecoder {
    provider: ModelProvider,
    mode: Mode,
    started: bool,
    tool_calls: u32,
}

impl GeminiStreamDecoder {
    pub(crate) const fn new(provider: ModelProvider, mode: Mode) -> Self {
        Self {
            provider,
            mode,
            started: false,
            tool_calls: 0,
        }
    }

    fn chat(&mut self, chunk: &mut GenerateContentResponse, events: &mut Vec<StreamEvent>) {
        if !self.started {
            self.started = true;
            events.push(StreamEvent::Start {
                id: chunk.response_id.take(),
                role: Some(Role::Assistant),
            });
        }
        let Some(candidate) = chunk.candidates.first_mut() else {
            return;
        };
        let mut has_tool_calls = false;
        for part in candidate.content.take().unwrap_or_default().parts {
            match (part.text, part.function_call) {
                (Some(text), _) if text.is_empty() => {}
                (Some(text), _) if part.thought => {
                    events.push(StreamEvent::Delta(ChunkDelta::thought(text)));
                }
                (Some(text), _) => events.push(StreamEvent::Delta(ChunkDelta::text(text))),
                (None, Some(call)) => {
                    has_tool_calls = true;
                    let call = call.into_tool_call();
                    let index = self.tool_calls;
                    self.tool_calls += 1;
                    events.push(StreamEvent::ToolCallStart {
                        index,
                        id: Some(call.id),
                        name: call.name,
                    });
                    events.push(StreamEvent::ToolCallArguments {
                        index,
                        fragment: call.arguments,
                    });
                }
                (None, None) => {}
            }
        }
        if let Some(reason) = candidate.finish_reason.as_deref() {
            events.push(StreamEvent::Finish {
                reason: finish_reason(reason, has_tool_calls || self.tool_calls > 0),
                authoritative: true,
            });
        }
    }

    fn speech(&self, chunk: &GenerateContentResponse, events: &mut Vec<StreamEvent>) {
        let parts = chunk
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map_or(&[][..], |c| c.parts.as_slice());
        for data in parts.iter().filter_map(|p| p.inline_data.as_ref()) {
            match STANDARD.decode(&data.data) {
                Ok(audio) if !audio.is_empty() => {
                    events.push(StreamEvent::Delta(ChunkDelta::audio(Bytes::from(audio))));
                }
                Ok(_) => {}
                Err(e) => events.push(StreamEvent::Error(BifrostError::unmarshal(
                    &self.provider,
                    200,
                    format!("invalid audio chunk: {e}"),
                ))),
            }
        }
    }
}

impl StreamDecoder for GeminiStreamDecoder {
    fn decode(&mut self, frame: &Frame) -> Vec<StreamEvent> {
        let Some(mut chunk) = frame
            .payload()
            .and_then(parse_payload::<GenerateContentResponse>)
        else {
            return Vec::new();
        };
        if let Some(error) = chunk.error.take() {
            return vec![StreamEvent::Error(BifrostError::from_payload(
                &self.provider,
                None,
                &json!({ "error": error }),
            ))];
        }

        let mut events = Vec::new();
        match self.mode {
            Mode::Chat => self.chat(&mut chunk, &mut events),
            Mode::Speech => self.speech(&chunk, &mut events),
            Mode::Transcription => {
                let text = chunk.text();
                if !text.is_empty() {
                    events.push(StreamEvent::Delta(ChunkDelta::text(text)));
                }
            }
        }
        if let Some(usage) = chunk.usage_metadata.take() {
            events.push(StreamEvent::Usage(Usage::from(usage)));
        }
        events
    }
}
