//! Stream decoders for the `OpenAI` family.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;

use super::chat::{WireToolCall, WireUsage};
use crate::error::BifrostError;
use crate::schemas::{ChunkDelta, ModelProvider, Role, Usage, approximate_tokens};
use crate::streaming::{Frame, StreamDecoder, StreamEvent, parse_payload};

fn error_event(provider: &ModelProvider, payload: &Value) -> StreamEvent {
    StreamEvent::Error(BifrostError::from_payload(provider, None, payload))
}

// ============================================================================
// Chat and text completions
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct ChunkChoiceDelta {
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "reasoning")]
    reasoning_content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkChoiceDelta>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    error: Option<Value>,
}

/// Decodes `chat.completion.chunk` and `text_completion` streams.
#[derive(Debug)]
pub(crate) struct ChatStreamDecoder {
    provider: ModelProvider,
    started: bool,
}

impl ChatStreamDecoder {
    pub(crate) const fn new(provider: ModelProvider) -> Self {
        Self {
            provider,
            started: false,
        }
    }

    fn start(&mut self, id: Option<String>, role: Option<Role>, events: &mut Vec<StreamEvent>) {
        if !self.started && (id.is_some() || role.is_some()) {
            self.started = true;
            events.push(StreamEvent::Start { id, role });
        }
    }
}

impl StreamDecoder for ChatStreamDecoder {
    fn decode(&mut self, frame: &Frame) -> Vec<StreamEvent> {
        let Some(chunk) = frame.payload().and_then(parse_payload::<CompletionChunk>) else {
            return Vec::new();
        };
        let mut events = Vec::new();
        if let Some(error) = chunk.error {
            events.push(error_event(&self.provider, &serde_json::json!({ "error": error })));
            return events;
        }

        let first_role = chunk
            .choices
            .first()
            .and_then(|c| c.delta.as_ref())
            .and_then(|d| d.role);
        self.start(chunk.id, first_role, &mut events);

        for choice in chunk.choices {
            let delta = choice.delta.unwrap_or_default();
            if let Some(text) = delta.content.or(choice.text).filter(|t| !t.is_empty()) {
                events.push(StreamEvent::Delta(ChunkDelta::text(text)));
            }
            if let Some(thought) = delta.reasoning_content.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::Delta(ChunkDelta::thought(thought)));
            }
            if let Some(refusal) = delta.refusal.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::Delta(ChunkDelta {
                    refusal: Some(refusal),
                    ..ChunkDelta::default()
                }));
            }
            for (position, call) in delta.tool_calls.into_iter().enumerate() {
                let index = call
                    .index
                    .unwrap_or_else(|| u32::try_from(position).unwrap_or(u32::MAX));
                if call.id.is_some() || call.function.name.is_some() {
                    events.push(StreamEvent::ToolCallStart {
                        index,
                        id: call.id,
                        name: call.function.name.unwrap_or_default(),
                    });
                }
                if let Some(fragment) = call.function.arguments.filter(|a| !a.is_empty()) {
                    events.push(StreamEvent::ToolCallArguments { index, fragment });
                }
            }
            if let Some(reason) = choice.finish_reason {
                events.push(StreamEvent::Finish {
                    reason,
                    authoritative: false,
                });
            }
        }
        if let Some(usage) = chunk.usage {
            events.push(StreamEvent::Usage(usage.into()));
        }
        events
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct ResponsesUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<ResponsesUsage> for Usage {
    fn from(u: ResponsesUsage) -> Self {
        Self::with_total(u.input_tokens, u.output_tokens, u.total_tokens)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    usage: Option<ResponsesUsage>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    incomplete_details: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ItemEnvelope {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponsesEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    output_index: Option<u32>,
    #[serde(default)]
    item: Option<ItemEnvelope>,
    #[serde(default)]
    response: Option<ResponseEnvelope>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Decodes native Responses API event streams.
#[derive(Debug)]
pub(crate) struct ResponsesStreamDecoder {
    provider: ModelProvider,
    saw_function_call: bool,
}

impl ResponsesStreamDecoder {
    pub(crate) const fn new(provider: ModelProvider) -> Self {
        Self {
            provider,
            saw_function_call: false,
        }
    }

    fn finish(&self, response: Option<ResponseEnvelope>, reason: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(usage) = response.and_then(|r| r.usage) {
            events.push(StreamEvent::Usage(usage.into()));
        }
        let reason = if reason == "stop" && self.saw_function_call {
            "tool_calls"
        } else {
            reason
        };
        events.push(StreamEvent::Finish {
            reason: reason.to_owned(),
            authoritative: true,
        });
        events.push(StreamEvent::Done);
        events
    }
}

impl StreamDecoder for ResponsesStreamDecoder {
    fn decode(&mut self, frame: &Frame) -> Vec<StreamEvent> {
        let Some(event) = frame.payload().and_then(parse_payload::<ResponsesEvent>) else {
            return Vec::new();
        };
        match event.kind.as_str() {
            "response.created" => vec![StreamEvent::Start {
                id: event.response.and_then(|r| r.id),
                role: Some(Role::Assistant),
            }],
            "response.output_text.delta" => event
                .delta
                .filter(|d| !d.is_empty())
                .map(|d| StreamEvent::Delta(ChunkDelta::text(d)))
                .into_iter()
                .collect(),
            "response.reasoning_text.delta" | "response.reasoning_summary_text.delta" => event
                .delta
                .filter(|d| !d.is_empty())
                .map(|d| StreamEvent::Delta(ChunkDelta::thought(d)))
                .into_iter()
                .collect(),
            "response.refusal.delta" => event
                .delta
                .map(|d| {
                    StreamEvent::Delta(ChunkDelta {
                        refusal: Some(d),
                        ..ChunkDelta::default()
                    })
                })
                .into_iter()
                .collect(),
            "response.output_item.added" => match event.item {
                Some(item) if item.kind == "function_call" => {
                    self.saw_function_call = true;
                    vec![StreamEvent::ToolCallStart {
                        index: event.output_index.unwrap_or_default(),
                        id: item.call_id,
                        name: item.name.unwrap_or_default(),
                    }]
                }
                _ => Vec::new(),
            },
            "response.function_call_arguments.delta" => event
                .delta
                .filter(|d| !d.is_empty())
                .map(|fragment| StreamEvent::ToolCallArguments {
                    index: event.output_index.unwrap_or_default(),
                    fragment,
                })
                .into_iter()
                .collect(),
            "response.completed" => self.finish(event.response, "stop"),
            "response.incomplete" => self.finish(event.response, "length"),
            "response.failed" => {
                let error = event
                    .response
                    .and_then(|r| r.error.or(r.incomplete_details))
                    .unwrap_or_else(|| serde_json::json!({"message": "response failed"}));
                vec![error_event(&self.provider, &serde_json::json!({ "error": error }))]
            }
            "error" => vec![error_event(
                &self.provider,
                &serde_json::json!({
                    "error": {
                        "message": event.message.unwrap_or_else(|| "stream error".into()),
                        "code": event.code,
                    }
                }),
            )],
            _ => Vec::new(),
        }
    }
}

// ============================================================================
// Audio
// ============================================================================

#[derive(Debug, Deserialize)]
struct AudioEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    audio: Option<String>,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    usage: Option<AudioUsage>,
}

#[derive(Debug, Deserialize)]
struct AudioUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// Decodes `speech.audio.*` streams.
#[derive(Debug)]
pub(crate) struct SpeechStreamDecoder {
    provider: ModelProvider,
}

impl SpeechStreamDecoder {
    pub(crate) const fn new(provider: ModelProvider) -> Self {
        Self { provider }
    }
}

impl StreamDecoder for SpeechStreamDecoder {
    fn decode(&mut self, frame: &Frame) -> Vec<StreamEvent> {
        let Some(event) = frame.payload().and_then(parse_payload::<AudioEvent>) else {
            return Vec::new();
        };
        match event.kind.as_str() {
            "speech.audio.delta" => match event.audio.map(|a| STANDARD.decode(a)) {
                Some(Ok(audio)) => vec![StreamEvent::Delta(ChunkDelta::audio(Bytes::from(audio)))],
                Some(Err(e)) => vec![StreamEvent::Error(BifrostError::unmarshal(
                    &self.provider,
                    200,
                    format!("invalid audio chunk: {e}"),
                ))],
                None => Vec::new(),
            },
            "speech.audio.done" => {
                let mut events = Vec::new();
                if let Some(u) = event.usage {
                    events.push(StreamEvent::Usage(Usage::with_total(
                        u.input_tokens,
                        u.output_tokens,
                        u.total_tokens,
                    )));
                }
                events.push(StreamEvent::Done);
                events
            }
            _ => Vec::new(),
        }
    }
}

/// Decodes `transcript.text.*` streams.
///
/// Usage is approximated from the text when the upstream reports none.
#[derive(Debug)]
pub(crate) struct TranscriptionStreamDecoder {
    text: String,
}

impl TranscriptionStreamDecoder {
    pub(crate) const fn new() -> Self {
        Self {
            text: String::new(),
        }
    }
}

impl StreamDecoder for TranscriptionStreamDecoder {
    fn decode(&mut self, frame: &Frame) -> Vec<StreamEvent> {
        let Some(event) = frame.payload().and_then(parse_payload::<AudioEvent>) else {
            return Vec::new();
        };
        match event.kind.as_str() {
            "transcript.text.delta" => match event.delta.filter(|d| !d.is_empty()) {
                Some(delta) => {
                    self.text.push_str(&delta);
                    vec![StreamEvent::Delta(ChunkDelta::text(delta))]
                }
                None => Vec::new(),
            },
            "transcript.text.done" => {
                let text = event.text.unwrap_or_else(|| std::mem::take(&mut self.text));
                let usage = event.usage.map_or_else(
                    || Usage::new(0, approximate_tokens(&text)),
                    |u| Usage::with_total(u.input_tokens, u.output_tokens, u.total_tokens),
                );
                vec![StreamEvent::Usage(usage), StreamEvent::Done]
            }
            _ => Vec::new(),
        }
    }
}
