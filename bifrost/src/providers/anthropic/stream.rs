//! Messages API event streams.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use super::messages::{WireUsage, finish_reason};
use crate::error::BifrostError;
use crate::schemas::{ChunkDelta, ModelProvider, Role, Usage};
use crate::streaming::passthrough::TelemetryTap;
use crate::streaming::{Frame, Framing, StreamDecoder, StreamEvent, parse_payload};

#[derive(Debug, Deserialize)]
struct StartMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Event {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockStart {
        index: u32,
        content_block: ContentBlockStart,
    },
    ContentBlockDelta {
        index: u32,
        delta: BlockDelta,
    },
    MessageDelta {
        delta: MessageDelta,
        #[serde(default)]
        usage: Option<WireUsage>,
    },
    MessageStop,
    Error {
        error: Value,
    },
    #[serde(other)]
    Other,
}

/// Decodes `message_start` .. `message_stop` streams.
///
/// Content block indices count text and thinking blocks too, so tool
/// calls are renumbered in the order they start.
#[derive(Debug)]
pub(crate) struct MessagesStreamDecoder {
    provider: ModelProvider,
    tool_indices: HashMap<u32, u32>,
    input_tokens: u32,
}

impl MessagesStreamDecoder {
    pub(crate) fn new(provider: ModelProvider) -> Self {
        Self {
            provider,
            tool_indices: HashMap::new(),
            input_tokens: 0,
        }
    }

    fn events(&mut self, event: Event) -> Vec<StreamEvent> {
        match event {
            Event::MessageStart { message } => {
                let mut events = vec![StreamEvent::Start {
                    id: message.id,
                    role: message.role.or(Some(Role::Assistant)),
                }];
                if let Some(usage) = message.usage {
                    let usage = Usage::from(usage);
                    self.input_tokens = usage.prompt_tokens;
                    events.push(StreamEvent::Usage(usage));
                }
                events
            }
            Event::ContentBlockStart {
                index,
                content_block,
            } if content_block.kind == "tool_use" => {
                let position = u32::try_from(self.tool_indices.len()).unwrap_or(u32::MAX);
                let position = *self.tool_indices.entry(index).or_insert(position);
                vec![StreamEvent::ToolCallStart {
                    index: position,
                    id: content_block.id,
                    name: content_block.name.unwrap_or_default(),
                }]
            }
            Event::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } if !text.is_empty() => {
                    vec![StreamEvent::Delta(ChunkDelta::text(text))]
                }
                BlockDelta::ThinkingDelta { thinking } if !thinking.is_empty() => {
                    vec![StreamEvent::Delta(ChunkDelta::thought(thinking))]
                }
                BlockDelta::InputJsonDelta { partial_json } if !partial_json.is_empty() => self
                    .tool_indices
                    .get(&index)
                    .map(|&position| StreamEvent::ToolCallArguments {
                        index: position,
                        fragment: partial_json,
                    })
                    .into_iter()
                    .collect(),
                _ => Vec::new(),
            },
            Event::MessageDelta { delta, usage } => {
                let mut events = Vec::new();
                if let Some(usage) = usage {
                    let mut usage = Usage::from(usage);
                    if usage.prompt_tokens == 0 {
                        usage = Usage::new(self.input_tokens, usage.completion_tokens);
                    }
                    events.push(StreamEvent::Usage(usage));
                }
                if let Some(reason) = delta.stop_reason {
                    events.push(StreamEvent::Finish {
                        reason: finish_reason(&reason),
                        authoritative: true,
                    });
                }
                events
            }
            Event::MessageStop => vec![StreamEvent::Done],
            Event::Error { error } => vec![StreamEvent::Error(BifrostError::from_payload(
                &self.provider,
                None,
                &serde_json::json!({ "error": error }),
            ))],
            _ => Vec::new(),
        }
    }
}

impl StreamDecoder for MessagesStreamDecoder {
    fn decode(&mut self, frame: &Frame) -> Vec<StreamEvent> {
        frame
            .payload()
            .and_then(parse_payload::<Event>)
            .map(|event| self.events(event))
            .unwrap_or_default()
    }
}

/// Forwards upstream bytes unchanged while reading usage and the
/// finish reason from a copy. Only end of input ends the stream.
#[derive(Debug)]
pub(crate) struct PassthroughDecoder {
    tap: TelemetryTap,
    inner: MessagesStreamDecoder,
}

impl PassthroughDecoder {
    pub(crate) fn new(provider: ModelProvider) -> Self {
        Self {
            tap: TelemetryTap::new(),
            inner: MessagesStreamDecoder::new(provider),
        }
    }
}

impl StreamDecoder for PassthroughDecoder {
    fn framing(&self) -> Framing {
        Framing::Passthrough
    }

    fn decode(&mut self, frame: &Frame) -> Vec<StreamEvent> {
        let Frame::Raw(bytes) = frame else {
            return Vec::new();
        };
        let mut events = vec![StreamEvent::Raw(bytes.clone())];
        for (_, data) in self.tap.observe(bytes) {
            let Some(event) = parse_payload::<Event>(&data) else {
                continue;
            };
            events.extend(self.inner.events(event).into_iter().filter(|e| {
                matches!(e, StreamEvent::Usage(_) | StreamEvent::Finish { .. })
            }));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn event(data: &str) -> Frame {
        Frame::Event {
            event: None,
            data: data.to_owned(),
        }
    }

    #[test]
    fn test_message_stream() {
        let mut decoder = MessagesStreamDecoder::new(ModelProvider::Anthropic);
        let start = decoder.decode(&event(
            r#"{"type":"message_start","message":{"id":"msg_1","role":"assistant","usage":{"input_tokens":12,"output_tokens":1}}}"#,
        ));
        assert!(matches!(&start[0], StreamEvent::Start { id: Some(id), .. } if id == "msg_1"));
        assert!(matches!(&start[1], StreamEvent::Usage(u) if u.prompt_tokens == 12));

        let text = decoder.decode(&event(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        ));
        assert!(matches!(&text[0], StreamEvent::Delta(d) if d.content.as_deref() == Some("Hi")));

        let tool = decoder.decode(&event(
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"tu","name":"f","input":{}}}"#,
        ));
        assert!(matches!(&tool[0], StreamEvent::ToolCallStart { index: 0, .. }));
        let args = decoder.decode(&event(
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"a\":"}}"#,
        ));
        assert!(matches!(&args[0], StreamEvent::ToolCallArguments { index: 0, .. }));

        let delta = decoder.decode(&event(
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":9}}"#,
        ));
        assert!(matches!(&delta[0], StreamEvent::Usage(u) if *u == Usage::new(12, 9)));
        assert!(matches!(&delta[1], StreamEvent::Finish { reason, .. } if reason == "tool_calls"));

        let stop = decoder.decode(&event(r#"{"type":"message_stop"}"#));
        assert!(matches!(stop[0], StreamEvent::Done));
    }

    #[test]
    fn test_error_event() {
        let mut decoder = MessagesStreamDecoder::new(ModelProvider::Anthropic);
        let events = decoder.decode(&event(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        ));
        assert!(matches!(&events[0], StreamEvent::Error(e) if e.message() == "Overloaded"));
    }

    #[test]
    fn test_passthrough_forwards_and_observes() {
        let mut decoder = PassthroughDecoder::new(ModelProvider::AnthropicPassthrough);
        let first = Bytes::from_static(
            b"event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":3}}\n\n",
        );
        let events = decoder.decode(&Frame::Raw(first.clone()));
        assert!(matches!(&events[0], StreamEvent::Raw(b) if *b == first));
        assert!(matches!(&events[1], StreamEvent::Usage(u) if u.completion_tokens == 3));
        assert!(matches!(&events[2], StreamEvent::Finish { reason, .. } if reason == "stop"));
    }
}
