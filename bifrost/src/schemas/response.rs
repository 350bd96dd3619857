//! Canonical response types.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ModelProvider, Operation, Role, ToolCall};

/// Token usage reported for a call or accumulated over a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens.
    pub prompt_tokens: u32,
    /// Output tokens.
    pub completion_tokens: u32,
    /// Total tokens.
    pub total_tokens: u32,
}

impl Usage {
    /// Create usage from input and output counts, deriving the total.
    #[must_use]
    pub const fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    /// Create usage with an explicit total. A zero total is derived.
    #[must_use]
    pub const fn with_total(prompt_tokens: u32, completion_tokens: u32, total_tokens: u32) -> Self {
        let mut usage = Self::new(prompt_tokens, completion_tokens);
        if total_tokens > 0 {
            usage.total_tokens = total_tokens;
        }
        usage
    }

    /// Whether no tokens were recorded.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0 && self.total_tokens == 0
    }

    /// Merge by taking the per-field maximum.
    ///
    /// Streams can report provisional usage before the final figures, so
    /// the running totals never decrease.
    #[must_use]
    pub fn merge_max(self, other: Self) -> Self {
        let prompt_tokens = self.prompt_tokens.max(other.prompt_tokens);
        let completion_tokens = self.completion_tokens.max(other.completion_tokens);
        let total_tokens = self
            .total_tokens
            .max(other.total_tokens)
            .max(prompt_tokens.saturating_add(completion_tokens));
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }
}

impl std::ops::Add for Usage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            prompt_tokens: self.prompt_tokens.saturating_add(rhs.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_add(rhs.completion_tokens),
            total_tokens: self.total_tokens.saturating_add(rhs.total_tokens),
        }
    }
}

/// Approximate a token count for text when a provider does not report one.
///
/// Uses one token per four characters, rounded up.
#[must_use]
pub fn approximate_tokens(text: &str) -> u32 {
    u32::try_from(text.chars().count().div_ceil(4)).unwrap_or(u32::MAX)
}

/// Metadata attached to every response and stream chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraFields {
    /// Operation that produced the response.
    pub request_type: Operation,
    /// Provider that served the call.
    pub provider: ModelProvider,
    /// Model the caller asked for.
    pub model_requested: String,
    /// Latency in milliseconds. For chunks, time since the previous chunk;
    /// for terminal chunks, time since the stream started.
    pub latency_ms: u64,
    /// Chunk index within a stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    /// Raw upstream payload, only when raw responses are enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
    /// Parameters echoed from the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl ExtraFields {
    /// Create extra fields for an operation.
    #[must_use]
    pub fn new(request_type: Operation, provider: ModelProvider, model: impl Into<String>) -> Self {
        Self {
            request_type,
            provider,
            model_requested: model.into(),
            latency_ms: 0,
            chunk_index: None,
            raw_response: None,
            params: None,
        }
    }
}

/// The assistant message of a choice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// Author role, normally assistant.
    pub role: Option<Role>,
    /// Text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Reasoning text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    /// Refusal text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
    /// Requested tool calls.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

/// One completion alternative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Position of the choice.
    pub index: u32,
    /// Generated message.
    pub message: AssistantMessage,
    /// Why generation stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl Choice {
    /// Create a choice with text content.
    #[must_use]
    pub fn text(index: u32, text: impl Into<String>, finish_reason: Option<String>) -> Self {
        Self {
            index,
            message: AssistantMessage {
                role: Some(Role::Assistant),
                content: Some(text.into()),
                ..AssistantMessage::default()
            },
            finish_reason,
        }
    }
}

/// One embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    /// Position of the input text.
    pub index: u32,
    /// The vector.
    pub vector: Vec<f32>,
}

/// Synthesized audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechOutput {
    /// Audio bytes.
    #[serde(skip)]
    pub audio: Bytes,
    /// MIME type or format name, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// A timed transcript segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Segment id.
    #[serde(default)]
    pub id: u32,
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds.
    pub end: f64,
    /// Segment text.
    pub text: String,
}

/// A timed transcript word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptWord {
    /// The word.
    pub word: String,
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds.
    pub end: f64,
}

/// Transcription result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Full transcript text.
    pub text: String,
    /// Detected language.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Audio duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Timed segments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<TranscriptSegment>,
    /// Timed words.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<TranscriptWord>,
}

/// One item of Responses output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    /// Assistant text.
    Message {
        /// Item id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Text content.
        text: String,
    },
    /// A function call.
    FunctionCall {
        /// Call id.
        call_id: String,
        /// Function name.
        name: String,
        /// JSON-encoded arguments.
        arguments: String,
    },
    /// Reasoning summary.
    Reasoning {
        /// Reasoning text.
        text: String,
    },
}

/// Information about one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model id, prefixed with the provider name.
    pub id: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Owning organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owned_by: Option<String>,
    /// Context window in tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u32>,
}

/// Operation-specific response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ResponseOutput {
    /// Chat or text completion choices.
    Choices(Vec<Choice>),
    /// Responses output items.
    Responses(Vec<OutputItem>),
    /// Embedding vectors.
    Embeddings(Vec<Embedding>),
    /// Synthesized audio.
    Speech(SpeechOutput),
    /// Transcript.
    Transcription(Transcript),
    /// Model listing.
    Models {
        /// Models on this page.
        models: Vec<ModelInfo>,
        /// Token for the next page.
        next_page_token: Option<String>,
    },
}

/// A provider-agnostic response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResponse {
    /// Upstream response id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Model reported by the upstream.
    pub model: String,
    /// Creation time, seconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
    /// Operation-specific payload.
    pub output: ResponseOutput,
    /// Token usage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Gateway metadata.
    pub extra_fields: ExtraFields,
}

impl CanonicalResponse {
    /// Create a response with default extra fields.
    #[must_use]
    pub fn new(
        operation: Operation,
        provider: ModelProvider,
        model: impl Into<String>,
        output: ResponseOutput,
    ) -> Self {
        let model = model.into();
        Self {
            id: None,
            extra_fields: ExtraFields::new(operation, provider, model.clone()),
            model,
            created: None,
            output,
            usage: None,
        }
    }

    /// Set the response id.
    #[must_use]
    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    /// Set the usage.
    #[must_use]
    pub const fn with_usage(mut self, usage: Option<Usage>) -> Self {
        self.usage = usage;
        self
    }

    /// Choices of a chat or text response.
    #[must_use]
    pub fn choices(&self) -> &[Choice] {
        match &self.output {
            ResponseOutput::Choices(c) => c,
            _ => &[],
        }
    }

    /// Text of the first choice, or of the first Responses message.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.output {
            ResponseOutput::Choices(c) => c.first().and_then(|c| c.message.content.as_deref()),
            ResponseOutput::Responses(items) => items.iter().find_map(|i| match i {
                OutputItem::Message { text, .. } => Some(text.as_str()),
                _ => None,
            }),
            ResponseOutput::Transcription(t) => Some(&t.text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_merge_max_is_monotonic() {
        let provisional = Usage::new(10, 40);
        let smaller_final = Usage::with_total(10, 12, 22);
        let merged = provisional.merge_max(smaller_final);
        assert_eq!(merged.prompt_tokens, 10);
        assert_eq!(merged.completion_tokens, 40);
        assert_eq!(merged.total_tokens, 50);
    }

    #[test]
    fn test_usage_with_total_derives_zero() {
        assert_eq!(Usage::with_total(5, 2, 0).total_tokens, 7);
        assert_eq!(Usage::with_total(5, 2, 9).total_tokens, 9);
    }

    #[test]
    fn test_approximate_tokens() {
        assert_eq!(approximate_tokens(""), 0);
        assert_eq!(approximate_tokens("abc"), 1);
        assert_eq!(approximate_tokens("abcdefgh"), 2);
        assert_eq!(approximate_tokens("abcdefghi"), 3);
    }

    #[test]
    fn test_response_text() {
        let resp = CanonicalResponse::new(
            Operation::ChatCompletion,
            ModelProvider::OpenAi,
            "gpt-x",
            ResponseOutput::Choices(vec![Choice::text(0, "hi", Some("stop".into()))]),
        );
        assert_eq!(resp.text(), Some("hi"));
        assert_eq!(resp.choices().len(), 1);
        assert_eq!(resp.extra_fields.provider, ModelProvider::OpenAi);
    }
}
