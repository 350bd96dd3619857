//! Provider tags, operations and capability sets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Upstream provider tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelProvider {
    /// `OpenAI` API.
    #[serde(rename = "openai")]
    OpenAi,
    /// Azure `OpenAI` deployments.
    #[serde(rename = "azure")]
    Azure,
    /// Anthropic Messages API.
    #[serde(rename = "anthropic")]
    Anthropic,
    /// Anthropic with the caller's raw request forwarded verbatim.
    #[serde(rename = "anthropic_passthrough")]
    AnthropicPassthrough,
    /// AWS Bedrock runtime.
    #[serde(rename = "bedrock")]
    Bedrock,
    /// Google Vertex AI.
    #[serde(rename = "vertex")]
    Vertex,
    /// Google Gemini API.
    #[serde(rename = "gemini")]
    Gemini,
    /// Cohere v2 API.
    #[serde(rename = "cohere")]
    Cohere,
    /// Mistral API.
    #[serde(rename = "mistral")]
    Mistral,
    /// Groq `OpenAI`-compatible API.
    #[serde(rename = "groq")]
    Groq,
    /// Ollama `OpenAI`-compatible API.
    #[serde(rename = "ollama")]
    Ollama,
    /// Cerebras API.
    #[serde(rename = "cerebras")]
    Cerebras,
    /// `OpenRouter` API.
    #[serde(rename = "openrouter")]
    OpenRouter,
    /// Parasail API.
    #[serde(rename = "parasail")]
    Parasail,
    /// `SGLang` server.
    #[serde(rename = "sgl")]
    Sgl,
    /// A custom provider built on one of the above.
    #[serde(untagged)]
    Custom(String),
}

impl ModelProvider {
    /// All built-in providers.
    pub const BUILT_IN: [Self; 15] = [
        Self::OpenAi,
        Self::Azure,
        Self::Anthropic,
        Self::AnthropicPassthrough,
        Self::Bedrock,
        Self::Vertex,
        Self::Gemini,
        Self::Cohere,
        Self::Mistral,
        Self::Groq,
        Self::Ollama,
        Self::Cerebras,
        Self::OpenRouter,
        Self::Parasail,
        Self::Sgl,
    ];

    /// Wire name of the provider.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::OpenAi => "openai",
            Self::Azure => "azure",
            Self::Anthropic => "anthropic",
            Self::AnthropicPassthrough => "anthropic_passthrough",
            Self::Bedrock => "bedrock",
            Self::Vertex => "vertex",
            Self::Gemini => "gemini",
            Self::Cohere => "cohere",
            Self::Mistral => "mistral",
            Self::Groq => "groq",
            Self::Ollama => "ollama",
            Self::Cerebras => "cerebras",
            Self::OpenRouter => "openrouter",
            Self::Parasail => "parasail",
            Self::Sgl => "sgl",
            Self::Custom(name) => name,
        }
    }

    /// Whether calls to this provider can be made without an API key.
    #[must_use]
    pub const fn is_keyless(&self) -> bool {
        matches!(self, Self::Ollama | Self::Sgl)
    }
}

impl fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelProvider {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::BUILT_IN
            .iter()
            .find(|p| p.as_str() == s)
            .cloned()
            .unwrap_or_else(|| Self::Custom(s.to_owned())))
    }
}

/// The closed set of operations every provider façade exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Legacy prompt completion.
    TextCompletion,
    /// Streaming prompt completion.
    TextCompletionStream,
    /// Chat completion.
    ChatCompletion,
    /// Streaming chat completion.
    ChatCompletionStream,
    /// Responses API.
    Responses,
    /// Streaming Responses API.
    ResponsesStream,
    /// Embeddings.
    Embedding,
    /// Text to speech.
    Speech,
    /// Streaming text to speech.
    SpeechStream,
    /// Speech to text.
    Transcription,
    /// Streaming speech to text.
    TranscriptionStream,
    /// Model listing.
    ListModels,
}

impl Operation {
    /// Every operation, in declaration order.
    pub const ALL: [Self; 12] = [
        Self::TextCompletion,
        Self::TextCompletionStream,
        Self::ChatCompletion,
        Self::ChatCompletionStream,
        Self::Responses,
        Self::ResponsesStream,
        Self::Embedding,
        Self::Speech,
        Self::SpeechStream,
        Self::Transcription,
        Self::TranscriptionStream,
        Self::ListModels,
    ];

    /// Snake-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TextCompletion => "text_completion",
            Self::TextCompletionStream => "text_completion_stream",
            Self::ChatCompletion => "chat_completion",
            Self::ChatCompletionStream => "chat_completion_stream",
            Self::Responses => "responses",
            Self::ResponsesStream => "responses_stream",
            Self::Embedding => "embedding",
            Self::Speech => "speech",
            Self::SpeechStream => "speech_stream",
            Self::Transcription => "transcription",
            Self::TranscriptionStream => "transcription_stream",
            Self::ListModels => "list_models",
        }
    }

    /// Human readable name used in error messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::TextCompletion => "text completion",
            Self::TextCompletionStream => "text completion stream",
            Self::ChatCompletion => "chat completion",
            Self::ChatCompletionStream => "chat completion stream",
            Self::Responses => "responses",
            Self::ResponsesStream => "responses stream",
            Self::Embedding => "embedding",
            Self::Speech => "speech",
            Self::SpeechStream => "speech stream",
            Self::Transcription => "transcription",
            Self::TranscriptionStream => "transcription stream",
            Self::ListModels => "list models",
        }
    }

    /// Whether the operation returns a chunk channel.
    #[must_use]
    pub const fn is_streaming(self) -> bool {
        matches!(
            self,
            Self::TextCompletionStream
                | Self::ChatCompletionStream
                | Self::ResponsesStream
                | Self::SpeechStream
                | Self::TranscriptionStream
        )
    }

    /// The non-streaming counterpart of the operation.
    #[must_use]
    pub const fn unary(self) -> Self {
        match self {
            Self::TextCompletionStream => Self::TextCompletion,
            Self::ChatCompletionStream => Self::ChatCompletion,
            Self::ResponsesStream => Self::Responses,
            Self::SpeechStream => Self::Speech,
            Self::TranscriptionStream => Self::Transcription,
            other => other,
        }
    }

    const fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of [`Operation`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u16);

impl Capabilities {
    /// No operations.
    pub const NONE: Self = Self(0);

    /// Every operation.
    pub const ALL: Self = Self::of(&Operation::ALL);

    /// Chat completion, both unary and streaming.
    pub const CHAT: Self = Self::of(&[Operation::ChatCompletion, Operation::ChatCompletionStream]);

    /// Text completion, both unary and streaming.
    pub const TEXT: Self = Self::of(&[Operation::TextCompletion, Operation::TextCompletionStream]);

    /// Responses, both unary and streaming.
    pub const RESPONSES: Self = Self::of(&[Operation::Responses, Operation::ResponsesStream]);

    /// Build a set from a slice of operations.
    #[must_use]
    pub const fn of(operations: &[Operation]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < operations.len() {
            bits |= operations[i].bit();
            i += 1;
        }
        Self(bits)
    }

    /// Add a single operation.
    #[must_use]
    pub const fn with(self, operation: Operation) -> Self {
        Self(self.0 | operation.bit())
    }

    /// Union of two sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether the set contains the operation.
    #[must_use]
    pub const fn contains(self, operation: Operation) -> bool {
        self.0 & operation.bit() != 0
    }

    /// Operations in the set, in declaration order.
    pub fn iter(self) -> impl Iterator<Item = Operation> {
        Operation::ALL.into_iter().filter(move |op| self.contains(*op))
    }
}

impl FromIterator<Operation> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_round_trips_through_str() {
        for provider in ModelProvider::BUILT_IN {
            let parsed: ModelProvider = provider.as_str().parse().unwrap();
            assert_eq!(parsed, provider);
        }
        let custom: ModelProvider = "my-openai".parse().unwrap();
        assert_eq!(custom, ModelProvider::Custom("my-openai".into()));
    }

    #[test]
    fn test_provider_serde_names() {
        let json = serde_json::to_string(&ModelProvider::AnthropicPassthrough).unwrap();
        assert_eq!(json, "\"anthropic_passthrough\"");
        let custom: ModelProvider = serde_json::from_str("\"acme\"").unwrap();
        assert_eq!(custom, ModelProvider::Custom("acme".into()));
    }

    #[test]
    fn test_capabilities() {
        let caps = Capabilities::CHAT.with(Operation::Embedding);
        assert!(caps.contains(Operation::ChatCompletion));
        assert!(caps.contains(Operation::ChatCompletionStream));
        assert!(caps.contains(Operation::Embedding));
        assert!(!caps.contains(Operation::Speech));
        assert_eq!(caps.iter().count(), 3);
        assert_eq!(Capabilities::ALL.iter().count(), 12);
    }

    #[test]
    fn test_operation_unary() {
        assert_eq!(Operation::SpeechStream.unary(), Operation::Speech);
        assert_eq!(Operation::ListModels.unary(), Operation::ListModels);
        assert!(Operation::ResponsesStream.is_streaming());
        assert!(!Operation::Responses.is_streaming());
    }
}
