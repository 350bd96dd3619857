//! Canonical request types.
//!
//! A [`CanonicalRequest`] is built once by the caller and then read by
//! exactly one request translator. The [`RequestInput`] variant determines
//! which operations the request is valid for.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ModelProvider, Operation};

/// Role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// Developer instructions.
    Developer,
    /// End user.
    User,
    /// Model output.
    Assistant,
    /// Tool result.
    Tool,
}

impl Role {
    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Developer => "developer",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    /// Whether the role carries instructions rather than conversation.
    #[must_use]
    pub const fn is_instruction(self) -> bool {
        matches!(self, Self::System | Self::Developer)
    }
}

/// Image payload of a content block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    /// Remote image URL.
    Url {
        /// The URL.
        url: String,
    },
    /// Inline base64 image.
    Base64 {
        /// MIME type, e.g. `image/png`.
        media_type: String,
        /// Base64 data without a data-URL prefix.
        data: String,
    },
}

impl ImageSource {
    /// Build an image source from a URL, decoding `data:` URLs into base64 parts.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        url.strip_prefix("data:")
            .and_then(|rest| rest.split_once(";base64,"))
            .map_or_else(
                || Self::Url {
                    url: url.to_owned(),
                },
                |(media_type, data)| Self::Base64 {
                    media_type: media_type.to_owned(),
                    data: data.to_owned(),
                },
            )
    }

    /// Render the source as a URL, using a `data:` URL for inline images.
    #[must_use]
    pub fn to_url(&self) -> String {
        match self {
            Self::Url { url } => url.clone(),
            Self::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
        }
    }
}

/// One block of multi-part message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// An image.
    Image {
        /// Image payload.
        source: ImageSource,
    },
}

/// Message content: a plain string or ordered blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text.
    Text(String),
    /// Ordered content blocks.
    Blocks(Vec<ContentBlock>),
}

impl Default for Content {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl Content {
    /// Concatenated text of all text parts.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    ContentBlock::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Content as blocks.
    #[must_use]
    pub fn blocks(&self) -> Vec<ContentBlock> {
        match self {
            Self::Text(t) if t.is_empty() => Vec::new(),
            Self::Text(t) => vec![ContentBlock::Text { text: t.clone() }],
            Self::Blocks(b) => b.clone(),
        }
    }

    /// Whether there is no content at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(t) => t.is_empty(),
            Self::Blocks(b) => b.is_empty(),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier.
    pub id: String,
    /// Function name.
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role.
    pub role: Role,
    /// Message content.
    #[serde(default)]
    pub content: Content,
    /// Tool calls made by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Tool call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Optional author name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    /// Create a message with text content.
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Content::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    /// Create a system message.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Create a user message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Create a tool result message.
    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, text)
        }
    }

    /// Create a user message with content blocks.
    #[must_use]
    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            content: Content::Blocks(blocks),
            ..Self::new(Role::User, "")
        }
    }

    /// Attach tool calls.
    #[must_use]
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

/// A function tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Function name.
    pub name: String,
    /// What the function does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the parameters.
    #[serde(default)]
    pub parameters: Value,
}

/// How the model may use tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// Model decides.
    Auto,
    /// No tools.
    None,
    /// At least one tool.
    Required,
    /// A specific function.
    Function(String),
}

/// Generation parameters shared by all operations.
///
/// Unset fields are omitted from upstream bodies. `extra` carries
/// provider-specific parameters that are merged into the upstream body
/// verbatim (or, for multipart uploads, sent as extra form fields).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Stop sequences.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Presence penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    /// Frequency penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    /// Sampling seed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    /// End-user identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Tools offered to the model.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    /// Tool selection policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Allow parallel tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    /// Structured output format, passed through as JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
    /// Embedding dimensions override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    /// Embedding encoding format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<String>,
    /// Provider-specific extra parameters.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Params {
    /// Set the maximum tokens to generate.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the tools.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    /// Add an extra provider-specific parameter.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Read an extra parameter as an integer.
    #[must_use]
    pub fn extra_u64(&self, key: &str) -> Option<u64> {
        self.extra.get(key).and_then(Value::as_u64)
    }

    /// Read an extra parameter as a string.
    #[must_use]
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// Input of a text completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextInput {
    /// Prompt text.
    pub prompt: String,
}

/// Input of a Responses request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponsesInput {
    /// Top-level instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Conversation items.
    pub messages: Vec<ChatMessage>,
}

/// Input of an embedding request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingInput {
    /// Texts to embed.
    pub texts: Vec<String>,
}

/// Input of a speech request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechInput {
    /// Text to speak.
    pub input: String,
    /// Voice name.
    pub voice: String,
    /// Style instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Audio format, e.g. `mp3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
}

/// Input of a transcription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionInput {
    /// Raw audio bytes.
    #[serde(skip)]
    pub file: Bytes,
    /// File name sent with the upload. Defaults to `audio.mp3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Spoken language hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Prompt to guide the transcript.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Output format, e.g. `json` or `verbose_json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
}

/// Input of a model listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListModelsInput {
    /// Page size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    /// Continuation token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

/// The caller's original request, forwarded by passthrough providers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassthroughRequest {
    /// Original request path, e.g. `/v1/messages`.
    pub path: String,
    /// Original headers.
    pub headers: Vec<(String, String)>,
    /// Original body bytes.
    pub body: Bytes,
}

/// Operation-specific request input.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestInput {
    /// Prompt completion.
    Text(TextInput),
    /// Chat conversation.
    Chat(Vec<ChatMessage>),
    /// Responses conversation.
    Responses(ResponsesInput),
    /// Embedding texts.
    Embedding(EmbeddingInput),
    /// Speech synthesis.
    Speech(SpeechInput),
    /// Audio transcription.
    Transcription(TranscriptionInput),
    /// Model listing.
    ListModels(ListModelsInput),
}

impl RequestInput {
    /// Whether this input can serve the operation.
    #[must_use]
    pub const fn serves(&self, operation: Operation) -> bool {
        matches!(
            (self, operation.unary()),
            (Self::Text(_), Operation::TextCompletion)
                | (Self::Chat(_), Operation::ChatCompletion)
                | (Self::Responses(_), Operation::Responses)
                | (Self::Embedding(_), Operation::Embedding)
                | (Self::Speech(_), Operation::Speech)
                | (Self::Transcription(_), Operation::Transcription)
                | (Self::ListModels(_), Operation::ListModels)
        )
    }

    /// Short name of the variant.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Chat(_) => "chat",
            Self::Responses(_) => "responses",
            Self::Embedding(_) => "embedding",
            Self::Speech(_) => "speech",
            Self::Transcription(_) => "transcription",
            Self::ListModels(_) => "list_models",
        }
    }
}

/// A provider-agnostic request.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRequest {
    /// Target provider.
    pub provider: ModelProvider,
    /// Model identifier.
    pub model: String,
    /// Operation-specific input.
    pub input: RequestInput,
    /// Generation parameters.
    pub params: Params,
    /// Original request for passthrough providers.
    pub passthrough: Option<PassthroughRequest>,
}

impl CanonicalRequest {
    /// Create a request.
    #[must_use]
    pub fn new(provider: ModelProvider, model: impl Into<String>, input: RequestInput) -> Self {
        Self {
            provider,
            model: model.into(),
            input,
            params: Params::default(),
            passthrough: None,
        }
    }

    /// Create a chat request.
    #[must_use]
    pub fn chat(
        provider: ModelProvider,
        model: impl Into<String>,
        messages: Vec<ChatMessage>,
    ) -> Self {
        Self::new(provider, model, RequestInput::Chat(messages))
    }

    /// Create a text completion request.
    #[must_use]
    pub fn text(provider: ModelProvider, model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(
            provider,
            model,
            RequestInput::Text(TextInput {
                prompt: prompt.into(),
            }),
        )
    }

    /// Create an embedding request.
    #[must_use]
    pub fn embedding<I, S>(provider: ModelProvider, model: impl Into<String>, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            provider,
            model,
            RequestInput::Embedding(EmbeddingInput {
                texts: texts.into_iter().map(Into::into).collect(),
            }),
        )
    }

    /// Create a model listing request.
    #[must_use]
    pub fn list_models(provider: ModelProvider) -> Self {
        Self::new(
            provider,
            String::new(),
            RequestInput::ListModels(ListModelsInput::default()),
        )
    }

    /// Replace the parameters.
    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Attach the caller's original request for passthrough mode.
    #[must_use]
    pub fn with_passthrough(mut self, passthrough: PassthroughRequest) -> Self {
        self.passthrough = Some(passthrough);
        self
    }

    /// Chat messages, if this is a chat request.
    #[must_use]
    pub fn messages(&self) -> Option<&[ChatMessage]> {
        match &self.input {
            RequestInput::Chat(m) => Some(m),
            RequestInput::Responses(r) => Some(&r.messages),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_source_from_data_url() {
        let src = ImageSource::from_url("data:image/png;base64,AAAA");
        assert_eq!(
            src,
            ImageSource::Base64 {
                media_type: "image/png".into(),
                data: "AAAA".into()
            }
        );
        assert_eq!(src.to_url(), "data:image/png;base64,AAAA");
        let remote = ImageSource::from_url("https://example.com/cat.png");
        assert!(matches!(remote, ImageSource::Url { .. }));
    }

    #[test]
    fn test_content_text_joins_blocks() {
        let content = Content::Blocks(vec![
            ContentBlock::Text { text: "a".into() },
            ContentBlock::Image {
                source: ImageSource::from_url("https://x/y.png"),
            },
            ContentBlock::Text { text: "b".into() },
        ]);
        assert_eq!(content.text(), "ab");
        assert!(Content::Text(String::new()).blocks().is_empty());
    }

    #[test]
    fn test_input_serves_operation() {
        let chat = RequestInput::Chat(vec![ChatMessage::user("hi")]);
        assert!(chat.serves(Operation::ChatCompletion));
        assert!(chat.serves(Operation::ChatCompletionStream));
        assert!(!chat.serves(Operation::Embedding));
    }

    #[test]
    fn test_params_serialization_skips_unset() {
        let params = Params::default().with_max_tokens(10);
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json, serde_json::json!({"max_tokens": 10}));
    }
}
