//! Chat, text completion, embedding and model-listing wire formats.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::providers::common::{insert_opt, merge_extra, saturating_u32};
use crate::schemas::{
    AssistantMessage, ChatMessage, Choice, Content, ContentBlock, Embedding, ModelInfo, Params,
    Role, Tool, ToolCall, ToolChoice, Usage,
};

// ============================================================================
// Requests
// ============================================================================

/// One canonical message in the chat completions shape.
pub(crate) fn message(message: &ChatMessage) -> Value {
    let mut obj = Map::new();
    obj.insert("role".into(), json!(message.role.as_str()));
    let content = match &message.content {
        Content::Text(text) => json!(text),
        Content::Blocks(blocks) => Value::Array(blocks.iter().map(content_block).collect()),
    };
    if !(message.content.is_empty() && !message.tool_calls.is_empty()) {
        obj.insert("content".into(), content);
    }
    if !message.tool_calls.is_empty() {
        obj.insert(
            "tool_calls".into(),
            Value::Array(message.tool_calls.iter().map(tool_call).collect()),
        );
    }
    insert_opt(&mut obj, "tool_call_id", message.tool_call_id.as_deref());
    insert_opt(&mut obj, "name", message.name.as_deref());
    Value::Object(obj)
}

fn content_block(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({"type": "text", "text": text}),
        ContentBlock::Image { source } => json!({
            "type": "image_url",
            "image_url": {"url": source.to_url()},
        }),
    }
}

fn tool_call(call: &ToolCall) -> Value {
    json!({
        "id": call.id,
        "type": "function",
        "function": {"name": call.name, "arguments": call.arguments},
    })
}

fn tool(tool: &Tool) -> Value {
    let mut function = Map::new();
    function.insert("name".into(), json!(tool.name));
    insert_opt(&mut function, "description", tool.description.as_deref());
    function.insert("parameters".into(), tool.parameters.clone());
    json!({"type": "function", "function": function})
}

pub(crate) fn tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Function(name) => json!({"type": "function", "function": {"name": name}}),
    }
}

/// Sampling and tool parameters shared by chat and text bodies.
pub(crate) fn generation_params(body: &mut Map<String, Value>, params: &Params) {
    insert_opt(body, "temperature", params.temperature);
    insert_opt(body, "top_p", params.top_p);
    insert_opt(body, "max_tokens", params.max_tokens);
    if !params.stop.is_empty() {
        body.insert("stop".into(), json!(params.stop));
    }
    insert_opt(body, "presence_penalty", params.presence_penalty);
    insert_opt(body, "frequency_penalty", params.frequency_penalty);
    insert_opt(body, "seed", params.seed);
    insert_opt(body, "user", params.user.as_deref());
    if !params.tools.is_empty() {
        body.insert(
            "tools".into(),
            Value::Array(params.tools.iter().map(tool).collect()),
        );
    }
    if let Some(choice) = &params.tool_choice {
        body.insert("tool_choice".into(), tool_choice(choice));
    }
    insert_opt(body, "parallel_tool_calls", params.parallel_tool_calls);
    insert_opt(body, "response_format", params.response_format.as_ref());
}

fn stream_flags(body: &mut Map<String, Value>, stream: bool) {
    if stream {
        body.insert("stream".into(), json!(true));
        body.insert("stream_options".into(), json!({"include_usage": true}));
    }
}

/// `/v1/chat/completions` body.
pub(crate) fn chat_body(model: &str, messages: &[ChatMessage], params: &Params, stream: bool) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(model));
    body.insert(
        "messages".into(),
        Value::Array(messages.iter().map(message).collect()),
    );
    generation_params(&mut body, params);
    stream_flags(&mut body, stream);
    merge_extra(&mut body, params);
    Value::Object(body)
}

/// `/v1/completions` body.
pub(crate) fn text_body(model: &str, prompt: &str, params: &Params, stream: bool) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(model));
    body.insert("prompt".into(), json!(prompt));
    generation_params(&mut body, params);
    stream_flags(&mut body, stream);
    merge_extra(&mut body, params);
    Value::Object(body)
}

/// `/v1/embeddings` body.
pub(crate) fn embedding_body(model: &str, texts: &[String], params: &Params) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(model));
    body.insert("input".into(), json!(texts));
    insert_opt(&mut body, "dimensions", params.dimensions);
    insert_opt(&mut body, "encoding_format", params.encoding_format.as_deref());
    insert_opt(&mut body, "user", params.user.as_deref());
    merge_extra(&mut body, params);
    Value::Object(body)
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        Self::with_total(
            saturating_u32(u.prompt_tokens),
            saturating_u32(u.completion_tokens),
            saturating_u32(u.total_tokens),
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireFunction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireToolCall {
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: WireFunction,
}

#[derive(Debug, Default, Deserialize)]
struct WireMessage {
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
struct WireChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    finish_reason: Option<String>,
}

/// A chat or text completion response.
#[derive(Debug, Deserialize)]
pub(crate) struct CompletionResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub created: Option<u64>,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

impl CompletionResponse {
    /// Canonical choices.
    pub(crate) fn take_choices(&mut self) -> Vec<Choice> {
        self.choices
            .drain(..)
            .map(|choice| {
                let message = choice.message.unwrap_or_default();
                Choice {
                    index: choice.index,
                    message: AssistantMessage {
                        role: Some(Role::Assistant),
                        content: message.content.or(choice.text),
                        thought: message.reasoning_content,
                        refusal: message.refusal,
                        tool_calls: message
                            .tool_calls
                            .into_iter()
                            .map(|call| ToolCall {
                                id: call.id.unwrap_or_default(),
                                name: call.function.name.unwrap_or_default(),
                                arguments: call.function.arguments.unwrap_or_default(),
                            })
                            .collect(),
                    },
                    finish_reason: choice.finish_reason,
                }
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireVector {
    Floats(Vec<f32>),
    Base64(String),
}

#[derive(Debug, Deserialize)]
struct WireEmbedding {
    #[serde(default)]
    index: u32,
    embedding: WireVector,
}

/// An embeddings response.
#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingResponse {
    #[serde(default)]
    pub model: Option<String>,
    data: Vec<WireEmbedding>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

impl EmbeddingResponse {
    /// Canonical vectors. Base64 vectors are little-endian `f32`s.
    pub(crate) fn take_embeddings(&mut self) -> Vec<Embedding> {
        self.data
            .drain(..)
            .map(|e| Embedding {
                index: e.index,
                vector: match e.embedding {
                    WireVector::Floats(v) => v,
                    WireVector::Base64(encoded) => decode_vector(&encoded),
                },
            })
            .collect()
    }
}

fn decode_vector(encoded: &str) -> Vec<f32> {
    STANDARD
        .decode(encoded)
        .map(|bytes| {
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct WireModel {
    id: String,
    #[serde(default)]
    owned_by: Option<String>,
    #[serde(default)]
    context_length: Option<u32>,
}

/// A `/v1/models` response.
#[derive(Debug, Deserialize)]
pub(crate) struct ModelsResponse {
    #[serde(default)]
    data: Vec<WireModel>,
}

impl ModelsResponse {
    /// Canonical model list with ids prefixed by `prefix/`.
    pub(crate) fn into_models(self, prefix: &str) -> Vec<ModelInfo> {
        self.data
            .into_iter()
            .map(|m| ModelInfo {
                id: format!("{prefix}/{}", m.id),
                name: Some(m.id),
                owned_by: m.owned_by,
                context_length: m.context_length,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::ImageSource;

    #[test]
    fn test_chat_body_shape() {
        let body = chat_body(
            "gpt-x",
            &[ChatMessage::user("Say hi")],
            &Params::default().with_max_tokens(10),
            false,
        );
        assert_eq!(
            body,
            json!({
                "model": "gpt-x",
                "messages": [{"role": "user", "content": "Say hi"}],
                "max_tokens": 10,
            })
        );
    }

    #[test]
    fn test_stream_body_requests_usage() {
        let body = chat_body("m", &[ChatMessage::user("x")], &Params::default(), true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn test_message_with_image_and_tool_calls() {
        let user = message(&ChatMessage::user_blocks(vec![
            ContentBlock::Text { text: "what".into() },
            ContentBlock::Image {
                source: ImageSource::from_url("data:image/png;base64,AAAA"),
            },
        ]));
        assert_eq!(user["content"][1]["image_url"]["url"], "data:image/png;base64,AAAA");

        let assistant = message(&ChatMessage::assistant("").with_tool_calls(vec![ToolCall {
            id: "call_1".into(),
            name: "lookup".into(),
            arguments: "{}".into(),
        }]));
        assert!(assistant.get("content").is_none());
        assert_eq!(assistant["tool_calls"][0]["function"]["name"], "lookup");

        let tool = message(&ChatMessage::tool("call_1", "42"));
        assert_eq!(tool["tool_call_id"], "call_1");
    }

    #[test]
    fn test_extra_params_are_merged() {
        let params = Params::default().with_extra("logprobs", json!(true));
        let body = chat_body("m", &[ChatMessage::user("x")], &params, false);
        assert_eq!(body["logprobs"], true);
    }

    #[test]
    fn test_completion_response_choices() {
        let mut resp: CompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "model": "gpt-x",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{"id": "c1", "type": "function",
                        "function": {"name": "f", "arguments": "{\"a\":1}"}}]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        }))
        .unwrap();
        let choices = resp.take_choices();
        assert_eq!(choices[0].message.tool_calls[0].arguments, "{\"a\":1}");
        assert_eq!(Usage::from(resp.usage.unwrap()), Usage::new(5, 2));
    }

    #[test]
    fn test_base64_embedding() {
        let encoded = STANDARD.encode(
            [1.0f32, -2.5]
                .iter()
                .flat_map(|f| f.to_le_bytes())
                .collect::<Vec<u8>>(),
        );
        let mut resp: EmbeddingResponse = serde_json::from_value(json!({
            "data": [{"index": 0, "embedding": encoded}]
        }))
        .unwrap();
        assert_eq!(resp.take_embeddings()[0].vector, vec![1.0, -2.5]);
    }
}
