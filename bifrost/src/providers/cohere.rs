//! Cohere v2 chat and embed APIs.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::common::{
    chat_messages, embedding_texts, insert_opt, merge_extra, mismatch, parse_json, post_json,
    unix_secs,
};
use super::{DecoderFactory, ProviderParts, RequestTranslator, ResponseTranslator, Target};
use crate::auth::ApiKeyAuth;
use crate::error::{BifrostError, Result};
use crate::schemas::{
    AssistantMessage, CanonicalRequest, CanonicalResponse, Capabilities, ChatMessage, Choice,
    ChunkDelta, ContentBlock, Embedding, ModelInfo, ModelProvider, Operation, Params, RequestInput,
    ResponseOutput, Role, ToolCall, ToolChoice, Usage,
};
use crate::streaming::{Frame, StreamDecoder, StreamEvent, parse_payload};
use crate::transport::{HttpRequest, HttpResponse};

const CAPABILITIES: Capabilities = Capabilities::CHAT
    .with(Operation::Embedding)
    .with(Operation::ListModels);

/// Strategies for [`ModelProvider::Cohere`].
#[must_use]
pub fn parts() -> ProviderParts {
    ProviderParts::uniform(
        CAPABILITIES,
        Arc::new(ApiKeyAuth::bearer()),
        CohereDialect,
    )
    .with_responses_via_chat()
}

fn finish_reason(reason: &str) -> String {
    match reason {
        "COMPLETE" | "STOP_SEQUENCE" => "stop",
        "MAX_TOKENS" => "length",
        "TOOL_CALL" => "tool_calls",
        "ERROR" => "error",
        other => return other.to_ascii_lowercase(),
    }
    .to_owned()
}

fn message(message: &ChatMessage) -> Value {
    let mut out = Map::new();
    let role = match message.role {
        Role::Developer => Role::System,
        role => role,
    };
    out.insert("role".into(), json!(role.as_str()));
    let blocks = message.content.blocks();
    let content = if blocks.iter().all(|b| matches!(b, ContentBlock::Text { .. })) {
        json!(message.content.text())
    } else {
        let blocks: Vec<Value> = blocks
            .into_iter()
            .map(|block| match block {
                ContentBlock::Text { text } => json!({"type": "text", "text": text}),
                ContentBlock::Image { source } => {
                    json!({"type": "image_url", "image_url": {"url": source.to_url()}})
                }
            })
            .collect();
        Value::Array(blocks)
    };
    out.insert("content".into(), content);
    if !message.tool_calls.is_empty() {
        let calls: Vec<Value> = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments},
                })
            })
            .collect();
        out.insert("tool_calls".into(), Value::Array(calls));
    }
    insert_opt(&mut out, "tool_call_id", message.tool_call_id.as_deref());
    Value::Object(out)
}

fn chat_body(model: &str, messages: &[ChatMessage], params: &Params, stream: bool) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(model));
    body.insert(
        "messages".into(),
        Value::Array(messages.iter().map(message).collect()),
    );
    insert_opt(&mut body, "max_tokens", params.max_tokens);
    insert_opt(&mut body, "temperature", params.temperature);
    insert_opt(&mut body, "p", params.top_p);
    insert_opt(&mut body, "seed", params.seed);
    insert_opt(&mut body, "frequency_penalty", params.frequency_penalty);
    insert_opt(&mut body, "presence_penalty", params.presence_penalty);
    if !params.stop.is_empty() {
        body.insert("stop_sequences".into(), json!(params.stop));
    }
    if !params.tools.is_empty() {
        let tools: Vec<Value> = params
            .tools
            .iter()
            .map(|tool| {
                let mut function = Map::new();
                function.insert("name".into(), json!(tool.name));
                insert_opt(&mut function, "description", tool.description.as_deref());
                function.insert("parameters".into(), tool.parameters.clone());
                json!({"type": "function", "function": function})
            })
            .collect();
        body.insert("tools".into(), Value::Array(tools));
    }
    match &params.tool_choice {
        Some(ToolChoice::Required | ToolChoice::Function(_)) => {
            body.insert("tool_choice".into(), json!("REQUIRED"));
        }
        Some(ToolChoice::None) => {
            body.insert("tool_choice".into(), json!("NONE"));
        }
        Some(ToolChoice::Auto) | None => {}
    }
    if stream {
        body.insert("stream".into(), json!(true));
    }
    merge_extra(&mut body, params);
    Value::Object(body)
}

fn embed_body(model: &str, texts: &[String], params: &Params) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(model));
    body.insert("texts".into(), json!(texts));
    body.insert(
        "input_type".into(),
        json!(params.extra_str("input_type").unwrap_or("search_document")),
    );
    body.insert("embedding_types".into(), json!(["float"]));
    insert_opt(&mut body, "output_dimension", params.dimensions);
    merge_extra(&mut body, params);
    Value::Object(body)
}

#[derive(Debug, Default, Deserialize)]
struct Tokens {
    #[serde(default)]
    input_tokens: f64,
    #[serde(default)]
    output_tokens: f64,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    tokens: Option<Tokens>,
    #[serde(default)]
    billed_units: Option<Tokens>,
}

impl From<WireUsage> for Usage {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn from(u: WireUsage) -> Self {
        let tokens = u.tokens.or(u.billed_units).unwrap_or_default();
        Self::new(tokens.input_tokens as u32, tokens.output_tokens as u32)
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunction>,
}

#[derive(Debug, Deserialize)]
struct WireBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Blocks(Vec<WireBlock>),
    Block(WireBlock),
}

impl WireContent {
    fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Blocks(blocks) => blocks.into_iter().filter_map(|b| b.text).collect(),
            Self::Block(block) => block.text.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireMessage {
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    content: Option<WireContent>,
    #[serde(default)]
    tool_plan: Option<String>,
    #[serde(default)]
    tool_calls: Option<ToolCalls>,
}

/// Whole messages carry a list; stream deltas carry a single call.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ToolCalls {
    Many(Vec<WireToolCall>),
    One(WireToolCall),
}

impl ToolCalls {
    fn into_vec(self) -> Vec<WireToolCall> {
        match self {
            Self::Many(calls) => calls,
            Self::One(call) => vec![call],
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

impl ChatResponse {
    fn take_choice(&mut self) -> Choice {
        let message = self.message.take().unwrap_or_default();
        let tool_calls: Vec<ToolCall> = message
            .tool_calls
            .map(ToolCalls::into_vec)
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                let function = call.function.unwrap_or_default();
                ToolCall {
                    id: call.id.unwrap_or_default(),
                    name: function.name.unwrap_or_default(),
                    arguments: function.arguments.unwrap_or_default(),
                }
            })
            .collect();
        let text = message.content.map(WireContent::into_text).unwrap_or_default();
        Choice {
            index: 0,
            message: AssistantMessage {
                role: Some(Role::Assistant),
                content: (!text.is_empty() || tool_calls.is_empty()).then_some(text),
                thought: message.tool_plan.filter(|p| !p.is_empty()),
                refusal: None,
                tool_calls,
            },
            finish_reason: self.finish_reason.as_deref().map(finish_reason),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddingsByType {
    #[serde(default)]
    float: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct EmbedMeta {
    #[serde(default)]
    billed_units: Option<Tokens>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    embeddings: EmbeddingsByType,
    #[serde(default)]
    meta: Option<EmbedMeta>,
}

#[derive(Debug, Deserialize)]
struct WireModel {
    name: String,
    #[serde(default)]
    context_length: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ModelsPage {
    #[serde(default)]
    models: Vec<WireModel>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// The Cohere wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct CohereDialect;

impl RequestTranslator for CohereDialect {
    fn translate(&self, target: &Target<'_>, request: &CanonicalRequest) -> Result<HttpRequest> {
        let provider = target.provider;
        match (target.operation, &request.input) {
            (Operation::ChatCompletion | Operation::ChatCompletionStream, _) => {
                let messages = chat_messages(provider, target.operation, request)?;
                let body = chat_body(&request.model, messages, &request.params, target.streaming());
                post_json(provider, target.url("/v2/chat")?, &body)
            }
            (Operation::Embedding, _) => {
                let texts = embedding_texts(provider, request)?;
                let body = embed_body(&request.model, texts, &request.params);
                post_json(provider, target.url("/v2/embed")?, &body)
            }
            (Operation::ListModels, RequestInput::ListModels(input)) => {
                let mut query = url::form_urlencoded::Serializer::new(String::new());
                query.append_pair("endpoint", "chat");
                if let Some(size) = input.page_size {
                    query.append_pair("page_size", &size.to_string());
                }
                if let Some(token) = &input.page_token {
                    query.append_pair("page_token", token);
                }
                Ok(HttpRequest::get(
                    target.url(&format!("/v1/models?{}", query.finish()))?,
                ))
            }
            (_, input) => Err(mismatch(provider, target.operation, input)),
        }
    }
}

impl ResponseTranslator for CohereDialect {
    fn translate(
        &self,
        target: &Target<'_>,
        request: &CanonicalRequest,
        response: &HttpResponse,
    ) -> Result<CanonicalResponse> {
        let provider = target.provider;
        let operation = target.operation;
        let mut canonical = match operation {
            Operation::Embedding => {
                let body: EmbedResponse = parse_json(provider, response)?;
                let usage = body
                    .meta
                    .and_then(|m| m.billed_units)
                    .map(|tokens| Usage::from(WireUsage {
                        tokens: Some(tokens),
                        billed_units: None,
                    }));
                let embeddings = (0u32..)
                    .zip(body.embeddings.float)
                    .map(|(index, vector)| Embedding { index, vector })
                    .collect();
                CanonicalResponse::new(
                    operation,
                    provider.clone(),
                    request.model.clone(),
                    ResponseOutput::Embeddings(embeddings),
                )
                .with_id(body.id)
                .with_usage(usage)
            }
            Operation::ListModels => {
                let page: ModelsPage = parse_json(provider, response)?;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let models = page
                    .models
                    .into_iter()
                    .map(|m| ModelInfo {
                        id: format!("{}/{}", provider.as_str(), m.name),
                        name: Some(m.name),
                        owned_by: Some("cohere".to_owned()),
                        context_length: m.context_length.map(|c| c as u32),
                    })
                    .collect();
                return Ok(CanonicalResponse::new(
                    operation,
                    provider.clone(),
                    request.model.clone(),
                    ResponseOutput::Models {
                        models,
                        next_page_token: page.next_page_token.filter(|t| !t.is_empty()),
                    },
                ));
            }
            _ => {
                let mut body: ChatResponse = parse_json(provider, response)?;
                let choice = body.take_choice();
                CanonicalResponse::new(
                    operation,
                    provider.clone(),
                    request.model.clone(),
                    ResponseOutput::Choices(vec![choice]),
                )
                .with_id(body.id.take())
                .with_usage(body.usage.take().map(Usage::from))
            }
        };
        canonical.created = Some(unix_secs());
        Ok(canonical)
    }
}

impl DecoderFactory for CohereDialect {
    fn decoder(&self, target: &Target<'_>, _request: &CanonicalRequest) -> Box<dyn StreamDecoder> {
        Box::new(ChatStreamDecoder::new(target.provider.clone()))
    }
}

#[derive(Debug, Default, Deserialize)]
struct EventDelta {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    delta: Option<EventDelta>,
}

/// Decodes `/v2/chat` event streams. `message-end` closes the stream.
#[derive(Debug)]
pub(crate) struct ChatStreamDecoder {
    provider: ModelProvider,
    tool_calls: u32,
}

impl ChatStreamDecoder {
    pub(crate) const fn new(provider: ModelProvider) -> Self {
        Self {
            provider,
            tool_calls: 0,
        }
    }
}

impl StreamDecoder for ChatStreamDecoder {
    fn decode(&mut self, frame: &Frame) -> Vec<StreamEvent> {
        let Some(event) = frame.payload().and_then(parse_payload::<Event>) else {
            return Vec::new();
        };
        let delta = event.delta.unwrap_or_default();
        let message = delta.message.unwrap_or_default();
        match event.kind.as_str() {
            "message-start" => vec![StreamEvent::Start {
                id: event.id,
                role: message.role.or(Some(Role::Assistant)),
            }],
            "content-delta" => message
                .content
                .map(WireContent::into_text)
                .filter(|t| !t.is_empty())
                .map(|t| StreamEvent::Delta(ChunkDelta::text(t)))
                .into_iter()
                .collect(),
            "tool-plan-delta" => message
                .tool_plan
                .filter(|t| !t.is_empty())
                .map(|t| StreamEvent::Delta(ChunkDelta::thought(t)))
                .into_iter()
                .collect(),
            "tool-call-start" => {
                let index = event.index.unwrap_or(self.tool_calls);
                self.tool_calls = self.tool_calls.max(index + 1);
                let call = message
                    .tool_calls
                    .and_then(|c| c.into_vec().into_iter().next())
                    .unwrap_or_default();
                let function = call.function.unwrap_or_default();
                let mut events = vec![StreamEvent::ToolCallStart {
                    index,
                    id: call.id,
                    name: function.name.unwrap_or_default(),
                }];
                if let Some(arguments) = function.arguments.filter(|a| !a.is_empty()) {
                    events.push(StreamEvent::ToolCallArguments {
                        index,
                        fragment: arguments,
                    });
                }
                events
            }
            "tool-call-delta" => {
                let index = event.index.unwrap_or(self.tool_calls.saturating_sub(1));
                message
                    .tool_calls
                    .and_then(|c| c.into_vec().into_iter().next())
                    .and_then(|c| c.function)
                    .and_then(|f| f.arguments)
                    .filter(|a| !a.is_empty())
                    .map(|fragment| StreamEvent::ToolCallArguments { index, fragment })
                    .into_iter()
                    .collect()
            }
            "message-end" => {
                if let Some(error) = delta.error {
                    return vec![StreamEvent::Error(BifrostError::from_payload(
                        &self.provider,
                        None,
                        &json!({ "message": error }),
                    ))];
                }
                let mut events = Vec::new();
                if let Some(usage) = delta.usage {
                    events.push(StreamEvent::Usage(Usage::from(usage)));
                }
                if let Some(reason) = delta.finish_reason {
                    events.push(StreamEvent::Finish {
                        reason: finish_reason(&reason),
                        authoritative: true,
                    });
                }
                events.push(StreamEvent::Done);
                events
            }
            _ => Vec::new(),
        }
    }
}
