//! Messages API wire format.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::{BifrostError, Result};
use crate::providers::common::{insert_opt, merge_extra};
use crate::schemas::{
    AssistantMessage, ChatMessage, Choice, Content, ContentBlock, ImageSource, ModelInfo,
    ModelProvider, Params, Role, ToolCall, ToolChoice, Usage,
};

/// `max_tokens` is mandatory upstream; used when the caller sets none.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Canonical finish reason for an Anthropic stop reason.
pub(crate) fn finish_reason(stop_reason: &str) -> String {
    match stop_reason {
        "end_turn" | "stop_sequence" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        other => other,
    }
    .to_owned()
}

fn image(source: &ImageSource) -> Value {
    match source {
        ImageSource::Base64 { media_type, data } => json!({
            "type": "image",
            "source": {"type": "base64", "media_type": media_type, "data": data},
        }),
        ImageSource::Url { url } => json!({
            "type": "image",
            "source": {"type": "url", "url": url},
        }),
    }
}

fn blocks(content: &Content) -> Vec<Value> {
    content
        .blocks()
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } if text.is_empty() => None,
            ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
            ContentBlock::Image { source } => Some(image(source)),
        })
        .collect()
}

/// Append `message`, merging consecutive same-role turns.
fn push_turn(turns: &mut Vec<Value>, role: &str, mut content: Vec<Value>) {
    if content.is_empty() {
        return;
    }
    if let Some(last) = turns.last_mut()
        && last["role"] == role
        && let Some(existing) = last["content"].as_array_mut()
    {
        existing.append(&mut content);
        return;
    }
    turns.push(json!({"role": role, "content": content}));
}

fn tool_input(provider: &ModelProvider, call: &ToolCall) -> Result<Value> {
    if call.arguments.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(&call.arguments).map_err(|e| {
        BifrostError::configuration(
            provider,
            format!("tool call {} has invalid JSON arguments: {e}", call.id),
        )
    })
}

/// System prompt and turns.
///
/// System and developer messages are hoisted into the top-level `system`
/// field. Tool results become `tool_result` blocks of a user turn.
pub(crate) fn conversation(
    provider: &ModelProvider,
    messages: &[ChatMessage],
) -> Result<(Option<String>, Vec<Value>)> {
    let mut system = Vec::new();
    let mut turns = Vec::new();
    for message in messages {
        match message.role {
            Role::System | Role::Developer => system.push(message.content.text()),
            Role::User => push_turn(&mut turns, "user", blocks(&message.content)),
            Role::Tool => push_turn(
                &mut turns,
                "user",
                vec![json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": message.content.text(),
                })],
            ),
            Role::Assistant => {
                let mut content = blocks(&message.content);
                for call in &message.tool_calls {
                    content.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": tool_input(provider, call)?,
                    }));
                }
                push_turn(&mut turns, "assistant", content);
            }
        }
    }
    let system = (!system.is_empty()).then(|| system.join("\n"));
    Ok((system, turns))
}

fn tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({"type": "auto"}),
        ToolChoice::None => json!({"type": "none"}),
        ToolChoice::Required => json!({"type": "any"}),
        ToolChoice::Function(name) => json!({"type": "tool", "name": name}),
    }
}

/// `/v1/messages` body. `model` is omitted when `None`.
pub(crate) fn messages_body(
    provider: &ModelProvider,
    model: Option<&str>,
    messages: &[ChatMessage],
    params: &Params,
    stream: bool,
) -> Result<Map<String, Value>> {
    let (system, turns) = conversation(provider, messages)?;
    if turns.is_empty() {
        return Err(BifrostError::configuration(
            provider,
            "conversation has no user or assistant messages",
        ));
    }
    let mut body = Map::new();
    insert_opt(&mut body, "model", model);
    body.insert(
        "max_tokens".into(),
        json!(params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
    );
    insert_opt(&mut body, "system", system);
    body.insert("messages".into(), Value::Array(turns));
    insert_opt(&mut body, "temperature", params.temperature);
    insert_opt(&mut body, "top_p", params.top_p);
    if !params.stop.is_empty() {
        body.insert("stop_sequences".into(), json!(params.stop));
    }
    if !params.tools.is_empty() {
        let tools = params
            .tools
            .iter()
            .map(|tool| {
                let mut t = Map::new();
                t.insert("name".into(), json!(tool.name));
                insert_opt(&mut t, "description", tool.description.as_deref());
                t.insert("input_schema".into(), tool.parameters.clone());
                Value::Object(t)
            })
            .collect();
        body.insert("tools".into(), Value::Array(tools));
    }
    if let Some(choice) = &params.tool_choice {
        body.insert("tool_choice".into(), tool_choice(choice));
    }
    if let Some(user) = &params.user {
        body.insert("metadata".into(), json!({"user_id": user}));
    }
    if stream {
        body.insert("stream".into(), json!(true));
    }
    merge_extra(&mut body, params);
    Ok(body)
}

/// `/v1/complete` body.
pub(crate) fn complete_body(model: &str, prompt: &str, params: &Params) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(model));
    body.insert(
        "prompt".into(),
        json!(format!("\n\nHuman: {prompt}\n\nAssistant:")),
    );
    body.insert(
        "max_tokens_to_sample".into(),
        json!(params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
    );
    insert_opt(&mut body, "temperature", params.temperature);
    insert_opt(&mut body, "top_p", params.top_p);
    if !params.stop.is_empty() {
        body.insert("stop_sequences".into(), json!(params.stop));
    }
    merge_extra(&mut body, params);
    Value::Object(body)
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default)]
    pub cache_creation_input_tokens: u32,
    #[serde(default)]
    pub cache_read_input_tokens: u32,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        let prompt = u
            .input_tokens
            .saturating_add(u.cache_creation_input_tokens)
            .saturating_add(u.cache_read_input_tokens);
        Self::new(prompt, u.output_tokens)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// A Messages API response.
#[derive(Debug, Deserialize)]
pub(crate) struct MessagesResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    content: Vec<WireBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

impl MessagesResponse {
    /// The single canonical choice.
    pub(crate) fn take_choice(&mut self) -> Choice {
        let mut text = String::new();
        let mut thought = String::new();
        let mut tool_calls = Vec::new();
        for block in self.content.drain(..) {
            match block {
                WireBlock::Text { text: t } => text.push_str(&t),
                WireBlock::Thinking { thinking } => thought.push_str(&thinking),
                WireBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input.to_string(),
                }),
                WireBlock::Other => {}
            }
        }
        Choice {
            index: 0,
            message: AssistantMessage {
                role: Some(Role::Assistant),
                content: (!text.is_empty() || tool_calls.is_empty()).then_some(text),
                thought: (!thought.is_empty()).then_some(thought),
                refusal: None,
                tool_calls,
            },
            finish_reason: self.stop_reason.as_deref().map(finish_reason),
        }
    }
}

/// A legacy `/v1/complete` response.
#[derive(Debug, Deserialize)]
pub(crate) struct CompleteResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub completion: String,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

impl CompleteResponse {
    /// The single canonical choice.
    pub(crate) fn choice(&self) -> Choice {
        let reason = self.stop_reason.as_deref().map(|r| match r {
            "stop_sequence" => "stop".to_owned(),
            "max_tokens" => "length".to_owned(),
            other => finish_reason(other),
        });
        Choice::text(0, self.completion.trim_start(), reason)
    }
}

#[derive(Debug, Deserialize)]
struct WireModel {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
}

/// A `/v1/models` page.
#[derive(Debug, Deserialize)]
pub(crate) struct ModelsPage {
    #[serde(default)]
    data: Vec<WireModel>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    last_id: Option<String>,
}

impl ModelsPage {
    /// Canonical models and the next page token.
    pub(crate) fn into_page(self, prefix: &str) -> (Vec<ModelInfo>, Option<String>) {
        let models = self
            .data
            .into_iter()
            .map(|m| ModelInfo {
                id: format!("{prefix}/{}", m.id),
                name: m.display_name,
                owned_by: Some("anthropic".into()),
                context_length: None,
            })
            .collect();
        (models, self.last_id.filter(|_| self.has_more))
    }
}
