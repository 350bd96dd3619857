//! Converse API wire format.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::{BifrostError, Result};
use crate::providers::common::insert_opt;
use crate::schemas::{
    AssistantMessage, ChatMessage, Choice, ContentBlock, ImageSource, ModelProvider, Params, Role,
    ToolCall, ToolChoice, Usage,
};

/// Canonical finish reason for a Converse stop reason.
pub(crate) fn finish_reason(stop_reason: &str) -> String {
    match stop_reason {
        "end_turn" | "stop_sequence" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        "guardrail_intervened" | "content_filtered" => "content_filter",
        other => other,
    }
    .to_owned()
}

fn image(provider: &ModelProvider, source: &ImageSource) -> Result<Value> {
    let ImageSource::Base64 { media_type, data } = source else {
        return Err(BifrostError::configuration(
            provider,
            "bedrock only accepts inline base64 images",
        ));
    };
    let format = media_type.strip_prefix("image/").unwrap_or(media_type);
    Ok(json!({"image": {"format": format, "source": {"bytes": data}}}))
}

fn content(provider: &ModelProvider, message: &ChatMessage) -> Result<Vec<Value>> {
    let mut content = Vec::new();
    for block in message.content.blocks() {
        match block {
            ContentBlock::Text { text } if text.is_empty() => {}
            ContentBlock::Text { text } => content.push(json!({ "text": text })),
            ContentBlock::Image { source } => content.push(image(provider, &source)?),
        }
    }
    Ok(content)
}

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

fn tool_use(provider: &ModelProvider, call: &ToolCall) -> Result<Value> {
    let input: Value = if call.arguments.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&call.arguments).map_err(|e| {
            BifrostError::configuration(
                provider,
                format!("tool call {} has invalid JSON arguments: {e}", call.id),
            )
        })?
    };
    Ok(json!({"toolUse": {"toolUseId": call.id, "name": call.name, "input": input}}))
}

/// `/model/{id}/converse` body.
pub(crate) fn converse_body(
    provider: &ModelProvider,
    messages: &[ChatMessage],
    params: &Params,
) -> Result<Value> {
    let mut system = Vec::new();
    let mut turns = Vec::new();
    for message in messages {
        match message.role {
            Role::System | Role::Developer => system.push(json!({"text": message.content.text()})),
            Role::User => push_turn(&mut turns, "user", content(provider, message)?),
            Role::Tool => push_turn(
                &mut turns,
                "user",
                vec![json!({"toolResult": {
                    "toolUseId": message.tool_call_id.clone().unwrap_or_default(),
                    "content": [{"text": message.content.text()}],
                }})],
            ),
            Role::Assistant => {
                let mut blocks = content(provider, message)?;
                for call in &message.tool_calls {
                    blocks.push(tool_use(provider, call)?);
                }
                push_turn(&mut turns, "assistant", blocks);
            }
        }
    }

    let mut body = Map::new();
    body.insert("messages".into(), Value::Array(turns));
    if !system.is_empty() {
        body.insert("system".into(), Value::Array(system));
    }

    let mut inference = Map::new();
    insert_opt(&mut inference, "maxTokens", params.max_tokens);
    insert_opt(&mut inference, "temperature", params.temperature);
    insert_opt(&mut inference, "topP", params.top_p);
    if !params.stop.is_empty() {
        inference.insert("stopSequences".into(), json!(params.stop));
    }
    if !inference.is_empty() {
        body.insert("inferenceConfig".into(), Value::Object(inference));
    }

    if !params.tools.is_empty() {
        let tools: Vec<Value> = params
            .tools
            .iter()
            .map(|tool| {
                let mut spec = Map::new();
                spec.insert("name".into(), json!(tool.name));
                insert_opt(&mut spec, "description", tool.description.as_deref());
                spec.insert("inputSchema".into(), json!({"json": tool.parameters}));
                json!({ "toolSpec": spec })
            })
            .collect();
        let mut config = Map::new();
        config.insert("tools".into(), Value::Array(tools));
        match &params.tool_choice {
            Some(ToolChoice::Auto) => {
                config.insert("toolChoice".into(), json!({"auto": {}}));
            }
            Some(ToolChoice::Required) => {
                config.insert("toolChoice".into(), json!({"any": {}}));
            }
            Some(ToolChoice::Function(name)) => {
                config.insert("toolChoice".into(), json!({"tool": {"name": name}}));
            }
            Some(ToolChoice::None) | None => {}
        }
        body.insert("toolConfig".into(), Value::Object(config));
    }

    if !params.extra.is_empty() {
        body.insert(
            "additionalModelRequestFields".into(),
            Value::Object(params.extra.clone()),
        );
    }
    Ok(Value::Object(body))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        Self::with_total(u.input_tokens, u.output_tokens, u.total_tokens)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireToolUse {
    tool_use_id: String,
    name: String,
    #[serde(default)]
    input: Value,
}

#[derive(Debug, Deserialize)]
struct WireReasoningText {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReasoning {
    #[serde(default)]
    reasoning_text: Option<WireReasoningText>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBlock {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    tool_use: Option<WireToolUse>,
    #[serde(default)]
    reasoning_content: Option<WireReasoning>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Vec<WireBlock>,
}

#[derive(Debug, Deserialize)]
struct WireOutput {
    message: WireMessage,
}

/// A Converse response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConverseResponse {
    output: WireOutput,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

impl ConverseResponse {
    /// The single canonical choice.
    pub(crate) fn take_choice(&mut self) -> Choice {
        let mut text = String::new();
        let mut thought = String::new();
        let mut tool_calls = Vec::new();
        for block in self.output.message.content.drain(..) {
            if let Some(t) = block.text {
                text.push_str(&t);
            }
            if let Some(r) = block.reasoning_content.and_then(|r| r.reasoning_text) {
                thought.push_str(&r.text);
            }
            if let Some(call) = block.tool_use {
                tool_calls.push(ToolCall {
                    id: call.tool_use_id,
                    name: call.name,
                    arguments: call.input.to_string(),
                });
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
