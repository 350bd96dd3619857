//! Native Responses API.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::providers::common::{insert_opt, merge_extra};
use crate::schemas::{
    ChatMessage, Content, ContentBlock, OutputItem, Params, ResponsesInput, Role, ToolChoice,
    Usage,
};

fn content_part(role: Role, block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } if role == Role::Assistant => {
            json!({"type": "output_text", "text": text})
        }
        ContentBlock::Text { text } => json!({"type": "input_text", "text": text}),
        ContentBlock::Image { source } => json!({
            "type": "input_image",
            "image_url": source.to_url(),
        }),
    }
}

fn input_items(message: &ChatMessage) -> Vec<Value> {
    if message.role == Role::Tool {
        return vec![json!({
            "type": "function_call_output",
            "call_id": message.tool_call_id.clone().unwrap_or_default(),
            "output": message.content.text(),
        })];
    }
    let mut items = Vec::new();
    if !message.content.is_empty() {
        let content = match &message.content {
            Content::Text(text) => json!(text),
            Content::Blocks(blocks) => Value::Array(
                blocks
                    .iter()
                    .map(|b| content_part(message.role, b))
                    .collect(),
            ),
        };
        items.push(json!({
            "type": "message",
            "role": message.role.as_str(),
            "content": content,
        }));
    }
    items.extend(message.tool_calls.iter().map(|call| {
        json!({
            "type": "function_call",
            "call_id": call.id,
            "name": call.name,
            "arguments": call.arguments,
        })
    }));
    items
}

fn tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Function(name) => json!({"type": "function", "name": name}),
        other => super::chat::tool_choice(other),
    }
}

/// `/v1/responses` body.
pub(crate) fn responses_body(model: &str, input: &ResponsesInput, params: &Params, stream: bool) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(model));
    body.insert(
        "input".into(),
        Value::Array(input.messages.iter().flat_map(input_items).collect()),
    );
    insert_opt(&mut body, "instructions", input.instructions.as_deref());
    insert_opt(&mut body, "temperature", params.temperature);
    insert_opt(&mut body, "top_p", params.top_p);
    insert_opt(&mut body, "max_output_tokens", params.max_tokens);
    insert_opt(&mut body, "user", params.user.as_deref());
    if !params.tools.is_empty() {
        let tools = params
            .tools
            .iter()
            .map(|tool| {
                let mut t = Map::new();
                t.insert("type".into(), json!("function"));
                t.insert("name".into(), json!(tool.name));
                insert_opt(&mut t, "description", tool.description.as_deref());
                t.insert("parameters".into(), tool.parameters.clone());
                Value::Object(t)
            })
            .collect();
        body.insert("tools".into(), Value::Array(tools));
    }
    if let Some(choice) = &params.tool_choice {
        body.insert("tool_choice".into(), tool_choice(choice));
    }
    insert_opt(&mut body, "parallel_tool_calls", params.parallel_tool_calls);
    if stream {
        body.insert("stream".into(), json!(true));
    }
    merge_extra(&mut body, params);
    Value::Object(body)
}

#[derive(Debug, Deserialize)]
struct WirePart {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireItem {
    Message {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        content: Vec<WirePart>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    Reasoning {
        #[serde(default)]
        summary: Vec<WirePart>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// A Responses API response.
#[derive(Debug, Deserialize)]
pub(crate) struct ResponsesResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub created_at: Option<u64>,
    #[serde(default)]
    output: Vec<WireItem>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

fn joined(parts: Vec<WirePart>, kinds: &[&str]) -> String {
    parts
        .into_iter()
        .filter(|p| kinds.contains(&p.kind.as_str()))
        .filter_map(|p| p.text)
        .collect()
}

impl ResponsesResponse {
    /// Canonical items and usage.
    pub(crate) fn take_output(&mut self) -> (Vec<OutputItem>, Option<Usage>) {
        let items = self
            .output
            .drain(..)
            .filter_map(|item| match item {
                WireItem::Message { id, content } => Some(OutputItem::Message {
                    id,
                    text: joined(content, &["output_text", "text"]),
                }),
                WireItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                } => Some(OutputItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                }),
                WireItem::Reasoning { summary } => Some(OutputItem::Reasoning {
                    text: joined(summary, &["summary_text", "reasoning_text"]),
                }),
                WireItem::Other => None,
            })
            .collect();
        let usage = self
            .usage
            .take()
            .map(|u| Usage::with_total(u.input_tokens, u.output_tokens, u.total_tokens));
        (items, usage)
    }
}
