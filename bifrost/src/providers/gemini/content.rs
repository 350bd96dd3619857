//! `generateContent` request and response bodies.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::{BifrostError, Result};
use crate::providers::common::{insert_opt, merge_extra};
use crate::schemas::{
    AssistantMessage, ChatMessage, Choice, ContentBlock, ImageSource, ModelInfo, ModelProvider,
    Params, Role, SpeechInput, ToolCall, ToolChoice, TranscriptionInput, Usage,
};

/// Largest audio file sent inline.
pub const MAX_INLINE_AUDIO_BYTES: usize = 20 * 1024 * 1024;

const TRANSCRIPT_PROMPT: &str = "Generate a transcript of the speech.";

/// Canonical finish reason for a Gemini finish reason.
pub(crate) fn finish_reason(reason: &str, has_tool_calls: bool) -> String {
    match reason {
        "STOP" if has_tool_calls => "tool_calls".to_owned(),
        "STOP" => "stop".to_owned(),
        "MAX_TOKENS" => "length".to_owned(),
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"
        | "IMAGE_SAFETY" => "content_filter".to_owned(),
        other => other.to_ascii_lowercase(),
    }
}

/// MIME type sniffed from audio container magic bytes.
pub(crate) fn audio_mime_type(audio: &[u8]) -> &'static str {
    match audio {
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => "audio/wav",
        [b'I', b'D', b'3', ..] => "audio/mp3",
        [b'A', b'D', b'I', b'F', ..] => "audio/aac",
        [0xFF, second, ..] if second & 0xF6 == 0xF0 => "audio/aac",
        [b'F', b'O', b'R', b'M', _, _, _, _, b'A', b'I', b'F', b'F' | b'C', ..] => "audio/aiff",
        [b'f', b'L', b'a', b'C', ..] => "audio/flac",
        [b'O', b'g', b'g', b'S', ..] => "audio/ogg",
        _ => "audio/mp3",
    }
}

fn parts(message: &ChatMessage) -> Vec<Value> {
    message
        .content
        .blocks()
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } if text.is_empty() => None,
            ContentBlock::Text { text } => Some(json!({ "text": text })),
            ContentBlock::Image {
                source: ImageSource::Base64 { media_type, data },
            } => Some(json!({"inlineData": {"mimeType": media_type, "data": data}})),
            ContentBlock::Image {
                source: ImageSource::Url { url },
            } => Some(json!({"fileData": {"fileUri": url}})),
        })
        .collect()
}

fn generation_config(params: &Params) -> Map<String, Value> {
    let mut config = Map::new();
    insert_opt(&mut config, "maxOutputTokens", params.max_tokens);
    insert_opt(&mut config, "temperature", params.temperature);
    insert_opt(&mut config, "topP", params.top_p);
    insert_opt(&mut config, "presencePenalty", params.presence_penalty);
    insert_opt(&mut config, "frequencyPenalty", params.frequency_penalty);
    insert_opt(&mut config, "seed", params.seed);
    if !params.stop.is_empty() {
        config.insert("stopSequences".into(), json!(params.stop));
    }
    config
}

fn tool_config(choice: &ToolChoice) -> Value {
    let config = match choice {
        ToolChoice::Auto => json!({"mode": "AUTO"}),
        ToolChoice::None => json!({"mode": "NONE"}),
        ToolChoice::Required => json!({"mode": "ANY"}),
        ToolChoice::Function(name) => json!({"mode": "ANY", "allowedFunctionNames": [name]}),
    };
    json!({ "functionCallingConfig": config })
}

/// Chat body. System messages become `systemInstruction`.
///
/// # Errors
///
/// Tool call arguments must be JSON objects.
pub(crate) fn chat_body(
    provider: &ModelProvider,
    messages: &[ChatMessage],
    params: &Params,
) -> Result<Value> {
    let mut system = Vec::new();
    let mut contents = Vec::new();
    let mut tool_names: HashMap<&str, &str> = HashMap::new();
    for message in messages {
        match message.role {
            Role::System | Role::Developer => system.extend(parts(message)),
            Role::User => contents.push(json!({"role": "user", "parts": parts(message)})),
            Role::Assistant => {
                let mut parts = parts(message);
                for call in &message.tool_calls {
                    tool_names.insert(&call.id, &call.name);
                    let args: Value = if call.arguments.trim().is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(&call.arguments).map_err(|e| {
                            BifrostError::configuration(
                                provider,
                                format!("tool call {} has invalid JSON arguments: {e}", call.id),
                            )
                        })?
                    };
                    parts.push(json!({"functionCall": {"id": call.id, "name": call.name, "args": args}}));
                }
                contents.push(json!({"role": "model", "parts": parts}));
            }
            Role::Tool => {
                let id = message.tool_call_id.as_deref().unwrap_or_default();
                let name = message
                    .name
                    .as_deref()
                    .or_else(|| tool_names.get(id).copied())
                    .unwrap_or(id);
                contents.push(json!({"role": "user", "parts": [{"functionResponse": {
                    "id": id,
                    "name": name,
                    "response": {"content": message.content.text()},
                }}]}));
            }
        }
    }

    let mut body = Map::new();
    body.insert("contents".into(), Value::Array(contents));
    if !system.is_empty() {
        body.insert("systemInstruction".into(), json!({ "parts": system }));
    }
    let mut config = generation_config(params);
    if let Some(format) = &params.response_format
        && format["type"] == "json_object"
    {
        config.insert("responseMimeType".into(), json!("application/json"));
    }
    if !config.is_empty() {
        body.insert("generationConfig".into(), Value::Object(config));
    }
    if !params.tools.is_empty() {
        let declarations: Vec<Value> = params
            .tools
            .iter()
            .map(|tool| {
                let mut decl = Map::new();
                decl.insert("name".into(), json!(tool.name));
                insert_opt(&mut decl, "description", tool.description.as_deref());
                decl.insert("parameters".into(), tool.parameters.clone());
                Value::Object(decl)
            })
            .collect();
        body.insert("tools".into(), json!([{ "functionDeclarations": declarations }]));
    }
    if let Some(choice) = &params.tool_choice {
        body.insert("toolConfig".into(), tool_config(choice));
    }
    merge_extra(&mut body, params);
    Ok(Value::Object(body))
}

/// Speech body: the text is the only turn and audio is the only modality.
pub(crate) fn speech_body(input: &SpeechInput, params: &Params) -> Value {
    let mut config = generation_config(params);
    config.insert("responseModalities".into(), json!(["AUDIO"]));
    if !input.voice.is_empty() {
        config.insert(
            "speechConfig".into(),
            json!({"voiceConfig": {"prebuiltVoiceConfig": {"voiceName": input.voice}}}),
        );
    }
    let text = match &input.instructions {
        Some(instructions) => format!("{instructions}: {}", input.input),
        None => input.input.clone(),
    };
    let mut body = Map::new();
    body.insert("contents".into(), json!([{"role": "user", "parts": [{"text": text}]}]));
    body.insert("generationConfig".into(), Value::Object(config));
    merge_extra(&mut body, params);
    Value::Object(body)
}

/// Transcription body: a prompt and the audio inline.
///
/// # Errors
///
/// Audio over [`MAX_INLINE_AUDIO_BYTES`] or empty audio is rejected.
pub(crate) fn transcription_body(
    provider: &ModelProvider,
    input: &TranscriptionInput,
    params: &Params,
) -> Result<Value> {
    if input.file.is_empty() {
        return Err(BifrostError::configuration(provider, "transcription input has no audio"));
    }
    if input.file.len() > MAX_INLINE_AUDIO_BYTES {
        return Err(BifrostError::configuration(
            provider,
            format!(
                "audio file of {} bytes exceeds the {MAX_INLINE_AUDIO_BYTES} byte inline limit",
                input.file.len()
            ),
        ));
    }
    let mut prompt = input.prompt.clone().unwrap_or_else(|| TRANSCRIPT_PROMPT.to_owned());
    if let Some(language) = &input.language {
        prompt.push_str(&format!(" The audio is in {language}."));
    }
    let mut body = Map::new();
    body.insert(
        "contents".into(),
        json!([{"role": "user", "parts": [
            {"text": prompt},
            {"inlineData": {
                "mimeType": audio_mime_type(&input.file),
                "data": STANDARD.encode(&input.file),
            }},
        ]}]),
    );
    let config = generation_config(params);
    if !config.is_empty() {
        body.insert("generationConfig".into(), Value::Object(config));
    }
    merge_extra(&mut body, params);
    Ok(Value::Object(body))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireUsage {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
    #[serde(default)]
    pub thoughts_token_count: u32,
    #[serde(default)]
    pub total_token_count: u32,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        Self::with_total(
            u.prompt_token_count,
            u.candidates_token_count + u.thoughts_token_count,
            u.total_token_count,
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InlineData {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FunctionCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl FunctionCall {
    /// The call id, falling back to the function name.
    pub(crate) fn into_tool_call(self) -> ToolCall {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| self.name.clone());
        let arguments = if self.args.is_null() {
            "{}".to_owned()
        } else {
            self.args.to_string()
        };
        ToolCall {
            id,
            name: self.name,
            arguments,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Part {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thought: bool,
    #[serde(default)]
    pub function_call: Option<FunctionCall>,
    #[serde(default)]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub index: Option<u32>,
}

/// A `generateContent` response or stream chunk.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<WireUsage>,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub response_id: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl GenerateContentResponse {
    /// Canonical choices, one per candidate.
    pub(crate) fn take_choices(&mut self) -> Vec<Choice> {
        (0u32..)
            .zip(self.candidates.drain(..))
            .map(|(position, candidate)| {
                let mut text = String::new();
                let mut thought = String::new();
                let mut tool_calls = Vec::new();
                for part in candidate.content.unwrap_or_default().parts {
                    match (part.text, part.function_call) {
                        (Some(t), _) if part.thought => thought.push_str(&t),
                        (Some(t), _) => text.push_str(&t),
                        (None, Some(call)) => tool_calls.push(call.into_tool_call()),
                        (None, None) => {}
                    }
                }
                let finish_reason = candidate
                    .finish_reason
                    .as_deref()
                    .map(|r| finish_reason(r, !tool_calls.is_empty()));
                Choice {
                    index: candidate.index.unwrap_or(position),
                    message: AssistantMessage {
                        role: Some(Role::Assistant),
                        content: (!text.is_empty() || tool_calls.is_empty()).then_some(text),
                        thought: (!thought.is_empty()).then_some(thought),
                        refusal: None,
                        tool_calls,
                    },
                    finish_reason,
                }
            })
            .collect()
    }

    /// Concatenated audio of the first candidate, with its MIME type.
    pub(crate) fn audio(&self) -> (Bytes, Option<String>) {
        let mut audio = Vec::new();
        let mut mime = None;
        let parts = self
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map_or(&[][..], |c| c.parts.as_slice());
        for data in parts.iter().filter_map(|p| p.inline_data.as_ref()) {
            if !data.mime_type.starts_with("audio/") {
                continue;
            }
            if let Ok(bytes) = STANDARD.decode(&data.data) {
                audio.extend_from_slice(&bytes);
                mime.get_or_insert_with(|| data.mime_type.clone());
            }
        }
        (Bytes::from(audio), mime)
    }

    /// Concatenated text of the first candidate.
    pub(crate) fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter(|p| !p.thought)
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireModel {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    input_token_limit: Option<u32>,
}

/// A page of `/models`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ModelsPage {
    #[serde(default)]
    models: Vec<WireModel>,
    #[serde(default)]
    next_page_token: Option<String>,
}

impl ModelsPage {
    pub(crate) fn into_page(self, prefix: &str) -> (Vec<ModelInfo>, Option<String>) {
        let models = self
            .models
            .into_iter()
            .map(|m| {
                let id = m.name.strip_prefix("models/").unwrap_or(&m.name);
                ModelInfo {
                    id: format!("{prefix}/{id}"),
                    name: m.display_name,
                    owned_by: Some("google".to_owned()),
                    context_length: m.input_token_limit,
                }
            })
            .collect();
        let next = self.next_page_token.filter(|t| !t.is_empty());
        (models, next)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_chat_body() {
        let messages = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("weather?"),
            ChatMessage::assistant("").with_tool_calls(vec![ToolCall {
                id: "c1".into(),
                name: "weather".into(),
                arguments: r#"{"city":"Oslo"}"#.into(),
            }]),
            ChatMessage::tool("c1", "sunny"),
        ];
        let params = Params::default().with_max_tokens(10).with_temperature(0.5);
        let body = chat_body(&ModelProvider::Gemini, &messages, &params).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][1]["parts"][0]["functionCall"]["args"]["city"], "Oslo");
        assert_eq!(body["contents"][2]["parts"][0]["functionResponse"]["name"], "weather");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 10);
    }

    #[test]
    fn test_response_choices() {
        let mut resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "thinking", "thought": true},
                    {"functionCall": {"name": "weather", "args": {"city": "Oslo"}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 2, "totalTokenCount": 7}
        }))
        .unwrap();
        let choices = resp.take_choices();
        assert_eq!(choices[0].message.thought.as_deref(), Some("thinking"));
        assert_eq!(choices[0].message.tool_calls[0].id, "weather");
        assert_eq!(choices[0].finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(Usage::from(resp.usage_metadata.unwrap()), Usage::new(5, 2));
    }

    #[test]
    fn test_audio_mime_sniffing() {
        assert_eq!(audio_mime_type(b"RIFF\0\0\0\0WAVEfmt "), "audio/wav");
        assert_eq!(audio_mime_type(b"fLaC\0\0"), "audio/flac");
        assert_eq!(audio_mime_type(b"ID3\x04"), "audio/mp3");
        assert_eq!(audio_mime_type(&[0xFF, 0xF1, 0, 0]), "audio/aac");
        assert_eq!(audio_mime_type(&[0xFF, 0xFB, 0, 0]), "audio/mp3");
        assert_eq!(audio_mime_type(b"xy"), "audio/mp3");
    }

    #[test]
    fn test_transcription_size_limit() {
        let input = TranscriptionInput {
            file: Bytes::from(vec![0u8; MAX_INLINE_AUDIO_BYTES + 1]),
            filename: None,
            language: None,
            prompt: None,
            response_format: None,
        };
        assert!(transcription_body(&ModelProvider::Gemini, &input, &Params::default()).is_err());
    }

    #[test]
    fn test_speech_audio_is_decoded() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [
                {"inlineData": {"mimeType": "audio/L16;rate=24000", "data": STANDARD.encode(b"pcm")}}
            ]}}]
        }))
        .unwrap();
        let (audio, mime) = resp.audio();
        assert_eq!(&audio[..], b"pcm");
        assert_eq!(mime.as_deref(), Some("audio/L16;rate=24000"));
    }
}
