//! Helpers shared by the provider dialects.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{BifrostError, ErrorField, Result};
use crate::schemas::{
    CanonicalRequest, CanonicalResponse, ChatMessage, ModelProvider, Operation, OutputItem,
    Params, RequestInput, ResponseOutput,
};
use crate::transport::{HttpRequest, HttpResponse};

/// Encode a JSON body.
pub(crate) fn json_body(provider: &ModelProvider, body: &impl Serialize) -> Result<Vec<u8>> {
    serde_json::to_vec(body).map_err(|e| BifrostError::marshal(provider, e))
}

/// A JSON POST request.
pub(crate) fn post_json(
    provider: &ModelProvider,
    url: impl Into<String>,
    body: &impl Serialize,
) -> Result<HttpRequest> {
    Ok(HttpRequest::post_json(url, json_body(provider, body)?))
}

/// Decode a 2xx body.
pub(crate) fn parse_json<T: DeserializeOwned>(
    provider: &ModelProvider,
    response: &HttpResponse,
) -> Result<T> {
    serde_json::from_slice(&response.body).map_err(|e| {
        BifrostError::unmarshal(
            provider,
            response.status,
            format!("failed to decode response body: {e}"),
        )
        .with_source(e)
    })
}

/// Interpret a non-2xx body as an upstream error.
///
/// JSON bodies keep the upstream code, type and message. Anything else
/// becomes the message verbatim.
pub(crate) fn parse_error(provider: &ModelProvider, response: &HttpResponse) -> BifrostError {
    match serde_json::from_slice::<Value>(&response.body) {
        Ok(payload @ Value::Object(_)) => {
            BifrostError::from_payload(provider, Some(response.status), &payload)
        }
        Ok(payload @ Value::Array(_)) => payload
            .get(0)
            .filter(|first| first.is_object())
            .map_or_else(
                || text_error(provider, response),
                |first| BifrostError::from_payload(provider, Some(response.status), first),
            ),
        _ => text_error(provider, response),
    }
}

fn text_error(provider: &ModelProvider, response: &HttpResponse) -> BifrostError {
    let text = String::from_utf8_lossy(&response.body);
    let message = if text.trim().is_empty() {
        format!("upstream returned status {}", response.status)
    } else {
        text.trim().to_owned()
    };
    BifrostError::upstream(provider, Some(response.status), ErrorField::message(message))
}

/// Insert `value` under `key` when present.
pub(crate) fn insert_opt<T: Serialize>(body: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value.and_then(|v| serde_json::to_value(v).ok()) {
        body.insert(key.to_owned(), value);
    }
}

/// Merge provider-specific extra parameters into a body.
pub(crate) fn merge_extra(body: &mut Map<String, Value>, params: &Params) {
    for (key, value) in &params.extra {
        body.insert(key.clone(), value.clone());
    }
}

/// Reject inputs that cannot serve the operation.
pub(crate) fn mismatch(provider: &ModelProvider, operation: Operation, input: &RequestInput) -> BifrostError {
    BifrostError::configuration(
        provider,
        format!(
            "{} input cannot be used for {}",
            input.kind(),
            operation.label()
        ),
    )
}

/// Messages of a chat request.
pub(crate) fn chat_messages<'a>(
    provider: &ModelProvider,
    operation: Operation,
    request: &'a CanonicalRequest,
) -> Result<&'a [ChatMessage]> {
    match &request.input {
        RequestInput::Chat(messages) if messages.is_empty() => Err(BifrostError::configuration(
            provider,
            "chat request has no messages",
        )),
        RequestInput::Chat(messages) => Ok(messages),
        other => Err(mismatch(provider, operation, other)),
    }
}

/// Texts of an embedding request.
pub(crate) fn embedding_texts<'a>(
    provider: &ModelProvider,
    request: &'a CanonicalRequest,
) -> Result<&'a [String]> {
    match &request.input {
        RequestInput::Embedding(input) if input.texts.is_empty() => Err(
            BifrostError::configuration(provider, "embedding request has no input texts"),
        ),
        RequestInput::Embedding(input) => Ok(&input.texts),
        other => Err(mismatch(provider, Operation::Embedding, other)),
    }
}

/// Rewrite a Responses request as a chat request.
///
/// Instructions become a leading system message.
pub(crate) fn responses_to_chat(request: &CanonicalRequest) -> Option<CanonicalRequest> {
    let RequestInput::Responses(input) = &request.input else {
        return None;
    };
    let mut messages = Vec::with_capacity(input.messages.len() + 1);
    if let Some(instructions) = input.instructions.as_deref().filter(|i| !i.is_empty()) {
        messages.push(ChatMessage::system(instructions));
    }
    messages.extend(input.messages.iter().cloned());
    let mut chat = request.clone();
    chat.input = RequestInput::Chat(messages);
    Some(chat)
}

/// Rewrite a chat response as a Responses response.
pub(crate) fn chat_to_responses(mut response: CanonicalResponse) -> CanonicalResponse {
    if let ResponseOutput::Choices(choices) = &response.output {
        let mut items = Vec::new();
        for choice in choices {
            let message = &choice.message;
            if let Some(thought) = message.thought.as_ref().filter(|t| !t.is_empty()) {
                items.push(OutputItem::Reasoning {
                    text: thought.clone(),
                });
            }
            if let Some(text) = message.content.as_ref().filter(|t| !t.is_empty()) {
                items.push(OutputItem::Message {
                    id: response.id.clone(),
                    text: text.clone(),
                });
            }
            items.extend(message.tool_calls.iter().map(|call| OutputItem::FunctionCall {
                call_id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            }));
        }
        response.output = ResponseOutput::Responses(items);
    }
    response.extra_fields.request_type = Operation::Responses;
    response
}

/// Nanoseconds since the Unix epoch.
pub(crate) fn unix_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Seconds since the Unix epoch.
pub(crate) fn unix_secs() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}

/// Saturating `u64` to `u32`.
pub(crate) fn saturating_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::schemas::{Choice, ResponsesInput};

    #[test]
    fn test_parse_error_shapes() {
        let provider = ModelProvider::OpenAi;
        let err = parse_error(
            &provider,
            &HttpResponse::new(
                429,
                r#"{"error":{"message":"slow down","type":"rate_limit","code":"rate_limited"}}"#,
            ),
        );
        assert_eq!(err.kind, ErrorKind::UpstreamApi);
        assert_eq!(err.status_code, Some(429));
        assert_eq!(err.message(), "slow down");
        assert_eq!(err.error.code.as_deref(), Some("rate_limited"));

        let err = parse_error(&provider, &HttpResponse::new(502, "bad gateway"));
        assert_eq!(err.message(), "bad gateway");

        let err = parse_error(&provider, &HttpResponse::new(500, ""));
        assert_eq!(err.message(), "upstream returned status 500");

        let err = parse_error(
            &ModelProvider::Gemini,
            &HttpResponse::new(400, r#"[{"error":{"message":"bad","status":"INVALID_ARGUMENT"}}]"#),
        );
        assert_eq!(err.error.error_type.as_deref(), Some("INVALID_ARGUMENT"));
    }

    #[test]
    fn test_parse_json_reports_status() {
        let err = parse_json::<Value>(&ModelProvider::OpenAi, &HttpResponse::new(200, "{oops"))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResponseUnmarshal);
        assert_eq!(err.status_code, Some(200));
    }

    #[test]
    fn test_responses_round_trip_through_chat() {
        let request = CanonicalRequest::new(
            ModelProvider::Anthropic,
            "claude",
            RequestInput::Responses(ResponsesInput {
                instructions: Some("be brief".into()),
                messages: vec![ChatMessage::user("hi")],
            }),
        );
        let chat = responses_to_chat(&request).unwrap();
        let messages = chat.messages().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], ChatMessage::system("be brief"));

        let response = CanonicalResponse::new(
            Operation::ChatCompletion,
            ModelProvider::Anthropic,
            "claude",
            ResponseOutput::Choices(vec![Choice::text(0, "hello", Some("stop".into()))]),
        );
        let converted = chat_to_responses(response);
        assert_eq!(converted.extra_fields.request_type, Operation::Responses);
        assert_eq!(converted.text(), Some("hello"));
    }

    #[test]
    fn test_embedding_texts_rejects_empty() {
        let request = CanonicalRequest::embedding(ModelProvider::OpenAi, "e", Vec::<String>::new());
        let err = embedding_texts(&ModelProvider::OpenAi, &request).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }
}
