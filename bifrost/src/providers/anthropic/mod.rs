//! Anthropic Messages API, the legacy completion API and passthrough mode.

pub(crate) mod messages;
mod passthrough;
pub(crate) mod stream;

use std::sync::Arc;

use self::messages::{CompleteResponse, MessagesResponse, ModelsPage, complete_body, messages_body};
use self::stream::MessagesStreamDecoder;
use super::common::{chat_messages, mismatch, parse_json, post_json, unix_secs};
use super::{DecoderFactory, ProviderParts, RequestTranslator, ResponseTranslator, Target};
use crate::auth::ApiKeyAuth;
use crate::error::Result;
use crate::schemas::{
    CanonicalRequest, CanonicalResponse, Capabilities, ModelProvider, Operation, RequestInput,
    ResponseOutput, Usage,
};
use crate::streaming::StreamDecoder;
use crate::transport::{HttpRequest, HttpResponse};

pub use self::passthrough::{AnthropicPassthrough, HOP_BY_HOP_HEADERS};

/// Value of the `anthropic-version` header.
pub const API_VERSION: &str = "2023-06-01";

/// Anthropic capabilities: legacy text, chat, Responses via chat, listing.
const CAPABILITIES: Capabilities = Capabilities::CHAT
    .with(Operation::TextCompletion)
    .with(Operation::ListModels);

/// Strategies for [`ModelProvider::Anthropic`].
#[must_use]
pub fn parts() -> ProviderParts {
    ProviderParts::uniform(
        CAPABILITIES,
        Arc::new(ApiKeyAuth::header("x-api-key")),
        AnthropicDialect,
    )
    .with_responses_via_chat()
}

/// Strategies for [`ModelProvider::AnthropicPassthrough`].
#[must_use]
pub fn passthrough_parts() -> ProviderParts {
    ProviderParts::uniform(
        Capabilities::CHAT,
        Arc::new(ApiKeyAuth::header("x-api-key")),
        AnthropicPassthrough,
    )
}

/// Translate a Messages API response into a chat response.
pub(crate) fn chat_response(
    target: &Target<'_>,
    request: &CanonicalRequest,
    response: &HttpResponse,
) -> Result<CanonicalResponse> {
    let mut body: MessagesResponse = parse_json(target.provider, response)?;
    let choice = body.take_choice();
    let mut canonical = CanonicalResponse::new(
        target.operation,
        target.provider.clone(),
        body.model.take().unwrap_or_else(|| request.model.clone()),
        ResponseOutput::Choices(vec![choice]),
    )
    .with_id(body.id.take())
    .with_usage(body.usage.take().map(Usage::from));
    canonical.created = Some(unix_secs());
    Ok(canonical)
}

/// The Anthropic wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicDialect;

impl RequestTranslator for AnthropicDialect {
    fn translate(&self, target: &Target<'_>, request: &CanonicalRequest) -> Result<HttpRequest> {
        let provider = target.provider;
        let http = match (target.operation, &request.input) {
            (Operation::ChatCompletion | Operation::ChatCompletionStream, _) => {
                let messages = chat_messages(provider, target.operation, request)?;
                let body = messages_body(
                    provider,
                    Some(&request.model),
                    messages,
                    &request.params,
                    target.streaming(),
                )?;
                post_json(provider, target.url("/v1/messages")?, &body)?
            }
            (Operation::TextCompletion, RequestInput::Text(input)) => post_json(
                provider,
                target.url("/v1/complete")?,
                &complete_body(&request.model, &input.prompt, &request.params),
            )?,
            (Operation::ListModels, RequestInput::ListModels(input)) => {
                let mut query = url::form_urlencoded::Serializer::new(String::new());
                if let Some(limit) = input.page_size {
                    query.append_pair("limit", &limit.to_string());
                }
                if let Some(token) = &input.page_token {
                    query.append_pair("after_id", token);
                }
                let query = query.finish();
                let url = if query.is_empty() {
                    target.url("/v1/models")?
                } else {
                    target.url(&format!("/v1/models?{query}"))?
                };
                HttpRequest::get(url)
            }
            (_, input) => return Err(mismatch(provider, target.operation, input)),
        };
        Ok(http.header("anthropic-version", API_VERSION))
    }
}

impl ResponseTranslator for AnthropicDialect {
    fn translate(
        &self,
        target: &Target<'_>,
        request: &CanonicalRequest,
        response: &HttpResponse,
    ) -> Result<CanonicalResponse> {
        let provider = target.provider;
        match target.operation {
            Operation::TextCompletion => {
                let body: CompleteResponse = parse_json(provider, response)?;
                let mut canonical = CanonicalResponse::new(
                    target.operation,
                    provider.clone(),
                    body.model.clone().unwrap_or_else(|| request.model.clone()),
                    ResponseOutput::Choices(vec![body.choice()]),
                )
                .with_id(body.id);
                canonical.created = Some(unix_secs());
                Ok(canonical)
            }
            Operation::ListModels => {
                let page: ModelsPage = parse_json(provider, response)?;
                let (models, next_page_token) = page.into_page(provider.as_str());
                Ok(CanonicalResponse::new(
                    target.operation,
                    provider.clone(),
                    request.model.clone(),
                    ResponseOutput::Models {
                        models,
                        next_page_token,
                    },
                ))
            }
            _ => chat_response(target, request, response),
        }
    }
}

impl DecoderFactory for AnthropicDialect {
    fn decoder(&self, target: &Target<'_>, _request: &CanonicalRequest) -> Box<dyn StreamDecoder> {
        Box::new(MessagesStreamDecoder::new(target.provider.clone()))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::ErrorKind;
    use crate::schemas::{ChatMessage, Key, ListModelsInput, Params};

    fn target<'a>(operation: Operation, key: &'a Key) -> Target<'a> {
        static PROVIDER: ModelProvider = ModelProvider::Anthropic;
        Target {
            provider: &PROVIDER,
            operation,
            base_url: Some("https://api.anthropic.com"),
            key,
        }
    }

    #[test]
    fn test_chat_request_headers_and_body() {
        let key = Key::new("sk-ant");
        let request = CanonicalRequest::chat(
            ModelProvider::Anthropic,
            "claude-sonnet",
            vec![ChatMessage::user("Say hi")],
        )
        .with_params(Params::default().with_max_tokens(10));
        let http = RequestTranslator::translate(&AnthropicDialect, &target(Operation::ChatCompletionStream, &key), &request)
            .unwrap();
        assert_eq!(http.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(http.header_str("anthropic-version"), Some(API_VERSION));
        let body: serde_json::Value = serde_json::from_slice(http.body.as_bytes().unwrap()).unwrap();
        assert_eq!(body["model"], "claude-sonnet");
        assert_eq!(body["max_tokens"], 10);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_list_models_paging() {
        let key = Key::new("sk-ant");
        let mut request = CanonicalRequest::list_models(ModelProvider::Anthropic);
        request.input = RequestInput::ListModels(ListModelsInput {
            page_size: Some(2),
            page_token: Some("claude-3".into()),
        });
        let http = RequestTranslator::translate(&AnthropicDialect, &target(Operation::ListModels, &key), &request)
            .unwrap();
        assert_eq!(http.url, "https://api.anthropic.com/v1/models?limit=2&after_id=claude-3");

        let response = HttpResponse::new(
            200,
            r#"{"data":[{"id":"claude-4","display_name":"Claude 4"}],"has_more":true,"last_id":"claude-4"}"#,
        );
        let canonical = ResponseTranslator::translate(
            &AnthropicDialect,
            &target(Operation::ListModels, &key),
            &request,
            &response,
        )
        .unwrap();
        let ResponseOutput::Models { models, next_page_token } = canonical.output else {
            panic!("expected models");
        };
        assert_eq!(models[0].id, "anthropic/claude-4");
        assert_eq!(next_page_token.as_deref(), Some("claude-4"));
    }

    #[test]
    fn test_legacy_completion() {
        let key = Key::new("sk-ant");
        let request = CanonicalRequest::text(ModelProvider::Anthropic, "claude-2", "hi");
        let http = RequestTranslator::translate(&AnthropicDialect, &target(Operation::TextCompletion, &key), &request)
            .unwrap();
        assert_eq!(http.url, "https://api.anthropic.com/v1/complete");

        let response = HttpResponse::new(
            200,
            r#"{"completion":" Hello!","stop_reason":"stop_sequence","model":"claude-2"}"#,
        );
        let canonical = ResponseTranslator::translate(
            &AnthropicDialect,
            &target(Operation::TextCompletion, &key),
            &request,
            &response,
        )
        .unwrap();
        assert_eq!(canonical.text(), Some("Hello!"));
        assert_eq!(canonical.choices()[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_error_body() {
        let err = AnthropicDialect.translate_error(
            &ModelProvider::Anthropic,
            &HttpResponse::new(
                529,
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
            ),
        );
        assert_eq!(err.kind, ErrorKind::UpstreamApi);
        assert_eq!(err.error.error_type.as_deref(), Some("overloaded_error"));
    }

    #[test]
    fn test_capabilities() {
        let parts = parts();
        assert!(parts.capabilities.contains(Operation::TextCompletion));
        assert!(!parts.capabilities.contains(Operation::TextCompletionStream));
        assert!(parts.capabilities.contains(Operation::ResponsesStream));
        assert!(!parts.capabilities.contains(Operation::Embedding));
    }
}
