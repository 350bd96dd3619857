//! `OpenAI` and the `OpenAI`-compatible family.
//!
//! One dialect serves `OpenAI` itself and every provider that speaks its
//! wire format. Providers differ in base URL, credentials and which
//! operations they offer. Azure additionally routes by deployment:
//!
//! ```text
//! {endpoint}/openai/deployments/{deployment}/chat/completions?api-version=...
//! ```

mod audio;
pub(crate) mod chat;
mod responses;
pub(crate) mod stream;

use std::sync::Arc;

use reqwest::Method;

use self::audio::{TranscriptionResponse, is_text_format, speech_body, speech_output, transcription_form};
use self::chat::{CompletionResponse, EmbeddingResponse, ModelsResponse, chat_body, embedding_body, text_body};
use self::responses::{ResponsesResponse, responses_body};
use self::stream::{
    ChatStreamDecoder, ResponsesStreamDecoder, SpeechStreamDecoder, TranscriptionStreamDecoder,
};
use super::common::{chat_messages, embedding_texts, mismatch, parse_json, post_json, unix_secs};
use super::{DecoderFactory, ProviderParts, RequestTranslator, ResponseTranslator, Target};
use crate::auth::{ApiKeyAuth, Authenticator, AzureAuth};
use crate::error::{BifrostError, Result};
use crate::schemas::{
    CanonicalRequest, CanonicalResponse, Capabilities, ModelProvider, Operation, RequestInput,
    ResponseOutput, Usage,
};
use crate::streaming::StreamDecoder;
use crate::transport::{HttpRequest, HttpResponse, RequestBody};

/// Providers served by this dialect.
pub const FAMILY: [ModelProvider; 9] = [
    ModelProvider::OpenAi,
    ModelProvider::Azure,
    ModelProvider::Mistral,
    ModelProvider::Groq,
    ModelProvider::Ollama,
    ModelProvider::Cerebras,
    ModelProvider::OpenRouter,
    ModelProvider::Parasail,
    ModelProvider::Sgl,
];

/// Azure API version used when the key configures none.
pub const AZURE_API_VERSION: &str = "2024-10-21";

const EMBEDDING: Capabilities = Capabilities::of(&[Operation::Embedding]);
const LIST: Capabilities = Capabilities::of(&[Operation::ListModels]);
const TRANSCRIPTION: Capabilities = Capabilities::of(&[Operation::Transcription]);

/// Strategies for one member of the family.
#[must_use]
pub fn parts(provider: &ModelProvider) -> ProviderParts {
    let chat_text = Capabilities::CHAT.union(Capabilities::TEXT);
    let (capabilities, via_chat) = match provider {
        ModelProvider::OpenAi => (Capabilities::ALL, false),
        ModelProvider::Azure => (chat_text.union(EMBEDDING).union(LIST), true),
        ModelProvider::Mistral => (
            Capabilities::CHAT.union(EMBEDDING).union(TRANSCRIPTION).union(LIST),
            true,
        ),
        ModelProvider::Groq => (chat_text.union(TRANSCRIPTION).union(LIST), true),
        ModelProvider::Ollama => (chat_text.union(EMBEDDING).union(LIST), true),
        ModelProvider::Cerebras => (chat_text, false),
        ModelProvider::OpenRouter => (chat_text.union(LIST), false),
        ModelProvider::Parasail => (Capabilities::CHAT, true),
        ModelProvider::Sgl => (chat_text.union(EMBEDDING), false),
        _ => (Capabilities::CHAT, false),
    };
    let auth: Arc<dyn Authenticator> = match provider {
        ModelProvider::Azure => Arc::new(AzureAuth),
        p if p.is_keyless() => Arc::new(ApiKeyAuth::bearer().optional()),
        _ => Arc::new(ApiKeyAuth::bearer()),
    };
    let routing = if *provider == ModelProvider::Azure {
        Routing::Azure
    } else {
        Routing::Standard
    };
    let parts = ProviderParts::uniform(capabilities, auth, OpenAiDialect { routing });
    if via_chat { parts.with_responses_via_chat() } else { parts }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Routing {
    /// `{base_url}/v1/{path}`.
    Standard,
    /// Per-deployment URLs under the key's endpoint.
    Azure,
}

/// The `OpenAI` wire format.
#[derive(Debug, Clone, Copy)]
pub struct OpenAiDialect {
    routing: Routing,
}

impl OpenAiDialect {
    /// Dialect for `{base_url}/v1/...` endpoints.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            routing: Routing::Standard,
        }
    }

    fn url(&self, target: &Target<'_>, model: &str, path: &str) -> Result<String> {
        match self.routing {
            Routing::Standard => target.url(&format!("/v1/{path}")),
            Routing::Azure => {
                let config = target.key.azure().ok_or_else(|| {
                    BifrostError::configuration(target.provider, "azure key configuration is missing")
                })?;
                if config.endpoint.is_empty() {
                    return Err(BifrostError::configuration(
                        target.provider,
                        "azure endpoint is not configured",
                    ));
                }
                let endpoint = config.endpoint.trim_end_matches('/');
                let version = config.api_version.as_deref().unwrap_or(AZURE_API_VERSION);
                if target.operation == Operation::ListModels {
                    return Ok(format!("{endpoint}/openai/models?api-version={version}"));
                }
                let deployment = config.deployments.get(model).ok_or_else(|| {
                    BifrostError::configuration(
                        target.provider,
                        format!("no azure deployment configured for model {model}"),
                    )
                })?;
                Ok(format!(
                    "{endpoint}/openai/deployments/{deployment}/{path}?api-version={version}"
                ))
            }
        }
    }
}

impl RequestTranslator for OpenAiDialect {
    fn translate(&self, target: &Target<'_>, request: &CanonicalRequest) -> Result<HttpRequest> {
        let provider = target.provider;
        let model = request.model.as_str();
        let stream = target.streaming();
        let params = &request.params;
        let http = match (target.operation.unary(), &request.input) {
            (Operation::TextCompletion, RequestInput::Text(input)) => post_json(
                provider,
                self.url(target, model, "completions")?,
                &text_body(model, &input.prompt, params, stream),
            )?,
            (Operation::ChatCompletion, _) => {
                let messages = chat_messages(provider, target.operation, request)?;
                post_json(
                    provider,
                    self.url(target, model, "chat/completions")?,
                    &chat_body(model, messages, params, stream),
                )?
            }
            (Operation::Responses, RequestInput::Responses(input)) => post_json(
                provider,
                self.url(target, model, "responses")?,
                &responses_body(model, input, params, stream),
            )?,
            (Operation::Embedding, _) => {
                let texts = embedding_texts(provider, request)?;
                post_json(
                    provider,
                    self.url(target, model, "embeddings")?,
                    &embedding_body(model, texts, params),
                )?
            }
            (Operation::Speech, RequestInput::Speech(input)) => post_json(
                provider,
                self.url(target, model, "audio/speech")?,
                &speech_body(model, input, params, stream),
            )?,
            (Operation::Transcription, RequestInput::Transcription(input)) => {
                if input.file.is_empty() {
                    return Err(BifrostError::configuration(provider, "transcription file is empty"));
                }
                HttpRequest::new(Method::POST, self.url(target, model, "audio/transcriptions")?)
                    .with_body(RequestBody::Multipart(transcription_form(model, input, params, stream)))
            }
            (Operation::ListModels, _) => HttpRequest::get(self.url(target, model, "models")?),
            (_, input) => return Err(mismatch(provider, target.operation, input)),
        };
        Ok(http)
    }
}

impl ResponseTranslator for OpenAiDialect {
    fn translate(
        &self,
        target: &Target<'_>,
        request: &CanonicalRequest,
        response: &HttpResponse,
    ) -> Result<CanonicalResponse> {
        let provider = target.provider;
        let operation = target.operation;
        let canonical = match (operation, &request.input) {
            (Operation::TextCompletion | Operation::ChatCompletion, _) => {
                let mut body: CompletionResponse = parse_json(provider, response)?;
                let choices = body.take_choices();
                let mut out = CanonicalResponse::new(
                    operation,
                    provider.clone(),
                    body.model.take().unwrap_or_else(|| request.model.clone()),
                    ResponseOutput::Choices(choices),
                )
                .with_id(body.id.take())
                .with_usage(body.usage.take().map(Usage::from));
                out.created = body.created;
                out
            }
            (Operation::Responses, _) => {
                let mut body: ResponsesResponse = parse_json(provider, response)?;
                let (items, usage) = body.take_output();
                let mut out = CanonicalResponse::new(
                    operation,
                    provider.clone(),
                    body.model.take().unwrap_or_else(|| request.model.clone()),
                    ResponseOutput::Responses(items),
                )
                .with_id(body.id.take())
                .with_usage(usage);
                out.created = body.created_at;
                out
            }
            (Operation::Embedding, _) => {
                let mut body: EmbeddingResponse = parse_json(provider, response)?;
                let embeddings = body.take_embeddings();
                CanonicalResponse::new(
                    operation,
                    provider.clone(),
                    body.model.take().unwrap_or_else(|| request.model.clone()),
                    ResponseOutput::Embeddings(embeddings),
                )
                .with_usage(body.usage.take().map(Usage::from))
            }
            (Operation::Speech, RequestInput::Speech(input)) => CanonicalResponse::new(
                operation,
                provider.clone(),
                request.model.clone(),
                ResponseOutput::Speech(speech_output(input, response)),
            ),
            (Operation::Transcription, RequestInput::Transcription(input)) => {
                let body = if is_text_format(input) {
                    TranscriptionResponse::plain(&response.body)
                } else {
                    parse_json(provider, response)?
                };
                let (transcript, usage) = body.into_transcript();
                CanonicalResponse::new(
                    operation,
                    provider.clone(),
                    request.model.clone(),
                    ResponseOutput::Transcription(transcript),
                )
                .with_usage(Some(usage))
            }
            (Operation::ListModels, _) => {
                let body: ModelsResponse = parse_json(provider, response)?;
                CanonicalResponse::new(
                    operation,
                    provider.clone(),
                    request.model.clone(),
                    ResponseOutput::Models {
                        models: body.into_models(provider.as_str()),
                        next_page_token: None,
                    },
                )
            }
            (_, input) => return Err(mismatch(provider, operation, input)),
        };
        let mut canonical = canonical;
        canonical.created.get_or_insert_with(unix_secs);
        Ok(canonical)
    }
}

impl DecoderFactory for OpenAiDialect {
    fn decoder(&self, target: &Target<'_>, _request: &CanonicalRequest) -> Box<dyn StreamDecoder> {
        let provider = target.provider.clone();
        match target.operation {
            Operation::ResponsesStream => Box::new(ResponsesStreamDecoder::new(provider)),
            Operation::SpeechStream => Box::new(SpeechStreamDecoder::new(provider)),
            Operation::TranscriptionStream => Box::new(TranscriptionStreamDecoder::new()),
            _ => Box::new(ChatStreamDecoder::new(provider)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::schemas::{AzureKeyConfig, ChatMessage, Key, KeyConfig, Params};

    fn target<'a>(provider: &'a ModelProvider, operation: Operation, key: &'a Key) -> Target<'a> {
        Target {
            provider,
            operation,
            base_url: Some("https://api.openai.com"),
            key,
        }
    }

    #[test]
    fn test_capability_matrix() {
        assert_eq!(parts(&ModelProvider::OpenAi).capabilities, Capabilities::ALL);
        let cerebras = parts(&ModelProvider::Cerebras);
        assert!(cerebras.capabilities.contains(Operation::TextCompletionStream));
        assert!(!cerebras.capabilities.contains(Operation::Responses));
        let mistral = parts(&ModelProvider::Mistral);
        assert!(mistral.responses_via_chat);
        assert!(mistral.capabilities.contains(Operation::Transcription));
        assert!(!mistral.capabilities.contains(Operation::TranscriptionStream));
        assert!(!parts(&ModelProvider::Parasail).capabilities.contains(Operation::ListModels));
    }

    #[test]
    fn test_chat_request() {
        let provider = ModelProvider::OpenAi;
        let key = Key::new("sk-test");
        let request = CanonicalRequest::chat(provider.clone(), "gpt-x", vec![ChatMessage::user("Say hi")])
            .with_params(Params::default().with_max_tokens(10));
        let http = RequestTranslator::translate(
            &OpenAiDialect::standard(),
            &target(&provider, Operation::ChatCompletion, &key),
            &request,
        )
        .unwrap();
        assert_eq!(http.url, "https://api.openai.com/v1/chat/completions");
        let body: serde_json::Value = serde_json::from_slice(http.body.as_bytes().unwrap()).unwrap();
        assert_eq!(body["max_tokens"], 10);
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_chat_response() {
        let provider = ModelProvider::OpenAi;
        let key = Key::new("sk-test");
        let request = CanonicalRequest::chat(provider.clone(), "gpt-x", vec![ChatMessage::user("Say hi")]);
        let body = json!({
            "id": "chatcmpl-1",
            "model": "gpt-x",
            "created": 1_700_000_000,
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        });
        let response = HttpResponse::new(200, serde_json::to_vec(&body).unwrap());
        let canonical = ResponseTranslator::translate(
            &OpenAiDialect::standard(),
            &target(&provider, Operation::ChatCompletion, &key),
            &request,
            &response,
        )
        .unwrap();
        assert_eq!(canonical.text(), Some("Hi"));
        assert_eq!(canonical.usage, Some(Usage::with_total(5, 2, 7)));
        assert_eq!(canonical.created, Some(1_700_000_000));
        assert_eq!(canonical.choices()[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_azure_routing() {
        let provider = ModelProvider::Azure;
        let dialect = OpenAiDialect {
            routing: Routing::Azure,
        };
        let key = Key::new("azure-key").with_config(KeyConfig::Azure(AzureKeyConfig {
            endpoint: "https://res.openai.azure.com/".into(),
            deployments: HashMap::from([("gpt-4o".to_owned(), "prod-4o".to_owned())]),
            api_version: None,
            use_bearer_token: false,
        }));
        let request = CanonicalRequest::chat(provider.clone(), "gpt-4o", vec![ChatMessage::user("x")]);
        let http =
            RequestTranslator::translate(&dialect, &target(&provider, Operation::ChatCompletion, &key), &request)
                .unwrap();
        assert_eq!(
            http.url,
            "https://res.openai.azure.com/openai/deployments/prod-4o/chat/completions?api-version=2024-10-21"
        );

        let unknown = CanonicalRequest::chat(provider.clone(), "gpt-5", vec![ChatMessage::user("x")]);
        let err =
            RequestTranslator::translate(&dialect, &target(&provider, Operation::ChatCompletion, &key), &unknown)
                .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);

        let list = CanonicalRequest::list_models(provider.clone());
        let http = RequestTranslator::translate(&dialect, &target(&provider, Operation::ListModels, &key), &list)
            .unwrap();
        assert_eq!(http.url, "https://res.openai.azure.com/openai/models?api-version=2024-10-21");
    }

    #[test]
    fn test_mismatched_input_is_rejected() {
        let provider = ModelProvider::OpenAi;
        let key = Key::new("k");
        let request = CanonicalRequest::text(provider.clone(), "m", "prompt");
        let err = RequestTranslator::translate(
            &OpenAiDialect::standard(),
            &target(&provider, Operation::Speech, &key),
            &request,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn test_models_are_prefixed() {
        let provider = ModelProvider::OpenAi;
        let key = Key::new("k");
        let request = CanonicalRequest::list_models(provider.clone());
        let response = HttpResponse::new(
            200,
            r#"{"object":"list","data":[{"id":"gpt-4o","owned_by":"openai"}]}"#,
        );
        let canonical = ResponseTranslator::translate(
            &OpenAiDialect::standard(),
            &target(&provider, Operation::ListModels, &key),
            &request,
            &response,
        )
        .unwrap();
        let ResponseOutput::Models { models, .. } = canonical.output else {
            panic!("expected models");
        };
        assert_eq!(models[0].id, "openai/gpt-4o");
    }
}
