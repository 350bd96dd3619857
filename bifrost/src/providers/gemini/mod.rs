//! Google Gemini API.
//!
//! Chat, speech and transcription all go through `generateContent`;
//! speech asks for the `AUDIO` modality and transcription sends the audio
//! inline next to a prompt. Embeddings use the `OpenAI`-compatible path.

mod content;
mod stream;

use std::sync::Arc;

use self::content::{
    GenerateContentResponse, ModelsPage, chat_body, speech_body, transcription_body,
};
use self::stream::{GeminiStreamDecoder, Mode};
use super::common::{chat_messages, embedding_texts, mismatch, parse_json, post_json, unix_secs};
use super::openai::OpenAiDialect;
use super::openai::chat::embedding_body;
use super::{DecoderFactory, ProviderParts, RequestTranslator, ResponseTranslator, Target};
use crate::auth::ApiKeyAuth;
use crate::error::Result;
use crate::schemas::{
    CanonicalRequest, CanonicalResponse, Capabilities, Operation, RequestInput, ResponseOutput,
    SpeechOutput, Transcript, Usage,
};
use crate::streaming::StreamDecoder;
use crate::transport::{HttpRequest, HttpResponse};

pub use self::content::MAX_INLINE_AUDIO_BYTES;

const CAPABILITIES: Capabilities = Capabilities::CHAT.union(Capabilities::of(&[
    Operation::Embedding,
    Operation::Speech,
    Operation::SpeechStream,
    Operation::Transcription,
    Operation::TranscriptionStream,
    Operation::ListModels,
]));

/// Strategies for [`crate::schemas::ModelProvider::Gemini`].
#[must_use]
pub fn parts() -> ProviderParts {
    ProviderParts::uniform(
        CAPABILITIES,
        Arc::new(ApiKeyAuth::header("x-goog-api-key")),
        GeminiDialect,
    )
    .with_responses_via_chat()
}

fn generate_url(target: &Target<'_>, model: &str) -> Result<String> {
    if target.streaming() {
        target.url(&format!("/models/{model}:streamGenerateContent?alt=sse"))
    } else {
        target.url(&format!("/models/{model}:generateContent"))
    }
}

/// The Gemini wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiDialect;

impl RequestTranslator for GeminiDialect {
    fn translate(&self, target: &Target<'_>, request: &CanonicalRequest) -> Result<HttpRequest> {
        let provider = target.provider;
        let model = request.model.as_str();
        let params = &request.params;
        match (target.operation, &request.input) {
            (Operation::ChatCompletion | Operation::ChatCompletionStream, _) => {
                let messages = chat_messages(provider, target.operation, request)?;
                let body = chat_body(provider, messages, params)?;
                post_json(provider, generate_url(target, model)?, &body)
            }
            (Operation::Speech | Operation::SpeechStream, RequestInput::Speech(input)) => {
                post_json(provider, generate_url(target, model)?, &speech_body(input, params))
            }
            (
                Operation::Transcription | Operation::TranscriptionStream,
                RequestInput::Transcription(input),
            ) => {
                let body = transcription_body(provider, input, params)?;
                post_json(provider, generate_url(target, model)?, &body)
            }
            (Operation::Embedding, _) => {
                let texts = embedding_texts(provider, request)?;
                post_json(
                    provider,
                    target.url("/openai/embeddings")?,
                    &embedding_body(model, texts, params),
                )
            }
            (Operation::ListModels, RequestInput::ListModels(input)) => {
                let mut query = url::form_urlencoded::Serializer::new(String::new());
                if let Some(size) = input.page_size {
                    query.append_pair("pageSize", &size.to_string());
                }
                if let Some(token) = &input.page_token {
                    query.append_pair("pageToken", token);
                }
                let query = query.finish();
                let path = if query.is_empty() {
                    "/models".to_owned()
                } else {
                    format!("/models?{query}")
                };
                Ok(HttpRequest::get(target.url(&path)?))
            }
            (_, input) => Err(mismatch(provider, target.operation, input)),
        }
    }
}

impl ResponseTranslator for GeminiDialect {
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
                return ResponseTranslator::translate(
                    &OpenAiDialect::standard(),
                    target,
                    request,
                    response,
                );
            }
            Operation::ListModels => {
                let page: ModelsPage = parse_json(provider, response)?;
                let (models, next_page_token) = page.into_page(provider.as_str());
                return Ok(CanonicalResponse::new(
                    operation,
                    provider.clone(),
                    request.model.clone(),
                    ResponseOutput::Models {
                        models,
                        next_page_token,
                    },
                ));
            }
            Operation::Speech => {
                let mut body: GenerateContentResponse = parse_json(provider, response)?;
                let (audio, format) = body.audio();
                CanonicalResponse::new(
                    operation,
                    provider.clone(),
                    body.model_version.take().unwrap_or_else(|| request.model.clone()),
                    ResponseOutput::Speech(SpeechOutput { audio, format }),
                )
                .with_usage(body.usage_metadata.take().map(Usage::from))
            }
            Operation::Transcription => {
                let mut body: GenerateContentResponse = parse_json(provider, response)?;
                let transcript = Transcript {
                    text: body.text(),
                    language: match &request.input {
                        RequestInput::Transcription(input) => input.language.clone(),
                        _ => None,
                    },
                    ..Transcript::default()
                };
                CanonicalResponse::new(
                    operation,
                    provider.clone(),
                    body.model_version.take().unwrap_or_else(|| request.model.clone()),
                    ResponseOutput::Transcription(transcript),
                )
                .with_usage(body.usage_metadata.take().map(Usage::from))
            }
            _ => {
                let mut body: GenerateContentResponse = parse_json(provider, response)?;
                let choices = body.take_choices();
                CanonicalResponse::new(
                    operation,
                    provider.clone(),
                    body.model_version.take().unwrap_or_else(|| request.model.clone()),
                    ResponseOutput::Choices(choices),
                )
                .with_id(body.response_id.take())
                .with_usage(body.usage_metadata.take().map(Usage::from))
            }
        };
        canonical.created = Some(unix_secs());
        Ok(canonical)
    }
}

impl DecoderFactory for GeminiDialect {
    fn decoder(&self, target: &Target<'_>, _request: &CanonicalRequest) -> Box<dyn StreamDecoder> {
        let mode = match target.operation {
            Operation::SpeechStream => Mode::Speech,
            Operation::TranscriptionStream => Mode::Transcription,
            _ => Mode::Chat,
        };
        Box::new(GeminiStreamDecoder::new(target.provider.clone(), mode))
    }
}
