//! AWS Bedrock: the Converse API for chat, `/invoke` for legacy text
//! completion and embeddings.
//!
//! Requests are signed with SigV4 unless the key carries a bearer token.
//! The model path segment comes from the key's deployment map and is
//! prefixed with the inference profile ARN when one is configured.

mod converse;
mod invoke;
mod stream;

use std::sync::Arc;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;

use self::converse::{ConverseResponse, converse_body};
use self::invoke::{EmbeddingFamily, TextFamily, TextResponse, embedding_body, embedding_output, text_body};
use self::stream::ConverseStreamDecoder;
use super::common::{
    chat_messages, embedding_texts, mismatch, parse_json, post_json, unix_nanos, unix_secs,
};
use super::{DecoderFactory, ProviderParts, RequestTranslator, ResponseTranslator, Target};
use crate::auth::{SigV4Auth, resolve_region};
use crate::error::Result;
use crate::schemas::{
    CanonicalRequest, CanonicalResponse, Capabilities, ModelInfo, Operation, RequestInput,
    ResponseOutput, Usage,
};
use crate::streaming::StreamDecoder;
use crate::transport::{HttpRequest, HttpResponse};

/// SigV4 service name.
pub const SIGNING_SERVICE: &str = "bedrock";

const CAPABILITIES: Capabilities = Capabilities::CHAT
    .with(Operation::TextCompletion)
    .with(Operation::Embedding)
    .with(Operation::ListModels);

/// Everything but RFC 3986 unreserved characters.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Strategies for [`crate::schemas::ModelProvider::Bedrock`].
#[must_use]
pub fn parts() -> ProviderParts {
    ProviderParts::uniform(
        CAPABILITIES,
        Arc::new(SigV4Auth::new(SIGNING_SERVICE)),
        BedrockDialect,
    )
    .with_responses_via_chat()
}

/// Escaped model path segment: the deployment for `model`, behind the
/// inference profile ARN when one is set.
fn model_segment(target: &Target<'_>, model: &str) -> String {
    let config = target.key.bedrock();
    let deployment = config
        .and_then(|c| c.deployments.get(model))
        .map_or(model, String::as_str);
    let segment = match config.and_then(|c| c.arn.as_deref()) {
        Some(arn) => format!("{arn}/{deployment}"),
        None => deployment.to_owned(),
    };
    utf8_percent_encode(&segment, PATH_SEGMENT).to_string()
}

fn runtime_url(target: &Target<'_>, model: &str, action: &str) -> String {
    let base = target.base_url.map_or_else(
        || {
            format!(
                "https://bedrock-runtime.{}.amazonaws.com",
                resolve_region(target.key.bedrock())
            )
        },
        str::to_owned,
    );
    format!("{base}/model/{}/{action}", model_segment(target, model))
}

fn control_url(target: &Target<'_>, path: &str) -> String {
    let base = target.base_url.map_or_else(
        || format!("https://bedrock.{}.amazonaws.com", resolve_region(target.key.bedrock())),
        str::to_owned,
    );
    format!("{base}{path}")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelSummary {
    model_id: String,
    #[serde(default)]
    model_name: Option<String>,
    #[serde(default)]
    provider_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FoundationModels {
    #[serde(default)]
    model_summaries: Vec<ModelSummary>,
}

/// The Bedrock wire formats.
#[derive(Debug, Clone, Copy, Default)]
pub struct BedrockDialect;

impl RequestTranslator for BedrockDialect {
    fn translate(&self, target: &Target<'_>, request: &CanonicalRequest) -> Result<HttpRequest> {
        let provider = target.provider;
        let model = request.model.as_str();
        match (target.operation, &request.input) {
            (Operation::ChatCompletion | Operation::ChatCompletionStream, _) => {
                let messages = chat_messages(provider, target.operation, request)?;
                let body = converse_body(provider, messages, &request.params)?;
                let action = if target.streaming() {
                    "converse-stream"
                } else {
                    "converse"
                };
                post_json(provider, runtime_url(target, model, action), &body)
            }
            (Operation::TextCompletion, RequestInput::Text(input)) => {
                let family = TextFamily::of(provider, model)?;
                let body = text_body(family, &input.prompt, &request.params);
                post_json(provider, runtime_url(target, model, "invoke"), &body)
            }
            (Operation::Embedding, _) => {
                let texts = embedding_texts(provider, request)?;
                let family = EmbeddingFamily::of(provider, model)?;
                let body = embedding_body(provider, family, model, texts, &request.params)?;
                post_json(provider, runtime_url(target, model, "invoke"), &body)
            }
            (Operation::ListModels, RequestInput::ListModels(_)) => {
                Ok(HttpRequest::get(control_url(target, "/foundation-models")))
            }
            (_, input) => Err(mismatch(provider, target.operation, input)),
        }
    }
}

impl ResponseTranslator for BedrockDialect {
    fn translate(
        &self,
        target: &Target<'_>,
        request: &CanonicalRequest,
        response: &HttpResponse,
    ) -> Result<CanonicalResponse> {
        let provider = target.provider;
        let mut canonical = match target.operation {
            Operation::TextCompletion => {
                let body: TextResponse = parse_json(provider, response)?;
                CanonicalResponse::new(
                    target.operation,
                    provider.clone(),
                    request.model.clone(),
                    ResponseOutput::Choices(body.into_choices()),
                )
                .with_id(Some(format!("bedrock-{}", unix_nanos())))
            }
            Operation::Embedding => {
                let texts = embedding_texts(provider, request)?;
                let family = EmbeddingFamily::of(provider, &request.model)?;
                let (id, vectors, usage) = embedding_output(provider, family, texts, response)?;
                CanonicalResponse::new(
                    target.operation,
                    provider.clone(),
                    request.model.clone(),
                    ResponseOutput::Embeddings(vectors),
                )
                .with_id(id)
                .with_usage(Some(usage))
            }
            Operation::ListModels => {
                let body: FoundationModels = parse_json(provider, response)?;
                let models = body
                    .model_summaries
                    .into_iter()
                    .map(|m| ModelInfo {
                        id: format!("{}/{}", provider.as_str(), m.model_id),
                        name: m.model_name,
                        owned_by: m.provider_name,
                        context_length: None,
                    })
                    .collect();
                return Ok(CanonicalResponse::new(
                    target.operation,
                    provider.clone(),
                    request.model.clone(),
                    ResponseOutput::Models {
                        models,
                        next_page_token: None,
                    },
                ));
            }
            _ => {
                let mut body: ConverseResponse = parse_json(provider, response)?;
                let choice = body.take_choice();
                CanonicalResponse::new(
                    target.operation,
                    provider.clone(),
                    request.model.clone(),
                    ResponseOutput::Choices(vec![choice]),
                )
                .with_id(Some(format!("bedrock-{}", unix_nanos())))
                .with_usage(body.usage.take().map(Usage::from))
            }
        };
        canonical.created = Some(unix_secs());
        Ok(canonical)
    }
}

impl DecoderFactory for BedrockDialect {
    fn decoder(&self, target: &Target<'_>, _request: &CanonicalRequest) -> Box<dyn StreamDecoder> {
        Box::new(ConverseStreamDecoder::new(target.provider.clone()))
    }
}
