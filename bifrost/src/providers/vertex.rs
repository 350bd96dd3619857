//! Google Vertex AI.
//!
//! Claude models are served by the Anthropic publisher endpoint in the
//! Messages format; every other chat model goes through the
//! `OpenAI`-compatible endpoint. Embeddings use the `:predict` API.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::anthropic::chat_response;
use super::anthropic::messages::messages_body;
use super::anthropic::stream::MessagesStreamDecoder;
use super::common::{chat_messages, embedding_texts, mismatch, parse_json, post_json, unix_secs};
use super::openai::chat::chat_body;
use super::openai::stream::ChatStreamDecoder;
use super::openai::OpenAiDialect;
use super::{DecoderFactory, ProviderParts, RequestTranslator, ResponseTranslator, Target};
use crate::auth::{AuthClientCache, OAuthAuth, TokenDeriver};
use crate::error::{BifrostError, Result};
use crate::schemas::{
    CanonicalRequest, CanonicalResponse, Capabilities, Embedding, Operation, ResponseOutput, Usage,
    VertexKeyConfig,
};
use crate::streaming::StreamDecoder;
use crate::transport::{HttpRequest, HttpResponse};

/// `anthropic_version` sent to the Anthropic publisher endpoint.
pub const ANTHROPIC_VERSION: &str = "vertex-2023-10-16";

const CAPABILITIES: Capabilities = Capabilities::CHAT.with(Operation::Embedding);

/// Strategies for [`crate::schemas::ModelProvider::Vertex`].
#[must_use]
pub fn parts(cache: Arc<AuthClientCache>, deriver: Arc<dyn TokenDeriver>) -> ProviderParts {
    ProviderParts::uniform(
        CAPABILITIES,
        Arc::new(OAuthAuth::new(cache, deriver)),
        VertexDialect,
    )
    .with_responses_via_chat()
}

fn is_claude(model: &str) -> bool {
    model.contains("claude")
}

fn config<'a>(target: &Target<'a>) -> Result<&'a VertexKeyConfig> {
    let config = target.key.vertex().ok_or_else(|| {
        BifrostError::configuration(target.provider, "vertex key config is not set")
    })?;
    if config.project_id.is_empty() {
        return Err(BifrostError::configuration(target.provider, "project id is not set"));
    }
    if config.region.is_empty() {
        return Err(BifrostError::configuration(target.provider, "region is not set"));
    }
    Ok(config)
}

fn host(target: &Target<'_>, config: &VertexKeyConfig) -> String {
    target.base_url.map_or_else(
        || format!("https://{}-aiplatform.googleapis.com", config.region),
        str::to_owned,
    )
}

#[derive(Debug, Deserialize)]
struct Statistics {
    #[serde(default)]
    token_count: f64,
}

#[derive(Debug, Deserialize)]
struct Values {
    values: Vec<f32>,
    #[serde(default)]
    statistics: Option<Statistics>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    embeddings: Values,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

/// The Vertex routing over the Anthropic and `OpenAI` formats.
#[derive(Debug, Clone, Copy, Default)]
pub struct VertexDialect;

impl RequestTranslator for VertexDialect {
    fn translate(&self, target: &Target<'_>, request: &CanonicalRequest) -> Result<HttpRequest> {
        let provider = target.provider;
        let config = config(target)?;
        let host = host(target, config);
        let (project, region) = (&config.project_id, &config.region);
        let model = request.model.as_str();
        match target.operation {
            Operation::ChatCompletion | Operation::ChatCompletionStream if is_claude(model) => {
                let messages = chat_messages(provider, target.operation, request)?;
                let mut body =
                    messages_body(provider, None, messages, &request.params, target.streaming())?;
                body.entry("anthropic_version")
                    .or_insert_with(|| json!(ANTHROPIC_VERSION));
                let method = if target.streaming() {
                    "streamRawPredict"
                } else {
                    "rawPredict"
                };
                let url = format!(
                    "{host}/v1/projects/{project}/locations/{region}/publishers/anthropic/models/{model}:{method}"
                );
                post_json(provider, url, &body)
            }
            Operation::ChatCompletion | Operation::ChatCompletionStream => {
                let messages = chat_messages(provider, target.operation, request)?;
                let body = chat_body(model, messages, &request.params, target.streaming());
                let url = format!(
                    "{host}/v1beta1/projects/{project}/locations/{region}/endpoints/openapi/chat/completions"
                );
                post_json(provider, url, &body)
            }
            Operation::Embedding => {
                let texts = embedding_texts(provider, request)?;
                let instances: Vec<Value> =
                    texts.iter().map(|text| json!({ "content": text })).collect();
                let mut body = Map::new();
                body.insert("instances".into(), Value::Array(instances));
                if let Some(dimensions) = request.params.dimensions {
                    body.insert(
                        "parameters".into(),
                        json!({ "outputDimensionality": dimensions }),
                    );
                }
                let url = format!(
                    "{host}/v1/projects/{project}/locations/{region}/publishers/google/models/{model}:predict"
                );
                post_json(provider, url, &body)
            }
            _ => Err(mismatch(provider, target.operation, &request.input)),
        }
    }
}

impl ResponseTranslator for VertexDialect {
    fn translate(
        &self,
        target: &Target<'_>,
        request: &CanonicalRequest,
        response: &HttpResponse,
    ) -> Result<CanonicalResponse> {
        let provider = target.provider;
        match target.operation {
            Operation::Embedding => {
                let body: PredictResponse = parse_json(provider, response)?;
                let mut prompt = 0.0;
                let embeddings = (0u32..)
                    .zip(body.predictions)
                    .map(|(index, prediction)| {
                        if let Some(stats) = prediction.embeddings.statistics {
                            prompt += stats.token_count;
                        }
                        Embedding {
                            index,
                            vector: prediction.embeddings.values,
                        }
                    })
                    .collect();
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let prompt = prompt as u32;
                let mut canonical = CanonicalResponse::new(
                    target.operation,
                    provider.clone(),
                    request.model.clone(),
                    ResponseOutput::Embeddings(embeddings),
                )
                .with_usage(Some(Usage::new(prompt, 0)));
                canonical.created = Some(unix_secs());
                Ok(canonical)
            }
            _ if is_claude(&request.model) => chat_response(target, request, response),
            _ => ResponseTranslator::translate(&OpenAiDialect::standard(), target, request, response),
        }
    }
}

impl DecoderFactory for VertexDialect {
    fn decoder(&self, target: &Target<'_>, request: &CanonicalRequest) -> Box<dyn StreamDecoder> {
        let provider = target.provider.clone();
        if is_claude(&request.model) {
            Box::new(MessagesStreamDecoder::new(provider))
        } else {
            Box::new(ChatStreamDecoder::new(provider))
        }
    }
}
