//! `/invoke` bodies for model-family native formats.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::{BifrostError, Result};
use crate::providers::anthropic::messages::{DEFAULT_MAX_TOKENS, finish_reason};
use crate::providers::common::{insert_opt, merge_extra, parse_json};
use crate::schemas::{Choice, Embedding, ModelProvider, Params, Usage, approximate_tokens};
use crate::transport::HttpResponse;

/// Model families with an `/invoke` text completion format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextFamily {
    Anthropic,
    Mistral,
}

impl TextFamily {
    pub(crate) fn of(provider: &ModelProvider, model: &str) -> Result<Self> {
        if model.contains("anthropic.") {
            Ok(Self::Anthropic)
        } else if model.contains("mistral.") {
            Ok(Self::Mistral)
        } else {
            Err(BifrostError::configuration(
                provider,
                format!("text completion is not supported for model {model}"),
            ))
        }
    }
}

fn claude_prompt(prompt: &str) -> String {
    if prompt.contains("\n\nHuman:") {
        prompt.to_owned()
    } else {
        format!("\n\nHuman: {prompt}\n\nAssistant:")
    }
}

/// Text completion body for `family`.
pub(crate) fn text_body(family: TextFamily, prompt: &str, params: &Params) -> Value {
    let mut body = Map::new();
    match family {
        TextFamily::Anthropic => {
            body.insert("prompt".into(), json!(claude_prompt(prompt)));
            body.insert(
                "max_tokens_to_sample".into(),
                json!(params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
            );
            if !params.stop.is_empty() {
                body.insert("stop_sequences".into(), json!(params.stop));
            }
        }
        TextFamily::Mistral => {
            body.insert("prompt".into(), json!(prompt));
            insert_opt(&mut body, "max_tokens", params.max_tokens);
            if !params.stop.is_empty() {
                body.insert("stop".into(), json!(params.stop));
            }
        }
    }
    insert_opt(&mut body, "temperature", params.temperature);
    insert_opt(&mut body, "top_p", params.top_p);
    merge_extra(&mut body, params);
    Value::Object(body)
}

#[derive(Debug, Deserialize)]
struct MistralOutput {
    #[serde(default)]
    text: String,
    #[serde(default)]
    stop_reason: Option<String>,
}

/// Text completion response of either family.
#[derive(Debug, Deserialize)]
pub(crate) struct TextResponse {
    #[serde(default)]
    completion: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    outputs: Vec<MistralOutput>,
}

impl TextResponse {
    pub(crate) fn into_choices(self) -> Vec<Choice> {
        if let Some(completion) = self.completion {
            let reason = self.stop_reason.as_deref().map(finish_reason);
            return vec![Choice::text(0, completion.trim_start(), reason)];
        }
        (0u32..)
            .zip(self.outputs)
            .map(|(i, output)| {
                let reason = output.stop_reason.map(|r| match r.as_str() {
                    "model_length" => "length".to_owned(),
                    _ => r,
                });
                Choice::text(i, output.text, reason)
            })
            .collect()
    }
}

/// Embedding model families served through `/invoke`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EmbeddingFamily {
    Titan,
    Cohere,
}

impl EmbeddingFamily {
    pub(crate) fn of(provider: &ModelProvider, model: &str) -> Result<Self> {
        if model.contains("amazon.titan-embed-text") {
            Ok(Self::Titan)
        } else if model.contains("cohere.embed") {
            Ok(Self::Cohere)
        } else {
            Err(BifrostError::configuration(
                provider,
                format!("embedding is not supported for model {model}"),
            ))
        }
    }
}

/// Embedding body for `family`.
///
/// # Errors
///
/// Titan embeds one text per call; v1 has a fixed dimension.
pub(crate) fn embedding_body(
    provider: &ModelProvider,
    family: EmbeddingFamily,
    model: &str,
    texts: &[String],
    params: &Params,
) -> Result<Value> {
    match family {
        EmbeddingFamily::Titan => {
            let [text] = texts else {
                return Err(BifrostError::configuration(
                    provider,
                    "titan embedding models accept exactly one input text",
                ));
            };
            let mut body = Map::new();
            body.insert("inputText".into(), json!(text));
            if let Some(dimensions) = params.dimensions {
                if model.contains("titan-embed-text-v1") {
                    return Err(BifrostError::configuration(
                        provider,
                        "titan-embed-text-v1 does not support custom dimensions",
                    ));
                }
                body.insert("dimensions".into(), json!(dimensions));
            }
            merge_extra(&mut body, params);
            Ok(Value::Object(body))
        }
        EmbeddingFamily::Cohere => {
            let mut body = Map::new();
            body.insert("texts".into(), json!(texts));
            body.insert(
                "input_type".into(),
                json!(params.extra_str("input_type").unwrap_or("search_document")),
            );
            merge_extra(&mut body, params);
            Ok(Value::Object(body))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TitanResponse {
    embedding: Vec<f32>,
    #[serde(default)]
    input_text_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct CohereResponse {
    #[serde(default)]
    id: Option<String>,
    embeddings: Vec<Vec<f32>>,
}

/// Parse an embedding response, returning the id, vectors and usage.
pub(crate) fn embedding_output(
    provider: &ModelProvider,
    family: EmbeddingFamily,
    texts: &[String],
    response: &HttpResponse,
) -> Result<(Option<String>, Vec<Embedding>, Usage)> {
    match family {
        EmbeddingFamily::Titan => {
            let resp: TitanResponse = parse_json(provider, response)?;
            Ok((
                None,
                vec![Embedding {
                    index: 0,
                    vector: resp.embedding,
                }],
                Usage::new(resp.input_text_token_count, 0),
            ))
        }
        EmbeddingFamily::Cohere => {
            let resp: CohereResponse = parse_json(provider, response)?;
            let prompt = texts.iter().map(|t| approximate_tokens(t)).sum();
            let vectors = (0u32..)
                .zip(resp.embeddings)
                .map(|(index, vector)| Embedding { index, vector })
                .collect();
            Ok((resp.id, vectors, Usage::new(prompt, 0)))
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_text_families() {
        let provider = ModelProvider::Bedrock;
        assert_eq!(
            TextFamily::of(&provider, "anthropic.claude-v2").unwrap(),
            TextFamily::Anthropic
        );
        assert_eq!(
            TextFamily::of(&provider, "mistral.mistral-7b-instruct-v0:2").unwrap(),
            TextFamily::Mistral
        );
        let err = TextFamily::of(&provider, "meta.llama3").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn test_claude_prompt_is_wrapped() {
        let body = text_body(TextFamily::Anthropic, "Say hi", &Params::default());
        assert_eq!(body["prompt"], "\n\nHuman: Say hi\n\nAssistant:");
        assert_eq!(body["max_tokens_to_sample"], 4096);
    }

    #[test]
    fn test_mistral_outputs() {
        let resp: TextResponse = serde_json::from_value(json!({
            "outputs": [{"text": "hello", "stop_reason": "model_length"}]
        }))
        .unwrap();
        let choices = resp.into_choices();
        assert_eq!(choices[0].message.content.as_deref(), Some("hello"));
        assert_eq!(choices[0].finish_reason.as_deref(), Some("length"));
    }

    #[test]
    fn test_titan_v1_rejects_dimensions() {
        let provider = ModelProvider::Bedrock;
        let mut params = Params::default();
        params.dimensions = Some(256);
        let texts = vec!["a".to_owned()];
        let err = embedding_body(
            &provider,
            EmbeddingFamily::Titan,
            "amazon.titan-embed-text-v1",
            &texts,
            &params,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);

        let body = embedding_body(
            &provider,
            EmbeddingFamily::Titan,
            "amazon.titan-embed-text-v2:0",
            &texts,
            &params,
        )
        .unwrap();
        assert_eq!(body, json!({"inputText": "a", "dimensions": 256}));
    }

    #[test]
    fn test_titan_single_text() {
        let texts = vec!["a".to_owned(), "b".to_owned()];
        assert!(
            embedding_body(
                &ModelProvider::Bedrock,
                EmbeddingFamily::Titan,
                "amazon.titan-embed-text-v2:0",
                &texts,
                &Params::default(),
            )
            .is_err()
        );
    }

    #[test]
    fn test_cohere_embeddings() {
        let texts = vec!["abcd".to_owned(), "efgh".to_owned()];
        let body = embedding_body(
            &ModelProvider::Bedrock,
            EmbeddingFamily::Cohere,
            "cohere.embed-english-v3",
            &texts,
            &Params::default(),
        )
        .unwrap();
        assert_eq!(body["input_type"], "search_document");

        let (id, vectors, usage) = embedding_output(
            &ModelProvider::Bedrock,
            EmbeddingFamily::Cohere,
            &texts,
            &HttpResponse::new(200, r#"{"id":"e1","embeddings":[[0.1],[0.2]]}"#),
        )
        .unwrap();
        assert_eq!(id.as_deref(), Some("e1"));
        assert_eq!(vectors[1].index, 1);
        assert_eq!(usage.prompt_tokens, 2);
    }
}
