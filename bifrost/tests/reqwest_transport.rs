//! The reqwest transport against a local HTTP server.

use std::sync::Arc;

use bifrost::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use tracing_subscriber::EnvFilter;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn provider(name: ModelProvider, server: &MockServer) -> anyhow::Result<Provider> {
    init_tracing();
    let transport = ReqwestTransport::new(&TransportConfig::default())?;
    let provider = ProviderRegistry::new().build(
        &name,
        ProviderConfig::default()
            .with_base_url(server.uri())
            .with_header("x-trace", "t-1"),
        Arc::new(transport),
    )?;
    Ok(provider)
}

#[tokio::test]
async fn test_unary_chat_over_http() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("x-trace", "t-1"))
        .and(body_partial_json(json!({"model": "gpt-x", "max_tokens": 10})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "model": "gpt-x",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = CanonicalRequest::chat(ModelProvider::OpenAi, "gpt-x", vec![ChatMessage::user("Say hi")])
        .with_params(Params::default().with_max_tokens(10));
    let response = provider(ModelProvider::OpenAi, &server)?
        .chat_completion(&Context::new(), &Key::new("sk-test"), &request)
        .await?;
    assert_eq!(response.text(), Some("Hi"));
    assert_eq!(response.usage, Some(Usage::with_total(5, 2, 7)));
    Ok(())
}

#[tokio::test]
async fn test_sse_stream_over_http() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hi\"}}]}\n\n",
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: {\"id\":\"c1\",\"choices\":[],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2,\"total_tokens\":7}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let request = CanonicalRequest::chat(ModelProvider::OpenAi, "gpt-x", vec![ChatMessage::user("Say hi")]);
    let mut rx = provider(ModelProvider::OpenAi, &server)?
        .chat_completion_stream(&Context::new(), &Key::new("sk-test"), &request, None)
        .await?;
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    let last = chunks.pop().unwrap();
    let summary = last.summary().unwrap();
    assert_eq!(summary.usage, Some(Usage::with_total(5, 2, 7)));
    assert_eq!(summary.finish_reason.as_deref(), Some("stop"));
    let text: String = chunks
        .iter()
        .filter_map(|c| c.delta().and_then(|d| d.content.clone()))
        .collect();
    assert_eq!(text, "Hi");
    Ok(())
}

#[tokio::test]
async fn test_upstream_error_is_passed_through() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "type": "error",
            "error": {"type": "rate_limit_error", "message": "Number of requests has exceeded your rate limit"}
        })))
        .mount(&server)
        .await;

    let request = CanonicalRequest::chat(ModelProvider::Anthropic, "claude-3-5-haiku", vec![ChatMessage::user("hi")]);
    let err = provider(ModelProvider::Anthropic, &server)
        .unwrap()
        .chat_completion(&Context::new(), &Key::new("sk-ant"), &request)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::UpstreamApi);
    assert_eq!(err.status_code, Some(429));
    assert_eq!(err.error.error_type.as_deref(), Some("rate_limit_error"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_streaming_handshake_failure_is_returned_directly() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error", "code": "invalid_api_key"}
        })))
        .mount(&server)
        .await;

    let request = CanonicalRequest::chat(ModelProvider::OpenAi, "gpt-x", vec![ChatMessage::user("hi")]);
    let err = provider(ModelProvider::OpenAi, &server)
        .unwrap()
        .chat_completion_stream(&Context::new(), &Key::new("sk-bad"), &request, None)
        .await
        .unwrap_err();
    assert_eq!(err.status_code, Some(401));
    assert_eq!(err.error.code.as_deref(), Some("invalid_api_key"));
}
