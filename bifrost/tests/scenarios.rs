//! End-to-end request/response scenarios over a scripted transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bifrost::auth::{AuthError, AuthHandle, TokenDeriver};
use bifrost::prelude::*;
use bifrost::schemas::VertexKeyConfig;
use bifrost::transport::mock::MockTransport;
use pretty_assertions::assert_eq;
use serde_json::json;

fn build(name: ModelProvider, config: ProviderConfig, transport: &Arc<MockTransport>) -> Provider {
    ProviderRegistry::new()
        .build(&name, config, Arc::clone(transport) as Arc<dyn Transport>)
        .unwrap()
}

fn say_hi(name: ModelProvider) -> CanonicalRequest {
    CanonicalRequest::chat(name, "gpt-x", vec![ChatMessage::user("Say hi")])
        .with_params(Params::default().with_max_tokens(10))
}

#[tokio::test]
async fn test_openai_round_trip() {
    let transport = Arc::new(MockTransport::new());
    transport.push_json(
        200,
        &json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "gpt-x",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        }),
    );
    let provider = build(ModelProvider::OpenAi, ProviderConfig::default(), &transport);
    let response = provider
        .chat_completion(&Context::new(), &Key::new("sk-test"), &say_hi(ModelProvider::OpenAi))
        .await
        .unwrap();

    let sent = transport.last_request().unwrap();
    assert_eq!(sent.url, "https://api.openai.com/v1/chat/completions");
    assert_eq!(
        transport.last_json().unwrap(),
        json!({"model": "gpt-x", "messages": [{"role": "user", "content": "Say hi"}], "max_tokens": 10})
    );
    assert_eq!(response.choices().len(), 1);
    assert_eq!(response.text(), Some("Hi!"));
    assert_eq!(response.usage, Some(Usage::with_total(5, 2, 7)));
    assert_eq!(response.extra_fields.provider, ModelProvider::OpenAi);
    assert_eq!(response.extra_fields.request_type, Operation::ChatCompletion);
}

#[tokio::test]
async fn test_anthropic_round_trip() {
    let transport = Arc::new(MockTransport::new());
    transport.push_json(
        200,
        &json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "gpt-x",
            "content": [{"type": "text", "text": "Hi!"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 5, "output_tokens": 2}
        }),
    );
    let provider = build(ModelProvider::Anthropic, ProviderConfig::default(), &transport);
    let response = provider
        .chat_completion(&Context::new(), &Key::new("sk-ant"), &say_hi(ModelProvider::Anthropic))
        .await
        .unwrap();

    let body = transport.last_json().unwrap();
    assert_eq!(body["model"], "gpt-x");
    assert_eq!(
        body["messages"],
        json!([{"role": "user", "content": [{"type": "text", "text": "Say hi"}]}])
    );
    assert_eq!(body["max_tokens"], 10);
    let sent = transport.last_request().unwrap();
    assert_eq!(sent.header_str("x-api-key"), Some("sk-ant"));

    assert_eq!(response.text(), Some("Hi!"));
    assert_eq!(response.choices()[0].finish_reason.as_deref(), Some("stop"));
    assert_eq!(response.usage, Some(Usage::with_total(5, 2, 7)));
    assert_eq!(response.extra_fields.provider, ModelProvider::Anthropic);
}

#[tokio::test]
async fn test_cohere_round_trip() {
    let transport = Arc::new(MockTransport::new());
    transport.push_json(
        200,
        &json!({
            "id": "c-1",
            "finish_reason": "COMPLETE",
            "message": {"role": "assistant", "content": [{"type": "text", "text": "Hi!"}]},
            "usage": {"tokens": {"input_tokens": 5, "output_tokens": 2}}
        }),
    );
    let provider = build(ModelProvider::Cohere, ProviderConfig::default(), &transport);
    let response = provider
        .chat_completion(&Context::new(), &Key::new("co-key"), &say_hi(ModelProvider::Cohere))
        .await
        .unwrap();
    assert_eq!(transport.last_request().unwrap().url, "https://api.cohere.ai/v2/chat");
    let body = transport.last_json().unwrap();
    assert_eq!(body["messages"], json!([{"role": "user", "content": "Say hi"}]));
    assert_eq!(body["max_tokens"], 10);
    assert_eq!(response.text(), Some("Hi!"));
    assert_eq!(response.usage, Some(Usage::with_total(5, 2, 7)));
    assert_eq!(response.extra_fields.provider, ModelProvider::Cohere);
}

#[tokio::test]
async fn test_unsupported_operation_makes_no_calls() {
    let transport = Arc::new(MockTransport::new());
    let provider = build(ModelProvider::Anthropic, ProviderConfig::default(), &transport);
    let request = CanonicalRequest::embedding(ModelProvider::Anthropic, "claude", ["hello"]);
    let err = provider
        .embedding(&Context::new(), &Key::new("sk-ant"), &request)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedOperation);
    assert_eq!(err.provider, Some(ModelProvider::Anthropic));
    assert!(err.to_string().contains("anthropic"));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_custom_provider_allow_list() {
    let transport = Arc::new(MockTransport::new());
    let config = ProviderConfig::default()
        .with_base_url("https://llm.acme.test")
        .with_custom_provider(ModelProvider::OpenAi, vec![Operation::ChatCompletion]);
    let provider = build(ModelProvider::Custom("acme".into()), config, &transport);
    let request = CanonicalRequest::embedding(ModelProvider::Custom("acme".into()), "m", ["x"]);
    let err = provider
        .embedding(&Context::new(), &Key::new("k"), &request)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Configuration);
    assert_eq!(transport.calls(), 0);
}

#[derive(Debug, Default)]
struct CountingDeriver {
    calls: AtomicUsize,
}

#[async_trait]
impl TokenDeriver for CountingDeriver {
    async fn derive(&self, _ctx: &Context, _credentials: &str) -> Result<AuthHandle, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AuthHandle::new(format!("token-{n}")))
    }
}

#[tokio::test]
async fn test_unauthorized_response_evicts_derived_credential() {
    let transport = Arc::new(MockTransport::new());
    transport.push_json(
        401,
        &json!({"error": {"code": 401, "message": "Request had invalid authentication credentials.", "status": "UNAUTHENTICATED"}}),
    );
    transport.push_json(
        200,
        &json!({
            "id": "c1",
            "model": "google/gemini-2.0-flash",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"}, "finish_reason": "stop"}]
        }),
    );
    let deriver = Arc::new(CountingDeriver::default());
    let registry = ProviderRegistry::new()
        .with_token_deriver(Arc::clone(&deriver) as Arc<dyn TokenDeriver>);
    let provider = registry
        .build(
            &ModelProvider::Vertex,
            ProviderConfig::default().with_base_url("https://vertex.test"),
            Arc::clone(&transport) as Arc<dyn Transport>,
        )
        .unwrap();
    let key = Key::new("").with_config(KeyConfig::Vertex(VertexKeyConfig {
        project_id: "proj".into(),
        region: "us-central1".into(),
        auth_credentials: "{\"type\":\"authorized_user\"}".into(),
    }));
    let request = CanonicalRequest::chat(
        ModelProvider::Vertex,
        "google/gemini-2.0-flash",
        vec![ChatMessage::user("hi")],
    );

    let err = provider
        .chat_completion(&Context::new(), &key, &request)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::UpstreamApi);
    assert_eq!(err.status_code, Some(401));
    assert!(registry.auth_cache().is_empty());

    let response = provider
        .chat_completion(&Context::new(), &key, &request)
        .await
        .unwrap();
    assert_eq!(response.text(), Some("ok"));
    assert_eq!(deriver.calls.load(Ordering::SeqCst), 2);

    let requests = transport.requests();
    assert_eq!(requests[0].header_str("authorization"), Some("Bearer token-0"));
    assert_eq!(requests[1].header_str("authorization"), Some("Bearer token-1"));
}

#[tokio::test]
async fn test_responses_are_served_through_chat() {
    let transport = Arc::new(MockTransport::new());
    transport.push_json(
        200,
        &json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-5-haiku",
            "content": [{"type": "text", "text": "Hello"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 1}
        }),
    );
    let provider = build(ModelProvider::Anthropic, ProviderConfig::default(), &transport);
    let request = CanonicalRequest::new(
        ModelProvider::Anthropic,
        "claude-3-5-haiku",
        RequestInput::Responses(bifrost::schemas::ResponsesInput {
            instructions: Some("be brief".into()),
            messages: vec![ChatMessage::user("hi")],
        }),
    );
    let response = provider
        .responses(&Context::new(), &Key::new("sk-ant"), &request)
        .await
        .unwrap();
    assert!(transport.last_request().unwrap().url.ends_with("/v1/messages"));
    assert_eq!(transport.last_json().unwrap()["system"], "be brief");
    assert_eq!(response.extra_fields.request_type, Operation::Responses);
    assert!(matches!(response.output, ResponseOutput::Responses(_)));
}
