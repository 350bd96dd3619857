//! Invariants every stream upholds, exercised through provider façades.

use std::sync::Arc;
use std::time::Duration;

use bifrost::prelude::*;
use bifrost::streaming::brace::BraceScanner;
use bifrost::transport::mock::{MockReply, MockTransport};
use bytes::Bytes;
use pretty_assertions::assert_eq;

fn provider(name: ModelProvider, transport: &Arc<MockTransport>) -> Provider {
    ProviderRegistry::new()
        .build(
            &name,
            ProviderConfig::default().with_base_url("http://upstream.test"),
            Arc::clone(transport) as Arc<dyn Transport>,
        )
        .unwrap()
}

fn chat(name: ModelProvider, model: &str) -> CanonicalRequest {
    CanonicalRequest::chat(name, model, vec![ChatMessage::user("Say hi")])
}

async fn drain(mut rx: ChunkReceiver) -> Vec<StreamChunk> {
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    chunks
}

fn assert_well_formed(chunks: &[StreamChunk]) {
    let (last, content) = chunks.split_last().expect("at least the terminal chunk");
    assert!(last.is_terminal(), "last chunk must be terminal: {last:?}");
    assert!(content.iter().all(|c| !c.is_terminal()), "only one terminal chunk");
    let indices: Vec<usize> = content.iter().map(StreamChunk::index).collect();
    assert_eq!(indices, (0..content.len()).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_openai_stream_indices_and_terminal() {
    let transport = Arc::new(MockTransport::new());
    transport.push_chunks([
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"con",
        "tent\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: {\"id\":\"c1\",\"choices\":[],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2,\"total_tokens\":7}}\n\ndata: [DONE]\n\n",
    ]);
    let provider = provider(ModelProvider::OpenAi, &transport);
    let rx = provider
        .chat_completion_stream(
            &Context::new(),
            &Key::new("sk-test"),
            &chat(ModelProvider::OpenAi, "gpt-x"),
            None,
        )
        .await
        .unwrap();
    let chunks = drain(rx).await;
    assert_well_formed(&chunks);

    let text: String = chunks
        .iter()
        .filter_map(|c| c.delta().and_then(|d| d.content.clone()))
        .collect();
    assert_eq!(text, "Hello");
    let summary = chunks.last().and_then(StreamChunk::summary).unwrap();
    assert_eq!(summary.finish_reason.as_deref(), Some("stop"));
    assert_eq!(summary.usage, Some(Usage::with_total(5, 2, 7)));
    assert!(chunks.iter().all(|c| c.id.as_deref() == Some("c1")));
}

#[tokio::test]
async fn test_anthropic_usage_never_decreases() {
    let transport = Arc::new(MockTransport::new());
    transport.push_chunks([
        "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"role\":\"assistant\",\"usage\":{\"input_tokens\":12,\"output_tokens\":1}}}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
        "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":4}}\n\n",
        "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
    ]);
    let provider = provider(ModelProvider::Anthropic, &transport);
    let rx = provider
        .chat_completion_stream(
            &Context::new(),
            &Key::new("sk-ant"),
            &chat(ModelProvider::Anthropic, "claude-3-5-haiku"),
            None,
        )
        .await
        .unwrap();
    let chunks = drain(rx).await;
    assert_well_formed(&chunks);
    let usage = chunks.last().and_then(StreamChunk::summary).and_then(|s| s.usage).unwrap();
    assert_eq!(usage.prompt_tokens, 12);
    assert_eq!(usage.completion_tokens, 4);
}

#[tokio::test]
async fn test_upstream_error_event_is_single_error_terminal() {
    let transport = Arc::new(MockTransport::new());
    transport.push_chunks([
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"a\"}}]}\n\n",
        "data: {\"error\":{\"message\":\"overloaded\",\"type\":\"server_error\"}}\n\n",
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"never\"}}]}\n\n",
    ]);
    let provider = provider(ModelProvider::OpenAi, &transport);
    let rx = provider
        .chat_completion_stream(
            &Context::new(),
            &Key::new("sk-test"),
            &chat(ModelProvider::OpenAi, "gpt-x"),
            None,
        )
        .await
        .unwrap();
    let chunks = drain(rx).await;
    assert_well_formed(&chunks);
    assert_eq!(chunks.len(), 2);
    let err = chunks[1].error().unwrap();
    assert_eq!(err.kind, ErrorKind::UpstreamApi);
    assert_eq!(err.message(), "overloaded");
}

#[tokio::test]
async fn test_cancellation_mid_stream_ends_with_cancelled_error() {
    let transport = Arc::new(MockTransport::new());
    let frames: Vec<Bytes> = (0..50)
        .map(|i| {
            Bytes::from(format!(
                "data: {{\"id\":\"c1\",\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"t{i}\"}}}}]}}\n\n"
            ))
        })
        .collect();
    transport.push(MockReply::Chunks {
        status: 200,
        chunks: frames,
        delay: Some(Duration::from_millis(20)),
        hold_open: true,
    });
    let provider = provider(ModelProvider::OpenAi, &transport);
    let ctx = Context::new();
    let mut rx = provider
        .chat_completion_stream(
            &ctx,
            &Key::new("sk-test"),
            &chat(ModelProvider::OpenAi, "gpt-x"),
            None,
        )
        .await
        .unwrap();

    let mut seen = Vec::new();
    while seen.len() < 2 {
        seen.push(rx.recv().await.unwrap());
    }
    ctx.cancel();

    let rest = tokio::time::timeout(Duration::from_secs(2), drain(rx))
        .await
        .expect("channel closes promptly after cancellation");
    seen.extend(rest);
    assert_well_formed(&seen);
    let err = seen.last().and_then(StreamChunk::error).unwrap();
    assert_eq!(err.kind, ErrorKind::RequestCancelled);
}

#[tokio::test]
async fn test_bedrock_brace_frames_split_across_reads() {
    let body: &[u8] = b"\x00\x00\x01\x0b:event-type\x07\x00\x0cmessageStart{\"p\":\"abc\",\"role\":\"assistant\"}\x8f\x01\
\x00\x00\x00\x9a{\"contentBlockIndex\":0,\"delta\":{\"text\":\"Hi {there}\"},\"p\":\"x\"}\x11\
\x00{\"contentBlockIndex\":0,\"p\":\"y\"}\x00\
{\"p\":\"z\",\"stopReason\":\"end_turn\"}\x02\
{\"metrics\":{\"latencyMs\":10},\"p\":\"w\",\"usage\":{\"inputTokens\":3,\"outputTokens\":2,\"totalTokens\":5}}";

    let mut whole = BraceScanner::new(&["role", "delta", "stopReason", "usage", "contentBlockIndex"]);
    let mut expected = whole.push(body);
    expected.extend(whole.finish());
    assert!(!expected.is_empty());

    for split in [1, 7, 40, 90, body.len() - 3] {
        let transport = Arc::new(MockTransport::new());
        transport.push_chunks([
            Bytes::copy_from_slice(&body[..split]),
            Bytes::copy_from_slice(&body[split..]),
        ]);
        let provider = provider(ModelProvider::Bedrock, &transport);
        let rx = provider
            .chat_completion_stream(
                &Context::new(),
                &Key::new("bedrock-api-key"),
                &chat(ModelProvider::Bedrock, "anthropic.claude-3-haiku"),
                None,
            )
            .await
            .unwrap();
        let chunks = drain(rx).await;
        assert_well_formed(&chunks);
        let text: String = chunks
            .iter()
            .filter_map(|c| c.delta().and_then(|d| d.content.clone()))
            .collect();
        assert_eq!(text, "Hi {there}", "split at {split}");
        let summary = chunks.last().and_then(StreamChunk::summary).unwrap();
        assert_eq!(summary.finish_reason.as_deref(), Some("stop"));
        assert_eq!(summary.usage, Some(Usage::with_total(3, 2, 5)));
    }
}

#[tokio::test]
async fn test_post_hook_sees_every_chunk() {
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Counter(AtomicUsize);

    #[async_trait]
    impl PostHook for Counter {
        async fn on_chunk(&self, _ctx: &Context, chunk: StreamChunk) -> StreamChunk {
            self.0.fetch_add(1, Ordering::SeqCst);
            chunk
        }
    }

    let transport = Arc::new(MockTransport::new());
    transport.push_chunks([
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"a\"}}]}\n\n",
        "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"b\"}}]}\n\ndata: [DONE]\n\n",
    ]);
    let counter = Arc::new(Counter::default());
    let provider = provider(ModelProvider::OpenAi, &transport);
    let rx = provider
        .chat_completion_stream(
            &Context::new(),
            &Key::new("sk-test"),
            &chat(ModelProvider::OpenAi, "gpt-x"),
            Some(Arc::clone(&counter) as Arc<dyn PostHook>),
        )
        .await
        .unwrap();
    let chunks = drain(rx).await;
    assert_well_formed(&chunks);
    assert_eq!(counter.0.load(Ordering::SeqCst), chunks.len());
}
