//! The per-stream task.
//!
//! [`spawn_stream`] starts one task per stream. The task owns the body,
//! the decoder and the [`DecoderState`], and is the only writer of the
//! channel it returns. Every exit path goes through [`ChunkSink::finish`],
//! which consumes the sink, so exactly one terminal chunk is sent and the
//! channel closes right after it. One channel slot is reserved for that
//! terminal before the body is read, so it never waits on a slow consumer.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc::{self, OwnedPermit};
use tracing::{Instrument, debug, debug_span, warn};

use super::{DecoderState, Frame, FrameReader, PostHook, Step, StreamDecoder};
use crate::context::Context;
use crate::error::BifrostError;
use crate::schemas::{ChunkKind, ExtraFields, ModelProvider, Operation, StreamChunk};
use crate::transport::{ByteStream, done_error};

/// Receiving half of a stream.
pub type ChunkReceiver = mpsc::Receiver<StreamChunk>;

/// Static facts about one stream.
#[derive(Debug, Clone)]
pub struct StreamSpec {
    /// Provider serving the stream.
    pub provider: ModelProvider,
    /// Requested model.
    pub model: String,
    /// Streaming operation.
    pub operation: Operation,
    /// Channel capacity for content chunks.
    pub buffer_size: usize,
    /// Attach each frame's JSON payload to the chunks it produces.
    pub raw_response: bool,
}

enum Stop {
    Completed,
    Failed(BifrostError),
    HookTerminal(Box<StreamChunk>),
    Detached,
}

enum Read {
    Finished(crate::context::DoneReason),
    Next(Option<crate::Result<bytes::Bytes>>),
}

/// Start decoding `body` on a new task and return the chunk channel.
pub fn spawn_stream(
    ctx: Context,
    body: ByteStream,
    decoder: Box<dyn StreamDecoder>,
    hook: Option<Arc<dyn PostHook>>,
    spec: StreamSpec,
) -> ChunkReceiver {
    let (tx, rx) = mpsc::channel(spec.buffer_size.max(1) + 1);
    let span = debug_span!(
        "stream",
        provider = %spec.provider,
        model = %spec.model,
        operation = %spec.operation,
        request_id = %ctx.request_id(),
    );
    tokio::spawn(run(ctx, body, decoder, tx, hook, spec).instrument(span));
    rx
}

async fn run(
    ctx: Context,
    mut body: ByteStream,
    mut decoder: Box<dyn StreamDecoder>,
    tx: mpsc::Sender<StreamChunk>,
    hook: Option<Arc<dyn PostHook>>,
    spec: StreamSpec,
) {
    let Ok(terminal_slot) = tx.clone().reserve_owned().await else {
        debug!("consumer dropped the stream before it started");
        return;
    };
    let sink = ChunkSink {
        tx,
        terminal_slot,
        hook,
        spec,
    };
    let provider = sink.spec.provider.clone();
    let mut state = DecoderState::new();
    let mut reader = FrameReader::new(decoder.framing());

    let stop = 'read: loop {
        let read = tokio::select! {
            biased;
            reason = ctx.done() => Read::Finished(reason),
            next = body.next() => Read::Next(next),
        };
        let (frames, eof) = match read {
            Read::Finished(reason) => break Stop::Failed(done_error(reason, Some(&provider))),
            Read::Next(Some(Ok(bytes))) => (reader.push(&bytes), false),
            Read::Next(Some(Err(err))) => {
                warn!(error = %err, "stream read failed");
                break Stop::Failed(err.with_provider(&provider));
            }
            Read::Next(None) => (reader.finish(), true),
        };

        for frame in frames {
            state.frame_seen();
            match &frame {
                Frame::Done => break 'read Stop::Completed,
                Frame::Error(payload) => {
                    break 'read Stop::Failed(BifrostError::from_payload(&provider, None, payload));
                }
                _ => {}
            }
            let raw = sink.raw_payload(&frame);
            for event in decoder.decode(&frame) {
                match state.apply(event) {
                    Step::Continue => {}
                    Step::Emit(delta) => {
                        if let Err(stop) =
                            sink.send_delta(&ctx, &mut state, delta, raw.clone()).await
                        {
                            break 'read stop;
                        }
                    }
                    Step::Finish => break 'read Stop::Completed,
                    Step::Fail(err) => break 'read Stop::Failed(err.with_provider(&provider)),
                }
            }
        }

        if eof {
            break Stop::Completed;
        }
    };

    sink.finish(&ctx, state, stop).await;
}

struct ChunkSink {
    tx: mpsc::Sender<StreamChunk>,
    terminal_slot: OwnedPermit<StreamChunk>,
    hook: Option<Arc<dyn PostHook>>,
    spec: StreamSpec,
}

impl ChunkSink {
    fn raw_payload(&self, frame: &Frame) -> Option<Value> {
        if !self.spec.raw_response {
            return None;
        }
        frame
            .payload()
            .and_then(|data| serde_json::from_str(data).ok())
    }

    fn chunk(
        &self,
        state: &DecoderState,
        kind: ChunkKind,
        index: usize,
        latency: Duration,
        raw: Option<Value>,
    ) -> StreamChunk {
        let mut extra_fields = ExtraFields::new(
            self.spec.operation,
            self.spec.provider.clone(),
            self.spec.model.clone(),
        );
        extra_fields.chunk_index = Some(index);
        extra_fields.latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        extra_fields.raw_response = raw;
        StreamChunk {
            id: state.message_id().map(ToOwned::to_owned),
            model: self.spec.model.clone(),
            kind,
            extra_fields,
        }
    }

    async fn apply_hook(&self, ctx: &Context, chunk: StreamChunk) -> StreamChunk {
        match &self.hook {
            Some(hook) => hook.on_chunk(ctx, chunk).await,
            None => chunk,
        }
    }

    async fn send_delta(
        &self,
        ctx: &Context,
        state: &mut DecoderState,
        delta: crate::schemas::ChunkDelta,
        raw: Option<Value>,
    ) -> Result<(), Stop> {
        let (index, latency) = state.next_chunk();
        let chunk = self.chunk(state, ChunkKind::Delta(delta), index, latency, raw);
        let chunk = self.apply_hook(ctx, chunk).await;
        if chunk.is_terminal() {
            return Err(Stop::HookTerminal(Box::new(chunk)));
        }

        tokio::select! {
            biased;
            reason = ctx.done() => Err(Stop::Failed(done_error(reason, Some(&self.spec.provider)))),
            sent = self.tx.send(chunk) => sent.map_err(|_| Stop::Detached),
        }
    }

    async fn finish(self, ctx: &Context, mut state: DecoderState, stop: Stop) {
        let kind = match stop {
            Stop::Detached => {
                debug!(chunks = state.emitted(), "consumer dropped the stream");
                state.close();
                return;
            }
            Stop::HookTerminal(chunk) => {
                state.terminate();
                self.deliver(*chunk);
                state.close();
                return;
            }
            Stop::Completed => ChunkKind::Done(state.summary()),
            Stop::Failed(err) => ChunkKind::Error(err),
        };

        let (index, latency) = state.terminate();
        let terminal = self.chunk(&state, kind, index, latency, None);
        let hooked = self.apply_hook(ctx, terminal.clone()).await;
        let terminal = if hooked.is_terminal() {
            hooked
        } else {
            warn!("post-hook replaced a terminal chunk with content, keeping the terminal");
            terminal
        };

        debug!(
            chunks = state.emitted(),
            error = terminal.error().is_some(),
            "stream finished"
        );
        self.deliver(terminal);
        state.close();
    }

    fn deliver(self, terminal: StreamChunk) {
        if self.tx.is_closed() {
            debug!("consumer dropped the stream before the terminal chunk");
        }
        drop(self.terminal_slot.send(terminal));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{ChunkDelta, Usage};
    use crate::ErrorKind;
    use crate::streaming::{Framing, StreamEvent, parse_payload};
    use bytes::Bytes;

    #[derive(Debug, Default)]
    struct TextDecoder;

    impl StreamDecoder for TextDecoder {
        fn decode(&mut self, frame: &Frame) -> Vec<StreamEvent> {
            let Some(value) = frame.payload().and_then(parse_payload::<Value>) else {
                return Vec::new();
            };
            let mut events = Vec::new();
            if let Some(text) = value["delta"]["text"].as_str() {
                events.push(StreamEvent::Delta(ChunkDelta::text(text)));
            }
            if let Some(usage) = value.get("usage") {
                let p = u32::try_from(usage["prompt"].as_u64().unwrap_or(0)).unwrap_or(0);
                let c = u32::try_from(usage["completion"].as_u64().unwrap_or(0)).unwrap_or(0);
                events.push(StreamEvent::Usage(Usage::new(p, c)));
            }
            if value.get("fail").is_some() {
                events.push(StreamEvent::Error(BifrostError::transport(None, "fail")));
            }
            events
        }
    }

    fn spec() -> StreamSpec {
        StreamSpec {
            provider: ModelProvider::OpenAi,
            model: "m".into(),
            operation: Operation::ChatCompletionStream,
            buffer_size: 16,
            raw_response: false,
        }
    }

    fn body(parts: Vec<&'static str>) -> ByteStream {
        Box::pin(futures::stream::iter(
            parts.into_iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))),
        ))
    }

    async fn drain(mut rx: ChunkReceiver) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.push(chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_success_terminal_carries_usage() {
        let rx = spawn_stream(
            Context::new(),
            body(vec![
                "data: {\"delta\":{\"text\":\"Hi\"}}\n\n",
                "data: {\"usage\":{\"prompt\":5,\"completion\":2}}\n\ndata: [DONE]\n\n",
            ]),
            Box::new(TextDecoder),
            None,
            spec(),
        );
        let chunks = drain(rx).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].index(), 0);
        assert_eq!(chunks[0].delta().unwrap().content.as_deref(), Some("Hi"));
        let summary = chunks[1].summary().unwrap();
        assert_eq!(summary.usage, Some(Usage::new(5, 2)));
        assert_eq!(chunks[1].index(), 1);
    }

    #[tokio::test]
    async fn test_eof_without_done_still_terminates() {
        let rx = spawn_stream(
            Context::new(),
            body(vec!["data: {\"delta\":{\"text\":\"a\"}}\n", "data: {\"delta\":{\"text\":\"b\"}}"]),
            Box::new(TextDecoder),
            None,
            spec(),
        );
        let chunks = drain(rx).await;
        assert_eq!(chunks.len(), 3);
        assert!(chunks[2].summary().is_some());
    }

    #[tokio::test]
    async fn test_error_event_ends_stream() {
        let rx = spawn_stream(
            Context::new(),
            body(vec![
                "data: {\"delta\":{\"text\":\"a\"}}\n",
                "data: {\"fail\":true}\n",
                "data: {\"delta\":{\"text\":\"never\"}}\n",
            ]),
            Box::new(TextDecoder),
            None,
            spec(),
        );
        let chunks = drain(rx).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].error().unwrap().provider, Some(ModelProvider::OpenAi));
    }

    #[tokio::test]
    async fn test_bare_error_line_ends_stream() {
        let rx = spawn_stream(
            Context::new(),
            body(vec!["{\"error\":{\"message\":\"overloaded\",\"type\":\"server_error\"}}\n"]),
            Box::new(TextDecoder),
            None,
            spec(),
        );
        let chunks = drain(rx).await;
        assert_eq!(chunks.len(), 1);
        let err = chunks[0].error().unwrap();
        assert_eq!(err.kind, ErrorKind::UpstreamApi);
        assert_eq!(err.message(), "overloaded");
    }

    #[tokio::test]
    async fn test_read_error_ends_stream() {
        let body: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"delta\":{\"text\":\"a\"}}\n")),
            Err(BifrostError::transport(None, "reset")),
        ]));
        let chunks = drain(spawn_stream(
            Context::new(),
            body,
            Box::new(TextDecoder),
            None,
            spec(),
        ))
        .await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].error().unwrap().kind, ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_raw_payload_attached_when_enabled() {
        let mut spec = spec();
        spec.raw_response = true;
        let chunks = drain(spawn_stream(
            Context::new(),
            body(vec!["data: {\"delta\":{\"text\":\"a\"}}\n"]),
            Box::new(TextDecoder),
            None,
            spec,
        ))
        .await;
        assert_eq!(
            chunks[0].extra_fields.raw_response.as_ref().unwrap()["delta"]["text"],
            "a"
        );
        assert!(chunks[1].extra_fields.raw_response.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_reaches_a_stalled_consumer() {
        let mut spec = spec();
        spec.buffer_size = 1;
        let frames: Vec<&'static str> = vec!["data: {\"delta\":{\"text\":\"t\"}}\n"; 8];
        let ctx = Context::new();
        let mut rx = spawn_stream(
            ctx.clone(),
            body(frames),
            Box::new(TextDecoder),
            None,
            spec,
        );
        tokio::task::yield_now().await;
        ctx.cancel();
        tokio::time::sleep(Duration::from_secs(30)).await;

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        let (last, content) = chunks.split_last().unwrap();
        assert_eq!(last.error().unwrap().kind, ErrorKind::RequestCancelled);
        assert!(content.iter().all(|c| !c.is_terminal()));
        assert!(content.len() <= 1);
    }

    #[tokio::test]
    async fn test_brace_framing_is_used() {
        #[derive(Debug)]
        struct Braced;
        impl StreamDecoder for Braced {
            fn framing(&self) -> Framing {
                Framing::Brace(&["delta"])
            }
            fn decode(&mut self, frame: &Frame) -> Vec<StreamEvent> {
                TextDecoder.decode(frame)
            }
        }
        let chunks = drain(spawn_stream(
            Context::new(),
            body(vec!["\u{1}\u{2}{\"delta\":{\"te", "xt\":\"x\"}}\u{3}"]),
            Box::new(Braced),
            None,
            spec(),
        ))
        .await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].delta().unwrap().content.as_deref(), Some("x"));
    }
}
