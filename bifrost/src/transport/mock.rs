//! Scripted transport for tests.
//!
//! [`MockTransport`] replays queued responses in order, records every
//! request it receives and counts calls, so tests can assert both what a
//! provider sent and that gated operations never reached the network.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;

use super::{HttpRequest, HttpResponse, StreamingResponse, Transport, done_error};
use crate::context::Context;
use crate::error::{BifrostError, Result};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// A complete body.
    Body {
        /// Status code.
        status: u16,
        /// Body bytes.
        body: Bytes,
    },
    /// A body delivered as separate reads.
    Chunks {
        /// Status code.
        status: u16,
        /// Reads, in order.
        chunks: Vec<Bytes>,
        /// Pause before each read.
        delay: Option<Duration>,
        /// Keep the body open after the last read instead of ending it.
        hold_open: bool,
    },
    /// A transport-level failure.
    Fail(BifrostError),
}

#[derive(Debug, Default)]
struct MockState {
    replies: VecDeque<MockReply>,
    requests: Vec<HttpRequest>,
}

/// A call-counting transport that replays scripted replies.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a transport with no scripted replies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Queue a reply.
    pub fn push(&self, reply: MockReply) -> &Self {
        self.with_state(|s| s.replies.push_back(reply));
        self
    }

    /// Queue a JSON body.
    pub fn push_json(&self, status: u16, body: &serde_json::Value) -> &Self {
        self.push(MockReply::Body {
            status,
            body: Bytes::from(body.to_string()),
        })
    }

    /// Queue a raw body.
    pub fn push_body(&self, status: u16, body: impl Into<Bytes>) -> &Self {
        self.push(MockReply::Body {
            status,
            body: body.into(),
        })
    }

    /// Queue a 200 body delivered as the given reads.
    pub fn push_chunks<I, B>(&self, chunks: I) -> &Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        self.push(MockReply::Chunks {
            status: 200,
            chunks: chunks.into_iter().map(Into::into).collect(),
            delay: None,
            hold_open: false,
        })
    }

    /// Queue a transport failure.
    pub fn push_error(&self, error: BifrostError) -> &Self {
        self.push(MockReply::Fail(error))
    }

    /// Number of calls received.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.with_state(|s| s.requests.len())
    }

    /// Every request received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.with_state(|s| s.requests.clone())
    }

    /// The most recent request.
    #[must_use]
    pub fn last_request(&self) -> Option<HttpRequest> {
        self.with_state(|s| s.requests.last().cloned())
    }

    /// Body of the most recent request parsed as JSON.
    #[must_use]
    pub fn last_json(&self) -> Option<serde_json::Value> {
        self.last_request()
            .and_then(|r| r.body.as_bytes().and_then(|b| serde_json::from_slice(b).ok()))
    }

    fn next_reply(&self, request: HttpRequest) -> Result<MockReply> {
        self.with_state(|s| {
            s.requests.push(request);
            s.replies
                .pop_front()
                .ok_or_else(|| BifrostError::transport(None, "no scripted reply queued"))
        })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, ctx: &Context, request: HttpRequest) -> Result<HttpResponse> {
        if let Some(reason) = ctx.err() {
            return Err(done_error(reason, None));
        }
        match self.next_reply(request)? {
            MockReply::Body { status, body } => Ok(HttpResponse::new(status, body)),
            MockReply::Chunks { status, chunks, .. } => {
                Ok(HttpResponse::new(status, chunks.concat()))
            }
            MockReply::Fail(err) => Err(err),
        }
    }

    async fn send_streaming(
        &self,
        ctx: &Context,
        request: HttpRequest,
    ) -> Result<StreamingResponse> {
        if let Some(reason) = ctx.err() {
            return Err(done_error(reason, None));
        }
        let (status, chunks, delay, hold_open) = match self.next_reply(request)? {
            MockReply::Body { status, body } => (status, vec![body], None, false),
            MockReply::Chunks {
                status,
                chunks,
                delay,
                hold_open,
            } => (status, chunks, delay, hold_open),
            MockReply::Fail(err) => return Err(err),
        };

        let body = async_stream::stream! {
            for chunk in chunks {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(chunk);
            }
            if hold_open {
                std::future::pending::<()>().await;
            }
        };

        Ok(StreamingResponse {
            status,
            headers: HeaderMap::new(),
            body: Box::pin(body),
        })
    }
}
