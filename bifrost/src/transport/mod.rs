//! Transport invoker.
//!
//! The [`Transport`] trait is the `do(request) -> response-or-stream`
//! contract the gateway runs over. Implementations must:
//!
//! - race every call against the [`Context`] and report caller cancellation
//!   as [`ErrorKind::RequestCancelled`](crate::ErrorKind::RequestCancelled)
//!   and deadlines as
//!   [`ErrorKind::TransportTimeout`](crate::ErrorKind::TransportTimeout)
//! - return non-2xx bodies untouched; interpreting them is the provider's job
//! - never share one connection between two in-flight requests
//!
//! [`ReqwestTransport`] is the production implementation and
//! [`mock::MockTransport`] a scripted, call-counting one for tests.

mod client;
mod multipart;

pub mod mock;

pub use client::{ProxyConfig, ProxyKind, ReqwestTransport, TransportConfig};
pub use multipart::{FormPart, MultipartForm};

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::context::{Context, DoneReason};
use crate::error::{BifrostError, Result};
use crate::schemas::ModelProvider;

/// Stream of raw body bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Outbound request body.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// JSON or other pre-encoded bytes.
    Bytes(Bytes),
    /// Multipart form upload.
    Multipart(MultipartForm),
}

impl RequestBody {
    /// Encoded bytes, when the body is not multipart.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Empty => Some(&[]),
            Self::Bytes(b) => Some(b),
            Self::Multipart(_) => None,
        }
    }
}

/// An outbound HTTP request.
#[derive(Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Headers.
    pub headers: HeaderMap,
    /// Body.
    pub body: RequestBody,
    /// Per-request timeout. For streams it bounds only the handshake.
    pub timeout: Option<Duration>,
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpRequest {
    /// Create a request without a body.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            timeout: None,
        }
    }

    /// Create a GET request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a POST request with a JSON body.
    #[must_use]
    pub fn post_json(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self::new(Method::POST, url)
            .header("content-type", "application/json")
            .with_body(RequestBody::Bytes(Bytes::from(body)))
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Set a header, ignoring names or values that are not valid HTTP.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Set a header in place, ignoring names or values that are not valid HTTP.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
    }

    /// Set a bearer authorization header.
    #[must_use]
    pub fn bearer(self, token: &str) -> Self {
        self.header("authorization", &format!("Bearer {token}"))
    }

    /// Header value as a string.
    #[must_use]
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Headers.
    pub headers: HeaderMap,
    /// Body bytes.
    pub body: Bytes,
}

impl HttpResponse {
    /// Create a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Header value as a string.
    #[must_use]
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A response whose body is read incrementally.
pub struct StreamingResponse {
    /// Status code.
    pub status: u16,
    /// Headers.
    pub headers: HeaderMap,
    /// Body stream.
    pub body: ByteStream,
}

impl fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl StreamingResponse {
    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Read the rest of the body, honoring cancellation.
    ///
    /// # Errors
    ///
    /// Returns the read error, or a cancellation/timeout error if the
    /// context finishes first.
    pub async fn collect(self, ctx: &Context) -> Result<HttpResponse> {
        let Self {
            status,
            headers,
            mut body,
        } = self;
        let mut buf = BytesMut::new();
        loop {
            let next = tokio::select! {
                biased;
                reason = ctx.done() => return Err(done_error(reason, None)),
                next = body.next() => next,
            };
            match next {
                Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }
        Ok(HttpResponse {
            status,
            headers,
            body: buf.freeze(),
        })
    }
}

/// Map a finished context to its error kind.
#[must_use]
pub fn done_error(reason: DoneReason, provider: Option<&ModelProvider>) -> BifrostError {
    match reason {
        DoneReason::Cancelled => BifrostError::cancelled(provider),
        DoneReason::DeadlineExceeded => BifrostError::timed_out(provider),
    }
}

/// The pluggable HTTP client.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Issue a unary call and read the whole body.
    ///
    /// # Errors
    ///
    /// Returns `RequestCancelled`, `TransportTimeout` or `Transport` errors.
    /// Non-2xx statuses are not errors at this layer.
    async fn send(&self, ctx: &Context, request: HttpRequest) -> Result<HttpResponse>;

    /// Issue a streaming call and return once headers arrive.
    ///
    /// # Errors
    ///
    /// Same classification as [`Transport::send`]; errors after the
    /// handshake surface as items of the body stream.
    async fn send_streaming(&self, ctx: &Context, request: HttpRequest)
    -> Result<StreamingResponse>;
}
