//! `reqwest`-backed transport.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{
    HttpRequest, HttpResponse, RequestBody, StreamingResponse, Transport, done_error,
};
use crate::context::Context;
use crate::error::{BifrostError, Result};

/// Proxy flavour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyKind {
    /// No proxy, ignoring the environment.
    None,
    /// Proxy settings from `HTTP_PROXY`/`HTTPS_PROXY`.
    #[default]
    Environment,
    /// HTTP(S) proxy.
    Http,
    /// SOCKS5 proxy (requires the `socks` feature).
    Socks5,
}

/// Outbound proxy settings.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy flavour.
    #[serde(rename = "type", default)]
    pub kind: ProxyKind,
    /// Proxy URL for `http` and `socks5` proxies.
    #[serde(default)]
    pub url: Option<String>,
    /// Basic-auth user.
    #[serde(default)]
    pub username: Option<String>,
    /// Basic-auth password.
    #[serde(default)]
    pub password: Option<String>,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Shared HTTP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// How long idle pooled connections are kept, in seconds.
    pub pool_idle_timeout_secs: Option<u64>,
    /// Maximum idle connections per host.
    pub pool_max_idle_per_host: usize,
    /// User agent string.
    pub user_agent: Option<String>,
    /// Proxy settings.
    pub proxy: Option<ProxyConfig>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(10),
            pool_idle_timeout_secs: Some(90),
            pool_max_idle_per_host: 32,
            user_agent: Some(concat!("bifrost/", env!("CARGO_PKG_VERSION")).to_owned()),
            proxy: None,
        }
    }
}

impl TransportConfig {
    /// Build a reqwest client with this configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the proxy URL is invalid or the
    /// client cannot be built.
    pub fn build_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().pool_max_idle_per_host(self.pool_max_idle_per_host);

        if let Some(secs) = self.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.pool_idle_timeout_secs {
            builder = builder.pool_idle_timeout(Duration::from_secs(secs));
        }
        if let Some(ref user_agent) = self.user_agent {
            builder = builder.user_agent(user_agent);
        }

        match self.proxy.as_ref().map(|p| (p.kind, p)) {
            None | Some((ProxyKind::Environment, _)) => {}
            Some((ProxyKind::None, _)) => builder = builder.no_proxy(),
            Some((ProxyKind::Http | ProxyKind::Socks5, proxy)) => {
                let url = proxy
                    .url
                    .as_deref()
                    .ok_or_else(|| config_error("proxy url is required"))?;
                let mut p = reqwest::Proxy::all(url)
                    .map_err(|e| config_error(format!("invalid proxy url: {e}")))?;
                if let Some(user) = &proxy.username {
                    p = p.basic_auth(user, proxy.password.as_deref().unwrap_or_default());
                }
                builder = builder.proxy(p);
            }
        }

        builder
            .build()
            .map_err(|e| config_error(format!("failed to build HTTP client: {e}")))
    }
}

fn config_error(message: impl Into<String>) -> BifrostError {
    BifrostError::transport(None, message)
}

/// Production transport over a pooled `reqwest::Client`.
///
/// The client pool is shared across calls; every call gets its own
/// request and response buffers.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be built.
    pub fn new(config: &TransportConfig) -> Result<Self> {
        Ok(Self {
            client: config.build_client()?,
        })
    }

    /// Wrap an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn builder(&self, request: HttpRequest) -> Result<reqwest::RequestBuilder> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
            timeout: _,
        } = request;
        let builder = self.client.request(method, url).headers(headers);
        Ok(match body {
            RequestBody::Empty => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::Multipart(form) => builder.multipart(form.into_reqwest()?),
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    async fn send(&self, ctx: &Context, request: HttpRequest) -> Result<HttpResponse> {
        let timeout = request.timeout;
        let mut builder = self.builder(request)?;
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let call = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok::<_, BifrostError>(HttpResponse {
                status,
                headers,
                body,
            })
        };

        let response = tokio::select! {
            biased;
            reason = ctx.done() => Err(done_error(reason, None)),
            result = call => result,
        }?;
        debug!(status = response.status, bytes = response.body.len(), "upstream call finished");
        Ok(response)
    }

    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    async fn send_streaming(
        &self,
        ctx: &Context,
        request: HttpRequest,
    ) -> Result<StreamingResponse> {
        let timeout = request.timeout;
        let call = self.builder(request)?.send();

        let handshake = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .map_err(|_| BifrostError::timed_out(None))?
                    .map_err(BifrostError::from),
                None => call.await.map_err(BifrostError::from),
            }
        };

        let response = tokio::select! {
            biased;
            reason = ctx.done() => Err(done_error(reason, None)),
            result = handshake => result,
        }?;

        let status = response.status().as_u16();
        debug!(status, "upstream stream opened");
        Ok(StreamingResponse {
            status,
            headers: response.headers().clone(),
            body: Box::pin(
                response
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(BifrostError::from)),
            ),
        })
    }
}
