//! Error types for gateway operations.
//!
//! [`BifrostError`] and [`ErrorKind`] cover every failure a caller can see:
//! configuration and gating failures raised before any network I/O,
//! transport failures (with cancellation and timeouts kept distinct), and
//! upstream API errors passed through with their original code, type and
//! message.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schemas::{ModelProvider, Operation};

/// Result type alias for gateway operations.
pub type Result<T, E = BifrostError> = std::result::Result<T, E>;

/// Message used for caller-initiated cancellation.
pub const ERR_REQUEST_CANCELLED: &str = "request cancelled by caller";
/// Message used when a deadline or transport timeout fires.
pub const ERR_REQUEST_TIMED_OUT: &str = "provider request timed out";

/// Categories of gateway errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    /// Missing credential or request field, or a gated operation.
    Configuration,
    /// The provider does not implement the operation.
    UnsupportedOperation,
    /// The caller cancelled the request.
    RequestCancelled,
    /// Network, DNS or connection failure.
    Transport,
    /// The deadline or transport timeout was exceeded.
    TransportTimeout,
    /// Upstream bytes did not parse as the expected shape.
    ResponseUnmarshal,
    /// Upstream returned a well-formed error payload.
    UpstreamApi,
    /// A request body could not be serialized.
    Marshal,
}

impl ErrorKind {
    /// Stable snake-case name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::UnsupportedOperation => "unsupported_operation",
            Self::RequestCancelled => "request_cancelled",
            Self::Transport => "transport",
            Self::TransportTimeout => "transport_timeout",
            Self::ResponseUnmarshal => "response_unmarshal",
            Self::UpstreamApi => "upstream_api",
            Self::Marshal => "marshal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error details as reported by the upstream, or synthesized locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorField {
    /// Human readable message.
    pub message: String,
    /// Upstream error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Upstream error type.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Offending request parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    /// Event id for errors delivered inside a stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl ErrorField {
    /// Create an error field carrying only a message.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Read an upstream error payload.
    ///
    /// Accepts `{"error": {...}}`, `{"error": "text"}` and bare error
    /// objects. Numeric codes are kept as text and a `status` field stands
    /// in for a missing `type`.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Self {
        let inner = payload.get("error").unwrap_or(payload);
        let Some(object) = inner.as_object() else {
            return Self::message(scalar(inner).unwrap_or_default());
        };
        Self {
            message: object
                .get("message")
                .or_else(|| object.get("detail"))
                .and_then(scalar)
                .unwrap_or_else(|| inner.to_string()),
            code: object.get("code").and_then(scalar),
            error_type: object
                .get("type")
                .or_else(|| object.get("status"))
                .and_then(scalar),
            param: object.get("param").and_then(scalar),
            event_id: payload.get("event_id").and_then(scalar),
        }
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// The error type returned by every gateway operation.
#[derive(Clone)]
#[non_exhaustive]
pub struct BifrostError {
    /// The error kind.
    pub kind: ErrorKind,
    /// The provider the failure is attributed to.
    pub provider: Option<ModelProvider>,
    /// HTTP status code, when one was received.
    pub status_code: Option<u16>,
    /// Error details.
    pub error: ErrorField,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl BifrostError {
    pub(crate) fn new(
        kind: ErrorKind,
        provider: Option<ModelProvider>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            provider,
            status_code: None,
            error: ErrorField::message(message),
            source: None,
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn configuration(provider: &ModelProvider, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, Some(provider.clone()), message)
    }

    /// Create an unsupported-operation error naming the operation and provider.
    #[must_use]
    pub fn unsupported(operation: Operation, provider: &ModelProvider) -> Self {
        let mut err = Self::new(
            ErrorKind::UnsupportedOperation,
            Some(provider.clone()),
            format!("{} is not supported by {provider} provider", operation.label()),
        );
        err.error.code = Some("unsupported_operation".into());
        err
    }

    /// Create a caller-cancellation error.
    #[must_use]
    pub fn cancelled(provider: Option<&ModelProvider>) -> Self {
        let mut err = Self::new(
            ErrorKind::RequestCancelled,
            provider.cloned(),
            ERR_REQUEST_CANCELLED,
        );
        err.error.error_type = Some(ErrorKind::RequestCancelled.as_str().into());
        err
    }

    /// Create a deadline/timeout error.
    #[must_use]
    pub fn timed_out(provider: Option<&ModelProvider>) -> Self {
        Self::new(
            ErrorKind::TransportTimeout,
            provider.cloned(),
            ERR_REQUEST_TIMED_OUT,
        )
    }

    /// Create a transport error.
    #[must_use]
    pub fn transport(provider: Option<&ModelProvider>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, provider.cloned(), message)
    }

    /// Create a response-unmarshal error. The status code is always recorded.
    #[must_use]
    pub fn unmarshal(provider: &ModelProvider, status: u16, message: impl Into<String>) -> Self {
        let mut err = Self::new(
            ErrorKind::ResponseUnmarshal,
            Some(provider.clone()),
            message,
        );
        err.status_code = Some(status);
        err
    }

    /// Create an upstream API error from a parsed error payload.
    #[must_use]
    pub fn upstream(provider: &ModelProvider, status: Option<u16>, error: ErrorField) -> Self {
        Self {
            kind: ErrorKind::UpstreamApi,
            provider: Some(provider.clone()),
            status_code: status,
            error,
            source: None,
        }
    }

    /// Create an upstream API error from a JSON error payload.
    #[must_use]
    pub fn from_payload(provider: &ModelProvider, status: Option<u16>, payload: &Value) -> Self {
        Self::upstream(provider, status, ErrorField::from_payload(payload))
    }

    /// Create a serialization error.
    #[must_use]
    pub fn marshal(provider: &ModelProvider, err: serde_json::Error) -> Self {
        Self::new(
            ErrorKind::Marshal,
            Some(provider.clone()),
            format!("failed to marshal request body: {err}"),
        )
        .with_source(err)
    }

    /// Attach a low-level cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Attribute the error to a provider if it is not attributed yet.
    #[must_use]
    pub fn with_provider(mut self, provider: &ModelProvider) -> Self {
        if self.provider.is_none() {
            self.provider = Some(provider.clone());
        }
        self
    }

    /// Record the HTTP status code.
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.error.message
    }

    /// Whether the status code signals an authentication failure.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self.status_code, Some(401 | 403))
    }

    /// Whether the caller may reasonably retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::Transport | ErrorKind::TransportTimeout => true,
            ErrorKind::UpstreamApi => {
                matches!(self.status_code, Some(429 | 500 | 502 | 503 | 504))
            }
            _ => false,
        }
    }
}

impl fmt::Debug for BifrostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BifrostError")
            .field("kind", &self.kind)
            .field("provider", &self.provider)
            .field("status_code", &self.status_code)
            .field("error", &self.error)
            .field("source", &self.source.as_ref().map(ToString::to_string))
            .finish()
    }
}

impl fmt::Display for BifrostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(provider) = &self.provider {
            write!(f, "[{provider}] ")?;
        }
        write!(f, "{}", self.error.message)?;
        if let Some(status) = self.status_code {
            write!(f, " (status: {status})")?;
        }
        if let Some(code) = &self.error.code {
            write!(f, " (code: {code})")?;
        }
        Ok(())
    }
}

impl std::error::Error for BifrostError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<reqwest::Error> for BifrostError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timed_out(None).with_source(err)
        } else if err.is_connect() {
            Self::transport(None, format!("connection failed: {err}")).with_source(err)
        } else {
            Self::transport(None, err.to_string()).with_source(err)
        }
    }
}
