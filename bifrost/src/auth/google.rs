//! Google OAuth access tokens for Vertex AI.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{AuthError, AuthHandle};
use crate::context::Context;
use crate::transport::{HttpRequest, RequestBody, Transport};

/// Default OAuth token endpoint.
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Default GCE metadata server token endpoint.
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Turns credential material into an access token.
#[async_trait]
pub trait TokenDeriver: Send + Sync + fmt::Debug {
    /// Derive a token from a credential blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential is invalid or the exchange fails.
    async fn derive(&self, ctx: &Context, credentials: &str) -> Result<AuthHandle, AuthError>;
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialFile {
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    ServiceAccount {
        client_email: String,
    },
}

#[derive(Deserialize)]
struct StaticToken {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl TokenResponse {
    fn into_handle(self) -> AuthHandle {
        let handle = AuthHandle::new(self.access_token);
        match self.expires_in {
            Some(secs) => handle.expires_in(Duration::from_secs(secs)),
            None => handle,
        }
    }
}

/// Default token deriver.
///
/// Accepts, in order:
/// - a JSON object carrying an `access_token`
/// - an `authorized_user` credential file, exchanged at [`TOKEN_URL`]
/// - an empty credential, resolved through `GOOGLE_APPLICATION_CREDENTIALS`
///   or else the metadata server
///
/// `service_account` keys need JWT signing and must be handled by a
/// custom [`TokenDeriver`].
#[derive(Debug, Clone)]
pub struct GoogleTokenDeriver {
    transport: Arc<dyn Transport>,
    token_url: String,
    metadata_url: String,
}

impl GoogleTokenDeriver {
    /// Create a deriver issuing its exchanges over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            token_url: TOKEN_URL.to_owned(),
            metadata_url: METADATA_TOKEN_URL.to_owned(),
        }
    }

    /// Override the token endpoint.
    #[must_use]
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Override the metadata endpoint.
    #[must_use]
    pub fn with_metadata_url(mut self, url: impl Into<String>) -> Self {
        self.metadata_url = url.into();
        self
    }

    async fn exchange(&self, ctx: &Context, request: HttpRequest) -> Result<AuthHandle, AuthError> {
        let response = self.transport.send(ctx, request).await?;
        if !response.is_success() {
            return Err(AuthError::TokenExchange(format!(
                "token endpoint returned {}: {}",
                response.status,
                String::from_utf8_lossy(&response.body)
            )));
        }
        let token: TokenResponse = serde_json::from_slice(&response.body)?;
        Ok(token.into_handle())
    }

    async fn from_document(&self, ctx: &Context, document: &str) -> Result<AuthHandle, AuthError> {
        if let Ok(token) = serde_json::from_str::<StaticToken>(document) {
            let handle = AuthHandle::new(token.access_token);
            return Ok(match token.expires_in {
                Some(secs) => handle.expires_in(Duration::from_secs(secs)),
                None => handle,
            });
        }

        match serde_json::from_str::<CredentialFile>(document)? {
            CredentialFile::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
            } => {
                debug!("exchanging refresh token");
                let form = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("grant_type", "refresh_token")
                    .append_pair("client_id", &client_id)
                    .append_pair("client_secret", &client_secret)
                    .append_pair("refresh_token", &refresh_token)
                    .finish();
                let request = HttpRequest::new(reqwest::Method::POST, self.token_url.clone())
                    .header("content-type", "application/x-www-form-urlencoded")
                    .with_body(RequestBody::Bytes(form.into()));
                self.exchange(ctx, request).await
            }
            CredentialFile::ServiceAccount { client_email } => Err(AuthError::UnsupportedCredential(
                format!("service account {client_email} requires a custom token deriver"),
            )),
        }
    }
}

#[async_trait]
impl TokenDeriver for GoogleTokenDeriver {
    async fn derive(&self, ctx: &Context, credentials: &str) -> Result<AuthHandle, AuthError> {
        if !credentials.trim().is_empty() {
            return self.from_document(ctx, credentials).await;
        }
        if let Some(path) = std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS") {
            let document = std::fs::read_to_string(&path)?;
            return self.from_document(ctx, &document).await;
        }
        debug!("using metadata server credentials");
        let request = HttpRequest::get(self.metadata_url.clone()).header("metadata-flavor", "Google");
        self.exchange(ctx, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    #[tokio::test]
    async fn test_static_token_document() {
        let deriver = GoogleTokenDeriver::new(Arc::new(MockTransport::new()));
        let handle = deriver
            .derive(&Context::new(), r#"{"access_token":"ya29.x","expires_in":3600}"#)
            .await
            .unwrap();
        assert_eq!(handle.access_token(), "ya29.x");
        assert!(!handle.is_expired());
    }

    #[tokio::test]
    async fn test_authorized_user_exchange() {
        let mock = MockTransport::new();
        mock.push_json(200, &serde_json::json!({"access_token": "fresh", "expires_in": 3599}));
        let deriver =
            GoogleTokenDeriver::new(Arc::new(mock.clone())).with_token_url("https://token.test/");
        let handle = deriver
            .derive(
                &Context::new(),
                r#"{"type":"authorized_user","client_id":"id","client_secret":"s","refresh_token":"r"}"#,
            )
            .await
            .unwrap();
        assert_eq!(handle.access_token(), "fresh");

        let sent = mock.last_request().unwrap();
        assert_eq!(sent.url, "https://token.test/");
        let body = String::from_utf8(sent.body.as_bytes().unwrap().to_vec()).unwrap();
        assert!(body.contains("grant_type=refresh_token"));
        assert!(body.contains("refresh_token=r"));
    }

    #[tokio::test]
    async fn test_exchange_failure() {
        let mock = MockTransport::new();
        mock.push_body(400, r#"{"error":"invalid_grant"}"#);
        let deriver = GoogleTokenDeriver::new(Arc::new(mock));
        let err = deriver
            .derive(
                &Context::new(),
                r#"{"type":"authorized_user","client_id":"id","client_secret":"s","refresh_token":"r"}"#,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenExchange(_)));
    }

    #[tokio::test]
    async fn test_service_account_needs_custom_deriver() {
        let deriver = GoogleTokenDeriver::new(Arc::new(MockTransport::new()));
        let err = deriver
            .derive(
                &Context::new(),
                r#"{"type":"service_account","client_email":"sa@p.iam.gserviceaccount.com"}"#,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnsupportedCredential(_)));
    }
}
