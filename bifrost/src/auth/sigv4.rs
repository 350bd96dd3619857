//! AWS Signature Version 4 request signing.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::{Digest, Sha256};
use url::Url;

use super::AuthError;
use crate::schemas::BedrockKeyConfig;
use crate::transport::HttpRequest;

/// Region used when neither the key nor the environment names one.
pub const DEFAULT_REGION: &str = "us-east-1";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Characters left unescaped by SigV4 URI encoding.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

type HmacSha256 = Hmac<Sha256>;

/// Static AWS credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    /// Access key id.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: String,
    /// Session token for temporary credentials.
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"[REDACTED]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl AwsCredentials {
    /// Credentials from a key configuration, when both halves are present.
    #[must_use]
    pub fn from_config(config: &BedrockKeyConfig) -> Option<Self> {
        if config.access_key.is_empty() || config.secret_key.is_empty() {
            return None;
        }
        Some(Self {
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            session_token: config.session_token.clone().filter(|t| !t.is_empty()),
        })
    }

    /// Credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and
    /// `AWS_SESSION_TOKEN`.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Some(Self {
            access_key: var("AWS_ACCESS_KEY_ID")?,
            secret_key: var("AWS_SECRET_ACCESS_KEY")?,
            session_token: var("AWS_SESSION_TOKEN"),
        })
    }
}

/// Region from the key, then `AWS_REGION`/`AWS_DEFAULT_REGION`, then
/// [`DEFAULT_REGION`].
#[must_use]
pub fn resolve_region(config: Option<&BedrockKeyConfig>) -> String {
    config
        .and_then(|c| c.region.clone())
        .filter(|r| !r.is_empty())
        .or_else(|| std::env::var("AWS_REGION").ok().filter(|r| !r.is_empty()))
        .or_else(|| std::env::var("AWS_DEFAULT_REGION").ok().filter(|r| !r.is_empty()))
        .unwrap_or_else(|| DEFAULT_REGION.to_owned())
}

/// Sign a request in place.
///
/// Adds `x-amz-date`, `x-amz-content-sha256`, the session token if any,
/// and the `authorization` header. The host, content type and every
/// `x-amz-*` header are signed.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the body is multipart.
pub fn sign_request(
    request: &mut HttpRequest,
    credentials: &AwsCredentials,
    region: &str,
    service: &str,
    now: DateTime<Utc>,
) -> Result<(), AuthError> {
    let url = Url::parse(&request.url)?;
    let payload = request
        .body
        .as_bytes()
        .ok_or_else(|| AuthError::Signing("multipart bodies cannot be signed".into()))?;
    let payload_hash = hex::encode(Sha256::digest(payload));
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    request.set_header("x-amz-date", &amz_date);
    request.set_header("x-amz-content-sha256", &payload_hash);
    if let Some(token) = &credentials.session_token {
        request.set_header("x-amz-security-token", token);
    }

    let mut headers = BTreeMap::new();
    headers.insert("host".to_owned(), host_header(&url)?);
    for (name, value) in &request.headers {
        let name = name.as_str();
        if name == "content-type" || name.starts_with("x-amz-") {
            let value = value
                .to_str()
                .map_err(|_| AuthError::Signing(format!("header {name} is not ascii")))?;
            headers.insert(name.to_owned(), value.trim().to_owned());
        }
    }

    let (canonical, signed_headers) =
        canonical_request(request.method.as_str(), &url, &headers, &payload_hash);
    let scope = format!("{}/{region}/{service}/aws4_request", &amz_date[..8]);
    let signature = signature(&credentials.secret_key, &amz_date, region, service, &canonical);

    request.set_header(
        "authorization",
        &format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.access_key
        ),
    );
    Ok(())
}

fn host_header(url: &Url) -> Result<String, AuthError> {
    let host = url
        .host_str()
        .ok_or_else(|| AuthError::Signing("url has no host".into()))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    })
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED).to_string()
}

/// Build the canonical request and the signed header list.
fn canonical_request(
    method: &str,
    url: &Url,
    headers: &BTreeMap<String, String>,
    payload_hash: &str,
) -> (String, String) {
    let path = url.path();
    let canonical_uri = if path.is_empty() {
        "/".to_owned()
    } else {
        path.split('/').map(encode).collect::<Vec<_>>().join("/")
    };

    let mut query: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (encode(&k), encode(&v)))
        .collect();
    query.sort();
    let canonical_query = query
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");

    (
        format!(
            "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
        ),
        signed_headers,
    )
}

fn hmac(key: &[u8], data: &str) -> Vec<u8> {
    HmacSha256::new_from_slice(key)
        .map(|mut mac| {
            mac.update(data.as_bytes());
            mac.finalize().into_bytes().to_vec()
        })
        .unwrap_or_default()
}

fn signature(secret: &str, amz_date: &str, region: &str, service: &str, canonical: &str) -> String {
    let date = &amz_date[..8];
    let scope = format!("{date}/{region}/{service}/aws4_request");
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical.as_bytes()))
    );
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date);
    let k_region = hmac(&k_date, region);
    let k_service = hmac(&k_region, service);
    let k_signing = hmac(&k_service, "aws4_request");
    hex::encode(hmac(&k_signing, &string_to_sign))
}
