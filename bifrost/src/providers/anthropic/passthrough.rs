//! Forwarding of a caller's original Messages API request.

use bytes::Bytes;
use reqwest::Method;

use super::chat_response;
use super::stream::PassthroughDecoder;
use crate::error::{BifrostError, Result};
use crate::providers::{DecoderFactory, RequestTranslator, ResponseTranslator, Target};
use crate::schemas::{CanonicalRequest, CanonicalResponse};
use crate::streaming::StreamDecoder;
use crate::transport::{HttpRequest, HttpResponse, RequestBody};

/// Headers a proxy must not forward.
pub const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Caller headers replaced by the gateway.
const REPLACED_HEADERS: [&str; 4] = ["authorization", "x-api-key", "host", "content-length"];

const DEFAULT_PATH: &str = "/v1/messages?beta=true";

fn forwarded(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    !HOP_BY_HOP_HEADERS.contains(&name.as_str()) && !REPLACED_HEADERS.contains(&name.as_str())
}

/// Forwards the original body, path and filtered headers unchanged.
///
/// Streams are relayed byte for byte; usage and the stop reason are read
/// from a copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicPassthrough;

impl RequestTranslator for AnthropicPassthrough {
    fn translate(&self, target: &Target<'_>, request: &CanonicalRequest) -> Result<HttpRequest> {
        let original = request.passthrough.as_ref().ok_or_else(|| {
            BifrostError::configuration(
                target.provider,
                "passthrough mode requires the original request",
            )
        })?;
        let path = if original.path.is_empty() {
            DEFAULT_PATH
        } else {
            original.path.as_str()
        };
        let mut http = HttpRequest::new(Method::POST, target.url(path)?)
            .with_body(RequestBody::Bytes(Bytes::clone(&original.body)));
        for (name, value) in original.headers.iter().filter(|(n, _)| forwarded(n)) {
            http.set_header(name, value);
        }
        if http.header_str("content-type").is_none() {
            http.set_header("content-type", "application/json");
        }
        if http.header_str("anthropic-version").is_none() {
            http.set_header("anthropic-version", super::API_VERSION);
        }
        Ok(http)
    }
}

impl ResponseTranslator for AnthropicPassthrough {
    fn translate(
        &self,
        target: &Target<'_>,
        request: &CanonicalRequest,
        response: &HttpResponse,
    ) -> Result<CanonicalResponse> {
        chat_response(target, request, response)
    }
}

impl DecoderFactory for AnthropicPassthrough {
    fn decoder(&self, target: &Target<'_>, _request: &CanonicalRequest) -> Box<dyn StreamDecoder> {
        Box::new(PassthroughDecoder::new(target.provider.clone()))
    }
}
