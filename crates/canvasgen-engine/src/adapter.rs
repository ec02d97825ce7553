use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use canvasgen_contracts::errors::{truncate_chars, ErrorKind};
use canvasgen_contracts::models::{Capability, ModelSpec};
use canvasgen_contracts::outcome::{GenerationOutcome, PredictionHandle, RetryKind};
use canvasgen_contracts::providers::ProviderDescriptor;
use canvasgen_contracts::request::GenerationRequest;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use thiserror::Error;

/// HTTP status plus body of one provider call, before any interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    pub content_type: Option<String>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            content_type: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Failure before a provider produced an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("response body read failed: {0}")]
    Body(String),
    /// An input image could not be used; retrying will not help.
    #[error("input image unusable: {0}")]
    InvalidInput(String),
}

impl TransportError {
    pub fn into_outcome(self) -> GenerationOutcome {
        match self {
            Self::InvalidInput(message) => {
                GenerationOutcome::terminal(ErrorKind::Validation, message)
            }
            other => GenerationOutcome::retryable(RetryKind::Transport, other.to_string()),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let text = err.to_string();
        if err.is_timeout() {
            Self::Timeout(text)
        } else if err.is_connect() {
            Self::Connect(text)
        } else if err.is_body() || err.is_decode() {
            Self::Body(text)
        } else {
            Self::Request(text)
        }
    }
}

/// One provider's request construction and response parsing.
///
/// Adapters hold no per-generation state; everything a call needs arrives via
/// the request and the API key, so one instance serves concurrent generations.
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn models(&self) -> &[ModelSpec];

    fn supports_image_to_image(&self, model: &str) -> bool {
        self.models()
            .iter()
            .any(|spec| spec.id == model && spec.supports(Capability::Edit))
    }

    fn requires_credential(&self) -> bool {
        true
    }

    /// Cheap shape check of an API key, no network.
    fn validate_credential_format(&self, api_key: &str) -> bool;

    fn send_request(
        &self,
        request: &GenerationRequest,
        api_key: &str,
    ) -> Result<RawResponse, TransportError>;

    fn parse_response(&self, response: RawResponse) -> GenerationOutcome;

    fn supports_polling(&self) -> bool {
        false
    }

    fn check_pending_status(&self, handle: &PredictionHandle, _api_key: &str) -> GenerationOutcome {
        GenerationOutcome::terminal(
            ErrorKind::PermanentProvider,
            format!(
                "{} does not support status checks (prediction {})",
                self.name(),
                handle.id
            ),
        )
    }

    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            id: self.id().to_string(),
            display_name: self.name().to_string(),
            models: self.models().to_vec(),
        }
    }
}

/// Send, then parse; transport failures become outcomes instead of errors.
pub fn request_outcome(
    adapter: &dyn ProviderAdapter,
    request: &GenerationRequest,
    api_key: &str,
) -> GenerationOutcome {
    match adapter.send_request(request, api_key) {
        Ok(raw) => adapter.parse_response(raw),
        Err(err) => err.into_outcome(),
    }
}

pub(crate) fn read_raw_response(response: HttpResponse) -> Result<RawResponse, TransportError> {
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = response.text().map_err(TransportError::from)?;
    Ok(RawResponse {
        status,
        body,
        content_type,
    })
}

/// Best-effort extraction of a human readable message from an error body.
pub(crate) fn provider_error_message(body: &str) -> String {
    let Ok(payload) = serde_json::from_str::<Value>(body) else {
        return truncate_chars(body.trim(), 512);
    };
    let nested = payload.get("error");
    let candidates = [
        nested.and_then(|error| error.get("message")),
        nested.filter(|error| error.is_string()),
        payload.get("detail"),
        payload.get("message"),
        payload.get("title"),
    ];
    let message = candidates
        .into_iter()
        .flatten()
        .find_map(Value::as_str)
        .map(|text| truncate_chars(text.trim(), 512))
        .unwrap_or_else(|| truncate_chars(body.trim(), 512));
    message
}

pub(crate) fn provider_error_code(body: &str) -> Option<String> {
    let payload = serde_json::from_str::<Value>(body).ok()?;
    payload
        .get("error")
        .and_then(|error| error.get("code").or_else(|| error.get("type")))
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub(crate) fn contains_any(text: &str, phrases: &[&str]) -> bool {
    let lowered = text.to_ascii_lowercase();
    phrases.iter().any(|phrase| lowered.contains(phrase))
}

pub(crate) fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 425 | 429) || status >= 500
}

/// Shared mapping for non-2xx provider answers. Transient statuses retry
/// regardless of wording; moderation phrases only apply to the rest.
pub(crate) fn classify_http_failure(
    provider: &str,
    raw: &RawResponse,
    is_moderation: impl Fn(&str) -> bool,
) -> GenerationOutcome {
    let message = provider_error_message(&raw.body);
    tracing::warn!(
        provider,
        status = raw.status,
        body = %truncate_chars(&raw.body, 2048),
        "provider returned an error"
    );
    let detail = format!("{provider} request failed ({}): {message}", raw.status);
    if is_transient_status(raw.status) {
        return GenerationOutcome::retryable(RetryKind::Provider, detail);
    }
    let code = provider_error_code(&raw.body).unwrap_or_default();
    if is_moderation(&message) || is_moderation(&code) {
        return GenerationOutcome::moderation(message);
    }
    GenerationOutcome::terminal(ErrorKind::PermanentProvider, detail)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InputImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

/// Loads a source/reference/mask image, either from a `data:` URL or over HTTP.
pub(crate) fn fetch_input_image(
    http: &HttpClient,
    url: &str,
    fallback_name: &str,
    timeout: Duration,
) -> Result<InputImage, TransportError> {
    if let Some(rest) = url.strip_prefix("data:") {
        let (meta, data) = rest
            .split_once(',')
            .ok_or_else(|| TransportError::InvalidInput("malformed data URL".to_string()))?;
        let mime_type = meta
            .split(';')
            .next()
            .filter(|value| !value.is_empty())
            .unwrap_or("image/png")
            .to_string();
        let bytes = BASE64
            .decode(data.trim().as_bytes())
            .map_err(|err| TransportError::InvalidInput(format!("data URL decode failed: {err}")))?;
        let file_name = format!("{fallback_name}.{}", extension_for_mime(&mime_type));
        return Ok(InputImage {
            bytes,
            mime_type,
            file_name,
        });
    }

    let response = http.get(url).timeout(timeout).send()?;
    let status = response.status();
    if !status.is_success() {
        let code = status.as_u16();
        if is_transient_status(code) {
            return Err(TransportError::Request(format!(
                "input image download returned {code} ({url})"
            )));
        }
        return Err(TransportError::InvalidInput(format!(
            "input image download returned {code} ({url})"
        )));
    }
    let mime_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
        .filter(|value| value.starts_with("image/"))
        .unwrap_or_else(|| mime_from_url(url).to_string());
    let bytes = response.bytes()?.to_vec();
    if bytes.is_empty() {
        return Err(TransportError::InvalidInput(format!(
            "input image is empty ({url})"
        )));
    }
    let file_name = format!("{fallback_name}.{}", extension_for_mime(&mime_type));
    Ok(InputImage {
        bytes,
        mime_type,
        file_name,
    })
}

pub(crate) fn extension_for_mime(mime_type: &str) -> &'static str {
    let lowered = mime_type.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    "png"
}

fn mime_from_url(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".jpg") || path.ends_with(".jpeg") {
        "image/jpeg"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else {
        "image/png"
    }
}

/// Non-empty trimmed string at `value`, if any.
pub(crate) fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
