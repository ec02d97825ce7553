use std::env;
use std::time::Duration;

use canvasgen_contracts::errors::ErrorKind;
use canvasgen_contracts::models::{ModelCatalog, ModelSpec};
use canvasgen_contracts::outcome::{GenerationOutcome, ImageReference, PredictionHandle};
use canvasgen_contracts::request::GenerationRequest;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use crate::adapter::{
    classify_http_failure, contains_any, non_empty_str, provider_error_message,
    read_raw_response, ProviderAdapter, RawResponse, TransportError,
};

/// Replicate holds the create call open for up to `wait` seconds.
const CREATE_TIMEOUT: Duration = Duration::from_secs(15);
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);
const PREFER_WAIT: &str = "wait=10";

const MODERATION_PHRASES: &[&str] = &[
    "flagged as sensitive",
    "nsfw",
    "safety filter",
    "flagged by safety filters",
    "content moderation",
];

pub struct ReplicateAdapter {
    api_base: String,
    http: HttpClient,
    models: Vec<ModelSpec>,
}

impl Default for ReplicateAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicateAdapter {
    pub fn new() -> Self {
        let api_base = env::var("REPLICATE_API_BASE")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "https://api.replicate.com/v1".to_string());
        Self::with_api_base(api_base)
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http: HttpClient::new(),
            models: ModelCatalog::default().for_provider("replicate"),
        }
    }

    fn predictions_endpoint(&self, model: &str) -> String {
        format!("{}/models/{}/predictions", self.api_base, model.trim_matches('/'))
    }

    fn status_endpoint(&self, handle: &PredictionHandle) -> String {
        handle
            .status_url
            .clone()
            .unwrap_or_else(|| format!("{}/predictions/{}", self.api_base, handle.id))
    }

    fn build_input(request: &GenerationRequest) -> Map<String, Value> {
        let mut input = Map::new();
        input.insert("prompt".to_string(), json!(request.prompt));
        if let Some(ratio) = request.aspect_ratio {
            input.insert("aspect_ratio".to_string(), json!(ratio.as_str()));
        } else if request.source_image_url.is_some() {
            input.insert("aspect_ratio".to_string(), json!("match_input_image"));
        }
        match request.output_quality {
            Some(quality) => {
                input.insert("output_format".to_string(), json!("webp"));
                input.insert("output_quality".to_string(), json!(quality));
            }
            None => {
                input.insert("output_format".to_string(), json!("png"));
            }
        }

        let image_urls = request.image_urls();
        if !image_urls.is_empty() {
            if request.model.contains("kontext") {
                input.insert("input_image".to_string(), json!(image_urls[0]));
            } else {
                input.insert("image_input".to_string(), json!(image_urls));
            }
        }
        if let Some(mask_url) = request.mask_url.as_deref() {
            input.insert("mask".to_string(), json!(mask_url));
        }
        input
    }

    fn is_moderation_message(text: &str) -> bool {
        contains_any(text, MODERATION_PHRASES)
    }

    fn first_output_url(output: &Value) -> Option<String> {
        match output {
            Value::String(url) => {
                let trimmed = url.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Value::Array(rows) => rows.iter().find_map(Self::first_output_url),
            Value::Object(obj) => obj.get("url").and_then(Self::first_output_url),
            _ => None,
        }
    }

    fn parse_prediction(&self, prediction: &Value) -> GenerationOutcome {
        let status = prediction
            .get("status")
            .and_then(Value::as_str)
            .map(|value| value.trim().to_ascii_lowercase())
            .unwrap_or_default();
        let prediction_id = non_empty_str(prediction.get("id"));

        match status.as_str() {
            "succeeded" => {
                match prediction.get("output").and_then(Self::first_output_url) {
                    Some(url) => GenerationOutcome::Succeeded {
                        image: ImageReference::Url(url),
                        prediction_id,
                    },
                    None => GenerationOutcome::malformed(
                        "Replicate prediction succeeded without an output URL",
                    ),
                }
            }
            "starting" | "processing" => {
                let Some(id) = prediction_id else {
                    return GenerationOutcome::malformed("Replicate prediction missing id");
                };
                let mut handle = PredictionHandle::new(id);
                if let Some(url) = non_empty_str(
                    prediction
                        .get("urls")
                        .and_then(Value::as_object)
                        .and_then(|urls| urls.get("get")),
                ) {
                    handle = handle.with_status_url(url);
                }
                GenerationOutcome::pending(handle)
            }
            "failed" => {
                let error = prediction
                    .get("error")
                    .map(|value| match value {
                        Value::String(text) => text.trim().to_string(),
                        other => provider_error_message(&other.to_string()),
                    })
                    .filter(|text| !text.is_empty())
                    .unwrap_or_else(|| "prediction failed without an error message".to_string());
                tracing::warn!(
                    provider = "replicate",
                    prediction_id = prediction_id.as_deref().unwrap_or(""),
                    error = %error,
                    "Replicate prediction failed"
                );
                if Self::is_moderation_message(&error) {
                    return GenerationOutcome::moderation(error);
                }
                GenerationOutcome::terminal(
                    ErrorKind::PermanentProvider,
                    format!("Replicate prediction failed: {error}"),
                )
            }
            "canceled" | "cancelled" | "aborted" => GenerationOutcome::terminal(
                ErrorKind::PermanentProvider,
                format!("Replicate prediction was {status}"),
            ),
            "" => GenerationOutcome::malformed("Replicate response missing prediction status"),
            other => GenerationOutcome::malformed(format!(
                "Replicate returned unknown prediction status '{other}'"
            )),
        }
    }
}

impl ProviderAdapter for ReplicateAdapter {
    fn id(&self) -> &str {
        "replicate"
    }

    fn name(&self) -> &str {
        "Replicate"
    }

    fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    fn validate_credential_format(&self, api_key: &str) -> bool {
        let key = api_key.trim();
        key.starts_with("r8_")
            && key.len() == 40
            && key.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    }

    fn send_request(
        &self,
        request: &GenerationRequest,
        api_key: &str,
    ) -> Result<RawResponse, TransportError> {
        let endpoint = self.predictions_endpoint(&request.model);
        let payload = json!({ "input": Self::build_input(request) });
        tracing::debug!(endpoint = %endpoint, "creating Replicate prediction");
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .header("Prefer", PREFER_WAIT)
            .timeout(CREATE_TIMEOUT)
            .json(&payload)
            .send()?;
        read_raw_response(response)
    }

    fn parse_response(&self, response: RawResponse) -> GenerationOutcome {
        if !response.is_success() {
            return classify_http_failure(self.name(), &response, Self::is_moderation_message);
        }
        match response.json() {
            Some(prediction) => self.parse_prediction(&prediction),
            None => GenerationOutcome::malformed("Replicate returned invalid JSON payload"),
        }
    }

    fn supports_polling(&self) -> bool {
        true
    }

    fn check_pending_status(&self, handle: &PredictionHandle, api_key: &str) -> GenerationOutcome {
        let endpoint = self.status_endpoint(handle);
        tracing::debug!(endpoint = %endpoint, prediction_id = %handle.id, "polling Replicate prediction");
        let response = self
            .http
            .get(&endpoint)
            .bearer_auth(api_key)
            .timeout(STATUS_TIMEOUT)
            .send()
            .map_err(TransportError::from)
            .and_then(read_raw_response);
        match response {
            Ok(raw) => self.parse_response(raw),
            Err(err) => err.into_outcome(),
        }
    }
}

#[cfg(test)]
mod tests {
    use canvasgen_contracts::config::QualityPreference;
    use canvasgen_contracts::request::{AspectRatio, GenerationParams};

    use super::*;

    fn adapter() -> ReplicateAdapter {
        ReplicateAdapter::with_api_base("http://localhost/v1/")
    }

    #[test]
    fn token_shape_is_r8_prefixed_forty_chars() {
        let adapter = adapter();
        assert!(adapter.validate_credential_format("r8_0123456789abcdefghijABCDEFGHIJ0123456"));
        assert!(!adapter.validate_credential_format("r8_short"));
        assert!(!adapter.validate_credential_format("sk_0123456789abcdefghijABCDEFGHIJ0123456"));
    }

    #[test]
    fn endpoints_follow_model_and_handle() {
        let adapter = adapter();
        assert_eq!(
            adapter.predictions_endpoint("black-forest-labs/flux-schnell"),
            "http://localhost/v1/models/black-forest-labs/flux-schnell/predictions"
        );
        assert_eq!(
            adapter.status_endpoint(&PredictionHandle::new("abc")),
            "http://localhost/v1/predictions/abc"
        );
        assert_eq!(
            adapter.status_endpoint(
                &PredictionHandle::new("abc").with_status_url("https://api/x/abc")
            ),
            "https://api/x/abc"
        );
    }

    #[test]
    fn kontext_models_take_single_input_image() {
        let request = GenerationRequest::new(
            "make it night",
            "replicate",
            "black-forest-labs/flux-kontext-pro",
            GenerationParams::default().with_source_image("https://cdn/src.png"),
            QualityPreference::Auto,
        );
        let input = ReplicateAdapter::build_input(&request);
        assert_eq!(input["input_image"], json!("https://cdn/src.png"));
        assert_eq!(input["aspect_ratio"], json!("match_input_image"));
        assert!(input.get("image_input").is_none());
    }

    #[test]
    fn text_to_image_input_carries_ratio_and_quality() {
        let params = GenerationParams {
            aspect_ratio: Some(AspectRatio::Widescreen),
            output_quality: Some(80),
            ..GenerationParams::default()
        };
        let request = GenerationRequest::new(
            "a red fox",
            "replicate",
            "black-forest-labs/flux-schnell",
            params,
            QualityPreference::Auto,
        );
        let input = ReplicateAdapter::build_input(&request);
        assert_eq!(input["aspect_ratio"], json!("16:9"));
        assert_eq!(input["output_format"], json!("webp"));
        assert_eq!(input["output_quality"], json!(80));
    }

    #[test]
    fn processing_prediction_becomes_pending_with_status_url() {
        let outcome = adapter().parse_response(RawResponse::new(
            201,
            r#"{"id":"abc","status":"processing","urls":{"get":"https://api/p/abc"}}"#,
        ));
        assert_eq!(
            outcome,
            GenerationOutcome::pending(
                PredictionHandle::new("abc").with_status_url("https://api/p/abc")
            )
        );
    }

    #[test]
    fn succeeded_prediction_uses_first_output_url() {
        let outcome = adapter().parse_response(RawResponse::new(
            200,
            r#"{"id":"abc","status":"succeeded","output":["https://r/1.png","https://r/2.png"]}"#,
        ));
        assert!(matches!(
            outcome,
            GenerationOutcome::Succeeded {
                image: ImageReference::Url(ref url),
                ref prediction_id,
            } if url == "https://r/1.png" && prediction_id.as_deref() == Some("abc")
        ));
    }

    #[test]
    fn failed_prediction_splits_moderation_from_other_failures() {
        let flagged = adapter().parse_response(RawResponse::new(
            200,
            r#"{"id":"abc","status":"failed","error":"Output was flagged as sensitive (E005)"}"#,
        ));
        assert!(matches!(
            flagged,
            GenerationOutcome::Terminal {
                kind: ErrorKind::ContentModeration,
                ..
            }
        ));

        let oom = adapter().parse_response(RawResponse::new(
            200,
            r#"{"id":"abc","status":"failed","error":"CUDA out of memory"}"#,
        ));
        assert!(matches!(
            oom,
            GenerationOutcome::Terminal {
                kind: ErrorKind::PermanentProvider,
                ..
            }
        ));
    }

    #[test]
    fn unknown_status_is_malformed() {
        let outcome = adapter().parse_response(RawResponse::new(200, r#"{"id":"abc"}"#));
        assert_eq!(
            outcome,
            GenerationOutcome::malformed("Replicate response missing prediction status")
        );
    }
}
