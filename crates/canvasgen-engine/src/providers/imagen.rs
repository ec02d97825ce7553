use std::env;
use std::time::Duration;

use canvasgen_contracts::errors::ErrorKind;
use canvasgen_contracts::models::{ModelCatalog, ModelSpec};
use canvasgen_contracts::outcome::GenerationOutcome;
use canvasgen_contracts::request::{AspectRatio, GenerationRequest};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use crate::adapter::{
    classify_http_failure, contains_any, non_empty_str, read_raw_response, ProviderAdapter,
    RawResponse, TransportError,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

const MODERATION_PHRASES: &[&str] = &[
    "responsible ai",
    "sensitive words",
    "safety filter",
];

pub struct ImagenAdapter {
    api_base: String,
    http: HttpClient,
    models: Vec<ModelSpec>,
}

impl Default for ImagenAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ImagenAdapter {
    pub fn new() -> Self {
        let api_base = env::var("IMAGEN_API_BASE")
            .ok()
            .or_else(|| env::var("GEMINI_API_BASE").ok())
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());
        Self::with_api_base(api_base)
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http: HttpClient::new(),
            models: ModelCatalog::default().for_provider("imagen"),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        let model = model.trim().trim_start_matches("models/");
        format!("{}/models/{}:predict", self.api_base, model)
    }

    /// Imagen only knows five ratios; anything else snaps to the nearest one.
    fn aspect_ratio(ratio: Option<AspectRatio>) -> &'static str {
        let Some(ratio) = ratio else {
            return "1:1";
        };
        let allowed = [
            AspectRatio::Square,
            AspectRatio::ClassicPortrait,
            AspectRatio::Classic,
            AspectRatio::Tall,
            AspectRatio::Widescreen,
        ];
        let target = ratio.ratio();
        let mut best = AspectRatio::Square;
        let mut best_delta = f64::MAX;
        for candidate in allowed {
            let delta = (candidate.ratio() - target).abs();
            if delta < best_delta {
                best = candidate;
                best_delta = delta;
            }
        }
        best.as_str()
    }

    fn build_payload(request: &GenerationRequest) -> Value {
        let mut parameters = Map::new();
        parameters.insert("sampleCount".to_string(), json!(1));
        parameters.insert(
            "aspectRatio".to_string(),
            json!(Self::aspect_ratio(request.aspect_ratio)),
        );
        parameters.insert("includeRaiReason".to_string(), json!(true));
        if let Some(quality) = request.output_quality {
            parameters.insert(
                "outputOptions".to_string(),
                json!({
                    "mimeType": "image/jpeg",
                    "compressionQuality": quality,
                }),
            );
        }
        json!({
            "instances": [{ "prompt": request.prompt }],
            "parameters": parameters,
        })
    }

    fn is_moderation_message(text: &str) -> bool {
        contains_any(text, MODERATION_PHRASES)
    }
}

impl ProviderAdapter for ImagenAdapter {
    fn id(&self) -> &str {
        "imagen"
    }

    fn name(&self) -> &str {
        "Google Imagen"
    }

    fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    fn validate_credential_format(&self, api_key: &str) -> bool {
        let key = api_key.trim();
        key.starts_with("AIza")
            && key.len() == 39
            && key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    }

    fn send_request(
        &self,
        request: &GenerationRequest,
        api_key: &str,
    ) -> Result<RawResponse, TransportError> {
        let endpoint = self.endpoint(&request.model);
        tracing::debug!(endpoint = %endpoint, "sending Imagen prediction");
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(REQUEST_TIMEOUT)
            .json(&Self::build_payload(request))
            .send()?;
        read_raw_response(response)
    }

    fn parse_response(&self, response: RawResponse) -> GenerationOutcome {
        if !response.is_success() {
            return classify_http_failure(self.name(), &response, Self::is_moderation_message);
        }
        let Some(payload) = response.json() else {
            return GenerationOutcome::malformed("Imagen returned invalid JSON payload");
        };
        let predictions = payload
            .get("predictions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut filtered_reason = None;
        for prediction in &predictions {
            if let Some(encoded) = non_empty_str(
                prediction
                    .get("bytesBase64Encoded")
                    .or_else(|| prediction.get("bytes_base64_encoded")),
            ) {
                let mime_type = non_empty_str(prediction.get("mimeType"))
                    .unwrap_or_else(|| "image/png".to_string());
                return GenerationOutcome::succeeded_base64(encoded, Some(mime_type));
            }
            if filtered_reason.is_none() {
                filtered_reason = non_empty_str(prediction.get("raiFilteredReason"));
            }
        }

        if let Some(reason) = filtered_reason {
            tracing::warn!(provider = "imagen", reason = %reason, "Imagen filtered the prompt");
            return GenerationOutcome::moderation(reason);
        }
        if predictions.is_empty() && payload.as_object().is_some_and(|obj| obj.is_empty()) {
            // Imagen answers `{}` when every sample was filtered.
            return GenerationOutcome::terminal(
                ErrorKind::ContentModeration,
                "Imagen returned no images; the prompt was likely filtered",
            );
        }
        GenerationOutcome::malformed("Imagen response returned no images")
    }
}
