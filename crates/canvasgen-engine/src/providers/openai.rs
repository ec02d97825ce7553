use std::env;
use std::time::Duration;

use canvasgen_contracts::config::QualityPreference;
use canvasgen_contracts::models::{ModelCatalog, ModelSpec};
use canvasgen_contracts::outcome::GenerationOutcome;
use canvasgen_contracts::request::{AspectRatio, GenerationRequest};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use crate::adapter::{
    classify_http_failure, contains_any, fetch_input_image, non_empty_str, read_raw_response,
    ProviderAdapter, RawResponse, TransportError,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const INPUT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const MODERATION_PHRASES: &[&str] = &[
    "safety system",
    "content_policy_violation",
    "moderation_blocked",
    "flagged by safety",
    "violates our usage policies",
];

pub struct OpenAiAdapter {
    api_base: String,
    http: HttpClient,
    models: Vec<ModelSpec>,
}

impl Default for OpenAiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiAdapter {
    pub fn new() -> Self {
        let api_base = env::var("OPENAI_API_BASE")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Self::with_api_base(api_base)
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http: HttpClient::new(),
            models: ModelCatalog::default().for_provider("openai"),
        }
    }

    fn is_gpt_image_model(model: &str) -> bool {
        model.trim().to_ascii_lowercase().starts_with("gpt-image")
    }

    fn size_for(model: &str, ratio: Option<AspectRatio>) -> &'static str {
        let ratio = ratio.unwrap_or(AspectRatio::Square);
        if Self::is_gpt_image_model(model) {
            if ratio.is_landscape() {
                return "1536x1024";
            }
            if ratio.is_portrait() {
                return "1024x1536";
            }
            return "1024x1024";
        }
        if model == "dall-e-3" {
            if ratio.is_landscape() {
                return "1792x1024";
            }
            if ratio.is_portrait() {
                return "1024x1792";
            }
        }
        "1024x1024"
    }

    fn quality_for(model: &str, quality: QualityPreference) -> Option<&'static str> {
        if Self::is_gpt_image_model(model) {
            return Some(quality.as_str());
        }
        if model == "dall-e-3" {
            return match quality {
                QualityPreference::High => Some("hd"),
                QualityPreference::Low | QualityPreference::Medium => Some("standard"),
                QualityPreference::Auto => None,
            };
        }
        None
    }

    /// Fields shared by the JSON and multipart bodies.
    fn base_fields(request: &GenerationRequest) -> Map<String, Value> {
        let model = request.model.as_str();
        let mut fields = Map::new();
        fields.insert("model".to_string(), json!(model));
        fields.insert("prompt".to_string(), json!(request.prompt));
        fields.insert("n".to_string(), json!(1));
        fields.insert(
            "size".to_string(),
            json!(Self::size_for(model, request.aspect_ratio)),
        );
        if let Some(quality) = Self::quality_for(model, request.quality) {
            fields.insert("quality".to_string(), json!(quality));
        }
        if Self::is_gpt_image_model(model) {
            let moderation = request
                .moderation
                .map(|level| level.as_str())
                .unwrap_or("auto");
            fields.insert("moderation".to_string(), json!(moderation));
            if let Some(compression) = request.output_quality {
                fields.insert("output_format".to_string(), json!("webp"));
                fields.insert("output_compression".to_string(), json!(compression));
            }
        } else {
            fields.insert("response_format".to_string(), json!("url"));
        }
        if model == "dall-e-3" {
            if let Some(style) = request.style {
                fields.insert("style".to_string(), json!(style.as_str()));
            }
        }
        fields
    }

    fn generate_images(
        &self,
        request: &GenerationRequest,
        api_key: &str,
    ) -> Result<RawResponse, TransportError> {
        let endpoint = format!("{}/images/generations", self.api_base);
        let payload = Value::Object(Self::base_fields(request));
        tracing::debug!(endpoint = %endpoint, model = %request.model, "sending OpenAI generation");
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()?;
        read_raw_response(response)
    }

    fn edit_images(
        &self,
        request: &GenerationRequest,
        api_key: &str,
    ) -> Result<RawResponse, TransportError> {
        let endpoint = format!("{}/images/edits", self.api_base);
        let image_urls = request.image_urls();
        if image_urls.is_empty() {
            return Err(TransportError::InvalidInput(
                "OpenAI image edits require at least one source image".to_string(),
            ));
        }

        let mut form = MultipartForm::new();
        for (key, value) in Self::base_fields(request) {
            let text = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            form = form.text(key, text);
        }

        // gpt-image models accept several images; dall-e-2 only one.
        let field = if Self::is_gpt_image_model(&request.model) {
            "image[]"
        } else {
            "image"
        };
        let limit = if field == "image" { 1 } else { image_urls.len() };
        for (idx, url) in image_urls.into_iter().take(limit).enumerate() {
            let image = fetch_input_image(
                &self.http,
                url,
                &format!("image-{idx}"),
                INPUT_FETCH_TIMEOUT,
            )?;
            form = form.part(field, Self::file_part(image)?);
        }
        if let Some(mask_url) = request.mask_url.as_deref() {
            let mask = fetch_input_image(&self.http, mask_url, "mask", INPUT_FETCH_TIMEOUT)?;
            form = form.part("mask", Self::file_part(mask)?);
        }

        tracing::debug!(endpoint = %endpoint, model = %request.model, "sending OpenAI edit");
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .timeout(REQUEST_TIMEOUT)
            .multipart(form)
            .send()?;
        read_raw_response(response)
    }

    fn file_part(image: crate::adapter::InputImage) -> Result<MultipartPart, TransportError> {
        MultipartPart::bytes(image.bytes)
            .file_name(image.file_name)
            .mime_str(&image.mime_type)
            .map_err(|err| TransportError::InvalidInput(format!("invalid image mime type: {err}")))
    }

    fn is_moderation_message(text: &str) -> bool {
        contains_any(text, MODERATION_PHRASES)
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn id(&self) -> &str {
        "openai"
    }

    fn name(&self) -> &str {
        "OpenAI"
    }

    fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    fn validate_credential_format(&self, api_key: &str) -> bool {
        let key = api_key.trim();
        key.starts_with("sk-") && key.len() >= 20 && !key.chars().any(char::is_whitespace)
    }

    fn send_request(
        &self,
        request: &GenerationRequest,
        api_key: &str,
    ) -> Result<RawResponse, TransportError> {
        if request.has_image_inputs() {
            return self.edit_images(request, api_key);
        }
        self.generate_images(request, api_key)
    }

    fn parse_response(&self, response: RawResponse) -> GenerationOutcome {
        if !response.is_success() {
            return classify_http_failure(self.name(), &response, Self::is_moderation_message);
        }
        let Some(payload) = response.json() else {
            return GenerationOutcome::malformed("OpenAI returned invalid JSON payload");
        };
        let Some(first) = payload
            .get("data")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
        else {
            return GenerationOutcome::malformed("OpenAI response returned no images");
        };

        if let Some(url) = non_empty_str(first.get("url")) {
            return GenerationOutcome::succeeded_url(url);
        }
        if let Some(encoded) = non_empty_str(first.get("b64_json")) {
            let mime_type = payload
                .get("output_format")
                .and_then(Value::as_str)
                .map(|format| format!("image/{format}"))
                .unwrap_or_else(|| "image/png".to_string());
            return GenerationOutcome::succeeded_base64(encoded, Some(mime_type));
        }
        GenerationOutcome::malformed("OpenAI image entry carried neither url nor b64_json")
    }
}

#[cfg(test)]
mod tests {
    use canvasgen_contracts::errors::ErrorKind;
    use canvasgen_contracts::outcome::ImageReference;
    use canvasgen_contracts::request::{GenerationParams, ImageStyle};

    use super::*;

    fn request(model: &str, params: GenerationParams) -> GenerationRequest {
        GenerationRequest::new(
            "a red fox",
            "openai",
            model,
            params,
            QualityPreference::High,
        )
    }

    #[test]
    fn credential_shape_requires_sk_prefix_and_length() {
        let adapter = OpenAiAdapter::with_api_base("http://localhost");
        assert!(adapter.validate_credential_format("sk-proj-0123456789abcdef"));
        assert!(!adapter.validate_credential_format("sk-short"));
        assert!(!adapter.validate_credential_format("pk-0123456789abcdefghij"));
        assert!(!adapter.validate_credential_format("sk-0123456789 abcdefghij"));
    }

    #[test]
    fn gpt_image_fields_carry_quality_and_moderation() {
        let fields = OpenAiAdapter::base_fields(&request(
            "gpt-image-1",
            GenerationParams::default().with_aspect_ratio(AspectRatio::Widescreen),
        ));
        assert_eq!(fields["size"], json!("1536x1024"));
        assert_eq!(fields["quality"], json!("high"));
        assert_eq!(fields["moderation"], json!("auto"));
        assert!(fields.get("response_format").is_none());
    }

    #[test]
    fn dalle3_fields_map_quality_and_style() {
        let params = GenerationParams {
            style: Some(ImageStyle::Natural),
            aspect_ratio: Some(AspectRatio::Tall),
            ..GenerationParams::default()
        };
        let fields = OpenAiAdapter::base_fields(&request("dall-e-3", params));
        assert_eq!(fields["size"], json!("1024x1792"));
        assert_eq!(fields["quality"], json!("hd"));
        assert_eq!(fields["style"], json!("natural"));
        assert_eq!(fields["response_format"], json!("url"));
        assert!(fields.get("moderation").is_none());
    }

    #[test]
    fn parse_prefers_url_then_base64() {
        let adapter = OpenAiAdapter::with_api_base("http://localhost");
        let url = adapter.parse_response(RawResponse::new(
            200,
            r#"{"data":[{"url":"https://example/img.png"}]}"#,
        ));
        assert_eq!(url, GenerationOutcome::succeeded_url("https://example/img.png"));

        let inline = adapter.parse_response(RawResponse::new(
            200,
            r#"{"output_format":"webp","data":[{"b64_json":"AAEC"}]}"#,
        ));
        assert!(matches!(
            inline,
            GenerationOutcome::Succeeded {
                image: ImageReference::Base64 { ref data, ref mime_type },
                ..
            } if data == "AAEC" && mime_type.as_deref() == Some("image/webp")
        ));
    }

    #[test]
    fn empty_data_is_malformed() {
        let adapter = OpenAiAdapter::with_api_base("http://localhost");
        let outcome = adapter.parse_response(RawResponse::new(200, r#"{"data":[]}"#));
        assert_eq!(outcome, GenerationOutcome::malformed("OpenAI response returned no images"));
    }

    #[test]
    fn safety_rejection_is_content_moderation() {
        let adapter = OpenAiAdapter::with_api_base("http://localhost");
        let outcome = adapter.parse_response(RawResponse::new(
            400,
            r#"{"error":{"message":"Your request was rejected as a result of our safety system.","code":"moderation_blocked"}}"#,
        ));
        assert!(matches!(
            outcome,
            GenerationOutcome::Terminal {
                kind: ErrorKind::ContentModeration,
                ..
            }
        ));
    }
}
