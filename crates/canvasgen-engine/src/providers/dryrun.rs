use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use canvasgen_contracts::models::{ModelCatalog, ModelSpec};
use canvasgen_contracts::outcome::GenerationOutcome;
use canvasgen_contracts::request::{AspectRatio, GenerationRequest};
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::adapter::{non_empty_str, ProviderAdapter, RawResponse, TransportError};

const LONG_EDGE: u32 = 256;

/// Offline provider: renders a solid colour derived from the prompt.
pub struct DryrunAdapter {
    models: Vec<ModelSpec>,
}

impl Default for DryrunAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DryrunAdapter {
    pub fn new() -> Self {
        Self {
            models: ModelCatalog::default().for_provider("dryrun"),
        }
    }

    fn dims(ratio: Option<AspectRatio>) -> (u32, u32) {
        let (w, h) = ratio.unwrap_or(AspectRatio::Square).parts();
        if w >= h {
            (LONG_EDGE, (LONG_EDGE * h / w).max(1))
        } else {
            ((LONG_EDGE * w / h).max(1), LONG_EDGE)
        }
    }

    fn render_png(request: &GenerationRequest) -> Result<Vec<u8>, TransportError> {
        let (width, height) = Self::dims(request.aspect_ratio);
        let (r, g, b) = color_from_prompt(&request.prompt, &request.model);
        let mut image = RgbImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|err| TransportError::Request(format!("dryrun render failed: {err}")))?;
        Ok(buffer.into_inner())
    }
}

impl ProviderAdapter for DryrunAdapter {
    fn id(&self) -> &str {
        "dryrun"
    }

    fn name(&self) -> &str {
        "Dry run"
    }

    fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    fn requires_credential(&self) -> bool {
        false
    }

    fn validate_credential_format(&self, _api_key: &str) -> bool {
        true
    }

    fn send_request(
        &self,
        request: &GenerationRequest,
        _api_key: &str,
    ) -> Result<RawResponse, TransportError> {
        let bytes = Self::render_png(request)?;
        let body = json!({
            "b64_json": BASE64.encode(bytes),
            "mime_type": "image/png",
        });
        let mut raw = RawResponse::new(200, body.to_string());
        raw.content_type = Some("application/json".to_string());
        Ok(raw)
    }

    fn parse_response(&self, response: RawResponse) -> GenerationOutcome {
        let Some(payload) = response.json() else {
            return GenerationOutcome::malformed("dryrun returned invalid JSON payload");
        };
        match non_empty_str(payload.get("b64_json")) {
            Some(encoded) => GenerationOutcome::succeeded_base64(
                encoded,
                payload
                    .get("mime_type")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            ),
            None => GenerationOutcome::malformed("dryrun payload missing image data"),
        }
    }
}

fn color_from_prompt(prompt: &str, model: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(model.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

#[cfg(test)]
mod tests {
    use canvasgen_contracts::config::QualityPreference;
    use canvasgen_contracts::outcome::ImageReference;
    use canvasgen_contracts::request::GenerationParams;

    use super::*;
    use crate::adapter::request_outcome;

    #[test]
    fn dims_follow_aspect_ratio() {
        assert_eq!(DryrunAdapter::dims(None), (256, 256));
        assert_eq!(DryrunAdapter::dims(Some(AspectRatio::Widescreen)), (256, 144));
        assert_eq!(DryrunAdapter::dims(Some(AspectRatio::ClassicPortrait)), (192, 256));
    }

    #[test]
    fn renders_png_deterministically() {
        let adapter = DryrunAdapter::new();
        let request = GenerationRequest::new(
            "boat",
            "dryrun",
            "dryrun-image-1",
            GenerationParams::default(),
            QualityPreference::Auto,
        );
        let first = request_outcome(&adapter, &request, "");
        let second = request_outcome(&adapter, &request, "");
        assert_eq!(first, second);

        let GenerationOutcome::Succeeded {
            image: ImageReference::Base64 { data, mime_type },
            ..
        } = first
        else {
            panic!("dryrun should succeed inline");
        };
        assert_eq!(mime_type.as_deref(), Some("image/png"));
        let bytes = BASE64.decode(data).unwrap_or_default();
        assert_eq!(&bytes[..4], &[0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn dryrun_needs_no_credential() {
        let adapter = DryrunAdapter::new();
        assert!(!adapter.requires_credential());
        assert!(adapter.supports_image_to_image("dryrun-image-1"));
    }
}
