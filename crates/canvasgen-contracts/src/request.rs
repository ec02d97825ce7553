use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::QualityPreference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:2")]
    Landscape,
    #[serde(rename = "2:3")]
    Portrait,
    #[serde(rename = "4:3")]
    Classic,
    #[serde(rename = "3:4")]
    ClassicPortrait,
    #[serde(rename = "16:9")]
    Widescreen,
    #[serde(rename = "9:16")]
    Tall,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 7] = [
        AspectRatio::Square,
        AspectRatio::Landscape,
        AspectRatio::Portrait,
        AspectRatio::Classic,
        AspectRatio::ClassicPortrait,
        AspectRatio::Widescreen,
        AspectRatio::Tall,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Landscape => "3:2",
            Self::Portrait => "2:3",
            Self::Classic => "4:3",
            Self::ClassicPortrait => "3:4",
            Self::Widescreen => "16:9",
            Self::Tall => "9:16",
        }
    }

    /// Width divided by height.
    pub fn ratio(self) -> f64 {
        let (w, h) = self.parts();
        w as f64 / h as f64
    }

    pub fn parts(self) -> (u32, u32) {
        match self {
            Self::Square => (1, 1),
            Self::Landscape => (3, 2),
            Self::Portrait => (2, 3),
            Self::Classic => (4, 3),
            Self::ClassicPortrait => (3, 4),
            Self::Widescreen => (16, 9),
            Self::Tall => (9, 16),
        }
    }

    pub fn is_landscape(self) -> bool {
        self.ratio() > 1.0
    }

    pub fn is_portrait(self) -> bool {
        self.ratio() < 1.0
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().replace('/', ":").to_ascii_lowercase();
        match normalized.as_str() {
            "square" => return Ok(Self::Square),
            "landscape" => return Ok(Self::Landscape),
            "portrait" => return Ok(Self::Portrait),
            _ => {}
        }
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == normalized)
            .ok_or_else(|| format!("unsupported aspect ratio '{raw}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStyle {
    Natural,
    Vivid,
}

impl ImageStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Natural => "natural",
            Self::Vivid => "vivid",
        }
    }
}

impl FromStr for ImageStyle {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "natural" => Ok(Self::Natural),
            "vivid" => Ok(Self::Vivid),
            _ => Err(format!("unsupported style '{raw}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Moderation {
    Auto,
    Low,
}

impl Moderation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Low => "low",
        }
    }
}

impl FromStr for Moderation {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "low" => Ok(Self::Low),
            _ => Err(format!("unsupported moderation level '{raw}'")),
        }
    }
}

/// Caller-supplied knobs for one generation, everything except prompt and provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_image_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<AspectRatio>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_quality: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<ImageStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderation: Option<Moderation>,
}

impl GenerationParams {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_source_image(mut self, url: impl Into<String>) -> Self {
        self.source_image_url = Some(url.into());
        self
    }

    pub fn with_aspect_ratio(mut self, ratio: AspectRatio) -> Self {
        self.aspect_ratio = Some(ratio);
        self
    }
}

/// A fully resolved generation request. Built by the orchestrator after
/// validation and only ever handed out by reference afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub provider_id: String,
    pub model: String,
    pub source_image_url: Option<String>,
    pub additional_image_urls: Vec<String>,
    pub mask_url: Option<String>,
    pub aspect_ratio: Option<AspectRatio>,
    pub output_quality: Option<u8>,
    pub style: Option<ImageStyle>,
    pub moderation: Option<Moderation>,
    pub quality: QualityPreference,
}

impl GenerationRequest {
    pub fn new(
        prompt: impl Into<String>,
        provider_id: impl Into<String>,
        model: impl Into<String>,
        params: GenerationParams,
        quality: QualityPreference,
    ) -> Self {
        let non_blank = |value: Option<String>| {
            value
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };
        Self {
            prompt: prompt.into().trim().to_string(),
            provider_id: provider_id.into().trim().to_string(),
            model: model.into().trim().to_string(),
            source_image_url: non_blank(params.source_image_url),
            additional_image_urls: params
                .additional_image_urls
                .into_iter()
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty())
                .collect(),
            mask_url: non_blank(params.mask_url),
            aspect_ratio: params.aspect_ratio,
            output_quality: params.output_quality.map(|value| value.min(100)),
            style: params.style,
            moderation: params.moderation,
            quality,
        }
    }

    pub fn has_image_inputs(&self) -> bool {
        self.source_image_url.is_some()
            || !self.additional_image_urls.is_empty()
            || self.mask_url.is_some()
    }

    /// Source image first, then additional references, in request order.
    pub fn image_urls(&self) -> Vec<&str> {
        self.source_image_url
            .iter()
            .chain(self.additional_image_urls.iter())
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_ratio_parses_ratios_and_aliases() {
        assert_eq!("16:9".parse::<AspectRatio>(), Ok(AspectRatio::Widescreen));
        assert_eq!("9/16".parse::<AspectRatio>(), Ok(AspectRatio::Tall));
        assert_eq!("Square".parse::<AspectRatio>(), Ok(AspectRatio::Square));
        assert!("5:4".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn aspect_ratio_serializes_as_ratio_text() {
        let encoded = serde_json::to_string(&AspectRatio::ClassicPortrait).unwrap_or_default();
        assert_eq!(encoded, "\"3:4\"");
    }

    #[test]
    fn request_trims_inputs_and_drops_blank_urls() {
        let params = GenerationParams {
            source_image_url: Some("  ".to_string()),
            additional_image_urls: vec![" https://a/img.png ".to_string(), String::new()],
            output_quality: Some(140),
            ..GenerationParams::default()
        };
        let request = GenerationRequest::new(
            "  a red fox ",
            "openai",
            "gpt-image-1",
            params,
            QualityPreference::Auto,
        );
        assert_eq!(request.prompt, "a red fox");
        assert_eq!(request.source_image_url, None);
        assert_eq!(request.additional_image_urls, vec!["https://a/img.png"]);
        assert_eq!(request.output_quality, Some(100));
        assert!(request.has_image_inputs());
        assert_eq!(request.image_urls(), vec!["https://a/img.png"]);
    }

    #[test]
    fn params_deserialize_from_wire_shape() {
        let params: GenerationParams = serde_json::from_str(
            r#"{"model":"dall-e-3","aspect_ratio":"16:9","style":"vivid","moderation":"low"}"#,
        )
        .unwrap_or_default();
        assert_eq!(params.model.as_deref(), Some("dall-e-3"));
        assert_eq!(params.aspect_ratio, Some(AspectRatio::Widescreen));
        assert_eq!(params.style, Some(ImageStyle::Vivid));
        assert_eq!(params.moderation, Some(Moderation::Low));
    }
}
