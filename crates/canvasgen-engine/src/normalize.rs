use base64::engine::general_purpose::{STANDARD as BASE64, STANDARD_NO_PAD as BASE64_NO_PAD};
use base64::Engine as _;
use canvasgen_contracts::errors::{ErrorKind, GenerationError};
use canvasgen_contracts::media::MediaGateway;
use canvasgen_contracts::outcome::{
    GenerationOutcome, GenerationResult, GenerationStatus, ImageReference, NormalizedImage,
    PredictionHandle, RetryKind,
};

/// Consecutive malformed payloads tolerated before giving up.
pub const MALFORMED_LIMIT: u32 = 2;

/// One adapter outcome after normalization and error classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Image {
        image: NormalizedImage,
        prediction_id: Option<String>,
    },
    Pending(PredictionHandle),
    Retry {
        kind: RetryKind,
        message: String,
    },
    Fail {
        kind: ErrorKind,
        message: String,
    },
}

/// Stateful per-generation classifier. Tracks the malformed streak so a
/// provider that keeps answering garbage fails instead of burning the budget.
#[derive(Debug, Clone)]
pub struct OutcomeClassifier {
    malformed_streak: u32,
    malformed_limit: u32,
}

impl Default for OutcomeClassifier {
    fn default() -> Self {
        Self::new(MALFORMED_LIMIT)
    }
}

impl OutcomeClassifier {
    pub fn new(malformed_limit: u32) -> Self {
        Self {
            malformed_streak: 0,
            malformed_limit: malformed_limit.max(1),
        }
    }

    pub fn classify(&mut self, outcome: GenerationOutcome) -> Classified {
        match outcome {
            GenerationOutcome::Succeeded {
                image,
                prediction_id,
            } => match normalize_image(image) {
                Ok(image) => {
                    self.malformed_streak = 0;
                    Classified::Image {
                        image,
                        prediction_id,
                    }
                }
                Err(message) => self.malformed(message),
            },
            GenerationOutcome::Retryable {
                kind: RetryKind::Malformed,
                message,
            } => self.malformed(message),
            GenerationOutcome::Retryable { kind, message } => {
                self.malformed_streak = 0;
                Classified::Retry { kind, message }
            }
            GenerationOutcome::Pending { handle } => {
                self.malformed_streak = 0;
                Classified::Pending(handle)
            }
            GenerationOutcome::Terminal { kind, message } => Classified::Fail { kind, message },
        }
    }

    fn malformed(&mut self, message: String) -> Classified {
        self.malformed_streak += 1;
        if self.malformed_streak >= self.malformed_limit {
            return Classified::Fail {
                kind: ErrorKind::PermanentProvider,
                message: format!(
                    "{message} ({} malformed responses in a row)",
                    self.malformed_streak
                ),
            };
        }
        Classified::Retry {
            kind: RetryKind::Malformed,
            message,
        }
    }
}

/// Picks the authoritative image: hosted URLs pass through, inline payloads
/// are decoded to bytes.
pub fn normalize_image(image: ImageReference) -> Result<NormalizedImage, String> {
    match image {
        ImageReference::Url(url) => {
            let url = url.trim();
            if url.is_empty() {
                return Err("provider returned an empty image url".to_string());
            }
            Ok(NormalizedImage::Hosted {
                url: url.to_string(),
            })
        }
        ImageReference::Base64 { data, mime_type } => {
            let (prefix_mime, bytes) = decode_base64_payload(&data)?;
            Ok(NormalizedImage::Inline {
                bytes,
                mime_type: mime_type.or(prefix_mime),
            })
        }
    }
}

/// Decodes base64 image data, accepting an optional `data:<mime>;base64,` prefix.
pub fn decode_base64_payload(data: &str) -> Result<(Option<String>, Vec<u8>), String> {
    let trimmed = data.trim();
    let (mime_type, encoded) = match trimmed.strip_prefix("data:") {
        Some(rest) => {
            let (meta, encoded) = rest
                .split_once(',')
                .ok_or_else(|| "inline image data URL has no payload".to_string())?;
            let mime = meta
                .split(';')
                .next()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string);
            (mime, encoded)
        }
        None => (None, trimmed),
    };
    let compact: String = encoded.chars().filter(|ch| !ch.is_whitespace()).collect();
    let bytes = BASE64
        .decode(compact.as_bytes())
        .or_else(|_| BASE64_NO_PAD.decode(compact.as_bytes()))
        .map_err(|err| format!("inline image payload is not valid base64: {err}"))?;
    if bytes.is_empty() {
        return Err("inline image payload is empty".to_string());
    }
    Ok((mime_type, bytes))
}

/// Hands the image to the media gateway and builds the caller-facing result.
pub fn persist_image(
    gateway: &dyn MediaGateway,
    image: &NormalizedImage,
    prompt: &str,
    provider_id: &str,
    model: &str,
    attempts: u32,
) -> Result<GenerationResult, GenerationError> {
    let persisted = gateway.persist(image, prompt).map_err(|err| {
        tracing::warn!(provider = provider_id, error = %format!("{err:#}"), "media persistence failed");
        GenerationError::persistence(format!("{err:#}"))
            .with_provider(provider_id)
            .with_attempts(attempts)
    })?;
    let binary_data = match image {
        NormalizedImage::Inline { bytes, .. } => Some(bytes.clone()),
        NormalizedImage::Hosted { .. } => None,
    };
    Ok(GenerationResult {
        url: persisted.url,
        media_id: persisted.media_id,
        binary_data,
        status: GenerationStatus::Completed,
        provider_id: provider_id.to_string(),
        model: model.to_string(),
        attempts,
    })
}
