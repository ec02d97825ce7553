use serde::{Deserialize, Serialize};

use crate::errors::ErrorKind;

/// Provider-issued id of an accepted but unfinished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionHandle {
    pub id: String,
    /// Status URL when the provider hands one out; adapters fall back to
    /// building it from `id`.
    pub status_url: Option<String>,
}

impl PredictionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status_url: None,
        }
    }

    pub fn with_status_url(mut self, url: impl Into<String>) -> Self {
        self.status_url = Some(url.into());
        self
    }
}

/// Image reference exactly as one adapter found it in a success payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    Url(String),
    Base64 {
        data: String,
        mime_type: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    Transport,
    Provider,
    Malformed,
}

impl RetryKind {
    pub fn error_kind(self) -> ErrorKind {
        match self {
            Self::Transport => ErrorKind::Transport,
            Self::Provider | Self::Malformed => ErrorKind::TransientProvider,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Provider => "provider",
            Self::Malformed => "malformed",
        }
    }
}

/// Classified result of one adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Succeeded {
        image: ImageReference,
        prediction_id: Option<String>,
    },
    Pending {
        handle: PredictionHandle,
    },
    Retryable {
        kind: RetryKind,
        message: String,
    },
    Terminal {
        kind: ErrorKind,
        message: String,
    },
}

impl GenerationOutcome {
    pub fn succeeded_url(url: impl Into<String>) -> Self {
        Self::Succeeded {
            image: ImageReference::Url(url.into()),
            prediction_id: None,
        }
    }

    pub fn succeeded_base64(data: impl Into<String>, mime_type: Option<String>) -> Self {
        Self::Succeeded {
            image: ImageReference::Base64 {
                data: data.into(),
                mime_type,
            },
            prediction_id: None,
        }
    }

    pub fn pending(handle: PredictionHandle) -> Self {
        Self::Pending { handle }
    }

    pub fn retryable(kind: RetryKind, message: impl Into<String>) -> Self {
        Self::Retryable {
            kind,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::retryable(RetryKind::Malformed, message)
    }

    pub fn terminal(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Terminal {
            kind,
            message: message.into(),
        }
    }

    pub fn moderation(message: impl Into<String>) -> Self {
        Self::terminal(ErrorKind::ContentModeration, message)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::Pending { .. } => "pending",
            Self::Retryable { .. } => "retryable",
            Self::Terminal { .. } => "terminal",
        }
    }
}

/// A single authoritative image after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedImage {
    Hosted {
        url: String,
    },
    Inline {
        bytes: Vec<u8>,
        mime_type: Option<String>,
    },
}

impl NormalizedImage {
    pub fn source_label(&self) -> &'static str {
        match self {
            Self::Hosted { .. } => "url",
            Self::Inline { .. } => "inline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Completed,
}

/// What `generate` hands back once the image has been persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub url: String,
    pub media_id: Option<String>,
    /// Decoded bytes when the provider answered with inline data.
    pub binary_data: Option<Vec<u8>>,
    pub status: GenerationStatus,
    pub provider_id: String,
    pub model: String,
    pub attempts: u32,
}

impl GenerationResult {
    pub fn to_wire(&self) -> SuccessBody {
        SuccessBody {
            url: self.url.clone(),
            id: self.media_id.clone(),
            status: self.status,
        }
    }
}

/// `{ url, id?, status: "completed" }` success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessBody {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: GenerationStatus,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn success_body_omits_missing_media_id() {
        let result = GenerationResult {
            url: "https://example/img.png".to_string(),
            media_id: None,
            binary_data: None,
            status: GenerationStatus::Completed,
            provider_id: "openai".to_string(),
            model: "gpt-image-1".to_string(),
            attempts: 1,
        };
        let encoded = serde_json::to_value(result.to_wire()).unwrap_or_default();
        assert_eq!(
            encoded,
            json!({"url": "https://example/img.png", "status": "completed"})
        );
    }

    #[test]
    fn success_body_includes_media_id_when_present() {
        let body = SuccessBody {
            url: "https://cdn/x.png".to_string(),
            id: Some("42".to_string()),
            status: GenerationStatus::Completed,
        };
        let encoded = serde_json::to_value(body).unwrap_or_default();
        assert_eq!(encoded["id"], json!("42"));
    }

    #[test]
    fn malformed_retries_map_to_transient_provider_kind() {
        assert_eq!(RetryKind::Malformed.error_kind(), ErrorKind::TransientProvider);
        assert_eq!(RetryKind::Transport.error_kind(), ErrorKind::Transport);
        assert_eq!(GenerationOutcome::malformed("no data").label(), "retryable");
    }
}
