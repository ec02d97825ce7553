use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    ContentModeration,
    TransientProvider,
    PermanentProvider,
    Transport,
    Cancelled,
    DeadlineExceeded,
    Persistence,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::TransientProvider | Self::Transport)
    }

    /// Wire `code` for the `{ code, message }` error body.
    pub fn code(self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::ContentModeration => "content_moderation",
            Self::PermanentProvider => "provider_error",
            Self::TransientProvider | Self::Transport => "generation_failed",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Persistence => "persistence_failed",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::ContentModeration => "content_moderation",
            Self::TransientProvider => "transient_provider",
            Self::PermanentProvider => "permanent_provider",
            Self::Transport => "transport",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Persistence => "persistence",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified failure of one generation, as returned to callers.
///
/// `message` holds the detailed text (possibly provider supplied). Use
/// [`GenerationError::user_message`] or [`GenerationError::to_wire`] for
/// anything shown outside the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct GenerationError {
    pub kind: ErrorKind,
    pub message: String,
    pub provider_id: Option<String>,
    pub prediction_id: Option<String>,
    pub attempts: u32,
}

impl GenerationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider_id: None,
            prediction_id: None,
            attempts: 0,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn content_moderation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ContentModeration, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermanentProvider, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "generation cancelled")
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Persistence, message)
    }

    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn with_prediction(mut self, prediction_id: Option<String>) -> Self {
        self.prediction_id = prediction_id;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Caller-facing text. Validation problems are reported verbatim; provider
    /// text only leaks through for permanent provider errors, truncated.
    pub fn user_message(&self) -> String {
        match self.kind {
            ErrorKind::Validation => self.message.clone(),
            ErrorKind::ContentModeration => {
                "The prompt was rejected by the provider's safety system. Please change the prompt and try again."
                    .to_string()
            }
            ErrorKind::PermanentProvider => format!(
                "The provider rejected the request: {}",
                truncate_chars(&self.message, 300)
            ),
            ErrorKind::TransientProvider | ErrorKind::Transport => {
                if self.attempts > 1 {
                    format!(
                        "Image generation failed after {} attempts. Please try again later.",
                        self.attempts
                    )
                } else {
                    "Image generation failed. Please try again later.".to_string()
                }
            }
            ErrorKind::Cancelled => "Image generation was cancelled.".to_string(),
            ErrorKind::DeadlineExceeded => {
                "Image generation took too long and was stopped. Please try again.".to_string()
            }
            ErrorKind::Persistence => format!(
                "The image was generated but could not be saved: {}",
                truncate_chars(&self.message, 300)
            ),
        }
    }

    pub fn to_wire(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.user_message(),
        }
    }
}

/// `{ code, message }` error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_kinds_are_retryable() {
        assert!(ErrorKind::TransientProvider.is_retryable());
        assert!(ErrorKind::Transport.is_retryable());
        assert!(!ErrorKind::ContentModeration.is_retryable());
        assert!(!ErrorKind::PermanentProvider.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn moderation_code_is_distinct_from_generic_failures() {
        let moderation = GenerationError::content_moderation("flagged by safety filters");
        let transient = GenerationError::new(ErrorKind::TransientProvider, "502 bad gateway");
        assert_eq!(moderation.to_wire().code, "content_moderation");
        assert_eq!(transient.to_wire().code, "generation_failed");
        assert_ne!(moderation.to_wire().code, transient.to_wire().code);
    }

    #[test]
    fn user_message_hides_provider_text_for_moderation_and_transient() {
        let moderation = GenerationError::content_moderation("raw provider text: NSFW score 0.97");
        assert!(!moderation.user_message().contains("NSFW"));

        let exhausted = GenerationError::new(ErrorKind::Transport, "connect refused 10.0.0.1")
            .with_attempts(4);
        assert_eq!(
            exhausted.user_message(),
            "Image generation failed after 4 attempts. Please try again later."
        );
    }

    #[test]
    fn validation_message_is_verbatim() {
        let err = GenerationError::validation("prompt must not be empty");
        assert_eq!(
            err.to_wire(),
            ErrorBody {
                code: "validation_error".to_string(),
                message: "prompt must not be empty".to_string(),
            }
        );
    }

    #[test]
    fn display_includes_kind_and_detail() {
        let err = GenerationError::permanent("invalid size").with_provider("openai");
        assert_eq!(err.to_string(), "permanent_provider: invalid size");
        assert_eq!(err.provider_id.as_deref(), Some("openai"));
    }
}
