use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreference {
    Low,
    Medium,
    High,
    #[default]
    Auto,
}

impl QualityPreference {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for QualityPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityPreference {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" | "cheaper" => Ok(Self::Low),
            "medium" | "standard" => Ok(Self::Medium),
            "high" | "hd" | "better" => Ok(Self::High),
            "auto" | "" => Ok(Self::Auto),
            _ => Err(format!("unsupported quality preference '{raw}'")),
        }
    }
}

/// Read-only view of credentials and per-provider settings.
pub trait CredentialStore: Send + Sync {
    fn api_key(&self, provider_id: &str) -> Option<String>;

    fn selected_model(&self, provider_id: &str) -> Option<String>;

    fn quality_preference(&self) -> QualityPreference {
        QualityPreference::Auto
    }
}

/// Environment variables consulted for each provider's key, in priority order.
pub fn credential_env_keys(provider_id: &str) -> &'static [&'static str] {
    match provider_id {
        "openai" => &["OPENAI_API_KEY"],
        "replicate" => &["REPLICATE_API_TOKEN", "REPLICATE_API_KEY"],
        "imagen" => &["IMAGEN_API_KEY", "GEMINI_API_KEY", "GOOGLE_API_KEY"],
        _ => &[],
    }
}

pub fn selected_model_env_key(provider_id: &str) -> String {
    let normalized: String = provider_id
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("CANVASGEN_{normalized}_MODEL")
}

pub const QUALITY_ENV_KEY: &str = "CANVASGEN_IMAGE_QUALITY";

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialStore;

impl EnvCredentialStore {
    pub fn new() -> Self {
        Self
    }
}

impl CredentialStore for EnvCredentialStore {
    fn api_key(&self, provider_id: &str) -> Option<String> {
        credential_env_keys(provider_id)
            .iter()
            .find_map(|key| non_empty_env(key))
    }

    fn selected_model(&self, provider_id: &str) -> Option<String> {
        non_empty_env(&selected_model_env_key(provider_id))
    }

    fn quality_preference(&self) -> QualityPreference {
        non_empty_env(QUALITY_ENV_KEY)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default()
    }
}

/// In-memory store for embedding hosts and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialStore {
    keys: BTreeMap<String, String>,
    models: BTreeMap<String, String>,
    quality: QualityPreference,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, provider_id: &str, api_key: &str) -> Self {
        self.keys
            .insert(provider_id.to_string(), api_key.to_string());
        self
    }

    pub fn with_model(mut self, provider_id: &str, model: &str) -> Self {
        self.models
            .insert(provider_id.to_string(), model.to_string());
        self
    }

    pub fn with_quality(mut self, quality: QualityPreference) -> Self {
        self.quality = quality;
        self
    }
}

impl CredentialStore for StaticCredentialStore {
    fn api_key(&self, provider_id: &str) -> Option<String> {
        self.keys
            .get(provider_id)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn selected_model(&self, provider_id: &str) -> Option<String> {
        self.models
            .get(provider_id)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn quality_preference(&self) -> QualityPreference {
        self.quality
    }
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
