use crate::outcome::NormalizedImage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedMedia {
    pub url: String,
    pub media_id: Option<String>,
}

/// Turns a generated image (hosted URL or raw bytes) into a durable, servable URL.
pub trait MediaGateway: Send + Sync {
    fn persist(&self, image: &NormalizedImage, prompt: &str) -> anyhow::Result<PersistedMedia>;
}

/// Hands hosted URLs back untouched. Inline bytes have nowhere to go, so they
/// are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughMediaGateway;

impl MediaGateway for PassthroughMediaGateway {
    fn persist(&self, image: &NormalizedImage, _prompt: &str) -> anyhow::Result<PersistedMedia> {
        match image {
            NormalizedImage::Hosted { url } => Ok(PersistedMedia {
                url: url.clone(),
                media_id: None,
            }),
            NormalizedImage::Inline { .. } => {
                anyhow::bail!("passthrough media gateway cannot store inline image bytes")
            }
        }
    }
}
