use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use canvasgen_contracts::errors::truncate_chars;
use canvasgen_contracts::media::{MediaGateway, PersistedMedia};
use canvasgen_contracts::outcome::NormalizedImage;
use chrono::{SecondsFormat, Utc};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::adapter::extension_for_mime;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Stores generated images under a local directory, content addressed.
///
/// Files are named after the first 16 hex chars of their SHA-256, so saving
/// the same bytes twice lands on the same file and media id.
#[derive(Debug, Clone)]
pub struct DirectoryMediaGateway {
    root: PathBuf,
    public_base_url: Option<String>,
    http: HttpClient,
}

struct StoredBytes {
    bytes: Vec<u8>,
    mime_type: Option<String>,
    source_url: Option<String>,
}

impl DirectoryMediaGateway {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base_url: None,
            http: HttpClient::new(),
        }
    }

    pub fn with_public_base_url(mut self, base_url: Option<String>) -> Self {
        self.public_base_url = base_url
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn download(&self, url: &str) -> Result<StoredBytes> {
        let response = self
            .http
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .with_context(|| format!("failed downloading generated image ({url})"))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            bail!(
                "generated image download failed ({code}): {}",
                truncate_chars(&body, 512)
            );
        }
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
            .filter(|value| value.starts_with("image/"));
        let bytes = response
            .bytes()
            .context("failed reading generated image bytes")?
            .to_vec();
        if bytes.is_empty() {
            bail!("generated image download was empty ({url})");
        }
        Ok(StoredBytes {
            bytes,
            mime_type,
            source_url: Some(url.to_string()),
        })
    }

    fn public_url(&self, file_name: &str, path: &Path) -> Result<String> {
        if let Some(base) = &self.public_base_url {
            return Ok(format!("{base}/{file_name}"));
        }
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .context("failed resolving current directory")?
                .join(path)
        };
        Ok(format!("file://{}", absolute.display()))
    }
}

impl MediaGateway for DirectoryMediaGateway {
    fn persist(&self, image: &NormalizedImage, prompt: &str) -> Result<PersistedMedia> {
        let stored = match image {
            NormalizedImage::Hosted { url } => self.download(url)?,
            NormalizedImage::Inline { bytes, mime_type } => StoredBytes {
                bytes: bytes.clone(),
                mime_type: mime_type.clone(),
                source_url: None,
            },
        };

        let media_id = content_id(&stored.bytes);
        let mime_type = stored
            .mime_type
            .clone()
            .unwrap_or_else(|| sniff_mime(&stored.bytes).to_string());
        let file_name = format!("{media_id}.{}", extension_for_mime(&mime_type));
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed creating media directory {}", self.root.display()))?;
        let image_path = self.root.join(&file_name);
        fs::write(&image_path, &stored.bytes)
            .with_context(|| format!("failed writing {}", image_path.display()))?;

        let sidecar = json!({
            "media_id": media_id,
            "file": file_name,
            "prompt": prompt,
            "mime_type": mime_type,
            "bytes": stored.bytes.len(),
            "source": image.source_label(),
            "source_url": stored.source_url,
            "created_at": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        });
        let sidecar_path = self.root.join(format!("{media_id}.json"));
        fs::write(&sidecar_path, serde_json::to_vec_pretty(&sidecar)?)
            .with_context(|| format!("failed writing {}", sidecar_path.display()))?;

        tracing::debug!(path = %image_path.display(), media_id = %media_id, "stored generated image");
        Ok(PersistedMedia {
            url: self.public_url(&file_name, &image_path)?,
            media_id: Some(media_id),
        })
    }
}

fn content_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/png"
    }
}
