//! Provider abstractions for image tagging services.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

pub mod clarifai;
pub mod google_vision;
pub mod imagga;
pub mod visual_recognition;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("vendor reported an error: {0}")]
    Vendor(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("could not build request: {0}")]
    InvalidRequest(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

/// The tagging services the pipeline knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    VisualRecognition,
    Clarifai,
    Imagga,
    GoogleVision,
}

impl ProviderKind {
    /// Default column order of the aggregate table.
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::VisualRecognition,
        ProviderKind::Clarifai,
        ProviderKind::Imagga,
        ProviderKind::GoogleVision,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::VisualRecognition => "visual_recognition",
            ProviderKind::Clarifai => "clarifai",
            ProviderKind::Imagga => "imagga",
            ProviderKind::GoogleVision => "google_vision",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "visual_recognition" | "watson" => Ok(ProviderKind::VisualRecognition),
            "clarifai" => Ok(ProviderKind::Clarifai),
            "imagga" => Ok(ProviderKind::Imagga),
            "google_vision" | "google" => Ok(ProviderKind::GoogleVision),
            other => Err(ProviderError::UnknownProvider(other.to_string())),
        }
    }
}

/// One (label, confidence) pair. Confidence is always within `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub label: String,
    pub confidence: f32,
}

impl Tag {
    /// Builds a tag from a vendor score, clamping it into `[0, 1]`.
    /// Non-finite scores mean the vendor sent garbage.
    pub fn from_score(label: impl Into<String>, score: f64) -> Result<Self, ProviderError> {
        let label = label.into();
        if !score.is_finite() {
            return Err(ProviderError::Malformed(format!(
                "non-finite confidence for tag {label:?}"
            )));
        }
        Ok(Self {
            label,
            confidence: score.clamp(0.0, 1.0) as f32,
        })
    }
}

/// Tags for one image from one provider, in the order the vendor returned them.
pub type TagRecord = Vec<Tag>;

/// An image handed to an adapter.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub id: String,
    pub bytes: Bytes,
}

/// What an adapter got back for one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchTags {
    /// One record per submitted image, in submission order.
    Positional(Vec<TagRecord>),
    /// Records keyed by the image name the vendor echoed back. Images may be absent.
    Keyed(Vec<(String, TagRecord)>),
}

#[async_trait::async_trait]
pub trait TaggingProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Hard per-request item ceiling; `None` means the whole set fits in one call.
    fn max_batch_size(&self) -> Option<usize>;

    async fn tag_batch(&self, images: &[ImageInput]) -> Result<BatchTags, ProviderError>;
}

/// Active providers in column order.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn TaggingProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a provider, replacing any earlier one of the same kind.
    pub fn with_provider(mut self, provider: Arc<dyn TaggingProvider>) -> Self {
        let kind = provider.kind();
        self.providers.retain(|p| p.kind() != kind);
        self.providers.push(provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn TaggingProvider>, ProviderError> {
        self.providers
            .iter()
            .find(|p| p.kind() == kind)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(kind.to_string()))
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.iter().map(|p| p.kind()).collect()
    }

    /// Keeps only the listed kinds. An empty list keeps everything.
    pub fn retain_kinds(mut self, kinds: &[ProviderKind]) -> Self {
        if !kinds.is_empty() {
            self.providers.retain(|p| kinds.contains(&p.kind()));
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn TaggingProvider>> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

pub(crate) fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::InvalidRequest(e.to_string()))
}

/// Reads the body of a response, turning non-2xx statuses into transport errors.
pub(crate) async fn read_success_body(resp: reqwest::Response) -> Result<Bytes, ProviderError> {
    let status = resp.status();
    let body = resp
        .bytes()
        .await
        .map_err(|e| ProviderError::Transport(e.to_string()))?;
    if !status.is_success() {
        let excerpt = String::from_utf8_lossy(&body[..body.len().min(512)]).into_owned();
        return Err(ProviderError::Transport(format!(
            "status {} body {:?}",
            status, excerpt
        )));
    }
    Ok(body)
}

pub(crate) fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProviderError> {
    serde_json::from_slice(body).map_err(|e| ProviderError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(ProviderKind);

    #[async_trait::async_trait]
    impl TaggingProvider for Fixed {
        fn kind(&self) -> ProviderKind {
            self.0
        }

        fn max_batch_size(&self) -> Option<usize> {
            None
        }

        async fn tag_batch(&self, images: &[ImageInput]) -> Result<BatchTags, ProviderError> {
            Ok(BatchTags::Positional(vec![vec![]; images.len()]))
        }
    }

    #[test]
    fn kind_parses_config_spellings() {
        assert_eq!(
            "visual-recognition".parse::<ProviderKind>().unwrap(),
            ProviderKind::VisualRecognition
        );
        assert_eq!(
            "Google_Vision".parse::<ProviderKind>().unwrap(),
            ProviderKind::GoogleVision
        );
        assert!("flickr".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn tag_scores_are_clamped() {
        assert_eq!(Tag::from_score("sky", 1.4).unwrap().confidence, 1.0);
        assert_eq!(Tag::from_score("sky", -0.2).unwrap().confidence, 0.0);
        assert!(matches!(
            Tag::from_score("sky", f64::NAN),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn registry_keeps_one_provider_per_kind() {
        let reg = ProviderRegistry::new()
            .with_provider(Arc::new(Fixed(ProviderKind::Imagga)))
            .with_provider(Arc::new(Fixed(ProviderKind::Clarifai)))
            .with_provider(Arc::new(Fixed(ProviderKind::Imagga)));
        assert_eq!(reg.kinds(), vec![ProviderKind::Clarifai, ProviderKind::Imagga]);
        assert!(reg.get(ProviderKind::GoogleVision).is_err());

        let reg = reg.retain_kinds(&[ProviderKind::Imagga]);
        assert_eq!(reg.len(), 1);
    }
}
