//! Imagga v1: each image is uploaded to `/content`, then tagged by content id.
//! Confidences arrive as percentages.

use crate::{
    http_client, parse_json, read_success_body, BatchTags, ImageInput, ProviderError,
    ProviderKind, Tag, TaggingProvider, TagRecord,
};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.imagga.com/v1";

#[derive(Clone)]
pub struct ImaggaConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub verbose: bool,
    pub request_timeout: Duration,
}

#[derive(Clone)]
pub struct ImaggaProvider {
    client: Client,
    cfg: Arc<ImaggaConfig>,
}

impl ImaggaProvider {
    pub fn new(cfg: ImaggaConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(cfg.request_timeout)?,
            cfg: Arc::new(cfg),
        })
    }

    async fn upload(&self, image: &ImageInput) -> Result<String, ProviderError> {
        let part = Part::bytes(image.bytes.to_vec()).file_name(image.id.clone());
        let form = Form::new().part(image.id.clone(), part);
        let resp = self
            .client
            .post(format!("{}/content", self.cfg.base_url))
            .basic_auth(&self.cfg.api_key, Some(&self.cfg.api_secret))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let body = read_success_body(resp).await?;
        parse_upload(&body)
    }

    async fn tag(&self, content_id: &str) -> Result<TagRecord, ProviderError> {
        let verbose = if self.cfg.verbose { "1" } else { "0" };
        let resp = self
            .client
            .get(format!("{}/tagging", self.cfg.base_url))
            .basic_auth(&self.cfg.api_key, Some(&self.cfg.api_secret))
            .query(&[("content", content_id), ("verbose", verbose)])
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let body = read_success_body(resp).await?;
        parse_tagging(&body)
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    uploaded: Vec<Uploaded>,
}

#[derive(Deserialize)]
struct Uploaded {
    id: String,
}

#[derive(Deserialize)]
struct TaggingResponse {
    #[serde(default)]
    results: Vec<TaggingResult>,
    #[serde(default)]
    unsuccessful: Vec<Unsuccessful>,
}

#[derive(Deserialize)]
struct TaggingResult {
    #[serde(default)]
    tags: Vec<ImaggaTag>,
}

#[derive(Deserialize)]
struct ImaggaTag {
    tag: String,
    confidence: f64,
}

#[derive(Deserialize)]
struct Unsuccessful {
    #[serde(default)]
    message: String,
}

fn parse_upload(body: &[u8]) -> Result<String, ProviderError> {
    let parsed: UploadResponse = parse_json(body)?;
    match parsed.uploaded.into_iter().next() {
        Some(uploaded) => Ok(uploaded.id),
        None => Err(ProviderError::Vendor(format!(
            "upload rejected: status {} {}",
            parsed.status.unwrap_or_default(),
            parsed.message.unwrap_or_default()
        ))),
    }
}

pub(crate) fn parse_tagging(body: &[u8]) -> Result<TagRecord, ProviderError> {
    let parsed: TaggingResponse = parse_json(body)?;
    match parsed.results.len() {
        0 => {
            if let Some(failure) = parsed.unsuccessful.first() {
                warn!(provider = "imagga", message = %failure.message, "tagging unsuccessful");
                return Ok(TagRecord::new());
            }
            Err(ProviderError::Malformed(
                "tagging response has no results".to_string(),
            ))
        }
        1 => parsed
            .results
            .into_iter()
            .flat_map(|r| r.tags)
            .map(|t| Tag::from_score(t.tag, t.confidence / 100.0))
            .collect(),
        n => Err(ProviderError::Malformed(format!(
            "expected one tagging result, got {n}"
        ))),
    }
}

#[async_trait::async_trait]
impl TaggingProvider for ImaggaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Imagga
    }

    fn max_batch_size(&self) -> Option<usize> {
        Some(1)
    }

    async fn tag_batch(&self, images: &[ImageInput]) -> Result<BatchTags, ProviderError> {
        let mut records = Vec::with_capacity(images.len());
        for image in images {
            let content_id = self.upload(image).await?;
            debug!(image = %image.id, content_id = %content_id, "uploaded to imagga");
            records.push(self.tag(&content_id).await?);
        }
        Ok(BatchTags::Positional(records))
    }
}
