//! Visual Recognition (v3 classify). The whole batch goes up as one zip archive
//! and the vendor answers with per-image entries keyed by file name.

use crate::{
    http_client, parse_json, read_success_body, BatchTags, ImageInput, ProviderError,
    ProviderKind, Tag, TaggingProvider, TagRecord,
};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://gateway-a.watsonplatform.net/visual-recognition/api";
pub const DEFAULT_VERSION: &str = "2016-05-20";
pub const DEFAULT_THRESHOLD: f32 = 0.1;

#[derive(Clone)]
pub struct VisualRecognitionConfig {
    pub api_key: String,
    pub base_url: String,
    pub version: String,
    pub threshold: f32,
    pub batch_size: Option<usize>,
    pub request_timeout: Duration,
}

#[derive(Clone)]
pub struct VisualRecognitionProvider {
    client: Client,
    cfg: Arc<VisualRecognitionConfig>,
}

impl VisualRecognitionProvider {
    pub fn new(cfg: VisualRecognitionConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(cfg.request_timeout)?,
            cfg: Arc::new(cfg),
        })
    }
}

#[derive(Deserialize)]
struct ClassifyResponse {
    images: Option<Vec<ClassifiedImage>>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ClassifiedImage {
    image: String,
    #[serde(default)]
    classifiers: Vec<Classifier>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Classifier {
    #[serde(default)]
    classes: Vec<ClassScore>,
}

#[derive(Deserialize)]
struct ClassScore {
    class: String,
    score: f64,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_id: Option<String>,
}

impl ApiError {
    fn describe(&self) -> String {
        self.description
            .clone()
            .or_else(|| self.error_id.clone())
            .unwrap_or_else(|| "unspecified error".to_string())
    }
}

/// Packs the batch into an in-memory zip, one entry per image named by its id.
fn build_archive(images: &[ImageInput]) -> Result<Vec<u8>, ProviderError> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for image in images {
        zip.start_file(image.id.as_str(), options)
            .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;
        zip.write_all(&image.bytes)
            .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;
    }
    let cursor = zip
        .finish()
        .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// The vendor reports names as `archive.zip/foo.jpg`; only the leaf is ours.
fn leaf_name(image: &str) -> &str {
    image.rsplit('/').next().unwrap_or(image)
}

pub(crate) fn parse_classify(body: &[u8]) -> Result<BatchTags, ProviderError> {
    let parsed: ClassifyResponse = parse_json(body)?;
    let images = match (parsed.images, parsed.error) {
        (Some(images), _) => images,
        (None, Some(err)) => return Err(ProviderError::Vendor(err.describe())),
        (None, None) => {
            return Err(ProviderError::Malformed(
                "response has neither images nor error".to_string(),
            ))
        }
    };

    let mut keyed = Vec::with_capacity(images.len());
    for image in images {
        let name = leaf_name(&image.image).to_string();
        if let Some(err) = image.error {
            warn!(provider = "visual_recognition", image = %name, error = %err.describe(), "image rejected by vendor");
            keyed.push((name, TagRecord::new()));
            continue;
        }
        let tags = image
            .classifiers
            .into_iter()
            .flat_map(|c| c.classes)
            .map(|c| Tag::from_score(c.class, c.score))
            .collect::<Result<TagRecord, _>>()?;
        keyed.push((name, tags));
    }
    Ok(BatchTags::Keyed(keyed))
}

#[async_trait::async_trait]
impl TaggingProvider for VisualRecognitionProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::VisualRecognition
    }

    fn max_batch_size(&self) -> Option<usize> {
        self.cfg.batch_size
    }

    async fn tag_batch(&self, images: &[ImageInput]) -> Result<BatchTags, ProviderError> {
        let archive = build_archive(images)?;
        debug!(images = images.len(), bytes = archive.len(), "uploading archive to visual recognition");

        let archive = Part::bytes(archive)
            .file_name("images.zip")
            .mime_str("application/zip")
            .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;
        let parameters = serde_json::json!({ "threshold": self.cfg.threshold }).to_string();
        let form = Form::new()
            .part("images_file", archive)
            .text("parameters", parameters);

        let resp = self
            .client
            .post(format!("{}/v3/classify", self.cfg.base_url))
            .query(&[
                ("api_key", self.cfg.api_key.as_str()),
                ("version", self.cfg.version.as_str()),
            ])
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let body = read_success_body(resp).await?;
        parse_classify(&body)
    }
}
