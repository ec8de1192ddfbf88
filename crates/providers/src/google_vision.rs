//! Google Cloud Vision `images:annotate` with label detection.

use crate::{
    http_client, parse_json, read_success_body, BatchTags, ImageInput, ProviderError,
    ProviderKind, Tag, TaggingProvider, TagRecord,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://vision.googleapis.com";
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_MAX_RESULTS: u32 = 10;

#[derive(Clone)]
pub struct GoogleVisionConfig {
    pub api_key: String,
    pub base_url: String,
    pub max_results: u32,
    pub batch_size: usize,
    pub request_timeout: Duration,
}

#[derive(Clone)]
pub struct GoogleVisionProvider {
    client: Client,
    cfg: Arc<GoogleVisionConfig>,
}

impl GoogleVisionProvider {
    pub fn new(cfg: GoogleVisionConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(cfg.request_timeout)?,
            cfg: Arc::new(cfg),
        })
    }
}

#[derive(Serialize)]
struct AnnotateRequest {
    requests: Vec<ImageRequest>,
}

#[derive(Serialize)]
struct ImageRequest {
    image: ImageContent,
    features: Vec<Feature>,
}

#[derive(Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
    max_results: u32,
}

#[derive(Deserialize)]
struct AnnotateResponse {
    responses: Vec<ImageResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    #[serde(default)]
    label_annotations: Vec<LabelAnnotation>,
    error: Option<RpcStatus>,
}

#[derive(Deserialize)]
struct LabelAnnotation {
    description: String,
    score: f64,
}

#[derive(Deserialize)]
struct RpcStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

pub(crate) fn parse_annotate(body: &[u8]) -> Result<BatchTags, ProviderError> {
    let parsed: AnnotateResponse = parse_json(body)?;
    let mut records = Vec::with_capacity(parsed.responses.len());
    for (position, response) in parsed.responses.into_iter().enumerate() {
        if let Some(err) = response.error {
            warn!(provider = "google_vision", position, code = err.code, message = %err.message, "annotation failed");
            records.push(TagRecord::new());
            continue;
        }
        let tags = response
            .label_annotations
            .into_iter()
            .map(|l| Tag::from_score(l.description, l.score))
            .collect::<Result<TagRecord, _>>()?;
        records.push(tags);
    }
    Ok(BatchTags::Positional(records))
}

#[async_trait::async_trait]
impl TaggingProvider for GoogleVisionProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GoogleVision
    }

    fn max_batch_size(&self) -> Option<usize> {
        Some(self.cfg.batch_size)
    }

    async fn tag_batch(&self, images: &[ImageInput]) -> Result<BatchTags, ProviderError> {
        let body = AnnotateRequest {
            requests: images
                .iter()
                .map(|image| ImageRequest {
                    image: ImageContent {
                        content: STANDARD.encode(&image.bytes),
                    },
                    features: vec![Feature {
                        kind: "LABEL_DETECTION",
                        max_results: self.cfg.max_results,
                    }],
                })
                .collect(),
        };
        debug!(images = images.len(), "requesting google vision labels");

        let resp = self
            .client
            .post(format!("{}/v1/images:annotate", self.cfg.base_url))
            .query(&[("key", self.cfg.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let body = read_success_body(resp).await?;
        parse_annotate(&body)
    }
}
