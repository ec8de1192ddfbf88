//! Clarifai v2 model predictions. Images travel inline as base64, each input
//! carrying the image id; outputs echo that id back when the API keeps it.

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

pub const DEFAULT_BASE_URL: &str = "https://api.clarifai.com";
/// Clarifai's public general-purpose model.
pub const DEFAULT_MODEL_ID: &str = "aaa03c23b3724a16a56b629203edc62c";
pub const DEFAULT_BATCH_SIZE: usize = 10;

const STATUS_SUCCESS: u32 = 10000;
const STATUS_MIXED_SUCCESS: u32 = 10010;

#[derive(Clone)]
pub struct ClarifaiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model_id: String,
    pub batch_size: usize,
    pub request_timeout: Duration,
}

#[derive(Clone)]
pub struct ClarifaiProvider {
    client: Client,
    cfg: Arc<ClarifaiConfig>,
}

impl ClarifaiProvider {
    pub fn new(cfg: ClarifaiConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(cfg.request_timeout)?,
            cfg: Arc::new(cfg),
        })
    }
}

#[derive(Serialize)]
struct PredictRequest {
    inputs: Vec<PredictInput>,
}

#[derive(Serialize)]
struct PredictInput {
    id: String,
    data: InputData,
}

#[derive(Serialize)]
struct InputData {
    image: InlineImage,
}

#[derive(Serialize)]
struct InlineImage {
    base64: String,
}

#[derive(Deserialize)]
struct PredictResponse {
    status: Status,
    #[serde(default)]
    outputs: Vec<Output>,
}

#[derive(Deserialize)]
struct Status {
    code: u32,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct Output {
    status: Option<Status>,
    input: Option<OutputInput>,
    data: Option<OutputData>,
}

#[derive(Deserialize)]
struct OutputInput {
    id: Option<String>,
}

#[derive(Deserialize)]
struct OutputData {
    #[serde(default)]
    concepts: Vec<Concept>,
}

#[derive(Deserialize)]
struct Concept {
    name: String,
    value: f64,
}

pub(crate) fn parse_predict(body: &[u8]) -> Result<BatchTags, ProviderError> {
    let parsed: PredictResponse = parse_json(body)?;
    if parsed.status.code != STATUS_SUCCESS && parsed.status.code != STATUS_MIXED_SUCCESS {
        return Err(ProviderError::Vendor(format!(
            "status {} {}",
            parsed.status.code, parsed.status.description
        )));
    }

    // Echoed ids let the coordinator match by name; otherwise fall back to order.
    let keyed = !parsed.outputs.is_empty()
        && parsed
            .outputs
            .iter()
            .all(|o| o.input.as_ref().and_then(|i| i.id.as_ref()).is_some());

    let mut records = Vec::with_capacity(parsed.outputs.len());
    let mut ids = Vec::with_capacity(parsed.outputs.len());
    for (position, output) in parsed.outputs.into_iter().enumerate() {
        ids.push(output.input.and_then(|i| i.id).unwrap_or_default());
        if let Some(status) = output.status.as_ref().filter(|s| s.code != STATUS_SUCCESS) {
            warn!(provider = "clarifai", position, code = status.code, description = %status.description, "output failed");
            records.push(TagRecord::new());
            continue;
        }
        let tags = output
            .data
            .map(|d| d.concepts)
            .unwrap_or_default()
            .into_iter()
            .map(|c| Tag::from_score(c.name, c.value))
            .collect::<Result<TagRecord, _>>()?;
        records.push(tags);
    }

    if keyed {
        Ok(BatchTags::Keyed(ids.into_iter().zip(records).collect()))
    } else {
        Ok(BatchTags::Positional(records))
    }
}

#[async_trait::async_trait]
impl TaggingProvider for ClarifaiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Clarifai
    }

    fn max_batch_size(&self) -> Option<usize> {
        Some(self.cfg.batch_size)
    }

    async fn tag_batch(&self, images: &[ImageInput]) -> Result<BatchTags, ProviderError> {
        let body = PredictRequest {
            inputs: images
                .iter()
                .map(|image| PredictInput {
                    id: image.id.clone(),
                    data: InputData {
                        image: InlineImage {
                            base64: STANDARD.encode(&image.bytes),
                        },
                    },
                })
                .collect(),
        };
        debug!(images = images.len(), model = %self.cfg.model_id, "requesting clarifai predictions");

        let resp = self
            .client
            .post(format!(
                "{}/v2/models/{}/outputs",
                self.cfg.base_url, self.cfg.model_id
            ))
            .header("Authorization", format!("Key {}", self.cfg.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let body = read_success_body(resp).await?;
        parse_predict(&body)
    }
}
