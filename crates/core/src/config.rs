use crate::export::OutputFormat;
use providers::ProviderKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub images: ImageConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default, alias = "visual-recognition")]
    pub visual_recognition: Option<VisualRecognitionSettings>,
    #[serde(default)]
    pub clarifai: Option<ClarifaiSettings>,
    #[serde(default)]
    pub imagga: Option<ImaggaSettings>,
    #[serde(default, alias = "google-vision")]
    pub google_vision: Option<GoogleVisionSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisualRecognitionSettings {
    #[serde(default, alias = "api-key")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub threshold: Option<f32>,
    /// Images per archive; unset sends the whole folder at once.
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub batch_delay_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClarifaiSettings {
    #[serde(default, alias = "api-key")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub batch_delay_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImaggaSettings {
    #[serde(default, alias = "api-key")]
    pub api_key: Option<String>,
    #[serde(default, alias = "api-secret")]
    pub api_secret: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_true")]
    pub verbose: bool,
    #[serde(default)]
    pub batch_delay_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoogleVisionSettings {
    #[serde(default, alias = "api-key")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub max_results: Option<u32>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub batch_delay_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Minimum pause between two batches sent to the same provider.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_columns")]
    pub columns: Vec<ProviderKind>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_delay_ms: default_batch_delay_ms(),
            timeout_secs: None,
            request_timeout_secs: default_request_timeout_secs(),
            columns: default_columns(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
}

impl AppConfig {
    /// Pacing for one provider: its own override, else the run-wide value.
    pub fn batch_delay(&self, kind: ProviderKind) -> Duration {
        let p = &self.providers;
        let own = match kind {
            ProviderKind::VisualRecognition => {
                p.visual_recognition.as_ref().and_then(|s| s.batch_delay_ms)
            }
            ProviderKind::Clarifai => p.clarifai.as_ref().and_then(|s| s.batch_delay_ms),
            ProviderKind::Imagga => p.imagga.as_ref().and_then(|s| s.batch_delay_ms),
            ProviderKind::GoogleVision => p.google_vision.as_ref().and_then(|s| s.batch_delay_ms),
        };
        Duration::from_millis(own.unwrap_or(self.run.batch_delay_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.run.request_timeout_secs)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run.timeout_secs.map(Duration::from_secs)
    }
}

/// Returns the value if it holds something other than whitespace.
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn default_true() -> bool {
    true
}

fn default_extensions() -> Vec<String> {
    ["png", "jpg", "jpeg", "gif"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}

fn default_batch_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_columns() -> Vec<ProviderKind> {
    ProviderKind::ALL.to_vec()
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("IMAGE_TAGGER")
            .separator("__")
            .try_parsing(true),
    );
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}
