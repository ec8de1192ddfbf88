use crate::aggregate::aggregate;
use crate::batch::BatchCoordinator;
use crate::config::{non_empty, AppConfig};
use crate::error::TaggerError;
use crate::models::{AggregateTable, ImageSet, ProviderResult, ProviderRun};
use crate::resolver::{self, ImageFilter};
use chrono::{DateTime, Utc};
use providers::clarifai::{self, ClarifaiConfig, ClarifaiProvider};
use providers::google_vision::{self, GoogleVisionConfig, GoogleVisionProvider};
use providers::imagga::{self, ImaggaConfig, ImaggaProvider};
use providers::visual_recognition::{self, VisualRecognitionConfig, VisualRecognitionProvider};
use providers::{ProviderError, ProviderKind, ProviderRegistry, TaggingProvider};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Restrict the run to these providers; empty means every configured one.
    pub only: Vec<ProviderKind>,
    /// Overrides `run.timeout_secs`.
    pub timeout: Option<Duration>,
    /// Cancelling this stops every provider after its current batch.
    pub cancel: CancellationToken,
}

pub struct RunOutcome {
    pub table: AggregateTable,
    pub runs: Vec<ProviderRun>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    pub fn association_failures(&self) -> usize {
        self.runs.iter().map(|r| r.association_failures()).sum()
    }

    pub fn cancelled(&self) -> bool {
        self.runs.iter().any(|r| r.cancelled)
    }
}

/// Resolves `dir`, runs every active provider over it, and aggregates the results.
pub async fn run(config: &AppConfig, dir: &Path, opts: RunOptions) -> Result<RunOutcome, TaggerError> {
    let registry = build_registry(config).retain_kinds(&opts.only);
    run_with_registry(config, registry, dir, opts).await
}

pub async fn run_with_registry(
    config: &AppConfig,
    registry: ProviderRegistry,
    dir: &Path,
    opts: RunOptions,
) -> Result<RunOutcome, TaggerError> {
    if registry.is_empty() {
        return Err(TaggerError::NoProviderConfigured);
    }
    let started_at = Utc::now();

    let filter = ImageFilter::from_config(&config.images)?;
    let root = dir.to_path_buf();
    let images = tokio::task::spawn_blocking(move || resolver::resolve(&root, &filter)).await??;
    info!(dir = %dir.display(), images = images.len(), providers = registry.len(), "starting tagging run");

    let cancel = opts.cancel.child_token();
    let watchdog = opts.timeout.or_else(|| config.run_timeout()).map(|limit| {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(limit) => {
                    warn!(timeout_secs = limit.as_secs(), "run timed out; stopping providers");
                    cancel.cancel();
                }
            }
        })
    });

    let runs = run_providers(config, &registry, Arc::new(images.clone()), &cancel).await;

    if let Some(handle) = watchdog {
        handle.abort();
    }

    let results: Vec<(ProviderKind, &ProviderResult)> =
        runs.iter().map(|r| (r.kind, &r.result)).collect();
    let table = aggregate(&images.ids(), &config.run.columns, results);

    for run in &runs {
        info!(
            provider = %run.kind,
            batches = run.batches_issued,
            planned = run.batches_planned,
            failed = run.failures.len(),
            cancelled = run.cancelled,
            "provider summary"
        );
    }

    Ok(RunOutcome {
        table,
        runs,
        started_at,
        finished_at: Utc::now(),
    })
}

/// One task per provider; each keeps its own pacing. Results come back in registry order.
async fn run_providers(
    config: &AppConfig,
    registry: &ProviderRegistry,
    images: Arc<ImageSet>,
    cancel: &CancellationToken,
) -> Vec<ProviderRun> {
    let mut handles = Vec::with_capacity(registry.len());
    for provider in registry.iter() {
        let kind = provider.kind();
        let coordinator = BatchCoordinator::new(provider.clone(), config.batch_delay(kind));
        let images = images.clone();
        let cancel = cancel.clone();
        let handle = tokio::spawn(async move { coordinator.run(&images, &cancel).await });
        handles.push((kind, handle));
    }

    let mut runs = Vec::with_capacity(handles.len());
    for (kind, handle) in handles {
        match handle.await {
            Ok(run) => runs.push(run),
            Err(e) => {
                error!(provider = %kind, error = %e, "provider task died; its column will be empty");
                runs.push(ProviderRun {
                    kind,
                    result: ProviderResult::new(),
                    batches_planned: 0,
                    batches_issued: 0,
                    failures: Vec::new(),
                    cancelled: false,
                    elapsed: Duration::ZERO,
                });
            }
        }
    }
    runs
}

/// Builds an adapter for every provider with complete credentials, in column order.
pub fn build_registry(config: &AppConfig) -> ProviderRegistry {
    let mut reg = ProviderRegistry::new();
    let mut order = config.run.columns.clone();
    for kind in ProviderKind::ALL {
        if !order.contains(&kind) {
            order.push(kind);
        }
    }

    for kind in order {
        match build_provider(config, kind) {
            Ok(Some(provider)) => {
                debug!(provider = %kind, "provider activated");
                reg = reg.with_provider(provider);
            }
            Ok(None) => {}
            Err(e) => warn!(provider = %kind, error = %e, "provider could not be set up; skipping"),
        }
    }
    reg
}

fn build_provider(
    config: &AppConfig,
    kind: ProviderKind,
) -> Result<Option<Arc<dyn TaggingProvider>>, ProviderError> {
    let timeout = config.request_timeout();
    let p = &config.providers;
    let provider: Arc<dyn TaggingProvider> = match kind {
        ProviderKind::VisualRecognition => {
            let Some(s) = p.visual_recognition.as_ref().filter(|s| s.enabled) else {
                return Ok(None);
            };
            let Some(api_key) = non_empty(&s.api_key) else {
                return Ok(missing_credentials(kind));
            };
            Arc::new(VisualRecognitionProvider::new(VisualRecognitionConfig {
                api_key: api_key.to_string(),
                base_url: base_url(&s.base_url, visual_recognition::DEFAULT_BASE_URL),
                version: non_empty(&s.version)
                    .unwrap_or(visual_recognition::DEFAULT_VERSION)
                    .to_string(),
                threshold: s.threshold.unwrap_or(visual_recognition::DEFAULT_THRESHOLD),
                batch_size: s.batch_size,
                request_timeout: timeout,
            })?)
        }
        ProviderKind::Clarifai => {
            let Some(s) = p.clarifai.as_ref().filter(|s| s.enabled) else {
                return Ok(None);
            };
            let Some(api_key) = non_empty(&s.api_key) else {
                return Ok(missing_credentials(kind));
            };
            Arc::new(ClarifaiProvider::new(ClarifaiConfig {
                api_key: api_key.to_string(),
                base_url: base_url(&s.base_url, clarifai::DEFAULT_BASE_URL),
                model_id: non_empty(&s.model_id)
                    .unwrap_or(clarifai::DEFAULT_MODEL_ID)
                    .to_string(),
                batch_size: s.batch_size.unwrap_or(clarifai::DEFAULT_BATCH_SIZE),
                request_timeout: timeout,
            })?)
        }
        ProviderKind::Imagga => {
            let Some(s) = p.imagga.as_ref().filter(|s| s.enabled) else {
                return Ok(None);
            };
            let (Some(api_key), Some(api_secret)) = (non_empty(&s.api_key), non_empty(&s.api_secret))
            else {
                return Ok(missing_credentials(kind));
            };
            Arc::new(ImaggaProvider::new(ImaggaConfig {
                api_key: api_key.to_string(),
                api_secret: api_secret.to_string(),
                base_url: base_url(&s.base_url, imagga::DEFAULT_BASE_URL),
                verbose: s.verbose,
                request_timeout: timeout,
            })?)
        }
        ProviderKind::GoogleVision => {
            let Some(s) = p.google_vision.as_ref().filter(|s| s.enabled) else {
                return Ok(None);
            };
            let Some(api_key) = non_empty(&s.api_key) else {
                return Ok(missing_credentials(kind));
            };
            Arc::new(GoogleVisionProvider::new(GoogleVisionConfig {
                api_key: api_key.to_string(),
                base_url: base_url(&s.base_url, google_vision::DEFAULT_BASE_URL),
                max_results: s.max_results.unwrap_or(google_vision::DEFAULT_MAX_RESULTS),
                batch_size: s.batch_size.unwrap_or(google_vision::DEFAULT_BATCH_SIZE),
                request_timeout: timeout,
            })?)
        }
    };
    Ok(Some(provider))
}

fn missing_credentials(kind: ProviderKind) -> Option<Arc<dyn TaggingProvider>> {
    warn!(provider = %kind, "credentials missing or empty; provider not activated");
    None
}

fn base_url(configured: &Option<String>, default: &str) -> String {
    non_empty(configured)
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}
