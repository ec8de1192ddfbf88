//! Splits an image set into provider-sized batches, paces the calls, and ties
//! every response back to the images it was requested for.

use crate::models::{
    BatchFailure, FailureKind, ImageId, ImageSet, ProviderResult, ProviderRun,
};
use providers::{BatchTags, ProviderError, TagRecord, TaggingProvider};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consecutive slice of the image set sent in one adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub images: Vec<ImageId>,
}

/// A response that cannot be matched one-to-one with the images of its batch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssociationError {
    #[error("batch {batch}: sent {expected} images but got {got} results")]
    LengthMismatch {
        batch: usize,
        expected: usize,
        got: usize,
    },
    #[error("batch {batch}: response names {image:?}, which was not sent")]
    UnknownImage { batch: usize, image: String },
    #[error("batch {batch}: response names {image:?} more than once")]
    DuplicateImage { batch: usize, image: String },
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("could not read image: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Association(#[from] AssociationError),
}

impl BatchError {
    fn kind(&self) -> FailureKind {
        match self {
            BatchError::Provider(ProviderError::Transport(_)) => FailureKind::Transport,
            BatchError::Provider(ProviderError::Vendor(_)) => FailureKind::Vendor,
            BatchError::Provider(ProviderError::Malformed(_)) => FailureKind::Malformed,
            BatchError::Provider(_) => FailureKind::InvalidRequest,
            BatchError::Io(_) => FailureKind::Io,
            BatchError::Association(_) => FailureKind::Association,
        }
    }
}

/// Cuts `images` into consecutive batches of at most `ceiling` items.
/// `None` puts everything in a single batch.
pub fn plan_batches(images: &[ImageId], ceiling: Option<usize>) -> Vec<Batch> {
    if images.is_empty() {
        return Vec::new();
    }
    let size = ceiling.unwrap_or(images.len()).max(1);
    images
        .chunks(size)
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            images: chunk.to_vec(),
        })
        .collect()
}

/// Pairs each image of `batch` with its tags. Positional answers must match the
/// batch length exactly; keyed answers may leave images out (they get empty
/// records) but may not invent or repeat names.
pub fn associate(
    batch: &Batch,
    tags: BatchTags,
) -> Result<Vec<(ImageId, TagRecord)>, AssociationError> {
    match tags {
        BatchTags::Positional(records) => {
            if records.len() != batch.images.len() {
                return Err(AssociationError::LengthMismatch {
                    batch: batch.index,
                    expected: batch.images.len(),
                    got: records.len(),
                });
            }
            Ok(batch.images.iter().cloned().zip(records).collect())
        }
        BatchTags::Keyed(entries) => {
            let sent: HashSet<&str> = batch.images.iter().map(String::as_str).collect();
            let mut seen = HashSet::new();
            let mut by_name = std::collections::HashMap::new();
            for (name, record) in entries {
                if !sent.contains(name.as_str()) {
                    return Err(AssociationError::UnknownImage {
                        batch: batch.index,
                        image: name,
                    });
                }
                if !seen.insert(name.clone()) {
                    return Err(AssociationError::DuplicateImage {
                        batch: batch.index,
                        image: name,
                    });
                }
                by_name.insert(name, record);
            }
            Ok(batch
                .images
                .iter()
                .map(|id| (id.clone(), by_name.remove(id).unwrap_or_default()))
                .collect())
        }
    }
}

/// Runs one provider over a whole image set, batch after batch.
pub struct BatchCoordinator {
    provider: Arc<dyn TaggingProvider>,
    delay: Duration,
}

impl BatchCoordinator {
    pub fn new(provider: Arc<dyn TaggingProvider>, delay: Duration) -> Self {
        Self { provider, delay }
    }

    /// Always returns a result covering every image. Failed, skipped, and
    /// cancelled batches contribute empty records.
    pub async fn run(&self, images: &ImageSet, cancel: &CancellationToken) -> ProviderRun {
        let kind = self.provider.kind();
        let started = Instant::now();
        let batches = plan_batches(&images.ids(), self.provider.max_batch_size());
        info!(provider = %kind, images = images.len(), batches = batches.len(), "starting provider run");

        let mut result = ProviderResult::new();
        let mut failures = Vec::new();
        let mut issued = 0usize;
        let mut cancelled = false;

        for batch in &batches {
            if cancelled {
                record_empty(&mut result, &batch.images);
                continue;
            }

            if batch.index > 0 && !self.delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
            if cancel.is_cancelled() {
                warn!(provider = %kind, batch = batch.index, "run cancelled; remaining batches skipped");
                cancelled = true;
                record_empty(&mut result, &batch.images);
                continue;
            }

            issued += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                res = self.submit(images, batch) => Some(res),
            };

            match outcome {
                None => {
                    warn!(provider = %kind, batch = batch.index, "run cancelled while batch was in flight");
                    cancelled = true;
                    record_empty(&mut result, &batch.images);
                }
                Some(Ok(pairs)) => {
                    debug!(provider = %kind, batch = batch.index, images = pairs.len(), "batch tagged");
                    for (id, record) in pairs {
                        if result.insert(id.clone(), record).is_some() {
                            warn!(provider = %kind, image = %id, "image tagged twice; keeping the later record");
                        }
                    }
                }
                Some(Err(err)) => {
                    match &err {
                        BatchError::Association(_) => {
                            error!(provider = %kind, batch = batch.index, error = %err, "response does not match the batch; tags dropped")
                        }
                        _ => {
                            warn!(provider = %kind, batch = batch.index, error = %err, "batch failed; images recorded without data")
                        }
                    }
                    record_empty(&mut result, &batch.images);
                    failures.push(BatchFailure {
                        batch: batch.index,
                        images: batch.images.clone(),
                        kind: err.kind(),
                        error: err.to_string(),
                    });
                }
            }
        }

        let elapsed = started.elapsed();
        info!(
            provider = %kind,
            batches = issued,
            failed = failures.len(),
            cancelled,
            elapsed_ms = elapsed.as_millis() as u64,
            "provider run finished"
        );

        ProviderRun {
            kind,
            result,
            batches_planned: batches.len(),
            batches_issued: issued,
            failures,
            cancelled,
            elapsed,
        }
    }

    async fn submit(
        &self,
        images: &ImageSet,
        batch: &Batch,
    ) -> Result<Vec<(ImageId, TagRecord)>, BatchError> {
        let inputs = images.load(&batch.images).await?;
        let tags = self.provider.tag_batch(&inputs).await?;
        Ok(associate(batch, tags)?)
    }
}

fn record_empty(result: &mut ProviderResult, images: &[ImageId]) {
    for id in images {
        result.insert(id.clone(), TagRecord::new());
    }
}
