use std::path::PathBuf;
use thiserror::Error;

/// Failures that stop a run. Everything scoped to one provider or batch is
/// recorded in that provider's run report instead.
#[derive(Debug, Error)]
pub enum TaggerError {
    #[error("not an existing directory: {}", .0.display())]
    InvalidDirectory(PathBuf),
    #[error("no image tagging provider is configured")]
    NoProviderConfigured,
    #[error("invalid exclude pattern: {0}")]
    InvalidPattern(#[from] globset::Error),
    #[error("image resolution task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
