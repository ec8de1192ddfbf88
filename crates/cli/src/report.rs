//! Machine-readable summary of a tagging run, written next to the table.

use chrono::{DateTime, Utc};
use providers::ProviderKind;
use serde::Serialize;
use tagger_core::models::{BatchFailure, ProviderRun};
use tagger_core::pipeline::RunOutcome;

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub images: usize,
    pub cancelled: bool,
    pub association_failures: usize,
    pub providers: Vec<ProviderReport>,
}

#[derive(Debug, Serialize)]
pub struct ProviderReport {
    pub provider: ProviderKind,
    pub batches_planned: usize,
    pub batches_issued: usize,
    pub images_with_tags: usize,
    pub cancelled: bool,
    pub elapsed_ms: u64,
    pub failures: Vec<BatchFailure>,
}

impl From<&ProviderRun> for ProviderReport {
    fn from(run: &ProviderRun) -> Self {
        Self {
            provider: run.kind,
            batches_planned: run.batches_planned,
            batches_issued: run.batches_issued,
            images_with_tags: run.result.iter().filter(|(_, r)| !r.is_empty()).count(),
            cancelled: run.cancelled,
            elapsed_ms: run.elapsed.as_millis() as u64,
            failures: run.failures.clone(),
        }
    }
}

impl From<&RunOutcome> for RunReport {
    fn from(outcome: &RunOutcome) -> Self {
        Self {
            started_at: outcome.started_at,
            finished_at: outcome.finished_at,
            images: outcome.table.row_count(),
            cancelled: outcome.cancelled(),
            association_failures: outcome.association_failures(),
            providers: outcome.runs.iter().map(ProviderReport::from).collect(),
        }
    }
}

impl RunReport {
    /// One line per provider, for the terminal.
    pub fn summary_lines(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| {
                let mut line = format!(
                    "{}: {} of {} images tagged, {}/{} batches sent, {} failed",
                    p.provider,
                    p.images_with_tags,
                    self.images,
                    p.batches_issued,
                    p.batches_planned,
                    p.failures.len()
                );
                if p.cancelled {
                    line.push_str(" (cancelled)");
                }
                line
            })
            .collect()
    }
}
