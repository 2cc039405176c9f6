//! Processing Trigger
//!
//! Seam between payment reconciliation and the content pipeline. The
//! reconciler only needs to say "start this job"; how and where the work
//! runs is up to the implementation.

use crate::job::JobId;

/// Fire-and-forget request to run the pipeline for a job
pub trait JobTrigger: Send + Sync {
    /// Schedule processing. Must return promptly; failures are recorded on
    /// the job, never reported to the caller.
    fn trigger(&self, job_id: &JobId, archive_ref: Option<String>);
}

/// Trigger that does nothing (payments-only deployments and tests)
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTrigger;

impl JobTrigger for NoopTrigger {
    fn trigger(&self, job_id: &JobId, _archive_ref: Option<String>) {
        tracing::debug!(job_id = %job_id, "Processing trigger disabled, skipping");
    }
}
