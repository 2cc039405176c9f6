//! Generation Pipeline
//!
//! Download → extract → generate → store → complete, with every stage
//! bounded by a timeout. Any failure after the attempt starts is written
//! back to the job as `failed`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use recap_core::{ContentStore, Job, JobId, JobStatus, JobStore, JobTrigger};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::archive::{ArchiveFetcher, extract_transcript};
use crate::error::{PipelineError, Result};
use crate::generator::ContentGenerator;

/// Stage time limits
#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    /// Whole run, from download to completion
    pub job_timeout: Duration,
    pub download_timeout: Duration,
    pub extraction_timeout: Duration,
    pub generation_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(300),
            download_timeout: Duration::from_secs(60),
            extraction_timeout: Duration::from_secs(60),
            generation_timeout: Duration::from_secs(180),
        }
    }
}

/// Orchestrates archive extraction and content generation for jobs
pub struct Pipeline {
    jobs: Arc<dyn JobStore>,
    content: Arc<dyn ContentStore>,
    fetcher: Arc<dyn ArchiveFetcher>,
    generator: Arc<ContentGenerator>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        content: Arc<dyn ContentStore>,
        fetcher: Arc<dyn ArchiveFetcher>,
        generator: Arc<ContentGenerator>,
    ) -> Self {
        Self {
            jobs,
            content,
            fetcher,
            generator,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> PipelineConfig {
        self.config
    }

    /// Run the pipeline for a job and wait for the result.
    ///
    /// `archive_ref` overrides the reference stored on the job. A completed
    /// job is returned unchanged.
    pub async fn process(&self, job_id: &JobId, archive_ref: Option<String>) -> Result<Job> {
        let job = self.jobs.get_job(job_id)?;
        if job.status == JobStatus::Completed {
            tracing::info!(job_id = %job_id, "Job already completed, nothing to do");
            return Ok(job);
        }

        let archive_ref = match (archive_ref.filter(|r| !r.is_empty()), &job.source_archive_url) {
            (Some(given), stored) => {
                if stored.as_deref() != Some(given.as_str()) {
                    self.jobs.attach_archive_ref(job_id, &given)?;
                }
                given
            }
            (None, Some(stored)) => stored.clone(),
            (None, None) => {
                return Err(PipelineError::Validation(format!(
                    "job {job_id} has no archive reference"
                )));
            }
        };

        let job = self.jobs.begin_attempt(job_id)?;
        tracing::info!(job_id = %job_id, attempt = job.attempts, "Pipeline started");

        let run = bounded("job", self.config.job_timeout, self.run(job_id, &archive_ref));
        match run.await {
            Ok(job) => {
                tracing::info!(job_id = %job_id, title = %job.title, "Pipeline completed");
                Ok(job)
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Pipeline failed");
                if let Err(store_err) = self.jobs.fail_job(job_id) {
                    tracing::error!(job_id = %job_id, error = %store_err, "Could not mark job failed");
                }
                Err(e)
            }
        }
    }

    async fn run(&self, job_id: &JobId, archive_ref: &str) -> Result<Job> {
        let bytes = bounded(
            "download",
            self.config.download_timeout,
            self.fetcher.fetch(archive_ref),
        )
        .await?;

        // Decompression is synchronous; keep it off the async workers
        let transcript = bounded("extraction", self.config.extraction_timeout, async move {
            tokio::task::spawn_blocking(move || extract_transcript(&bytes))
                .await
                .map_err(|e| PipelineError::CorruptArchive(format!("extraction task failed: {e}")))?
        })
        .await?;

        let generated = bounded(
            "generation",
            self.config.generation_timeout,
            self.generator.generate(&transcript.text),
        )
        .await?;
        if !generated.warnings.is_empty() {
            tracing::warn!(job_id = %job_id, warnings = ?generated.warnings, "Stored document has schema warnings");
        }

        let content_ref = self
            .content
            .put_content(job_id, generated.json.into_bytes())
            .await?;
        Ok(self.jobs.complete_job(job_id, content_ref, &generated.title)?)
    }

    /// Run in the background; the caller does not wait
    pub fn spawn(self: &Arc<Self>, job_id: JobId, archive_ref: Option<String>) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move { pipeline.run_detached(&job_id, archive_ref).await })
    }

    async fn run_detached(&self, job_id: &JobId, archive_ref: Option<String>) {
        // Failures are already recorded on the job
        if let Err(e) = self.process(job_id, archive_ref).await {
            tracing::warn!(job_id = %job_id, error = %e, "Background pipeline run ended with error");
        }
    }
}

async fn bounded<T>(
    stage: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| PipelineError::Timeout {
            stage,
            seconds: limit.as_secs(),
        })?
}

/// Fires pipeline runs on the current runtime
pub struct BackgroundTrigger {
    pipeline: Arc<Pipeline>,
    runtime: Handle,
}

impl BackgroundTrigger {
    /// Must be called from within a tokio runtime
    pub fn new(pipeline: Arc<Pipeline>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| PipelineError::Config(format!("no async runtime: {e}")))?;
        Ok(Self { pipeline, runtime })
    }
}

impl JobTrigger for BackgroundTrigger {
    fn trigger(&self, job_id: &JobId, archive_ref: Option<String>) {
        tracing::info!(job_id = %job_id, "Pipeline triggered");
        let pipeline = Arc::clone(&self.pipeline);
        let job_id = job_id.clone();
        self.runtime
            .spawn(async move { pipeline.run_detached(&job_id, archive_ref).await });
    }
}
