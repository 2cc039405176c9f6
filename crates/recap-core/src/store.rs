//! Job Store
//!
//! Durable CRUD for job records. Every mutation goes through the state
//! machine on [`Job`], so implementations only have to provide atomic
//! read-modify-write per record.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::content::ContentRef;
use crate::error::{CoreError, Result};
use crate::job::{Job, JobId, PhotoRefs};

/// Job storage trait
pub trait JobStore: Send + Sync {
    /// Create a job in `processing`
    fn create_job(&self, owner_id: &str, photos: PhotoRefs, ephemeral: bool) -> Result<Job>;

    /// Point lookup
    fn get_job(&self, id: &JobId) -> Result<Job>;

    /// Jobs owned by a user, newest first
    fn list_jobs(&self, owner_id: &str, include_ephemeral: bool) -> Result<Vec<Job>>;

    fn attach_archive_ref(&self, id: &JobId, archive_ref: &str) -> Result<Job>;

    /// Enter `processing` for a new pipeline attempt
    fn begin_attempt(&self, id: &JobId) -> Result<Job>;

    fn complete_job(&self, id: &JobId, content_ref: ContentRef, title: &str) -> Result<Job>;

    /// Pipeline failure; refused for completed jobs
    fn fail_job(&self, id: &JobId) -> Result<Job>;

    /// Operator correction from any state
    fn override_fail(&self, id: &JobId) -> Result<Job>;

    /// Record payment. The flag is false when the job was already paid.
    fn mark_paid(&self, id: &JobId) -> Result<(Job, bool)>;
}

/// In-memory job store (for development and tests)
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<T>(&self, id: &JobId, f: impl FnOnce(&mut Job) -> Result<T>) -> Result<(Job, T)> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| CoreError::job_not_found(id.as_str()))?;

        // Mutate a copy so a refused transition leaves the record untouched
        let mut next = job.clone();
        let out = f(&mut next)?;
        *job = next.clone();
        Ok((next, out))
    }
}

impl JobStore for MemoryJobStore {
    fn create_job(&self, owner_id: &str, photos: PhotoRefs, ephemeral: bool) -> Result<Job> {
        let job = Job::new(owner_id, photos, ephemeral);
        self.jobs.write().insert(job.id.clone(), job.clone());
        tracing::debug!(job_id = %job.id, user_id = %owner_id, ephemeral, "Created job");
        Ok(job)
    }

    fn get_job(&self, id: &JobId) -> Result<Job> {
        self.jobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::job_not_found(id.as_str()))
    }

    fn list_jobs(&self, owner_id: &str, include_ephemeral: bool) -> Result<Vec<Job>> {
        let mut result: Vec<_> = self
            .jobs
            .read()
            .values()
            .filter(|j| j.user_id == owner_id && (include_ephemeral || !j.ephemeral))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    fn attach_archive_ref(&self, id: &JobId, archive_ref: &str) -> Result<Job> {
        self.update(id, |job| {
            job.attach_archive(archive_ref);
            Ok(())
        })
        .map(|(job, ())| job)
    }

    fn begin_attempt(&self, id: &JobId) -> Result<Job> {
        self.update(id, Job::begin_attempt).map(|(job, ())| job)
    }

    fn complete_job(&self, id: &JobId, content_ref: ContentRef, title: &str) -> Result<Job> {
        self.update(id, |job| job.complete(content_ref, title))
            .map(|(job, ())| job)
    }

    fn fail_job(&self, id: &JobId) -> Result<Job> {
        self.update(id, Job::fail).map(|(job, ())| job)
    }

    fn override_fail(&self, id: &JobId) -> Result<Job> {
        self.update(id, |job| {
            job.override_fail();
            Ok(())
        })
        .map(|(job, ())| job)
    }

    fn mark_paid(&self, id: &JobId) -> Result<(Job, bool)> {
        self.update(id, |job| Ok(job.mark_paid()))
    }
}
