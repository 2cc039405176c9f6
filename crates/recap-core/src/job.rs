//! Job Records
//!
//! A job is one user's requested retrospective, from upload through
//! generated content. Status transitions are enforced here so every store
//! implementation shares the same state machine:
//!
//! ```text
//!   processing ──complete──▶ completed
//!       │  ▲                     │
//!     fail │ begin_attempt        │ override_fail (operator only)
//!       ▼  │                     ▼
//!      failed ◀──────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::content::ContentRef;
use crate::error::{CoreError, Result};

/// Opaque job identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Parse an externally supplied id.
    ///
    /// Ids end up in storage paths, so only ASCII alphanumerics, `-` and `_`
    /// are accepted.
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        let valid = !s.is_empty()
            && s.len() <= 128
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(s))
        } else {
            Err(CoreError::InvalidId(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline status of a job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment status, independent of the pipeline status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

/// The two photos shown on the rendered page
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoRefs {
    pub user_pic: String,
    pub friend_pic: String,
}

/// A retrospective job
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,

    /// Owning user
    pub user_id: String,

    pub status: JobStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,

    /// Time-boxed reference to the uploaded archive, cleared on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_archive_url: Option<String>,

    /// Durable generated-content blob; set iff `status == completed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_ref: Option<ContentRef>,

    #[serde(default)]
    pub title: String,

    /// Created under a free trial
    #[serde(default)]
    pub ephemeral: bool,

    pub photos: PhotoRefs,

    /// Number of pipeline attempts started
    #[serde(default)]
    pub attempts: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job in `processing`
    pub fn new(user_id: impl Into<String>, photos: PhotoRefs, ephemeral: bool) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            user_id: user_id.into(),
            status: JobStatus::Processing,
            payment_status: None,
            paid_at: None,
            source_archive_url: None,
            content_ref: None,
            title: String::new(),
            ephemeral,
            photos,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn refuse(&self, action: &'static str) -> CoreError {
        CoreError::InvalidTransition {
            id: self.id.to_string(),
            from: self.status,
            action,
        }
    }

    pub fn attach_archive(&mut self, archive_ref: impl Into<String>) {
        self.source_archive_url = Some(archive_ref.into());
        self.touch();
    }

    /// Start a pipeline attempt. Re-entering `processing` is only allowed
    /// from `processing` (watchdog re-trigger) or `failed` (manual retry).
    pub fn begin_attempt(&mut self) -> Result<()> {
        match self.status {
            JobStatus::Processing | JobStatus::Failed => {
                self.status = JobStatus::Processing;
                self.attempts = self.attempts.saturating_add(1);
                self.touch();
                Ok(())
            }
            JobStatus::Completed => Err(self.refuse("start processing")),
        }
    }

    /// The only transition into `completed`. A second completing run
    /// overwrites the first.
    pub fn complete(&mut self, content_ref: ContentRef, title: impl Into<String>) -> Result<()> {
        match self.status {
            JobStatus::Processing | JobStatus::Completed => {
                self.status = JobStatus::Completed;
                self.content_ref = Some(content_ref);
                self.title = title.into();
                self.source_archive_url = None;
                self.touch();
                Ok(())
            }
            JobStatus::Failed => Err(self.refuse("complete")),
        }
    }

    /// Pipeline failure. A completed job is left alone.
    pub fn fail(&mut self) -> Result<()> {
        match self.status {
            JobStatus::Processing | JobStatus::Failed => {
                self.status = JobStatus::Failed;
                self.touch();
                Ok(())
            }
            JobStatus::Completed => Err(self.refuse("fail")),
        }
    }

    /// Operator correction: force `failed` from any state.
    pub fn override_fail(&mut self) {
        self.status = JobStatus::Failed;
        self.content_ref = None;
        self.touch();
    }

    /// Record a confirmed payment. Returns false if it was already paid.
    pub fn mark_paid(&mut self) -> bool {
        if self.payment_status == Some(PaymentStatus::Paid) {
            return false;
        }
        self.payment_status = Some(PaymentStatus::Paid);
        self.paid_at = Some(Utc::now());
        self.touch();
        true
    }

    /// `content_ref` is present exactly when the job is completed
    pub fn is_consistent(&self) -> bool {
        self.content_ref.is_some() == (self.status == JobStatus::Completed)
    }
}
