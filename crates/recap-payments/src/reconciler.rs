//! Webhook Reconciler
//!
//! Applies verified [`PaymentEvent`]s to the credit ledger and job store
//! exactly once. Reconciliation never fails from the caller's point of
//! view: every path ends in a [`ReconcileOutcome`] that the webhook
//! endpoint acknowledges, with store failures flagged for alerting.

use std::sync::Arc;

use recap_core::{CreditApplication, CreditLedger, JobId, JobStatus, JobStore, JobTrigger};
use serde::Serialize;

use crate::event::{EventStatus, MetadataOrigin, PaymentEvent, PaymentKind};

/// Reconciler policy knobs
#[derive(Clone, Copy, Debug)]
pub struct ReconcilerConfig {
    /// Accept unparseable references as `userId`/`retrospectiveId`
    pub legacy_reference_fallback: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            legacy_reference_fallback: true,
        }
    }
}

/// What reconciliation did with an event
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ReconcileOutcome {
    CreditsApplied {
        user_id: String,
        credits: u64,
        balance: u64,
    },

    /// Same payment seen before; ledger untouched
    DuplicateCredit { user_id: String, balance: u64 },

    JobPaid { job_id: String, triggered: bool },

    /// Job was already marked paid; processing not re-triggered
    JobAlreadyPaid { job_id: String },

    /// Acknowledged without acting on it
    NotProcessed { reason: String },

    /// Received but not applied because a store call failed
    StoreFailed { reason: String },
}

impl ReconcileOutcome {
    /// False only when a store failure kept the event from being applied
    pub fn applied(&self) -> bool {
        !matches!(self, ReconcileOutcome::StoreFailed { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::CreditsApplied { .. } => "credits_applied",
            ReconcileOutcome::DuplicateCredit { .. } => "duplicate_credit",
            ReconcileOutcome::JobPaid { .. } => "job_paid",
            ReconcileOutcome::JobAlreadyPaid { .. } => "job_already_paid",
            ReconcileOutcome::NotProcessed { .. } => "not_processed",
            ReconcileOutcome::StoreFailed { .. } => "store_failed",
        }
    }

    fn not_processed(reason: impl Into<String>) -> Self {
        Self::NotProcessed {
            reason: reason.into(),
        }
    }
}

/// Applies payment events to durable state
pub struct WebhookReconciler {
    ledger: Arc<dyn CreditLedger>,
    jobs: Arc<dyn JobStore>,
    trigger: Arc<dyn JobTrigger>,
    config: ReconcilerConfig,
}

impl WebhookReconciler {
    pub fn new(
        ledger: Arc<dyn CreditLedger>,
        jobs: Arc<dyn JobStore>,
        trigger: Arc<dyn JobTrigger>,
    ) -> Self {
        Self {
            ledger,
            jobs,
            trigger,
            config: ReconcilerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Apply an event
    pub fn reconcile(&self, event: &PaymentEvent) -> ReconcileOutcome {
        let outcome = self.apply(event);

        match &outcome {
            ReconcileOutcome::StoreFailed { reason } => tracing::error!(
                provider = %event.provider,
                external_payment_id = ?event.external_payment_id,
                reason = %reason,
                "Payment received but not applied"
            ),
            other => tracing::info!(
                provider = %event.provider,
                external_payment_id = ?event.external_payment_id,
                status = %event.status,
                outcome = other.as_str(),
                test = event.test,
                "Payment event reconciled"
            ),
        }
        outcome
    }

    fn apply(&self, event: &PaymentEvent) -> ReconcileOutcome {
        if matches!(event.status, EventStatus::Rejected | EventStatus::Unknown) {
            return ReconcileOutcome::not_processed(format!(
                "status {} ({})",
                event.status, event.raw_status
            ));
        }

        let meta = &event.metadata;
        if meta.origin == MetadataOrigin::LegacyReference {
            if !self.config.legacy_reference_fallback {
                return ReconcileOutcome::not_processed("unparseable payment reference");
            }
            tracing::warn!(
                provider = %event.provider,
                "Using raw payment reference as job id"
            );
        }

        match meta.resolved_kind() {
            Some(PaymentKind::Credits) => self.apply_credits(event),
            Some(PaymentKind::Retrospective) => self.apply_job_payment(event),
            Some(PaymentKind::Other) | None => {
                ReconcileOutcome::not_processed("payment type missing or unknown")
            }
        }
    }

    /// Approved or pending: pending is credited optimistically, and the
    /// later approval for the same payment dedups on the idempotency key.
    fn apply_credits(&self, event: &PaymentEvent) -> ReconcileOutcome {
        let meta = &event.metadata;
        let (Some(user_id), Some(credits)) = (meta.user_id.as_deref(), meta.credits) else {
            return ReconcileOutcome::not_processed("credits metadata incomplete");
        };
        if user_id.is_empty() || credits == 0 {
            return ReconcileOutcome::not_processed("credits metadata incomplete");
        }

        let key = event.idempotency_key();
        match self.ledger.credit_once(&key, user_id, credits) {
            Ok(CreditApplication::Applied { balance }) => ReconcileOutcome::CreditsApplied {
                user_id: user_id.to_string(),
                credits,
                balance,
            },
            Ok(CreditApplication::Duplicate { balance }) => {
                tracing::info!(key = %key, "Duplicate credit delivery ignored");
                ReconcileOutcome::DuplicateCredit {
                    user_id: user_id.to_string(),
                    balance,
                }
            }
            Err(e) => ReconcileOutcome::StoreFailed {
                reason: e.to_string(),
            },
        }
    }

    fn apply_job_payment(&self, event: &PaymentEvent) -> ReconcileOutcome {
        if event.status != EventStatus::Approved {
            return ReconcileOutcome::not_processed("job payments wait for approval");
        }

        let Some(raw_id) = event.metadata.retrospective_id.as_deref() else {
            return ReconcileOutcome::not_processed("retrospectiveId missing");
        };
        let Ok(job_id) = JobId::parse(raw_id) else {
            return ReconcileOutcome::not_processed("retrospectiveId is not a valid job id");
        };

        match self.jobs.mark_paid(&job_id) {
            Ok((job, true)) => {
                // Nothing to run without an archive, or if a free run already finished
                let triggered =
                    job.status != JobStatus::Completed && job.source_archive_url.is_some();
                if triggered {
                    self.trigger.trigger(&job_id, job.source_archive_url.clone());
                }
                ReconcileOutcome::JobPaid {
                    job_id: job_id.to_string(),
                    triggered,
                }
            }
            Ok((_, false)) => ReconcileOutcome::JobAlreadyPaid {
                job_id: job_id.to_string(),
            },
            Err(e) if e.is_not_found() => {
                ReconcileOutcome::not_processed(format!("job {job_id} not found"))
            }
            Err(e) => ReconcileOutcome::StoreFailed {
                reason: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{PaymentMetadata, Provider};
    use recap_core::{MemoryCreditLedger, MemoryJobStore, PhotoRefs};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTrigger {
        calls: Mutex<Vec<(JobId, Option<String>)>>,
    }

    impl JobTrigger for RecordingTrigger {
        fn trigger(&self, job_id: &JobId, archive_ref: Option<String>) {
            self.calls.lock().unwrap().push((job_id.clone(), archive_ref));
        }
    }

    struct Harness {
        ledger: Arc<MemoryCreditLedger>,
        jobs: Arc<MemoryJobStore>,
        trigger: Arc<RecordingTrigger>,
        reconciler: WebhookReconciler,
    }

    fn harness() -> Harness {
        let ledger = Arc::new(MemoryCreditLedger::new());
        let jobs = Arc::new(MemoryJobStore::new());
        let trigger = Arc::new(RecordingTrigger::default());
        let reconciler = WebhookReconciler::new(ledger.clone(), jobs.clone(), trigger.clone());
        Harness {
            ledger,
            jobs,
            trigger,
            reconciler,
        }
    }

    fn event(id: &str, status: EventStatus, metadata: PaymentMetadata) -> PaymentEvent {
        PaymentEvent {
            provider: Provider::MercadoPago,
            external_payment_id: Some(id.into()),
            status,
            raw_status: status.as_str().into(),
            metadata,
            test: false,
        }
    }

    #[test]
    fn test_replayed_credits_apply_once() {
        let h = harness();
        let e = event("p1", EventStatus::Approved, PaymentMetadata::credits("U", 5));

        for _ in 0..5 {
            assert!(h.reconciler.reconcile(&e).applied());
        }
        assert_eq!(h.ledger.balance("U").unwrap(), 5);
    }

    #[test]
    fn test_pending_then_approved_credits_once() {
        let h = harness();
        let pending = event("p2", EventStatus::Pending, PaymentMetadata::credits("U", 3));
        let approved = event("p2", EventStatus::Approved, PaymentMetadata::credits("U", 3));

        assert!(matches!(
            h.reconciler.reconcile(&pending),
            ReconcileOutcome::CreditsApplied { balance: 3, .. }
        ));
        assert!(matches!(
            h.reconciler.reconcile(&approved),
            ReconcileOutcome::DuplicateCredit { balance: 3, .. }
        ));
        assert_eq!(h.ledger.balance("U").unwrap(), 3);
    }

    #[test]
    fn test_rejected_and_unknown_touch_nothing() {
        let h = harness();
        for status in [EventStatus::Rejected, EventStatus::Unknown] {
            let outcome = h
                .reconciler
                .reconcile(&event("p3", status, PaymentMetadata::credits("U", 5)));
            assert!(matches!(outcome, ReconcileOutcome::NotProcessed { .. }));
        }
        assert_eq!(h.ledger.balance("U").unwrap(), 0);
    }

    #[test]
    fn test_incomplete_credits_metadata() {
        let h = harness();
        let mut meta = PaymentMetadata::credits("U", 5);
        meta.credits = None;

        let outcome = h.reconciler.reconcile(&event("p4", EventStatus::Approved, meta));
        assert!(matches!(outcome, ReconcileOutcome::NotProcessed { .. }));
    }

    #[test]
    fn test_job_payment_triggers_processing_once() {
        let h = harness();
        let job = h.jobs.create_job("U", PhotoRefs::default(), false).unwrap();
        h.jobs.attach_archive_ref(&job.id, "https://blob/a.zip").unwrap();

        let e = event(
            "p5",
            EventStatus::Approved,
            PaymentMetadata::retrospective("U", job.id.as_str()),
        );
        assert_eq!(
            h.reconciler.reconcile(&e),
            ReconcileOutcome::JobPaid {
                job_id: job.id.to_string(),
                triggered: true
            }
        );
        assert!(matches!(
            h.reconciler.reconcile(&e),
            ReconcileOutcome::JobAlreadyPaid { .. }
        ));

        let calls = h.trigger.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.as_deref(), Some("https://blob/a.zip"));
        assert!(h.jobs.get_job(&job.id).unwrap().paid_at.is_some());
    }

    #[test]
    fn test_pending_job_payment_waits() {
        let h = harness();
        let job = h.jobs.create_job("U", PhotoRefs::default(), false).unwrap();
        let e = event(
            "p6",
            EventStatus::Pending,
            PaymentMetadata::retrospective("U", job.id.as_str()),
        );

        assert!(matches!(
            h.reconciler.reconcile(&e),
            ReconcileOutcome::NotProcessed { .. }
        ));
        assert!(h.jobs.get_job(&job.id).unwrap().payment_status.is_none());
    }

    #[test]
    fn test_unknown_job_is_not_processed() {
        let h = harness();
        let e = event(
            "p7",
            EventStatus::Approved,
            PaymentMetadata::retrospective("U", "missing_job"),
        );
        assert!(matches!(
            h.reconciler.reconcile(&e),
            ReconcileOutcome::NotProcessed { .. }
        ));
    }

    #[test]
    fn test_legacy_reference_policy() {
        let h = harness();
        let job = h.jobs.create_job("U", PhotoRefs::default(), false).unwrap();
        let e = event(
            "p8",
            EventStatus::Approved,
            PaymentMetadata::from_reference(Some(job.id.as_str())),
        );

        let strict = WebhookReconciler::new(h.ledger.clone(), h.jobs.clone(), h.trigger.clone())
            .with_config(ReconcilerConfig {
                legacy_reference_fallback: false,
            });
        assert!(matches!(
            strict.reconcile(&e),
            ReconcileOutcome::NotProcessed { .. }
        ));

        assert!(matches!(
            h.reconciler.reconcile(&e),
            ReconcileOutcome::JobPaid { triggered: false, .. }
        ));
    }
}
