use std::sync::Arc;

use serde::Serialize;
use time::Date;

use recurd_core::models::{RecurringTemplate, TemplateId};
use recurd_core::schedule;
use recurd_core::{PostingError, StorageBackend, StorageError};

use crate::audit::AuditLog;
use crate::poster::{LedgerPoster, PostedRef};

#[derive(Debug, Serialize)]
pub struct TemplateFailure {
    pub template_id: TemplateId,
    pub message: String,
}

#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
    pub errors: Vec<TemplateFailure>,
}

enum FireOutcome {
    Fired(PostedRef),
    AlreadyClaimed,
}

/// Drives due templates through the poster. Each template fires inside its
/// own storage transaction, so one bad template never blocks or poisons the
/// rest of the batch.
pub struct Scheduler {
    storage: Arc<dyn StorageBackend>,
    poster: LedgerPoster,
    audit: Arc<dyn AuditLog>,
}

impl Scheduler {
    pub fn new(storage: Arc<dyn StorageBackend>, audit: Arc<dyn AuditLog>) -> Self {
        Self {
            poster: LedgerPoster::new(storage.clone()),
            storage,
            audit,
        }
    }

    /// Fires every template due as of `as_of`. Returns an error only when the
    /// due-selection itself fails; per-template failures are collected in the
    /// summary.
    pub fn process_due(&self, as_of: Date, actor: &str) -> Result<RunSummary, StorageError> {
        let due = self.storage.due_templates(as_of)?;
        tracing::info!(count = due.len(), %as_of, "Processing due templates");

        let mut summary = RunSummary::default();
        for template in due {
            match self.fire_one(&template, as_of) {
                Ok(FireOutcome::Fired(posted)) => {
                    tracing::info!(
                        template_id = template.id,
                        reference = %posted.reference,
                        "Template fired"
                    );
                    self.audit.record(
                        actor,
                        "post",
                        posted.kind.as_str(),
                        &posted.reference,
                    );
                    summary.processed += 1;
                }
                Ok(FireOutcome::AlreadyClaimed) => {
                    tracing::debug!(template_id = template.id, "Template already claimed");
                    summary.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(template_id = template.id, error = %e, "Template failed");
                    summary.errors.push(TemplateFailure {
                        template_id: template.id,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(summary)
    }

    fn fire_one(
        &self,
        template: &RecurringTemplate,
        as_of: Date,
    ) -> Result<FireOutcome, PostingError> {
        let tx = self.storage.begin_transaction()?;
        match self.fire_in_tx(template, as_of) {
            Ok(outcome) => {
                self.storage.commit_transaction(tx)?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rb) = self.storage.rollback_transaction(tx) {
                    tracing::error!(template_id = template.id, error = %rb, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Claims the template before posting anything: `claim_template` advances
    /// `next_run_date` atomically, but only if it still matches the value the
    /// template was selected under. A concurrent run that got there first has
    /// already advanced the date, so this run's claim fails and it skips
    /// instead of double-posting. A posting failure rolls the claim back with
    /// the rest of the transaction.
    fn fire_in_tx(
        &self,
        template: &RecurringTemplate,
        as_of: Date,
    ) -> Result<FireOutcome, PostingError> {
        let current = self
            .storage
            .get_template(template.id)?
            .ok_or(StorageError::TemplateNotFound(template.id))?;
        if !current.is_active || current.next_run_date != template.next_run_date {
            return Ok(FireOutcome::AlreadyClaimed);
        }

        // Rescheduling against `as_of` (not the stale next_run_date) means a
        // template that fell several periods behind fires once and catches up.
        let next = schedule::next_run_date(
            current.start_date,
            current.frequency,
            current.frequency_value,
            as_of,
        )?;
        if !self
            .storage
            .claim_template(current.id, current.next_run_date, as_of, next)?
        {
            return Ok(FireOutcome::AlreadyClaimed);
        }

        let posted = self.poster.post(&current, as_of)?;
        Ok(FireOutcome::Fired(posted))
    }
}
