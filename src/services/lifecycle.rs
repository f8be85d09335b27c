//! Retry-bounded status state machine shared by every processing record.
//!
//! ```text
//! Processing ──complete──▶ Completed            (terminal, retry_count = 0)
//!     │
//!     └──fail──▶ Error ──fail──▶ … ──fail──▶ FailedPermanently (terminal)
//! ```
//!
//! `fail` increments `retry_count`; the transition that brings it to the
//! ceiling lands on `FailedPermanently` directly instead of `Error`.

use chrono::Utc;
use std::sync::OnceLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::{Repository, RepositoryError};
use crate::models::{LifecycleStatus, Record, StatusTrackable};

/// A requested status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Work finished successfully.
    Complete,
    /// Work failed; counts against the retry ceiling.
    Fail,
    /// Give up without another attempt (ceiling already reached).
    ForceFail,
}

/// What a transition did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Completed,
    /// Retryable failure; carries the new retry count.
    Errored { retry_count: i32 },
    /// Retry ceiling reached on this transition.
    Exhausted { retry_count: i32 },
    /// Record was already terminal and left untouched.
    Ignored { status: LifecycleStatus },
}

impl TransitionOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, Self::Ignored { .. })
    }
}

/// Result of a persisted transition.
#[derive(Debug, Clone)]
pub struct Transitioned<R> {
    pub record: R,
    pub outcome: TransitionOutcome,
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// The status lifecycle manager.
#[derive(Debug, Clone, Copy)]
pub struct StatusLifecycle {
    max_retries: i32,
}

impl StatusLifecycle {
    pub fn new(max_retries: i32) -> Self {
        Self {
            max_retries: max_retries.max(1),
        }
    }

    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    /// True once the record may not be retried again.
    pub fn is_exhausted<R: StatusTrackable>(&self, record: &R) -> bool {
        record.retry_count() >= self.max_retries
    }

    /// Apply `transition` to an in-memory record.
    pub fn apply<R: StatusTrackable>(&self, record: &mut R, transition: Transition) -> TransitionOutcome {
        let current = record.status();
        if current.is_terminal() {
            return TransitionOutcome::Ignored { status: current };
        }

        let outcome = match transition {
            Transition::Complete => {
                record.set_status(LifecycleStatus::Completed);
                record.set_retry_count(0);
                TransitionOutcome::Completed
            }
            Transition::Fail => {
                let retry_count = record.retry_count().max(0) + 1;
                record.set_retry_count(retry_count);
                if retry_count >= self.max_retries {
                    record.set_status(LifecycleStatus::FailedPermanently);
                    TransitionOutcome::Exhausted { retry_count }
                } else {
                    record.set_status(LifecycleStatus::Error);
                    TransitionOutcome::Errored { retry_count }
                }
            }
            Transition::ForceFail => {
                record.set_status(LifecycleStatus::FailedPermanently);
                TransitionOutcome::Exhausted {
                    retry_count: record.retry_count(),
                }
            }
        };
        record.set_updated_at(Utc::now());
        outcome
    }

    /// Transition a persisted record.
    pub async fn transition<R: Record>(
        &self,
        repo: &dyn Repository<R>,
        id: Uuid,
        transition: Transition,
    ) -> Result<Transitioned<R>, LifecycleError> {
        self.transition_with(repo, id, transition, |_| {}).await
    }

    /// Transition a persisted record and, if the transition took effect,
    /// apply `patch` in the same write (artifact URL, error text, ...).
    pub async fn transition_with<R, F>(
        &self,
        repo: &dyn Repository<R>,
        id: Uuid,
        transition: Transition,
        patch: F,
    ) -> Result<Transitioned<R>, LifecycleError>
    where
        R: Record,
        F: Fn(&mut R) + Send + Sync,
    {
        let outcome = OnceLock::new();
        let apply = |record: &mut R| {
            let result = self.apply(record, transition);
            if result.changed() {
                patch(record);
            }
            let _ = outcome.set(result);
            result.changed()
        };

        let record = repo
            .update_with(id, &apply)
            .await?
            .ok_or(LifecycleError::NotFound { kind: R::KIND, id })?;

        let outcome = outcome.into_inner().unwrap_or(TransitionOutcome::Ignored {
            status: record.status(),
        });

        match outcome {
            TransitionOutcome::Exhausted { retry_count } => warn!(
                kind = R::KIND,
                id = %id,
                retry_count,
                "Retry ceiling reached, record failed permanently"
            ),
            TransitionOutcome::Ignored { status } => debug!(
                kind = R::KIND,
                id = %id,
                status = %status,
                ?transition,
                "Ignoring transition on terminal record"
            ),
            _ => debug!(kind = R::KIND, id = %id, ?outcome, "Status transitioned"),
        }

        Ok(Transitioned { record, outcome })
    }
}
