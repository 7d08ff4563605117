//! Submission dedup guard.
//!
//! A student submits each survey once. [`SubmissionGuard::check_and_reserve`]
//! rejects early when a submission is already on record; the returned
//! [`Reservation`] writes the batch through
//! [`ResponseStore::insert_submission`], which re-checks and writes inside a
//! single atomic step. Two concurrent submissions may both pass the early
//! check, but only one commits. A rejected commit writes nothing.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::storage::{ResponseStore, StorageError};
use crate::survey::SurveyResponse;

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("Student {student_id} already submitted survey {survey_id}")]
    AlreadySubmitted {
        survey_id: String,
        student_id: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Guards the (survey, student) pair against double submission.
#[derive(Clone)]
pub struct SubmissionGuard {
    responses: Arc<dyn ResponseStore>,
}

impl SubmissionGuard {
    pub fn new(responses: Arc<dyn ResponseStore>) -> Self {
        Self { responses }
    }

    /// `checkAndReserve(surveyId, studentId)`.
    ///
    /// Fails when the student already has responses for the survey.
    pub async fn check_and_reserve(
        &self,
        survey_id: &str,
        student_id: &str,
    ) -> Result<Reservation, GuardError> {
        if self.responses.has_submitted(survey_id, student_id).await? {
            warn!(survey_id = %survey_id, student_id = %student_id, "Duplicate submission rejected");
            return Err(GuardError::AlreadySubmitted {
                survey_id: survey_id.to_string(),
                student_id: student_id.to_string(),
            });
        }

        Ok(Reservation {
            responses: self.responses.clone(),
            survey_id: survey_id.to_string(),
            student_id: student_id.to_string(),
        })
    }
}

/// A pending submission that passed the early check.
#[must_use = "a reservation writes nothing until committed"]
pub struct Reservation {
    responses: Arc<dyn ResponseStore>,
    survey_id: String,
    student_id: String,
}

impl Reservation {
    pub fn survey_id(&self) -> &str {
        &self.survey_id
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    /// Write every response or none of them.
    pub async fn commit(self, responses: &[SurveyResponse]) -> Result<(), GuardError> {
        let written = self
            .responses
            .insert_submission(&self.survey_id, &self.student_id, responses)
            .await?;

        if !written {
            warn!(
                survey_id = %self.survey_id,
                student_id = %self.student_id,
                "Concurrent submission won the reservation"
            );
            return Err(GuardError::AlreadySubmitted {
                survey_id: self.survey_id,
                student_id: self.student_id,
            });
        }

        debug!(
            survey_id = %self.survey_id,
            student_id = %self.student_id,
            count = responses.len(),
            "Submission committed"
        );
        Ok(())
    }
}
