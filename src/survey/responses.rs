//! Survey responses: submission, results and comments.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{Result, Survey, SurveyError, SurveyStatus, MAX_RATING, MIN_RATING};
use crate::auth::{Caller, RoleType};
use crate::guard::SubmissionGuard;
use crate::publisher::Publisher;
use crate::storage::{ResponseStore, SurveyFilter, SurveyStore};

/// Longest accepted free-text comment, in characters.
pub const MAX_COMMENT_LENGTH: usize = 1000;

/// One student's answer to one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyResponse {
    pub id: String,
    pub survey_id: String,
    pub student_id: String,
    pub question_id: String,
    pub numeric_rating: Option<i32>,
    pub text_comment: Option<String>,
    pub submission_date: DateTime<Utc>,
}

/// An answer as submitted by the student.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewResponse {
    pub question_id: String,
    #[serde(default)]
    pub numeric_rating: Option<i32>,
    #[serde(default)]
    pub text_comment: Option<String>,
}

impl NewResponse {
    pub fn rating(question_id: impl Into<String>, rating: i32) -> Self {
        Self {
            question_id: question_id.into(),
            numeric_rating: Some(rating),
            text_comment: None,
        }
    }

    pub fn comment(question_id: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            numeric_rating: None,
            text_comment: Some(comment.into()),
        }
    }

    fn has_comment(&self) -> bool {
        self.text_comment
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty())
    }

    fn validate(&self) -> Result<()> {
        if self.question_id.trim().is_empty() {
            return Err(SurveyError::Validation("question id must not be blank".into()));
        }
        if self.numeric_rating.is_none() && !self.has_comment() {
            return Err(SurveyError::Validation(format!(
                "answer to {} needs a rating or a comment",
                self.question_id
            )));
        }
        if let Some(rating) = self.numeric_rating {
            if !(MIN_RATING..=MAX_RATING).contains(&rating) {
                return Err(SurveyError::Validation(format!(
                    "rating must be between {} and {}",
                    MIN_RATING, MAX_RATING
                )));
            }
        }
        if let Some(comment) = &self.text_comment {
            if comment.chars().count() > MAX_COMMENT_LENGTH {
                return Err(SurveyError::Validation(format!(
                    "comment exceeds {} characters",
                    MAX_COMMENT_LENGTH
                )));
            }
        }
        Ok(())
    }
}

fn validate_batch(batch: &[NewResponse]) -> Result<()> {
    if batch.is_empty() {
        return Err(SurveyError::Validation("no answers submitted".into()));
    }
    batch.iter().try_for_each(NewResponse::validate)?;

    let mut seen = HashSet::new();
    if let Some(dup) = batch.iter().find(|r| !seen.insert(r.question_id.as_str())) {
        return Err(SurveyError::Validation(format!(
            "question {} answered more than once",
            dup.question_id
        )));
    }
    Ok(())
}

/// Handles student submissions and what teachers read back.
pub struct ResponseService {
    surveys: Arc<dyn SurveyStore>,
    responses: Arc<dyn ResponseStore>,
    guard: SubmissionGuard,
    publisher: Arc<Publisher>,
}

impl ResponseService {
    pub fn new(
        surveys: Arc<dyn SurveyStore>,
        responses: Arc<dyn ResponseStore>,
        publisher: Arc<Publisher>,
    ) -> Self {
        Self {
            guard: SubmissionGuard::new(responses.clone()),
            surveys,
            responses,
            publisher,
        }
    }

    async fn load(&self, survey_id: &str) -> Result<Survey> {
        self.surveys
            .get(survey_id)
            .await?
            .ok_or_else(|| SurveyError::NotFound(survey_id.to_string()))
    }

    /// Submit the caller's answers to an ACTIVE survey.
    ///
    /// Either every answer is stored or none is. A second submission by the
    /// same student fails with [`SurveyError::DuplicateSubmission`]. The
    /// bulk-submitted event is best effort once the rows are committed.
    pub async fn submit(
        &self,
        caller: &Caller,
        survey_id: &str,
        batch: Vec<NewResponse>,
    ) -> Result<Vec<SurveyResponse>> {
        caller.require(RoleType::Student)?;

        let survey = self.load(survey_id).await?;
        if survey.status != SurveyStatus::Active {
            return Err(SurveyError::NotAccepting(survey_id.to_string()));
        }

        let reservation = self
            .guard
            .check_and_reserve(survey_id, &caller.user_id)
            .await?;
        validate_batch(&batch)?;

        let submitted_at = Utc::now();
        let rows: Vec<SurveyResponse> = batch
            .into_iter()
            .map(|answer| SurveyResponse {
                id: Uuid::new_v4().to_string(),
                survey_id: survey_id.to_string(),
                student_id: caller.user_id.clone(),
                question_id: answer.question_id,
                numeric_rating: answer.numeric_rating,
                text_comment: answer.text_comment,
                submission_date: submitted_at,
            })
            .collect();

        reservation.commit(&rows).await?;
        info!(
            survey_id = %survey_id,
            student_id = %caller.user_id,
            count = rows.len(),
            "Survey responses submitted"
        );

        if let Err(e) = self
            .publisher
            .survey_responses_bulk_submitted(survey_id, &caller.user_id, &rows)
            .await
        {
            warn!(survey_id = %survey_id, error = %e, "Submission stored but not announced");
        }

        Ok(rows)
    }

    /// Average rating per question.
    pub async fn results(&self, caller: &Caller, survey_id: &str) -> Result<BTreeMap<String, f64>> {
        caller.require(RoleType::Teacher)?;
        self.load(survey_id).await?;
        self.announce_results_requested(survey_id, &caller.user_id)
            .await;

        let mut sums: BTreeMap<String, (i64, u32)> = BTreeMap::new();
        for response in self.responses.list_for_survey(survey_id).await? {
            if let Some(rating) = response.numeric_rating {
                let entry = sums.entry(response.question_id).or_default();
                entry.0 += i64::from(rating);
                entry.1 += 1;
            }
        }

        Ok(sums
            .into_iter()
            .map(|(question, (sum, count))| (question, sum as f64 / f64::from(count)))
            .collect())
    }

    /// Responses carrying a non-blank comment.
    pub async fn comments(&self, caller: &Caller, survey_id: &str) -> Result<Vec<SurveyResponse>> {
        caller.require(RoleType::Teacher)?;
        self.load(survey_id).await?;

        if let Err(e) = self
            .publisher
            .survey_comments_requested(survey_id, &caller.user_id)
            .await
        {
            warn!(survey_id = %survey_id, error = %e, "Comments request not announced");
        }

        Ok(self
            .responses
            .list_for_survey(survey_id)
            .await?
            .into_iter()
            .filter(|r| r.text_comment.as_deref().is_some_and(|c| !c.trim().is_empty()))
            .collect())
    }

    pub async fn responses_for_survey(
        &self,
        caller: &Caller,
        survey_id: &str,
    ) -> Result<Vec<SurveyResponse>> {
        caller.require(RoleType::Teacher)?;
        self.load(survey_id).await?;
        Ok(self.responses.list_for_survey(survey_id).await?)
    }

    /// The caller's own responses across surveys.
    pub async fn my_responses(&self, caller: &Caller) -> Result<Vec<SurveyResponse>> {
        caller.require(RoleType::Student)?;
        Ok(self.responses.list_for_student(&caller.user_id).await?)
    }

    /// Surveys a student may answer.
    pub async fn available_surveys(&self, caller: &Caller) -> Result<Vec<Survey>> {
        caller.require(RoleType::Student)?;
        let filter = SurveyFilter {
            status: Some(SurveyStatus::Active),
            ..Default::default()
        };
        Ok(self.surveys.list(&filter).await?)
    }

    async fn announce_results_requested(&self, survey_id: &str, requested_by: &str) {
        if let Err(e) = self
            .publisher
            .survey_results_requested(survey_id, requested_by)
            .await
        {
            warn!(survey_id = %survey_id, error = %e, "Results request not announced");
        }
    }
}
