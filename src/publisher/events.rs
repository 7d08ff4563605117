//! Typed domain events.
//!
//! One method per event the assessment/feedback and user/role services
//! publish. Each builds the flat payload for its event type and hands it to
//! [`Publisher::publish_event`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Publisher, Result};
use crate::auth::RoleType;
use crate::envelope::{event_types, Envelope};
use crate::survey::{Survey, SurveyResponse, SurveyStatus};

/// What an assessment grades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    Assignment,
    Exam,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assignment => "ASSIGNMENT",
            Self::Exam => "EXAM",
        }
    }
}

/// A graded (or awaiting grading) piece of student work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    #[serde(rename = "assessmentId")]
    pub id: String,
    pub reference_id: String,
    pub reference_type: ReferenceType,
    pub student_id: String,
    pub teacher_id: Option<String>,
    pub course_id: Option<String>,
    /// `None` until a teacher grades the work.
    pub score: Option<f64>,
    pub assessment_date: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedbackCategory {
    Content,
    Presentation,
    Correctness,
    Other,
}

/// Detailed feedback attached to an assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    #[serde(rename = "feedbackId")]
    pub id: String,
    pub assessment_id: String,
    pub feedback_text: String,
    pub category: FeedbackCategory,
    pub strengths: Option<String>,
    pub improvement_areas: Option<String>,
}

/// A user account as announced by the user/role service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEvent {
    pub user_id: String,
    pub username: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<RoleType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDeleted {
    pub user_id: String,
    pub user_type: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    pub user_id: String,
    pub role: RoleType,
    pub assigned_by: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SurveyPayload<'a> {
    survey_id: &'a str,
    course_id: &'a str,
    teacher_id: &'a str,
    academic_year: &'a str,
    semester: i32,
    status: SurveyStatus,
    creation_date: DateTime<Utc>,
    closing_date: Option<DateTime<Utc>>,
}

impl<'a> From<&'a Survey> for SurveyPayload<'a> {
    fn from(survey: &'a Survey) -> Self {
        Self {
            survey_id: &survey.id,
            course_id: &survey.course_id,
            teacher_id: &survey.teacher_id,
            academic_year: &survey.academic_year,
            semester: survey.semester,
            status: survey.status,
            creation_date: survey.creation_date,
            closing_date: survey.closing_date,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePayload<'a> {
    response_id: &'a str,
    survey_id: &'a str,
    student_id: &'a str,
    question_id: &'a str,
    numeric_rating: Option<i32>,
    text_comment: Option<&'a str>,
    submission_date: DateTime<Utc>,
}

impl<'a> From<&'a SurveyResponse> for ResponsePayload<'a> {
    fn from(response: &'a SurveyResponse) -> Self {
        Self {
            response_id: &response.id,
            survey_id: &response.survey_id,
            student_id: &response.student_id,
            question_id: &response.question_id,
            numeric_rating: response.numeric_rating,
            text_comment: response.text_comment.as_deref(),
            submission_date: response.submission_date,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SurveyRequest<'a> {
    survey_id: &'a str,
    requested_by: &'a str,
}

impl Publisher {
    fn event<T: Serialize>(&self, event_type: &str, payload: &T) -> Result<Envelope> {
        Ok(self.envelope(event_type).with_payload(payload)?)
    }

    pub async fn assessment_created(&self, assessment: &Assessment) -> Result<()> {
        let envelope = self.event(event_types::ASSESSMENT_CREATED, assessment)?;
        self.publish_event(&envelope, "Assessment", &assessment.id).await
    }

    pub async fn assessment_updated(&self, assessment: &Assessment) -> Result<()> {
        let envelope = self.event(event_types::ASSESSMENT_UPDATED, assessment)?;
        self.publish_event(&envelope, "Assessment", &assessment.id).await
    }

    pub async fn assessment_deleted(&self, assessment_id: &str) -> Result<()> {
        let mut envelope = self.envelope(event_types::ASSESSMENT_DELETED);
        envelope.insert("assessmentId", assessment_id)?;
        self.publish_event(&envelope, "Assessment", assessment_id).await
    }

    pub async fn feedback_created(&self, feedback: &Feedback) -> Result<()> {
        let envelope = self.event(event_types::FEEDBACK_CREATED, feedback)?;
        self.publish_event(&envelope, "Feedback", &feedback.id).await
    }

    pub async fn feedback_updated(&self, feedback: &Feedback) -> Result<()> {
        let envelope = self.event(event_types::FEEDBACK_UPDATED, feedback)?;
        self.publish_event(&envelope, "Feedback", &feedback.id).await
    }

    pub async fn feedback_deleted(&self, feedback_id: &str) -> Result<()> {
        let mut envelope = self.envelope(event_types::FEEDBACK_DELETED);
        envelope.insert("feedbackId", feedback_id)?;
        self.publish_event(&envelope, "Feedback", feedback_id).await
    }

    pub async fn survey_completed(&self, survey: &Survey) -> Result<()> {
        let envelope = self.event(event_types::SURVEY_COMPLETED, &SurveyPayload::from(survey))?;
        self.publish_event(&envelope, "Survey", &survey.id).await
    }

    pub async fn survey_response_submitted(&self, response: &SurveyResponse) -> Result<()> {
        let envelope = self.event(
            event_types::SURVEY_RESPONSE_SUBMITTED,
            &ResponsePayload::from(response),
        )?;
        self.publish_event(&envelope, "SurveyResponse", &response.id)
            .await
    }

    pub async fn survey_responses_bulk_submitted(
        &self,
        survey_id: &str,
        student_id: &str,
        responses: &[SurveyResponse],
    ) -> Result<()> {
        let items = responses
            .iter()
            .map(|r| serde_json::to_value(ResponsePayload::from(r)))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(crate::envelope::EnvelopeError::from)?;

        let mut envelope = self.envelope(event_types::SURVEY_RESPONSES_BULK_SUBMITTED);
        envelope.insert("surveyId", survey_id)?;
        envelope.insert("studentId", student_id)?;
        envelope.insert("responseCount", responses.len() as u64)?;
        envelope.insert("responses", Value::Array(items))?;
        self.publish_event(&envelope, "Survey", survey_id).await
    }

    pub async fn survey_results_requested(&self, survey_id: &str, requested_by: &str) -> Result<()> {
        let envelope = self.event(
            event_types::SURVEY_RESULTS_REQUESTED,
            &SurveyRequest {
                survey_id,
                requested_by,
            },
        )?;
        self.publish_event(&envelope, "Survey", survey_id).await
    }

    pub async fn survey_comments_requested(&self, survey_id: &str, requested_by: &str) -> Result<()> {
        let envelope = self.event(
            event_types::SURVEY_COMMENTS_REQUESTED,
            &SurveyRequest {
                survey_id,
                requested_by,
            },
        )?;
        self.publish_event(&envelope, "Survey", survey_id).await
    }

    pub async fn user_created(&self, user: &UserEvent) -> Result<()> {
        let envelope = self.event(event_types::USER_CREATED, user)?;
        self.publish_event(&envelope, "User", &user.user_id).await
    }

    pub async fn user_updated(&self, user: &UserEvent) -> Result<()> {
        let envelope = self.event(event_types::USER_UPDATED, user)?;
        self.publish_event(&envelope, "User", &user.user_id).await
    }

    pub async fn user_deleted(&self, deleted: &UserDeleted) -> Result<()> {
        let envelope = self.event(event_types::USER_DELETED, deleted)?;
        self.publish_event(&envelope, "User", &deleted.user_id).await
    }

    pub async fn role_assigned(&self, assignment: &RoleAssignment) -> Result<()> {
        let envelope = self.event(event_types::ROLE_ASSIGNED, assignment)?;
        self.publish_event(&envelope, "User", &assignment.user_id)
            .await
    }
}
