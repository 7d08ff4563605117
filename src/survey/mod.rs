//! Teacher surveys and their lifecycle.
//!
//! ```text
//!   DRAFT ──▶ ACTIVE ──▶ CLOSED
//!     │                   │ │
//!     └──────────────────▶┘ │   CLOSED ──▶ ACTIVE (reopen, clears closing date)
//!     ◀─────────────────────┘   CLOSED ──▶ DRAFT
//! ```
//!
//! Moving to CLOSED stamps the closing date and is announced with
//! `SURVEY_COMPLETED` by [`service::SurveyService`]. Content edits are only
//! legal in DRAFT.

pub mod responses;
pub mod service;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::AuthError;
use crate::guard::GuardError;
use crate::publisher::PublishError;
use crate::storage::StorageError;

pub use responses::{NewResponse, ResponseService, SurveyResponse};
pub use service::{SurveyService, SurveyStatistics};

/// Lowest rating a RATING question may accept.
pub const MIN_RATING: i32 = 1;
/// Highest rating a RATING question may accept.
pub const MAX_RATING: i32 = 5;

/// Result type for survey operations.
pub type Result<T> = std::result::Result<T, SurveyError>;

/// Errors raised by survey and response operations.
#[derive(Debug, thiserror::Error)]
pub enum SurveyError {
    #[error("Invalid survey: {0}")]
    Validation(String),

    #[error("Survey not found: {0}")]
    NotFound(String),

    #[error("A survey already exists for teacher {teacher_id}, course {course_id}, {academic_year} semester {semester}")]
    AlreadyExists {
        teacher_id: String,
        course_id: String,
        academic_year: String,
        semester: i32,
    },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: SurveyStatus,
        to: SurveyStatus,
    },

    #[error("Survey is {0}; only DRAFT surveys can be edited")]
    NotEditable(SurveyStatus),

    #[error("Survey {id} changed concurrently (expected {expected})")]
    Conflict { id: String, expected: SurveyStatus },

    #[error("Survey {0} is not accepting responses")]
    NotAccepting(String),

    #[error("Student {student_id} already submitted survey {survey_id}")]
    DuplicateSubmission {
        survey_id: String,
        student_id: String,
    },

    #[error("Not authorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The state change committed but its event did not reach the broker.
    #[error("Survey {} saved but event not published: {source}", .survey.id)]
    EventNotPublished {
        survey: Box<Survey>,
        #[source]
        source: PublishError,
    },
}

impl From<GuardError> for SurveyError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::AlreadySubmitted {
                survey_id,
                student_id,
            } => SurveyError::DuplicateSubmission {
                survey_id,
                student_id,
            },
            GuardError::Storage(e) => SurveyError::Storage(e),
        }
    }
}

/// Survey lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SurveyStatus {
    Draft,
    Active,
    Closed,
}

impl SurveyStatus {
    pub const ALL: [SurveyStatus; 3] = [Self::Draft, Self::Active, Self::Closed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Active => "ACTIVE",
            Self::Closed => "CLOSED",
        }
    }

    /// Statuses reachable from this one.
    pub fn allowed_targets(&self) -> &'static [SurveyStatus] {
        match self {
            Self::Draft => &[Self::Active, Self::Closed],
            Self::Active => &[Self::Closed],
            Self::Closed => &[Self::Active, Self::Draft],
        }
    }

    pub fn can_transition_to(&self, to: SurveyStatus) -> bool {
        self.allowed_targets().contains(&to)
    }
}

impl fmt::Display for SurveyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SurveyStatus {
    type Err = SurveyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(Self::Draft),
            "ACTIVE" => Ok(Self::Active),
            "CLOSED" => Ok(Self::Closed),
            other => Err(SurveyError::Validation(format!("unknown status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    Rating,
    Text,
}

/// One question of a survey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyQuestion {
    pub question_id: String,
    pub question_text: String,
    pub question_type: QuestionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_rating: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rating: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length_text: Option<u32>,
}

impl SurveyQuestion {
    pub fn rating(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            question_id: id.into(),
            question_text: text.into(),
            question_type: QuestionType::Rating,
            min_rating: Some(MIN_RATING),
            max_rating: Some(MAX_RATING),
            max_length_text: None,
        }
    }

    pub fn text(id: impl Into<String>, text: impl Into<String>, max_length: u32) -> Self {
        Self {
            question_id: id.into(),
            question_text: text.into(),
            question_type: QuestionType::Text,
            min_rating: None,
            max_rating: None,
            max_length_text: Some(max_length),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.question_text.trim().is_empty() {
            return Err(SurveyError::Validation("question text must not be blank".into()));
        }
        match self.question_type {
            QuestionType::Rating => match (self.min_rating, self.max_rating) {
                (Some(min), Some(max)) if MIN_RATING <= min && min <= max && max <= MAX_RATING => {
                    Ok(())
                }
                (Some(_), Some(_)) => Err(SurveyError::Validation(format!(
                    "rating range must lie within {}-{}",
                    MIN_RATING, MAX_RATING
                ))),
                _ => Err(SurveyError::Validation(
                    "RATING questions need min and max rating".into(),
                )),
            },
            QuestionType::Text => match self.max_length_text {
                Some(len) if len > 0 => Ok(()),
                _ => Err(SurveyError::Validation(
                    "TEXT questions need a positive max length".into(),
                )),
            },
        }
    }
}

fn validate_content(title: &str, questions: &[SurveyQuestion]) -> Result<()> {
    if title.trim().is_empty() {
        return Err(SurveyError::Validation("title must not be blank".into()));
    }
    if questions.is_empty() {
        return Err(SurveyError::Validation(
            "a survey needs at least one question".into(),
        ));
    }
    questions.iter().try_for_each(SurveyQuestion::validate)
}

/// Fields supplied when a survey is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSurvey {
    pub course_id: String,
    pub teacher_id: String,
    pub academic_year: String,
    pub semester: i32,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub questions: Vec<SurveyQuestion>,
}

/// Partial update of a DRAFT survey. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SurveyEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub questions: Option<Vec<SurveyQuestion>>,
    pub academic_year: Option<String>,
    pub semester: Option<i32>,
}

/// A teacher evaluation survey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Survey {
    pub id: String,
    pub course_id: String,
    pub teacher_id: String,
    pub academic_year: String,
    pub semester: i32,
    pub title: String,
    pub description: Option<String>,
    pub questions: Vec<SurveyQuestion>,
    pub status: SurveyStatus,
    pub creation_date: DateTime<Utc>,
    pub closing_date: Option<DateTime<Utc>>,
}

impl Survey {
    /// Build a validated DRAFT survey.
    pub fn create(id: impl Into<String>, new: NewSurvey, now: DateTime<Utc>) -> Result<Self> {
        for (field, value) in [
            ("course id", &new.course_id),
            ("teacher id", &new.teacher_id),
            ("academic year", &new.academic_year),
        ] {
            if value.trim().is_empty() {
                return Err(SurveyError::Validation(format!("{} must not be blank", field)));
            }
        }
        validate_content(&new.title, &new.questions)?;

        Ok(Self {
            id: id.into(),
            course_id: new.course_id,
            teacher_id: new.teacher_id,
            academic_year: new.academic_year,
            semester: new.semester,
            title: new.title,
            description: new.description,
            questions: new.questions,
            status: SurveyStatus::Draft,
            creation_date: now,
            closing_date: None,
        })
    }

    /// Apply a status change. Nothing is mutated when the pair is illegal.
    pub fn transition(&mut self, to: SurveyStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(SurveyError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        match to {
            SurveyStatus::Closed => self.closing_date = Some(now),
            SurveyStatus::Active => self.closing_date = None,
            SurveyStatus::Draft => {}
        }
        self.status = to;
        Ok(())
    }

    /// Apply an edit. Only DRAFT surveys change; the result is validated
    /// before anything is written back.
    pub fn edit(&mut self, edit: SurveyEdit) -> Result<()> {
        if self.status != SurveyStatus::Draft {
            return Err(SurveyError::NotEditable(self.status));
        }

        let mut next = self.clone();
        if let Some(title) = edit.title {
            next.title = title;
        }
        if let Some(description) = edit.description {
            next.description = Some(description);
        }
        if let Some(questions) = edit.questions {
            next.questions = questions;
        }
        if let Some(academic_year) = edit.academic_year {
            next.academic_year = academic_year;
        }
        if let Some(semester) = edit.semester {
            next.semester = semester;
        }
        validate_content(&next.title, &next.questions)?;

        *self = next;
        Ok(())
    }

    pub fn question(&self, question_id: &str) -> Option<&SurveyQuestion> {
        self.questions.iter().find(|q| q.question_id == question_id)
    }
}
