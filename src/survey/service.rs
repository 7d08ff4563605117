//! Survey management operations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{NewSurvey, Result, Survey, SurveyEdit, SurveyError, SurveyStatus};
use crate::auth::{Caller, RoleType};
use crate::publisher::Publisher;
use crate::storage::{StorageError, SurveyFilter, SurveyStore};

/// Survey counts by status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyStatistics {
    pub total: u64,
    pub draft: u64,
    pub active: u64,
    pub closed: u64,
    pub generated_at: DateTime<Utc>,
}

/// Creates, edits and moves surveys through their lifecycle.
pub struct SurveyService {
    surveys: Arc<dyn SurveyStore>,
    publisher: Arc<Publisher>,
}

impl SurveyService {
    pub fn new(surveys: Arc<dyn SurveyStore>, publisher: Arc<Publisher>) -> Self {
        Self { surveys, publisher }
    }

    fn already_exists(survey: &Survey) -> SurveyError {
        SurveyError::AlreadyExists {
            teacher_id: survey.teacher_id.clone(),
            course_id: survey.course_id.clone(),
            academic_year: survey.academic_year.clone(),
            semester: survey.semester,
        }
    }

    async fn load(&self, id: &str) -> Result<Survey> {
        self.surveys
            .get(id)
            .await?
            .ok_or_else(|| SurveyError::NotFound(id.to_string()))
    }

    /// Create a DRAFT survey.
    pub async fn create(&self, caller: &Caller, new: NewSurvey) -> Result<Survey> {
        caller.require(RoleType::Admin)?;

        let survey = Survey::create(Uuid::new_v4().to_string(), new, Utc::now())?;
        if self
            .surveys
            .exists(
                &survey.teacher_id,
                &survey.course_id,
                &survey.academic_year,
                survey.semester,
            )
            .await?
        {
            return Err(Self::already_exists(&survey));
        }

        match self.surveys.insert(&survey).await {
            Ok(()) => {}
            Err(StorageError::Duplicate(_)) => return Err(Self::already_exists(&survey)),
            Err(e) => return Err(e.into()),
        }

        info!(
            survey_id = %survey.id,
            course_id = %survey.course_id,
            teacher_id = %survey.teacher_id,
            "Survey created"
        );
        Ok(survey)
    }

    /// Edit a DRAFT survey.
    pub async fn update(&self, caller: &Caller, id: &str, edit: SurveyEdit) -> Result<Survey> {
        caller.require(RoleType::Admin)?;

        let mut survey = self.load(id).await?;
        survey.edit(edit)?;

        match self
            .surveys
            .update_if_status(&survey, SurveyStatus::Draft)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return Err(SurveyError::Conflict {
                    id: id.to_string(),
                    expected: SurveyStatus::Draft,
                })
            }
            Err(StorageError::Duplicate(_)) => return Err(Self::already_exists(&survey)),
            Err(e) => return Err(e.into()),
        }

        info!(survey_id = %id, "Survey updated");
        Ok(survey)
    }

    /// Move a survey to `to`.
    ///
    /// Only the status and closing date are written, and only if nobody
    /// changed the status since it was read. Closing publishes
    /// `SURVEY_COMPLETED` after the write; a publish failure is returned as
    /// [`SurveyError::EventNotPublished`] with the committed survey.
    pub async fn change_status(&self, caller: &Caller, id: &str, to: SurveyStatus) -> Result<Survey> {
        caller.require(RoleType::Admin)?;

        let mut survey = self.load(id).await?;
        let from = survey.status;
        survey.transition(to, Utc::now())?;

        if !self
            .surveys
            .set_status_if(id, from, to, survey.closing_date)
            .await?
        {
            warn!(survey_id = %id, from = %from, to = %to, "Concurrent status change");
            return Err(SurveyError::Conflict {
                id: id.to_string(),
                expected: from,
            });
        }
        info!(survey_id = %id, from = %from, to = %to, "Survey status changed");

        // Content edited while the status was read is kept in the reply.
        if let Some(current) = self.surveys.get(id).await? {
            survey = current;
        }

        if to == SurveyStatus::Closed {
            if let Err(source) = self.publisher.survey_completed(&survey).await {
                return Err(SurveyError::EventNotPublished {
                    survey: Box::new(survey),
                    source,
                });
            }
        }
        Ok(survey)
    }

    pub async fn delete(&self, caller: &Caller, id: &str) -> Result<()> {
        caller.require(RoleType::Admin)?;

        if !self.surveys.delete(id).await? {
            return Err(SurveyError::NotFound(id.to_string()));
        }
        info!(survey_id = %id, "Survey deleted");
        Ok(())
    }

    pub async fn get(&self, caller: &Caller, id: &str) -> Result<Survey> {
        caller.require(RoleType::Teacher)?;
        self.load(id).await
    }

    pub async fn list_all(&self, caller: &Caller) -> Result<Vec<Survey>> {
        caller.require(RoleType::Admin)?;
        Ok(self.surveys.list(&SurveyFilter::default()).await?)
    }

    pub async fn list_by_course(&self, caller: &Caller, course_id: &str) -> Result<Vec<Survey>> {
        caller.require(RoleType::Teacher)?;
        let filter = SurveyFilter {
            course_id: Some(course_id.to_string()),
            ..Default::default()
        };
        Ok(self.surveys.list(&filter).await?)
    }

    pub async fn list_by_teacher(&self, caller: &Caller, teacher_id: &str) -> Result<Vec<Survey>> {
        caller.require(RoleType::Teacher)?;
        let filter = SurveyFilter {
            teacher_id: Some(teacher_id.to_string()),
            ..Default::default()
        };
        Ok(self.surveys.list(&filter).await?)
    }

    /// Surveys currently open for responses.
    pub async fn list_active(&self, caller: &Caller) -> Result<Vec<Survey>> {
        caller.require(RoleType::Student)?;
        let filter = SurveyFilter {
            status: Some(SurveyStatus::Active),
            ..Default::default()
        };
        Ok(self.surveys.list(&filter).await?)
    }

    pub async fn statistics(&self, caller: &Caller) -> Result<SurveyStatistics> {
        caller.require(RoleType::Admin)?;

        let draft = self.surveys.count_by_status(SurveyStatus::Draft).await?;
        let active = self.surveys.count_by_status(SurveyStatus::Active).await?;
        let closed = self.surveys.count_by_status(SurveyStatus::Closed).await?;

        Ok(SurveyStatistics {
            total: draft + active + closed,
            draft,
            active,
            closed,
            generated_at: Utc::now(),
        })
    }
}
