//! In-memory storage implementations.
//!
//! Back the `memory` storage type and the tests. Each store can be told to
//! fail so callers' error paths can be exercised.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    AssessmentStore, ProfileStore, ResponseStore, Result, StorageError, SurveyFilter, SurveyStore,
};
use crate::auth::RoleType;
use crate::consumer::handlers::UserProfile;
use crate::publisher::events::{Assessment, ReferenceType};
use crate::survey::{Survey, SurveyResponse, SurveyStatus};

fn injected_failure() -> StorageError {
    StorageError::Database("Mock storage failure".to_string())
}

/// Mock survey store.
#[derive(Default)]
pub struct MockSurveyStore {
    surveys: RwLock<HashMap<String, Survey>>,
    responses: Option<Arc<MockResponseStore>>,
    fail_on_write: RwLock<bool>,
}

impl MockSurveyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Survey store whose deletes also drop responses held by `responses`.
    pub fn with_responses(responses: Arc<MockResponseStore>) -> Self {
        Self {
            responses: Some(responses),
            ..Self::default()
        }
    }

    pub async fn set_fail_on_write(&self, fail: bool) {
        *self.fail_on_write.write().await = fail;
    }

    async fn check_write(&self) -> Result<()> {
        if *self.fail_on_write.read().await {
            return Err(injected_failure());
        }
        Ok(())
    }

    fn same_key(a: &Survey, b: &Survey) -> bool {
        a.teacher_id == b.teacher_id
            && a.course_id == b.course_id
            && a.academic_year == b.academic_year
            && a.semester == b.semester
    }
}

#[async_trait]
impl SurveyStore for MockSurveyStore {
    async fn insert(&self, survey: &Survey) -> Result<()> {
        self.check_write().await?;
        let mut surveys = self.surveys.write().await;
        if surveys.contains_key(&survey.id) || surveys.values().any(|s| Self::same_key(s, survey)) {
            return Err(StorageError::Duplicate(format!(
                "survey for teacher={} course={} year={} semester={}",
                survey.teacher_id, survey.course_id, survey.academic_year, survey.semester
            )));
        }
        surveys.insert(survey.id.clone(), survey.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Survey>> {
        Ok(self.surveys.read().await.get(id).cloned())
    }

    async fn exists(
        &self,
        teacher_id: &str,
        course_id: &str,
        academic_year: &str,
        semester: i32,
    ) -> Result<bool> {
        Ok(self.surveys.read().await.values().any(|s| {
            s.teacher_id == teacher_id
                && s.course_id == course_id
                && s.academic_year == academic_year
                && s.semester == semester
        }))
    }

    async fn update_if_status(&self, survey: &Survey, expected: SurveyStatus) -> Result<bool> {
        self.check_write().await?;
        let mut surveys = self.surveys.write().await;
        if surveys
            .values()
            .any(|s| s.id != survey.id && Self::same_key(s, survey))
        {
            return Err(StorageError::Duplicate(format!(
                "survey for teacher={} course={} year={} semester={}",
                survey.teacher_id, survey.course_id, survey.academic_year, survey.semester
            )));
        }
        match surveys.get_mut(&survey.id) {
            Some(stored) if stored.status == expected => {
                *stored = survey.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_status_if(
        &self,
        id: &str,
        expected: SurveyStatus,
        to: SurveyStatus,
        closing_date: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        self.check_write().await?;
        match self.surveys.write().await.get_mut(id) {
            Some(stored) if stored.status == expected => {
                stored.status = to;
                stored.closing_date = closing_date;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.check_write().await?;
        let removed = self.surveys.write().await.remove(id).is_some();
        if let Some(responses) = &self.responses {
            responses.remove_survey(id).await;
        }
        Ok(removed)
    }

    async fn list(&self, filter: &SurveyFilter) -> Result<Vec<Survey>> {
        let mut surveys: Vec<Survey> = self
            .surveys
            .read()
            .await
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        surveys.sort_by(|a, b| {
            a.creation_date
                .cmp(&b.creation_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(surveys)
    }

    async fn count_by_status(&self, status: SurveyStatus) -> Result<u64> {
        Ok(self
            .surveys
            .read()
            .await
            .values()
            .filter(|s| s.status == status)
            .count() as u64)
    }
}

/// Mock response store.
#[derive(Default)]
pub struct MockResponseStore {
    submissions: RwLock<HashSet<(String, String)>>,
    responses: RwLock<Vec<SurveyResponse>>,
    fail_on_insert: RwLock<bool>,
}

impl MockResponseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_insert(&self, fail: bool) {
        *self.fail_on_insert.write().await = fail;
    }

    /// Number of stored response rows.
    pub async fn len(&self) -> usize {
        self.responses.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn remove_survey(&self, survey_id: &str) {
        let mut submissions = self.submissions.write().await;
        submissions.retain(|(survey, _)| survey != survey_id);
        self.responses
            .write()
            .await
            .retain(|r| r.survey_id != survey_id);
    }
}

#[async_trait]
impl ResponseStore for MockResponseStore {
    async fn has_submitted(&self, survey_id: &str, student_id: &str) -> Result<bool> {
        Ok(self
            .submissions
            .read()
            .await
            .contains(&(survey_id.to_string(), student_id.to_string())))
    }

    async fn insert_submission(
        &self,
        survey_id: &str,
        student_id: &str,
        responses: &[SurveyResponse],
    ) -> Result<bool> {
        if *self.fail_on_insert.read().await {
            return Err(injected_failure());
        }
        // The submissions lock is held until the rows are in.
        let mut submissions = self.submissions.write().await;
        if !submissions.insert((survey_id.to_string(), student_id.to_string())) {
            return Ok(false);
        }
        self.responses
            .write()
            .await
            .extend(responses.iter().cloned());
        Ok(true)
    }

    async fn list_for_survey(&self, survey_id: &str) -> Result<Vec<SurveyResponse>> {
        Ok(self
            .responses
            .read()
            .await
            .iter()
            .filter(|r| r.survey_id == survey_id)
            .cloned()
            .collect())
    }

    async fn list_for_student(&self, student_id: &str) -> Result<Vec<SurveyResponse>> {
        Ok(self
            .responses
            .read()
            .await
            .iter()
            .filter(|r| r.student_id == student_id)
            .cloned()
            .collect())
    }
}

type ReferenceKey = (&'static str, String, String);

/// Mock assessment store keyed by (reference type, reference id, student).
#[derive(Default)]
pub struct MockAssessmentStore {
    assessments: RwLock<HashMap<ReferenceKey, Assessment>>,
    announced: RwLock<HashSet<String>>,
    fail_on_write: RwLock<bool>,
}

impl MockAssessmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_write(&self, fail: bool) {
        *self.fail_on_write.write().await = fail;
    }

    pub async fn count(&self) -> usize {
        self.assessments.read().await.len()
    }
}

#[async_trait]
impl AssessmentStore for MockAssessmentStore {
    async fn insert_if_absent(&self, assessment: &Assessment) -> Result<bool> {
        if *self.fail_on_write.read().await {
            return Err(injected_failure());
        }
        let key = (
            assessment.reference_type.as_str(),
            assessment.reference_id.clone(),
            assessment.student_id.clone(),
        );
        let mut assessments = self.assessments.write().await;
        if assessments.contains_key(&key) {
            return Ok(false);
        }
        assessments.insert(key, assessment.clone());
        Ok(true)
    }

    async fn find_by_reference(
        &self,
        reference_type: ReferenceType,
        reference_id: &str,
        student_id: &str,
    ) -> Result<Option<Assessment>> {
        let key = (
            reference_type.as_str(),
            reference_id.to_string(),
            student_id.to_string(),
        );
        Ok(self.assessments.read().await.get(&key).cloned())
    }

    async fn pending_announcement(&self, id: &str) -> Result<bool> {
        let exists = self.assessments.read().await.values().any(|a| a.id == id);
        Ok(exists && !self.announced.read().await.contains(id))
    }

    async fn mark_announced(&self, id: &str) -> Result<()> {
        if *self.fail_on_write.read().await {
            return Err(injected_failure());
        }
        self.announced.write().await.insert(id.to_string());
        Ok(())
    }
}

/// Mock profile store.
#[derive(Default)]
pub struct MockProfileStore {
    profiles: RwLock<HashMap<String, UserProfile>>,
    fail_on_write: RwLock<bool>,
}

impl MockProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_write(&self, fail: bool) {
        *self.fail_on_write.write().await = fail;
    }

    async fn check_write(&self) -> Result<()> {
        if *self.fail_on_write.read().await {
            return Err(injected_failure());
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MockProfileStore {
    async fn upsert(&self, profile: &UserProfile) -> Result<()> {
        self.check_write().await?;
        self.profiles
            .write()
            .await
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn get(&self, user_id: &str) -> Result<Option<UserProfile>> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }

    async fn deactivate(&self, user_id: &str) -> Result<bool> {
        self.check_write().await?;
        match self.profiles.write().await.get_mut(user_id) {
            Some(profile) => {
                profile.active = false;
                profile.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_role(&self, user_id: &str, role: RoleType) -> Result<bool> {
        self.check_write().await?;
        match self.profiles.write().await.get_mut(user_id) {
            Some(profile) => {
                profile.role = Some(role);
                profile.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
