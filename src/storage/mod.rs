//! Persistence capability.
//!
//! Surveys, submitted responses, assessments derived from inbound events and
//! the user profile projection. Each store is a trait so the services and
//! handlers can run over SQLite or the in-memory mocks.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::auth::RoleType;
use crate::config::StorageConfig;
use crate::consumer::handlers::UserProfile;
use crate::publisher::events::{Assessment, ReferenceType};
use crate::survey::{Survey, SurveyResponse, SurveyStatus};

pub mod mock;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use mock::{MockAssessmentStore, MockProfileStore, MockResponseStore, MockSurveyStore};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteAssessmentStore, SqliteProfileStore, SqliteResponseStore, SqliteSurveyStore};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Record already exists: {0}")]
    Duplicate(String),

    #[error("Stored record is invalid: {0}")]
    InvalidData(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[cfg(feature = "sqlite")]
    #[error("SQL error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Narrows a survey listing. Empty filter lists everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurveyFilter {
    pub course_id: Option<String>,
    pub teacher_id: Option<String>,
    pub status: Option<SurveyStatus>,
}

impl SurveyFilter {
    pub fn matches(&self, survey: &Survey) -> bool {
        self.course_id.as_ref().map_or(true, |c| *c == survey.course_id)
            && self.teacher_id.as_ref().map_or(true, |t| *t == survey.teacher_id)
            && self.status.map_or(true, |s| s == survey.status)
    }
}

/// Survey persistence.
#[async_trait]
pub trait SurveyStore: Send + Sync {
    /// Store a new survey.
    ///
    /// Fails with [`StorageError::Duplicate`] when another survey holds the
    /// same (teacher, course, academic year, semester).
    async fn insert(&self, survey: &Survey) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Survey>>;

    /// Whether a survey already exists for the uniqueness key.
    async fn exists(
        &self,
        teacher_id: &str,
        course_id: &str,
        academic_year: &str,
        semester: i32,
    ) -> Result<bool>;

    /// Overwrite `survey` only if its stored status is still `expected`.
    ///
    /// Returns false when the row is missing or its status moved on.
    async fn update_if_status(&self, survey: &Survey, expected: SurveyStatus) -> Result<bool>;

    /// Move the survey from `expected` to `to`, touching only the status and
    /// closing date.
    ///
    /// Returns false when the row is missing or its status moved on.
    async fn set_status_if(
        &self,
        id: &str,
        expected: SurveyStatus,
        to: SurveyStatus,
        closing_date: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    /// Remove a survey with its responses. Returns false if it did not exist.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn list(&self, filter: &SurveyFilter) -> Result<Vec<Survey>>;

    async fn count_by_status(&self, status: SurveyStatus) -> Result<u64>;
}

/// Survey response persistence.
#[async_trait]
pub trait ResponseStore: Send + Sync {
    /// Whether `student_id` already has a submission for `survey_id`.
    async fn has_submitted(&self, survey_id: &str, student_id: &str) -> Result<bool>;

    /// Reserve the (survey, student) pair and write the whole batch.
    ///
    /// Atomic: returns false and writes nothing when the pair is already
    /// reserved, including by a concurrent caller.
    async fn insert_submission(
        &self,
        survey_id: &str,
        student_id: &str,
        responses: &[SurveyResponse],
    ) -> Result<bool>;

    async fn list_for_survey(&self, survey_id: &str) -> Result<Vec<SurveyResponse>>;

    async fn list_for_student(&self, student_id: &str) -> Result<Vec<SurveyResponse>>;
}

/// Assessments created from inbound events.
#[async_trait]
pub trait AssessmentStore: Send + Sync {
    /// Insert unless an assessment already exists for the same reference and
    /// student. Returns whether a row was written.
    async fn insert_if_absent(&self, assessment: &Assessment) -> Result<bool>;

    async fn find_by_reference(
        &self,
        reference_type: ReferenceType,
        reference_id: &str,
        student_id: &str,
    ) -> Result<Option<Assessment>>;

    /// Whether the assessment exists and its creation event has not been
    /// published yet.
    async fn pending_announcement(&self, id: &str) -> Result<bool>;

    /// Record that the creation event for `id` was published.
    async fn mark_announced(&self, id: &str) -> Result<()>;
}

/// Local projection of users announced by the user/role service.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Insert or replace the profile keyed by user id.
    async fn upsert(&self, profile: &UserProfile) -> Result<()>;

    async fn get(&self, user_id: &str) -> Result<Option<UserProfile>>;

    /// Mark the profile inactive. Returns false if it is unknown.
    async fn deactivate(&self, user_id: &str) -> Result<bool>;

    /// Record a role change. Returns false if the profile is unknown.
    async fn set_role(&self, user_id: &str, role: RoleType) -> Result<bool>;
}

/// The stores one process works with.
#[derive(Clone)]
pub struct Storage {
    pub surveys: Arc<dyn SurveyStore>,
    pub responses: Arc<dyn ResponseStore>,
    pub assessments: Arc<dyn AssessmentStore>,
    pub profiles: Arc<dyn ProfileStore>,
}

impl Storage {
    /// Fresh in-memory stores.
    pub fn memory() -> Self {
        let responses = Arc::new(MockResponseStore::new());
        Self {
            surveys: Arc::new(MockSurveyStore::with_responses(responses.clone())),
            responses,
            assessments: Arc::new(MockAssessmentStore::new()),
            profiles: Arc::new(MockProfileStore::new()),
        }
    }
}

/// Initialize storage based on configuration.
pub async fn init_storage(config: &StorageConfig) -> std::result::Result<Storage, Box<dyn std::error::Error>> {
    info!("Storage: {} at {}", config.storage_type, config.path);

    match config.storage_type.as_str() {
        "memory" => Ok(Storage::memory()),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                std::fs::create_dir_all(parent)?;
            }

            let pool =
                sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.path)).await?;
            sqlite::init_schema(&pool).await?;

            Ok(Storage {
                surveys: Arc::new(SqliteSurveyStore::new(pool.clone())),
                responses: Arc::new(SqliteResponseStore::new(pool.clone())),
                assessments: Arc::new(SqliteAssessmentStore::new(pool.clone())),
                profiles: Arc::new(SqliteProfileStore::new(pool)),
            })
        }
        #[cfg(not(feature = "sqlite"))]
        "sqlite" => {
            error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err("SQLite feature not enabled".into())
        }
        other => {
            error!("Unknown storage type: {}", other);
            Err(format!("Unknown storage type: {}", other).into())
        }
    }
}
