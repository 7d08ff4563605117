//! SQLite stores for records derived from inbound events.

use async_trait::async_trait;
use chrono::Utc;
use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{format_ts, parse_ts};
use crate::auth::RoleType;
use crate::consumer::handlers::UserProfile;
use crate::publisher::events::{Assessment, ReferenceType};
use crate::storage::schema::{Assessments, Profiles};
use crate::storage::{AssessmentStore, ProfileStore, Result, StorageError};

/// SQLite implementation of AssessmentStore.
pub struct SqliteAssessmentStore {
    pool: SqlitePool,
}

impl SqliteAssessmentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn from_row(row: &SqliteRow) -> Result<Assessment> {
        let reference_type: String = row.try_get("reference_type")?;
        let assessment_date: String = row.try_get("assessment_date")?;
        Ok(Assessment {
            id: row.try_get("id")?,
            reference_id: row.try_get("reference_id")?,
            reference_type: match reference_type.as_str() {
                "ASSIGNMENT" => ReferenceType::Assignment,
                "EXAM" => ReferenceType::Exam,
                other => {
                    return Err(StorageError::InvalidData(format!(
                        "reference type '{}'",
                        other
                    )))
                }
            },
            student_id: row.try_get("student_id")?,
            teacher_id: row.try_get("teacher_id")?,
            course_id: row.try_get("course_id")?,
            score: row.try_get("score")?,
            assessment_date: parse_ts(&assessment_date)?,
            notes: row.try_get("notes")?,
        })
    }
}

#[async_trait]
impl AssessmentStore for SqliteAssessmentStore {
    async fn insert_if_absent(&self, assessment: &Assessment) -> Result<bool> {
        let (sql, values) = Query::insert()
            .into_table(Assessments::Table)
            .columns([
                Assessments::Id,
                Assessments::ReferenceId,
                Assessments::ReferenceType,
                Assessments::StudentId,
                Assessments::TeacherId,
                Assessments::CourseId,
                Assessments::Score,
                Assessments::AssessmentDate,
                Assessments::Notes,
            ])
            .values_panic([
                assessment.id.as_str().into(),
                assessment.reference_id.as_str().into(),
                assessment.reference_type.as_str().into(),
                assessment.student_id.as_str().into(),
                assessment.teacher_id.clone().into(),
                assessment.course_id.clone().into(),
                assessment.score.into(),
                format_ts(&assessment.assessment_date).into(),
                assessment.notes.clone().into(),
            ])
            .on_conflict(
                OnConflict::columns([
                    Assessments::ReferenceType,
                    Assessments::ReferenceId,
                    Assessments::StudentId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .build_sqlx(SqliteQueryBuilder);

        let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_by_reference(
        &self,
        reference_type: ReferenceType,
        reference_id: &str,
        student_id: &str,
    ) -> Result<Option<Assessment>> {
        let (sql, values) = Query::select()
            .expr(Expr::cust("*"))
            .from(Assessments::Table)
            .and_where(Expr::col(Assessments::ReferenceType).eq(reference_type.as_str()))
            .and_where(Expr::col(Assessments::ReferenceId).eq(reference_id))
            .and_where(Expr::col(Assessments::StudentId).eq(student_id))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn pending_announcement(&self, id: &str) -> Result<bool> {
        let (sql, values) = Query::select()
            .column(Assessments::Id)
            .from(Assessments::Table)
            .and_where(Expr::col(Assessments::Id).eq(id))
            .and_where(Expr::col(Assessments::Announced).eq(false))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn mark_announced(&self, id: &str) -> Result<()> {
        let (sql, values) = Query::update()
            .table(Assessments::Table)
            .value(Assessments::Announced, true)
            .and_where(Expr::col(Assessments::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&sql, values).execute(&self.pool).await?;
        Ok(())
    }
}

/// SQLite implementation of ProfileStore.
pub struct SqliteProfileStore {
    pool: SqlitePool,
}

impl SqliteProfileStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn from_row(row: &SqliteRow) -> Result<UserProfile> {
        let role: Option<String> = row.try_get("role")?;
        let updated_at: String = row.try_get("updated_at")?;
        Ok(UserProfile {
            user_id: row.try_get("user_id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            role: role.as_deref().and_then(RoleType::parse),
            active: row.try_get("active")?,
            updated_at: parse_ts(&updated_at)?,
        })
    }

    async fn set(&self, user_id: &str, column: Profiles, value: sea_query::SimpleExpr) -> Result<bool> {
        let (sql, values) = Query::update()
            .table(Profiles::Table)
            .values([
                (column, value),
                (Profiles::UpdatedAt, format_ts(&Utc::now()).into()),
            ])
            .and_where(Expr::col(Profiles::UserId).eq(user_id))
            .build_sqlx(SqliteQueryBuilder);

        let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ProfileStore for SqliteProfileStore {
    async fn upsert(&self, profile: &UserProfile) -> Result<()> {
        let (sql, values) = Query::insert()
            .into_table(Profiles::Table)
            .columns([
                Profiles::UserId,
                Profiles::Username,
                Profiles::Email,
                Profiles::FirstName,
                Profiles::LastName,
                Profiles::Role,
                Profiles::Active,
                Profiles::UpdatedAt,
            ])
            .values_panic([
                profile.user_id.as_str().into(),
                profile.username.as_str().into(),
                profile.email.clone().into(),
                profile.first_name.clone().into(),
                profile.last_name.clone().into(),
                profile.role.map(|r| r.as_str().to_string()).into(),
                profile.active.into(),
                format_ts(&profile.updated_at).into(),
            ])
            .on_conflict(
                OnConflict::column(Profiles::UserId)
                    .update_columns([
                        Profiles::Username,
                        Profiles::Email,
                        Profiles::FirstName,
                        Profiles::LastName,
                        Profiles::Role,
                        Profiles::Active,
                        Profiles::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&sql, values).execute(&self.pool).await?;
        Ok(())
    }

    async fn get(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let (sql, values) = Query::select()
            .expr(Expr::cust("*"))
            .from(Profiles::Table)
            .and_where(Expr::col(Profiles::UserId).eq(user_id))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn deactivate(&self, user_id: &str) -> Result<bool> {
        self.set(user_id, Profiles::Active, false.into()).await
    }

    async fn set_role(&self, user_id: &str, role: RoleType) -> Result<bool> {
        self.set(user_id, Profiles::Role, role.as_str().into())
            .await
    }
}
