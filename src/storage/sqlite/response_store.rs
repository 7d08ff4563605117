//! SQLite ResponseStore implementation.

use async_trait::async_trait;
use chrono::Utc;
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{begin_immediate, finish, format_ts, parse_ts};
use crate::storage::schema::{SurveyResponses, SurveySubmissions};
use crate::storage::{ResponseStore, Result};
use crate::survey::SurveyResponse;

/// SQLite implementation of ResponseStore.
///
/// A row in `survey_submissions` reserves the (survey, student) pair; the
/// responses are written in the same transaction.
pub struct SqliteResponseStore {
    pool: SqlitePool,
}

impl SqliteResponseStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn from_row(row: &SqliteRow) -> Result<SurveyResponse> {
        let submission_date: String = row.try_get("submission_date")?;
        Ok(SurveyResponse {
            id: row.try_get("id")?,
            survey_id: row.try_get("survey_id")?,
            student_id: row.try_get("student_id")?,
            question_id: row.try_get("question_id")?,
            numeric_rating: row.try_get("numeric_rating")?,
            text_comment: row.try_get("text_comment")?,
            submission_date: parse_ts(&submission_date)?,
        })
    }

    async fn reserve_and_insert(
        conn: &mut SqliteConnection,
        survey_id: &str,
        student_id: &str,
        responses: &[SurveyResponse],
    ) -> Result<bool> {
        let (sql, values) = Query::insert()
            .into_table(SurveySubmissions::Table)
            .columns([
                SurveySubmissions::SurveyId,
                SurveySubmissions::StudentId,
                SurveySubmissions::SubmittedAt,
            ])
            .values_panic([
                survey_id.into(),
                student_id.into(),
                format_ts(&Utc::now()).into(),
            ])
            .on_conflict(
                OnConflict::columns([SurveySubmissions::SurveyId, SurveySubmissions::StudentId])
                    .do_nothing()
                    .to_owned(),
            )
            .build_sqlx(SqliteQueryBuilder);

        let reserved = sqlx::query_with(&sql, values).execute(&mut *conn).await?;
        if reserved.rows_affected() == 0 {
            return Ok(false);
        }

        for response in responses {
            let (sql, values) = Query::insert()
                .into_table(SurveyResponses::Table)
                .columns([
                    SurveyResponses::Id,
                    SurveyResponses::SurveyId,
                    SurveyResponses::StudentId,
                    SurveyResponses::QuestionId,
                    SurveyResponses::NumericRating,
                    SurveyResponses::TextComment,
                    SurveyResponses::SubmissionDate,
                ])
                .values_panic([
                    response.id.as_str().into(),
                    response.survey_id.as_str().into(),
                    response.student_id.as_str().into(),
                    response.question_id.as_str().into(),
                    response.numeric_rating.into(),
                    response.text_comment.clone().into(),
                    format_ts(&response.submission_date).into(),
                ])
                .build_sqlx(SqliteQueryBuilder);

            sqlx::query_with(&sql, values).execute(&mut *conn).await?;
        }

        Ok(true)
    }

    async fn list_where(&self, column: SurveyResponses, value: &str) -> Result<Vec<SurveyResponse>> {
        let (sql, values) = Query::select()
            .expr(Expr::cust("*"))
            .from(SurveyResponses::Table)
            .and_where(Expr::col(column).eq(value))
            .order_by(SurveyResponses::SubmissionDate, Order::Asc)
            .order_by(SurveyResponses::QuestionId, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(Self::from_row).collect()
    }
}

#[async_trait]
impl ResponseStore for SqliteResponseStore {
    async fn has_submitted(&self, survey_id: &str, student_id: &str) -> Result<bool> {
        let (sql, values) = Query::select()
            .column(SurveySubmissions::SurveyId)
            .from(SurveySubmissions::Table)
            .and_where(Expr::col(SurveySubmissions::SurveyId).eq(survey_id))
            .and_where(Expr::col(SurveySubmissions::StudentId).eq(student_id))
            .limit(1)
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn insert_submission(
        &self,
        survey_id: &str,
        student_id: &str,
        responses: &[SurveyResponse],
    ) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        begin_immediate(&mut conn).await?;
        let result = Self::reserve_and_insert(&mut conn, survey_id, student_id, responses).await;
        finish(&mut conn, result).await
    }

    async fn list_for_survey(&self, survey_id: &str) -> Result<Vec<SurveyResponse>> {
        self.list_where(SurveyResponses::SurveyId, survey_id).await
    }

    async fn list_for_student(&self, student_id: &str) -> Result<Vec<SurveyResponse>> {
        self.list_where(SurveyResponses::StudentId, student_id)
            .await
    }
}
