//! SQLite SurveyStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, Order, Query, SimpleExpr, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{begin_immediate, finish, format_ts, is_unique_violation, parse_ts};
use crate::storage::schema::{SurveyResponses, SurveySubmissions, Surveys};
use crate::storage::{Result, StorageError, SurveyFilter, SurveyStore};
use crate::survey::{Survey, SurveyStatus};

/// SQLite implementation of SurveyStore.
pub struct SqliteSurveyStore {
    pool: SqlitePool,
}

impl SqliteSurveyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Column values shared by insert and update.
    fn content(survey: &Survey) -> Result<[(Surveys, SimpleExpr); 10]> {
        Ok([
            (Surveys::CourseId, survey.course_id.as_str().into()),
            (Surveys::TeacherId, survey.teacher_id.as_str().into()),
            (Surveys::AcademicYear, survey.academic_year.as_str().into()),
            (Surveys::Semester, survey.semester.into()),
            (Surveys::Title, survey.title.as_str().into()),
            (Surveys::Description, survey.description.clone().into()),
            (
                Surveys::Questions,
                serde_json::to_string(&survey.questions)?.into(),
            ),
            (Surveys::Status, survey.status.as_str().into()),
            (
                Surveys::CreationDate,
                format_ts(&survey.creation_date).into(),
            ),
            (
                Surveys::ClosingDate,
                survey.closing_date.as_ref().map(format_ts).into(),
            ),
        ])
    }

    fn from_row(row: &SqliteRow) -> Result<Survey> {
        let questions: String = row.try_get("questions")?;
        let status: String = row.try_get("status")?;
        let creation_date: String = row.try_get("creation_date")?;
        let closing_date: Option<String> = row.try_get("closing_date")?;

        Ok(Survey {
            id: row.try_get("id")?,
            course_id: row.try_get("course_id")?,
            teacher_id: row.try_get("teacher_id")?,
            academic_year: row.try_get("academic_year")?,
            semester: row.try_get("semester")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            questions: serde_json::from_str(&questions)?,
            status: status
                .parse()
                .map_err(|_| StorageError::InvalidData(format!("survey status '{}'", status)))?,
            creation_date: parse_ts(&creation_date)?,
            closing_date: closing_date.as_deref().map(parse_ts).transpose()?,
        })
    }

    fn duplicate(survey: &Survey) -> StorageError {
        StorageError::Duplicate(format!(
            "survey for teacher={} course={} year={} semester={}",
            survey.teacher_id, survey.course_id, survey.academic_year, survey.semester
        ))
    }

    async fn delete_cascade(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
        let (sql, values) = Query::delete()
            .from_table(SurveyResponses::Table)
            .and_where(Expr::col(SurveyResponses::SurveyId).eq(id))
            .build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&mut *conn).await?;

        let (sql, values) = Query::delete()
            .from_table(SurveySubmissions::Table)
            .and_where(Expr::col(SurveySubmissions::SurveyId).eq(id))
            .build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&mut *conn).await?;

        let (sql, values) = Query::delete()
            .from_table(Surveys::Table)
            .and_where(Expr::col(Surveys::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);
        let result = sqlx::query_with(&sql, values).execute(&mut *conn).await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SurveyStore for SqliteSurveyStore {
    async fn insert(&self, survey: &Survey) -> Result<()> {
        let (columns, mut values): (Vec<Surveys>, Vec<SimpleExpr>) =
            Self::content(survey)?.into_iter().unzip();

        let mut all_columns = vec![Surveys::Id];
        all_columns.extend(columns);
        values.insert(0, survey.id.as_str().into());

        let (sql, binds) = Query::insert()
            .into_table(Surveys::Table)
            .columns(all_columns)
            .values_panic(values)
            .build_sqlx(SqliteQueryBuilder);

        match sqlx::query_with(&sql, binds).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(Self::duplicate(survey)),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Survey>> {
        let (sql, values) = Query::select()
            .expr(Expr::cust("*"))
            .from(Surveys::Table)
            .and_where(Expr::col(Surveys::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn exists(
        &self,
        teacher_id: &str,
        course_id: &str,
        academic_year: &str,
        semester: i32,
    ) -> Result<bool> {
        let (sql, values) = Query::select()
            .column(Surveys::Id)
            .from(Surveys::Table)
            .and_where(Expr::col(Surveys::TeacherId).eq(teacher_id))
            .and_where(Expr::col(Surveys::CourseId).eq(course_id))
            .and_where(Expr::col(Surveys::AcademicYear).eq(academic_year))
            .and_where(Expr::col(Surveys::Semester).eq(semester))
            .limit(1)
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn update_if_status(&self, survey: &Survey, expected: SurveyStatus) -> Result<bool> {
        let (sql, values) = Query::update()
            .table(Surveys::Table)
            .values(Self::content(survey)?)
            .and_where(Expr::col(Surveys::Id).eq(survey.id.as_str()))
            .and_where(Expr::col(Surveys::Status).eq(expected.as_str()))
            .build_sqlx(SqliteQueryBuilder);

        match sqlx::query_with(&sql, values).execute(&self.pool).await {
            Ok(result) => Ok(result.rows_affected() == 1),
            Err(e) if is_unique_violation(&e) => Err(Self::duplicate(survey)),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_status_if(
        &self,
        id: &str,
        expected: SurveyStatus,
        to: SurveyStatus,
        closing_date: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let changes: [(Surveys, SimpleExpr); 2] = [
            (Surveys::Status, to.as_str().into()),
            (Surveys::ClosingDate, closing_date.as_ref().map(format_ts).into()),
        ];
        let (sql, values) = Query::update()
            .table(Surveys::Table)
            .values(changes)
            .and_where(Expr::col(Surveys::Id).eq(id))
            .and_where(Expr::col(Surveys::Status).eq(expected.as_str()))
            .build_sqlx(SqliteQueryBuilder);

        let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        begin_immediate(&mut conn).await?;
        let result = Self::delete_cascade(&mut conn, id).await;
        finish(&mut conn, result).await
    }

    async fn list(&self, filter: &SurveyFilter) -> Result<Vec<Survey>> {
        let mut query = Query::select();
        query.expr(Expr::cust("*")).from(Surveys::Table);
        if let Some(course_id) = &filter.course_id {
            query.and_where(Expr::col(Surveys::CourseId).eq(course_id.as_str()));
        }
        if let Some(teacher_id) = &filter.teacher_id {
            query.and_where(Expr::col(Surveys::TeacherId).eq(teacher_id.as_str()));
        }
        if let Some(status) = filter.status {
            query.and_where(Expr::col(Surveys::Status).eq(status.as_str()));
        }
        let (sql, values) = query
            .order_by(Surveys::CreationDate, Order::Asc)
            .order_by(Surveys::Id, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn count_by_status(&self, status: SurveyStatus) -> Result<u64> {
        let (sql, values) = Query::select()
            .expr(Expr::col(Surveys::Id).count())
            .from(Surveys::Table)
            .and_where(Expr::col(Surveys::Status).eq(status.as_str()))
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values).fetch_one(&self.pool).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }
}
