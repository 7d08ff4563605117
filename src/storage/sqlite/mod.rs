//! SQLite implementations of storage interfaces.

mod projection_store;
mod response_store;
mod survey_store;

pub use projection_store::{SqliteAssessmentStore, SqliteProfileStore};
pub use response_store::SqliteResponseStore;
pub use survey_store::SqliteSurveyStore;

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use super::schema::{
    CREATE_ASSESSMENTS_TABLE, CREATE_PROFILES_TABLE, CREATE_SURVEYS_TABLE,
    CREATE_SURVEY_RESPONSES_TABLE, CREATE_SURVEY_SUBMISSIONS_TABLE,
};
use super::{Result, StorageError};

/// Create every table the stores use.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for ddl in [
        CREATE_SURVEYS_TABLE,
        CREATE_SURVEY_SUBMISSIONS_TABLE,
        CREATE_SURVEY_RESPONSES_TABLE,
        CREATE_ASSESSMENTS_TABLE,
        CREATE_PROFILES_TABLE,
    ] {
        sqlx::raw_sql(ddl).execute(pool).await?;
    }
    Ok(())
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidData(format!("timestamp '{}': {}", raw, e)))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Open a write transaction on `conn`.
///
/// IMMEDIATE takes the write lock up front so concurrent writers queue
/// instead of failing to upgrade a shared lock.
async fn begin_immediate(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
    Ok(())
}

/// Commit when `result` is Ok, roll back otherwise.
async fn finish<T>(conn: &mut SqliteConnection, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok(value)
        }
        Err(e) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            Err(e)
        }
    }
}
