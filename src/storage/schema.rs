//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Surveys table schema.
#[derive(Iden)]
pub enum Surveys {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "course_id"]
    CourseId,
    #[iden = "teacher_id"]
    TeacherId,
    #[iden = "academic_year"]
    AcademicYear,
    #[iden = "semester"]
    Semester,
    #[iden = "title"]
    Title,
    #[iden = "description"]
    Description,
    #[iden = "questions"]
    Questions,
    #[iden = "status"]
    Status,
    #[iden = "creation_date"]
    CreationDate,
    #[iden = "closing_date"]
    ClosingDate,
}

/// One row per (survey, student) that has submitted.
#[derive(Iden)]
pub enum SurveySubmissions {
    Table,
    #[iden = "survey_id"]
    SurveyId,
    #[iden = "student_id"]
    StudentId,
    #[iden = "submitted_at"]
    SubmittedAt,
}

/// Survey responses table schema.
#[derive(Iden)]
pub enum SurveyResponses {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "survey_id"]
    SurveyId,
    #[iden = "student_id"]
    StudentId,
    #[iden = "question_id"]
    QuestionId,
    #[iden = "numeric_rating"]
    NumericRating,
    #[iden = "text_comment"]
    TextComment,
    #[iden = "submission_date"]
    SubmissionDate,
}

/// Assessments table schema.
#[derive(Iden)]
pub enum Assessments {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "reference_id"]
    ReferenceId,
    #[iden = "reference_type"]
    ReferenceType,
    #[iden = "student_id"]
    StudentId,
    #[iden = "teacher_id"]
    TeacherId,
    #[iden = "course_id"]
    CourseId,
    #[iden = "score"]
    Score,
    #[iden = "assessment_date"]
    AssessmentDate,
    #[iden = "notes"]
    Notes,
    #[iden = "announced"]
    Announced,
}

/// User profile projection schema.
#[derive(Iden)]
pub enum Profiles {
    Table,
    #[iden = "user_id"]
    UserId,
    #[iden = "username"]
    Username,
    #[iden = "email"]
    Email,
    #[iden = "first_name"]
    FirstName,
    #[iden = "last_name"]
    LastName,
    #[iden = "role"]
    Role,
    #[iden = "active"]
    Active,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// SQL for creating the surveys table.
pub const CREATE_SURVEYS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS surveys (
    id TEXT PRIMARY KEY,
    course_id TEXT NOT NULL,
    teacher_id TEXT NOT NULL,
    academic_year TEXT NOT NULL,
    semester INTEGER NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    questions TEXT NOT NULL,
    status TEXT NOT NULL,
    creation_date TEXT NOT NULL,
    closing_date TEXT,
    UNIQUE (teacher_id, course_id, academic_year, semester)
);

CREATE INDEX IF NOT EXISTS idx_surveys_course ON surveys(course_id);
CREATE INDEX IF NOT EXISTS idx_surveys_status ON surveys(status);
"#;

/// SQL for creating the submission reservation table.
pub const CREATE_SURVEY_SUBMISSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS survey_submissions (
    survey_id TEXT NOT NULL,
    student_id TEXT NOT NULL,
    submitted_at TEXT NOT NULL,
    PRIMARY KEY (survey_id, student_id)
);
"#;

/// SQL for creating the survey responses table.
pub const CREATE_SURVEY_RESPONSES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS survey_responses (
    id TEXT PRIMARY KEY,
    survey_id TEXT NOT NULL,
    student_id TEXT NOT NULL,
    question_id TEXT NOT NULL,
    numeric_rating INTEGER,
    text_comment TEXT,
    submission_date TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_responses_survey ON survey_responses(survey_id);
CREATE INDEX IF NOT EXISTS idx_responses_student ON survey_responses(student_id);
"#;

/// SQL for creating the assessments table.
pub const CREATE_ASSESSMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS assessments (
    id TEXT PRIMARY KEY,
    reference_id TEXT NOT NULL,
    reference_type TEXT NOT NULL,
    student_id TEXT NOT NULL,
    teacher_id TEXT,
    course_id TEXT,
    score REAL,
    assessment_date TEXT NOT NULL,
    notes TEXT,
    announced INTEGER NOT NULL DEFAULT 0,
    UNIQUE (reference_type, reference_id, student_id)
);
"#;

/// SQL for creating the profiles table.
pub const CREATE_PROFILES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    user_id TEXT PRIMARY KEY,
    username TEXT NOT NULL,
    email TEXT,
    first_name TEXT,
    last_name TEXT,
    role TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL
);
"#;
