//! SQLite storage integration tests.
//!
//! Run with: cargo test --test storage_sqlite --features sqlite
//!
//! Each test opens a fresh database file in a temporary directory, no
//! external dependencies required.

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use assessment_events::auth::RoleType;
use assessment_events::config::StorageConfig;
use assessment_events::consumer::handlers::UserProfile;
use assessment_events::publisher::events::{Assessment, ReferenceType};
use assessment_events::storage::{
    init_storage, AssessmentStore, ProfileStore, ResponseStore, Storage, StorageError,
    SurveyFilter, SurveyStore,
};
use assessment_events::survey::{NewSurvey, Survey, SurveyQuestion, SurveyResponse, SurveyStatus};

async fn open() -> (Storage, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = StorageConfig {
        storage_type: "sqlite".to_string(),
        path: dir
            .path()
            .join("data")
            .join("assessment-events.db")
            .to_string_lossy()
            .into_owned(),
    };
    let storage = init_storage(&config)
        .await
        .expect("Failed to initialize sqlite storage");
    (storage, dir)
}

fn new_survey(course_id: &str, semester: i32) -> NewSurvey {
    NewSurvey {
        course_id: course_id.to_string(),
        teacher_id: "T-1".to_string(),
        academic_year: "2024-2025".to_string(),
        semester,
        title: format!("{course_id} evaluation"),
        description: None,
        questions: vec![
            SurveyQuestion::rating("q1", "Clarity"),
            SurveyQuestion::text("q2", "Comments", 300),
        ],
    }
}

fn response(survey_id: &str, student_id: &str, question_id: &str, rating: i32) -> SurveyResponse {
    SurveyResponse {
        id: uuid::Uuid::new_v4().to_string(),
        survey_id: survey_id.to_string(),
        student_id: student_id.to_string(),
        question_id: question_id.to_string(),
        numeric_rating: Some(rating),
        text_comment: None,
        submission_date: Utc::now(),
    }
}

#[tokio::test]
async fn test_sqlite_survey_round_trip_and_uniqueness() {
    let (storage, _dir) = open().await;
    let survey = Survey::create("s-1", new_survey("C-1", 1), Utc::now()).unwrap();
    storage.surveys.insert(&survey).await.unwrap();

    let loaded = storage.surveys.get("s-1").await.unwrap().unwrap();
    assert_eq!(loaded.questions, survey.questions);
    assert_eq!(loaded.status, SurveyStatus::Draft);
    assert!(storage
        .surveys
        .exists("T-1", "C-1", "2024-2025", 1)
        .await
        .unwrap());

    let clash = Survey::create("s-2", new_survey("C-1", 1), Utc::now()).unwrap();
    let err = storage.surveys.insert(&clash).await.unwrap_err();
    assert!(matches!(err, StorageError::Duplicate(_)));

    let other_term = Survey::create("s-3", new_survey("C-1", 2), Utc::now()).unwrap();
    storage.surveys.insert(&other_term).await.unwrap();
    assert_eq!(
        storage
            .surveys
            .count_by_status(SurveyStatus::Draft)
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn test_sqlite_status_compare_and_set() {
    let (storage, _dir) = open().await;
    let mut survey = Survey::create("s-1", new_survey("C-1", 1), Utc::now()).unwrap();
    storage.surveys.insert(&survey).await.unwrap();

    survey.transition(SurveyStatus::Active, Utc::now()).unwrap();
    assert!(storage
        .surveys
        .update_if_status(&survey, SurveyStatus::Draft)
        .await
        .unwrap());
    assert!(!storage
        .surveys
        .update_if_status(&survey, SurveyStatus::Draft)
        .await
        .unwrap());

    let active = storage
        .surveys
        .list(&SurveyFilter {
            status: Some(SurveyStatus::Active),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, "s-1");
}

#[tokio::test]
async fn test_sqlite_status_change_keeps_concurrent_edit() {
    let (storage, _dir) = open().await;
    let survey = Survey::create("s-1", new_survey("C-1", 1), Utc::now()).unwrap();
    storage.surveys.insert(&survey).await.unwrap();

    // Read, then an edit commits before the status change is written.
    let mut stale = storage.surveys.get("s-1").await.unwrap().unwrap();
    let mut edited = stale.clone();
    edited.title = "Edited".to_string();
    assert!(storage
        .surveys
        .update_if_status(&edited, SurveyStatus::Draft)
        .await
        .unwrap());

    stale.transition(SurveyStatus::Closed, Utc::now()).unwrap();
    assert!(storage
        .surveys
        .set_status_if("s-1", SurveyStatus::Draft, stale.status, stale.closing_date)
        .await
        .unwrap());
    assert!(!storage
        .surveys
        .set_status_if("s-1", SurveyStatus::Draft, SurveyStatus::Active, None)
        .await
        .unwrap());

    let stored = storage.surveys.get("s-1").await.unwrap().unwrap();
    assert_eq!(stored.title, "Edited");
    assert_eq!(stored.status, SurveyStatus::Closed);
    assert_eq!(
        stored.closing_date.map(|d| d.timestamp_millis()),
        stale.closing_date.map(|d| d.timestamp_millis())
    );
}

#[tokio::test]
async fn test_sqlite_submission_is_all_or_nothing() {
    let (storage, _dir) = open().await;
    let batch = [response("s-1", "st-1", "q1", 4), response("s-1", "st-1", "q2", 5)];

    assert!(storage
        .responses
        .insert_submission("s-1", "st-1", &batch)
        .await
        .unwrap());
    assert!(!storage
        .responses
        .insert_submission("s-1", "st-1", &[response("s-1", "st-1", "q1", 1)])
        .await
        .unwrap());

    // Reusing a response id aborts the whole batch, reservation included.
    let broken = [response("s-1", "st-2", "q1", 3), batch[0].clone()];
    assert!(storage
        .responses
        .insert_submission("s-1", "st-2", &broken)
        .await
        .is_err());
    assert!(!storage.responses.has_submitted("s-1", "st-2").await.unwrap());

    let stored = storage.responses.list_for_survey("s-1").await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|r| r.student_id == "st-1"));
}

#[tokio::test]
async fn test_sqlite_concurrent_submissions_one_wins() {
    let (storage, _dir) = open().await;
    let responses = storage.responses.clone();

    let tasks: Vec<_> = (1..=6)
        .map(|rating| {
            let responses = Arc::clone(&responses);
            tokio::spawn(async move {
                responses
                    .insert_submission("s-1", "st-1", &[response("s-1", "st-1", "q1", rating)])
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut wins = 0;
    for task in tasks {
        if task.await.unwrap() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(responses.list_for_student("st-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_sqlite_delete_cascades_responses() {
    let (storage, _dir) = open().await;
    let survey = Survey::create("s-1", new_survey("C-1", 1), Utc::now()).unwrap();
    storage.surveys.insert(&survey).await.unwrap();
    storage
        .responses
        .insert_submission("s-1", "st-1", &[response("s-1", "st-1", "q1", 4)])
        .await
        .unwrap();

    assert!(storage.surveys.delete("s-1").await.unwrap());
    assert!(!storage.surveys.delete("s-1").await.unwrap());
    assert!(storage.responses.list_for_survey("s-1").await.unwrap().is_empty());
    assert!(!storage.responses.has_submitted("s-1", "st-1").await.unwrap());
}

#[tokio::test]
async fn test_sqlite_assessment_keyed_by_reference() {
    let (storage, _dir) = open().await;
    let assessment = Assessment {
        id: "a-1".to_string(),
        reference_id: "asg-1".to_string(),
        reference_type: ReferenceType::Assignment,
        student_id: "st-1".to_string(),
        teacher_id: None,
        course_id: Some("C-1".to_string()),
        score: None,
        assessment_date: Utc::now(),
        notes: Some("Assignment submitted - awaiting evaluation".to_string()),
    };

    assert!(storage.assessments.insert_if_absent(&assessment).await.unwrap());
    let mut again = assessment.clone();
    again.id = "a-2".to_string();
    assert!(!storage.assessments.insert_if_absent(&again).await.unwrap());

    let found = storage
        .assessments
        .find_by_reference(ReferenceType::Assignment, "asg-1", "st-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, "a-1");
    assert_eq!(found.score, None);

    assert!(storage.assessments.pending_announcement("a-1").await.unwrap());
    storage.assessments.mark_announced("a-1").await.unwrap();
    assert!(!storage.assessments.pending_announcement("a-1").await.unwrap());
}

#[tokio::test]
async fn test_sqlite_profile_upsert_and_updates() {
    let (storage, _dir) = open().await;
    let mut profile = UserProfile {
        user_id: "u-1".to_string(),
        username: "mrossi".to_string(),
        email: Some("m.rossi@studenti.unimol.it".to_string()),
        first_name: Some("Mario".to_string()),
        last_name: None,
        role: Some(RoleType::Student),
        active: true,
        updated_at: Utc::now(),
    };
    storage.profiles.upsert(&profile).await.unwrap();

    profile.last_name = Some("Rossi".to_string());
    storage.profiles.upsert(&profile).await.unwrap();
    assert!(storage.profiles.set_role("u-1", RoleType::Teacher).await.unwrap());
    assert!(storage.profiles.deactivate("u-1").await.unwrap());
    assert!(!storage.profiles.deactivate("ghost").await.unwrap());

    let stored = storage.profiles.get("u-1").await.unwrap().unwrap();
    assert_eq!(stored.last_name.as_deref(), Some("Rossi"));
    assert_eq!(stored.role, Some(RoleType::Teacher));
    assert!(!stored.active);
}
