//! End-to-end scenarios over the in-memory stores and the mock broker.
//!
//! Run with: cargo test --test survey_lifecycle
//!
//! No external dependencies required.

use std::sync::Arc;

use assessment_events::auth::{Caller, RoleType};
use assessment_events::bus::{MessageBroker, MockBroker};
use assessment_events::config::{PublishRetryConfig, TopologyConfig, DEFAULT_SERVICE_NAME};
use assessment_events::consumer::handlers::{subscribe_all, AssignmentHandler, UserHandler};
use assessment_events::consumer::{Consumer, EnvelopeHandler};
use assessment_events::envelope::{event_types, Envelope};
use assessment_events::publisher::Publisher;
use assessment_events::storage::{
    AssessmentStore, MockAssessmentStore, ProfileStore, ResponseStore, Storage,
};
use assessment_events::survey::responses::{NewResponse, ResponseService};
use assessment_events::survey::service::SurveyService;
use assessment_events::survey::{NewSurvey, SurveyError, SurveyQuestion, SurveyStatus};
use assessment_events::topology::TopologyRegistry;

struct Harness {
    broker: Arc<MockBroker>,
    topology: Arc<TopologyRegistry>,
    publisher: Arc<Publisher>,
    storage: Storage,
}

impl Harness {
    async fn new() -> Self {
        let topology = Arc::new(TopologyRegistry::new(&TopologyConfig::default()).unwrap());
        let broker = Arc::new(MockBroker::new());
        broker.declare(&topology).await.unwrap();
        let publisher = Arc::new(Publisher::new(
            broker.clone(),
            topology.clone(),
            DEFAULT_SERVICE_NAME,
            PublishRetryConfig::default(),
        ));
        Self {
            broker,
            topology,
            publisher,
            storage: Storage::memory(),
        }
    }

    fn surveys(&self) -> SurveyService {
        SurveyService::new(self.storage.surveys.clone(), self.publisher.clone())
    }

    fn responses(&self) -> ResponseService {
        ResponseService::new(
            self.storage.surveys.clone(),
            self.storage.responses.clone(),
            self.publisher.clone(),
        )
    }

    /// Wire `handlers` to every bound queue and register them with the broker.
    async fn consume(&self, handlers: Vec<Arc<dyn EnvelopeHandler>>) {
        let bindings = self.topology.bound_queues(DEFAULT_SERVICE_NAME);
        let mut consumer = Consumer::new();
        subscribe_all(&mut consumer, &bindings, &handlers);
        let consumer = Arc::new(consumer);
        for binding in bindings {
            self.broker
                .start_consuming(binding, consumer.clone())
                .await
                .unwrap();
        }
    }
}

fn admin() -> Caller {
    Caller::new("admin-1", RoleType::Admin)
}

fn teacher() -> Caller {
    Caller::new("T-1", RoleType::Teacher)
}

fn student(id: &str) -> Caller {
    Caller::new(id, RoleType::Student)
}

fn course_survey() -> NewSurvey {
    NewSurvey {
        course_id: "C-ALG".into(),
        teacher_id: "T-1".into(),
        academic_year: "2024-2025".into(),
        semester: 2,
        title: "Algorithms evaluation".into(),
        description: Some("End of semester".into()),
        questions: vec![
            SurveyQuestion::rating("q1", "Clarity of lectures"),
            SurveyQuestion::text("q2", "Comments", 500),
        ],
    }
}

fn submitted_assignment() -> Vec<u8> {
    let mut envelope = Envelope::new(event_types::ASSIGNMENT_SUBMITTED, "content-management");
    envelope.insert("assignmentId", "asg-7").unwrap();
    envelope.insert("studentId", "st-1").unwrap();
    envelope.insert("courseId", "C-ALG").unwrap();
    envelope.encode().unwrap()
}

#[tokio::test]
async fn test_survey_from_draft_to_closed() {
    let harness = Harness::new().await;
    let surveys = harness.surveys();
    let responses = harness.responses();

    let survey = surveys.create(&admin(), course_survey()).await.unwrap();
    assert_eq!(survey.status, SurveyStatus::Draft);
    assert_eq!(harness.broker.published_count().await, 0);

    let err = responses
        .submit(&student("st-1"), &survey.id, vec![NewResponse::rating("q1", 4)])
        .await
        .unwrap_err();
    assert!(matches!(err, SurveyError::NotAccepting(_)));

    surveys
        .change_status(&admin(), &survey.id, SurveyStatus::Active)
        .await
        .unwrap();

    responses
        .submit(
            &student("st-1"),
            &survey.id,
            vec![
                NewResponse::rating("q1", 4),
                NewResponse::comment("q2", "Great examples"),
            ],
        )
        .await
        .unwrap();
    responses
        .submit(&student("st-2"), &survey.id, vec![NewResponse::rating("q1", 2)])
        .await
        .unwrap();

    let err = responses
        .submit(&student("st-1"), &survey.id, vec![NewResponse::rating("q1", 5)])
        .await
        .unwrap_err();
    assert!(matches!(err, SurveyError::DuplicateSubmission { .. }));

    let results = responses.results(&teacher(), &survey.id).await.unwrap();
    assert_eq!(results.get("q1"), Some(&3.0));

    let closed = surveys
        .change_status(&admin(), &survey.id, SurveyStatus::Closed)
        .await
        .unwrap();
    assert!(closed.closing_date.is_some());

    let published = harness.broker.take_published().await;
    let keys: Vec<&str> = published.iter().map(|m| m.routing_key.as_str()).collect();
    assert_eq!(
        keys,
        vec![
            "survey.responses.bulk.submitted",
            "survey.responses.bulk.submitted",
            "survey.results.requested",
            "survey.completed",
        ]
    );

    let completed = Envelope::decode(&published[3].body).unwrap();
    assert_eq!(completed.event_type(), event_types::SURVEY_COMPLETED);
    assert_eq!(completed.service_name(), DEFAULT_SERVICE_NAME);
    assert_eq!(completed.get_str("surveyId"), Some(survey.id.clone()));
    assert_eq!(completed.get_str("status").as_deref(), Some("CLOSED"));
    assert_eq!(harness.broker.queue_depth("survey.completed").await, 1);

    let err = responses
        .submit(&student("st-3"), &survey.id, vec![NewResponse::rating("q1", 5)])
        .await
        .unwrap_err();
    assert!(matches!(err, SurveyError::NotAccepting(_)));
}

#[tokio::test]
async fn test_same_status_transition_rejected() {
    let harness = Harness::new().await;
    let surveys = harness.surveys();
    let survey = surveys.create(&admin(), course_survey()).await.unwrap();

    let err = surveys
        .change_status(&admin(), &survey.id, SurveyStatus::Draft)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SurveyError::InvalidTransition {
            from: SurveyStatus::Draft,
            to: SurveyStatus::Draft
        }
    ));
    assert_eq!(harness.broker.published_count().await, 0);
}

#[tokio::test]
async fn test_reopened_survey_closes_again() {
    let harness = Harness::new().await;
    let surveys = harness.surveys();
    let survey = surveys.create(&admin(), course_survey()).await.unwrap();

    for status in [
        SurveyStatus::Closed,
        SurveyStatus::Active,
        SurveyStatus::Closed,
        SurveyStatus::Draft,
    ] {
        surveys
            .change_status(&admin(), &survey.id, status)
            .await
            .unwrap();
    }

    let completed = harness
        .broker
        .take_published()
        .await
        .into_iter()
        .filter(|m| m.routing_key == "survey.completed")
        .count();
    assert_eq!(completed, 2);
}

#[tokio::test(start_paused = true)]
async fn test_close_with_broker_down_keeps_state() {
    let harness = Harness::new().await;
    let surveys = harness.surveys();
    let survey = surveys.create(&admin(), course_survey()).await.unwrap();
    surveys
        .change_status(&admin(), &survey.id, SurveyStatus::Active)
        .await
        .unwrap();

    harness.broker.set_fail_on_publish(true).await;
    let err = surveys
        .change_status(&admin(), &survey.id, SurveyStatus::Closed)
        .await
        .unwrap_err();

    match err {
        SurveyError::EventNotPublished { survey: saved, .. } => {
            assert_eq!(saved.status, SurveyStatus::Closed)
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(harness.broker.publish_attempts().await.len(), 3);
    let stored = surveys.get(&teacher(), &survey.id).await.unwrap();
    assert_eq!(stored.status, SurveyStatus::Closed);
}

#[tokio::test]
async fn test_redelivered_assignment_yields_one_assessment() {
    let harness = Harness::new().await;
    harness
        .consume(vec![
            Arc::new(AssignmentHandler::new(
                harness.storage.assessments.clone(),
                harness.publisher.clone(),
            )),
            Arc::new(UserHandler::new(harness.storage.profiles.clone())),
        ])
        .await;

    harness
        .broker
        .inject("assignment.submitted", submitted_assignment())
        .await;
    harness
        .broker
        .inject("assignment.submitted", submitted_assignment())
        .await;
    assert_eq!(harness.broker.pump().await, 2);

    let assessment = harness
        .storage
        .assessments
        .find_by_reference(
            assessment_events::publisher::events::ReferenceType::Assignment,
            "asg-7",
            "st-1",
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(assessment.score, None);

    let created: Vec<_> = harness
        .broker
        .take_published()
        .await
        .into_iter()
        .filter(|m| m.routing_key == "assessment.created")
        .collect();
    assert_eq!(created.len(), 1);
    assert!(harness.broker.dead_letters().await.is_empty());
}

#[tokio::test]
async fn test_malformed_and_unknown_messages_are_dropped() {
    let harness = Harness::new().await;
    harness
        .consume(vec![Arc::new(UserHandler::new(
            harness.storage.profiles.clone(),
        ))])
        .await;

    harness.broker.inject("user.created.queue", &b"{not json"[..]).await;
    harness.broker.inject("user.created.queue", Vec::new()).await;
    let mut unknown = Envelope::new("USER_PROMOTED", "user-role");
    unknown.insert("userId", "u-1").unwrap();
    harness
        .broker
        .inject("user.created.queue", unknown.encode().unwrap())
        .await;

    assert_eq!(harness.broker.pump().await, 3);
    assert!(harness.broker.dead_letters().await.is_empty());
    assert!(harness.storage.profiles.get("u-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_field_goes_straight_to_dead_letter() {
    let harness = Harness::new().await;
    harness
        .consume(vec![Arc::new(UserHandler::new(
            harness.storage.profiles.clone(),
        ))])
        .await;

    let envelope = Envelope::new(event_types::USER_DELETED, "user-role");
    harness
        .broker
        .inject("user.deleted.queue", envelope.encode().unwrap())
        .await;

    assert_eq!(harness.broker.pump().await, 1);
    let dead = harness.broker.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].retry_count, 0);
}

#[tokio::test]
async fn test_persistent_failure_dead_lettered_after_retries() {
    let harness = Harness::new().await;
    let assessments = Arc::new(MockAssessmentStore::new());
    assessments.set_fail_on_write(true).await;
    harness
        .consume(vec![Arc::new(AssignmentHandler::new(
            assessments.clone(),
            harness.publisher.clone(),
        ))])
        .await;

    harness
        .broker
        .inject("assignment.submitted", submitted_assignment())
        .await;

    // First delivery plus three redeliveries.
    assert_eq!(harness.broker.pump().await, 4);
    let dead = harness.broker.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].queue, "assignment.submitted");
    assert_eq!(dead[0].retry_count, 3);
    assert_eq!(assessments.count().await, 0);
}

#[tokio::test]
async fn test_concurrent_submissions_store_one_batch() {
    let harness = Harness::new().await;
    let surveys = harness.surveys();
    let responses = Arc::new(harness.responses());
    let survey = surveys.create(&admin(), course_survey()).await.unwrap();
    surveys
        .change_status(&admin(), &survey.id, SurveyStatus::Active)
        .await
        .unwrap();

    let tasks: Vec<_> = (1..=5)
        .map(|rating| {
            let responses = responses.clone();
            let survey_id = survey.id.clone();
            tokio::spawn(async move {
                responses
                    .submit(
                        &student("st-1"),
                        &survey_id,
                        vec![NewResponse::rating("q1", rating)],
                    )
                    .await
            })
        })
        .collect();

    let mut stored = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => stored += 1,
            Err(SurveyError::DuplicateSubmission { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(stored, 1);
    assert_eq!(
        harness
            .storage
            .responses
            .list_for_survey(&survey.id)
            .await
            .unwrap()
            .len(),
        1
    );
}
