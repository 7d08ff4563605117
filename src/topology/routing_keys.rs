//! Exact routing keys used on the main exchange, and the event types they carry.

use crate::envelope::event_types;

// Published by the assessment/feedback service.
pub const ASSESSMENT_CREATED: &str = "assessment.created";
pub const ASSESSMENT_UPDATED: &str = "assessment.updated";
pub const ASSESSMENT_DELETED: &str = "assessment.deleted";
pub const FEEDBACK_CREATED: &str = "feedback.created";
pub const FEEDBACK_UPDATED: &str = "feedback.updated";
pub const FEEDBACK_DELETED: &str = "feedback.deleted";
pub const SURVEY_COMPLETED: &str = "survey.completed";
pub const SURVEY_RESPONSE_SUBMITTED: &str = "survey.response.submitted";
pub const SURVEY_RESPONSES_BULK_SUBMITTED: &str = "survey.responses.bulk.submitted";
pub const SURVEY_RESULTS_REQUESTED: &str = "survey.results.requested";
pub const SURVEY_COMMENTS_REQUESTED: &str = "survey.comments.requested";

// Published by the assignment, exam and course services.
pub const ASSIGNMENT_CREATED: &str = "assignment.created";
pub const ASSIGNMENT_UPDATED: &str = "assignment.updated";
pub const ASSIGNMENT_SUBMITTED: &str = "assignment.submitted";
pub const EXAM_COMPLETED: &str = "exam.completed";
pub const EXAM_GRADE_REGISTERED: &str = "exam.grade.registered";
pub const COURSE_CREATED: &str = "course.created";
pub const COURSE_DELETED: &str = "course.deleted";

// Published by the user/role service.
pub const USER_CREATED: &str = "user.created";
pub const USER_UPDATED: &str = "user.updated";
pub const USER_DELETED: &str = "user.deleted";
pub const ROLE_ASSIGNED: &str = "role.assigned";
pub const TEACHER_CREATED: &str = "teacher.created";
pub const STUDENT_CREATED: &str = "student.created";

/// Event type to routing key, one row per event the fleet exchanges.
pub const EVENT_ROUTES: &[(&str, &str)] = &[
    (event_types::ASSESSMENT_CREATED, ASSESSMENT_CREATED),
    (event_types::ASSESSMENT_UPDATED, ASSESSMENT_UPDATED),
    (event_types::ASSESSMENT_DELETED, ASSESSMENT_DELETED),
    (event_types::FEEDBACK_CREATED, FEEDBACK_CREATED),
    (event_types::FEEDBACK_UPDATED, FEEDBACK_UPDATED),
    (event_types::FEEDBACK_DELETED, FEEDBACK_DELETED),
    (event_types::SURVEY_COMPLETED, SURVEY_COMPLETED),
    (event_types::SURVEY_RESPONSE_SUBMITTED, SURVEY_RESPONSE_SUBMITTED),
    (
        event_types::SURVEY_RESPONSES_BULK_SUBMITTED,
        SURVEY_RESPONSES_BULK_SUBMITTED,
    ),
    (event_types::SURVEY_RESULTS_REQUESTED, SURVEY_RESULTS_REQUESTED),
    (event_types::SURVEY_COMMENTS_REQUESTED, SURVEY_COMMENTS_REQUESTED),
    (event_types::ASSIGNMENT_CREATED, ASSIGNMENT_CREATED),
    (event_types::ASSIGNMENT_UPDATED, ASSIGNMENT_UPDATED),
    (event_types::ASSIGNMENT_SUBMITTED, ASSIGNMENT_SUBMITTED),
    (event_types::EXAM_COMPLETED, EXAM_COMPLETED),
    (event_types::EXAM_GRADE_REGISTERED, EXAM_GRADE_REGISTERED),
    (event_types::COURSE_CREATED, COURSE_CREATED),
    (event_types::COURSE_DELETED, COURSE_DELETED),
    (event_types::USER_CREATED, USER_CREATED),
    (event_types::USER_UPDATED, USER_UPDATED),
    (event_types::USER_DELETED, USER_DELETED),
    (event_types::ROLE_ASSIGNED, ROLE_ASSIGNED),
    (event_types::TEACHER_CREATED, TEACHER_CREATED),
    (event_types::STUDENT_CREATED, STUDENT_CREATED),
];

/// Event types carried under `routing_key`.
pub fn event_types_for(routing_key: &str) -> impl Iterator<Item = &'static str> + '_ {
    EVENT_ROUTES
        .iter()
        .filter(move |(_, key)| *key == routing_key)
        .map(|(event_type, _)| *event_type)
}
