//! Assignment events from the content-management service.
//!
//! A submission opens an ungraded assessment for the student. The
//! assessment id is derived from (reference type, assignment, student) so
//! every delivery of the same submission maps to the same row.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use super::required;
use crate::consumer::{EnvelopeHandler, HandlerError};
use crate::envelope::{event_types, Envelope};
use crate::publisher::events::{Assessment, ReferenceType};
use crate::publisher::Publisher;
use crate::storage::AssessmentStore;

const AWAITING_EVALUATION: &str = "Assignment submitted - awaiting evaluation";
const CONTENT_PREVIEW_CHARS: usize = 50;

/// Deterministic assessment id for a piece of student work.
pub fn assessment_id(reference_type: ReferenceType, reference_id: &str, student_id: &str) -> String {
    let name = format!("{}:{reference_id}:{student_id}", reference_type.as_str());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// Opens assessments for submitted assignments.
pub struct AssignmentHandler {
    assessments: Arc<dyn AssessmentStore>,
    publisher: Arc<Publisher>,
}

impl AssignmentHandler {
    pub fn new(assessments: Arc<dyn AssessmentStore>, publisher: Arc<Publisher>) -> Self {
        Self {
            assessments,
            publisher,
        }
    }

    async fn on_submitted(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let assignment_id = required(envelope, "assignmentId")?;
        let student_id = required(envelope, "studentId")?;

        let submitted_at = submission_time(envelope)?;
        let assessment = Assessment {
            id: assessment_id(ReferenceType::Assignment, &assignment_id, &student_id),
            reference_id: assignment_id.clone(),
            reference_type: ReferenceType::Assignment,
            student_id: student_id.clone(),
            teacher_id: envelope.get_str("teacherId"),
            course_id: envelope.get_str("courseId"),
            score: None,
            assessment_date: submitted_at,
            notes: Some(submission_notes(envelope)),
        };

        let inserted = self.assessments.insert_if_absent(&assessment).await?;
        if !self.assessments.pending_announcement(&assessment.id).await? {
            debug!(
                assignment_id = %assignment_id,
                student_id = %student_id,
                "Assignment submission already recorded"
            );
            return Ok(());
        }

        // A redelivery after a failed announcement carries the stored row.
        let stored = if inserted {
            assessment
        } else {
            self.assessments
                .find_by_reference(ReferenceType::Assignment, &assignment_id, &student_id)
                .await?
                .unwrap_or(assessment)
        };

        self.publisher.assessment_created(&stored).await?;
        self.assessments.mark_announced(&stored.id).await?;

        info!(
            assessment_id = %stored.id,
            assignment_id = %assignment_id,
            student_id = %student_id,
            course_id = stored.course_id.as_deref().unwrap_or("-"),
            "Opened assessment for submitted assignment"
        );
        Ok(())
    }

    fn on_changed(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let assignment_id = required(envelope, "assignmentId")?;
        info!(
            event_type = %envelope.event_type(),
            assignment_id = %assignment_id,
            course_id = envelope.get_str("courseId").as_deref().unwrap_or("-"),
            title = envelope.get_str("title").as_deref().unwrap_or("-"),
            "Assignment changed"
        );
        Ok(())
    }
}

fn submission_time(envelope: &Envelope) -> Result<DateTime<Utc>, HandlerError> {
    let millis = envelope
        .get_i64("submissionTime")
        .unwrap_or_else(|| envelope.timestamp());
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| HandlerError::Invalid {
            event_type: envelope.event_type().to_string(),
            message: format!("submission time {millis} out of range"),
        })
}

fn submission_notes(envelope: &Envelope) -> String {
    let mut notes = AWAITING_EVALUATION.to_string();
    if let Some(file_name) = envelope.get_str("fileName") {
        notes.push_str(" | File: ");
        notes.push_str(&file_name);
    }
    if let Some(content) = envelope.get_str("submissionContent") {
        if content.chars().count() > CONTENT_PREVIEW_CHARS {
            let preview: String = content.chars().take(CONTENT_PREVIEW_CHARS).collect();
            notes.push_str(&format!(" | Content preview: {preview}..."));
        } else {
            notes.push_str(&format!(" | Content: {content}"));
        }
    }
    if let Some(url) = envelope.get_str("fileUrl") {
        notes.push_str(" | File URL: ");
        notes.push_str(&url);
    }
    notes
}

#[async_trait]
impl EnvelopeHandler for AssignmentHandler {
    fn name(&self) -> &str {
        "assignment"
    }

    fn event_types(&self) -> &[&'static str] {
        &[
            event_types::ASSIGNMENT_SUBMITTED,
            event_types::ASSIGNMENT_CREATED,
            event_types::ASSIGNMENT_UPDATED,
        ]
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        match envelope.event_type() {
            event_types::ASSIGNMENT_SUBMITTED => self.on_submitted(envelope).await,
            _ => self.on_changed(envelope),
        }
    }
}
