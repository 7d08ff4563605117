//! Message envelope: the flat JSON object every service puts on the wire.
//!
//! ```json
//! { "eventType": "ASSESSMENT_CREATED", "serviceName": "assessment-feedback",
//!   "timestamp": 1710499200000, "assessmentId": 42, ... }
//! ```
//!
//! The three header fields are fixed at construction. Payload fields are
//! siblings of the headers and may never shadow them.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event type identifiers exchanged across the fleet.
pub mod event_types {
    pub const ASSESSMENT_CREATED: &str = "ASSESSMENT_CREATED";
    pub const ASSESSMENT_UPDATED: &str = "ASSESSMENT_UPDATED";
    pub const ASSESSMENT_DELETED: &str = "ASSESSMENT_DELETED";
    pub const FEEDBACK_CREATED: &str = "FEEDBACK_CREATED";
    pub const FEEDBACK_UPDATED: &str = "FEEDBACK_UPDATED";
    pub const FEEDBACK_DELETED: &str = "FEEDBACK_DELETED";
    pub const SURVEY_COMPLETED: &str = "SURVEY_COMPLETED";
    pub const SURVEY_RESPONSE_SUBMITTED: &str = "SURVEY_RESPONSE_SUBMITTED";
    pub const SURVEY_RESPONSES_BULK_SUBMITTED: &str = "SURVEY_RESPONSES_BULK_SUBMITTED";
    pub const SURVEY_RESULTS_REQUESTED: &str = "SURVEY_RESULTS_REQUESTED";
    pub const SURVEY_COMMENTS_REQUESTED: &str = "SURVEY_COMMENTS_REQUESTED";

    pub const ASSIGNMENT_CREATED: &str = "ASSIGNMENT_CREATED";
    pub const ASSIGNMENT_UPDATED: &str = "ASSIGNMENT_UPDATED";
    pub const ASSIGNMENT_SUBMITTED: &str = "ASSIGNMENT_SUBMITTED";
    pub const EXAM_COMPLETED: &str = "EXAM_COMPLETED";
    pub const EXAM_GRADE_REGISTERED: &str = "EXAM_GRADE_REGISTERED";
    pub const COURSE_CREATED: &str = "COURSE_CREATED";
    pub const COURSE_DELETED: &str = "COURSE_DELETED";

    pub const USER_CREATED: &str = "USER_CREATED";
    pub const USER_UPDATED: &str = "USER_UPDATED";
    pub const USER_DELETED: &str = "USER_DELETED";
    pub const ROLE_ASSIGNED: &str = "ROLE_ASSIGNED";
    pub const TEACHER_CREATED: &str = "TEACHER_CREATED";
    pub const STUDENT_CREATED: &str = "STUDENT_CREATED";
}

/// Header field names reserved on the wire.
pub const EVENT_TYPE_FIELD: &str = "eventType";
pub const SERVICE_NAME_FIELD: &str = "serviceName";
pub const TIMESTAMP_FIELD: &str = "timestamp";

const RESERVED_FIELDS: [&str; 3] = [EVENT_TYPE_FIELD, SERVICE_NAME_FIELD, TIMESTAMP_FIELD];

/// Result type for envelope operations.
pub type Result<T> = std::result::Result<T, EnvelopeError>;

/// Errors raised while building, encoding or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Empty message body")]
    Empty,

    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Envelope has a blank {0}")]
    MissingHeader(&'static str),

    #[error("Payload field '{0}' shadows an envelope header")]
    ReservedField(String),

    #[error("Payload field '{0}' is not a flat value")]
    NotFlat(String),

    #[error("Payload must serialize to an object")]
    NotAnObject,
}

/// Wire-level wrapper carrying event metadata and a flat payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    event_type: String,
    service_name: String,
    /// Epoch milliseconds.
    timestamp: i64,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl Envelope {
    /// Start an envelope stamped with the current time.
    pub fn new(event_type: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self::at(event_type, service_name, Utc::now().timestamp_millis())
    }

    /// Start an envelope with an explicit timestamp.
    pub fn at(
        event_type: impl Into<String>,
        service_name: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            service_name: service_name.into(),
            timestamp,
            payload: Map::new(),
        }
    }

    /// Add every field of a serializable struct to the payload.
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        match serde_json::to_value(payload)? {
            Value::Object(fields) => {
                for (key, value) in fields {
                    self.insert(key, value)?;
                }
                Ok(self)
            }
            _ => Err(EnvelopeError::NotAnObject),
        }
    }

    /// Add one payload field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        if RESERVED_FIELDS.contains(&key.as_str()) {
            return Err(EnvelopeError::ReservedField(key));
        }
        if !is_wire_value(&value) {
            return Err(EnvelopeError::NotFlat(key));
        }
        self.payload.insert(key, value);
        Ok(())
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// String field; numbers are rendered as strings.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.payload.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Integer field; accepts JSON integers and numeric strings.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.payload.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Float field; accepts JSON numbers and numeric strings.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.payload.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.payload.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Serialize to the wire format.
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.validate()?;
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a raw message body.
    pub fn decode(body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(EnvelopeError::Empty);
        }
        let envelope: Envelope = serde_json::from_slice(body)?;
        envelope.validate()?;
        Ok(envelope)
    }

    fn validate(&self) -> Result<()> {
        if self.event_type.trim().is_empty() {
            return Err(EnvelopeError::MissingHeader(EVENT_TYPE_FIELD));
        }
        if self.service_name.trim().is_empty() {
            return Err(EnvelopeError::MissingHeader(SERVICE_NAME_FIELD));
        }
        if let Some((key, _)) = self.payload.iter().find(|(_, v)| !is_wire_value(v)) {
            return Err(EnvelopeError::NotFlat(key.clone()));
        }
        Ok(())
    }
}

// Primitives at the top level; arrays may hold primitives or flat objects.
fn is_wire_value(value: &Value) -> bool {
    match value {
        Value::Object(_) => false,
        Value::Array(items) => items.iter().all(|item| match item {
            Value::Object(fields) => fields.values().all(is_primitive),
            other => is_primitive(other),
        }),
        _ => true,
    }
}

fn is_primitive(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Created {
        assessment_id: i64,
        score: Option<f64>,
    }

    #[test]
    fn test_headers_set_before_payload() {
        let envelope = Envelope::new(event_types::ASSESSMENT_CREATED, "assessment-feedback");
        assert_eq!(envelope.event_type(), "ASSESSMENT_CREATED");
        assert_eq!(envelope.service_name(), "assessment-feedback");
        assert!(envelope.timestamp() > 0);
        assert!(envelope.payload().is_empty());
    }

    #[test]
    fn test_wire_shape_is_flat() {
        let envelope = Envelope::at(event_types::ASSESSMENT_CREATED, "svc", 1_710_499_200_000)
            .with_payload(&Created {
                assessment_id: 42,
                score: None,
            })
            .unwrap();

        let wire: Value = serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
        assert_eq!(
            wire,
            json!({
                "eventType": "ASSESSMENT_CREATED",
                "serviceName": "svc",
                "timestamp": 1_710_499_200_000i64,
                "assessmentId": 42,
                "score": null
            })
        );
    }

    #[test]
    fn test_payload_cannot_shadow_header() {
        let mut envelope = Envelope::new("X", "svc");
        let err = envelope.insert("eventType", "Y").unwrap_err();
        assert!(matches!(err, EnvelopeError::ReservedField(f) if f == "eventType"));
        assert_eq!(envelope.event_type(), "X");
    }

    #[test]
    fn test_nested_object_rejected() {
        let mut envelope = Envelope::new("X", "svc");
        let err = envelope.insert("meta", json!({"a": 1})).unwrap_err();
        assert!(matches!(err, EnvelopeError::NotFlat(_)));
    }

    #[test]
    fn test_array_of_flat_objects_accepted() {
        let mut envelope = Envelope::new("X", "svc");
        envelope
            .insert("responses", json!([{"questionId": "q1", "numericRating": 4}]))
            .unwrap();
        assert!(envelope
            .insert("responses", json!([{"nested": {"a": 1}}]))
            .is_err());
    }

    #[test]
    fn test_decode_empty_body() {
        assert!(matches!(Envelope::decode(b""), Err(EnvelopeError::Empty)));
        assert!(matches!(Envelope::decode(b"  \n"), Err(EnvelopeError::Empty)));
    }

    #[test]
    fn test_decode_rejects_nested_object() {
        let body = br#"{"eventType":"X","serviceName":"svc","timestamp":1,"user":{"id":"u-1"}}"#;
        assert!(matches!(
            Envelope::decode(body),
            Err(EnvelopeError::NotFlat(key)) if key == "user"
        ));

        let body = br#"{"eventType":"X","serviceName":"svc","timestamp":1,"responses":[{"questionId":"q1","numericRating":4}]}"#;
        assert!(Envelope::decode(body).is_ok());
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            Envelope::decode(b"not json"),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_missing_event_type() {
        let body = br#"{"serviceName":"svc","timestamp":1}"#;
        assert!(matches!(
            Envelope::decode(body),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_blank_event_type() {
        let body = br#"{"eventType":" ","serviceName":"svc","timestamp":1}"#;
        assert!(matches!(
            Envelope::decode(body),
            Err(EnvelopeError::MissingHeader("eventType"))
        ));
    }

    #[test]
    fn test_getters_accept_numeric_strings() {
        let body = br#"{"eventType":"ASSIGNMENT_SUBMITTED","serviceName":"assignments",
            "timestamp":1,"assignmentId":"17","studentId":9,"score":"27.5","late":false}"#;
        let envelope = Envelope::decode(body).unwrap();
        assert_eq!(envelope.get_i64("assignmentId"), Some(17));
        assert_eq!(envelope.get_i64("studentId"), Some(9));
        assert_eq!(envelope.get_str("studentId").as_deref(), Some("9"));
        assert_eq!(envelope.get_f64("score"), Some(27.5));
        assert_eq!(envelope.get_bool("late"), Some(false));
        assert_eq!(envelope.get_i64("missing"), None);
    }
}
