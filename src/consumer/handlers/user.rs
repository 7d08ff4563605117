//! User and role events from the user/role service.
//!
//! Maintains a local profile projection keyed by user id. Every event is an
//! upsert or a keyed update, so replays converge on the same row.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::required;
use crate::auth::RoleType;
use crate::consumer::{EnvelopeHandler, HandlerError};
use crate::envelope::{event_types, Envelope};
use crate::storage::ProfileStore;

/// Local view of a user account.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub username: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<RoleType>,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

/// Projects user lifecycle events into the profile store.
pub struct UserHandler {
    profiles: Arc<dyn ProfileStore>,
}

impl UserHandler {
    pub fn new(profiles: Arc<dyn ProfileStore>) -> Self {
        Self { profiles }
    }

    /// Create or refresh a profile. Fields absent from the event keep their
    /// stored value, and a deactivated profile stays inactive.
    async fn upsert(
        &self,
        envelope: &Envelope,
        id_field: &'static str,
        role: Option<RoleType>,
    ) -> Result<(), HandlerError> {
        let user_id = required(envelope, id_field)?;
        let role = match role {
            Some(role) => Some(role),
            None => parse_role(envelope)?,
        };
        let existing = self.profiles.get(&user_id).await?;

        let email = envelope
            .get_str("email")
            .or_else(|| existing.as_ref().and_then(|p| p.email.clone()));
        let username = envelope
            .get_str("username")
            .filter(|u| !u.trim().is_empty())
            .or_else(|| existing.as_ref().map(|p| p.username.clone()))
            .or_else(|| email.clone())
            .unwrap_or_else(|| user_id.clone());

        let profile = UserProfile {
            username,
            email,
            first_name: envelope
                .get_str("firstName")
                .or_else(|| existing.as_ref().and_then(|p| p.first_name.clone())),
            last_name: envelope
                .get_str("lastName")
                .or_else(|| existing.as_ref().and_then(|p| p.last_name.clone())),
            role: role.or_else(|| existing.as_ref().and_then(|p| p.role)),
            active: existing.as_ref().map_or(true, |p| p.active),
            updated_at: event_time(envelope),
            user_id,
        };

        if let Some(current) = &existing {
            if same_state(current, &profile) {
                debug!(
                    event_type = %envelope.event_type(),
                    user_id = %profile.user_id,
                    "Profile already up to date"
                );
                return Ok(());
            }
        }
        self.profiles.upsert(&profile).await?;

        info!(
            event_type = %envelope.event_type(),
            user_id = %profile.user_id,
            role = profile.role.map(|r| r.as_str()).unwrap_or("-"),
            "Profile projected"
        );
        Ok(())
    }

    async fn on_deleted(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let user_id = required(envelope, "userId")?;
        match self.profiles.get(&user_id).await? {
            None => debug!(user_id = %user_id, "Deleted user has no local profile"),
            Some(profile) if !profile.active => {
                debug!(user_id = %user_id, "Profile already inactive")
            }
            Some(_) => {
                if self.profiles.deactivate(&user_id).await? {
                    info!(user_id = %user_id, "Profile deactivated");
                }
            }
        }
        Ok(())
    }

    async fn on_role_assigned(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let user_id = required(envelope, "userId")?;
        let Some(role) = parse_role(envelope)? else {
            return Err(HandlerError::missing(envelope, "role"));
        };

        if let Some(profile) = self.profiles.get(&user_id).await? {
            if profile.role == Some(role) {
                debug!(user_id = %user_id, role = %role, "Role already assigned");
                return Ok(());
            }
            if self.profiles.set_role(&user_id, role).await? {
                info!(user_id = %user_id, role = %role, "Role assigned");
                return Ok(());
            }
        }

        warn!(user_id = %user_id, role = %role, "Role assigned before profile; creating stub");
        self.upsert(envelope, "userId", Some(role)).await
    }
}

/// When the event happened, falling back to now for an unusable stamp.
fn event_time(envelope: &Envelope) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(envelope.timestamp())
        .single()
        .unwrap_or_else(Utc::now)
}

/// Equal apart from the modification time.
fn same_state(current: &UserProfile, next: &UserProfile) -> bool {
    current.user_id == next.user_id
        && current.username == next.username
        && current.email == next.email
        && current.first_name == next.first_name
        && current.last_name == next.last_name
        && current.role == next.role
        && current.active == next.active
}

/// `role` (or `roleName`) when present; an unrecognized value is rejected.
fn parse_role(envelope: &Envelope) -> Result<Option<RoleType>, HandlerError> {
    let Some(raw) = envelope
        .get_str("role")
        .or_else(|| envelope.get_str("roleName"))
    else {
        return Ok(None);
    };
    RoleType::parse(&raw)
        .map(Some)
        .ok_or_else(|| HandlerError::Invalid {
            event_type: envelope.event_type().to_string(),
            message: format!("unknown role '{raw}'"),
        })
}

#[async_trait]
impl EnvelopeHandler for UserHandler {
    fn name(&self) -> &str {
        "user"
    }

    fn event_types(&self) -> &[&'static str] {
        &[
            event_types::TEACHER_CREATED,
            event_types::STUDENT_CREATED,
            event_types::USER_CREATED,
            event_types::USER_UPDATED,
            event_types::USER_DELETED,
            event_types::ROLE_ASSIGNED,
        ]
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        match envelope.event_type() {
            event_types::TEACHER_CREATED => {
                self.upsert(envelope, "teacherId", Some(RoleType::Teacher))
                    .await
            }
            event_types::STUDENT_CREATED => {
                self.upsert(envelope, "studentId", Some(RoleType::Student))
                    .await
            }
            event_types::USER_DELETED => self.on_deleted(envelope).await,
            event_types::ROLE_ASSIGNED => self.on_role_assigned(envelope).await,
            _ => self.upsert(envelope, "userId", None).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MockProfileStore;

    fn handler() -> (UserHandler, Arc<MockProfileStore>) {
        let store = Arc::new(MockProfileStore::new());
        (UserHandler::new(store.clone()), store)
    }

    fn event(event_type: &str, fields: &[(&str, &str)]) -> Envelope {
        let mut envelope = Envelope::new(event_type, "user-role");
        for (key, value) in fields {
            envelope.insert(*key, *value).unwrap();
        }
        envelope
    }

    #[tokio::test]
    async fn test_teacher_created_projects_teacher_profile() {
        let (handler, store) = handler();
        let envelope = event(
            event_types::TEACHER_CREATED,
            &[("teacherId", "t-1"), ("email", "prof@unimol.it")],
        );

        handler.handle(&envelope).await.unwrap();
        handler.handle(&envelope).await.unwrap();

        let profile = store.get("t-1").await.unwrap().unwrap();
        assert_eq!(profile.role, Some(RoleType::Teacher));
        assert_eq!(profile.username, "prof@unimol.it");
        assert!(profile.active);
    }

    #[tokio::test]
    async fn test_user_updated_keeps_unspecified_fields() {
        let (handler, store) = handler();
        handler
            .handle(&event(
                event_types::STUDENT_CREATED,
                &[("studentId", "u-1"), ("username", "mrossi"), ("firstName", "Mario")],
            ))
            .await
            .unwrap();

        handler
            .handle(&event(
                event_types::USER_UPDATED,
                &[("userId", "u-1"), ("lastName", "Rossi")],
            ))
            .await
            .unwrap();

        let profile = store.get("u-1").await.unwrap().unwrap();
        assert_eq!(profile.username, "mrossi");
        assert_eq!(profile.first_name.as_deref(), Some("Mario"));
        assert_eq!(profile.last_name.as_deref(), Some("Rossi"));
        assert_eq!(profile.role, Some(RoleType::Student));
    }

    #[tokio::test]
    async fn test_role_assigned_updates_role() {
        let (handler, store) = handler();
        handler
            .handle(&event(event_types::USER_CREATED, &[("userId", "u-1"), ("role", "STUDENT")]))
            .await
            .unwrap();

        handler
            .handle(&event(event_types::ROLE_ASSIGNED, &[("userId", "u-1"), ("role", "teacher")]))
            .await
            .unwrap();

        let profile = store.get("u-1").await.unwrap().unwrap();
        assert_eq!(profile.role, Some(RoleType::Teacher));
    }

    #[tokio::test]
    async fn test_role_assigned_before_profile_creates_stub() {
        let (handler, store) = handler();
        handler
            .handle(&event(event_types::ROLE_ASSIGNED, &[("userId", "u-2"), ("role", "ADMIN")]))
            .await
            .unwrap();

        let profile = store.get("u-2").await.unwrap().unwrap();
        assert_eq!(profile.username, "u-2");
        assert_eq!(profile.role, Some(RoleType::Admin));
    }

    #[tokio::test]
    async fn test_unknown_role_is_not_retryable() {
        let (handler, _) = handler();
        let err = handler
            .handle(&event(event_types::ROLE_ASSIGNED, &[("userId", "u-1"), ("role", "JANITOR")]))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Invalid { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_user_deleted_deactivates_and_tolerates_unknown() {
        let (handler, store) = handler();
        handler
            .handle(&event(event_types::USER_CREATED, &[("userId", "u-1")]))
            .await
            .unwrap();

        handler
            .handle(&event(event_types::USER_DELETED, &[("userId", "u-1")]))
            .await
            .unwrap();
        handler
            .handle(&event(event_types::USER_DELETED, &[("userId", "ghost")]))
            .await
            .unwrap();

        assert!(!store.get("u-1").await.unwrap().unwrap().active);
        assert!(store.get("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_redelivered_create_keeps_deleted_profile_inactive() {
        let (handler, store) = handler();
        let created = event(
            event_types::STUDENT_CREATED,
            &[("studentId", "u-1"), ("username", "mrossi")],
        );

        handler.handle(&created).await.unwrap();
        handler
            .handle(&event(event_types::USER_DELETED, &[("userId", "u-1")]))
            .await
            .unwrap();
        handler.handle(&created).await.unwrap();

        let profile = store.get("u-1").await.unwrap().unwrap();
        assert!(!profile.active);
        assert_eq!(profile.username, "mrossi");
    }

    #[tokio::test]
    async fn test_redelivery_leaves_profile_unchanged() {
        let (handler, store) = handler();
        let created = event(
            event_types::USER_CREATED,
            &[("userId", "u-1"), ("username", "mrossi"), ("role", "STUDENT")],
        );
        let assigned = event(event_types::ROLE_ASSIGNED, &[("userId", "u-1"), ("role", "TEACHER")]);
        let deleted = event(event_types::USER_DELETED, &[("userId", "u-1")]);

        handler.handle(&created).await.unwrap();
        let first = store.get("u-1").await.unwrap().unwrap();
        assert_eq!(first.updated_at.timestamp_millis(), created.timestamp());
        handler.handle(&created).await.unwrap();
        assert_eq!(store.get("u-1").await.unwrap().unwrap(), first);

        handler.handle(&assigned).await.unwrap();
        let after_role = store.get("u-1").await.unwrap().unwrap();
        handler.handle(&assigned).await.unwrap();
        assert_eq!(store.get("u-1").await.unwrap().unwrap(), after_role);

        handler.handle(&deleted).await.unwrap();
        let after_delete = store.get("u-1").await.unwrap().unwrap();
        handler.handle(&deleted).await.unwrap();
        assert_eq!(store.get("u-1").await.unwrap().unwrap(), after_delete);
        assert!(!after_delete.active);
        assert_eq!(after_delete.role, Some(RoleType::Teacher));
    }

    #[tokio::test]
    async fn test_storage_failure_is_retryable() {
        let (handler, store) = handler();
        store.set_fail_on_write(true).await;

        let err = handler
            .handle(&event(event_types::USER_CREATED, &[("userId", "u-1")]))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
