//! Authorization capability.
//!
//! Token parsing lives in the gateway; the core only asks whether a caller
//! holds at least a given role. Roles form a strict hierarchy:
//! `STUDENT < TEACHER < ADMIN < SUPER_ADMIN`.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Errors raised by authorization checks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Role {required} required, caller has {actual}")]
    Forbidden { required: RoleType, actual: RoleType },
}

/// Role hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleType {
    Student,
    Teacher,
    Admin,
    SuperAdmin,
}

impl RoleType {
    pub fn level(&self) -> u8 {
        match self {
            Self::Student => 0,
            Self::Teacher => 1,
            Self::Admin => 2,
            Self::SuperAdmin => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "STUDENT",
            Self::Teacher => "TEACHER",
            Self::Admin => "ADMIN",
            Self::SuperAdmin => "SUPER_ADMIN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STUDENT" => Some(Self::Student),
            "TEACHER" => Some(Self::Teacher),
            "ADMIN" => Some(Self::Admin),
            "SUPER_ADMIN" => Some(Self::SuperAdmin),
            _ => None,
        }
    }

    /// Whether this role satisfies `minimum`.
    pub fn covers(&self, minimum: RoleType) -> bool {
        self.level() >= minimum.level()
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub role: RoleType,
}

impl Caller {
    pub fn new(user_id: impl Into<String>, role: RoleType) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn has_role(&self, minimum: RoleType) -> bool {
        self.role.covers(minimum)
    }

    pub fn require(&self, minimum: RoleType) -> Result<(), AuthError> {
        if self.has_role(minimum) {
            Ok(())
        } else {
            Err(AuthError::Forbidden {
                required: minimum,
                actual: self.role,
            })
        }
    }
}

/// Resolves bearer tokens to callers.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Caller, AuthError>;

    /// `hasRole(token, minimumRole)`.
    async fn has_role(&self, token: &str, minimum: RoleType) -> Result<bool, AuthError> {
        Ok(self.authenticate(token).await?.has_role(minimum))
    }
}

/// Fixed token table, for tests and local runs.
#[derive(Debug, Default, Clone)]
pub struct StaticAuthorizer {
    tokens: HashMap<String, Caller>,
}

impl StaticAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, caller: Caller) -> Self {
        self.tokens.insert(token.into(), caller);
        self
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authenticate(&self, token: &str) -> Result<Caller, AuthError> {
        self.tokens.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}
