use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::User;
use crate::entities::{audit_events, sessions};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub const fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserDto {
    pub id: i32,
    pub email: String,
    pub display_name: String,
    pub confirmed: bool,
    pub locked: bool,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserDto {
    #[must_use]
    pub fn from_user(user: &User, roles: Vec<String>, lockout_minutes: i64) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            confirmed: user.confirmed_at.is_some(),
            locked: crate::services::lockout::is_locked(
                user.locked_at,
                Utc::now(),
                lockout_minutes,
            ),
            roles,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionDto {
    pub id: i32,
    pub ip_address: String,
    pub user_agent: String,
    pub current: bool,
    pub remembered: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl SessionDto {
    #[must_use]
    pub fn from_session(session: &sessions::Model, current_session_id: i32) -> Self {
        Self {
            id: session.id,
            ip_address: session.ip_address.clone(),
            user_agent: session.user_agent.clone(),
            current: session.id == current_session_id,
            remembered: session.remember_token.is_some(),
            created_at: session.created_at,
            last_activity_at: session.last_activity_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuditEventDto {
    pub id: i64,
    pub category: String,
    pub actor: String,
    pub user_id: Option<i32>,
    pub message: String,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<audit_events::Model> for AuditEventDto {
    fn from(model: audit_events::Model) -> Self {
        Self {
            id: model.id,
            category: model.category,
            actor: model.actor,
            user_id: model.user_id,
            message: model.message,
            details: model.details,
            created_at: model.created_at,
        }
    }
}
