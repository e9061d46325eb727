//! Security/audit events published on the event bus.
//!
//! Every security-relevant decision in the authentication pipeline emits one
//! of these. The audit listener persists them and the admin console consumes
//! them live over SSE; the core itself never blocks on a subscriber.

use serde::Serialize;

/// Structured record of who did what and why it was allowed or refused.
/// `actor` is the normalized email of the acting (or attempting) user, or
/// "anonymous" when no identity resolved.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum AuditEvent {
    LoginSucceeded {
        actor: String,
        user_id: i32,
        session_id: i32,
        ip_address: String,
    },
    LoginFailed {
        actor: String,
        attempts: i32,
    },
    LoginRejectedLocked {
        actor: String,
    },
    AccountLocked {
        actor: String,
        user_id: i32,
    },
    AccountUnlocked {
        actor: String,
        user_id: i32,
        by: String,
    },
    LoggedOut {
        actor: String,
        session_id: i32,
    },
    SessionTerminated {
        actor: String,
        session_id: i32,
    },
    SessionsTerminatedElsewhere {
        actor: String,
        count: u64,
    },
    RememberReauthenticated {
        actor: String,
        session_id: i32,
    },
    RememberRejected {
        reason: String,
    },
    UserRegistered {
        actor: String,
        user_id: i32,
    },
    UserConfirmed {
        actor: String,
        user_id: i32,
    },
    PasswordChanged {
        actor: String,
        user_id: i32,
    },
    AuthorizationDenied {
        actor: String,
        resource: String,
        action: String,
    },
}

impl AuditEvent {
    /// Category tag used for persistence and filtering.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::LoginSucceeded { .. } => "login_succeeded",
            Self::LoginFailed { .. } => "login_failed",
            Self::LoginRejectedLocked { .. } => "login_rejected_locked",
            Self::AccountLocked { .. } => "account_locked",
            Self::AccountUnlocked { .. } => "account_unlocked",
            Self::LoggedOut { .. } => "logged_out",
            Self::SessionTerminated { .. } => "session_terminated",
            Self::SessionsTerminatedElsewhere { .. } => "sessions_terminated_elsewhere",
            Self::RememberReauthenticated { .. } => "remember_reauthenticated",
            Self::RememberRejected { .. } => "remember_rejected",
            Self::UserRegistered { .. } => "user_registered",
            Self::UserConfirmed { .. } => "user_confirmed",
            Self::PasswordChanged { .. } => "password_changed",
            Self::AuthorizationDenied { .. } => "authorization_denied",
        }
    }
}
