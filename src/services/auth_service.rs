//! Domain service for authentication and session lifecycle.
//!
//! Owns the login pipeline (lockout check before password verification,
//! counter bookkeeping, session creation), both re-authentication paths
//! (transport credential, remember token) and the logout/termination side of
//! the session state machine.

use serde::Serialize;
use thiserror::Error;

use crate::db::User;
use crate::entities::sessions;

/// Errors specific to authentication operations.
///
/// `InvalidCredentials` deliberately covers both "no such user" and "wrong
/// password" so callers cannot tell the two apart.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account locked")]
    LockedAccount,

    #[error("Invalid or already-used confirmation token")]
    InvalidConfirmationToken,

    #[error("User not found")]
    UserNotFound,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for AuthError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Transport-level facts about the connecting client, captured per session.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: String,
    pub ip_address: String,
}

/// A fully resolved actor: the live session plus the user it belongs to and
/// that user's roles, loaded fresh for this request.
#[derive(Debug, Clone)]
pub struct ResolvedActor {
    pub session: sessions::Model,
    pub user: User,
    pub roles: Vec<String>,
}

/// Result of a successful login or confirmation.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub session: sessions::Model,
    pub roles: Vec<String>,
    /// Present only when the caller asked to be remembered.
    pub remember_token: Option<String>,
    /// The credential is stale per the configured expiration policy; the UI
    /// collaborator decides what to do with that.
    pub password_expired: bool,
}

/// Registration result: the new user plus the confirmation token the mail
/// collaborator must deliver.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredUser {
    pub user_id: i32,
    pub email: String,
    pub confirmation_token: String,
}

/// Domain service trait for authentication.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Verify credentials and open a session.
    ///
    /// # Errors
    ///
    /// [`AuthError::LockedAccount`] when the account is inside its lockout
    /// window (checked before the password, so a locked login never reveals
    /// whether the password was right); [`AuthError::InvalidCredentials`] for
    /// unknown email or wrong password alike.
    async fn login(
        &self,
        email: &str,
        password: &str,
        remember: bool,
        client: &ClientInfo,
    ) -> Result<LoginOutcome, AuthError>;

    /// Resolve a session id from the transport credential into a live actor.
    /// Returns `None` for unknown or terminated sessions. Touches
    /// `last_activity_at`, throttled to at most one write per minute.
    async fn resolve_session(&self, session_id: i32) -> Result<Option<ResolvedActor>, AuthError>;

    /// Resolve a remember token into a live actor, rotating the token on
    /// success (the returned string is the replacement cookie value).
    /// `None` covers every failure mode: unknown token, terminated session,
    /// expired window.
    async fn resolve_remember_token(
        &self,
        token: &str,
    ) -> Result<Option<(ResolvedActor, String)>, AuthError>;

    /// Terminate the given session. Idempotent.
    async fn logout(&self, session_id: i32) -> Result<(), AuthError>;

    /// Create an account and its confirmation token. Authorization (admin or
    /// empty-system bootstrap) is the boundary's job, not this method's.
    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<RegisteredUser, AuthError>;

    /// Redeem a confirmation token; on success the account is confirmed and a
    /// session is established, exactly like a fresh login.
    async fn confirm(&self, token: &str, client: &ClientInfo)
    -> Result<LoginOutcome, AuthError>;

    /// Change a password after re-verifying the current one.
    async fn change_password(
        &self,
        user_id: i32,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError>;

    /// Administrative unlock: clears the lock and the counter immediately.
    async fn unlock(&self, email: &str, unlocked_by: &str) -> Result<(), AuthError>;
}
