//! Domain service for device management: listing and remotely terminating a
//! user's own sessions. Session *creation* is authentication's job and is
//! deliberately absent here.

use thiserror::Error;

use crate::entities::sessions;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Target session does not exist, is already terminated, or belongs to
    /// someone else; the three are indistinguishable to the caller.
    #[error("Session not found")]
    NotFound,

    /// Terminating the session that authenticated this very request is
    /// refused; logout is the correct path for that.
    #[error("Cannot terminate the current session; log out instead")]
    CurrentSession,

    #[error("Database error: {0}")]
    Database(String),
}

impl From<anyhow::Error> for SessionError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Domain service trait for device management.
#[async_trait::async_trait]
pub trait SessionService: Send + Sync {
    /// Active sessions for the user, newest first.
    async fn list_for_user(&self, user_id: i32) -> Result<Vec<sessions::Model>, SessionError>;

    /// Terminate one of the user's own sessions by id.
    ///
    /// # Errors
    ///
    /// [`SessionError::CurrentSession`] when `target_id == current_session_id`;
    /// [`SessionError::NotFound`] when the target is missing, inactive, or
    /// owned by another user (ownership is never disclosed).
    async fn terminate_by_id(
        &self,
        user_id: i32,
        current_session_id: i32,
        target_id: i32,
    ) -> Result<(), SessionError>;

    /// Terminate every active session of the user except the current one.
    /// Returns how many were closed.
    async fn terminate_others(
        &self,
        user_id: i32,
        current_session_id: i32,
    ) -> Result<u64, SessionError>;
}
