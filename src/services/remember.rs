//! Remember-me token issuance, validation and rotation.
//!
//! A token is a 64-char hex string (URL-safe by construction) stored on its
//! session row under a global uniqueness constraint. Issuance retries on
//! collision until the constraint accepts a value; the retry loop is a
//! correctness requirement, not an optimization, because the constraint is
//! what guarantees at most one session per token system-wide.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sea_orm::SqlErr;
use thiserror::Error;

use crate::db::Store;
use crate::entities::sessions;

/// Issuance gives up after this many constraint collisions; with 256-bit
/// tokens reaching it means the RNG is broken, not that we are unlucky.
const MAX_ISSUE_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum RememberTokenError {
    #[error("Could not obtain a unique remember token after {0} attempts")]
    Exhausted(u32),

    #[error("Session {0} not found")]
    SessionNotFound(i32),

    #[error("Database error: {0}")]
    Database(String),
}

/// Generate a random remember token (64 character hex string).
#[must_use]
pub fn generate_token() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();

    bytes.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

/// True iff the session carries exactly `candidate` and the token is inside
/// the rolling validity window. Equality is exact; prefixes never match.
#[must_use]
pub fn is_valid(
    session: &sessions::Model,
    candidate: &str,
    now: DateTime<Utc>,
    window_days: i64,
) -> bool {
    let (Some(token), Some(created_at)) = (&session.remember_token, session.remember_created_at)
    else {
        return false;
    };

    token == candidate && created_at > now - Duration::days(window_days)
}

pub struct RememberTokenService {
    store: Store,
}

impl RememberTokenService {
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// Issue a fresh token for the session, overwriting any prior value (the
    /// old token dies with the overwrite; tokens are single-valued per
    /// session). Retries generation when the uniqueness constraint rejects a
    /// collision.
    pub async fn issue(&self, session_id: i32) -> Result<String, RememberTokenError> {
        self.issue_with_generator(session_id, generate_token).await
    }

    /// Rotation is an issue: the overwrite invalidates the old value.
    pub async fn rotate(&self, session_id: i32) -> Result<String, RememberTokenError> {
        self.issue(session_id).await
    }

    pub async fn clear(&self, session_id: i32) -> Result<(), RememberTokenError> {
        self.store
            .session_repo()
            .clear_remember_token(session_id)
            .await
            .map_err(|e| RememberTokenError::Database(e.to_string()))
    }

    pub(crate) async fn issue_with_generator(
        &self,
        session_id: i32,
        mut generate: impl FnMut() -> String,
    ) -> Result<String, RememberTokenError> {
        let repo = self.store.session_repo();

        for _ in 0..MAX_ISSUE_ATTEMPTS {
            let token = generate();
            match repo.set_remember_token(session_id, &token, Utc::now()).await {
                Ok(()) => return Ok(token),
                Err(e) => match e.sql_err() {
                    Some(SqlErr::UniqueConstraintViolation(_)) => {
                        tracing::warn!(session_id, "Remember token collision, regenerating");
                    }
                    _ => {
                        if matches!(e, sea_orm::DbErr::RecordNotFound(_)) {
                            return Err(RememberTokenError::SessionNotFound(session_id));
                        }
                        return Err(RememberTokenError::Database(e.to_string()));
                    }
                },
            }
        }

        Err(RememberTokenError::Exhausted(MAX_ISSUE_ATTEMPTS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_two_sessions() -> (Store, i32, i32) {
        let store = Store::new("sqlite::memory:").await.expect("store");

        let security = crate::config::SecurityConfig {
            argon2_memory_cost_kib: 1024,
            argon2_time_cost: 1,
            ..Default::default()
        };
        let (user, _) = store
            .create_user("remember@example.com", "password123", "Remember", &security)
            .await
            .expect("user");

        let a = store
            .create_session(user.id, "agent-a", "127.0.0.1")
            .await
            .expect("session a");
        let b = store
            .create_session(user.id, "agent-b", "127.0.0.1")
            .await
            .expect("session b");

        (store, a.id, b.id)
    }

    #[tokio::test]
    async fn issuance_retries_past_a_collision() {
        let (store, a, b) = store_with_two_sessions().await;
        let service = RememberTokenService::new(store.clone());

        let taken = service.issue(a).await.expect("first issue");

        // Generator proposes the already-taken token first; the uniqueness
        // constraint rejects it and the loop must move on to a fresh value.
        let mut proposals = vec![taken.clone(), "b".repeat(64)].into_iter();
        let token = service
            .issue_with_generator(b, move || proposals.next().expect("proposals"))
            .await
            .expect("second issue");

        assert_eq!(token, "b".repeat(64));

        let session = store
            .session_repo()
            .find_active_by_remember_token(&token)
            .await
            .expect("lookup")
            .expect("session");
        assert_eq!(session.id, b);
    }

    #[tokio::test]
    async fn issuance_gives_up_when_every_proposal_collides() {
        let (store, a, b) = store_with_two_sessions().await;
        let service = RememberTokenService::new(store);

        let taken = service.issue(a).await.expect("first issue");

        let result = service
            .issue_with_generator(b, move || taken.clone())
            .await;

        assert!(matches!(result, Err(RememberTokenError::Exhausted(_))));
    }

    #[tokio::test]
    async fn reissue_overwrites_the_previous_token() {
        let (store, a, _) = store_with_two_sessions().await;
        let service = RememberTokenService::new(store.clone());

        let first = service.issue(a).await.expect("first");
        let second = service.issue(a).await.expect("second");
        assert_ne!(first, second);

        // The old value no longer resolves; tokens are single-valued.
        assert!(
            store
                .session_repo()
                .find_active_by_remember_token(&first)
                .await
                .expect("lookup")
                .is_none()
        );
    }

    fn session_with_token(token: &str, created_at: DateTime<Utc>) -> sessions::Model {
        sessions::Model {
            id: 1,
            user_id: 1,
            ip_address: "127.0.0.1".to_string(),
            user_agent: "test".to_string(),
            active: true,
            remember_token: Some(token.to_string()),
            remember_created_at: Some(created_at),
            last_activity_at: None,
            created_at,
        }
    }

    #[test]
    fn generated_tokens_are_url_safe_hex() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn token_inside_window_is_valid() {
        let now = Utc::now();
        let session = session_with_token("abc123", now - Duration::days(13));
        assert!(is_valid(&session, "abc123", now, 14));
    }

    #[test]
    fn token_past_window_is_invalid() {
        let now = Utc::now();
        let session = session_with_token("abc123", now - Duration::days(15));
        assert!(!is_valid(&session, "abc123", now, 14));
    }

    #[test]
    fn one_second_past_boundary_is_invalid() {
        let now = Utc::now();
        let session = session_with_token("abc123", now - Duration::days(14) - Duration::seconds(1));
        assert!(!is_valid(&session, "abc123", now, 14));
    }

    #[test]
    fn mismatched_token_is_invalid() {
        let now = Utc::now();
        let session = session_with_token("abc123", now);
        assert!(!is_valid(&session, "abc124", now, 14));
    }

    #[test]
    fn prefix_never_matches() {
        let now = Utc::now();
        let session = session_with_token("abc123", now);
        assert!(!is_valid(&session, "abc", now, 14));
    }

    #[test]
    fn missing_token_is_invalid() {
        let now = Utc::now();
        let mut session = session_with_token("abc123", now);
        session.remember_token = None;
        assert!(!is_valid(&session, "abc123", now, 14));
    }
}
