//! Request-scoped current-actor context.
//!
//! The authentication middleware resolves at most one live Session per
//! request and publishes it here, as a value in the request's extensions.
//! Extensions are created fresh for every request, which gives the isolation
//! guarantee for free: nothing can leak from one request to the next, and all
//! reads within one request observe the same value the middleware wrote.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::authz::PolicyActor;
use crate::db::User;
use crate::entities::sessions;
use crate::services::ResolvedActor;

use super::ApiError;

/// The resolved actor for this request: the Session plus its owner and the
/// owner's roles, loaded once at resolution time.
#[derive(Debug, Clone)]
pub struct CurrentActor {
    session: sessions::Model,
    user: User,
    roles: Vec<String>,
}

impl CurrentActor {
    #[must_use]
    pub fn session(&self) -> &sessions::Model {
        &self.session
    }

    /// The derived user. Absent whenever the held Session is not active, even
    /// though the Session value itself is still reachable: a terminated
    /// session must never vouch for an identity.
    #[must_use]
    pub fn user(&self) -> Option<&User> {
        if self.session.active {
            Some(&self.user)
        } else {
            None
        }
    }

    #[must_use]
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Actor facts for the policy registry. An authenticated actor implies
    /// the system has users, so the bootstrap ground is closed here; the
    /// public registration handler assembles its own facts.
    #[must_use]
    pub fn policy_actor(&self) -> PolicyActor {
        match self.user() {
            Some(user) => PolicyActor::authenticated(user, self.roles.clone(), true),
            None => PolicyActor::anonymous(true),
        }
    }
}

impl From<ResolvedActor> for CurrentActor {
    fn from(resolved: ResolvedActor) -> Self {
        Self {
            session: resolved.session,
            user: resolved.user,
            roles: resolved.roles,
        }
    }
}

impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Absence here means the route was mounted without the
        // authentication middleware; that misconfiguration is fatal for the
        // request, not a mere 401.
        parts
            .extensions
            .get::<CurrentActor>()
            .cloned()
            .ok_or_else(|| {
                ApiError::internal("Authentication middleware not mounted for this route")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn resolved(active: bool) -> ResolvedActor {
        let now = Utc::now();
        ResolvedActor {
            session: sessions::Model {
                id: 1,
                user_id: 9,
                ip_address: "127.0.0.1".to_string(),
                user_agent: "test".to_string(),
                active,
                remember_token: None,
                remember_created_at: None,
                last_activity_at: None,
                created_at: now,
            },
            user: User {
                id: 9,
                email: "actor@example.com".to_string(),
                display_name: "Actor".to_string(),
                failed_login_attempts: 0,
                locked_at: None,
                password_changed_at: now,
                confirmed_at: Some(now),
                created_at: now,
                updated_at: now,
            },
            roles: vec!["member".to_string()],
        }
    }

    #[test]
    fn user_is_present_while_session_is_active() {
        let actor = CurrentActor::from(resolved(true));
        assert_eq!(actor.user().map(|u| u.id), Some(9));
    }

    #[test]
    fn user_is_absent_once_session_is_terminated() {
        // The Session value is still held; only the derivation goes away.
        let actor = CurrentActor::from(resolved(false));
        assert_eq!(actor.session().user_id, 9);
        assert!(actor.user().is_none());
    }
}
