//! `SeaORM` implementation of the `AuthService` trait.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};

use crate::config::Config;
use crate::db::repositories::user::verify_password_hash;
use crate::db::{Store, User};
use crate::domain::events::AuditEvent;
use crate::services::auth_service::{
    AuthError, AuthService, ClientInfo, LoginOutcome, RegisteredUser, ResolvedActor,
};
use crate::services::lockout;
use crate::services::remember::{self, RememberTokenService};

/// Hash used to burn comparable work when the email is unknown, so the two
/// `InvalidCredentials` paths behave alike.
static DUMMY_HASH: OnceLock<String> = OnceLock::new();

fn dummy_hash() -> &'static str {
    DUMMY_HASH.get_or_init(|| {
        crate::db::repositories::user::hash_password(
            "not-a-real-password",
            &crate::config::SecurityConfig::default(),
        )
        .unwrap_or_default()
    })
}

pub struct SeaOrmAuthService {
    store: Store,
    config: Arc<RwLock<Config>>,
    remember_tokens: RememberTokenService,
    event_bus: broadcast::Sender<AuditEvent>,
}

impl SeaOrmAuthService {
    #[must_use]
    pub fn new(
        store: Store,
        config: Arc<RwLock<Config>>,
        event_bus: broadcast::Sender<AuditEvent>,
    ) -> Self {
        let remember_tokens = RememberTokenService::new(store.clone());
        Self {
            store,
            config,
            remember_tokens,
            event_bus,
        }
    }

    /// Publishing never blocks or fails the pipeline; a full bus just drops
    /// the event for live subscribers (the persisting listener keeps up).
    fn emit(&self, event: AuditEvent) {
        let _ = self.event_bus.send(event);
    }

    async fn password_expired(&self, user: &User) -> bool {
        let days = i64::from(self.config.read().await.security.password_expiration_days);
        Utc::now()
            .signed_duration_since(user.password_changed_at)
            .num_days()
            >= days
    }

    async fn load_actor(
        &self,
        session: crate::entities::sessions::Model,
    ) -> Result<Option<ResolvedActor>, AuthError> {
        let Some(user) = self.store.get_user_by_id(session.user_id).await? else {
            // Orphaned session (owner removed); close it out.
            self.store.terminate_session(session.id).await?;
            return Ok(None);
        };

        let roles = self.store.roles_for_user(user.id).await?;
        Ok(Some(ResolvedActor {
            session,
            user,
            roles,
        }))
    }

    /// Shared "session established" side effect: the activity touch, applied
    /// identically to fresh logins and remember re-authentication, throttled
    /// so a busy client does not write on every request.
    async fn touch_activity(
        &self,
        session: &mut crate::entities::sessions::Model,
    ) -> Result<(), AuthError> {
        let touch_seconds = i64::from(self.config.read().await.security.activity_touch_seconds);
        let now = Utc::now();

        let stale = session
            .last_activity_at
            .is_none_or(|at| at < now - chrono::Duration::seconds(touch_seconds));

        if stale {
            self.store.touch_session_activity(session.id, now).await?;
            session.last_activity_at = Some(now);
        }

        Ok(())
    }
}

#[async_trait]
impl AuthService for SeaOrmAuthService {
    async fn login(
        &self,
        email: &str,
        password: &str,
        remember: bool,
        client: &ClientInfo,
    ) -> Result<LoginOutcome, AuthError> {
        let security = self.config.read().await.security.clone();

        let Some((user, password_hash)) =
            self.store.get_user_by_email_with_password(email).await?
        else {
            // Unknown email: burn a verification anyway, reject identically.
            let _ = verify_password_hash(dummy_hash().to_string(), password.to_string()).await;
            return Err(AuthError::InvalidCredentials);
        };

        // Lock check strictly precedes password verification; a locked login
        // must not reveal whether the password was right, and must not bump
        // the counter.
        if lockout::is_locked(user.locked_at, Utc::now(), i64::from(security.lockout_minutes)) {
            self.emit(AuditEvent::LoginRejectedLocked {
                actor: user.email.clone(),
            });
            return Err(AuthError::LockedAccount);
        }

        let valid = verify_password_hash(password_hash, password.to_string()).await?;

        if !valid {
            let outcome = self
                .store
                .record_failed_attempt(user.id, security.max_failed_logins)
                .await?;

            self.emit(AuditEvent::LoginFailed {
                actor: user.email.clone(),
                attempts: outcome.attempts,
            });

            // The attempt that crosses the threshold is already answered
            // with the lock signal, not with invalid-credentials.
            if outcome.locked_now {
                tracing::warn!(user_id = user.id, "Account locked after repeated failures");
                self.emit(AuditEvent::AccountLocked {
                    actor: user.email.clone(),
                    user_id: user.id,
                });
                return Err(AuthError::LockedAccount);
            }

            return Err(AuthError::InvalidCredentials);
        }

        // Success resets the counter and the lock unconditionally, whatever
        // state the row was in (including a stale expired lock).
        self.store.reset_lockout(user.id).await?;

        let mut session = self
            .store
            .create_session(user.id, &client.user_agent, &client.ip_address)
            .await?;

        let remember_token = if remember {
            let token = self
                .remember_tokens
                .issue(session.id)
                .await
                .map_err(|e| AuthError::Internal(e.to_string()))?;
            session.remember_token = Some(token.clone());
            session.remember_created_at = Some(Utc::now());
            Some(token)
        } else {
            None
        };

        let roles = self.store.roles_for_user(user.id).await?;
        let password_expired = self.password_expired(&user).await;

        self.emit(AuditEvent::LoginSucceeded {
            actor: user.email.clone(),
            user_id: user.id,
            session_id: session.id,
            ip_address: client.ip_address.clone(),
        });

        Ok(LoginOutcome {
            user,
            session,
            roles,
            remember_token,
            password_expired,
        })
    }

    async fn resolve_session(&self, session_id: i32) -> Result<Option<ResolvedActor>, AuthError> {
        let Some(mut session) = self.store.find_active_session(session_id).await? else {
            return Ok(None);
        };

        self.touch_activity(&mut session).await?;
        self.load_actor(session).await
    }

    async fn resolve_remember_token(
        &self,
        token: &str,
    ) -> Result<Option<(ResolvedActor, String)>, AuthError> {
        let window_days = i64::from(self.config.read().await.security.remember_window_days);

        let Some(session) = self
            .store
            .session_repo()
            .find_active_by_remember_token(token)
            .await?
        else {
            self.emit(AuditEvent::RememberRejected {
                reason: "unknown token or terminated session".to_string(),
            });
            return Ok(None);
        };

        if !remember::is_valid(&session, token, Utc::now(), window_days) {
            // Stale token: scrub it so the row stops matching at all.
            self.remember_tokens
                .clear(session.id)
                .await
                .map_err(|e| AuthError::Internal(e.to_string()))?;
            self.emit(AuditEvent::RememberRejected {
                reason: "token outside validity window".to_string(),
            });
            return Ok(None);
        }

        // Valid: rotate the token, then fire the same side effects as a
        // fresh login so the two paths are indistinguishable downstream.
        let rotated = self
            .remember_tokens
            .rotate(session.id)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;

        let mut session = session;
        session.remember_token = Some(rotated.clone());
        session.remember_created_at = Some(Utc::now());
        self.touch_activity(&mut session).await?;

        let Some(actor) = self.load_actor(session).await? else {
            return Ok(None);
        };

        self.emit(AuditEvent::RememberReauthenticated {
            actor: actor.user.email.clone(),
            session_id: actor.session.id,
        });

        Ok(Some((actor, rotated)))
    }

    async fn logout(&self, session_id: i32) -> Result<(), AuthError> {
        let actor = match self.store.find_active_session(session_id).await? {
            Some(session) => self
                .store
                .get_user_by_id(session.user_id)
                .await?
                .map(|u| u.email)
                .unwrap_or_else(|| "anonymous".to_string()),
            None => "anonymous".to_string(),
        };

        self.store.terminate_session(session_id).await?;
        self.emit(AuditEvent::LoggedOut {
            actor,
            session_id,
        });

        Ok(())
    }

    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<RegisteredUser, AuthError> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::Validation("A valid email is required".to_string()));
        }
        if password.len() < 8 {
            return Err(AuthError::Validation(
                "Password must be at least 8 characters".to_string(),
            ));
        }

        let security = self.config.read().await.security.clone();
        let display_name = if display_name.trim().is_empty() {
            email
        } else {
            display_name.trim()
        };

        let created = self
            .store
            .create_user(email, password, display_name, &security)
            .await;

        let (user, confirmation_token) = match created {
            Ok(pair) => pair,
            Err(e) => {
                if let Some(db_err) = e.downcast_ref::<sea_orm::DbErr>()
                    && matches!(
                        db_err.sql_err(),
                        Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
                    )
                {
                    return Err(AuthError::Validation(
                        "Email is already registered".to_string(),
                    ));
                }
                return Err(e.into());
            }
        };

        self.store.assign_role(user.id, "member").await?;

        self.emit(AuditEvent::UserRegistered {
            actor: user.email.clone(),
            user_id: user.id,
        });

        Ok(RegisteredUser {
            user_id: user.id,
            email: user.email,
            confirmation_token,
        })
    }

    async fn confirm(
        &self,
        token: &str,
        client: &ClientInfo,
    ) -> Result<LoginOutcome, AuthError> {
        let Some(user) = self.store.user_repo().get_by_confirmation_token(token).await? else {
            return Err(AuthError::InvalidConfirmationToken);
        };

        self.store.user_repo().confirm(user.id).await?;

        // Confirmation establishes a session exactly like a login does.
        let session = self
            .store
            .create_session(user.id, &client.user_agent, &client.ip_address)
            .await?;
        let roles = self.store.roles_for_user(user.id).await?;
        let password_expired = self.password_expired(&user).await;

        self.emit(AuditEvent::UserConfirmed {
            actor: user.email.clone(),
            user_id: user.id,
        });

        let user = self
            .store
            .get_user_by_id(user.id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        Ok(LoginOutcome {
            user,
            session,
            roles,
            remember_token: None,
            password_expired,
        })
    }

    async fn change_password(
        &self,
        user_id: i32,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        if new_password.len() < 8 {
            return Err(AuthError::Validation(
                "New password must be at least 8 characters".to_string(),
            ));
        }
        if current_password == new_password {
            return Err(AuthError::Validation(
                "New password must be different from current password".to_string(),
            ));
        }

        let user = self
            .store
            .get_user_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let Some((_, password_hash)) = self
            .store
            .get_user_by_email_with_password(&user.email)
            .await?
        else {
            return Err(AuthError::UserNotFound);
        };

        let valid = verify_password_hash(password_hash, current_password.to_string()).await?;
        if !valid {
            return Err(AuthError::Validation(
                "Current password is incorrect".to_string(),
            ));
        }

        let security = self.config.read().await.security.clone();
        self.store
            .user_repo()
            .update_password(user_id, new_password, &security)
            .await?;

        self.emit(AuditEvent::PasswordChanged {
            actor: user.email,
            user_id,
        });

        Ok(())
    }

    async fn unlock(&self, email: &str, unlocked_by: &str) -> Result<(), AuthError> {
        let user = self
            .store
            .get_user_by_email(email)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        self.store.reset_lockout(user.id).await?;

        self.emit(AuditEvent::AccountUnlocked {
            actor: user.email,
            user_id: user.id,
            by: unlocked_by.to_string(),
        });

        Ok(())
    }
}
