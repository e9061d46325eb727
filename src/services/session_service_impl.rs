//! `SeaORM` implementation of the `SessionService` trait.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::db::Store;
use crate::domain::events::AuditEvent;
use crate::entities::sessions;
use crate::services::session_service::{SessionError, SessionService};

pub struct SeaOrmSessionService {
    store: Store,
    event_bus: broadcast::Sender<AuditEvent>,
}

impl SeaOrmSessionService {
    #[must_use]
    pub const fn new(store: Store, event_bus: broadcast::Sender<AuditEvent>) -> Self {
        Self { store, event_bus }
    }

    fn emit(&self, event: AuditEvent) {
        let _ = self.event_bus.send(event);
    }

    async fn actor_email(&self, user_id: i32) -> String {
        match self.store.get_user_by_id(user_id).await {
            Ok(Some(user)) => user.email,
            _ => "anonymous".to_string(),
        }
    }
}

#[async_trait]
impl SessionService for SeaOrmSessionService {
    async fn list_for_user(&self, user_id: i32) -> Result<Vec<sessions::Model>, SessionError> {
        Ok(self.store.list_active_sessions_for_user(user_id).await?)
    }

    async fn terminate_by_id(
        &self,
        user_id: i32,
        current_session_id: i32,
        target_id: i32,
    ) -> Result<(), SessionError> {
        // Self-termination check first: the refusal is stable even if the
        // row's state changes underneath us.
        if target_id == current_session_id {
            return Err(SessionError::CurrentSession);
        }

        let Some(target) = self.store.find_active_session(target_id).await? else {
            return Err(SessionError::NotFound);
        };

        // Another user's session is reported exactly like a missing one.
        if target.user_id != user_id {
            return Err(SessionError::NotFound);
        }

        self.store.terminate_session(target_id).await?;

        self.emit(AuditEvent::SessionTerminated {
            actor: self.actor_email(user_id).await,
            session_id: target_id,
        });

        Ok(())
    }

    async fn terminate_others(
        &self,
        user_id: i32,
        current_session_id: i32,
    ) -> Result<u64, SessionError> {
        let count = self
            .store
            .session_repo()
            .terminate_all_for_user_except(user_id, current_session_id)
            .await?;

        if count > 0 {
            self.emit(AuditEvent::SessionsTerminatedElsewhere {
                actor: self.actor_email(user_id).await,
                count,
            });
        }

        Ok(count)
    }
}
