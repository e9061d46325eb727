use crate::db::Store;
use crate::domain::events::AuditEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::error;

/// Listens on the event bus and persists every security event. The core
/// publishes fire-and-forget; this collaborator is the durable record.
pub struct AuditService {
    store: Store,
    event_bus: broadcast::Sender<AuditEvent>,
}

impl AuditService {
    #[must_use]
    pub const fn new(store: Store, event_bus: broadcast::Sender<AuditEvent>) -> Self {
        Self { store, event_bus }
    }

    pub fn start_listener(self: Arc<Self>) {
        let mut rx = self.event_bus.subscribe();
        let service = self;

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Err(e) = service.handle_event(event).await {
                            error!(error = %e, "Failed to persist audit event");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        error!(count, "Audit listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        error!("Audit listener event bus closed");
                        break;
                    }
                }
            }
        });
    }

    async fn handle_event(&self, event: AuditEvent) -> anyhow::Result<()> {
        let category = event.category();

        let (actor, user_id, message) = match &event {
            AuditEvent::LoginSucceeded {
                actor,
                user_id,
                ip_address,
                ..
            } => (
                actor.clone(),
                Some(*user_id),
                format!("Login from {ip_address}"),
            ),
            AuditEvent::LoginFailed { actor, attempts } => (
                actor.clone(),
                None,
                format!("Failed login attempt ({attempts} recorded)"),
            ),
            AuditEvent::LoginRejectedLocked { actor } => (
                actor.clone(),
                None,
                "Login rejected: account locked".to_string(),
            ),
            AuditEvent::AccountLocked { actor, user_id } => (
                actor.clone(),
                Some(*user_id),
                "Account locked after repeated failures".to_string(),
            ),
            AuditEvent::AccountUnlocked { actor, user_id, by } => (
                actor.clone(),
                Some(*user_id),
                format!("Account unlocked by {by}"),
            ),
            AuditEvent::LoggedOut { actor, session_id } => (
                actor.clone(),
                None,
                format!("Logged out session {session_id}"),
            ),
            AuditEvent::SessionTerminated { actor, session_id } => (
                actor.clone(),
                None,
                format!("Remotely terminated session {session_id}"),
            ),
            AuditEvent::SessionsTerminatedElsewhere { actor, count } => (
                actor.clone(),
                None,
                format!("Terminated {count} other sessions"),
            ),
            AuditEvent::RememberReauthenticated { actor, session_id } => (
                actor.clone(),
                None,
                format!("Re-authenticated session {session_id} via remember token"),
            ),
            AuditEvent::RememberRejected { reason } => (
                "anonymous".to_string(),
                None,
                format!("Remember token rejected: {reason}"),
            ),
            AuditEvent::UserRegistered { actor, user_id } => {
                (actor.clone(), Some(*user_id), "User registered".to_string())
            }
            AuditEvent::UserConfirmed { actor, user_id } => {
                (actor.clone(), Some(*user_id), "Email confirmed".to_string())
            }
            AuditEvent::PasswordChanged { actor, user_id } => {
                (actor.clone(), Some(*user_id), "Password changed".to_string())
            }
            AuditEvent::AuthorizationDenied {
                actor,
                resource,
                action,
            } => (
                actor.clone(),
                None,
                format!("Denied {action} on {resource}"),
            ),
        };

        let details = serde_json::to_string(&event).ok();

        self.store
            .add_audit_event(category, &actor, user_id, &message, details)
            .await
    }
}
