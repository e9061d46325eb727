//! Session lifecycle: idempotent termination, device-management refusals and
//! remember-token windows, against an in-memory store.

use chrono::{Duration, Utc};
use opsdesk::config::Config;
use opsdesk::db::Store;
use opsdesk::entities::sessions;
use opsdesk::services::{ClientInfo, SessionError};
use opsdesk::state::SharedState;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};

fn test_config() -> Config {
    let mut config = Config::default();
    config.general.database_path = "sqlite::memory:".to_string();
    config.security.secret_key = "session-test-secret".to_string();
    config.security.argon2_memory_cost_kib = 1024;
    config.security.argon2_time_cost = 1;
    config
}

fn client() -> ClientInfo {
    ClientInfo {
        user_agent: "test".to_string(),
        ip_address: "10.0.0.1".to_string(),
    }
}

async fn register_and_login(shared: &SharedState, email: &str, remember: bool) -> (i32, i32) {
    let registered = shared
        .auth_service
        .register(email, "password123", "")
        .await
        .expect("register");
    let outcome = shared
        .auth_service
        .login(email, "password123", remember, &client())
        .await
        .expect("login");
    (registered.user_id, outcome.session.id)
}

async fn session_row(store: &Store, id: i32) -> sessions::Model {
    sessions::Entity::find_by_id(id)
        .one(&store.conn)
        .await
        .expect("query")
        .expect("session row")
}

#[tokio::test]
async fn terminate_is_idempotent() {
    let shared = SharedState::new(test_config()).await.expect("state");
    let (_, session_id) = register_and_login(&shared, "a@example.com", true).await;

    shared.store.terminate_session(session_id).await.expect("first");
    let after_first = session_row(&shared.store, session_id).await;
    assert!(!after_first.active);
    assert!(after_first.remember_token.is_none());
    assert!(after_first.remember_created_at.is_none());

    shared.store.terminate_session(session_id).await.expect("second");
    let after_second = session_row(&shared.store, session_id).await;
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn a_terminated_session_is_indistinguishable_from_a_missing_one() {
    let shared = SharedState::new(test_config()).await.expect("state");
    let (_, session_id) = register_and_login(&shared, "a@example.com", false).await;

    assert!(
        shared
            .store
            .find_active_session(session_id)
            .await
            .expect("find")
            .is_some()
    );

    shared.store.terminate_session(session_id).await.expect("terminate");

    assert!(
        shared
            .store
            .find_active_session(session_id)
            .await
            .expect("find")
            .is_none()
    );
}

#[tokio::test]
async fn resolving_a_terminated_session_forces_unauthenticated() {
    let shared = SharedState::new(test_config()).await.expect("state");
    let (_, session_id) = register_and_login(&shared, "a@example.com", false).await;

    shared.store.terminate_session(session_id).await.expect("terminate");

    let resolved = shared
        .auth_service
        .resolve_session(session_id)
        .await
        .expect("resolve");
    assert!(resolved.is_none());
}

#[tokio::test]
async fn list_active_is_newest_first_and_skips_terminated() {
    let shared = SharedState::new(test_config()).await.expect("state");
    let (user_id, first) = register_and_login(&shared, "a@example.com", false).await;

    let second = shared
        .auth_service
        .login("a@example.com", "password123", false, &client())
        .await
        .expect("second login")
        .session
        .id;

    shared.store.terminate_session(first).await.expect("terminate");

    let sessions = shared
        .store
        .list_active_sessions_for_user(user_id)
        .await
        .expect("list");

    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, second);
}

#[tokio::test]
async fn terminate_by_id_rejects_the_current_session() {
    let shared = SharedState::new(test_config()).await.expect("state");
    let (user_id, session_id) = register_and_login(&shared, "a@example.com", false).await;

    let err = shared
        .session_service
        .terminate_by_id(user_id, session_id, session_id)
        .await
        .expect_err("self-termination must be refused");
    assert!(matches!(err, SessionError::CurrentSession));

    assert!(session_row(&shared.store, session_id).await.active);
}

#[tokio::test]
async fn terminate_by_id_rejects_sessions_owned_by_someone_else() {
    let shared = SharedState::new(test_config()).await.expect("state");
    let (owner_id, owner_session) = register_and_login(&shared, "owner@example.com", false).await;
    let (other_id, other_session) = register_and_login(&shared, "other@example.com", false).await;

    // Even an admin goes through the ownership check on this endpoint.
    shared
        .store
        .assign_role(owner_id, "admin")
        .await
        .expect("assign admin");

    let err = shared
        .session_service
        .terminate_by_id(owner_id, owner_session, other_session)
        .await
        .expect_err("not-owned session must be refused");
    assert!(matches!(err, SessionError::NotFound));

    // Target unaffected.
    assert!(session_row(&shared.store, other_session).await.active);
    let _ = other_id;
}

#[tokio::test]
async fn terminate_by_id_closes_an_owned_session() {
    let shared = SharedState::new(test_config()).await.expect("state");
    let (user_id, first) = register_and_login(&shared, "a@example.com", false).await;

    let second = shared
        .auth_service
        .login("a@example.com", "password123", false, &client())
        .await
        .expect("second login")
        .session
        .id;

    shared
        .session_service
        .terminate_by_id(user_id, second, first)
        .await
        .expect("terminate owned session");

    assert!(!session_row(&shared.store, first).await.active);
    assert!(session_row(&shared.store, second).await.active);
}

#[tokio::test]
async fn terminate_others_spares_only_the_current_session() {
    let shared = SharedState::new(test_config()).await.expect("state");
    let (user_id, first) = register_and_login(&shared, "a@example.com", true).await;

    let second = shared
        .auth_service
        .login("a@example.com", "password123", true, &client())
        .await
        .expect("second login")
        .session
        .id;
    let third = shared
        .auth_service
        .login("a@example.com", "password123", false, &client())
        .await
        .expect("third login")
        .session
        .id;

    let terminated = shared
        .session_service
        .terminate_others(user_id, third)
        .await
        .expect("terminate others");
    assert_eq!(terminated, 2);

    assert!(!session_row(&shared.store, first).await.active);
    assert!(!session_row(&shared.store, second).await.active);
    assert!(session_row(&shared.store, third).await.active);

    // Remember tokens died with their sessions.
    assert!(session_row(&shared.store, first).await.remember_token.is_none());
}

#[tokio::test]
async fn remember_token_resolves_inside_the_window() {
    let shared = SharedState::new(test_config()).await.expect("state");
    shared
        .auth_service
        .register("a@example.com", "password123", "")
        .await
        .expect("register");

    let outcome = shared
        .auth_service
        .login("a@example.com", "password123", true, &client())
        .await
        .expect("login");
    let token = outcome.remember_token.expect("token issued");

    let resolved = shared
        .auth_service
        .resolve_remember_token(&token)
        .await
        .expect("resolve");
    assert!(resolved.is_some());
}

#[tokio::test]
async fn remember_token_expires_after_fourteen_days() {
    let shared = SharedState::new(test_config()).await.expect("state");
    shared
        .auth_service
        .register("a@example.com", "password123", "")
        .await
        .expect("register");

    let outcome = shared
        .auth_service
        .login("a@example.com", "password123", true, &client())
        .await
        .expect("login");
    let token = outcome.remember_token.expect("token issued");
    let session_id = outcome.session.id;

    // Fifteen days old: one day past the rolling window.
    let row = session_row(&shared.store, session_id).await;
    let mut active: sessions::ActiveModel = row.into();
    active.remember_created_at = Set(Some(Utc::now() - Duration::days(15)));
    active.update(&shared.store.conn).await.expect("backdate");

    let resolved = shared
        .auth_service
        .resolve_remember_token(&token)
        .await
        .expect("resolve");
    assert!(resolved.is_none());

    // The stale token was scrubbed from the row, not left to dangle.
    let row = session_row(&shared.store, session_id).await;
    assert!(row.remember_token.is_none());
    // ...but the session itself is still live for its transport credential.
    assert!(row.active);
}

#[tokio::test]
async fn remember_token_for_a_terminated_session_does_not_resolve() {
    let shared = SharedState::new(test_config()).await.expect("state");
    shared
        .auth_service
        .register("a@example.com", "password123", "")
        .await
        .expect("register");

    let outcome = shared
        .auth_service
        .login("a@example.com", "password123", true, &client())
        .await
        .expect("login");
    let token = outcome.remember_token.expect("token issued");

    shared
        .store
        .terminate_session(outcome.session.id)
        .await
        .expect("terminate");

    let resolved = shared
        .auth_service
        .resolve_remember_token(&token)
        .await
        .expect("resolve");
    assert!(resolved.is_none());
}

#[tokio::test]
async fn activity_touch_is_throttled() {
    let shared = SharedState::new(test_config()).await.expect("state");
    let (_, session_id) = register_and_login(&shared, "a@example.com", false).await;

    let before = session_row(&shared.store, session_id)
        .await
        .last_activity_at
        .expect("stamped at creation");

    // Within the one-minute window: no write.
    shared
        .auth_service
        .resolve_session(session_id)
        .await
        .expect("resolve");
    let after = session_row(&shared.store, session_id)
        .await
        .last_activity_at
        .expect("still stamped");
    assert_eq!(before, after);

    // Backdate past the window: the next resolution writes.
    let row = session_row(&shared.store, session_id).await;
    let mut active: sessions::ActiveModel = row.into();
    active.last_activity_at = Set(Some(Utc::now() - Duration::seconds(120)));
    active.update(&shared.store.conn).await.expect("backdate");

    shared
        .auth_service
        .resolve_session(session_id)
        .await
        .expect("resolve");
    let touched = session_row(&shared.store, session_id)
        .await
        .last_activity_at
        .expect("touched");
    assert!(Utc::now().signed_duration_since(touched).num_seconds() < 10);
}
