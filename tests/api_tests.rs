use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use opsdesk::api;
use opsdesk::config::Config;
use opsdesk::state::SharedState;
use std::sync::Arc;
use tower::ServiceExt;

fn test_config() -> Config {
    let mut config = Config::default();
    config.general.database_path = "sqlite::memory:".to_string();
    config.security.secret_key = "integration-test-secret".to_string();
    // Cheap hashing keeps the suite fast; production params are irrelevant here.
    config.security.argon2_memory_cost_kib = 1024;
    config.security.argon2_time_cost = 1;
    config.server.secure_cookies = false;
    config
}

async fn spawn_app() -> (Router, Arc<SharedState>) {
    let shared = Arc::new(
        SharedState::new(test_config())
            .await
            .expect("Failed to create shared state"),
    );
    let state = api::create_app_state(shared.clone(), None)
        .await
        .expect("Failed to create app state");
    (api::router(state).await, shared)
}

/// Collect the `name=value` parts of every Set-Cookie in the response, ready
/// to be sent back as one Cookie header.
fn cookies_from(response: &axum::response::Response) -> String {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .collect::<Vec<_>>()
        .join("; ")
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn register_first_admin(app: &Router) -> axum::response::Response {
    app.clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/register",
            serde_json::json!({
                "email": "admin@example.com",
                "password": "correct-horse",
                "display_name": "Admin"
            }),
        ))
        .await
        .unwrap()
}

async fn login(app: &Router, email: &str, password: &str, remember: bool) -> axum::response::Response {
    app.clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            serde_json::json!({
                "email": email,
                "password": password,
                "remember": remember
            }),
        ))
        .await
        .unwrap()
}

#[tokio::test]
async fn protected_routes_reject_anonymous_requests() {
    let (app, _shared) = spawn_app().await;

    for uri in ["/api/auth/me", "/api/sessions", "/api/users", "/api/audit"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }
}

#[tokio::test]
async fn first_registration_bootstraps_an_admin() {
    let (app, shared) = spawn_app().await;

    let response = register_first_admin(&app).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body_json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body_json["data"]["email"], "admin@example.com");
    assert!(body_json["data"]["confirmation_token"].is_string());

    let user_id = body_json["data"]["user_id"].as_i64().unwrap() as i32;
    let roles = shared.store.roles_for_user(user_id).await.unwrap();
    assert!(roles.iter().any(|r| r == "admin"));
}

#[tokio::test]
async fn registration_closes_once_a_user_exists() {
    let (app, _shared) = spawn_app().await;

    assert_eq!(register_first_admin(&app).await.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/register",
            serde_json::json!({
                "email": "intruder@example.com",
                "password": "password123"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn forbidden_is_html_for_page_clients_and_json_for_machines() {
    let (app, _shared) = spawn_app().await;
    assert_eq!(register_first_admin(&app).await.status(), StatusCode::CREATED);

    let payload = serde_json::json!({
        "email": "second@example.com",
        "password": "password123"
    });

    let machine = app
        .clone()
        .oneshot(json_request("POST", "/api/auth/register", payload.clone()))
        .await
        .unwrap();
    assert_eq!(machine.status(), StatusCode::FORBIDDEN);
    let body = machine.into_body().collect().await.unwrap().to_bytes();
    let body_json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body_json["error"], "Forbidden");

    let page = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/register")
                .header("Content-Type", "application/json")
                .header("Accept", "text/html")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(page.status(), StatusCode::FORBIDDEN);
    let content_type = page
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/html"));
    let body = page.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("403"));
    // Never names the failing rule.
    assert!(!text.contains("admin"));
}

#[tokio::test]
async fn login_establishes_a_session_usable_across_requests() {
    let (app, _shared) = spawn_app().await;
    register_first_admin(&app).await;

    let response = login(&app, "admin@example.com", "correct-horse", false).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookies = cookies_from(&response);
    assert!(!cookies.is_empty());

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body_json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body_json["data"]["user"]["email"], "admin@example.com");
    assert_eq!(body_json["data"]["password_expired"], false);

    let me = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .header(header::COOKIE, &cookies)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(me.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_normalizes_the_email_before_lookup() {
    let (app, _shared) = spawn_app().await;
    register_first_admin(&app).await;

    let response = login(&app, "  Admin@Example.COM ", "correct-horse", false).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_email_and_wrong_password_are_indistinguishable() {
    let (app, _shared) = spawn_app().await;
    register_first_admin(&app).await;

    let wrong_password = login(&app, "admin@example.com", "not-the-password", false).await;
    let unknown_email = login(&app, "ghost@example.com", "not-the-password", false).await;

    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_email.status(), StatusCode::UNAUTHORIZED);

    let body_a = wrong_password.into_body().collect().await.unwrap().to_bytes();
    let body_b = unknown_email.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body_a, body_b);
}

#[tokio::test]
async fn logout_terminates_the_session() {
    let (app, _shared) = spawn_app().await;
    register_first_admin(&app).await;

    let response = login(&app, "admin@example.com", "correct-horse", false).await;
    let cookies = cookies_from(&response);

    let logout = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/logout")
                .header(header::COOKIE, &cookies)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(logout.status(), StatusCode::OK);

    // The old transport credential no longer authenticates.
    let me = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .header(header::COOKIE, &cookies)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(me.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn remember_cookie_reauthenticates_and_rotates() {
    let (app, _shared) = spawn_app().await;
    register_first_admin(&app).await;

    let response = login(&app, "admin@example.com", "correct-horse", true).await;
    assert_eq!(response.status(), StatusCode::OK);

    let remember_cookie = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("opsdesk_remember="))
        .expect("remember cookie set on login")
        .split(';')
        .next()
        .unwrap()
        .to_string();

    // Only the remember cookie, no transport session: step 2 of the
    // resolution order.
    let me = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .header(header::COOKIE, &remember_cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(me.status(), StatusCode::OK);

    // Rotation: a fresh cookie value is issued on use.
    let rotated = me
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("opsdesk_remember="))
        .expect("rotated remember cookie")
        .split(';')
        .next()
        .unwrap()
        .to_string();
    assert_ne!(rotated, remember_cookie);

    // The superseded value is dead.
    let replayed = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .header(header::COOKIE, &remember_cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(replayed.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn tampered_remember_cookie_is_cleared_not_served() {
    let (app, _shared) = spawn_app().await;
    register_first_admin(&app).await;
    login(&app, "admin@example.com", "correct-horse", true).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .header(header::COOKIE, "opsdesk_remember=forged-value.deadbeef")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let cleared = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("opsdesk_remember=;"))
        .expect("bad cookie must be cleared");
    assert!(cleared.contains("Max-Age=0"));
}

#[tokio::test]
async fn members_cannot_list_users_but_admins_can() {
    let (app, shared) = spawn_app().await;
    register_first_admin(&app).await;

    let admin_login = login(&app, "admin@example.com", "correct-horse", false).await;
    let admin_cookies = cookies_from(&admin_login);

    // Admin creates an ordinary member.
    let created = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/users")
                .header("Content-Type", "application/json")
                .header(header::COOKIE, &admin_cookies)
                .body(Body::from(
                    serde_json::json!({
                        "email": "member@example.com",
                        "password": "password123"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);

    let member_login = login(&app, "member@example.com", "password123", false).await;
    let member_cookies = cookies_from(&member_login);

    let denied = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/users")
                .header(header::COOKIE, &member_cookies)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let allowed = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/users")
                .header(header::COOKIE, &admin_cookies)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);

    // The denial reached the audit trail (the listener persists
    // asynchronously, so give it a beat).
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let denials = shared
        .store
        .list_audit_events(10, Some("authorization_denied".to_string()))
        .await
        .unwrap();
    assert!(!denials.is_empty());
}

#[tokio::test]
async fn terminating_the_current_session_by_id_is_refused() {
    let (app, _shared) = spawn_app().await;
    register_first_admin(&app).await;

    let response = login(&app, "admin@example.com", "correct-horse", false).await;
    let cookies = cookies_from(&response);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body_json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let session_id = body_json["data"]["session_id"].as_i64().unwrap();

    let refused = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/sessions/{session_id}"))
                .header(header::COOKIE, &cookies)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(refused.status(), StatusCode::BAD_REQUEST);

    // The session is still live.
    let me = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .header(header::COOKIE, &cookies)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(me.status(), StatusCode::OK);
}

#[tokio::test]
async fn confirm_establishes_a_session_like_a_login() {
    let (app, _shared) = spawn_app().await;

    let registered = register_first_admin(&app).await;
    let body = registered.into_body().collect().await.unwrap().to_bytes();
    let body_json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let token = body_json["data"]["confirmation_token"].as_str().unwrap();

    let confirmed = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/confirm",
            serde_json::json!({ "token": token }),
        ))
        .await
        .unwrap();
    assert_eq!(confirmed.status(), StatusCode::OK);
    let cookies = cookies_from(&confirmed);

    let me = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .header(header::COOKIE, &cookies)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(me.status(), StatusCode::OK);
    let body = me.into_body().collect().await.unwrap().to_bytes();
    let body_json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body_json["data"]["confirmed"], true);

    // A token only redeems once.
    let again = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/auth/confirm",
            serde_json::json!({ "token": token }),
        ))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::BAD_REQUEST);
}
