use axum::{
    Json,
    Router,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};

use time;

use crate::authz::{Action, PolicyActor, Resource};
use crate::config::Config;
use crate::domain::events::AuditEvent;
use crate::state::SharedState;

pub mod actor;
pub mod auth;
mod error;
pub mod events;
mod observability;
pub mod sessions;
mod types;
pub mod users;

pub use actor::CurrentActor;
pub use error::ApiError;
pub use types::*;

use metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,

    pub start_time: std::time::Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

impl AppState {
    #[must_use]
    pub fn store(&self) -> &crate::db::Store {
        &self.shared.store
    }

    /// The single enforcement funnel: evaluates the registry, records the
    /// denial for the audit collaborator, and hands back the uniform
    /// Forbidden error. Callers just `?` it.
    pub fn authorize(
        &self,
        actor: &PolicyActor,
        resource: &Resource<'_>,
        action: Action,
    ) -> Result<(), ApiError> {
        self.shared
            .policy
            .authorize(actor, resource, action)
            .map_err(|denial| {
                tracing::warn!(
                    actor = %denial.actor,
                    resource = denial.resource,
                    action = %denial.action,
                    "Authorization denied"
                );
                let _ = self.shared.event_bus.send(AuditEvent::AuthorizationDenied {
                    actor: denial.actor,
                    resource: denial.resource.to_string(),
                    action: denial.action.to_string(),
                });
                ApiError::Forbidden
            })
    }
}

pub async fn create_app_state(
    shared: Arc<SharedState>,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    Ok(Arc::new(AppState {
        shared,
        start_time: std::time::Instant::now(),
        prometheus_handle,
    }))
}

pub async fn create_app_state_from_config(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let shared = Arc::new(SharedState::new(config).await?);
    create_app_state(shared, prometheus_handle).await
}

pub async fn router(state: Arc<AppState>) -> Router {
    let (cors_origins, session_cookie_name, secure_cookies) = {
        let config = state.shared.config.read().await;
        (
            config.server.cors_allowed_origins.clone(),
            config.security.session_cookie_name.clone(),
            config.server.secure_cookies,
        )
    };

    let protected_routes = create_protected_router(state.clone());

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_name(session_cookie_name)
        .with_secure(secure_cookies)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(60)));

    let api_router = Router::new()
        .merge(protected_routes)
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/register", post(auth::register))
        .route("/auth/confirm", post(auth::confirm))
        .layer(session_layer)
        .with_state(state.clone());

    let cors_layer = if cors_origins.contains(&"*".to_string()) {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .nest("/api", api_router)
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(observability::logging_middleware))
        .layer(middleware::from_fn(observability::security_headers_middleware))
        .layer(middleware::from_fn(forbidden_negotiation))
}

fn create_protected_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/me", get(auth::get_current_user))
        .route("/auth/password", put(auth::change_password))
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/{id}", delete(sessions::terminate_session))
        .route(
            "/sessions/terminate-others",
            post(sessions::terminate_others),
        )
        .route("/users", get(users::list_users))
        .route("/users", post(users::create_user))
        .route("/users/{id}", get(users::get_user))
        .route("/users/{id}", put(users::update_user))
        .route("/users/{id}", delete(users::delete_user))
        .route("/users/{id}/roles", post(users::assign_role))
        .route("/users/{id}/roles", delete(users::remove_role))
        .route("/users/{id}/unlock", post(users::unlock_user))
        .route("/audit", get(events::list_audit_events))
        .route("/audit/stream", get(events::audit_stream))
        .route("/system/status", get(system_status))
        .route("/metrics", get(observability::get_metrics))
        .route_layer(middleware::from_fn_with_state(state, auth::auth_middleware))
}

#[derive(Serialize)]
struct SystemStatus {
    version: &'static str,
    uptime_seconds: u64,
    database: &'static str,
}

async fn system_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<SystemStatus>>, ApiError> {
    let database = match state.store().ping().await {
        Ok(()) => "ok",
        Err(_) => "unreachable",
    };

    Ok(Json(ApiResponse::success(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        database,
    })))
}

/// Outermost catch for policy denials: machine clients keep the JSON body,
/// page-rendering clients get a minimal HTML page. Same status either way,
/// and neither representation names the rule that failed.
async fn forbidden_negotiation(request: Request, next: Next) -> Response {
    let wants_html = request
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/html"));

    let response = next.run(request).await;

    if response.status() == StatusCode::FORBIDDEN && wants_html {
        return (
            StatusCode::FORBIDDEN,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            "<!doctype html><title>Forbidden</title><h1>403 Forbidden</h1>",
        )
            .into_response();
    }

    response
}
