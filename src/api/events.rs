//! Audit trail surface: recent events for the admin console plus a live SSE
//! feed off the event bus.

use axum::{
    Json,
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::warn;

use super::{ApiError, ApiResponse, AppState, actor::CurrentActor, types::AuditEventDto};
use crate::authz::{Action, Resource};

#[derive(Deserialize)]
pub struct AuditQuery {
    pub limit: Option<u64>,
    pub category: Option<String>,
}

/// GET /audit
pub async fn list_audit_events(
    State(state): State<Arc<AppState>>,
    actor: CurrentActor,
    Query(query): Query<AuditQuery>,
) -> Result<Json<ApiResponse<Vec<AuditEventDto>>>, ApiError> {
    state.authorize(&actor.policy_actor(), &Resource::AuditLog, Action::List)?;

    let limit = query.limit.unwrap_or(100).min(1000);
    let events = state
        .shared
        .store
        .list_audit_events(limit, query.category)
        .await?;

    Ok(Json(ApiResponse::success(
        events.into_iter().map(AuditEventDto::from).collect(),
    )))
}

/// GET /audit/stream (SSE)
pub async fn audit_stream(
    State(state): State<Arc<AppState>>,
    actor: CurrentActor,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    state.authorize(&actor.policy_actor(), &Resource::AuditLog, Action::Show)?;

    let rx = state.shared.event_bus.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(event) => {
                let json = serde_json::to_string(&event).unwrap_or_default();
                Some((Ok(Event::default().data(json)), rx))
            }
            Err(broadcast::error::RecvError::Lagged(count)) => {
                warn!("Audit stream client lagged by {} messages", count);

                Some((
                    Ok(Event::default().event("warning").data("Missed some events")),
                    rx,
                ))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
