//! Audit trail query surface

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nightwatch_core::models::AuditEvent;

use crate::AppState;
use crate::db::audit::{self, AuditFilter};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub actor: Option<Uuid>,
    pub target: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TypeStat {
    pub event_type: String,
    pub count: i64,
}

async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEvent>>, ApiError> {
    let events = audit::list_events(
        &state.pool,
        &AuditFilter {
            event_type: query.event_type,
            actor: query.actor,
            target: query.target,
            from: query.from,
            to: query.to,
            limit: query.limit.unwrap_or(100),
            offset: query.offset.unwrap_or(0),
        },
    )
    .await?;
    Ok(Json(events))
}

async fn type_stats(State(state): State<AppState>) -> Result<Json<Vec<TypeStat>>, ApiError> {
    let stats = audit::type_stats(&state.pool)
        .await?
        .into_iter()
        .map(|(event_type, count)| TypeStat { event_type, count })
        .collect();
    Ok(Json(stats))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/audit-events", get(list_events))
        .route("/audit-events/type-stats", get(type_stats))
}
