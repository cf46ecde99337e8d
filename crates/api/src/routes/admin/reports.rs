//! Admin report moderation

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;

use nightwatch_core::models::Report;
use nightwatch_core::types::ReportId;

use crate::AppState;
use crate::db::audit::AuditContext;
use crate::db::reports;
use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::middleware::client_meta::ClientMeta;

#[derive(Debug, Deserialize)]
pub struct ListReportsQuery {
    #[serde(default)]
    pub include_archived: bool,
    pub severity: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateReportRequest {
    pub archived: bool,
}

async fn list_reports(
    State(state): State<AppState>,
    Query(query): Query<ListReportsQuery>,
) -> Result<Json<Vec<Report>>, ApiError> {
    let reports = reports::list_reports(
        &state.pool,
        query.include_archived,
        query.severity,
        query.limit.unwrap_or(100),
        query.offset.unwrap_or(0),
    )
    .await?;
    Ok(Json(reports))
}

async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<ReportId>,
) -> Result<Json<Report>, ApiError> {
    Ok(Json(reports::get_report(&state.pool, id).await?))
}

/// Archive or unarchive a report
async fn update_report(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<ReportId>,
    Json(req): Json<UpdateReportRequest>,
) -> Result<Json<Report>, ApiError> {
    let ctx = AuditContext {
        actor: Some(auth.id),
        ip: meta.ip.clone(),
        user_agent: meta.user_agent.clone(),
    };
    let report = reports::set_archived(&state.pool, id, req.archived, &ctx).await?;
    Ok(Json(report))
}

async fn delete_report(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<ReportId>,
) -> Result<StatusCode, ApiError> {
    let ctx = AuditContext {
        actor: Some(auth.id),
        ip: meta.ip.clone(),
        user_agent: meta.user_agent.clone(),
    };
    reports::delete_report(&state.pool, id, &ctx).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/reports", get(list_reports))
        .route(
            "/reports/{id}",
            get(get_report).put(update_report).delete(delete_report),
        )
}
