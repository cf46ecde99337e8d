//! Off-shift report endpoint

use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::AppState;
use crate::db::audit::AuditContext;
use crate::db::reports::{self, NewReport};
use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::middleware::client_meta::ClientMeta;

/// Report filed outside any shift
#[derive(Debug, Deserialize)]
pub struct OffShiftReportRequest {
    pub severity: i64,
    pub message: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub gps_accuracy: Option<f64>,
    pub gps_timestamp: Option<DateTime<Utc>>,
}

async fn off_shift_report(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(req): Json<OffShiftReportRequest>,
) -> Result<Response, ApiError> {
    let report = reports::create_report(
        &state.pool,
        auth.id,
        auth.is_admin(),
        NewReport {
            booking_id: None,
            severity: req.severity,
            message: req.message,
            latitude: req.latitude,
            longitude: req.longitude,
            gps_accuracy: req.gps_accuracy,
            gps_timestamp: req.gps_timestamp,
        },
        &AuditContext {
            actor: Some(auth.id),
            ip: meta.ip.clone(),
            user_agent: meta.user_agent.clone(),
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(report)).into_response())
}

/// Authenticated report routes
pub fn routes() -> Router<AppState> {
    Router::new().route("/reports/off-shift", post(off_shift_report))
}
