//! Booking endpoints for authenticated volunteers

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use nightwatch_core::models::{Booking, Report};
use nightwatch_core::types::{BookingId, ScheduleId};

use crate::AppState;
use crate::db::audit::AuditContext;
use crate::db::bookings::{self, NewBooking};
use crate::db::reports::{self, NewReport};
use crate::db::users;
use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::middleware::client_meta::ClientMeta;

/// Create booking request
#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub schedule_id: ScheduleId,
    pub start_time: DateTime<Utc>,
    pub buddy_phone: Option<String>,
    pub buddy_name: Option<String>,
}

/// Optional GPS fix sent along with a check-in
#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
}

/// Report filed from a booking
#[derive(Debug, Deserialize)]
pub struct BookingReportRequest {
    pub severity: i64,
    pub message: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub gps_accuracy: Option<f64>,
    pub gps_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct MyBookingsQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

fn audit_ctx(user: &AuthUser, meta: &ClientMeta) -> AuditContext {
    AuditContext {
        actor: Some(user.id),
        ip: meta.ip.clone(),
        user_agent: meta.user_agent.clone(),
    }
}

/// Book a shift occurrence
async fn create_booking(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<Response, ApiError> {
    let user = users::get_user(&state.pool, auth.id).await?;

    let booking = bookings::create_booking(
        &state.pool,
        &state.cron_cache,
        &user,
        NewBooking {
            schedule_id: req.schedule_id,
            start_time: req.start_time,
            buddy_phone: req.buddy_phone,
            buddy_name: req.buddy_name,
        },
        &audit_ctx(&auth, &meta),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(booking)).into_response())
}

/// The caller's bookings
async fn my_bookings(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<MyBookingsQuery>,
) -> Result<Json<Vec<Booking>>, ApiError> {
    let bookings = bookings::my_bookings(&state.pool, auth.id, query.from, query.to).await?;
    Ok(Json(bookings))
}

/// Cancel a booking
async fn cancel_booking(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<BookingId>,
) -> Result<StatusCode, ApiError> {
    bookings::cancel_booking(
        &state.pool,
        auth.id,
        auth.is_admin(),
        id,
        state.config.cancellation_hours,
        &audit_ctx(&auth, &meta),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Check in to a booking
async fn check_in(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<BookingId>,
    Json(req): Json<CheckInRequest>,
) -> Result<Json<Booking>, ApiError> {
    let gps = req.latitude.map(|latitude| {
        json!({
            "latitude": latitude,
            "longitude": req.longitude,
            "accuracy": req.accuracy,
        })
    });

    let booking = bookings::check_in(
        &state.pool,
        auth.id,
        id,
        state.config.checkin_grace_minutes,
        gps,
        &audit_ctx(&auth, &meta),
    )
    .await?;

    Ok(Json(booking))
}

/// File a report against a booking
async fn booking_report(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<BookingId>,
    Json(req): Json<BookingReportRequest>,
) -> Result<Response, ApiError> {
    let report: Report = reports::create_report(
        &state.pool,
        auth.id,
        auth.is_admin(),
        NewReport {
            booking_id: Some(id),
            severity: req.severity,
            message: req.message,
            latitude: req.latitude,
            longitude: req.longitude,
            gps_accuracy: req.gps_accuracy,
            gps_timestamp: req.gps_timestamp,
        },
        &audit_ctx(&auth, &meta),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(report)).into_response())
}

/// Authenticated booking routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings/my", get(my_bookings))
        .route("/bookings/{id}", delete(cancel_booking))
        .route("/bookings/{id}/checkin", post(check_in))
        .route("/bookings/{id}/report", post(booking_report))
}
