//! Admin endpoints, mounted under /api/admin behind the admin guard

mod audit;
mod broadcasts;
mod contacts;
mod reports;
mod schedules;
mod users;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::AppState;
use crate::db;
use crate::error::ApiError;

/// Dashboard aggregates
#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub users: i64,
    pub upcoming_bookings: i64,
    pub pending_outbox: i64,
    pub open_reports: i64,
}

async fn stats(State(state): State<AppState>) -> Result<Json<DashboardStats>, ApiError> {
    let pending_outbox: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM outbox_messages WHERE status = 'pending'")
            .fetch_one(&state.pool)
            .await?;

    Ok(Json(DashboardStats {
        users: db::users::count_users(&state.pool).await?,
        upcoming_bookings: db::bookings::count_upcoming(&state.pool).await?,
        pending_outbox,
        open_reports: db::reports::count_unarchived(&state.pool).await?,
    }))
}

/// Admin routes, to be nested under /api/admin
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(users::routes())
        .merge(schedules::routes())
        .merge(reports::routes())
        .merge(broadcasts::routes())
        .merge(contacts::routes())
        .merge(audit::routes())
        .route("/stats", get(stats))
}
