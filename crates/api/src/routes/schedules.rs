//! Public schedule and shift listing endpoints

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use nightwatch_core::models::Schedule;

use crate::AppState;
use crate::db::shifts::{self, SlotView};
use crate::db::schedules;
use crate::error::ApiError;

/// Query parameters for the available-slot listing
#[derive(Debug, Deserialize)]
pub struct AvailableSlotsQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

const DEFAULT_LOOKAHEAD_DAYS: i64 = 14;
const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 200;

/// List schedules currently in season
async fn list_schedules(State(state): State<AppState>) -> Result<Json<Vec<Schedule>>, ApiError> {
    let schedules = schedules::list_active_schedules(&state.pool, &state.cron_cache).await?;
    Ok(Json(schedules))
}

/// List unbooked upcoming slots
async fn available_slots(
    State(state): State<AppState>,
    Query(query): Query<AvailableSlotsQuery>,
) -> Result<Json<Vec<SlotView>>, ApiError> {
    let from = query.from.unwrap_or_else(Utc::now);
    let to = query
        .to
        .unwrap_or_else(|| from + Duration::days(DEFAULT_LOOKAHEAD_DAYS));
    if to < from {
        return Err(ApiError::field("to", "out_of_range", "to must not precede from"));
    }
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let slots =
        shifts::upcoming_available_slots(&state.pool, &state.cron_cache, from, to, limit).await?;
    Ok(Json(slots))
}

/// Public shift browsing routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/schedules", get(list_schedules))
        .route("/shifts/available", get(available_slots))
}
