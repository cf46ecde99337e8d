//! Admin schedule management and the full slot roster

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;

use nightwatch_core::models::Schedule;
use nightwatch_core::types::ScheduleId;

use crate::AppState;
use crate::db::audit::{AuditContext, NewAuditEvent};
use crate::db::schedules::{self, ScheduleInput};
use crate::db::shifts::{self, SlotView};
use crate::db::audit;
use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::middleware::client_meta::ClientMeta;

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub name: String,
    pub cron_expr: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub duration_minutes: i64,
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AllSlotsQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ScheduleRequest {
    fn into_input(self, default_timezone: &str) -> ScheduleInput {
        ScheduleInput {
            name: self.name,
            cron_expr: self.cron_expr,
            start_date: self.start_date,
            end_date: self.end_date,
            duration_minutes: self.duration_minutes,
            timezone: self.timezone.unwrap_or_else(|| default_timezone.to_string()),
        }
    }
}

fn audit_ctx(auth: &AuthUser, meta: &ClientMeta) -> AuditContext {
    AuditContext {
        actor: Some(auth.id),
        ip: meta.ip.clone(),
        user_agent: meta.user_agent.clone(),
    }
}

async fn list_schedules(State(state): State<AppState>) -> Result<Json<Vec<Schedule>>, ApiError> {
    Ok(Json(schedules::list_schedules(&state.pool).await?))
}

async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<ScheduleId>,
) -> Result<Json<Schedule>, ApiError> {
    Ok(Json(schedules::get_schedule(&state.pool, id).await?))
}

async fn create_schedule(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(req): Json<ScheduleRequest>,
) -> Result<Response, ApiError> {
    let input = req.into_input(&state.config.default_timezone);
    let schedule = schedules::create_schedule(&state.pool, input).await?;

    audit::record(
        &state.pool,
        &audit_ctx(&auth, &meta),
        NewAuditEvent::new("schedule.created", "schedule", "create")
            .entity_id(schedule.id)
            .details(json!({"cron_expr": schedule.cron_expr, "timezone": schedule.timezone})),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(schedule)).into_response())
}

async fn update_schedule(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<ScheduleId>,
    Json(req): Json<ScheduleRequest>,
) -> Result<Json<Schedule>, ApiError> {
    let before = schedules::get_schedule(&state.pool, id).await?;
    let input = req.into_input(&state.config.default_timezone);
    let schedule = schedules::update_schedule(&state.pool, id, input).await?;

    audit::record(
        &state.pool,
        &audit_ctx(&auth, &meta),
        NewAuditEvent::new("schedule.updated", "schedule", "update")
            .entity_id(id)
            .details(json!({
                "before": {"cron_expr": before.cron_expr, "start_date": before.start_date, "end_date": before.end_date},
                "after": {"cron_expr": schedule.cron_expr, "start_date": schedule.start_date, "end_date": schedule.end_date},
            })),
    )
    .await?;

    Ok(Json(schedule))
}

async fn delete_schedule(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<ScheduleId>,
) -> Result<StatusCode, ApiError> {
    schedules::delete_schedule(&state.pool, id).await?;

    audit::record(
        &state.pool,
        &audit_ctx(&auth, &meta),
        NewAuditEvent::new("schedule.deleted", "schedule", "delete").entity_id(id),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Full roster including booked slots and who holds them
async fn all_slots(
    State(state): State<AppState>,
    Query(query): Query<AllSlotsQuery>,
) -> Result<Json<Vec<SlotView>>, ApiError> {
    let from = query.from.unwrap_or_else(Utc::now);
    let to = query.to.unwrap_or_else(|| from + Duration::days(14));
    if to < from {
        return Err(ApiError::field("to", "out_of_range", "to must not precede from"));
    }

    let slots = shifts::admin_all_slots(&state.pool, &state.cron_cache, from, to).await?;
    Ok(Json(slots))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/schedules", get(list_schedules).post(create_schedule))
        .route(
            "/schedules/{id}",
            get(get_schedule).put(update_schedule).delete(delete_schedule),
        )
        .route("/shifts", get(all_slots))
}
