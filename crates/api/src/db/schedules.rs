//! Schedule repository
//!
//! Cron expressions and timezones are validated here, at mutation time, so
//! list paths never meet an unparsable schedule.

use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;

use nightwatch_core::models::Schedule;
use nightwatch_core::types::ScheduleId;
use nightwatch_core::{CronCache, shifts, validate_cron_expr, validate_timezone};

use crate::error::ApiError;

/// Fields accepted when creating or replacing a schedule
#[derive(Debug, Clone)]
pub struct ScheduleInput {
    pub name: String,
    pub cron_expr: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub duration_minutes: i64,
    pub timezone: String,
}

fn validate_input(input: &ScheduleInput) -> Result<(), ApiError> {
    if input.name.trim().is_empty() {
        return Err(ApiError::field("name", "required", "name must not be empty"));
    }
    validate_cron_expr(&input.cron_expr)?;
    validate_timezone(&input.timezone)?;
    if input.duration_minutes <= 0 {
        return Err(ApiError::field(
            "duration_minutes",
            "out_of_range",
            "duration_minutes must be positive",
        ));
    }
    if let (Some(start), Some(end)) = (input.start_date, input.end_date)
        && start > end
    {
        return Err(ApiError::field(
            "end_date",
            "out_of_range",
            "end_date must not precede start_date",
        ));
    }
    Ok(())
}

/// Get schedule by ID
pub async fn get_schedule(pool: &SqlitePool, id: ScheduleId) -> Result<Schedule, ApiError> {
    let schedule = sqlx::query_as::<_, Schedule>("SELECT * FROM schedules WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Schedule not found: {id}")))?;

    Ok(schedule)
}

/// List every schedule
pub async fn list_schedules(pool: &SqlitePool) -> Result<Vec<Schedule>, ApiError> {
    let schedules = sqlx::query_as::<_, Schedule>("SELECT * FROM schedules ORDER BY name")
        .fetch_all(pool)
        .await?;

    Ok(schedules)
}

/// List schedules whose seasonal window contains now
pub async fn list_active_schedules(
    pool: &SqlitePool,
    cache: &CronCache,
) -> Result<Vec<Schedule>, ApiError> {
    let now = Utc::now();
    let mut active = Vec::new();
    for schedule in list_schedules(pool).await? {
        match shifts::schedule_active_at(&schedule, cache, now) {
            Ok(true) => active.push(schedule),
            Ok(false) => {}
            Err(e) => {
                // A stored schedule should always parse; skip rather than fail the listing
                tracing::error!("Skipping unparsable schedule {}: {e}", schedule.id);
            }
        }
    }

    Ok(active)
}

/// Create a new schedule
pub async fn create_schedule(
    pool: &SqlitePool,
    input: ScheduleInput,
) -> Result<Schedule, ApiError> {
    validate_input(&input)?;
    let now = Utc::now();

    let schedule = sqlx::query_as::<_, Schedule>(
        r#"
        INSERT INTO schedules (
            id, name, cron_expr, start_date, end_date,
            duration_minutes, timezone, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(ScheduleId::new())
    .bind(&input.name)
    .bind(&input.cron_expr)
    .bind(input.start_date)
    .bind(input.end_date)
    .bind(input.duration_minutes)
    .bind(&input.timezone)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(schedule)
}

/// Replace a schedule's definition
///
/// Existing bookings are never invalidated by a window change; new
/// occurrences simply stop appearing outside the new window.
pub async fn update_schedule(
    pool: &SqlitePool,
    id: ScheduleId,
    input: ScheduleInput,
) -> Result<Schedule, ApiError> {
    validate_input(&input)?;

    let schedule = sqlx::query_as::<_, Schedule>(
        r#"
        UPDATE schedules
        SET name = ?, cron_expr = ?, start_date = ?, end_date = ?,
            duration_minutes = ?, timezone = ?, updated_at = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(&input.name)
    .bind(&input.cron_expr)
    .bind(input.start_date)
    .bind(input.end_date)
    .bind(input.duration_minutes)
    .bind(&input.timezone)
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("Schedule not found: {id}")))?;

    Ok(schedule)
}

/// Delete a schedule (bookings cascade)
pub async fn delete_schedule(pool: &SqlitePool, id: ScheduleId) -> Result<(), ApiError> {
    let result = sqlx::query("DELETE FROM schedules WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("Schedule not found: {id}")));
    }

    Ok(())
}
