//! Shift slot projections
//!
//! Joins the computed occurrences from the core engine against the bookings
//! table. Slots are never stored; a row appears only once booked.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use nightwatch_core::types::{BookingId, ScheduleId, UserId};
use nightwatch_core::{CronCache, occurrences_in_window};

use crate::error::ApiError;

/// Booking summary attached to admin slot listings
#[derive(Debug, Clone, Serialize)]
pub struct SlotBooking {
    pub booking_id: BookingId,
    pub user_id: UserId,
    pub user_name: String,
    pub buddy_name: Option<String>,
    pub checked_in_at: Option<DateTime<Utc>>,
}

/// One slot in a listing
#[derive(Debug, Clone, Serialize)]
pub struct SlotView {
    pub schedule_id: ScheduleId,
    pub schedule_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub timezone: String,
    pub is_booked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking: Option<SlotBooking>,
}

/// Per-schedule enumeration cap for admin listings
const ADMIN_SLOT_LIMIT: usize = 500;

/// Unbooked slots in `[from, to]`, time sorted, at most `limit`
pub async fn upcoming_available_slots(
    pool: &SqlitePool,
    cache: &CronCache,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<SlotView>, ApiError> {
    // Enumerate past the limit so that filtering booked slots out does not
    // starve the listing.
    let mut slots = enumerate_slots(pool, cache, from, to, limit.saturating_mul(2)).await?;
    slots.retain(|s| !s.is_booked);
    slots.truncate(limit);
    Ok(slots)
}

/// All slots in `[from, to]` including booked ones, with booking summaries
pub async fn admin_all_slots(
    pool: &SqlitePool,
    cache: &CronCache,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<SlotView>, ApiError> {
    enumerate_slots(pool, cache, from, to, ADMIN_SLOT_LIMIT).await
}

async fn enumerate_slots(
    pool: &SqlitePool,
    cache: &CronCache,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    per_schedule_limit: usize,
) -> Result<Vec<SlotView>, ApiError> {
    let schedules = super::schedules::list_schedules(pool).await?;

    let mut slots = Vec::new();
    for schedule in &schedules {
        let occurrences =
            match occurrences_in_window(schedule, cache, from, to, per_schedule_limit) {
                Ok(occurrences) => occurrences,
                Err(e) => {
                    // A stored schedule should always parse; skip rather than fail the listing
                    tracing::error!("Skipping unparsable schedule {}: {e}", schedule.id);
                    continue;
                }
            };

        for occurrence in occurrences {
            slots.push(SlotView {
                schedule_id: schedule.id,
                schedule_name: schedule.name.clone(),
                start_time: occurrence.start_time,
                end_time: occurrence.end_time,
                timezone: schedule.timezone.clone(),
                is_booked: false,
                booking: None,
            });
        }
    }

    let booked = booked_slots(pool, from, to).await?;
    for slot in &mut slots {
        if let Some(booking) = booked.get(&(slot.schedule_id.into(), slot.start_time)) {
            slot.is_booked = true;
            slot.booking = Some(booking.clone());
        }
    }

    // Equal start times tie-break by ascending schedule id
    slots.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| Uuid::from(a.schedule_id).cmp(&Uuid::from(b.schedule_id)))
    });

    Ok(slots)
}

#[derive(sqlx::FromRow)]
struct BookedRow {
    schedule_id: Uuid,
    shift_start: DateTime<Utc>,
    booking_id: BookingId,
    user_id: UserId,
    user_name: String,
    buddy_name: Option<String>,
    checked_in_at: Option<DateTime<Utc>>,
}

async fn booked_slots(
    pool: &SqlitePool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<HashMap<(Uuid, DateTime<Utc>), SlotBooking>, ApiError> {
    let rows = sqlx::query_as::<_, BookedRow>(
        r#"
        SELECT b.schedule_id, b.shift_start,
               b.id AS booking_id, b.user_id, u.name AS user_name,
               b.buddy_name, b.checked_in_at
        FROM bookings b
        JOIN users u ON u.id = b.user_id
        WHERE b.shift_start >= ? AND b.shift_start <= ?
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            (
                (row.schedule_id, row.shift_start),
                SlotBooking {
                    booking_id: row.booking_id,
                    user_id: row.user_id,
                    user_name: row.user_name,
                    buddy_name: row.buddy_name,
                    checked_in_at: row.checked_in_at,
                },
            )
        })
        .collect())
}
