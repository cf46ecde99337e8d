//! Booking repository
//!
//! Creation relies on `UNIQUE(schedule_id, shift_start)` as the authority on
//! double booking; application checks are advisory. The booking row, its
//! confirmation SMS, the optional buddy notification and both shift reminders
//! commit in one transaction.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::SqlitePool;

use nightwatch_core::models::{Booking, OutboxKind, User};
use nightwatch_core::types::{BookingId, ScheduleId, UserId};
use nightwatch_core::{CronCache, DomainError, validate_occurrence};

use crate::db::audit::{AuditContext, NewAuditEvent};
use crate::db::outbox::{self, NewOutboxMessage};
use crate::error::ApiError;

/// Fields accepted when creating a booking
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub schedule_id: ScheduleId,
    pub start_time: DateTime<Utc>,
    pub buddy_phone: Option<String>,
    pub buddy_name: Option<String>,
}

/// Get booking by ID
pub async fn get_booking(pool: &SqlitePool, id: BookingId) -> Result<Booking, ApiError> {
    let booking = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Booking not found: {id}")))?;

    Ok(booking)
}

/// Create a booking for a validated occurrence
pub async fn create_booking(
    pool: &SqlitePool,
    cache: &CronCache,
    user: &User,
    req: NewBooking,
    ctx: &AuditContext,
) -> Result<Booking, ApiError> {
    let schedule = super::schedules::get_schedule(pool, req.schedule_id).await?;
    validate_occurrence(&schedule, cache, req.start_time)?;
    let shift_end = req.start_time + Duration::minutes(schedule.duration_minutes);

    // A buddy phone that matches a registered user links the accounts;
    // anything else stays as free text.
    let buddy_user = match req.buddy_phone.as_deref() {
        Some(phone) => super::users::find_by_phone(pool, phone).await?,
        None => None,
    };

    let id = BookingId::new();
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    let inserted = sqlx::query_as::<_, Booking>(
        r#"
        INSERT INTO bookings (
            id, user_id, schedule_id, shift_start, shift_end,
            buddy_user_id, buddy_name, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(user.id)
    .bind(schedule.id)
    .bind(req.start_time)
    .bind(shift_end)
    .bind(buddy_user.as_ref().map(|b| b.id))
    .bind(&req.buddy_name)
    .bind(now)
    .fetch_one(&mut *tx)
    .await;

    let booking = match inserted {
        Ok(booking) => booking,
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            return Err(DomainError::SlotTaken {
                schedule_id: schedule.id,
                start: req.start_time,
            }
            .into());
        }
        Err(e) => return Err(e.into()),
    };

    // Confirmation SMS to the booking user
    outbox::enqueue(
        &mut tx,
        NewOutboxMessage {
            user_id: Some(user.id),
            kind: OutboxKind::Sms,
            recipient: user.phone.clone(),
            payload: json!({
                "message": format!(
                    "Your {} shift on {} is booked. See you there!",
                    schedule.name,
                    req.start_time.format("%Y-%m-%d %H:%M UTC"),
                ),
                "booking_id": id,
            }),
            send_at: None,
        },
    )
    .await?;

    // Registered buddies get a push notification
    if let Some(buddy) = &buddy_user {
        outbox::enqueue(
            &mut tx,
            NewOutboxMessage {
                user_id: Some(buddy.id),
                kind: OutboxKind::Push,
                recipient: buddy.id.to_string(),
                payload: json!({
                    "type": "buddy_booked",
                    "booking_id": id,
                    "message": format!("{} booked you as a shift buddy", user.name),
                }),
                send_at: None,
            },
        )
        .await?;
    }

    // Shift reminders at T-24h and T-1h
    for hours in [24i64, 1] {
        outbox::enqueue(
            &mut tx,
            NewOutboxMessage {
                user_id: Some(user.id),
                kind: OutboxKind::Push,
                recipient: user.id.to_string(),
                payload: json!({
                    "type": "shift_reminder",
                    "hours": hours,
                    "booking_id": id,
                }),
                send_at: Some(req.start_time - Duration::hours(hours)),
            },
        )
        .await?;
    }

    super::audit::record(
        &mut *tx,
        ctx,
        NewAuditEvent::new("booking.created", "booking", "create")
            .entity_id(id)
            .details(json!({
                "schedule_id": schedule.id,
                "shift_start": req.start_time,
                "buddy_user_id": buddy_user.as_ref().map(|b| b.id),
                "buddy_name": req.buddy_name,
            })),
    )
    .await?;

    tx.commit().await?;

    Ok(booking)
}

/// Cancel a booking
///
/// Admins may cancel anything at any time; owners may cancel until
/// `cancellation_hours` before the shift. Pending reminders are terminalised
/// rather than deleted.
pub async fn cancel_booking(
    pool: &SqlitePool,
    actor_id: UserId,
    is_admin: bool,
    id: BookingId,
    cancellation_hours: i64,
    ctx: &AuditContext,
) -> Result<(), ApiError> {
    let booking = get_booking(pool, id).await?;

    if !is_admin {
        if booking.user_id != actor_id {
            return Err(ApiError::Forbidden);
        }
        let cutoff = booking.shift_start - Duration::hours(cancellation_hours);
        if Utc::now() > cutoff {
            return Err(DomainError::CancellationWindowPassed {
                hours: cancellation_hours,
            }
            .into());
        }
    }

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM bookings WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let cancelled = outbox::terminalize_booking_reminders(&mut tx, id).await?;

    super::audit::record(
        &mut *tx,
        ctx,
        NewAuditEvent::new("booking.cancelled", "booking", "delete")
            .entity_id(id)
            .target(booking.user_id)
            .details(json!({
                "schedule_id": booking.schedule_id,
                "shift_start": booking.shift_start,
                "reminders_cancelled": cancelled,
            })),
    )
    .await?;
    tx.commit().await?;

    Ok(())
}

/// Check in to a booking
///
/// Owner only, from `shift_start - grace` until `shift_end`.
pub async fn check_in(
    pool: &SqlitePool,
    actor_id: UserId,
    id: BookingId,
    grace_minutes: i64,
    gps: Option<serde_json::Value>,
    ctx: &AuditContext,
) -> Result<Booking, ApiError> {
    let booking = get_booking(pool, id).await?;
    if booking.user_id != actor_id {
        return Err(ApiError::Forbidden);
    }

    let now = Utc::now();
    let opens = booking.shift_start - Duration::minutes(grace_minutes);
    if now < opens || now > booking.shift_end {
        return Err(DomainError::OutsideCheckInWindow.into());
    }

    let mut tx = pool.begin().await?;
    let booking = sqlx::query_as::<_, Booking>(
        r#"
        UPDATE bookings SET checked_in_at = ? WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(now)
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    super::audit::record(
        &mut *tx,
        ctx,
        NewAuditEvent::new("booking.checked_in", "booking", "update")
            .entity_id(id)
            .details(json!({ "gps": gps })),
    )
    .await?;
    tx.commit().await?;

    Ok(booking)
}

/// Bookings of a user, optionally bounded to a window, ascending by start
pub async fn my_bookings(
    pool: &SqlitePool,
    user_id: UserId,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<Vec<Booking>, ApiError> {
    let bookings = sqlx::query_as::<_, Booking>(
        r#"
        SELECT * FROM bookings
        WHERE user_id = ?
          AND (? IS NULL OR shift_start >= ?)
          AND (? IS NULL OR shift_start <= ?)
        ORDER BY shift_start
        "#,
    )
    .bind(user_id)
    .bind(from)
    .bind(from)
    .bind(to)
    .bind(to)
    .fetch_all(pool)
    .await?;

    Ok(bookings)
}

/// Reassign a booking to another user (admin only)
pub async fn admin_reassign(
    pool: &SqlitePool,
    id: BookingId,
    new_user_id: UserId,
    ctx: &AuditContext,
) -> Result<Booking, ApiError> {
    let previous = get_booking(pool, id).await?;
    let new_user = super::users::get_user(pool, new_user_id).await?;

    let mut tx = pool.begin().await?;
    let booking = sqlx::query_as::<_, Booking>(
        r#"
        UPDATE bookings SET user_id = ? WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(new_user.id)
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    super::audit::record(
        &mut *tx,
        ctx,
        NewAuditEvent::new("booking.reassigned", "booking", "update")
            .entity_id(id)
            .target(new_user.id)
            .details(json!({
                "from_user_id": previous.user_id,
                "to_user_id": new_user.id,
            })),
    )
    .await?;
    tx.commit().await?;

    Ok(booking)
}

/// Count of upcoming bookings for the dashboard
pub async fn count_upcoming(pool: &SqlitePool) -> Result<i64, ApiError> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE shift_start > ?")
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;
    Ok(count)
}
