//! Incident report repository

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::SqlitePool;

use nightwatch_core::models::Report;
use nightwatch_core::types::{BookingId, ReportId, UserId};
use nightwatch_core::validation::{MAX_MESSAGE_LENGTH, validate_length, validate_severity};

use crate::db::audit::{AuditContext, NewAuditEvent};
use crate::error::ApiError;

/// Fields accepted when filing a report
#[derive(Debug, Clone)]
pub struct NewReport {
    pub booking_id: Option<BookingId>,
    pub severity: i64,
    pub message: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub gps_accuracy: Option<f64>,
    pub gps_timestamp: Option<DateTime<Utc>>,
}

/// File a report
///
/// A report with a `booking_id` must belong to the author; admins bypass the
/// ownership check. Off-shift reports simply carry no booking.
pub async fn create_report(
    pool: &SqlitePool,
    author_id: UserId,
    is_admin: bool,
    report: NewReport,
    ctx: &AuditContext,
) -> Result<Report, ApiError> {
    validate_severity(report.severity)
        .map_err(|msg| ApiError::field("severity", "out_of_range", msg))?;
    validate_length("message", &report.message, MAX_MESSAGE_LENGTH)
        .map_err(|msg| ApiError::field("message", "too_long", msg))?;

    if let Some(booking_id) = report.booking_id {
        let booking = super::bookings::get_booking(pool, booking_id).await?;
        if !is_admin && booking.user_id != author_id {
            return Err(ApiError::Forbidden);
        }
    }

    let mut tx = pool.begin().await?;
    let created = sqlx::query_as::<_, Report>(
        r#"
        INSERT INTO reports (
            id, booking_id, user_id, severity, message,
            latitude, longitude, gps_accuracy, gps_timestamp, archived, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
        RETURNING *
        "#,
    )
    .bind(ReportId::new())
    .bind(report.booking_id)
    .bind(author_id)
    .bind(report.severity)
    .bind(&report.message)
    .bind(report.latitude)
    .bind(report.longitude)
    .bind(report.gps_accuracy)
    .bind(report.gps_timestamp)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await?;

    super::audit::record(
        &mut *tx,
        ctx,
        NewAuditEvent::new("report.created", "report", "create")
            .entity_id(created.id)
            .details(json!({
                "severity": created.severity,
                "booking_id": created.booking_id,
                "off_shift": created.booking_id.is_none(),
            })),
    )
    .await?;
    tx.commit().await?;

    Ok(created)
}

/// Get report by ID
pub async fn get_report(pool: &SqlitePool, id: ReportId) -> Result<Report, ApiError> {
    let report = sqlx::query_as::<_, Report>("SELECT * FROM reports WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Report not found: {id}")))?;

    Ok(report)
}

/// List reports, newest first
///
/// Archived reports are excluded unless asked for.
pub async fn list_reports(
    pool: &SqlitePool,
    include_archived: bool,
    severity: Option<i64>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Report>, ApiError> {
    let reports = sqlx::query_as::<_, Report>(
        r#"
        SELECT * FROM reports
        WHERE (? OR archived = 0)
          AND (? IS NULL OR severity = ?)
        ORDER BY created_at DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(include_archived)
    .bind(severity)
    .bind(severity)
    .bind(limit.clamp(1, 500))
    .bind(offset.max(0))
    .fetch_all(pool)
    .await?;

    Ok(reports)
}

/// Archive or unarchive a report (admin)
pub async fn set_archived(
    pool: &SqlitePool,
    id: ReportId,
    archived: bool,
    ctx: &AuditContext,
) -> Result<Report, ApiError> {
    let mut tx = pool.begin().await?;
    let report = sqlx::query_as::<_, Report>(
        "UPDATE reports SET archived = ? WHERE id = ? RETURNING *",
    )
    .bind(archived)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("Report not found: {id}")))?;

    let event_type = if archived {
        "report.archived"
    } else {
        "report.unarchived"
    };
    super::audit::record(
        &mut *tx,
        ctx,
        NewAuditEvent::new(event_type, "report", "update").entity_id(id),
    )
    .await?;
    tx.commit().await?;

    Ok(report)
}

/// Delete a report (admin)
pub async fn delete_report(
    pool: &SqlitePool,
    id: ReportId,
    ctx: &AuditContext,
) -> Result<(), ApiError> {
    let mut tx = pool.begin().await?;
    let result = sqlx::query("DELETE FROM reports WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("Report not found: {id}")));
    }

    super::audit::record(
        &mut *tx,
        ctx,
        NewAuditEvent::new("report.deleted", "report", "delete").entity_id(id),
    )
    .await?;
    tx.commit().await?;

    Ok(())
}

/// Count of unarchived reports for the dashboard
pub async fn count_unarchived(pool: &SqlitePool) -> Result<i64, ApiError> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM reports WHERE archived = 0")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
