//! Error types for Nightwatch core domain logic

use crate::types::{BookingId, ReportId, ScheduleId, UserId};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Core domain errors
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Schedule not found: {0}")]
    ScheduleNotFound(ScheduleId),

    #[error("Booking not found: {0}")]
    BookingNotFound(BookingId),

    #[error("Report not found: {0}")]
    ReportNotFound(ReportId),

    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("{start} is not an occurrence of schedule {schedule_id}")]
    InvalidOccurrence {
        schedule_id: ScheduleId,
        start: DateTime<Utc>,
    },

    #[error("Slot {start} of schedule {schedule_id} is already booked")]
    SlotTaken {
        schedule_id: ScheduleId,
        start: DateTime<Utc>,
    },

    #[error("Bookings can no longer be cancelled within {hours}h of the shift")]
    CancellationWindowPassed { hours: i64 },

    #[error("Check-in is only allowed around the shift window")]
    OutsideCheckInWindow,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Session token rejected")]
    InvalidSessionToken,

    #[error("Failed to sign session token: {0}")]
    TokenEncoding(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for domain operations
pub type DomainResult<T> = Result<T, DomainError>;
