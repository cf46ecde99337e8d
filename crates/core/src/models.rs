//! Core domain models for Nightwatch
//!
//! These models represent the core business entities and map to database tables.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{BookingId, BroadcastId, MessageId, ReportId, ScheduleId, UserId};

/// User role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Owl,
    Guest,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Owl => "owl",
            Role::Guest => "guest",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub phone: String, // E.164 (e.g. "+27821234567")
    pub name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Recurring shift schedule
///
/// `cron_expr` is a standard 5-field cron expression evaluated in `timezone`.
/// The optional `[start_date, end_date]` pair bounds the season in which the
/// schedule produces occurrences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct Schedule {
    pub id: ScheduleId,
    pub name: String,
    pub cron_expr: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub duration_minutes: i64,
    pub timezone: String, // IANA timezone (e.g. "Africa/Johannesburg")
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Booking entity
///
/// A booking materialises one shift occurrence. `UNIQUE(schedule_id, shift_start)`
/// in the schema is the double-booking guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct Booking {
    pub id: BookingId,
    pub user_id: UserId,
    pub schedule_id: ScheduleId,
    pub shift_start: DateTime<Utc>,
    pub shift_end: DateTime<Utc>,
    pub buddy_user_id: Option<UserId>,
    pub buddy_name: Option<String>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Incident report, optionally tied to a booking and a GPS fix
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct Report {
    pub id: ReportId,
    pub booking_id: Option<BookingId>,
    pub user_id: UserId,
    pub severity: i64, // 0 = info, 1 = suspicious, 2 = incident
    pub message: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub gps_accuracy: Option<f64>,
    pub gps_timestamp: Option<DateTime<Utc>>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

/// Outbox message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutboxKind {
    Sms,
    Push,
}

/// Outbox message status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Sending,
    Sent,
    Failed,
    PermanentlyFailed,
}

/// Outbox message for asynchronous delivery
///
/// Rows are written in the same transaction as the domain change that caused
/// them and reaped by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct OutboxMessage {
    pub id: MessageId,
    pub user_id: Option<UserId>,
    pub kind: OutboxKind,
    pub recipient: String, // phone for sms, user id for push
    #[sqlx(json)]
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retry_count: i64,
    pub send_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Web push subscription, one row per browser endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct PushSubscription {
    pub id: Uuid,
    pub user_id: UserId,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub user_agent: Option<String>,
    pub platform: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// OTP failure bookkeeping that drives progressive lockout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct OtpAttempt {
    pub phone: String,
    pub failed_count: i64,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_attempt_at: DateTime<Utc>,
}

/// Broadcast audience selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    All,
    Admins,
    Owls,
    Active,
}

/// Broadcast status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BroadcastStatus {
    Pending,
    Processing,
    Sent,
}

/// Broadcast message fanned out to an audience via the outbox
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct Broadcast {
    pub id: BroadcastId,
    pub author_id: UserId,
    pub message: String,
    pub audience: Audience,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub status: BroadcastStatus,
    pub created_at: DateTime<Utc>,
}

/// Audit log entry, insert-only
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct AuditEvent {
    pub id: Uuid,
    pub event_type: String, // "booking.created" | "user.login" | ...
    pub actor_user_id: Option<UserId>,
    pub target_user_id: Option<UserId>,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub action: String,
    #[sqlx(json)]
    pub details: serde_json::Value,
    pub ip: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

/// Emergency contact shown to volunteers on shift
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(sqlx::FromRow)]
pub struct EmergencyContact {
    pub id: Uuid,
    pub name: String,
    pub number: String,
    pub description: String,
    pub is_default: bool,
    pub display_order: i64,
}
