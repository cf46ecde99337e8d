//! Outbox producer side
//!
//! Every domain write that implies a message inserts its outbox row through
//! [`enqueue`] inside the same transaction. The worker crate owns the
//! consumer side.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Sqlite, Transaction};

use nightwatch_core::models::OutboxKind;
use nightwatch_core::types::{BookingId, MessageId, UserId};

use crate::error::ApiError;

/// A message to enqueue
#[derive(Debug, Clone)]
pub struct NewOutboxMessage {
    pub user_id: Option<UserId>,
    pub kind: OutboxKind,
    /// Phone number for SMS, user id for push
    pub recipient: String,
    pub payload: Value,
    /// Defaults to now
    pub send_at: Option<DateTime<Utc>>,
}

/// Insert an outbox row inside the caller's transaction
pub async fn enqueue(
    tx: &mut Transaction<'_, Sqlite>,
    message: NewOutboxMessage,
) -> Result<MessageId, ApiError> {
    let id = MessageId::new();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO outbox_messages (
            id, user_id, kind, recipient, payload,
            status, retry_count, send_at, created_at
        )
        VALUES (?, ?, ?, ?, ?, 'pending', 0, ?, ?)
        "#,
    )
    .bind(id)
    .bind(message.user_id)
    .bind(message.kind)
    .bind(&message.recipient)
    .bind(&message.payload)
    .bind(message.send_at.unwrap_or(now))
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(id)
}

/// Terminalise the pending reminders of a cancelled booking
///
/// Reminder rows stay in the table as `permanently_failed` so the audit trail
/// keeps showing what was scheduled.
pub async fn terminalize_booking_reminders(
    tx: &mut Transaction<'_, Sqlite>,
    booking_id: BookingId,
) -> Result<u64, ApiError> {
    let result = sqlx::query(
        r#"
        UPDATE outbox_messages
        SET status = 'permanently_failed',
            last_error = 'booking_cancelled'
        WHERE status = 'pending'
          AND json_extract(payload, '$.booking_id') = ?
        "#,
    )
    .bind(booking_id.to_string())
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}
