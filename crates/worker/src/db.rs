//! Database operations for the worker
//!
//! Claiming outbox rows, applying delivery results, broadcast fan-out and
//! the archival/cleanup sweeps.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use nightwatch_core::models::{Audience, Broadcast, OutboxMessage, PushSubscription};
use nightwatch_core::types::{MessageId, UserId};

/// Result of one delivery attempt
#[derive(Debug, Clone)]
pub enum JobResult {
    Sent {
        id: MessageId,
    },
    /// Transient failure with retries left; the row parks as `failed` until
    /// `send_at`, when the requeue step returns it to `pending`.
    Retry {
        id: MessageId,
        retry_count: i64,
        send_at: DateTime<Utc>,
        error: String,
    },
    Dead {
        id: MessageId,
        error: String,
    },
    /// Claimed but not attempted (shutdown); returns to `pending` untouched.
    Released {
        id: MessageId,
    },
}

/// Worker-side database handle
#[derive(Clone)]
pub struct WorkerDb {
    pool: SqlitePool,
}

impl WorkerDb {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Return `failed` rows whose backoff has elapsed to `pending`
    pub async fn requeue_failed(&self, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE outbox_messages SET status = 'pending' WHERE status = 'failed' AND send_at <= ?",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Claim a batch of due messages
    ///
    /// The pending -> sending flip is the serialisation point: a second tick
    /// cannot pick the same rows again.
    pub async fn claim_due(
        &self,
        batch_size: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>, sqlx::Error> {
        let messages = sqlx::query_as::<_, OutboxMessage>(
            r#"
            UPDATE outbox_messages
            SET status = 'sending'
            WHERE id IN (
                SELECT id FROM outbox_messages
                WHERE status = 'pending'
                  AND send_at <= ?
                ORDER BY send_at
                LIMIT ?
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    /// Apply a batch of delivery results in one transaction
    pub async fn apply_results(&self, results: Vec<JobResult>) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for result in results {
            match result {
                JobResult::Sent { id } => {
                    sqlx::query(
                        "UPDATE outbox_messages SET status = 'sent', sent_at = ? WHERE id = ?",
                    )
                    .bind(Utc::now())
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                }
                JobResult::Retry {
                    id,
                    retry_count,
                    send_at,
                    error,
                } => {
                    sqlx::query(
                        r#"
                        UPDATE outbox_messages
                        SET status = 'failed', retry_count = ?, send_at = ?, last_error = ?
                        WHERE id = ?
                        "#,
                    )
                    .bind(retry_count)
                    .bind(send_at)
                    .bind(&error)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                }
                JobResult::Dead { id, error } => {
                    sqlx::query(
                        r#"
                        UPDATE outbox_messages
                        SET status = 'permanently_failed', last_error = ?
                        WHERE id = ?
                        "#,
                    )
                    .bind(&error)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                }
                JobResult::Released { id } => {
                    sqlx::query("UPDATE outbox_messages SET status = 'pending' WHERE id = ?")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;

        Ok(())
    }

    /// Pending backlog depth, for the status log
    pub async fn count_pending(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM outbox_messages WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await
    }

    /// Push subscriptions of one user
    pub async fn subscriptions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<PushSubscription>, sqlx::Error> {
        sqlx::query_as::<_, PushSubscription>(
            "SELECT * FROM push_subscriptions WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Drop a subscription whose endpoint is gone
    pub async fn delete_subscription_by_endpoint(
        &self,
        endpoint: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM push_subscriptions WHERE endpoint = ?")
            .bind(endpoint)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Move due broadcasts to `processing` and return them
    pub async fn claim_due_broadcasts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Broadcast>, sqlx::Error> {
        sqlx::query_as::<_, Broadcast>(
            r#"
            UPDATE broadcasts
            SET status = 'processing'
            WHERE status = 'pending'
              AND (scheduled_for IS NULL OR scheduled_for <= ?)
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
    }

    /// Resolve an audience to distinct user ids
    pub async fn audience_user_ids(
        &self,
        audience: Audience,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserId>, sqlx::Error> {
        let ids = match audience {
            Audience::All => {
                sqlx::query_scalar::<_, UserId>("SELECT id FROM users")
                    .fetch_all(&self.pool)
                    .await?
            }
            Audience::Admins => {
                sqlx::query_scalar::<_, UserId>("SELECT id FROM users WHERE role = 'admin'")
                    .fetch_all(&self.pool)
                    .await?
            }
            Audience::Owls => {
                sqlx::query_scalar::<_, UserId>("SELECT id FROM users WHERE role = 'owl'")
                    .fetch_all(&self.pool)
                    .await?
            }
            Audience::Active => {
                sqlx::query_scalar::<_, UserId>(
                    r#"
                    SELECT DISTINCT user_id FROM bookings
                    WHERE shift_start >= ? AND shift_start <= ?
                    "#,
                )
                .bind(now)
                .bind(now + Duration::days(7))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(ids)
    }

    /// Fan a broadcast out into the outbox and mark it sent, atomically
    pub async fn fan_out_broadcast(
        &self,
        broadcast: &Broadcast,
        recipients: &[UserId],
    ) -> Result<u64, sqlx::Error> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for user_id in recipients {
            sqlx::query(
                r#"
                INSERT INTO outbox_messages (
                    id, user_id, kind, recipient, payload,
                    status, retry_count, send_at, created_at
                )
                VALUES (?, ?, 'push', ?, ?, 'pending', 0, ?, ?)
                "#,
            )
            .bind(MessageId::new())
            .bind(user_id)
            .bind(user_id.to_string())
            .bind(json!({
                "type": "broadcast",
                "message": broadcast.message,
                "broadcast_id": broadcast.id,
            }))
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE broadcasts SET status = 'sent' WHERE id = ?")
            .bind(broadcast.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(recipients.len() as u64)
    }

    /// Archive unarchived reports of one severity older than `cutoff`
    pub async fn archive_reports_older_than(
        &self,
        severity: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE reports
            SET archived = 1
            WHERE archived = 0 AND severity = ? AND created_at < ?
            "#,
        )
        .bind(severity)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Opportunistic cleanup of expired auth state
    ///
    /// Expired OTP codes go immediately; attempt counters only once they have
    /// been quiet for a day (the progressive lockout history must survive an
    /// expired lock); rate-limit windows once they are stale.
    pub async fn cleanup_auth_state(&self, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let mut removed = 0;

        let result = sqlx::query("DELETE FROM otp_codes WHERE expires_at < ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        removed += result.rows_affected();

        let quiet_cutoff = now - Duration::hours(24);
        let result = sqlx::query(
            r#"
            DELETE FROM otp_attempts
            WHERE last_attempt_at < ?
              AND (locked_until IS NULL OR locked_until < ?)
            "#,
        )
        .bind(quiet_cutoff)
        .bind(now)
        .execute(&self.pool)
        .await?;
        removed += result.rows_affected();

        let result = sqlx::query("DELETE FROM auth_rate_limits WHERE window_start < ?")
            .bind(now - Duration::hours(2))
            .execute(&self.pool)
            .await?;
        removed += result.rows_affected();

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightwatch_core::models::OutboxStatus;

    async fn seed_message(pool: &SqlitePool, send_at: DateTime<Utc>) -> MessageId {
        let id = MessageId::new();
        sqlx::query(
            r#"
            INSERT INTO outbox_messages (id, kind, recipient, payload, status, retry_count, send_at, created_at)
            VALUES (?, 'sms', '+27821234567', '{"message":"hi"}', 'pending', 0, ?, ?)
            "#,
        )
        .bind(id)
        .bind(send_at)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
        id
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_claim_marks_sending_and_skips_future(pool: SqlitePool) {
        let db = WorkerDb::new(pool.clone());
        let now = Utc::now();

        let due = seed_message(&pool, now - Duration::minutes(1)).await;
        seed_message(&pool, now + Duration::hours(1)).await;

        let claimed = db.claim_due(10, now).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, due);
        assert_eq!(claimed[0].status, OutboxStatus::Sending);

        // A second overlapping claim cannot pick the same row
        let claimed_again = db.claim_due(10, now).await.unwrap();
        assert!(claimed_again.is_empty());
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_retry_then_requeue_cycle(pool: SqlitePool) {
        let db = WorkerDb::new(pool.clone());
        let now = Utc::now();
        let id = seed_message(&pool, now).await;

        let claimed = db.claim_due(10, now).await.unwrap();
        assert_eq!(claimed.len(), 1);

        db.apply_results(vec![JobResult::Retry {
            id,
            retry_count: 1,
            send_at: now + Duration::minutes(1),
            error: "gateway timeout".to_string(),
        }])
        .await
        .unwrap();

        let status: OutboxStatus =
            sqlx::query_scalar("SELECT status FROM outbox_messages WHERE id = ?")
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, OutboxStatus::Failed);

        // Not yet due: requeue does nothing
        assert_eq!(db.requeue_failed(now).await.unwrap(), 0);

        // Once the backoff elapses the row returns to pending
        let later = now + Duration::minutes(2);
        assert_eq!(db.requeue_failed(later).await.unwrap(), 1);
        let claimed = db.claim_due(10, later).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].retry_count, 1);
        assert_eq!(claimed[0].last_error.as_deref(), Some("gateway timeout"));
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_released_rows_return_untouched(pool: SqlitePool) {
        let db = WorkerDb::new(pool.clone());
        let now = Utc::now();
        let id = seed_message(&pool, now).await;

        db.claim_due(10, now).await.unwrap();
        db.apply_results(vec![JobResult::Released { id }]).await.unwrap();

        let (status, retry_count): (OutboxStatus, i64) =
            sqlx::query_as("SELECT status, retry_count FROM outbox_messages WHERE id = ?")
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, OutboxStatus::Pending);
        assert_eq!(retry_count, 0);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_cleanup_auth_state(pool: SqlitePool) {
        let db = WorkerDb::new(pool.clone());
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO otp_codes (phone, code_hash, expires_at, created_at) VALUES ('+27821', 'x', ?, ?)",
        )
        .bind(now - Duration::minutes(1))
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();

        // Freshly locked attempts must survive
        sqlx::query(
            "INSERT INTO otp_attempts (phone, failed_count, locked_until, last_attempt_at) VALUES ('+27822', 3, ?, ?)",
        )
        .bind(now + Duration::minutes(30))
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();

        // Stale attempts go
        sqlx::query(
            "INSERT INTO otp_attempts (phone, failed_count, locked_until, last_attempt_at) VALUES ('+27823', 2, NULL, ?)",
        )
        .bind(now - Duration::hours(48))
        .execute(&pool)
        .await
        .unwrap();

        let removed = db.cleanup_auth_state(now).await.unwrap();
        assert_eq!(removed, 2);

        let locked_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM otp_attempts")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(locked_rows, 1);
    }
}
