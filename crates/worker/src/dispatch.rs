//! Outbox dispatcher
//!
//! Each tick requeues due `failed` rows, claims a bounded batch of pending
//! messages, pushes them through the sender capability and applies the
//! results in one transaction. At-least-once: a crash between claim and
//! result leaves rows in `sending`, which an operator can requeue; duplicates
//! are possible, lost messages are not.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use nightwatch_core::models::{OutboxKind, OutboxMessage};
use nightwatch_core::security::outbox_backoff;

use crate::db::{JobResult, WorkerDb};
use crate::sender::{Outbound, OutboundSender, SendOutcome};

pub struct Dispatcher {
    db: WorkerDb,
    sender: Arc<dyn OutboundSender>,
    batch_size: i64,
    max_retries: i64,
}

impl Dispatcher {
    pub fn new(
        db: WorkerDb,
        sender: Arc<dyn OutboundSender>,
        batch_size: i64,
        max_retries: i64,
    ) -> Self {
        Self {
            db,
            sender,
            batch_size,
            max_retries,
        }
    }

    /// Process one batch; returns how many messages were attempted
    pub async fn tick(&self, shutdown: &CancellationToken) -> Result<usize, sqlx::Error> {
        let now = Utc::now();
        self.db.requeue_failed(now).await?;

        let batch = self.db.claim_due(self.batch_size, now).await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut attempted = 0;
        let mut results = Vec::with_capacity(batch.len());
        for job in &batch {
            // Cancellation is honoured between messages, never mid-send
            if shutdown.is_cancelled() {
                results.push(JobResult::Released { id: job.id });
                continue;
            }
            attempted += 1;
            results.push(self.process(job).await);
        }
        self.db.apply_results(results).await?;

        Ok(attempted)
    }

    async fn process(&self, job: &OutboxMessage) -> JobResult {
        tracing::debug!(
            "Dispatching message {} (kind: {:?}, retry: {})",
            job.id,
            job.kind,
            job.retry_count
        );

        let outcome = match job.kind {
            OutboxKind::Sms => self.send_sms(job).await,
            OutboxKind::Push => self.send_push(job).await,
        };

        match outcome {
            SendOutcome::Delivered => {
                tracing::info!("Message {} delivered", job.id);
                JobResult::Sent { id: job.id }
            }
            SendOutcome::Transient(error) => {
                let retry_count = job.retry_count + 1;
                if retry_count <= self.max_retries {
                    let send_at = Utc::now() + outbox_backoff(retry_count);
                    tracing::warn!(
                        "Message {} failed transiently (attempt {retry_count}), retrying at {send_at}: {error}",
                        job.id
                    );
                    JobResult::Retry {
                        id: job.id,
                        retry_count,
                        send_at,
                        error,
                    }
                } else {
                    tracing::error!(
                        "Message {} exhausted {} retries: {error}",
                        job.id,
                        self.max_retries
                    );
                    JobResult::Dead { id: job.id, error }
                }
            }
            SendOutcome::Permanent(error) => {
                tracing::error!("Message {} failed permanently: {error}", job.id);
                JobResult::Dead { id: job.id, error }
            }
        }
    }

    async fn send_sms(&self, job: &OutboxMessage) -> SendOutcome {
        let Some(body) = job.payload["message"].as_str() else {
            return SendOutcome::Permanent("sms payload missing 'message'".to_string());
        };
        self.sender
            .send(Outbound::Sms {
                to: &job.recipient,
                body,
            })
            .await
    }

    /// Deliver a push message to every subscription of the recipient user
    ///
    /// Gone endpoints are pruned as they are discovered. A user without
    /// subscriptions counts as delivered; there is nothing left to do.
    async fn send_push(&self, job: &OutboxMessage) -> SendOutcome {
        let Ok(user_id) = Uuid::from_str(&job.recipient) else {
            return SendOutcome::Permanent(format!("bad push recipient '{}'", job.recipient));
        };

        let subscriptions = match self.db.subscriptions_for_user(user_id).await {
            Ok(subscriptions) => subscriptions,
            Err(e) => return SendOutcome::Transient(format!("subscription lookup failed: {e}")),
        };
        if subscriptions.is_empty() {
            tracing::debug!("Push for {} dropped, no subscriptions", job.recipient);
            return SendOutcome::Delivered;
        }

        let mut delivered = false;
        let mut transient: Option<String> = None;
        let mut permanent: Option<String> = None;

        for subscription in &subscriptions {
            match self
                .sender
                .send(Outbound::Push {
                    subscription,
                    payload: &job.payload,
                })
                .await
            {
                SendOutcome::Delivered => delivered = true,
                SendOutcome::Transient(e) => transient = Some(e),
                SendOutcome::Permanent(e) => {
                    if let Err(db_err) = self
                        .db
                        .delete_subscription_by_endpoint(&subscription.endpoint)
                        .await
                    {
                        tracing::error!(
                            "Failed to prune gone endpoint {}: {db_err}",
                            subscription.endpoint
                        );
                    } else {
                        tracing::info!("Pruned gone push endpoint {}", subscription.endpoint);
                    }
                    permanent = Some(e);
                }
            }
        }

        if let Some(error) = transient {
            SendOutcome::Transient(error)
        } else if delivered || permanent.is_none() {
            SendOutcome::Delivered
        } else {
            SendOutcome::Permanent(permanent.unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::test_support::{FlakySender, GoneSender};
    use chrono::{DateTime, Duration};
    use nightwatch_core::models::OutboxStatus;
    use nightwatch_core::types::MessageId;
    use sqlx::SqlitePool;
    use std::sync::atomic::Ordering;

    async fn seed_sms(pool: &SqlitePool) -> MessageId {
        let id = MessageId::new();
        sqlx::query(
            r#"
            INSERT INTO outbox_messages (id, kind, recipient, payload, status, retry_count, send_at, created_at)
            VALUES (?, 'sms', '+27821234567', '{"message":"patrol tonight"}', 'pending', 0, ?, ?)
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
        id
    }

    /// Pull a parked retry forward so the next tick picks it up
    async fn force_due(pool: &SqlitePool, id: MessageId) {
        sqlx::query("UPDATE outbox_messages SET send_at = ? WHERE id = ?")
            .bind(Utc::now() - Duration::seconds(1))
            .bind(id)
            .execute(pool)
            .await
            .unwrap();
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_transient_failures_then_success(pool: SqlitePool) {
        let db = WorkerDb::new(pool.clone());
        let sender = Arc::new(FlakySender::new(2));
        let dispatcher = Dispatcher::new(db, sender.clone(), 10, 3);
        let shutdown = CancellationToken::new();
        let id = seed_sms(&pool).await;

        // First attempt: transient failure, parked with backoff
        assert_eq!(dispatcher.tick(&shutdown).await.unwrap(), 1);
        let (status, retry_count): (OutboxStatus, i64) =
            sqlx::query_as("SELECT status, retry_count FROM outbox_messages WHERE id = ?")
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, OutboxStatus::Failed);
        assert_eq!(retry_count, 1);

        // Backoff in the future: nothing to do this tick
        assert_eq!(dispatcher.tick(&shutdown).await.unwrap(), 0);

        // Second attempt fails again
        force_due(&pool, id).await;
        assert_eq!(dispatcher.tick(&shutdown).await.unwrap(), 1);

        // Third attempt succeeds
        force_due(&pool, id).await;
        assert_eq!(dispatcher.tick(&shutdown).await.unwrap(), 1);

        let row: (OutboxStatus, i64, Option<String>, Option<DateTime<Utc>>) = sqlx::query_as(
            "SELECT status, retry_count, last_error, sent_at FROM outbox_messages WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(row.0, OutboxStatus::Sent);
        assert_eq!(row.1, 2);
        assert_eq!(row.2.as_deref(), Some("simulated gateway timeout"));
        assert!(row.3.is_some());
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_retries_exhaust_to_permanently_failed(pool: SqlitePool) {
        let db = WorkerDb::new(pool.clone());
        let dispatcher = Dispatcher::new(db, Arc::new(FlakySender::new(99)), 10, 3);
        let shutdown = CancellationToken::new();
        let id = seed_sms(&pool).await;

        for _ in 0..4 {
            force_due(&pool, id).await;
            dispatcher.tick(&shutdown).await.unwrap();
        }

        let status: OutboxStatus =
            sqlx::query_scalar("SELECT status FROM outbox_messages WHERE id = ?")
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, OutboxStatus::PermanentlyFailed);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_malformed_sms_payload_is_permanent(pool: SqlitePool) {
        let db = WorkerDb::new(pool.clone());
        let dispatcher = Dispatcher::new(db, Arc::new(FlakySender::new(0)), 10, 3);
        let shutdown = CancellationToken::new();

        let id = MessageId::new();
        sqlx::query(
            r#"
            INSERT INTO outbox_messages (id, kind, recipient, payload, status, retry_count, send_at, created_at)
            VALUES (?, 'sms', '+27821234567', '{"oops": true}', 'pending', 0, ?, ?)
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();

        dispatcher.tick(&shutdown).await.unwrap();

        let status: OutboxStatus =
            sqlx::query_scalar("SELECT status FROM outbox_messages WHERE id = ?")
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, OutboxStatus::PermanentlyFailed);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_gone_push_endpoint_is_pruned(pool: SqlitePool) {
        let db = WorkerDb::new(pool.clone());
        let dispatcher = Dispatcher::new(db, Arc::new(GoneSender), 10, 3);
        let shutdown = CancellationToken::new();

        let user_id = uuid::Uuid::new_v4();
        sqlx::query("INSERT INTO users (id, phone, name, role, created_at) VALUES (?, '+27821234567', 'T', 'owl', ?)")
            .bind(user_id)
            .bind(Utc::now())
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            r#"
            INSERT INTO push_subscriptions (id, user_id, endpoint, p256dh, auth, created_at)
            VALUES (?, ?, 'https://push.example/gone', 'k', 'a', ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(user_id)
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();

        let id = MessageId::new();
        sqlx::query(
            r#"
            INSERT INTO outbox_messages (id, user_id, kind, recipient, payload, status, retry_count, send_at, created_at)
            VALUES (?, ?, 'push', ?, '{"type":"broadcast","message":"hi"}', 'pending', 0, ?, ?)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(user_id.to_string())
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();

        dispatcher.tick(&shutdown).await.unwrap();

        let status: OutboxStatus =
            sqlx::query_scalar("SELECT status FROM outbox_messages WHERE id = ?")
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, OutboxStatus::PermanentlyFailed);

        let subscriptions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM push_subscriptions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(subscriptions, 0);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_cancelled_tick_releases_claims(pool: SqlitePool) {
        let db = WorkerDb::new(pool.clone());
        let dispatcher = Dispatcher::new(db, Arc::new(FlakySender::new(0)), 10, 3);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let id = seed_sms(&pool).await;
        assert_eq!(dispatcher.tick(&shutdown).await.unwrap(), 0);

        let status: OutboxStatus =
            sqlx::query_scalar("SELECT status FROM outbox_messages WHERE id = ?")
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, OutboxStatus::Pending);
    }
}
