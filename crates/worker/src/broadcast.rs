//! Broadcast fan-out
//!
//! Moves due broadcasts through `pending -> processing -> sent`, inserting
//! exactly one push outbox row per audience member in a single transaction.

use chrono::Utc;

use crate::db::WorkerDb;

/// Process every due broadcast; returns the number processed
pub async fn process_due_broadcasts(db: &WorkerDb) -> Result<usize, sqlx::Error> {
    let now = Utc::now();
    let broadcasts = db.claim_due_broadcasts(now).await?;

    for broadcast in &broadcasts {
        let recipients = db.audience_user_ids(broadcast.audience, now).await?;
        let fanned_out = db.fan_out_broadcast(broadcast, &recipients).await?;
        tracing::info!(
            "Broadcast {} fanned out to {fanned_out} recipient(s) ({:?})",
            broadcast.id,
            broadcast.audience
        );
    }

    Ok(broadcasts.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use nightwatch_core::models::{Audience, BroadcastStatus};
    use nightwatch_core::types::{BroadcastId, UserId};
    use sqlx::SqlitePool;
    use uuid::Uuid;

    async fn seed_user(pool: &SqlitePool, phone: &str, role: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO users (id, phone, name, role, created_at) VALUES (?, ?, ?, ?, ?)")
            .bind(id)
            .bind(phone)
            .bind("User")
            .bind(role)
            .bind(Utc::now())
            .execute(pool)
            .await
            .unwrap();
        id
    }

    async fn seed_broadcast(
        pool: &SqlitePool,
        author: Uuid,
        audience: &str,
        scheduled_for: Option<chrono::DateTime<Utc>>,
    ) -> BroadcastId {
        let id = BroadcastId::new();
        sqlx::query(
            r#"
            INSERT INTO broadcasts (id, author_id, message, audience, scheduled_for, status, created_at)
            VALUES (?, ?, 'Patrol briefing at 19:00', ?, ?, 'pending', ?)
            "#,
        )
        .bind(id)
        .bind(author)
        .bind(audience)
        .bind(scheduled_for)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
        id
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_fan_out_matches_audience_exactly(pool: SqlitePool) {
        let db = WorkerDb::new(pool.clone());
        let admin = seed_user(&pool, "+27820000001", "admin").await;
        seed_user(&pool, "+27820000002", "owl").await;
        seed_user(&pool, "+27820000003", "owl").await;
        seed_user(&pool, "+27820000004", "guest").await;

        let id = seed_broadcast(&pool, admin, "owls", None).await;
        assert_eq!(process_due_broadcasts(&db).await.unwrap(), 1);

        // Exactly |owls| rows, no duplicates
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT recipient FROM outbox_messages WHERE kind = 'push' ORDER BY recipient",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_ne!(rows[0], rows[1]);

        let status: BroadcastStatus = sqlx::query_scalar("SELECT status FROM broadcasts WHERE id = ?")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status, BroadcastStatus::Sent);

        // A second tick finds nothing
        assert_eq!(process_due_broadcasts(&db).await.unwrap(), 0);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_scheduled_broadcast_waits(pool: SqlitePool) {
        let db = WorkerDb::new(pool.clone());
        let admin = seed_user(&pool, "+27820000001", "admin").await;
        seed_broadcast(&pool, admin, "all", Some(Utc::now() + Duration::hours(1))).await;

        assert_eq!(process_due_broadcasts(&db).await.unwrap(), 0);
        let outbox: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox_messages")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(outbox, 0);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_active_audience_is_distinct_upcoming_bookers(pool: SqlitePool) {
        let db = WorkerDb::new(pool.clone());
        let admin = seed_user(&pool, "+27820000001", "admin").await;
        let active = seed_user(&pool, "+27820000002", "owl").await;
        seed_user(&pool, "+27820000003", "owl").await;

        let schedule_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO schedules (id, name, cron_expr, duration_minutes, timezone, created_at, updated_at)
            VALUES (?, 'Patrol', '0 18 * * 5', 120, 'UTC', ?, ?)
            "#,
        )
        .bind(schedule_id)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();

        // Two upcoming bookings for the same user still mean one message
        for days in [2, 4] {
            let start = Utc::now() + Duration::days(days);
            sqlx::query(
                r#"
                INSERT INTO bookings (id, user_id, schedule_id, shift_start, shift_end, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(active)
            .bind(schedule_id)
            .bind(start)
            .bind(start + Duration::hours(2))
            .bind(Utc::now())
            .execute(&pool)
            .await
            .unwrap();
        }

        let recipients = db
            .audience_user_ids(Audience::Active, Utc::now())
            .await
            .unwrap();
        assert_eq!(recipients, vec![UserId(active)]);

        seed_broadcast(&pool, admin, "active", None).await;
        process_due_broadcasts(&db).await.unwrap();

        let outbox: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox_messages")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(outbox, 1);
    }
}
