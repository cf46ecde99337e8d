//! Broadcast repository (producer side)
//!
//! Broadcasts are stored `pending` and fanned out into the outbox by the
//! worker's broadcast tick.

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::SqlitePool;

use nightwatch_core::models::{Audience, Broadcast};
use nightwatch_core::types::{BroadcastId, UserId};
use nightwatch_core::validation::{MAX_MESSAGE_LENGTH, validate_length};

use crate::db::audit::{AuditContext, NewAuditEvent};
use crate::error::ApiError;

/// Store a broadcast for later fan-out
pub async fn create_broadcast(
    pool: &SqlitePool,
    author_id: UserId,
    message: &str,
    audience: Audience,
    scheduled_for: Option<DateTime<Utc>>,
    ctx: &AuditContext,
) -> Result<Broadcast, ApiError> {
    validate_length("message", message, MAX_MESSAGE_LENGTH)
        .map_err(|msg| ApiError::field("message", "too_long", msg))?;
    if message.trim().is_empty() {
        return Err(ApiError::field("message", "required", "message must not be empty"));
    }

    let mut tx = pool.begin().await?;
    let broadcast = sqlx::query_as::<_, Broadcast>(
        r#"
        INSERT INTO broadcasts (id, author_id, message, audience, scheduled_for, status, created_at)
        VALUES (?, ?, ?, ?, ?, 'pending', ?)
        RETURNING *
        "#,
    )
    .bind(BroadcastId::new())
    .bind(author_id)
    .bind(message)
    .bind(audience)
    .bind(scheduled_for)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await?;

    super::audit::record(
        &mut *tx,
        ctx,
        NewAuditEvent::new("broadcast.created", "broadcast", "create")
            .entity_id(broadcast.id)
            .details(json!({
                "audience": audience,
                "scheduled_for": scheduled_for,
            })),
    )
    .await?;
    tx.commit().await?;

    Ok(broadcast)
}

/// Get broadcast by ID
pub async fn get_broadcast(pool: &SqlitePool, id: BroadcastId) -> Result<Broadcast, ApiError> {
    let broadcast = sqlx::query_as::<_, Broadcast>("SELECT * FROM broadcasts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Broadcast not found: {id}")))?;

    Ok(broadcast)
}

/// List broadcasts, newest first
pub async fn list_broadcasts(pool: &SqlitePool, limit: i64) -> Result<Vec<Broadcast>, ApiError> {
    let broadcasts = sqlx::query_as::<_, Broadcast>(
        "SELECT * FROM broadcasts ORDER BY created_at DESC LIMIT ?",
    )
    .bind(limit.clamp(1, 500))
    .fetch_all(pool)
    .await?;

    Ok(broadcasts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightwatch_core::models::{BroadcastStatus, Role};

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_create_and_list(pool: SqlitePool) {
        let admin = crate::db::users::create_user(&pool, "+27820000001", "Admin", Role::Admin)
            .await
            .unwrap();

        let broadcast = create_broadcast(
            &pool,
            admin.id,
            "Patrol starts at the clubhouse tonight",
            Audience::Owls,
            None,
            &AuditContext::system(),
        )
        .await
        .unwrap();

        assert_eq!(broadcast.status, BroadcastStatus::Pending);
        assert_eq!(broadcast.audience, Audience::Owls);

        let listed = list_broadcasts(&pool, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, broadcast.id);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_empty_message_rejected(pool: SqlitePool) {
        let admin = crate::db::users::create_user(&pool, "+27820000001", "Admin", Role::Admin)
            .await
            .unwrap();

        let err = create_broadcast(
            &pool,
            admin.id,
            "   ",
            Audience::All,
            None,
            &AuditContext::system(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation { .. }));
    }
}
