//! Web push subscription repository

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use nightwatch_core::models::PushSubscription;
use nightwatch_core::types::UserId;

use crate::error::ApiError;

/// Fields accepted when subscribing
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub user_agent: Option<String>,
    pub platform: Option<String>,
}

/// Upsert a subscription by endpoint
///
/// Re-subscribing from the same browser replaces the keys and may move the
/// endpoint to another user after a device handover.
pub async fn upsert_subscription(
    pool: &SqlitePool,
    user_id: UserId,
    sub: NewSubscription,
) -> Result<PushSubscription, ApiError> {
    let subscription = sqlx::query_as::<_, PushSubscription>(
        r#"
        INSERT INTO push_subscriptions (
            id, user_id, endpoint, p256dh, auth, user_agent, platform, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (endpoint) DO UPDATE SET
            user_id = excluded.user_id,
            p256dh = excluded.p256dh,
            auth = excluded.auth,
            user_agent = excluded.user_agent,
            platform = excluded.platform
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(&sub.endpoint)
    .bind(&sub.p256dh)
    .bind(&sub.auth)
    .bind(&sub.user_agent)
    .bind(&sub.platform)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(subscription)
}

/// Delete a subscription by endpoint, scoped to its owner
pub async fn delete_subscription(
    pool: &SqlitePool,
    user_id: UserId,
    endpoint: &str,
) -> Result<(), ApiError> {
    let result = sqlx::query("DELETE FROM push_subscriptions WHERE user_id = ? AND endpoint = ?")
        .bind(user_id)
        .bind(endpoint)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("Subscription not found".to_string()));
    }

    Ok(())
}

/// All subscriptions of a user
pub async fn list_for_user(
    pool: &SqlitePool,
    user_id: UserId,
) -> Result<Vec<PushSubscription>, ApiError> {
    let subscriptions = sqlx::query_as::<_, PushSubscription>(
        "SELECT * FROM push_subscriptions WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(subscriptions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightwatch_core::models::Role;

    fn sub(endpoint: &str) -> NewSubscription {
        NewSubscription {
            endpoint: endpoint.to_string(),
            p256dh: "BPubKey".to_string(),
            auth: "authsecret".to_string(),
            user_agent: Some("Firefox".to_string()),
            platform: Some("android".to_string()),
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_upsert_replaces_by_endpoint(pool: SqlitePool) {
        let user = crate::db::users::create_user(&pool, "+27821234567", "Thandi", Role::Owl)
            .await
            .unwrap();

        upsert_subscription(&pool, user.id, sub("https://push.example/one"))
            .await
            .unwrap();
        let mut replacement = sub("https://push.example/one");
        replacement.p256dh = "BNewKey".to_string();
        upsert_subscription(&pool, user.id, replacement).await.unwrap();

        let subs = list_for_user(&pool, user.id).await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].p256dh, "BNewKey");
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_delete_is_owner_scoped(pool: SqlitePool) {
        let owner = crate::db::users::create_user(&pool, "+27821234567", "Thandi", Role::Owl)
            .await
            .unwrap();
        let other = crate::db::users::create_user(&pool, "+27829876543", "Sipho", Role::Owl)
            .await
            .unwrap();

        upsert_subscription(&pool, owner.id, sub("https://push.example/one"))
            .await
            .unwrap();

        let err = delete_subscription(&pool, other.id, "https://push.example/one")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        delete_subscription(&pool, owner.id, "https://push.example/one")
            .await
            .unwrap();
        assert!(list_for_user(&pool, owner.id).await.unwrap().is_empty());
    }
}
