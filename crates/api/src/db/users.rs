//! User repository

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};

use nightwatch_core::models::{Role, User};
use nightwatch_core::types::UserId;

use crate::error::ApiError;

/// Get user by ID
pub async fn get_user(pool: &SqlitePool, user_id: UserId) -> Result<User, ApiError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User not found: {user_id}")))?;

    Ok(user)
}

/// Find user by phone number
pub async fn find_by_phone(pool: &SqlitePool, phone: &str) -> Result<Option<User>, ApiError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE phone = ?")
        .bind(phone)
        .fetch_optional(pool)
        .await?;

    Ok(user)
}

/// Get or create a user by phone (within a transaction)
///
/// First OTP request creates the account with the default `owl` role.
/// Returns the user and whether it was created.
pub async fn get_or_create_by_phone(
    tx: &mut Transaction<'_, Sqlite>,
    phone: &str,
    name: Option<&str>,
) -> Result<(User, bool), ApiError> {
    let existing = sqlx::query_as::<_, User>("SELECT * FROM users WHERE phone = ?")
        .bind(phone)
        .fetch_optional(&mut **tx)
        .await?;

    if let Some(user) = existing {
        return Ok((user, false));
    }

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, phone, name, role, created_at)
        VALUES (?, ?, ?, 'owl', ?)
        RETURNING *
        "#,
    )
    .bind(UserId::new())
    .bind(phone)
    .bind(name.unwrap_or(""))
    .bind(Utc::now())
    .fetch_one(&mut **tx)
    .await?;

    Ok((user, true))
}

/// Create a user with an explicit role (admin path)
pub async fn create_user(
    pool: &SqlitePool,
    phone: &str,
    name: &str,
    role: Role,
) -> Result<User, ApiError> {
    let result = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, phone, name, role, created_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(UserId::new())
    .bind(phone)
    .bind(name)
    .bind(role)
    .bind(Utc::now())
    .fetch_one(pool)
    .await;

    match result {
        Ok(user) => Ok(user),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
            ApiError::Conflict(format!("A user with phone {phone} already exists")),
        ),
        Err(e) => Err(e.into()),
    }
}

/// Update name, phone and role of a user
pub async fn update_user(
    pool: &SqlitePool,
    user_id: UserId,
    name: Option<&str>,
    phone: Option<&str>,
    role: Option<Role>,
) -> Result<User, ApiError> {
    let current = get_user(pool, user_id).await?;

    let result = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET name = ?, phone = ?, role = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(name.unwrap_or(&current.name))
    .bind(phone.unwrap_or(&current.phone))
    .bind(role.unwrap_or(current.role))
    .bind(user_id)
    .fetch_one(pool)
    .await;

    match result {
        Ok(user) => Ok(user),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
            ApiError::Conflict("Another user already has that phone number".to_string()),
        ),
        Err(e) => Err(e.into()),
    }
}

/// List users, optionally filtered by a name/phone substring
pub async fn list_users(pool: &SqlitePool, search: Option<&str>) -> Result<Vec<User>, ApiError> {
    let users = match search {
        Some(term) => {
            let pattern = format!("%{term}%");
            sqlx::query_as::<_, User>(
                r#"
                SELECT * FROM users
                WHERE name LIKE ? OR phone LIKE ?
                ORDER BY created_at
                "#,
            )
            .bind(&pattern)
            .bind(&pattern)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at")
                .fetch_all(pool)
                .await?
        }
    };

    Ok(users)
}

/// Delete a single user
///
/// Refused while the user still holds future bookings; an admin must either
/// reassign those or use the bulk cascade delete.
pub async fn delete_user(pool: &SqlitePool, user_id: UserId) -> Result<(), ApiError> {
    let future_bookings: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM bookings WHERE user_id = ? AND shift_start > ?",
    )
    .bind(user_id)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    if future_bookings > 0 {
        return Err(ApiError::Conflict(format!(
            "User still has {future_bookings} upcoming booking(s)"
        )));
    }

    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("User not found: {user_id}")));
    }

    Ok(())
}

/// Bulk delete users, cascading over bookings, reports and subscriptions
pub async fn bulk_delete(pool: &SqlitePool, user_ids: &[UserId]) -> Result<u64, ApiError> {
    let mut deleted = 0;
    let mut tx = pool.begin().await?;
    for user_id in user_ids {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        deleted += result.rows_affected();
    }
    tx.commit().await?;

    Ok(deleted)
}

/// Total user count for the dashboard
pub async fn count_users(pool: &SqlitePool) -> Result<i64, ApiError> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_get_or_create_is_idempotent(pool: SqlitePool) {
        let mut tx = pool.begin().await.unwrap();
        let (first, created) = get_or_create_by_phone(&mut tx, "+27821234567", Some("Thandi"))
            .await
            .unwrap();
        assert!(created);
        assert_eq!(first.role, Role::Owl);

        let (second, created) = get_or_create_by_phone(&mut tx, "+27821234567", None)
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        tx.commit().await.unwrap();
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_duplicate_phone_is_conflict(pool: SqlitePool) {
        create_user(&pool, "+27821234567", "Thandi", Role::Owl)
            .await
            .unwrap();
        let err = create_user(&pool, "+27821234567", "Sipho", Role::Owl)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_delete_refused_with_future_booking(pool: SqlitePool) {
        let user = create_user(&pool, "+27821234567", "Thandi", Role::Owl)
            .await
            .unwrap();

        sqlx::query(
            r#"
            INSERT INTO schedules (id, name, cron_expr, duration_minutes, timezone, created_at, updated_at)
            VALUES (?, 'Patrol', '0 18 * * 5', 120, 'UTC', ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();
        let schedule_id: uuid::Uuid = sqlx::query_scalar("SELECT id FROM schedules")
            .fetch_one(&pool)
            .await
            .unwrap();

        let start = Utc::now() + chrono::Duration::days(3);
        sqlx::query(
            r#"
            INSERT INTO bookings (id, user_id, schedule_id, shift_start, shift_end, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(user.id)
        .bind(schedule_id)
        .bind(start)
        .bind(start + chrono::Duration::hours(2))
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();

        let err = delete_user(&pool, user.id).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        // Bulk delete cascades regardless
        let deleted = bulk_delete(&pool, &[user.id]).await.unwrap();
        assert_eq!(deleted, 1);
        let bookings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(bookings, 0);
    }
}
