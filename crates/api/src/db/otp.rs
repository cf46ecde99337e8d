//! OTP codes, progressive lockout and auth rate limiting
//!
//! All state lives in the database so that limits survive restarts and would
//! keep working across instances.

use chrono::{DateTime, Duration, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};

use nightwatch_core::security::lockout_duration;

use crate::error::ApiError;

/// Hourly cap on OTP requests per source IP
pub const IP_HOURLY_CAP: i64 = 10;

/// Hourly cap on OTP requests per phone number
pub const PHONE_HOURLY_CAP: i64 = 3;

fn window() -> Duration {
    Duration::hours(1)
}

/// Count a request against a fixed hourly window
///
/// Returns `Some(retry_after_secs)` when the cap is exhausted, `None` when
/// the request was admitted (and counted).
pub async fn check_rate_limit(
    pool: &SqlitePool,
    scope: &str,
    key: &str,
    cap: i64,
) -> Result<Option<i64>, ApiError> {
    let now = Utc::now();
    let row: Option<(DateTime<Utc>, i64)> = sqlx::query_as(
        "SELECT window_start, count FROM auth_rate_limits WHERE scope = ? AND key = ?",
    )
    .bind(scope)
    .bind(key)
    .fetch_optional(pool)
    .await?;

    match row {
        None => {
            sqlx::query(
                r#"
                INSERT INTO auth_rate_limits (scope, key, window_start, count)
                VALUES (?, ?, ?, 1)
                ON CONFLICT (scope, key) DO UPDATE SET count = count + 1
                "#,
            )
            .bind(scope)
            .bind(key)
            .bind(now)
            .execute(pool)
            .await?;
            Ok(None)
        }
        Some((window_start, _)) if now - window_start >= window() => {
            sqlx::query(
                "UPDATE auth_rate_limits SET window_start = ?, count = 1 WHERE scope = ? AND key = ?",
            )
            .bind(now)
            .bind(scope)
            .bind(key)
            .execute(pool)
            .await?;
            Ok(None)
        }
        Some((_, count)) if count < cap => {
            sqlx::query(
                "UPDATE auth_rate_limits SET count = count + 1 WHERE scope = ? AND key = ?",
            )
            .bind(scope)
            .bind(key)
            .execute(pool)
            .await?;
            Ok(None)
        }
        Some((window_start, _)) => {
            let retry_after = (window_start + window() - now).num_seconds();
            Ok(Some(retry_after.max(1)))
        }
    }
}

/// Store (or replace) the pending OTP digest for a phone
pub async fn store_code(
    tx: &mut Transaction<'_, Sqlite>,
    phone: &str,
    code_hash: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), ApiError> {
    sqlx::query(
        r#"
        INSERT INTO otp_codes (phone, code_hash, expires_at, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (phone) DO UPDATE SET
            code_hash = excluded.code_hash,
            expires_at = excluded.expires_at,
            created_at = excluded.created_at
        "#,
    )
    .bind(phone)
    .bind(code_hash)
    .bind(expires_at)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Fetch the stored digest and expiry for a phone
pub async fn fetch_code(
    pool: &SqlitePool,
    phone: &str,
) -> Result<Option<(String, DateTime<Utc>)>, ApiError> {
    let row = sqlx::query_as::<_, (String, DateTime<Utc>)>(
        "SELECT code_hash, expires_at FROM otp_codes WHERE phone = ?",
    )
    .bind(phone)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Consume the stored code after a successful verification
pub async fn delete_code(tx: &mut Transaction<'_, Sqlite>, phone: &str) -> Result<(), ApiError> {
    sqlx::query("DELETE FROM otp_codes WHERE phone = ?")
        .bind(phone)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Seconds remaining on an active lockout, if any
pub async fn current_lockout(pool: &SqlitePool, phone: &str) -> Result<Option<i64>, ApiError> {
    let locked_until: Option<Option<DateTime<Utc>>> =
        sqlx::query_scalar("SELECT locked_until FROM otp_attempts WHERE phone = ?")
            .bind(phone)
            .fetch_optional(pool)
            .await?;

    let now = Utc::now();
    Ok(locked_until
        .flatten()
        .filter(|until| *until > now)
        .map(|until| (until - now).num_seconds().max(1)))
}

/// Record a failed verification, applying progressive lockout
///
/// Returns the new consecutive failure count.
pub async fn record_failure(pool: &SqlitePool, phone: &str) -> Result<i64, ApiError> {
    let now = Utc::now();
    let failed_count: i64 =
        sqlx::query_scalar("SELECT failed_count FROM otp_attempts WHERE phone = ?")
            .bind(phone)
            .fetch_optional(pool)
            .await?
            .unwrap_or(0);

    let new_count = failed_count + 1;
    let locked_until = lockout_duration(new_count).map(|d| now + d);

    sqlx::query(
        r#"
        INSERT INTO otp_attempts (phone, failed_count, locked_until, last_attempt_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (phone) DO UPDATE SET
            failed_count = excluded.failed_count,
            locked_until = excluded.locked_until,
            last_attempt_at = excluded.last_attempt_at
        "#,
    )
    .bind(phone)
    .bind(new_count)
    .bind(locked_until)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(new_count)
}

/// Reset the failure counter after a successful login
pub async fn reset_attempts(tx: &mut Transaction<'_, Sqlite>, phone: &str) -> Result<(), ApiError> {
    sqlx::query("DELETE FROM otp_attempts WHERE phone = ?")
        .bind(phone)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_rate_limit_caps_and_resets(pool: SqlitePool) {
        for _ in 0..PHONE_HOURLY_CAP {
            assert_eq!(
                check_rate_limit(&pool, "phone", "+27821234567", PHONE_HOURLY_CAP)
                    .await
                    .unwrap(),
                None
            );
        }

        let retry = check_rate_limit(&pool, "phone", "+27821234567", PHONE_HOURLY_CAP)
            .await
            .unwrap()
            .expect("cap should be exhausted");
        assert!(retry > 0 && retry <= 3600);

        // A different key is unaffected
        assert_eq!(
            check_rate_limit(&pool, "phone", "+27829999999", PHONE_HOURLY_CAP)
                .await
                .unwrap(),
            None
        );

        // An expired window resets the counter
        sqlx::query("UPDATE auth_rate_limits SET window_start = ? WHERE key = ?")
            .bind(Utc::now() - Duration::hours(2))
            .bind("+27821234567")
            .execute(&pool)
            .await
            .unwrap();
        assert_eq!(
            check_rate_limit(&pool, "phone", "+27821234567", PHONE_HOURLY_CAP)
                .await
                .unwrap(),
            None
        );
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_lockout_progression(pool: SqlitePool) {
        let phone = "+27821234567";

        assert_eq!(record_failure(&pool, phone).await.unwrap(), 1);
        assert_eq!(record_failure(&pool, phone).await.unwrap(), 2);
        assert!(current_lockout(&pool, phone).await.unwrap().is_none());

        // Third failure locks for ~30 minutes
        assert_eq!(record_failure(&pool, phone).await.unwrap(), 3);
        let lockout = current_lockout(&pool, phone).await.unwrap().unwrap();
        assert!((29 * 60..=30 * 60).contains(&lockout));

        // Fourth failure doubles the lockout
        record_failure(&pool, phone).await.unwrap();
        let lockout = current_lockout(&pool, phone).await.unwrap().unwrap();
        assert!((59 * 60..=60 * 60).contains(&lockout));
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_reset_clears_counter(pool: SqlitePool) {
        let phone = "+27821234567";
        record_failure(&pool, phone).await.unwrap();
        record_failure(&pool, phone).await.unwrap();
        record_failure(&pool, phone).await.unwrap();
        assert!(current_lockout(&pool, phone).await.unwrap().is_some());

        let mut tx = pool.begin().await.unwrap();
        reset_attempts(&mut tx, phone).await.unwrap();
        tx.commit().await.unwrap();

        assert!(current_lockout(&pool, phone).await.unwrap().is_none());
        assert_eq!(record_failure(&pool, phone).await.unwrap(), 1);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_store_code_replaces_previous(pool: SqlitePool) {
        let phone = "+27821234567";
        let expires = Utc::now() + Duration::minutes(5);

        let mut tx = pool.begin().await.unwrap();
        store_code(&mut tx, phone, "digest-one", expires).await.unwrap();
        store_code(&mut tx, phone, "digest-two", expires).await.unwrap();
        tx.commit().await.unwrap();

        let (digest, _) = fetch_code(&pool, phone).await.unwrap().unwrap();
        assert_eq!(digest, "digest-two");

        let mut tx = pool.begin().await.unwrap();
        delete_code(&mut tx, phone).await.unwrap();
        tx.commit().await.unwrap();
        assert!(fetch_code(&pool, phone).await.unwrap().is_none());
    }
}
