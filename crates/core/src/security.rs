//! Security primitives for passwordless auth
//!
//! OTP generation and digesting, constant-time verification, progressive
//! lockout arithmetic, outbox retry backoff and JWT session tokens.

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::models::Role;
use crate::types::UserId;

/// Number of digits in a one-time password
pub const OTP_LENGTH: usize = 6;

/// Consecutive failures before the first lockout
pub const OTP_FAILURE_THRESHOLD: i64 = 3;

/// Lockout ceiling in minutes (24 hours)
const LOCKOUT_CAP_MINUTES: i64 = 24 * 60;

/// Generate a 6-digit OTP with the thread-local CSPRNG
pub fn generate_otp() -> String {
    let code: u32 = rand::rng().random_range(0..1_000_000);
    format!("{code:06}")
}

/// SHA-256 digest of an OTP, hex encoded for storage
///
/// Only the digest is ever persisted.
pub fn otp_digest(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

/// Compare a presented code against a stored digest in constant time
pub fn verify_otp(stored_digest_hex: &str, presented: &str) -> bool {
    let Ok(stored) = hex::decode(stored_digest_hex) else {
        return false;
    };
    let presented = Sha256::digest(presented.as_bytes());
    stored.ct_eq(presented.as_slice()).into()
}

/// Lockout applied after `failed_count` consecutive failures
///
/// Starts at 30 minutes on the third failure and doubles per further failure,
/// capped at 24 hours. Below the threshold there is no lockout.
pub fn lockout_duration(failed_count: i64) -> Option<Duration> {
    if failed_count < OTP_FAILURE_THRESHOLD {
        return None;
    }
    let doublings = (failed_count - OTP_FAILURE_THRESHOLD).min(8) as u32;
    let minutes = (30i64 << doublings).min(LOCKOUT_CAP_MINUTES);
    Some(Duration::minutes(minutes))
}

/// Delay before the next outbox delivery attempt
///
/// `retry_count` is the attempt number being scheduled (1-based).
pub fn outbox_backoff(retry_count: i64) -> Duration {
    match retry_count {
        ..=1 => Duration::minutes(1),
        2 => Duration::minutes(5),
        _ => Duration::minutes(15),
    }
}

/// Claims carried by a session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    pub fn user_id(&self) -> UserId {
        UserId(self.sub)
    }
}

/// Issue a signed session token for a user
pub fn issue_session_token(
    secret: &str,
    user_id: UserId,
    role: Role,
    ttl_hours: i64,
) -> DomainResult<String> {
    let now = Utc::now();
    let claims = SessionClaims {
        sub: user_id.into(),
        role,
        iat: now.timestamp(),
        exp: (now + Duration::hours(ttl_hours)).timestamp(),
    };

    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| DomainError::TokenEncoding(e.to_string()))
}

/// Decode and validate a session token
pub fn decode_session_token(secret: &str, token: &str) -> DomainResult<SessionClaims> {
    jsonwebtoken::decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| DomainError::InvalidSessionToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_otp_is_six_digits() {
        for _ in 0..100 {
            let otp = generate_otp();
            assert_eq!(otp.len(), OTP_LENGTH);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_otp_digest_round_trip() {
        let digest = otp_digest("123456");
        assert!(verify_otp(&digest, "123456"));
        assert!(!verify_otp(&digest, "123457"));
        assert!(!verify_otp(&digest, ""));
    }

    #[test]
    fn test_verify_otp_rejects_malformed_digest() {
        assert!(!verify_otp("not hex", "123456"));
        assert!(!verify_otp("abcd", "123456"));
    }

    #[test]
    fn test_lockout_progression() {
        assert_eq!(lockout_duration(0), None);
        assert_eq!(lockout_duration(2), None);
        assert_eq!(lockout_duration(3), Some(Duration::minutes(30)));
        assert_eq!(lockout_duration(4), Some(Duration::minutes(60)));
        assert_eq!(lockout_duration(5), Some(Duration::minutes(120)));
        assert_eq!(lockout_duration(6), Some(Duration::minutes(240)));
        assert_eq!(lockout_duration(7), Some(Duration::minutes(480)));
        // Capped at 24 hours no matter how far the count runs
        assert_eq!(lockout_duration(9), Some(Duration::minutes(1440)));
        assert_eq!(lockout_duration(50), Some(Duration::minutes(1440)));
    }

    #[test]
    fn test_outbox_backoff_steps() {
        assert_eq!(outbox_backoff(1), Duration::minutes(1));
        assert_eq!(outbox_backoff(2), Duration::minutes(5));
        assert_eq!(outbox_backoff(3), Duration::minutes(15));
        assert_eq!(outbox_backoff(7), Duration::minutes(15));
    }

    #[test]
    fn test_session_token_round_trip() {
        let user_id = UserId::new();
        let token = issue_session_token("secret", user_id, Role::Owl, 2).unwrap();
        let claims = decode_session_token("secret", &token).unwrap();

        assert_eq!(claims.user_id(), user_id);
        assert_eq!(claims.role, Role::Owl);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_session_token_rejects_wrong_secret() {
        let token = issue_session_token("secret", UserId::new(), Role::Admin, 2).unwrap();
        assert!(matches!(
            decode_session_token("other", &token),
            Err(DomainError::InvalidSessionToken)
        ));
    }

    #[test]
    fn test_session_token_rejects_garbage() {
        assert!(decode_session_token("secret", "not.a.token").is_err());
    }
}
