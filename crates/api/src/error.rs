//! Error handling for API endpoints
//!
//! Domain and database errors funnel through [`ApiError`], the single
//! translator from typed errors to the wire shape
//! `{error, message, code, request_id, validation_errors?}`.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use uuid::Uuid;

use nightwatch_core::DomainError;

/// Field-level validation failure
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub code: String,
    pub message: String,
}

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<FieldError>>,
}

/// Which limiter produced a 429
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitKind {
    Ip,
    Phone,
    OtpLocked,
}

impl RateLimitKind {
    fn code(self) -> &'static str {
        match self {
            RateLimitKind::Ip => "RATE_LIMITED_IP",
            RateLimitKind::Phone => "RATE_LIMITED_PHONE",
            RateLimitKind::OtpLocked => "OTP_LOCKED",
        }
    }
}

/// API error type that can be converted to HTTP responses
#[derive(Debug)]
pub enum ApiError {
    Validation {
        message: String,
        errors: Vec<FieldError>,
    },
    Unauthorized,
    Forbidden,
    NotFound(String),
    Conflict(String),
    RateLimited {
        kind: RateLimitKind,
        retry_after_secs: i64,
    },
    Internal(String),
}

impl ApiError {
    /// Validation error without field detail
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
            errors: Vec::new(),
        }
    }

    /// Validation error flagging a single field
    pub fn field(field: &str, code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        ApiError::Validation {
            message: message.clone(),
            errors: vec![FieldError {
                field: field.to_string(),
                code: code.to_string(),
                message,
            }],
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Correlation id: logged together with the underlying error and
        // returned to the client, never the error itself.
        let request_id = Uuid::new_v4().to_string();

        let (status, error, code, message, validation_errors, retry_after) = match self {
            ApiError::Validation { message, errors } => (
                StatusCode::BAD_REQUEST,
                "Bad Request",
                "VALIDATION_ERROR".to_string(),
                message,
                if errors.is_empty() { None } else { Some(errors) },
                None,
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Unauthorized",
                "UNAUTHORIZED".to_string(),
                "Authentication failed".to_string(),
                None,
                None,
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "Forbidden",
                "FORBIDDEN".to_string(),
                "Insufficient permissions".to_string(),
                None,
                None,
            ),
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                "Not Found",
                "NOT_FOUND".to_string(),
                message,
                None,
                None,
            ),
            ApiError::Conflict(message) => (
                StatusCode::CONFLICT,
                "Conflict",
                "RESOURCE_CONFLICT".to_string(),
                message,
                None,
                None,
            ),
            ApiError::RateLimited {
                kind,
                retry_after_secs,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too Many Requests",
                kind.code().to_string(),
                "Too many attempts, try again later".to_string(),
                None,
                Some(retry_after_secs.max(1)),
            ),
            ApiError::Internal(detail) => {
                tracing::error!(request_id = %request_id, "Internal server error: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                    "INTERNAL_ERROR".to_string(),
                    "Something went wrong".to_string(),
                    None,
                    None,
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            message,
            code,
            request_id,
            validation_errors,
        });

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after
            && let Ok(value) = HeaderValue::from_str(&secs.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

/// Convert DomainError to ApiError
impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::UserNotFound(id) => ApiError::NotFound(format!("User not found: {id}")),
            DomainError::ScheduleNotFound(id) => {
                ApiError::NotFound(format!("Schedule not found: {id}"))
            }
            DomainError::BookingNotFound(id) => {
                ApiError::NotFound(format!("Booking not found: {id}"))
            }
            DomainError::ReportNotFound(id) => {
                ApiError::NotFound(format!("Report not found: {id}"))
            }
            DomainError::InvalidCron(msg) => {
                ApiError::field("cron_expr", "invalid_cron", format!("Invalid cron: {msg}"))
            }
            DomainError::InvalidTimezone(tz) => {
                ApiError::field("timezone", "invalid_timezone", format!("Invalid timezone: {tz}"))
            }
            DomainError::InvalidOccurrence { .. } => ApiError::field(
                "start_time",
                "invalid_occurrence",
                "start_time is not an occurrence of the schedule",
            ),
            DomainError::SlotTaken { .. } => {
                ApiError::Conflict("This shift has already been booked".to_string())
            }
            DomainError::CancellationWindowPassed { hours } => ApiError::Conflict(format!(
                "Bookings can no longer be cancelled within {hours}h of the shift"
            )),
            DomainError::OutsideCheckInWindow => ApiError::validation(
                "Check-in is only allowed shortly before and during the shift",
            ),
            DomainError::PermissionDenied => ApiError::Forbidden,
            DomainError::InvalidSessionToken => ApiError::Unauthorized,
            DomainError::TokenEncoding(msg) => ApiError::Internal(msg),
            DomainError::InvalidInput(msg) => ApiError::validation(msg),
        }
    }
}

/// Convert sqlx errors to ApiError
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                ApiError::Conflict("Resource already exists".to_string())
            }
            _ => ApiError::Internal(format!("Database error: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightwatch_core::types::ScheduleId;

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            error: "Conflict".to_string(),
            message: "This shift has already been booked".to_string(),
            code: "RESOURCE_CONFLICT".to_string(),
            request_id: "abc".to_string(),
            validation_errors: None,
        };

        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("RESOURCE_CONFLICT"));
        assert!(!json.contains("validation_errors"));
    }

    #[test]
    fn test_invalid_occurrence_flags_start_time() {
        let err = DomainError::InvalidOccurrence {
            schedule_id: ScheduleId::new(),
            start: chrono::Utc::now(),
        };
        match ApiError::from(err) {
            ApiError::Validation { errors, .. } => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "start_time");
            }
            other => panic!("Expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_slot_taken_maps_to_conflict() {
        let err = DomainError::SlotTaken {
            schedule_id: ScheduleId::new(),
            start: chrono::Utc::now(),
        };
        assert!(matches!(ApiError::from(err), ApiError::Conflict(_)));
    }

    #[test]
    fn test_rate_limit_codes() {
        assert_eq!(RateLimitKind::Ip.code(), "RATE_LIMITED_IP");
        assert_eq!(RateLimitKind::Phone.code(), "RATE_LIMITED_PHONE");
        assert_eq!(RateLimitKind::OtpLocked.code(), "OTP_LOCKED");
    }
}
