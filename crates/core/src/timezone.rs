//! Timezone handling utilities
//!
//! Provides functions for parsing and converting timezones safely.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{DomainError, DomainResult};

/// Parse an IANA timezone string (e.g., "Africa/Johannesburg", "Europe/London")
pub fn parse_timezone(tz_str: &str) -> DomainResult<Tz> {
    tz_str
        .parse::<Tz>()
        .map_err(|_| DomainError::InvalidTimezone(tz_str.to_string()))
}

/// Convert a timezone-aware time to UTC
pub fn to_utc<Tz2: TimeZone>(time: &DateTime<Tz2>) -> DateTime<Utc> {
    time.with_timezone(&Utc)
}

/// Validate that a timezone string is valid
///
/// Returns `Ok(())` if valid, `Err` otherwise
pub fn validate_timezone(tz_str: &str) -> DomainResult<()> {
    parse_timezone(tz_str)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_timezone_valid() {
        let tz = parse_timezone("Africa/Johannesburg");
        assert!(tz.is_ok());
        assert_eq!(tz.unwrap().name(), "Africa/Johannesburg");
    }

    #[test]
    fn test_parse_timezone_invalid() {
        let tz = parse_timezone("Invalid/Timezone");
        match tz {
            Err(DomainError::InvalidTimezone(s)) => {
                assert_eq!(s, "Invalid/Timezone");
            }
            _ => panic!("Expected InvalidTimezone error"),
        }
    }

    #[test]
    fn test_johannesburg_to_utc_conversion() {
        let tz = parse_timezone("Africa/Johannesburg").unwrap();

        // 18:00 SAST is 16:00 UTC (UTC+2, no DST)
        let local_time = tz.with_ymd_and_hms(2025, 5, 9, 18, 0, 0).unwrap();
        let utc_time = to_utc(&local_time);

        assert_eq!(utc_time.hour(), 16);
        assert_eq!(utc_time.minute(), 0);
    }

    #[test]
    fn test_validate_timezone() {
        assert!(validate_timezone("Europe/London").is_ok());
        assert!(validate_timezone("UTC").is_ok());
        assert!(validate_timezone("Invalid/Zone").is_err());
    }
}
