//! Validation constants and utilities
//!
//! Shared validation logic for inputs arriving over the REST API.

/// Maximum length for a user or schedule name
pub const MAX_NAME_LENGTH: usize = 120;

/// Maximum length for a report or broadcast message
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// Maximum length for a cron expression
pub const MAX_CRON_LENGTH: usize = 128;

/// Validate an E.164 phone number ("+" followed by 8 to 15 digits)
pub fn validate_phone(phone: &str) -> Result<(), String> {
    let Some(digits) = phone.strip_prefix('+') else {
        return Err("phone must start with '+'".to_string());
    };
    if digits.len() < 8 || digits.len() > 15 {
        return Err("phone must contain 8 to 15 digits".to_string());
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err("phone may only contain digits after '+'".to_string());
    }
    if digits.starts_with('0') {
        return Err("phone country code cannot start with 0".to_string());
    }
    Ok(())
}

/// Validate a presented OTP code (exactly six digits)
pub fn validate_otp_format(code: &str) -> Result<(), String> {
    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err("code must be exactly 6 digits".to_string());
    }
    Ok(())
}

/// Validate report severity (0 = info, 1 = suspicious, 2 = incident)
pub fn validate_severity(severity: i64) -> Result<(), String> {
    if (0..=2).contains(&severity) {
        Ok(())
    } else {
        Err("severity must be 0, 1 or 2".to_string())
    }
}

/// Validate string length
pub fn validate_length(field_name: &str, value: &str, max_len: usize) -> Result<(), String> {
    if value.len() > max_len {
        Err(format!("{} too long (max {})", field_name, max_len))
    } else {
        Ok(())
    }
}

/// Validate that a string contains no control characters (CR, LF)
pub fn validate_no_control_chars(field_name: &str, value: &str) -> Result<(), String> {
    if value.chars().any(|c| c == '\r' || c == '\n') {
        Err(format!("{} cannot contain control characters", field_name))
    } else {
        Ok(())
    }
}
