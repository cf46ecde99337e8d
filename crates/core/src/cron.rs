//! Cron expression handling
//!
//! Schedules are written as standard 5-field cron expressions
//! (`minute hour day-of-month month day-of-week`, Sunday = 0 or 7).
//! The `cron` crate expects a seconds field and counts days of week from
//! Sunday = 1, so expressions are normalised before parsing: a `0` seconds
//! field is prepended and numeric day-of-week tokens are rewritten to day
//! names, which mean the same thing in both dialects.
//!
//! Parsed schedules are kept in a process-wide cache keyed by
//! `(expression, timezone)`. Entries are small and bounded by the number of
//! schedules, so the cache never evicts.

use std::str::FromStr;
use std::sync::Arc;

use chrono_tz::Tz;
use cron::Schedule;
use moka::sync::Cache;

use crate::error::{DomainError, DomainResult};
use crate::timezone::parse_timezone;

const DOW_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Normalise a 5-field cron expression into the 6-field form the parser wants
pub fn normalize_cron(expr: &str) -> DomainResult<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(DomainError::InvalidCron(format!(
            "expected 5 fields, got {}",
            fields.len()
        )));
    }

    let dow = normalize_dow_field(fields[4])?;
    Ok(format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], dow
    ))
}

/// Parse and validate a 5-field cron expression
pub fn parse_cron(expr: &str) -> DomainResult<Schedule> {
    let normalized = normalize_cron(expr)?;
    Schedule::from_str(&normalized).map_err(|e| DomainError::InvalidCron(e.to_string()))
}

/// Validate a 5-field cron expression without keeping the parsed form
pub fn validate_cron_expr(expr: &str) -> DomainResult<()> {
    parse_cron(expr).map(|_| ())
}

fn normalize_dow_field(field: &str) -> DomainResult<String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let parts = field
        .split(',')
        .map(normalize_dow_part)
        .collect::<DomainResult<Vec<_>>>()?;
    Ok(parts.join(","))
}

fn normalize_dow_part(part: &str) -> DomainResult<String> {
    let (base, step) = match part.split_once('/') {
        Some((base, step)) => {
            let step: usize = step
                .parse()
                .ok()
                .filter(|s| *s >= 1)
                .ok_or_else(|| DomainError::InvalidCron(format!("bad step in '{part}'")))?;
            (base, Some(step))
        }
        None => (part, None),
    };

    if base == "*" {
        return Ok(part.to_string());
    }

    if let Some((lo, hi)) = base.split_once('-') {
        return match (lo.parse::<u8>(), hi.parse::<u8>()) {
            (Ok(lo), Ok(hi)) => expand_numeric_days(lo, hi, step.unwrap_or(1)),
            // Name ranges ("MON-FRI") are valid in both dialects
            _ => Ok(part.to_string()),
        };
    }

    if let Ok(day) = base.parse::<u8>() {
        return match step {
            // Unix "n/step" means from n to Saturday in steps
            Some(step) => expand_numeric_days(day, 6, step),
            None => dow_name(day).map(str::to_string),
        };
    }

    // Day name, identical in both dialects
    Ok(part.to_string())
}

fn expand_numeric_days(lo: u8, hi: u8, step: usize) -> DomainResult<String> {
    if lo > hi {
        return Err(DomainError::InvalidCron(format!(
            "reversed day-of-week range {lo}-{hi}"
        )));
    }

    let names = (lo..=hi)
        .step_by(step)
        .map(dow_name)
        .collect::<DomainResult<Vec<_>>>()?;
    Ok(names.join(","))
}

fn dow_name(day: u8) -> DomainResult<&'static str> {
    if day > 7 {
        return Err(DomainError::InvalidCron(format!("day-of-week {day} out of range")));
    }
    // Both 0 and 7 mean Sunday
    Ok(DOW_NAMES[(day % 7) as usize])
}

/// Cached parse of a schedule's cron expression and timezone
#[derive(Debug)]
pub struct CronEntry {
    pub schedule: Schedule,
    pub tz: Tz,
}

/// Process-wide cache of parsed cron expressions
///
/// Cloning is cheap; all clones share the underlying map.
#[derive(Clone)]
pub struct CronCache {
    entries: Cache<(String, String), Arc<CronEntry>>,
}

impl CronCache {
    pub fn new() -> Self {
        Self {
            entries: Cache::builder().build(),
        }
    }

    /// Look up or parse the `(expression, timezone)` pair
    pub fn entry(&self, expr: &str, tz_name: &str) -> DomainResult<Arc<CronEntry>> {
        let key = (expr.to_string(), tz_name.to_string());
        if let Some(entry) = self.entries.get(&key) {
            return Ok(entry);
        }

        let entry = Arc::new(CronEntry {
            schedule: parse_cron(expr)?,
            tz: parse_timezone(tz_name)?,
        });
        self.entries.insert(key, entry.clone());
        Ok(entry)
    }
}

impl Default for CronCache {
    fn default() -> Self {
        Self::new()
    }
}
