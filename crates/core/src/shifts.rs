//! Shift occurrence engine
//!
//! Shifts are ephemeral: an occurrence exists only as a projection of a
//! schedule's cron expression until somebody books it. This module enumerates
//! occurrences inside a window and validates that a proposed start time really
//! is an occurrence.
//!
//! Times are computed in the schedule's own timezone and normalised to UTC.
//! Around DST transitions the underlying iterator resolves local times the
//! way `chrono-tz` does: the earlier instant on ambiguity, skipping forward
//! over non-existent wall-clock times.

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;

use crate::cron::CronCache;
use crate::error::{DomainError, DomainResult};
use crate::models::Schedule;
use crate::types::ScheduleId;

/// Safety margin of cron candidates examined per requested occurrence,
/// leaving room for downstream booked-slot filtering.
const CANDIDATE_MARGIN: usize = 4;

/// A single computed shift occurrence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftOccurrence {
    pub schedule_id: ScheduleId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Whether the schedule's seasonal window covers `at` (in the schedule's zone)
pub fn schedule_active_at(
    schedule: &Schedule,
    cache: &CronCache,
    at: DateTime<Utc>,
) -> DomainResult<bool> {
    let entry = cache.entry(&schedule.cron_expr, &schedule.timezone)?;
    Ok(within_validity(schedule, &at.with_timezone(&entry.tz)))
}

/// Enumerate occurrences of `schedule` with `from <= start <= to`
///
/// Returns at most `limit` occurrences in ascending start order. Enumeration
/// is bounded: it stops past `to` or after `limit * CANDIDATE_MARGIN`
/// candidates, whichever comes first.
pub fn occurrences_in_window(
    schedule: &Schedule,
    cache: &CronCache,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    limit: usize,
) -> DomainResult<Vec<ShiftOccurrence>> {
    let entry = cache.entry(&schedule.cron_expr, &schedule.timezone)?;
    let duration = Duration::minutes(schedule.duration_minutes);

    // The iterator is strictly-after, so seed one second early to keep an
    // occurrence that falls exactly on `from`.
    let seed = (from - Duration::seconds(1)).with_timezone(&entry.tz);

    let mut occurrences = Vec::new();
    for start in entry
        .schedule
        .after(&seed)
        .take(limit.saturating_mul(CANDIDATE_MARGIN))
    {
        let start_utc = start.with_timezone(&Utc);
        if start_utc > to {
            break;
        }
        if !within_validity(schedule, &start) {
            continue;
        }

        occurrences.push(ShiftOccurrence {
            schedule_id: schedule.id,
            start_time: start_utc,
            end_time: start_utc + duration,
        });
        if occurrences.len() == limit {
            break;
        }
    }

    Ok(occurrences)
}

/// Verify that `start` is an occurrence of `schedule` inside its window
///
/// The check enumerates from one second before `start`: the next firing must
/// be exactly `start`, otherwise the instant does not belong to the schedule.
pub fn validate_occurrence(
    schedule: &Schedule,
    cache: &CronCache,
    start: DateTime<Utc>,
) -> DomainResult<()> {
    let entry = cache.entry(&schedule.cron_expr, &schedule.timezone)?;
    let misaligned = DomainError::InvalidOccurrence {
        schedule_id: schedule.id,
        start,
    };

    if !within_validity(schedule, &start.with_timezone(&entry.tz)) {
        return Err(misaligned);
    }

    let seed = (start - Duration::seconds(1)).with_timezone(&entry.tz);
    match entry.schedule.after(&seed).next() {
        Some(next) if next.with_timezone(&Utc) == start => Ok(()),
        _ => Err(misaligned),
    }
}

fn within_validity(schedule: &Schedule, local: &DateTime<Tz>) -> bool {
    let date = local.date_naive();
    if let Some(start_date) = schedule.start_date
        && date < start_date
    {
        return false;
    }
    if let Some(end_date) = schedule.end_date
        && date > end_date
    {
        return false;
    }
    true
}
