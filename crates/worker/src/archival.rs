//! Report archival
//!
//! Runs daily at 02:00 in the configured timezone. Thresholds scale with
//! severity: routine observations age out quickly, incidents are kept for a
//! year.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::db::WorkerDb;

/// Age thresholds (days) per severity
#[derive(Debug, Clone, Copy)]
pub struct ArchivePolicy {
    pub severity0_days: i64,
    pub severity1_days: i64,
    pub severity2_days: i64,
}

impl ArchivePolicy {
    /// Severity 1 follows `REPORT_ARCHIVE_DAYS`; 0 and 2 are fixed
    pub fn new(report_archive_days: i64) -> Self {
        Self {
            severity0_days: 30,
            severity1_days: report_archive_days,
            severity2_days: 365,
        }
    }

    fn thresholds(self) -> [(i64, i64); 3] {
        [
            (0, self.severity0_days),
            (1, self.severity1_days),
            (2, self.severity2_days),
        ]
    }
}

/// Apply the age thresholds once; returns the number of archived reports
pub async fn archive_old_reports(
    db: &WorkerDb,
    policy: ArchivePolicy,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let mut archived = 0;
    for (severity, days) in policy.thresholds() {
        let cutoff = now - Duration::days(days);
        let count = db.archive_reports_older_than(severity, cutoff).await?;
        if count > 0 {
            tracing::info!("Archived {count} severity-{severity} report(s) older than {days}d");
        }
        archived += count;
    }

    Ok(archived)
}

/// Duration until the next 02:00 wall-clock time in `tz`
///
/// If 02:00 does not exist on that date (DST spring-forward) the job slides
/// an hour later.
pub fn until_next_archival(tz: Tz, now: DateTime<Utc>) -> std::time::Duration {
    let local = now.with_timezone(&tz);
    let two_am = NaiveTime::from_hms_opt(2, 0, 0).expect("02:00 is a valid time");

    let mut date = local.date_naive();
    if local.time() >= two_am {
        date += Duration::days(1);
    }

    let next = loop {
        let candidate = date.and_time(two_am);
        match tz.from_local_datetime(&candidate).earliest() {
            Some(next) => break next,
            None => {
                // 02:00 skipped by DST; run at 03:00 instead
                let candidate = date.and_time(NaiveTime::from_hms_opt(3, 0, 0).expect("valid"));
                if let Some(next) = tz.from_local_datetime(&candidate).earliest() {
                    break next;
                }
                date += Duration::days(1);
            }
        }
    };

    (next.with_timezone(&Utc) - now)
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(60))
}
