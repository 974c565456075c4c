use crate::error::VaultError;
use chrono::{DateTime, NaiveDate, Utc};

pub const DEFAULT_RETENTION_DAYS: u32 = 90;
const SECS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Day 01 partitions are never archived (upstream writes them incomplete).
    Rule1,
    /// Younger than the retention window, or the date could not be validated.
    Retention,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rule1 => "RULE_1",
            Self::Retention => "RULE_RETENTION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Eligible,
    Skip(SkipReason),
}

fn parse_component(kind: &str, raw: &str) -> Result<u32, VaultError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VaultError::DateParse {
            value: raw.to_string(),
            reason: format!("{kind} is not numeric"),
        });
    }
    trimmed.parse::<u32>().map_err(|err| VaultError::DateParse {
        value: raw.to_string(),
        reason: format!("{kind}: {err}"),
    })
}

pub fn partition_date(year: &str, month: &str, day: &str) -> Result<NaiveDate, VaultError> {
    let y = parse_component("year", year)?;
    let m = parse_component("month", month)?;
    let d = parse_component("day", day)?;
    let y = i32::try_from(y).map_err(|_| VaultError::DateParse {
        value: year.to_string(),
        reason: "year out of range".to_string(),
    })?;
    NaiveDate::from_ymd_opt(y, m, d).ok_or_else(|| VaultError::DateParse {
        value: format!("{year}-{month}-{day}"),
        reason: "no such calendar date".to_string(),
    })
}

/// Whole days between midnight UTC of `date` and `now`, floored.
pub fn age_days(date: NaiveDate, now: DateTime<Utc>) -> Result<i64, VaultError> {
    let Some(midnight) = date.and_hms_opt(0, 0, 0) else {
        return Err(VaultError::DateParse {
            value: date.to_string(),
            reason: "no midnight for date".to_string(),
        });
    };
    let elapsed = now.signed_duration_since(midnight.and_utc());
    Ok(elapsed.num_seconds().div_euclid(SECS_PER_DAY))
}

pub fn evaluate(
    year: &str,
    month: &str,
    day: &str,
    now: DateTime<Utc>,
    retention_days: u32,
) -> Decision {
    if matches!(parse_component("day", day), Ok(1)) {
        return Decision::Skip(SkipReason::Rule1);
    }

    let age = match partition_date(year, month, day).and_then(|date| age_days(date, now)) {
        Ok(age) => age,
        Err(err) => {
            tracing::debug!(year, month, day, error = %err, "partition date invalid; skipping");
            return Decision::Skip(SkipReason::Retention);
        }
    };

    if age < i64::from(retention_days) {
        return Decision::Skip(SkipReason::Retention);
    }
    Decision::Eligible
}

/// Retention rules bound to one run's clock and window.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub now: DateTime<Utc>,
    pub retention_days: u32,
}

impl RetentionPolicy {
    pub fn new(now: DateTime<Utc>, retention_days: u32) -> Self {
        Self {
            now,
            retention_days,
        }
    }

    pub fn evaluate(&self, year: &str, month: &str, day: &str) -> Decision {
        evaluate(year, month, day, self.now, self.retention_days)
    }
}
