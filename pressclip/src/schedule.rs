use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone, Utc};

use crate::error::{HarvestError, Result};

/// How often a schedule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    Once,
    Daily,
    Weekly,
    /// Fixed interval in minutes, at least 1.
    Every(u32),
}

impl Recurrence {
    /// Interval between fires; `None` for one-shot schedules.
    pub fn step(&self) -> Option<Duration> {
        match self {
            Recurrence::Once => None,
            Recurrence::Daily => Some(Duration::days(1)),
            Recurrence::Weekly => Some(Duration::weeks(1)),
            Recurrence::Every(minutes) => Some(Duration::minutes(*minutes as i64)),
        }
    }

    /// Smallest `previous + k * step` strictly after `now`, with `k >= 1`.
    ///
    /// Skipped fires collapse into one: a daily schedule that slept through
    /// three days resumes at the next same-time-of-day slot after `now`,
    /// keeping its original phase. Returns `None` for `Once`.
    pub fn next_after(&self, previous: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let step_secs = self.step()?.num_seconds();
        if step_secs <= 0 {
            return None;
        }
        let behind = (now - previous).num_seconds();
        let k = if behind < 0 { 1 } else { behind / step_secs + 1 };
        Some(previous + Duration::seconds(step_secs * k))
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::Once => write!(f, "once"),
            Recurrence::Daily => write!(f, "daily"),
            Recurrence::Weekly => write!(f, "weekly"),
            Recurrence::Every(minutes) => write!(f, "every:{}m", minutes),
        }
    }
}

impl FromStr for Recurrence {
    type Err = HarvestError;

    /// Accepts `once`, `daily`, `weekly`, and minute intervals written as
    /// `every:30m` (the stored form) or plain `30m` (CLI shorthand).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            "once" => return Ok(Recurrence::Once),
            "daily" => return Ok(Recurrence::Daily),
            "weekly" => return Ok(Recurrence::Weekly),
            _ => {}
        }
        let minutes = s
            .strip_prefix("every:")
            .unwrap_or(s)
            .strip_suffix('m')
            .and_then(|m| m.parse::<u32>().ok())
            .ok_or_else(|| {
                HarvestError::InvalidSchedule(format!("unrecognized recurrence '{}'", s))
            })?;
        if minutes == 0 {
            return Err(HarvestError::InvalidSchedule(
                "interval must be at least one minute".to_string(),
            ));
        }
        Ok(Recurrence::Every(minutes))
    }
}

/// A stored harvesting schedule.
#[derive(Debug, Clone)]
pub struct ScheduleDefinition {
    pub id: i64,
    pub keyword: String,
    pub recurrence: Recurrence,
    pub next_fire_at: DateTime<Utc>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// A validated schedule waiting for the store to assign its id.
///
/// Construction is the single validation point; every path that creates a
/// schedule goes through `new`.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub keyword: String,
    pub recurrence: Recurrence,
    pub next_fire_at: DateTime<Utc>,
}

impl NewSchedule {
    pub fn new(keyword: &str, recurrence: Recurrence, next_fire_at: DateTime<Utc>) -> Result<Self> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(HarvestError::InvalidSchedule(
                "keyword must not be empty".to_string(),
            ));
        }
        if let Recurrence::Every(0) = recurrence {
            return Err(HarvestError::InvalidSchedule(
                "interval must be at least one minute".to_string(),
            ));
        }
        Ok(Self {
            keyword: keyword.to_string(),
            recurrence,
            next_fire_at,
        })
    }
}

/// Resolves the first fire time for a new schedule.
///
/// `at` is a local wall-clock time (`HH:MM`); the first fire is its next
/// occurrence, today if still ahead. Without `at` the schedule is due
/// immediately.
pub fn first_fire_at(at: Option<&str>, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let at = match at {
        Some(at) => at,
        None => return Ok(now),
    };
    let time = NaiveTime::parse_from_str(at, "%H:%M").map_err(|_| {
        HarvestError::InvalidSchedule(format!("invalid time '{}', expected HH:MM", at))
    })?;

    let local_now = now.with_timezone(&Local);
    let mut date = local_now.date_naive();
    if time <= local_now.time() {
        date = date
            .succ_opt()
            .ok_or_else(|| HarvestError::InvalidSchedule("date out of range".to_string()))?;
    }
    let naive = date.and_time(time);
    let local = match Local.from_local_datetime(&naive).earliest() {
        Some(dt) => dt,
        // DST spring-forward gap: shift into the next valid hour
        None => Local
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .ok_or_else(|| {
                HarvestError::InvalidSchedule(format!("time '{}' is not representable", at))
            })?,
    };
    Ok(local.with_timezone(&Utc))
}
