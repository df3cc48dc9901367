//! Time-of-day parsing and "next occurrence" resolution for the one-shot
//! scrape schedule.
//!
//! Accepted shapes are `H`, `H:MM`, `Ham`, `H:MMpm` and so on: one or two hour
//! digits, an optional two-digit minute and an optional case-insensitive
//! `am`/`pm` suffix. Whitespace anywhere in the input is ignored. Without a
//! suffix an hour of `1..=12` is ambiguous, and the resolver picks whichever
//! of the AM/PM readings comes up first.

use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeZone};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeSpecError {
    #[error("invalid hour in schedule time {input:?}")]
    InvalidHour { input: String },
    #[error("invalid minute in schedule time {input:?}")]
    InvalidMinute { input: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Meridiem {
    Am,
    Pm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
    pub meridiem: Option<Meridiem>,
}

impl TimeOfDay {
    /// 24-hour clock hours this time may denote.
    pub fn candidate_hours(&self) -> Vec<u32> {
        match (self.meridiem, self.hour) {
            (Some(Meridiem::Am), 12) => vec![0],
            (Some(Meridiem::Pm), 12) => vec![12],
            (Some(Meridiem::Am), h) => vec![h],
            (Some(Meridiem::Pm), h) => vec![h + 12],
            (None, 12) => vec![0, 12],
            (None, h @ 1..=11) => vec![h, h + 12],
            (None, h) => vec![h],
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.candidate_hours().len() > 1
    }
}

pub fn parse_time_of_day(input: &str) -> Result<TimeOfDay, TimeSpecError> {
    let invalid_hour = || TimeSpecError::InvalidHour {
        input: input.to_string(),
    };
    let invalid_minute = || TimeSpecError::InvalidMinute {
        input: input.to_string(),
    };

    let compact = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();

    let (body, meridiem) = if let Some(rest) = compact.strip_suffix("am") {
        (rest, Some(Meridiem::Am))
    } else if let Some(rest) = compact.strip_suffix("pm") {
        (rest, Some(Meridiem::Pm))
    } else {
        (compact.as_str(), None)
    };

    let (hour_part, minute_part) = match body.split_once(':') {
        Some((hour, minute)) => (hour, Some(minute)),
        None => (body, None),
    };

    if !(1..=2).contains(&hour_part.len()) || !hour_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid_hour());
    }
    let hour: u32 = hour_part.parse().map_err(|_| invalid_hour())?;

    let minute = match minute_part {
        None => 0,
        Some(m) if m.len() == 2 && m.bytes().all(|b| b.is_ascii_digit()) => {
            m.parse::<u32>().map_err(|_| invalid_minute())?
        }
        Some(_) => return Err(invalid_minute()),
    };
    if minute > 59 {
        return Err(invalid_minute());
    }

    let hour_ok = match meridiem {
        Some(_) => (1..=12).contains(&hour),
        None => hour <= 23,
    };
    if !hour_ok {
        return Err(invalid_hour());
    }

    Ok(TimeOfDay {
        hour,
        minute,
        meridiem,
    })
}

/// A resolved schedule: when to fire, and how long to wait from resolution.
#[derive(Debug, Clone)]
pub struct ScheduleTimeSpec<Tz: TimeZone> {
    pub delay: Duration,
    pub scheduled_for: DateTime<Tz>,
}

/// Resolve `input` to its soonest upcoming occurrence strictly after `now`,
/// in `now`'s time zone.
pub fn resolve<Tz: TimeZone>(input: &str, now: &DateTime<Tz>) -> Result<ScheduleTimeSpec<Tz>, TimeSpecError> {
    let time = parse_time_of_day(input)?;

    let scheduled_for = time
        .candidate_hours()
        .into_iter()
        .filter_map(|hour| next_occurrence(now, hour, time.minute))
        .min()
        .ok_or_else(|| TimeSpecError::InvalidHour {
            input: input.to_string(),
        })?;

    let delay = (scheduled_for.clone() - now.clone())
        .to_std()
        .unwrap_or(Duration::ZERO);

    Ok(ScheduleTimeSpec {
        delay,
        scheduled_for,
    })
}

/// Today's wall-clock `hour:minute`, pushed a day forward while it is not
/// after `now`. Days where that wall time does not exist (DST gap) are skipped.
fn next_occurrence<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32, minute: u32) -> Option<DateTime<Tz>> {
    let wall = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let tz = now.timezone();
    let mut day = now.date_naive();
    for _ in 0..3 {
        if let Some(candidate) = tz.from_local_datetime(&day.and_time(wall)).earliest() {
            if candidate > *now {
                return Some(candidate);
            }
        }
        day = day.succ_opt()?;
    }
    None
}
