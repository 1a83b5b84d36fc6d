//! # Cron Schedules
//!
//! Accepts the standard 5-field form (`minute hour day-of-month month
//! day-of-week`, Sunday = 0 or 7) and a 6-field form with leading seconds.
//!
//! Next-tick computation happens on local wall-clock time in the job's IANA
//! timezone, then maps back to an instant:
//!
//! - a local time inside a spring-forward gap fires at the first valid
//!   instant after the gap
//! - an ambiguous local time (fall-back) fires once, at its earliest
//!   instant later than the reference

use super::errors::SchedulerError;
use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

/// Candidate local times examined before giving up
const MAX_CANDIDATES: usize = 16;
/// Longest DST gap searched for a valid local time
const MAX_GAP_MINUTES: i64 = 180;

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, SchedulerError> {
        let invalid = |message: String| SchedulerError::InvalidCron {
            expression: expression.to_string(),
            message,
        };

        let mut fields: Vec<String> = expression.split_whitespace().map(str::to_string).collect();
        match fields.len() {
            5 => fields.insert(0, "0".to_string()),
            6 => {}
            n => return Err(invalid(format!("expected 5 or 6 fields, found {n}"))),
        }
        fields[5] = normalize_day_of_week(&fields[5]);

        let schedule = cron::Schedule::from_str(&fields.join(" ")).map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            expression: expression.trim().to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire instant strictly after `reference`, evaluated in `tz`
    pub fn next_after(&self, reference: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        // Iterate on naive local time by treating it as UTC
        let local_reference = reference.with_timezone(&tz).naive_local();
        let floating = Utc.from_utc_datetime(&local_reference);

        self.schedule
            .after(&floating)
            .take(MAX_CANDIDATES)
            .find_map(|candidate| resolve_local(tz, candidate.naive_utc(), reference))
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, SchedulerError> {
    name.parse::<Tz>()
        .map_err(|_| SchedulerError::InvalidTimezone {
            timezone: name.to_string(),
        })
}

fn resolve_local(tz: Tz, local: NaiveDateTime, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(instant) => {
            Some(instant.with_timezone(&Utc)).filter(|t| *t > reference)
        }
        LocalResult::Ambiguous(a, b) => {
            let (a, b) = (a.with_timezone(&Utc), b.with_timezone(&Utc));
            let (early, late) = if a <= b { (a, b) } else { (b, a) };
            [early, late].into_iter().find(|t| *t > reference)
        }
        LocalResult::None => first_valid_after_gap(tz, local).filter(|t| *t > reference),
    }
}

fn first_valid_after_gap(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    let start = local.with_second(0)?.with_nanosecond(0)?;
    (1..=MAX_GAP_MINUTES).find_map(|minutes| {
        tz.from_local_datetime(&(start + chrono::Duration::minutes(minutes)))
            .earliest()
            .map(|instant| instant.with_timezone(&Utc))
    })
}

/// Rewrite numeric days (0-7, Sunday = 0 and 7) as names, since the cron
/// crate numbers Sunday as 1
fn normalize_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            let range = range.split('-').map(day_name).collect::<Vec<_>>().join("-");
            match step {
                Some(step) => format!("{range}/{step}"),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn day_name(token: &str) -> String {
    match token.parse::<usize>() {
        Ok(n) if n <= 7 => DAY_NAMES[n % 7].to_string(),
        _ => token.to_string(),
    }
}
