/// Five-field cron expressions: `MIN HOUR DOM MON DOW`.
///
/// Each field accepts `*`, numbers, ranges (`1-5`), steps (`*/15`, `8-18/2`),
/// comma lists and names (`JAN`..`DEC`, `SUN`..`SAT`). Day-of-week 0 and 7
/// are both Sunday.
///
/// Parsed expressions compute their next fire time themselves, and render a
/// canonical six-field form for the timer backend.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;
use thiserror::Error;

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Far enough to find Feb 29 on a given weekday.
const MAX_LOOKAHEAD_DAYS: u32 = 366 * 28;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid cron expression '{expression}': {reason}")]
pub struct CronParseError {
    pub expression: String,
    pub reason: String,
}

/// A parsed five-field cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days_of_month: BTreeSet<u32>,
    months: BTreeSet<u32>,
    days_of_week: BTreeSet<u32>,
    dom_restricted: bool,
    dow_restricted: bool,
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Value of the first entry in `names`
    names_base: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[], names_base: 0 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[], names_base: 0 };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[], names_base: 0 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12, names: &MONTH_NAMES, names_base: 1 };
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7, names: &WEEKDAY_NAMES, names_base: 0 };

impl CronSchedule {
    /// Parse a five-field expression
    pub fn parse(expression: &str) -> Result<Self, CronParseError> {
        let invalid = |reason: String| CronParseError {
            expression: expression.to_string(),
            reason,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!(
                "expected 5 fields (MIN HOUR DOM MON DOW), got {}",
                fields.len()
            )));
        }

        let minutes = parse_field(fields[0], &MINUTE).map_err(invalid)?;
        let hours = parse_field(fields[1], &HOUR).map_err(invalid)?;
        let days_of_month = parse_field(fields[2], &DAY_OF_MONTH).map_err(invalid)?;
        let months = parse_field(fields[3], &MONTH).map_err(invalid)?;
        let days_of_week: BTreeSet<u32> = parse_field(fields[4], &DAY_OF_WEEK)
            .map_err(invalid)?
            .into_iter()
            .map(|d| d % 7)
            .collect();

        Ok(Self {
            dom_restricted: days_of_month.len() < 31,
            dow_restricted: days_of_week.len() < 7,
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
        })
    }

    /// Whether the minute containing `at` is a fire time in `tz`
    pub fn matches(&self, at: DateTime<Utc>, tz: Tz) -> bool {
        let local = at.with_timezone(&tz);
        self.matches_date(local.date_naive())
            && self.hours.contains(&local.hour())
            && self.minutes.contains(&local.minute())
    }

    /// Next fire time strictly after `after`, evaluated in `tz`
    ///
    /// Local times that fall into a DST gap are skipped; ambiguous local
    /// times fire at the earlier instant.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let mut date = after.with_timezone(&tz).date_naive();

        for _ in 0..MAX_LOOKAHEAD_DAYS {
            if self.matches_date(date) {
                for &hour in &self.hours {
                    for &minute in &self.minutes {
                        let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
                            continue;
                        };
                        let Some(local) = tz.from_local_datetime(&naive).earliest() else {
                            continue;
                        };
                        let at = local.with_timezone(&Utc);
                        if at > after {
                            return Some(at);
                        }
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }

    /// Restricted day-of-month and day-of-week must both match
    fn matches_date(&self, date: NaiveDate) -> bool {
        if !self.months.contains(&date.month()) {
            return false;
        }
        let dom = self.days_of_month.contains(&date.day());
        let dow = self.days_of_week.contains(&date.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom && dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// Six-field form (`SEC MIN HOUR DOM MON DOW`) with weekday names
    pub fn to_six_field(&self) -> String {
        let weekdays = if self.dow_restricted {
            self.days_of_week
                .iter()
                .map(|&d| capitalize(WEEKDAY_NAMES[d as usize]))
                .collect::<Vec<_>>()
                .join(",")
        } else {
            "*".to_string()
        };

        format!(
            "0 {} {} {} {} {}",
            render(&self.minutes, &MINUTE),
            render(&self.hours, &HOUR),
            render(&self.days_of_month, &DAY_OF_MONTH),
            render(&self.months, &MONTH),
            weekdays
        )
    }
}

fn parse_field(field: &str, spec: &FieldSpec) -> Result<BTreeSet<u32>, String> {
    let mut values = BTreeSet::new();

    for item in field.split(',') {
        if item.is_empty() {
            return Err(format!("empty list item in {} field '{}'", spec.name, field));
        }

        let (base, step) = match item.split_once('/') {
            Some((base, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{}' in {} field", step, spec.name))?;
                if step == 0 {
                    return Err(format!("step must be positive in {} field", spec.name));
                }
                (base, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if base == "*" {
            (spec.min, spec.max)
        } else if let Some((lo, hi)) = base.split_once('-') {
            let lo = parse_value(lo, spec)?;
            let hi = parse_value(hi, spec)?;
            if lo > hi {
                return Err(format!("descending range '{}' in {} field", base, spec.name));
            }
            (lo, hi)
        } else {
            let value = parse_value(base, spec)?;
            // `5/15` means "from 5 to the end, every 15"
            match step {
                Some(_) => (value, spec.max),
                None => (value, value),
            }
        };

        let step = step.unwrap_or(1) as usize;
        values.extend((start..=end).step_by(step));
    }

    Ok(values)
}

fn parse_value(token: &str, spec: &FieldSpec) -> Result<u32, String> {
    let value = match token.parse::<u32>() {
        Ok(n) => n,
        Err(_) => spec
            .names
            .iter()
            .position(|name| name.eq_ignore_ascii_case(token))
            .map(|i| i as u32 + spec.names_base)
            .ok_or_else(|| format!("invalid value '{}' in {} field", token, spec.name))?,
    };

    if value < spec.min || value > spec.max {
        return Err(format!(
            "{} out of range {}-{} in {} field",
            value, spec.min, spec.max, spec.name
        ));
    }
    Ok(value)
}

fn render(values: &BTreeSet<u32>, spec: &FieldSpec) -> String {
    if values.len() as u32 == spec.max - spec.min + 1 {
        return "*".to_string();
    }
    values.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_string() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}
