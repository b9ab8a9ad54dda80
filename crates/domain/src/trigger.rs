//! Triggers: when a scheduled job fires.
//!
//! Three shapes are supported: cron expressions, absolute instants and
//! structured recurrence rules. Solar events are handled separately by the
//! sun scheduler because they are re-evaluated daily.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, NaiveDateTime, TimeZone, Timelike};
use serde::Deserialize;

use crate::error::ConfigurationError;
use crate::time::{Timestamp, from_millis};

/// How far ahead a recurrence rule is searched before giving up.
const RECURRENCE_HORIZON_DAYS: u64 = 8 * 366;

/// Describes when a scheduled job fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// A cron expression, evaluated in local time.
    Cron {
        expression: String,
        schedule: Box<cron::Schedule>,
    },
    /// A single absolute instant.
    At(Timestamp),
    /// A structured day/hour/minute/weekday rule.
    Recurrence(Recurrence),
}

impl Trigger {
    /// Parse a textual trigger: an RFC 3339 instant or a cron expression.
    ///
    /// Five-field cron expressions get a leading `0` seconds field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MalformedTrigger`] when neither form parses.
    pub fn parse(spec: &str) -> Result<Self, ConfigurationError> {
        let spec = spec.trim();
        if let Ok(instant) = DateTime::parse_from_rfc3339(spec) {
            return Ok(Self::At(instant.to_utc()));
        }
        let expression = match spec.split_whitespace().count() {
            _ if spec.starts_with('@') => spec.to_string(),
            5 => format!("0 {spec}"),
            6 | 7 => spec.to_string(),
            count => {
                return Err(malformed(
                    spec,
                    format!("expected 5 to 7 cron fields, found {count}"),
                ));
            }
        };
        let schedule = cron::Schedule::from_str(&expression)
            .map_err(|err| malformed(spec, err.to_string()))?;
        Ok(Self::Cron {
            expression,
            schedule: Box::new(schedule),
        })
    }

    /// An absolute instant given as milliseconds since the epoch.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MalformedTrigger`] when out of range.
    pub fn at_millis(ms: i64) -> Result<Self, ConfigurationError> {
        from_millis(ms)
            .map(Self::At)
            .ok_or_else(|| malformed(&ms.to_string(), "instant out of range".to_string()))
    }

    /// A recurrence rule from its structured (JSON) form.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MalformedTrigger`] for unknown keys,
    /// wrong types, or out-of-range values.
    pub fn recurrence(spec: &serde_json::Value) -> Result<Self, ConfigurationError> {
        let raw: RecurrenceSpec = serde_json::from_value(spec.clone())
            .map_err(|err| malformed(&spec.to_string(), err.to_string()))?;
        raw.validate()
            .map(Self::Recurrence)
            .map_err(|reason| malformed(&spec.to_string(), reason))
    }

    /// The first firing strictly after `after`, in `after`'s time zone.
    #[must_use]
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match self {
            Self::Cron { schedule, .. } => schedule.after(after).next(),
            Self::At(instant) => {
                let local = instant.with_timezone(&after.timezone());
                (local > *after).then_some(local)
            }
            Self::Recurrence(rule) => rule.next_after(after),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cron { expression, .. } => write!(f, "cron({expression})"),
            Self::At(instant) => write!(f, "at({})", instant.to_rfc3339()),
            Self::Recurrence(rule) => write!(f, "recurrence({rule:?})"),
        }
    }
}

/// A recurrence rule. `None` fields match any value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recurrence {
    pub second: Vec<u32>,
    pub minute: Option<Vec<u32>>,
    pub hour: Option<Vec<u32>>,
    pub day: Option<Vec<u32>>,
    pub month: Option<Vec<u32>>,
    /// 0 = Sunday … 6 = Saturday.
    pub weekday: Option<Vec<u32>>,
}

impl Recurrence {
    fn matches_date(&self, date: chrono::NaiveDate) -> bool {
        allows(self.day.as_deref(), date.day())
            && allows(self.month.as_deref(), date.month())
            && allows(self.weekday.as_deref(), date.weekday().num_days_from_sunday())
    }

    fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let start: NaiveDateTime = after.naive_local().with_nanosecond(0)? + chrono::Duration::seconds(1);
        let hours = candidates(self.hour.as_deref(), 24);
        let minutes = candidates(self.minute.as_deref(), 60);
        let seconds = candidates(Some(&self.second), 60);

        for offset in 0..=RECURRENCE_HORIZON_DAYS {
            let date = start.date().checked_add_days(Days::new(offset))?;
            if !self.matches_date(date) {
                continue;
            }
            for &hour in &hours {
                for &minute in &minutes {
                    for &second in &seconds {
                        let Some(naive) = date.and_hms_opt(hour, minute, second) else {
                            continue;
                        };
                        if naive < start {
                            continue;
                        }
                        if let Some(found) = tz.from_local_datetime(&naive).earliest() {
                            return Some(found);
                        }
                    }
                }
            }
        }
        None
    }
}

fn allows(values: Option<&[u32]>, value: u32) -> bool {
    values.is_none_or(|values| values.contains(&value))
}

fn candidates(values: Option<&[u32]>, range: u32) -> Vec<u32> {
    match values {
        Some(values) => {
            let mut sorted = values.to_vec();
            sorted.sort_unstable();
            sorted.dedup();
            sorted
        }
        None => (0..range).collect(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(u32),
    Many(Vec<u32>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<u32> {
        match self {
            Self::One(v) => vec![v],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecurrenceSpec {
    second: Option<OneOrMany>,
    minute: Option<OneOrMany>,
    hour: Option<OneOrMany>,
    day: Option<OneOrMany>,
    month: Option<OneOrMany>,
    weekday: Option<OneOrMany>,
}

impl RecurrenceSpec {
    fn validate(self) -> Result<Recurrence, String> {
        fn field(
            name: &str,
            raw: Option<OneOrMany>,
            min: u32,
            max: u32,
        ) -> Result<Option<Vec<u32>>, String> {
            let Some(raw) = raw else { return Ok(None) };
            let values = raw.into_vec();
            if values.is_empty() {
                return Err(format!("{name} must not be empty"));
            }
            if let Some(bad) = values.iter().find(|v| **v < min || **v > max) {
                return Err(format!("{name} {bad} is outside {min}..={max}"));
            }
            Ok(Some(values))
        }

        Ok(Recurrence {
            second: field("second", self.second, 0, 59)?.unwrap_or_else(|| vec![0]),
            minute: field("minute", self.minute, 0, 59)?,
            hour: field("hour", self.hour, 0, 23)?,
            day: field("day", self.day, 1, 31)?,
            month: field("month", self.month, 1, 12)?,
            weekday: field("weekday", self.weekday, 0, 6)?,
        })
    }
}

fn malformed(spec: &str, reason: String) -> ConfigurationError {
    ConfigurationError::MalformedTrigger {
        spec: spec.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().to_utc()
    }

    #[test]
    fn should_parse_five_field_cron_with_zero_seconds() {
        let trigger = Trigger::parse("0 * * * *").unwrap();
        let next = trigger.next_after(&utc("2024-05-01T10:15:30Z")).unwrap();
        assert_eq!(next, utc("2024-05-01T11:00:00Z"));
    }

    #[test]
    fn should_parse_six_field_cron_verbatim() {
        let trigger = Trigger::parse("*/10 * * * * *").unwrap();
        let next = trigger.next_after(&utc("2024-05-01T10:15:31Z")).unwrap();
        assert_eq!(next, utc("2024-05-01T10:15:40Z"));
    }

    #[test]
    fn should_parse_rfc3339_as_absolute_instant() {
        let trigger = Trigger::parse("2030-01-01T08:00:00Z").unwrap();
        assert!(matches!(trigger, Trigger::At(_)));
        let next = trigger.next_after(&utc("2029-12-31T00:00:00Z"));
        assert_eq!(next, Some(utc("2030-01-01T08:00:00Z")));
    }

    #[test]
    fn should_not_fire_absolute_instant_in_the_past() {
        let trigger = Trigger::parse("2020-01-01T08:00:00Z").unwrap();
        assert_eq!(trigger.next_after(&utc("2024-01-01T00:00:00Z")), None);
    }

    #[test]
    fn should_reject_malformed_cron() {
        let err = Trigger::parse("every day").unwrap_err();
        assert!(matches!(err, ConfigurationError::MalformedTrigger { .. }));
        assert!(Trigger::parse("99 * * * *").is_err());
    }

    #[test]
    fn should_convert_epoch_millis_to_instant() {
        let trigger = Trigger::at_millis(1_700_000_000_000).unwrap();
        assert!(matches!(trigger, Trigger::At(_)));
    }

    #[test]
    fn should_fire_recurrence_at_given_hour_and_minute() {
        let trigger = Trigger::recurrence(&json!({"hour": 7, "minute": 30})).unwrap();
        let next = trigger.next_after(&utc("2024-05-01T10:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-05-02T07:30:00Z"));
    }

    #[test]
    fn should_fire_recurrence_on_listed_weekdays_only() {
        // 2024-05-01 is a Wednesday.
        let trigger =
            Trigger::recurrence(&json!({"weekday": [0, 6], "hour": 9, "minute": 0})).unwrap();
        let next = trigger.next_after(&utc("2024-05-01T10:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-05-04T09:00:00Z"));
    }

    #[test]
    fn should_fire_recurrence_every_minute_when_only_second_defaults() {
        let trigger = Trigger::recurrence(&json!({})).unwrap();
        let next = trigger.next_after(&utc("2024-05-01T10:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-05-01T10:01:00Z"));
    }

    #[test]
    fn should_reject_recurrence_with_unknown_key() {
        assert!(Trigger::recurrence(&json!({"fortnight": 1})).is_err());
    }

    #[test]
    fn should_reject_recurrence_out_of_range() {
        let err = Trigger::recurrence(&json!({"hour": 24})).unwrap_err();
        let ConfigurationError::MalformedTrigger { reason, .. } = err else {
            panic!("expected malformed trigger");
        };
        assert!(reason.contains("hour 24"));
    }

    #[test]
    fn should_find_leap_day_recurrence() {
        let trigger =
            Trigger::recurrence(&json!({"month": 2, "day": 29, "hour": 0, "minute": 0})).unwrap();
        let next = trigger.next_after(&utc("2025-03-01T00:00:00Z")).unwrap();
        assert_eq!(next, utc("2028-02-29T00:00:00Z"));
    }

    #[test]
    fn should_display_trigger_variants() {
        assert_eq!(
            Trigger::parse("0 8 * * *").unwrap().to_string(),
            "cron(0 0 8 * * *)"
        );
        assert!(
            Trigger::parse("2030-01-01T08:00:00Z")
                .unwrap()
                .to_string()
                .starts_with("at(2030-01-01T08:00:00")
        );
    }
}
