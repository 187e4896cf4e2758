// 🔁 Recurrence rules for training series
//
// An RRULE-like string (`FREQ=WEEKLY;INTERVAL=1;BYDAY=MO;COUNT=5`) and a
// preview expander. Only FREQ, INTERVAL, BYDAY, COUNT and UNTIL are read;
// other RFC 5545 parts (BYMONTHDAY, BYSETPOS, ...) are ignored and there is
// no timezone handling: timestamps are local wall-clock times.

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{LedgerError, LedgerResult};

/// Upper bound when the rule has no COUNT
pub const DEFAULT_MAX_COUNT: usize = 1000;

// ============================================================================
// FREQUENCY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
        }
    }
}

impl FromStr for Frequency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DAILY" => Ok(Frequency::Daily),
            "WEEKLY" => Ok(Frequency::Weekly),
            "MONTHLY" => Ok(Frequency::Monthly),
            "YEARLY" => Ok(Frequency::Yearly),
            other => Err(LedgerError::InvalidRecurrence(format!("unsupported FREQ {}", other))),
        }
    }
}

fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

pub fn parse_weekday_code(code: &str) -> LedgerResult<Weekday> {
    match code.trim().to_uppercase().as_str() {
        "MO" => Ok(Weekday::Mon),
        "TU" => Ok(Weekday::Tue),
        "WE" => Ok(Weekday::Wed),
        "TH" => Ok(Weekday::Thu),
        "FR" => Ok(Weekday::Fri),
        "SA" => Ok(Weekday::Sat),
        "SU" => Ok(Weekday::Sun),
        other => Err(LedgerError::InvalidRecurrence(format!("unknown BYDAY {}", other))),
    }
}

// ============================================================================
// RECURRENCE RULE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRule {
    pub freq: Frequency,

    #[serde(default = "default_interval")]
    pub interval: u32,

    #[serde(default)]
    pub by_day: Vec<Weekday>,

    /// Takes precedence over `until`
    #[serde(default)]
    pub count: Option<u32>,

    /// Last allowed day, inclusive
    #[serde(default)]
    pub until: Option<NaiveDate>,
}

fn default_interval() -> u32 {
    1
}

impl RecurrenceRule {
    pub fn new(freq: Frequency) -> Self {
        RecurrenceRule {
            freq,
            interval: 1,
            by_day: Vec::new(),
            count: None,
            until: None,
        }
    }

    pub fn every(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    pub fn on(mut self, days: &[Weekday]) -> Self {
        self.by_day = days.to_vec();
        self
    }

    pub fn times(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn until(mut self, until: NaiveDate) -> Self {
        self.until = Some(until);
        self
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FREQ={};INTERVAL={}", self.freq.as_str(), self.interval.max(1))?;

        if !self.by_day.is_empty() {
            let days: Vec<&str> = self.by_day.iter().map(|d| weekday_code(*d)).collect();
            write!(f, ";BYDAY={}", days.join(","))?;
        }

        if let Some(count) = self.count {
            write!(f, ";COUNT={}", count)?;
        } else if let Some(until) = self.until {
            write!(f, ";UNTIL={}", until.format("%Y%m%d"))?;
        }

        Ok(())
    }
}

impl FromStr for RecurrenceRule {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_rrule(s)
    }
}

/// Serialise a rule: `FREQ=..;INTERVAL=..[;BYDAY=..][;COUNT=..|;UNTIL=YYYYMMDD]`
pub fn build_rrule(rule: &RecurrenceRule) -> String {
    rule.to_string()
}

fn parse_until(value: &str) -> LedgerResult<NaiveDate> {
    let value = value.trim();
    let compact = value.get(..8).unwrap_or(value);

    NaiveDate::parse_from_str(compact, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(value.get(..10).unwrap_or(value), "%Y-%m-%d"))
        .map_err(|_| LedgerError::InvalidRecurrence(format!("bad UNTIL {}", value)))
}

/// Parse an RRULE-like string. An optional `RRULE:` prefix is accepted and
/// unknown parts are skipped.
pub fn parse_rrule(input: &str) -> LedgerResult<RecurrenceRule> {
    let body = input.trim();
    let body = body.strip_prefix("RRULE:").unwrap_or(body);

    let mut freq = None;
    let mut rule = RecurrenceRule::new(Frequency::Daily);

    for part in body.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| LedgerError::InvalidRecurrence(format!("malformed part {}", part)))?;

        match key.trim().to_uppercase().as_str() {
            "FREQ" => freq = Some(value.parse::<Frequency>()?),
            "INTERVAL" => {
                rule.interval = value
                    .trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|i| *i > 0)
                    .ok_or_else(|| LedgerError::InvalidRecurrence(format!("bad INTERVAL {}", value)))?;
            }
            "BYDAY" => {
                rule.by_day = value
                    .split(',')
                    .filter(|d| !d.trim().is_empty())
                    .map(parse_weekday_code)
                    .collect::<LedgerResult<Vec<_>>>()?;
            }
            "COUNT" => {
                rule.count = Some(
                    value
                        .trim()
                        .parse::<u32>()
                        .map_err(|_| LedgerError::InvalidRecurrence(format!("bad COUNT {}", value)))?,
                );
            }
            "UNTIL" => rule.until = Some(parse_until(value)?),
            _ => {}
        }
    }

    rule.freq = freq.ok_or_else(|| LedgerError::InvalidRecurrence("missing FREQ".to_string()))?;
    Ok(rule)
}

// ============================================================================
// EXPANSION
// ============================================================================

/// Same day-of-month `months` later, clamped to the end of shorter months
fn add_months_clamped(start: NaiveDateTime, months: u32) -> Option<NaiveDateTime> {
    start.checked_add_months(Months::new(months))
}

fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Expand `rule` from `start` into at most `min(max, COUNT or 1000)`
/// timestamps. `start` is always the first occurrence.
pub fn expand_rule(start: NaiveDateTime, rule: &RecurrenceRule, max: usize) -> Vec<NaiveDateTime> {
    let limit = max.min(rule.count.map(|c| c as usize).unwrap_or(DEFAULT_MAX_COUNT));
    let interval = rule.interval.max(1);
    let within_until = |dt: &NaiveDateTime| rule.until.map_or(true, |until| dt.date() <= until);

    let mut occurrences = Vec::new();
    if limit == 0 || !within_until(&start) {
        return occurrences;
    }

    if rule.freq == Frequency::Weekly && !rule.by_day.is_empty() {
        let mut days: Vec<u32> = rule.by_day.iter().map(|d| d.num_days_from_monday()).collect();
        days.sort_unstable();
        days.dedup();

        occurrences.push(start);
        let first_monday = monday_of(start.date());
        let mut week = 0i64;

        // Each iteration covers one selected week, so this terminates with
        // the limit or the UNTIL bound.
        // Date arithmetic past chrono's range ends the expansion
        'weeks: loop {
            let Some(monday) = week
                .checked_mul(interval as i64)
                .and_then(Duration::try_weeks)
                .and_then(|offset| first_monday.checked_add_signed(offset))
            else {
                break;
            };
            for offset in &days {
                let Some(day) = Duration::try_days(*offset as i64).and_then(|d| monday.checked_add_signed(d)) else {
                    break 'weeks;
                };
                let candidate = day.and_time(start.time());
                if candidate <= start {
                    continue;
                }
                if !within_until(&candidate) || occurrences.len() >= limit {
                    break 'weeks;
                }
                occurrences.push(candidate);
            }
            if occurrences.len() >= limit {
                break;
            }
            week += 1;
        }

        return occurrences;
    }

    for k in 0..limit as u32 {
        let step = k.saturating_mul(interval);
        let next = match rule.freq {
            Frequency::Daily => Duration::try_days(step as i64).and_then(|d| start.checked_add_signed(d)),
            Frequency::Weekly => Duration::try_weeks(step as i64).and_then(|d| start.checked_add_signed(d)),
            Frequency::Monthly => add_months_clamped(start, step),
            Frequency::Yearly => step.checked_mul(12).and_then(|m| add_months_clamped(start, m)),
        };

        match next {
            Some(dt) if within_until(&dt) => occurrences.push(dt),
            _ => break,
        }
    }

    occurrences
}

/// Parse `rrule` and expand it from `start`.
pub fn expand_occurrences(start: NaiveDateTime, rrule: &str, max: usize) -> LedgerResult<Vec<NaiveDateTime>> {
    let rule = parse_rrule(rrule)?;
    Ok(expand_rule(start, &rule, max))
}

// ============================================================================
// DESCRIPTION
// ============================================================================

fn weekday_label(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

/// Short human summary, e.g. "Every 2 weeks on Mon, Thu, 10 times"
pub fn describe_rule(rule: &RecurrenceRule) -> String {
    let unit = match rule.freq {
        Frequency::Daily => "day",
        Frequency::Weekly => "week",
        Frequency::Monthly => "month",
        Frequency::Yearly => "year",
    };

    let mut text = if rule.interval <= 1 {
        format!("Every {}", unit)
    } else {
        format!("Every {} {}s", rule.interval, unit)
    };

    if !rule.by_day.is_empty() {
        let days: Vec<&str> = rule.by_day.iter().map(|d| weekday_label(*d)).collect();
        text.push_str(&format!(" on {}", days.join(", ")));
    }

    if let Some(count) = rule.count {
        text.push_str(&format!(", {} times", count));
    } else if let Some(until) = rule.until {
        text.push_str(&format!(", until {}", until.format("%Y-%m-%d")));
    }

    text
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    #[test]
    fn test_build_weekly_rule() {
        let rule = RecurrenceRule::new(Frequency::Weekly).every(1).on(&[Weekday::Mon]).times(5);
        assert_eq!(build_rrule(&rule), "FREQ=WEEKLY;INTERVAL=1;BYDAY=MO;COUNT=5");
    }

    #[test]
    fn test_build_prefers_count_over_until() {
        let rule = RecurrenceRule::new(Frequency::Daily)
            .every(2)
            .times(3)
            .until(NaiveDate::from_ymd_opt(2025, 7, 1).unwrap());
        assert_eq!(build_rrule(&rule), "FREQ=DAILY;INTERVAL=2;COUNT=3");

        let rule = RecurrenceRule::new(Frequency::Monthly).until(NaiveDate::from_ymd_opt(2025, 7, 1).unwrap());
        assert_eq!(build_rrule(&rule), "FREQ=MONTHLY;INTERVAL=1;UNTIL=20250701");
    }

    #[test]
    fn test_parse_rule() {
        let rule = parse_rrule("RRULE:FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,TH;UNTIL=20250630T235959Z;BYSETPOS=1").unwrap();
        assert_eq!(rule.freq, Frequency::Weekly);
        assert_eq!(rule.interval, 2);
        assert_eq!(rule.by_day, vec![Weekday::Mon, Weekday::Thu]);
        assert_eq!(rule.until, NaiveDate::from_ymd_opt(2025, 6, 30));
        assert_eq!(rule.count, None);

        let back: RecurrenceRule = "FREQ=WEEKLY;INTERVAL=1;BYDAY=MO;COUNT=5".parse().unwrap();
        assert_eq!(back.to_string(), "FREQ=WEEKLY;INTERVAL=1;BYDAY=MO;COUNT=5");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_rrule("INTERVAL=1"), Err(LedgerError::InvalidRecurrence(_))));
        assert!(parse_rrule("FREQ=HOURLY").is_err());
        assert!(parse_rrule("FREQ=DAILY;INTERVAL=0").is_err());
        assert!(parse_rrule("FREQ=DAILY;INTERVAL=x").is_err());
        assert!(parse_rrule("FREQ=WEEKLY;BYDAY=XX").is_err());
        assert!(parse_rrule("FREQ=DAILY;COUNT=-1").is_err());
        assert!(parse_rrule("FREQ=DAILY;UNTIL=soon").is_err());
        assert!(parse_rrule("FREQ=DAILY;garbage").is_err());
    }

    #[test]
    fn test_expand_daily_with_count() {
        let dates = expand_occurrences(at(2025, 6, 1, 9), "FREQ=DAILY;INTERVAL=2;COUNT=3", 52).unwrap();
        assert_eq!(dates, vec![at(2025, 6, 1, 9), at(2025, 6, 3, 9), at(2025, 6, 5, 9)]);
    }

    #[test]
    fn test_expand_is_capped_by_max() {
        let dates = expand_occurrences(at(2025, 6, 2, 18), "FREQ=WEEKLY;INTERVAL=1;COUNT=50", 4).unwrap();
        assert_eq!(dates.len(), 4);
        assert_eq!(dates[3], at(2025, 6, 23, 18));

        let unbounded = expand_occurrences(at(2025, 6, 2, 18), "FREQ=DAILY", 5000).unwrap();
        assert_eq!(unbounded.len(), DEFAULT_MAX_COUNT);
    }

    #[test]
    fn test_expand_stops_at_until() {
        let dates = expand_occurrences(at(2025, 6, 2, 18), "FREQ=WEEKLY;UNTIL=20250616", 52).unwrap();
        assert_eq!(dates, vec![at(2025, 6, 2, 18), at(2025, 6, 9, 18), at(2025, 6, 16, 18)]);

        let none = expand_occurrences(at(2025, 6, 20, 18), "FREQ=WEEKLY;UNTIL=20250616", 52).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_monthly_clamps_to_month_end() {
        let dates = expand_occurrences(at(2025, 1, 31, 10), "FREQ=MONTHLY;COUNT=4", 52).unwrap();
        assert_eq!(
            dates,
            vec![at(2025, 1, 31, 10), at(2025, 2, 28, 10), at(2025, 3, 31, 10), at(2025, 4, 30, 10)]
        );
    }

    #[test]
    fn test_yearly_on_leap_day() {
        let dates = expand_occurrences(at(2024, 2, 29, 8), "FREQ=YEARLY;COUNT=2", 52).unwrap();
        assert_eq!(dates, vec![at(2024, 2, 29, 8), at(2025, 2, 28, 8)]);
    }

    #[test]
    fn test_weekly_multiple_days() {
        // 2025-06-02 is a Monday
        let dates = expand_occurrences(at(2025, 6, 2, 17), "FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,TH;COUNT=5", 52).unwrap();
        assert_eq!(
            dates,
            vec![
                at(2025, 6, 2, 17),
                at(2025, 6, 5, 17),
                at(2025, 6, 16, 17),
                at(2025, 6, 19, 17),
                at(2025, 6, 30, 17),
            ]
        );
    }

    #[test]
    fn test_weekly_multiple_days_huge_interval_stops() {
        // The second selected week lies beyond the representable dates
        let dates =
            expand_occurrences(at(2025, 6, 2, 9), "FREQ=WEEKLY;INTERVAL=100000000;BYDAY=MO,TH;COUNT=3", 52).unwrap();
        assert_eq!(dates, vec![at(2025, 6, 2, 9), at(2025, 6, 5, 9)]);

        let dates = expand_occurrences(at(2025, 6, 2, 9), "FREQ=WEEKLY;INTERVAL=4294967295;COUNT=3", 52).unwrap();
        assert_eq!(dates, vec![at(2025, 6, 2, 9)]);
    }

    #[test]
    fn test_weekly_byday_after_start() {
        // Start on a Wednesday, rule on Mondays: start first, then Mondays
        let dates = expand_occurrences(at(2025, 6, 4, 9), "FREQ=WEEKLY;BYDAY=MO;COUNT=3", 52).unwrap();
        assert_eq!(dates, vec![at(2025, 6, 4, 9), at(2025, 6, 9, 9), at(2025, 6, 16, 9)]);
    }

    #[test]
    fn test_weekly_byday_with_until() {
        let dates = expand_occurrences(at(2025, 6, 2, 9), "FREQ=WEEKLY;BYDAY=MO,FR;UNTIL=20250610", 52).unwrap();
        assert_eq!(dates, vec![at(2025, 6, 2, 9), at(2025, 6, 6, 9), at(2025, 6, 9, 9)]);
    }

    #[test]
    fn test_describe_rule() {
        let rule = parse_rrule("FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,TH;COUNT=10").unwrap();
        assert_eq!(describe_rule(&rule), "Every 2 weeks on Mon, Thu, 10 times");

        let rule = parse_rrule("FREQ=DAILY;UNTIL=20250701").unwrap();
        assert_eq!(describe_rule(&rule), "Every day, until 2025-07-01");
    }
}
