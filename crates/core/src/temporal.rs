//! Date ranges from natural-language query text.
//!
//! Rules are tried in a fixed order and the first rule with a valid match
//! wins. Explicit dates come first so that `2026-02-10` or `Feb 10` is never
//! read as a month-name phrase.

use crate::models::DateRange;
use chrono::{Datelike, Days, Local, NaiveDate, Weekday};
use regex::{Captures, Regex};
use std::sync::LazyLock;

const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec";
const FULL_MONTHS_EXCEPT_MAY: &str =
    "january|february|march|april|june|july|august|september|october|november|december";
const WEEKDAYS: &str = "monday|tuesday|wednesday|thursday|friday|saturday|sunday|tues|thurs|mon|tue|wed|thu|fri|sat|sun";
const LEAD_IN: &str = r"(?:\b(?:from|during|over|for|since|in|on)\s+(?:the\s+)?)?";

type Resolve = fn(&Captures<'_>, NaiveDate) -> Option<DateRange>;

struct Rule {
    pattern: Regex,
    resolve: Resolve,
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let table: [(String, Resolve); 13] = [
        (format!(r"{LEAD_IN}\b(\d{{4}})-(\d{{2}})-(\d{{2}})\b"), iso_date),
        (
            format!(r"{LEAD_IN}\b({MONTHS})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?\b(?:,?\s+(\d{{4}})\b)?"),
            month_day,
        ),
        (format!(r"{LEAD_IN}\btoday\b"), today),
        (format!(r"{LEAD_IN}\byesterday\b"), yesterday),
        (format!(r"{LEAD_IN}\bthis\s+week\b"), this_week),
        (format!(r"{LEAD_IN}\blast\s+week\b"), last_week),
        (format!(r"{LEAD_IN}\b(?:past|last)\s+(\d+)\s+days?\b"), last_n_days),
        (format!(r"{LEAD_IN}\bthis\s+month\b"), this_month),
        (format!(r"{LEAD_IN}\blast\s+month\b"), last_month),
        (
            format!(r"\b(?:in|from|during)\s+({MONTHS})\b(?:\s+(\d{{4}})\b)?"),
            named_month,
        ),
        (
            format!(r"\b({FULL_MONTHS_EXCEPT_MAY})\b(?:\s+(\d{{4}})\b)?"),
            named_month,
        ),
        (format!(r"{LEAD_IN}\blast\s+({WEEKDAYS})\b"), last_weekday),
        (format!(r"\bon\s+({WEEKDAYS})\b"), on_weekday),
    ];

    table
        .into_iter()
        .map(|(pattern, resolve)| Rule {
            pattern: Regex::new(&format!("(?i){pattern}")).expect("temporal pattern is valid"),
            resolve,
        })
        .collect()
});

/// A resolved range together with the byte span it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalMatch {
    pub range: DateRange,
    pub start: usize,
    pub end: usize,
}

impl TemporalMatch {
    /// The query text with the matched expression removed.
    pub fn strip(&self, text: &str) -> String {
        let remaining = format!("{} {}", &text[..self.start], &text[self.end..]);
        remaining.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

pub fn find(text: &str, today: NaiveDate) -> Option<TemporalMatch> {
    RULES.iter().find_map(|rule| {
        rule.pattern.captures_iter(text).find_map(|captures| {
            let whole = captures.get(0)?;
            (rule.resolve)(&captures, today).map(|range| TemporalMatch {
                range,
                start: whole.start(),
                end: whole.end(),
            })
        })
    })
}

pub fn parse(text: &str, today: NaiveDate) -> Option<DateRange> {
    find(text, today).map(|found| found.range)
}

pub fn parse_now(text: &str) -> Option<DateRange> {
    parse(text, Local::now().date_naive())
}

/// Removes the first temporal expression, if any.
pub fn strip_temporal(text: &str, today: NaiveDate) -> String {
    match find(text, today) {
        Some(found) => found.strip(text),
        None => text.trim().to_string(),
    }
}

fn range(start: NaiveDate, end: NaiveDate, expression: impl Into<String>) -> Option<DateRange> {
    Some(DateRange {
        start,
        end,
        expression: expression.into(),
    })
}

fn iso_date(captures: &Captures<'_>, _today: NaiveDate) -> Option<DateRange> {
    let year = captures[1].parse().ok()?;
    let month = captures[2].parse().ok()?;
    let day = captures[3].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(DateRange::single(date, date.format("%Y-%m-%d").to_string()))
}

fn month_day(captures: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    let month = month_number(&captures[1])?;
    let day = captures[2].parse().ok()?;
    let date = match captures.get(3) {
        Some(year) => NaiveDate::from_ymd_opt(year.as_str().parse().ok()?, month, day)?,
        None => {
            let this_year = NaiveDate::from_ymd_opt(today.year(), month, day);
            match this_year {
                Some(date) if date <= today => date,
                _ => NaiveDate::from_ymd_opt(today.year() - 1, month, day)?,
            }
        }
    };
    let expression = format!("{} {}", month_name(month), day);
    Some(DateRange::single(date, expression))
}

fn today(_captures: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    range(today, today, "today")
}

fn yesterday(_captures: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    let date = today.pred_opt()?;
    range(date, date, "yesterday")
}

fn monday_of(date: NaiveDate) -> Option<NaiveDate> {
    date.checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
}

fn this_week(_captures: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    range(monday_of(today)?, today, "this week")
}

fn last_week(_captures: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    let this_monday = monday_of(today)?;
    let start = this_monday.checked_sub_days(Days::new(7))?;
    range(start, this_monday.pred_opt()?, "last week")
}

fn last_n_days(captures: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    let days: u64 = captures[1].parse().ok()?;
    let start = today.checked_sub_days(Days::new(days))?;
    range(start, today, format!("last {days} days"))
}

fn this_month(_captures: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    range(today.with_day(1)?, today, "this month")
}

fn last_month(_captures: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    let end = today.with_day(1)?.pred_opt()?;
    range(end.with_day(1)?, end, "last month")
}

/// A month name without a day means the most recent such month.
fn named_month(captures: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    let month = month_number(&captures[1])?;
    let year = match captures.get(2) {
        Some(year) => year.as_str().parse().ok()?,
        None if month > today.month() => today.year() - 1,
        None => today.year(),
    };
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    range(start, next.pred_opt()?, month_name(month))
}

fn last_weekday(captures: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    let weekday = weekday_from(&captures[1])?;
    let days_ago = match days_since(today, weekday) {
        0 => 7,
        days => days,
    };
    let date = today.checked_sub_days(Days::new(days_ago))?;
    range(date, date, format!("last {}", weekday_name(weekday)))
}

fn on_weekday(captures: &Captures<'_>, today: NaiveDate) -> Option<DateRange> {
    let weekday = weekday_from(&captures[1])?;
    let date = today.checked_sub_days(Days::new(days_since(today, weekday)))?;
    range(date, date, format!("on {}", weekday_name(weekday)))
}

fn days_since(today: NaiveDate, weekday: Weekday) -> u64 {
    let today_index = today.weekday().num_days_from_monday();
    let target = weekday.num_days_from_monday();
    u64::from((today_index + 7 - target) % 7)
}

fn month_number(name: &str) -> Option<u32> {
    let prefix = name.get(..3)?.to_ascii_lowercase();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn month_name(month: u32) -> &'static str {
    const NAMES: [&str; 12] = [
        "january", "february", "march", "april", "may", "june", "july", "august", "september",
        "october", "november", "december",
    ];
    NAMES[(month as usize).saturating_sub(1) % 12]
}

fn weekday_from(name: &str) -> Option<Weekday> {
    let prefix = name.get(..3)?.to_ascii_lowercase();
    let weekday = match prefix.as_str() {
        "mon" => Weekday::Mon,
        "tue" => Weekday::Tue,
        "wed" => Weekday::Wed,
        "thu" => Weekday::Thu,
        "fri" => Weekday::Fri,
        "sat" => Weekday::Sat,
        "sun" => Weekday::Sun,
        _ => return None,
    };
    Some(weekday)
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2026-02-12 is a Thursday.
    fn today() -> NaiveDate {
        date("2026-02-12")
    }

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
    }

    fn bounds(text: &str) -> Option<(NaiveDate, NaiveDate)> {
        parse(text, today()).map(|range| (range.start, range.end))
    }

    #[test]
    fn this_week_starts_on_monday() {
        let range = parse("meetings this week", today()).unwrap();
        assert_eq!(range.start, date("2026-02-09"));
        assert_eq!(range.end, today());
        assert_eq!(range.expression, "this week");
    }

    #[test]
    fn last_month_is_the_full_previous_month() {
        assert_eq!(
            bounds("notes from last month"),
            Some((date("2026-01-01"), date("2026-01-31")))
        );
    }

    #[test]
    fn unrelated_text_has_no_range() {
        assert_eq!(parse("random query", today()), None);
        assert_eq!(parse("what may happen next", today()), None);
    }

    #[test]
    fn relative_days() {
        assert_eq!(bounds("today"), Some((today(), today())));
        assert_eq!(
            bounds("what did we discuss yesterday"),
            Some((date("2026-02-11"), date("2026-02-11")))
        );
        assert_eq!(
            bounds("last week"),
            Some((date("2026-02-02"), date("2026-02-08")))
        );
        assert_eq!(
            bounds("past 7 days action items"),
            Some((date("2026-02-05"), today()))
        );
        assert_eq!(bounds("this month's 1:1s"), Some((date("2026-02-01"), today())));
    }

    #[test]
    fn month_names_resolve_to_the_most_recent_month() {
        assert_eq!(
            bounds("January performance reviews"),
            Some((date("2026-01-01"), date("2026-01-31")))
        );
        assert_eq!(
            bounds("meetings in March"),
            Some((date("2025-03-01"), date("2025-03-31")))
        );
        assert_eq!(
            bounds("budget from dec"),
            Some((date("2025-12-01"), date("2025-12-31")))
        );
        assert_eq!(
            bounds("offsite in February 2024"),
            Some((date("2024-02-01"), date("2024-02-29")))
        );
    }

    #[test]
    fn explicit_dates_win_over_month_phrases() {
        assert_eq!(
            bounds("notes on 2026-01-15 in March"),
            Some((date("2026-01-15"), date("2026-01-15")))
        );
        assert_eq!(bounds("Feb 10 sync"), Some((date("2026-02-10"), date("2026-02-10"))));
        assert_eq!(
            bounds("December 25 party"),
            Some((date("2025-12-25"), date("2025-12-25")))
        );
        assert_eq!(
            bounds("march 3, 2024 review"),
            Some((date("2024-03-03"), date("2024-03-03")))
        );
    }

    #[test]
    fn invalid_dates_are_skipped() {
        assert_eq!(parse("2026-13-45", today()), None);
        assert_eq!(parse("Feb 30 notes", today()), None);
    }

    #[test]
    fn weekdays() {
        assert_eq!(
            bounds("notes from last Monday"),
            Some((date("2026-02-09"), date("2026-02-09")))
        );
        assert_eq!(
            bounds("last thursday"),
            Some((date("2026-02-05"), date("2026-02-05")))
        );
        assert_eq!(
            bounds("what happened on Thursday"),
            Some((date("2026-02-12"), date("2026-02-12")))
        );
        assert_eq!(
            bounds("what happened on tue"),
            Some((date("2026-02-10"), date("2026-02-10")))
        );
    }

    #[test]
    fn last_month_is_not_read_as_a_weekday() {
        let range = parse("last month", today()).unwrap();
        assert_eq!(range.expression, "last month");
    }

    #[test]
    fn stripping_removes_the_phrase_and_its_lead_in() {
        assert_eq!(
            strip_temporal("notes from last month about hiring", today()),
            "notes about hiring"
        );
        assert_eq!(
            strip_temporal("highlights from all my meetings this week?", today()),
            "highlights from all my meetings ?"
        );
        assert_eq!(strip_temporal("  no dates here ", today()), "no dates here");
    }
}
