//! Season calendar.
//!
//! Week numbers are never stored: they are re-derived from the league's
//! start date and "today" on every call.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::types::{League, SEASON_WEEKS};

/// Week 0 means "not started".
pub const NOT_STARTED: u32 = 0;

/// Current week of the season for `league` as of `today`.
///
/// - 0 when there is no start date or `today` is before it.
/// - `floor(days_since_start / 7) + 1`, capped at 7.
/// - 7 whenever `today` is past the end date.
pub fn current_week(league: &League, today: NaiveDate) -> u32 {
    let Some(start) = league.start_date else {
        return NOT_STARTED;
    };
    if today < start {
        return NOT_STARTED;
    }

    let days = (today - start).num_days();
    let mut week = u32::try_from(days / 7 + 1)
        .unwrap_or(SEASON_WEEKS)
        .min(SEASON_WEEKS);

    if matches!(league.end_date, Some(end) if today > end) {
        week = SEASON_WEEKS;
    }
    week
}

/// End of a season starting on `start`.
pub fn season_end(start: NaiveDate) -> NaiveDate {
    start + Duration::weeks(SEASON_WEEKS as i64)
}

pub fn is_monday(date: NaiveDate) -> bool {
    date.weekday() == Weekday::Mon
}

/// Earliest Monday a season may be scheduled to start, strictly after today.
pub fn next_monday(today: NaiveDate) -> NaiveDate {
    let days_from_monday = today.weekday().num_days_from_monday() as i64;
    today + Duration::days(7 - days_from_monday)
}

/// First and last day of `week` (1-based) for a season starting on `start`.
pub fn week_bounds(start: NaiveDate, week: u32) -> (NaiveDate, NaiveDate) {
    let first = start + Duration::weeks(week.saturating_sub(1) as i64);
    (first, first + Duration::days(6))
}
