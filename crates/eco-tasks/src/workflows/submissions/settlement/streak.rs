use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Result of advancing a streak for one settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakUpdate {
    pub days: u32,
    pub best: u32,
}

/// UTC calendar day of a timestamp; time-of-day is discarded.
pub fn utc_day(instant: DateTime<Utc>) -> NaiveDate {
    instant.date_naive()
}

/// The calendar day before `today`, saturating at the earliest representable date.
pub fn previous_day(today: NaiveDate) -> NaiveDate {
    today.checked_sub_days(Days::new(1)).unwrap_or(today)
}

/// Next streak length given the day of the last credited settlement.
///
/// Same day keeps the streak (never below one), the day before extends it,
/// anything older or absent starts a fresh streak of one.
pub fn next_streak(
    last_date: Option<NaiveDate>,
    current_streak: u32,
    today: NaiveDate,
    yesterday: NaiveDate,
) -> u32 {
    match last_date {
        None => 1,
        Some(last) if last == today => current_streak.max(1),
        Some(last) if last == yesterday => current_streak.saturating_add(1),
        Some(_) => 1,
    }
}

pub fn advance_streak(
    last_date: Option<NaiveDate>,
    current_streak: u32,
    best_streak: u32,
    today: NaiveDate,
) -> StreakUpdate {
    let days = next_streak(last_date, current_streak, today, previous_day(today));
    StreakUpdate {
        days,
        best: best_streak.max(days),
    }
}
