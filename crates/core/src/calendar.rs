use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CalendarError {
    #[error("unknown timezone `{0}`")]
    UnknownTimezone(String),
    #[error("unknown weekday `{0}`")]
    UnknownWeekday(String),
    #[error("business window needs at least one working day")]
    NoWorkingDays,
    #[error("business window hours must satisfy start < end <= 24 (got {start}..{end})")]
    InvalidHours { start: u32, end: u32 },
}

/// Working days and a half-open `[start_hour, end_hour)` range in a fixed timezone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusinessWindow {
    timezone: Tz,
    working_days: BTreeSet<u32>,
    start_hour: u32,
    end_hour: u32,
}

impl BusinessWindow {
    pub fn new(
        timezone: Tz,
        working_days: impl IntoIterator<Item = Weekday>,
        start_hour: u32,
        end_hour: u32,
    ) -> Result<Self, CalendarError> {
        let working_days: BTreeSet<u32> =
            working_days.into_iter().map(|day| day.num_days_from_monday()).collect();
        if working_days.is_empty() {
            return Err(CalendarError::NoWorkingDays);
        }
        if start_hour >= end_hour || end_hour > 24 {
            return Err(CalendarError::InvalidHours { start: start_hour, end: end_hour });
        }

        Ok(Self { timezone, working_days, start_hour, end_hour })
    }

    /// Builds a window from configuration strings (`"America/Sao_Paulo"`, `["mon", "tue"]`).
    pub fn parse(
        timezone: &str,
        working_days: &[String],
        start_hour: u32,
        end_hour: u32,
    ) -> Result<Self, CalendarError> {
        let timezone = timezone
            .trim()
            .parse::<Tz>()
            .map_err(|_| CalendarError::UnknownTimezone(timezone.to_string()))?;
        let days = working_days
            .iter()
            .map(|raw| {
                raw.trim()
                    .parse::<Weekday>()
                    .map_err(|_| CalendarError::UnknownWeekday(raw.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(timezone, days, start_hour, end_hour)
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn start_hour(&self) -> u32 {
        self.start_hour
    }

    pub fn end_hour(&self) -> u32 {
        self.end_hour
    }

    pub fn is_working_day(&self, day: Weekday) -> bool {
        self.working_days.contains(&day.num_days_from_monday())
    }

    /// Local date-time of `instant` in the window's timezone.
    pub fn localize(&self, instant: DateTime<Utc>) -> DateTime<Tz> {
        self.timezone.from_utc_datetime(&instant.naive_utc())
    }
}

impl Default for BusinessWindow {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::Sao_Paulo,
            working_days: (0..5).collect(),
            start_hour: 8,
            end_hour: 18,
        }
    }
}

/// True iff the local weekday is a working day and the local hour is in `[start, end)`.
pub fn is_within_business_window(instant: DateTime<Utc>, window: &BusinessWindow) -> bool {
    let local = window.localize(instant);
    window.is_working_day(local.weekday())
        && local.hour() >= window.start_hour
        && local.hour() < window.end_hour
}

/// Counts one-hour steps from `start` whose own start instant is inside the window.
///
/// The walk is linear in the wall-clock span and never recurses. A trailing partial
/// step still counts when it begins in-window.
pub fn elapsed_business_hours(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    window: &BusinessWindow,
) -> u64 {
    if end <= start {
        return 0;
    }

    let step = Duration::hours(1);
    let mut cursor = start;
    let mut hours = 0_u64;
    while cursor < end {
        if is_within_business_window(cursor, window) {
            hours += 1;
        }
        cursor += step;
    }
    hours
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc, Weekday};

    use super::{elapsed_business_hours, is_within_business_window, BusinessWindow, CalendarError};

    fn utc_window() -> BusinessWindow {
        BusinessWindow::new(
            chrono_tz::UTC,
            [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
            8,
            18,
        )
        .expect("valid window")
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        // March 2026: the 2nd is a Monday, the 7th a Saturday.
        Utc.with_ymd_and_hms(2026, 3, day, hour, minute, 0).single().expect("valid instant")
    }

    #[test]
    fn reversed_or_empty_interval_is_zero() {
        let window = utc_window();
        assert_eq!(elapsed_business_hours(at(2, 12, 0), at(2, 12, 0), &window), 0);
        assert_eq!(elapsed_business_hours(at(2, 15, 0), at(2, 9, 0), &window), 0);
    }

    #[test]
    fn monday_nine_to_six_is_nine_hours() {
        assert_eq!(elapsed_business_hours(at(2, 9, 0), at(2, 18, 0), &utc_window()), 9);
    }

    #[test]
    fn overnight_and_weekend_hours_are_not_counted() {
        let window = utc_window();
        // Friday 16:00 -> Monday 10:00: Fri 16,17 + Mon 8,9.
        assert_eq!(elapsed_business_hours(at(6, 16, 0), at(9, 10, 0), &window), 4);
        // Whole Saturday.
        assert_eq!(elapsed_business_hours(at(7, 0, 0), at(8, 0, 0), &window), 0);
    }

    #[test]
    fn window_boundaries_are_half_open() {
        let window = utc_window();
        assert!(is_within_business_window(at(2, 8, 0), &window));
        assert!(is_within_business_window(at(2, 17, 59), &window));
        assert!(!is_within_business_window(at(2, 18, 0), &window));
        assert!(!is_within_business_window(at(2, 7, 59), &window));
        assert!(!is_within_business_window(at(7, 10, 0), &window));
    }

    #[test]
    fn partial_trailing_hour_counts_once() {
        assert_eq!(elapsed_business_hours(at(2, 9, 0), at(2, 9, 30), &utc_window()), 1);
        assert_eq!(elapsed_business_hours(at(2, 17, 30), at(2, 19, 30), &utc_window()), 1);
    }

    #[test]
    fn elapsed_hours_never_decrease_as_the_end_moves_forward() {
        let window = utc_window();
        let start = at(5, 13, 15);
        let mut previous = 0;
        for n in 0..200 {
            let current = elapsed_business_hours(start, start + Duration::hours(n), &window);
            assert!(current >= previous, "hours decreased at n={n}");
            previous = current;
        }
    }

    #[test]
    fn computation_is_repeatable() {
        let window = BusinessWindow::default();
        let first = elapsed_business_hours(at(2, 10, 0), at(20, 10, 0), &window);
        let second = elapsed_business_hours(at(2, 10, 0), at(20, 10, 0), &window);
        assert_eq!(first, second);
    }

    #[test]
    fn local_timezone_shifts_the_window() {
        let window = BusinessWindow::parse(
            "America/Sao_Paulo",
            &["mon".to_string(), "tue".to_string(), "wed".to_string()],
            8,
            18,
        )
        .expect("valid window");

        // 11:00 UTC is 08:00 in Sao Paulo.
        assert!(is_within_business_window(at(2, 11, 0), &window));
        assert!(!is_within_business_window(at(2, 10, 59), &window));
        // 21:00 UTC is 18:00 local, outside.
        assert!(!is_within_business_window(at(2, 21, 0), &window));
    }

    #[test]
    fn invalid_windows_are_rejected() {
        assert_eq!(
            BusinessWindow::new(chrono_tz::UTC, [Weekday::Mon], 18, 8),
            Err(CalendarError::InvalidHours { start: 18, end: 8 })
        );
        assert_eq!(
            BusinessWindow::new(chrono_tz::UTC, Vec::<Weekday>::new(), 8, 18),
            Err(CalendarError::NoWorkingDays)
        );
        assert!(matches!(
            BusinessWindow::parse("Mars/Olympus", &["mon".to_string()], 8, 18),
            Err(CalendarError::UnknownTimezone(_))
        ));
        assert!(matches!(
            BusinessWindow::parse("UTC", &["funday".to_string()], 8, 18),
            Err(CalendarError::UnknownWeekday(_))
        ));
    }
}
