use chrono::{Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::engine::SyncError;

/// Closed interval of whole days `[start, end]` that local collections mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub start_str: String,
    pub end_str: String,
}

/// Window identity. Two windows with equal bounds are the same window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub start: String,
    pub end: String,
}

/// What an entity occupies on the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extent {
    /// A single day.
    Point(NaiveDate),
    /// Half-open interval `[start, end)`.
    Range { start: NaiveDate, end: NaiveDate },
}

impl Window {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            start_str: start.format("%Y-%m-%d").to_string(),
            end_str: end.format("%Y-%m-%d").to_string(),
        }
    }

    /// Window for a `YYYY-MM` selector. Absent or malformed selectors fall back
    /// to the month containing `today`. The start never precedes `today`.
    pub fn for_period(selector: Option<&str>, today: NaiveDate) -> Self {
        let (year, month) = match selector.map(parse_period) {
            Some(Ok(ym)) => ym,
            Some(Err(e)) => {
                tracing::debug!("{e}; using current month");
                (today.year(), today.month())
            }
            None => (today.year(), today.month()),
        };
        let Some((first, last)) = month_bounds(year, month) else {
            tracing::debug!("period {year}-{month:02} out of calendar range; using current month");
            return Self::for_period(None, today);
        };
        Self::new(first.max(today), last)
    }

    pub fn key(&self) -> WindowKey {
        WindowKey {
            start: self.start_str.clone(),
            end: self.end_str.clone(),
        }
    }

    /// A fully past month clamps to a start after its end and admits nothing.
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn admits(&self, extent: &Extent) -> bool {
        if self.is_empty() {
            return false;
        }
        match *extent {
            Extent::Point(date) => self.contains(date),
            Extent::Range { start, end } => {
                let end_exclusive = self.end.succ_opt().unwrap_or(NaiveDate::MAX);
                start < end_exclusive && end > self.start
            }
        }
    }
}

/// Parse a strict `YYYY-MM` selector.
pub fn parse_period(selector: &str) -> Result<(i32, u32), SyncError> {
    let malformed = || SyncError::WindowCompute(format!("malformed period selector {selector:?}"));
    let bytes = selector.as_bytes();
    if bytes.len() != 7 || bytes[4] != b'-' {
        return Err(malformed());
    }
    let (year, month) = (&selector[..4], &selector[5..]);
    if !year.bytes().chain(month.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let year: i32 = year.parse().map_err(|_| malformed())?;
    let month: u32 = month.parse().map_err(|_| malformed())?;
    if !(1..=12).contains(&month) {
        return Err(malformed());
    }
    Ok((year, month))
}

/// First and last day of a calendar month.
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let last = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?;
    Some((first, last))
}

/// Calendar date "now" in the reference timezone.
pub fn today_in(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn december_rolls_into_next_year() {
        let w = Window::for_period(Some("2024-12"), date("2024-06-15"));
        assert_eq!(w.start_str, "2024-12-01");
        assert_eq!(w.end_str, "2024-12-31");

        let w = Window::for_period(Some("2025-01"), date("2024-06-15"));
        assert_eq!(w.start_str, "2025-01-01");
        assert_eq!(w.end_str, "2025-01-31");
    }

    #[test]
    fn leap_february() {
        let w = Window::for_period(Some("2024-02"), date("2024-01-01"));
        assert_eq!(w.end, date("2024-02-29"));
        let w = Window::for_period(Some("2025-02"), date("2024-01-01"));
        assert_eq!(w.end, date("2025-02-28"));
    }

    #[test]
    fn current_month_clamps_to_today() {
        let w = Window::for_period(Some("2024-03"), date("2024-03-17"));
        assert_eq!(w.start, date("2024-03-17"));
        assert_eq!(w.end, date("2024-03-31"));
    }

    #[test]
    fn future_month_not_clamped() {
        let w = Window::for_period(Some("2024-04"), date("2024-03-17"));
        assert_eq!(w.start, date("2024-04-01"));
    }

    #[test]
    fn past_month_is_empty() {
        let w = Window::for_period(Some("2024-01"), date("2024-03-17"));
        assert!(w.is_empty());
        assert!(!w.admits(&Extent::Point(date("2024-01-20"))));
        assert!(!w.admits(&Extent::Range {
            start: date("2024-01-01"),
            end: date("2024-04-01"),
        }));
    }

    #[test]
    fn missing_or_malformed_selector_uses_today() {
        let today = date("2024-07-09");
        let expected = Window::new(today, date("2024-07-31"));
        assert_eq!(Window::for_period(None, today), expected);
        for bad in ["", "2024", "2024-13", "2024-00", "24-07", "2024/07", "2024-7 ", "abcd-ef"] {
            assert_eq!(Window::for_period(Some(bad), today), expected, "selector {bad:?}");
        }
    }

    #[test]
    fn parse_period_reports_window_compute_error() {
        assert_eq!(parse_period("2031-11").unwrap(), (2031, 11));
        assert!(matches!(parse_period("2031-1"), Err(SyncError::WindowCompute(_))));
    }

    #[test]
    fn key_compares_by_bounds() {
        let a = Window::new(date("2024-05-01"), date("2024-05-31"));
        let b = Window::for_period(Some("2024-05"), date("2024-01-01"));
        assert_eq!(a.key(), b.key());
        let c = Window::for_period(Some("2024-05"), date("2024-05-02"));
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn point_membership_is_inclusive() {
        let w = Window::new(date("2024-01-01"), date("2024-01-31"));
        assert!(w.admits(&Extent::Point(date("2024-01-01"))));
        assert!(w.admits(&Extent::Point(date("2024-01-31"))));
        assert!(!w.admits(&Extent::Point(date("2024-02-01"))));
        assert!(!w.admits(&Extent::Point(date("2023-12-31"))));
    }

    #[test]
    fn range_overlap() {
        let stay = Extent::Range {
            start: date("2024-01-05"),
            end: date("2024-01-10"),
        };
        let jan = Window::new(date("2024-01-01"), date("2024-01-31"));
        let feb = Window::new(date("2024-02-01"), date("2024-02-29"));
        assert!(jan.admits(&stay));
        assert!(!feb.admits(&stay));
    }

    #[test]
    fn range_edges() {
        let w = Window::new(date("2024-02-01"), date("2024-02-29"));
        // Checking out on the first day means no night inside the window.
        assert!(!w.admits(&Extent::Range {
            start: date("2024-01-28"),
            end: date("2024-02-01"),
        }));
        assert!(w.admits(&Extent::Range {
            start: date("2024-01-28"),
            end: date("2024-02-02"),
        }));
        // Checking in on the last day is inside.
        assert!(w.admits(&Extent::Range {
            start: date("2024-02-29"),
            end: date("2024-03-02"),
        }));
        assert!(!w.admits(&Extent::Range {
            start: date("2024-03-01"),
            end: date("2024-03-02"),
        }));
    }
}
