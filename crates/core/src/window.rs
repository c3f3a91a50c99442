//! Calendar-month window planning.
//!
//! A requested range is clipped to the dataset's availability, the start is
//! floored to the first of its month and the end is ceiled to the next month
//! boundary, then the span is cut into one [`DateWindow`] per month.

use std::fmt;

use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::error::PlanError;

/// One calendar month, `[start, end)`.
///
/// `start` is always the first day of a month and `end` the first day of the
/// following month. The only constructors are [`DateWindow::containing`] and
/// [`DateWindow::next`], so the invariant holds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateWindow {
    start: Date,
    end: Date,
}

impl DateWindow {
    /// The month that contains `date`. `None` only at the end of the calendar.
    pub fn containing(date: Date) -> Option<Self> {
        let start = first_of_month(date);
        let end = next_month_start(start)?;
        Some(DateWindow { start, end })
    }

    /// The month immediately after this one.
    pub fn next(&self) -> Option<Self> {
        DateWindow::containing(self.end)
    }

    pub fn start(&self) -> Date {
        self.start
    }

    /// Exclusive end: the first day of the following month.
    pub fn end(&self) -> Date {
        self.end
    }

    /// Window start as midnight UTC.
    pub fn start_instant(&self) -> OffsetDateTime {
        self.start.midnight().assume_utc()
    }

    /// Window end as midnight UTC.
    pub fn end_instant(&self) -> OffsetDateTime {
        self.end.midnight().assume_utc()
    }

    /// `YYYY-MM`, used in file names and log lines.
    pub fn label(&self) -> String {
        format!("{:04}-{:02}", self.start.year(), u8::from(self.start.month()))
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Parse a CLI or service boundary.
///
/// Accepts `YYYY-MM-DD` (taken as midnight UTC) and `YYYY-MM-DDTHH:MM:SSZ`.
pub fn parse_boundary(text: &str) -> Result<OffsetDateTime, PlanError> {
    let trimmed = text.trim();

    if let Ok(dt) = PrimitiveDateTime::parse(
        trimmed,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z"),
    ) {
        return Ok(dt.assume_utc());
    }

    Date::parse(trimmed, format_description!("[year]-[month]-[day]"))
        .map(|date| date.midnight().assume_utc())
        .map_err(|_| PlanError::InvalidDate {
            input: text.to_string(),
        })
}

/// Render an instant as `YYYY-MM-DDTHH:MM:SSZ` in UTC.
pub fn format_timestamp(instant: OffsetDateTime) -> String {
    let utc = instant.to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        utc.year(),
        u8::from(utc.month()),
        utc.day(),
        utc.hour(),
        utc.minute(),
        utc.second()
    )
}

/// Reject a request whose own start lies after its own end.
///
/// Runs before availability is known, so a contradictory request fails
/// without touching the network.
pub fn check_requested(
    requested_start: Option<OffsetDateTime>,
    requested_end: Option<OffsetDateTime>,
) -> Result<(), PlanError> {
    if let (Some(start), Some(end)) = (requested_start, requested_end) {
        if start > end {
            return Err(PlanError::InvalidRange {
                start: format_timestamp(start),
                end: format_timestamp(end),
            });
        }
    }
    Ok(())
}

/// Plan the monthly windows for a request against the dataset's availability.
///
/// The effective start is the later of the requested and available starts,
/// the effective end the earlier of the two ends. The result is every
/// calendar month in `[floor(start), ceil(end))`, oldest first.
pub fn plan(
    requested_start: Option<OffsetDateTime>,
    requested_end: Option<OffsetDateTime>,
    available_start: OffsetDateTime,
    available_end: OffsetDateTime,
) -> Result<Vec<DateWindow>, PlanError> {
    let start = requested_start.map_or(available_start, |s| s.max(available_start));
    let end = requested_end.map_or(available_end, |e| e.min(available_end));

    let first = first_of_month(start.to_offset(UtcOffset::UTC).date());
    let last = ceil_to_month(end).ok_or_else(|| PlanError::OutOfCalendar {
        date: format_timestamp(end),
    })?;

    if first >= last {
        return Err(PlanError::InvalidRange {
            start: format_timestamp(start),
            end: format_timestamp(end),
        });
    }

    let mut windows = Vec::new();
    let mut current = DateWindow::containing(first);
    while let Some(window) = current {
        if window.end > last {
            break;
        }
        windows.push(window);
        current = window.next();
    }
    Ok(windows)
}

fn first_of_month(date: Date) -> Date {
    date - time::Duration::days(i64::from(date.day()) - 1)
}

fn next_month_start(date: Date) -> Option<Date> {
    let (year, month) = match date.month() {
        Month::December => (date.year().checked_add(1)?, Month::January),
        month => (date.year(), month.next()),
    };
    Date::from_calendar_date(year, month, 1).ok()
}

/// First month boundary at or after `instant`.
fn ceil_to_month(instant: OffsetDateTime) -> Option<Date> {
    let utc = instant.to_offset(UtcOffset::UTC);
    let date = utc.date();
    if date.day() == 1 && utc.time() == Time::MIDNIGHT {
        Some(date)
    } else {
        next_month_start(date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    fn at(text: &str) -> OffsetDateTime {
        parse_boundary(text).unwrap()
    }

    fn labels(windows: &[DateWindow]) -> Vec<String> {
        windows.iter().map(DateWindow::label).collect()
    }

    #[test]
    fn whole_months_yield_exact_windows() {
        let windows = plan(
            Some(at("2022-05-01")),
            Some(at("2022-08-01")),
            at("2020-01-01"),
            at("2024-01-01"),
        )
        .unwrap();
        assert_eq!(labels(&windows), vec!["2022-05", "2022-06", "2022-07"]);
    }

    #[test]
    fn open_end_is_clipped_and_ceiled() {
        let windows = plan(
            Some(at("2022-05-15T00:00:00Z")),
            None,
            at("2021-01-01"),
            at("2022-09-10"),
        )
        .unwrap();
        assert_eq!(windows.len(), 5);
        assert_eq!(windows[0].start(), date!(2022 - 05 - 01));
        assert_eq!(windows[4].end(), date!(2022 - 10 - 01));
    }

    #[test]
    fn request_outside_availability_is_clipped() {
        let windows = plan(
            Some(at("2019-01-01")),
            Some(at("2030-01-01")),
            at("2023-03-22T04:00:00Z"),
            at("2023-06-19T10:30:00Z"),
        )
        .unwrap();
        assert_eq!(
            labels(&windows),
            vec!["2023-03", "2023-04", "2023-05", "2023-06"]
        );
    }

    #[test]
    fn end_one_day_past_boundary_gains_a_month() {
        let on_boundary = plan(None, None, at("2023-11-01"), at("2024-04-01")).unwrap();
        assert_eq!(on_boundary.len(), 5);

        let past_boundary = plan(None, None, at("2023-11-01"), at("2024-04-02")).unwrap();
        assert_eq!(past_boundary.len(), 6);
        assert_eq!(past_boundary[5].label(), "2024-04");
    }

    #[test]
    fn time_of_day_on_the_first_still_includes_that_month() {
        let windows = plan(None, None, at("2022-07-10"), at("2022-09-01T05:00:00Z")).unwrap();
        assert_eq!(labels(&windows), vec!["2022-07", "2022-08", "2022-09"]);
    }

    #[test]
    fn windows_are_contiguous_single_months() {
        let windows = plan(None, None, at("2019-10-17"), at("2022-03-03")).unwrap();
        assert_eq!(windows.first().unwrap().label(), "2019-10");
        assert_eq!(windows.last().unwrap().label(), "2022-03");
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start(), "gap or overlap");
            assert!(pair[0] < pair[1]);
        }
        for window in &windows {
            assert_eq!(window.start().day(), 1);
            assert_eq!(window.end().day(), 1);
            assert!(window.start() < window.end());
            assert_eq!(window.next().unwrap().start(), window.end());
        }
    }

    #[test]
    fn december_rolls_into_january() {
        let window = DateWindow::containing(date!(2023 - 12 - 25)).unwrap();
        assert_eq!(window.start(), date!(2023 - 12 - 01));
        assert_eq!(window.end(), date!(2024 - 01 - 01));
    }

    #[test]
    fn inverted_effective_range_is_rejected() {
        let err = plan(
            Some(at("2022-08-01")),
            Some(at("2022-05-01")),
            at("2020-01-01"),
            at("2024-01-01"),
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::InvalidRange { .. }));
    }

    #[test]
    fn request_entirely_after_availability_is_rejected() {
        let err = plan(
            Some(at("2023-02-01")),
            None,
            at("2022-01-01"),
            at("2022-06-15"),
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::InvalidRange { .. }));
    }

    #[test]
    fn parse_accepts_both_formats() {
        assert_eq!(at("2022-05-15"), datetime!(2022-05-15 0:00 UTC));
        assert_eq!(
            at("2022-05-15T13:45:10Z"),
            datetime!(2022-05-15 13:45:10 UTC)
        );
    }

    #[test]
    fn parse_rejects_other_formats() {
        for bad in ["2022/05/15", "15-05-2022", "2022-05-15T13:45:10", "", "soon"] {
            let err = parse_boundary(bad).unwrap_err();
            assert!(matches!(err, PlanError::InvalidDate { .. }), "{}", bad);
        }
    }

    #[test]
    fn check_requested_flags_contradictions_only() {
        assert!(check_requested(Some(at("2022-05-01")), Some(at("2022-05-01"))).is_ok());
        assert!(check_requested(None, Some(at("2022-05-01"))).is_ok());
        assert!(check_requested(Some(at("2022-06-01")), Some(at("2022-05-01"))).is_err());
    }

    #[test]
    fn timestamp_formatting_matches_service_format() {
        assert_eq!(
            format_timestamp(datetime!(2022-05-01 0:00 UTC)),
            "2022-05-01T00:00:00Z"
        );
    }
}
