//! Period splitting
//!
//! Decomposes an inclusive date range into windows: a leading partial window,
//! whole-unit windows in between, and a trailing partial window. Whole-unit
//! windows carry no `end` and are the only ones the cache ever sees.
//!
//! ```text
//!  start=Jan 15                                         end=Mar 10
//!     |---- Jan 15..Jan 31 ----|------ Feb (whole) ------|-- Mar 1..Mar 10 --|
//!          exact                    cacheable                 exact
//! ```

use super::unit::TimeUnit;
use crate::types::Window;
use chrono::NaiveDate;

/// Splits date ranges into unit-aligned windows
#[derive(Debug, Clone, Copy, Default)]
pub struct PeriodSplitter {
    unit: TimeUnit,
}

impl PeriodSplitter {
    /// Create a splitter for the given unit
    pub fn new(unit: TimeUnit) -> Self {
        Self { unit }
    }

    /// The alignment unit
    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Split `start..=end` into chronologically ordered windows
    ///
    /// The windows are contiguous, non-overlapping, and cover the range exactly.
    /// A window has `end` set if and only if it does not span exactly one whole
    /// unit instance. An inverted range yields no windows.
    pub fn split(&self, start: NaiveDate, end: NaiveDate) -> Vec<Window> {
        if start > end {
            return Vec::new();
        }

        let unit = self.unit;
        let start_aligned = unit.is_start(start);
        let end_aligned = unit.is_end(end);

        if unit.same_instance(start, end) {
            let window = if start_aligned && end_aligned {
                Window::whole(start)
            } else {
                Window::exact(start, end)
            };
            return vec![window];
        }

        let mut windows = Vec::new();

        windows.push(if start_aligned {
            Window::whole(start)
        } else {
            Window::exact(start, unit.end_of(start))
        });

        let mut step = unit.next_start(start);
        while let Some(current) = step {
            if unit.same_instance(current, end) {
                break;
            }
            windows.push(Window::whole(current));
            step = unit.next_start(current);
        }

        let trailing_start = unit.start_of(end);
        windows.push(if end_aligned {
            Window::whole(trailing_start)
        } else {
            Window::exact(trailing_start, end)
        });

        windows
    }

    /// Last date covered by a window
    pub fn window_end(&self, window: &Window) -> NaiveDate {
        window.end.unwrap_or_else(|| self.unit.end_of(window.start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn monthly() -> PeriodSplitter {
        PeriodSplitter::new(TimeUnit::Month)
    }

    #[test]
    fn test_partial_edges_with_whole_middle() {
        let windows = monthly().split(date(2019, 1, 15), date(2019, 3, 10));
        assert_eq!(
            windows,
            vec![
                Window::exact(date(2019, 1, 15), date(2019, 1, 31)),
                Window::whole(date(2019, 2, 1)),
                Window::exact(date(2019, 3, 1), date(2019, 3, 10)),
            ]
        );
    }

    #[test]
    fn test_single_whole_month() {
        let windows = monthly().split(date(2019, 2, 1), date(2019, 2, 28));
        assert_eq!(windows, vec![Window::whole(date(2019, 2, 1))]);
    }

    #[test]
    fn test_same_month_partial() {
        let windows = monthly().split(date(2019, 2, 1), date(2019, 2, 20));
        assert_eq!(windows, vec![Window::exact(date(2019, 2, 1), date(2019, 2, 20))]);
    }

    #[test]
    fn test_single_day_is_exact() {
        let d = date(2019, 2, 1);
        assert_eq!(monthly().split(d, d), vec![Window::exact(d, d)]);
    }

    #[test]
    fn test_single_day_with_day_unit_is_whole() {
        let d = date(2019, 2, 1);
        let splitter = PeriodSplitter::new(TimeUnit::Day);
        assert_eq!(splitter.split(d, d), vec![Window::whole(d)]);
    }

    #[test]
    fn test_fully_aligned_multi_month() {
        let windows = monthly().split(date(2018, 11, 1), date(2019, 2, 28));
        assert_eq!(
            windows,
            vec![
                Window::whole(date(2018, 11, 1)),
                Window::whole(date(2018, 12, 1)),
                Window::whole(date(2019, 1, 1)),
                Window::whole(date(2019, 2, 1)),
            ]
        );
    }

    #[test]
    fn test_adjacent_months_no_middle() {
        let windows = monthly().split(date(2019, 1, 20), date(2019, 2, 5));
        assert_eq!(
            windows,
            vec![
                Window::exact(date(2019, 1, 20), date(2019, 1, 31)),
                Window::exact(date(2019, 2, 1), date(2019, 2, 5)),
            ]
        );
    }

    #[test]
    fn test_aligned_start_partial_end() {
        let windows = monthly().split(date(2019, 1, 1), date(2019, 2, 10));
        assert_eq!(
            windows,
            vec![
                Window::whole(date(2019, 1, 1)),
                Window::exact(date(2019, 2, 1), date(2019, 2, 10)),
            ]
        );
    }

    #[test]
    fn test_inverted_range_is_empty() {
        assert!(monthly().split(date(2019, 3, 1), date(2019, 1, 1)).is_empty());
    }

    #[test]
    fn test_window_end() {
        let splitter = monthly();
        assert_eq!(
            splitter.window_end(&Window::whole(date(2019, 2, 1))),
            date(2019, 2, 28)
        );
        assert_eq!(
            splitter.window_end(&Window::exact(date(2019, 2, 1), date(2019, 2, 3))),
            date(2019, 2, 3)
        );
    }
}
