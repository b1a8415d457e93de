//! Calendar alignment units
//!
//! A [`TimeUnit`] decides which windows are cacheable: only a span covering
//! exactly one unit instance (one calendar month, one ISO week, ...) is
//! stored and reused.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Alignment granularity for cacheable windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// A single calendar day
    Day,
    /// An ISO week, Monday through Sunday
    Week,
    /// A calendar month
    #[default]
    Month,
    /// A calendar quarter (Jan, Apr, Jul, Oct)
    Quarter,
    /// A calendar year
    Year,
}

impl TimeUnit {
    /// First day of the unit instance containing `date`
    pub fn start_of(self, date: NaiveDate) -> NaiveDate {
        match self {
            TimeUnit::Day => date,
            TimeUnit::Week => {
                let back = i64::from(date.weekday().num_days_from_monday());
                date.checked_sub_signed(Duration::days(back))
                    .unwrap_or(NaiveDate::MIN)
            }
            TimeUnit::Month => first_of_month(date.year(), date.month()).unwrap_or(date),
            TimeUnit::Quarter => {
                let month = (date.month0() / 3) * 3 + 1;
                first_of_month(date.year(), month).unwrap_or(date)
            }
            TimeUnit::Year => first_of_month(date.year(), 1).unwrap_or(date),
        }
    }

    /// Last day of the unit instance containing `date`
    pub fn end_of(self, date: NaiveDate) -> NaiveDate {
        let start = self.start_of(date);
        let next = match self {
            TimeUnit::Day => start.succ_opt(),
            TimeUnit::Week => start.checked_add_signed(Duration::days(7)),
            TimeUnit::Month => add_months(start, 1),
            TimeUnit::Quarter => add_months(start, 3),
            TimeUnit::Year => add_months(start, 12),
        };
        next.and_then(|n| n.pred_opt()).unwrap_or(NaiveDate::MAX)
    }

    /// First day of the unit instance following the one containing `date`
    ///
    /// Returns `None` past the end of the representable calendar.
    pub fn next_start(self, date: NaiveDate) -> Option<NaiveDate> {
        self.end_of(date).succ_opt()
    }

    /// Whether `date` is the first day of its unit instance
    pub fn is_start(self, date: NaiveDate) -> bool {
        self.start_of(date) == date
    }

    /// Whether `date` is the last day of its unit instance
    pub fn is_end(self, date: NaiveDate) -> bool {
        self.end_of(date) == date
    }

    /// Whether both dates fall in the same unit instance
    pub fn same_instance(self, a: NaiveDate, b: NaiveDate) -> bool {
        self.start_of(a) == self.start_of(b)
    }

    /// Name used in configuration files
    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Day => "day",
            TimeUnit::Week => "week",
            TimeUnit::Month => "month",
            TimeUnit::Quarter => "quarter",
            TimeUnit::Year => "year",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "days" => Ok(TimeUnit::Day),
            "week" | "weeks" | "isoweek" => Ok(TimeUnit::Week),
            "month" | "months" => Ok(TimeUnit::Month),
            "quarter" | "quarters" => Ok(TimeUnit::Quarter),
            "year" | "years" => Ok(TimeUnit::Year),
            other => Err(format!("Unknown time unit: {}", other)),
        }
    }
}

fn first_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

/// Add whole months to a first-of-month date
fn add_months(first: NaiveDate, months: u32) -> Option<NaiveDate> {
    let total = first.month0() + months;
    let year = first.year().checked_add(i32::try_from(total / 12).ok()?)?;
    first_of_month(year, total % 12 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_month_bounds() {
        let unit = TimeUnit::Month;
        assert_eq!(unit.start_of(date(2019, 2, 14)), date(2019, 2, 1));
        assert_eq!(unit.end_of(date(2019, 2, 14)), date(2019, 2, 28));
        assert_eq!(unit.end_of(date(2020, 2, 3)), date(2020, 2, 29));
        assert_eq!(unit.end_of(date(2019, 12, 5)), date(2019, 12, 31));
        assert_eq!(unit.next_start(date(2019, 12, 5)), Some(date(2020, 1, 1)));
    }

    #[test]
    fn test_week_is_monday_based() {
        let unit = TimeUnit::Week;
        // 2019-01-16 is a Wednesday
        assert_eq!(unit.start_of(date(2019, 1, 16)), date(2019, 1, 14));
        assert_eq!(unit.end_of(date(2019, 1, 16)), date(2019, 1, 20));
        assert!(unit.is_start(date(2019, 1, 14)));
        assert!(unit.is_end(date(2019, 1, 20)));
    }

    #[test]
    fn test_quarter_and_year() {
        assert_eq!(TimeUnit::Quarter.start_of(date(2019, 5, 20)), date(2019, 4, 1));
        assert_eq!(TimeUnit::Quarter.end_of(date(2019, 5, 20)), date(2019, 6, 30));
        assert_eq!(TimeUnit::Quarter.end_of(date(2019, 11, 2)), date(2019, 12, 31));
        assert_eq!(TimeUnit::Year.start_of(date(2019, 5, 20)), date(2019, 1, 1));
        assert_eq!(TimeUnit::Year.end_of(date(2019, 5, 20)), date(2019, 12, 31));
    }

    #[test]
    fn test_day_unit_is_always_aligned() {
        let d = date(2019, 3, 7);
        assert!(TimeUnit::Day.is_start(d));
        assert!(TimeUnit::Day.is_end(d));
        assert_eq!(TimeUnit::Day.next_start(d), Some(date(2019, 3, 8)));
    }

    #[test]
    fn test_same_instance() {
        let unit = TimeUnit::Month;
        assert!(unit.same_instance(date(2019, 1, 1), date(2019, 1, 31)));
        assert!(!unit.same_instance(date(2019, 1, 31), date(2019, 2, 1)));
        assert!(!unit.same_instance(date(2018, 1, 10), date(2019, 1, 10)));
    }

    #[test]
    fn test_parse_unit() {
        assert_eq!("Month".parse::<TimeUnit>().unwrap(), TimeUnit::Month);
        assert_eq!(" weeks ".parse::<TimeUnit>().unwrap(), TimeUnit::Week);
        assert!("fortnight".parse::<TimeUnit>().is_err());
        assert_eq!(TimeUnit::default(), TimeUnit::Month);
    }
}
