//! Holiday calendar lookup used as an inference feature

use chrono::NaiveDate;
use std::collections::HashSet;

/// Answers whether a service date is a holiday
pub trait HolidayCalendar: Send + Sync {
    fn is_holiday(&self, date: NaiveDate) -> bool;
}

/// Calendar backed by a fixed set of dates
#[derive(Debug, Clone, Default)]
pub struct FixedHolidayCalendar {
    dates: HashSet<NaiveDate>,
}

impl FixedHolidayCalendar {
    pub fn new(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            dates: dates.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

impl HolidayCalendar for FixedHolidayCalendar {
    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_calendar_matches_listed_dates() {
        let christmas = NaiveDate::from_ymd_opt(2024, 12, 25).unwrap();
        let calendar = FixedHolidayCalendar::new([christmas]);

        assert!(calendar.is_holiday(christmas));
        assert!(!calendar.is_holiday(NaiveDate::from_ymd_opt(2024, 12, 26).unwrap()));
        assert_eq!(calendar.len(), 1);
    }
}
