use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimeUnit {
    Day,
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeInterval {
    pub every: u32,
    pub unit: TimeUnit,
}

impl TimeInterval {
    pub fn new(every: u32, unit: TimeUnit) -> Self {
        Self { every, unit }
    }

    /// Steps `from` forward by one interval.
    ///
    /// Month and year steps keep the day of month and clamp it to the last
    /// valid day of the target month, so Jan 31 + 1 month is Feb 28 (Feb 29 in
    /// leap years) rather than rolling into March. Dates past chrono's range
    /// saturate at `NaiveDate::MAX`.
    pub fn next_date(&self, from: NaiveDate) -> NaiveDate {
        let every = self.every as u64;
        let next = match self.unit {
            TimeUnit::Day => from.checked_add_days(Days::new(every)),
            TimeUnit::Week => from.checked_add_days(Days::new(every * 7)),
            TimeUnit::Month => from.checked_add_months(Months::new(self.every)),
            TimeUnit::Year => self
                .every
                .checked_mul(12)
                .and_then(|months| from.checked_add_months(Months::new(months))),
        };
        next.unwrap_or(NaiveDate::MAX)
    }

    pub fn label(&self) -> String {
        match (self.every, &self.unit) {
            (1, TimeUnit::Day) => "Daily".into(),
            (1, TimeUnit::Week) => "Weekly".into(),
            (1, TimeUnit::Month) => "Monthly".into(),
            (1, TimeUnit::Year) => "Yearly".into(),
            (n, unit) => format!("Every {} {:?}{}", n, unit, if n > 1 { "s" } else { "" }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn month_steps_clamp_to_month_end() {
        let monthly = TimeInterval::new(1, TimeUnit::Month);
        assert_eq!(monthly.next_date(date(2023, 1, 31)), date(2023, 2, 28));
        assert_eq!(monthly.next_date(date(2024, 1, 31)), date(2024, 2, 29));
        assert_eq!(monthly.next_date(date(2024, 2, 29)), date(2024, 3, 29));
        assert_eq!(monthly.next_date(date(2024, 12, 15)), date(2025, 1, 15));
    }

    #[test]
    fn year_steps_clamp_leap_day() {
        let yearly = TimeInterval::new(1, TimeUnit::Year);
        assert_eq!(yearly.next_date(date(2024, 2, 29)), date(2025, 2, 28));
    }

    #[test]
    fn day_and_week_steps_are_linear() {
        assert_eq!(
            TimeInterval::new(3, TimeUnit::Day).next_date(date(2025, 1, 30)),
            date(2025, 2, 2)
        );
        assert_eq!(
            TimeInterval::new(2, TimeUnit::Week).next_date(date(2025, 1, 1)),
            date(2025, 1, 15)
        );
    }

    #[test]
    fn labels() {
        assert_eq!(TimeInterval::new(1, TimeUnit::Week).label(), "Weekly");
        assert_eq!(TimeInterval::new(3, TimeUnit::Month).label(), "Every 3 Months");
    }
}
