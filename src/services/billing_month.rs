use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A calendar month used as the billing key, rendered as `YYYY-MM`.
///
/// Ordering is chronological, which coincides with the lexicographic order
/// of the zero-padded string form stored in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BillingMonth {
    year: i32,
    month: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidBillingMonth(String);

impl fmt::Display for InvalidBillingMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "month must use the YYYY-MM format (got '{}').", self.0)
    }
}

impl std::error::Error for InvalidBillingMonth {}

impl BillingMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if !(1000..=9999).contains(&year) || !(1..=12).contains(&month) {
            return None;
        }
        Some(Self { year, month })
    }

    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn of_timestamp(timestamp: DateTime<Utc>) -> Self {
        Self::containing(timestamp.date_naive())
    }

    pub fn first_day(self) -> NaiveDate {
        // year and month are range-checked on construction
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Every month from `self` to `end`, both inclusive. Empty when `end`
    /// precedes `self`.
    pub fn through(self, end: BillingMonth) -> MonthRange {
        MonthRange {
            next: Some(self).filter(|start| *start <= end),
            end,
        }
    }
}

pub struct MonthRange {
    next: Option<BillingMonth>,
    end: BillingMonth,
}

impl Iterator for MonthRange {
    type Item = BillingMonth;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        let following = current.next();
        self.next = (following <= self.end).then_some(following);
        Some(current)
    }
}

impl fmt::Display for BillingMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for BillingMonth {
    type Err = InvalidBillingMonth;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let invalid = || InvalidBillingMonth(trimmed.to_string());
        let (year, month) = trimmed.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4
            || month.len() != 2
            || !year.chars().chain(month.chars()).all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }
}

impl Serialize for BillingMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BillingMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::BillingMonth;

    fn month(raw: &str) -> BillingMonth {
        raw.parse().expect("valid month")
    }

    #[test]
    fn parses_and_renders_zero_padded_keys() {
        assert_eq!(month("2025-01").to_string(), "2025-01");
        assert_eq!(month(" 2025-12 ").to_string(), "2025-12");
        assert!("2025-1".parse::<BillingMonth>().is_err());
        assert!("2025-13".parse::<BillingMonth>().is_err());
        assert!("2025-00".parse::<BillingMonth>().is_err());
        assert!("25-01".parse::<BillingMonth>().is_err());
        assert!("2025/01".parse::<BillingMonth>().is_err());
        assert!("".parse::<BillingMonth>().is_err());
    }

    #[test]
    fn ordering_matches_string_ordering() {
        let keys = ["2024-12", "2025-01", "2025-02", "2025-10", "2025-11"];
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(month(pair[0]) < month(pair[1]));
        }
    }

    #[test]
    fn range_is_inclusive_and_crosses_year_boundaries() {
        let months = month("2024-11")
            .through(month("2025-02"))
            .map(|m| m.to_string())
            .collect::<Vec<_>>();
        assert_eq!(months, vec!["2024-11", "2024-12", "2025-01", "2025-02"]);

        assert_eq!(month("2025-03").through(month("2025-03")).count(), 1);
        assert_eq!(month("2025-04").through(month("2025-03")).count(), 0);
    }

    #[test]
    fn first_day_of_month() {
        assert_eq!(
            month("2025-02").first_day(),
            NaiveDate::from_ymd_opt(2025, 2, 1).expect("date")
        );
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).expect("date");
        assert_eq!(BillingMonth::containing(date), month("2025-01"));
    }

    #[test]
    fn serializes_as_plain_string() {
        let value = serde_json::to_value(month("2025-04")).expect("serialize");
        assert_eq!(value, serde_json::json!("2025-04"));
        let parsed: BillingMonth = serde_json::from_value(value).expect("deserialize");
        assert_eq!(parsed, month("2025-04"));
        assert!(serde_json::from_value::<BillingMonth>(serde_json::json!("April")).is_err());
    }
}
