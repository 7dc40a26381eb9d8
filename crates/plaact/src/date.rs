use std::fmt::Display;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Offset between the ROC (Minguo) era and the western calendar.
pub const ROC_EPOCH_OFFSET: i32 = 1911;

/// Earliest year a canonical date may carry (ROC year 1).
pub const MIN_YEAR: i32 = ROC_EPOCH_OFFSET + 1;

const SEPARATORS: [char; 6] = ['.', '/', '-', '年', '月', '日'];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DateParseError {
    #[error("Empty date")]
    Empty,
    #[error("Expected 3 date components in '{raw}', found {found}")]
    Arity { raw: String, found: usize },
    #[error("Non-numeric date component '{component}' in '{raw}'")]
    NotNumeric { raw: String, component: String },
    #[error("Invalid calendar date: {year}-{month}-{day}")]
    InvalidDate { year: i32, month: u32, day: u32 },
    #[error("Year {0} predates the ROC era")]
    BeforeEpoch(i32),
}

/// A calendar date rendered as zero-padded `YYYY-MM-DD`, so the string form
/// sorts the same way as the date itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalDate(NaiveDate);

impl CanonicalDate {
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Result<Self, DateParseError> {
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or(DateParseError::InvalidDate { year, month, day })?;
        if year < MIN_YEAR {
            return Err(DateParseError::BeforeEpoch(year));
        }
        Ok(Self(date))
    }

    pub fn naive(&self) -> NaiveDate {
        self.0
    }

    /// Year in the ROC era, as the source site prints it.
    pub fn roc_year(&self) -> i32 {
        self.0.year() - ROC_EPOCH_OFFSET
    }
}

/// Canonicalizes a date written with `.`, `/`, `-` or `年月日` separators, in
/// either the ROC era (`111.11.08`) or the western calendar (`2025/2/3`).
pub fn normalize(raw: &str) -> Result<CanonicalDate, DateParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DateParseError::Empty);
    }

    let components: Vec<&str> = trimmed
        .split(|c: char| SEPARATORS.contains(&c))
        .filter(|part| !part.is_empty())
        .map(str::trim)
        .collect();

    if components.len() != 3 {
        return Err(DateParseError::Arity {
            raw: trimmed.to_string(),
            found: components.len(),
        });
    }

    let mut numbers = [0u32; 3];
    for (slot, component) in numbers.iter_mut().zip(&components) {
        if component.is_empty() || !component.chars().all(|c| c.is_ascii_digit()) {
            return Err(DateParseError::NotNumeric {
                raw: trimmed.to_string(),
                component: component.to_string(),
            });
        }
        *slot = component
            .parse()
            .map_err(|_| DateParseError::NotNumeric {
                raw: trimmed.to_string(),
                component: component.to_string(),
            })?;
    }

    let [first, month, day] = numbers;
    let first = i32::try_from(first).map_err(|_| DateParseError::InvalidDate {
        year: i32::MAX,
        month,
        day,
    })?;
    let year = if first < ROC_EPOCH_OFFSET {
        first + ROC_EPOCH_OFFSET
    } else {
        first
    };

    CanonicalDate::from_ymd(year, month, day)
}

impl FromStr for CanonicalDate {
    type Err = DateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        normalize(s)
    }
}

impl Display for CanonicalDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl Serialize for CanonicalDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CanonicalDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        normalize(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_roc_dotted() {
        assert_eq!(normalize("111.11.08").unwrap().to_string(), "2022-11-08");
    }

    #[test]
    fn test_normalize_western_unpadded() {
        assert_eq!(normalize("2025/2/3").unwrap().to_string(), "2025-02-03");
    }

    #[test]
    fn test_normalize_rejects_invalid_triple() {
        assert!(matches!(
            normalize("13/02/30"),
            Err(DateParseError::InvalidDate { .. })
        ));
        assert!(matches!(
            normalize("2024-13-01"),
            Err(DateParseError::InvalidDate { month: 13, .. })
        ));
        assert!(matches!(
            normalize("113.01.32"),
            Err(DateParseError::InvalidDate { day: 32, .. })
        ));
    }

    #[test]
    fn test_normalize_cjk_separators() {
        assert_eq!(normalize("114年12月3日").unwrap().to_string(), "2025-12-03");
        assert_eq!(normalize(" 114/12/03 ").unwrap().to_string(), "2025-12-03");
    }

    #[test]
    fn test_normalize_collapses_separator_runs() {
        assert_eq!(normalize("2024--01..05").unwrap().to_string(), "2024-01-05");
        assert_eq!(normalize("2024-1-5-").unwrap().to_string(), "2024-01-05");
    }

    #[test]
    fn test_normalize_arity() {
        assert!(matches!(
            normalize("2024-01"),
            Err(DateParseError::Arity { found: 2, .. })
        ));
        assert!(matches!(
            normalize("1.2.3.4"),
            Err(DateParseError::Arity { found: 4, .. })
        ));
        assert_eq!(normalize("   "), Err(DateParseError::Empty));
    }

    #[test]
    fn test_normalize_non_numeric() {
        assert!(matches!(
            normalize("111.Nov.08"),
            Err(DateParseError::NotNumeric { .. })
        ));
    }

    #[test]
    fn test_normalize_rejects_pre_era_years() {
        assert_eq!(normalize("0.01.01"), Err(DateParseError::BeforeEpoch(1911)));
        assert_eq!(normalize("1911-05-01"), Err(DateParseError::BeforeEpoch(1911)));
        assert_eq!(normalize("1.01.01").unwrap().to_string(), "1912-01-01");
    }

    #[test]
    fn test_canonical_order_matches_string_order() {
        let a = normalize("99.12.31").unwrap();
        let b = normalize("2011-01-01").unwrap();
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
        assert_eq!(b.roc_year(), 100);
    }

    #[test]
    fn test_serde_roundtrip_as_string() {
        let date = normalize("113/02/29").unwrap();
        let json = serde_json::to_string(&date).unwrap();
        assert_eq!(json, "\"2024-02-29\"");
        let back: CanonicalDate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, date);
    }
}
