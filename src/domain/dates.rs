//! Date helpers for the `--start-date/--end-date/--single-date` flags.

use chrono::NaiveDate;

use crate::errors::EtlError;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_date(s: &str) -> Result<NaiveDate, EtlError> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .map_err(|e| EtlError::Config(format!("Invalid date '{s}' (expected YYYY-MM-DD): {e}")))
}

/// Inclusive list of days from `start` to `end`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, EtlError> {
    if start > end {
        return Err(EtlError::Config(format!(
            "Start date {start} is after end date {end}"
        )));
    }
    Ok(start.iter_days().take_while(|d| *d <= end).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_inclusive() {
        let days = date_range(
            parse_date("2025-12-30").unwrap(),
            parse_date("2026-01-02").unwrap(),
        )
        .unwrap();
        assert_eq!(days.len(), 4);
        assert_eq!(days[0].to_string(), "2025-12-30");
        assert_eq!(days[3].to_string(), "2026-01-02");
    }

    #[test]
    fn single_day_range() {
        let d = parse_date("2026-01-31").unwrap();
        assert_eq!(date_range(d, d).unwrap(), vec![d]);
    }

    #[test]
    fn reversed_range_is_config_error() {
        let err = date_range(
            parse_date("2026-01-02").unwrap(),
            parse_date("2026-01-01").unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[test]
    fn bad_date_is_rejected() {
        assert!(parse_date("2026/01/01").is_err());
    }
}
