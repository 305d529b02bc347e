//! Milestone date parsing.
//!
//! Dates arrive as strings from the config file or Jamf parameters and are
//! converted to epoch seconds exactly once, when the policy is built.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::ConfigError;
use crate::platform::EpochSecs;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Parse a milestone date.
///
/// Accepted forms: plain epoch seconds, RFC 3339, `YYYY-MM-DD HH:MM[:SS]`
/// and `YYYY-MM-DD`. Forms without an offset are read in the machine's
/// local time zone; a bare date means local midnight.
pub fn parse_instant(field: &str, value: &str) -> Result<EpochSecs, ConfigError> {
    let value = value.trim();
    let invalid = || ConfigError::InvalidDate {
        field: field.to_string(),
        value: value.to_string(),
    };

    if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        return value.parse::<EpochSecs>().map_err(|_| invalid());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.timestamp());
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return local_timestamp(naive).ok_or_else(invalid);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(invalid)?;
        return local_timestamp(midnight).ok_or_else(invalid);
    }

    Err(invalid())
}

/// Parse an optional date where an empty string means "not configured".
pub fn parse_optional(field: &str, value: Option<&str>) -> Result<Option<EpochSecs>, ConfigError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => parse_instant(field, v).map(Some),
    }
}

// Ambiguous local times (DST fold) take the earlier instant; nonexistent
// ones (DST gap) are rejected.
fn local_timestamp(naive: NaiveDateTime) -> Option<EpochSecs> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
}

/// Render epoch seconds for dialogs and status output.
pub fn format_local(at: EpochSecs) -> String {
    match Utc.timestamp_opt(at, 0).single() {
        Some(utc) => utc.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        None => at.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_seconds_pass_through() {
        assert_eq!(parse_instant("end_date", "1735689600").unwrap(), 1_735_689_600);
    }

    #[test]
    fn rfc3339_with_offset() {
        assert_eq!(
            parse_instant("end_date", "2025-01-01T00:00:00Z").unwrap(),
            1_735_689_600
        );
        assert_eq!(
            parse_instant("end_date", "2025-01-01T09:00:00+09:00").unwrap(),
            1_735_689_600
        );
    }

    #[test]
    fn naive_forms_use_local_zone() {
        let naive = NaiveDate::from_ymd_opt(2025, 3, 10)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        let expected = Local.from_local_datetime(&naive).earliest().unwrap().timestamp();
        assert_eq!(parse_instant("nag_date", "2025-03-10 14:30").unwrap(), expected);
        assert_eq!(parse_instant("nag_date", "2025-03-10 14:30:00").unwrap(), expected);

        let midnight = NaiveDate::from_ymd_opt(2025, 3, 10)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let expected = Local.from_local_datetime(&midnight).earliest().unwrap().timestamp();
        assert_eq!(parse_instant("nag_date", "2025-03-10").unwrap(), expected);
    }

    #[test]
    fn garbage_is_a_config_error() {
        let err = parse_instant("start_date", "next tuesday").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDate { ref field, .. } if field == "start_date"));
    }

    #[test]
    fn empty_optional_is_absent() {
        assert_eq!(parse_optional("end_date", None).unwrap(), None);
        assert_eq!(parse_optional("end_date", Some("  ")).unwrap(), None);
        assert_eq!(parse_optional("end_date", Some("100")).unwrap(), Some(100));
    }
}
