//! Gateway expiry timestamps.
//!
//! The gateway reports `expiry_time` as a local `YYYY-MM-DD HH:MM:SS` string in
//! Asia/Jakarta (UTC+7, no daylight saving).

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use super::OrderError;

const GATEWAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const JAKARTA_OFFSET_HOURS: i64 = 7;

/// Parses a gateway expiry string into an absolute UTC timestamp.
pub fn parse_gateway_expiry(value: &str) -> Result<DateTime<Utc>, OrderError> {
    let local = NaiveDateTime::parse_from_str(value.trim(), GATEWAY_FORMAT)
        .map_err(|e| OrderError::InvalidExpiry(format!("{value}: {e}")))?;
    Ok((local - Duration::hours(JAKARTA_OFFSET_HOURS)).and_utc())
}

/// Formats an instant the way the gateway reports expiry times.
pub fn format_gateway_expiry(at: DateTime<Utc>) -> String {
    (at.naive_utc() + Duration::hours(JAKARTA_OFFSET_HOURS))
        .format(GATEWAY_FORMAT)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parses_jakarta_local_time() {
        let parsed = parse_gateway_expiry("2024-03-01 17:15:00").unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_format_then_parse_is_stable_to_the_second() {
        let now = Utc.with_ymd_and_hms(2024, 12, 31, 20, 0, 0).unwrap();
        let expiry = now + Duration::minutes(15);
        let text = format_gateway_expiry(expiry);
        assert_eq!(text, "2025-01-01 03:15:00");
        assert_eq!(parse_gateway_expiry(&text).unwrap(), expiry);
    }

    #[test]
    fn test_rejects_other_formats() {
        assert!(matches!(
            parse_gateway_expiry("2024-03-01T17:15:00Z"),
            Err(OrderError::InvalidExpiry(_))
        ));
        assert!(parse_gateway_expiry("").is_err());
    }
}
