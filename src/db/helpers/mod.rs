use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} out of range: {value}"))
}

/// Fixed-width UTC timestamp so lexical order in SQLite matches time order.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_have_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2025, 9, 11, 8, 0, 0).unwrap();
        let fractional = whole + chrono::Duration::microseconds(250);
        let a = format_timestamp(whole);
        let b = format_timestamp(fractional);
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(parse_datetime(&b, "timestamp").unwrap(), fractional);
    }

    #[test]
    fn negative_page_is_rejected() {
        assert!(to_u32(-1, "page").is_err());
        assert_eq!(to_u32(7, "page").unwrap(), 7);
    }
}
