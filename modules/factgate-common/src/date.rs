//! Process-wide textual date convention for date-valued attributes.

use chrono::{DateTime, Utc};

use crate::error::{KernelError, KernelResult};

/// The single pattern every component uses to write and read dates.
pub const DATE_FORMAT_PATTERN: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

pub fn format_date(at: &DateTime<Utc>) -> String {
    at.format(DATE_FORMAT_PATTERN).to_string()
}

pub fn parse_date(value: &str) -> KernelResult<DateTime<Utc>> {
    DateTime::parse_from_str(value, DATE_FORMAT_PATTERN)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| KernelError::invalid_argument(format!("unparseable date '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_with_millisecond_precision_and_offset() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(format_date(&at), "2024-03-09T14:05:07.000+00:00");
    }

    #[test]
    fn parse_reads_what_format_writes() {
        let at = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(parse_date(&format_date(&at)).unwrap(), at);
    }

    #[test]
    fn rejects_other_patterns() {
        assert!(parse_date("31/12/2023").is_err());
    }
}
