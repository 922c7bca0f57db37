//! Timestamp formatting for S3 XML and HTTP headers (§4.4).

use chrono::{DateTime, Utc};

/// ISO-8601 with millisecond resolution and trailing `Z`, as S3 XML bodies use.
pub fn timestamp_to_iso(ts: u64) -> String {
    DateTime::<Utc>::from_timestamp(ts as i64, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .unwrap_or_else(|| "1970-01-01T00:00:00.000Z".to_string())
}

/// RFC 7231 HTTP date, as used in `Last-Modified`/`Date` headers.
pub fn timestamp_to_http_date(ts: u64) -> String {
    DateTime::<Utc>::from_timestamp(ts as i64, 0)
        .map(|dt| dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
        .unwrap_or_else(|| "Thu, 01 Jan 1970 00:00:00 GMT".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_epoch_as_iso() {
        assert_eq!(timestamp_to_iso(0), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn formats_epoch_as_http_date() {
        assert_eq!(timestamp_to_http_date(0), "Thu, 01 Jan 1970 00:00:00 GMT");
    }

    #[test]
    fn formats_known_timestamp() {
        assert_eq!(timestamp_to_iso(1_700_000_000), "2023-11-14T22:13:20.000Z");
    }
}
