use std::cell::OnceCell;
use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Timelike};

use crate::error::{MffError, Result};

/// 写出格式，偏移量总是带冒号 (`+hh:mm`)
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f%:z";
const PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%:z";

/// Parse a container timestamp such as `2003-04-17T13:35:22.000000-08:00`.
///
/// The colon-less offset variant (`-0800`) is accepted and normalized first.
pub fn parse_timestamp(text: &str) -> Result<DateTime<FixedOffset>> {
    let normalized = normalize_offset(text.trim());
    DateTime::parse_from_str(&normalized, PARSE_FORMAT)
        .map_err(|e| MffError::InvalidTimestamp(format!("'{}': {}", text.trim(), e)))
}

/// Insert the colon into a trailing `±hhmm` offset; other input passes through
fn normalize_offset(text: &str) -> String {
    let bytes = text.as_bytes();
    if bytes.len() < 5 {
        return text.to_string();
    }
    let tail = &bytes[bytes.len() - 5..];
    let is_compact = (tail[0] == b'+' || tail[0] == b'-')
        && tail[1..].iter().all(|b| b.is_ascii_digit());
    if is_compact {
        let split = text.len() - 2;
        format!("{}:{}", &text[..split], &text[split..])
    } else {
        text.to_string()
    }
}

/// Values that can be written in the container timestamp format.
///
/// The format carries microseconds. Timezone-aware `chrono` values with
/// sub-microsecond digits fail with [`MffError::InvalidTimestamp`] instead
/// of being truncated; naive ones are rejected with
/// [`MffError::MissingTimezone`] instead of being given a default offset.
pub trait WireTimestamp {
    fn to_wire(&self) -> Result<String>;
}

impl<Tz: TimeZone> WireTimestamp for DateTime<Tz>
where
    Tz::Offset: fmt::Display,
{
    fn to_wire(&self) -> Result<String> {
        if self.nanosecond() % 1_000 != 0 {
            return Err(MffError::InvalidTimestamp(format!(
                "{} has sub-microsecond precision",
                self.format("%Y-%m-%dT%H:%M:%S%.9f%:z")
            )));
        }
        Ok(self.format(TIME_FORMAT).to_string())
    }
}

impl WireTimestamp for NaiveDateTime {
    fn to_wire(&self) -> Result<String> {
        Err(MffError::MissingTimezone(self.to_string()))
    }
}

/// Serialize a timestamp as `YYYY-MM-DDThh:mm:ss.ffffff±hh:mm`
pub fn format_timestamp<T: WireTimestamp + ?Sized>(timestamp: &T) -> Result<String> {
    timestamp.to_wire()
}

/// Parse trimmed element text, naming the field on failure
pub fn parse_text<T: FromStr>(text: &str, what: &str) -> Result<T> {
    text.trim()
        .parse()
        .map_err(|_| MffError::InvalidFormat(format!("invalid {}: '{}'", what, text.trim())))
}

/// A value computed at most once and cached for the owner's lifetime.
///
/// Backed by [`OnceCell`], so owners are `!Sync`: pre-warm or use one
/// handle per thread.
pub struct Memo<T>(OnceCell<T>);

impl<T> Memo<T> {
    pub fn new() -> Self {
        Memo(OnceCell::new())
    }

    pub fn get_or_try_init<F>(&self, init: F) -> Result<&T>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(value) = self.0.get() {
            return Ok(value);
        }
        let value = init()?;
        Ok(self.0.get_or_init(|| value))
    }

    pub fn get_or_init<F: FnOnce() -> T>(&self, init: F) -> &T {
        self.0.get_or_init(init)
    }

    pub fn is_computed(&self) -> bool {
        self.0.get().is_some()
    }
}

impl<T> Default for Memo<T> {
    fn default() -> Self {
        Memo::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.get() {
            Some(value) => f.debug_tuple("Memo").field(value).finish(),
            None => f.write_str("Memo(<pending>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    #[test]
    fn test_parse_timestamp_with_and_without_colon() {
        let a = parse_timestamp("2003-04-17T13:35:22.000000-08:00").unwrap();
        let b = parse_timestamp("2003-04-17T13:35:22.000000-0800").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.offset().local_minus_utc(), -8 * 3600);
        assert_eq!(a.hour(), 13);
    }

    #[test]
    fn test_timestamp_round_trip() {
        let original = parse_timestamp("2019-10-28T10:52:01.123456+01:00").unwrap();
        let text = format_timestamp(&original).unwrap();
        assert_eq!(text, "2019-10-28T10:52:01.123456+01:00");
        assert_eq!(parse_timestamp(&text).unwrap(), original);
    }

    #[test]
    fn test_sub_microsecond_timestamp_rejected() {
        let nanos = parse_timestamp("2020-01-01T00:00:00.123456789+01:00").unwrap();
        assert_eq!(nanos.nanosecond(), 123_456_789);
        assert!(matches!(
            format_timestamp(&nanos),
            Err(MffError::InvalidTimestamp(_))
        ));

        let micros = nanos.with_nanosecond(123_456_000).unwrap();
        let text = format_timestamp(&micros).unwrap();
        assert_eq!(text, "2020-01-01T00:00:00.123456+01:00");
        assert_eq!(parse_timestamp(&text).unwrap(), micros);
    }

    #[test]
    fn test_naive_timestamp_rejected() {
        let naive = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert!(matches!(format_timestamp(&naive), Err(MffError::MissingTimezone(_))));
    }

    #[test]
    fn test_invalid_timestamp() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(MffError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_memo_computes_once() {
        let memo: Memo<u32> = Memo::new();
        let mut calls = 0;
        assert_eq!(*memo.get_or_try_init(|| { calls += 1; Ok(7) }).unwrap(), 7);
        assert_eq!(*memo.get_or_try_init(|| { calls += 1; Ok(8) }).unwrap(), 7);
        assert_eq!(calls, 1);
        assert!(memo.is_computed());
    }

    #[test]
    fn test_memo_failure_not_cached() {
        let memo: Memo<u32> = Memo::new();
        assert!(memo
            .get_or_try_init(|| Err(MffError::InvalidFormat("boom".into())))
            .is_err());
        assert!(!memo.is_computed());
    }
}
