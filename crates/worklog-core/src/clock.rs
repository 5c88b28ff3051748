//! Calendar date and wall-clock helpers shared by the ledger and the validator.

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

/// `YYYY-MM-DD`, the ledger's date format.
pub const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// `HH:MM`, the ledger's wall-clock format (minute resolution).
pub const TIME_FORMAT: &[FormatItem<'static>] = format_description!("[hour]:[minute]");

/// Parse a `YYYY-MM-DD` date.
///
/// # Errors
/// Returns the parse error when the input is not a valid calendar date.
pub fn parse_date(value: &str) -> Result<Date, time::error::Parse> {
    Date::parse(value.trim(), DATE_FORMAT)
}

/// Parse an `HH:MM` wall-clock time.
///
/// # Errors
/// Returns the parse error when the input is not a valid time of day.
pub fn parse_time(value: &str) -> Result<Time, time::error::Parse> {
    Time::parse(value.trim(), TIME_FORMAT)
}

/// Whole minutes elapsed since midnight.
#[must_use]
pub fn minute_of_day(time: Time) -> u32 {
    u32::from(time.hour()) * 60 + u32::from(time.minute())
}

/// Minutes between two wall-clock times on the same day, clamped at zero.
#[must_use]
pub fn minutes_between(start: Time, end: Time) -> u32 {
    minute_of_day(end).saturating_sub(minute_of_day(start))
}

/// Today's date in the local time zone, falling back to UTC when the offset
/// cannot be determined (e.g. multi-threaded processes on some platforms).
#[must_use]
pub fn local_today() -> Date {
    local_now().date()
}

/// Current timestamp in the local offset, or UTC when unavailable.
#[must_use]
pub fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Local offset, or UTC when unavailable.
#[must_use]
pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

/// Combine a ledger date and wall-clock time into an absolute timestamp.
#[must_use]
pub const fn at_offset(date: Date, time: Time, offset: UtcOffset) -> OffsetDateTime {
    PrimitiveDateTime::new(date, time).assume_offset(offset)
}

/// Serde adapter for `YYYY-MM-DD` dates.
pub mod date_serde {
    use super::DATE_FORMAT;
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    /// Serialize a date as `YYYY-MM-DD`.
    ///
    /// # Errors
    /// Returns a serializer error when the date cannot be formatted.
    pub fn serialize<S: Serializer>(date: &Date, s: S) -> Result<S::Ok, S::Error> {
        let text = date.format(DATE_FORMAT).map_err(serde::ser::Error::custom)?;
        s.serialize_str(&text)
    }

    /// Deserialize a `YYYY-MM-DD` date.
    ///
    /// # Errors
    /// Returns a deserializer error for malformed dates.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Date, D::Error> {
        let text = String::deserialize(d)?;
        super::parse_date(&text).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `HH:MM` wall-clock times.
pub mod time_serde {
    use super::TIME_FORMAT;
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Time;

    /// Serialize a time as `HH:MM`.
    ///
    /// # Errors
    /// Returns a serializer error when the time cannot be formatted.
    pub fn serialize<S: Serializer>(time: &Time, s: S) -> Result<S::Ok, S::Error> {
        let text = time.format(TIME_FORMAT).map_err(serde::ser::Error::custom)?;
        s.serialize_str(&text)
    }

    /// Deserialize an `HH:MM` time.
    ///
    /// # Errors
    /// Returns a deserializer error for malformed times.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Time, D::Error> {
        let text = String::deserialize(d)?;
        super::parse_time(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, time};

    #[test]
    fn minutes_between_clamps_reversed_ranges() {
        assert_eq!(minutes_between(time!(9:00), time!(10:30)), 90);
        assert_eq!(minutes_between(time!(10:30), time!(9:00)), 0);
    }

    #[test]
    fn parse_helpers_accept_ledger_formats() {
        assert_eq!(parse_date("2024-03-05").ok(), Some(date!(2024 - 03 - 05)));
        assert_eq!(parse_time("07:45").ok(), Some(time!(7:45)));
        assert!(parse_time("7.45").is_err());
    }

    #[test]
    fn at_offset_keeps_wall_clock() {
        let offset = UtcOffset::from_hms(3, 0, 0).expect("valid offset");
        let ts = at_offset(date!(2024 - 01 - 15), time!(9:00), offset);
        assert_eq!(ts.hour(), 9);
        assert_eq!(ts.offset(), offset);
    }
}
