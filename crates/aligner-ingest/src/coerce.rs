//! Field coercers
//!
//! Pure conversions from raw export text to typed column values. Every coercer
//! returns `None` for empty or malformed input instead of failing: one bad cell
//! must never cost the rest of its row.
//!
//! The export is produced by a French-locale reporting tool, so dates use French
//! month names and numbers may carry comma decimal separators or space-grouped
//! thousands.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use std::str::FromStr;
use tracing::debug;

/// French month tokens as written by the export, in calendar order
const MONTHS: [&str; 12] = [
    "janvier",
    "février",
    "mars",
    "avril",
    "mai",
    "juin",
    "juillet",
    "août",
    "septembre",
    "octobre",
    "novembre",
    "décembre",
];

/// Characters used as thousands separators in integer cells
const THOUSANDS_SEPARATORS: [char; 4] = [',', ' ', '\u{a0}', '\u{202f}'];

fn non_blank(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn month_number(token: &str) -> Option<u32> {
    let token = token.to_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == token)
        .map(|idx| idx as u32 + 1)
}

/// Parse an export timestamp such as `"juin 20, 2024, 1:29 PM"`.
///
/// The result displays as `YYYY-MM-DD HH:MM:SS`. A missing meridiem leaves the
/// hour as written.
pub fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = non_blank(raw)?;
    let parsed = parse_date_parts(raw);
    if parsed.is_none() {
        debug!(value = raw, "Unparseable activity date, storing NULL");
    }
    parsed
}

fn parse_date_parts(raw: &str) -> Option<NaiveDateTime> {
    let mut parts = raw.split(',').map(str::trim);
    let (month_day, year, time) = (parts.next()?, parts.next()?, parts.next()?);

    let mut month_day = month_day.split_whitespace();
    let month = month_number(month_day.next()?)?;
    let day: u32 = month_day.next()?.parse().ok()?;
    let year: i32 = year.parse().ok()?;

    let mut time = time.split_whitespace();
    let (hour, minute) = time.next()?.split_once(':')?;
    let mut hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;

    match time.next().map(str::to_ascii_uppercase).as_deref() {
        Some("PM") if hour != 12 => hour += 12,
        Some("AM") if hour == 12 => hour = 0,
        Some("AM") | Some("PM") | None => {},
        Some(_) => return None,
    }

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    Some(date.and_time(time))
}

/// Parse an integer cell, ignoring thousands separators: `"6,977"` -> `6977`.
pub fn parse_integer(raw: &str) -> Option<i64> {
    let raw = non_blank(raw)?;
    let digits: String = raw
        .chars()
        .filter(|c| !THOUSANDS_SEPARATORS.contains(c))
        .collect();
    digits.parse().ok()
}

/// Parse an exact decimal, accepting a comma decimal separator: `"12,50"` -> `12.50`.
///
/// Only plain positional notation is accepted. Exponents such as `"1e9"` are
/// rejected so a cell cannot request an unbounded scale.
pub fn parse_decimal(raw: &str) -> Option<BigDecimal> {
    let raw = non_blank(raw)?;
    let unsigned = raw.strip_prefix(['-', '+']).unwrap_or(raw);
    if !unsigned
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == ',')
    {
        return None;
    }
    BigDecimal::from_str(&raw.replace(',', ".")).ok()
}

/// Parse a boolean cell: `true` (any case) is true, any other non-empty text is false.
pub fn parse_boolean(raw: &str) -> Option<bool> {
    non_blank(raw).map(|v| v.eq_ignore_ascii_case("true"))
}

/// Keep a text cell, mapping empty or whitespace-only cells to `None`.
pub fn parse_text(raw: &str) -> Option<String> {
    non_blank(raw).map(|_| raw.to_string())
}

/// Parse an ISO-8601 timestamp from a payload attribute.
///
/// Accepts RFC 3339, naive date-times (assumed UTC) and bare dates (midnight UTC).
pub fn parse_iso_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = non_blank(raw)?;

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|date| Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
}
