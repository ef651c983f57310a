//! Parsing of the ISO-8601 timestamps returned by the NBI.
//!
//! Job timestamps come in several shapes (`2024-01-10T10:00:00Z`,
//! `2024-01-10T10:00:00.123+02:00`, `20240110T100000+0200`, ...). Every one of
//! them is normalised to a UTC instant so page ranges and filters compare in a
//! single reference frame.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};

use crate::{Error, Result};

const COMPACT_FORMAT: &str = "%Y%m%dT%H%M%S";
const COMPACT_FRACTION_FORMAT: &str = "%Y%m%dT%H%M%S%.f";

/// Parse a NBI timestamp into a UTC instant.
///
/// Colons and date dashes are dropped, a trailing `±HH:MM`, `±HHMM` or `±HH`
/// offset is split off and subtracted from the local time. Fractional seconds
/// are optional and a bare date resolves to midnight UTC.
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::timestamp(input, "empty timestamp"));
    }

    let normalized = trimmed.replacen(' ', "T", 1);
    let (main, offset_seconds) = split_offset(&normalized).map_err(|reason| Error::timestamp(input, reason))?;

    let main = main.strip_suffix(['Z', 'z']).unwrap_or(main);
    let compact: String = main.chars().filter(|c| *c != ':' && *c != '-').collect();

    let naive = if compact.contains(['T', 't']) {
        let compact = compact.replace('t', "T");
        let format = if compact.contains('.') {
            COMPACT_FRACTION_FORMAT
        } else {
            COMPACT_FORMAT
        };
        NaiveDateTime::parse_from_str(&compact, format)
            .map_err(|e| Error::timestamp(input, e.to_string()))?
    } else {
        NaiveDate::parse_from_str(&compact, "%Y%m%d")
            .map_err(|e| Error::timestamp(input, e.to_string()))?
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| Error::timestamp(input, "invalid midnight"))?
    };

    Ok((naive - TimeDelta::seconds(offset_seconds)).and_utc())
}

/// Format an instant the way the NBI expects it in query parameters.
pub fn format_query_timestamp(instant: &DateTime<Utc>) -> String {
    format!("{}Z", instant.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f"))
}

/// Split a trailing UTC offset from the time part.
///
/// Only a sign appearing after the `T` separator counts as an offset, so the
/// dashes of the date part are never mistaken for one.
fn split_offset(value: &str) -> std::result::Result<(&str, i64), String> {
    let Some(time_start) = value.find(['T', 't']) else {
        return Ok((value, 0));
    };

    let time_part = &value[time_start..];
    let Some(sign_pos) = time_part.rfind(['+', '-']) else {
        return Ok((value, 0));
    };

    let sign = if time_part.as_bytes()[sign_pos] == b'-' {
        -1
    } else {
        1
    };
    let digits: String = time_part[sign_pos + 1..]
        .chars()
        .filter(|c| *c != ':')
        .collect();

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("invalid utc offset '{}'", &time_part[sign_pos..]));
    }

    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i64>().unwrap_or_default(), 0),
        4 => (
            digits[..2].parse::<i64>().unwrap_or_default(),
            digits[2..].parse::<i64>().unwrap_or_default(),
        ),
        _ => return Err(format!("invalid utc offset '{}'", &time_part[sign_pos..])),
    };

    if hours > 23 || minutes > 59 {
        return Err(format!("utc offset out of range '{}'", &time_part[sign_pos..]));
    }

    let main = &value[..time_start + sign_pos];
    Ok((main, sign * (hours * 3600 + minutes * 60)))
}
