//! HL7 `DT`, `TS` and `DTM` decoding.
//!
//! HL7 timestamps carry as much precision as the sender chose: `YYYY[MM[DD[HH[MM[SS[.S+]]]]]]`
//! optionally followed by a `+ZZZZ`/`-ZZZZ` offset. Missing trailing parts default to the
//! start of the period. Offsets are dropped; values are treated as local wall-clock time, which
//! is how the results they annotate are reported.

use crate::{WireError, WireResult};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Parses an HL7 timestamp into a naive date-time.
pub fn parse_timestamp(input: &str) -> WireResult<NaiveDateTime> {
    let invalid = || WireError::InvalidTimestamp(input.to_string());

    let trimmed = input.trim();
    let without_offset = match trimmed.find(['+', '-']) {
        Some(idx) => &trimmed[..idx],
        None => trimmed,
    };
    let digits = match without_offset.split_once('.') {
        Some((whole, _fraction)) => whole,
        None => without_offset,
    };

    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if !matches!(digits.len(), 4 | 6 | 8 | 10 | 12 | 14) {
        return Err(invalid());
    }

    let part = |range: std::ops::Range<usize>, default: u32| -> WireResult<u32> {
        match digits.get(range) {
            Some(s) => s.parse().map_err(|_| invalid()),
            None => Ok(default),
        }
    };

    let year: i32 = digits[0..4].parse().map_err(|_| invalid())?;
    let month = part(4..6, 1)?;
    let day = part(6..8, 1)?;
    let hour = part(8..10, 0)?;
    let minute = part(10..12, 0)?;
    let second = part(12..14, 0)?;

    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)?;
    let time = NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(invalid)?;
    Ok(NaiveDateTime::new(date, time))
}

/// Parses an HL7 `DT` value (a timestamp of at most day precision).
pub fn parse_date(input: &str) -> WireResult<NaiveDate> {
    if input.trim().len() > 8 {
        return Err(WireError::InvalidTimestamp(input.to_string()));
    }
    parse_timestamp(input).map(|ts| ts.date())
}
