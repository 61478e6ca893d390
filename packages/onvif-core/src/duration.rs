//! ISO-8601 duration parsing and formatting (`PnDTnHnMn.nS`).
//!
//! ONVIF exchanges termination times and message timeouts as XML Schema
//! durations. Calendar units are approximated (`Y` = 365 days, `M` in the
//! date part = 30 days) since cameras only ever send day/time components.

use std::time::Duration;

use thiserror::Error;

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 3600;
const SECS_PER_DAY: u64 = 86_400;

/// Errors raised while parsing a duration string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationError {
    /// Input was empty.
    #[error("empty duration")]
    Empty,

    /// Negative durations are not meaningful for subscriptions.
    #[error("negative duration not supported: {0}")]
    Negative(String),

    /// Input does not follow the `PnDTnHnMnS` grammar.
    #[error("invalid ISO-8601 duration: {0}")]
    Invalid(String),
}

/// Parses an ISO-8601 duration such as `PT1M30S` or `P1DT2H`.
pub fn parse_iso8601(input: &str) -> Result<Duration, DurationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationError::Empty);
    }
    if s.starts_with('-') {
        return Err(DurationError::Negative(s.to_string()));
    }
    let invalid = || DurationError::Invalid(s.to_string());

    let body = s.strip_prefix('P').ok_or_else(invalid)?;
    if body.is_empty() {
        return Err(invalid());
    }

    let (date_part, time_part) = match body.split_once('T') {
        Some((_, "")) => return Err(invalid()),
        Some((d, t)) => (d, Some(t)),
        None => (body, None),
    };

    let mut total = Duration::ZERO;
    for (value, unit) in components(date_part).ok_or_else(invalid)? {
        let secs = match unit {
            'Y' => 365 * SECS_PER_DAY,
            'M' => 30 * SECS_PER_DAY,
            'W' => 7 * SECS_PER_DAY,
            'D' => SECS_PER_DAY,
            _ => return Err(invalid()),
        };
        total += scaled(value, secs).ok_or_else(invalid)?;
    }

    if let Some(time_part) = time_part {
        for (value, unit) in components(time_part).ok_or_else(invalid)? {
            let secs = match unit {
                'H' => SECS_PER_HOUR,
                'M' => SECS_PER_MINUTE,
                'S' => 1,
                _ => return Err(invalid()),
            };
            total += scaled(value, secs).ok_or_else(invalid)?;
        }
    }

    Ok(total)
}

/// Formats a duration in canonical `P[nD]T[nH][nM][n.nS]` form.
///
/// Zero formats as `PT0S`. Fractional seconds keep nanosecond precision
/// with trailing zeros trimmed, so `parse_iso8601(format_iso8601(d)) == d`.
pub fn format_iso8601(d: Duration) -> String {
    let total = d.as_secs();
    let nanos = d.subsec_nanos();
    if total == 0 && nanos == 0 {
        return "PT0S".to_string();
    }

    let days = total / SECS_PER_DAY;
    let hours = (total % SECS_PER_DAY) / SECS_PER_HOUR;
    let minutes = (total % SECS_PER_HOUR) / SECS_PER_MINUTE;
    let seconds = total % SECS_PER_MINUTE;

    let mut out = String::from("P");
    if days > 0 {
        out.push_str(&format!("{days}D"));
    }
    if hours == 0 && minutes == 0 && seconds == 0 && nanos == 0 {
        return out;
    }
    out.push('T');
    if hours > 0 {
        out.push_str(&format!("{hours}H"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}M"));
    }
    if seconds > 0 || nanos > 0 {
        if nanos > 0 {
            let frac = format!("{nanos:09}");
            out.push_str(&format!("{seconds}.{}S", frac.trim_end_matches('0')));
        } else {
            out.push_str(&format!("{seconds}S"));
        }
    }
    out
}

/// Splits `12H30M` into `[("12", 'H'), ("30", 'M')]`.
fn components(part: &str) -> Option<Vec<(&str, char)>> {
    let mut out = Vec::new();
    let mut start = 0;
    for (idx, ch) in part.char_indices() {
        if ch.is_ascii_alphabetic() {
            let value = &part[start..idx];
            if value.is_empty() {
                return None;
            }
            out.push((value, ch));
            start = idx + ch.len_utf8();
        } else if !(ch.is_ascii_digit() || ch == '.' || ch == ',') {
            return None;
        }
    }
    if start != part.len() {
        return None;
    }
    Some(out)
}

/// Multiplies a decimal component by `unit_secs`, keeping nanosecond precision.
fn scaled(value: &str, unit_secs: u64) -> Option<Duration> {
    let value = value.replace(',', ".");
    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value.as_str(), ""),
    };
    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    if frac.len() > 9 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let frac_nanos: u64 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<9}").parse().ok()?
    };

    let secs = whole.checked_mul(unit_secs)?;
    let frac_total = frac_nanos.checked_mul(unit_secs)?;
    let extra_secs = frac_total / 1_000_000_000;
    let nanos = (frac_total % 1_000_000_000) as u32;
    Some(Duration::new(secs.checked_add(extra_secs)?, nanos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_time_components() {
        assert_eq!(parse_iso8601("PT30S").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_iso8601("PT1M30S").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_iso8601("PT2H").unwrap(), Duration::from_secs(7200));
        assert_eq!(
            parse_iso8601("PT0.5S").unwrap(),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn parses_date_components() {
        assert_eq!(
            parse_iso8601("P1DT1S").unwrap(),
            Duration::from_secs(86_401)
        );
        assert_eq!(parse_iso8601("P1W").unwrap(), Duration::from_secs(604_800));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(parse_iso8601(""), Err(DurationError::Empty));
        assert!(matches!(parse_iso8601("30S"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse_iso8601("P"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse_iso8601("PT"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse_iso8601("PTS"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse_iso8601("P5H"), Err(DurationError::Invalid(_))));
        assert!(matches!(
            parse_iso8601("-PT5S"),
            Err(DurationError::Negative(_))
        ));
    }

    #[test]
    fn formats_canonically() {
        assert_eq!(format_iso8601(Duration::ZERO), "PT0S");
        assert_eq!(format_iso8601(Duration::from_secs(90)), "PT1M30S");
        assert_eq!(format_iso8601(Duration::from_secs(86_400)), "P1D");
        assert_eq!(format_iso8601(Duration::from_millis(1500)), "PT1.5S");
        assert_eq!(format_iso8601(Duration::from_secs(3600 + 5)), "PT1H5S");
    }

    #[test]
    fn format_then_parse_is_identity() {
        let samples = [
            Duration::ZERO,
            Duration::from_secs(11),
            Duration::from_secs(59),
            Duration::from_secs(3601),
            Duration::from_secs(3 * 86_400 + 7322),
            Duration::new(12, 345_000_000),
            Duration::new(0, 1),
        ];
        for d in samples {
            assert_eq!(parse_iso8601(&format_iso8601(d)).unwrap(), d, "{d:?}");
        }
    }
}
