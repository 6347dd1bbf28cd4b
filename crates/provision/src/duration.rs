//! Duration strings as cert-manager accepts them
//!
//! Two notations are understood:
//! - Go style: a sequence of decimal numbers with units, e.g. `2160h`, `1h30m`,
//!   `1.5h`, `500ms` (units `ns`, `us`/`µs`, `ms`, `s`, `m`, `h`)
//! - ISO-8601 style: `P90D`, `PT360H`, `P1W2DT3H` (weeks, days, hours, minutes,
//!   seconds; years and months are rejected as ambiguous)

use std::time::Duration;
use thiserror::Error;

/// Errors from parsing a duration string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("duration is empty")]
    Empty,

    #[error("invalid duration {0:?}")]
    Invalid(String),

    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),

    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { input: String, unit: String },

    #[error("duration {0:?} must be positive")]
    NotPositive(String),

    #[error("duration {0:?} is too large")]
    Overflow(String),
}

/// Parse a strictly positive duration
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationError::Empty);
    }
    if s.starts_with('-') {
        return Err(DurationError::NotPositive(input.to_string()));
    }
    let s = s.strip_prefix('+').unwrap_or(s);

    let seconds = if s.starts_with(['P', 'p']) {
        parse_iso8601(s, input)?
    } else {
        parse_go(s, input)?
    };

    let duration = Duration::try_from_secs_f64(seconds)
        .map_err(|_| DurationError::Overflow(input.to_string()))?;
    if duration.is_zero() {
        return Err(DurationError::NotPositive(input.to_string()));
    }
    Ok(duration)
}

fn parse_go(s: &str, input: &str) -> Result<f64, DurationError> {
    let mut total = 0.0;
    let mut rest = s;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(DurationError::Invalid(input.to_string()));
        }
        let value = parse_number(&rest[..number_len], input)?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(DurationError::MissingUnit(input.to_string())),
            unit => {
                return Err(DurationError::UnknownUnit {
                    input: input.to_string(),
                    unit: unit.to_string(),
                });
            }
        };
        total += value * scale;
        rest = &rest[unit_len..];
    }

    Ok(total)
}

fn parse_iso8601(s: &str, input: &str) -> Result<f64, DurationError> {
    let body = &s[1..];
    let (date, time) = match body.split_once(['T', 't']) {
        Some((date, time)) => (date, Some(time)),
        None => (body, None),
    };
    if date.is_empty() && time.is_none_or(str::is_empty) {
        return Err(DurationError::Invalid(input.to_string()));
    }

    let mut total = iso_components(date, &[('W', 604_800.0), ('D', 86_400.0)], input)?;
    if let Some(time) = time {
        if time.is_empty() {
            return Err(DurationError::Invalid(input.to_string()));
        }
        total += iso_components(time, &[('H', 3600.0), ('M', 60.0), ('S', 1.0)], input)?;
    }
    Ok(total)
}

fn iso_components(part: &str, units: &[(char, f64)], input: &str) -> Result<f64, DurationError> {
    let mut total = 0.0;
    let mut rest = part;

    while !rest.is_empty() {
        let idx = rest
            .find(|c: char| c.is_ascii_alphabetic())
            .ok_or_else(|| DurationError::MissingUnit(input.to_string()))?;
        if idx == 0 {
            return Err(DurationError::Invalid(input.to_string()));
        }
        let value = parse_number(&rest[..idx], input)?;
        let unit = rest[idx..].chars().next().unwrap_or_default();
        let scale = units
            .iter()
            .find(|(u, _)| *u == unit.to_ascii_uppercase())
            .map(|(_, scale)| *scale)
            .ok_or_else(|| DurationError::UnknownUnit {
                input: input.to_string(),
                unit: unit.to_string(),
            })?;
        total += value * scale;
        rest = &rest[idx + unit.len_utf8()..];
    }

    Ok(total)
}

fn parse_number(raw: &str, input: &str) -> Result<f64, DurationError> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DurationError::Invalid(input.to_string()))
}
