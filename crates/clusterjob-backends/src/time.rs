//! Wall-time parsing and formatting.
//!
//! Accepted spellings: `M`, `M:S`, `H:M:S`, `D-H`, `D-H:M`, `D-H:M:S`,
//! `D:H:M:S`. Conversions are exact; schedulers reject malformed values.

use crate::error::BackendError;
use crate::resources::ResourceValue;

/// Parse a wall-time string into seconds
pub fn time_to_seconds(time: &str) -> Result<u64, BackendError> {
    let invalid = || BackendError::InvalidTime(time.to_string());
    let trimmed = time.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }

    let parse = |s: &str| -> Result<u64, BackendError> {
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        s.parse::<u64>().map_err(|_| invalid())
    };

    let (days, rest) = match trimmed.split_once('-') {
        Some((d, rest)) => (Some(parse(d)?), rest),
        None => (None, trimmed),
    };
    let fields = rest
        .split(':')
        .map(parse)
        .collect::<Result<Vec<u64>, _>>()?;

    let (d, h, m, sec) = match (days, fields.as_slice()) {
        (None, [m]) => (0, 0, *m, 0),
        (None, [m, s]) => (0, 0, *m, *s),
        (None, [h, m, s]) => (0, *h, *m, *s),
        (None, [d, h, m, s]) => (*d, *h, *m, *s),
        (Some(d), [h]) => (d, *h, 0, 0),
        (Some(d), [h, m]) => (d, *h, *m, 0),
        (Some(d), [h, m, s]) => (d, *h, *m, *s),
        _ => return Err(invalid()),
    };
    d.checked_mul(86400)
        .and_then(|t| h.checked_mul(3600).and_then(|x| t.checked_add(x)))
        .and_then(|t| m.checked_mul(60).and_then(|x| t.checked_add(x)))
        .and_then(|t| t.checked_add(sec))
        .ok_or_else(invalid)
}

/// Seconds of a `time` resource; bare integers are minutes
pub fn walltime_seconds(key: &str, value: &ResourceValue) -> Result<u64, BackendError> {
    match value {
        ResourceValue::Bool(_) => Err(BackendError::InvalidResource {
            key: key.to_string(),
            reason: "wall time cannot be a boolean".to_string(),
        }),
        other => time_to_seconds(&other.to_string()),
    }
}

/// `HH:MM:SS`, with hours allowed to exceed 24
pub fn format_hms(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// `D-HH:MM:SS` when at least a day, else `HH:MM:SS`
pub fn format_dhms(seconds: u64) -> String {
    let days = seconds / 86400;
    if days > 0 {
        format!("{}-{}", days, format_hms(seconds % 86400))
    } else {
        format_hms(seconds)
    }
}

/// Whole minutes, rounded up so the request is never shortened
pub fn ceil_minutes(seconds: u64) -> u64 {
    seconds / 60 + u64::from(seconds % 60 != 0)
}
