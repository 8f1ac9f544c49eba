use derive_more::Display;
use std::time::Duration;

/// Failure to parse a duration literal.
#[derive(Debug, Display, PartialEq, Eq)]
#[display(fmt = "invalid duration `{}` (expected <digits><s|m|h|d>)", _0)]
pub struct DurationError(pub String);

impl std::error::Error for DurationError {}

/// Parse a duration literal of the form `<digits><unit>` with unit `s`, `m`, `h` or `d`.
///
/// This is the only duration syntax accepted anywhere in the query language;
/// anything else (including the empty string, fractions, or composite forms
/// like `1h30m`) fails.
pub fn parse_duration(s: &str) -> Result<Duration, DurationError> {
    let err = || DurationError(s.to_owned());
    if s.len() < 2 || !s.is_ascii() {
        return Err(err());
    }
    let (digits, unit) = s.split_at(s.len() - 1);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err());
    }
    let count: u64 = digits.parse().map_err(|_| err())?;
    let millis = match unit {
        "s" => count.checked_mul(1_000),
        "m" => count.checked_mul(60_000),
        "h" => count.checked_mul(3_600_000),
        "d" => count.checked_mul(86_400_000),
        _ => return Err(err()),
    }
    .ok_or_else(err)?;
    Ok(Duration::from_millis(millis))
}

/// Render a duration as the shortest literal that parses back to the same value.
///
/// Durations that are not a whole number of seconds are rounded down; the
/// query language cannot express sub-second windows.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs > 0 && secs % 86_400 == 0 {
        format!("{}d", secs / 86_400)
    } else if secs > 0 && secs % 3_600 == 0 {
        format!("{}h", secs / 3_600)
    } else if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}
