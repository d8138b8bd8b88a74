//! Human readable durations for configuration files
//!
//! Accepts the compact notation operators already use for scrape intervals:
//! `"500ms"`, `"10s"`, `"5m"`, `"1h30m"`, `"1.5s"`. A bare integer (either a
//! YAML number or a string of digits) is read as seconds.

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::time::Duration;

/// Error type for duration parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationParseError {
    pub input: String,
    pub message: String,
}

impl fmt::Display for DurationParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid duration '{}': {}", self.input, self.message)
    }
}

impl std::error::Error for DurationParseError {}

/// Parse a duration string such as `"1h30m"` or `"250ms"`.
///
/// | Unit | Meaning |
/// |------|---------|
/// | `ns` | nanoseconds |
/// | `us`, `µs` | microseconds |
/// | `ms` | milliseconds |
/// | `s` | seconds |
/// | `m` | minutes |
/// | `h` | hours |
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let input = input.trim();
    let fail = |message: &str| DurationParseError {
        input: input.to_string(),
        message: message.to_string(),
    };

    if input.is_empty() {
        return Err(fail("empty duration"));
    }
    if input.starts_with('-') {
        return Err(fail("negative durations are not allowed"));
    }

    let rest = input.strip_prefix('+').unwrap_or(input);
    if rest.chars().all(|c| c.is_ascii_digit()) {
        let secs = rest
            .parse::<u64>()
            .map_err(|_| fail("number out of range"))?;
        return Ok(Duration::from_secs(secs));
    }

    let mut total = 0f64;
    let mut remaining = rest;
    while !remaining.is_empty() {
        let number_len = remaining
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| fail("missing unit"))?;
        if number_len == 0 {
            return Err(fail("expected a number"));
        }
        let value: f64 = remaining[..number_len]
            .parse()
            .map_err(|_| fail("malformed number"))?;
        remaining = &remaining[number_len..];

        let unit_len = remaining
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(remaining.len());
        let nanos_per_unit = match &remaining[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(fail("unknown unit")),
        };
        remaining = &remaining[unit_len..];
        total += value * nanos_per_unit;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(fail("duration out of range"));
    }
    Ok(Duration::from_nanos(total.round() as u64))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

impl RawDuration {
    fn into_duration(self) -> Result<Duration, DurationParseError> {
        match self {
            RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
            RawDuration::Text(text) => parse_duration(&text),
        }
    }
}

/// `deserialize_with` helper for required duration fields.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    RawDuration::deserialize(deserializer)?
        .into_duration()
        .map_err(serde::de::Error::custom)
}

/// `deserialize_with` helper for optional per-metric overrides.
pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawDuration>::deserialize(deserializer)?
        .map(RawDuration::into_duration)
        .transpose()
        .map_err(serde::de::Error::custom)
}
