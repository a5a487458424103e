//! Duration fields as they travel through request payloads and storage.
//!
//! Inputs are parsed with `humantime` (`"1h5m"`, `"15m"`, `"90s"`) or as a
//! bare integer number of seconds. Outputs use the canonical unit-suffixed
//! form (`"1h5m0s"`, `"24h0m0s"`, `"1.5s"`) so that a value read back from
//! `config/lease` always has one spelling.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

use crate::errors::{Error, Result};

/// Parse a duration field value.
///
/// Empty strings are rejected; callers that treat an empty field as "unset"
/// must check for that before calling.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("duration cannot be empty"));
    }

    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    humantime::parse_duration(trimmed)
        .map_err(|e| Error::validation(format!("invalid duration '{}': {}", trimmed, e)))
}

/// Parse an optional duration field, treating an empty string as unset.
pub fn parse_optional_duration(raw: &str) -> Result<Option<Duration>> {
    if raw.trim().is_empty() {
        Ok(None)
    } else {
        parse_duration(raw).map(Some)
    }
}

/// Format a duration in canonical unit-suffixed form.
pub fn format_duration(duration: Duration) -> String {
    let total_nanos = duration.as_nanos();
    if total_nanos == 0 {
        return "0s".to_string();
    }

    if total_nanos < 1_000_000_000 {
        let (unit, scale) = if total_nanos < 1_000 {
            ("ns", 1u128)
        } else if total_nanos < 1_000_000 {
            ("µs", 1_000)
        } else {
            ("ms", 1_000_000)
        };
        return format!("{}{}", fraction(total_nanos, scale), unit);
    }

    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds_nanos = u128::from(total_secs % 60) * 1_000_000_000 + u128::from(duration.subsec_nanos());

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    out.push_str(&format!("{}s", fraction(seconds_nanos, 1_000_000_000)));
    out
}

/// Render `value / scale` with trailing fractional zeros removed.
fn fraction(value: u128, scale: u128) -> String {
    let whole = value / scale;
    let rem = value % scale;
    if rem == 0 {
        return whole.to_string();
    }

    let width = scale.to_string().len() - 1;
    let digits = format!("{:0width$}", rem, width = width);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

/// Serde adapter storing a `Duration` as its canonical string.
///
/// Deserialization also accepts an integer, read as nanoseconds, which is how
/// older entries encoded durations.
pub mod canonical {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Nanos(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) if text.is_empty() => Ok(Duration::ZERO),
            Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
            Raw::Nanos(nanos) => Ok(Duration::from_nanos(nanos)),
        }
    }
}

/// Same as [`canonical`] for optional durations; `None` and zero are both
/// written as absent.
pub mod canonical_option {
    use super::*;

    pub fn serialize<S>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) if !d.is_zero() => serializer.serialize_str(&format_duration(*d)),
            _ => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        match value {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(other) => {
                let duration =
                    super::canonical::deserialize(other).map_err(serde::de::Error::custom)?;
                Ok(if duration.is_zero() { None } else { Some(duration) })
            }
        }
    }
}
