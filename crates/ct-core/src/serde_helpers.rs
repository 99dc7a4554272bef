//! Shared serde helpers for duration-valued configuration fields.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// Parse a duration string like "500ms", "30s", "5m", "1h" or "300".
///
/// A bare number is interpreted as seconds.
pub fn parse_duration(s: &str) -> CoreResult<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(CoreError::InvalidDuration {
            value: s.to_string(),
            reason: "empty duration string".to_string(),
        });
    }

    // "ms" must be checked before "m" and "s"
    let (number, unit_millis) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1u64)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000)
    } else {
        (s, 1_000)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| CoreError::InvalidDuration {
            value: s.to_string(),
            reason: e.to_string(),
        })?;

    value
        .checked_mul(unit_millis)
        .map(Duration::from_millis)
        .ok_or_else(|| CoreError::InvalidDuration {
            value: s.to_string(),
            reason: "duration overflows".to_string(),
        })
}

/// Render a duration in the shortest exact unit accepted by [`parse_duration`].
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis == 0 {
        "0s".to_string()
    } else if millis % 3_600_000 == 0 {
        format!("{}h", millis / 3_600_000)
    } else if millis % 60_000 == 0 {
        format!("{}m", millis / 60_000)
    } else if millis % 1_000 == 0 {
        format!("{}s", millis / 1_000)
    } else {
        format!("{}ms", millis)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

/// `deserialize_with` adapter for [`Duration`] fields.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

/// `serialize_with` adapter for [`Duration`] fields.
pub fn serialize_duration<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(*d))
}
