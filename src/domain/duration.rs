//! Go-style duration strings (`100ms`, `1m30s`, `1.5s`) used in workflow
//! documents and configuration.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serializer};
use std::sync::OnceLock;
use std::time::Duration;

fn unit_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"([0-9]+(?:\.[0-9]+)?|\.[0-9]+)(ns|us|µs|ms|s|m|h)").expect("valid duration regex")
    })
}

/// Parse a duration string. A bare integer is read as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total: u128 = 0;
    let mut consumed = 0;
    for caps in unit_pattern().captures_iter(s) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or_default();
        if whole.start != consumed {
            return Err(format!("invalid duration {:?}", input));
        }
        consumed = whole.end;

        let unit: u128 = match &caps[2] {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            _ => unreachable!("unit is constrained by the pattern"),
        };
        total += scaled_nanos(&caps[1], unit).ok_or_else(|| format!("invalid duration {:?}", input))?;
    }

    if consumed != s.len() {
        return Err(format!("invalid duration {:?}", input));
    }
    let nanos = u64::try_from(total).map_err(|_| format!("duration {:?} overflows", input))?;
    Ok(Duration::from_nanos(nanos))
}

/// `number * unit` in nanoseconds without going through floating point
fn scaled_nanos(number: &str, unit: u128) -> Option<u128> {
    let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut nanos = whole.checked_mul(unit)?;
    if !frac.is_empty() {
        let digits = frac.len().min(18) as u32;
        let frac: u128 = frac[..digits as usize].parse().ok()?;
        nanos += frac * unit / 10u128.pow(digits);
    }
    Some(nanos)
}

/// Compact rendering that `parse_duration` accepts back
pub fn format_duration(duration: Duration) -> String {
    format!("{:?}", duration)
}

/// Serde helpers for `Option<Duration>` fields
pub mod option {
    use super::*;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_some(&format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<RawDuration> = Option::deserialize(deserializer)?;
        raw.map(|r| r.into_duration().map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Serde helpers for plain `Duration` fields
pub mod required {
    use super::*;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawDuration::deserialize(deserializer)?
            .into_duration()
            .map_err(serde::de::Error::custom)
    }
}

/// Documents may write `timeout: 30` or `timeout: "30s"`
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

impl RawDuration {
    fn into_duration(self) -> Result<Duration, String> {
        match self {
            Self::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Self::Text(text) => parse_duration(&text),
        }
    }
}
