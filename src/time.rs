use ::time::OffsetDateTime;
use serde::{Deserialize, Deserializer};
use std::fmt::Display;
use std::ops::{Deref, Neg};
use std::str::FromStr;
use std::time::Duration;

/// Source of the current time. Remaining certificate validity is computed against this,
/// so tests can pin "now" instead of racing the wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    now: OffsetDateTime,
}

impl FixedClock {
    pub fn new(now: OffsetDateTime) -> Self {
        Self { now }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.now
    }
}

pub fn parse_duration(s: &str) -> Result<Duration, String> {
    cyborgtime::parse_duration(s).map_err(|e| format!("Invalid duration: {e}"))
}

/// A [`Duration`] that is written as a human-friendly string (`7d`, `90s`, `1h 30m`) in
/// configuration files and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedDuration {
    inner: Duration,
}

impl ParsedDuration {
    /// The same duration as a signed [`time::Duration`], for comparisons against remaining validity.
    pub fn as_time(&self) -> Result<::time::Duration, ::time::error::ConversionRange> {
        self.inner.try_into()
    }
}

impl From<Duration> for ParsedDuration {
    fn from(inner: Duration) -> Self {
        ParsedDuration { inner }
    }
}

impl From<u64> for ParsedDuration {
    fn from(seconds: u64) -> Self {
        Duration::from_secs(seconds).into()
    }
}

impl Deref for ParsedDuration {
    type Target = Duration;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl FromStr for ParsedDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration(s).map(ParsedDuration::from)
    }
}

impl<'de> Deserialize<'de> for ParsedDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Display for ParsedDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match humanize_duration_core(**self) {
            Ok(duration) => write!(f, "{duration}"),
            Err(_) => write!(f, "Time too long to display"),
        }
    }
}

pub fn humanize_duration_core(
    duration: core::time::Duration,
) -> Result<String, ::time::error::ConversionRange> {
    Ok(humanize_duration(duration.try_into()?))
}

pub fn humanize_duration(mut duration: ::time::Duration) -> String {
    // (seconds per unit, unit name). Month and year are approximations (30.44 and 365.25 days).
    const UNITS: [(i64, &str); 6] = [
        (31_557_600, "year"),
        (2_630_016, "month"),
        (86_400, "day"),
        (3_600, "hour"),
        (60, "minute"),
        (1, "second"),
    ];

    if duration.is_negative() {
        duration = duration.neg();
    }

    let mut remaining_seconds = duration.whole_seconds();
    let mut components = Vec::new();
    for (unit_seconds, unit_name) in UNITS {
        let amount = remaining_seconds / unit_seconds;
        remaining_seconds %= unit_seconds;
        if amount > 0 {
            let plural = if amount == 1 { "" } else { "s" };
            components.push(format!("{amount} {unit_name}{plural}"));
        }
    }
    if components.is_empty() {
        return "0 seconds".to_string();
    }

    components.join(", ")
}
