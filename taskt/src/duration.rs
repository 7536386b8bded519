//! Millisecond duration codec.
//!
//! Durations travel as plain JSON numbers of fractional milliseconds:
//! 3.5ms is `3.5`, one hour is `3600000`.

use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

const NANOS_PER_MILLI: u128 = 1_000_000;

/// A [`Duration`] that (de)serializes as fractional milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MsDuration(Duration);

impl MsDuration {
    pub const ZERO: Self = Self(Duration::ZERO);

    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn as_millis_f64(&self) -> f64 {
        self.0.as_nanos() as f64 / NANOS_PER_MILLI as f64
    }
}

impl From<Duration> for MsDuration {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl From<MsDuration> for Duration {
    fn from(ms: MsDuration) -> Self {
        ms.0
    }
}

impl Serialize for MsDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = self.0.as_nanos();
        // Whole milliseconds stay integral on the wire (`3600000`, not `3600000.0`).
        if nanos % NANOS_PER_MILLI == 0
            && let Ok(ms) = u64::try_from(nanos / NANOS_PER_MILLI)
        {
            return serializer.serialize_u64(ms);
        }
        serializer.serialize_f64(self.as_millis_f64())
    }
}

struct MsDurationVisitor;

impl MsDurationVisitor {
    fn from_millis<E: de::Error>(ms: f64) -> Result<MsDuration, E> {
        if !ms.is_finite() || ms < 0.0 {
            return Err(E::custom(format!(
                "couldn't decode duration: {ms} is not a non-negative millisecond count"
            )));
        }
        let nanos = (ms * NANOS_PER_MILLI as f64).round();
        if nanos > u64::MAX as f64 {
            return Err(E::custom(format!(
                "couldn't decode duration: {ms}ms is out of range"
            )));
        }
        Ok(MsDuration(Duration::from_nanos(nanos as u64)))
    }
}

impl<'de> Visitor<'de> for MsDurationVisitor {
    type Value = MsDuration;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number of milliseconds")
    }

    fn visit_u64<E: de::Error>(self, ms: u64) -> Result<Self::Value, E> {
        Ok(MsDuration(Duration::from_millis(ms)))
    }

    fn visit_i64<E: de::Error>(self, ms: i64) -> Result<Self::Value, E> {
        match u64::try_from(ms) {
            Ok(ms) => self.visit_u64(ms),
            Err(_) => Self::from_millis(ms as f64),
        }
    }

    fn visit_f64<E: de::Error>(self, ms: f64) -> Result<Self::Value, E> {
        Self::from_millis(ms)
    }
}

impl<'de> Deserialize<'de> for MsDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(MsDurationVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(d: Duration) -> String {
        serde_json::to_string(&MsDuration::from(d)).unwrap()
    }

    fn decode(s: &str) -> Result<Duration, serde_json::Error> {
        serde_json::from_str::<MsDuration>(s).map(Duration::from)
    }

    #[test]
    fn encodes_fractional_millis() {
        assert_eq!(encode(Duration::from_micros(3500)), "3.5");
        assert_eq!(encode(Duration::from_micros(1)), "0.001");
    }

    #[test]
    fn encodes_whole_millis_as_integers() {
        assert_eq!(encode(Duration::from_secs(3600)), "3600000");
        assert_eq!(encode(Duration::ZERO), "0");
    }

    #[test]
    fn decodes_fractional_and_whole_millis() {
        assert_eq!(decode("3.5").unwrap(), Duration::from_micros(3500));
        assert_eq!(decode("3600000").unwrap(), Duration::from_secs(3600));
        assert_eq!(decode("0.001").unwrap(), Duration::from_micros(1));
    }

    #[test]
    fn rejects_non_numeric_input() {
        assert!(decode("3 seconds").is_err());
        assert!(decode("\"3.5\"").is_err());
        assert!(decode("null").is_err());
    }

    #[test]
    fn rejects_negative_durations() {
        let err = decode("-1.5").unwrap_err();
        assert!(err.to_string().contains("non-negative"), "{err}");
        assert!(decode("-2").is_err());
    }

    #[test]
    fn as_millis_f64_keeps_sub_millisecond_precision() {
        let ms = MsDuration::new(Duration::from_nanos(1_250_000));
        assert!((ms.as_millis_f64() - 1.25).abs() < f64::EPSILON);
    }
}
