use chrono::{DateTime, Utc};
use std::fmt;

/// Confidence tag attached to each decoded value.
///
/// The discriminants are transmitted on the wire as a single byte, so their
/// order must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Quality {
    None = 0,
    Unknown = 1,
    Bad = 2,
    Good = 3,
}

impl Quality {
    pub fn byte_value(self) -> u8 {
        self as u8
    }

    /// Out-of-range bytes map to `None` rather than failing.
    pub fn from_byte(b: u8) -> Quality {
        match b {
            0 => Quality::None,
            1 => Quality::Unknown,
            2 => Quality::Bad,
            3 => Quality::Good,
            _ => Quality::None,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Quality::None => "NONE",
            Quality::Unknown => "UNKNOWN",
            Quality::Bad => "BAD",
            Quality::Good => "GOOD",
        };
        write!(f, "{}", name)
    }
}

/// One decoded scalar value.
///
/// `value` is NaN if and only if `quality` is `Bad`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub key: String,
    pub time: DateTime<Utc>,
    pub value: f64,
    pub quality: Quality,
}

impl Reading {
    pub fn new(key: impl Into<String>, time: DateTime<Utc>, value: f64, quality: Quality) -> Self {
        Self {
            key: key.into(),
            time,
            value,
            quality,
        }
    }
}

impl fmt::Display for Reading {
    /// Wire form: `key,qualityName,epochMillis,value`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.key,
            self.quality,
            self.time.timestamp_millis(),
            self.value
        )
    }
}

/// All readings decoded from one datagram for one endpoint group.
///
/// Produced atomically per datagram; an empty batch marks a cycle that
/// yielded no usable data (bad checksum, short datagram).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingBatch {
    pub readings: Vec<Reading>,
}

impl ReadingBatch {
    pub fn new(readings: Vec<Reading>) -> Self {
        Self { readings }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_data(&self) -> bool {
        !self.readings.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthStatus {
    NotOperational,
    PartiallyOperational,
    Operational,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthStatus::NotOperational => "NOT_OPERATIONAL",
            HealthStatus::PartiallyOperational => "PARTIALLY_OPERATIONAL",
            HealthStatus::Operational => "OPERATIONAL",
        };
        write!(f, "{}", name)
    }
}

/// One health sample, produced once per window close by the health engine.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReading {
    pub component: String,
    pub status: HealthStatus,
    pub message: String,
    pub time: DateTime<Utc>,
}

impl HealthReading {
    pub fn new(
        component: impl Into<String>,
        status: HealthStatus,
        message: impl Into<String>,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            component: component.into(),
            status,
            message: message.into(),
            time,
        }
    }
}

impl fmt::Display for HealthReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.component,
            self.time.timestamp_millis(),
            self.status,
            self.message
        )
    }
}
