//! Pin and granularity domain types.

use serde::{Deserialize, Serialize};

/// Kind of addressable telemetry channel on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PinType {
    Digital,
    Virtual,
    Analog,
}

impl PinType {
    /// One-character code used in file names and pin selectors.
    pub fn code(&self) -> char {
        match self {
            PinType::Digital => 'd',
            PinType::Virtual => 'v',
            PinType::Analog => 'a',
        }
    }

    /// Parses a pin type from its one-character code.
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'd' => Some(PinType::Digital),
            'v' => Some(PinType::Virtual),
            'a' => Some(PinType::Analog),
            _ => None,
        }
    }

    /// Parses a pin reference such as `"d8"` or `"v12"`.
    ///
    /// Only the canonical spelling is accepted: no sign and no leading zero.
    pub fn parse_pin(value: &str) -> Option<(PinType, u8)> {
        let mut chars = value.chars();
        let pin_type = Self::from_code(chars.next()?)?;
        let digits = chars.as_str();
        if digits.is_empty()
            || !digits.bytes().all(|b| b.is_ascii_digit())
            || (digits.len() > 1 && digits.starts_with('0'))
        {
            return None;
        }
        let pin = digits.parse::<u8>().ok()?;
        Some((pin_type, pin))
    }
}

/// Time-bucketing resolution of a stored telemetry stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GraphGranularity {
    #[default]
    Minute,
    Hourly,
    Daily,
}

impl GraphGranularity {
    /// All granularities a stream may be stored at.
    pub const ALL: [GraphGranularity; 3] = [
        GraphGranularity::Minute,
        GraphGranularity::Hourly,
        GraphGranularity::Daily,
    ];

    /// Width of one bucket in milliseconds.
    pub fn millis(&self) -> i64 {
        match self {
            GraphGranularity::Minute => 60_000,
            GraphGranularity::Hourly => 3_600_000,
            GraphGranularity::Daily => 86_400_000,
        }
    }

    /// Lowercase label used in storage file names.
    pub fn label(&self) -> &'static str {
        match self {
            GraphGranularity::Minute => "minute",
            GraphGranularity::Hourly => "hourly",
            GraphGranularity::Daily => "daily",
        }
    }

    /// Parses a granularity from its storage label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "minute" => Some(GraphGranularity::Minute),
            "hourly" => Some(GraphGranularity::Hourly),
            "daily" => Some(GraphGranularity::Daily),
            _ => None,
        }
    }
}
