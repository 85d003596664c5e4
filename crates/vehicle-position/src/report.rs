//! Vehicle position data types

use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport mode of a vehicle, taken from the topic it was published on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleMode {
    Bus,
    Tram,
    Subway,
    Ferry,
    Rail,
    #[default]
    #[serde(other)]
    Unknown,
}

impl VehicleMode {
    /// Modes published by the operator feed.
    pub const KNOWN: [Self; 5] = [Self::Bus, Self::Tram, Self::Subway, Self::Ferry, Self::Rail];

    /// Topic segment for the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bus => "bus",
            Self::Tram => "tram",
            Self::Subway => "subway",
            Self::Ferry => "ferry",
            Self::Rail => "rail",
            Self::Unknown => "unknown",
        }
    }
}

impl From<&str> for VehicleMode {
    fn from(segment: &str) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(segment))
            .unwrap_or(Self::Unknown)
    }
}

impl FromStr for VehicleMode {
    type Err = Infallible;

    fn from_str(segment: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(segment))
    }
}

impl Display for VehicleMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single decoded vehicle position message.
///
/// Reports are full snapshots of a vehicle, never deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehiclePositionReport {
    /// Operator vehicle identifier.
    pub vehicle_id: String,

    pub latitude: f64,

    pub longitude: f64,

    /// Mode taken from the topic path.
    pub vehicle_mode: VehicleMode,

    /// Route display label, e.g. "55" or "M1".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_designation: Option<String>,

    /// When the decoder saw the message. Used for staleness only.
    pub received_at: DateTime<Utc>,
}
