//! Canonical sighting record and BLE device addresses.
//!
//! A [`Sighting`] is one observation of one advertisement. It is produced by
//! the parser, judged by the dedup gate and written once by storage. Nothing
//! in the pipeline mutates it after construction.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Weakest signal accepted, in dBm.
pub const MIN_RSSI_DBM: i16 = -100;

/// Strongest signal accepted, in dBm.
pub const MAX_RSSI_DBM: i16 = 0;

/// Separators accepted between address octets.
static ADDRESS_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[:\-.\s]").expect("separator pattern is valid"));

static ADDRESS_HEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-F]{12}$").expect("address pattern is valid"));

/// A normalized 48-bit BLE device address (`AA:BB:CC:DD:EE:FF`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
#[schema(value_type = String, example = "AA:BB:CC:DD:EE:FF")]
pub struct DeviceId(String);

/// The input could not be read as a device address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a valid BLE device address")]
pub struct InvalidDeviceId(pub String);

impl DeviceId {
    /// Normalize an address written with `:`, `-`, `.`, whitespace or no
    /// separators at all.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDeviceId`] unless the input holds exactly twelve hex digits.
    pub fn parse(input: &str) -> Result<Self, InvalidDeviceId> {
        let hex = ADDRESS_SEPARATORS.replace_all(input.trim(), "").to_ascii_uppercase();
        if !ADDRESS_HEX.is_match(&hex) {
            return Err(InvalidDeviceId(input.to_string()));
        }

        let octets: Vec<&str> = (0..12).step_by(2).map(|i| &hex[i..i + 2]).collect();
        Ok(Self(octets.join(":")))
    }

    /// The normalized address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = InvalidDeviceId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = InvalidDeviceId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

/// One observed BLE advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sighting {
    /// Advertising device.
    pub device_id: DeviceId,

    /// Received signal strength in dBm, within [`MIN_RSSI_DBM`]..=[`MAX_RSSI_DBM`].
    pub rssi: i16,

    /// When the scanner saw the advertisement (UTC).
    pub observed_at: DateTime<Utc>,

    /// Name from the tag table, if the device is known.
    pub tag: Option<String>,

    /// Kind of the matched tag, if the table gives one.
    pub tag_kind: Option<String>,

    /// The report exactly as it arrived.
    pub raw_payload: Option<String>,

    /// Address of the gateway that forwarded the report.
    pub gateway: Option<IpAddr>,
}

impl Sighting {
    /// Coarse signal bucket for this sighting.
    #[must_use]
    pub const fn signal_quality(&self) -> SignalQuality {
        SignalQuality::from_rssi(self.rssi)
    }
}

/// Human-friendly RSSI bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SignalQuality {
    /// -50 dBm or stronger.
    Excellent,
    /// -65 dBm or stronger.
    Good,
    /// -80 dBm or stronger.
    Fair,
    /// Anything weaker.
    Poor,
}

impl SignalQuality {
    /// Bucket an RSSI reading.
    #[must_use]
    pub const fn from_rssi(rssi: i16) -> Self {
        if rssi >= -50 {
            Self::Excellent
        } else if rssi >= -65 {
            Self::Good
        } else if rssi >= -80 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

/// Whether `rssi` is a physically plausible reading.
#[must_use]
pub const fn is_plausible_rssi(rssi: i64) -> bool {
    rssi >= MIN_RSSI_DBM as i64 && rssi <= MAX_RSSI_DBM as i64
}
