//! Raw report parsing and validation.
//!
//! A scanner report arrives as a flat JSON object. Field names vary between
//! gateway firmwares, so each logical field is looked up under a short list
//! of aliases. Anything not listed here is ignored.
//!
//! Parsing is pure: the caller supplies the ingestion clock reading and the
//! gateway address through [`ReportContext`].

use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::record::{is_plausible_rssi, DeviceId, Sighting, MAX_RSSI_DBM, MIN_RSSI_DBM};
use crate::tags::TagTable;

const DEVICE_ID_KEYS: &[&str] = &["device_id", "mac", "address"];
const RSSI_KEYS: &[&str] = &["rssi"];
const OBSERVED_AT_KEYS: &[&str] = &["observed_at", "timestamp", "tsUtc", "ts"];

/// Naive layouts accepted for timestamps without an offset; read as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
];

/// Why a report was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A required field is absent or blank.
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    /// The device identifier is present but is not a BLE address.
    #[error("Invalid device identifier '{0}'. Expected a 48-bit address such as AA:BB:CC:DD:EE:FF.")]
    InvalidDeviceId(String),

    /// RSSI is not an integer within the plausible range.
    #[error(
        "Invalid RSSI '{value}'. Expected an integer between {} and {} dBm.",
        MIN_RSSI_DBM,
        MAX_RSSI_DBM
    )]
    InvalidRssi {
        /// The offending value as received.
        value: String,
    },

    /// The timestamp is unreadable or outside the accepted window.
    #[error("Invalid timestamp '{value}': {reason}")]
    InvalidTimestamp {
        /// The offending value as received.
        value: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The payload is not a report object at all.
    #[error("Unrecognized report format: {0}")]
    UnrecognizedFormat(String),
}

impl ParseError {
    /// Machine-readable code for API responses.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::InvalidDeviceId(_) => "invalid_device_id",
            Self::InvalidRssi { .. } => "invalid_rssi",
            Self::InvalidTimestamp { .. } => "invalid_timestamp",
            Self::UnrecognizedFormat(_) => "unrecognized_format",
        }
    }
}

/// Transport-side facts about one report.
#[derive(Debug, Clone, Copy)]
pub struct ReportContext {
    /// Server clock when the report was received.
    pub received_at: DateTime<Utc>,
    /// Peer that delivered it.
    pub gateway: Option<IpAddr>,
}

impl ReportContext {
    /// Context stamped with the current time.
    #[must_use]
    pub fn now(gateway: Option<IpAddr>) -> Self {
        Self {
            received_at: Utc::now(),
            gateway,
        }
    }
}

/// Turns raw reports into [`Sighting`]s.
#[derive(Debug, Clone)]
pub struct ReportParser {
    tags: TagTable,
    max_future_skew: Duration,
    max_age: Duration,
}

impl ReportParser {
    /// Create a parser with the given tag table and timestamp window.
    #[must_use]
    pub const fn new(tags: TagTable, max_future_skew: Duration, max_age: Duration) -> Self {
        Self {
            tags,
            max_future_skew,
            max_age,
        }
    }

    /// Parse a report from its wire text. The text is kept as `raw_payload`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::UnrecognizedFormat`] for invalid JSON or a
    /// non-object payload, otherwise see [`ReportParser::parse_value`].
    pub fn parse_text(&self, text: &str, ctx: ReportContext) -> Result<Sighting, ParseError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ParseError::UnrecognizedFormat(format!("invalid JSON: {e}")))?;
        self.parse_value(&value, Some(text.to_string()), ctx)
    }

    /// Parse an already-decoded report.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found, checking the device
    /// identifier, then RSSI, then the timestamp.
    pub fn parse_value(
        &self,
        value: &Value,
        raw_payload: Option<String>,
        ctx: ReportContext,
    ) -> Result<Sighting, ParseError> {
        let fields = value.as_object().ok_or_else(|| {
            ParseError::UnrecognizedFormat(format!("expected a JSON object, got {}", kind_of(value)))
        })?;

        let device_id = parse_device_id(fields)?;
        let rssi = parse_rssi(fields)?;
        let observed_at = match first_present(fields, OBSERVED_AT_KEYS) {
            Some(raw) => self.check_window(parse_timestamp(raw)?, raw, ctx.received_at)?,
            None => ctx.received_at,
        };
        let (tag, tag_kind) = self
            .tags
            .lookup(&device_id)
            .map_or((None, None), |t| (Some(t.name.clone()), t.kind.clone()));

        Ok(Sighting {
            device_id,
            rssi,
            observed_at,
            tag,
            tag_kind,
            raw_payload,
            gateway: ctx.gateway,
        })
    }

    fn check_window(
        &self,
        observed_at: DateTime<Utc>,
        raw: &Value,
        received_at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ParseError> {
        let reject = |reason: String| ParseError::InvalidTimestamp {
            value: display_value(raw),
            reason,
        };

        let ahead = observed_at.signed_duration_since(received_at);
        if ahead.to_std().is_ok_and(|ahead| ahead > self.max_future_skew) {
            return Err(reject(format!(
                "more than {}s ahead of server time",
                self.max_future_skew.as_secs()
            )));
        }

        let behind = received_at.signed_duration_since(observed_at);
        if behind.to_std().is_ok_and(|behind| behind > self.max_age) {
            return Err(reject(format!(
                "more than {}s behind server time",
                self.max_age.as_secs()
            )));
        }

        Ok(observed_at)
    }
}

/// First non-null value stored under any of `keys`.
fn first_present<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .find(|value| !value.is_null())
}

fn parse_device_id(fields: &Map<String, Value>) -> Result<DeviceId, ParseError> {
    let raw = first_present(fields, DEVICE_ID_KEYS).ok_or(ParseError::MissingField("device_id"))?;
    let Value::String(text) = raw else {
        return Err(ParseError::InvalidDeviceId(display_value(raw)));
    };
    if text.trim().is_empty() {
        return Err(ParseError::MissingField("device_id"));
    }
    DeviceId::parse(text).map_err(|_| ParseError::InvalidDeviceId(text.clone()))
}

fn parse_rssi(fields: &Map<String, Value>) -> Result<i16, ParseError> {
    let raw = first_present(fields, RSSI_KEYS).ok_or(ParseError::MissingField("rssi"))?;
    let invalid = || ParseError::InvalidRssi {
        value: display_value(raw),
    };

    let rssi = match raw {
        Value::Number(n) => n.as_i64().ok_or_else(invalid)?,
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };

    if !is_plausible_rssi(rssi) {
        return Err(invalid());
    }
    i16::try_from(rssi).map_err(|_| invalid())
}

/// Read a timestamp from RFC 3339 text, a naive UTC layout, or Unix seconds.
fn parse_timestamp(raw: &Value) -> Result<DateTime<Utc>, ParseError> {
    let unreadable = |reason: &str| ParseError::InvalidTimestamp {
        value: display_value(raw),
        reason: reason.to_string(),
    };

    match raw {
        Value::Number(n) => n
            .as_f64()
            .and_then(from_unix_seconds)
            .ok_or_else(|| unreadable("not a representable Unix time")),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            if let Some(dt) = NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
            {
                return Ok(Utc.from_utc_datetime(&dt));
            }
            if let Ok(secs) = s.parse::<f64>() {
                return from_unix_seconds(secs)
                    .ok_or_else(|| unreadable("not a representable Unix time"));
            }
            Err(unreadable("unrecognized timestamp format"))
        }
        _ => Err(unreadable("expected a string or number")),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn from_unix_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let micros = (secs * 1_000_000.0).round();
    if micros.abs() > 9.0e18 {
        return None;
    }
    DateTime::from_timestamp_micros(micros as i64)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

const fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parser() -> ReportParser {
        let tags = TagTable::from_toml(
            r#"
                [[tags]]
                name = "WHEELCHAIR_A"
                device = "AA:BB:CC:DD:EE:01"
                kind = "equipment"
            "#,
        )
        .unwrap();
        ReportParser::new(tags, Duration::from_secs(300), Duration::from_secs(86_400))
    }

    fn ctx() -> ReportContext {
        ReportContext {
            received_at: Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap(),
            gateway: Some("192.168.1.1".parse().unwrap()),
        }
    }

    #[test]
    fn test_valid_report_round_trips_fields() {
        for rssi in [-100, -87, -45, -10, 0] {
            let report = json!({ "device_id": "AA:BB:CC:DD:EE:FF", "rssi": rssi });
            let sighting = parser().parse_value(&report, None, ctx()).unwrap();
            assert_eq!(sighting.device_id.as_str(), "AA:BB:CC:DD:EE:FF");
            assert_eq!(i64::from(sighting.rssi), rssi);
        }
    }

    #[test]
    fn test_missing_timestamp_uses_received_at() {
        let report = json!({ "device_id": "AA:BB:CC:DD:EE:FF", "rssi": -45 });
        let sighting = parser().parse_value(&report, None, ctx()).unwrap();
        assert_eq!(sighting.observed_at, ctx().received_at);
        assert_eq!(sighting.gateway, ctx().gateway);
        assert_eq!(sighting.tag, None);
        assert_eq!(sighting.tag_kind, None);
    }

    #[test]
    fn test_null_timestamp_uses_received_at() {
        let report = json!({ "device_id": "AA:BB:CC:DD:EE:FF", "rssi": -45, "timestamp": null });
        let sighting = parser().parse_value(&report, None, ctx()).unwrap();
        assert_eq!(sighting.observed_at, ctx().received_at);
    }

    #[test]
    fn test_original_gateway_field_names() {
        let text = r#"{"mac":"aa-bb-cc-dd-ee-01","rssi":-65,"tsUtc":"2024-01-15T10:29:58Z"}"#;
        let sighting = parser().parse_text(text, ctx()).unwrap();
        assert_eq!(sighting.device_id.as_str(), "AA:BB:CC:DD:EE:01");
        assert_eq!(sighting.tag.as_deref(), Some("WHEELCHAIR_A"));
        assert_eq!(sighting.tag_kind.as_deref(), Some("equipment"));
        assert_eq!(
            sighting.observed_at,
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 29, 58).unwrap()
        );
        assert_eq!(sighting.raw_payload.as_deref(), Some(text));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let report = json!({
            "device_id": "AA:BB:CC:DD:EE:FF",
            "rssi": -60,
            "firmware": "7.04",
            "channel": 37,
            "extra": { "nested": true }
        });
        assert!(parser().parse_value(&report, None, ctx()).is_ok());
    }

    #[test]
    fn test_rssi_out_of_range_rejected() {
        for rssi in [json!(10), json!(1), json!(-101), json!(-120), json!(-45.5), json!("loud")] {
            let report = json!({ "device_id": "AA:BB:CC:DD:EE:FF", "rssi": rssi });
            let err = parser().parse_value(&report, None, ctx()).unwrap_err();
            assert!(matches!(err, ParseError::InvalidRssi { .. }), "rssi {rssi}");
        }
    }

    #[test]
    fn test_rssi_numeric_string_accepted() {
        let report = json!({ "device_id": "AA:BB:CC:DD:EE:FF", "rssi": " -72 " });
        let sighting = parser().parse_value(&report, None, ctx()).unwrap();
        assert_eq!(sighting.rssi, -72);
    }

    #[test]
    fn test_missing_rssi() {
        let report = json!({ "device_id": "AA:BB:CC:DD:EE:FF" });
        let err = parser().parse_value(&report, None, ctx()).unwrap_err();
        assert_eq!(err, ParseError::MissingField("rssi"));
    }

    #[test]
    fn test_missing_device_id() {
        for report in [
            json!({ "rssi": -45 }),
            json!({ "device_id": "", "rssi": -45 }),
            json!({ "device_id": "   ", "rssi": -45 }),
            json!({ "device_id": null, "rssi": -45 }),
        ] {
            let err = parser().parse_value(&report, None, ctx()).unwrap_err();
            assert_eq!(err, ParseError::MissingField("device_id"));
        }
    }

    #[test]
    fn test_malformed_device_id() {
        let report = json!({ "device_id": "not-a-mac", "rssi": -45 });
        let err = parser().parse_value(&report, None, ctx()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidDeviceId(_)));

        let report = json!({ "device_id": 42, "rssi": -45 });
        let err = parser().parse_value(&report, None, ctx()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidDeviceId(_)));
    }

    #[test]
    fn test_timestamp_encodings() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        for ts in [
            json!("2024-01-15T10:00:00Z"),
            json!("2024-01-15T12:00:00+02:00"),
            json!("2024-01-15T10:00:00.000"),
            json!("2024-01-15 10:00:00"),
            json!("2024/01/15 10:00:00"),
            json!("15-01-2024 10:00:00"),
            json!(1_705_312_800),
            json!(1_705_312_800.0),
            json!("1705312800"),
        ] {
            let report = json!({ "device_id": "AA:BB:CC:DD:EE:FF", "rssi": -45, "observed_at": ts });
            let sighting = parser().parse_value(&report, None, ctx()).unwrap();
            assert_eq!(sighting.observed_at, expected, "timestamp {ts}");
        }
    }

    #[test]
    fn test_fractional_unix_timestamp() {
        let report = json!({ "device_id": "AA:BB:CC:DD:EE:FF", "rssi": -45, "ts": 1_705_312_800.25 });
        let sighting = parser().parse_value(&report, None, ctx()).unwrap();
        assert_eq!(sighting.observed_at.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_unparseable_timestamp() {
        for ts in [json!("yesterday"), json!(true), json!("2024-13-45T99:00:00Z")] {
            let report = json!({ "device_id": "AA:BB:CC:DD:EE:FF", "rssi": -45, "timestamp": ts });
            let err = parser().parse_value(&report, None, ctx()).unwrap_err();
            assert!(matches!(err, ParseError::InvalidTimestamp { .. }), "timestamp {ts}");
        }
    }

    #[test]
    fn test_timestamp_outside_window() {
        // 10 minutes ahead, 2 days behind
        for ts in ["2024-01-15T10:40:00Z", "2024-01-13T10:30:00Z"] {
            let report = json!({ "device_id": "AA:BB:CC:DD:EE:FF", "rssi": -45, "timestamp": ts });
            let err = parser().parse_value(&report, None, ctx()).unwrap_err();
            assert!(matches!(err, ParseError::InvalidTimestamp { .. }), "timestamp {ts}");
        }

        // small jitter either way is fine
        for ts in ["2024-01-15T10:34:00Z", "2024-01-15T09:00:00Z"] {
            let report = json!({ "device_id": "AA:BB:CC:DD:EE:FF", "rssi": -45, "timestamp": ts });
            assert!(parser().parse_value(&report, None, ctx()).is_ok(), "timestamp {ts}");
        }
    }

    #[test]
    fn test_unrecognized_format() {
        let err = parser().parse_text("not json", ctx()).unwrap_err();
        assert!(matches!(err, ParseError::UnrecognizedFormat(_)));

        let err = parser().parse_text("[1, 2, 3]", ctx()).unwrap_err();
        assert!(matches!(err, ParseError::UnrecognizedFormat(_)));
        assert_eq!(err.code(), "unrecognized_format");
    }
}
