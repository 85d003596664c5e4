//! HFP message decoding
//!
//! The operator publishes one message per vehicle position on topics shaped
//! `<prefix>/journey/<mode>/...`, with a JSON body of the form
//! `{"VP": {"veh": "1234", "lat": 60.2, "long": 24.9, "desi": "55"}}`.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::DecodeError;
use crate::report::{VehicleMode, VehiclePositionReport};
use crate::Result;

/// Position of the mode segment in a topic, after any leading `/`.
const MODE_SEGMENT: usize = 2;

/// Message envelope as published on the broker.
#[derive(Debug, Deserialize)]
struct Envelope {
    /// The vehicle position wrapper.
    #[serde(rename = "VP")]
    vehicle_position: VehiclePosition,
}

/// Vehicle position fields used by the map.
#[derive(Debug, Deserialize)]
struct VehiclePosition {
    /// Vehicle identifier.
    veh: String,

    /// Latitude in WGS84.
    lat: f64,

    /// Longitude in WGS84.
    long: f64,

    /// Route designation shown to passengers.
    #[serde(default)]
    desi: Option<String>,
}

/// Decode a raw message, stamping it with the current time.
///
/// # Errors
///
/// Returns [`DecodeError::MalformedTopic`] when the topic has no mode segment
/// and [`DecodeError::MalformedPayload`] when the body is not a valid vehicle
/// position message.
pub fn decode(topic: &str, payload: &[u8]) -> Result<VehiclePositionReport> {
    decode_at(topic, payload, Utc::now())
}

/// Decode a raw message received at `received_at`.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_at(
    topic: &str, payload: &[u8], received_at: DateTime<Utc>,
) -> Result<VehiclePositionReport> {
    let vehicle_mode = mode_from_topic(topic)?;
    let envelope: Envelope = serde_json::from_slice(payload)?;
    let VehiclePosition { veh, lat, long, desi } = envelope.vehicle_position;

    if !lat.is_finite() || !long.is_finite() {
        return Err(DecodeError::MalformedPayload(format!(
            "non-finite position for vehicle {veh}: ({lat}, {long})"
        )));
    }

    Ok(VehiclePositionReport {
        vehicle_id: veh,
        latitude: lat,
        longitude: long,
        vehicle_mode,
        line_designation: desi,
        received_at,
    })
}

/// Resolve the vehicle mode from a message topic.
///
/// A single leading `/` is ignored so that `/hfp/journey/bus/...` and
/// `hfp/journey/bus/...` resolve to the same segment. Unrecognised modes map
/// to [`VehicleMode::Unknown`].
///
/// # Errors
///
/// Returns [`DecodeError::MalformedTopic`] when the topic has too few segments
/// or the mode segment is empty.
pub fn mode_from_topic(topic: &str) -> Result<VehicleMode> {
    let path = topic.strip_prefix('/').unwrap_or(topic);
    let Some(segment) = path.split('/').nth(MODE_SEGMENT).filter(|segment| !segment.is_empty())
    else {
        return Err(DecodeError::MalformedTopic(format!("no mode segment in topic '{topic}'")));
    };
    Ok(VehicleMode::from(segment))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    const BUS_TOPIC: &str = "base/journey/bus/123";

    fn received_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 1, 22, 12, 0, 0).single().expect("valid timestamp")
    }

    // Should decode every field of a complete message.
    #[test]
    fn full_message() {
        let payload = br#"{"VP":{"veh":"B1","lat":60.2,"long":24.9,"desi":"55"}}"#;
        let report = decode_at(BUS_TOPIC, payload, received_at()).expect("should decode");

        assert_eq!(
            report,
            VehiclePositionReport {
                vehicle_id: "B1".to_string(),
                latitude: 60.2,
                longitude: 24.9,
                vehicle_mode: VehicleMode::Bus,
                line_designation: Some("55".to_string()),
                received_at: received_at(),
            }
        );
    }

    // Should leave the line designation empty when the message omits it.
    #[test]
    fn without_line() {
        let payload = br#"{"VP":{"veh":"B1","lat":60.21,"long":24.95}}"#;
        let report = decode(BUS_TOPIC, payload).expect("should decode");

        assert_eq!(report.line_designation, None);
        assert!(report.latitude.eq(&60.21));
        assert!(report.longitude.eq(&24.95));
    }

    // Should treat an explicit null line designation as absent.
    #[test]
    fn null_line() {
        let payload = br#"{"VP":{"veh":"B1","lat":60.2,"long":24.9,"desi":null}}"#;
        let report = decode(BUS_TOPIC, payload).expect("should decode");
        assert_eq!(report.line_designation, None);
    }

    // Should ignore fields the map does not use.
    #[test]
    fn extra_fields() {
        let payload = br#"{"VP":{"veh":"1203","lat":60.17,"long":24.94,"desi":"4","spd":4.2,"hdg":91,"oday":"2017-01-22"}}"#;
        let report = decode("/hfp/journey/tram/1203", payload).expect("should decode");

        assert_eq!(report.vehicle_id, "1203");
        assert_eq!(report.vehicle_mode, VehicleMode::Tram);
    }

    // Should reject messages missing any required field.
    #[test]
    fn missing_required() {
        let payloads: [&[u8]; 3] = [
            br#"{"VP":{"lat":60.2,"long":24.9}}"#,
            br#"{"VP":{"veh":"B1","long":24.9}}"#,
            br#"{"VP":{"veh":"B1","lat":60.2}}"#,
        ];

        for payload in payloads {
            let err = decode(BUS_TOPIC, payload).expect_err("should fail");
            assert_eq!(err.code(), "malformed_payload");
        }
    }

    // Should reject required fields of the wrong type.
    #[test]
    fn wrong_type() {
        let payloads: [&[u8]; 3] = [
            br#"{"VP":{"veh":12,"lat":60.2,"long":24.9}}"#,
            br#"{"VP":{"veh":"B1","lat":"60.2","long":24.9}}"#,
            br#"{"VP":{"veh":"B1","lat":60.2,"long":null}}"#,
        ];

        for payload in payloads {
            let err = decode(BUS_TOPIC, payload).expect_err("should fail");
            assert!(matches!(err, DecodeError::MalformedPayload(_)), "unexpected error: {err}");
        }
    }

    // Should reject any other top-level shape.
    #[test]
    fn wrong_envelope() {
        let payloads: [&[u8]; 5] =
            [br#"{"foo":1}"#, br#"[1,2,3]"#, br#""VP""#, br#"{"VP":"B1"}"#, b"not json"];

        for payload in payloads {
            let err = decode(BUS_TOPIC, payload).expect_err("should fail");
            assert_eq!(err.code(), "malformed_payload");
        }
    }

    // Should reject bodies that are not UTF-8 JSON.
    #[test]
    fn binary_payload() {
        let err = decode(BUS_TOPIC, &[0xff, 0xfe, 0x00]).expect_err("should fail");
        assert_eq!(err.code(), "malformed_payload");
    }

    // Should resolve the mode with or without a leading slash.
    #[test]
    fn topic_mode() {
        assert_eq!(mode_from_topic("/hfp/journey/tram/1203").unwrap(), VehicleMode::Tram);
        assert_eq!(mode_from_topic("hfp/journey/subway/61").unwrap(), VehicleMode::Subway);
        assert_eq!(mode_from_topic("base/journey/ferry").unwrap(), VehicleMode::Ferry);
        assert_eq!(mode_from_topic("/hfp/journey/rail/#").unwrap(), VehicleMode::Rail);
    }

    // Should map unrecognised modes to unknown rather than failing.
    #[test]
    fn unknown_mode() {
        let payload = br#"{"VP":{"veh":"X9","lat":60.2,"long":24.9}}"#;
        let report = decode("/hfp/journey/monorail/X9", payload).expect("should decode");
        assert_eq!(report.vehicle_mode, VehicleMode::Unknown);
    }

    // Should reject topics without a mode segment before reading the body.
    #[test]
    fn short_topic() {
        for topic in ["", "/", "base", "base/journey", "/hfp/journey"] {
            let err = decode(topic, b"not json").expect_err("should fail");
            assert_eq!(err.code(), "malformed_topic", "topic '{topic}'");
        }
    }

    // Should reject topics whose mode segment is empty.
    #[test]
    fn empty_mode_segment() {
        for topic in ["base/journey/", "hfp/journey//1", "/hfp/journey//bus"] {
            let err = mode_from_topic(topic).expect_err("should fail");
            assert_eq!(err.code(), "malformed_topic", "topic '{topic}'");
        }
    }
}
