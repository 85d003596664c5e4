//! Replay of messages captured from the HFP broker.
#![cfg(not(miri))]

use std::fs::File;

use anyhow::Result;
use serde::Deserialize;
use vehicle_position::{VehicleMode, decode};

/// One captured message and the outcome it should produce.
#[derive(Deserialize, Debug)]
struct Recorded {
    topic: String,
    payload: String,
    report: Option<Expected>,
    error: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Expected {
    vehicle_id: String,
    mode: VehicleMode,
    latitude: f64,
    longitude: f64,
    line: Option<String>,
}

// Run every captured message through the decoder.
#[test]
fn replay() -> Result<()> {
    let reader = File::open("data/recorded.yaml")?;
    let recorded: Vec<Recorded> = serde_yaml::from_reader(reader)?;
    assert!(!recorded.is_empty());

    for message in recorded {
        let result = decode(&message.topic, message.payload.as_bytes());

        match (&message.report, &message.error) {
            (Some(expected), None) => {
                let report = result.expect("should decode");
                assert_eq!(report.vehicle_id, expected.vehicle_id);
                assert_eq!(report.vehicle_mode, expected.mode);
                assert!(report.latitude.eq(&expected.latitude), "{message:?}");
                assert!(report.longitude.eq(&expected.longitude), "{message:?}");
                assert_eq!(report.line_designation, expected.line);
            }
            (None, Some(code)) => {
                let err = result.expect_err("should fail");
                assert_eq!(err.code(), code, "{message:?}");
            }
            _ => panic!("recording must have either a report or an error: {message:?}"),
        }
    }

    Ok(())
}
