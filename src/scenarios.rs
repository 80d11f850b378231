/*!
 * The two reference round trips: synthetic edge-case frames and DBC-encoded application frames
 */

use anyhow::{anyhow, Context, Result};
use log::warn;

use crate::can_database::CanDatabase;
use crate::can_decoder::SignalsMap;
use crate::can_frame::{CanFrame, CAN_EFF_FLAG, CAN_ERR_FLAG, CAN_RTR_FLAG};
use crate::errors::DecodeError;
use crate::harness::{Classification, FrameClassifier, HarnessConfig, IdClassifier, RoundTrip};

pub const REFERENCE_BITRATE: u32 = 1_000_000;

const EDGE_CASE_DATA: [u8; 8] = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];

/// Message, signal and value of each application frame.
pub const APPLICATION_SIGNALS: [(&str, &str, f64); 2] = [
    ("ECU_MSG1", "EngineSpeed", 600.0),
    ("ECU_MSG2", "VehicleSpeed", 130.0),
];

/// Standard/extended ids with and without payload, plus error and RTR flags.
pub fn edge_case_frames() -> Vec<CanFrame> {
    vec![
        CanFrame::new(0x7FF, &EDGE_CASE_DATA),
        CanFrame::new(0x7FF, &[]),
        CanFrame::new(0x7FF | CAN_ERR_FLAG, &EDGE_CASE_DATA),
        CanFrame::new(0x12345678 | CAN_EFF_FLAG, &EDGE_CASE_DATA),
        CanFrame::new(0x12345678 | CAN_EFF_FLAG, &[]),
        CanFrame::new(0x7FF | CAN_RTR_FLAG, &[]),
        CanFrame::new(0x12345678 | CAN_RTR_FLAG | CAN_EFF_FLAG, &[]),
        CanFrame::new(0x7FF | CAN_RTR_FLAG, &EDGE_CASE_DATA),
    ]
}

fn reference_config() -> HarnessConfig {
    HarnessConfig::default().with_bitrate(REFERENCE_BITRATE)
}

pub fn edge_case_round_trip() -> RoundTrip<IdClassifier> {
    let frames = edge_case_frames();
    let classifier = IdClassifier::from_frames(&frames);
    RoundTrip::new(frames, classifier).with_config(reference_config())
}

/// Encode the application frames from `db`.
pub fn application_frames(db: &CanDatabase) -> Result<Vec<CanFrame>> {
    APPLICATION_SIGNALS
        .iter()
        .map(|(message, signal, value)| {
            let definition = db
                .message_by_name(message)
                .ok_or_else(|| anyhow!("{:?} has no message {}", db.path(), message))?;
            definition
                .frame(&SignalsMap::new(&[(*signal, *value)]))
                .with_context(|| format!("unable to encode {}", message))
        })
        .collect()
}

/// Recognises frames of the expected messages and decodes them with the database.
pub struct DbcClassifier<'db> {
    db: &'db CanDatabase,
    expected: Vec<u32>,
}

impl<'db> DbcClassifier<'db> {
    pub fn new(db: &'db CanDatabase, frames: &[CanFrame]) -> Self {
        DbcClassifier {
            db,
            expected: frames.iter().map(CanFrame::message_id).collect(),
        }
    }
}

impl FrameClassifier for DbcClassifier<'_> {
    fn classify(&self, frame: &CanFrame) -> Classification {
        let id = frame.message_id();
        if !self.expected.contains(&id) {
            return Classification::Unclassified;
        }
        let Some(message) = self.db.message_by_id(id) else {
            return Classification::Unclassified;
        };
        // remote requests name the message but carry no values
        let signals = match self.db.decode_frame(frame) {
            Ok(signals) => Some(signals),
            Err(DecodeError::NotADataFrame(_)) => None,
            Err(e) => {
                warn!("{} arrived but did not decode: {}", message.name(), e);
                None
            }
        };
        Classification::Matched {
            label: message.name().to_string(),
            signals,
        }
    }
}

pub fn application_round_trip(db: &CanDatabase) -> Result<RoundTrip<DbcClassifier<'_>>> {
    let frames = application_frames(db)?;
    let classifier = DbcClassifier::new(db, &frames);
    Ok(RoundTrip::new(frames, classifier).with_config(reference_config()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_adapter::VirtualAdapter;
    use std::time::Duration;

    fn fast(config: &HarnessConfig) -> HarnessConfig {
        config
            .clone()
            .with_tick(Duration::from_millis(20))
            .with_poll_timeout(Duration::from_millis(20))
    }

    #[test]
    fn test_edge_case_frames() {
        let frames = edge_case_frames();
        assert_eq!(frames.len(), 8);
        assert_eq!(frames.iter().filter(|f| f.is_extended()).count(), 3);
        assert_eq!(frames.iter().filter(|f| f.is_remote()).count(), 3);
        assert_eq!(frames.iter().filter(|f| f.is_error()).count(), 1);
        assert_eq!(frames[1].len, 0);
        assert_eq!(frames[7].len, 8);
    }

    #[test]
    fn test_edge_case_round_trip_on_virtual_adapter() {
        let round_trip = edge_case_round_trip();
        assert_eq!(round_trip.config().bitrate, REFERENCE_BITRATE);
        assert_eq!(round_trip.outbound(), edge_case_frames().as_slice());
        let round_trip = round_trip.with_config(fast(&HarnessConfig::default()));

        let report = round_trip.run(&mut VirtualAdapter::new()).unwrap();
        assert_eq!(report.sent_indices(), vec![0, 1, 2, 3, 4, 5]);
        // echoes of 0..4 come back; index 2 is the error frame
        assert_eq!(report.error_frames, 1);
        assert_eq!(report.receptions.len(), 4);
        assert_eq!(report.unclassified().count(), 0);
    }

    #[test]
    fn test_application_frames_encode_vehicle_signals() {
        let db = CanDatabase::load("vehicle.dbc").unwrap();
        let frames = application_frames(&db).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].can_id, 256);
        assert_eq!(frames[0].payload(), &[0x58, 0x02, 0, 0, 0, 0, 0, 0]);
        assert_eq!(frames[1].can_id, 512);
        assert_eq!(frames[1].payload()[0], 130);
    }

    #[test]
    fn test_application_frames_missing_message() {
        let db = CanDatabase::load("control.dbc").unwrap();
        let err = application_frames(&db).unwrap_err();
        assert!(err.to_string().contains("ECU_MSG1"));
    }

    #[test]
    fn test_application_round_trip_decodes_echoes() {
        let db = CanDatabase::load("vehicle.dbc").unwrap();
        let round_trip = application_round_trip(&db).unwrap();
        let config = fast(round_trip.config());
        let round_trip = round_trip.with_config(config);

        let mut adapter = VirtualAdapter::new();
        adapter.inject(CanFrame::new(0x7E0, &[0x02, 0x01, 0x0C]));
        let report = round_trip.run(&mut adapter).unwrap();

        assert_eq!(report.sent_indices(), vec![0, 1, 0, 1, 0, 1]);
        assert_eq!(report.unclassified().count(), 1);

        let matched: Vec<_> = report.matched().collect();
        assert_eq!(matched.len(), 5);
        assert_eq!(
            matched[0].classification,
            Classification::Matched {
                label: "ECU_MSG1".to_string(),
                signals: Some(SignalsMap::new(&[("EngineSpeed", 600.0)])),
            }
        );
        assert_eq!(
            matched[1].classification,
            Classification::Matched {
                label: "ECU_MSG2".to_string(),
                signals: Some(SignalsMap::new(&[("VehicleSpeed", 130.0)])),
            }
        );
    }

    #[test]
    fn test_dbc_classifier_remote_request_has_no_signals() {
        let db = CanDatabase::load("vehicle.dbc").unwrap();
        let frames = application_frames(&db).unwrap();
        let classifier = DbcClassifier::new(&db, &frames);
        let mut request = CanFrame::new(256 | CAN_RTR_FLAG, &[]);
        request.len = 8;
        assert_eq!(
            classifier.classify(&request),
            Classification::Matched {
                label: "ECU_MSG1".to_string(),
                signals: None,
            }
        );
    }

    #[test]
    fn test_dbc_classifier_short_payload_still_matches() {
        let db = CanDatabase::load("vehicle.dbc").unwrap();
        let frames = application_frames(&db).unwrap();
        let classifier = DbcClassifier::new(&db, &frames);
        let short = CanFrame::new(256, &[0x58]);
        assert_eq!(
            classifier.classify(&short),
            Classification::Matched {
                label: "ECU_MSG1".to_string(),
                signals: None,
            }
        );
    }
}
