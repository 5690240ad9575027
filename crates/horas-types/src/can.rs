//! CAN bus frames.

use chrono::{DateTime, Utc};
use prost::Message;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, InvariantViolation};
use crate::message::{Schema, TelemetryMessage, TelemetryRecord, timestamp_datetime};

/// Largest identifier representable in an 11-bit standard frame.
pub const CAN_STANDARD_ID_MAX: u32 = 0x7FF;
/// Largest identifier representable in a 29-bit extended frame.
pub const CAN_EXTENDED_ID_MAX: u32 = 0x1FFF_FFFF;
/// Classic CAN data length limit.
pub const CAN_MAX_DATA_LEN: usize = 8;

/// One CAN frame as published on a raw CAN topic (e.g. `can/tx/raw`).
#[derive(Clone, PartialEq, Message, Serialize, Deserialize, JsonSchema)]
pub struct CanFrame {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
    #[prost(bool, tag = "3")]
    pub is_extended_id: bool,
    /// Milliseconds since the Unix epoch.
    #[prost(uint64, tag = "4")]
    pub timestamp: u64,
}

impl CanFrame {
    /// Standard (11-bit) frame.
    pub fn new(id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            data: data.into(),
            is_extended_id: false,
            timestamp: 0,
        }
    }

    /// Extended (29-bit) frame.
    pub fn extended(id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            is_extended_id: true,
            ..Self::new(id, data)
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp = timestamp_ms;
        self
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        timestamp_datetime(self.timestamp)
    }
}

impl TelemetryMessage for CanFrame {
    const SCHEMA: Schema = Schema::Can;

    fn encode_payload(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    fn decode_payload(payload: &[u8]) -> Result<Self, DecodeError> {
        <Self as Message>::decode(payload).map_err(|e| DecodeError::new(Schema::Can, e.to_string()))
    }

    fn validate(&self) -> Result<(), InvariantViolation> {
        if self.data.len() > CAN_MAX_DATA_LEN {
            return Err(InvariantViolation::CanDataTooLong {
                len: self.data.len(),
            });
        }
        let (max, bits) = if self.is_extended_id {
            (CAN_EXTENDED_ID_MAX, 29)
        } else {
            (CAN_STANDARD_ID_MAX, 11)
        };
        if self.id > max {
            return Err(InvariantViolation::CanIdOutOfRange { id: self.id, bits });
        }
        Ok(())
    }

    fn prepare_outbound(&mut self, now_ms: u64) {
        if self.timestamp == 0 {
            self.timestamp = now_ms;
        }
    }

    fn into_record(self) -> TelemetryRecord {
        TelemetryRecord::Can(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_frame_roundtrips() {
        let frame = CanFrame::new(0x123, vec![0x01, 0x02, 0x03, 0x04]).with_timestamp(1_700_000_000_000);
        assert!(frame.validate().is_ok());
        let decoded = CanFrame::decode_payload(&frame.encode_payload()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn standard_id_boundary() {
        assert!(CanFrame::new(CAN_STANDARD_ID_MAX, vec![]).validate().is_ok());
        assert_eq!(
            CanFrame::new(CAN_STANDARD_ID_MAX + 1, vec![]).validate(),
            Err(InvariantViolation::CanIdOutOfRange { id: 0x800, bits: 11 })
        );
    }

    #[test]
    fn extended_id_boundary() {
        assert!(CanFrame::extended(CAN_EXTENDED_ID_MAX, vec![]).validate().is_ok());
        assert!(matches!(
            CanFrame::extended(CAN_EXTENDED_ID_MAX + 1, vec![]).validate(),
            Err(InvariantViolation::CanIdOutOfRange { bits: 29, .. })
        ));
    }

    #[test]
    fn nine_data_bytes_rejected() {
        let frame = CanFrame::new(0x10, vec![0; 9]);
        assert_eq!(
            frame.validate(),
            Err(InvariantViolation::CanDataTooLong { len: 9 })
        );
    }

    #[test]
    fn outbound_stamps_only_missing_timestamp() {
        let mut fresh = CanFrame::new(0x1, vec![]);
        fresh.prepare_outbound(99);
        assert_eq!(fresh.timestamp, 99);

        let mut stamped = CanFrame::new(0x1, vec![]).with_timestamp(7);
        stamped.prepare_outbound(99);
        assert_eq!(stamped.timestamp, 7);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        // Field 10, length-delimited, claims 65 bytes that are not there.
        let err = CanFrame::decode_payload(b"RANGE").unwrap_err();
        assert_eq!(err.schema, Schema::Can);
        assert!(CanFrame::decode_payload(&[0x00]).is_err());
    }

    #[test]
    fn datetime_follows_timestamp() {
        let frame = CanFrame::new(0x1, vec![]).with_timestamp(1_700_000_000_000);
        assert_eq!(frame.datetime().unwrap().timestamp(), 1_700_000_000);
    }
}
